//! Field-level checks shared by the section builders.

use crate::error::ConfigError;

pub(crate) fn positive_u32(field: &str, value: u32) -> Result<u32, ConfigError> {
    if value < 1 {
        return Err(ConfigError::invalid(
            field,
            format!("must be a positive integer, but was: {value}"),
        ));
    }
    Ok(value)
}

pub(crate) fn optional_positive_u32(
    field: &str,
    value: Option<u32>,
) -> Result<Option<u32>, ConfigError> {
    value.map(|v| positive_u32(field, v)).transpose()
}

pub(crate) fn list_of_positive(field: &str, values: &[u32]) -> Result<Vec<u32>, ConfigError> {
    for (ind, item) in values.iter().enumerate() {
        if *item < 1 {
            return Err(ConfigError::invalid(
                field,
                format!(
                    "all elements must be positive integers, but item at index {ind} was: {item}"
                ),
            ));
        }
    }
    Ok(values.to_vec())
}

/// Each value may appear once.
pub(crate) fn distinct(field: &str, values: &[u32]) -> Result<(), ConfigError> {
    for (ind, item) in values.iter().enumerate() {
        if values[..ind].contains(item) {
            return Err(ConfigError::invalid(
                field,
                format!("elements must be unique, but {item} appears more than once"),
            ));
        }
    }
    Ok(())
}

pub(crate) fn non_empty_list_of_positive(
    field: &str,
    values: &[u32],
) -> Result<Vec<u32>, ConfigError> {
    if values.is_empty() {
        return Err(ConfigError::invalid(field, "must not be an empty list"));
    }
    list_of_positive(field, values)
}

pub(crate) fn learning_rate(field: &str, value: f64) -> Result<f64, ConfigError> {
    if !value.is_finite() || value < 0.0 {
        return Err(ConfigError::invalid(
            field,
            format!("must be a finite, non-negative number, but was: {value}"),
        ));
    }
    Ok(value)
}

/// Narrow a signed integer read from a config source.
pub(crate) fn to_u32(field: &str, value: i64) -> Result<u32, ConfigError> {
    u32::try_from(value).map_err(|_| {
        ConfigError::invalid(
            field,
            format!("must be a non-negative integer, but was: {value}"),
        )
    })
}

pub(crate) fn to_u32_list(field: &str, values: &[i64]) -> Result<Vec<u32>, ConfigError> {
    values
        .iter()
        .enumerate()
        .map(|(ind, v)| {
            u32::try_from(*v).map_err(|_| {
                ConfigError::invalid(
                    field,
                    format!("all elements must be positive integers, but item at index {ind} was: {v}"),
                )
            })
        })
        .collect()
}
