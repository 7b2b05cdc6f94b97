//! `[data]` section: dataset files, dataset kind and split sizes.

use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use super::checks;
use crate::error::ConfigError;

/// Tolerance when summing proportions, so 0.7 + 0.2 + 0.1 is not rejected.
const PROPORTION_TOLERANCE: f64 = 1e-9;

/// Source of the stimuli a network is trained on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DatasetType {
    /// Images generated by the `searchstims` package.
    #[serde(rename = "searchstims")]
    Searchstims,
    /// Pascal VOC images used to build the Visual Search Difficulty dataset.
    #[serde(rename = "VSD")]
    Vsd,
}

impl DatasetType {
    pub const CHOICES: [&'static str; 2] = ["searchstims", "VSD"];

    pub fn as_str(&self) -> &'static str {
        match self {
            DatasetType::Searchstims => "searchstims",
            DatasetType::Vsd => "VSD",
        }
    }
}

impl fmt::Display for DatasetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DatasetType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "searchstims" => Ok(DatasetType::Searchstims),
            "VSD" => Ok(DatasetType::Vsd),
            other => Err(ConfigError::choice("dataset_type", other, &Self::CHOICES)),
        }
    }
}

/// Size of one dataset split: an absolute sample count or a proportion.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SplitSize {
    Count(u64),
    Proportion(f64),
}

impl SplitSize {
    pub fn is_proportion(&self) -> bool {
        matches!(self, SplitSize::Proportion(_))
    }

    fn check(self, field: &str) -> Result<Self, ConfigError> {
        match self {
            SplitSize::Count(0) => Err(ConfigError::invalid(
                field,
                "if specified as a count, must be a positive integer",
            )),
            SplitSize::Proportion(p) if !(0.0..=1.0).contains(&p) => Err(ConfigError::invalid(
                field,
                format!("if specified as a proportion, must be between 0 and 1, but was {p}"),
            )),
            ok => Ok(ok),
        }
    }
}

/// Validated `[data]` section.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataConfig {
    csv_file_in: PathBuf,
    csv_file_out: PathBuf,
    dataset_type: DatasetType,
    #[serde(skip_serializing_if = "Option::is_none")]
    root: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stim_types: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    set_sizes: Option<Vec<u32>>,
    train_size: SplitSize,
    #[serde(skip_serializing_if = "Option::is_none")]
    val_size: Option<SplitSize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    test_size: Option<SplitSize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    train_size_per_set_size: Option<Vec<u32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    val_size_per_set_size: Option<Vec<u32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    test_size_per_set_size: Option<Vec<u32>>,
}

impl DataConfig {
    pub fn builder(csv_file_in: impl Into<PathBuf>, train_size: SplitSize) -> DataConfigBuilder {
        DataConfigBuilder {
            csv_file_in: csv_file_in.into(),
            train_size,
            csv_file_out: None,
            dataset_type: DatasetType::Searchstims,
            root: None,
            stim_types: None,
            set_sizes: None,
            val_size: None,
            test_size: None,
            train_size_per_set_size: None,
            val_size_per_set_size: None,
            test_size_per_set_size: None,
        }
    }

    pub fn csv_file_in(&self) -> &Path {
        &self.csv_file_in
    }

    /// Split file written by the data preparation step; `<csv_file_in>_split.csv` unless set.
    pub fn csv_file_out(&self) -> &Path {
        &self.csv_file_out
    }

    pub fn dataset_type(&self) -> DatasetType {
        self.dataset_type
    }

    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    pub fn stim_types(&self) -> Option<&[String]> {
        self.stim_types.as_deref()
    }

    pub fn set_sizes(&self) -> Option<&[u32]> {
        self.set_sizes.as_deref()
    }

    pub fn train_size(&self) -> SplitSize {
        self.train_size
    }

    pub fn val_size(&self) -> Option<SplitSize> {
        self.val_size
    }

    pub fn test_size(&self) -> Option<SplitSize> {
        self.test_size
    }

    pub fn train_size_per_set_size(&self) -> Option<&[u32]> {
        self.train_size_per_set_size.as_deref()
    }

    pub fn val_size_per_set_size(&self) -> Option<&[u32]> {
        self.val_size_per_set_size.as_deref()
    }

    pub fn test_size_per_set_size(&self) -> Option<&[u32]> {
        self.test_size_per_set_size.as_deref()
    }
}

/// Builder for [`DataConfig`]; `build` runs every check before anything is returned.
#[derive(Debug, Clone)]
pub struct DataConfigBuilder {
    csv_file_in: PathBuf,
    train_size: SplitSize,
    csv_file_out: Option<PathBuf>,
    dataset_type: DatasetType,
    root: Option<PathBuf>,
    stim_types: Option<Vec<String>>,
    set_sizes: Option<Vec<u32>>,
    val_size: Option<SplitSize>,
    test_size: Option<SplitSize>,
    train_size_per_set_size: Option<Vec<u32>>,
    val_size_per_set_size: Option<Vec<u32>>,
    test_size_per_set_size: Option<Vec<u32>>,
}

impl DataConfigBuilder {
    pub fn csv_file_out(mut self, path: impl Into<PathBuf>) -> Self {
        self.csv_file_out = Some(path.into());
        self
    }

    pub fn dataset_type(mut self, dataset_type: DatasetType) -> Self {
        self.dataset_type = dataset_type;
        self
    }

    pub fn root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = Some(root.into());
        self
    }

    pub fn stim_types(mut self, stim_types: Vec<String>) -> Self {
        self.stim_types = Some(stim_types);
        self
    }

    pub fn set_sizes(mut self, set_sizes: Vec<u32>) -> Self {
        self.set_sizes = Some(set_sizes);
        self
    }

    pub fn val_size(mut self, size: SplitSize) -> Self {
        self.val_size = Some(size);
        self
    }

    pub fn test_size(mut self, size: SplitSize) -> Self {
        self.test_size = Some(size);
        self
    }

    pub fn train_size_per_set_size(mut self, sizes: Vec<u32>) -> Self {
        self.train_size_per_set_size = Some(sizes);
        self
    }

    pub fn val_size_per_set_size(mut self, sizes: Vec<u32>) -> Self {
        self.val_size_per_set_size = Some(sizes);
        self
    }

    pub fn test_size_per_set_size(mut self, sizes: Vec<u32>) -> Self {
        self.test_size_per_set_size = Some(sizes);
        self
    }

    pub fn build(self) -> Result<DataConfig, ConfigError> {
        let train_size = self.train_size.check("train_size")?;
        let val_size = self.val_size.map(|s| s.check("val_size")).transpose()?;
        let test_size = self.test_size.map(|s| s.check("test_size")).transpose()?;

        if let Some(set_sizes) = &self.set_sizes {
            checks::list_of_positive("set_sizes", set_sizes)?;
        }
        let per_set_size = |field: &str, sizes: Option<Vec<u32>>| {
            sizes
                .map(|s| checks::non_empty_list_of_positive(field, &s))
                .transpose()
        };
        let train_size_per_set_size =
            per_set_size("train_size_per_set_size", self.train_size_per_set_size)?;
        let val_size_per_set_size =
            per_set_size("val_size_per_set_size", self.val_size_per_set_size)?;
        let test_size_per_set_size =
            per_set_size("test_size_per_set_size", self.test_size_per_set_size)?;

        check_split_sizes(train_size, val_size, test_size)?;

        let csv_file_out = self
            .csv_file_out
            .unwrap_or_else(|| default_csv_file_out(&self.csv_file_in));

        Ok(DataConfig {
            csv_file_in: self.csv_file_in,
            csv_file_out,
            dataset_type: self.dataset_type,
            root: self.root,
            stim_types: self.stim_types,
            set_sizes: self.set_sizes,
            train_size,
            val_size,
            test_size,
            train_size_per_set_size,
            val_size_per_set_size,
            test_size_per_set_size,
        })
    }
}

/// If any split is a proportion, every given split must be one, and together they cannot exceed 1.
fn check_split_sizes(
    train: SplitSize,
    val: Option<SplitSize>,
    test: Option<SplitSize>,
) -> Result<(), ConfigError> {
    let sizes: Vec<SplitSize> = std::iter::once(train).chain(val).chain(test).collect();
    if !sizes.iter().any(SplitSize::is_proportion) {
        return Ok(());
    }
    if !sizes.iter().all(SplitSize::is_proportion) {
        return Err(ConfigError::inconsistent(
            "if the size of any split of the dataset is specified as a proportion, \
             then they all must be specified as a proportion",
        ));
    }
    let total: f64 = sizes
        .iter()
        .map(|s| match s {
            SplitSize::Proportion(p) => *p,
            SplitSize::Count(_) => 0.0,
        })
        .sum();
    if total > 1.0 + PROPORTION_TOLERANCE {
        return Err(ConfigError::inconsistent(format!(
            "when specified as proportions, total of train_size, val_size, and test_size \
             cannot be greater than 1, but was {total}"
        )));
    }
    Ok(())
}

fn default_csv_file_out(csv_file_in: &Path) -> PathBuf {
    let mut name = OsString::from(csv_file_in.as_os_str());
    name.push("_split.csv");
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_csv_file_out_default() {
        let config = DataConfig::builder("stims/alexnet.csv", SplitSize::Count(100))
            .build()
            .unwrap();
        assert_eq!(
            config.csv_file_out(),
            Path::new("stims/alexnet.csv_split.csv")
        );
    }

    #[test]
    fn test_csv_file_out_kept_when_given() {
        let config = DataConfig::builder("in.csv", SplitSize::Count(100))
            .csv_file_out("elsewhere.csv")
            .build()
            .unwrap();
        assert_eq!(config.csv_file_out(), Path::new("elsewhere.csv"));
    }

    #[test]
    fn test_mixed_split_sizes_fail() {
        let result = DataConfig::builder("in.csv", SplitSize::Proportion(0.5))
            .val_size(SplitSize::Count(100))
            .build();
        assert!(matches!(result, Err(ConfigError::Inconsistent { .. })));
    }

    #[test]
    fn test_proportions_summing_past_one_fail() {
        let result = DataConfig::builder("in.csv", SplitSize::Proportion(0.7))
            .val_size(SplitSize::Proportion(0.2))
            .test_size(SplitSize::Proportion(0.2))
            .build();
        assert!(matches!(result, Err(ConfigError::Inconsistent { .. })));
    }

    #[test]
    fn test_proportions_summing_to_one_pass() {
        let config = DataConfig::builder("in.csv", SplitSize::Proportion(0.7))
            .val_size(SplitSize::Proportion(0.2))
            .test_size(SplitSize::Proportion(0.1))
            .build()
            .unwrap();
        assert_eq!(config.test_size(), Some(SplitSize::Proportion(0.1)));
    }

    #[test]
    fn test_proportion_out_of_range() {
        let result = DataConfig::builder("in.csv", SplitSize::Proportion(1.5)).build();
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn test_zero_count_rejected() {
        let result = DataConfig::builder("in.csv", SplitSize::Count(0)).build();
        assert!(result.is_err());
    }

    #[test]
    fn test_empty_per_set_size_list_rejected() {
        let result = DataConfig::builder("in.csv", SplitSize::Count(100))
            .train_size_per_set_size(vec![])
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_dataset_type_parse() {
        assert_eq!("VSD".parse::<DatasetType>().unwrap(), DatasetType::Vsd);
        let err = "voc".parse::<DatasetType>().unwrap_err();
        assert!(err.to_string().contains("but was voc"));
    }
}
