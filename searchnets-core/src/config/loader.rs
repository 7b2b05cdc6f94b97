//! Reading a configuration file into validated sections.
//!
//! Uses `figment` for layered configuration: config file -> environment.
//! Environment variables are prefixed with `SEARCHNETS_` and nested with `__`,
//! e.g. `SEARCHNETS_TRAIN__BATCH_SIZE=32`.

use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use super::checks;
use super::data::{DataConfig, SplitSize};
use super::train::TrainConfig;
use super::{Config, LearnCurveConfig, TestConfig};
use crate::error::ConfigError;

/// Environment variable prefix for configuration overrides.
pub const ENV_PREFIX: &str = "SEARCHNETS_";

/// Load and validate a configuration file, applying `SEARCHNETS_` environment overrides.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::Load {
            message: format!("configuration file not found: {}", path.display()),
        });
    }
    let figment = Figment::from(Toml::file(path)).merge(Env::prefixed(ENV_PREFIX).split("__"));
    extract(figment)
}

/// Validate configuration given as a TOML string. Environment overrides are not applied.
pub fn load_config_str(toml: &str) -> Result<Config, ConfigError> {
    extract(Figment::from(Toml::string(toml)))
}

fn extract(figment: Figment) -> Result<Config, ConfigError> {
    let raw: RawConfig = figment.extract().map_err(|e| ConfigError::Load {
        message: e.to_string(),
    })?;
    raw.validate()
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    data: Option<RawData>,
    train: Option<RawTrain>,
    test: Option<RawTest>,
    learncurve: Option<RawLearnCurve>,
}

/// Integer literals are counts, float literals are proportions.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(untagged)]
enum RawSplitSize {
    Int(i64),
    Float(f64),
}

impl RawSplitSize {
    fn into_split_size(self, field: &str) -> Result<SplitSize, ConfigError> {
        match self {
            RawSplitSize::Int(n) => u64::try_from(n).map(SplitSize::Count).map_err(|_| {
                ConfigError::invalid(field, format!("must be a positive integer, but was {n}"))
            }),
            RawSplitSize::Float(p) => Ok(SplitSize::Proportion(p)),
        }
    }
}

/// `epochs_list` may be written as a bare integer.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum RawEpochs {
    One(i64),
    Many(Vec<i64>),
}

#[derive(Debug, Deserialize)]
struct RawData {
    csv_file_in: Option<PathBuf>,
    train_size: Option<RawSplitSize>,
    root: Option<PathBuf>,
    dataset_type: Option<String>,
    csv_file_out: Option<PathBuf>,
    stim_types: Option<Vec<String>>,
    val_size: Option<RawSplitSize>,
    test_size: Option<RawSplitSize>,
    set_sizes: Option<Vec<i64>>,
    train_size_per_set_size: Option<Vec<i64>>,
    val_size_per_set_size: Option<Vec<i64>>,
    test_size_per_set_size: Option<Vec<i64>>,
}

#[derive(Debug, Deserialize)]
struct RawTrain {
    net_name: Option<String>,
    number_nets_to_train: Option<i64>,
    epochs_list: Option<RawEpochs>,
    batch_size: Option<i64>,
    random_seed: Option<i64>,
    save_path: Option<PathBuf>,
    method: Option<String>,
    learning_rate: Option<f64>,
    new_learn_rate_layers: Option<Vec<String>>,
    new_layer_learning_rate: Option<f64>,
    base_learning_rate: Option<f64>,
    freeze_trained_weights: Option<bool>,
    loss_func: Option<String>,
    optimizer: Option<String>,
    save_acc_by_set_size_by_epoch: Option<bool>,
    use_val: Option<bool>,
    val_epoch: Option<i64>,
    summary_step: Option<i64>,
    patience: Option<i64>,
    checkpoint_epoch: Option<i64>,
    num_workers: Option<i64>,
    data_parallel: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct RawTest {
    test_results_save_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct RawLearnCurve {
    train_size_list: Option<Vec<i64>>,
}

fn required<T>(value: Option<T>, field: &str) -> Result<T, ConfigError> {
    value.ok_or_else(|| ConfigError::MissingField {
        field: field.to_string(),
    })
}

impl RawConfig {
    fn validate(self) -> Result<Config, ConfigError> {
        let data = required(self.data, "data")?.validate()?;
        let train = required(self.train, "train")?.validate()?;
        let test = required(self.test, "test")?;
        let test = TestConfig::new(required(
            test.test_results_save_path,
            "test.test_results_save_path",
        )?);
        let learncurve = self
            .learncurve
            .map(|lc| {
                let sizes = required(lc.train_size_list, "learncurve.train_size_list")?;
                LearnCurveConfig::new(checks::to_u32_list("train_size_list", &sizes)?)
            })
            .transpose()?;
        Ok(Config::new(data, train, test, learncurve))
    }
}

impl RawData {
    fn validate(self) -> Result<DataConfig, ConfigError> {
        let csv_file_in = required(self.csv_file_in, "data.csv_file_in")?;
        let train_size =
            required(self.train_size, "data.train_size")?.into_split_size("train_size")?;
        let mut builder = DataConfig::builder(csv_file_in, train_size);

        if let Some(dataset_type) = self.dataset_type {
            builder = builder.dataset_type(dataset_type.parse()?);
        }
        if let Some(root) = self.root {
            builder = builder.root(root);
        }
        if let Some(out) = self.csv_file_out {
            builder = builder.csv_file_out(out);
        }
        if let Some(stim_types) = self.stim_types {
            builder = builder.stim_types(stim_types);
        }
        if let Some(val) = self.val_size {
            builder = builder.val_size(val.into_split_size("val_size")?);
        }
        if let Some(test) = self.test_size {
            builder = builder.test_size(test.into_split_size("test_size")?);
        }
        if let Some(set_sizes) = self.set_sizes {
            builder = builder.set_sizes(checks::to_u32_list("set_sizes", &set_sizes)?);
        }
        if let Some(sizes) = self.train_size_per_set_size {
            builder = builder
                .train_size_per_set_size(checks::to_u32_list("train_size_per_set_size", &sizes)?);
        }
        if let Some(sizes) = self.val_size_per_set_size {
            builder = builder
                .val_size_per_set_size(checks::to_u32_list("val_size_per_set_size", &sizes)?);
        }
        if let Some(sizes) = self.test_size_per_set_size {
            builder = builder
                .test_size_per_set_size(checks::to_u32_list("test_size_per_set_size", &sizes)?);
        }
        builder.build()
    }
}

impl RawTrain {
    fn validate(self) -> Result<TrainConfig, ConfigError> {
        let net_name = required(self.net_name, "train.net_name")?.parse()?;
        let number_nets_to_train = checks::to_u32(
            "number_nets_to_train",
            required(self.number_nets_to_train, "train.number_nets_to_train")?,
        )?;
        let epochs_list = match required(self.epochs_list, "train.epochs_list")? {
            RawEpochs::One(epochs) => vec![checks::to_u32("epochs_list", epochs)?],
            RawEpochs::Many(list) => checks::to_u32_list("epochs_list", &list)?,
        };
        let batch_size =
            checks::to_u32("batch_size", required(self.batch_size, "train.batch_size")?)?;
        let random_seed = required(self.random_seed, "train.random_seed")?;
        let random_seed = u64::try_from(random_seed).map_err(|_| {
            ConfigError::invalid(
                "random_seed",
                format!("must be a non-negative integer, but was {random_seed}"),
            )
        })?;
        let save_path = required(self.save_path, "train.save_path")?;

        let mut builder = TrainConfig::builder(
            net_name,
            number_nets_to_train,
            epochs_list,
            batch_size,
            random_seed,
            save_path,
        );
        if let Some(method) = self.method {
            builder = builder.method(method.parse()?);
        }
        if let Some(rate) = self.learning_rate {
            builder = builder.learning_rate(rate);
        }
        if let Some(layers) = self.new_learn_rate_layers {
            builder = builder.new_learn_rate_layers(layers);
        }
        if let Some(rate) = self.new_layer_learning_rate {
            builder = builder.new_layer_learning_rate(rate);
        }
        if let Some(rate) = self.base_learning_rate {
            builder = builder.base_learning_rate(rate);
        }
        if let Some(freeze) = self.freeze_trained_weights {
            builder = builder.freeze_trained_weights(freeze);
        }
        if let Some(loss_func) = self.loss_func {
            builder = builder.loss_func(loss_func.parse()?);
        }
        if let Some(optimizer) = self.optimizer {
            builder = builder.optimizer(optimizer.parse()?);
        }
        if let Some(enabled) = self.save_acc_by_set_size_by_epoch {
            builder = builder.save_acc_by_set_size_by_epoch(enabled);
        }
        if let Some(use_val) = self.use_val {
            builder = builder.use_val(use_val);
        }
        if let Some(v) = self.val_epoch {
            builder = builder.val_epoch(checks::to_u32("val_epoch", v)?);
        }
        if let Some(v) = self.summary_step {
            builder = builder.summary_step(checks::to_u32("summary_step", v)?);
        }
        if let Some(v) = self.patience {
            builder = builder.patience(checks::to_u32("patience", v)?);
        }
        if let Some(v) = self.checkpoint_epoch {
            builder = builder.checkpoint_epoch(checks::to_u32("checkpoint_epoch", v)?);
        }
        if let Some(v) = self.num_workers {
            builder = builder.num_workers(checks::to_u32("num_workers", v)? as usize);
        }
        if let Some(enabled) = self.data_parallel {
            builder = builder.data_parallel(enabled);
        }
        builder.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DatasetType, LossFunc, Method, NetName};

    const MINIMAL: &str = r#"
        [data]
        csv_file_in = "stims/alexnet_multiple_stims.csv"
        train_size = 6400
        val_size = 200

        [train]
        net_name = "alexnet"
        number_nets_to_train = 4
        epochs_list = [1, 5]
        batch_size = 64
        random_seed = 42
        save_path = "results/alexnet"

        [test]
        test_results_save_path = "results/test"
    "#;

    #[test]
    fn test_minimal_config_loads_with_defaults() {
        let config = load_config_str(MINIMAL).unwrap();
        assert_eq!(config.data().dataset_type(), DatasetType::Searchstims);
        assert_eq!(config.data().train_size(), SplitSize::Count(6400));
        assert_eq!(config.train().net_name(), NetName::Alexnet);
        assert_eq!(config.train().method(), Method::Transfer);
        assert_eq!(config.train().loss_func(), LossFunc::Ce);
        assert_eq!(config.train().epochs_list(), &[1, 5]);
        assert!(config.learncurve().is_none());
    }

    #[test]
    fn test_bare_integer_epochs() {
        let toml = MINIMAL.replace("epochs_list = [1, 5]", "epochs_list = 10");
        let config = load_config_str(&toml).unwrap();
        assert_eq!(config.train().epochs_list(), &[10]);
    }

    #[test]
    fn test_float_split_sizes_are_proportions() {
        let toml = MINIMAL
            .replace("train_size = 6400", "train_size = 0.5")
            .replace("val_size = 200", "val_size = 0.25");
        let config = load_config_str(&toml).unwrap();
        assert_eq!(config.data().train_size(), SplitSize::Proportion(0.5));
        assert_eq!(config.data().val_size(), Some(SplitSize::Proportion(0.25)));
    }

    #[test]
    fn test_mixed_literals_fail() {
        let toml = MINIMAL.replace("train_size = 6400", "train_size = 0.5");
        assert!(matches!(
            load_config_str(&toml),
            Err(ConfigError::Inconsistent { .. })
        ));
    }

    #[test]
    fn test_missing_section_reported() {
        let toml = MINIMAL.replace("[test]", "[other]");
        let err = load_config_str(&toml).unwrap_err();
        assert!(matches!(err, ConfigError::MissingField { .. }));
    }

    #[test]
    fn test_invalid_enum_reports_offending_value() {
        let toml = MINIMAL.replace(
            "save_path = \"results/alexnet\"",
            "save_path = \"results/alexnet\"\noptimizer = \"RMSprop\"",
        );
        let err = load_config_str(&toml).unwrap_err();
        assert!(err.to_string().contains("RMSprop"));
    }

    #[test]
    fn test_wrong_type_fails_to_load() {
        let toml = MINIMAL.replace("batch_size = 64", "batch_size = \"sixty-four\"");
        assert!(matches!(
            load_config_str(&toml),
            Err(ConfigError::Load { .. })
        ));
    }

    #[test]
    fn test_negative_worker_count_rejected() {
        let toml = MINIMAL.replace(
            "save_path = \"results/alexnet\"",
            "save_path = \"results/alexnet\"\nnum_workers = -1",
        );
        assert!(load_config_str(&toml).is_err());
    }

    #[test]
    fn test_learncurve_section() {
        let toml = format!("{MINIMAL}\n[learncurve]\ntrain_size_list = [100, 200]\n");
        let config = load_config_str(&toml).unwrap();
        assert_eq!(config.learncurve().unwrap().train_size_list(), &[100, 200]);
    }

    #[test]
    fn test_load_config_missing_file() {
        let err = load_config(Path::new("/nonexistent/searchnets.toml")).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }
}
