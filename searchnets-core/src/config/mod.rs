//! Validated experiment configuration.
//!
//! Each section is built through a builder that runs every single-field check
//! and then every cross-field check before handing back an immutable value.
//! A configuration file is read with `figment` (see [`load_config`]) into
//! loosely typed sections that are then fed through those same builders.

pub(crate) mod checks;
pub mod data;
pub mod loader;
pub mod train;

use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

pub use data::{DataConfig, DataConfigBuilder, DatasetType, SplitSize};
pub use loader::{load_config, load_config_str};
pub use train::{LossFunc, Method, NetName, OptimizerKind, TrainConfig, TrainConfigBuilder};

/// `[test]` section.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestConfig {
    test_results_save_path: PathBuf,
}

impl TestConfig {
    pub fn new(test_results_save_path: impl Into<PathBuf>) -> Self {
        Self {
            test_results_save_path: test_results_save_path.into(),
        }
    }

    /// Directory where accuracy on the test set is written.
    pub fn test_results_save_path(&self) -> &Path {
        &self.test_results_save_path
    }
}

/// `[learncurve]` section.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LearnCurveConfig {
    train_size_list: Vec<u32>,
}

impl LearnCurveConfig {
    pub fn new(train_size_list: Vec<u32>) -> Result<Self, ConfigError> {
        if train_size_list.is_empty() {
            return Err(ConfigError::invalid("train_size_list", "must not be empty"));
        }
        let train_size_list = checks::list_of_positive("train_size_list", &train_size_list)?;
        Ok(Self { train_size_list })
    }

    /// Training-set sizes used to produce a learning curve.
    pub fn train_size_list(&self) -> &[u32] {
        &self.train_size_list
    }
}

/// All sections of an experiment configuration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Config {
    data: DataConfig,
    train: TrainConfig,
    test: TestConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    learncurve: Option<LearnCurveConfig>,
}

impl Config {
    pub fn new(
        data: DataConfig,
        train: TrainConfig,
        test: TestConfig,
        learncurve: Option<LearnCurveConfig>,
    ) -> Self {
        Self {
            data,
            train,
            test,
            learncurve,
        }
    }

    pub fn data(&self) -> &DataConfig {
        &self.data
    }

    pub fn train(&self) -> &TrainConfig {
        &self.train
    }

    pub fn test(&self) -> &TestConfig {
        &self.test
    }

    pub fn learncurve(&self) -> Option<&LearnCurveConfig> {
        self.learncurve.as_ref()
    }

    /// Render the validated configuration, defaults included, as TOML.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Load {
            message: e.to_string(),
        })
    }
}
