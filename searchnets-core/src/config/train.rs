//! `[train]` section: architecture, training method, optimizer and the epoch/replicate grid.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use super::checks;
use crate::error::ConfigError;

macro_rules! choice_enum {
    (
        $(#[$meta:meta])*
        $name:ident, $field:literal {
            $($(#[$vmeta:meta])* $variant:ident => $text:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $($(#[$vmeta])* #[serde(rename = $text)] $variant),+
        }

        impl $name {
            pub const CHOICES: &'static [&'static str] = &[$($text),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = ConfigError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(ConfigError::choice($field, other, Self::CHOICES)),
                }
            }
        }
    };
}

choice_enum! {
    /// Convolutional architecture to train.
    NetName, "net_name" {
        Alexnet => "alexnet",
        Vgg16 => "VGG16",
        CornetZ => "CORnet_Z",
    }
}

choice_enum! {
    /// How weights are initialized before training.
    Method, "method" {
        /// Random initialization, all weights trained at one rate.
        Initialize => "initialize",
        /// Pretrained weights, new layers trained at their own rate.
        Transfer => "transfer",
    }
}

choice_enum! {
    LossFunc, "loss_func" {
        /// Cross-entropy over class scores.
        Ce => "CE",
        /// Binary cross-entropy over per-label probabilities.
        Bce => "BCE",
    }
}

choice_enum! {
    OptimizerKind, "optimizer" {
        Sgd => "SGD",
        Adam => "Adam",
        AdamW => "AdamW",
    }
}

/// Validated `[train]` section.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrainConfig {
    net_name: NetName,
    number_nets_to_train: u32,
    epochs_list: Vec<u32>,
    batch_size: u32,
    random_seed: u64,
    save_path: PathBuf,
    method: Method,
    learning_rate: f64,
    new_learn_rate_layers: Vec<String>,
    new_layer_learning_rate: f64,
    base_learning_rate: f64,
    freeze_trained_weights: bool,
    loss_func: LossFunc,
    optimizer: OptimizerKind,
    save_acc_by_set_size_by_epoch: bool,
    use_val: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    val_epoch: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary_step: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    patience: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    checkpoint_epoch: Option<u32>,
    num_workers: usize,
    data_parallel: bool,
}

impl TrainConfig {
    pub const DEFAULT_LEARNING_RATE: f64 = 0.001;
    pub const DEFAULT_NEW_LAYER_LEARNING_RATE: f64 = 0.001;
    /// Small enough that pretrained weights barely move when they are not frozen.
    pub const DEFAULT_BASE_LEARNING_RATE: f64 = 1e-20;
    pub const DEFAULT_NUM_WORKERS: usize = 4;

    pub fn builder(
        net_name: NetName,
        number_nets_to_train: u32,
        epochs_list: Vec<u32>,
        batch_size: u32,
        random_seed: u64,
        save_path: impl Into<PathBuf>,
    ) -> TrainConfigBuilder {
        TrainConfigBuilder {
            net_name,
            number_nets_to_train,
            epochs_list,
            batch_size,
            random_seed,
            save_path: save_path.into(),
            method: Method::Transfer,
            learning_rate: Self::DEFAULT_LEARNING_RATE,
            new_learn_rate_layers: vec!["fc8".to_string()],
            new_layer_learning_rate: Self::DEFAULT_NEW_LAYER_LEARNING_RATE,
            base_learning_rate: Self::DEFAULT_BASE_LEARNING_RATE,
            freeze_trained_weights: true,
            loss_func: LossFunc::Ce,
            optimizer: OptimizerKind::Sgd,
            save_acc_by_set_size_by_epoch: false,
            use_val: false,
            val_epoch: None,
            summary_step: None,
            patience: None,
            checkpoint_epoch: None,
            num_workers: Self::DEFAULT_NUM_WORKERS,
            data_parallel: false,
        }
    }

    pub fn net_name(&self) -> NetName {
        self.net_name
    }

    /// Number of replicates trained for each epoch budget.
    pub fn number_nets_to_train(&self) -> u32 {
        self.number_nets_to_train
    }

    pub fn epochs_list(&self) -> &[u32] {
        &self.epochs_list
    }

    pub fn batch_size(&self) -> u32 {
        self.batch_size
    }

    pub fn random_seed(&self) -> u64 {
        self.random_seed
    }

    pub fn save_path(&self) -> &Path {
        &self.save_path
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    pub fn new_learn_rate_layers(&self) -> &[String] {
        &self.new_learn_rate_layers
    }

    pub fn new_layer_learning_rate(&self) -> f64 {
        self.new_layer_learning_rate
    }

    pub fn base_learning_rate(&self) -> f64 {
        self.base_learning_rate
    }

    pub fn freeze_trained_weights(&self) -> bool {
        self.freeze_trained_weights
    }

    pub fn loss_func(&self) -> LossFunc {
        self.loss_func
    }

    pub fn optimizer(&self) -> OptimizerKind {
        self.optimizer
    }

    pub fn save_acc_by_set_size_by_epoch(&self) -> bool {
        self.save_acc_by_set_size_by_epoch
    }

    pub fn use_val(&self) -> bool {
        self.use_val
    }

    pub fn val_epoch(&self) -> Option<u32> {
        self.val_epoch
    }

    pub fn summary_step(&self) -> Option<u32> {
        self.summary_step
    }

    pub fn patience(&self) -> Option<u32> {
        self.patience
    }

    pub fn checkpoint_epoch(&self) -> Option<u32> {
        self.checkpoint_epoch
    }

    pub fn num_workers(&self) -> usize {
        self.num_workers
    }

    pub fn data_parallel(&self) -> bool {
        self.data_parallel
    }
}

/// Builder for [`TrainConfig`].
#[derive(Debug, Clone)]
pub struct TrainConfigBuilder {
    net_name: NetName,
    number_nets_to_train: u32,
    epochs_list: Vec<u32>,
    batch_size: u32,
    random_seed: u64,
    save_path: PathBuf,
    method: Method,
    learning_rate: f64,
    new_learn_rate_layers: Vec<String>,
    new_layer_learning_rate: f64,
    base_learning_rate: f64,
    freeze_trained_weights: bool,
    loss_func: LossFunc,
    optimizer: OptimizerKind,
    save_acc_by_set_size_by_epoch: bool,
    use_val: bool,
    val_epoch: Option<u32>,
    summary_step: Option<u32>,
    patience: Option<u32>,
    checkpoint_epoch: Option<u32>,
    num_workers: usize,
    data_parallel: bool,
}

impl TrainConfigBuilder {
    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn learning_rate(mut self, rate: f64) -> Self {
        self.learning_rate = rate;
        self
    }

    pub fn new_learn_rate_layers(mut self, layers: Vec<String>) -> Self {
        self.new_learn_rate_layers = layers;
        self
    }

    pub fn new_layer_learning_rate(mut self, rate: f64) -> Self {
        self.new_layer_learning_rate = rate;
        self
    }

    pub fn base_learning_rate(mut self, rate: f64) -> Self {
        self.base_learning_rate = rate;
        self
    }

    pub fn freeze_trained_weights(mut self, freeze: bool) -> Self {
        self.freeze_trained_weights = freeze;
        self
    }

    pub fn loss_func(mut self, loss_func: LossFunc) -> Self {
        self.loss_func = loss_func;
        self
    }

    pub fn optimizer(mut self, optimizer: OptimizerKind) -> Self {
        self.optimizer = optimizer;
        self
    }

    pub fn save_acc_by_set_size_by_epoch(mut self, enabled: bool) -> Self {
        self.save_acc_by_set_size_by_epoch = enabled;
        self
    }

    pub fn use_val(mut self, use_val: bool) -> Self {
        self.use_val = use_val;
        self
    }

    pub fn val_epoch(mut self, val_epoch: u32) -> Self {
        self.val_epoch = Some(val_epoch);
        self
    }

    pub fn summary_step(mut self, step: u32) -> Self {
        self.summary_step = Some(step);
        self
    }

    pub fn patience(mut self, patience: u32) -> Self {
        self.patience = Some(patience);
        self
    }

    pub fn checkpoint_epoch(mut self, every: u32) -> Self {
        self.checkpoint_epoch = Some(every);
        self
    }

    pub fn num_workers(mut self, workers: usize) -> Self {
        self.num_workers = workers;
        self
    }

    pub fn data_parallel(mut self, enabled: bool) -> Self {
        self.data_parallel = enabled;
        self
    }

    pub fn build(self) -> Result<TrainConfig, ConfigError> {
        checks::positive_u32("number_nets_to_train", self.number_nets_to_train)?;
        if self.epochs_list.is_empty() {
            return Err(ConfigError::invalid("epochs_list", "must not be empty"));
        }
        checks::list_of_positive("epochs_list", &self.epochs_list)?;
        checks::distinct("epochs_list", &self.epochs_list)?;
        checks::positive_u32("batch_size", self.batch_size)?;
        checks::learning_rate("learning_rate", self.learning_rate)?;
        checks::learning_rate("new_layer_learning_rate", self.new_layer_learning_rate)?;
        checks::learning_rate("base_learning_rate", self.base_learning_rate)?;
        for (ind, layer) in self.new_learn_rate_layers.iter().enumerate() {
            if layer.trim().is_empty() {
                return Err(ConfigError::invalid(
                    "new_learn_rate_layers",
                    format!("layer name at index {ind} is empty"),
                ));
            }
        }
        let val_epoch = checks::optional_positive_u32("val_epoch", self.val_epoch)?;
        let summary_step = checks::optional_positive_u32("summary_step", self.summary_step)?;
        let patience = checks::optional_positive_u32("patience", self.patience)?;
        let checkpoint_epoch =
            checks::optional_positive_u32("checkpoint_epoch", self.checkpoint_epoch)?;

        if self.use_val && val_epoch.is_none() {
            return Err(ConfigError::inconsistent(
                "use_val is true, so val_epoch must be set to a positive integer",
            ));
        }
        if patience.is_some() && !self.use_val {
            return Err(ConfigError::inconsistent(
                "patience argument only works with a validation set (use_val = true)",
            ));
        }

        Ok(TrainConfig {
            net_name: self.net_name,
            number_nets_to_train: self.number_nets_to_train,
            epochs_list: self.epochs_list,
            batch_size: self.batch_size,
            random_seed: self.random_seed,
            save_path: self.save_path,
            method: self.method,
            learning_rate: self.learning_rate,
            new_learn_rate_layers: self.new_learn_rate_layers,
            new_layer_learning_rate: self.new_layer_learning_rate,
            base_learning_rate: self.base_learning_rate,
            freeze_trained_weights: self.freeze_trained_weights,
            loss_func: self.loss_func,
            optimizer: self.optimizer,
            save_acc_by_set_size_by_epoch: self.save_acc_by_set_size_by_epoch,
            use_val: self.use_val,
            val_epoch,
            summary_step,
            patience,
            checkpoint_epoch,
            num_workers: self.num_workers,
            data_parallel: self.data_parallel,
        })
    }
}
