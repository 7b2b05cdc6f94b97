//! Run orchestration: turns validated parameters into the ordered grid of
//! training jobs and runs them one after another.
//!
//! Jobs iterate epoch budgets in the outer loop and replicates in the inner
//! loop. Each job writes under `save_path/net_name/replicate/epochs`. The
//! first failing job aborts the rest of the grid.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::{
    Config, DatasetType, LossFunc, Method, NetName, OptimizerKind, TrainConfig, checks,
};
use crate::data::{Split, TransformProvider, VOC_CLASSES, VSD_PAD_SIZE, select_dataset};
use crate::error::{ConfigError, Result};
use crate::network::ArchitectureFactory;
use crate::training::device::{ComputeContext, Device};
use crate::training::initialize::InitializeTrainer;
use crate::training::loss::select_criterion;
use crate::training::reproducibility::RngHandle;
use crate::training::strategy::{
    JobData, StrategyContext, TrainerSettings, TrainingReport, TrainingStrategy,
};
use crate::training::transfer::{TransferSettings, TransferTrainer};

/// Epoch budgets, as one value or a list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EpochsList {
    One(u32),
    Many(Vec<u32>),
}

impl EpochsList {
    /// A single budget becomes a one-element list. Budgets must be positive
    /// and distinct, since each one names a save directory.
    pub fn normalize(&self) -> std::result::Result<Vec<u32>, ConfigError> {
        let epochs = match self {
            EpochsList::One(epochs) => vec![*epochs],
            EpochsList::Many(list) => list.clone(),
        };
        if epochs.is_empty() {
            return Err(ConfigError::invalid("epochs_list", "must not be empty"));
        }
        if let Some(bad) = epochs.iter().find(|&&e| e == 0) {
            return Err(ConfigError::invalid(
                "epochs_list",
                format!("epochs must be positive integers, got {bad}"),
            ));
        }
        checks::distinct("epochs_list", &epochs)?;
        Ok(epochs)
    }
}

impl From<u32> for EpochsList {
    fn from(epochs: u32) -> Self {
        EpochsList::One(epochs)
    }
}

impl From<Vec<u32>> for EpochsList {
    fn from(list: Vec<u32>) -> Self {
        EpochsList::Many(list)
    }
}

/// Inputs of one orchestrator run.
///
/// [`TrainParams::new`] fills in the defaults used when the orchestrator is
/// driven directly. Converting from a [`Config`] takes every value from the
/// configuration instead.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainParams {
    /// Split file with a `split` column.
    pub csv_file: PathBuf,
    pub dataset_type: DatasetType,
    pub net_name: NetName,
    pub number_nets_to_train: u32,
    pub epochs_list: EpochsList,
    pub batch_size: u32,
    /// Without a seed the run draws from entropy and is not reproducible.
    pub random_seed: Option<u64>,
    pub save_path: PathBuf,
    pub root: Option<PathBuf>,
    pub pad_size: u32,
    pub method: Method,
    pub num_classes: usize,
    pub learning_rate: f64,
    pub base_learning_rate: f64,
    pub new_learn_rate_layers: Vec<String>,
    pub new_layer_learning_rate: f64,
    pub freeze_trained_weights: bool,
    pub loss_func: LossFunc,
    pub optimizer: OptimizerKind,
    pub use_val: bool,
    pub val_epoch: Option<u32>,
    pub summary_step: Option<u32>,
    pub patience: Option<u32>,
    pub checkpoint_epoch: Option<u32>,
    pub save_acc_by_set_size_by_epoch: bool,
    pub num_workers: usize,
    pub data_parallel: bool,
}

impl TrainParams {
    pub const DEFAULT_CHECKPOINT_EPOCH: u32 = 10;

    /// Width of the targets the standard transforms produce: target
    /// present or absent for searchstims, one entry per VOC class for VSD.
    pub fn num_classes_for(dataset_type: DatasetType) -> usize {
        match dataset_type {
            DatasetType::Searchstims => 2,
            DatasetType::Vsd => VOC_CLASSES.len(),
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn new(
        csv_file: impl Into<PathBuf>,
        dataset_type: DatasetType,
        net_name: NetName,
        number_nets_to_train: u32,
        epochs_list: impl Into<EpochsList>,
        batch_size: u32,
        random_seed: Option<u64>,
        save_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            csv_file: csv_file.into(),
            dataset_type,
            net_name,
            number_nets_to_train,
            epochs_list: epochs_list.into(),
            batch_size,
            random_seed,
            save_path: save_path.into(),
            root: None,
            pad_size: VSD_PAD_SIZE,
            method: Method::Transfer,
            num_classes: Self::num_classes_for(dataset_type),
            learning_rate: TrainConfig::DEFAULT_LEARNING_RATE,
            base_learning_rate: TrainConfig::DEFAULT_BASE_LEARNING_RATE,
            new_learn_rate_layers: vec!["fc8".to_string()],
            new_layer_learning_rate: TrainConfig::DEFAULT_NEW_LAYER_LEARNING_RATE,
            freeze_trained_weights: true,
            loss_func: LossFunc::Ce,
            optimizer: OptimizerKind::Sgd,
            use_val: true,
            val_epoch: Some(1),
            summary_step: None,
            patience: None,
            checkpoint_epoch: Some(Self::DEFAULT_CHECKPOINT_EPOCH),
            save_acc_by_set_size_by_epoch: false,
            num_workers: TrainConfig::DEFAULT_NUM_WORKERS,
            data_parallel: false,
        }
    }

    /// Cross-field preconditions, checked even when the parameters did not
    /// come from a validated [`Config`]. Returns the normalized epoch list.
    pub fn validate(&self) -> std::result::Result<Vec<u32>, ConfigError> {
        if self.use_val && !self.val_epoch.is_some_and(|e| e > 0) {
            return Err(ConfigError::invalid(
                "val_epoch",
                format!(
                    "validation epoch must be a positive integer when use_val is set, got {:?}",
                    self.val_epoch
                ),
            ));
        }
        if self.patience.is_some() && !self.use_val {
            return Err(ConfigError::inconsistent(
                "patience argument only works with a validation set",
            ));
        }
        if self.patience == Some(0) {
            return Err(ConfigError::invalid("patience", "must be a positive integer"));
        }
        if self.number_nets_to_train == 0 {
            return Err(ConfigError::invalid("number_nets_to_train", "must be positive"));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::invalid("batch_size", "must be positive"));
        }
        if self.num_classes == 0 {
            return Err(ConfigError::invalid("num_classes", "must be positive"));
        }
        let width = Self::num_classes_for(self.dataset_type);
        let fits = match self.loss_func {
            LossFunc::Ce => self.num_classes >= width,
            LossFunc::Bce => self.num_classes == width,
        };
        if !fits {
            return Err(ConfigError::inconsistent(format!(
                "num_classes is {} but {} targets with {} loss need {}{}",
                self.num_classes,
                self.dataset_type,
                self.loss_func,
                if self.loss_func == LossFunc::Ce { "at least " } else { "" },
                width
            )));
        }
        if self.save_acc_by_set_size_by_epoch && self.dataset_type == DatasetType::Vsd {
            return Err(ConfigError::inconsistent(
                "dataset type is VSD but save_acc_by_set_size_by_epoch was set; \
                 can only measure accuracy by set size with searchstims stimuli",
            ));
        }
        self.epochs_list.normalize()
    }
}

impl From<&Config> for TrainParams {
    fn from(config: &Config) -> Self {
        let data = config.data();
        let train = config.train();
        let mut params = TrainParams::new(
            data.csv_file_out(),
            data.dataset_type(),
            train.net_name(),
            train.number_nets_to_train(),
            train.epochs_list().to_vec(),
            train.batch_size(),
            Some(train.random_seed()),
            train.save_path(),
        );
        params.root = data.root().map(Path::to_path_buf);
        params.method = train.method();
        params.learning_rate = train.learning_rate();
        params.base_learning_rate = train.base_learning_rate();
        params.new_learn_rate_layers = train.new_learn_rate_layers().to_vec();
        params.new_layer_learning_rate = train.new_layer_learning_rate();
        params.freeze_trained_weights = train.freeze_trained_weights();
        params.loss_func = train.loss_func();
        params.optimizer = train.optimizer();
        params.use_val = train.use_val();
        params.val_epoch = train.val_epoch();
        params.summary_step = train.summary_step();
        params.patience = train.patience();
        params.checkpoint_epoch = train.checkpoint_epoch();
        params.save_acc_by_set_size_by_epoch = train.save_acc_by_set_size_by_epoch();
        params.num_workers = train.num_workers();
        params.data_parallel = train.data_parallel();
        params
    }
}

/// Directory for one job's artifacts.
pub fn make_save_path(save_path: &Path, net_name: NetName, net_number: u32, epochs: u32) -> PathBuf {
    save_path
        .join(net_name.as_str())
        .join(net_number.to_string())
        .join(epochs.to_string())
}

/// One cell of the epochs x replicates grid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub epochs: u32,
    pub replicate: u32,
    pub save_path: PathBuf,
}

/// Jobs in execution order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobPlan {
    jobs: Vec<Job>,
}

impl JobPlan {
    pub fn new(save_path: &Path, net_name: NetName, epochs_list: &[u32], number_nets: u32) -> Self {
        let jobs = epochs_list
            .iter()
            .flat_map(|&epochs| {
                (1..=number_nets).map(move |replicate| Job {
                    epochs,
                    replicate,
                    save_path: make_save_path(save_path, net_name, replicate, epochs),
                })
            })
            .collect();
        Self { jobs }
    }

    /// Plan for `params`, after checking its preconditions.
    pub fn for_params(params: &TrainParams) -> std::result::Result<Self, ConfigError> {
        let epochs = params.validate()?;
        Ok(Self::new(
            &params.save_path,
            params.net_name,
            &epochs,
            params.number_nets_to_train,
        ))
    }

    pub fn jobs(&self) -> &[Job] {
        &self.jobs
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

/// Drives every job of a run with one architecture backend and one
/// transform provider.
pub struct Orchestrator {
    factory: Arc<dyn ArchitectureFactory>,
    transforms: Arc<dyn TransformProvider>,
    device: Option<Device>,
}

impl Orchestrator {
    pub fn new(factory: Arc<dyn ArchitectureFactory>, transforms: Arc<dyn TransformProvider>) -> Self {
        Self {
            factory,
            transforms,
            device: None,
        }
    }

    /// Use `device` instead of auto-detecting one.
    pub fn with_device(mut self, device: Device) -> Self {
        self.device = Some(device);
        self
    }

    pub fn run_config(&self, config: &Config) -> Result<Vec<TrainingReport>> {
        self.run(&TrainParams::from(config))
    }

    pub fn run(&self, params: &TrainParams) -> Result<Vec<TrainingReport>> {
        let plan = JobPlan::for_params(params)?;

        let rng = match params.random_seed {
            Some(seed) => RngHandle::seeded(seed),
            None => RngHandle::from_entropy(),
        };
        let device = self.device.clone().unwrap_or_else(Device::detect);
        let compute = ComputeContext::new(device, rng.is_deterministic());
        tracing::info!(device = %compute.device, deterministic = compute.deterministic, "compute device selected");

        let (transform, target_transform) =
            self.transforms
                .transforms(params.dataset_type, params.loss_func, params.pad_size)?;

        let root = params.root.as_deref();
        let dataset = |split: Split, return_set_size: bool| {
            select_dataset(
                params.dataset_type,
                &params.csv_file,
                root,
                split,
                transform.clone(),
                target_transform.clone(),
                return_set_size,
            )
        };
        let data = JobData {
            trainset: dataset(Split::Train, false)?,
            valset: if params.use_val {
                Some(dataset(Split::Val, false)?)
            } else {
                None
            },
            trainset_set_size: if params.save_acc_by_set_size_by_epoch {
                Some(dataset(Split::Train, true)?)
            } else {
                None
            },
        };

        let (criterion, apply_sigmoid) = select_criterion(params.loss_func);
        let transfer = TransferSettings {
            new_learn_rate_layers: params.new_learn_rate_layers.clone(),
            new_layer_learning_rate: params.new_layer_learning_rate,
            base_learning_rate: params.base_learning_rate,
            freeze_trained_weights: params.freeze_trained_weights,
        };

        let mut reports = Vec::with_capacity(plan.len());
        let mut current_epochs = None;
        for job in plan.jobs() {
            if current_epochs != Some(job.epochs) {
                tracing::info!(net = %params.net_name, epochs = job.epochs, "training model for {} epochs", job.epochs);
                current_epochs = Some(job.epochs);
            }
            let span = tracing::info_span!(
                "job",
                net = %params.net_name,
                replicate = job.replicate,
                epochs = job.epochs
            );
            let _guard = span.enter();

            let ctx = StrategyContext {
                settings: TrainerSettings {
                    net_name: params.net_name,
                    save_path: job.save_path.clone(),
                    num_classes: params.num_classes,
                    criterion,
                    apply_sigmoid,
                    optimizer: params.optimizer,
                    batch_size: params.batch_size as usize,
                    epochs: job.epochs,
                    use_val: params.use_val,
                    val_epoch: params.val_epoch,
                    patience: params.patience,
                    checkpoint_epoch: params.checkpoint_epoch,
                    summary_step: params.summary_step,
                    save_acc_by_set_size_by_epoch: params.save_acc_by_set_size_by_epoch,
                    num_workers: params.num_workers,
                    data_parallel: params.data_parallel,
                },
                data: data.clone(),
                factory: self.factory.as_ref(),
                compute: compute.clone(),
                rng: rng.clone(),
            };
            let mut strategy: Box<dyn TrainingStrategy> = match params.method {
                Method::Initialize => {
                    Box::new(InitializeTrainer::from_context(ctx, params.learning_rate)?)
                }
                Method::Transfer => Box::new(TransferTrainer::from_context(ctx, &transfer)?),
            };
            let report = strategy.train()?;
            tracing::info!(save_path = %report.save_path.display(), "job complete");
            reports.push(report);
        }
        Ok(reports)
    }
}
