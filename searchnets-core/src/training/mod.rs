//! Training infrastructure: strategies, loss, optimizer, callbacks, checkpoints, metrics.

pub mod callbacks;
pub mod checkpoint;
pub mod device;
pub mod initialize;
pub mod loss;
pub mod metrics;
pub mod optimizer;
pub mod reproducibility;
pub mod strategy;
pub mod transfer;

#[cfg(test)]
pub(crate) mod test_support;

pub use callbacks::{Cadence, EarlyStopping};
pub use checkpoint::CheckpointManager;
pub use device::{ComputeContext, Device};
pub use initialize::InitializeTrainer;
pub use loss::{Criterion, select_criterion};
pub use metrics::{AccuracyBySetSize, TrainingMetrics};
pub use optimizer::{Optimizer, ParamGroup};
pub use reproducibility::RngHandle;
pub use strategy::{
    JobData, StrategyContext, Trainer, TrainerSettings, TrainerState, TrainingReport,
    TrainingStrategy,
};
pub use transfer::{TransferSettings, TransferTrainer};
