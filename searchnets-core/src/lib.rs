//! # Searchnets Core
//!
//! Core library for training convolutional networks on visual search tasks.
//! Provides the validated experiment configuration, dataset selection, the
//! training strategies (from scratch and transfer learning) and the
//! orchestrator that runs the epochs x replicates job grid.

pub mod config;
pub mod data;
pub mod error;
pub mod network;
pub mod orchestrator;
pub mod persistence;
pub mod training;

// Re-export commonly used types at the crate root.
pub use config::{
    Config, DataConfig, DatasetType, LossFunc, Method, NetName, OptimizerKind, SplitSize,
    TrainConfig, load_config,
};
pub use data::{Dataset, Split, StandardTransforms, TransformProvider, select_dataset};
pub use error::{ConfigError, ResourceError, Result, SearchnetsError, TrainingError};
pub use network::{ArchitectureFactory, Network, ProbeFactory, StateDict};
pub use orchestrator::{EpochsList, Job, JobPlan, Orchestrator, TrainParams, make_save_path};
pub use training::{Criterion, Device, TrainingReport, TrainingStrategy, select_criterion};
