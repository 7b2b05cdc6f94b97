//! Training strategy lifecycle.
//!
//! Both strategies hand a constructed network and optimizer to a [`Trainer`],
//! which owns the epoch loop: training steps, periodic validation with early
//! stopping, checkpoints, summaries and the per-set-size accuracy matrix.
//!
//! Job artifacts, all under the job's save path:
//! - `checkpoints/epoch-<N>.json` + `checkpoints/checkpoints.json`
//! - `best-model.json` whenever validation accuracy improves
//! - `model.json` at completion
//! - `summary.csv` when a summary step is set
//! - `acc_by_set_size_by_epoch.csv` when set-size tracking is on
//! - `environment.json` and `metrics.json`

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use crate::config::{Method, NetName, OptimizerKind};
use crate::data::{DataLoader, Dataset};
use crate::error::{Result, TrainingError};
use crate::network::{ArchitectureFactory, Network};
use crate::persistence::atomic_write_json;
use crate::training::callbacks::{CallbackAction, Cadence, EarlyStopping};
use crate::training::checkpoint::CheckpointManager;
use crate::training::device::ComputeContext;
use crate::training::loss::Criterion;
use crate::training::metrics::{AccuracyBySetSize, TrainingMetrics};
use crate::training::optimizer::Optimizer;
use crate::training::reproducibility::{EnvironmentSnapshot, RngHandle};

pub const MODEL_FILE: &str = "model.json";
pub const BEST_MODEL_FILE: &str = "best-model.json";
pub const SUMMARY_FILE: &str = "summary.csv";
pub const ACC_BY_SET_SIZE_FILE: &str = "acc_by_set_size_by_epoch.csv";
pub const METRICS_FILE: &str = "metrics.json";
pub const ENVIRONMENT_FILE: &str = "environment.json";

/// Where a trainer is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrainerState {
    Constructed,
    Training { epoch: usize },
    Validating { epoch: usize },
    Checkpointing { epoch: usize },
    Completed,
}

/// Knobs shared by both strategies for one job.
#[derive(Debug, Clone)]
pub struct TrainerSettings {
    pub net_name: NetName,
    pub save_path: PathBuf,
    pub num_classes: usize,
    pub criterion: Criterion,
    pub apply_sigmoid: bool,
    pub optimizer: OptimizerKind,
    pub batch_size: usize,
    pub epochs: u32,
    pub use_val: bool,
    pub val_epoch: Option<u32>,
    pub patience: Option<u32>,
    pub checkpoint_epoch: Option<u32>,
    pub summary_step: Option<u32>,
    pub save_acc_by_set_size_by_epoch: bool,
    pub num_workers: usize,
    pub data_parallel: bool,
}

/// Dataset handles shared read-only by every job of a run.
#[derive(Clone)]
pub struct JobData {
    pub trainset: Arc<dyn Dataset>,
    pub valset: Option<Arc<dyn Dataset>>,
    pub trainset_set_size: Option<Arc<dyn Dataset>>,
}

/// Everything a strategy needs to build its trainer.
pub struct StrategyContext<'a> {
    pub settings: TrainerSettings,
    pub data: JobData,
    pub factory: &'a dyn ArchitectureFactory,
    pub compute: ComputeContext,
    pub rng: RngHandle,
}

/// Outcome of one job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingReport {
    pub method: Method,
    pub net_name: NetName,
    pub save_path: PathBuf,
    pub epochs: u32,
    pub stopped_early: bool,
    pub state: TrainerState,
    pub metrics: TrainingMetrics,
}

/// A way of preparing a network for training. The epoch loop is shared.
pub trait TrainingStrategy {
    fn method(&self) -> Method;

    fn trainer(&mut self) -> &mut Trainer;

    fn train(&mut self) -> Result<TrainingReport> {
        let method = self.method();
        self.trainer().run(method)
    }
}

pub struct Trainer {
    settings: TrainerSettings,
    data: JobData,
    network: Box<dyn Network>,
    optimizer: Optimizer,
    compute: ComputeContext,
    rng: RngHandle,
    state: TrainerState,
}

impl Trainer {
    /// Moves the network to the compute device, replicating it when data
    /// parallel training is requested.
    pub fn new(
        settings: TrainerSettings,
        data: JobData,
        mut network: Box<dyn Network>,
        optimizer: Optimizer,
        compute: ComputeContext,
        rng: RngHandle,
    ) -> Result<Self> {
        network.to_device(&compute.device)?;
        if settings.data_parallel {
            network.replicate(&compute.device)?;
        }
        Ok(Self {
            settings,
            data,
            network,
            optimizer,
            compute,
            rng,
            state: TrainerState::Constructed,
        })
    }

    pub fn state(&self) -> TrainerState {
        self.state
    }

    pub fn network(&self) -> &dyn Network {
        self.network.as_ref()
    }

    pub fn optimizer(&self) -> &Optimizer {
        &self.optimizer
    }

    pub fn settings(&self) -> &TrainerSettings {
        &self.settings
    }

    fn run(&mut self, method: Method) -> Result<TrainingReport> {
        let started = Instant::now();
        let save_path = self.settings.save_path.clone();
        std::fs::create_dir_all(&save_path)?;
        atomic_write_json(
            &save_path.join(ENVIRONMENT_FILE),
            &EnvironmentSnapshot::capture(self.rng.seed()),
        )?;

        let batch_size = self.settings.batch_size;
        let workers = self.settings.num_workers;
        let train_loader =
            DataLoader::new(self.data.trainset.clone(), batch_size, true, workers, self.rng.clone())?;
        let val_loader = match (&self.data.valset, self.settings.use_val) {
            (Some(valset), true) => Some(DataLoader::new(
                valset.clone(),
                batch_size,
                false,
                workers,
                self.rng.clone(),
            )?),
            _ => None,
        };
        let track_set_sizes = self.settings.save_acc_by_set_size_by_epoch;
        let mut set_size_tracking = match (&self.data.trainset_set_size, track_set_sizes) {
            (Some(dataset), true) => Some((
                DataLoader::new(dataset.clone(), batch_size, false, workers, self.rng.clone())?,
                AccuracyBySetSize::new(dataset.set_sizes()),
            )),
            _ => None,
        };

        let validation = if val_loader.is_some() {
            Cadence::every(self.settings.val_epoch)
        } else {
            Cadence::never()
        };
        let checkpoints = Cadence::every(self.settings.checkpoint_epoch);
        let summaries = Cadence::every(self.settings.summary_step);
        let mut summary_writer = match self.settings.summary_step {
            Some(_) => {
                let mut writer = csv::Writer::from_path(save_path.join(SUMMARY_FILE))?;
                writer.write_record(["step", "epoch", "loss"])?;
                Some(writer)
            }
            None => None,
        };
        let checkpoint_manager = CheckpointManager::new(&save_path);
        let mut early_stopping = EarlyStopping::new(self.settings.patience);
        let mut metrics = TrainingMetrics::default();
        let mut stopped_early = false;

        tracing::info!(
            net = %self.settings.net_name,
            %method,
            epochs = self.settings.epochs,
            device = %self.compute.device,
            deterministic = self.compute.deterministic,
            apply_sigmoid = self.settings.apply_sigmoid,
            batches = train_loader.len(),
            "training started"
        );

        for epoch in 1..=self.settings.epochs as usize {
            self.state = TrainerState::Training { epoch };
            let mut loss_sum = 0.0;
            let mut batches = 0usize;
            for batch in train_loader.batches() {
                let batch = batch?;
                let loss = self
                    .network
                    .train_batch(&batch, self.settings.criterion, &mut self.optimizer)?;
                if !loss.is_finite() {
                    return Err(TrainingError::Diverged { epoch, loss }.into());
                }
                metrics.global_steps += 1;
                loss_sum += loss;
                batches += 1;
                tracing::debug!(step = metrics.global_steps, epoch, loss, "train step");
                if let Some(writer) = summary_writer.as_mut()
                    && summaries.is_due(metrics.global_steps)
                {
                    write_summary(writer, metrics.global_steps, epoch, loss)?;
                }
            }
            let epoch_loss = loss_sum / batches.max(1) as f64;
            metrics.record_epoch(epoch_loss);
            tracing::info!(epoch, loss = epoch_loss, "epoch finished");

            if let Some((loader, matrix)) = set_size_tracking.as_mut() {
                let counts = self.correct_by_set_size(loader)?;
                matrix.push_epoch(&counts);
            }

            if let Some(loader) = val_loader.as_ref()
                && validation.is_due(epoch as u64)
            {
                self.state = TrainerState::Validating { epoch };
                let accuracy = self.accuracy(loader)?;
                metrics.record_validation(epoch, accuracy);
                let check = early_stopping.on_validation(accuracy);
                tracing::info!(epoch, val_acc = accuracy, improved = check.improved, "validation");
                if check.improved {
                    self.save_model_advisory(&save_path.join(BEST_MODEL_FILE));
                }
                if check.action == CallbackAction::Stop {
                    tracing::info!(
                        epoch,
                        patience = ?self.settings.patience,
                        best_val_acc = ?early_stopping.best_accuracy(),
                        "validation accuracy stopped improving, stopping early"
                    );
                    stopped_early = true;
                    break;
                }
            }

            if checkpoints.is_due(epoch as u64) {
                self.state = TrainerState::Checkpointing { epoch };
                let saved = checkpoint_manager.save(
                    epoch,
                    epoch_loss,
                    &self.network.state_dict(),
                    self.optimizer.state(),
                );
                match saved {
                    Ok(checkpoint) => {
                        tracing::info!(epoch, path = %checkpoint.path.display(), "checkpoint saved");
                    }
                    Err(e) => tracing::warn!(epoch, error = %e, "checkpoint write failed, continuing"),
                }
            }
        }

        if let Some(mut writer) = summary_writer {
            writer.flush()?;
        }
        atomic_write_json(&save_path.join(MODEL_FILE), &self.network.state_dict())?;
        if let Some((_, matrix)) = &set_size_tracking {
            matrix.write_csv(&save_path.join(ACC_BY_SET_SIZE_FILE))?;
        }
        metrics.total_training_time_secs = started.elapsed().as_secs_f64();
        atomic_write_json(&save_path.join(METRICS_FILE), &metrics)?;
        self.state = TrainerState::Completed;

        tracing::info!(
            epochs_completed = metrics.epochs_completed,
            stopped_early,
            best_val_acc = ?metrics.best_val_acc,
            "training finished"
        );
        Ok(TrainingReport {
            method,
            net_name: self.settings.net_name,
            save_path,
            epochs: self.settings.epochs,
            stopped_early,
            state: self.state,
            metrics,
        })
    }

    /// Fraction of samples the network gets right.
    fn accuracy(&self, loader: &DataLoader) -> Result<f64> {
        let (mut correct, mut total) = (0usize, 0usize);
        for batch in loader.batches() {
            let batch = batch?;
            let scores = self.network.forward(&batch.images)?;
            for (s, target) in scores.iter().zip(&batch.targets) {
                correct += usize::from(self.settings.criterion.is_correct(s, target));
                total += 1;
            }
        }
        Ok(correct as f64 / total.max(1) as f64)
    }

    /// `(correct, total)` per set size over one pass of `loader`.
    fn correct_by_set_size(&self, loader: &DataLoader) -> Result<BTreeMap<u32, (usize, usize)>> {
        let mut counts: BTreeMap<u32, (usize, usize)> = BTreeMap::new();
        for batch in loader.batches() {
            let batch = batch?;
            let set_sizes = batch.set_sizes.clone().ok_or_else(|| {
                TrainingError::backend("set-size dataset returned samples without a set size")
            })?;
            let scores = self.network.forward(&batch.images)?;
            for ((s, target), size) in scores.iter().zip(&batch.targets).zip(set_sizes) {
                let entry = counts.entry(size).or_default();
                entry.0 += usize::from(self.settings.criterion.is_correct(s, target));
                entry.1 += 1;
            }
        }
        Ok(counts)
    }

    fn save_model_advisory(&self, path: &Path) {
        if let Err(e) = atomic_write_json(path, &self.network.state_dict()) {
            tracing::warn!(path = %path.display(), error = %e, "could not save best model, continuing");
        }
    }
}

fn write_summary(writer: &mut csv::Writer<File>, step: u64, epoch: usize, loss: f64) -> Result<()> {
    writer.write_record([step.to_string(), epoch.to_string(), loss.to_string()])?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Batch, ImageTensor};
    use crate::error::SearchnetsError;
    use crate::network::{ParameterInfo, StateDict};
    use crate::training::device::Device;
    use crate::training::initialize::InitializeTrainer;
    use crate::training::optimizer::ParamGroup;
    use crate::training::test_support::{context, FixtureOptions};
    use pretty_assertions::assert_eq;
    use rand::rngs::StdRng;

    fn run(dir: &Path, options: FixtureOptions) -> TrainingReport {
        InitializeTrainer::from_context(context(dir, &options), 0.05)
            .unwrap()
            .train()
            .unwrap()
    }

    #[test]
    fn test_checkpoints_every_n_epochs() {
        let dir = tempfile::tempdir().unwrap();
        run(
            dir.path(),
            FixtureOptions {
                epochs: 5,
                checkpoint_epoch: Some(2),
                ..Default::default()
            },
        );
        let epochs: Vec<usize> = CheckpointManager::new(dir.path())
            .list()
            .unwrap()
            .iter()
            .map(|c| c.epoch)
            .collect();
        assert_eq!(epochs, vec![2, 4]);
        assert!(dir.path().join(MODEL_FILE).exists());
        assert!(dir.path().join(ENVIRONMENT_FILE).exists());
        assert!(dir.path().join(METRICS_FILE).exists());
    }

    #[test]
    fn test_checkpoint_failure_does_not_stop_training() {
        let dir = tempfile::tempdir().unwrap();
        // A file where the checkpoint directory should go makes every checkpoint write fail.
        std::fs::write(dir.path().join("checkpoints"), "").unwrap();
        let report = run(
            dir.path(),
            FixtureOptions {
                epochs: 2,
                checkpoint_epoch: Some(1),
                ..Default::default()
            },
        );
        assert_eq!(report.state, TrainerState::Completed);
        assert_eq!(report.metrics.epochs_completed, 2);
    }

    #[test]
    fn test_early_stopping_ends_before_budget() {
        let dir = tempfile::tempdir().unwrap();
        let report = run(
            dir.path(),
            FixtureOptions {
                epochs: 50,
                use_val: true,
                val_epoch: Some(1),
                patience: Some(1),
                ..Default::default()
            },
        );
        assert!(report.stopped_early);
        assert!(report.metrics.epochs_completed < 50);
        assert_eq!(report.state, TrainerState::Completed);
        assert!(dir.path().join(BEST_MODEL_FILE).exists());
    }

    #[test]
    fn test_validation_cadence() {
        let dir = tempfile::tempdir().unwrap();
        let report = run(
            dir.path(),
            FixtureOptions {
                epochs: 6,
                use_val: true,
                val_epoch: Some(3),
                ..Default::default()
            },
        );
        let checked: Vec<usize> = report.metrics.val_acc_history.iter().map(|(e, _)| *e).collect();
        assert_eq!(checked, vec![3, 6]);
    }

    #[test]
    fn test_summary_rows_follow_global_steps() {
        let dir = tempfile::tempdir().unwrap();
        run(
            dir.path(),
            FixtureOptions {
                epochs: 2,
                summary_step: Some(2),
                ..Default::default()
            },
        );
        // 12 samples in batches of 4: 3 steps per epoch, 6 in total.
        let mut reader = csv::Reader::from_path(dir.path().join(SUMMARY_FILE)).unwrap();
        let steps: Vec<String> = reader
            .records()
            .map(|r| r.unwrap()[0].to_string())
            .collect();
        assert_eq!(steps, vec!["2", "4", "6"]);
    }

    #[test]
    fn test_accuracy_by_set_size_matrix() {
        let dir = tempfile::tempdir().unwrap();
        run(
            dir.path(),
            FixtureOptions {
                epochs: 3,
                track_set_sizes: true,
                num_workers: 2,
                ..Default::default()
            },
        );
        let written = std::fs::read_to_string(dir.path().join(ACC_BY_SET_SIZE_FILE)).unwrap();
        let lines: Vec<&str> = written.lines().collect();
        assert_eq!(lines[0], "1,2");
        assert_eq!(lines.len(), 4);
    }

    #[test]
    fn test_data_parallel_keeps_checkpoint_layout() {
        let dir = tempfile::tempdir().unwrap();
        run(
            dir.path(),
            FixtureOptions {
                epochs: 1,
                data_parallel: true,
                ..Default::default()
            },
        );
        let model: StateDict =
            crate::persistence::load_json(&dir.path().join(MODEL_FILE)).unwrap().unwrap();
        let names: Vec<&str> = model.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["fc8.bias", "fc8.weight", "features.bias", "features.weight"]);
    }

    /// Produces a NaN loss on every step.
    struct Exploding;

    impl Network for Exploding {
        fn net_name(&self) -> NetName {
            NetName::Alexnet
        }

        fn named_parameters(&self) -> Vec<ParameterInfo> {
            vec![ParameterInfo::new("fc8.weight", 1)]
        }

        fn reinitialize_layer(&mut self, _layer: &str, _rng: &mut StdRng) -> Result<()> {
            Ok(())
        }

        fn to_device(&mut self, _device: &Device) -> Result<()> {
            Ok(())
        }

        fn replicate(&mut self, _device: &Device) -> Result<()> {
            Ok(())
        }

        fn forward(&self, images: &[ImageTensor]) -> Result<Vec<Vec<f32>>> {
            Ok(vec![vec![f32::NAN, f32::NAN]; images.len()])
        }

        fn train_batch(&mut self, _: &Batch, _: Criterion, _: &mut Optimizer) -> Result<f64> {
            Ok(f64::NAN)
        }

        fn state_dict(&self) -> StateDict {
            StateDict::new()
        }

        fn load_state_dict(&mut self, _state: &StateDict) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_divergence_aborts_the_job() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), &FixtureOptions::default());
        let optimizer = Optimizer::new(
            OptimizerKind::Sgd,
            vec![ParamGroup {
                name: "all".into(),
                parameters: vec!["fc8.weight".into()],
                learning_rate: 0.1,
            }],
        )
        .unwrap();
        let mut trainer = Trainer::new(
            ctx.settings,
            ctx.data,
            Box::new(Exploding),
            optimizer,
            ctx.compute,
            ctx.rng,
        )
        .unwrap();
        let err = trainer.run(Method::Initialize).unwrap_err();
        assert!(matches!(
            err,
            SearchnetsError::Training(TrainingError::Diverged { epoch: 1, .. })
        ));
        assert!(!dir.path().join(MODEL_FILE).exists());
    }
}
