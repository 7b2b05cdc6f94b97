//! Training metrics tracking.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::Result;

/// Per-epoch history of one training job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingMetrics {
    pub epochs_completed: usize,
    /// Mean training loss per epoch.
    pub loss_history: Vec<f64>,
    /// `(epoch, accuracy)` for every validation check.
    pub val_acc_history: Vec<(usize, f64)>,
    pub best_epoch: Option<usize>,
    pub best_val_acc: Option<f64>,
    pub global_steps: u64,
    pub total_training_time_secs: f64,
}

impl TrainingMetrics {
    pub fn record_epoch(&mut self, loss: f64) {
        self.loss_history.push(loss);
        self.epochs_completed += 1;
    }

    /// Record a validation check, returns whether it is a new best.
    pub fn record_validation(&mut self, epoch: usize, accuracy: f64) -> bool {
        self.val_acc_history.push((epoch, accuracy));
        let improved = self.best_val_acc.is_none_or(|best| accuracy > best);
        if improved {
            self.best_val_acc = Some(accuracy);
            self.best_epoch = Some(epoch);
        }
        improved
    }

    pub fn last_loss(&self) -> Option<f64> {
        self.loss_history.last().copied()
    }
}

/// Training-set accuracy per set size, one row per epoch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccuracyBySetSize {
    set_sizes: Vec<u32>,
    rows: Vec<Vec<f64>>,
}

impl AccuracyBySetSize {
    /// `set_sizes` are the matrix columns, sorted.
    pub fn new(mut set_sizes: Vec<u32>) -> Self {
        set_sizes.sort_unstable();
        set_sizes.dedup();
        Self {
            set_sizes,
            rows: Vec::new(),
        }
    }

    pub fn set_sizes(&self) -> &[u32] {
        &self.set_sizes
    }

    pub fn rows(&self) -> &[Vec<f64>] {
        &self.rows
    }

    /// Append one epoch from `(correct, total)` counts keyed by set size.
    /// A set size with no samples gets NaN.
    pub fn push_epoch(&mut self, counts: &BTreeMap<u32, (usize, usize)>) {
        let row = self
            .set_sizes
            .iter()
            .map(|size| match counts.get(size) {
                Some(&(correct, total)) if total > 0 => correct as f64 / total as f64,
                _ => f64::NAN,
            })
            .collect();
        self.rows.push(row);
    }

    pub fn write_csv(&self, path: &Path) -> Result<()> {
        let mut writer = csv::Writer::from_path(path)?;
        writer.write_record(self.set_sizes.iter().map(u32::to_string))?;
        for row in &self.rows {
            writer.write_record(row.iter().map(f64::to_string))?;
        }
        writer.flush()?;
        Ok(())
    }
}
