//! Per-epoch training callbacks: validation-driven early stopping and the
//! every-N cadence shared by validation, checkpointing and summaries.

use serde::{Deserialize, Serialize};

/// Action a callback requests from the epoch loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackAction {
    Continue,
    Stop,
}

/// Result of feeding one validation accuracy to [`EarlyStopping`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidationCheck {
    /// Strictly better than every earlier check.
    pub improved: bool,
    pub action: CallbackAction,
}

/// Stops training after `patience` consecutive validation checks without a
/// new best accuracy. Without patience it only tracks the best.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EarlyStopping {
    pub patience: Option<u32>,
    #[serde(skip)]
    checks_without_improvement: u32,
    #[serde(skip)]
    best_accuracy: Option<f64>,
}

impl EarlyStopping {
    pub fn new(patience: Option<u32>) -> Self {
        Self {
            patience,
            checks_without_improvement: 0,
            best_accuracy: None,
        }
    }

    pub fn best_accuracy(&self) -> Option<f64> {
        self.best_accuracy
    }

    pub fn checks_without_improvement(&self) -> u32 {
        self.checks_without_improvement
    }

    pub fn on_validation(&mut self, accuracy: f64) -> ValidationCheck {
        let improved = self.best_accuracy.is_none_or(|best| accuracy > best);
        if improved {
            self.best_accuracy = Some(accuracy);
            self.checks_without_improvement = 0;
        } else {
            self.checks_without_improvement += 1;
        }
        let action = match self.patience {
            Some(patience) if self.checks_without_improvement >= patience => CallbackAction::Stop,
            _ => CallbackAction::Continue,
        };
        ValidationCheck { improved, action }
    }
}

/// Fires on every multiple of `every`; never fires when unset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cadence {
    every: Option<u32>,
}

impl Cadence {
    pub fn every(every: Option<u32>) -> Self {
        Self {
            every: every.filter(|&n| n > 0),
        }
    }

    pub fn never() -> Self {
        Self { every: None }
    }

    pub fn is_due(&self, count: u64) -> bool {
        self.every
            .is_some_and(|every| count > 0 && count % u64::from(every) == 0)
    }
}
