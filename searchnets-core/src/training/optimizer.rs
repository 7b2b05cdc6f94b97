//! Optimizers over explicit parameter groups.
//!
//! A parameter is updated only if it belongs to a group. Frozen parameters
//! are left out of every group rather than given a zero rate, because a zero
//! rate is a legitimate setting for pretrained layers.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::config::OptimizerKind;
use crate::error::{ConfigError, Result, TrainingError};
use crate::network::StateDict;

pub const SGD_MOMENTUM: f32 = 0.9;
pub const ADAM_BETA1: f32 = 0.9;
pub const ADAM_BETA2: f32 = 0.999;
pub const ADAM_EPS: f32 = 1e-8;
pub const ADAMW_WEIGHT_DECAY: f32 = 0.01;

/// Parameters trained at one learning rate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamGroup {
    pub name: String,
    pub parameters: Vec<String>,
    pub learning_rate: f64,
}

/// Per-parameter optimizer buffers, saved with checkpoints.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OptimizerState {
    pub steps: u64,
    /// SGD momentum buffer, or Adam first moment.
    pub first_moment: StateDict,
    /// Adam second moment. Empty for SGD.
    pub second_moment: StateDict,
}

/// One parameter tensor and its gradient, handed to [`Optimizer::step`].
pub struct ParamUpdate<'a> {
    pub name: &'a str,
    pub value: &'a mut [f32],
    pub grad: &'a [f32],
}

#[derive(Debug, Clone)]
pub struct Optimizer {
    kind: OptimizerKind,
    groups: Vec<ParamGroup>,
    group_of: HashMap<String, usize>,
    state: OptimizerState,
}

impl Optimizer {
    pub fn new(kind: OptimizerKind, groups: Vec<ParamGroup>) -> Result<Self> {
        let mut group_of = HashMap::new();
        for (index, group) in groups.iter().enumerate() {
            if !group.learning_rate.is_finite() || group.learning_rate < 0.0 {
                return Err(ConfigError::invalid(
                    format!("learning rate of group {}", group.name),
                    format!("must be a non-negative number, got {}", group.learning_rate),
                )
                .into());
            }
            for name in &group.parameters {
                if group_of.insert(name.clone(), index).is_some() {
                    return Err(ConfigError::inconsistent(format!(
                        "parameter {name} is in more than one group"
                    ))
                    .into());
                }
            }
        }
        Ok(Self {
            kind,
            groups,
            group_of,
            state: OptimizerState::default(),
        })
    }

    pub fn kind(&self) -> OptimizerKind {
        self.kind
    }

    pub fn groups(&self) -> &[ParamGroup] {
        &self.groups
    }

    pub fn is_trainable(&self, parameter: &str) -> bool {
        self.group_of.contains_key(parameter)
    }

    pub fn learning_rate(&self, parameter: &str) -> Option<f64> {
        self.group_of
            .get(parameter)
            .map(|&g| self.groups[g].learning_rate)
    }

    pub fn state(&self) -> &OptimizerState {
        &self.state
    }

    /// Apply one update. Parameters outside every group are skipped.
    pub fn step(&mut self, updates: Vec<ParamUpdate<'_>>) -> Result<()> {
        self.state.steps += 1;
        let t = self.state.steps as i32;
        for update in updates {
            let Some(&group) = self.group_of.get(update.name) else {
                continue;
            };
            if update.grad.len() != update.value.len() {
                return Err(TrainingError::ShapeMismatch {
                    name: update.name.to_string(),
                    expected: update.value.len(),
                    actual: update.grad.len(),
                }
                .into());
            }
            let lr = self.groups[group].learning_rate as f32;
            let len = update.value.len();
            let state = &mut self.state;
            let m = state
                .first_moment
                .entry(update.name.to_string())
                .or_insert_with(|| vec![0.0; len]);
            check_buffer(update.name, m, len)?;
            match self.kind {
                OptimizerKind::Sgd => {
                    for ((p, &g), buf) in update.value.iter_mut().zip(update.grad).zip(m.iter_mut()) {
                        *buf = SGD_MOMENTUM * *buf + g;
                        *p -= lr * *buf;
                    }
                }
                OptimizerKind::Adam | OptimizerKind::AdamW => {
                    let v = state
                        .second_moment
                        .entry(update.name.to_string())
                        .or_insert_with(|| vec![0.0; len]);
                    check_buffer(update.name, v, len)?;
                    let decay = if self.kind == OptimizerKind::AdamW {
                        ADAMW_WEIGHT_DECAY
                    } else {
                        0.0
                    };
                    let correction1 = 1.0 - ADAM_BETA1.powi(t);
                    let correction2 = 1.0 - ADAM_BETA2.powi(t);
                    for (i, p) in update.value.iter_mut().enumerate() {
                        let g = update.grad[i];
                        *p -= lr * decay * *p;
                        m[i] = ADAM_BETA1 * m[i] + (1.0 - ADAM_BETA1) * g;
                        v[i] = ADAM_BETA2 * v[i] + (1.0 - ADAM_BETA2) * g * g;
                        let m_hat = m[i] / correction1;
                        let v_hat = v[i] / correction2;
                        *p -= lr * m_hat / (v_hat.sqrt() + ADAM_EPS);
                    }
                }
            }
        }
        Ok(())
    }
}

/// A parameter must keep its length across steps.
fn check_buffer(name: &str, buffer: &[f32], len: usize) -> Result<()> {
    if buffer.len() != len {
        return Err(TrainingError::ShapeMismatch {
            name: name.to_string(),
            expected: buffer.len(),
            actual: len,
        }
        .into());
    }
    Ok(())
}
