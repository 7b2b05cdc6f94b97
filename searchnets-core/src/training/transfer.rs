//! Transfer learning from pretrained weights.
//!
//! Layers named in `new_learn_rate_layers` are re-initialized and trained at
//! `new_layer_learning_rate`. Every other layer keeps its pretrained weights
//! and is either trained at `base_learning_rate` or, when frozen, left out of
//! the optimizer altogether.

use crate::config::Method;
use crate::error::{Result, TrainingError};
use crate::training::optimizer::{Optimizer, ParamGroup};
use crate::training::strategy::{StrategyContext, Trainer, TrainingStrategy};

/// Learning-rate settings specific to transfer learning.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferSettings {
    pub new_learn_rate_layers: Vec<String>,
    pub new_layer_learning_rate: f64,
    pub base_learning_rate: f64,
    pub freeze_trained_weights: bool,
}

pub struct TransferTrainer {
    trainer: Trainer,
}

impl TransferTrainer {
    pub fn from_context(ctx: StrategyContext<'_>, transfer: &TransferSettings) -> Result<Self> {
        let settings = ctx.settings;
        let mut network = ctx
            .factory
            .build(settings.net_name, true, settings.num_classes, &ctx.rng)?;

        let layers = network.layer_names();
        for layer in &transfer.new_learn_rate_layers {
            if !layers.contains(layer) {
                return Err(TrainingError::UnknownLayer {
                    layer: layer.clone(),
                }
                .into());
            }
            network.reinitialize_layer(layer, &mut ctx.rng.fork())?;
        }

        let (new_params, pretrained_params): (Vec<_>, Vec<_>) = network
            .named_parameters()
            .into_iter()
            .partition(|p| transfer.new_learn_rate_layers.contains(&p.layer));
        let mut groups = vec![ParamGroup {
            name: "new_layers".to_string(),
            parameters: new_params.into_iter().map(|p| p.name).collect(),
            learning_rate: transfer.new_layer_learning_rate,
        }];
        if transfer.freeze_trained_weights {
            tracing::debug!(
                frozen = pretrained_params.len(),
                "pretrained parameters excluded from the optimizer"
            );
        } else {
            groups.push(ParamGroup {
                name: "pretrained".to_string(),
                parameters: pretrained_params.into_iter().map(|p| p.name).collect(),
                learning_rate: transfer.base_learning_rate,
            });
        }
        let optimizer = Optimizer::new(settings.optimizer, groups)?;
        let trainer = Trainer::new(settings, ctx.data, network, optimizer, ctx.compute, ctx.rng)?;
        Ok(Self { trainer })
    }
}

impl TrainingStrategy for TransferTrainer {
    fn method(&self) -> Method {
        Method::Transfer
    }

    fn trainer(&mut self) -> &mut Trainer {
        &mut self.trainer
    }
}
