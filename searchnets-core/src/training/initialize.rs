//! Train from randomly initialized weights.

use crate::config::Method;
use crate::error::Result;
use crate::training::optimizer::{Optimizer, ParamGroup};
use crate::training::strategy::{StrategyContext, Trainer, TrainingStrategy};

/// Every parameter trained at `learning_rate`.
pub struct InitializeTrainer {
    trainer: Trainer,
}

impl InitializeTrainer {
    pub fn from_context(ctx: StrategyContext<'_>, learning_rate: f64) -> Result<Self> {
        let settings = ctx.settings;
        let network = ctx
            .factory
            .build(settings.net_name, false, settings.num_classes, &ctx.rng)?;
        let parameters = network
            .named_parameters()
            .into_iter()
            .map(|p| p.name)
            .collect();
        let optimizer = Optimizer::new(
            settings.optimizer,
            vec![ParamGroup {
                name: "all".to_string(),
                parameters,
                learning_rate,
            }],
        )?;
        let trainer = Trainer::new(settings, ctx.data, network, optimizer, ctx.compute, ctx.rng)?;
        Ok(Self { trainer })
    }
}

impl TrainingStrategy for InitializeTrainer {
    fn method(&self) -> Method {
        Method::Initialize
    }

    fn trainer(&mut self) -> &mut Trainer {
        &mut self.trainer
    }
}
