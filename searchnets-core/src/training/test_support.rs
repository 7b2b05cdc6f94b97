//! Fixtures for trainer tests: a small in-memory dataset and a probe network
//! factory wired to a scratch directory.

use rand::SeedableRng;
use rand::rngs::StdRng;
use std::path::Path;
use std::sync::Arc;

use crate::config::{NetName, OptimizerKind};
use crate::data::{Dataset, ImageTensor, Sample, Split, Target};
use crate::error::Result;
use crate::network::{Network, ProbeFactory, ProbeNetwork, StateDict};
use crate::persistence::atomic_write_json;
use crate::training::device::ComputeContext;
use crate::training::loss::Criterion;
use crate::training::reproducibility::RngHandle;
use crate::training::strategy::{JobData, StrategyContext, TrainerSettings};

pub const INPUT_DIM: usize = 4;
pub const HIDDEN_DIM: usize = 6;

/// Linearly separable two-class data with set sizes 1 and 2.
pub struct Synthetic {
    pub split: Split,
    pub n: usize,
    pub with_set_size: bool,
}

impl Dataset for Synthetic {
    fn split(&self) -> Split {
        self.split
    }

    fn len(&self) -> usize {
        self.n
    }

    fn get(&self, index: usize) -> Result<Sample> {
        let label = index % 2;
        let present = label as f32;
        let image = ImageTensor::flat(vec![present, 1.0 - present, (index % 3) as f32 * 0.1, 0.5]);
        Ok(Sample {
            image,
            target: Target::Class(label),
            set_size: self.with_set_size.then_some(1 + (index / 2 % 2) as u32),
        })
    }

    fn set_sizes(&self) -> Vec<u32> {
        if self.with_set_size { vec![1, 2] } else { Vec::new() }
    }
}

#[derive(Debug, Clone)]
pub struct FixtureOptions {
    pub epochs: u32,
    pub use_val: bool,
    pub val_epoch: Option<u32>,
    pub patience: Option<u32>,
    pub checkpoint_epoch: Option<u32>,
    pub summary_step: Option<u32>,
    pub track_set_sizes: bool,
    pub data_parallel: bool,
    pub num_workers: usize,
    pub optimizer: OptimizerKind,
}

impl Default for FixtureOptions {
    fn default() -> Self {
        Self {
            epochs: 3,
            use_val: false,
            val_epoch: None,
            patience: None,
            checkpoint_epoch: None,
            summary_step: None,
            track_set_sizes: false,
            data_parallel: false,
            num_workers: 0,
            optimizer: OptimizerKind::Sgd,
        }
    }
}

/// Strategy context whose job artifacts land in `dir`.
pub fn context(dir: &Path, options: &FixtureOptions) -> StrategyContext<'static> {
    let factory: &'static ProbeFactory = Box::leak(Box::new(
        ProbeFactory::new(INPUT_DIM)
            .with_hidden_dim(HIDDEN_DIM)
            .with_pretrained_dir(dir.join("pretrained")),
    ));
    let data = JobData {
        trainset: Arc::new(Synthetic {
            split: Split::Train,
            n: 12,
            with_set_size: false,
        }),
        valset: options.use_val.then(|| {
            Arc::new(Synthetic {
                split: Split::Val,
                n: 8,
                with_set_size: false,
            }) as Arc<dyn Dataset>
        }),
        trainset_set_size: options.track_set_sizes.then(|| {
            Arc::new(Synthetic {
                split: Split::Train,
                n: 12,
                with_set_size: true,
            }) as Arc<dyn Dataset>
        }),
    };
    StrategyContext {
        settings: TrainerSettings {
            net_name: NetName::Alexnet,
            save_path: dir.to_path_buf(),
            num_classes: 2,
            criterion: Criterion::CrossEntropy,
            apply_sigmoid: false,
            optimizer: options.optimizer,
            batch_size: 4,
            epochs: options.epochs,
            use_val: options.use_val,
            val_epoch: options.val_epoch,
            patience: options.patience,
            checkpoint_epoch: options.checkpoint_epoch,
            summary_step: options.summary_step,
            save_acc_by_set_size_by_epoch: options.track_set_sizes,
            num_workers: options.num_workers,
            data_parallel: options.data_parallel,
        },
        data,
        factory,
        compute: ComputeContext::cpu(),
        rng: RngHandle::seeded(42),
    }
}

/// Write pretrained weights for `alexnet` where [`context`] looks for them.
pub fn write_pretrained(dir: &Path) -> StateDict {
    let net = ProbeNetwork::new(
        NetName::Alexnet,
        INPUT_DIM,
        HIDDEN_DIM,
        2,
        &mut StdRng::seed_from_u64(1234),
    );
    let state = net.state_dict();
    atomic_write_json(&dir.join("pretrained").join("alexnet.json"), &state).unwrap();
    state
}
