//! Network collaborator interface.
//!
//! Architectures are supplied by an [`ArchitectureFactory`]. The training
//! strategies only need named parameters (to split learning-rate groups),
//! a forward pass and a training step, so any backend that implements
//! [`Network`] can be plugged into the orchestrator.

pub mod probe;

use rand::rngs::StdRng;
use std::collections::BTreeMap;

use crate::config::NetName;
use crate::data::{Batch, ImageTensor};
use crate::error::Result;
use crate::training::device::Device;
use crate::training::loss::Criterion;
use crate::training::optimizer::Optimizer;
use crate::training::reproducibility::RngHandle;

pub use probe::{ProbeFactory, ProbeNetwork};

/// Parameter tensors by name, flattened.
pub type StateDict = BTreeMap<String, Vec<f32>>;

/// One parameter tensor of a network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterInfo {
    /// Full name, e.g. `fc8.weight`.
    pub name: String,
    /// Layer the parameter belongs to, e.g. `fc8`.
    pub layer: String,
    pub len: usize,
}

impl ParameterInfo {
    pub fn new(name: impl Into<String>, len: usize) -> Self {
        let name = name.into();
        let layer = name.split('.').next().unwrap_or_default().to_string();
        Self { name, layer, len }
    }
}

pub trait Network: Send {
    fn net_name(&self) -> NetName;

    fn named_parameters(&self) -> Vec<ParameterInfo>;

    /// Layer names in parameter order, without repeats.
    fn layer_names(&self) -> Vec<String> {
        let mut layers: Vec<String> = Vec::new();
        for param in self.named_parameters() {
            if layers.last() != Some(&param.layer) {
                layers.push(param.layer);
            }
        }
        layers
    }

    /// Replace a layer's weights with freshly initialized ones.
    fn reinitialize_layer(&mut self, layer: &str, rng: &mut StdRng) -> Result<()>;

    fn to_device(&mut self, device: &Device) -> Result<()>;

    /// Split training steps across every device in `device`.
    ///
    /// Must not change parameter names or the state dict layout.
    fn replicate(&mut self, device: &Device) -> Result<()>;

    /// Raw class scores, one row per image.
    fn forward(&self, images: &[ImageTensor]) -> Result<Vec<Vec<f32>>>;

    /// Forward, backward and one optimizer step. Returns the mean batch loss.
    fn train_batch(
        &mut self,
        batch: &Batch,
        criterion: Criterion,
        optimizer: &mut Optimizer,
    ) -> Result<f64>;

    fn state_dict(&self) -> StateDict;

    fn load_state_dict(&mut self, state: &StateDict) -> Result<()>;
}

/// Builds networks by architecture name.
pub trait ArchitectureFactory: Send + Sync {
    /// Random initialization draws from `rng`. With `pretrained` the
    /// architecture's standard pretrained weights are loaded on top.
    fn build(
        &self,
        net_name: NetName,
        pretrained: bool,
        num_classes: usize,
        rng: &RngHandle,
    ) -> Result<Box<dyn Network>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parameter_layer_prefix() {
        let param = ParameterInfo::new("fc8.weight", 10);
        assert_eq!(param.layer, "fc8");
        assert_eq!(ParameterInfo::new("bias", 1).layer, "bias");
    }
}
