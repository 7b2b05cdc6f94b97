//! Reference backend: a two-layer perceptron on flattened images.
//!
//! Layer names follow the AlexNet convention so the transfer defaults
//! (`new_learn_rate_layers = ["fc8"]`) apply unchanged. Pretrained weights
//! are read from `<pretrained_dir>/<net_name>.json`, a saved state dict.
//! Data-parallel training splits each batch into shards, computes shard
//! gradients on the `rayon` pool and sums them in shard order.

use rand::Rng;
use rand::rngs::StdRng;
use rayon::prelude::*;
use std::path::{Path, PathBuf};

use super::{ArchitectureFactory, Network, ParameterInfo, StateDict};
use crate::config::NetName;
use crate::data::{Batch, ImageTensor, Target};
use crate::error::{ResourceError, Result, TrainingError};
use crate::training::device::Device;
use crate::training::loss::Criterion;
use crate::training::optimizer::{Optimizer, ParamUpdate};
use crate::training::reproducibility::RngHandle;

const FEATURES: &str = "features";
const CLASSIFIER: &str = "fc8";

#[derive(Debug, Clone)]
pub struct ProbeFactory {
    input_dim: usize,
    hidden_dim: usize,
    pretrained_dir: Option<PathBuf>,
}

impl ProbeFactory {
    pub const DEFAULT_HIDDEN_DIM: usize = 64;

    pub fn new(input_dim: usize) -> Self {
        Self {
            input_dim,
            hidden_dim: Self::DEFAULT_HIDDEN_DIM,
            pretrained_dir: None,
        }
    }

    pub fn with_hidden_dim(mut self, hidden_dim: usize) -> Self {
        self.hidden_dim = hidden_dim;
        self
    }

    pub fn with_pretrained_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.pretrained_dir = Some(dir.into());
        self
    }

    fn pretrained_weights(&self, net_name: NetName) -> Result<StateDict> {
        let file = format!("{net_name}.json");
        let path = match &self.pretrained_dir {
            Some(dir) => dir.join(file),
            None => PathBuf::from(file),
        };
        if self.pretrained_dir.is_none() || !path.exists() {
            return Err(ResourceError::MissingPretrainedWeights {
                net_name: net_name.to_string(),
                path,
            }
            .into());
        }
        read_state_dict(&path)
    }
}

impl ArchitectureFactory for ProbeFactory {
    fn build(
        &self,
        net_name: NetName,
        pretrained: bool,
        num_classes: usize,
        rng: &RngHandle,
    ) -> Result<Box<dyn Network>> {
        let mut network = {
            let mut rng = rng.lock();
            ProbeNetwork::new(net_name, self.input_dim, self.hidden_dim, num_classes, &mut rng)
        };
        if pretrained {
            let state = self.pretrained_weights(net_name)?;
            network.load_pretrained(&state)?;
        }
        Ok(Box::new(network))
    }
}

pub fn read_state_dict(path: &Path) -> Result<StateDict> {
    let data = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&data)?)
}

/// Fully connected layer, row-major weights of shape `outputs x inputs`.
#[derive(Debug, Clone, PartialEq)]
struct Dense {
    inputs: usize,
    outputs: usize,
    weight: Vec<f32>,
    bias: Vec<f32>,
}

impl Dense {
    fn zeros(inputs: usize, outputs: usize) -> Self {
        Self {
            inputs,
            outputs,
            weight: vec![0.0; inputs * outputs],
            bias: vec![0.0; outputs],
        }
    }

    /// Uniform in `[-1/sqrt(inputs), 1/sqrt(inputs))`.
    fn random(inputs: usize, outputs: usize, rng: &mut StdRng) -> Self {
        let bound = 1.0 / (inputs.max(1) as f32).sqrt();
        let mut layer = Self::zeros(inputs, outputs);
        for w in layer.weight.iter_mut().chain(layer.bias.iter_mut()) {
            *w = rng.gen_range(-bound..bound);
        }
        layer
    }

    fn apply(&self, x: &[f32]) -> Vec<f32> {
        self.weight
            .chunks(self.inputs)
            .zip(&self.bias)
            .map(|(row, b)| row.iter().zip(x).map(|(w, v)| w * v).sum::<f32>() + b)
            .collect()
    }

    /// Accumulate the gradient of `dy` with respect to this layer's parameters.
    fn accumulate(&mut self, x: &[f32], dy: &[f32]) {
        for ((row, b), &d) in self.weight.chunks_mut(self.inputs).zip(&mut self.bias).zip(dy) {
            *b += d;
            for (w, &v) in row.iter_mut().zip(x) {
                *w += d * v;
            }
        }
    }

    /// Gradient with respect to the layer input.
    fn backward_input(&self, dy: &[f32]) -> Vec<f32> {
        let mut dx = vec![0.0; self.inputs];
        for (row, &d) in self.weight.chunks(self.inputs).zip(dy) {
            for (acc, &w) in dx.iter_mut().zip(row) {
                *acc += d * w;
            }
        }
        dx
    }

    fn add(&mut self, other: &Dense) {
        for (a, b) in self.weight.iter_mut().zip(&other.weight) {
            *a += b;
        }
        for (a, b) in self.bias.iter_mut().zip(&other.bias) {
            *a += b;
        }
    }

    fn scale(&mut self, factor: f32) {
        for v in self.weight.iter_mut().chain(self.bias.iter_mut()) {
            *v *= factor;
        }
    }
}

#[derive(Debug, Clone)]
struct Gradients {
    features: Dense,
    fc8: Dense,
}

#[derive(Debug, Clone)]
pub struct ProbeNetwork {
    net_name: NetName,
    features: Dense,
    fc8: Dense,
    device: Device,
    replicas: usize,
}

impl ProbeNetwork {
    pub fn new(
        net_name: NetName,
        input_dim: usize,
        hidden_dim: usize,
        num_classes: usize,
        rng: &mut StdRng,
    ) -> Self {
        Self {
            net_name,
            features: Dense::random(input_dim, hidden_dim, rng),
            fc8: Dense::random(hidden_dim, num_classes, rng),
            device: Device::Cpu,
            replicas: 1,
        }
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn replicas(&self) -> usize {
        self.replicas
    }

    /// Load pretrained weights. A classifier sized for a different number of
    /// classes keeps its fresh initialization.
    fn load_pretrained(&mut self, state: &StateDict) -> Result<()> {
        let mut state = state.clone();
        let classifier_shape = [
            (format!("{CLASSIFIER}.weight"), self.fc8.weight.len()),
            (format!("{CLASSIFIER}.bias"), self.fc8.bias.len()),
        ];
        if classifier_shape
            .iter()
            .any(|(name, len)| state.get(name).is_some_and(|v| v.len() != *len))
        {
            tracing::debug!(net = %self.net_name, "pretrained classifier has a different class count, keeping fresh {CLASSIFIER}");
            for (name, _) in &classifier_shape {
                state.insert(name.clone(), self.parameter(name).to_vec());
            }
        }
        self.load_state_dict(&state)
    }

    fn parameter(&self, name: &str) -> &[f32] {
        match name.split_once('.') {
            Some((FEATURES, "weight")) => &self.features.weight,
            Some((FEATURES, "bias")) => &self.features.bias,
            Some((CLASSIFIER, "weight")) => &self.fc8.weight,
            Some((CLASSIFIER, "bias")) => &self.fc8.bias,
            _ => &[],
        }
    }

    fn layers_mut(&mut self) -> [(&'static str, &mut Dense); 2] {
        [(FEATURES, &mut self.features), (CLASSIFIER, &mut self.fc8)]
    }

    fn check_input(&self, image: &ImageTensor) -> Result<()> {
        if image.len() != self.features.inputs {
            return Err(TrainingError::ShapeMismatch {
                name: "input image".to_string(),
                expected: self.features.inputs,
                actual: image.len(),
            }
            .into());
        }
        Ok(())
    }

    fn hidden(&self, x: &[f32]) -> Vec<f32> {
        let mut h = self.features.apply(x);
        for v in &mut h {
            *v = v.max(0.0);
        }
        h
    }

    /// Summed loss and gradients over a shard of samples.
    fn shard_gradients(
        &self,
        images: &[ImageTensor],
        targets: &[Target],
        criterion: Criterion,
    ) -> Result<(f64, Gradients)> {
        let mut grads = Gradients {
            features: Dense::zeros(self.features.inputs, self.features.outputs),
            fc8: Dense::zeros(self.fc8.inputs, self.fc8.outputs),
        };
        let mut loss = 0.0;
        for (image, target) in images.iter().zip(targets) {
            self.check_input(image)?;
            let x = image.as_slice();
            let h = self.hidden(x);
            let scores = self.fc8.apply(&h);
            let (sample_loss, d_scores) = criterion.loss_and_grad(&scores, target)?;
            loss += sample_loss;
            grads.fc8.accumulate(&h, &d_scores);
            let mut dh = self.fc8.backward_input(&d_scores);
            for (d, &a) in dh.iter_mut().zip(&h) {
                if a <= 0.0 {
                    *d = 0.0;
                }
            }
            grads.features.accumulate(x, &dh);
        }
        Ok((loss, grads))
    }
}

impl Network for ProbeNetwork {
    fn net_name(&self) -> NetName {
        self.net_name
    }

    fn named_parameters(&self) -> Vec<ParameterInfo> {
        vec![
            ParameterInfo::new(format!("{FEATURES}.weight"), self.features.weight.len()),
            ParameterInfo::new(format!("{FEATURES}.bias"), self.features.bias.len()),
            ParameterInfo::new(format!("{CLASSIFIER}.weight"), self.fc8.weight.len()),
            ParameterInfo::new(format!("{CLASSIFIER}.bias"), self.fc8.bias.len()),
        ]
    }

    fn reinitialize_layer(&mut self, layer: &str, rng: &mut StdRng) -> Result<()> {
        for (name, dense) in self.layers_mut() {
            if name == layer {
                *dense = Dense::random(dense.inputs, dense.outputs, rng);
                return Ok(());
            }
        }
        Err(TrainingError::UnknownLayer {
            layer: layer.to_string(),
        }
        .into())
    }

    fn to_device(&mut self, device: &Device) -> Result<()> {
        if device.is_cuda() {
            tracing::debug!(%device, "reference backend computes on the CPU");
        }
        self.device = device.clone();
        Ok(())
    }

    fn replicate(&mut self, device: &Device) -> Result<()> {
        self.replicas = match device {
            Device::Cpu => rayon::current_num_threads(),
            Device::Cuda { .. } => device.device_count(),
        }
        .max(1);
        tracing::info!(%device, replicas = self.replicas, "data parallel training");
        Ok(())
    }

    fn forward(&self, images: &[ImageTensor]) -> Result<Vec<Vec<f32>>> {
        images
            .iter()
            .map(|image| {
                self.check_input(image)?;
                Ok(self.fc8.apply(&self.hidden(image.as_slice())))
            })
            .collect()
    }

    fn train_batch(
        &mut self,
        batch: &Batch,
        criterion: Criterion,
        optimizer: &mut Optimizer,
    ) -> Result<f64> {
        let n = batch.len();
        if n == 0 {
            return Ok(0.0);
        }
        let (loss, mut grads) = if self.replicas > 1 && n > 1 {
            let shard = n.div_ceil(self.replicas);
            let shards: Vec<(f64, Gradients)> = batch
                .images
                .par_chunks(shard)
                .zip(batch.targets.par_chunks(shard))
                .map(|(images, targets)| self.shard_gradients(images, targets, criterion))
                .collect::<Result<_>>()?;
            let mut shards = shards.into_iter();
            let (mut loss, mut grads) = shards
                .next()
                .ok_or_else(|| TrainingError::backend("batch produced no shards"))?;
            for (shard_loss, shard_grads) in shards {
                loss += shard_loss;
                grads.features.add(&shard_grads.features);
                grads.fc8.add(&shard_grads.fc8);
            }
            (loss, grads)
        } else {
            self.shard_gradients(&batch.images, &batch.targets, criterion)?
        };

        let scale = 1.0 / n as f32;
        grads.features.scale(scale);
        grads.fc8.scale(scale);

        let features_weight = format!("{FEATURES}.weight");
        let features_bias = format!("{FEATURES}.bias");
        let fc8_weight = format!("{CLASSIFIER}.weight");
        let fc8_bias = format!("{CLASSIFIER}.bias");
        optimizer.step(vec![
            ParamUpdate {
                name: &features_weight,
                value: &mut self.features.weight,
                grad: &grads.features.weight,
            },
            ParamUpdate {
                name: &features_bias,
                value: &mut self.features.bias,
                grad: &grads.features.bias,
            },
            ParamUpdate {
                name: &fc8_weight,
                value: &mut self.fc8.weight,
                grad: &grads.fc8.weight,
            },
            ParamUpdate {
                name: &fc8_bias,
                value: &mut self.fc8.bias,
                grad: &grads.fc8.bias,
            },
        ])?;
        Ok(loss / n as f64)
    }

    fn state_dict(&self) -> StateDict {
        self.named_parameters()
            .into_iter()
            .map(|p| {
                let value = self.parameter(&p.name).to_vec();
                (p.name, value)
            })
            .collect()
    }

    fn load_state_dict(&mut self, state: &StateDict) -> Result<()> {
        for param in self.named_parameters() {
            let value = state.get(&param.name).ok_or_else(|| {
                TrainingError::backend(format!("state dict has no entry for {}", param.name))
            })?;
            if value.len() != param.len {
                return Err(TrainingError::ShapeMismatch {
                    name: param.name,
                    expected: param.len,
                    actual: value.len(),
                }
                .into());
            }
        }
        for (layer, dense) in self.layers_mut() {
            dense.weight.clone_from(&state[&format!("{layer}.weight")]);
            dense.bias.clone_from(&state[&format!("{layer}.bias")]);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OptimizerKind;
    use crate::training::optimizer::ParamGroup;
    use rand::SeedableRng;

    fn network(seed: u64) -> ProbeNetwork {
        ProbeNetwork::new(NetName::Alexnet, 4, 6, 2, &mut StdRng::seed_from_u64(seed))
    }

    fn batch() -> Batch {
        Batch {
            images: (0..6)
                .map(|i| ImageTensor::flat(vec![i as f32 / 6.0, 1.0, -0.5, (i % 2) as f32]))
                .collect(),
            targets: (0..6).map(|i| Target::Class(i % 2)).collect(),
            set_sizes: None,
        }
    }

    fn all_params(net: &ProbeNetwork, lr: f64) -> Optimizer {
        let params = net.named_parameters().into_iter().map(|p| p.name).collect();
        Optimizer::new(
            OptimizerKind::Sgd,
            vec![ParamGroup {
                name: "all".into(),
                parameters: params,
                learning_rate: lr,
            }],
        )
        .unwrap()
    }

    #[test]
    fn test_layers_and_parameters() {
        let net = network(0);
        assert_eq!(net.layer_names(), vec!["features", "fc8"]);
        let lens: Vec<usize> = net.named_parameters().iter().map(|p| p.len).collect();
        assert_eq!(lens, vec![24, 6, 12, 2]);
    }

    #[test]
    fn test_training_reduces_loss() {
        let mut net = network(1);
        let mut opt = all_params(&net, 0.1);
        let first = net.train_batch(&batch(), Criterion::CrossEntropy, &mut opt).unwrap();
        let mut last = first;
        for _ in 0..50 {
            last = net.train_batch(&batch(), Criterion::CrossEntropy, &mut opt).unwrap();
        }
        assert!(last < first);
    }

    #[test]
    fn test_data_parallel_matches_single_replica() {
        let mut single = network(2);
        let mut parallel = single.clone();
        parallel.replicas = 3;
        let mut opt_a = all_params(&single, 0.05);
        let mut opt_b = all_params(&parallel, 0.05);
        let a = single.train_batch(&batch(), Criterion::CrossEntropy, &mut opt_a).unwrap();
        let b = parallel.train_batch(&batch(), Criterion::CrossEntropy, &mut opt_b).unwrap();
        assert!((a - b).abs() < 1e-6);
        let (sa, sb) = (single.state_dict(), parallel.state_dict());
        for (name, va) in &sa {
            for (x, y) in va.iter().zip(&sb[name]) {
                assert!((x - y).abs() < 1e-5, "{name} diverged");
            }
        }
    }

    #[test]
    fn test_state_dict_round_trip_and_shape_check() {
        let source = network(3);
        let mut target = network(4);
        target.load_state_dict(&source.state_dict()).unwrap();
        assert_eq!(target.state_dict(), source.state_dict());

        let mut bad = source.state_dict();
        bad.insert("fc8.bias".into(), vec![0.0; 5]);
        assert!(target.load_state_dict(&bad).is_err());
    }

    #[test]
    fn test_reinitialize_unknown_layer() {
        let mut net = network(5);
        let mut rng = StdRng::seed_from_u64(0);
        let before = net.state_dict();
        net.reinitialize_layer("fc8", &mut rng).unwrap();
        let after = net.state_dict();
        assert_eq!(before["features.weight"], after["features.weight"]);
        assert_ne!(before["fc8.weight"], after["fc8.weight"]);
        assert!(net.reinitialize_layer("conv1", &mut rng).is_err());
    }

    #[test]
    fn test_pretrained_weights_required() {
        let factory = ProbeFactory::new(4);
        let err = factory.build(NetName::Vgg16, true, 2, &RngHandle::seeded(0));
        assert!(err.is_err());
    }

    #[test]
    fn test_pretrained_classifier_with_other_class_count() {
        let dir = tempfile::tempdir().unwrap();
        let imagenet = ProbeNetwork::new(NetName::Alexnet, 4, 6, 10, &mut StdRng::seed_from_u64(9));
        let state = imagenet.state_dict();
        std::fs::write(
            dir.path().join("alexnet.json"),
            serde_json::to_string(&state).unwrap(),
        )
        .unwrap();
        let factory = ProbeFactory::new(4)
            .with_hidden_dim(6)
            .with_pretrained_dir(dir.path());
        let net = factory
            .build(NetName::Alexnet, true, 2, &RngHandle::seeded(0))
            .unwrap();
        let loaded = net.state_dict();
        assert_eq!(loaded["features.weight"], state["features.weight"]);
        assert_eq!(loaded["fc8.bias"].len(), 2);
    }

    #[test]
    fn test_input_shape_checked() {
        let net = network(6);
        let err = net.forward(&[ImageTensor::flat(vec![0.0; 3])]);
        assert!(err.is_err());
    }
}
