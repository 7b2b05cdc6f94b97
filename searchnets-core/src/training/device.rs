//! Compute device detection.
//!
//! Prefers CUDA when a usable GPU is visible, falls back to CPU otherwise.
//! Detection runs once per orchestrator invocation.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Compute device handed to every training strategy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Device {
    Cpu,
    /// One or more CUDA devices, by index.
    Cuda { device_ids: Vec<usize> },
}

impl Device {
    /// Auto-detect the best available device.
    pub fn detect() -> Self {
        if let Ok(visible) = std::env::var("CUDA_VISIBLE_DEVICES") {
            let ids = parse_visible_devices(&visible);
            return if ids.is_empty() {
                Device::Cpu
            } else {
                Device::Cuda { device_ids: ids }
            };
        }

        let ids = std::process::Command::new("nvidia-smi")
            .arg("--query-gpu=index")
            .arg("--format=csv,noheader")
            .output()
            .ok()
            .filter(|o| o.status.success())
            .map(|o| parse_gpu_indices(&String::from_utf8_lossy(&o.stdout)))
            .unwrap_or_default();

        if ids.is_empty() {
            Device::Cpu
        } else {
            Device::Cuda { device_ids: ids }
        }
    }

    pub const fn is_cuda(&self) -> bool {
        matches!(self, Device::Cuda { .. })
    }

    /// Number of devices a model could be replicated across.
    pub fn device_count(&self) -> usize {
        match self {
            Device::Cpu => 1,
            Device::Cuda { device_ids } => device_ids.len(),
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => write!(f, "cpu"),
            Device::Cuda { device_ids } if device_ids.len() == 1 => {
                write!(f, "cuda:{}", device_ids[0])
            }
            Device::Cuda { device_ids } => write!(f, "cuda:{device_ids:?}"),
        }
    }
}

/// Device plus the numeric-kernel settings requested for the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComputeContext {
    pub device: Device,
    /// Disable non-deterministic kernels, set when a random seed was given.
    pub deterministic: bool,
}

impl ComputeContext {
    pub fn new(device: Device, deterministic: bool) -> Self {
        Self {
            device,
            deterministic,
        }
    }

    pub fn cpu() -> Self {
        Self::new(Device::Cpu, true)
    }
}

fn parse_visible_devices(value: &str) -> Vec<usize> {
    let value = value.trim();
    if value.is_empty() || value == "-1" {
        return Vec::new();
    }
    value
        .split(',')
        .filter_map(|id| id.trim().parse().ok())
        .collect()
}

fn parse_gpu_indices(output: &str) -> Vec<usize> {
    output
        .lines()
        .filter_map(|line| line.trim().parse().ok())
        .collect()
}
