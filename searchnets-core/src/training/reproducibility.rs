//! Reproducibility: a shared random generator and per-job environment snapshots.

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::{Arc, Mutex, MutexGuard};

/// Random generator shared by every job of one orchestrator run.
///
/// Seeding it once makes the sequence of jobs reproducible. A single job
/// replayed on its own draws different numbers, because earlier jobs have
/// already advanced the generator.
#[derive(Debug, Clone)]
pub struct RngHandle {
    seed: Option<u64>,
    inner: Arc<Mutex<StdRng>>,
}

impl RngHandle {
    pub fn seeded(seed: u64) -> Self {
        Self {
            seed: Some(seed),
            inner: Arc::new(Mutex::new(StdRng::seed_from_u64(seed))),
        }
    }

    pub fn from_entropy() -> Self {
        Self {
            seed: None,
            inner: Arc::new(Mutex::new(StdRng::from_entropy())),
        }
    }

    pub fn seed(&self) -> Option<u64> {
        self.seed
    }

    /// Whether runs using this handle can be replayed.
    pub fn is_deterministic(&self) -> bool {
        self.seed.is_some()
    }

    pub fn lock(&self) -> MutexGuard<'_, StdRng> {
        // A panic while the lock is held cannot leave the generator in an invalid state.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Draw a seed for a component-local generator.
    pub fn derive_seed(&self) -> u64 {
        self.lock().next_u64()
    }

    /// A new generator seeded from the shared one.
    pub fn fork(&self) -> StdRng {
        StdRng::seed_from_u64(self.derive_seed())
    }
}

/// Snapshot of the environment a job ran in, written next to its artifacts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentSnapshot {
    pub crate_version: String,
    pub platform: String,
    pub system_info: String,
    pub seed: Option<u64>,
    pub timestamp: DateTime<Utc>,
    /// Hash of relevant environment variables (CUDA_VISIBLE_DEVICES, RAYON_NUM_THREADS).
    pub env_vars_hash: String,
}

impl EnvironmentSnapshot {
    pub fn capture(seed: Option<u64>) -> Self {
        Self {
            crate_version: env!("CARGO_PKG_VERSION").to_string(),
            platform: std::env::consts::OS.to_string(),
            system_info: format!("{} {}", std::env::consts::OS, std::env::consts::ARCH),
            seed,
            timestamp: Utc::now(),
            env_vars_hash: Self::compute_env_vars_hash(),
        }
    }

    fn compute_env_vars_hash() -> String {
        let mut hasher = Sha256::new();
        for var in &["CUDA_VISIBLE_DEVICES", "RAYON_NUM_THREADS"] {
            let value = std::env::var(var).unwrap_or_default();
            hasher.update(var.as_bytes());
            hasher.update(b"=");
            hasher.update(value.as_bytes());
            hasher.update(b"\n");
        }
        format!("{:x}", hasher.finalize())
    }
}
