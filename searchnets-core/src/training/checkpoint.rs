//! Checkpoint management for training jobs.
//!
//! Checkpoints live under `<job save path>/checkpoints/`, one JSON file per
//! epoch plus a `checkpoints.json` manifest recording each file's SHA-256.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::network::StateDict;
use crate::persistence::{atomic_write_json, load_json};
use crate::training::optimizer::OptimizerState;

const MANIFEST: &str = "checkpoints.json";

/// Manifest entry for one saved checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub epoch: usize,
    pub loss: f64,
    pub path: PathBuf,
    pub hash: String,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
}

/// Model and optimizer state at the end of an epoch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointPayload {
    pub epoch: usize,
    pub model: StateDict,
    pub optimizer: OptimizerState,
}

pub struct CheckpointManager {
    dir: PathBuf,
}

impl CheckpointManager {
    pub fn new(job_dir: &Path) -> Self {
        Self {
            dir: job_dir.join("checkpoints"),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn list(&self) -> Result<Vec<Checkpoint>> {
        Ok(load_json(&self.dir.join(MANIFEST))?.unwrap_or_default())
    }

    /// Most recent epoch saved.
    pub fn latest(&self) -> Result<Option<Checkpoint>> {
        Ok(self.list()?.into_iter().max_by_key(|c| c.epoch))
    }

    /// Write `epoch-<N>.json` and record it in the manifest.
    pub fn save(
        &self,
        epoch: usize,
        loss: f64,
        model: &StateDict,
        optimizer: &OptimizerState,
    ) -> Result<Checkpoint> {
        let path = self.dir.join(format!("epoch-{epoch}.json"));
        let payload = CheckpointPayload {
            epoch,
            model: model.clone(),
            optimizer: optimizer.clone(),
        };
        let bytes = atomic_write_json(&path, &payload)?;
        let hash = format!("{:x}", Sha256::digest(&bytes));

        let checkpoint = Checkpoint {
            epoch,
            loss,
            path,
            hash,
            size_bytes: bytes.len() as u64,
            created_at: Utc::now(),
        };

        let mut checkpoints = self.list()?;
        checkpoints.retain(|c| c.epoch != epoch);
        checkpoints.push(checkpoint.clone());
        atomic_write_json(&self.dir.join(MANIFEST), &checkpoints)?;
        Ok(checkpoint)
    }

    /// Load a checkpoint's payload, `None` if that epoch was never saved.
    pub fn load(&self, epoch: usize) -> Result<Option<CheckpointPayload>> {
        Ok(load_json(&self.dir.join(format!("epoch-{epoch}.json")))?)
    }

    /// Whether the file on disk still matches its manifest hash.
    pub fn verify(&self, checkpoint: &Checkpoint) -> Result<bool> {
        let bytes = std::fs::read(&checkpoint.path)?;
        Ok(format!("{:x}", Sha256::digest(&bytes)) == checkpoint.hash)
    }
}
