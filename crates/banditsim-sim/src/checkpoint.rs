//! Scorer snapshots tagged with the policy configuration that produced them.

use crate::Result;
use banditsim_bandits::PolicySignature;
use banditsim_core::iso8601_now;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::File;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub signature: PolicySignature,
    /// Episode after whose retrain the snapshot was taken. `None` for the
    /// state before the first episode.
    pub episode: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub val_loss: Option<f64>,
    pub log_len: usize,
    pub created_at: String,
    pub scorer: Value,
    pub policy: Value,
}

impl Checkpoint {
    pub fn capture(
        signature: PolicySignature,
        episode: Option<usize>,
        val_loss: Option<f64>,
        log_len: usize,
        scorer: Value,
        policy: Value,
    ) -> Self {
        Self {
            signature,
            episode,
            val_loss,
            log_len,
            created_at: iso8601_now(),
            scorer,
            policy,
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = File::create(path)?;
        serde_json::to_writer_pretty(file, self)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        Ok(serde_json::from_reader(file)?)
    }
}
