//! Contract for the scoring model.
//!
//! The harness treats the scorer as opaque: it can predict one score per
//! candidate, run a training epoch, report a validation loss and round-trip
//! its weights through JSON. Early stopping, deadlines and checkpointing are
//! driven from outside through these primitives.

use crate::{Candidate, Context};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScorerError {
    #[error("training diverged: {0}")]
    Divergence(String),
    #[error("training exceeded its deadline after {epochs} epochs")]
    Timeout { epochs: usize },
    #[error("feature dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("invalid hyperparameters: {0}")]
    InvalidHyperparameters(String),
    #[error("snapshot could not be loaded: {0}")]
    Snapshot(#[from] serde_json::Error),
}

/// Gradient update rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Optimizer {
    Sgd,
    #[default]
    Adam,
    Adagrad,
}

impl std::str::FromStr for Optimizer {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sgd" => Ok(Self::Sgd),
            "adam" => Ok(Self::Adam),
            "adagrad" => Ok(Self::Adagrad),
            other => Err(format!("unknown optimizer '{other}' (expected sgd, adam or adagrad)")),
        }
    }
}

/// Metrics recorded per training epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    Loss,
    Accuracy,
}

impl std::str::FromStr for Metric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "loss" => Ok(Self::Loss),
            "accuracy" | "acc" => Ok(Self::Accuracy),
            other => Err(format!("unknown metric '{other}' (expected loss or accuracy)")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Hyperparameters {
    pub n_factors: usize,
    pub learning_rate: f64,
    pub optimizer: Optimizer,
    pub epochs: usize,
    pub batch_size: usize,
    pub metrics: Vec<Metric>,
}

impl Default for Hyperparameters {
    fn default() -> Self {
        Self {
            n_factors: 10,
            learning_rate: 1e-3,
            optimizer: Optimizer::Adam,
            epochs: 100,
            batch_size: 500,
            metrics: vec![Metric::Loss],
        }
    }
}

impl Hyperparameters {
    pub fn validate(&self) -> Result<(), ScorerError> {
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(ScorerError::InvalidHyperparameters(format!(
                "learning_rate must be finite and > 0, got {}",
                self.learning_rate
            )));
        }
        if self.epochs == 0 {
            return Err(ScorerError::InvalidHyperparameters(
                "epochs must be >= 1".into(),
            ));
        }
        if self.batch_size == 0 {
            return Err(ScorerError::InvalidHyperparameters(
                "batch_size must be >= 1".into(),
            ));
        }
        Ok(())
    }
}

/// A labelled (context, candidate) pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrainingExample {
    pub context: Context,
    pub candidate: Candidate,
    pub label: f64,
}

pub type TrainingSet = Vec<TrainingExample>;

/// Loss and optional accuracy over a data set.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct LossReport {
    pub loss: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
}

pub trait Scorer: Send + Sync {
    /// One score per candidate, in candidate order.
    fn predict(&self, ctx: &Context, candidates: &[Candidate]) -> Vec<f64>;

    /// Runs one pass over `train` and returns the training loss.
    fn train_epoch(
        &mut self,
        train: &[TrainingExample],
        hp: &Hyperparameters,
        epoch: usize,
    ) -> Result<f64, ScorerError>;

    /// Loss over `data` without touching the weights.
    fn evaluate(&self, data: &[TrainingExample], metrics: &[Metric]) -> LossReport;

    /// Discards all learned state and starts over from `seed`.
    fn reinitialize(&mut self, seed: u64);

    fn snapshot(&self) -> Value;

    fn load(&mut self, snapshot: Value) -> Result<(), ScorerError>;

    /// Plain fit: `hp.epochs` passes, no validation.
    fn fit(&mut self, train: &[TrainingExample], hp: &Hyperparameters) -> Result<f64, ScorerError> {
        hp.validate()?;
        let mut loss = f64::NAN;
        for epoch in 0..hp.epochs {
            loss = self.train_epoch(train, hp, epoch)?;
            if !loss.is_finite() {
                return Err(ScorerError::Divergence(format!(
                    "non-finite training loss at epoch {epoch}"
                )));
            }
        }
        Ok(loss)
    }
}
