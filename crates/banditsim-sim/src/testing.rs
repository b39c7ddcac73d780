//! Scripted scorer for exercising the training loop without real learning.

use banditsim_core::{
    Candidate, Context, Hyperparameters, LossReport, Metric, Scorer, ScorerError, TrainingExample,
};
use serde_json::{json, Value};

/// Scores a candidate by its first feature. Every training epoch bumps a
/// counter that doubles as the "weights"; validation losses are read from a
/// script indexed by that counter.
#[derive(Debug, Clone, Default)]
pub struct ScriptedScorer {
    epochs_trained: usize,
    val_losses: Vec<f64>,
    diverge_at: Option<usize>,
    /// Training-set size seen by every `train_epoch` call.
    pub fit_sizes: Vec<usize>,
    pub reinitialized: usize,
}

impl ScriptedScorer {
    pub fn with_val_losses(val_losses: Vec<f64>) -> Self {
        Self {
            val_losses,
            ..Self::default()
        }
    }

    pub fn diverging_at(epoch: usize) -> Self {
        Self {
            diverge_at: Some(epoch),
            ..Self::default()
        }
    }

    pub fn epochs_trained(&self) -> usize {
        self.epochs_trained
    }
}

impl Scorer for ScriptedScorer {
    fn predict(&self, _ctx: &Context, candidates: &[Candidate]) -> Vec<f64> {
        candidates
            .iter()
            .map(|c| c.features.first().copied().unwrap_or(0.0))
            .collect()
    }

    fn train_epoch(
        &mut self,
        train: &[TrainingExample],
        _hp: &Hyperparameters,
        epoch: usize,
    ) -> Result<f64, ScorerError> {
        self.fit_sizes.push(train.len());
        if self.diverge_at == Some(epoch) {
            return Ok(f64::NAN);
        }
        self.epochs_trained += 1;
        Ok(0.5)
    }

    fn evaluate(&self, _data: &[TrainingExample], _metrics: &[Metric]) -> LossReport {
        let loss = self
            .epochs_trained
            .checked_sub(1)
            .and_then(|i| self.val_losses.get(i).copied())
            .unwrap_or(0.5);
        LossReport {
            loss,
            accuracy: None,
        }
    }

    fn reinitialize(&mut self, _seed: u64) {
        self.epochs_trained = 0;
        self.reinitialized += 1;
    }

    fn snapshot(&self) -> Value {
        json!({ "epochs_trained": self.epochs_trained })
    }

    fn load(&mut self, snapshot: Value) -> Result<(), ScorerError> {
        #[derive(serde::Deserialize)]
        struct Snap {
            epochs_trained: usize,
        }
        let snap: Snap = serde_json::from_value(snapshot)?;
        self.epochs_trained = snap.epochs_trained;
        Ok(())
    }
}
