use banditsim_core::{
    Candidate, Context, Hyperparameters, LossReport, Metric, Scorer, ScorerError, TrainingExample,
};
use serde_json::Value;

/// Scores every candidate by its first feature and never learns.
#[derive(Debug, Clone, Copy, Default)]
pub struct FirstFeatureScorer;

impl Scorer for FirstFeatureScorer {
    fn predict(&self, _ctx: &Context, candidates: &[Candidate]) -> Vec<f64> {
        candidates
            .iter()
            .map(|c| c.features.first().copied().unwrap_or(0.0))
            .collect()
    }

    fn train_epoch(
        &mut self,
        _train: &[TrainingExample],
        _hp: &Hyperparameters,
        _epoch: usize,
    ) -> Result<f64, ScorerError> {
        Ok(0.0)
    }

    fn evaluate(&self, _data: &[TrainingExample], _metrics: &[Metric]) -> LossReport {
        LossReport {
            loss: 0.0,
            accuracy: None,
        }
    }

    fn reinitialize(&mut self, _seed: u64) {}

    fn snapshot(&self) -> Value {
        Value::Null
    }

    fn load(&mut self, _snapshot: Value) -> Result<(), ScorerError> {
        Ok(())
    }
}
