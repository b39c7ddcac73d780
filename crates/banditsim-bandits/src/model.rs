//! Greedy on the scorer's output.
//!
//! The propensity is reported as `1.0`. That is the true selection
//! probability given the scores, but a greedy log carries no exploration and
//! is unsuitable for unbiased off-policy estimates of other policies.

use crate::{stats, BanditError, Decision, DecisionInput, Policy, Result};
use rand::RngCore;
use serde_json::{json, Value};

#[derive(Debug, Default, Clone)]
pub struct ModelPolicy;

pub(crate) fn greedy_index(scores: &[f64]) -> Result<usize> {
    stats::argmax(scores).ok_or(BanditError::EmptyCandidateSet)
}

impl Policy for ModelPolicy {
    fn name(&self) -> &'static str {
        "model"
    }

    fn requires_scores(&self) -> bool {
        true
    }

    fn action_probabilities(&self, input: &DecisionInput<'_>) -> Result<Vec<f64>> {
        let scores = input.require_scores(self.name())?;
        let mut probs = vec![0.0; scores.len()];
        probs[greedy_index(scores)?] = 1.0;
        Ok(probs)
    }

    fn choose_action(&self, input: &DecisionInput<'_>, _rng: &mut dyn RngCore) -> Result<Decision> {
        let scores = input.require_scores(self.name())?;
        Ok(Decision::pick(input, greedy_index(scores)?, 1.0, "greedy"))
    }

    fn snapshot(&self) -> Value {
        json!({})
    }

    fn load(&mut self, _snapshot: Value) -> Result<()> {
        Ok(())
    }
}
