//! Uniform random selection.

use crate::{stats, DecisionInput, Policy, Result};
use serde_json::{json, Value};

#[derive(Debug, Default, Clone)]
pub struct RandomPolicy;

impl Policy for RandomPolicy {
    fn name(&self) -> &'static str {
        "random"
    }

    fn requires_scores(&self) -> bool {
        false
    }

    fn action_probabilities(&self, input: &DecisionInput<'_>) -> Result<Vec<f64>> {
        Ok(stats::uniform(input.arms()?))
    }

    fn snapshot(&self) -> Value {
        json!({})
    }

    fn load(&mut self, _snapshot: Value) -> Result<()> {
        Ok(())
    }
}
