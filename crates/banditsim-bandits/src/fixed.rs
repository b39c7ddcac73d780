//! Always the candidate at a fixed position.

use crate::{BanditError, Decision, DecisionInput, Policy, Result};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FixedPolicy {
    pub arg: usize,
}

impl FixedPolicy {
    pub fn new(arg: usize) -> Self {
        Self { arg }
    }

    fn index(&self, input: &DecisionInput<'_>) -> Result<usize> {
        let len = input.arms()?;
        if self.arg >= len {
            return Err(BanditError::ActionOutOfRange { arg: self.arg, len });
        }
        Ok(self.arg)
    }
}

impl Policy for FixedPolicy {
    fn name(&self) -> &'static str {
        "fixed"
    }

    fn requires_scores(&self) -> bool {
        false
    }

    fn action_probabilities(&self, input: &DecisionInput<'_>) -> Result<Vec<f64>> {
        let idx = self.index(input)?;
        let mut probs = vec![0.0; input.candidates.len()];
        probs[idx] = 1.0;
        Ok(probs)
    }

    fn choose_action(&self, input: &DecisionInput<'_>, _rng: &mut dyn RngCore) -> Result<Decision> {
        let idx = self.index(input)?;
        Ok(Decision::pick(input, idx, 1.0, "fixed"))
    }

    fn snapshot(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    fn load(&mut self, snapshot: Value) -> Result<()> {
        *self = serde_json::from_value(snapshot)?;
        Ok(())
    }
}
