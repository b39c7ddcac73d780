//! Boltzmann exploration: candidates are drawn from
//! `softmax(scores * logit_multiplier)`.

use crate::{stats, BanditError, DecisionInput, Policy, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

fn default_multiplier() -> f64 {
    1.0
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SoftmaxExplorer {
    /// Inverse temperature. `0` is uniform, large values approach greedy.
    #[serde(default = "default_multiplier")]
    pub logit_multiplier: f64,
}

impl Default for SoftmaxExplorer {
    fn default() -> Self {
        Self {
            logit_multiplier: default_multiplier(),
        }
    }
}

impl SoftmaxExplorer {
    pub fn new(logit_multiplier: f64) -> Result<Self> {
        let policy = Self { logit_multiplier };
        policy.validate()?;
        Ok(policy)
    }

    fn validate(&self) -> Result<()> {
        if !(self.logit_multiplier.is_finite() && self.logit_multiplier >= 0.0) {
            return Err(BanditError::InvalidConfiguration(format!(
                "logit_multiplier must be finite and >= 0, got {}",
                self.logit_multiplier
            )));
        }
        Ok(())
    }
}

impl Policy for SoftmaxExplorer {
    fn name(&self) -> &'static str {
        "softmax_explorer"
    }

    fn requires_scores(&self) -> bool {
        true
    }

    fn action_probabilities(&self, input: &DecisionInput<'_>) -> Result<Vec<f64>> {
        let scores = input.require_scores(self.name())?;
        Ok(stats::softmax(scores, self.logit_multiplier))
    }

    fn snapshot(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    fn load(&mut self, snapshot: Value) -> Result<()> {
        let restored: Self = serde_json::from_value(snapshot)?;
        restored.validate()?;
        *self = restored;
        Ok(())
    }
}
