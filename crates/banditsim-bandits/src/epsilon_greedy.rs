//! ε-greedy over the scorer's output.
//!
//! With probability `epsilon` a candidate is drawn uniformly, otherwise the
//! scorer argmax is taken. The propensity adds both paths: the argmax is
//! reachable by exploiting and by exploring onto it, so its probability is
//! `epsilon / n + (1 - epsilon)`; every other candidate has `epsilon / n`.

use crate::model::greedy_index;
use crate::{stats, BanditError, Decision, DecisionInput, Policy, Result};
use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EpsilonGreedy {
    /// Exploration probability in `[0, 1]`.
    pub epsilon: f64,
}

impl EpsilonGreedy {
    pub fn new(epsilon: f64) -> Result<Self> {
        let policy = Self { epsilon };
        policy.validate()?;
        Ok(policy)
    }

    fn validate(&self) -> Result<()> {
        if !(self.epsilon.is_finite() && (0.0..=1.0).contains(&self.epsilon)) {
            return Err(BanditError::InvalidConfiguration(format!(
                "epsilon must be in [0, 1], got {}",
                self.epsilon
            )));
        }
        Ok(())
    }
}

impl Policy for EpsilonGreedy {
    fn name(&self) -> &'static str {
        "epsilon_greedy"
    }

    fn requires_scores(&self) -> bool {
        true
    }

    fn action_probabilities(&self, input: &DecisionInput<'_>) -> Result<Vec<f64>> {
        let scores = input.require_scores(self.name())?;
        Ok(stats::epsilon_mixture(
            scores.len(),
            greedy_index(scores)?,
            self.epsilon,
        ))
    }

    fn choose_action(&self, input: &DecisionInput<'_>, rng: &mut dyn RngCore) -> Result<Decision> {
        let probs = self.action_probabilities(input)?;
        let explore = rng.gen::<f64>() < self.epsilon;
        let (action, why) = if explore {
            (rng.gen_range(0..probs.len()), "explore ε")
        } else {
            (greedy_index(input.require_scores(self.name())?)?, "exploit")
        };
        Ok(Decision::pick(input, action, probs[action], why))
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
