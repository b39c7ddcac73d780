//! Pure exploration for a fixed number of rounds, then greedy with a decaying
//! chance of further exploration.
//!
//! While `round < explore_rounds` every candidate is equally likely. Afterwards
//! the policy is greedy, or ε-greedy with `ε = exp(-decay_rate · round)` when a
//! `decay_rate` is given. The round counter advances once per recorded
//! observation.

use crate::model::greedy_index;
use crate::{stats, BanditError, DecisionInput, Policy, Result};
use banditsim_core::Observation;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExploreThenExploitParams {
    pub explore_rounds: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decay_rate: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExploreThenExploit {
    explore_rounds: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    decay_rate: Option<f64>,
    #[serde(default)]
    round: u64,
}

impl ExploreThenExploit {
    pub fn new(params: ExploreThenExploitParams) -> Result<Self> {
        let policy = Self {
            explore_rounds: params.explore_rounds,
            decay_rate: params.decay_rate,
            round: 0,
        };
        policy.validate()?;
        Ok(policy)
    }

    fn validate(&self) -> Result<()> {
        match self.decay_rate {
            Some(rate) if !(rate.is_finite() && rate >= 0.0) => Err(
                BanditError::InvalidConfiguration(format!(
                    "decay_rate must be finite and >= 0, got {rate}"
                )),
            ),
            _ => Ok(()),
        }
    }

    pub fn round(&self) -> u64 {
        self.round
    }

    pub fn is_exploring(&self) -> bool {
        self.round < self.explore_rounds
    }

    /// Exploration probability once the exploration phase is over. Zero
    /// without a `decay_rate`.
    pub fn epsilon(&self) -> f64 {
        let Some(rate) = self.decay_rate else {
            return 0.0;
        };
        #[allow(clippy::cast_precision_loss)]
        let round = self.round as f64;
        (-rate * round).exp()
    }
}

impl Policy for ExploreThenExploit {
    fn name(&self) -> &'static str {
        "explore_then_exploit"
    }

    fn requires_scores(&self) -> bool {
        true
    }

    fn is_stateful(&self) -> bool {
        true
    }

    fn action_probabilities(&self, input: &DecisionInput<'_>) -> Result<Vec<f64>> {
        let n = input.arms()?;
        if self.is_exploring() {
            return Ok(stats::uniform(n));
        }
        let scores = input.require_scores(self.name())?;
        Ok(stats::epsilon_mixture(n, greedy_index(scores)?, self.epsilon()))
    }

    fn update(&mut self, _observation: &Observation) {
        self.round = self.round.saturating_add(1);
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
