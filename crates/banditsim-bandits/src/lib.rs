#![warn(clippy::unwrap_used, clippy::expect_used)]

//! Exploration policies.
//!
//! Every policy implements [`Policy`]: given a context, its candidates and
//! (for score-driven policies) the scorer's output, it exposes the full
//! selection distribution and draws an action from it. The probability of the
//! drawn action is returned as the propensity, so a logged decision can always
//! be replayed against [`Policy::action_probabilities`].
//!
//! | name | stateful | needs scores |
//! |---|---|---|
//! | `random` | no | no |
//! | `fixed` | no | no |
//! | `model` | no | yes |
//! | `epsilon_greedy` | no | yes |
//! | `softmax_explorer` | no | yes |
//! | `lin_ucb` | yes | no |
//! | `custom_lin_ucb` | yes | no |
//! | `explore_then_exploit` | yes | yes |

pub mod arena;
pub mod config;
pub mod epsilon_greedy;
pub mod error;
pub mod explore_then_exploit;
pub mod fixed;
pub mod lin_ucb;
pub mod model;
pub mod random;
pub mod rank;
pub mod softmax;
pub mod stats;

pub use arena::{PolicyArena, SharedPolicy};
pub use config::{PolicyKind, PolicySignature, PolicySpec};
pub use epsilon_greedy::EpsilonGreedy;
pub use error::{BanditError, Result};
pub use explore_then_exploit::ExploreThenExploit;
pub use fixed::FixedPolicy;
pub use lin_ucb::{CustomLinUcb, LinUcb};
pub use model::ModelPolicy;
pub use random::RandomPolicy;
pub use rank::{rank, Ranking};
pub use softmax::SoftmaxExplorer;

use banditsim_core::{Candidate, Context, Observation};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Everything a policy may look at for one decision.
#[derive(Debug, Clone, Copy)]
pub struct DecisionInput<'a> {
    pub context: &'a Context,
    pub candidates: &'a [Candidate],
    pub scores: Option<&'a [f64]>,
}

impl<'a> DecisionInput<'a> {
    pub fn new(context: &'a Context, candidates: &'a [Candidate]) -> Self {
        Self {
            context,
            candidates,
            scores: None,
        }
    }

    #[must_use]
    pub fn with_scores(mut self, scores: &'a [f64]) -> Self {
        self.scores = Some(scores);
        self
    }

    /// Number of candidates, failing on an empty set.
    pub fn arms(&self) -> Result<usize> {
        if self.candidates.is_empty() {
            return Err(BanditError::EmptyCandidateSet);
        }
        Ok(self.candidates.len())
    }

    /// Scorer output for a policy that cannot work without it.
    pub fn require_scores(&self, policy: &'static str) -> Result<&'a [f64]> {
        let n = self.arms()?;
        let scores = self.scores.ok_or(BanditError::MissingScores(policy))?;
        if scores.len() != n {
            return Err(BanditError::ScoreLengthMismatch {
                scores: scores.len(),
                candidates: n,
            });
        }
        Ok(scores)
    }
}

/// Outcome of a single action selection.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Decision {
    pub action: usize,
    pub item: String,
    pub propensity: f64,
    pub why: String,
}

impl Decision {
    fn pick(input: &DecisionInput<'_>, action: usize, propensity: f64, why: &str) -> Self {
        Self {
            action,
            item: input.candidates[action].item.clone(),
            propensity,
            why: why.to_string(),
        }
    }
}

pub trait Policy: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &'static str;

    /// Whether the scorer must be queried before [`Policy::choose_action`].
    fn requires_scores(&self) -> bool;

    /// Whether [`Policy::update`] changes future decisions.
    fn is_stateful(&self) -> bool {
        false
    }

    /// Selection distribution over `input.candidates` for the current state.
    fn action_probabilities(&self, input: &DecisionInput<'_>) -> Result<Vec<f64>>;

    /// Draws an action. The default samples from
    /// [`Policy::action_probabilities`].
    fn choose_action(&self, input: &DecisionInput<'_>, rng: &mut dyn RngCore) -> Result<Decision> {
        let probs = self.action_probabilities(input)?;
        let action = stats::sample_categorical(&probs, rng);
        Ok(Decision::pick(input, action, probs[action], self.name()))
    }

    /// Feeds back a recorded observation.
    fn update(&mut self, _observation: &Observation) {}

    fn snapshot(&self) -> Value;

    fn load(&mut self, snapshot: Value) -> Result<()>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
pub(crate) mod test_support {
    use banditsim_core::{Candidate, Context};

    pub fn candidates(n: usize) -> Vec<Candidate> {
        (0..n)
            .map(|i| Candidate::new(format!("item-{i}"), vec![1.0]))
            .collect()
    }

    pub fn context() -> Context {
        Context::new(vec![0.5, -0.5])
    }

    /// Pearson chi-square statistic of `counts` against a uniform expectation.
    pub fn chi_square_uniform(counts: &[usize]) -> f64 {
        let total: usize = counts.iter().sum();
        #[allow(clippy::cast_precision_loss)]
        let expected = total as f64 / counts.len() as f64;
        counts
            .iter()
            .map(|&c| {
                #[allow(clippy::cast_precision_loss)]
                let d = c as f64 - expected;
                d * d / expected
            })
            .sum()
    }
}
