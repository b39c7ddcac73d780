//! Linear upper-confidence-bound policies.
//!
//! Each decision scores candidate `a` with the joint feature vector
//! `x = context ++ candidate` as
//!
//! ```text
//!   θ   = A⁻¹ b
//!   ucb = θᵀx + alpha · sqrt(xᵀ A⁻¹ x)
//! ```
//!
//! where `A = lambda·I + Σ x xᵀ` and `b = Σ r x` are ridge-regression
//! statistics. `A⁻¹` is maintained directly with Sherman–Morrison updates, so a
//! decision never inverts a matrix.
//!
//! [`LinUcb`] keeps one `(A⁻¹, b)` per item. [`CustomLinUcb`] pools a single
//! pair across all items: every observation sharpens every item's estimate,
//! which converges faster when per-item data is sparse at the cost of a
//! coarser model.
//!
//! The argmax is deterministic given the state except for exact ties, which
//! are broken uniformly; the propensity is `1 / #ties`.

use crate::{stats, BanditError, DecisionInput, Policy, Result};
use banditsim_core::{joint_features, Observation};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

const POOLED_KEY: &str = "*";

fn default_lambda() -> f64 {
    1.0
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LinUcbParams {
    /// Exploration strength, `>= 0`. `0` is greedy on the ridge estimate.
    pub alpha: f64,
    /// Ridge regularization, `> 0`.
    #[serde(default = "default_lambda")]
    pub lambda: f64,
}

impl LinUcbParams {
    pub fn validate(&self) -> Result<()> {
        if !(self.alpha.is_finite() && self.alpha >= 0.0) {
            return Err(BanditError::InvalidConfiguration(format!(
                "alpha must be finite and >= 0, got {}",
                self.alpha
            )));
        }
        if !(self.lambda.is_finite() && self.lambda > 0.0) {
            return Err(BanditError::InvalidConfiguration(format!(
                "lambda must be finite and > 0, got {}",
                self.lambda
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct RidgeState {
    a_inv: Vec<f64>,
    b: Vec<f64>,
    uses: u64,
}

impl RidgeState {
    fn new(dim: usize, lambda: f64) -> Self {
        Self {
            a_inv: stats::scaled_identity(dim, 1.0 / lambda),
            b: vec![0.0; dim],
            uses: 0,
        }
    }

    fn ucb(&self, dim: usize, x: &[f64], alpha: f64) -> f64 {
        let theta = stats::mat_vec(&self.a_inv, dim, &self.b);
        let mean = stats::dot(&theta, x);
        let var = stats::dot(x, &stats::mat_vec(&self.a_inv, dim, x)).max(0.0);
        mean + alpha * var.sqrt()
    }

    fn update(&mut self, dim: usize, x: &[f64], reward: f64) {
        stats::sherman_morrison_update(&mut self.a_inv, dim, x);
        for (bi, xi) in self.b.iter_mut().zip(x.iter()) {
            *bi += reward * xi;
        }
        self.uses = self.uses.saturating_add(1);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct RidgeUcb {
    params: LinUcbParams,
    pooled: bool,
    dim: Option<usize>,
    states: BTreeMap<String, RidgeState>,
}

impl RidgeUcb {
    fn new(params: LinUcbParams, pooled: bool) -> Result<Self> {
        params.validate()?;
        Ok(Self {
            params,
            pooled,
            dim: None,
            states: BTreeMap::new(),
        })
    }

    fn key<'a>(&self, item: &'a str) -> &'a str {
        if self.pooled {
            POOLED_KEY
        } else {
            item
        }
    }

    fn check_dim(&self, actual: usize) -> Result<()> {
        match self.dim {
            Some(expected) if expected != actual => {
                Err(BanditError::DimensionMismatch { expected, actual })
            }
            _ => Ok(()),
        }
    }

    /// Upper-confidence score per candidate.
    fn ucb_scores(&self, input: &DecisionInput<'_>) -> Result<Vec<f64>> {
        input.arms()?;
        let mut out = Vec::with_capacity(input.candidates.len());
        for cand in input.candidates {
            let x = joint_features(input.context, cand);
            self.check_dim(x.len())?;
            let score = match self.states.get(self.key(&cand.item)) {
                Some(st) => st.ucb(x.len(), &x, self.params.alpha),
                // Untouched state: θ = 0 and A⁻¹ = I / lambda.
                None => self.params.alpha * (stats::dot(&x, &x) / self.params.lambda).sqrt(),
            };
            out.push(score);
        }
        Ok(out)
    }

    fn probabilities(&self, input: &DecisionInput<'_>) -> Result<Vec<f64>> {
        let scores = self.ucb_scores(input)?;
        Ok(stats::uniform_over(scores.len(), &stats::ties_at_max(&scores)))
    }

    fn update(&mut self, observation: &Observation) {
        let x = joint_features(observation.context(), observation.chosen());
        if let Err(err) = self.check_dim(x.len()) {
            tracing::warn!(%err, "skipping LinUCB update");
            return;
        }
        let dim = x.len();
        self.dim = Some(dim);
        let key = self.key(&observation.chosen().item).to_string();
        let lambda = self.params.lambda;
        self.states
            .entry(key)
            .or_insert_with(|| RidgeState::new(dim, lambda))
            .update(dim, &x, observation.reward());
    }

    fn load(&mut self, snapshot: Value) -> Result<()> {
        let restored: Self = serde_json::from_value(snapshot)?;
        restored.params.validate()?;
        if restored.pooled != self.pooled {
            return Err(BanditError::InvalidConfiguration(
                "snapshot pooling does not match policy".into(),
            ));
        }
        match restored.dim {
            Some(dim) => {
                for st in restored.states.values() {
                    if st.a_inv.len() != dim * dim || st.b.len() != dim {
                        return Err(BanditError::DimensionMismatch {
                            expected: dim,
                            actual: st.b.len(),
                        });
                    }
                }
            }
            None if !restored.states.is_empty() => {
                return Err(BanditError::InvalidConfiguration(
                    "snapshot has ridge states but no feature dimension".into(),
                ));
            }
            None => {}
        }
        *self = restored;
        Ok(())
    }
}

/// LinUCB with per-item ridge statistics.
#[derive(Debug, Clone)]
pub struct LinUcb(RidgeUcb);

impl LinUcb {
    pub fn new(params: LinUcbParams) -> Result<Self> {
        RidgeUcb::new(params, false).map(Self)
    }

    pub fn ucb_scores(&self, input: &DecisionInput<'_>) -> Result<Vec<f64>> {
        self.0.ucb_scores(input)
    }

    /// Number of updates applied to `item`.
    pub fn uses(&self, item: &str) -> u64 {
        self.0.states.get(item).map_or(0, |s| s.uses)
    }
}

/// LinUCB with one ridge state pooled over all items.
#[derive(Debug, Clone)]
pub struct CustomLinUcb(RidgeUcb);

impl CustomLinUcb {
    pub fn new(params: LinUcbParams) -> Result<Self> {
        RidgeUcb::new(params, true).map(Self)
    }

    pub fn ucb_scores(&self, input: &DecisionInput<'_>) -> Result<Vec<f64>> {
        self.0.ucb_scores(input)
    }

    /// Number of updates applied to the pooled state.
    pub fn uses(&self) -> u64 {
        self.0.states.get(POOLED_KEY).map_or(0, |s| s.uses)
    }
}

macro_rules! ridge_policy {
    ($ty:ty, $name:literal) => {
        impl Policy for $ty {
            fn name(&self) -> &'static str {
                $name
            }

            fn requires_scores(&self) -> bool {
                false
            }

            fn is_stateful(&self) -> bool {
                true
            }

            fn action_probabilities(&self, input: &DecisionInput<'_>) -> Result<Vec<f64>> {
                self.0.probabilities(input)
            }

            fn update(&mut self, observation: &Observation) {
                self.0.update(observation);
            }

            fn snapshot(&self) -> Value {
                serde_json::to_value(&self.0).unwrap_or(Value::Null)
            }

            fn load(&mut self, snapshot: Value) -> Result<()> {
                self.0.load(snapshot)
            }
        }
    };
}

ridge_policy!(LinUcb, "lin_ucb");
ridge_policy!(CustomLinUcb, "custom_lin_ucb");
