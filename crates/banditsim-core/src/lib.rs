//! Core types shared by every banditsim crate.
//!
//! A decision is made for a [`Context`] over an ordered set of [`Candidate`]s.
//! Once a reward is known the decision becomes an [`Observation`], which is
//! what the interaction log stores and what the scorer is retrained on.

pub mod record;
pub mod scorer;
pub mod timestamp;

pub use record::InteractionRecord;
pub use scorer::{
    Hyperparameters, LossReport, Metric, Optimizer, Scorer, ScorerError, TrainingExample,
    TrainingSet,
};
pub use timestamp::{iso8601_now, FALLBACK_TIMESTAMP};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

/// Describes one decision instant: user/session features plus categorical
/// attributes (used for filtering and fairness breakdowns).
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct Context {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub features: Vec<f64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, Value>,
}

impl Context {
    pub fn new(features: Vec<f64>) -> Self {
        Self {
            id: None,
            features,
            attributes: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Attribute rendered as a grouping key. Strings are used verbatim, other
    /// JSON values through their compact representation.
    pub fn group_key(&self, column: &str) -> Option<String> {
        self.attributes.get(column).map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }
}

/// An item eligible for selection.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct Candidate {
    pub item: String,
    #[serde(default)]
    pub features: Vec<f64>,
}

impl Candidate {
    pub fn new(item: impl Into<String>, features: Vec<f64>) -> Self {
        Self {
            item: item.into(),
            features,
        }
    }
}

/// Joined feature vector `context ++ candidate` used by linear models.
pub fn joint_features(ctx: &Context, candidate: &Candidate) -> Vec<f64> {
    let mut x = Vec::with_capacity(ctx.features.len() + candidate.features.len());
    x.extend_from_slice(&ctx.features);
    x.extend_from_slice(&candidate.features);
    x
}

#[derive(Debug, Error, PartialEq)]
pub enum ObservationError {
    #[error("propensity must be in (0, 1], got {0}")]
    InvalidPropensity(f64),
    #[error("action {action} outside candidate set of size {len}")]
    ActionOutOfRange { action: usize, len: usize },
    #[error("reward must be finite, got {0}")]
    InvalidReward(f64),
}

/// A recorded interaction. Immutable after construction: the fields are only
/// reachable through accessors, and deserialization goes through
/// [`Observation::new`].
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(try_from = "RawObservation")]
pub struct Observation {
    episode: usize,
    context: Context,
    candidates: Vec<Candidate>,
    action: usize,
    propensity: f64,
    reward: f64,
    #[serde(default)]
    why: String,
}

/// Wire form of [`Observation`] before validation.
#[derive(Deserialize)]
struct RawObservation {
    episode: usize,
    context: Context,
    candidates: Vec<Candidate>,
    action: usize,
    propensity: f64,
    reward: f64,
    #[serde(default)]
    why: String,
}

impl TryFrom<RawObservation> for Observation {
    type Error = ObservationError;

    fn try_from(raw: RawObservation) -> Result<Self, Self::Error> {
        Self::new(
            raw.episode,
            raw.context,
            raw.candidates,
            raw.action,
            raw.propensity,
            raw.reward,
            raw.why,
        )
    }
}

impl Observation {
    pub fn new(
        episode: usize,
        context: Context,
        candidates: Vec<Candidate>,
        action: usize,
        propensity: f64,
        reward: f64,
        why: impl Into<String>,
    ) -> Result<Self, ObservationError> {
        if !(propensity > 0.0 && propensity <= 1.0) {
            return Err(ObservationError::InvalidPropensity(propensity));
        }
        if action >= candidates.len() {
            return Err(ObservationError::ActionOutOfRange {
                action,
                len: candidates.len(),
            });
        }
        if !reward.is_finite() {
            return Err(ObservationError::InvalidReward(reward));
        }
        Ok(Self {
            episode,
            context,
            candidates,
            action,
            propensity,
            reward,
            why: why.into(),
        })
    }

    pub fn episode(&self) -> usize {
        self.episode
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn candidates(&self) -> &[Candidate] {
        &self.candidates
    }

    pub fn action(&self) -> usize {
        self.action
    }

    /// The candidate that was acted on.
    pub fn chosen(&self) -> &Candidate {
        &self.candidates[self.action]
    }

    pub fn propensity(&self) -> f64 {
        self.propensity
    }

    pub fn reward(&self) -> f64 {
        self.reward
    }

    pub fn why(&self) -> &str {
        &self.why
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn candidates() -> Vec<Candidate> {
        vec![
            Candidate::new("a", vec![1.0]),
            Candidate::new("b", vec![0.0]),
        ]
    }

    #[test]
    fn observation_rejects_zero_propensity() {
        let err = Observation::new(0, Context::default(), candidates(), 0, 0.0, 1.0, "")
            .unwrap_err();
        assert_eq!(err, ObservationError::InvalidPropensity(0.0));
    }

    #[test]
    fn observation_rejects_action_outside_candidates() {
        let err = Observation::new(0, Context::default(), candidates(), 2, 0.5, 1.0, "")
            .unwrap_err();
        assert_eq!(err, ObservationError::ActionOutOfRange { action: 2, len: 2 });
    }

    #[test]
    fn observation_exposes_chosen_candidate() {
        let obs = Observation::new(3, Context::default(), candidates(), 1, 1.0, 0.0, "greedy")
            .expect("valid observation");
        assert_eq!(obs.chosen().item, "b");
        assert_eq!(obs.episode(), 3);
        assert_eq!(obs.why(), "greedy");
    }

    #[test]
    fn group_key_renders_strings_and_numbers() {
        let ctx = Context::new(vec![])
            .with_attribute("platform", "ios")
            .with_attribute("cohort", json!(7));
        assert_eq!(ctx.group_key("platform").as_deref(), Some("ios"));
        assert_eq!(ctx.group_key("cohort").as_deref(), Some("7"));
        assert_eq!(ctx.group_key("missing"), None);
    }

    #[test]
    fn deserialization_applies_the_same_checks() {
        let row = |action: usize, propensity: f64| {
            json!({
                "episode": 0,
                "context": {"features": [0.5]},
                "candidates": [{"item": "a", "features": [1.0]}],
                "action": action,
                "propensity": propensity,
                "reward": 1.0,
            })
        };
        let zero = serde_json::from_value::<Observation>(row(0, 0.0)).unwrap_err();
        assert!(zero.to_string().contains("propensity"), "{zero}");
        let outside = serde_json::from_value::<Observation>(row(3, 0.5)).unwrap_err();
        assert!(outside.to_string().contains("outside candidate set"), "{outside}");

        let obs: Observation = serde_json::from_value(row(0, 0.5)).expect("valid row");
        assert_eq!(obs.chosen().item, "a");
        assert_eq!(obs.why(), "");
    }

    #[test]
    fn joint_features_concatenates() {
        let ctx = Context::new(vec![1.0, 2.0]);
        let cand = Candidate::new("x", vec![3.0]);
        assert_eq!(joint_features(&ctx, &cand), vec![1.0, 2.0, 3.0]);
    }
}
