//! Rows of the prepared interaction splits.
//!
//! An [`InteractionRecord`] is what the data-preparation stage hands over for
//! every decision instant: the context, the candidates that were available and
//! the ground truth needed to assign a reward to whichever candidate a policy
//! picks. Records are read from JSON lines, one record per line.

use crate::{Candidate, Context};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One decision instant with its ground truth.
///
/// Ground truth comes in one of two shapes:
/// - `clicked`: the item the user actually interacted with. Choosing it yields
///   reward `1.0`, any other candidate `0.0`.
/// - `rewards`: an explicit reward per item id. Items missing from the map
///   have no known reward.
///
/// When both are present `rewards` wins.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct InteractionRecord {
    pub context: Context,
    pub candidates: Vec<Candidate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clicked: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rewards: Option<BTreeMap<String, f64>>,
}

impl InteractionRecord {
    /// Reward for choosing `item`, or `None` if the record cannot tell.
    pub fn reward_for(&self, item: &str) -> Option<f64> {
        if let Some(rewards) = &self.rewards {
            return rewards.get(item).copied().filter(|r| r.is_finite());
        }
        self.clicked
            .as_deref()
            .map(|clicked| if clicked == item { 1.0 } else { 0.0 })
    }

    /// Position of the clicked item in the candidate set, if any.
    pub fn clicked_index(&self) -> Option<usize> {
        let clicked = self.clicked.as_deref()?;
        self.candidates.iter().position(|c| c.item == clicked)
    }

    /// Per-candidate reward (0 when unknown), used as graded relevance.
    pub fn relevance(&self) -> Vec<f64> {
        self.candidates
            .iter()
            .map(|c| self.reward_for(&c.item).unwrap_or(0.0))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn clicked_record_rewards_only_the_clicked_item() {
        let rec: InteractionRecord = serde_json::from_value(json!({
            "context": {"features": [0.5], "attributes": {"platform": "web"}},
            "candidates": [{"item": "a", "features": [1.0]}, {"item": "b"}],
            "clicked": "b"
        }))
        .expect("record should deserialize");

        assert_eq!(rec.reward_for("b"), Some(1.0));
        assert_eq!(rec.reward_for("a"), Some(0.0));
        assert_eq!(rec.clicked_index(), Some(1));
        assert!(rec.candidates[1].features.is_empty());
    }

    #[test]
    fn explicit_rewards_take_precedence() {
        let mut rewards = BTreeMap::new();
        rewards.insert("a".to_string(), 0.25);
        let rec = InteractionRecord {
            context: Context::default(),
            candidates: vec![Candidate::new("a", vec![]), Candidate::new("b", vec![])],
            clicked: Some("b".into()),
            rewards: Some(rewards),
        };
        assert_eq!(rec.reward_for("a"), Some(0.25));
        assert_eq!(rec.reward_for("b"), None);
        assert_eq!(rec.relevance(), vec![0.25, 0.0]);
    }

    #[test]
    fn record_without_ground_truth_has_no_reward() {
        let rec = InteractionRecord {
            context: Context::default(),
            candidates: vec![Candidate::new("a", vec![])],
            clicked: None,
            rewards: None,
        };
        assert_eq!(rec.reward_for("a"), None);
        assert_eq!(rec.clicked_index(), None);
    }
}
