//! Off-policy value estimates from the interaction log.
//!
//! The target policy is greedy on the scorer: it always plays the
//! highest-scoring candidate. Each logged observation is weighted by
//! `π(a|x) / p`, which is `1 / p` when the logged action is the greedy one and
//! `0` otherwise.

use banditsim_bandits::stats::argmax;
use banditsim_core::{Observation, Scorer};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OffPolicyEstimate {
    pub observations: usize,
    /// Logged actions that the greedy policy would also have played.
    pub matched: usize,
    pub average_logged_reward: f64,
    /// Inverse propensity scoring.
    pub ips: f64,
    /// Self-normalized IPS. `None` when no logged action matches.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snips: Option<f64>,
}

pub fn estimate<S: Scorer + ?Sized>(scorer: &S, log: &[Observation]) -> OffPolicyEstimate {
    if log.is_empty() {
        return OffPolicyEstimate::default();
    }
    let weights: Vec<f64> = log
        .par_iter()
        .map(|obs| {
            let scores = scorer.predict(obs.context(), obs.candidates());
            if argmax(&scores) == Some(obs.action()) {
                1.0 / obs.propensity()
            } else {
                0.0
            }
        })
        .collect();

    let mut reward_sum = 0.0;
    let mut weighted_sum = 0.0;
    let mut weight_sum = 0.0;
    let mut matched = 0;
    for (obs, w) in log.iter().zip(&weights) {
        reward_sum += obs.reward();
        weighted_sum += w * obs.reward();
        weight_sum += w;
        if *w > 0.0 {
            matched += 1;
        }
    }
    #[allow(clippy::cast_precision_loss)]
    let n = log.len() as f64;
    OffPolicyEstimate {
        observations: log.len(),
        matched,
        average_logged_reward: reward_sum / n,
        ips: weighted_sum / n,
        snips: (weight_sum > 0.0).then(|| weighted_sum / weight_sum),
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::testing::FirstFeatureScorer;
    use banditsim_core::{Candidate, Context};

    fn obs(action: usize, propensity: f64, reward: f64) -> Observation {
        Observation::new(
            0,
            Context::new(vec![]),
            vec![Candidate::new("lo", vec![0.1]), Candidate::new("hi", vec![0.9])],
            action,
            propensity,
            reward,
            "test",
        )
        .unwrap()
    }

    #[test]
    fn greedy_matches_are_reweighted() {
        // greedy plays "hi" (index 1)
        let log = vec![obs(1, 0.5, 1.0), obs(0, 0.5, 1.0), obs(1, 0.5, 0.0), obs(0, 0.5, 0.0)];
        let est = estimate(&FirstFeatureScorer, &log);
        assert_eq!(est.observations, 4);
        assert_eq!(est.matched, 2);
        assert!((est.average_logged_reward - 0.5).abs() < 1e-12);
        // (2·1 + 2·0) / 4
        assert!((est.ips - 0.5).abs() < 1e-12);
        // 2 / (2 + 2)
        assert!((est.snips.unwrap() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn no_match_leaves_snips_undefined() {
        let est = estimate(&FirstFeatureScorer, &[obs(0, 0.9, 1.0)]);
        assert_eq!(est.matched, 0);
        assert!(est.ips.abs() < f64::EPSILON);
        assert!(est.snips.is_none());
    }

    #[test]
    fn empty_log() {
        assert_eq!(estimate(&FirstFeatureScorer, &[]), OffPolicyEstimate::default());
    }
}
