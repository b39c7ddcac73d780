//! Full rankings by repeated sampling without replacement.
//!
//! The first position is drawn from the policy's distribution over every
//! candidate, the second from its distribution over what is left, and so on.
//! Each position records the probability it was drawn with.

use crate::{stats, DecisionInput, Policy, Result};
use banditsim_core::Candidate;
use rand::RngCore;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ranking {
    /// Indices into the original candidate list, best first.
    pub order: Vec<usize>,
    /// Probability each position was drawn with, aligned with `order`.
    pub probabilities: Vec<f64>,
}

impl Ranking {
    pub fn items<'a>(&self, candidates: &'a [Candidate]) -> Vec<&'a str> {
        self.order
            .iter()
            .map(|&i| candidates[i].item.as_str())
            .collect()
    }
}

/// Ranks every candidate in `input`.
///
/// Fails only if the first draw fails. When a later draw is impossible (a
/// fixed policy whose position no longer exists) the remainder follows in
/// descending score order, or original order without scores, with
/// probability `0`.
pub fn rank(
    policy: &dyn Policy,
    input: &DecisionInput<'_>,
    rng: &mut dyn RngCore,
) -> Result<Ranking> {
    let n = input.arms()?;
    let mut remaining: Vec<usize> = (0..n).collect();
    let mut order = Vec::with_capacity(n);
    let mut probabilities = Vec::with_capacity(n);

    while !remaining.is_empty() {
        let cands: Vec<Candidate> = remaining
            .iter()
            .map(|&i| input.candidates[i].clone())
            .collect();
        let scores: Option<Vec<f64>> = input
            .scores
            .map(|s| remaining.iter().map(|&i| s[i]).collect());
        let mut sub = DecisionInput::new(input.context, &cands);
        if let Some(s) = scores.as_deref() {
            sub = sub.with_scores(s);
        }

        let probs = match policy.action_probabilities(&sub) {
            Ok(p) => p,
            Err(e) if order.is_empty() => return Err(e),
            Err(e) => {
                tracing::debug!(policy = policy.name(), error = %e, "ranking remainder by score");
                append_by_score(&mut remaining, input.scores, &mut order, &mut probabilities);
                break;
            }
        };
        let pick = stats::sample_categorical(&probs, rng);
        order.push(remaining.remove(pick));
        probabilities.push(probs[pick]);
    }

    Ok(Ranking {
        order,
        probabilities,
    })
}

fn append_by_score(
    remaining: &mut Vec<usize>,
    scores: Option<&[f64]>,
    order: &mut Vec<usize>,
    probabilities: &mut Vec<f64>,
) {
    if let Some(s) = scores {
        // stable sort keeps original order among equal scores
        remaining.sort_by(|&a, &b| s[b].total_cmp(&s[a]));
    }
    probabilities.extend(std::iter::repeat(0.0).take(remaining.len()));
    order.append(remaining);
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::test_support::{candidates, context};
    use crate::{EpsilonGreedy, FixedPolicy, ModelPolicy, RandomPolicy};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn model_ranking_is_score_order() {
        let ctx = context();
        let cands = candidates(4);
        let scores = [0.2, 0.9, 0.1, 0.5];
        let input = DecisionInput::new(&ctx, &cands).with_scores(&scores);
        let mut rng = StdRng::seed_from_u64(0);
        let ranking = rank(&ModelPolicy, &input, &mut rng).unwrap();
        assert_eq!(ranking.order, vec![1, 3, 0, 2]);
        assert_eq!(ranking.probabilities, vec![1.0; 4]);
        assert_eq!(ranking.items(&cands), vec!["item-1", "item-3", "item-0", "item-2"]);
    }

    #[test]
    fn random_ranking_is_a_permutation() {
        let ctx = context();
        let cands = candidates(5);
        let input = DecisionInput::new(&ctx, &cands);
        let mut rng = StdRng::seed_from_u64(3);
        let ranking = rank(&RandomPolicy, &input, &mut rng).unwrap();
        let mut sorted = ranking.order.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, vec![0, 1, 2, 3, 4]);
        let expected = [0.2, 0.25, 1.0 / 3.0, 0.5, 1.0];
        for (p, e) in ranking.probabilities.iter().zip(expected) {
            assert!((p - e).abs() < 1e-12);
        }
    }

    #[test]
    fn epsilon_greedy_first_position_probability_matches_decision() {
        let policy = EpsilonGreedy::new(0.2).unwrap();
        let ctx = context();
        let cands = candidates(3);
        let scores = [0.0, 1.0, 0.5];
        let input = DecisionInput::new(&ctx, &cands).with_scores(&scores);
        let probs = policy.action_probabilities(&input).unwrap();
        let mut rng = StdRng::seed_from_u64(12);
        let ranking = rank(&policy, &input, &mut rng).unwrap();
        assert!((ranking.probabilities[0] - probs[ranking.order[0]]).abs() < 1e-12);
        assert_eq!(ranking.order.len(), 3);
    }

    #[test]
    fn fixed_policy_falls_back_once_its_position_is_gone() {
        let policy = FixedPolicy { arg: 2 };
        let ctx = context();
        let cands = candidates(4);
        let scores = [0.1, 0.4, 0.3, 0.2];
        let input = DecisionInput::new(&ctx, &cands).with_scores(&scores);
        let mut rng = StdRng::seed_from_u64(1);
        let ranking = rank(&policy, &input, &mut rng).unwrap();
        // positions 2 of [0,1,2,3] then 2 of [0,1,3], then [0,1] by score
        assert_eq!(ranking.order, vec![2, 3, 1, 0]);
        assert_eq!(ranking.probabilities, vec![1.0, 1.0, 0.0, 0.0]);
    }

    #[test]
    fn first_draw_errors_propagate() {
        let ctx = context();
        let cands = candidates(2);
        let input = DecisionInput::new(&ctx, &cands);
        let mut rng = StdRng::seed_from_u64(1);
        assert!(rank(&ModelPolicy, &input, &mut rng).is_err());
    }
}
