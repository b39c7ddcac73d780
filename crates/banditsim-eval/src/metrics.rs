//! Ranking metrics over graded relevance.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Candidate indices by descending score. Equal scores keep their input order.
pub fn order_by_score(scores: &[f64]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| match scores[b].total_cmp(&scores[a]) {
        Ordering::Equal => a.cmp(&b),
        other => other,
    });
    order
}

/// Discounted cumulative gain of the first `k` positions, gain `2^rel - 1`.
fn dcg(relevance: impl Iterator<Item = f64>, k: usize) -> f64 {
    relevance
        .take(k)
        .enumerate()
        .map(|(i, rel)| {
            #[allow(clippy::cast_precision_loss)]
            let discount = ((i + 2) as f64).log2();
            (rel.exp2() - 1.0) / discount
        })
        .sum()
}

/// nDCG@k of ranking `order` against `relevance`. `0` when nothing is relevant.
pub fn ndcg_at(order: &[usize], relevance: &[f64], k: usize) -> f64 {
    let mut ideal = relevance.to_vec();
    ideal.sort_by(|a, b| b.total_cmp(a));
    let idcg = dcg(ideal.into_iter(), k);
    if idcg <= 0.0 {
        return 0.0;
    }
    dcg(order.iter().map(|&i| relevance[i]), k) / idcg
}

/// 1-based position of the first relevant candidate in `order`.
pub fn first_relevant_rank(order: &[usize], relevance: &[f64]) -> Option<usize> {
    order.iter().position(|&i| relevance[i] > 0.0).map(|p| p + 1)
}

/// Metrics of a single ranked test record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecordMetrics {
    pub hit_at_1: bool,
    pub reciprocal_rank: f64,
    pub ndcg_at_5: f64,
    pub ndcg_at_10: f64,
    pub mean_score: f64,
}

impl RecordMetrics {
    /// `None` when no candidate is relevant or the lengths disagree.
    pub fn compute(scores: &[f64], relevance: &[f64]) -> Option<Self> {
        if scores.is_empty() || scores.len() != relevance.len() {
            return None;
        }
        let order = order_by_score(scores);
        let rank = first_relevant_rank(&order, relevance)?;
        #[allow(clippy::cast_precision_loss)]
        let mean_score = scores.iter().sum::<f64>() / scores.len() as f64;
        #[allow(clippy::cast_precision_loss)]
        let reciprocal_rank = 1.0 / rank as f64;
        Some(Self {
            hit_at_1: rank == 1,
            reciprocal_rank,
            ndcg_at_5: ndcg_at(&order, relevance, 5),
            ndcg_at_10: ndcg_at(&order, relevance, 10),
            mean_score,
        })
    }
}

/// Running sums over ranked test records.
#[derive(Debug, Default, Clone)]
pub struct RankingStatistics {
    pub total: usize,
    pub hits_at_1: usize,
    pub reciprocal_rank_sum: f64,
    pub ndcg_at_5_sum: f64,
    pub ndcg_at_10_sum: f64,
    pub score_sum: f64,
}

impl RankingStatistics {
    pub fn record(&mut self, m: &RecordMetrics) {
        self.total += 1;
        if m.hit_at_1 {
            self.hits_at_1 += 1;
        }
        self.reciprocal_rank_sum += m.reciprocal_rank;
        self.ndcg_at_5_sum += m.ndcg_at_5;
        self.ndcg_at_10_sum += m.ndcg_at_10;
        self.score_sum += m.mean_score;
    }

    fn mean(&self, sum: f64) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        {
            sum / self.total as f64
        }
    }

    #[must_use]
    pub fn hit_rate_at_1(&self) -> f64 {
        #[allow(clippy::cast_precision_loss)]
        let hits = self.hits_at_1 as f64;
        self.mean(hits)
    }

    #[must_use]
    pub fn mrr(&self) -> f64 {
        self.mean(self.reciprocal_rank_sum)
    }

    #[must_use]
    pub fn ndcg_at_5(&self) -> f64 {
        self.mean(self.ndcg_at_5_sum)
    }

    #[must_use]
    pub fn ndcg_at_10(&self) -> f64 {
        self.mean(self.ndcg_at_10_sum)
    }

    #[must_use]
    pub fn mean_score(&self) -> f64 {
        self.mean(self.score_sum)
    }

    pub fn summary(&self) -> MetricSummary {
        MetricSummary {
            records: self.total,
            hit_rate_at_1: self.hit_rate_at_1(),
            mrr: self.mrr(),
            ndcg_at_5: self.ndcg_at_5(),
            ndcg_at_10: self.ndcg_at_10(),
            mean_score: self.mean_score(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricSummary {
    pub records: usize,
    pub hit_rate_at_1: f64,
    pub mrr: f64,
    pub ndcg_at_5: f64,
    pub ndcg_at_10: f64,
    pub mean_score: f64,
}

#[cfg(test)]
#[allow(clippy::expect_used)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn order_is_stable_on_ties() {
        assert_eq!(order_by_score(&[0.5, 0.9, 0.5, 0.1]), vec![1, 0, 2, 3]);
    }

    #[test]
    fn perfect_ranking_scores_one() {
        let m = RecordMetrics::compute(&[0.9, 0.1, 0.2], &[1.0, 0.0, 0.0]).unwrap();
        assert!(m.hit_at_1);
        assert!(close(m.reciprocal_rank, 1.0));
        assert!(close(m.ndcg_at_5, 1.0));
        assert!(close(m.mean_score, 0.4));
    }

    #[test]
    fn relevant_item_in_second_place() {
        let m = RecordMetrics::compute(&[0.9, 0.5, 0.2], &[0.0, 1.0, 0.0]).unwrap();
        assert!(!m.hit_at_1);
        assert!(close(m.reciprocal_rank, 0.5));
        assert!(close(m.ndcg_at_10, 1.0 / 3f64.log2()));
    }

    #[test]
    fn cutoff_excludes_deep_hits() {
        let scores: Vec<f64> = (0..8).map(|i| 1.0 - f64::from(i) * 0.1).collect();
        let mut relevance = vec![0.0; 8];
        relevance[6] = 1.0;
        let order = order_by_score(&scores);
        assert!(close(ndcg_at(&order, &relevance, 5), 0.0));
        assert!(ndcg_at(&order, &relevance, 10) > 0.0);
    }

    #[test]
    fn nothing_relevant_is_not_a_ranking_record() {
        assert!(RecordMetrics::compute(&[0.3, 0.2], &[0.0, 0.0]).is_none());
        assert!(RecordMetrics::compute(&[0.3], &[1.0, 0.0]).is_none());
    }

    #[test]
    fn statistics_average_over_records() {
        let mut stats = RankingStatistics::default();
        stats.record(&RecordMetrics::compute(&[0.9, 0.1], &[1.0, 0.0]).unwrap());
        stats.record(&RecordMetrics::compute(&[0.9, 0.1], &[0.0, 1.0]).unwrap());
        let s = stats.summary();
        assert_eq!(s.records, 2);
        assert!(close(s.hit_rate_at_1, 0.5));
        assert!(close(s.mrr, 0.75));
        assert!(close(RankingStatistics::default().mrr(), 0.0));
    }
}
