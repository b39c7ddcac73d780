#![warn(clippy::unwrap_used, clippy::expect_used)]

//! Held-out evaluation of a trained scorer.
//!
//! The [`Evaluator`] ranks every test record by the scorer's output and
//! reports hit rate@1, MRR, nDCG@5/10 and the mean predicted score, overall
//! and per group of each fairness column. It can also estimate the value of
//! the greedy scorer policy from the interaction log and write the test-set
//! rankings produced by the exploration policy.

pub mod metrics;
pub mod off_policy;

#[cfg(test)]
mod testing;

pub use metrics::{MetricSummary, RankingStatistics, RecordMetrics};
pub use off_policy::OffPolicyEstimate;

use banditsim_bandits::stats::stable_hash64;
use banditsim_bandits::{rank, BanditError, DecisionInput, Policy};
use banditsim_core::{iso8601_now, InteractionRecord, Observation, Scorer};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EvalError {
    #[error(transparent)]
    Policy(#[from] BanditError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, EvalError>;

/// Result of [`Evaluator::evaluate`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub ts: String,
    pub test_records: usize,
    /// Records without a relevant candidate, or whose scores did not line up
    /// with their candidates.
    pub skipped: usize,
    pub overall: MetricSummary,
    /// Fairness column → group value → metrics.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub groups: BTreeMap<String, BTreeMap<String, MetricSummary>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub off_policy: Option<OffPolicyEstimate>,
}

impl EvaluationReport {
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = File::create(path)?;
        serde_json::to_writer_pretty(file, self)?;
        Ok(())
    }
}

/// Ranking of one test record by the exploration policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestPrediction {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_id: Option<String>,
    /// Items in the order the policy ranked them.
    pub actions: Vec<String>,
    /// Selection probability of each ranked item at the time it was drawn.
    pub probabilities: Vec<f64>,
    /// Scorer output, highest first.
    pub scores: Vec<f64>,
}

pub fn write_predictions(path: &Path, predictions: &[TestPrediction]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut out = BufWriter::new(File::create(path)?);
    for p in predictions {
        serde_json::to_writer(&mut out, p)?;
        out.write_all(b"\n")?;
    }
    out.flush()?;
    Ok(())
}

#[derive(Debug, Clone, Default)]
pub struct Evaluator {
    fairness_columns: Vec<String>,
}

impl Evaluator {
    #[must_use]
    pub fn new(fairness_columns: Vec<String>) -> Self {
        Self { fairness_columns }
    }

    /// Aggregate ranking statistics by a grouping key (e.g. a context
    /// attribute). Records without a key are left out.
    #[must_use]
    pub fn aggregate(
        &self,
        scored: &[(&InteractionRecord, RecordMetrics)],
        key_fn: impl Fn(&InteractionRecord) -> Option<String>,
    ) -> BTreeMap<String, RankingStatistics> {
        let mut stats: BTreeMap<String, RankingStatistics> = BTreeMap::new();
        for (rec, m) in scored {
            if let Some(key) = key_fn(rec) {
                stats.entry(key).or_default().record(m);
            }
        }
        stats
    }

    /// Ranks every test record by `scorer` and summarizes the result.
    pub fn evaluate<S: Scorer + ?Sized>(
        &self,
        scorer: &S,
        test: &[InteractionRecord],
    ) -> EvaluationReport {
        let per_record: Vec<Option<RecordMetrics>> = test
            .par_iter()
            .map(|rec| {
                let scores = scorer.predict(&rec.context, &rec.candidates);
                RecordMetrics::compute(&scores, &rec.relevance())
            })
            .collect();
        let scored: Vec<(&InteractionRecord, RecordMetrics)> = test
            .iter()
            .zip(per_record)
            .filter_map(|(rec, m)| m.map(|m| (rec, m)))
            .collect();

        let mut overall = RankingStatistics::default();
        for (_, m) in &scored {
            overall.record(m);
        }

        let mut groups = BTreeMap::new();
        for column in &self.fairness_columns {
            let by_group = self.aggregate(&scored, |rec| rec.context.group_key(column));
            if by_group.is_empty() {
                tracing::warn!(column = %column, "fairness column not found in any test record");
            }
            groups.insert(
                column.clone(),
                by_group
                    .into_iter()
                    .map(|(group, stats)| (group, stats.summary()))
                    .collect(),
            );
        }

        let report = EvaluationReport {
            ts: iso8601_now(),
            test_records: test.len(),
            skipped: test.len() - scored.len(),
            overall: overall.summary(),
            groups,
            off_policy: None,
        };
        tracing::info!(
            records = report.overall.records,
            skipped = report.skipped,
            hit_rate_at_1 = report.overall.hit_rate_at_1,
            mrr = report.overall.mrr,
            ndcg_at_10 = report.overall.ndcg_at_10,
            "evaluation finished"
        );
        report
    }

    /// [`Evaluator::evaluate`] plus off-policy estimates from `log`.
    pub fn evaluate_with_log<S: Scorer + ?Sized>(
        &self,
        scorer: &S,
        test: &[InteractionRecord],
        log: &[Observation],
    ) -> EvaluationReport {
        let mut report = self.evaluate(scorer, test);
        if !log.is_empty() {
            report.off_policy = Some(off_policy::estimate(scorer, log));
        }
        report
    }

    /// Full rankings of the test records under `policy`. Records the policy
    /// cannot rank are skipped.
    pub fn predictions<S: Scorer + ?Sized>(
        &self,
        scorer: &S,
        policy: &dyn Policy,
        test: &[InteractionRecord],
        seed: u64,
    ) -> Result<Vec<TestPrediction>> {
        let ranked: Vec<std::result::Result<Option<TestPrediction>, BanditError>> = test
            .par_iter()
            .enumerate()
            .map(|(i, rec)| {
                let scores = scorer.predict(&rec.context, &rec.candidates);
                let input = DecisionInput::new(&rec.context, &rec.candidates).with_scores(&scores);
                let mut rng = StdRng::seed_from_u64(stable_hash64(seed, &format!("test:{i}")));
                match rank(policy, &input, &mut rng) {
                    Ok(ranking) => {
                        let mut sorted = scores.clone();
                        sorted.sort_by(|a, b| b.total_cmp(a));
                        Ok(Some(TestPrediction {
                            context_id: rec.context.id.clone(),
                            actions: ranking
                                .items(&rec.candidates)
                                .into_iter()
                                .map(str::to_string)
                                .collect(),
                            probabilities: ranking.probabilities,
                            scores: sorted,
                        }))
                    }
                    Err(err) if err.is_per_decision() => {
                        tracing::warn!(record = i, %err, "test record not ranked");
                        Ok(None)
                    }
                    Err(err) => Err(err),
                }
            })
            .collect();
        let mut out = Vec::with_capacity(ranked.len());
        for r in ranked {
            if let Some(p) = r? {
                out.push(p);
            }
        }
        Ok(out)
    }
}
