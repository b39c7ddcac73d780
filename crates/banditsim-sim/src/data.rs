//! Reference data preparation.
//!
//! Interaction records are read from JSON lines, filtered on context
//! attributes and split into train, validation and test sets. The simulator
//! only sees the resulting [`PreparedData`].

use crate::config::SimulationConfig;
use crate::{Result, SimError};
use banditsim_core::{InteractionRecord, TrainingExample, TrainingSet};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::str::FromStr;

/// How a validation set is carved out of training data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ValSplitType {
    /// Seeded shuffle, then the first `val_size` fraction.
    #[default]
    Random,
    /// The last `val_size` fraction in stream order.
    Time,
}

impl FromStr for ValSplitType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "random" => Ok(Self::Random),
            "time" => Ok(Self::Time),
            other => Err(format!("unknown val split type '{other}' (expected random or time)")),
        }
    }
}

/// Reads one [`InteractionRecord`] per non-empty line.
pub fn read_records(path: &Path) -> Result<Vec<InteractionRecord>> {
    let reader = BufReader::new(File::open(path)?);
    let mut records = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record = serde_json::from_str(&line).map_err(|e| SimError::Data {
            path: path.to_path_buf(),
            line: idx + 1,
            message: e.to_string(),
        })?;
        records.push(record);
    }
    Ok(records)
}

/// Parses a `key=value` filter. The value is read as JSON when possible and
/// as a plain string otherwise.
pub fn parse_filter(raw: &str) -> Result<(String, Value)> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| SimError::Config(format!("filter '{raw}' is not key=value")))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(SimError::Config(format!("filter '{raw}' has an empty key")));
    }
    let value = serde_json::from_str(value.trim())
        .unwrap_or_else(|_| Value::String(value.trim().to_string()));
    Ok((key.to_string(), value))
}

/// An attribute matches a scalar filter by equality and an array filter by
/// membership.
pub fn matches_filters(record: &InteractionRecord, filters: &BTreeMap<String, Value>) -> bool {
    filters.iter().all(|(key, expected)| {
        let Some(actual) = record.context.attributes.get(key) else {
            return false;
        };
        match expected {
            Value::Array(options) => options.contains(actual),
            scalar => scalar == actual,
        }
    })
}

pub fn apply_filters(
    records: Vec<InteractionRecord>,
    filters: &BTreeMap<String, Value>,
) -> Vec<InteractionRecord> {
    if filters.is_empty() {
        return records;
    }
    let before = records.len();
    let kept: Vec<_> = records
        .into_iter()
        .filter(|r| matches_filters(r, filters))
        .collect();
    tracing::debug!(before, after = kept.len(), "filters applied");
    kept
}

fn split_count(len: usize, fraction: f64) -> usize {
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    let n = (len as f64 * fraction).round() as usize;
    n.min(len)
}

/// Splits off the last `fraction` of `items`.
pub fn split_tail<T>(mut items: Vec<T>, fraction: f64) -> (Vec<T>, Vec<T>) {
    let n = split_count(items.len(), fraction);
    let tail = items.split_off(items.len() - n);
    (items, tail)
}

/// Moves a seeded random `fraction` of `items` into the second half. Both
/// halves keep their original relative order.
pub fn split_random<T>(items: Vec<T>, fraction: f64, seed: u64) -> (Vec<T>, Vec<T>) {
    let n = split_count(items.len(), fraction);
    let mut idx: Vec<usize> = (0..items.len()).collect();
    idx.shuffle(&mut StdRng::seed_from_u64(seed));
    let mut held_out = vec![false; items.len()];
    for &i in &idx[..n] {
        held_out[i] = true;
    }
    let mut kept = Vec::with_capacity(items.len() - n);
    let mut taken = Vec::with_capacity(n);
    for (item, out) in items.into_iter().zip(held_out) {
        if out {
            taken.push(item);
        } else {
            kept.push(item);
        }
    }
    (kept, taken)
}

/// Carves a validation set out of `items` (returned second).
pub fn split_validation<T>(
    items: Vec<T>,
    fraction: f64,
    kind: ValSplitType,
    seed: u64,
) -> (Vec<T>, Vec<T>) {
    match kind {
        ValSplitType::Random => split_random(items, fraction, seed),
        ValSplitType::Time => split_tail(items, fraction),
    }
}

/// Every candidate with a known reward becomes a labelled example.
pub fn labelled_examples(records: &[InteractionRecord]) -> TrainingSet {
    records
        .iter()
        .flat_map(|rec| {
            rec.candidates.iter().filter_map(move |cand| {
                rec.reward_for(&cand.item).map(|label| TrainingExample {
                    context: rec.context.clone(),
                    candidate: cand.clone(),
                    label,
                })
            })
        })
        .collect()
}

/// Splits handed to the simulator and the evaluator.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PreparedData {
    /// Interaction stream replayed every episode.
    pub train: Vec<InteractionRecord>,
    pub val: Vec<InteractionRecord>,
    pub test: Vec<InteractionRecord>,
}

impl PreparedData {
    pub fn new(
        train: Vec<InteractionRecord>,
        val: Vec<InteractionRecord>,
        test: Vec<InteractionRecord>,
    ) -> Self {
        Self { train, val, test }
    }

    /// Loads and splits the input files according to `config`.
    ///
    /// Without a dedicated test file the last `test_size` fraction of the
    /// input becomes the test split. Without a validation file the
    /// validation set is carved at retrain time.
    pub fn prepare(
        input: &Path,
        test_input: Option<&Path>,
        val_input: Option<&Path>,
        config: &SimulationConfig,
    ) -> Result<Self> {
        let records = apply_filters(read_records(input)?, &config.filters);
        let (train, test) = match test_input {
            Some(path) => (records, apply_filters(read_records(path)?, &config.filters)),
            None => split_tail(records, config.test_size),
        };
        let val = match val_input {
            Some(path) => apply_filters(read_records(path)?, &config.filters),
            None => Vec::new(),
        };
        let data = Self::new(train, val, test);
        tracing::info!(
            train = data.train.len(),
            val = data.val.len(),
            test = data.test.len(),
            "data prepared"
        );
        Ok(data)
    }

    fn all(&self) -> impl Iterator<Item = &InteractionRecord> {
        self.train.iter().chain(&self.val).chain(&self.test)
    }

    /// Length of `context ++ candidate` features, which must agree across
    /// every candidate of every split.
    pub fn feature_dim(&self) -> Result<usize> {
        let mut dim = None;
        for rec in self.all() {
            for cand in &rec.candidates {
                let d = rec.context.features.len() + cand.features.len();
                match dim {
                    None => dim = Some(d),
                    Some(expected) if expected != d => {
                        return Err(SimError::Config(format!(
                            "inconsistent feature dimension: expected {expected}, got {d} for item '{}'",
                            cand.item
                        )));
                    }
                    Some(_) => {}
                }
            }
        }
        dim.ok_or_else(|| SimError::Config("no candidates in any split".into()))
    }

    pub fn train_examples(&self) -> TrainingSet {
        labelled_examples(&self.train)
    }

    pub fn val_examples(&self) -> TrainingSet {
        labelled_examples(&self.val)
    }
}
