//! Append-only interaction log.

use crate::{Result, SimError};
use banditsim_core::{Observation, TrainingExample, TrainingSet};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

/// Observations in the order actions were taken. Entries can be appended and
/// read, never removed or changed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InteractionLog {
    entries: Vec<Observation>,
}

impl InteractionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, observation: Observation) {
        self.entries.push(observation);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[Observation] {
        &self.entries
    }

    /// Entries appended after the first `mark`.
    pub fn since(&self, mark: usize) -> &[Observation] {
        &self.entries[mark.min(self.entries.len())..]
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Observation> {
        self.entries.iter()
    }

    /// Bandit feedback as supervised data: the chosen candidate labelled with
    /// its observed reward.
    pub fn training_examples(observations: &[Observation]) -> TrainingSet {
        observations
            .iter()
            .map(|obs| TrainingExample {
                context: obs.context().clone(),
                candidate: obs.chosen().clone(),
                label: obs.reward(),
            })
            .collect()
    }

    /// Writes one observation per line.
    pub fn write_jsonl(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out = BufWriter::new(File::create(path)?);
        for obs in &self.entries {
            serde_json::to_writer(&mut out, obs)?;
            out.write_all(b"\n")?;
        }
        out.flush()?;
        Ok(())
    }

    /// Reads a log written by [`write_jsonl`](Self::write_jsonl). Every line
    /// is validated like a freshly recorded observation.
    pub fn read_jsonl(path: &Path) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        let mut log = Self::new();
        for (idx, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let observation = serde_json::from_str(&line).map_err(|e| SimError::Data {
                path: path.to_path_buf(),
                line: idx + 1,
                message: e.to_string(),
            })?;
            log.append(observation);
        }
        Ok(log)
    }
}

impl<'a> IntoIterator for &'a InteractionLog {
    type Item = &'a Observation;
    type IntoIter = std::slice::Iter<'a, Observation>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}
