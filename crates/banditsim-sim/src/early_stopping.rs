//! Epoch loop with validation-loss early stopping and a wall-clock deadline.

use banditsim_core::{Hyperparameters, Scorer, ScorerError, TrainingExample};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Improved,
    Wait,
    Stop,
}

/// Tracks the best validation loss. A check improves only when it beats the
/// best by more than `min_delta`; `patience` consecutive non-improving checks
/// stop training.
#[derive(Debug, Clone)]
pub struct EarlyStopping {
    patience: usize,
    min_delta: f64,
    best: Option<f64>,
    best_epoch: Option<usize>,
    wait: usize,
}

impl EarlyStopping {
    pub fn new(patience: usize, min_delta: f64) -> Self {
        Self {
            patience,
            min_delta,
            best: None,
            best_epoch: None,
            wait: 0,
        }
    }

    pub fn observe(&mut self, epoch: usize, loss: f64) -> Verdict {
        let improved = self.best.map_or(true, |best| loss < best - self.min_delta);
        if improved {
            self.best = Some(loss);
            self.best_epoch = Some(epoch);
            self.wait = 0;
            return Verdict::Improved;
        }
        self.wait += 1;
        if self.wait >= self.patience {
            Verdict::Stop
        } else {
            Verdict::Wait
        }
    }

    pub fn best(&self) -> Option<f64> {
        self.best
    }

    pub fn best_epoch(&self) -> Option<usize> {
        self.best_epoch
    }
}

/// Everything a retrain needs besides the data.
#[derive(Debug, Clone)]
pub struct FitRequest<'a> {
    pub hp: &'a Hyperparameters,
    pub patience: usize,
    pub min_delta: f64,
    pub deadline: Option<Instant>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FitReport {
    pub examples: usize,
    pub val_examples: usize,
    pub epochs_run: usize,
    pub train_loss: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub best_val_loss: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub best_epoch: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub val_accuracy: Option<f64>,
    pub stopped_early: bool,
}

/// Trains for up to `hp.epochs` epochs. With a non-empty `val` set the weights
/// of the best validation epoch are restored at the end.
///
/// Fails with [`ScorerError::Divergence`] on a non-finite loss and with
/// [`ScorerError::Timeout`] once `deadline` has passed with epochs left to
/// run. Either way the scorer is left mid-training; the caller restores it.
pub fn fit_with_validation<S: Scorer + ?Sized>(
    scorer: &mut S,
    train: &[TrainingExample],
    val: &[TrainingExample],
    req: &FitRequest<'_>,
) -> Result<FitReport, ScorerError> {
    req.hp.validate()?;
    let mut stopper = EarlyStopping::new(req.patience, req.min_delta);
    let mut best_snapshot: Option<Value> = None;
    let mut report = FitReport {
        examples: train.len(),
        val_examples: val.len(),
        ..FitReport::default()
    };

    for epoch in 0..req.hp.epochs {
        let loss = scorer.train_epoch(train, req.hp, epoch)?;
        if !loss.is_finite() {
            return Err(ScorerError::Divergence(format!(
                "non-finite training loss at epoch {epoch}"
            )));
        }
        report.epochs_run = epoch + 1;
        report.train_loss = loss;

        if !val.is_empty() {
            let eval = scorer.evaluate(val, &req.hp.metrics);
            if !eval.loss.is_finite() {
                return Err(ScorerError::Divergence(format!(
                    "non-finite validation loss at epoch {epoch}"
                )));
            }
            tracing::debug!(epoch, train_loss = loss, val_loss = eval.loss, "epoch");
            match stopper.observe(epoch, eval.loss) {
                Verdict::Improved => {
                    best_snapshot = Some(scorer.snapshot());
                    report.val_accuracy = eval.accuracy;
                }
                Verdict::Wait => {}
                Verdict::Stop => {
                    report.stopped_early = true;
                    break;
                }
            }
        } else {
            tracing::debug!(epoch, train_loss = loss, "epoch");
        }

        let more_to_run = epoch + 1 < req.hp.epochs;
        if more_to_run && req.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(ScorerError::Timeout {
                epochs: report.epochs_run,
            });
        }
    }

    if let Some(snapshot) = best_snapshot {
        scorer.load(snapshot)?;
    }
    report.best_val_loss = stopper.best();
    report.best_epoch = stopper.best_epoch();
    Ok(report)
}
