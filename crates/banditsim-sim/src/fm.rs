//! Reference scorer: a second-order factorization machine with a sigmoid
//! output, trained on log loss with mini-batch gradient descent.
//!
//! For `x = context ++ candidate`:
//!
//! ```text
//!   logit = w0 + Σ wᵢxᵢ + ½ Σ_f [ (Σᵢ vᵢf xᵢ)² − Σᵢ vᵢf² xᵢ² ]
//!   score = σ(logit)
//! ```
//!
//! With `n_factors = 0` the pairwise term vanishes and the model is plain
//! logistic regression.

use banditsim_core::{
    joint_features, Candidate, Context, Hyperparameters, LossReport, Metric, Optimizer, Scorer,
    ScorerError, TrainingExample,
};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;

const INIT_SCALE: f64 = 0.05;
const PROB_EPS: f64 = 1e-7;
const ADAM_BETA1: f64 = 0.9;
const ADAM_BETA2: f64 = 0.999;
const ADAM_EPS: f64 = 1e-8;
const ADAGRAD_EPS: f64 = 1e-10;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
struct OptimizerState {
    step: u64,
    /// Adam first moment.
    #[serde(default)]
    m: Vec<f64>,
    /// Adam second moment, or the Adagrad accumulator.
    #[serde(default)]
    v: Vec<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FactorizationMachine {
    dim: usize,
    n_factors: usize,
    seed: u64,
    /// `[w0, w₁..w_d, v₁₁..v_dk]`, factors stored row-major per feature.
    weights: Vec<f64>,
    #[serde(default)]
    opt: OptimizerState,
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

fn log_loss(p: f64, label: f64) -> f64 {
    let p = p.clamp(PROB_EPS, 1.0 - PROB_EPS);
    -(label * p.ln() + (1.0 - label) * (1.0 - p).ln())
}

impl FactorizationMachine {
    pub fn new(dim: usize, n_factors: usize, seed: u64) -> Self {
        let mut fm = Self {
            dim,
            n_factors,
            seed,
            weights: Vec::new(),
            opt: OptimizerState::default(),
        };
        fm.reinitialize(seed);
        fm
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn n_factors(&self) -> usize {
        self.n_factors
    }

    fn n_weights(&self) -> usize {
        1 + self.dim + self.dim * self.n_factors
    }

    fn factor(&self, i: usize, f: usize) -> f64 {
        self.weights[1 + self.dim + i * self.n_factors + f]
    }

    /// Logit plus the per-factor sums `Σᵢ vᵢf xᵢ` needed for the gradient.
    /// Features past `dim` are ignored.
    fn forward(&self, x: &[f64]) -> (f64, Vec<f64>) {
        let n = x.len().min(self.dim);
        let mut logit = self.weights[0];
        for (i, xi) in x.iter().take(n).enumerate() {
            logit += self.weights[1 + i] * xi;
        }
        let mut sums = vec![0.0; self.n_factors];
        for (f, sum) in sums.iter_mut().enumerate() {
            let mut sq = 0.0;
            for (i, xi) in x.iter().take(n).enumerate() {
                let vx = self.factor(i, f) * xi;
                *sum += vx;
                sq += vx * vx;
            }
            logit += 0.5 * (*sum * *sum - sq);
        }
        (logit, sums)
    }

    fn score(&self, x: &[f64]) -> f64 {
        sigmoid(self.forward(x).0)
    }

    fn accumulate_gradient(&self, x: &[f64], label: f64, grad: &mut [f64]) -> f64 {
        let (logit, sums) = self.forward(x);
        let p = sigmoid(logit);
        let g = p - label;
        grad[0] += g;
        for (i, xi) in x.iter().enumerate() {
            grad[1 + i] += g * xi;
            for (f, sum) in sums.iter().enumerate() {
                let idx = 1 + self.dim + i * self.n_factors + f;
                grad[idx] += g * (xi * sum - self.weights[idx] * xi * xi);
            }
        }
        log_loss(p, label)
    }

    fn apply(&mut self, grad: &[f64], hp: &Hyperparameters) {
        let lr = hp.learning_rate;
        self.opt.step += 1;
        match hp.optimizer {
            Optimizer::Sgd => {
                for (w, g) in self.weights.iter_mut().zip(grad) {
                    *w -= lr * g;
                }
            }
            Optimizer::Adam => {
                if self.opt.m.len() != grad.len() {
                    self.opt.m = vec![0.0; grad.len()];
                    self.opt.v = vec![0.0; grad.len()];
                }
                #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
                let t = self.opt.step.min(i32::MAX as u64) as i32;
                let bias1 = 1.0 - ADAM_BETA1.powi(t);
                let bias2 = 1.0 - ADAM_BETA2.powi(t);
                for (k, g) in grad.iter().enumerate() {
                    self.opt.m[k] = ADAM_BETA1 * self.opt.m[k] + (1.0 - ADAM_BETA1) * g;
                    self.opt.v[k] = ADAM_BETA2 * self.opt.v[k] + (1.0 - ADAM_BETA2) * g * g;
                    let m_hat = self.opt.m[k] / bias1;
                    let v_hat = self.opt.v[k] / bias2;
                    self.weights[k] -= lr * m_hat / (v_hat.sqrt() + ADAM_EPS);
                }
            }
            Optimizer::Adagrad => {
                if self.opt.v.len() != grad.len() {
                    self.opt.v = vec![0.0; grad.len()];
                }
                for (k, g) in grad.iter().enumerate() {
                    self.opt.v[k] += g * g;
                    self.weights[k] -= lr * g / (self.opt.v[k].sqrt() + ADAGRAD_EPS);
                }
            }
        }
    }
}

impl Scorer for FactorizationMachine {
    fn predict(&self, ctx: &Context, candidates: &[Candidate]) -> Vec<f64> {
        candidates
            .iter()
            .map(|c| self.score(&joint_features(ctx, c)))
            .collect()
    }

    fn train_epoch(
        &mut self,
        train: &[TrainingExample],
        hp: &Hyperparameters,
        epoch: usize,
    ) -> Result<f64, ScorerError> {
        if train.is_empty() {
            return Ok(0.0);
        }
        let features: Vec<Vec<f64>> = train
            .iter()
            .map(|ex| joint_features(&ex.context, &ex.candidate))
            .collect();
        if let Some(bad) = features.iter().find(|x| x.len() != self.dim) {
            return Err(ScorerError::DimensionMismatch {
                expected: self.dim,
                actual: bad.len(),
            });
        }

        let mut order: Vec<usize> = (0..train.len()).collect();
        let shuffle_seed = self.seed ^ self.opt.step.rotate_left(17) ^ (epoch as u64);
        order.shuffle(&mut StdRng::seed_from_u64(shuffle_seed));

        let mut total_loss = 0.0;
        let mut grad = vec![0.0; self.n_weights()];
        for batch in order.chunks(hp.batch_size.max(1)) {
            grad.iter_mut().for_each(|g| *g = 0.0);
            for &i in batch {
                let label = train[i].label.clamp(0.0, 1.0);
                total_loss += self.accumulate_gradient(&features[i], label, &mut grad);
            }
            #[allow(clippy::cast_precision_loss)]
            let scale = 1.0 / batch.len() as f64;
            grad.iter_mut().for_each(|g| *g *= scale);
            self.apply(&grad, hp);
        }
        #[allow(clippy::cast_precision_loss)]
        let mean = total_loss / train.len() as f64;
        Ok(mean)
    }

    fn evaluate(&self, data: &[TrainingExample], metrics: &[Metric]) -> LossReport {
        if data.is_empty() {
            return LossReport {
                loss: 0.0,
                accuracy: None,
            };
        }
        // Summed in input order so repeated runs agree bit for bit.
        let per_example: Vec<(f64, usize)> = data
            .par_iter()
            .map(|ex| {
                let label = ex.label.clamp(0.0, 1.0);
                let p = self.score(&joint_features(&ex.context, &ex.candidate));
                let hit = usize::from((p >= 0.5) == (label >= 0.5));
                (log_loss(p, label), hit)
            })
            .collect();
        let (loss_sum, hits) = per_example
            .iter()
            .fold((0.0, 0), |acc, (l, h)| (acc.0 + l, acc.1 + h));
        #[allow(clippy::cast_precision_loss)]
        let n = data.len() as f64;
        #[allow(clippy::cast_precision_loss)]
        let accuracy = metrics
            .contains(&Metric::Accuracy)
            .then(|| hits as f64 / n);
        LossReport {
            loss: loss_sum / n,
            accuracy,
        }
    }

    fn reinitialize(&mut self, seed: u64) {
        self.seed = seed;
        let mut rng = StdRng::seed_from_u64(seed);
        let linear = 1 + self.dim;
        self.weights = (0..self.n_weights())
            .map(|k| {
                if k < linear {
                    0.0
                } else {
                    rng.gen_range(-INIT_SCALE..INIT_SCALE)
                }
            })
            .collect();
        self.opt = OptimizerState::default();
    }

    fn snapshot(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    fn load(&mut self, snapshot: Value) -> Result<(), ScorerError> {
        let restored: Self = serde_json::from_value(snapshot)?;
        let expected = restored.n_weights();
        if restored.weights.len() != expected {
            return Err(ScorerError::DimensionMismatch {
                expected,
                actual: restored.weights.len(),
            });
        }
        *self = restored;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn examples(label: impl Fn(f64, f64) -> f64) -> Vec<TrainingExample> {
        let mut out = Vec::new();
        for _ in 0..50 {
            for (c, i) in [(1.0, 1.0), (1.0, -1.0), (-1.0, 1.0), (-1.0, -1.0)] {
                out.push(TrainingExample {
                    context: Context::new(vec![c]),
                    candidate: Candidate::new(if i > 0.0 { "up" } else { "down" }, vec![i]),
                    label: label(c, i),
                });
            }
        }
        out
    }

    /// Label is 1 exactly when the context feature and the item feature agree.
    fn xor_like() -> Vec<TrainingExample> {
        examples(|c, i| if c * i > 0.0 { 1.0 } else { 0.0 })
    }

    fn hp(optimizer: Optimizer) -> Hyperparameters {
        Hyperparameters {
            n_factors: 2,
            learning_rate: 0.05,
            optimizer,
            epochs: 60,
            batch_size: 16,
            metrics: vec![Metric::Loss, Metric::Accuracy],
        }
    }

    #[test]
    fn every_optimizer_fits_a_linear_signal() {
        let data = examples(|_, i| if i > 0.0 { 1.0 } else { 0.0 });
        for optimizer in [Optimizer::Adam, Optimizer::Adagrad, Optimizer::Sgd] {
            let mut fm = FactorizationMachine::new(2, 0, 42);
            let before = fm.evaluate(&data, &[Metric::Loss]).loss;
            let mut params = hp(optimizer);
            if optimizer == Optimizer::Sgd {
                params.learning_rate = 0.5;
            }
            fm.fit(&data, &params).unwrap();
            let after = fm.evaluate(&data, &[Metric::Loss, Metric::Accuracy]);
            assert!(after.loss < before, "{optimizer:?}: {} !< {before}", after.loss);
            assert!(after.accuracy.unwrap() > 0.99, "{optimizer:?}: {after:?}");
        }
    }

    #[test]
    fn pairwise_term_learns_interactions() {
        let data = xor_like();
        let mut fm = FactorizationMachine::new(2, 2, 42);
        let params = Hyperparameters {
            learning_rate: 0.5,
            epochs: 200,
            ..hp(Optimizer::Sgd)
        };
        fm.fit(&data, &params).unwrap();
        let after = fm.evaluate(&data, &[Metric::Accuracy]);
        assert!(after.accuracy.unwrap() > 0.99, "{after:?}");

        let mut linear = FactorizationMachine::new(2, 0, 42);
        linear.fit(&data, &params).unwrap();
        assert!(linear.evaluate(&data, &[Metric::Accuracy]).accuracy.unwrap() < 0.9);
    }

    #[test]
    fn zero_factors_is_logistic_regression() {
        let fm = FactorizationMachine::new(3, 0, 1);
        assert_eq!(fm.snapshot()["weights"].as_array().unwrap().len(), 4);
        let scores = fm.predict(&Context::new(vec![1.0]), &[Candidate::new("a", vec![2.0, 3.0])]);
        assert!((scores[0] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn same_seed_same_weights() {
        let a = FactorizationMachine::new(4, 3, 9);
        let mut b = FactorizationMachine::new(4, 3, 10);
        assert_ne!(a, b);
        b.reinitialize(9);
        assert_eq!(a, b);
    }

    #[test]
    fn dimension_mismatch_is_reported() {
        let mut fm = FactorizationMachine::new(5, 1, 0);
        let err = fm.train_epoch(&xor_like(), &hp(Optimizer::Adam), 0).unwrap_err();
        assert!(matches!(
            err,
            ScorerError::DimensionMismatch {
                expected: 5,
                actual: 2
            }
        ));
    }

    #[test]
    fn snapshot_roundtrip_preserves_predictions() {
        let mut fm = FactorizationMachine::new(2, 2, 3);
        fm.fit(&xor_like(), &hp(Optimizer::Adam)).unwrap();
        let mut other = FactorizationMachine::new(2, 2, 99);
        other.load(fm.snapshot()).unwrap();
        let ctx = Context::new(vec![1.0]);
        let cands = [Candidate::new("up", vec![1.0]), Candidate::new("down", vec![-1.0])];
        assert_eq!(fm.predict(&ctx, &cands), other.predict(&ctx, &cands));
    }
}
