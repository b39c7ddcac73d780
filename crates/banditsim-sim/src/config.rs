//! Run configuration.
//!
//! A [`SimulationConfig`] can be read from a JSON file; every field is
//! optional and falls back to [`SimulationConfig::default`].

use crate::data::ValSplitType;
use crate::{Result, SimError};
use banditsim_bandits::{PolicyKind, PolicySpec};
use banditsim_core::{Hyperparameters, Metric, Optimizer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs::File;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SimulationConfig {
    pub project: String,
    /// Free-text label stored alongside the run parameters.
    pub observation: String,
    pub seed: u64,

    pub test_size: f64,
    pub val_size: f64,
    pub val_split_type: ValSplitType,
    /// Context attribute filters applied while loading records.
    pub filters: BTreeMap<String, Value>,
    pub fairness_columns: Vec<String>,

    pub n_factors: usize,
    pub learning_rate: f64,
    pub optimizer: Optimizer,
    pub metrics: Vec<Metric>,
    pub epochs: usize,
    pub batch_size: usize,
    pub early_stopping_patience: usize,
    pub early_stopping_min_delta: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retrain_timeout_secs: Option<u64>,
    /// Fit the scorer on the training split before the first episode.
    pub warm_start: bool,

    pub obs_batch_size: usize,
    pub num_episodes: usize,
    pub full_refit: bool,
    pub bandit_policy: PolicyKind,
    pub bandit_policy_params: Value,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        let hp = Hyperparameters::default();
        Self {
            project: "banditsim".to_string(),
            observation: String::new(),
            seed: 42,
            test_size: 0.2,
            val_size: 0.2,
            val_split_type: ValSplitType::Random,
            filters: BTreeMap::new(),
            fairness_columns: Vec::new(),
            n_factors: hp.n_factors,
            learning_rate: hp.learning_rate,
            optimizer: hp.optimizer,
            metrics: hp.metrics,
            epochs: hp.epochs,
            batch_size: hp.batch_size,
            early_stopping_patience: 10,
            early_stopping_min_delta: 1e-6,
            retrain_timeout_secs: None,
            warm_start: false,
            obs_batch_size: 1000,
            num_episodes: 1,
            full_refit: false,
            bandit_policy: PolicyKind::Model,
            bandit_policy_params: Value::Object(Map::new()),
        }
    }
}

fn fraction(name: &str, value: f64, allow_zero: bool) -> Result<()> {
    let ok = value.is_finite() && value < 1.0 && (value > 0.0 || (allow_zero && value == 0.0));
    if ok {
        Ok(())
    } else {
        Err(SimError::Config(format!(
            "{name} must be in {}0, 1), got {value}",
            if allow_zero { "[" } else { "(" }
        )))
    }
}

impl SimulationConfig {
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let config = serde_json::from_reader(file)
            .map_err(|e| SimError::Config(format!("{}: {e}", path.display())))?;
        Ok(config)
    }

    pub fn hyperparameters(&self) -> Hyperparameters {
        Hyperparameters {
            n_factors: self.n_factors,
            learning_rate: self.learning_rate,
            optimizer: self.optimizer,
            epochs: self.epochs,
            batch_size: self.batch_size,
            metrics: self.metrics.clone(),
        }
    }

    pub fn policy_spec(&self) -> PolicySpec {
        PolicySpec::new(self.bandit_policy, self.bandit_policy_params.clone())
    }

    /// Checks every field and builds the policy once, so configuration
    /// errors surface before any episode runs.
    pub fn validate(&self) -> Result<()> {
        if self.project.trim().is_empty() {
            return Err(SimError::Config("project must not be empty".into()));
        }
        fraction("test_size", self.test_size, true)?;
        fraction("val_size", self.val_size, false)?;
        if self.obs_batch_size == 0 {
            return Err(SimError::Config("obs_batch_size must be >= 1".into()));
        }
        if self.num_episodes == 0 {
            return Err(SimError::Config("num_episodes must be >= 1".into()));
        }
        if !(self.early_stopping_min_delta.is_finite() && self.early_stopping_min_delta >= 0.0) {
            return Err(SimError::Config(format!(
                "early_stopping_min_delta must be finite and >= 0, got {}",
                self.early_stopping_min_delta
            )));
        }
        self.hyperparameters()
            .validate()
            .map_err(|e| SimError::Config(e.to_string()))?;
        self.policy_spec().build()?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use banditsim_bandits::BanditError;
    use serde_json::json;

    #[test]
    fn defaults_follow_launch_parameters() {
        let cfg = SimulationConfig::default();
        assert_eq!(cfg.seed, 42);
        assert_eq!(cfg.epochs, 100);
        assert_eq!(cfg.batch_size, 500);
        assert_eq!(cfg.optimizer, Optimizer::Adam);
        assert!((cfg.val_size - 0.2).abs() < f64::EPSILON);
        assert_eq!(cfg.early_stopping_patience, 10);
        cfg.validate().unwrap();
    }

    #[test]
    fn partial_json_fills_in_defaults() {
        let cfg: SimulationConfig = serde_json::from_value(json!({
            "project": "trivago",
            "bandit_policy": "epsilon_greedy",
            "bandit_policy_params": {"epsilon": 0.1},
            "full_refit": true
        }))
        .unwrap();
        assert_eq!(cfg.project, "trivago");
        assert_eq!(cfg.obs_batch_size, 1000);
        assert!(cfg.full_refit);
        cfg.validate().unwrap();
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let res: std::result::Result<SimulationConfig, _> =
            serde_json::from_value(json!({"num_epsiodes": 3}));
        assert!(res.is_err());
    }

    #[test]
    fn bad_policy_params_fail_validation() {
        let cfg = SimulationConfig {
            bandit_policy: PolicyKind::EpsilonGreedy,
            bandit_policy_params: json!({"epsilon": 1.5}),
            ..SimulationConfig::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(SimError::Policy(BanditError::InvalidConfiguration(_)))
        ));
    }

    #[test]
    fn ranges_are_checked() {
        let cases = [
            SimulationConfig {
                test_size: 1.0,
                ..SimulationConfig::default()
            },
            SimulationConfig {
                val_size: 0.0,
                ..SimulationConfig::default()
            },
            SimulationConfig {
                obs_batch_size: 0,
                ..SimulationConfig::default()
            },
            SimulationConfig {
                learning_rate: -1.0,
                ..SimulationConfig::default()
            },
        ];
        for cfg in cases {
            assert!(matches!(cfg.validate(), Err(SimError::Config(_))));
        }
    }
}
