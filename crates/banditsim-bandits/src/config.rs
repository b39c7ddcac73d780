//! Building policies from a name and a JSON parameter object.

use crate::explore_then_exploit::ExploreThenExploitParams;
use crate::lin_ucb::LinUcbParams;
use crate::{
    stats, BanditError, CustomLinUcb, EpsilonGreedy, ExploreThenExploit, FixedPolicy, LinUcb,
    ModelPolicy, Policy, RandomPolicy, Result, SoftmaxExplorer,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Seed mixed into every signature hash.
const SIGNATURE_SEED: u64 = 0x6261_6e64_6974;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    Random,
    Fixed,
    Model,
    EpsilonGreedy,
    SoftmaxExplorer,
    LinUcb,
    CustomLinUcb,
    ExploreThenExploit,
}

impl PolicyKind {
    pub const ALL: [PolicyKind; 8] = [
        Self::Random,
        Self::Fixed,
        Self::Model,
        Self::EpsilonGreedy,
        Self::SoftmaxExplorer,
        Self::LinUcb,
        Self::CustomLinUcb,
        Self::ExploreThenExploit,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Random => "random",
            Self::Fixed => "fixed",
            Self::Model => "model",
            Self::EpsilonGreedy => "epsilon_greedy",
            Self::SoftmaxExplorer => "softmax_explorer",
            Self::LinUcb => "lin_ucb",
            Self::CustomLinUcb => "custom_lin_ucb",
            Self::ExploreThenExploit => "explore_then_exploit",
        }
    }
}

impl fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PolicyKind {
    type Err = BanditError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == normalized)
            .ok_or_else(|| {
                BanditError::InvalidConfiguration(format!(
                    "unknown bandit policy '{s}' (expected one of: {})",
                    Self::ALL.map(Self::as_str).join(", ")
                ))
            })
    }
}

/// Identifies a policy configuration: name plus a stable hash of the
/// canonical parameters. Equal configurations share a signature.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PolicySignature {
    pub name: String,
    pub hash: String,
}

impl fmt::Display for PolicySignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.name, self.hash)
    }
}

/// A policy kind with its parameter object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicySpec {
    pub kind: PolicyKind,
    #[serde(default = "empty_params")]
    pub params: Value,
}

fn empty_params() -> Value {
    Value::Object(Map::new())
}

fn parse<T: DeserializeOwned>(kind: PolicyKind, params: &Value) -> Result<T> {
    serde_json::from_value(params.clone()).map_err(|e| {
        BanditError::InvalidConfiguration(format!("bandit-policy-params for {kind}: {e}"))
    })
}

fn expect_no_params(kind: PolicyKind, params: &Value) -> Result<()> {
    match params {
        Value::Object(m) if m.is_empty() => Ok(()),
        other => Err(BanditError::InvalidConfiguration(format!(
            "{kind} takes no parameters, got {other}"
        ))),
    }
}

fn canonical_numbers(value: &Value) -> Value {
    match value {
        Value::Number(n) => n.as_f64().map_or_else(|| value.clone(), Value::from),
        Value::Array(items) => Value::Array(items.iter().map(canonical_numbers).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), canonical_numbers(v)))
                .collect(),
        ),
        other => other.clone(),
    }
}

impl PolicySpec {
    pub fn new(kind: PolicyKind, params: Value) -> Self {
        let params = if params.is_null() { empty_params() } else { params };
        Self { kind, params }
    }

    /// Parses `name` and a JSON parameter string as given on the command line.
    pub fn parse(name: &str, params_json: &str) -> Result<Self> {
        let kind = name.parse()?;
        let params = if params_json.trim().is_empty() {
            empty_params()
        } else {
            serde_json::from_str(params_json).map_err(|e| {
                BanditError::InvalidConfiguration(format!("bandit-policy-params is not JSON: {e}"))
            })?
        };
        if !(params.is_object() || params.is_null()) {
            return Err(BanditError::InvalidConfiguration(
                "bandit-policy-params must be a JSON object".into(),
            ));
        }
        Ok(Self::new(kind, params))
    }

    pub fn signature(&self) -> PolicySignature {
        // serde_json objects are ordered maps; numbers are rendered as f64 so
        // `1` and `1.0` hash alike.
        let canonical = canonical_numbers(&self.params).to_string();
        let hash = stats::stable_hash64(SIGNATURE_SEED, &format!("{}:{canonical}", self.kind));
        PolicySignature {
            name: self.kind.to_string(),
            hash: format!("{hash:016x}"),
        }
    }

    /// Instantiates the policy, validating every parameter.
    pub fn build(&self) -> Result<Box<dyn Policy>> {
        let params = &self.params;
        let policy: Box<dyn Policy> = match self.kind {
            PolicyKind::Random => {
                expect_no_params(self.kind, params)?;
                Box::new(RandomPolicy)
            }
            PolicyKind::Model => {
                expect_no_params(self.kind, params)?;
                Box::new(ModelPolicy)
            }
            PolicyKind::Fixed => Box::new(parse::<FixedPolicy>(self.kind, params)?),
            PolicyKind::EpsilonGreedy => {
                let p: EpsilonGreedy = parse(self.kind, params)?;
                Box::new(EpsilonGreedy::new(p.epsilon)?)
            }
            PolicyKind::SoftmaxExplorer => {
                let p: SoftmaxExplorer = parse(self.kind, params)?;
                Box::new(SoftmaxExplorer::new(p.logit_multiplier)?)
            }
            PolicyKind::LinUcb => Box::new(LinUcb::new(parse::<LinUcbParams>(self.kind, params)?)?),
            PolicyKind::CustomLinUcb => Box::new(CustomLinUcb::new(parse::<LinUcbParams>(
                self.kind, params,
            )?)?),
            PolicyKind::ExploreThenExploit => Box::new(ExploreThenExploit::new(parse::<
                ExploreThenExploitParams,
            >(
                self.kind, params
            )?)?),
        };
        Ok(policy)
    }
}
