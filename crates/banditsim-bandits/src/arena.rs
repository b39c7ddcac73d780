//! Policies shared by signature.
//!
//! Two configurations with the same [`PolicySignature`] resolve to the same
//! instance, so a policy that learns online keeps its state across every
//! consumer that asked for it.

use crate::{Policy, PolicySignature, PolicySpec, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// A policy behind a lock. Stateful policies hold the lock from selection
/// until their update has been applied.
pub type SharedPolicy = Arc<Mutex<Box<dyn Policy>>>;

#[derive(Debug, Default)]
pub struct PolicyArena {
    policies: Mutex<HashMap<PolicySignature, SharedPolicy>>,
}

impl PolicyArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the instance for `spec`, building it on first use.
    pub fn get_or_create(&self, spec: &PolicySpec) -> Result<SharedPolicy> {
        let signature = spec.signature();
        let mut policies = self.policies.lock();
        if let Some(existing) = policies.get(&signature) {
            return Ok(Arc::clone(existing));
        }
        let policy: SharedPolicy = Arc::new(Mutex::new(spec.build()?));
        tracing::debug!(%signature, "policy instantiated");
        policies.insert(signature, Arc::clone(&policy));
        Ok(policy)
    }

    pub fn get(&self, signature: &PolicySignature) -> Option<SharedPolicy> {
        self.policies.lock().get(signature).cloned()
    }

    pub fn len(&self) -> usize {
        self.policies.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::PolicyKind;
    use serde_json::json;

    #[test]
    fn same_signature_shares_one_instance() {
        let arena = PolicyArena::new();
        let a = PolicySpec::new(PolicyKind::LinUcb, json!({"alpha": 0.1}));
        let b = PolicySpec::parse("lin-ucb", r#"{"alpha": 0.1}"#).unwrap();
        let first = arena.get_or_create(&a).unwrap();
        let second = arena.get_or_create(&b).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(arena.len(), 1);
        assert!(arena.get(&a.signature()).is_some());
    }

    #[test]
    fn different_params_get_distinct_instances() {
        let arena = PolicyArena::new();
        arena
            .get_or_create(&PolicySpec::new(PolicyKind::EpsilonGreedy, json!({"epsilon": 0.1})))
            .unwrap();
        arena
            .get_or_create(&PolicySpec::new(PolicyKind::EpsilonGreedy, json!({"epsilon": 0.2})))
            .unwrap();
        assert_eq!(arena.len(), 2);
    }

    #[test]
    fn invalid_spec_is_not_registered() {
        let arena = PolicyArena::new();
        let bad = PolicySpec::new(PolicyKind::EpsilonGreedy, json!({"epsilon": -1.0}));
        assert!(arena.get_or_create(&bad).is_err());
        assert!(arena.is_empty());
    }
}
