use std::collections::HashMap;
use std::sync::Mutex;

use super::types::Policy;

/// Storage for fetched policies, shared between concurrent connection
/// attempts. TTL handling and eviction belong to the implementation; writes
/// are idempotent.
pub trait PolicyCache: Send + Sync {
    fn get(&self, domain: &str) -> Option<Policy>;
    fn set(&self, domain: &str, policy: Policy);
}

/// Unbounded in-process cache. Suitable for short-lived tools and tests;
/// long-running services should bring a TTL-aware implementation.
#[derive(Default)]
pub struct MemoryPolicyCache {
    entries: Mutex<HashMap<String, Policy>>,
}

impl MemoryPolicyCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|map| map.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PolicyCache for MemoryPolicyCache {
    fn get(&self, domain: &str) -> Option<Policy> {
        self.entries
            .lock()
            .ok()
            .and_then(|map| map.get(domain).cloned())
    }

    fn set(&self, domain: &str, policy: Policy) {
        if let Ok(mut map) = self.entries.lock() {
            map.insert(domain.to_string(), policy);
        }
    }
}
