use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use super::state::{SamplingState, WorkloadKey};

#[derive(Default)]
struct Inner {
    states: HashMap<WorkloadKey, SamplingState>,
    tenants: HashSet<String>,
    versions: HashSet<String>,
    algorithms: HashSet<String>,
}

/// Owner of every [`SamplingState`].
///
/// Updates run under one lock, so writes for a key are serialized and the
/// first sighting of a tenant, version or algorithm is decided exactly once.
#[derive(Default)]
pub struct SamplingStore {
    inner: Mutex<Inner>,
}

impl SamplingStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Apply `f` to the state for `key`, creating it first if needed.
    pub fn update<R>(&self, key: &WorkloadKey, f: impl FnOnce(&mut SamplingState) -> R) -> R {
        let mut guard = self.lock();
        let Inner {
            states,
            tenants,
            versions,
            algorithms,
        } = &mut *guard;
        let state = states.entry(key.clone()).or_insert_with(|| {
            SamplingState::new(
                tenants.insert(key.tenant_hash.clone()),
                versions.insert(key.engine_version.clone()),
                algorithms.insert(key.algorithm.clone()),
            )
        });
        f(state)
    }

    pub fn snapshot(&self, key: &WorkloadKey) -> Option<SamplingState> {
        self.lock().states.get(key).cloned()
    }

    pub fn keys(&self) -> Vec<WorkloadKey> {
        let mut keys: Vec<_> = self.lock().states.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.lock().states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
