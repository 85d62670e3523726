use std::collections::HashMap;
use std::sync::Mutex;

use super::{check_integrity, CasError, CasStore, Cid, Result};

/// In-memory CAS for tests and ephemeral pipelines.
#[derive(Default)]
pub struct MemoryCasStore {
    blobs: Mutex<HashMap<Cid, Vec<u8>>>,
}

impl MemoryCasStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.lock().map(|b| b.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Overwrite a stored blob in place. Test hook for integrity failures.
    pub fn corrupt(&self, cid: &Cid, data: &[u8]) {
        if let Ok(mut blobs) = self.blobs.lock() {
            blobs.insert(cid.clone(), data.to_vec());
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<Cid, Vec<u8>>>> {
        self.blobs
            .lock()
            .map_err(|e| CasError::Io(std::io::Error::other(e.to_string())))
    }
}

impl CasStore for MemoryCasStore {
    fn put(&self, data: &[u8]) -> Result<Cid> {
        let cid = Cid::compute(data);
        self.lock()?.entry(cid.clone()).or_insert_with(|| data.to_vec());
        Ok(cid)
    }

    fn get(&self, cid: &Cid) -> Result<Vec<u8>> {
        let data = self
            .lock()?
            .get(cid)
            .cloned()
            .ok_or_else(|| CasError::NotFound(cid.clone()))?;
        check_integrity(cid, &data)?;
        Ok(data)
    }

    fn exists(&self, cid: &Cid) -> Result<bool> {
        Ok(self.lock()?.contains_key(cid))
    }
}
