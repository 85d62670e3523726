use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use super::{check_integrity, CasError, CasStore, Cid, Result};

/// Filesystem-backed content-addressed store with 2-char sharding.
///
/// Layout: `<root>/objects/<first 2 hex chars>/<remaining hex chars>`
pub struct FsCasStore {
    objects_dir: PathBuf,
}

impl FsCasStore {
    /// Create a store rooted at `root`. Creates `root/objects/` if needed.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let objects_dir = root.as_ref().join("objects");
        fs::create_dir_all(&objects_dir)?;
        Ok(Self { objects_dir })
    }

    fn blob_path(&self, cid: &Cid) -> PathBuf {
        let hex = cid.as_str();
        self.objects_dir.join(&hex[..2]).join(&hex[2..])
    }
}

impl CasStore for FsCasStore {
    fn put(&self, data: &[u8]) -> Result<Cid> {
        let cid = Cid::compute(data);
        let path = self.blob_path(&cid);

        if path.exists() {
            return Ok(cid);
        }

        let shard_dir = self.objects_dir.join(&cid.as_str()[..2]);
        fs::create_dir_all(&shard_dir)?;

        // Temp file in the shard, then rename. A concurrent writer of the same
        // CID renames identical bytes over the same path.
        let mut tmp = NamedTempFile::new_in(&shard_dir)?;
        tmp.write_all(data)?;
        tmp.persist(&path).map_err(|e| e.error)?;

        tracing::debug!(cid = %cid, size = data.len(), "cas put");
        Ok(cid)
    }

    fn get(&self, cid: &Cid) -> Result<Vec<u8>> {
        let path = self.blob_path(cid);
        let data = fs::read(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                CasError::NotFound(cid.clone())
            } else {
                CasError::Io(e)
            }
        })?;
        check_integrity(cid, &data)?;
        Ok(data)
    }

    fn exists(&self, cid: &Cid) -> Result<bool> {
        Ok(self.blob_path(cid).exists())
    }
}
