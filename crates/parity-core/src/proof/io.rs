use std::fs;
use std::io::Write;
use std::path::Path;

use serde_json::Value;
use tempfile::NamedTempFile;

use super::{ProofBundle, Result};
use crate::canon;
use crate::cas::Cid;

/// Canonical bytes of the whole bundle. This is the import/export form.
pub fn bundle_bytes(bundle: &ProofBundle) -> Result<Vec<u8>> {
    Ok(canon::canonicalize_serializable(bundle)?)
}

/// Content address of the bundle's canonical bytes.
pub fn bundle_cid(bundle: &ProofBundle) -> Result<Cid> {
    Ok(Cid::compute(&bundle_bytes(bundle)?))
}

/// Bytes a signer signs: the canonical bundle with `signature` removed.
pub fn signing_payload(bundle: &ProofBundle) -> Result<Vec<u8>> {
    let mut value = serde_json::to_value(bundle)?;
    if let Value::Object(map) = &mut value {
        map.remove("signature");
    }
    Ok(canon::canonicalize(&value)?)
}

/// Write canonical bytes via a sibling temp file and rename.
pub fn write_bundle(path: impl AsRef<Path>, bundle: &ProofBundle) -> Result<()> {
    let path = path.as_ref();
    let bytes = bundle_bytes(bundle)?;
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(&bytes)?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

pub fn read_bundle(path: impl AsRef<Path>) -> Result<ProofBundle> {
    let bytes = fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proof::bundle::create_proof_bundle;
    use crate::proof::bundle::tests::sample_request;
    use crate::proof::SignatureInfo;

    #[test]
    fn file_roundtrip_is_byte_stable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/bundle.json");
        let bundle = create_proof_bundle(sample_request()).unwrap();

        write_bundle(&path, &bundle).unwrap();
        let on_disk = std::fs::read(&path).unwrap();
        assert_eq!(on_disk, bundle_bytes(&bundle).unwrap());
        assert!(!on_disk.contains(&b'\n'));
        assert!(!on_disk.contains(&b' '));

        let back = read_bundle(&path).unwrap();
        assert_eq!(back, bundle);
        assert_eq!(bundle_cid(&back).unwrap(), bundle_cid(&bundle).unwrap());
    }

    #[test]
    fn signing_payload_excludes_signature() {
        let unsigned = create_proof_bundle(sample_request()).unwrap();
        let mut signed = unsigned.clone();
        signed.signature = Some(SignatureInfo {
            algorithm: "a".into(),
            key_id: "k".into(),
            timestamp: "t".into(),
            signer_plugin: "dev".into(),
            signature_ref: "s".into(),
        });
        assert_eq!(signing_payload(&unsigned).unwrap(), signing_payload(&signed).unwrap());
        assert_ne!(bundle_cid(&unsigned).unwrap(), bundle_cid(&signed).unwrap());
    }
}
