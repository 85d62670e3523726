//! Binary Merkle tree over artifact CIDs.
//!
//! - leaves: CIDs sorted lexicographically, `H(0x00 || cid_ascii)`
//! - branches: `H(0x01 || left || right)`
//! - odd levels are avoided by padding the leaf row to a power of two with
//!   copies of the last leaf

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::ProofError;
use crate::cas::Cid;

const LEAF_PREFIX: u8 = 0x00;
const NODE_PREFIX: u8 = 0x01;

pub type Hash = [u8; 32];

pub fn leaf_hash(cid: &Cid) -> Hash {
    let mut h = Sha256::new();
    h.update([LEAF_PREFIX]);
    h.update(cid.as_str().as_bytes());
    h.finalize().into()
}

pub fn node_hash(left: &Hash, right: &Hash) -> Hash {
    let mut h = Sha256::new();
    h.update([NODE_PREFIX]);
    h.update(left);
    h.update(right);
    h.finalize().into()
}

/// Fully materialized tree. `levels[0]` is the padded leaf row.
#[derive(Debug, Clone)]
pub struct MerkleTree {
    leaves: Vec<Cid>,
    levels: Vec<Vec<Hash>>,
}

impl MerkleTree {
    /// Build from CIDs in any order.
    pub fn build(cids: &[Cid]) -> Result<Self, ProofError> {
        if cids.is_empty() {
            return Err(ProofError::EmptyTree);
        }
        let mut leaves = cids.to_vec();
        leaves.sort();

        let mut row: Vec<Hash> = leaves.iter().map(leaf_hash).collect();
        let width = row.len().next_power_of_two();
        if let Some(&last) = row.last() {
            row.resize(width, last);
        }

        let mut levels = vec![row];
        while levels.last().map_or(0, Vec::len) > 1 {
            let prev = &levels[levels.len() - 1];
            let next = prev.chunks(2).map(|pair| node_hash(&pair[0], &pair[1])).collect();
            levels.push(next);
        }

        Ok(Self { leaves, levels })
    }

    pub fn root(&self) -> Hash {
        self.levels
            .last()
            .and_then(|top| top.first())
            .copied()
            .unwrap_or([0u8; 32])
    }

    pub fn root_hex(&self) -> String {
        hex::encode(self.root())
    }

    /// Sorted, unpadded leaves.
    pub fn leaves(&self) -> &[Cid] {
        &self.leaves
    }

    /// Inclusion proof for `cid`.
    pub fn proof(&self, cid: &Cid) -> Option<InclusionProof> {
        let mut index = self.leaves.binary_search(cid).ok()?;
        let leaf_index = index;
        let mut siblings = Vec::with_capacity(self.levels.len().saturating_sub(1));

        for level in &self.levels[..self.levels.len() - 1] {
            let sibling = index ^ 1;
            siblings.push(ProofStep {
                hash: hex::encode(level[sibling]),
                left: sibling < index,
            });
            index /= 2;
        }

        Some(InclusionProof {
            cid: cid.clone(),
            leaf_index,
            siblings,
        })
    }
}

/// Merkle root of a CID set as 64 lowercase hex characters.
pub fn merkle_root(cids: &[Cid]) -> Result<String, ProofError> {
    Ok(MerkleTree::build(cids)?.root_hex())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProofStep {
    pub hash: String,
    /// Sibling sits to the left of the running hash.
    pub left: bool,
}

/// Path from one leaf to the root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InclusionProof {
    pub cid: Cid,
    pub leaf_index: usize,
    pub siblings: Vec<ProofStep>,
}

impl InclusionProof {
    /// Recompute the root from this path and compare with `root_hex`.
    pub fn verify(&self, root_hex: &str) -> bool {
        let mut acc = leaf_hash(&self.cid);
        for step in &self.siblings {
            let Ok(bytes) = hex::decode(&step.hash) else {
                return false;
            };
            let Ok(sibling) = <Hash>::try_from(bytes.as_slice()) else {
                return false;
            };
            acc = if step.left {
                node_hash(&sibling, &acc)
            } else {
                node_hash(&acc, &sibling)
            };
        }
        hex::encode(acc) == root_hex
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cids(n: usize) -> Vec<Cid> {
        (0..n).map(|i| Cid::compute(format!("artifact-{i}").as_bytes())).collect()
    }

    #[test]
    fn single_leaf_root_is_leaf_hash() {
        let c = cids(1);
        let tree = MerkleTree::build(&c).unwrap();
        assert_eq!(tree.root(), leaf_hash(&c[0]));
    }

    #[test]
    fn order_independent() {
        let mut c = cids(5);
        let a = merkle_root(&c).unwrap();
        c.reverse();
        assert_eq!(a, merkle_root(&c).unwrap());
    }

    #[test]
    fn three_leaves_pad_with_last() {
        let mut c = cids(3);
        c.sort();
        let l: Vec<Hash> = c.iter().map(leaf_hash).collect();
        let expected = node_hash(&node_hash(&l[0], &l[1]), &node_hash(&l[2], &l[2]));
        assert_eq!(MerkleTree::build(&c).unwrap().root(), expected);
    }

    #[test]
    fn leaf_and_node_domains_are_separated() {
        let c = cids(2);
        let l0 = leaf_hash(&c[0]);
        let mut plain = Sha256::new();
        plain.update(c[0].as_str().as_bytes());
        let plain: Hash = plain.finalize().into();
        assert_ne!(l0, plain);
    }

    #[test]
    fn empty_set_rejected() {
        assert!(matches!(MerkleTree::build(&[]), Err(ProofError::EmptyTree)));
    }

    #[test]
    fn inclusion_proofs_verify() {
        let c = cids(6);
        let tree = MerkleTree::build(&c).unwrap();
        let root = tree.root_hex();
        for cid in &c {
            let proof = tree.proof(cid).unwrap();
            assert_eq!(proof.siblings.len(), 3);
            assert!(proof.verify(&root));
        }
        let foreign = Cid::compute(b"not in tree");
        assert!(tree.proof(&foreign).is_none());
    }

    #[test]
    fn tampered_proof_fails() {
        let c = cids(4);
        let tree = MerkleTree::build(&c).unwrap();
        let mut proof = tree.proof(&c[2]).unwrap();
        proof.siblings[0].hash = hex::encode([7u8; 32]);
        assert!(!proof.verify(&tree.root_hex()));
    }
}
