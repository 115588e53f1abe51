//! Binary Merkle tree over transaction hashes with duplicate-last-leaf
//! padding for odd fan-in at every level. The empty-list root is the
//! SHA-256 of the empty string, matching every other hash in the system.

use crate::crypto;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProofStep {
    pub sibling: String,
    pub side: Side,
}

pub struct MerkleTree {
    /// `levels[0]` is the leaves; the last entry is the single root hash.
    levels: Vec<Vec<String>>,
}

fn hash_pair(left: &str, right: &str) -> String {
    crypto::sha256_hex(format!("{left}{right}").as_bytes())
}

impl MerkleTree {
    pub fn new(leaf_hashes: &[String]) -> Self {
        if leaf_hashes.is_empty() {
            return Self {
                levels: vec![vec![crypto::sha256_hex(b"")]],
            };
        }

        let mut levels = vec![leaf_hashes.to_vec()];
        while levels.last().unwrap().len() > 1 {
            let current = levels.last().unwrap();
            let mut next = Vec::with_capacity(current.len().div_ceil(2));
            let mut i = 0;
            while i < current.len() {
                let left = &current[i];
                let right = if i + 1 < current.len() { &current[i + 1] } else { left };
                next.push(hash_pair(left, right));
                i += 2;
            }
            levels.push(next);
        }
        Self { levels }
    }

    pub fn root(&self) -> String {
        self.levels.last().unwrap()[0].clone()
    }

    pub fn proof(&self, leaf_index: usize) -> Option<Vec<ProofStep>> {
        if self.levels[0].is_empty() || leaf_index >= self.levels[0].len() {
            return None;
        }
        let mut steps = Vec::new();
        let mut index = leaf_index;
        for level in &self.levels[..self.levels.len() - 1] {
            let is_right_child = index % 2 == 1;
            let sibling_index = if is_right_child { index - 1 } else { (index + 1).min(level.len() - 1) };
            let sibling = level[sibling_index].clone();
            let side = if is_right_child { Side::Left } else { Side::Right };
            steps.push(ProofStep { sibling, side });
            index /= 2;
        }
        Some(steps)
    }
}

/// Verify a proof without constructing a tree: walk up from `leaf_hash`
/// combining with each proof step, and compare against `root`.
pub fn verify_proof(leaf_hash: &str, proof: &[ProofStep], root: &str) -> bool {
    let mut current = leaf_hash.to_string();
    for step in proof {
        current = match step.side {
            Side::Left => hash_pair(&step.sibling, &current),
            Side::Right => hash_pair(&current, &step.sibling),
        };
    }
    current == root
}

pub fn compute_root(leaf_hashes: &[String]) -> String {
    MerkleTree::new(leaf_hashes).root()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaves(n: usize) -> Vec<String> {
        (0..n).map(|i| crypto::sha256_hex(format!("leaf{i}").as_bytes())).collect()
    }

    #[test]
    fn empty_root_is_sha256_of_empty_string() {
        let tree = MerkleTree::new(&[]);
        assert_eq!(tree.root(), crypto::sha256_hex(b""));
    }

    #[test]
    fn single_leaf_root_is_itself_hashed_with_itself() {
        let l = leaves(1);
        let tree = MerkleTree::new(&l);
        assert_eq!(tree.root(), hash_pair(&l[0], &l[0]));
    }

    #[test]
    fn odd_leaf_count_duplicates_last_leaf() {
        let l = leaves(3);
        let tree = MerkleTree::new(&l);
        // level 1: hash(l0,l1), hash(l2,l2)
        let level1 = vec![hash_pair(&l[0], &l[1]), hash_pair(&l[2], &l[2])];
        let expected_root = hash_pair(&level1[0], &level1[1]);
        assert_eq!(tree.root(), expected_root);
    }

    #[test]
    fn proof_for_every_leaf_verifies() {
        for n in 1..=7 {
            let l = leaves(n);
            let tree = MerkleTree::new(&l);
            for (i, leaf) in l.iter().enumerate() {
                let proof = tree.proof(i).unwrap();
                assert!(verify_proof(leaf, &proof, &tree.root()), "leaf {i} of {n} failed");
            }
        }
    }

    #[test]
    fn duplicated_last_leaf_proof_verifies_against_same_root() {
        let l = leaves(3);
        let tree = MerkleTree::new(&l);
        let proof = tree.proof(2).unwrap();
        assert!(verify_proof(&l[2], &proof, &tree.root()));
    }

    #[test]
    fn tampered_proof_fails() {
        let l = leaves(4);
        let tree = MerkleTree::new(&l);
        let mut proof = tree.proof(0).unwrap();
        proof[0].sibling = crypto::sha256_hex(b"wrong");
        assert!(!verify_proof(&l[0], &proof, &tree.root()));
    }
}
