use serde::{Deserialize, Serialize};

use crate::hasher::ContentHasher;

/// Side of a sibling in a merkle proof path.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Left,
    Right,
}

/// Binary merkle tree over arbitrary byte leaves.
///
/// Leaves are operation hash bytes for the content tree, or the
/// concatenated raw signature bytes of each operation for the signature
/// tree. Adjacent nodes are combined as `sha256(left || right)`; an odd
/// trailing node is combined with itself.
#[derive(Clone, Debug)]
pub struct MerkleTree {
    /// Level 0 = leaves, last level = the single root.
    levels: Vec<Vec<Vec<u8>>>,
}

impl MerkleTree {
    /// Build a tree from leaf byte strings.
    ///
    /// An empty list has no root. A single leaf is its own root.
    pub fn from_leaves(leaves: Vec<Vec<u8>>) -> Self {
        if leaves.is_empty() {
            return Self { levels: vec![] };
        }

        let mut levels = vec![leaves];
        while let Some(current) = levels.last().filter(|level| level.len() > 1) {
            let next: Vec<Vec<u8>> = current
                .chunks(2)
                .map(|pair| match pair {
                    [left, right] => hash_pair(left, right),
                    // Odd node: hash with itself
                    [single] => hash_pair(single, single),
                    _ => unreachable!("chunks(2) yields one or two items"),
                })
                .collect();
            levels.push(next);
        }

        Self { levels }
    }

    /// Root bytes, or `None` for an empty tree.
    pub fn root(&self) -> Option<&[u8]> {
        self.levels
            .last()
            .and_then(|level| level.first())
            .map(Vec::as_slice)
    }

    /// Root formatted as `sha256:<hex>`; the empty string for an empty tree.
    pub fn root_hash(&self) -> String {
        self.root()
            .map(|root| ContentHasher::SHA256.format(root))
            .unwrap_or_default()
    }

    /// Number of leaves.
    pub fn leaf_count(&self) -> usize {
        self.levels.first().map_or(0, Vec::len)
    }

    /// Generate an inclusion proof for the leaf at `index`.
    pub fn proof(&self, index: usize) -> Option<MerkleProof> {
        let leaf = self.levels.first()?.get(index)?.clone();
        let root = self.root()?.to_vec();

        let mut path = Vec::new();
        let mut idx = index;
        for level in &self.levels[..self.levels.len() - 1] {
            let sibling_idx = if idx % 2 == 0 { idx + 1 } else { idx - 1 };
            // Odd level: the last node is paired with itself
            let sibling = level.get(sibling_idx).unwrap_or(&level[idx]).clone();
            let side = if idx % 2 == 0 { Side::Right } else { Side::Left };
            path.push((sibling, side));
            idx /= 2;
        }

        Some(MerkleProof { leaf, path, root })
    }
}

/// Merkle inclusion proof.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof {
    /// The leaf being proven.
    pub leaf: Vec<u8>,
    /// Path of (sibling, sibling side) pairs from leaf to root.
    pub path: Vec<(Vec<u8>, Side)>,
    /// Expected root.
    pub root: Vec<u8>,
}

impl MerkleProof {
    /// Recompute the root from the leaf and path.
    pub fn verify(&self) -> bool {
        let mut current = self.leaf.clone();
        for (sibling, side) in &self.path {
            current = match side {
                Side::Left => hash_pair(sibling, &current),
                Side::Right => hash_pair(&current, sibling),
            };
        }
        current == self.root
    }
}

fn hash_pair(left: &[u8], right: &[u8]) -> Vec<u8> {
    ContentHasher::SHA256.digest_parts(&[left, right]).to_vec()
}
