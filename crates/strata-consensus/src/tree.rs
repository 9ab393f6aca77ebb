//! The persisted block tree, rebuilt at startup.
//!
//! [`BlockTree`] is an arena: nodes live in a `Vec` and refer to their
//! parent and children by index, with a hash index on the side. This lets
//! forks share ancestors without reference cycles.
//!
//! # Invariants
//!
//! - Every non-root node's parent is inserted before the node itself.
//! - Hashes are unique within the tree.
//! - `depth` is 1 for a root and `parent.depth + 1` otherwise.

use std::collections::HashMap;

use strata_store::BlockHeader;
use tracing::debug;

use crate::error::{ConsensusError, ConsensusResult};

/// One persisted block as seen by reconciliation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockInfo {
    pub hash: String,
    pub block_id: i32,
    pub parent: Option<usize>,
    pub children: Vec<usize>,
    pub depth: usize,
    /// Whether a sealed superblock owns this block; `false` for orphans.
    pub sealed: bool,
}

/// Arena of every persisted block, including orphans on losing forks.
#[derive(Clone, Debug, Default)]
pub struct BlockTree {
    nodes: Vec<BlockInfo>,
    index: HashMap<String, usize>,
}

impl BlockTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the tree from headers ordered by block id.
    pub fn from_headers(headers: &[BlockHeader]) -> ConsensusResult<Self> {
        let mut tree = Self::new();
        for header in headers {
            tree.insert(
                &header.hash,
                &header.parent_hash,
                header.block_id,
                header.superblock.as_deref().is_some_and(|s| !s.is_empty()),
            )?;
        }
        Ok(tree)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    // ---------------------------------------------------------------
    // Mutation
    // ---------------------------------------------------------------

    /// Add a block. An empty `parent_hash` makes it a root.
    pub fn insert(
        &mut self,
        hash: &str,
        parent_hash: &str,
        block_id: i32,
        sealed: bool,
    ) -> ConsensusResult<usize> {
        let parent = self.check_insert(hash, parent_hash)?;
        let depth = parent.map_or(1, |p| self.nodes[p].depth + 1);

        let idx = self.nodes.len();
        self.nodes.push(BlockInfo {
            hash: hash.to_string(),
            block_id,
            parent,
            children: Vec::new(),
            depth,
            sealed,
        });
        if let Some(p) = parent {
            self.nodes[p].children.push(idx);
        }
        self.index.insert(hash.to_string(), idx);
        debug!(block = %hash, depth, "added block to tree");
        Ok(idx)
    }

    /// Check that a block could be inserted, returning its parent's index.
    pub fn check_insert(&self, hash: &str, parent_hash: &str) -> ConsensusResult<Option<usize>> {
        if self.index.contains_key(hash) {
            return Err(ConsensusError::DuplicateBlock(hash.to_string()));
        }
        if parent_hash.is_empty() {
            return Ok(None);
        }
        self.index
            .get(parent_hash)
            .copied()
            .map(Some)
            .ok_or_else(|| ConsensusError::MissingParent {
                block: hash.to_string(),
                parent: parent_hash.to_string(),
            })
    }

    /// Remove the most recently inserted block, which must be `hash`.
    ///
    /// Returns `false` and leaves the tree unchanged otherwise.
    pub fn remove_last(&mut self, hash: &str) -> bool {
        let is_last = self
            .nodes
            .last()
            .is_some_and(|node| node.hash == hash && node.children.is_empty());
        if !is_last {
            return false;
        }
        let idx = self.nodes.len() - 1;
        if let Some(node) = self.nodes.pop() {
            if let Some(p) = node.parent {
                self.nodes[p].children.retain(|&c| c != idx);
            }
        }
        self.index.remove(hash);
        debug!(block = %hash, "removed block from tree");
        true
    }

    /// Mark a block as owned by a sealed superblock.
    pub fn mark_sealed(&mut self, hash: &str) -> bool {
        match self.index.get(hash) {
            Some(&idx) => {
                self.nodes[idx].sealed = true;
                true
            }
            None => false,
        }
    }

    // ---------------------------------------------------------------
    // Queries
    // ---------------------------------------------------------------

    /// The most recently inserted block.
    pub fn last(&self) -> Option<&BlockInfo> {
        self.nodes.last()
    }

    pub fn get(&self, hash: &str) -> Option<&BlockInfo> {
        self.index.get(hash).map(|&idx| &self.nodes[idx])
    }

    pub fn parent_of(&self, info: &BlockInfo) -> Option<&BlockInfo> {
        info.parent.map(|p| &self.nodes[p])
    }

    pub fn children_of<'a>(&'a self, info: &'a BlockInfo) -> impl Iterator<Item = &'a BlockInfo> {
        info.children.iter().map(|&c| &self.nodes[c])
    }

    /// Blocks not owned by any sealed superblock.
    pub fn orphans(&self) -> impl Iterator<Item = &BlockInfo> {
        self.nodes.iter().filter(|n| !n.sealed)
    }

    /// The canonical tip candidate: the deepest orphan, ties broken by the
    /// lexicographically smallest hash.
    pub fn select_tip(&self) -> Option<&BlockInfo> {
        self.orphans().min_by(|a, b| b.depth.cmp(&a.depth).then_with(|| a.hash.cmp(&b.hash)))
    }

    /// Hashes from just after `stop` up to `tip`, oldest first.
    ///
    /// With `stop == None` the path runs back to the root. Fails if the walk
    /// reaches a root without passing through `stop`.
    pub fn path_to(&self, tip: &str, stop: Option<&str>) -> ConsensusResult<Vec<String>> {
        let mut current = self.get(tip);
        let mut path = Vec::new();
        while let Some(info) = current {
            if Some(info.hash.as_str()) == stop {
                path.reverse();
                return Ok(path);
            }
            path.push(info.hash.clone());
            current = self.parent_of(info);
        }
        match stop {
            Some(sealed) => Err(ConsensusError::TipMissesSealedChain {
                tip: tip.to_string(),
                sealed: sealed.to_string(),
            }),
            None => {
                path.reverse();
                Ok(path)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Add a chain of `len` blocks under `parent`, naming intermediate
    /// nodes `{prefix}{i}` and the last one `tip`.
    fn branch(tree: &mut BlockTree, parent: &str, prefix: &str, len: usize, tip: &str) {
        let mut prev = parent.to_string();
        let mut id = tree.get(parent).map_or(-1, |p| p.block_id);
        for i in 0..len {
            id += 1;
            let hash = if i + 1 == len {
                tip.to_string()
            } else {
                format!("{prefix}{i}")
            };
            tree.insert(&hash, &prev, id, false).unwrap();
            prev = hash;
        }
    }

    // ---------------------------------------------------------------
    // Construction
    // ---------------------------------------------------------------

    #[test]
    fn depth_follows_parents() {
        let mut tree = BlockTree::new();
        branch(&mut tree, "", "m", 3, "t");
        assert_eq!(tree.get("m0").unwrap().depth, 1);
        assert_eq!(tree.get("t").unwrap().depth, 3);
        let root = tree.get("m0").unwrap();
        assert_eq!(tree.children_of(root).next().unwrap().hash, "m1");
        assert_eq!(tree.parent_of(tree.get("t").unwrap()).unwrap().hash, "m1");
    }

    #[test]
    fn missing_parent_is_an_error() {
        let mut tree = BlockTree::new();
        let err = tree.insert("b", "ghost", 1, false).unwrap_err();
        assert_eq!(
            err,
            ConsensusError::MissingParent {
                block: "b".into(),
                parent: "ghost".into()
            }
        );
    }

    #[test]
    fn duplicate_hash_is_an_error() {
        let mut tree = BlockTree::new();
        tree.insert("a", "", 0, false).unwrap();
        assert!(matches!(
            tree.insert("a", "", 0, false),
            Err(ConsensusError::DuplicateBlock(_))
        ));
    }

    #[test]
    fn only_the_newest_leaf_can_be_removed() {
        let mut tree = BlockTree::new();
        branch(&mut tree, "", "m", 3, "t");
        assert!(!tree.remove_last("m1"));
        assert!(!tree.remove_last("ghost"));

        assert!(tree.remove_last("t"));
        assert_eq!(tree.len(), 2);
        assert!(tree.get("t").is_none());
        assert!(tree.get("m1").unwrap().children.is_empty());

        tree.insert("t", "m1", 2, false).unwrap();
        assert_eq!(tree.select_tip().unwrap().hash, "t");
    }

    #[test]
    fn from_headers_marks_sealed_blocks() {
        let header = |hash: &str, parent: &str, id, sb: Option<&str>| BlockHeader {
            hash: hash.into(),
            parent_hash: parent.into(),
            block_id: id,
            superblock: sb.map(str::to_string),
        };
        let tree = BlockTree::from_headers(&[
            header("a", "", 0, Some("sb1")),
            header("b", "a", 1, Some("")),
            header("c", "b", 2, None),
        ])
        .unwrap();
        let orphans: Vec<_> = tree.orphans().map(|o| o.hash.as_str()).collect();
        assert_eq!(orphans, ["b", "c"]);
    }

    // ---------------------------------------------------------------
    // Tip selection
    // ---------------------------------------------------------------

    #[test]
    fn deepest_orphan_wins() {
        let mut tree = BlockTree::new();
        tree.insert("root", "", 0, true).unwrap();
        branch(&mut tree, "root", "x", 2, "bb");
        branch(&mut tree, "root", "y", 2, "aa");
        branch(&mut tree, "root", "z", 4, "cc");
        assert_eq!(tree.get("bb").unwrap().depth, 3);
        assert_eq!(tree.get("aa").unwrap().depth, 3);
        assert_eq!(tree.get("cc").unwrap().depth, 5);
        assert_eq!(tree.select_tip().unwrap().hash, "cc");
    }

    #[test]
    fn equal_depth_prefers_smallest_hash() {
        let mut tree = BlockTree::new();
        tree.insert("root", "", 0, true).unwrap();
        branch(&mut tree, "root", "x", 4, "bb");
        branch(&mut tree, "root", "y", 4, "aa");
        assert_eq!(tree.select_tip().unwrap().hash, "aa");
    }

    #[test]
    fn no_orphans_means_no_tip() {
        let mut tree = BlockTree::new();
        tree.insert("root", "", 0, true).unwrap();
        assert!(tree.select_tip().is_none());
    }

    // ---------------------------------------------------------------
    // Paths
    // ---------------------------------------------------------------

    #[test]
    fn path_stops_after_sealed_block() {
        let mut tree = BlockTree::new();
        branch(&mut tree, "", "s", 2, "sealed");
        tree.mark_sealed("s0");
        tree.mark_sealed("sealed");
        branch(&mut tree, "sealed", "o", 3, "tip");
        assert_eq!(tree.path_to("tip", Some("sealed")).unwrap(), ["o0", "o1", "tip"]);
        assert_eq!(tree.path_to("tip", None).unwrap().len(), 5);
    }

    #[test]
    fn fork_below_sealed_block_is_fatal() {
        let mut tree = BlockTree::new();
        branch(&mut tree, "", "s", 2, "sealed");
        branch(&mut tree, "s0", "f", 3, "forked");
        let err = tree.path_to("forked", Some("sealed")).unwrap_err();
        assert!(matches!(err, ConsensusError::TipMissesSealedChain { .. }));
    }
}
