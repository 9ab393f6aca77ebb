use std::collections::HashSet;
use std::sync::Arc;

use strata_rules::superblock_hash;
use strata_types::Block;

use crate::error::{ChainError, ChainResult};

/// An immutable, sealed run of consecutive blocks.
///
/// The hash is a function of the block count and the hash of the last
/// block. Block storage and lookup indexes sit behind `Arc`s, so relinking a
/// superblock onto a new parent copies only pointers.
#[derive(Debug)]
pub struct Superblock {
    hash: String,
    blocks: Arc<[Arc<Block>]>,
    block_index: Arc<HashSet<String>>,
    op_index: Arc<HashSet<String>>,
    parent: Option<Arc<Superblock>>,
    /// Blocks in this superblock and all ancestors.
    depth: usize,
}

impl Superblock {
    /// Seal `blocks` (oldest first) on top of `parent`.
    pub fn seal(blocks: Vec<Arc<Block>>, parent: Option<Arc<Superblock>>) -> ChainResult<Arc<Self>> {
        let last = blocks.last().ok_or(ChainError::EmptySuperblock)?;
        let hash = superblock_hash(blocks.len(), &last.hash)?;
        let block_index = blocks.iter().map(|b| b.hash.clone()).collect();
        let op_index = blocks
            .iter()
            .flat_map(|b| b.operation_hashes().map(str::to_string))
            .collect();
        let depth = blocks.len() + parent.as_ref().map_or(0, |p| p.depth);
        Ok(Arc::new(Self {
            hash,
            blocks: blocks.into(),
            block_index: Arc::new(block_index),
            op_index: Arc::new(op_index),
            parent,
            depth,
        }))
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// Number of blocks in this superblock.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Always `false`; sealing rejects empty batches.
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Blocks of this superblock, oldest first.
    pub fn blocks(&self) -> &[Arc<Block>] {
        &self.blocks
    }

    pub fn block_hashes(&self) -> impl Iterator<Item = &str> {
        self.blocks.iter().map(|b| b.hash.as_str())
    }

    pub fn last_block(&self) -> Option<&Arc<Block>> {
        self.blocks.last()
    }

    pub fn parent(&self) -> Option<&Arc<Superblock>> {
        self.parent.as_ref()
    }

    /// Total number of blocks from genesis through this superblock.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Iterate this superblock and its ancestors, newest first.
    pub fn ancestry(&self) -> impl Iterator<Item = &Superblock> {
        std::iter::successors(Some(self), |sb| sb.parent.as_deref())
    }

    /// Whether this superblock or any ancestor holds the block.
    pub fn contains_block(&self, hash: &str) -> bool {
        self.ancestry().any(|sb| sb.block_index.contains(hash))
    }

    /// Whether this superblock or any ancestor holds the operation.
    pub fn contains_operation(&self, hash: &str) -> bool {
        self.ancestry().any(|sb| sb.op_index.contains(hash))
    }

    /// Find a block by hash in this superblock or any ancestor.
    pub fn find_block(&self, hash: &str) -> Option<&Arc<Block>> {
        self.ancestry()
            .find(|sb| sb.block_index.contains(hash))
            .and_then(|sb| sb.blocks.iter().find(|b| b.hash == hash))
    }

    /// Same blocks and hash, linked to a different parent.
    pub fn with_parent(&self, parent: Option<Arc<Superblock>>) -> Arc<Superblock> {
        let depth = self.blocks.len() + parent.as_ref().map_or(0, |p| p.depth);
        Arc::new(Self {
            hash: self.hash.clone(),
            blocks: Arc::clone(&self.blocks),
            block_index: Arc::clone(&self.block_index),
            op_index: Arc::clone(&self.op_index),
            parent,
            depth,
        })
    }

    /// Merge with the parent: the parent's blocks followed by this one's,
    /// linked to the grandparent. `None` if there is no parent.
    pub fn merge_with_parent(&self) -> ChainResult<Option<Arc<Superblock>>> {
        let Some(parent) = &self.parent else {
            return Ok(None);
        };
        let blocks: Vec<Arc<Block>> = parent
            .blocks
            .iter()
            .chain(self.blocks.iter())
            .cloned()
            .collect();
        Superblock::seal(blocks, parent.parent.clone()).map(Some)
    }
}
