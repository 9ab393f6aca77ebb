use std::sync::Arc;

use strata_rules::ChainView;
use strata_types::Block;
use tracing::info;

use crate::error::{ChainError, ChainResult};
use crate::superblock::Superblock;

/// A snapshot of the canonical chain: sealed superblocks plus the unsealed
/// head of recent blocks.
///
/// Cloning is cheap (one `Arc` and a short vector of `Arc`s). Writers clone
/// the current snapshot, modify the copy and publish it, so readers holding
/// an older snapshot never see a half-applied change.
#[derive(Clone, Debug, Default)]
pub struct BlockChain {
    sealed: Option<Arc<Superblock>>,
    head: Vec<Arc<Block>>,
}

impl BlockChain {
    /// An empty chain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Assemble a chain from a sealed tip and head blocks (oldest first).
    pub fn from_parts(sealed: Option<Arc<Superblock>>, head: Vec<Arc<Block>>) -> Self {
        Self { sealed, head }
    }

    /// The newest sealed superblock.
    pub fn sealed(&self) -> Option<&Arc<Superblock>> {
        self.sealed.as_ref()
    }

    /// Blocks appended since the last seal, oldest first.
    pub fn head(&self) -> &[Arc<Block>] {
        &self.head
    }

    /// Total number of blocks.
    pub fn len(&self) -> usize {
        self.sealed.as_ref().map_or(0, |sb| sb.depth()) + self.head.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The newest block, if any.
    pub fn last_block(&self) -> Option<&Arc<Block>> {
        self.head
            .last()
            .or_else(|| self.sealed.as_ref().and_then(|sb| sb.last_block()))
    }

    /// Whether an operation with this hash is already on the chain.
    pub fn contains_operation(&self, hash: &str) -> bool {
        self.head
            .iter()
            .any(|b| b.operation_hashes().any(|h| h == hash))
            || self
                .sealed
                .as_ref()
                .is_some_and(|sb| sb.contains_operation(hash))
    }

    /// Find a block by hash anywhere on the chain.
    pub fn find_block(&self, hash: &str) -> Option<&Arc<Block>> {
        self.head
            .iter()
            .find(|b| b.hash == hash)
            .or_else(|| self.sealed.as_ref().and_then(|sb| sb.find_block(hash)))
    }

    /// Append a block to the head. It must directly extend the current tip.
    pub fn append(&mut self, block: Arc<Block>) -> ChainResult<()> {
        let (expected_id, expected_prev) = match self.last_block() {
            Some(last) => (last.block_id + 1, last.hash.as_str()),
            None => (0, ""),
        };
        if block.block_id != expected_id {
            return Err(ChainError::OutOfOrder {
                hash: block.hash.clone(),
                expected_id,
                actual_id: block.block_id,
            });
        }
        if block.prev_block_hash != expected_prev {
            return Err(ChainError::BrokenLink {
                hash: block.hash.clone(),
                expected: expected_prev.to_string(),
                actual: block.prev_block_hash.clone(),
            });
        }
        self.head.push(block);
        Ok(())
    }

    /// Seal the head into a new superblock on top of the current tip.
    ///
    /// Returns the new superblock, or `None` if the head was empty.
    pub fn seal_head(&mut self) -> ChainResult<Option<Arc<Superblock>>> {
        if self.head.is_empty() {
            return Ok(None);
        }
        let blocks = std::mem::take(&mut self.head);
        let sealed = Superblock::seal(blocks, self.sealed.clone())?;
        info!(
            superblock = %sealed.hash(),
            blocks = sealed.len(),
            depth = sealed.depth(),
            "sealed head into superblock"
        );
        self.sealed = Some(Arc::clone(&sealed));
        Ok(Some(sealed))
    }

    /// The same head on top of a different sealed tip.
    pub fn with_sealed(&self, sealed: Option<Arc<Superblock>>) -> Self {
        Self {
            sealed,
            head: self.head.clone(),
        }
    }

    /// Sealed superblocks, oldest first.
    pub fn superblocks(&self) -> Vec<Arc<Superblock>> {
        let mut out: Vec<Arc<Superblock>> =
            std::iter::successors(self.sealed.clone(), |sb| sb.parent().cloned()).collect();
        out.reverse();
        out
    }

    /// Every block hash on the chain, oldest first.
    pub fn block_hashes(&self) -> Vec<String> {
        self.superblocks()
            .iter()
            .flat_map(|sb| sb.block_hashes().map(str::to_string).collect::<Vec<_>>())
            .chain(self.head.iter().map(|b| b.hash.clone()))
            .collect()
    }

    /// Superblock sizes oldest first, followed by the head size.
    pub fn layout(&self) -> (Vec<usize>, usize) {
        let sizes = self.superblocks().iter().map(|sb| sb.len()).collect();
        (sizes, self.head.len())
    }
}

impl ChainView for BlockChain {
    fn contains_block(&self, hash: &str) -> bool {
        self.head.iter().any(|b| b.hash == hash)
            || self
                .sealed
                .as_ref()
                .is_some_and(|sb| sb.contains_block(hash))
    }
}
