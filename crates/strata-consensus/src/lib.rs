//! Chain reconciliation and superblock compaction for Strata.
//!
//! [`ConsensusManager`] owns the link between the in-memory chain and the
//! ledger store:
//!
//! - at startup it rebuilds the persisted block tree ([`BlockTree`]), picks
//!   the canonical orphan tip and replays sealed superblocks into a
//!   [`BlockChain`](strata_chain::BlockChain);
//! - it persists every new block and the ownership pointers of every newly
//!   sealed superblock;
//! - after each block it folds adjacent superblocks together (see
//!   [`compaction`]) and hands back the new chain version.

pub mod compaction;
pub mod error;
pub mod manager;
pub mod saved;
pub mod tree;

pub use compaction::CompactionConfig;
pub use error::{ConsensusError, ConsensusResult};
pub use manager::{ConsensusManager, LoadedLedger};
pub use saved::SavedSuperblock;
pub use tree::{BlockInfo, BlockTree};
