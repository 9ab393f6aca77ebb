//! Chain structure for Strata.
//!
//! The canonical chain is a linked list of immutable [`Superblock`]s
//! (newest first via parent references) plus an unsealed head of recent
//! blocks, captured together in a cheap-to-clone [`BlockChain`] snapshot.
//! Deriving a new chain version allocates only the superblocks that changed;
//! every untouched ancestor is shared through its `Arc`.
//!
//! [`OperationsQueue`] holds operations accepted for inclusion in a future
//! block, in arrival order.

pub mod chain;
pub mod error;
pub mod queue;
pub mod superblock;

pub use chain::BlockChain;
pub use error::{ChainError, ChainResult};
pub use queue::OperationsQueue;
pub use superblock::Superblock;
