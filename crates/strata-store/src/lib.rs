//! Block and operation storage for Strata.
//!
//! The ledger persists two tables:
//!
//! - `blocks(hash PK, parent_hash, block_id, superblock, parent_superblock, body)`
//! - `operations(sequence_id, hash PK, blocks[], body)`
//!
//! Bodies are opaque text produced by the entity codec; the store never
//! interprets them. Only the superblock ownership pointers of a block and
//! the block list of an operation are ever updated after insert.
//!
//! All backends implement the [`LedgerStore`] trait:
//!
//! - [`InMemoryLedgerStore`] -- `HashMap`-based store for tests and embedding

pub mod error;
pub mod memory;
pub mod record;
pub mod traits;

pub use error::{StoreError, StoreResult};
pub use memory::InMemoryLedgerStore;
pub use record::{BlockHeader, BlockRecord, OperationRecord, SuperblockAssignment};
pub use traits::LedgerStore;
