//! The Strata ledger node.
//!
//! [`BlockManager`] is the single writer of the chain. It admits signed
//! operations into a pending queue, builds and signs blocks from that queue
//! (or validates blocks produced elsewhere), executes their operations
//! against [`LedgerState`] through the [`OperationsRegistry`], and hands
//! every committed block to the consensus manager for persistence, sealing
//! and compaction.

pub mod config;
pub mod error;
pub mod handlers;
pub mod ledger;
pub mod manager;
pub mod state;

pub use config::NodeConfig;
pub use error::{NodeError, NodeResult};
pub use handlers::{LoginHandler, ObjectHandler, OperationHandler, OperationsRegistry, SignupHandler};
pub use ledger::{LedgerState, ObjectKey, StateTransaction};
pub use manager::BlockManager;
pub use state::BlockchainState;
