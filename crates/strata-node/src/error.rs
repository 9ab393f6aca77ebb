use std::fmt;

use strata_chain::ChainError;
use strata_consensus::ConsensusError;
use strata_rules::RulesError;
use strata_types::EntityError;
use strata_users::UsersError;

use crate::state::BlockchainState;

/// Errors raised by the block manager and its collaborators.
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error("block manager is {actual}, expected {expected}")]
    InvalidState {
        expected: BlockchainState,
        actual: BlockchainState,
    },

    #[error("no handler registered for operation type {0:?}")]
    UnknownOperationType(String),

    #[error("operation {op} is invalid: {reason}")]
    InvalidOperation { op: String, reason: String },

    #[error("operation {op} is {size} bytes, limit is {limit}")]
    OperationTooLarge { op: String, size: usize, limit: usize },

    #[error("operation {0} is already queued or on the chain")]
    DuplicateOperation(String),

    #[error("object {op_type}/{id:?} already exists")]
    ObjectExists { op_type: String, id: Vec<String> },

    #[error("object {op_type}/{id:?} does not exist")]
    ObjectMissing { op_type: String, id: Vec<String> },

    #[error("no block producer configured: {0}")]
    NoProducer(String),

    #[error("block {block} failed to execute: {source}")]
    Execution {
        block: String,
        #[source]
        source: Box<NodeError>,
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Rules(#[from] RulesError),

    #[error(transparent)]
    Users(#[from] UsersError),

    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error(transparent)]
    Consensus(#[from] ConsensusError),

    #[error(transparent)]
    Entity(#[from] EntityError),
}

impl NodeError {
    /// Shorthand for [`NodeError::InvalidOperation`].
    pub fn invalid(op: &str, reason: impl Into<String>) -> Self {
        Self::InvalidOperation {
            op: op.to_string(),
            reason: reason.into(),
        }
    }

    /// Whether the error came out of the execution phase.
    pub fn is_execution(&self) -> bool {
        matches!(self, Self::Execution { .. })
    }
}

impl PartialEq for NodeError {
    fn eq(&self, other: &Self) -> bool {
        // Compare by display representation for test convenience.
        fmt::format(format_args!("{self}")) == fmt::format(format_args!("{other}"))
    }
}

/// Convenience alias for node results.
pub type NodeResult<T> = Result<T, NodeError>;
