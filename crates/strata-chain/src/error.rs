use strata_rules::RulesError;

/// Errors from chain structure operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChainError {
    #[error("a superblock must contain at least one block")]
    EmptySuperblock,

    #[error("block {actual_id} ({hash}) does not extend the chain tip (expected id {expected_id})")]
    OutOfOrder {
        hash: String,
        expected_id: i32,
        actual_id: i32,
    },

    #[error("block {hash} does not link to the tip: expected previous {expected:?}, found {actual:?}")]
    BrokenLink {
        hash: String,
        expected: String,
        actual: String,
    },

    #[error(transparent)]
    Rules(#[from] RulesError),
}

/// Convenience alias for chain results.
pub type ChainResult<T> = Result<T, ChainError>;
