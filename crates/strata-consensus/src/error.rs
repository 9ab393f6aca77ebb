use strata_chain::ChainError;
use strata_rules::RulesError;
use strata_store::StoreError;
use strata_types::EntityError;

/// Errors raised while reconciling, persisting or compacting the chain.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConsensusError {
    #[error("block {block} references unknown parent {parent}")]
    MissingParent { block: String, parent: String },

    #[error("block {0} is already in the block tree")]
    DuplicateBlock(String),

    #[error("selected tip {tip} does not descend from the last sealed block {sealed}")]
    TipMissesSealedChain { tip: String, sealed: String },

    #[error("superblock mismatch: durable {durable:?}, in memory {in_memory:?}")]
    SuperblockMismatch { durable: String, in_memory: String },

    #[error("superblock {superblock} is inconsistent: {reason}")]
    InconsistentSuperblock { superblock: String, reason: String },

    #[error("block {0} is not the newest unsealed block and cannot be discarded")]
    NotDiscardable(String),

    #[error("body of block {0} is missing from the store")]
    MissingBody(String),

    #[error("stored block {stored} decodes to a block with hash {decoded}")]
    BodyHashMismatch { stored: String, decoded: String },

    #[error("consensus state lock poisoned")]
    LockPoisoned,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Rules(#[from] RulesError),

    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error(transparent)]
    Entity(#[from] EntityError),
}

/// Convenience alias for consensus results.
pub type ConsensusResult<T> = Result<T, ConsensusError>;
