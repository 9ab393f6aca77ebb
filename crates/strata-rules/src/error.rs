use strata_crypto::{HashError, SignatureError};
use strata_types::EntityError;

/// Errors raised by hashing, signing and validation rules.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RulesError {
    #[error("block {block_id}: previous hash mismatch, expected {expected:?}, found {actual:?}")]
    PrevHashMismatch {
        block_id: i32,
        expected: String,
        actual: String,
    },

    #[error("previous block id mismatch: expected {expected}, found {actual}")]
    PrevIdMismatch { expected: i32, actual: i32 },

    #[error("block {0} is already part of the chain")]
    DuplicateBlockHash(String),

    #[error("operation {op} appears more than once in block {block_id}")]
    DuplicateOperation { block_id: i32, op: String },

    #[error("operation {op}: {signatures} signatures but {signed_by} signers")]
    SignatureCountMismatch {
        op: String,
        signatures: usize,
        signed_by: usize,
    },

    #[error("operation {op} is not signed")]
    Unsigned { op: String },

    #[error("signer {signer:?} of {hash} cannot be resolved to a public key")]
    UnresolvedSigner { hash: String, signer: String },

    #[error("signature by {signer:?} over {hash} does not verify")]
    BadSignature { hash: String, signer: String },

    #[error("identity {signer:?} has malformed key material: {reason}")]
    BadKeyMaterial { signer: String, reason: String },

    #[error("{what} mismatch: stored {expected:?}, computed {computed:?}")]
    HashMismatch {
        what: &'static str,
        expected: String,
        computed: String,
    },

    #[error("unsupported block version {actual}, expected {expected}")]
    UnsupportedVersion { expected: i32, actual: i32 },

    #[error("block {0} contains no operations")]
    EmptyBlock(i32),

    #[error("invalid nickname {name:?}: {reason}")]
    InvalidNickname { name: String, reason: String },

    #[error(transparent)]
    Hash(#[from] HashError),

    #[error(transparent)]
    Entity(#[from] EntityError),

    #[error(transparent)]
    Signature(#[from] SignatureError),
}

impl RulesError {
    /// Whether this is a structural linkage error (fatal to the block).
    pub fn is_linkage(&self) -> bool {
        matches!(
            self,
            Self::PrevHashMismatch { .. }
                | Self::PrevIdMismatch { .. }
                | Self::DuplicateBlockHash(_)
                | Self::DuplicateOperation { .. }
        )
    }
}

/// Convenience alias for rules results.
pub type RulesResult<T> = Result<T, RulesError>;
