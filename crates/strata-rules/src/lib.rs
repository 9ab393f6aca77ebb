//! Blockchain rules for Strata.
//!
//! Everything here is a pure function of its inputs: operation and block
//! hashing, merkle roots, signing, signature resolution against an
//! [`AuthLookup`], structural linkage checks against a [`ChainView`], and
//! identity-name rules. The functions hold no state and are safe to call
//! from any number of threads.

pub mod error;
pub mod hashing;
pub mod names;
pub mod signing;
pub mod validation;

pub use error::{RulesError, RulesResult};
pub use hashing::{
    hash_block, hash_operation, merkle_tree_hash, sig_merkle_tree_hash, superblock_hash,
    validate_hash,
};
pub use names::{join_user, nickname_of, site_of, validate_nickname, USER_SEPARATOR};
pub use signing::{sign_block, sign_operation};
pub use validation::{
    resolve_signer_key, validate_block, validate_block_linkage, validate_signatures, AuthLookup,
    ChainView,
};

/// Operation type that registers a new identity.
pub const OP_SIGNUP: &str = "sys.signup";
/// Operation type that attaches a site-specific login key to an identity.
pub const OP_LOGIN: &str = "sys.login";

/// Identity object field holding the hex public key.
pub const F_PUBKEY: &str = "pubkey";
/// Identity object field holding the key algorithm.
pub const F_ALGO: &str = "algo";

/// Whether an operation type carries authentication material.
pub fn is_auth_operation(op_type: &str) -> bool {
    op_type == OP_SIGNUP || op_type == OP_LOGIN
}
