//! Signature resolution and structural block validation.

use std::collections::HashSet;

use strata_crypto::{hash_bytes, Signature, VerifyingKey, SIGNATURE_ALGO};
use strata_types::{Block, OpObject, OpSignature, Operation, BLOCK_VERSION};
use tracing::debug;

use crate::error::{RulesError, RulesResult};
use crate::hashing::{hash_block, merkle_tree_hash, sig_merkle_tree_hash};
use crate::names::{nickname_of, site_of};
use crate::{F_ALGO, F_PUBKEY, OP_SIGNUP};

/// Read access to identity material.
///
/// Implemented by the active-user index; lookups return the current signup
/// or the most recent login for a site.
pub trait AuthLookup {
    /// The signup object registered for `nickname`.
    fn signup(&self, nickname: &str) -> Option<OpObject>;

    /// The latest login object for `nickname` on `site`.
    fn login(&self, nickname: &str, site: &str) -> Option<OpObject>;
}

/// Read access to chain membership.
pub trait ChainView {
    /// Whether a block with this hash is already part of the chain.
    fn contains_block(&self, hash: &str) -> bool;
}

/// Resolve a signer reference to its public key.
///
/// `nickname:site` resolves through the latest login for that site; a bare
/// nickname resolves through its signup.
pub fn resolve_signer_key(
    users: &impl AuthLookup,
    signer: &str,
    hash: &str,
) -> RulesResult<VerifyingKey> {
    let object = match site_of(signer) {
        Some(site) => users.login(nickname_of(signer), site),
        None => users.signup(signer),
    };
    let object = object.ok_or_else(|| RulesError::UnresolvedSigner {
        hash: hash.to_string(),
        signer: signer.to_string(),
    })?;
    key_from_object(&object, signer)
}

fn key_from_object(object: &OpObject, signer: &str) -> RulesResult<VerifyingKey> {
    let bad = |reason: String| RulesError::BadKeyMaterial {
        signer: signer.to_string(),
        reason,
    };
    if let Some(algo) = object.field_str(F_ALGO) {
        if algo != SIGNATURE_ALGO {
            return Err(bad(format!("unsupported key algorithm {algo:?}")));
        }
    }
    let pubkey = object
        .field_str(F_PUBKEY)
        .ok_or_else(|| bad("missing pubkey".into()))?;
    VerifyingKey::from_hex(pubkey).map_err(|e| bad(e.to_string()))
}

fn verify_one(
    key: &VerifyingKey,
    message: &[u8],
    signature: &OpSignature,
    hash: &str,
    signer: &str,
) -> RulesResult<()> {
    let bad = || RulesError::BadSignature {
        hash: hash.to_string(),
        signer: signer.to_string(),
    };
    if signature.algo != SIGNATURE_ALGO {
        return Err(bad());
    }
    let signature = Signature::from_hex(&signature.digest).map_err(|_| bad())?;
    key.verify(message, &signature).map_err(|_| bad())
}

/// Check every signature of an operation against its signer's key.
///
/// A signup that creates exactly one identity which does not exist yet may
/// be signed by that identity itself, using the key embedded in the new
/// object. All other signers must already be known to `users`.
pub fn validate_signatures(users: &impl AuthLookup, op: &Operation) -> RulesResult<()> {
    if op.signature.len() != op.signed_by.len() {
        return Err(RulesError::SignatureCountMismatch {
            op: op.hash.clone(),
            signatures: op.signature.len(),
            signed_by: op.signed_by.len(),
        });
    }
    if op.signature.is_empty() {
        return Err(RulesError::Unsigned { op: op.hash.clone() });
    }

    let self_signup = match op.new.as_slice() {
        [object] if op.op_type == OP_SIGNUP => object
            .name()
            .filter(|name| users.signup(name).is_none())
            .map(|name| (name, object)),
        _ => None,
    };

    let message = hash_bytes(&op.hash)?;
    for (signature, signer) in op.signature.iter().zip(&op.signed_by) {
        let key = match self_signup {
            Some((name, object)) if name == signer => {
                debug!(op = %op.hash, signer = %signer, "self-signed signup");
                key_from_object(object, signer)?
            }
            _ => resolve_signer_key(users, signer, &op.hash)?,
        };
        verify_one(&key, &message, signature, &op.hash, signer)?;
    }
    Ok(())
}

/// Check that `block` extends `prev` and is not already on the chain.
///
/// A block without a predecessor must be a genesis block (id 0, empty
/// previous hash). Operation hashes must be unique within the block.
pub fn validate_block_linkage(
    chain: &impl ChainView,
    block: &Block,
    prev: Option<&Block>,
) -> RulesResult<()> {
    let (expected_hash, expected_id) = match prev {
        Some(p) => (p.hash.as_str(), p.block_id + 1),
        None => ("", 0),
    };
    if block.prev_block_hash != expected_hash {
        return Err(RulesError::PrevHashMismatch {
            block_id: block.block_id,
            expected: expected_hash.to_string(),
            actual: block.prev_block_hash.clone(),
        });
    }
    if block.block_id != expected_id {
        return Err(RulesError::PrevIdMismatch {
            expected: expected_id,
            actual: block.block_id,
        });
    }
    if chain.contains_block(&block.hash) {
        return Err(RulesError::DuplicateBlockHash(block.hash.clone()));
    }

    let mut seen = HashSet::with_capacity(block.ops.len());
    for hash in block.operation_hashes() {
        if !seen.insert(hash) {
            return Err(RulesError::DuplicateOperation {
                block_id: block.block_id,
                op: hash.to_string(),
            });
        }
    }
    Ok(())
}

/// Full validation of a sealed block.
///
/// Checks, in order: header version, the empty-block policy, both merkle
/// roots, the header hash, linkage against `prev`, and finally the block
/// signature against the key of `signed_by` as known to `users`.
pub fn validate_block(
    chain: &impl ChainView,
    users: &impl AuthLookup,
    block: &Block,
    prev: Option<&Block>,
    allow_empty: bool,
) -> RulesResult<()> {
    if block.version != BLOCK_VERSION {
        return Err(RulesError::UnsupportedVersion {
            expected: BLOCK_VERSION,
            actual: block.version,
        });
    }
    if block.ops.is_empty() && !allow_empty {
        return Err(RulesError::EmptyBlock(block.block_id));
    }

    let checks = [
        ("merkle tree hash", &block.merkle_tree_hash, merkle_tree_hash(&block.ops)?),
        (
            "signature merkle tree hash",
            &block.sig_merkle_tree_hash,
            sig_merkle_tree_hash(&block.ops)?,
        ),
        ("block hash", &block.hash, hash_block(block)?),
    ];
    for (what, stored, computed) in checks {
        if *stored != computed {
            return Err(RulesError::HashMismatch {
                what,
                expected: stored.clone(),
                computed,
            });
        }
    }

    validate_block_linkage(chain, block, prev)?;

    let signature = block.signature.as_ref().ok_or_else(|| RulesError::Unsigned {
        op: block.hash.clone(),
    })?;
    let key = resolve_signer_key(users, &block.signed_by, &block.hash)?;
    verify_one(
        &key,
        &hash_bytes(&block.hash)?,
        signature,
        &block.hash,
        &block.signed_by,
    )
}
