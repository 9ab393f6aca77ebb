//! Deterministic hashing of operations, blocks and superblocks.
//!
//! Every function here must stay bit-compatible across nodes: any change to
//! a preimage layout changes every hash on the chain.

use serde_json::Value;
use strata_crypto::{hash_bytes, ContentHasher, MerkleTree};
use strata_types::{codec, Block, Operation, TRANSIENT_FIELDS};

use crate::error::{RulesError, RulesResult};

/// Message-type tag prefixed to operation hashes.
pub const JSON_MSG_TYPE: &str = "json";

/// Content hash of an operation.
///
/// The preimage is the canonical JSON of the operation without its `hash`,
/// its `signature` list and any transient field, so assigning the hash or
/// adding signatures never changes it.
pub fn hash_operation(op: &Operation) -> RulesResult<String> {
    let mut value = codec::to_value(op)?;
    if let Value::Object(map) = &mut value {
        map.remove("hash");
        map.remove("signature");
        for key in TRANSIENT_FIELDS {
            map.remove(*key);
        }
    }
    let bytes = codec::value_bytes(&value)?;
    Ok(format!("{JSON_MSG_TYPE}:{}", ContentHasher::SHA256.hash(&bytes)))
}

/// Recompute an operation's hash and compare it with the stored one.
pub fn validate_hash(op: &Operation) -> RulesResult<()> {
    let computed = hash_operation(op)?;
    if computed != op.hash {
        return Err(RulesError::HashMismatch {
            what: "operation hash",
            expected: op.hash.clone(),
            computed,
        });
    }
    Ok(())
}

/// Merkle root over the operation hashes of a block.
pub fn merkle_tree_hash(ops: &[Operation]) -> RulesResult<String> {
    let leaves = ops
        .iter()
        .map(|op| hash_bytes(&op.hash))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(MerkleTree::from_leaves(leaves).root_hash())
}

/// Merkle root over each operation's concatenated raw signature bytes.
pub fn sig_merkle_tree_hash(ops: &[Operation]) -> RulesResult<String> {
    let mut leaves = Vec::with_capacity(ops.len());
    for op in ops {
        let mut leaf = Vec::new();
        for sig in &op.signature {
            let bytes = hex::decode(&sig.digest).map_err(|e| RulesError::BadKeyMaterial {
                signer: op.signed_by.join(","),
                reason: format!("signature digest is not hex: {e}"),
            })?;
            leaf.extend_from_slice(&bytes);
        }
        leaves.push(leaf);
    }
    Ok(MerkleTree::from_leaves(leaves).root_hash())
}

/// Hash of a block header.
///
/// Layout (big-endian): `i32 version`, `i32 block_id`, prev-hash bytes,
/// `i64 date millis`, merkle bytes, signature-merkle bytes, `i64 extra`,
/// UTF-8 details. `signed_by` and the signature are not covered.
pub fn hash_block(block: &Block) -> RulesResult<String> {
    let mut buf = Vec::with_capacity(160 + block.details.len());
    buf.extend_from_slice(&block.version.to_be_bytes());
    buf.extend_from_slice(&block.block_id.to_be_bytes());
    buf.extend_from_slice(&hash_bytes(&block.prev_block_hash)?);
    buf.extend_from_slice(&block.date.timestamp_millis().to_be_bytes());
    buf.extend_from_slice(&hash_bytes(&block.merkle_tree_hash)?);
    buf.extend_from_slice(&hash_bytes(&block.sig_merkle_tree_hash)?);
    buf.extend_from_slice(&block.extra.to_be_bytes());
    buf.extend_from_slice(block.details.as_bytes());
    Ok(ContentHasher::SHA256.hash(&buf))
}

/// Hash identifying a sealed batch of `count` blocks ending at `last_block_hash`.
pub fn superblock_hash(count: usize, last_block_hash: &str) -> RulesResult<String> {
    let count = count as u64;
    let last = hash_bytes(last_block_hash)?;
    let digest = ContentHasher::SHA256.digest_parts(&[&count.to_be_bytes(), &last]);
    Ok(ContentHasher::SHA256.format(&digest))
}
