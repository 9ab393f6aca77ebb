use strata_crypto::{hash_bytes, SigningKey, SIGNATURE_ALGO};
use strata_types::{Block, OpSignature, Operation, BLOCK_VERSION};

use crate::error::RulesResult;
use crate::hashing::{hash_block, hash_operation, merkle_tree_hash, sig_merkle_tree_hash};

/// Set the signers of an operation, assign its hash and sign it.
///
/// `signers` pairs a signer reference (`nickname` or `nickname:site`) with
/// the key that signs for it. Existing signatures are replaced.
pub fn sign_operation(op: &mut Operation, signers: &[(&str, &SigningKey)]) -> RulesResult<()> {
    op.signed_by = signers.iter().map(|(name, _)| name.to_string()).collect();
    op.signature.clear();
    op.hash = hash_operation(op)?;
    let message = hash_bytes(&op.hash)?;
    op.signature = signers
        .iter()
        .map(|(_, key)| OpSignature::new(SIGNATURE_ALGO, key.sign(&message).to_hex()))
        .collect();
    Ok(())
}

/// Seal a prepared block on top of `prev` (or as genesis when `prev` is
/// `None`): fill in linkage and merkle roots, hash the header and sign it.
pub fn sign_block(
    block: &mut Block,
    prev: Option<&Block>,
    signer: &str,
    key: &SigningKey,
) -> RulesResult<()> {
    block.version = BLOCK_VERSION;
    block.block_id = prev.map_or(0, |p| p.block_id + 1);
    block.prev_block_hash = prev.map(|p| p.hash.clone()).unwrap_or_default();
    block.merkle_tree_hash = merkle_tree_hash(&block.ops)?;
    block.sig_merkle_tree_hash = sig_merkle_tree_hash(&block.ops)?;
    block.signed_by = signer.to_string();
    block.hash = hash_block(block)?;
    let signature = key.sign(&hash_bytes(&block.hash)?);
    block.signature = Some(OpSignature::new(SIGNATURE_ALGO, signature.to_hex()));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hashing::validate_hash;
    use strata_crypto::Signature;

    #[test]
    fn signed_operation_has_parallel_lists() {
        let k1 = SigningKey::derive_from_seed(b"a");
        let k2 = SigningKey::derive_from_seed(b"b");
        let mut op = Operation::new("place");
        sign_operation(&mut op, &[("alice", &k1), ("bob:web", &k2)]).unwrap();

        assert_eq!(op.signed_by, vec!["alice", "bob:web"]);
        assert_eq!(op.signature.len(), 2);
        assert!(validate_hash(&op).is_ok());

        let message = hash_bytes(&op.hash).unwrap();
        let sig = Signature::from_hex(&op.signature[1].digest).unwrap();
        assert!(k2.verifying_key().verify(&message, &sig).is_ok());
    }

    #[test]
    fn resigning_replaces_signatures() {
        let key = SigningKey::derive_from_seed(b"a");
        let mut op = Operation::new("place");
        sign_operation(&mut op, &[("alice", &key)]).unwrap();
        sign_operation(&mut op, &[("alice", &key)]).unwrap();
        assert_eq!(op.signature.len(), 1);
    }

    #[test]
    fn sealed_block_links_to_previous() {
        let key = SigningKey::derive_from_seed(b"server");
        let mut genesis = Block::prepare(Vec::new());
        sign_block(&mut genesis, None, "server", &key).unwrap();
        assert_eq!(genesis.block_id, 0);
        assert!(genesis.prev_block_hash.is_empty());
        assert!(genesis.is_sealed());

        let mut next = Block::prepare(Vec::new());
        sign_block(&mut next, Some(&genesis), "server", &key).unwrap();
        assert_eq!(next.block_id, 1);
        assert_eq!(next.prev_block_hash, genesis.hash);
        assert_eq!(next.hash, hash_block(&next).unwrap());

        let sig = Signature::from_hex(&next.signature.as_ref().unwrap().digest).unwrap();
        let message = hash_bytes(&next.hash).unwrap();
        assert!(key.verifying_key().verify(&message, &sig).is_ok());
    }
}
