//! Cryptographic primitives for Strata.
//!
//! Provides SHA-256 content hashing with `algo:hex` formatted digests,
//! binary merkle trees with inclusion proofs, and Ed25519 signing and
//! verification with seed-derived key pairs.
//!
//! All crypto operations wrap established libraries; there is no custom cryptography.

pub mod hasher;
pub mod merkle;
pub mod signer;

pub use hasher::{hash_bytes, ContentHasher, HashError};
pub use merkle::{MerkleProof, MerkleTree, Side};
pub use signer::{Signature, SignatureError, SigningKey, VerifyingKey, SIGNATURE_ALGO};
