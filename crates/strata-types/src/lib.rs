//! Ledger entities for Strata.
//!
//! This crate holds the value types every other Strata crate passes around.
//! They carry invariants but no chain behavior; hashing, signing and
//! validation live in `strata-rules`.
//!
//! # Key Types
//!
//! - [`Operation`]: a signed, hashed change request with typed header fields
//!   and a side map of extension fields
//! - [`OpObject`]: a ledger object identified by a composite string id
//! - [`Block`]: a sealed batch of operations with a hash-committing header
//!
//! The [`codec`] module provides the deterministic JSON encoding used both
//! for hash preimages and persisted bodies.

pub mod block;
pub mod codec;
pub mod error;
pub mod object;
pub mod operation;

pub use block::{Block, BLOCK_VERSION};
pub use error::EntityError;
pub use object::OpObject;
pub use operation::{OpSignature, Operation, TRANSIENT_FIELDS};
