//! Active-user index for Strata.
//!
//! Maps identity names to their current signup and ordered logins. Layers
//! stack through explicit parent references: the node keeps a `block` layer
//! (state as of the last committed block) and a `queue` layer on top of it
//! for identities introduced by queued operations. Short-lived staging
//! layers are stacked on the block layer while a block is validated or
//! executed and are either committed into their parent or dropped.

pub mod error;
pub mod index;

pub use error::UsersError;
pub use index::{ActiveUser, ActiveUsers, AuthRecord};
