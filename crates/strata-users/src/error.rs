/// Errors from active-user index mutations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UsersError {
    #[error("identity {0:?} is already signed up")]
    AlreadySignedUp(String),

    #[error("identity {name:?} must sign up before logging in (operation {op})")]
    NotSignedUp { name: String, op: String },

    #[error("operation {op} is not a well-formed auth operation: {reason}")]
    MalformedAuthOperation { op: String, reason: String },

    #[error("layer has no parent to commit into")]
    NoParent,
}
