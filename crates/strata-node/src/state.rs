use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle of the block manager.
///
/// ```text
/// Init -> Ready <-> Paused
/// Ready -> Preparing -> Executing -> Ready
///          Preparing -> Ready            (recoverable failure)
/// Ready -> Executing                     (replication)
///          Executing -> Failed -> Ready  (fatal, manual reset)
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockchainState {
    Init,
    Ready,
    Paused,
    Preparing,
    Executing,
    Failed,
}

impl BlockchainState {
    /// Whether moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(self, next: BlockchainState) -> bool {
        use BlockchainState::*;
        matches!(
            (self, next),
            (Init, Ready)
                | (Ready, Paused)
                | (Paused, Ready)
                | (Ready, Preparing)
                | (Preparing, Ready)
                | (Preparing, Executing)
                | (Ready, Executing)
                | (Executing, Ready)
                | (Executing, Failed)
                | (Failed, Ready)
        )
    }

    /// Whether a block build or replication is in flight.
    pub fn is_busy(self) -> bool {
        matches!(self, Self::Preparing | Self::Executing)
    }
}

impl fmt::Display for BlockchainState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Init => "INIT",
            Self::Ready => "READY",
            Self::Paused => "PAUSED",
            Self::Preparing => "PREPARING",
            Self::Executing => "EXECUTING",
            Self::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use BlockchainState::*;

    #[test]
    fn legal_transitions() {
        assert!(Init.can_transition_to(Ready));
        assert!(Ready.can_transition_to(Preparing));
        assert!(Preparing.can_transition_to(Executing));
        assert!(Executing.can_transition_to(Failed));
        assert!(Failed.can_transition_to(Ready));
    }

    #[test]
    fn illegal_transitions() {
        assert!(!Init.can_transition_to(Preparing));
        assert!(!Paused.can_transition_to(Executing));
        assert!(!Preparing.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Executing));
    }

    #[test]
    fn display_and_serde_names() {
        assert_eq!(Executing.to_string(), "EXECUTING");
        assert!(Preparing.is_busy());
        assert!(!Paused.is_busy());
        let parsed: BlockchainState = toml::from_str::<Wrapper>("state = \"paused\"").unwrap().state;
        assert_eq!(parsed, Paused);
    }

    #[derive(Deserialize)]
    struct Wrapper {
        state: BlockchainState,
    }
}
