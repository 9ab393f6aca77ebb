//! Identity-name rules.
//!
//! A nickname is non-empty and consists of letters, digits and the symbols
//! in [`NICKNAME_SYMBOLS`]. A signer reference is either a bare nickname or
//! `nickname:site`, so [`USER_SEPARATOR`] is never allowed in a nickname.

use crate::error::{RulesError, RulesResult};

/// Separator between nickname and site in a signer reference.
pub const USER_SEPARATOR: char = ':';

/// Non-alphanumeric characters permitted in a nickname.
pub const NICKNAME_SYMBOLS: &[char] = &[' ', '$', '_', '.', '-'];

/// Validate a nickname, returning `Ok(())` if valid.
pub fn validate_nickname(name: &str) -> RulesResult<()> {
    if name.trim().is_empty() {
        return Err(RulesError::InvalidNickname {
            name: name.to_string(),
            reason: "nickname must not be blank".into(),
        });
    }

    if let Some(ch) = name
        .chars()
        .find(|c| !c.is_alphanumeric() && !NICKNAME_SYMBOLS.contains(c))
    {
        return Err(RulesError::InvalidNickname {
            name: name.to_string(),
            reason: format!("contains forbidden character: {ch:?}"),
        });
    }

    Ok(())
}

/// Nickname part of a signer reference.
pub fn nickname_of(user: &str) -> &str {
    user.split_once(USER_SEPARATOR).map_or(user, |(nick, _)| nick)
}

/// Site part of a signer reference, if any.
pub fn site_of(user: &str) -> Option<&str> {
    user.split_once(USER_SEPARATOR).map(|(_, site)| site)
}

/// Build a `nickname:site` signer reference.
pub fn join_user(nickname: &str, site: &str) -> String {
    format!("{nickname}{USER_SEPARATOR}{site}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_nicknames() {
        for name in ["alice", "Bob Smith", "$rich_guy.1-2", "Жанна", "x"] {
            assert!(validate_nickname(name).is_ok(), "{name:?} should be valid");
        }
    }

    #[test]
    fn invalid_nicknames() {
        for name in ["", "   ", "alice:web", "a/b", "tab\there", "emoji😀"] {
            assert!(validate_nickname(name).is_err(), "{name:?} should be invalid");
        }
    }

    #[test]
    fn separator_error_names_the_character() {
        let err = validate_nickname("alice:web").unwrap_err();
        assert!(err.to_string().contains("':'"));
    }

    #[test]
    fn split_and_join() {
        assert_eq!(nickname_of("alice:web"), "alice");
        assert_eq!(site_of("alice:web"), Some("web"));
        assert_eq!(nickname_of("alice"), "alice");
        assert_eq!(site_of("alice"), None);
        assert_eq!(join_user("alice", "web"), "alice:web");
    }
}
