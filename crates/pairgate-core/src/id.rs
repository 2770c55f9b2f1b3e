use crate::{PairgateError, PairgateResult};
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Suffix the messaging network appends to one-to-one contact chats.
pub const CONTACT_SUFFIX: &str = "@c.us";

const MAX_SESSION_ID_LEN: usize = 64;
const MAX_PHONE_DIGITS: usize = 15;

/// Identifier of one chat session.
///
/// The identifier doubles as the name of the session's credential directory,
/// so it is restricted to ASCII alphanumerics, `-` and `_`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionId(String);

impl SessionId {
    /// Validate a caller-supplied identifier.
    pub fn parse(raw: impl Into<String>) -> PairgateResult<Self> {
        let raw = raw.into();
        if raw.is_empty() {
            return Err(PairgateError::InvalidArgument(
                "session id must not be empty".into(),
            ));
        }
        if raw.len() > MAX_SESSION_ID_LEN {
            return Err(PairgateError::InvalidArgument(format!(
                "session id longer than {MAX_SESSION_ID_LEN} characters"
            )));
        }
        if !raw
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(PairgateError::InvalidArgument(format!(
                "session id '{raw}' may only contain letters, digits, '-' and '_'"
            )));
        }
        Ok(Self(raw))
    }

    /// Generate a fresh random identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Borrow the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SessionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for SessionId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl FromStr for SessionId {
    type Err = PairgateError;

    fn from_str(s: &str) -> PairgateResult<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for SessionId {
    type Error = PairgateError;

    fn try_from(value: String) -> PairgateResult<Self> {
        Self::parse(value)
    }
}

impl From<SessionId> for String {
    fn from(id: SessionId) -> Self {
        id.0
    }
}

/// Chat identifier in the transport's internal format.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatId(String);

impl ChatId {
    /// Normalize a caller-supplied recipient.
    ///
    /// Identifiers that already carry a `@` suffix are accepted unchanged as
    /// long as they have the `local@server` shape: one `@`, both sides
    /// non-empty, no whitespace. Anything else is treated as an international phone number: spaces and
    /// a leading `+` are stripped and [`CONTACT_SUFFIX`] is appended.
    pub fn normalize(raw: &str) -> PairgateResult<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(PairgateError::InvalidArgument(
                "chat id must not be empty".into(),
            ));
        }

        if let Some((local, server)) = trimmed.split_once('@') {
            let well_formed = !local.is_empty()
                && !server.is_empty()
                && !server.contains('@')
                && !trimmed.chars().any(char::is_whitespace);
            if !well_formed {
                return Err(PairgateError::InvalidArgument(format!(
                    "'{raw}' is not a chat id of the form <user>@<server>"
                )));
            }
            return Ok(Self(trimmed.to_string()));
        }

        let compact: String = trimmed.chars().filter(|c| !c.is_whitespace()).collect();
        let digits = compact.strip_prefix('+').unwrap_or(&compact);

        if digits.is_empty()
            || digits.len() > MAX_PHONE_DIGITS
            || !digits.chars().all(|c| c.is_ascii_digit())
        {
            return Err(PairgateError::InvalidArgument(format!(
                "'{raw}' is not a phone number in international format"
            )));
        }

        Ok(Self(format!("{digits}{CONTACT_SUFFIX}")))
    }

    /// Borrow the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_accepts_plain_names() {
        assert_eq!(SessionId::parse("alice").unwrap().as_str(), "alice");
        assert!(SessionId::parse("user_42-b").is_ok());
    }

    #[test]
    fn test_session_id_rejects_path_tricks() {
        for bad in ["", "..", "a/b", "a\\b", ".hidden", "has space"] {
            assert!(
                matches!(SessionId::parse(bad), Err(PairgateError::InvalidArgument(_))),
                "{bad:?} should be rejected"
            );
        }
        assert!(SessionId::parse("x".repeat(65)).is_err());
    }

    #[test]
    fn test_generated_ids_are_valid_and_distinct() {
        let a = SessionId::generate();
        let b = SessionId::generate();
        assert_ne!(a, b);
        assert!(SessionId::parse(a.as_str()).is_ok());
    }

    #[test]
    fn test_session_id_serde_validates() {
        let id: SessionId = serde_json::from_str("\"alice\"").unwrap();
        assert_eq!(id.as_str(), "alice");
        assert!(serde_json::from_str::<SessionId>("\"../etc\"").is_err());
    }

    #[test]
    fn test_phone_and_suffixed_forms_match() {
        let from_phone = ChatId::normalize("+39 333 1234567").unwrap();
        let suffixed = ChatId::normalize("393331234567@c.us").unwrap();
        assert_eq!(from_phone, suffixed);
        assert_eq!(from_phone.as_str(), "393331234567@c.us");
    }

    #[test]
    fn test_plus_decoded_as_space() {
        let id = ChatId::normalize(" 39 333 1234567").unwrap();
        assert_eq!(id.as_str(), "393331234567@c.us");
    }

    #[test]
    fn test_group_ids_pass_through() {
        let id = ChatId::normalize("123456-789@g.us").unwrap();
        assert_eq!(id.as_str(), "123456-789@g.us");
    }

    #[test]
    fn test_malformed_suffixed_ids() {
        for bad in ["@", "foo bar@c.us", "foo bar@", "393@", "@c.us", "39@c.us@g.us", "39@c. us"] {
            assert!(
                matches!(ChatId::normalize(bad), Err(PairgateError::InvalidArgument(_))),
                "{bad:?} should be rejected"
            );
        }
        assert_eq!(ChatId::normalize(" 393@c.us ").unwrap().as_str(), "393@c.us");
    }

    #[test]
    fn test_invalid_chat_ids() {
        for bad in ["", "   ", "+", "call me", "+39-333", "1234567890123456"] {
            assert!(
                matches!(ChatId::normalize(bad), Err(PairgateError::InvalidArgument(_))),
                "{bad:?} should be rejected"
            );
        }
    }
}
