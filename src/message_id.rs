//! Backend message identifiers
//!
//! Graph REST ids and legacy (EWS) item ids are opaque base64-like strings.
//! They may contain `/`, `+` and `=`, so every id is percent-encoded before
//! it is placed in a URL path.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::{AppError, AppResult};

/// Longest id accepted; real ids are well under this
const MAX_ID_LEN: usize = 1_024;

/// Native (REST) message identifier assigned by the mail backend
///
/// # Example
///
/// ```
/// let id = MessageId::parse("AAMkAGI2TAAA=")?;
/// assert_eq!(id.path_segment(), "AAMkAGI2TAAA%3D");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    /// Validate a backend-supplied identifier
    ///
    /// Returns error if the id is empty, oversize, or contains whitespace or
    /// control characters.
    pub fn parse(raw: &str) -> AppResult<Self> {
        validate_opaque_id(raw, "message id")?;
        Ok(Self(raw.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Percent-encoded form for use as a single URL path segment
    pub fn path_segment(&self) -> String {
        urlencoding::encode(&self.0).into_owned()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier from the older addressing scheme (EWS item id)
///
/// Only meaningful as input to the backend's id translation call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyItemId(String);

impl LegacyItemId {
    pub fn parse(raw: &str) -> AppResult<Self> {
        validate_opaque_id(raw, "legacy_id")?;
        Ok(Self(raw.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn validate_opaque_id(raw: &str, field: &str) -> AppResult<()> {
    if raw.is_empty() || raw.len() > MAX_ID_LEN {
        return Err(AppError::InvalidInput(format!(
            "{field} must be 1..{MAX_ID_LEN} characters"
        )));
    }
    if raw.chars().any(|ch| ch.is_control() || ch.is_whitespace()) {
        return Err(AppError::InvalidInput(format!(
            "{field} must not contain whitespace or control characters"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{LegacyItemId, MessageId};

    #[test]
    fn encodes_reserved_characters_in_path_segment() {
        let id = MessageId::parse("AAMk/AGI+2T==").expect("parse succeeds");
        assert_eq!(id.as_str(), "AAMk/AGI+2T==");
        assert_eq!(id.path_segment(), "AAMk%2FAGI%2B2T%3D%3D");
        assert_eq!(id.to_string(), "AAMk/AGI+2T==");
    }

    #[test]
    fn rejects_empty_and_whitespace_ids() {
        let err = MessageId::parse("").expect_err("must fail");
        assert!(err.to_string().contains("1..1024"));

        let err = LegacyItemId::parse("AAMk AGI").expect_err("must fail");
        assert!(err.to_string().contains("legacy_id must not contain whitespace"));
    }

    #[test]
    fn serializes_transparently() {
        let id = MessageId::parse("AAMk1").expect("parse succeeds");
        assert_eq!(serde_json::to_string(&id).expect("serializes"), "\"AAMk1\"");
    }
}
