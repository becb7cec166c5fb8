//! Search criteria normalization and resolution policy
//!
//! Turns the loose request fields into a trimmed, validated [`SearchCriteria`]
//! and defines [`ResolutionPolicy`], the value object that decides which
//! discriminating fields take part in the remote filter.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};

use crate::errors::{AppError, AppResult};
use crate::message_id::LegacyItemId;
use crate::models::ForwardRequest;

/// Maximum subject length accepted from callers
const MAX_SUBJECT_CHARS: usize = 512;
/// Maximum content snippet length accepted from callers
const MAX_SNIPPET_CHARS: usize = 1_024;
/// Maximum raw recipient list length accepted from callers
const MAX_RECIPIENTS_CHARS: usize = 4_096;

/// Which fields the resolver treats as active
///
/// Subject is always active. The other flags select one of the historical
/// resolution variants without separate code paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolutionPolicy {
    /// Include `receivedDateTime eq ...` in the remote filter when supplied
    pub use_received_at: bool,
    /// Include `contains(body/content, ...)` in the remote filter when supplied
    pub use_content_snippet: bool,
    /// Reject requests that do not carry a receive timestamp
    pub require_received_at: bool,
    /// Try legacy id translation before any metadata search
    pub translate_legacy_id: bool,
}

impl ResolutionPolicy {
    /// Every supported field active, nothing mandatory
    pub const STANDARD: Self = Self {
        use_received_at: true,
        use_content_snippet: true,
        require_received_at: false,
        translate_legacy_id: true,
    };

    /// Subject equality only
    pub const SUBJECT: Self = Self {
        use_received_at: false,
        use_content_snippet: false,
        require_received_at: false,
        translate_legacy_id: true,
    };

    /// Subject plus exact receive time; the timestamp is mandatory
    pub const SUBJECT_TIME: Self = Self {
        use_received_at: true,
        use_content_snippet: false,
        require_received_at: true,
        translate_legacy_id: true,
    };

    /// Subject plus body snippet containment
    pub const SUBJECT_SNIPPET: Self = Self {
        use_received_at: false,
        use_content_snippet: true,
        require_received_at: false,
        translate_legacy_id: true,
    };

    /// Look up a preset by its configuration name
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "standard" => Some(Self::STANDARD),
            "subject" => Some(Self::SUBJECT),
            "subject_time" => Some(Self::SUBJECT_TIME),
            "subject_snippet" => Some(Self::SUBJECT_SNIPPET),
            _ => None,
        }
    }

    /// Enforce fields this policy makes mandatory
    ///
    /// Runs before any other criteria check so the caller gets the specific
    /// reason even when other fields are present.
    pub fn check_required(&self, criteria: &SearchCriteria) -> AppResult<()> {
        if self.require_received_at && criteria.received_at.is_none() {
            return Err(AppError::invalid(
                "received_at is required by the subject_time resolver",
            ));
        }
        Ok(())
    }
}

/// Normalized identifying fields for one resolution call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchCriteria {
    pub subject: Option<String>,
    /// Raw `;`-delimited recipient list; see [`SearchCriteria::expected_recipients`]
    pub recipients: Option<String>,
    pub received_at: Option<DateTime<Utc>>,
    pub content_snippet: Option<String>,
    pub legacy_id: Option<LegacyItemId>,
}

impl SearchCriteria {
    /// Build criteria from an inbound request
    ///
    /// Trims every text field and treats blank values as absent.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for control characters, oversize values, an
    /// unparsable `received_at`, or a malformed legacy id.
    pub fn from_request(request: &ForwardRequest) -> AppResult<Self> {
        let subject = normalize_text(request.subject.as_deref(), "subject", MAX_SUBJECT_CHARS)?;
        let recipients = normalize_text(
            request.recipients.as_deref(),
            "recipients",
            MAX_RECIPIENTS_CHARS,
        )?;
        let content_snippet = normalize_text(
            request.content_snippet.as_deref(),
            "content_snippet",
            MAX_SNIPPET_CHARS,
        )?;
        let received_at = request
            .received_at
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(parse_instant)
            .transpose()?;
        let legacy_id = request
            .legacy_id
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(LegacyItemId::parse)
            .transpose()?;

        Ok(Self {
            subject,
            recipients,
            received_at,
            content_snippet,
            legacy_id,
        })
    }

    /// Whether a field exists that can narrow the mailbox to a few messages
    ///
    /// A receive timestamp or a recipient list alone does not qualify.
    pub fn has_discriminator(&self) -> bool {
        self.subject.is_some() || self.content_snippet.is_some() || self.legacy_id.is_some()
    }

    /// Fail fast when nothing discriminating was supplied
    pub fn ensure_discriminating(&self) -> AppResult<()> {
        if self.has_discriminator() {
            Ok(())
        } else {
            Err(AppError::invalid(
                "insufficient criteria: supply subject, content_snippet, or legacy_id",
            ))
        }
    }

    /// Lowercased expected recipient addresses (empty when none supplied)
    pub fn expected_recipients(&self) -> BTreeSet<String> {
        self.recipients
            .as_deref()
            .map(parse_recipient_list)
            .unwrap_or_default()
    }
}

/// Split a `;`-delimited recipient list into a lowercased address set
///
/// Entries are trimmed and empty entries are dropped, so `" A@x.com ;; b@x.com;"`
/// yields `{a@x.com, b@x.com}`.
pub fn parse_recipient_list(raw: &str) -> BTreeSet<String> {
    raw.split(';')
        .map(|entry| entry.trim().to_lowercase())
        .filter(|entry| !entry.is_empty())
        .collect()
}

/// Parse an ISO-8601 instant and normalize it to UTC
fn parse_instant(raw: &str) -> AppResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| {
            AppError::InvalidInput(format!(
                "invalid received_at '{raw}', expected an ISO-8601 instant such as 2025-03-01T09:30:00Z"
            ))
        })
}

/// Trim, bound, and reject control characters in a caller text field
fn normalize_text(value: Option<&str>, field: &str, max_chars: usize) -> AppResult<Option<String>> {
    let Some(trimmed) = value.map(str::trim).filter(|v| !v.is_empty()) else {
        return Ok(None);
    };
    if trimmed.chars().count() > max_chars {
        return Err(AppError::InvalidInput(format!(
            "{field} must be at most {max_chars} characters"
        )));
    }
    validate_no_controls(trimmed, field)?;
    Ok(Some(trimmed.to_owned()))
}

/// Reject control characters in user-provided values
pub fn validate_no_controls(value: &str, field: &str) -> AppResult<()> {
    if value.chars().any(char::is_control) {
        return Err(AppError::InvalidInput(format!(
            "{field} must not contain control characters"
        )));
    }
    Ok(())
}
