//! Coarse remote filter construction
//!
//! Translates [`SearchCriteria`] into an OData `$filter` expression. Only
//! predicates the backend evaluates exactly are emitted (subject equality,
//! receive-time equality, body containment); everything else is left to local
//! validation in the resolver.

use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};

use crate::criteria::{ResolutionPolicy, SearchCriteria, validate_no_controls};
use crate::errors::{AppError, AppResult};

/// Upper bound on candidates fetched per resolution
pub const CANDIDATE_LIMIT: usize = 10;

/// Fields requested for each candidate
pub const CANDIDATE_SELECT: &str = "id,receivedDateTime,subject,toRecipients,ccRecipients";

/// Conjunctive OData filter
///
/// Clauses render joined by ` and `; there is no way to build an `or`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ODataFilter {
    clauses: Vec<String>,
}

impl ODataFilter {
    /// Build the strictest filter the criteria and policy allow
    ///
    /// Recipients never contribute a clause: the backend cannot match a full
    /// recipient set.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` when no active field produced a clause, or when a
    /// value contains control characters.
    pub fn build(criteria: &SearchCriteria, policy: &ResolutionPolicy) -> AppResult<Self> {
        let mut clauses = Vec::new();
        if let Some(subject) = &criteria.subject {
            clauses.push(format!("subject eq '{}'", escape_literal(subject)?));
        }
        if policy.use_received_at
            && let Some(received_at) = criteria.received_at
        {
            clauses.push(format!("receivedDateTime eq {}", format_instant(received_at)));
        }
        if policy.use_content_snippet
            && let Some(snippet) = &criteria.content_snippet
        {
            clauses.push(format!("contains(body/content,'{}')", escape_literal(snippet)?));
        }

        if clauses.is_empty() {
            return Err(AppError::invalid(
                "insufficient criteria: no active search field was supplied",
            ));
        }
        Ok(Self { clauses })
    }

    pub fn clauses(&self) -> &[String] {
        &self.clauses
    }
}

impl fmt::Display for ODataFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.clauses.join(" and "))
    }
}

/// Escape a value for an OData single-quoted string literal
///
/// Trims surrounding whitespace, then doubles every `'`.
pub fn escape_literal(value: &str) -> AppResult<String> {
    let trimmed = value.trim();
    validate_no_controls(trimmed, "search value")?;
    Ok(trimmed.replace('\'', "''"))
}

/// Render an instant as an unquoted OData `DateTimeOffset` literal
fn format_instant(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}
