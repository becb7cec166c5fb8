//! Request/response DTOs and backend-neutral mail types
//!
//! The HTTP layer deserializes [`ForwardRequest`] and serializes
//! [`ResponseEnvelope`]. The resolver and orchestrator work on the mail types
//! defined here, which the backend client fills from its wire format.

use std::collections::BTreeSet;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::message_id::MessageId;

/// Metadata included in every response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Meta {
    /// Current UTC timestamp in RFC 3339 format with milliseconds
    pub now_utc: String,
    /// Request handling duration in milliseconds
    pub duration_ms: u64,
    /// Correlation id, also sent to the backend as `client-request-id`
    pub request_id: String,
}

impl Meta {
    /// Create metadata populated with current time and elapsed duration
    pub fn now(duration_ms: u64, request_id: &str) -> Self {
        Self {
            now_utc: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            duration_ms,
            request_id: request_id.to_owned(),
        }
    }
}

/// Standard response envelope
///
/// Success responses carry `message` and `data`; failures carry `error`,
/// `code` and, after resolution, the `message_id` that was being processed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseEnvelope<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    pub meta: Meta,
}

/// Input: locate a message and forward it
///
/// At least one of `subject`, `content_snippet` or `legacy_id` is required.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ForwardRequest {
    /// Legacy (EWS) item id; translated before any metadata search
    pub legacy_id: Option<String>,
    /// Exact subject (case-insensitive)
    pub subject: Option<String>,
    /// `;`-delimited recipient addresses that must all be on the message
    pub recipients: Option<String>,
    /// Substring of the message body
    pub content_snippet: Option<String>,
    /// Exact receive instant (ISO-8601)
    pub received_at: Option<String>,
    /// Fall back to metadata search when legacy id translation fails
    pub fallback_to_search: Option<bool>,
}

/// Outcome data for a completed forward
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardOutcome {
    /// Original message that was forwarded and archived
    pub message_id: MessageId,
    /// Draft that was created and sent
    pub draft_id: MessageId,
    pub attachments_copied: usize,
    pub attachments_skipped: usize,
    /// Folder the original was moved to
    pub archived_to: String,
}

/// Candidate returned by the coarse filter
///
/// Only the fields needed for local validation are populated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageSummary {
    pub id: MessageId,
    /// `None` when the backend omitted or mangled the timestamp
    pub received_at: Option<DateTime<Utc>>,
    pub subject: Option<String>,
    /// Lowercased To and Cc addresses
    pub recipients: BTreeSet<String>,
}

/// Mail address with optional display name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub name: Option<String>,
    pub address: String,
}

/// Message body content and its type (`text` or `html`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageBody {
    pub content_type: String,
    pub content: String,
}

/// Full message content fetched for duplication
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MessageContent {
    pub subject: Option<String>,
    pub body: Option<MessageBody>,
    pub to: Vec<Recipient>,
    pub cc: Vec<Recipient>,
    pub importance: Option<String>,
    pub has_attachments: bool,
}

/// New outgoing message created as a draft
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OutgoingMessage {
    pub subject: Option<String>,
    pub body: Option<MessageBody>,
    pub to: Vec<Recipient>,
    pub cc: Vec<Recipient>,
    pub importance: Option<String>,
}

impl From<MessageContent> for OutgoingMessage {
    fn from(content: MessageContent) -> Self {
        Self {
            subject: content.subject,
            body: content.body,
            to: content.to,
            cc: content.cc,
            importance: content.importance,
        }
    }
}

/// Attachment as listed on the source message
///
/// Payload fields are optional because which one is present depends on the
/// attachment type marker.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AttachmentRecord {
    pub id: Option<String>,
    /// Type marker such as `#microsoft.graph.fileAttachment`
    pub odata_type: Option<String>,
    pub name: Option<String>,
    pub content_type: Option<String>,
    pub is_inline: bool,
    pub content_id: Option<String>,
    /// Base64 payload of a file attachment
    pub content_bytes: Option<String>,
    /// Embedded message/event/contact of an item attachment
    pub item: Option<serde_json::Value>,
    /// Link target of a reference attachment
    pub source_url: Option<String>,
    pub provider_type: Option<String>,
    pub permission: Option<String>,
    pub is_folder: Option<bool>,
}
