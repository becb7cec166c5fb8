//! Mail backend boundary and Microsoft Graph client
//!
//! [`MailBackend`] is the capability the resolver and orchestrator depend on.
//! [`GraphClient`] implements it over the Graph REST API with `reqwest`. Every
//! call carries the caller's bearer token and a `client-request-id` so backend
//! logs can be correlated with ours.

use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{ACCEPT, CONTENT_LENGTH};
use reqwest::{Client, RequestBuilder, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::config::ServerConfig;
use crate::errors::{AppError, AppResult};
use crate::message_id::{LegacyItemId, MessageId};
use crate::models::{
    AttachmentRecord, MessageBody, MessageContent, MessageSummary, OutgoingMessage, Recipient,
};

/// Fields fetched when duplicating a message
const CONTENT_SELECT: &str = "subject,body,toRecipients,ccRecipients,importance,hasAttachments";
/// Expansion that inlines the embedded item of item attachments
const ATTACHMENT_EXPAND: &str = "microsoft.graph.itemattachment/item";
/// Longest backend response body quoted in an error
const REDACTED_BODY_MAX_LEN: usize = 200;

/// Per-request credentials and correlation id
#[derive(Debug)]
pub struct CallContext {
    token: SecretString,
    request_id: String,
}

impl CallContext {
    pub fn new(token: SecretString, request_id: impl Into<String>) -> Self {
        Self {
            token,
            request_id: request_id.into(),
        }
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }
}

/// Bounded, filtered message listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageQuery {
    /// OData `$filter` expression
    pub filter: String,
    /// Comma-separated `$select` field list
    pub select: &'static str,
    /// `$top` page size cap
    pub top: usize,
}

/// Remote mail store operations
///
/// Implemented by [`GraphClient`] in production and by an in-memory mock in
/// tests.
#[async_trait]
pub trait MailBackend: Send + Sync {
    /// List messages matching a filter, unordered, at most `query.top`
    async fn list_messages(
        &self,
        ctx: &CallContext,
        query: &MessageQuery,
    ) -> AppResult<Vec<MessageSummary>>;

    /// Fetch the content needed to duplicate a message
    async fn get_message(&self, ctx: &CallContext, id: &MessageId) -> AppResult<MessageContent>;

    /// List attachments of a message including their payloads
    async fn list_attachments(
        &self,
        ctx: &CallContext,
        id: &MessageId,
    ) -> AppResult<Vec<AttachmentRecord>>;

    /// Create a draft and return its id
    async fn create_draft(
        &self,
        ctx: &CallContext,
        message: &OutgoingMessage,
    ) -> AppResult<MessageId>;

    /// Attach a prepared attachment payload to a draft
    async fn add_attachment(
        &self,
        ctx: &CallContext,
        draft: &MessageId,
        payload: &Value,
    ) -> AppResult<()>;

    /// Send a previously created draft
    async fn send_draft(&self, ctx: &CallContext, draft: &MessageId) -> AppResult<()>;

    /// Move a message to a folder (id or well-known name)
    async fn move_message(&self, ctx: &CallContext, id: &MessageId, folder: &str) -> AppResult<()>;

    /// Translate a legacy item id into a native message id
    async fn translate_legacy_id(
        &self,
        ctx: &CallContext,
        legacy: &LegacyItemId,
    ) -> AppResult<MessageId>;
}

/// Graph REST implementation of [`MailBackend`]
#[derive(Debug, Clone)]
pub struct GraphClient {
    http: Client,
    /// `{graph_base_url}/{mailbox_path}`
    mailbox_root: String,
}

impl GraphClient {
    /// Build a client with timeouts from server config
    ///
    /// # Errors
    ///
    /// Returns `Internal` if the TLS backend cannot be initialized.
    pub fn new(config: &ServerConfig) -> AppResult<Self> {
        let http = Client::builder()
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| AppError::Internal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            mailbox_root: format!("{}/{}", config.graph_base_url, config.mailbox_path()),
        })
    }

    fn message_url(&self, id: &MessageId, suffix: &str) -> String {
        format!("{}/messages/{}{suffix}", self.mailbox_root, id.path_segment())
    }

    fn authorize(&self, ctx: &CallContext, request: RequestBuilder) -> RequestBuilder {
        request
            .bearer_auth(ctx.token.expose_secret())
            .header("client-request-id", ctx.request_id.as_str())
            .header(ACCEPT, "application/json")
    }

    /// Send a request and decode a JSON success body
    async fn send_json<T: DeserializeOwned>(
        &self,
        ctx: &CallContext,
        request: RequestBuilder,
        operation: &str,
    ) -> AppResult<T> {
        let body = self.send(ctx, request, operation).await?;
        serde_json::from_str(&body).map_err(|e| {
            AppError::Internal(format!("failed to decode {operation} response: {e}"))
        })
    }

    /// Send a request and return the raw success body
    async fn send(
        &self,
        ctx: &CallContext,
        request: RequestBuilder,
        operation: &str,
    ) -> AppResult<String> {
        debug!(operation, request_id = ctx.request_id(), "graph request");
        let response = self
            .authorize(ctx, request)
            .send()
            .await
            .map_err(|e| transport_error(operation, &e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| transport_error(operation, &e))?;
        if !status.is_success() {
            return Err(classify_error(operation, status, &body));
        }
        Ok(body)
    }
}

#[async_trait]
impl MailBackend for GraphClient {
    async fn list_messages(
        &self,
        ctx: &CallContext,
        query: &MessageQuery,
    ) -> AppResult<Vec<MessageSummary>> {
        let request = self
            .http
            .get(format!("{}/messages", self.mailbox_root))
            .query(&[
                ("$filter", query.filter.as_str()),
                ("$select", query.select),
                ("$top", query.top.to_string().as_str()),
            ]);
        let page: GraphPage<GraphMessage> = self.send_json(ctx, request, "list messages").await?;
        Ok(page
            .value
            .into_iter()
            .filter_map(GraphMessage::into_summary)
            .take(query.top)
            .collect())
    }

    async fn get_message(&self, ctx: &CallContext, id: &MessageId) -> AppResult<MessageContent> {
        let request = self
            .http
            .get(self.message_url(id, ""))
            .query(&[("$select", CONTENT_SELECT)]);
        let message: GraphMessage = self.send_json(ctx, request, "get message").await?;
        Ok(message.into_content())
    }

    async fn list_attachments(
        &self,
        ctx: &CallContext,
        id: &MessageId,
    ) -> AppResult<Vec<AttachmentRecord>> {
        let request = self
            .http
            .get(self.message_url(id, "/attachments"))
            .query(&[("$expand", ATTACHMENT_EXPAND)]);
        let page: GraphPage<GraphAttachment> =
            self.send_json(ctx, request, "list attachments").await?;
        Ok(page.value.into_iter().map(AttachmentRecord::from).collect())
    }

    async fn create_draft(
        &self,
        ctx: &CallContext,
        message: &OutgoingMessage,
    ) -> AppResult<MessageId> {
        let request = self
            .http
            .post(format!("{}/messages", self.mailbox_root))
            .json(&draft_payload(message));
        let created: GraphCreated = self.send_json(ctx, request, "create draft").await?;
        MessageId::parse(&created.id)
    }

    async fn add_attachment(
        &self,
        ctx: &CallContext,
        draft: &MessageId,
        payload: &Value,
    ) -> AppResult<()> {
        let request = self
            .http
            .post(self.message_url(draft, "/attachments"))
            .json(payload);
        self.send(ctx, request, "add attachment").await.map(|_| ())
    }

    async fn send_draft(&self, ctx: &CallContext, draft: &MessageId) -> AppResult<()> {
        let request = self
            .http
            .post(self.message_url(draft, "/send"))
            .header(CONTENT_LENGTH, "0");
        self.send(ctx, request, "send draft").await.map(|_| ())
    }

    async fn move_message(&self, ctx: &CallContext, id: &MessageId, folder: &str) -> AppResult<()> {
        let request = self
            .http
            .post(self.message_url(id, "/move"))
            .json(&json!({ "destinationId": folder }));
        self.send(ctx, request, "move message").await.map(|_| ())
    }

    async fn translate_legacy_id(
        &self,
        ctx: &CallContext,
        legacy: &LegacyItemId,
    ) -> AppResult<MessageId> {
        let request = self
            .http
            .post(format!("{}/translateExchangeIds", self.mailbox_root))
            .json(&json!({
                "inputIds": [legacy.as_str()],
                "sourceIdType": "ewsId",
                "targetIdType": "restId",
            }));
        let page: GraphPage<ConvertIdResult> = self
            .send_json(ctx, request, "translate legacy id")
            .await
            .map_err(unknown_id_as_not_found)?;
        let target = page
            .value
            .into_iter()
            .find(|r| r.source_id.as_deref() == Some(legacy.as_str()) || r.source_id.is_none())
            .and_then(|r| r.target_id)
            .ok_or_else(|| AppError::NotFound("legacy id has no native equivalent".to_owned()))?;
        MessageId::parse(&target)
    }
}

/// Backend codes meaning the id does not name an item
const UNKNOWN_ID_CODES: [&str; 4] = [
    "ErrorInvalidIdMalformed",
    "ErrorInvalidId",
    "ErrorItemNotFound",
    "itemNotFound",
];

/// Turn an id-level rejection into `NotFound`, leaving outages untouched
fn unknown_id_as_not_found(err: AppError) -> AppError {
    match err {
        AppError::Remote {
            code: Some(code),
            message,
        } if UNKNOWN_ID_CODES.contains(&code.as_str()) => {
            AppError::NotFound(format!("legacy id has no native equivalent: {message}"))
        }
        other => other,
    }
}

/// Map a `reqwest` transport failure
fn transport_error(operation: &str, err: &reqwest::Error) -> AppError {
    if err.is_timeout() {
        AppError::Timeout(format!("{operation} timed out"))
    } else {
        AppError::Remote {
            code: Some("unreachable".to_owned()),
            message: format!("{operation} failed: {err}"),
        }
    }
}

/// Map a non-success backend response
///
/// 401 becomes `Unauthorized`. A rejected restriction is tagged
/// `query_too_complex` so callers can tell it apart from other failures.
fn classify_error(operation: &str, status: StatusCode, body: &str) -> AppError {
    let detail = serde_json::from_str::<GraphErrorEnvelope>(body)
        .map(|e| e.error)
        .unwrap_or_default();
    let message = detail
        .message
        .unwrap_or_else(|| format!("status={status} body={}", redact_response_body(body)));

    if status == StatusCode::UNAUTHORIZED {
        return AppError::Unauthorized(format!("{operation} rejected the credential: {message}"));
    }

    let code = if is_query_too_complex(detail.code.as_deref(), &message) {
        Some("query_too_complex".to_owned())
    } else {
        detail.code
    };
    warn!(operation, %status, code = code.as_deref().unwrap_or("-"), "graph request failed");
    AppError::Remote {
        code,
        message: format!("{operation}: {message}"),
    }
}

fn is_query_too_complex(code: Option<&str>, message: &str) -> bool {
    matches!(code, Some("InefficientFilter" | "ErrorInvalidRestriction"))
        || message.to_ascii_lowercase().contains("too complex")
}

fn redact_response_body(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.chars().count() <= REDACTED_BODY_MAX_LEN {
        trimmed.to_owned()
    } else {
        let head: String = trimmed.chars().take(REDACTED_BODY_MAX_LEN).collect();
        format!("{head}…[truncated {} bytes]", trimmed.len())
    }
}

/// JSON body for a new draft
fn draft_payload(message: &OutgoingMessage) -> Value {
    let mut payload = json!({
        "toRecipients": recipients_payload(&message.to),
        "ccRecipients": recipients_payload(&message.cc),
    });
    if let Some(subject) = &message.subject {
        payload["subject"] = json!(subject);
    }
    if let Some(body) = &message.body {
        payload["body"] = json!({ "contentType": body.content_type, "content": body.content });
    }
    if let Some(importance) = &message.importance {
        payload["importance"] = json!(importance);
    }
    payload
}

fn recipients_payload(recipients: &[Recipient]) -> Value {
    recipients
        .iter()
        .map(|r| match &r.name {
            Some(name) => json!({ "emailAddress": { "name": name, "address": r.address } }),
            None => json!({ "emailAddress": { "address": r.address } }),
        })
        .collect()
}

#[derive(Debug, Deserialize)]
struct GraphPage<T> {
    value: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct GraphCreated {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConvertIdResult {
    source_id: Option<String>,
    target_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GraphErrorEnvelope {
    error: GraphErrorDetail,
}

#[derive(Debug, Default, Deserialize)]
struct GraphErrorDetail {
    code: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphMessage {
    id: Option<String>,
    subject: Option<String>,
    received_date_time: Option<String>,
    to_recipients: Option<Vec<GraphRecipient>>,
    cc_recipients: Option<Vec<GraphRecipient>>,
    body: Option<GraphBody>,
    importance: Option<String>,
    has_attachments: Option<bool>,
}

impl GraphMessage {
    /// Convert to a candidate; entries without a usable id are dropped
    fn into_summary(self) -> Option<MessageSummary> {
        let id = match self.id.as_deref().map(MessageId::parse) {
            Some(Ok(id)) => id,
            _ => {
                warn!("dropping candidate without a usable id");
                return None;
            }
        };
        let received_at = self
            .received_date_time
            .as_deref()
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|dt| dt.with_timezone(&Utc));
        let recipients: BTreeSet<String> = self
            .to_recipients
            .iter()
            .chain(self.cc_recipients.iter())
            .flatten()
            .filter_map(GraphRecipient::address)
            .map(str::to_lowercase)
            .collect();

        Some(MessageSummary {
            id,
            received_at,
            subject: self.subject,
            recipients,
        })
    }

    fn into_content(self) -> MessageContent {
        MessageContent {
            subject: self.subject,
            body: self.body.and_then(|b| {
                Some(MessageBody {
                    content_type: b.content_type.unwrap_or_else(|| "text".to_owned()),
                    content: b.content?,
                })
            }),
            to: recipient_list(self.to_recipients),
            cc: recipient_list(self.cc_recipients),
            importance: self.importance,
            has_attachments: self.has_attachments.unwrap_or(false),
        }
    }
}

fn recipient_list(recipients: Option<Vec<GraphRecipient>>) -> Vec<Recipient> {
    recipients
        .unwrap_or_default()
        .iter()
        .filter_map(|r| {
            let address = r.address()?.to_owned();
            let name = r
                .email_address
                .as_ref()
                .and_then(|e| e.name.as_deref())
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .map(str::to_owned);
            Some(Recipient { name, address })
        })
        .collect()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphRecipient {
    email_address: Option<GraphEmailAddress>,
}

impl GraphRecipient {
    fn address(&self) -> Option<&str> {
        self.email_address
            .as_ref()
            .and_then(|email| email.address.as_deref())
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }
}

#[derive(Debug, Deserialize)]
struct GraphEmailAddress {
    name: Option<String>,
    address: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphBody {
    content_type: Option<String>,
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphAttachment {
    id: Option<String>,
    #[serde(rename = "@odata.type")]
    odata_type: Option<String>,
    name: Option<String>,
    content_type: Option<String>,
    is_inline: Option<bool>,
    content_id: Option<String>,
    content_bytes: Option<String>,
    item: Option<Value>,
    source_url: Option<String>,
    provider_type: Option<String>,
    permission: Option<String>,
    is_folder: Option<bool>,
}

impl From<GraphAttachment> for AttachmentRecord {
    fn from(a: GraphAttachment) -> Self {
        Self {
            id: a.id,
            odata_type: a.odata_type,
            name: a.name,
            content_type: a.content_type,
            is_inline: a.is_inline.unwrap_or(false),
            content_id: a.content_id,
            content_bytes: a.content_bytes,
            item: a.item,
            source_url: a.source_url,
            provider_type: a.provider_type,
            permission: a.permission,
            is_folder: a.is_folder,
        }
    }
}
