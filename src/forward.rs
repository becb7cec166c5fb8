//! Forward orchestration for a resolved message
//!
//! Duplicates the message as a new draft, copies its attachments one at a
//! time, sends the draft and archives the original. Each step is awaited
//! before the next starts. Nothing is rolled back when a later step fails.

use serde_json::{Map, Value, json};
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::errors::AppResult;
use crate::graph::{CallContext, MailBackend};
use crate::message_id::MessageId;
use crate::models::{AttachmentRecord, ForwardOutcome, OutgoingMessage};

const FILE_ATTACHMENT: &str = "#microsoft.graph.fileAttachment";
const ITEM_ATTACHMENT: &str = "#microsoft.graph.itemAttachment";
const REFERENCE_ATTACHMENT: &str = "#microsoft.graph.referenceAttachment";

/// Server-assigned properties that a new item attachment must not carry
const READ_ONLY_ITEM_FIELDS: [&str; 5] = [
    "id",
    "changeKey",
    "@odata.etag",
    "createdDateTime",
    "lastModifiedDateTime",
];

/// Attachment shapes the draft can accept
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentKind {
    File,
    Item,
    Reference,
}

impl AttachmentKind {
    fn from_odata_type(odata_type: &str) -> Option<Self> {
        match odata_type {
            FILE_ATTACHMENT => Some(Self::File),
            ITEM_ATTACHMENT => Some(Self::Item),
            REFERENCE_ATTACHMENT => Some(Self::Reference),
            _ => None,
        }
    }

    fn odata_type(self) -> &'static str {
        match self {
            Self::File => FILE_ATTACHMENT,
            Self::Item => ITEM_ATTACHMENT,
            Self::Reference => REFERENCE_ATTACHMENT,
        }
    }
}

/// Why an attachment was not copied
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SkipReason {
    #[error("unsupported attachment type {0}")]
    UnknownType(String),
    #[error("attachment has no type marker")]
    MissingType,
    #[error("{kind:?} attachment is missing its {field} payload")]
    MissingPayload {
        kind: AttachmentKind,
        field: &'static str,
    },
}

/// Build the JSON body that recreates `attachment` on a draft
pub fn copy_payload(attachment: &AttachmentRecord) -> Result<Value, SkipReason> {
    let odata_type = attachment
        .odata_type
        .as_deref()
        .ok_or(SkipReason::MissingType)?;
    let kind = AttachmentKind::from_odata_type(odata_type)
        .ok_or_else(|| SkipReason::UnknownType(odata_type.to_owned()))?;
    let missing = |field| SkipReason::MissingPayload { kind, field };

    let mut payload = json!({
        "@odata.type": kind.odata_type(),
        "name": attachment.name.as_deref().unwrap_or("attachment"),
        "isInline": attachment.is_inline,
    });
    if let Some(content_type) = &attachment.content_type {
        payload["contentType"] = json!(content_type);
    }

    match kind {
        AttachmentKind::File => {
            let bytes = attachment
                .content_bytes
                .as_deref()
                .ok_or_else(|| missing("contentBytes"))?;
            payload["contentBytes"] = json!(bytes);
            if let Some(content_id) = &attachment.content_id {
                payload["contentId"] = json!(content_id);
            }
        }
        AttachmentKind::Item => {
            let item = attachment.item.as_ref().ok_or_else(|| missing("item"))?;
            payload["item"] = strip_read_only(item);
        }
        AttachmentKind::Reference => {
            let url = attachment
                .source_url
                .as_deref()
                .ok_or_else(|| missing("sourceUrl"))?;
            payload["sourceUrl"] = json!(url);
            if let Some(provider) = &attachment.provider_type {
                payload["providerType"] = json!(provider);
            }
            if let Some(permission) = &attachment.permission {
                payload["permission"] = json!(permission);
            }
            if let Some(is_folder) = attachment.is_folder {
                payload["isFolder"] = json!(is_folder);
            }
        }
    }
    Ok(payload)
}

fn strip_read_only(item: &Value) -> Value {
    match item.as_object() {
        Some(fields) => Value::Object(
            fields
                .iter()
                .filter(|(key, _)| !READ_ONLY_ITEM_FIELDS.contains(&key.as_str()))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect::<Map<_, _>>(),
        ),
        None => item.clone(),
    }
}

/// Forwards a resolved message and archives the original
pub struct ForwardOrchestrator<'a> {
    backend: &'a dyn MailBackend,
    archive_folder: &'a str,
}

impl<'a> ForwardOrchestrator<'a> {
    pub fn new(backend: &'a dyn MailBackend, archive_folder: &'a str) -> Self {
        Self {
            backend,
            archive_folder,
        }
    }

    /// Run the fetch, draft, copy, send and archive sequence
    ///
    /// # Errors
    ///
    /// Backend failures are reported as `Processing` errors carrying the
    /// message id, except credential rejection and timeouts which keep their
    /// own variant. Individual attachment copy failures are logged and
    /// skipped.
    #[instrument(skip_all, fields(request_id = ctx.request_id(), message_id = %message_id))]
    pub async fn forward(
        &self,
        ctx: &CallContext,
        message_id: &MessageId,
    ) -> AppResult<ForwardOutcome> {
        self.run(ctx, message_id)
            .await
            .map_err(|e| e.into_processing(message_id.as_str()))
    }

    async fn run(&self, ctx: &CallContext, message_id: &MessageId) -> AppResult<ForwardOutcome> {
        let content = self.backend.get_message(ctx, message_id).await?;
        let attachments = if content.has_attachments {
            self.backend.list_attachments(ctx, message_id).await?
        } else {
            Vec::new()
        };

        let draft_id = self
            .backend
            .create_draft(ctx, &OutgoingMessage::from(content))
            .await?;

        let mut copied = 0;
        let mut skipped = 0;
        for attachment in &attachments {
            let name = attachment.name.as_deref().unwrap_or("-");
            let payload = match copy_payload(attachment) {
                Ok(payload) => payload,
                Err(reason) => {
                    warn!(attachment = name, %reason, "skipping attachment");
                    skipped += 1;
                    continue;
                }
            };
            match self.backend.add_attachment(ctx, &draft_id, &payload).await {
                Ok(()) => copied += 1,
                Err(e) => {
                    warn!(attachment = name, error = %e, "attachment copy failed, skipping");
                    skipped += 1;
                }
            }
        }

        self.backend.send_draft(ctx, &draft_id).await?;
        self.backend
            .move_message(ctx, message_id, self.archive_folder)
            .await?;

        info!(
            draft_id = %draft_id,
            copied,
            skipped,
            archived_to = self.archive_folder,
            "message forwarded"
        );
        Ok(ForwardOutcome {
            message_id: message_id.clone(),
            draft_id,
            attachments_copied: copied,
            attachments_skipped: skipped,
            archived_to: self.archive_folder.to_owned(),
        })
    }
}
