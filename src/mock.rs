//! In-memory [`MailBackend`] that records calls

use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use crate::errors::{AppError, AppResult};
use crate::graph::{CallContext, MailBackend, MessageQuery};
use crate::message_id::{LegacyItemId, MessageId};
use crate::models::{AttachmentRecord, MessageContent, MessageSummary, OutgoingMessage};

#[derive(Default)]
pub struct MockBackend {
    pub candidates: Vec<MessageSummary>,
    pub list_error: Option<fn() -> AppError>,
    /// `None` makes translation fail with `NotFound`
    pub translation: Option<MessageId>,
    /// Takes precedence over `translation`
    pub translate_error: Option<fn() -> AppError>,
    pub content: MessageContent,
    pub attachments: Vec<AttachmentRecord>,
    /// Attachment names whose copy is rejected
    pub failing_attachments: Vec<String>,
    pub fail_send: bool,
    pub(crate) calls: Mutex<Vec<String>>,
    pub(crate) queries: Mutex<Vec<MessageQuery>>,
    pub(crate) added: Mutex<Vec<Value>>,
}

impl MockBackend {
    pub fn with_candidates(candidates: Vec<MessageSummary>) -> Self {
        Self {
            candidates,
            ..Self::default()
        }
    }

    /// Operation names in call order
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("calls lock").clone()
    }

    pub fn queries(&self) -> Vec<MessageQuery> {
        self.queries.lock().expect("queries lock").clone()
    }

    /// Attachment payloads accepted by the draft
    pub fn added(&self) -> Vec<Value> {
        self.added.lock().expect("added lock").clone()
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().expect("calls lock").push(call.into());
    }
}

#[async_trait]
impl MailBackend for MockBackend {
    async fn list_messages(
        &self,
        _ctx: &CallContext,
        query: &MessageQuery,
    ) -> AppResult<Vec<MessageSummary>> {
        self.record("list_messages");
        self.queries.lock().expect("queries lock").push(query.clone());
        if let Some(make_error) = self.list_error {
            return Err(make_error());
        }
        Ok(self.candidates.iter().take(query.top).cloned().collect())
    }

    async fn get_message(&self, _ctx: &CallContext, id: &MessageId) -> AppResult<MessageContent> {
        self.record(format!("get_message:{id}"));
        Ok(self.content.clone())
    }

    async fn list_attachments(
        &self,
        _ctx: &CallContext,
        id: &MessageId,
    ) -> AppResult<Vec<AttachmentRecord>> {
        self.record(format!("list_attachments:{id}"));
        Ok(self.attachments.clone())
    }

    async fn create_draft(
        &self,
        _ctx: &CallContext,
        _message: &OutgoingMessage,
    ) -> AppResult<MessageId> {
        self.record("create_draft");
        MessageId::parse("draft-1")
    }

    async fn add_attachment(
        &self,
        _ctx: &CallContext,
        draft: &MessageId,
        payload: &Value,
    ) -> AppResult<()> {
        self.record(format!("add_attachment:{draft}"));
        let name = payload["name"].as_str().unwrap_or_default();
        if self.failing_attachments.iter().any(|n| n == name) {
            return Err(AppError::Remote {
                code: Some("ErrorAttachmentSizeLimitExceeded".to_owned()),
                message: format!("attachment {name} rejected"),
            });
        }
        self.added.lock().expect("added lock").push(payload.clone());
        Ok(())
    }

    async fn send_draft(&self, _ctx: &CallContext, draft: &MessageId) -> AppResult<()> {
        self.record(format!("send_draft:{draft}"));
        if self.fail_send {
            return Err(AppError::Remote {
                code: Some("ErrorSendAsDenied".to_owned()),
                message: "send rejected".to_owned(),
            });
        }
        Ok(())
    }

    async fn move_message(&self, _ctx: &CallContext, id: &MessageId, folder: &str) -> AppResult<()> {
        self.record(format!("move_message:{id}:{folder}"));
        Ok(())
    }

    async fn translate_legacy_id(
        &self,
        _ctx: &CallContext,
        _legacy: &LegacyItemId,
    ) -> AppResult<MessageId> {
        self.record("translate_legacy_id");
        if let Some(make_error) = self.translate_error {
            return Err(make_error());
        }
        self.translation
            .clone()
            .ok_or_else(|| AppError::NotFound("legacy id has no native equivalent".to_owned()))
    }
}
