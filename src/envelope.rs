//! The message envelope that flows through [`crate::bus::MessageBus`].
//!
//! Immutable after construction; the bus assigns `id` and, for delayed sends,
//! `deliver_at`.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Reserved agent identifiers. Created on first boot, never terminated.
pub const ROOT_AGENT: &str = "root";
pub const USER_AGENT: &str = "user";

/// A reference to an externally-stored artifact, carried as an attachment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    /// Opaque reference returned by the artifact store's `PutArtifact`/`SaveImage`.
    pub artifact_ref: String,
    /// MIME type, when known.
    pub mime_type: Option<String>,
}

/// The opaque structured payload carried by a [`Envelope`].
///
/// Modeled as a small struct of named optional fields rather than raw
/// `serde_json::Value` so call sites get type-checked access to the fields the
/// specification calls out explicitly (`text`, `kind`, `attachments`,
/// `quickReplies`), while `extra` still allows passthrough of arbitrary
/// tool-result / diagnostic structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Payload {
    pub text: Option<String>,
    /// `"error"` or `"abort"` for diagnostic envelopes; absent for ordinary messages.
    pub kind: Option<String>,
    pub error_type: Option<String>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    /// At most 10 non-empty strings; enforced by `send_message` (see [`crate::tools`]).
    #[serde(default)]
    pub quick_replies: Vec<String>,
    /// Passthrough for tool-result structure and other non-enumerated fields.
    #[serde(default)]
    pub extra: serde_json::Map<String, Value>,
}

impl Payload {
    pub fn text(text: impl Into<String>) -> Self {
        Payload {
            text: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn error(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Payload {
            text: Some(message.into()),
            kind: Some("error".to_string()),
            error_type: Some(error_type.into()),
            ..Default::default()
        }
    }

    pub fn abort(reason: impl Into<String>) -> Self {
        Payload {
            text: Some(reason.into()),
            kind: Some("abort".to_string()),
            ..Default::default()
        }
    }
}

/// An immutable message envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub id: String,
    pub from: String,
    pub to: String,
    pub payload: Payload,
    pub task_id: Option<String>,
    pub created_at: String,
    /// Absolute epoch-millisecond delivery time. `None` means the envelope is
    /// already in its recipient's immediate queue.
    pub deliver_at: Option<i64>,
}

/// Builder for constructing envelopes before they are handed to
/// [`crate::bus::MessageBus::send`], which stamps `id` and normalizes `deliver_at`.
#[derive(Debug, Clone)]
pub struct Send {
    pub from: String,
    pub to: String,
    pub payload: Payload,
    pub task_id: Option<String>,
    /// Coerced by the bus: non-positive values normalize to immediate delivery.
    pub delay_ms: i64,
}

impl Send {
    pub fn new(from: impl Into<String>, to: impl Into<String>, payload: Payload) -> Self {
        Send {
            from: from.into(),
            to: to.into(),
            payload,
            task_id: None,
            delay_ms: 0,
        }
    }

    pub fn with_task_id(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    pub fn with_delay_ms(mut self, delay_ms: i64) -> Self {
        self.delay_ms = delay_ms;
        self
    }

    pub(crate) fn into_envelope(self, id: String, deliver_at: Option<i64>) -> Envelope {
        Envelope {
            id,
            from: self.from,
            to: self.to,
            payload: self.payload,
            task_id: self.task_id,
            created_at: Utc::now().to_rfc3339(),
            deliver_at,
        }
    }
}

pub(crate) fn new_message_id() -> String {
    Uuid::new_v4().to_string()
}
