//! Event envelope and event kinds.
//!
//! Every frame pushed to a client is a JSON text frame with a discriminator
//! tag, an optional opaque payload, and an optional send-time timestamp.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors that can occur while preparing an event for the wire.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// JSON serialization failed.
    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Discriminator tag carried in the `type` field of every envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Subscription confirmation, sent once after a channel is joined.
    Connected,
    /// Reply to a client liveness probe.
    Pong,
    /// A task changed (fields, status, assignment).
    TaskUpdated,
    /// A comment was added to a task.
    CommentCreated,
    /// A subtask was added to a task.
    SubtaskCreated,
    /// An attachment was uploaded to a task.
    AttachmentCreated,
    /// A reminder fired.
    Reminder,
    /// A broadcast notification with no narrower scope.
    Notification,
}

impl EventKind {
    /// The wire name of this kind, matching its serialized form.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Connected => "connected",
            EventKind::Pong => "pong",
            EventKind::TaskUpdated => "task_updated",
            EventKind::CommentCreated => "comment_created",
            EventKind::SubtaskCreated => "subtask_created",
            EventKind::AttachmentCreated => "attachment_created",
            EventKind::Reminder => "reminder",
            EventKind::Notification => "notification",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single frame as delivered to a client.
///
/// `data` and `ts` are omitted from the wire when absent; lifecycle frames
/// (`connected`, `pong`) carry no timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: EventKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ts: Option<String>,
}

impl Envelope {
    /// Wrap a domain event, stamping it with the current send time.
    ///
    /// Called once per recipient so each delivery carries its own timestamp.
    #[must_use]
    pub fn event(kind: EventKind, data: serde_json::Value) -> Self {
        Self {
            kind,
            data: Some(data),
            ts: Some(timestamp()),
        }
    }

    /// Subscription confirmation for a freshly joined channel.
    #[must_use]
    pub fn connected(message: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Connected,
            data: Some(serde_json::json!({ "message": message.into() })),
            ts: None,
        }
    }

    /// Reply to a client `"ping"`.
    #[must_use]
    pub fn pong() -> Self {
        Self {
            kind: EventKind::Pong,
            data: None,
            ts: None,
        }
    }

    /// Encode the envelope as the body of a text frame.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Encode`] if JSON serialization fails.
    pub fn to_text(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// RFC 3339 UTC timestamp with microsecond precision.
fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}
