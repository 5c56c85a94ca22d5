// Wire events broadcast to observers.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque external handle of a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Allocate a fresh random identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// Normalized error shape; the only error representation that leaves the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorRecord {
    pub name: String,
    pub message: String,
    pub stack_trace: Option<String>,
    pub cause: Option<Box<ErrorRecord>>,
}

/// One element of a log event's payload.
///
/// Serialized untagged so primitives stay primitives on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessagePart {
    Bool(bool),
    Number(serde_json::Number),
    Error(ErrorRecord),
    /// Plain text, or the bounded rendering of a structured value.
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogPayload {
    pub level: LogLevel,
    pub component: String,
    pub parts: Vec<MessagePart>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Log,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "payload", rename_all = "lowercase")]
enum EventBody {
    Log(LogPayload),
    Completed(String),
    Failed(String),
    Cancelled(String),
}

/// Immutable message fanned out by the event bus.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    #[serde(skip_serializing_if = "Option::is_none")]
    session_id: Option<SessionId>,
    #[serde(flatten)]
    body: EventBody,
}

impl Event {
    pub fn log(session_id: SessionId, payload: LogPayload) -> Self {
        Self {
            session_id: Some(session_id),
            body: EventBody::Log(payload),
        }
    }

    pub fn completed(session_id: SessionId, summary: impl Into<String>) -> Self {
        Self {
            session_id: Some(session_id),
            body: EventBody::Completed(summary.into()),
        }
    }

    pub fn failed(session_id: SessionId, summary: impl Into<String>) -> Self {
        Self {
            session_id: Some(session_id),
            body: EventBody::Failed(summary.into()),
        }
    }

    pub fn cancelled(session_id: SessionId, summary: impl Into<String>) -> Self {
        Self {
            session_id: Some(session_id),
            body: EventBody::Cancelled(summary.into()),
        }
    }

    pub fn kind(&self) -> EventKind {
        match self.body {
            EventBody::Log(_) => EventKind::Log,
            EventBody::Completed(_) => EventKind::Completed,
            EventBody::Failed(_) => EventKind::Failed,
            EventBody::Cancelled(_) => EventKind::Cancelled,
        }
    }

    pub fn session_id(&self) -> Option<&SessionId> {
        self.session_id.as_ref()
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self.body, EventBody::Log(_))
    }

    pub fn log_payload(&self) -> Option<&LogPayload> {
        match &self.body {
            EventBody::Log(payload) => Some(payload),
            _ => None,
        }
    }

    /// Human-readable summary of a terminal event.
    pub fn summary(&self) -> Option<&str> {
        match &self.body {
            EventBody::Log(_) => None,
            EventBody::Completed(s) | EventBody::Failed(s) | EventBody::Cancelled(s) => Some(s),
        }
    }
}
