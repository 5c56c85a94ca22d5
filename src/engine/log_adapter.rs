// Log adapter: turns an operation's heterogeneous log records into wire-safe
// `log` events and forwards them to the event bus.

use std::backtrace::{Backtrace, BacktraceStatus};
use std::error::Error as StdError;
use std::fmt::Write as _;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, info, trace, warn};

use super::bus::EventBus;
use super::events::{ErrorRecord, Event, LogLevel, LogPayload, MessagePart, SessionId};
use crate::config::{
    ERROR_CAUSE_MAX_DEPTH, LOG_RENDER_MAX_CHARS, LOG_RENDER_MAX_DEPTH, UNSERIALIZABLE_PLACEHOLDER,
};

/// A single raw message part as produced by an operation.
#[derive(Debug)]
pub enum LogValue {
    Text(String),
    Int(i64),
    UInt(u64),
    Float(f64),
    Bool(bool),
    Error(anyhow::Error),
    Data(Value),
    /// A value whose serialization failed; rendered as a placeholder.
    Unserializable,
}

impl LogValue {
    /// Capture arbitrary serializable data.
    pub fn data<T: Serialize + ?Sized>(value: &T) -> Self {
        match serde_json::to_value(value) {
            Ok(v) => LogValue::Data(v),
            Err(_) => LogValue::Unserializable,
        }
    }
}

impl From<&str> for LogValue {
    fn from(value: &str) -> Self {
        LogValue::Text(value.to_string())
    }
}

impl From<String> for LogValue {
    fn from(value: String) -> Self {
        LogValue::Text(value)
    }
}

impl From<i64> for LogValue {
    fn from(value: i64) -> Self {
        LogValue::Int(value)
    }
}

impl From<i32> for LogValue {
    fn from(value: i32) -> Self {
        LogValue::Int(value.into())
    }
}

impl From<u64> for LogValue {
    fn from(value: u64) -> Self {
        LogValue::UInt(value)
    }
}

impl From<u32> for LogValue {
    fn from(value: u32) -> Self {
        LogValue::UInt(value.into())
    }
}

impl From<usize> for LogValue {
    fn from(value: usize) -> Self {
        LogValue::UInt(value as u64)
    }
}

impl From<f64> for LogValue {
    fn from(value: f64) -> Self {
        LogValue::Float(value)
    }
}

impl From<bool> for LogValue {
    fn from(value: bool) -> Self {
        LogValue::Bool(value)
    }
}

impl From<anyhow::Error> for LogValue {
    fn from(value: anyhow::Error) -> Self {
        LogValue::Error(value)
    }
}

impl From<Value> for LogValue {
    fn from(value: Value) -> Self {
        LogValue::Data(value)
    }
}

/// Severity, originating component and ordered message parts.
#[derive(Debug)]
pub struct LogRecord {
    pub level: LogLevel,
    pub component: String,
    pub parts: Vec<LogValue>,
}

impl LogRecord {
    pub fn new(level: LogLevel, component: impl Into<String>) -> Self {
        Self {
            level,
            component: component.into(),
            parts: Vec::new(),
        }
    }

    pub fn info(component: impl Into<String>) -> Self {
        Self::new(LogLevel::Info, component)
    }

    pub fn warn(component: impl Into<String>) -> Self {
        Self::new(LogLevel::Warn, component)
    }

    pub fn error(component: impl Into<String>) -> Self {
        Self::new(LogLevel::Error, component)
    }

    /// Append a message part.
    pub fn with(mut self, part: impl Into<LogValue>) -> Self {
        self.parts.push(part.into());
        self
    }
}

/// Destination for an operation's log records.
pub trait LogSink: Send + Sync {
    fn log(&self, record: LogRecord);
}

/// [`LogSink`] bound to one session: normalizes each record into a `log`
/// event, mirrors it to `tracing` and publishes it on the bus.
pub struct EventLogAdapter {
    session_id: SessionId,
    bus: EventBus,
}

impl EventLogAdapter {
    pub fn new(session_id: SessionId, bus: EventBus) -> Self {
        Self { session_id, bus }
    }
}

impl LogSink for EventLogAdapter {
    fn log(&self, record: LogRecord) {
        let payload = normalize_record(record);
        mirror_to_tracing(&self.session_id, &payload);
        self.bus.publish(Event::log(self.session_id.clone(), payload));
    }
}

fn mirror_to_tracing(session_id: &SessionId, payload: &LogPayload) {
    let line = payload
        .parts
        .iter()
        .map(part_as_line)
        .collect::<Vec<_>>()
        .join(" ");
    let component = payload.component.as_str();
    match payload.level {
        LogLevel::Trace => trace!(session = %session_id, component, "{}", line),
        LogLevel::Debug => debug!(session = %session_id, component, "{}", line),
        LogLevel::Info => info!(session = %session_id, component, "{}", line),
        LogLevel::Warn => warn!(session = %session_id, component, "{}", line),
        LogLevel::Error => error!(session = %session_id, component, "{}", line),
    }
}

fn part_as_line(part: &MessagePart) -> String {
    match part {
        MessagePart::Bool(b) => b.to_string(),
        MessagePart::Number(n) => n.to_string(),
        MessagePart::Text(s) => s.clone(),
        MessagePart::Error(e) => format!("{}: {}", e.name, e.message),
    }
}

/// Normalize every part of a record. Infallible.
pub fn normalize_record(record: LogRecord) -> LogPayload {
    LogPayload {
        level: record.level,
        component: record.component,
        parts: record.parts.into_iter().map(normalize_value).collect(),
    }
}

pub fn normalize_value(value: LogValue) -> MessagePart {
    match value {
        LogValue::Text(s) => MessagePart::Text(s),
        LogValue::Int(i) => MessagePart::Number(i.into()),
        LogValue::UInt(u) => MessagePart::Number(u.into()),
        LogValue::Float(f) => match serde_json::Number::from_f64(f) {
            Some(n) => MessagePart::Number(n),
            None => MessagePart::Text(f.to_string()),
        },
        LogValue::Bool(b) => MessagePart::Bool(b),
        LogValue::Error(e) => MessagePart::Error(error_record(&e)),
        LogValue::Data(Value::String(s)) => MessagePart::Text(s),
        LogValue::Data(Value::Number(n)) => MessagePart::Number(n),
        LogValue::Data(Value::Bool(b)) => MessagePart::Bool(b),
        LogValue::Data(v) => MessagePart::Text(render_bounded(&v)),
        LogValue::Unserializable => MessagePart::Text(UNSERIALIZABLE_PLACEHOLDER.to_string()),
    }
}

/// Convert an operation error into the wire error shape, keeping the cause chain.
pub fn error_record(err: &anyhow::Error) -> ErrorRecord {
    error_record_with_trace(err, err.backtrace())
}

fn error_record_with_trace(err: &anyhow::Error, backtrace: &Backtrace) -> ErrorRecord {
    let root: &(dyn StdError + 'static) = err.as_ref();
    ErrorRecord {
        name: error_name(root).to_string(),
        message: err.to_string(),
        stack_trace: stack_trace(backtrace),
        cause: err
            .chain()
            .nth(1)
            .map(|cause| Box::new(std_error_record(cause, 1))),
    }
}

/// Rendered frames, only when the backtrace was actually captured.
fn stack_trace(backtrace: &Backtrace) -> Option<String> {
    match backtrace.status() {
        BacktraceStatus::Captured => Some(backtrace.to_string()),
        _ => None,
    }
}

fn std_error_record(err: &(dyn StdError + 'static), depth: usize) -> ErrorRecord {
    let cause = if depth < ERROR_CAUSE_MAX_DEPTH {
        err.source()
            .map(|source| Box::new(std_error_record(source, depth + 1)))
    } else {
        None
    };
    ErrorRecord {
        name: error_name(err).to_string(),
        message: err.to_string(),
        stack_trace: None,
        cause,
    }
}

fn error_name(err: &(dyn StdError + 'static)) -> &'static str {
    if let Some(io) = err.downcast_ref::<std::io::Error>() {
        return match io.kind() {
            std::io::ErrorKind::NotFound => "NotFoundError",
            std::io::ErrorKind::PermissionDenied => "PermissionError",
            std::io::ErrorKind::TimedOut => "TimeoutError",
            _ => "IoError",
        };
    }
    if let Some(http) = err.downcast_ref::<reqwest::Error>() {
        return if http.is_timeout() {
            "TimeoutError"
        } else {
            "HttpError"
        };
    }
    if err.downcast_ref::<serde_json::Error>().is_some() {
        return "SerializationError";
    }
    "Error"
}

/// Human-readable rendering of structured data, cut off below a fixed nesting
/// depth and a fixed length.
pub fn render_bounded(value: &Value) -> String {
    let mut out = String::new();
    render_into(&mut out, value, 0);
    if out.chars().count() > LOG_RENDER_MAX_CHARS {
        let mut cut: String = out.chars().take(LOG_RENDER_MAX_CHARS).collect();
        cut.push_str("...");
        return cut;
    }
    out
}

fn render_into(out: &mut String, value: &Value, depth: usize) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => {
            let _ = write!(out, "{}", b);
        }
        Value::Number(n) => {
            let _ = write!(out, "{}", n);
        }
        Value::String(s) => {
            let _ = write!(out, "{:?}", s);
        }
        Value::Array(items) => {
            if depth >= LOG_RENDER_MAX_DEPTH {
                out.push_str("[Array]");
                return;
            }
            if items.is_empty() {
                out.push_str("[]");
                return;
            }
            out.push_str("[ ");
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                render_into(out, item, depth + 1);
            }
            out.push_str(" ]");
        }
        Value::Object(map) => {
            if depth >= LOG_RENDER_MAX_DEPTH {
                out.push_str("[Object]");
                return;
            }
            if map.is_empty() {
                out.push_str("{}");
                return;
            }
            out.push_str("{ ");
            for (i, (key, item)) in map.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                out.push_str(key);
                out.push_str(": ");
                render_into(out, item, depth + 1);
            }
            out.push_str(" }");
        }
    }
}
