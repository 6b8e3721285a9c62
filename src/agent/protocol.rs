//! Agent wire protocol: commands written to the agent's stdin and the
//! events / acknowledgements read back from its stdout.
//!
//! # Inbound shapes
//!
//! | Discriminator                          | Maps to                              |
//! |----------------------------------------|--------------------------------------|
//! | `"event":"hotkey_pressed"` / `"hotkey"`| [`AgentEvent::Hotkey`]               |
//! | `"event":"clipboard"`                  | [`AgentEvent::Clipboard`]            |
//! | `"event":"key_press"` / `"key_release"`| [`AgentEvent::KeyStream`]            |
//! | `"event_type":"KeyPress"/"KeyRelease"` | [`AgentEvent::KeyStream`] (legacy)   |
//! | `"event":"ready"`                      | [`AgentEvent::Ready`]                |
//! | `"event":"error"`                      | [`AgentEvent::Error`]                |
//! | `"status":…` + `"command":…`           | [`AgentResponse`]                    |
//! | *(anything else)*                      | Skipped; logged at `DEBUG`           |

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::{AppError, Result};

/// Error code attached to [`AgentEvent::Error`] when a line fails to parse.
pub const PARSE_ERROR_CODE: &str = "PARSE_ERROR";

/// One `{id, shortcut}` pair as sent to the agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HotkeyRegistration {
    /// Opaque identifier echoed back in `hotkey_pressed` events.
    pub id: String,
    /// Shortcut string understood by the agent (e.g. `ctrl+alt+q`).
    pub shortcut: String,
}

/// Commands sent from the host to the agent, one JSON object per line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum AgentCommand {
    /// Register a single global hotkey.
    #[serde(rename = "register")]
    RegisterHotkey { id: String, shortcut: String },
    /// Unregister a single global hotkey.
    #[serde(rename = "unregister")]
    UnregisterHotkey { id: String, shortcut: String },
    /// Drop every hotkey the agent currently holds.
    UnregisterAll,
    /// Register many hotkeys in one write.
    RegisterBatch { hotkeys: Vec<HotkeyRegistration> },
    /// Replace the system clipboard contents.
    SetClipboard { text: String },
    /// Toggle clipboard change notifications.
    SetClipboardMonitoring { enabled: bool },
    /// Ask the agent to exit.
    Quit,
}

impl AgentCommand {
    /// Wire name of the command, used to correlate acknowledgements.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::RegisterHotkey { .. } => "register",
            Self::UnregisterHotkey { .. } => "unregister",
            Self::UnregisterAll => "unregister_all",
            Self::RegisterBatch { .. } => "register_batch",
            Self::SetClipboard { .. } => "set_clipboard",
            Self::SetClipboardMonitoring { .. } => "set_clipboard_monitoring",
            Self::Quit => "quit",
        }
    }

    /// Serialise to a single NDJSON line (without the trailing newline).
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Protocol`] if serialisation fails.
    pub fn to_line(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| AppError::Protocol(format!("failed to serialise command: {e}")))
    }
}

/// Direction of a raw key-stream event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyEventType {
    /// Key went down.
    Press,
    /// Key came up.
    Release,
}

/// Events emitted by the agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentEvent {
    /// A registered global hotkey fired.
    Hotkey {
        /// Identifier supplied at registration time.
        id: String,
        /// Shortcut string, when the agent echoes it.
        shortcut: Option<String>,
    },
    /// The system clipboard changed.
    Clipboard {
        /// New clipboard text.
        text: String,
        /// Agent-side timestamp in milliseconds since the epoch.
        timestamp: u64,
    },
    /// A raw key press or release.
    KeyStream {
        /// Press or release.
        event_type: KeyEventType,
        /// Key name as reported by the agent.
        key: String,
    },
    /// The agent finished starting up.
    Ready,
    /// The agent or the host-side parser reported a problem.
    Error {
        /// Human-readable description.
        message: String,
        /// Optional machine-readable code.
        code: Option<String>,
    },
}

/// Subscription key for [`AgentEvent`] variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AgentEventKind {
    Hotkey,
    Clipboard,
    KeyStream,
    Ready,
    Error,
}

impl AgentEvent {
    /// The subscription key for this event.
    #[must_use]
    pub fn kind(&self) -> AgentEventKind {
        match self {
            Self::Hotkey { .. } => AgentEventKind::Hotkey,
            Self::Clipboard { .. } => AgentEventKind::Clipboard,
            Self::KeyStream { .. } => AgentEventKind::KeyStream,
            Self::Ready => AgentEventKind::Ready,
            Self::Error { .. } => AgentEventKind::Error,
        }
    }

    /// Build the non-fatal error event reported for an unparseable line.
    #[must_use]
    pub fn parse_error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
            code: Some(PARSE_ERROR_CODE.to_owned()),
        }
    }
}

/// Outcome reported in an [`AgentResponse`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Success,
    Error,
}

/// Acknowledgement of a command. Carries no request ID; see
/// [`PendingAcks`](crate::agent::bus::PendingAcks) for how it is correlated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentResponse {
    pub status: ResponseStatus,
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

/// A fully parsed line from the agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundMessage {
    Event(AgentEvent),
    Response(AgentResponse),
}

#[derive(Debug, Deserialize)]
struct HotkeyFields {
    id: String,
    shortcut: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ClipboardFields {
    text: String,
    #[serde(default)]
    timestamp: u64,
}

#[derive(Debug, Deserialize)]
struct KeyFields {
    key: String,
}

#[derive(Debug, Deserialize)]
struct ErrorFields {
    message: String,
    #[serde(default)]
    code: Option<Value>,
}

/// Parse a single NDJSON line from the agent.
///
/// # Return value
///
/// - `Ok(Some(msg))`: a recognised event or acknowledgement.
/// - `Ok(None)`: blank line or an object with an unknown discriminator.
/// - `Err(AppError::Protocol(..))`: not JSON, not an object, or a known
///   event with missing fields.
///
/// # Errors
///
/// See above; every error is local to this line.
pub fn parse_inbound_line(line: &str) -> Result<Option<InboundMessage>> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    let value: Value = serde_json::from_str(trimmed)
        .map_err(|e| AppError::Protocol(format!("malformed json: {e}")))?;
    let Value::Object(fields) = value else {
        return Err(AppError::Protocol("expected a json object".into()));
    };

    if let Some(event) = fields.get("event").and_then(Value::as_str) {
        let event = event.to_owned();
        return parse_event(&event, fields).map(|e| e.map(InboundMessage::Event));
    }

    if let Some(event_type) = fields.get("event_type").and_then(Value::as_str) {
        let event_type = event_type.to_owned();
        return parse_legacy_key_event(&event_type, fields)
            .map(|e| e.map(InboundMessage::Event));
    }

    if fields.contains_key("status") {
        let response: AgentResponse = from_fields(fields, "response")?;
        return Ok(Some(InboundMessage::Response(response)));
    }

    debug!(line = trimmed, "agent reader: skipping message with no discriminator");
    Ok(None)
}

fn parse_event(event: &str, fields: Map<String, Value>) -> Result<Option<AgentEvent>> {
    let parsed = match event {
        "hotkey_pressed" | "hotkey" => {
            let f: HotkeyFields = from_fields(fields, event)?;
            AgentEvent::Hotkey {
                id: f.id,
                shortcut: f.shortcut,
            }
        }
        "clipboard" => {
            let f: ClipboardFields = from_fields(fields, event)?;
            AgentEvent::Clipboard {
                text: f.text,
                timestamp: f.timestamp,
            }
        }
        "key_press" | "key_release" => {
            let f: KeyFields = from_fields(fields, event)?;
            AgentEvent::KeyStream {
                event_type: if event == "key_press" {
                    KeyEventType::Press
                } else {
                    KeyEventType::Release
                },
                key: f.key,
            }
        }
        "ready" => AgentEvent::Ready,
        "error" => {
            let f: ErrorFields = from_fields(fields, event)?;
            AgentEvent::Error {
                message: f.message,
                code: f.code.map(|c| match c {
                    Value::String(s) => s,
                    other => other.to_string(),
                }),
            }
        }
        other => {
            debug!(event = other, "agent reader: skipping unknown event");
            return Ok(None);
        }
    };
    Ok(Some(parsed))
}

fn parse_legacy_key_event(event_type: &str, fields: Map<String, Value>) -> Result<Option<AgentEvent>> {
    let direction = match event_type {
        "KeyPress" => KeyEventType::Press,
        "KeyRelease" => KeyEventType::Release,
        other => {
            debug!(event_type = other, "agent reader: skipping unknown legacy event");
            return Ok(None);
        }
    };
    let f: KeyFields = from_fields(fields, event_type)?;
    Ok(Some(AgentEvent::KeyStream {
        event_type: direction,
        key: f.key,
    }))
}

fn from_fields<T: serde::de::DeserializeOwned>(fields: Map<String, Value>, what: &str) -> Result<T> {
    serde_json::from_value(Value::Object(fields))
        .map_err(|e| AppError::Protocol(format!("missing required field in `{what}`: {e}")))
}
