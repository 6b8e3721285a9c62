//! Spell subprocess wire types.
//!
//! The host writes one [`SpellRequest`] line to the spell's stdin and reads
//! one [`SpellResult`] object back from its stdout.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Error codes carried by [`SpellError::code`].
pub mod error_code {
    /// Execution exceeded the runner timeout.
    pub const TIMEOUT: &str = "TIMEOUT";
    /// The process exited unsuccessfully without producing a result.
    pub const NON_ZERO_EXIT: &str = "NON_ZERO_EXIT";
    /// The process exited cleanly but its output was not a result.
    pub const PARSE_ERROR: &str = "PARSE_ERROR";
    /// The process could not be spawned or awaited.
    pub const PROCESS_ERROR: &str = "PROCESS_ERROR";
    /// Manifest, runtime, or provider resolution failed before spawning.
    pub const EXECUTION_ERROR: &str = "EXECUTION_ERROR";
}

/// Payload written to the spell's stdin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpellRequest {
    /// Text to transform.
    pub input: String,
    /// Model chosen for the spell.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Provider API key, when the provider needs one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Provider and manifest settings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<Map<String, Value>>,
}

impl SpellRequest {
    /// Request carrying only `input`.
    pub fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            model: None,
            api_key: None,
            config: None,
        }
    }
}

/// Outcome reported by a spell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpellStatus {
    /// `output` is populated.
    Success,
    /// `error` is populated.
    Error,
}

/// Failure description inside an error result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpellError {
    /// Machine-readable code, see [`error_code`].
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Extra context such as captured stderr.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Result object produced by a spell, or synthesised by the runner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpellResult {
    /// Success or error.
    pub status: SpellStatus,
    /// Transformed text on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    /// Free-form metadata, preserved as-is.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
    /// Failure description on error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<SpellError>,
}

impl SpellResult {
    /// Successful result with `output`.
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            status: SpellStatus::Success,
            output: Some(output.into()),
            metadata: None,
            error: None,
        }
    }

    /// Error result.
    pub fn error(
        code: impl Into<String>,
        message: impl Into<String>,
        details: Option<String>,
    ) -> Self {
        Self {
            status: SpellStatus::Error,
            output: None,
            metadata: None,
            error: Some(SpellError {
                code: code.into(),
                message: message.into(),
                details,
            }),
        }
    }

    /// Whether `status` is success.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == SpellStatus::Success
    }

    /// Error code, if this is an error result.
    #[must_use]
    pub fn error_code(&self) -> Option<&str> {
        self.error.as_ref().map(|e| e.code.as_str())
    }

    /// Exactly one of `output` / `error` is populated, matching `status`.
    #[must_use]
    pub fn is_well_formed(&self) -> bool {
        match self.status {
            SpellStatus::Success => self.output.is_some() && self.error.is_none(),
            SpellStatus::Error => self.error.is_some() && self.output.is_none(),
        }
    }

    /// Insert one metadata entry, creating the map if needed.
    pub fn stamp(&mut self, key: &str, value: impl Into<Value>) {
        self.metadata
            .get_or_insert_with(Map::new)
            .insert(key.to_owned(), value.into());
    }
}
