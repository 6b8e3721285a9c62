//! Error types shared across the application.

use std::fmt::{Display, Formatter};
use std::path::PathBuf;

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// File-system or I/O operation failure.
    Io(String),
    /// The agent did not emit its `ready` event within the startup window.
    StartupTimeout(String),
    /// A command required a live agent connection and none exists.
    AgentNotRunning,
    /// `start` was called while an agent connection is already live.
    AgentAlreadyRunning,
    /// The agent process exited without being asked to.
    AgentCrashed {
        /// Exit code, `None` when terminated by a signal.
        code: Option<i32>,
    },
    /// A single agent line could not be framed or parsed. Never fatal.
    Protocol(String),
    /// An acknowledged command received no matching response in time.
    CommandTimeout(String),
    /// No runtime executable could be found for the named language.
    RuntimeNotFound(String),
    /// None of the listed providers is registered and has credentials.
    ProviderUnavailable(Vec<String>),
    /// A spell manifest is missing, unreadable, or fails validation.
    ManifestInvalid {
        /// Path of the offending `plugin.json`.
        path: PathBuf,
        /// Human-readable validation failure.
        reason: String,
    },
    /// Spell subprocess spawn or pipe failure.
    Spell(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
            Self::StartupTimeout(msg) => write!(f, "startup timeout: {msg}"),
            Self::AgentNotRunning => write!(f, "agent: not running"),
            Self::AgentAlreadyRunning => write!(f, "agent: already running"),
            Self::AgentCrashed { code: Some(code) } => {
                write!(f, "agent crashed: exited with code {code}")
            }
            Self::AgentCrashed { code: None } => write!(f, "agent crashed: terminated by signal"),
            Self::Protocol(msg) => write!(f, "protocol: {msg}"),
            Self::CommandTimeout(command) => {
                write!(f, "command timeout: no response to `{command}`")
            }
            Self::RuntimeNotFound(language) => write!(
                f,
                "runtime not found: no {language} runtime found, install {language} or configure a runtime path"
            ),
            Self::ProviderUnavailable(providers) => write!(
                f,
                "provider unavailable: no available providers from: {}",
                providers.join(", ")
            ),
            Self::ManifestInvalid { path, reason } => {
                write!(f, "invalid manifest {}: {reason}", path.display())
            }
            Self::Spell(msg) => write!(f, "spell: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
