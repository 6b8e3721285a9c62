#![forbid(unsafe_code)]

//! Host-side process supervision for a hotkey-driven spell launcher.
//!
//! - [`agent`]: the persistent native hotkey agent and its NDJSON protocol.
//! - [`hotkey`]: shortcut bindings and action dispatch.
//! - [`runtime`] / [`provider`]: per-spell runtime and LLM provider resolution.
//! - [`spell`]: manifests and subprocess execution.

pub mod agent;
pub mod clipboard;
pub mod config;
pub mod errors;
pub mod hotkey;
pub mod provider;
pub mod runtime;
pub mod spell;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
