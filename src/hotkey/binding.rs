//! Hotkey bindings and named binding sets.
//!
//! A binding set is a JSON array of bindings stored as
//! `<hotkeys_dir>/<set>.json`. Sets are merged in the order they are named.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::{AppError, Result};

/// Association between a keyboard shortcut and an application action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HotkeyBinding {
    /// Shortcut string, unique within an active binding set.
    pub shortcut: String,
    /// Identifier of the action handler to invoke.
    pub action_id: String,
    /// Opaque data handed to the handler.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl HotkeyBinding {
    /// Binding without a payload.
    pub fn new(shortcut: impl Into<String>, action_id: impl Into<String>) -> Self {
        Self {
            shortcut: shortcut.into(),
            action_id: action_id.into(),
            payload: None,
        }
    }

    /// Attach a payload.
    #[must_use]
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }
}

/// Merge binding sets in order; a later binding for the same shortcut
/// replaces the earlier one but keeps its position.
#[must_use]
pub fn merge_binding_sets<I>(sets: I) -> Vec<HotkeyBinding>
where
    I: IntoIterator<Item = Vec<HotkeyBinding>>,
{
    let mut merged: Vec<HotkeyBinding> = Vec::new();
    for binding in sets.into_iter().flatten() {
        match merged.iter_mut().find(|b| b.shortcut == binding.shortcut) {
            Some(existing) => {
                debug!(shortcut = binding.shortcut.as_str(), "binding overridden by later set");
                *existing = binding;
            }
            None => merged.push(binding),
        }
    }
    merged
}

/// Load and merge the named binding sets from `dir`.
///
/// A set whose file does not exist is skipped with a warning.
///
/// # Errors
///
/// - [`AppError::Io`] if a set file exists but cannot be read.
/// - [`AppError::Config`] if a set file is not a JSON array of bindings.
pub async fn load_binding_sets(dir: &Path, names: &[String]) -> Result<Vec<HotkeyBinding>> {
    let mut sets = Vec::with_capacity(names.len());
    for name in names {
        let path = dir.join(format!("{name}.json"));
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                warn!(set = name.as_str(), path = %path.display(), "hotkey set not found, skipping");
                continue;
            }
            Err(err) => {
                return Err(AppError::Io(format!(
                    "failed to read hotkey set {}: {err}",
                    path.display()
                )));
            }
        };
        let bindings: Vec<HotkeyBinding> = serde_json::from_str(&raw).map_err(|err| {
            AppError::Config(format!("invalid hotkey set {}: {err}", path.display()))
        })?;
        debug!(set = name.as_str(), count = bindings.len(), "hotkey set loaded");
        sets.push(bindings);
    }
    Ok(merge_binding_sets(sets))
}
