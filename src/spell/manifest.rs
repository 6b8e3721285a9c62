//! Spell manifest (`plugin.json`) loading and validation.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{AppError, Result};

/// Manifest file name inside each spell directory.
pub const MANIFEST_FILE: &str = "plugin.json";

/// Kind of spell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpellType {
    /// One-shot text transformation.
    Spell,
    /// Speech-driven spell.
    Whisper,
    /// Spell that repeats its input back.
    Echo,
    /// Multi-step spell.
    Incantation,
}

/// Filesystem access requested by a spell.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilesystemAccess {
    /// Read and write.
    #[serde(rename = "full")]
    Full,
    /// Read only.
    #[serde(rename = "ro")]
    ReadOnly,
    /// No access.
    #[default]
    #[serde(rename = "none")]
    Denied,
}

/// Network access requested by a spell.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetworkAccess {
    /// Unrestricted.
    #[serde(rename = "full")]
    Full,
    /// No access.
    #[default]
    #[serde(rename = "none")]
    Denied,
}

/// Permissions declared by a spell.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permissions {
    #[serde(default)]
    pub filesystem: FilesystemAccess,
    #[serde(default)]
    pub network: NetworkAccess,
    #[serde(default)]
    pub subprocess: bool,
    #[serde(default)]
    pub shell: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub microphone: Option<bool>,
}

/// Spell author.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Parsed `plugin.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpellManifest {
    pub id: String,
    #[serde(rename = "type")]
    pub spell_type: SpellType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Entry script, relative to the spell directory.
    pub entry: String,
    /// Language name resolved through the runtime manager.
    pub runtime: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shortcut: Option<String>,
    #[serde(default)]
    pub permissions: Permissions,
    #[serde(default)]
    pub providers_supported: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<Author>,
    /// Models per provider.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub models: Option<HashMap<String, Vec<String>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_template: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl SpellManifest {
    /// Absolute path of the entry script inside `spell_dir`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::ManifestInvalid`] if `entry` is absolute or
    /// contains a `..` component.
    pub fn entry_path(&self, spell_dir: &Path) -> Result<PathBuf> {
        let entry = Path::new(&self.entry);
        let escapes = entry
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes {
            return Err(AppError::ManifestInvalid {
                path: spell_dir.join(MANIFEST_FILE),
                reason: format!("entry {:?} escapes the spell directory", self.entry),
            });
        }
        Ok(spell_dir.join(entry))
    }

    fn validate(&self, path: &Path) -> Result<()> {
        let missing = [
            ("id", &self.id),
            ("entry", &self.entry),
            ("runtime", &self.runtime),
        ]
        .into_iter()
        .find(|(_, value)| value.trim().is_empty());

        match missing {
            Some((field, _)) => Err(AppError::ManifestInvalid {
                path: path.to_path_buf(),
                reason: format!("required field `{field}` is empty"),
            }),
            None => Ok(()),
        }
    }
}

/// A spell found on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstalledSpell {
    /// Spell directory.
    pub directory: PathBuf,
    /// Its manifest.
    pub manifest: SpellManifest,
}

/// Load and validate `<spell_dir>/plugin.json`.
///
/// # Errors
///
/// Returns [`AppError::ManifestInvalid`] if the file is missing, is not
/// valid JSON, or lacks a required field (`id`, `type`, `entry`, `runtime`).
pub async fn load_manifest(spell_dir: &Path) -> Result<SpellManifest> {
    let path = spell_dir.join(MANIFEST_FILE);
    let raw = tokio::fs::read_to_string(&path)
        .await
        .map_err(|err| AppError::ManifestInvalid {
            path: path.clone(),
            reason: format!("failed to read: {err}"),
        })?;
    let manifest: SpellManifest =
        serde_json::from_str(&raw).map_err(|err| AppError::ManifestInvalid {
            path: path.clone(),
            reason: err.to_string(),
        })?;
    manifest.validate(&path)?;
    Ok(manifest)
}

/// Every loadable spell under `spells_dir`, sorted by directory.
///
/// Subdirectories whose manifest fails to load are skipped with a warning.
///
/// # Errors
///
/// Returns [`AppError::Io`] if `spells_dir` cannot be read.
pub async fn list_spells(spells_dir: &Path) -> Result<Vec<InstalledSpell>> {
    let mut entries = tokio::fs::read_dir(spells_dir).await.map_err(|err| {
        AppError::Io(format!(
            "failed to read spells directory {}: {err}",
            spells_dir.display()
        ))
    })?;

    let mut spells = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let is_dir = entry.file_type().await.is_ok_and(|t| t.is_dir());
        if !is_dir {
            continue;
        }
        let directory = entry.path();
        match load_manifest(&directory).await {
            Ok(manifest) => {
                debug!(spell_id = manifest.id.as_str(), "spell found");
                spells.push(InstalledSpell {
                    directory,
                    manifest,
                });
            }
            Err(err) => warn!(dir = %directory.display(), %err, "skipping spell"),
        }
    }

    spells.sort_by(|a, b| a.directory.cmp(&b.directory));
    Ok(spells)
}
