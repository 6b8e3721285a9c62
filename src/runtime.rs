//! Language runtime resolution for spell subprocesses.
//!
//! A runtime is resolved in three tiers, each consulted only if the previous
//! one produced nothing usable:
//!
//! 1. a user-provided override ([`RuntimeManager::set_user_runtime_path`]),
//! 2. an app-managed install under `<managed_root>/<language>/bin/`,
//! 3. the system `PATH` (`which` / `where`).
//!
//! Every candidate must exist and be a regular file. Successful resolutions
//! are cached per language until an override for that language is set.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::Serialize;
use tokio::process::Command;
use tracing::{debug, info};

use crate::{AppError, Result};

/// Languages checked by [`RuntimeManager::list_available_runtimes`].
pub const KNOWN_LANGUAGES: [&str; 5] = ["python", "node", "julia", "ruby", "go"];

/// Outcome of resolving one language.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuntimeConfig {
    /// Language name as requested.
    pub name: String,
    /// Absolute path of the executable.
    pub executable: PathBuf,
    /// Whether the executable lives under the managed runtime root.
    pub managed: bool,
    /// Whether a user override exists for the language.
    pub user_provided: bool,
}

/// Resolves and caches runtime executables.
#[derive(Debug, Default)]
pub struct RuntimeManager {
    managed_root: Option<PathBuf>,
    user_paths: RwLock<HashMap<String, PathBuf>>,
    cache: RwLock<HashMap<String, PathBuf>>,
}

impl RuntimeManager {
    /// Create a manager. `managed_root` is the directory of app-managed
    /// installs, if any.
    #[must_use]
    pub fn new(managed_root: Option<PathBuf>) -> Self {
        Self {
            managed_root,
            user_paths: RwLock::new(HashMap::new()),
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Seed user overrides, typically from the `[runtimes]` config table.
    #[must_use]
    pub fn with_user_paths(self, paths: HashMap<String, PathBuf>) -> Self {
        *write(&self.user_paths) = paths;
        self
    }

    /// Resolve the executable for `language`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::RuntimeNotFound`] if no tier yields a regular file.
    pub async fn resolve_runtime(&self, language: &str) -> Result<PathBuf> {
        if let Some(cached) = read(&self.cache).get(language).cloned() {
            return Ok(cached);
        }

        let user_path = read(&self.user_paths).get(language).cloned();
        let mut resolved = None;

        if let Some(path) = user_path {
            if is_regular_file(&path).await {
                info!(language, path = %path.display(), "using user-provided runtime");
                resolved = Some(path);
            } else {
                debug!(language, path = %path.display(), "user runtime path is not a file");
            }
        }

        if resolved.is_none() {
            if let Some(path) = self.find_managed_runtime(language).await {
                info!(language, path = %path.display(), "using managed runtime");
                resolved = Some(path);
            }
        }

        if resolved.is_none() {
            if let Some(path) = find_system_runtime(language).await {
                info!(language, path = %path.display(), "using system runtime");
                resolved = Some(path);
            }
        }

        let path = resolved.ok_or_else(|| AppError::RuntimeNotFound(language.to_owned()))?;
        write(&self.cache).insert(language.to_owned(), path.clone());
        Ok(path)
    }

    /// Set a user override for `language` and drop its cached resolution.
    pub fn set_user_runtime_path(&self, language: &str, path: impl Into<PathBuf>) {
        let path = path.into();
        debug!(language, path = %path.display(), "user runtime path set");
        write(&self.user_paths).insert(language.to_owned(), path);
        write(&self.cache).remove(language);
    }

    /// Resolution details for `language`, or `None` if it cannot be resolved.
    pub async fn runtime_info(&self, language: &str) -> Option<RuntimeConfig> {
        let executable = self.resolve_runtime(language).await.ok()?;
        let managed = self
            .managed_root
            .as_deref()
            .is_some_and(|root| executable.starts_with(root));
        let user_provided = read(&self.user_paths).contains_key(language);
        Some(RuntimeConfig {
            name: language.to_owned(),
            executable,
            managed,
            user_provided,
        })
    }

    /// Every runtime in [`KNOWN_LANGUAGES`] that resolves.
    pub async fn list_available_runtimes(&self) -> Vec<RuntimeConfig> {
        let mut runtimes = Vec::new();
        for language in KNOWN_LANGUAGES {
            if let Some(info) = self.runtime_info(language).await {
                runtimes.push(info);
            }
        }
        runtimes
    }

    /// Whether `language` resolves.
    pub async fn is_runtime_available(&self, language: &str) -> bool {
        self.resolve_runtime(language).await.is_ok()
    }

    async fn find_managed_runtime(&self, language: &str) -> Option<PathBuf> {
        let bin_dir = self.managed_root.as_ref()?.join(language).join("bin");
        for name in executable_names(language) {
            let candidate = bin_dir.join(name);
            if is_regular_file(&candidate).await {
                return Some(candidate);
            }
        }
        None
    }
}

/// Executable names tried for `language`, most preferred first.
#[must_use]
pub fn executable_names(language: &str) -> Vec<String> {
    let language = language.to_lowercase();
    let base: Vec<&str> = match language.as_str() {
        "python" => vec!["python3", "python"],
        "node" | "nodejs" => vec!["node"],
        "rust" => vec!["cargo"],
        other => vec![other],
    };

    let mut names: Vec<String> = base.iter().map(|name| (*name).to_owned()).collect();
    if cfg!(windows) {
        names.extend(base.iter().map(|name| format!("{name}.exe")));
    }
    names
}

async fn find_system_runtime(language: &str) -> Option<PathBuf> {
    let finder = if cfg!(windows) { "where" } else { "which" };
    for name in executable_names(language) {
        let output = Command::new(finder)
            .arg(&name)
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .output()
            .await;
        let Ok(output) = output else {
            debug!(finder, "executable finder could not be run");
            return None;
        };
        if !output.status.success() {
            continue;
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        let Some(first) = stdout.lines().map(str::trim).find(|line| !line.is_empty()) else {
            continue;
        };
        let candidate = PathBuf::from(first);
        if is_regular_file(&candidate).await {
            return Some(candidate);
        }
    }
    None
}

async fn is_regular_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .is_ok_and(|meta| meta.is_file())
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}
