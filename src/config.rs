//! Global configuration parsing, validation, and credential loading.

use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, warn};

use crate::provider::{builtin_providers, LlmProvider};
use crate::{AppError, Result};

/// Keyring service name under which provider API keys are stored.
pub const KEYRING_SERVICE: &str = "spellhost";

/// Timeout values in seconds.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TimeoutConfig {
    /// How long to wait for the agent's `ready` event.
    #[serde(default = "default_agent_startup_seconds")]
    pub agent_startup_seconds: u64,
    /// Grace period per shutdown escalation step.
    #[serde(default = "default_agent_shutdown_seconds")]
    pub agent_shutdown_seconds: u64,
    /// How long to wait for a command acknowledgement.
    #[serde(default = "default_agent_command_seconds")]
    pub agent_command_seconds: u64,
    /// Upper bound on one spell execution.
    #[serde(default = "default_spell_seconds")]
    pub spell_seconds: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            agent_startup_seconds: default_agent_startup_seconds(),
            agent_shutdown_seconds: default_agent_shutdown_seconds(),
            agent_command_seconds: default_agent_command_seconds(),
            spell_seconds: default_spell_seconds(),
        }
    }
}

fn default_agent_startup_seconds() -> u64 {
    5
}

fn default_agent_shutdown_seconds() -> u64 {
    2
}

fn default_agent_command_seconds() -> u64 {
    5
}

fn default_spell_seconds() -> u64 {
    30
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Path to the native hotkey agent executable.
    pub agent_path: PathBuf,
    /// Directory holding one subdirectory per installed spell.
    pub spells_dir: PathBuf,
    /// Directory holding `<set>.json` hotkey binding sets.
    #[serde(default)]
    pub hotkeys_dir: Option<PathBuf>,
    /// Binding sets to load, merged in order.
    #[serde(default)]
    pub hotkey_sets: Vec<String>,
    /// Root of app-managed runtime installs.
    #[serde(default)]
    pub managed_runtime_dir: Option<PathBuf>,
    /// Global provider preference.
    #[serde(default)]
    pub preferred_provider: Option<String>,
    /// Timeout configuration.
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    /// User-provided runtime executables keyed by language.
    #[serde(default)]
    pub runtimes: HashMap<String, PathBuf>,
    /// Providers in addition to the built-in ones.
    #[serde(default)]
    pub providers: Vec<LlmProvider>,
    /// Provider API keys keyed by provider name (populated at runtime).
    #[serde(skip)]
    pub api_keys: HashMap<String, String>,
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string and normalize paths.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Load provider API keys from the OS keychain with env-var fallback.
    ///
    /// Every provider that requires a key is looked up under the `spellhost`
    /// keyring service as `<provider>_api_key`, then as `<PROVIDER>_API_KEY`
    /// in the environment. A missing key is not an error; the provider just
    /// stays unavailable.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the keychain task panics.
    pub async fn load_credentials(&mut self) -> Result<()> {
        let names: Vec<String> = builtin_providers()
            .into_iter()
            .chain(self.providers.iter().cloned())
            .filter(|provider| provider.requires_api_key)
            .map(|provider| provider.name)
            .collect();

        for name in names {
            match load_credential(&name).await? {
                Some(key) => {
                    self.api_keys.insert(name, key);
                }
                None => debug!(provider = name.as_str(), "no api key configured"),
            }
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        if self.timeouts.spell_seconds == 0 {
            return Err(AppError::Config(
                "timeouts.spell_seconds must be greater than zero".into(),
            ));
        }
        if self.timeouts.agent_startup_seconds == 0 {
            return Err(AppError::Config(
                "timeouts.agent_startup_seconds must be greater than zero".into(),
            ));
        }

        self.agent_path = expand_home(&self.agent_path);
        self.hotkeys_dir = self.hotkeys_dir.as_deref().map(expand_home);
        self.managed_runtime_dir = self.managed_runtime_dir.as_deref().map(expand_home);
        for path in self.runtimes.values_mut() {
            *path = expand_home(path);
        }

        self.spells_dir = expand_home(&self.spells_dir)
            .canonicalize()
            .map_err(|err| AppError::Config(format!("spells_dir invalid: {err}")))?;

        Ok(())
    }
}

/// Environment variable consulted for a provider's API key.
#[must_use]
pub fn credential_env_var(provider: &str) -> String {
    format!("{}_API_KEY", provider.to_uppercase().replace('-', "_"))
}

/// Load a single API key from OS keychain with env-var fallback.
async fn load_credential(provider: &str) -> Result<Option<String>> {
    let entry_name = format!("{provider}_api_key");
    let key = entry_name.clone();

    // keyring is synchronous I/O.
    let keychain_result = tokio::task::spawn_blocking(move || {
        keyring::Entry::new(KEYRING_SERVICE, &key).and_then(|entry| entry.get_password())
    })
    .await
    .map_err(|err| AppError::Config(format!("keychain task panicked: {err}")))?;

    match keychain_result {
        Ok(value) if !value.is_empty() => return Ok(Some(value)),
        Ok(_) => {
            warn!(key = entry_name, "keychain entry is empty, trying env var");
        }
        Err(err) => {
            debug!(key = entry_name, ?err, "keychain lookup failed, trying env var");
        }
    }

    Ok(env::var(credential_env_var(provider))
        .ok()
        .filter(|value| !value.is_empty()))
}

fn expand_home(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match env::var_os("HOME") {
        Some(home) => PathBuf::from(home).join(rest),
        None => path.to_path_buf(),
    }
}
