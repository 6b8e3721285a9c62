//! LLM provider registry, credential store, and per-spell provider selection.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::{AppError, Result};

/// Preference scope consulted during selection.
pub const DEFAULT_PREFERENCE_SCOPE: &str = "default";

/// Where a provider runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Remote API.
    Cloud,
    /// Server on this machine.
    Local,
}

/// A named LLM backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LlmProvider {
    /// Unique provider name.
    pub name: String,
    /// Cloud or local.
    pub kind: ProviderKind,
    /// Supported models; the first one is the default.
    pub models: Vec<String>,
    /// Base URL, for providers that have a fixed one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// Whether an API key must be present for the provider to be usable.
    #[serde(default)]
    pub requires_api_key: bool,
}

/// Built-in providers, always registered.
#[must_use]
pub fn builtin_providers() -> Vec<LlmProvider> {
    vec![
        LlmProvider {
            name: "openai".into(),
            kind: ProviderKind::Cloud,
            models: vec!["gpt-4o".into(), "gpt-4o-mini".into(), "gpt-3.5-turbo".into()],
            endpoint: None,
            requires_api_key: true,
        },
        LlmProvider {
            name: "anthropic".into(),
            kind: ProviderKind::Cloud,
            models: vec![
                "claude-3-5-sonnet-20241022".into(),
                "claude-3-haiku-20240307".into(),
            ],
            endpoint: None,
            requires_api_key: true,
        },
        LlmProvider {
            name: "local-ollama".into(),
            kind: ProviderKind::Local,
            models: vec!["llama3.2:1b".into(), "llama3.2:3b".into(), "llama3.1:8b".into()],
            endpoint: Some("http://localhost:11434".into()),
            requires_api_key: false,
        },
    ]
}

/// Provider settings handed to one spell execution. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderConfig {
    /// Name of the chosen provider.
    pub provider: String,
    /// Default model of the chosen provider.
    pub model: String,
    /// API key, only when the provider requires one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Endpoint, only when the provider defines one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// Extra provider settings.
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub config: Map<String, Value>,
}

/// Provider registry plus the in-memory credential store.
///
/// Mutations (`set_api_key`, `set_provider_preference`, `register_provider`)
/// apply to the next selection; nothing is cached between calls.
#[derive(Debug)]
pub struct ProviderManager {
    providers: RwLock<Vec<LlmProvider>>,
    api_keys: RwLock<HashMap<String, String>>,
    preferences: RwLock<HashMap<String, String>>,
}

impl Default for ProviderManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderManager {
    /// Manager with the built-in providers and no credentials.
    #[must_use]
    pub fn new() -> Self {
        Self {
            providers: RwLock::new(builtin_providers()),
            api_keys: RwLock::new(HashMap::new()),
            preferences: RwLock::new(HashMap::new()),
        }
    }

    /// Register `provider`, replacing any provider with the same name.
    pub fn register_provider(&self, provider: LlmProvider) {
        let mut providers = write(&self.providers);
        match providers.iter_mut().find(|p| p.name == provider.name) {
            Some(existing) => {
                debug!(provider = provider.name.as_str(), "provider replaced");
                *existing = provider;
            }
            None => providers.push(provider),
        }
    }

    /// Every registered provider, built-ins first.
    #[must_use]
    pub fn list_providers(&self) -> Vec<LlmProvider> {
        read(&self.providers).clone()
    }

    /// Models of `name`, empty if unknown.
    #[must_use]
    pub fn provider_models(&self, name: &str) -> Vec<String> {
        self.provider(name).map(|p| p.models).unwrap_or_default()
    }

    /// Store an API key for `provider`.
    pub fn set_api_key(&self, provider: &str, api_key: impl Into<String>) {
        write(&self.api_keys).insert(provider.to_owned(), api_key.into());
        info!(provider, "api key stored");
    }

    /// Set the preferred provider for `scope`. Selection consults the
    /// [`DEFAULT_PREFERENCE_SCOPE`] scope.
    pub fn set_provider_preference(&self, scope: &str, provider: &str) {
        write(&self.preferences).insert(scope.to_owned(), provider.to_owned());
        debug!(scope, provider, "provider preference set");
    }

    /// Whether `name` is known and has every credential it needs.
    #[must_use]
    pub fn has_credentials(&self, name: &str) -> bool {
        self.provider(name)
            .is_some_and(|provider| self.is_available(&provider))
    }

    /// Choose a provider for a spell and build its config.
    ///
    /// Selection order: `default_provider` → global preference → first
    /// available local provider → first available provider. Only names in
    /// `supported` are considered; a provider is available when it is known
    /// and has its API key if it needs one.
    ///
    /// # Errors
    ///
    /// - [`AppError::ProviderUnavailable`] if no supported provider is available.
    /// - [`AppError::Config`] if the chosen provider lists no models.
    pub fn get_provider_config(
        &self,
        supported: &[String],
        default_provider: Option<&str>,
    ) -> Result<ProviderConfig> {
        let provider = self
            .select_provider(supported, default_provider)
            .ok_or_else(|| AppError::ProviderUnavailable(supported.to_vec()))?;

        let model = provider.models.first().cloned().ok_or_else(|| {
            AppError::Config(format!("no models available for provider {}", provider.name))
        })?;

        let api_key = if provider.requires_api_key {
            read(&self.api_keys).get(&provider.name).cloned()
        } else {
            None
        };

        debug!(provider = provider.name.as_str(), model = model.as_str(), "provider selected");
        Ok(ProviderConfig {
            provider: provider.name,
            model,
            api_key,
            endpoint: provider.endpoint,
            config: Map::new(),
        })
    }

    fn select_provider(
        &self,
        supported: &[String],
        default_provider: Option<&str>,
    ) -> Option<LlmProvider> {
        let candidate = |name: &str| -> Option<LlmProvider> {
            if !supported.iter().any(|s| s == name) {
                return None;
            }
            self.provider(name).filter(|p| self.is_available(p))
        };

        if let Some(chosen) = default_provider.and_then(candidate) {
            return Some(chosen);
        }

        let preference = read(&self.preferences)
            .get(DEFAULT_PREFERENCE_SCOPE)
            .cloned();
        if let Some(chosen) = preference.as_deref().and_then(candidate) {
            return Some(chosen);
        }

        let available: Vec<LlmProvider> = supported.iter().filter_map(|s| candidate(s)).collect();
        available
            .iter()
            .find(|p| p.kind == ProviderKind::Local)
            .or_else(|| available.first())
            .cloned()
    }

    fn provider(&self, name: &str) -> Option<LlmProvider> {
        read(&self.providers).iter().find(|p| p.name == name).cloned()
    }

    fn is_available(&self, provider: &LlmProvider) -> bool {
        !provider.requires_api_key || read(&self.api_keys).contains_key(&provider.name)
    }
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}
