use std::path::PathBuf;

use spellhost::config::{credential_env_var, GlobalConfig, TimeoutConfig};
use spellhost::provider::ProviderKind;
use spellhost::AppError;

fn sample_toml(spells_dir: &str) -> String {
    format!(
        r#"
agent_path = "/opt/spellhost/agent"
spells_dir = '{spells_dir}'
hotkeys_dir = "/etc/spellhost/hotkeys"
hotkey_sets = ["default", "custom"]
preferred_provider = "local-ollama"

[timeouts]
agent_startup_seconds = 10
agent_shutdown_seconds = 3
agent_command_seconds = 4
spell_seconds = 60

[runtimes]
python = "/usr/local/bin/python3.12"

[[providers]]
name = "lmstudio"
kind = "local"
models = ["qwen2.5"]
endpoint = "http://localhost:1234"
"#
    )
}

fn minimal_toml(spells_dir: &str) -> String {
    format!(
        r#"
agent_path = "/opt/spellhost/agent"
spells_dir = '{spells_dir}'
"#
    )
}

#[test]
fn parses_valid_config() {
    let temp = tempfile::tempdir().expect("tempdir");
    let toml = sample_toml(temp.path().to_str().expect("utf8 path"));

    let config = GlobalConfig::from_toml_str(&toml).expect("config parses");

    assert_eq!(config.agent_path, PathBuf::from("/opt/spellhost/agent"));
    assert_eq!(config.hotkey_sets, vec!["default", "custom"]);
    assert_eq!(config.preferred_provider.as_deref(), Some("local-ollama"));
    assert_eq!(config.timeouts.agent_startup_seconds, 10);
    assert_eq!(config.timeouts.spell_seconds, 60);
    assert_eq!(
        config.runtimes.get("python"),
        Some(&PathBuf::from("/usr/local/bin/python3.12"))
    );
    assert_eq!(config.providers.len(), 1);
    assert_eq!(config.providers[0].kind, ProviderKind::Local);
    assert!(!config.providers[0].requires_api_key);
    assert!(config.api_keys.is_empty(), "api keys are never read from TOML");
    assert_eq!(
        config.spells_dir,
        temp.path().canonicalize().expect("canonicalize temp path")
    );
}

#[test]
fn defaults_timeouts() {
    let temp = tempfile::tempdir().expect("tempdir");
    let toml = minimal_toml(temp.path().to_str().expect("utf8 path"));

    let config = GlobalConfig::from_toml_str(&toml).expect("config parses");
    assert_eq!(config.timeouts, TimeoutConfig::default());
    assert_eq!(config.timeouts.agent_startup_seconds, 5);
    assert_eq!(config.timeouts.agent_shutdown_seconds, 2);
    assert_eq!(config.timeouts.agent_command_seconds, 5);
    assert_eq!(config.timeouts.spell_seconds, 30);
}

#[test]
fn defaults_optional_sections_to_empty() {
    let temp = tempfile::tempdir().expect("tempdir");
    let toml = minimal_toml(temp.path().to_str().expect("utf8 path"));

    let config = GlobalConfig::from_toml_str(&toml).expect("config parses");
    assert!(config.hotkeys_dir.is_none());
    assert!(config.hotkey_sets.is_empty());
    assert!(config.runtimes.is_empty());
    assert!(config.providers.is_empty());
    assert!(config.preferred_provider.is_none());
}

#[test]
fn rejects_missing_spells_dir() {
    let toml = r#"agent_path = "/opt/spellhost/agent""#;
    let result = GlobalConfig::from_toml_str(toml);
    assert!(matches!(result, Err(AppError::Config(_))));
}

#[test]
fn rejects_nonexistent_spells_dir() {
    let temp = tempfile::tempdir().expect("tempdir");
    let missing = temp.path().join("nope");
    let toml = minimal_toml(missing.to_str().expect("utf8 path"));

    let err = GlobalConfig::from_toml_str(&toml).expect_err("invalid");
    assert!(err.to_string().contains("spells_dir"), "got {err}");
}

#[test]
fn rejects_zero_spell_timeout() {
    let temp = tempfile::tempdir().expect("tempdir");
    let toml = format!(
        "{}\n[timeouts]\nspell_seconds = 0\n",
        minimal_toml(temp.path().to_str().expect("utf8 path"))
    );

    let err = GlobalConfig::from_toml_str(&toml).expect_err("invalid");
    assert!(err.to_string().contains("spell_seconds"), "got {err}");
}

#[test]
fn load_from_path_reads_file() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("config.toml");
    std::fs::write(&path, minimal_toml(temp.path().to_str().expect("utf8 path")))
        .expect("write config");

    let config = GlobalConfig::load_from_path(&path).expect("load");
    assert_eq!(config.agent_path, PathBuf::from("/opt/spellhost/agent"));
}

#[test]
fn load_from_missing_path_is_config_error() {
    let temp = tempfile::tempdir().expect("tempdir");
    let result = GlobalConfig::load_from_path(temp.path().join("absent.toml"));
    assert!(matches!(result, Err(AppError::Config(_))));
}

#[test]
fn credential_env_var_is_upper_snake_case() {
    assert_eq!(credential_env_var("openai"), "OPENAI_API_KEY");
    assert_eq!(credential_env_var("local-ollama"), "LOCAL_OLLAMA_API_KEY");
}
