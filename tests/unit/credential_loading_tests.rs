//! Unit tests for provider API key loading.
//!
//! The keychain service `spellhost` has no entries in test environments, so
//! every lookup falls through to the `<PROVIDER>_API_KEY` variables.
//!
//! NOTE: These tests mutate process-global env vars and must run serially.

use spellhost::config::GlobalConfig;

fn sample_toml(spells_dir: &str) -> String {
    format!(
        r#"
agent_path = "/opt/spellhost/agent"
spells_dir = '{spells_dir}'

[[providers]]
name = "groq-cloud"
kind = "cloud"
models = ["llama-3.1-70b"]
requires_api_key = true
"#
    )
}

/// Helper: build a test config from a temp dir.
fn make_config() -> (tempfile::TempDir, GlobalConfig) {
    let temp = tempfile::tempdir().expect("tempdir");
    let toml = sample_toml(temp.path().to_str().expect("utf8 path"));
    let config = GlobalConfig::from_toml_str(&toml).expect("config parses");
    (temp, config)
}

/// Built-in and configured providers both pick up env-var keys.
#[tokio::test]
#[serial_test::serial]
#[allow(unsafe_code, unused_unsafe)]
async fn env_var_credential_loading() {
    let (_temp, mut config) = make_config();

    unsafe {
        std::env::set_var("OPENAI_API_KEY", "sk-openai-test");
        std::env::set_var("GROQ_CLOUD_API_KEY", "gsk-test");
        std::env::remove_var("ANTHROPIC_API_KEY");
    }

    config.load_credentials().await.expect("load credentials");

    assert_eq!(config.api_keys.get("openai").map(String::as_str), Some("sk-openai-test"));
    assert_eq!(config.api_keys.get("groq-cloud").map(String::as_str), Some("gsk-test"));
    assert!(!config.api_keys.contains_key("anthropic"));
    assert!(
        !config.api_keys.contains_key("local-ollama"),
        "keyless providers are never looked up"
    );

    unsafe {
        std::env::remove_var("OPENAI_API_KEY");
        std::env::remove_var("GROQ_CLOUD_API_KEY");
    }
}

/// A missing key is not an error; the provider just stays unavailable.
#[tokio::test]
#[serial_test::serial]
#[allow(unsafe_code, unused_unsafe)]
async fn missing_credentials_are_not_an_error() {
    let (_temp, mut config) = make_config();

    unsafe {
        std::env::remove_var("OPENAI_API_KEY");
        std::env::remove_var("ANTHROPIC_API_KEY");
        std::env::remove_var("GROQ_CLOUD_API_KEY");
    }

    config.load_credentials().await.expect("load credentials");
    assert!(config.api_keys.is_empty());
}

/// Empty env vars count as absent.
#[tokio::test]
#[serial_test::serial]
#[allow(unsafe_code, unused_unsafe)]
async fn empty_env_var_is_ignored() {
    let (_temp, mut config) = make_config();

    unsafe {
        std::env::set_var("ANTHROPIC_API_KEY", "");
        std::env::remove_var("OPENAI_API_KEY");
        std::env::remove_var("GROQ_CLOUD_API_KEY");
    }

    config.load_credentials().await.expect("load credentials");
    assert!(!config.api_keys.contains_key("anthropic"));

    unsafe {
        std::env::remove_var("ANTHROPIC_API_KEY");
    }
}
