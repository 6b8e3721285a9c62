//! Unit tests for `AppError` display formats.

use std::path::PathBuf;

use spellhost::AppError;

#[test]
fn each_variant_has_its_own_prefix() {
    let cases = [
        (AppError::Config("x".into()), "config:"),
        (AppError::Io("x".into()), "io:"),
        (AppError::StartupTimeout("x".into()), "startup timeout:"),
        (AppError::AgentNotRunning, "agent:"),
        (AppError::AgentAlreadyRunning, "agent:"),
        (AppError::AgentCrashed { code: Some(1) }, "agent crashed:"),
        (AppError::Protocol("x".into()), "protocol:"),
        (AppError::CommandTimeout("x".into()), "command timeout:"),
        (AppError::RuntimeNotFound("x".into()), "runtime not found:"),
        (AppError::ProviderUnavailable(vec!["x".into()]), "provider unavailable:"),
        (AppError::Spell("x".into()), "spell:"),
    ];
    for (err, prefix) in cases {
        assert!(err.to_string().starts_with(prefix), "{err} should start with {prefix}");
    }
}

#[test]
fn crash_reports_exit_code_or_signal() {
    assert_eq!(
        AppError::AgentCrashed { code: Some(3) }.to_string(),
        "agent crashed: exited with code 3"
    );
    assert_eq!(
        AppError::AgentCrashed { code: None }.to_string(),
        "agent crashed: terminated by signal"
    );
}

#[test]
fn runtime_not_found_suggests_install() {
    let msg = AppError::RuntimeNotFound("python".into()).to_string();
    assert!(msg.contains("no python runtime found"));
    assert!(msg.contains("install python"));
}

#[test]
fn provider_unavailable_lists_providers() {
    let msg = AppError::ProviderUnavailable(vec!["openai".into(), "anthropic".into()]).to_string();
    assert!(msg.ends_with("openai, anthropic"), "got {msg}");
}

#[test]
fn manifest_invalid_names_path_and_reason() {
    let err = AppError::ManifestInvalid {
        path: PathBuf::from("/spells/x/plugin.json"),
        reason: "required field `entry` is empty".into(),
    };
    let msg = err.to_string();
    assert!(msg.contains("/spells/x/plugin.json"));
    assert!(msg.contains("`entry`"));
}

#[test]
fn error_messages_have_no_trailing_period() {
    let samples = [
        AppError::AgentNotRunning,
        AppError::CommandTimeout("register_batch".into()),
        AppError::RuntimeNotFound("node".into()),
    ];
    for err in samples {
        let s = err.to_string();
        assert!(!s.ends_with('.'), "error message must not end with a period: {s}");
    }
}

#[test]
fn io_errors_convert() {
    let err: AppError = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
    assert!(matches!(err, AppError::Io(ref m) if m == "gone"));
}

#[test]
fn toml_errors_convert_to_config() {
    let parse = toml::from_str::<toml::Value>("= broken").expect_err("invalid toml");
    let err: AppError = parse.into();
    assert!(err.to_string().starts_with("config: invalid config:"));
}
