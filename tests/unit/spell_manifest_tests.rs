//! Unit tests for `plugin.json` loading and spell discovery.

use std::path::Path;

use spellhost::spell::manifest::{
    list_spells, load_manifest, FilesystemAccess, NetworkAccess, SpellType, MANIFEST_FILE,
};
use spellhost::AppError;

fn write_manifest(dir: &Path, body: &str) {
    std::fs::create_dir_all(dir).expect("create spell dir");
    std::fs::write(dir.join(MANIFEST_FILE), body).expect("write manifest");
}

const FULL: &str = r#"{
    "id": "summarize",
    "type": "spell",
    "name": "Summarize",
    "version": "1.0.0",
    "entry": "main.py",
    "runtime": "python",
    "shortcut": "ctrl+alt+s",
    "permissions": {"filesystem": "ro", "network": "full", "subprocess": false, "shell": false},
    "providers_supported": ["openai", "local-ollama"],
    "default_provider": "openai",
    "author": {"name": "Ada"},
    "prompt_template": "Summarize: {input}",
    "max_tokens": 256
}"#;

#[tokio::test]
async fn loads_full_manifest() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_manifest(dir.path(), FULL);

    let manifest = load_manifest(dir.path()).await.expect("manifest");

    assert_eq!(manifest.id, "summarize");
    assert_eq!(manifest.spell_type, SpellType::Spell);
    assert_eq!(manifest.permissions.filesystem, FilesystemAccess::ReadOnly);
    assert_eq!(manifest.permissions.network, NetworkAccess::Full);
    assert_eq!(manifest.providers_supported, vec!["openai", "local-ollama"]);
    assert_eq!(manifest.max_tokens, Some(256));
    assert_eq!(
        manifest.entry_path(dir.path()).expect("entry"),
        dir.path().join("main.py")
    );
}

#[tokio::test]
async fn permissions_default_to_denied() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_manifest(
        dir.path(),
        r#"{"id":"echo","type":"echo","entry":"run.sh","runtime":"sh"}"#,
    );

    let manifest = load_manifest(dir.path()).await.expect("manifest");
    assert_eq!(manifest.permissions.filesystem, FilesystemAccess::Denied);
    assert_eq!(manifest.permissions.network, NetworkAccess::Denied);
    assert!(manifest.providers_supported.is_empty());
}

// ── Invalid manifests ───────────────────────────────────────────────────────

#[tokio::test]
async fn missing_entry_field_is_invalid() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_manifest(dir.path(), r#"{"id":"x","type":"spell","runtime":"python"}"#);

    let err = load_manifest(dir.path()).await.expect_err("invalid");
    assert!(matches!(err, AppError::ManifestInvalid { .. }), "got {err}");
}

#[tokio::test]
async fn blank_runtime_is_invalid() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_manifest(
        dir.path(),
        r#"{"id":"x","type":"spell","entry":"main.py","runtime":"  "}"#,
    );

    let err = load_manifest(dir.path()).await.expect_err("invalid");
    assert!(err.to_string().contains("runtime"), "got {err}");
}

#[tokio::test]
async fn missing_manifest_file_is_invalid() {
    let dir = tempfile::tempdir().expect("tempdir");
    let err = load_manifest(dir.path()).await.expect_err("missing");
    match err {
        AppError::ManifestInvalid { path, .. } => assert_eq!(path, dir.path().join(MANIFEST_FILE)),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn entry_outside_spell_dir_is_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_manifest(
        dir.path(),
        r#"{"id":"x","type":"spell","entry":"../evil.py","runtime":"python"}"#,
    );

    let manifest = load_manifest(dir.path()).await.expect("parses");
    let err = manifest.entry_path(dir.path()).expect_err("escape");
    assert!(matches!(err, AppError::ManifestInvalid { .. }));
}

// ── Discovery ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn list_spells_skips_broken_and_sorts() {
    let root = tempfile::tempdir().expect("tempdir");
    write_manifest(
        &root.path().join("b-translate"),
        r#"{"id":"translate","type":"spell","entry":"main.py","runtime":"python"}"#,
    );
    write_manifest(&root.path().join("a-summarize"), FULL);
    write_manifest(&root.path().join("c-broken"), "{");
    std::fs::write(root.path().join("stray.txt"), "not a spell").expect("write stray");

    let spells = list_spells(root.path()).await.expect("list");

    let ids: Vec<&str> = spells.iter().map(|s| s.manifest.id.as_str()).collect();
    assert_eq!(ids, vec!["summarize", "translate"]);
}

#[tokio::test]
async fn list_spells_on_missing_dir_is_io_error() {
    let root = tempfile::tempdir().expect("tempdir");
    let err = list_spells(&root.path().join("absent"))
        .await
        .expect_err("missing dir");
    assert!(matches!(err, AppError::Io(_)));
}
