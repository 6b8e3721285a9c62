//! Unit tests for `RuntimeManager` tiered resolution.

use std::path::{Path, PathBuf};

use spellhost::runtime::{executable_names, RuntimeManager};
use spellhost::AppError;

fn touch(path: &Path) -> PathBuf {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("create parent");
    }
    std::fs::write(path, "#!/bin/sh\n").expect("write file");
    path.to_path_buf()
}

// ── Tier order ──────────────────────────────────────────────────────────────

/// A user override wins even when the system `PATH` has the language.
#[cfg(unix)]
#[tokio::test]
async fn user_override_beats_system_path() {
    let dir = tempfile::tempdir().expect("tempdir");
    let custom = touch(&dir.path().join("custom-sh"));
    let manager = RuntimeManager::new(None);
    manager.set_user_runtime_path("sh", &custom);

    let resolved = manager.resolve_runtime("sh").await.expect("resolve");
    assert_eq!(resolved, custom);
}

#[tokio::test]
async fn managed_install_is_used_when_no_override() {
    let root = tempfile::tempdir().expect("tempdir");
    let name = executable_names("spelltestlang")
        .into_iter()
        .next()
        .expect("name");
    let managed = touch(&root.path().join("spelltestlang").join("bin").join(name));
    let manager = RuntimeManager::new(Some(root.path().to_path_buf()));

    let info = manager.runtime_info("spelltestlang").await.expect("resolves");
    assert_eq!(info.executable, managed);
    assert!(info.managed);
    assert!(!info.user_provided);
}

#[tokio::test]
async fn override_that_is_not_a_file_falls_through() {
    let root = tempfile::tempdir().expect("tempdir");
    let name = executable_names("spelltestlang")
        .into_iter()
        .next()
        .expect("name");
    let managed = touch(&root.path().join("spelltestlang").join("bin").join(name));
    let manager = RuntimeManager::new(Some(root.path().to_path_buf()));
    manager.set_user_runtime_path("spelltestlang", root.path());

    let resolved = manager.resolve_runtime("spelltestlang").await.expect("resolve");
    assert_eq!(resolved, managed);
}

#[tokio::test]
async fn unknown_language_is_runtime_not_found() {
    let manager = RuntimeManager::new(None);
    let err = manager
        .resolve_runtime("no-such-language-xyz")
        .await
        .expect_err("missing");
    assert!(matches!(err, AppError::RuntimeNotFound(ref l) if l == "no-such-language-xyz"));
    assert!(!manager.is_runtime_available("no-such-language-xyz").await);
}

// ── Cache ───────────────────────────────────────────────────────────────────

/// Setting an override replaces a previously cached resolution.
#[tokio::test]
async fn override_invalidates_cache() {
    let dir = tempfile::tempdir().expect("tempdir");
    let first = touch(&dir.path().join("first"));
    let second = touch(&dir.path().join("second"));
    let manager = RuntimeManager::new(None);

    manager.set_user_runtime_path("spelltestlang", &first);
    assert_eq!(manager.resolve_runtime("spelltestlang").await.expect("first"), first);

    manager.set_user_runtime_path("spelltestlang", &second);
    assert_eq!(manager.resolve_runtime("spelltestlang").await.expect("second"), second);
}

#[tokio::test]
async fn cached_path_survives_file_removal() {
    let dir = tempfile::tempdir().expect("tempdir");
    let exe = touch(&dir.path().join("exe"));
    let manager = RuntimeManager::new(None);
    manager.set_user_runtime_path("spelltestlang", &exe);
    manager.resolve_runtime("spelltestlang").await.expect("resolve");

    std::fs::remove_file(&exe).expect("remove");

    assert_eq!(manager.resolve_runtime("spelltestlang").await.expect("cached"), exe);
}

#[tokio::test]
async fn seeded_user_paths_are_reported_as_user_provided() {
    let dir = tempfile::tempdir().expect("tempdir");
    let exe = touch(&dir.path().join("exe"));
    let manager = RuntimeManager::new(None)
        .with_user_paths([("spelltestlang".to_owned(), exe.clone())].into_iter().collect());

    let info = manager.runtime_info("spelltestlang").await.expect("resolves");
    assert_eq!(info.executable, exe);
    assert!(info.user_provided);
    assert!(!info.managed);
}
