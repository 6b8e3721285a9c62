//! Shared helpers for process-level integration tests.
//!
//! Fake agents and spells are small `sh` scripts written into a temp
//! directory, so the tests only run on Unix.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use spellhost::agent::SupervisorConfig;
use spellhost::provider::ProviderManager;
use spellhost::runtime::RuntimeManager;
use spellhost::spell::SpellRunner;

/// Agent that reports ready, acknowledges `register_batch` and
/// `set_clipboard`, fires `ctrl+alt+q` once hotkeys are registered, and
/// exits on `quit`.
pub const COOPERATIVE_AGENT: &str = r#"#!/bin/sh
echo '{"event":"ready"}'
while IFS= read -r line; do
  case "$line" in
    *'"command":"quit"'*) exit 0 ;;
    *'"command":"register_batch"'*)
      echo '{"status":"success","command":"register_batch"}'
      echo '{"event":"hotkey_pressed","id":"ctrl+alt+q","shortcut":"ctrl+alt+q"}'
      ;;
    *'"command":"set_clipboard"'*)
      echo '{"status":"success","command":"set_clipboard","message":"clipboard set"}'
      ;;
  esac
done
"#;

/// Write an executable script and return its path.
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, body).expect("write script");
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
        .expect("chmod script");
    path
}

/// Supervisor timings short enough for tests.
pub fn fast_supervisor_config() -> SupervisorConfig {
    SupervisorConfig {
        startup_timeout: Duration::from_secs(5),
        shutdown_timeout: Duration::from_millis(300),
        command_timeout: Duration::from_secs(2),
    }
}

/// Create `<root>/<id>/` with a `sh` spell whose entry is `main.sh`.
///
/// `extra` is spliced into the manifest object, e.g.
/// `r#","providers_supported":["local-ollama"]"#`.
pub fn write_spell(root: &Path, id: &str, script: &str, extra: &str) -> PathBuf {
    let dir = root.join(id);
    std::fs::create_dir_all(&dir).expect("create spell dir");
    std::fs::write(
        dir.join("plugin.json"),
        format!(r#"{{"id":"{id}","type":"spell","entry":"main.sh","runtime":"sh"{extra}}}"#),
    )
    .expect("write manifest");
    std::fs::write(dir.join("main.sh"), script).expect("write entry");
    dir
}

/// Runner with default managers and the given timeout.
pub fn runner(timeout: Duration) -> SpellRunner {
    SpellRunner::new(
        Arc::new(RuntimeManager::new(None)),
        Arc::new(ProviderManager::new()),
    )
    .with_timeout(timeout)
}
