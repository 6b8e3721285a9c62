//! End-to-end hotkey flow: registry → supervisor → fake agent → registry.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serial_test::serial;
use tokio_util::sync::CancellationToken;

use spellhost::agent::{AgentEventKind, AgentSupervisor};
use spellhost::hotkey::{HotkeyAgent, HotkeyBinding, HotkeyRegistry};

use super::test_helpers::{fast_supervisor_config, write_script, COOPERATIVE_AGENT};

/// The agent fires `ctrl+alt+q` after `register_batch`; its handler runs
/// exactly once.
#[tokio::test]
#[serial]
async fn agent_hotkey_invokes_bound_action_once() {
    let dir = tempfile::tempdir().expect("tempdir");
    let agent = write_script(dir.path(), "agent.sh", COOPERATIVE_AGENT);
    let supervisor = Arc::new(AgentSupervisor::new(fast_supervisor_config()));
    let hotkeys = supervisor.subscribe(AgentEventKind::Hotkey);
    supervisor.start(&agent).await.expect("start");

    let registry = Arc::new(HotkeyRegistry::new(
        Arc::clone(&supervisor) as Arc<dyn HotkeyAgent>
    ));
    let counter = Arc::new(AtomicUsize::new(0));
    {
        let counter = Arc::clone(&counter);
        registry.register_action("summarize", move |binding: HotkeyBinding| {
            let counter = Arc::clone(&counter);
            async move {
                assert_eq!(binding.shortcut, "ctrl+alt+q");
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });
    }

    let cancel = CancellationToken::new();
    let dispatch = {
        let registry = Arc::clone(&registry);
        let cancel = cancel.clone();
        tokio::spawn(async move { registry.run(hotkeys, cancel).await })
    };

    registry
        .register_bindings(vec![
            HotkeyBinding::new("ctrl+alt+q", "summarize"),
            HotkeyBinding::new("ctrl+alt+z", "unbound"),
        ])
        .await
        .expect("register bindings");

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while counter.load(Ordering::SeqCst) == 0 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(counter.load(Ordering::SeqCst), 1);

    cancel.cancel();
    dispatch.await.expect("dispatch loop");
    supervisor.stop().await;
}

/// Clearing bindings with a live agent succeeds without a batch.
#[tokio::test]
#[serial]
async fn clearing_bindings_with_live_agent() {
    let dir = tempfile::tempdir().expect("tempdir");
    let agent = write_script(dir.path(), "agent.sh", COOPERATIVE_AGENT);
    let supervisor = Arc::new(AgentSupervisor::new(fast_supervisor_config()));
    supervisor.start(&agent).await.expect("start");
    let registry = HotkeyRegistry::new(Arc::clone(&supervisor) as Arc<dyn HotkeyAgent>);

    registry.register_bindings(Vec::new()).await.expect("clear");

    assert!(registry.bindings().is_empty());
    supervisor.stop().await;
}
