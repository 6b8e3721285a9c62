//! Lifecycle owner for the single persistent hotkey agent process.
//!
//! The supervisor spawns the agent with piped stdio and wires four tasks to
//! it:
//!
//! - reader: stdout → [`EventBus`] / [`PendingAcks`] (see [`run_reader`]).
//! - writer: command queue → stdin (see [`run_writer`]).
//! - stderr logger: stderr → `tracing`.
//! - exit monitor: owns the [`Child`] and joins the reader, then reports
//!   unexpected exits so a crash event always follows the agent's last output.
//!
//! No other component ever sees the pipes; every command goes through the
//! supervisor's API and is serialised by the single writer task.

use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::process::{Child, Command};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::agent::bus::{EventBus, EventReceiver, PendingAcks};
use crate::agent::protocol::{
    AgentCommand, AgentEvent, AgentEventKind, AgentResponse, HotkeyRegistration,
};
use crate::agent::reader::{run_reader, run_stderr_logger};
use crate::agent::writer::run_writer;
use crate::config::TimeoutConfig;
use crate::hotkey::HotkeyAgent;
use crate::{AppError, Result};

/// Depth of the outbound command queue.
const COMMAND_QUEUE_DEPTH: usize = 64;

/// How long the exit monitor waits for the reader to drain stdout after the
/// agent exits.
const READER_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Timing knobs for the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorConfig {
    /// How long `start` waits for the agent's `ready` event.
    pub startup_timeout: Duration,
    /// How long `stop` waits after `quit` (and again after `SIGTERM`).
    pub shutdown_timeout: Duration,
    /// How long `send_command_with_ack` waits for an acknowledgement.
    pub command_timeout: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            startup_timeout: Duration::from_secs(5),
            shutdown_timeout: Duration::from_secs(2),
            command_timeout: Duration::from_secs(5),
        }
    }
}

impl From<&TimeoutConfig> for SupervisorConfig {
    fn from(timeouts: &TimeoutConfig) -> Self {
        Self {
            startup_timeout: Duration::from_secs(timeouts.agent_startup_seconds),
            shutdown_timeout: Duration::from_secs(timeouts.agent_shutdown_seconds),
            command_timeout: Duration::from_secs(timeouts.agent_command_seconds),
        }
    }
}

/// How the agent process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgentExit {
    /// Exit code, `None` when terminated by a signal.
    pub code: Option<i32>,
    /// Whether the exit status was success.
    pub success: bool,
}

/// Live connection state. Dropped (and its tasks joined) on `stop`.
struct AgentConnection {
    pid: Option<u32>,
    command_tx: mpsc::Sender<AgentCommand>,
    alive: Arc<AtomicBool>,
    stopping: Arc<AtomicBool>,
    exit_rx: watch::Receiver<Option<AgentExit>>,
    io_cancel: CancellationToken,
    force_kill: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl AgentConnection {
    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Cancel the I/O tasks and join everything.
    async fn release(self) {
        self.io_cancel.cancel();
        self.force_kill.cancel();
        for task in self.tasks {
            if let Err(err) = task.await {
                debug!(%err, "agent supervisor: task join failed");
            }
        }
    }
}

/// Supervisor for the native hotkey agent.
///
/// Cheap to share behind an `Arc`; every method takes `&self`.
pub struct AgentSupervisor {
    config: SupervisorConfig,
    bus: Arc<EventBus>,
    acks: Arc<PendingAcks>,
    connection: Mutex<Option<AgentConnection>>,
}

impl std::fmt::Debug for AgentSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentSupervisor")
            .field("config", &self.config)
            .field("bus", &self.bus)
            .finish_non_exhaustive()
    }
}

impl Default for AgentSupervisor {
    fn default() -> Self {
        Self::new(SupervisorConfig::default())
    }
}

impl AgentSupervisor {
    /// Create a stopped supervisor.
    #[must_use]
    pub fn new(config: SupervisorConfig) -> Self {
        Self {
            config,
            bus: Arc::new(EventBus::new()),
            acks: Arc::new(PendingAcks::new()),
            connection: Mutex::new(None),
        }
    }

    /// Spawn the agent and wait for its `ready` event.
    ///
    /// On a startup timeout the process is left running and registered so the
    /// caller can decide between waiting longer and calling [`Self::stop`].
    ///
    /// # Errors
    ///
    /// - [`AppError::AgentAlreadyRunning`] if a live agent exists.
    /// - [`AppError::Io`] if the process cannot be spawned.
    /// - [`AppError::AgentCrashed`] if it exits before becoming ready.
    /// - [`AppError::StartupTimeout`] if `ready` does not arrive in time.
    pub async fn start(&self, agent_path: impl AsRef<Path>) -> Result<()> {
        let agent_path = agent_path.as_ref();

        let (mut ready_rx, mut exit_rx) = {
            let mut guard = self.connection.lock().await;
            if guard.as_ref().is_some_and(AgentConnection::is_alive) {
                return Err(AppError::AgentAlreadyRunning);
            }
            if let Some(stale) = guard.take() {
                debug!("agent supervisor: releasing connection of exited agent");
                stale.release().await;
            }

            // Subscribe before the reader exists so `ready` cannot be missed.
            let ready_rx = self.bus.subscribe(AgentEventKind::Ready);
            let conn = self.spawn_connection(agent_path)?;
            let exit_rx = conn.exit_rx.clone();
            *guard = Some(conn);
            (ready_rx, exit_rx)
        };

        let startup = async {
            tokio::select! {
                ready = ready_rx.recv() => ready.map(|_| ()).ok_or(AppError::AgentNotRunning),
                exit = exit_rx.wait_for(Option::is_some) => {
                    let code = exit.ok().and_then(|exit| *exit).and_then(|exit| exit.code);
                    Err(AppError::AgentCrashed { code })
                }
            }
        };

        match tokio::time::timeout(self.config.startup_timeout, startup).await {
            Ok(Ok(())) => {
                info!(path = %agent_path.display(), "agent ready");
                Ok(())
            }
            Ok(Err(err)) => {
                warn!(%err, "agent failed during startup");
                Err(err)
            }
            Err(_elapsed) => Err(AppError::StartupTimeout(format!(
                "agent did not emit ready within {:?}",
                self.config.startup_timeout
            ))),
        }
    }

    fn spawn_connection(&self, agent_path: &Path) -> Result<AgentConnection> {
        let mut child = Command::new(agent_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| {
                AppError::Io(format!(
                    "failed to spawn agent {}: {err}",
                    agent_path.display()
                ))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| AppError::Io("failed to capture agent stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AppError::Io("failed to capture agent stdout".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| AppError::Io("failed to capture agent stderr".into()))?;

        let pid = child.id();
        let io_cancel = CancellationToken::new();
        let force_kill = CancellationToken::new();
        let alive = Arc::new(AtomicBool::new(true));
        let stopping = Arc::new(AtomicBool::new(false));
        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let (exit_tx, exit_rx) = watch::channel(None);

        let writer_cancel = io_cancel.clone();
        let reader = tokio::spawn(run_reader(
            stdout,
            Arc::clone(&self.bus),
            Arc::clone(&self.acks),
            io_cancel.clone(),
        ));
        let tasks = vec![
            tokio::spawn(run_stderr_logger(stderr, io_cancel.clone())),
            tokio::spawn(async move {
                if let Err(err) = run_writer(stdin, command_rx, writer_cancel).await {
                    warn!(%err, "agent writer stopped");
                }
            }),
            monitor_exit(
                child,
                ExitWatch {
                    bus: Arc::clone(&self.bus),
                    acks: Arc::clone(&self.acks),
                    alive: Arc::clone(&alive),
                    stopping: Arc::clone(&stopping),
                    force_kill: force_kill.clone(),
                    reader,
                    exit_tx,
                },
            ),
        ];

        info!(pid, path = %agent_path.display(), "agent process spawned");

        Ok(AgentConnection {
            pid,
            command_tx,
            alive,
            stopping,
            exit_rx,
            io_cancel,
            force_kill,
            tasks,
        })
    }

    /// Stop the agent: `quit`, then `SIGTERM`, then kill.
    ///
    /// Each escalation step waits up to the configured shutdown timeout.
    /// Idempotent; stopping a stopped supervisor does nothing.
    pub async fn stop(&self) {
        let Some(conn) = self.connection.lock().await.take() else {
            debug!("agent supervisor: stop called while stopped");
            return;
        };

        conn.stopping.store(true, Ordering::SeqCst);
        let mut exit_rx = conn.exit_rx.clone();
        let grace = self.config.shutdown_timeout;

        if conn.is_alive() {
            if conn.command_tx.send(AgentCommand::Quit).await.is_err() {
                debug!("agent supervisor: quit could not be queued");
            }

            if !wait_for_exit(&mut exit_rx, grace).await {
                warn!(pid = ?conn.pid, "agent ignored quit, terminating");
                let signalled = conn.is_alive() && conn.pid.is_some_and(send_terminate);
                if !signalled || !wait_for_exit(&mut exit_rx, grace).await {
                    warn!(pid = ?conn.pid, "agent ignored terminate, killing");
                    conn.force_kill.cancel();
                    if !wait_for_exit(&mut exit_rx, grace).await {
                        warn!(pid = ?conn.pid, "agent exit not observed after kill");
                    }
                }
            }
        }

        conn.release().await;
        info!("agent stopped");
    }

    /// Whether a live agent process is attached.
    pub async fn is_running(&self) -> bool {
        self.connection
            .lock()
            .await
            .as_ref()
            .is_some_and(AgentConnection::is_alive)
    }

    /// OS process ID of the live agent, if any.
    pub async fn pid(&self) -> Option<u32> {
        self.connection
            .lock()
            .await
            .as_ref()
            .filter(|conn| conn.is_alive())
            .and_then(|conn| conn.pid)
    }

    /// Subscribe to one kind of agent event.
    pub fn subscribe(&self, kind: AgentEventKind) -> EventReceiver {
        self.bus.subscribe(kind)
    }

    /// Subscribe to every agent event.
    pub fn subscribe_all(&self) -> EventReceiver {
        self.bus.subscribe_all()
    }

    /// Queue a command for the writer task.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::AgentNotRunning`] when no live agent is attached.
    pub async fn send_command(&self, command: AgentCommand) -> Result<()> {
        let tx = {
            let guard = self.connection.lock().await;
            guard
                .as_ref()
                .filter(|conn| conn.is_alive())
                .map(|conn| conn.command_tx.clone())
        };
        let Some(tx) = tx else {
            return Err(AppError::AgentNotRunning);
        };
        let name = command.name();
        tx.send(command).await.map_err(|_| {
            warn!(command = name, "agent writer gone, command dropped");
            AppError::AgentNotRunning
        })
    }

    /// Send a command and wait for its acknowledgement.
    ///
    /// Correlation is by command name only; see [`PendingAcks`].
    ///
    /// # Errors
    ///
    /// - [`AppError::AgentNotRunning`] if the agent is absent or exits first.
    /// - [`AppError::CommandTimeout`] if no acknowledgement arrives in time.
    pub async fn send_command_with_ack(&self, command: AgentCommand) -> Result<AgentResponse> {
        let name = command.name();
        let ack_rx = self.acks.register(name);
        self.send_command(command).await?;

        match tokio::time::timeout(self.config.command_timeout, ack_rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(AppError::AgentNotRunning),
            Err(_elapsed) => Err(AppError::CommandTimeout(name.to_owned())),
        }
    }

    /// Register one hotkey. Skipped with a log line if the agent is down.
    pub async fn register_hotkey(&self, id: &str, shortcut: &str) {
        self.send_best_effort(AgentCommand::RegisterHotkey {
            id: id.to_owned(),
            shortcut: shortcut.to_owned(),
        })
        .await;
    }

    /// Unregister one hotkey. Skipped if the agent is down.
    pub async fn unregister_hotkey(&self, id: &str, shortcut: &str) {
        self.send_best_effort(AgentCommand::UnregisterHotkey {
            id: id.to_owned(),
            shortcut: shortcut.to_owned(),
        })
        .await;
    }

    /// Drop every hotkey at the agent. Skipped if the agent is down.
    pub async fn unregister_all_hotkeys(&self) {
        self.send_best_effort(AgentCommand::UnregisterAll).await;
    }

    /// Register many hotkeys in one command.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::AgentNotRunning`] when no live agent is attached.
    pub async fn register_hotkeys_batch(&self, hotkeys: Vec<HotkeyRegistration>) -> Result<()> {
        self.send_command(AgentCommand::RegisterBatch { hotkeys }).await
    }

    /// Replace the clipboard contents via the agent.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::AgentNotRunning`] when no live agent is attached.
    pub async fn set_clipboard(&self, text: &str) -> Result<()> {
        self.send_command(AgentCommand::SetClipboard {
            text: text.to_owned(),
        })
        .await
    }

    /// Turn clipboard change events on or off.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::AgentNotRunning`] when no live agent is attached.
    pub async fn set_clipboard_monitoring(&self, enabled: bool) -> Result<()> {
        self.send_command(AgentCommand::SetClipboardMonitoring { enabled })
            .await
    }

    async fn send_best_effort(&self, command: AgentCommand) {
        let name = command.name();
        if let Err(err) = self.send_command(command).await {
            debug!(command = name, %err, "agent command skipped");
        }
    }
}

impl Drop for AgentSupervisor {
    fn drop(&mut self) {
        if let Some(conn) = self.connection.get_mut().as_ref() {
            conn.stopping.store(true, Ordering::SeqCst);
            conn.io_cancel.cancel();
            conn.force_kill.cancel();
        }
    }
}

impl HotkeyAgent for AgentSupervisor {
    fn unregister_all_hotkeys(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(AgentSupervisor::unregister_all_hotkeys(self))
    }

    fn register_hotkeys_batch(
        &self,
        hotkeys: Vec<HotkeyRegistration>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(AgentSupervisor::register_hotkeys_batch(self, hotkeys))
    }
}

/// Shared handles the exit monitor needs.
struct ExitWatch {
    bus: Arc<EventBus>,
    acks: Arc<PendingAcks>,
    alive: Arc<AtomicBool>,
    stopping: Arc<AtomicBool>,
    force_kill: CancellationToken,
    /// Joined before the exit is reported.
    reader: JoinHandle<()>,
    exit_tx: watch::Sender<Option<AgentExit>>,
}

/// Own the child until it exits; publish an error event if the exit was
/// neither requested nor clean. There is no automatic restart.
///
/// The reader is joined first so every line the agent wrote before exiting
/// is published ahead of the crash event.
fn monitor_exit(mut child: Child, watch: ExitWatch) -> JoinHandle<()> {
    tokio::spawn(async move {
        let status = tokio::select! {
            status = child.wait() => status,
            () = watch.force_kill.cancelled() => {
                if let Err(err) = child.start_kill() {
                    debug!(%err, "agent kill failed, process may already be gone");
                }
                child.wait().await
            }
        };

        watch.alive.store(false, Ordering::SeqCst);

        match tokio::time::timeout(READER_DRAIN_TIMEOUT, watch.reader).await {
            Ok(Err(err)) => debug!(%err, "agent reader join failed"),
            Err(_) => debug!("agent stdout still open after exit, not waiting for reader"),
            Ok(Ok(())) => {}
        }

        let exit = match status {
            Ok(status) => AgentExit {
                code: status.code(),
                success: status.success(),
            },
            Err(err) => {
                warn!(%err, "error waiting for agent process");
                AgentExit {
                    code: None,
                    success: false,
                }
            }
        };

        if watch.stopping.load(Ordering::SeqCst) {
            info!(code = ?exit.code, "agent process exited after stop");
        } else if exit.success {
            info!("agent process exited on its own with code 0");
        } else {
            let message = exit.code.map_or_else(
                || "agent terminated by signal".to_owned(),
                |c| format!("agent exited with code {c}"),
            );
            warn!(code = ?exit.code, "{message}");
            watch.bus.publish(&AgentEvent::Error {
                message,
                code: exit.code.map(|c| c.to_string()),
            });
        }

        watch.acks.clear();
        watch.exit_tx.send_replace(Some(exit));
    })
}

async fn wait_for_exit(exit_rx: &mut watch::Receiver<Option<AgentExit>>, limit: Duration) -> bool {
    tokio::time::timeout(limit, exit_rx.wait_for(Option::is_some))
        .await
        .is_ok_and(|exited| exited.is_ok())
}

#[cfg(unix)]
fn send_terminate(pid: u32) -> bool {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    match kill(Pid::from_raw(raw), Signal::SIGTERM) {
        Ok(()) => true,
        Err(err) => {
            debug!(%err, pid, "SIGTERM failed");
            false
        }
    }
}

#[cfg(not(unix))]
fn send_terminate(_pid: u32) -> bool {
    false
}
