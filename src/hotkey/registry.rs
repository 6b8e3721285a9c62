//! Maps shortcuts to action handlers and dispatches agent hotkey events.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::agent::bus::EventReceiver;
use crate::agent::{AgentEvent, HotkeyRegistration};
use crate::hotkey::binding::{merge_binding_sets, HotkeyBinding};
use crate::hotkey::HotkeyAgent;
use crate::Result;

/// Future returned by an action handler.
pub type ActionFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;

/// Callback invoked with the binding that fired.
pub type ActionHandler = Arc<dyn Fn(HotkeyBinding) -> ActionFuture + Send + Sync>;

/// Registry of actions and the active binding set.
pub struct HotkeyRegistry {
    agent: Arc<dyn HotkeyAgent>,
    actions: RwLock<HashMap<String, ActionHandler>>,
    bindings: RwLock<HashMap<String, HotkeyBinding>>,
    /// Serialises whole binding replacements against the agent.
    replace_lock: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for HotkeyRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HotkeyRegistry")
            .field("actions", &read(&self.actions).keys().collect::<Vec<_>>())
            .field("bindings", &read(&self.bindings).len())
            .finish_non_exhaustive()
    }
}

impl HotkeyRegistry {
    /// Create a registry that registers hotkeys through `agent`.
    pub fn new(agent: Arc<dyn HotkeyAgent>) -> Self {
        Self {
            agent,
            actions: RwLock::new(HashMap::new()),
            bindings: RwLock::new(HashMap::new()),
            replace_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Associate `action_id` with `handler`. A second registration replaces
    /// the first.
    pub fn register_action<F, Fut>(&self, action_id: impl Into<String>, handler: F)
    where
        F: Fn(HotkeyBinding) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let action_id = action_id.into();
        let handler: ActionHandler =
            Arc::new(move |binding| -> ActionFuture { Box::pin(handler(binding)) });
        if write(&self.actions).insert(action_id.clone(), handler).is_some() {
            warn!(%action_id, "action handler replaced");
        }
    }

    /// Whether a handler exists for `action_id`.
    #[must_use]
    pub fn has_action(&self, action_id: &str) -> bool {
        read(&self.actions).contains_key(action_id)
    }

    /// Replace the active binding set.
    ///
    /// The agent is cleared with one `unregister_all`, then every binding
    /// with a registered handler is sent in one batch using the shortcut as
    /// the agent-side id. Bindings without a handler are kept for lookup but
    /// never reach the agent.
    ///
    /// Overlapping calls run one after another, so the agent always ends up
    /// holding exactly the set stored by the last call to finish.
    ///
    /// # Errors
    ///
    /// Returns the batch registration error, typically
    /// [`AppError::AgentNotRunning`](crate::AppError::AgentNotRunning).
    pub async fn register_bindings(&self, bindings: Vec<HotkeyBinding>) -> Result<()> {
        let bindings = merge_binding_sets([bindings]);
        let _replacing = self.replace_lock.lock().await;

        self.agent.unregister_all_hotkeys().await;

        let registrations: Vec<HotkeyRegistration> = bindings
            .iter()
            .filter(|binding| {
                let handled = self.has_action(&binding.action_id);
                if !handled {
                    debug!(
                        shortcut = binding.shortcut.as_str(),
                        action_id = binding.action_id.as_str(),
                        "no handler for binding, not registering"
                    );
                }
                handled
            })
            .map(|binding| HotkeyRegistration {
                id: binding.shortcut.clone(),
                shortcut: binding.shortcut.clone(),
            })
            .collect();

        *write(&self.bindings) = bindings
            .into_iter()
            .map(|binding| (binding.shortcut.clone(), binding))
            .collect();

        if registrations.is_empty() {
            info!("hotkey bindings cleared");
            return Ok(());
        }

        let count = registrations.len();
        self.agent.register_hotkeys_batch(registrations).await?;
        info!(count, "hotkey bindings registered");
        Ok(())
    }

    /// Snapshot of the active bindings.
    #[must_use]
    pub fn bindings(&self) -> Vec<HotkeyBinding> {
        let mut bindings: Vec<HotkeyBinding> = read(&self.bindings).values().cloned().collect();
        bindings.sort_by(|a, b| a.shortcut.cmp(&b.shortcut));
        bindings
    }

    /// Invoke the handler bound to `id` on a separate task.
    ///
    /// Returns the handle of the supervising task, or `None` when the id is
    /// unbound or its action has no handler. Handler errors and panics are
    /// logged by the supervising task and never reach the caller.
    pub fn dispatch(&self, id: &str) -> Option<JoinHandle<()>> {
        let Some(binding) = read(&self.bindings).get(id).cloned() else {
            warn!(shortcut = id, "hotkey event for unknown binding");
            return None;
        };
        let Some(handler) = read(&self.actions).get(&binding.action_id).cloned() else {
            warn!(
                shortcut = id,
                action_id = binding.action_id.as_str(),
                "hotkey bound to action with no handler"
            );
            return None;
        };

        let shortcut = binding.shortcut.clone();
        let action_id = binding.action_id.clone();
        let task = tokio::spawn(handler(binding));

        Some(tokio::spawn(async move {
            match task.await {
                Ok(Ok(())) => debug!(%shortcut, %action_id, "hotkey action completed"),
                Ok(Err(err)) => warn!(%shortcut, %action_id, %err, "hotkey action failed"),
                Err(join_err) => error!(%shortcut, %action_id, %join_err, "hotkey action panicked"),
            }
        }))
    }

    /// Dispatch hotkey events until the stream ends or `cancel` fires.
    pub async fn run(&self, mut events: EventReceiver, cancel: CancellationToken) {
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Some(AgentEvent::Hotkey { id, .. }) => {
                        self.dispatch(&id);
                    }
                    Some(_) => {}
                    None => break,
                },
            }
        }
        debug!("hotkey dispatch loop stopped");
    }
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}
