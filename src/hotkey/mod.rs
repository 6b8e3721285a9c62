//! Hotkey bindings and dispatch.
//!
//! The [`HotkeyAgent`] trait decouples the [`registry::HotkeyRegistry`] from
//! the process that actually hooks the keyboard, so the registry can be
//! driven by the real [`AgentSupervisor`](crate::agent::AgentSupervisor) or
//! by an in-memory double.

pub mod binding;
pub mod registry;

use std::future::Future;
use std::pin::Pin;

use crate::agent::HotkeyRegistration;
use crate::Result;

pub use binding::{load_binding_sets, merge_binding_sets, HotkeyBinding};
pub use registry::{ActionHandler, HotkeyRegistry};

/// The registration surface the registry needs from an agent.
pub trait HotkeyAgent: Send + Sync {
    /// Drop every hotkey registered at the agent.
    ///
    /// Best effort: an absent agent is not an error.
    fn unregister_all_hotkeys(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;

    /// Register many hotkeys in one command.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::AgentNotRunning`](crate::AppError::AgentNotRunning)
    /// if no agent is attached.
    fn register_hotkeys_batch(
        &self,
        hotkeys: Vec<HotkeyRegistration>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}
