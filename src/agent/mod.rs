//! Native hotkey agent: wire protocol, stdio tasks, and process supervision.
//!
//! The agent is a long-running child process that speaks newline-delimited
//! JSON over stdio. [`supervisor::AgentSupervisor`] is the only component that
//! touches its pipes.

pub mod bus;
pub mod codec;
pub mod protocol;
pub mod reader;
pub mod supervisor;
pub mod writer;

pub use protocol::{AgentCommand, AgentEvent, AgentEventKind, AgentResponse, HotkeyRegistration};
pub use supervisor::{AgentSupervisor, SupervisorConfig};
