//! Agent writer task.
//!
//! Owns the agent's stdin. Every command flows through one `mpsc` channel into
//! this task, which serialises it to a single JSON line and writes it whole,
//! so concurrent callers can never interleave partial writes.

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::agent::protocol::AgentCommand;
use crate::{AppError, Result};

/// Writer task: serialises queued [`AgentCommand`]s onto `stdin`.
///
/// Exits cleanly when `cancel` fires or every sender has been dropped.
///
/// # Errors
///
/// - [`AppError::Protocol`] if a command cannot be serialised.
/// - [`AppError::Io`]`("write failed: …")` if the agent's stdin is gone.
pub async fn run_writer<W>(
    mut stdin: W,
    mut command_rx: mpsc::Receiver<AgentCommand>,
    cancel: CancellationToken,
) -> Result<()>
where
    W: AsyncWrite + Unpin + Send,
{
    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!("agent writer: cancellation received, stopping");
                break;
            }

            command = command_rx.recv() => {
                let Some(command) = command else {
                    debug!("agent writer: command channel closed, stopping");
                    break;
                };

                let mut bytes = command.to_line()?.into_bytes();
                bytes.push(b'\n');

                stdin.write_all(&bytes).await.map_err(|e| {
                    warn!(command = command.name(), error = %e, "agent writer: write to stdin failed");
                    AppError::Io(format!("write failed: {e}"))
                })?;
                stdin
                    .flush()
                    .await
                    .map_err(|e| AppError::Io(format!("flush failed: {e}")))?;
                debug!(command = command.name(), "agent writer: command sent");
            }
        }
    }

    Ok(())
}

