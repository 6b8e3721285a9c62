//! Agent reader task.
//!
//! Reads newline-delimited JSON from the agent's stdout, parses each complete
//! line, and routes the result: events to the [`EventBus`], acknowledgements
//! to [`PendingAcks`]. Lines are processed strictly in arrival order by this
//! single task, so subscribers observe events in the order the agent wrote
//! them regardless of how the OS chunked the pipe.
//!
//! A line that cannot be framed or parsed is logged and published as a
//! non-fatal [`AgentEvent::Error`] carrying
//! [`PARSE_ERROR_CODE`](crate::agent::protocol::PARSE_ERROR_CODE); reading
//! continues with the next line.

use std::sync::Arc;

use futures_util::StreamExt;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::agent::bus::{route, EventBus, PendingAcks};
use crate::agent::codec::{AgentCodec, Frame};
use crate::agent::protocol::{parse_inbound_line, AgentEvent};

/// Run the stdout reader until EOF, an I/O error, or cancellation.
///
/// EOF is not reported as an event: whether the agent exited cleanly is
/// decided by the exit monitor once the process status is known.
pub async fn run_reader<R>(
    stdout: R,
    bus: Arc<EventBus>,
    acks: Arc<PendingAcks>,
    cancel: CancellationToken,
) where
    R: AsyncRead + Unpin + Send,
{
    let mut framed = FramedRead::new(stdout, AgentCodec::new());

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!("agent reader: cancellation received, stopping");
                break;
            }

            item = framed.next() => {
                match item {
                    None => {
                        debug!("agent reader: EOF detected");
                        break;
                    }

                    Some(Ok(Frame::Rejected(reason))) => {
                        warn!(error = reason.as_str(), "agent reader: framing error, skipping line");
                        bus.publish(&AgentEvent::parse_error(reason));
                    }

                    Some(Err(e)) => {
                        warn!(error = %e, "agent reader: IO error, stopping");
                        bus.publish(&AgentEvent::Error {
                            message: format!("agent stdout error: {e}"),
                            code: None,
                        });
                        break;
                    }

                    Some(Ok(Frame::Line(line))) => match parse_inbound_line(&line) {
                        Ok(Some(message)) => route(&bus, &acks, message),
                        Ok(None) => {}
                        Err(e) => {
                            warn!(error = %e, raw_line = %line, "agent reader: parse error, skipping line");
                            bus.publish(&AgentEvent::parse_error(format!(
                                "failed to parse agent message: {e}"
                            )));
                        }
                    },
                }
            }
        }
    }
}

/// Forward each stderr line to `tracing`. Stderr is diagnostic only.
pub async fn run_stderr_logger<R>(stderr: R, cancel: CancellationToken)
where
    R: AsyncRead + Unpin + Send,
{
    let mut lines = BufReader::new(stderr).lines();
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            line = lines.next_line() => match line {
                Ok(Some(line)) => debug!(agent_stderr = %line.trim_end(), "agent stderr"),
                Ok(None) => break,
                Err(err) => {
                    debug!(%err, "agent stderr: read failed, stopping");
                    break;
                }
            },
        }
    }
}
