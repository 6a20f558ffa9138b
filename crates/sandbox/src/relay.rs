//! Bidirectional byte relay between a terminal caller and a container shell.

use bytes::Bytes;
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::io::AsyncWriteExt;

use crate::engine::ShellSession;

/// Close code for a shell that exited normally.
pub const CLOSE_NORMAL: u16 = 1000;
/// Close code for a shell stream that failed.
pub const CLOSE_INTERNAL_ERROR: u16 = 1011;

/// How a relay session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    /// The caller went away. The container keeps running.
    CallerDisconnected,
    /// The shell process exited.
    ShellExited,
    /// Reading from the shell failed.
    ShellFailed(String),
}

impl RelayOutcome {
    /// Close code to send to the caller, if the caller is still there.
    pub fn close_code(&self) -> Option<u16> {
        match self {
            Self::CallerDisconnected => None,
            Self::ShellExited => Some(CLOSE_NORMAL),
            Self::ShellFailed(_) => Some(CLOSE_INTERNAL_ERROR),
        }
    }
}

enum FirstDone {
    Input(std::io::Result<()>),
    Output(RelayOutcome),
}

/// Pump bytes both ways until either side ends.
///
/// Caller bytes are written to the shell's stdin and flushed one chunk at a
/// time, without batching. Shell output is forwarded unmodified.
pub async fn relay<I, O>(session: ShellSession, mut caller_in: I, mut caller_out: O) -> RelayOutcome
where
    I: Stream<Item = Bytes> + Unpin + Send,
    O: Sink<Bytes> + Unpin + Send,
{
    let ShellSession {
        exec_id,
        mut input,
        mut output,
    } = session;
    metrics::gauge!("sandbox_terminal_sessions").increment(1.0);

    let inbound = async {
        while let Some(chunk) = caller_in.next().await {
            input.write_all(&chunk).await?;
            input.flush().await?;
        }
        Ok::<(), std::io::Error>(())
    };

    let outbound = async {
        while let Some(item) = output.next().await {
            match item {
                Ok(bytes) => {
                    if caller_out.send(bytes).await.is_err() {
                        return RelayOutcome::CallerDisconnected;
                    }
                }
                Err(e) => return RelayOutcome::ShellFailed(e.to_string()),
            }
        }
        RelayOutcome::ShellExited
    };

    tokio::pin!(inbound);
    tokio::pin!(outbound);

    let first = tokio::select! {
        done = &mut inbound => FirstDone::Input(done),
        outcome = &mut outbound => FirstDone::Output(outcome),
    };

    let outcome = match first {
        FirstDone::Input(Ok(())) => RelayOutcome::CallerDisconnected,
        FirstDone::Input(Err(e)) => {
            // stdin is gone; the shell is likely exiting, keep draining its output
            tracing::debug!(exec_id = %exec_id, error = %e, "Shell stdin closed");
            outbound.await
        }
        FirstDone::Output(outcome) => outcome,
    };

    metrics::gauge!("sandbox_terminal_sessions").decrement(1.0);
    tracing::info!(exec_id = %exec_id, outcome = ?outcome, "Terminal session ended");
    outcome
}
