//! WebSocket endpoint for interactive terminal sessions.

use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::HeaderMap,
    response::Response,
};
use bytes::Bytes;
use futures::{future, SinkExt, StreamExt};
use serde::Deserialize;
use std::borrow::Cow;
use std::sync::Arc;

use code_play_core::types::SandboxId;
use code_play_core::Error;
use code_play_sandbox::{relay, RelayOutcome};

use crate::auth::bearer_token;
use crate::server::AppState;

/// Close code for a rejected credential.
pub const CLOSE_POLICY_VIOLATION: u16 = 1008;
/// Close code when the session could not be set up or broke.
pub const CLOSE_INTERNAL_ERROR: u16 = 1011;

// Close reasons must fit in a control frame.
const MAX_CLOSE_REASON: usize = 120;

#[derive(Debug, Default, Deserialize)]
pub struct TerminalQuery {
    #[serde(default)]
    pub token: Option<String>,
}

pub async fn terminal_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<TerminalQuery>,
    headers: HeaderMap,
) -> Response {
    let credential = bearer_token(&headers)
        .map(str::to_owned)
        .or(query.token)
        .unwrap_or_default();

    ws.on_upgrade(move |socket| terminal_session(socket, state, SandboxId(id), credential))
}

async fn terminal_session(
    mut socket: WebSocket,
    state: Arc<AppState>,
    id: SandboxId,
    credential: String,
) {
    let session = match state.orchestrator.attach_terminal(&id, &credential).await {
        Ok(session) => session,
        Err(e) => {
            let code = match e {
                Error::Unauthorized(_) => CLOSE_POLICY_VIOLATION,
                _ => CLOSE_INTERNAL_ERROR,
            };
            tracing::info!(sandbox_id = %id, code, error = %e, "Terminal rejected");
            let _ = socket.send(close_message(code, &e.to_string())).await;
            return;
        }
    };

    tracing::info!(sandbox_id = %id, "Terminal attached");
    let (mut sink, stream) = socket.split();

    let caller_in = stream
        .take_while(|msg| {
            future::ready(matches!(msg, Ok(m) if !matches!(m, Message::Close(_))))
        })
        .filter_map(|msg| {
            future::ready(match msg {
                Ok(Message::Text(text)) => Some(Bytes::from(text)),
                Ok(Message::Binary(data)) => Some(Bytes::from(data)),
                _ => None,
            })
        })
        .boxed();

    let outcome = {
        let caller_out = (&mut sink)
            .with(|data: Bytes| future::ready(Ok::<_, axum::Error>(Message::Binary(data.to_vec()))));
        relay(session, caller_in, caller_out).await
    };

    tracing::info!(sandbox_id = %id, outcome = ?outcome, "Terminal detached");
    if let Some(code) = outcome.close_code() {
        let reason = match &outcome {
            RelayOutcome::ShellFailed(reason) => reason.as_str(),
            _ => "shell exited",
        };
        let _ = sink.send(close_message(code, reason)).await;
    }
}

fn close_message(code: u16, reason: &str) -> Message {
    let mut end = reason.len().min(MAX_CLOSE_REASON);
    while !reason.is_char_boundary(end) {
        end -= 1;
    }
    Message::Close(Some(CloseFrame {
        code,
        reason: Cow::Owned(reason[..end].to_string()),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_reason_truncated_on_char_boundary() {
        let long = "é".repeat(100);
        match close_message(CLOSE_INTERNAL_ERROR, &long) {
            Message::Close(Some(frame)) => {
                assert_eq!(frame.code, 1011);
                assert!(frame.reason.len() <= MAX_CLOSE_REASON);
                assert!(frame.reason.chars().all(|c| c == 'é'));
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }
}
