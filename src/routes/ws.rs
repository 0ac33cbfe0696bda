//! WebSocket upgrade + message loop for one session. Each text frame is parsed
//! as a `Command` and applied; we reply with a single JSON message per frame
//! (a snapshot or an error).

use std::sync::Arc;
use axum::{
  extract::{
    ws::{Message, WebSocket},
    Path, Query, State, WebSocketUpgrade,
  },
  http::HeaderMap,
  response::IntoResponse,
};
use serde::Deserialize;
use tracing::{info, error, instrument, debug};
use uuid::Uuid;

use crate::error::Error;
use crate::logic::apply_command;
use crate::protocol::{Command, ServerWsMessage};
use crate::routes::http::identity_from;
use crate::session::SessionHandle;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct WsAuth {
  pub user_id: Option<String>,
}

/// Ownership is checked before the upgrade so a wrong id never gets a socket.
#[instrument(level = "info", skip(ws, state, headers, auth), fields(%id))]
pub async fn ws_upgrade(
  ws: WebSocketUpgrade,
  State(state): State<Arc<AppState>>,
  headers: HeaderMap,
  Path(id): Path<Uuid>,
  Query(auth): Query<WsAuth>,
) -> Result<impl IntoResponse, Error> {
  let identity = identity_from(&headers, auth.user_id)?;
  let handle = state.session(id, &identity).await?;
  info!(target: "qforge_backend", session = %id, user = %identity.user_id, "WebSocket upgrade requested");
  Ok(ws.on_upgrade(move |socket| handle_ws(socket, state, handle)))
}

#[instrument(level = "info", skip(socket, state, handle))]
async fn handle_ws(mut socket: WebSocket, state: Arc<AppState>, handle: SessionHandle) {
  info!(target: "qforge_backend", "WebSocket connected");
  while let Some(Ok(msg)) = socket.recv().await {
    match msg {
      Message::Text(txt) => {
        let reply_msg = handle_frame(&txt, &state, &handle).await;

        let out = serde_json::to_string(&reply_msg).unwrap_or_else(|e| {
          serde_json::json!({ "type": "error", "code": "serialization", "message": e.to_string() }).to_string()
        });

        if let Err(e) = socket.send(Message::Text(out)).await {
          error!(target: "qforge_backend", error = %e, "WS send error");
          break;
        }
      }
      Message::Ping(payload) => { let _ = socket.send(Message::Pong(payload)).await; }
      Message::Close(_) => break,
      _ => {}
    }
  }
  info!(target: "qforge_backend", "WebSocket disconnected");
}

async fn handle_frame(txt: &str, state: &AppState, handle: &SessionHandle) -> ServerWsMessage {
  let cmd = match serde_json::from_str::<Command>(txt) {
    Ok(cmd) => cmd,
    Err(e) => return ServerWsMessage::error(&Error::validation(format!("invalid command: {e}"))),
  };
  debug!(target: "qforge_backend", command = cmd.name(), "WS received");
  match apply_command(handle, state.backend.as_ref(), cmd).await {
    Ok(out) => ServerWsMessage::Snapshot {
      session: out.session,
      question_ids: out.question_ids,
      candidates: out.candidates,
    },
    Err(e) => ServerWsMessage::error(&e),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::backend::fake::FakeBackend;
  use crate::config::ServiceConfig;
  use crate::protocol::CreateSessionIn;
  use crate::session::test_identity;

  async fn setup() -> (AppState, SessionHandle) {
    let state = AppState::with_backend(ServiceConfig::default(), Arc::new(FakeBackend::default()));
    let handle = state.open_session(test_identity(), CreateSessionIn::default()).await.unwrap();
    (state, handle)
  }

  #[tokio::test]
  async fn frame_applies_command_and_returns_snapshot() {
    let (state, handle) = setup().await;
    let reply = handle_frame(r#"{"type":"set_description","text":"Sort it"}"#, &state, &handle).await;
    let v = serde_json::to_value(reply).unwrap();
    assert_eq!(v["type"], "snapshot");
    assert_eq!(v["session"]["question"]["description"], "Sort it");
  }

  #[tokio::test]
  async fn malformed_frame_yields_error_frame() {
    let (state, handle) = setup().await;
    let v = serde_json::to_value(handle_frame("{not json", &state, &handle).await).unwrap();
    assert_eq!(v["type"], "error");
    assert_eq!(v["code"], "validation");

    let v = serde_json::to_value(handle_frame(r#"{"type":"set_marks","index":4,"marks":1}"#, &state, &handle).await)
      .unwrap();
    assert_eq!(v["code"], "unknown_sub_question");
  }
}
