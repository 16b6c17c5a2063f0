//! WebSocket upgrade + message loop. Each client message is parsed as JSON and
//! forwarded to `AppState`. We reply with a single JSON message per request.
//!
//! Messages are handled in order, so one socket can never have two
//! verifications in flight; the state's single-flight guard covers the rest.

use std::sync::Arc;
use axum::{
  extract::{
    ws::{Message, WebSocket},
    State, WebSocketUpgrade,
  },
  response::IntoResponse,
};
use tracing::{debug, error, info, instrument};

use crate::error::VerifyError;
use crate::protocol::{ClientWsMessage, ServerWsMessage};
use crate::state::AppState;

#[instrument(level = "info", skip(state))]
pub async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
  info!(target: "verifier", "WebSocket upgrade requested");
  ws.on_upgrade(move |socket| handle_ws(socket, state))
}

#[instrument(level = "info", skip(socket, state))]
async fn handle_ws(mut socket: WebSocket, state: Arc<AppState>) {
  info!(target: "verifier", "WebSocket connected");
  while let Some(Ok(msg)) = socket.recv().await {
    match msg {
      Message::Text(txt) => {
        let reply_msg = match serde_json::from_str::<ClientWsMessage>(&txt) {
          Ok(incoming) => {
            debug!(target: "verifier", "WS received: {:?}", &incoming);
            handle_client_ws(incoming, &state).await
          }
          Err(e) => ServerWsMessage::Error { code: "invalid_json".into(), message: format!("Invalid JSON: {}", e) },
        };

        let out = serde_json::to_string(&reply_msg).unwrap_or_else(|e| {
          serde_json::json!({ "type": "error", "code": "serialization", "message": format!("Serialization error: {}", e) }).to_string()
        });

        if let Err(e) = socket.send(Message::Text(out)).await {
          error!(target: "verifier", error = %e, "WS send error");
          break;
        }
      }
      Message::Ping(payload) => { let _ = socket.send(Message::Pong(payload)).await; }
      Message::Close(_) => break,
      _ => {}
    }
  }
  info!(target: "verifier", "WebSocket disconnected");
}

fn ws_error(e: VerifyError) -> ServerWsMessage {
  ServerWsMessage::Error { code: e.code().into(), message: e.to_string() }
}

#[instrument(level = "info", skip(state))]
pub(crate) async fn handle_client_ws(msg: ClientWsMessage, state: &AppState) -> ServerWsMessage {
  match msg {
    ClientWsMessage::Ping => ServerWsMessage::Pong,

    ClientWsMessage::ListFiles => match state.list_files() {
      Ok(files) => ServerWsMessage::Files { files },
      Err(e) => ws_error(e),
    },

    ClientWsMessage::LoadFile { file } => match state.load_file(&file).await {
      Ok(out) => ServerWsMessage::Loaded(out),
      Err(e) => ws_error(e),
    },

    ClientWsMessage::GetSentence { index, field } => match state.sentence_view(index, &field).await {
      Ok(view) => ServerWsMessage::Sentence(view),
      Err(e) => ws_error(e),
    },

    ClientWsMessage::GetPrompts => ServerWsMessage::Prompts { prompts: state.prompts().await },

    ClientWsMessage::UpdatePrompt { field, template } => match state.update_prompt(&field, template).await {
      Ok(p) => ServerWsMessage::Prompt(p),
      Err(e) => ws_error(e),
    },

    ClientWsMessage::Verify { index, field } => match state.verify(index, &field).await {
      Ok(out) => {
        info!(target: "session", index = out.index, status = ?out.status, "WS verify evaluated");
        ServerWsMessage::Verified(out)
      }
      Err(e) => ws_error(e),
    },
  }
}
