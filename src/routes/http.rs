//! HTTP endpoint handlers. These are thin wrappers that forward to `AppState`.
//! Each handler is instrumented; errors map to a status code plus a JSON body
//! `{ "error": { "code", "message" } }`.

use std::sync::Arc;
use axum::{
  extract::{Query, State},
  http::StatusCode,
  response::{IntoResponse, Response},
  Json,
};
use serde_json::json;
use tracing::{info, instrument, warn};

use crate::error::VerifyError;
use crate::protocol::*;
use crate::state::AppState;

impl VerifyError {
  pub fn status(&self) -> StatusCode {
    match self {
      VerifyError::RequestPending { .. } | VerifyError::StaleRecord { .. } | VerifyError::NoCorpusLoaded => StatusCode::CONFLICT,
      VerifyError::OracleExhausted { .. } => StatusCode::TOO_MANY_REQUESTS,
      VerifyError::OracleTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
      VerifyError::OracleUnavailable { .. } | VerifyError::DecodeFailure { .. } => StatusCode::BAD_GATEWAY,
      VerifyError::PersistenceFailure { .. } | VerifyError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
      VerifyError::CorpusLoad { .. } => StatusCode::NOT_FOUND,
      VerifyError::MissingSourceText { .. }
      | VerifyError::ExtractionRejected { .. }
      | VerifyError::Template(_)
      | VerifyError::UnknownField(_)
      | VerifyError::IndexOutOfRange { .. }
      | VerifyError::NothingToVerify { .. } => StatusCode::BAD_REQUEST,
    }
  }
}

impl IntoResponse for VerifyError {
  fn into_response(self) -> Response {
    let status = self.status();
    if status.is_server_error() {
      warn!(target: "verifier", code = self.code(), error = %self, "Request failed");
    }
    let body = Json(json!({ "error": { "code": self.code(), "message": self.to_string() } }));
    (status, body).into_response()
  }
}

#[instrument(level = "info")]
pub async fn http_health() -> impl IntoResponse { Json(HealthOut { ok: true }) }

#[instrument(level = "info", skip(state))]
pub async fn http_get_files(State(state): State<Arc<AppState>>) -> Result<Json<FilesOut>, VerifyError> {
  let files = state.list_files()?;
  info!(target: "verifier", count = files.len(), "HTTP file list served");
  Ok(Json(FilesOut { files }))
}

#[instrument(level = "info", skip(state, body), fields(file = %body.file))]
pub async fn http_post_load(
  State(state): State<Arc<AppState>>,
  Json(body): Json<LoadIn>,
) -> Result<Json<LoadOut>, VerifyError> {
  Ok(Json(state.load_file(&body.file).await?))
}

#[instrument(level = "info", skip(state), fields(index = q.index, field = %q.field))]
pub async fn http_get_sentence(
  State(state): State<Arc<AppState>>,
  Query(q): Query<SentenceQuery>,
) -> Result<Json<SentenceView>, VerifyError> {
  Ok(Json(state.sentence_view(q.index, &q.field).await?))
}

#[instrument(level = "info", skip(state))]
pub async fn http_get_prompts(State(state): State<Arc<AppState>>) -> impl IntoResponse {
  Json(PromptsOut { prompts: state.prompts().await })
}

#[instrument(level = "info", skip(state, body), fields(field = %body.field, reset = body.template.is_none()))]
pub async fn http_put_prompt(
  State(state): State<Arc<AppState>>,
  Json(body): Json<PromptIn>,
) -> Result<Json<PromptOut>, VerifyError> {
  Ok(Json(state.update_prompt(&body.field, body.template).await?))
}

#[instrument(level = "info", skip(state, body), fields(index = body.index, field = %body.field))]
pub async fn http_post_verify(
  State(state): State<Arc<AppState>>,
  Json(body): Json<VerifyIn>,
) -> Result<Json<VerifyOut>, VerifyError> {
  let out = state.verify(body.index, &body.field).await?;
  info!(target: "session", index = out.index, status = ?out.status, "HTTP verify evaluated");
  Ok(Json(out))
}
