//! Error taxonomy shared by the session loop and both front-ends.
//!
//! Per-record errors (`MissingSourceText`, `OracleUnavailable`, `OracleTimeout`,
//! `ExtractionRejected`, `DecodeFailure`) never abort a batch session.
//! `OracleExhausted` and `PersistenceFailure` halt it.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum VerifyError {
  #[error("record #{index} has no Chinese sentence")]
  MissingSourceText { index: usize },

  #[error("oracle `{command}` could not be launched: {source}")]
  OracleUnavailable {
    command: String,
    #[source]
    source: std::io::Error,
  },

  #[error("oracle did not answer within {secs}s")]
  OracleTimeout { secs: u64 },

  #[error("oracle reported exhaustion at record #{index}")]
  OracleExhausted { index: usize },

  #[error("no acceptable value could be extracted for record #{index}")]
  ExtractionRejected { index: usize },

  #[error("oracle output was not valid UTF-8 ({lossy_chars} replacement chars)")]
  DecodeFailure { lossy_chars: usize },

  #[error("failed to save corpus to {path:?}: {source}")]
  PersistenceFailure {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to load corpus from {path:?}: {message}")]
  CorpusLoad { path: PathBuf, message: String },

  #[error("configuration error: {0}")]
  Config(String),

  #[error("invalid prompt template: {0}")]
  Template(String),

  #[error("unknown field `{0}`")]
  UnknownField(String),

  #[error("record index {index} out of range (corpus has {len} records)")]
  IndexOutOfRange { index: usize, len: usize },

  #[error("a verification request is already pending for record #{index}")]
  RequestPending { index: usize },

  #[error("no corpus file is loaded")]
  NoCorpusLoaded,

  #[error("record #{index} has no current {field} value to verify")]
  NothingToVerify { index: usize, field: String },

  #[error("corpus was reloaded while record #{index} was being verified")]
  StaleRecord { index: usize },
}

impl VerifyError {
  /// Errors after which a batch session must stop instead of moving on.
  pub fn is_session_fatal(&self) -> bool {
    matches!(self, VerifyError::OracleExhausted { .. } | VerifyError::PersistenceFailure { .. })
  }

  /// Stable machine-readable code for API clients.
  pub fn code(&self) -> &'static str {
    match self {
      VerifyError::MissingSourceText { .. } => "missing_source_text",
      VerifyError::OracleUnavailable { .. } => "oracle_unavailable",
      VerifyError::OracleTimeout { .. } => "oracle_timeout",
      VerifyError::OracleExhausted { .. } => "oracle_exhausted",
      VerifyError::ExtractionRejected { .. } => "extraction_rejected",
      VerifyError::DecodeFailure { .. } => "decode_failure",
      VerifyError::PersistenceFailure { .. } => "persistence_failure",
      VerifyError::CorpusLoad { .. } => "corpus_load",
      VerifyError::Config(_) => "config",
      VerifyError::Template(_) => "template",
      VerifyError::UnknownField(_) => "unknown_field",
      VerifyError::IndexOutOfRange { .. } => "index_out_of_range",
      VerifyError::RequestPending { .. } => "request_pending",
      VerifyError::NoCorpusLoaded => "no_corpus_loaded",
      VerifyError::NothingToVerify { .. } => "nothing_to_verify",
      VerifyError::StaleRecord { .. } => "stale_record",
    }
  }
}

pub type Result<T> = std::result::Result<T, VerifyError>;
