//! The external oracle: an LLM command-line executable that reads a prompt on
//! stdin and answers on stdout.
//!
//! We log command names, latencies and reply sizes, never full replies (those go
//! through `trunc_for_log` at debug level in the session loop).

use std::future::Future;
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

use crate::error::{Result, VerifyError};

/// Raw reply of one oracle invocation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OracleReply {
  pub stdout: String,
  pub stderr: String,
  /// `None` when the process was terminated by a signal.
  pub exit_code: Option<i32>,
  /// True when stdout was not valid UTF-8 and had to be decoded lossily.
  pub lossy: bool,
}

/// Anything that can answer a verification prompt.
pub trait Oracle {
  fn query(&self, prompt: &str) -> impl Future<Output = Result<OracleReply>> + Send;
}

/// Spawns the configured executable once per prompt.
#[derive(Clone, Debug)]
pub struct CommandOracle {
  pub command: String,
  pub args: Vec<String>,
  pub timeout: Option<Duration>,
}

impl CommandOracle {
  pub fn new(command: impl Into<String>, args: Vec<String>, timeout: Option<Duration>) -> Self {
    Self { command: command.into(), args, timeout }
  }
}

fn decode(bytes: Vec<u8>) -> (String, bool) {
  match String::from_utf8(bytes) {
    Ok(s) => (s, false),
    Err(e) => (String::from_utf8_lossy(e.as_bytes()).into_owned(), true),
  }
}

impl Oracle for CommandOracle {
  #[instrument(level = "info", skip(self, prompt), fields(command = %self.command, prompt_len = prompt.len()))]
  async fn query(&self, prompt: &str) -> Result<OracleReply> {
    let start = Instant::now();
    let mut child = Command::new(&self.command)
      .args(&self.args)
      .stdin(Stdio::piped())
      .stdout(Stdio::piped())
      .stderr(Stdio::piped())
      .kill_on_drop(true)
      .spawn()
      .map_err(|source| VerifyError::OracleUnavailable { command: self.command.clone(), source })?;

    if let Some(mut stdin) = child.stdin.take() {
      // A child that exits without reading stdin is not our problem; its stdout still counts.
      if let Err(e) = stdin.write_all(prompt.as_bytes()).await {
        debug!(target: "oracle", error = %e, "Failed writing prompt to oracle stdin");
      }
      drop(stdin);
    }

    let output = match self.timeout {
      Some(limit) => match tokio::time::timeout(limit, child.wait_with_output()).await {
        Ok(res) => res,
        Err(_) => {
          warn!(target: "oracle", secs = limit.as_secs(), "Oracle timed out; request abandoned");
          return Err(VerifyError::OracleTimeout { secs: limit.as_secs() });
        }
      },
      None => child.wait_with_output().await,
    }
    .map_err(|source| VerifyError::OracleUnavailable { command: self.command.clone(), source })?;

    let (stdout, lossy) = decode(output.stdout);
    let (stderr, _) = decode(output.stderr);
    if lossy {
      let err = VerifyError::DecodeFailure { lossy_chars: stdout.matches('\u{FFFD}').count() };
      warn!(target: "oracle", error = %err, "Decoded oracle output lossily");
    }

    let elapsed = start.elapsed();
    info!(target: "oracle", ?elapsed, exit_code = ?output.status.code(), stdout_len = stdout.len(), "Oracle replied");
    Ok(OracleReply { stdout, stderr, exit_code: output.status.code(), lossy })
  }
}

/// Recognizes the oracle's usage-limit notices. Matching is case-insensitive.
#[derive(Clone, Debug)]
pub struct ExhaustionDetector {
  phrases: Vec<String>,
}

pub const DEFAULT_EXHAUSTION_PHRASES: &[&str] = &["limit reached", "resets at"];

impl Default for ExhaustionDetector {
  fn default() -> Self {
    Self::new(DEFAULT_EXHAUSTION_PHRASES.iter().map(|p| p.to_string()).collect())
  }
}

impl ExhaustionDetector {
  pub fn new(phrases: Vec<String>) -> Self {
    let phrases = phrases.into_iter().map(|p| p.trim().to_lowercase()).filter(|p| !p.is_empty()).collect();
    Self { phrases }
  }

  pub fn is_exhausted(&self, text: &str) -> bool {
    let lower = text.to_lowercase();
    self.phrases.iter().any(|p| lower.contains(p.as_str()))
  }
}
