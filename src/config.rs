//! Loading verifier configuration (oracle command, prompt templates, validation
//! settings, interactive server paths) from TOML.
//!
//! Example:
//!
//! ```toml
//! [oracle]
//! command = "claude"
//! args = []
//! timeout_secs = 120
//! exhaustion_phrases = ["limit reached", "resets at"]
//!
//! [prompts]
//! pinyin = "Chinese: {chinese_sentence} / Current pinyin: {current_pinyin} / Reply with ONLY the pinyin."
//! hanja = "Chinese: {chinese_sentence} / Hanja: {current_value} / Reply with ONLY the hanja."
//!
//! [validation]
//! strict_pinyin = true
//!
//! [server]
//! corpus_dir = "public/data/integrated"
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use tracing::{error, info};

use crate::error::{Result, VerifyError};
use crate::oracle::{CommandOracle, ExhaustionDetector};
use crate::prompts::PromptTemplates;
use crate::validate::Validator;

#[derive(Clone, Debug, Deserialize, Default)]
pub struct VerifierConfig {
  #[serde(default)]
  pub oracle: OracleConfig,
  /// Template overrides keyed by record key. Keys that are not one of the
  /// fixed fields declare custom fields.
  #[serde(default)]
  pub prompts: BTreeMap<String, String>,
  #[serde(default)]
  pub validation: ValidationConfig,
  #[serde(default)]
  pub server: ServerConfig,
}

#[derive(Clone, Debug, Deserialize)]
pub struct OracleConfig {
  #[serde(default = "default_command")]
  pub command: String,
  #[serde(default)]
  pub args: Vec<String>,
  /// Batch mode waits indefinitely unless set.
  #[serde(default)]
  pub timeout_secs: Option<u64>,
  #[serde(default)]
  pub exhaustion_phrases: Option<Vec<String>>,
}

fn default_command() -> String { "claude".into() }

impl Default for OracleConfig {
  fn default() -> Self {
    Self { command: default_command(), args: Vec::new(), timeout_secs: None, exhaustion_phrases: None }
  }
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct ValidationConfig {
  /// Replaces the built-in denylist when present.
  #[serde(default)]
  pub denylist: Option<Vec<String>>,
  #[serde(default)]
  pub strict_pinyin: bool,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ServerConfig {
  #[serde(default = "default_corpus_dir")]
  pub corpus_dir: String,
  #[serde(default = "default_static_dir")]
  pub static_dir: String,
  #[serde(default = "default_interactive_timeout")]
  pub timeout_secs: u64,
}

fn default_corpus_dir() -> String { "public/data/integrated".into() }
fn default_static_dir() -> String { "./static".into() }
fn default_interactive_timeout() -> u64 { 30 }

impl Default for ServerConfig {
  fn default() -> Self {
    Self {
      corpus_dir: default_corpus_dir(),
      static_dir: default_static_dir(),
      timeout_secs: default_interactive_timeout(),
    }
  }
}

impl VerifierConfig {
  pub fn from_toml_str(s: &str) -> Result<Self> {
    toml::from_str::<VerifierConfig>(s).map_err(|e| VerifyError::Config(e.to_string()))
  }

  pub fn oracle(&self, timeout: Option<Duration>) -> CommandOracle {
    CommandOracle::new(self.oracle.command.clone(), self.oracle.args.clone(), timeout)
  }

  pub fn batch_timeout(&self) -> Option<Duration> {
    self.oracle.timeout_secs.map(Duration::from_secs)
  }

  pub fn exhaustion(&self) -> ExhaustionDetector {
    match &self.oracle.exhaustion_phrases {
      Some(phrases) => ExhaustionDetector::new(phrases.clone()),
      None => ExhaustionDetector::default(),
    }
  }

  pub fn validator(&self) -> Validator {
    Validator::new(self.validation.denylist.clone(), self.validation.strict_pinyin)
  }

  pub fn templates(&self) -> Result<PromptTemplates> {
    PromptTemplates::with_overrides(&self.prompts)
  }
}

/// Load config from an explicit path. Read and parse errors are returned.
pub fn load_config_from_file(path: &Path) -> Result<VerifierConfig> {
  let s = std::fs::read_to_string(path)
    .map_err(|e| VerifyError::Config(format!("failed to read {}: {}", path.display(), e)))?;
  let cfg = VerifierConfig::from_toml_str(&s)?;
  info!(target: "verifier", path = %path.display(), "Loaded verifier config (TOML)");
  Ok(cfg)
}

/// Load config from `path` when given. On any read or parse error, logs and
/// falls back to defaults so a broken file never blocks a session.
pub fn load_config_or_default(path: Option<&Path>) -> VerifierConfig {
  let Some(path) = path else {
    return VerifierConfig::default();
  };
  match load_config_from_file(path) {
    Ok(cfg) => cfg,
    Err(e) => {
      error!(target: "verifier", path = %path.display(), error = %e, "Failed to load TOML config; using defaults");
      VerifierConfig::default()
    }
  }
}
