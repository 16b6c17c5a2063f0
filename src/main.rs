//! Caatuu · Corpus Field Verifier
//!
//! Asks an LLM command-line oracle to confirm or correct one annotation field
//! (pinyin, translations, the sentence itself) of every record in a Chinese
//! corpus JSON file, writing each accepted correction straight back to disk.
//!
//! - `batch`: sequential session over one file, resumable with `--start`
//! - `serve`: Axum HTTP + WebSocket API and a static form, one record at a time
//!
//! Important env variables:
//!   PORT                  : u16 (serve, default 3000)
//!   VERIFIER_CONFIG_PATH  : path to TOML config (oracle, prompts, validation, server)
//!   LOG_LEVEL             : tracing filter, e.g. "debug" or full directives
//!   LOG_FORMAT            : "pretty" (default) or "json"

mod cli;
mod config;
mod corpus;
mod domain;
mod error;
mod extract;
mod oracle;
mod pinyin;
mod prompts;
mod protocol;
mod routes;
mod session;
mod state;
mod telemetry;
mod util;
mod validate;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::cli::{BatchArgs, Cli, Commands, ServeArgs};
use crate::config::{load_config_or_default, VerifierConfig};
use crate::corpus::{CorpusDocument, JsonFileStore};
use crate::error::VerifyError;
use crate::extract::LabelSet;
use crate::routes::build_router;
use crate::session::{Halt, Session, SessionConfig, Verifier};
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
  telemetry::init_tracing();
  let cli = Cli::parse();

  let mut cfg = load_config_or_default(cli.config.as_deref());
  if let Some(command) = &cli.oracle {
    cfg.oracle.command = command.clone();
  }
  if cli.strict_pinyin {
    cfg.validation.strict_pinyin = true;
  }

  match cli.command {
    Commands::Batch(args) => {
      if let Some(secs) = cli.timeout_secs {
        cfg.oracle.timeout_secs = Some(secs);
      }
      run_batch(args, cfg).await
    }
    Commands::Serve(args) => {
      if let Some(secs) = cli.timeout_secs {
        cfg.server.timeout_secs = secs;
      }
      run_serve(args, cfg).await
    }
  }
}

async fn run_batch(args: BatchArgs, cfg: VerifierConfig) -> Result<(), Box<dyn std::error::Error>> {
  let verifier = Verifier::new(
    cfg.oracle(cfg.batch_timeout()),
    cfg.templates()?,
    cfg.validator(),
    cfg.exhaustion(),
    LabelSet::FieldAware,
  );
  if verifier.templates.get(&args.field).is_none() {
    return Err(VerifyError::UnknownField(args.field.key().to_string()).into());
  }
  let mut doc = CorpusDocument::load(&args.input)?;
  let store = JsonFileStore::new(args.output.clone().unwrap_or_else(|| args.input.clone()));
  info!(
    target: "verifier",
    input = %args.input.display(), output = %store.path.display(), records = doc.len(),
    oracle = %cfg.oracle.command, "Starting batch verification"
  );

  // First Ctrl-C finishes the record in flight and stops; a second one exits.
  let stop = Arc::new(AtomicBool::new(false));
  let flag = stop.clone();
  tokio::spawn(async move {
    if tokio::signal::ctrl_c().await.is_ok() {
      warn!(target: "verifier", "Interrupt received; stopping after the current record");
      flag.store(true, Ordering::SeqCst);
      if tokio::signal::ctrl_c().await.is_ok() {
        std::process::exit(130);
      }
    }
  });

  let session_cfg = SessionConfig { field: args.field, start: args.start, limit: args.limit, debug: args.debug };
  let report = Session::new(&verifier, &store, session_cfg).with_stop_flag(stop).run(&mut doc).await;
  println!("{}", report.summary());
  if report.is_resumable() {
    warn!(target: "verifier", cursor = report.cursor, halt = ?report.halt, "Session halted before the end of the corpus");
  }

  match report.halt {
    Halt::Error(e) => Err(e.into()),
    _ => Ok(()),
  }
}

async fn run_serve(args: ServeArgs, mut cfg: VerifierConfig) -> Result<(), Box<dyn std::error::Error>> {
  if let Some(dir) = args.corpus_dir {
    cfg.server.corpus_dir = dir;
  }
  if let Some(dir) = args.static_dir {
    cfg.server.static_dir = dir;
  }

  let state = Arc::new(AppState::from_config(&cfg)?);
  let app = build_router(state);

  let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
  let listener = TcpListener::bind(addr).await?;
  info!(target: "verifier", %addr, "HTTP server listening");
  axum::serve(listener, app)
    .with_graceful_shutdown(async {
      let _ = tokio::signal::ctrl_c().await;
      info!(target: "verifier", "Shutting down");
    })
    .await?;
  Ok(())
}
