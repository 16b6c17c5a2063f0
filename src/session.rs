//! Verification pipeline and the batch session loop.
//!
//! One record at a time: build prompt -> query oracle -> exhaustion check ->
//! normalize -> validate -> mutate only if the accepted candidate differs ->
//! write the whole document through the store.
//!
//! `Verifier::verify` never touches the document, so the interactive front-end
//! can await the oracle without holding the document lock and apply the result
//! afterwards with `apply_candidate`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, error, info, instrument, warn};

use crate::corpus::{CorpusDocument, CorpusStore, Sentence, SentencePath};
use crate::domain::{Field, Outcome};
use crate::error::{Result, VerifyError};
use crate::extract::{normalize, LabelSet};
use crate::oracle::{ExhaustionDetector, Oracle};
use crate::prompts::PromptTemplates;
use crate::util::trunc_for_log;
use crate::validate::Validator;

/// Number of prompts echoed when debug output is on.
const DEBUG_PROMPTS: usize = 2;

/// What the pipeline concluded about one record, before any mutation.
#[derive(Debug)]
pub enum Verdict {
  /// No Chinese sentence; the oracle was not consulted.
  Skipped,
  /// The oracle reported a usage limit; nothing may be changed.
  Exhausted { raw: String },
  /// Per-record failure (oracle missing, timeout, bad template...).
  Failed(VerifyError),
  Rejected { raw: String, candidate: String },
  Accepted { raw: String, candidate: String },
}

/// Result of applying an accepted candidate.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Applied {
  Updated { previous: String },
  Unchanged,
}

/// Everything needed to verify a record, minus the document itself.
#[derive(Clone, Debug)]
pub struct Verifier<O> {
  pub oracle: O,
  pub templates: PromptTemplates,
  pub validator: Validator,
  pub exhaustion: ExhaustionDetector,
  pub labels: LabelSet,
}

impl<O: Oracle> Verifier<O> {
  pub fn new(oracle: O, templates: PromptTemplates, validator: Validator, exhaustion: ExhaustionDetector, labels: LabelSet) -> Self {
    Self { oracle, templates, validator, exhaustion, labels }
  }

  #[instrument(level = "debug", skip_all, fields(index = index, field = %field))]
  pub async fn verify(&self, index: usize, field: &Field, record: &Sentence, echo_debug: bool) -> Verdict {
    if record.source().trim().is_empty() {
      return Verdict::Skipped;
    }

    let prompt = match self.templates.build_prompt(field, record) {
      Ok(p) => p,
      Err(e) => return Verdict::Failed(e),
    };
    if echo_debug {
      info!(target: "session", %index, %prompt, "Debug: full prompt being sent");
    }

    let reply = match self.oracle.query(&prompt).await {
      Ok(r) => r,
      Err(e) => return Verdict::Failed(e),
    };
    if echo_debug {
      info!(target: "session", %index, stderr = %reply.stderr.trim(), exit_code = ?reply.exit_code, "Debug: oracle exit status");
    }
    if reply.exit_code.map_or(false, |c| c != 0) {
      warn!(target: "session", %index, exit_code = ?reply.exit_code, "Oracle exited with non-zero status; reading stdout anyway");
    }

    let raw = reply.stdout.trim().to_string();
    debug!(target: "session", %index, raw = %trunc_for_log(&raw, 200), "Oracle raw output");

    if self.exhaustion.is_exhausted(&raw) {
      return Verdict::Exhausted { raw };
    }

    let candidate = normalize(&raw, self.labels);
    match self.validator.validate(&candidate, field.category()) {
      Outcome::Accepted(candidate) => Verdict::Accepted { raw, candidate },
      Outcome::Rejected => Verdict::Rejected { raw, candidate },
    }
  }
}

/// Overwrite the field only if `candidate` differs from its current value, then
/// persist the whole document. A failed save leaves the in-memory change in
/// place and is reported as `PersistenceFailure`.
pub fn apply_candidate<S: CorpusStore>(
  doc: &mut CorpusDocument,
  path: SentencePath,
  field: &Field,
  candidate: &str,
  store: &S,
) -> Result<Applied> {
  let len = doc.len();
  let record = doc.at_mut(path).ok_or(VerifyError::IndexOutOfRange { index: path.sentence, len })?;
  let previous = record.get(field.key()).to_string();
  if previous == candidate {
    return Ok(Applied::Unchanged);
  }
  record.set(field.key(), candidate.to_string());
  store.save(doc)?;
  Ok(Applied::Updated { previous })
}

#[derive(Clone, Debug)]
pub struct SessionConfig {
  pub field: Field,
  /// Index of the first record to process.
  pub start: usize,
  /// Stop after this many records have been processed (skips included).
  pub limit: Option<usize>,
  /// Echo the first prompts and the oracle's exit status.
  pub debug: bool,
}

#[derive(Debug)]
pub enum Halt {
  Completed,
  LimitReached,
  RateLimited,
  /// The operator asked to stop; the record in progress was finished first.
  Interrupted,
  Error(VerifyError),
}

#[derive(Debug)]
pub struct SessionReport {
  pub halt: Halt,
  /// Next record to process; pass as the start index to resume.
  pub cursor: usize,
  pub total: usize,
  pub processed: usize,
  pub updated: usize,
  pub unchanged: usize,
  pub rejected: usize,
  pub skipped: usize,
  pub errors: usize,
}

impl SessionReport {
  pub fn is_resumable(&self) -> bool {
    !matches!(self.halt, Halt::Completed)
  }

  /// Operator-facing summary, ending with the start index to resume from.
  pub fn summary(&self) -> String {
    let counts = format!(
      "{} updated, {} unchanged, {} rejected, {} skipped, {} errors",
      self.updated, self.unchanged, self.rejected, self.skipped, self.errors
    );
    let resume = format!("To resume, run again with --start {}", self.cursor);
    match &self.halt {
      Halt::Completed => format!("Completed: {} of {} records processed, {}.", self.processed, self.total, counts),
      Halt::LimitReached => format!("Stopped after {} records: {}.\n{}", self.processed, counts, resume),
      Halt::RateLimited => format!("Rate limit reached at record #{}: {}.\n{}", self.cursor, counts, resume),
      Halt::Interrupted => format!("Interrupted before record #{}: {}.\n{}", self.cursor, counts, resume),
      Halt::Error(e) => format!("Stopped at record #{}: {}\n{}.\n{}", self.cursor, e, counts, resume),
    }
  }
}

/// Sequential batch loop over the flattened records of one document.
pub struct Session<'a, O, S> {
  verifier: &'a Verifier<O>,
  store: &'a S,
  config: SessionConfig,
  stop: Option<Arc<AtomicBool>>,
}

impl<'a, O: Oracle, S: CorpusStore> Session<'a, O, S> {
  pub fn new(verifier: &'a Verifier<O>, store: &'a S, config: SessionConfig) -> Self {
    Self { verifier, store, config, stop: None }
  }

  /// Checked before each record; once set, the session halts as `Interrupted`.
  pub fn with_stop_flag(mut self, stop: Arc<AtomicBool>) -> Self {
    self.stop = Some(stop);
    self
  }

  #[instrument(level = "info", skip_all, fields(field = %self.config.field, start = self.config.start))]
  pub async fn run(&self, doc: &mut CorpusDocument) -> SessionReport {
    let paths = doc.paths();
    let field = &self.config.field;
    let mut report = SessionReport {
      halt: Halt::Completed,
      cursor: self.config.start,
      total: paths.len(),
      processed: 0,
      updated: 0,
      unchanged: 0,
      rejected: 0,
      skipped: 0,
      errors: 0,
    };
    let mut prompts_echoed = 0;

    // A field without a template would fail on every record.
    if self.verifier.templates.get(field).is_none() {
      let e = VerifyError::UnknownField(field.key().to_string());
      error!(target: "session", error = %e, "No prompt template for field; nothing was verified");
      report.halt = Halt::Error(e);
      return report;
    }

    info!(target: "session", total = paths.len(), start = self.config.start, field = %field.display_name(), "Verification session started");

    while let Some(&path) = paths.get(report.cursor) {
      if self.config.limit.map_or(false, |l| report.processed >= l) {
        report.halt = Halt::LimitReached;
        break;
      }
      if self.stop.as_ref().map_or(false, |s| s.load(Ordering::SeqCst)) {
        report.halt = Halt::Interrupted;
        break;
      }
      let index = report.cursor;
      let record = match doc.at(path) {
        Some(r) => r.clone(),
        None => break,
      };

      let echo = self.config.debug && prompts_echoed < DEBUG_PROMPTS && !record.source().trim().is_empty();
      if echo {
        prompts_echoed += 1;
      }

      match self.verifier.verify(index, field, &record, echo).await {
        Verdict::Skipped => {
          report.skipped += 1;
          warn!(target: "session", %index, error = %VerifyError::MissingSourceText { index }, "Skipping record");
        }
        Verdict::Exhausted { raw } => {
          warn!(target: "session", %index, raw = %trunc_for_log(&raw, 120), error = %VerifyError::OracleExhausted { index }, "Rate limit reached; halting");
          report.halt = Halt::RateLimited;
          break;
        }
        Verdict::Failed(e) if e.is_session_fatal() => {
          error!(target: "session", %index, error = %e, "Halting");
          report.halt = Halt::Error(e);
          break;
        }
        Verdict::Failed(e) => {
          report.errors += 1;
          error!(target: "session", %index, error = %e, "Verification failed for record; moving on");
        }
        Verdict::Rejected { candidate, .. } => {
          report.rejected += 1;
          warn!(target: "session", %index, %candidate, error = %VerifyError::ExtractionRejected { index }, "Skipping update");
        }
        Verdict::Accepted { candidate, .. } => {
          match apply_candidate(doc, path, field, &candidate, self.store) {
            Ok(Applied::Updated { previous }) => {
              report.updated += 1;
              info!(target: "session", %index, %previous, value = %candidate, "Updated and saved");
            }
            Ok(Applied::Unchanged) => {
              report.unchanged += 1;
              info!(target: "session", %index, "Value is correct, no update needed");
            }
            Err(e) => {
              error!(target: "session", %index, error = %e, "Save failed; halting");
              report.halt = Halt::Error(e);
              break;
            }
          }
        }
      }

      report.processed += 1;
      report.cursor += 1;
    }

    if !matches!(report.halt, Halt::Error(_)) {
      if let Err(e) = self.store.save(doc) {
        error!(target: "session", cursor = report.cursor, error = %e, "Final save failed");
        report.halt = Halt::Error(e);
      }
    }

    info!(
      target: "session",
      halt = ?report.halt, cursor = report.cursor, updated = report.updated, unchanged = report.unchanged,
      rejected = report.rejected, skipped = report.skipped, errors = report.errors,
      "Verification session finished"
    );
    report
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::corpus::tests::sample_doc;
  use crate::corpus::{Content, LessonContent, Node, Subcategory};
  use crate::domain::FieldKind;
  use crate::oracle::OracleReply;
  use std::cell::Cell;
  use std::sync::atomic::AtomicUsize;
  use std::sync::Mutex;

  type Script = Box<dyn Fn(usize, &str) -> Result<String> + Send + Sync>;

  /// Answers through a closure over (call number, prompt) and records prompts.
  struct ScriptedOracle {
    script: Script,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
  }

  impl ScriptedOracle {
    fn new(script: impl Fn(usize, &str) -> Result<String> + Send + Sync + 'static) -> Self {
      Self { script: Box::new(script), calls: AtomicUsize::new(0), prompts: Mutex::new(Vec::new()) }
    }

    fn prompts(&self) -> Vec<String> {
      self.prompts.lock().unwrap().clone()
    }
  }

  impl Oracle for ScriptedOracle {
    async fn query(&self, prompt: &str) -> Result<OracleReply> {
      let n = self.calls.fetch_add(1, Ordering::SeqCst);
      self.prompts.lock().unwrap().push(prompt.to_string());
      let stdout = (self.script)(n, prompt)?;
      Ok(OracleReply { stdout, exit_code: Some(0), ..Default::default() })
    }
  }

  #[derive(Default)]
  struct CountingStore {
    saves: Cell<usize>,
  }

  impl CorpusStore for CountingStore {
    fn save(&self, _doc: &CorpusDocument) -> Result<()> {
      self.saves.set(self.saves.get() + 1);
      Ok(())
    }
  }

  struct FailingStore;

  impl CorpusStore for FailingStore {
    fn save(&self, _doc: &CorpusDocument) -> Result<()> {
      Err(VerifyError::PersistenceFailure {
        path: "ro.json".into(),
        source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only"),
      })
    }
  }

  fn verifier(oracle: ScriptedOracle) -> Verifier<ScriptedOracle> {
    Verifier::new(oracle, PromptTemplates::default(), Validator::default(), ExhaustionDetector::default(), LabelSet::FieldAware)
  }

  fn config(kind: FieldKind, start: usize) -> SessionConfig {
    SessionConfig { field: kind.into(), start, limit: None, debug: false }
  }

  /// One subcategory holding the given (sentence, pinyin) records.
  fn doc_with(records: &[(&str, &str)]) -> CorpusDocument {
    let sentences = records.iter().map(|(zh, py)| Sentence::default().with("sentence", zh).with("pinyin", py)).collect();
    let lesson = LessonContent::with_children(vec![Subcategory::with_children(sentences)]);
    CorpusDocument { root: Node::with_children(vec![Content::with_children(vec![lesson])]) }
  }

  fn pinyin_of(doc: &CorpusDocument, index: usize) -> String {
    doc.at(doc.locate(index).unwrap()).unwrap().get("pinyin").to_string()
  }

  #[tokio::test]
  async fn differing_candidate_is_written_through() {
    let mut doc = doc_with(&[("你好", "ni hao")]);
    let v = verifier(ScriptedOracle::new(|_, _| Ok("nǐ hǎo".into())));
    let store = CountingStore::default();
    let report = Session::new(&v, &store, config(FieldKind::Pinyin, 0)).run(&mut doc).await;

    assert!(matches!(report.halt, Halt::Completed));
    assert_eq!(report.updated, 1);
    assert_eq!(pinyin_of(&doc, 0), "nǐ hǎo");
    // one write-through save plus the final save
    assert_eq!(store.saves.get(), 2);
    assert_eq!(report.cursor, 1);
  }

  #[tokio::test]
  async fn identical_candidate_does_not_persist() {
    let mut doc = doc_with(&[("你好", "nǐ hǎo")]);
    let v = verifier(ScriptedOracle::new(|_, _| Ok("Pinyin: nǐ hǎo".into())));
    let store = CountingStore::default();
    let report = Session::new(&v, &store, config(FieldKind::Pinyin, 0)).run(&mut doc).await;

    assert_eq!(report.updated, 0);
    assert_eq!(report.unchanged, 1);
    assert_eq!(store.saves.get(), 1, "only the end-of-session save");
  }

  #[tokio::test]
  async fn exhaustion_halts_without_touching_the_record() {
    let mut doc = doc_with(&[("你好", "ni hao"), ("我想喝咖啡", "wo xiang"), ("他是老师", "ta shi")]);
    let v = verifier(ScriptedOracle::new(|n, _| match n {
      0 => Ok("nǐ hǎo".into()),
      _ => Ok("5-hour limit reached, resets at 7pm".into()),
    }));
    let store = CountingStore::default();
    let report = Session::new(&v, &store, config(FieldKind::Pinyin, 0)).run(&mut doc).await;

    assert!(matches!(report.halt, Halt::RateLimited));
    assert!(report.is_resumable());
    assert_eq!(report.cursor, 1);
    assert_eq!(pinyin_of(&doc, 1), "wo xiang");
    assert_eq!(pinyin_of(&doc, 2), "ta shi");
  }

  #[tokio::test]
  async fn field_without_template_halts_before_any_record() {
    let mut doc = sample_doc();
    let v = verifier(ScriptedOracle::new(|_, _| Ok("Pinyin: nǐ hǎo".into())));
    let store = CountingStore::default();
    let cfg = SessionConfig { field: Field::parse("pinyn").unwrap(), start: 0, limit: None, debug: false };
    let report = Session::new(&v, &store, cfg).run(&mut doc).await;

    assert!(matches!(&report.halt, Halt::Error(VerifyError::UnknownField(k)) if k == "pinyn"));
    assert_eq!((report.processed, report.errors, report.cursor), (0, 0, 0));
    assert!(v.oracle.prompts().is_empty());
    assert_eq!(store.saves.get(), 0);
    assert!(!report.summary().starts_with("Completed"));
  }

  #[tokio::test]
  async fn empty_sentence_is_skipped_without_oracle_call() {
    let mut doc = sample_doc();
    let oracle = ScriptedOracle::new(|_, _| Ok("Korean: 안녕".into()));
    let v = verifier(oracle);
    let store = CountingStore::default();
    let report = Session::new(&v, &store, config(FieldKind::Korean, 1)).run(&mut doc).await;

    assert_eq!(report.skipped, 1);
    assert_eq!(report.processed, 2);
    assert_eq!(report.cursor, 3);
    let prompts = v.oracle.prompts();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].starts_with("Chinese: 我想喝咖啡"));
  }

  #[tokio::test]
  async fn rejected_and_failed_records_are_left_alone() {
    let mut doc = doc_with(&[("你好", "ni hao"), ("我想喝咖啡", "wo xiang"), ("他是老师", "ta shi")]);
    let v = verifier(ScriptedOracle::new(|n, _| match n {
      0 => Ok("I'm happy to help! The correct pinyin is nǐ hǎo.".into()),
      1 => Err(VerifyError::OracleTimeout { secs: 30 }),
      _ => Ok(String::new()),
    }));
    let store = CountingStore::default();
    let report = Session::new(&v, &store, config(FieldKind::Pinyin, 0)).run(&mut doc).await;

    assert!(matches!(report.halt, Halt::Completed));
    assert_eq!((report.rejected, report.errors, report.updated), (2, 1, 0));
    assert_eq!(pinyin_of(&doc, 0), "ni hao");
    assert_eq!(store.saves.get(), 1);
  }

  #[tokio::test]
  async fn persistence_failure_halts_at_the_failing_record() {
    let mut doc = doc_with(&[("你好", "ni hao"), ("他是老师", "ta shi")]);
    let v = verifier(ScriptedOracle::new(|_, _| Ok("nǐ hǎo".into())));
    let report = Session::new(&v, &FailingStore, config(FieldKind::Pinyin, 0)).run(&mut doc).await;

    assert!(matches!(report.halt, Halt::Error(VerifyError::PersistenceFailure { .. })));
    assert_eq!(report.cursor, 0);
    assert_eq!(v.oracle.prompts().len(), 1);
  }

  #[tokio::test]
  async fn limit_stops_with_resumable_cursor() {
    let mut doc = doc_with(&[("你好", "a"), ("我想喝咖啡", "b"), ("他是老师", "c")]);
    let v = verifier(ScriptedOracle::new(|_, _| Ok("nǐ hǎo".into())));
    let store = CountingStore::default();
    let cfg = SessionConfig { limit: Some(2), ..config(FieldKind::Pinyin, 0) };
    let report = Session::new(&v, &store, cfg).run(&mut doc).await;

    assert!(matches!(report.halt, Halt::LimitReached));
    assert_eq!(report.cursor, 2);
    assert_eq!(pinyin_of(&doc, 2), "c");
  }

  #[tokio::test]
  async fn stop_flag_interrupts_before_the_next_record() {
    let mut doc = doc_with(&[("你好", "a"), ("我想喝咖啡", "b")]);
    let stop = Arc::new(AtomicBool::new(false));
    let flag = stop.clone();
    let v = verifier(ScriptedOracle::new(move |_, _| {
      flag.store(true, Ordering::SeqCst);
      Ok("nǐ hǎo".into())
    }));
    let store = CountingStore::default();
    let report = Session::new(&v, &store, config(FieldKind::Pinyin, 0)).with_stop_flag(stop).run(&mut doc).await;

    assert!(matches!(report.halt, Halt::Interrupted));
    assert_eq!((report.cursor, report.updated), (1, 1));
    assert!(report.summary().ends_with("--start 1"));
  }

  #[test]
  fn summary_names_the_resume_index() {
    let report = SessionReport {
      halt: Halt::RateLimited,
      cursor: 42,
      total: 100,
      processed: 10,
      updated: 3,
      unchanged: 5,
      rejected: 1,
      skipped: 1,
      errors: 0,
    };
    let text = report.summary();
    assert!(text.starts_with("Rate limit reached at record #42: 3 updated, 5 unchanged"));
    assert!(text.ends_with("To resume, run again with --start 42"));
    let done = SessionReport { halt: Halt::Completed, ..report };
    assert!(!done.summary().contains("--start"));
  }

  #[tokio::test]
  async fn start_past_the_end_completes_immediately() {
    let mut doc = doc_with(&[("你好", "a")]);
    let v = verifier(ScriptedOracle::new(|_, _| Ok("nǐ hǎo".into())));
    let store = CountingStore::default();
    let report = Session::new(&v, &store, config(FieldKind::Pinyin, 5)).run(&mut doc).await;
    assert!(matches!(report.halt, Halt::Completed));
    assert_eq!(report.processed, 0);
    assert_eq!(store.saves.get(), 1);
  }

  /// Deterministic English "translation" derived from the prompt's sentence.
  fn english_for(prompt: &str) -> String {
    let zh = prompt.trim_start_matches("Chinese: ").split(" / ").next().unwrap_or("");
    format!("EN {}", zh)
  }

  #[tokio::test]
  async fn resuming_from_the_reported_cursor_matches_an_uninterrupted_run() {
    let records = [("你好", ""), ("", ""), ("我想喝咖啡", ""), ("今天天气很好", ""), ("他是老师", "")];

    let mut full = doc_with(&records);
    let v_full = verifier(ScriptedOracle::new(|_, p| Ok(english_for(p))));
    let store = CountingStore::default();
    Session::new(&v_full, &store, config(FieldKind::English, 0)).run(&mut full).await;

    let mut halted = doc_with(&records);
    let v_first = verifier(ScriptedOracle::new(|n, p| {
      if n == 2 { Ok("limit reached".into()) } else { Ok(english_for(p)) }
    }));
    let first = Session::new(&v_first, &store, config(FieldKind::English, 0)).run(&mut halted).await;
    assert!(matches!(first.halt, Halt::RateLimited));
    assert_eq!(first.cursor, 3);

    let v_second = verifier(ScriptedOracle::new(|_, p| Ok(english_for(p))));
    let second = Session::new(&v_second, &store, config(FieldKind::English, first.cursor)).run(&mut halted).await;
    assert!(matches!(second.halt, Halt::Completed));

    assert_eq!(halted, full);
    let mut seen = v_first.oracle.prompts();
    seen.pop(); // the exhausted attempt is retried on resume
    seen.extend(v_second.oracle.prompts());
    assert_eq!(seen, v_full.oracle.prompts());
  }
}
