//! Application state for the interactive form: the loaded corpus file, the
//! editable prompt set, and the single-flight verification guard.
//!
//! The oracle is awaited without holding the corpus lock. Mutation happens
//! afterwards under the write lock, and only if the same file generation is
//! still loaded.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tokio::sync::RwLock;
use tracing::{error, info, instrument, warn};

use crate::config::VerifierConfig;
use crate::corpus::{CorpusDocument, JsonFileStore, Sentence, SentencePath};
use crate::domain::{Field, FieldKind};
use crate::error::{Result, VerifyError};
use crate::extract::LabelSet;
use crate::oracle::CommandOracle;
use crate::pinyin::{agrees_with_reference, reference_reading};
use crate::protocol::{ContextEntry, LoadOut, PromptOut, SentenceView, VerifyOut, VerifyStatus};
use crate::session::{apply_candidate, Applied, Verdict, Verifier};

struct LoadedCorpus {
    name: String,
    path: PathBuf,
    doc: CorpusDocument,
    paths: Vec<SentencePath>,
    generation: u64,
}

pub struct AppState {
    pub corpus_dir: PathBuf,
    pub static_dir: PathBuf,
    verifier: RwLock<Verifier<CommandOracle>>,
    corpus: RwLock<Option<LoadedCorpus>>,
    /// Record index of the verification in flight, if any.
    pending: Mutex<Option<usize>>,
}

/// Clears the in-flight marker when the request finishes or is dropped.
struct PendingGuard<'a> {
    slot: &'a Mutex<Option<usize>>,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.slot.lock() {
            *slot = None;
        }
    }
}

impl AppState {
    pub fn new(verifier: Verifier<CommandOracle>, corpus_dir: PathBuf, static_dir: PathBuf) -> Self {
        Self {
            corpus_dir,
            static_dir,
            verifier: RwLock::new(verifier),
            corpus: RwLock::new(None),
            pending: Mutex::new(None),
        }
    }

    /// Build from config. The interactive oracle always has a timeout.
    #[instrument(level = "info", skip_all)]
    pub fn from_config(cfg: &VerifierConfig) -> Result<Self> {
        let timeout = std::time::Duration::from_secs(cfg.server.timeout_secs);
        let verifier = Verifier::new(cfg.oracle(Some(timeout)), cfg.templates()?, cfg.validator(), cfg.exhaustion(), LabelSet::Basic);
        info!(
            target: "verifier",
            command = %cfg.oracle.command, timeout_secs = cfg.server.timeout_secs,
            corpus_dir = %cfg.server.corpus_dir, "Interactive state ready"
        );
        Ok(Self::new(verifier, PathBuf::from(&cfg.server.corpus_dir), PathBuf::from(&cfg.server.static_dir)))
    }

    /// `*.json` file names in the corpus directory, sorted.
    #[instrument(level = "debug", skip(self))]
    pub fn list_files(&self) -> Result<Vec<String>> {
        let entries = std::fs::read_dir(&self.corpus_dir).map_err(|e| VerifyError::CorpusLoad {
            path: self.corpus_dir.clone(),
            message: e.to_string(),
        })?;
        let mut files: Vec<String> = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_file())
            .filter_map(|e| e.file_name().into_string().ok())
            .filter(|n| n.ends_with(".json") && !n.starts_with('.'))
            .collect();
        files.sort();
        Ok(files)
    }

    /// Load a file from the corpus directory. Only bare file names are accepted.
    #[instrument(level = "info", skip(self))]
    pub async fn load_file(&self, name: &str) -> Result<LoadOut> {
        let bare = Path::new(name).file_name().and_then(|n| n.to_str()) == Some(name);
        if !bare || !name.ends_with(".json") {
            return Err(VerifyError::CorpusLoad {
                path: PathBuf::from(name),
                message: "expected a .json file name inside the corpus directory".into(),
            });
        }
        let path = self.corpus_dir.join(name);
        let doc = CorpusDocument::load(&path)?;
        let paths = doc.paths();
        let total = paths.len();

        let mut slot = self.corpus.write().await;
        let generation = slot.as_ref().map_or(0, |c| c.generation + 1);
        *slot = Some(LoadedCorpus { name: name.to_string(), path, doc, paths, generation });
        info!(target: "verifier", file = %name, total, "Corpus file loaded");
        Ok(LoadOut { file: name.to_string(), total })
    }

    pub async fn sentence_view(&self, index: usize, field: &str) -> Result<SentenceView> {
        let field = Field::parse(field)?;
        let preview = self.verifier.read().await.templates.preview(&field);
        let slot = self.corpus.read().await;
        let loaded = slot.as_ref().ok_or(VerifyError::NoCorpusLoaded)?;
        let record = record_at(loaded, index)?;

        let sentence = record.source().to_string();
        let stored_pinyin = record.get(FieldKind::Pinyin.key());
        let context = FieldKind::ALL
            .into_iter()
            .filter(|k| *k != FieldKind::Sentence && k.key() != field.key())
            .map(|k| ContextEntry {
                field: k.key().to_string(),
                label: k.display_name().to_string(),
                value: record.get(k.key()).to_string(),
            })
            .collect();

        Ok(SentenceView {
            file: loaded.name.clone(),
            index,
            total: loaded.paths.len(),
            field: field.key().to_string(),
            label: field.display_name(),
            category: field.category(),
            current_value: record.get(field.key()).to_string(),
            reference_pinyin: reference_reading(&sentence),
            pinyin_agrees: agrees_with_reference(stored_pinyin, &sentence),
            sentence,
            context,
            prompt_preview: preview,
        })
    }

    pub async fn prompts(&self) -> Vec<PromptOut> {
        let verifier = self.verifier.read().await;
        verifier.templates.fields().iter().map(|f| prompt_out(&verifier, f)).collect()
    }

    /// Replace a template, or restore the built-in one when `template` is `None`.
    #[instrument(level = "info", skip(self, template), fields(template_len = template.as_ref().map(|t| t.len())))]
    pub async fn update_prompt(&self, field: &str, template: Option<String>) -> Result<PromptOut> {
        let field = Field::parse(field)?;
        let mut verifier = self.verifier.write().await;
        match template {
            Some(t) => verifier.templates.set(&field, t)?,
            None => verifier.templates.reset(&field),
        }
        info!(target: "verifier", field = %field, "Prompt template updated");
        Ok(prompt_out(&verifier, &field))
    }

    /// Verify one record on demand. At most one verification runs at a time;
    /// a second request while one is pending is refused with `RequestPending`.
    #[instrument(level = "info", skip(self))]
    pub async fn verify(&self, index: usize, field: &str) -> Result<VerifyOut> {
        let field = Field::parse(field)?;
        let _guard = self.begin(index)?;

        let (record, path, file, generation) = {
            let slot = self.corpus.read().await;
            let loaded = slot.as_ref().ok_or(VerifyError::NoCorpusLoaded)?;
            let record = record_at(loaded, index)?.clone();
            (record, loaded.paths[index], loaded.path.clone(), loaded.generation)
        };
        if record.source().trim().is_empty() {
            return Err(VerifyError::MissingSourceText { index });
        }
        let previous = record.get(field.key()).to_string();
        if !field.is_source() && previous.trim().is_empty() {
            return Err(VerifyError::NothingToVerify { index, field: field.key().to_string() });
        }

        // Snapshot so template edits do not wait on the oracle.
        let verifier = self.verifier.read().await.clone();
        let (raw, candidate) = match verifier.verify(index, &field, &record, false).await {
            Verdict::Accepted { raw, candidate } => (raw, candidate),
            Verdict::Rejected { raw, candidate } => {
                warn!(target: "session", %index, %candidate, "Could not extract a valid value");
                return Ok(VerifyOut { index, field: field.key().to_string(), status: VerifyStatus::Rejected, previous, value: candidate, raw });
            }
            Verdict::Exhausted { .. } => return Err(VerifyError::OracleExhausted { index }),
            Verdict::Skipped => return Err(VerifyError::MissingSourceText { index }),
            Verdict::Failed(e) => {
                error!(target: "session", %index, error = %e, "Verification failed");
                return Err(e);
            }
        };

        let mut slot = self.corpus.write().await;
        let loaded = match slot.as_mut() {
            Some(l) if l.generation == generation => l,
            _ => return Err(VerifyError::StaleRecord { index }),
        };
        let store = JsonFileStore::new(file);
        let status = match apply_candidate(&mut loaded.doc, path, &field, &candidate, &store)? {
            Applied::Updated { .. } => {
                info!(target: "session", %index, %previous, value = %candidate, "Updated and saved");
                VerifyStatus::Updated
            }
            Applied::Unchanged => {
                info!(target: "session", %index, "Value is correct, no update needed");
                VerifyStatus::Unchanged
            }
        };
        Ok(VerifyOut { index, field: field.key().to_string(), status, previous, value: candidate, raw })
    }

    fn begin(&self, index: usize) -> Result<PendingGuard<'_>> {
        let mut slot = self.pending.lock().map_err(|_| VerifyError::RequestPending { index })?;
        if let Some(busy) = *slot {
            return Err(VerifyError::RequestPending { index: busy });
        }
        *slot = Some(index);
        Ok(PendingGuard { slot: &self.pending })
    }
}

fn record_at(loaded: &LoadedCorpus, index: usize) -> Result<&Sentence> {
    let len = loaded.paths.len();
    loaded
        .paths
        .get(index)
        .and_then(|p| loaded.doc.at(*p))
        .ok_or(VerifyError::IndexOutOfRange { index, len })
}

fn prompt_out(verifier: &Verifier<CommandOracle>, field: &Field) -> PromptOut {
    PromptOut {
        field: field.key().to_string(),
        label: field.display_name(),
        template: verifier.templates.get(field).unwrap_or("").to_string(),
        preview: verifier.templates.preview(field),
    }
}
