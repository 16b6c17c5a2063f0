//! Corpus document model and its JSON persistence.
//!
//! Shape: `contents[] -> content[] -> subcategories[] -> sentences[]`. Every
//! level is kept as the JSON object it was read from, members in file order,
//! so a load/save round trip reproduces the file byte for byte. Only the list
//! member leading to the next level is parsed into typed children.
//!
//! Records are addressed by their position in the flattened traversal order,
//! which is the plain nesting order of the file and is stable between runs.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::de::{DeserializeOwned, Error as _};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::error::{Result, VerifyError};

/// A record type stored as a list under `LIST_KEY` in its parent object.
pub trait Listed: Serialize + DeserializeOwned {
  const LIST_KEY: &'static str;
}

/// A JSON object whose `C::LIST_KEY` member holds typed children. All other
/// members stay untouched and in place; the list member keeps its position.
#[derive(Clone, Debug, PartialEq)]
pub struct Node<C> {
  pub children: Vec<C>,
  // The list member is left here as a `null` placeholder marking its position.
  members: Map<String, Value>,
}

impl<C> Default for Node<C> {
  fn default() -> Self {
    Self { children: Vec::new(), members: Map::new() }
  }
}

#[cfg(test)]
impl<C: Listed> Node<C> {
  pub fn with_children(children: Vec<C>) -> Self {
    let mut members = Map::new();
    members.insert(C::LIST_KEY.to_string(), Value::Null);
    Self { children, members }
  }
}

impl<'de, C: Listed> Deserialize<'de> for Node<C> {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
    let mut members = Map::<String, Value>::deserialize(deserializer)?;
    let children = match members.get_mut(C::LIST_KEY) {
      Some(list) => Vec::<C>::deserialize(list.take()).map_err(|e| D::Error::custom(format!("`{}`: {}", C::LIST_KEY, e)))?,
      None => Vec::new(),
    };
    Ok(Self { children, members })
  }
}

impl<C: Listed> Serialize for Node<C> {
  fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    let has_list = self.members.contains_key(C::LIST_KEY);
    let extra = usize::from(!has_list && !self.children.is_empty());
    let mut map = serializer.serialize_map(Some(self.members.len() + extra))?;
    for (key, value) in &self.members {
      if key == C::LIST_KEY {
        map.serialize_entry(key, &self.children)?;
      } else {
        map.serialize_entry(key, value)?;
      }
    }
    if extra == 1 {
      map.serialize_entry(C::LIST_KEY, &self.children)?;
    }
    map.end()
  }
}

/// A sentence record: the raw JSON object with string accessors on top.
/// Missing, `null` and non-string values all read as `""`; writing a key
/// replaces its value in place, or appends the key when it is new.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Sentence {
  members: Map<String, Value>,
}

impl Listed for Sentence {
  const LIST_KEY: &'static str = "sentences";
}

#[cfg(test)]
impl Sentence {
  pub fn with(mut self, key: &str, value: &str) -> Self {
    self.set(key, value.to_string());
    self
  }
}

impl Sentence {
  /// The Chinese sentence (ground truth), or `""`.
  pub fn source(&self) -> &str {
    self.get("sentence")
  }

  pub fn get(&self, key: &str) -> &str {
    self.members.get(key).and_then(Value::as_str).unwrap_or("")
  }

  pub fn set(&mut self, key: &str, value: String) {
    match self.members.get_mut(key) {
      Some(slot) => *slot = Value::String(value),
      None => {
        self.members.insert(key.to_string(), Value::String(value));
      }
    }
  }
}

pub type Subcategory = Node<Sentence>;
pub type LessonContent = Node<Subcategory>;
pub type Content = Node<LessonContent>;

impl Listed for Subcategory {
  const LIST_KEY: &'static str = "subcategories";
}

impl Listed for LessonContent {
  const LIST_KEY: &'static str = "content";
}

impl Listed for Content {
  const LIST_KEY: &'static str = "contents";
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorpusDocument {
  pub root: Node<Content>,
}

/// Position of a record inside the nested tree.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SentencePath {
  pub content: usize,
  pub lesson: usize,
  pub subcategory: usize,
  pub sentence: usize,
}

impl CorpusDocument {
  /// Paths of all records in flattened traversal order.
  pub fn paths(&self) -> Vec<SentencePath> {
    let mut out = Vec::new();
    for (ci, content) in self.root.children.iter().enumerate() {
      for (li, lesson) in content.children.iter().enumerate() {
        for (si, sub) in lesson.children.iter().enumerate() {
          for idx in 0..sub.children.len() {
            out.push(SentencePath { content: ci, lesson: li, subcategory: si, sentence: idx });
          }
        }
      }
    }
    out
  }

  pub fn len(&self) -> usize {
    self.sentences().count()
  }

  pub fn is_empty(&self) -> bool { self.sentences().next().is_none() }

  pub fn locate(&self, index: usize) -> Option<SentencePath> {
    self.paths().get(index).copied()
  }

  pub fn at(&self, path: SentencePath) -> Option<&Sentence> {
    self.root.children.get(path.content)?
      .children.get(path.lesson)?
      .children.get(path.subcategory)?
      .children.get(path.sentence)
  }

  pub fn at_mut(&mut self, path: SentencePath) -> Option<&mut Sentence> {
    self.root.children.get_mut(path.content)?
      .children.get_mut(path.lesson)?
      .children.get_mut(path.subcategory)?
      .children.get_mut(path.sentence)
  }

  /// Iterate records in flattened traversal order.
  pub fn sentences(&self) -> impl Iterator<Item = &Sentence> {
    self.root.children.iter()
      .flat_map(|c| c.children.iter())
      .flat_map(|l| l.children.iter())
      .flat_map(|s| s.children.iter())
  }

  pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
    serde_json::from_str(s)
  }

  /// Serialize with 4-space indentation and literal (unescaped) non-ASCII text.
  pub fn to_json_string(&self) -> serde_json::Result<String> {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    self.serialize(&mut ser)?;
    // serde_json only ever emits UTF-8.
    Ok(String::from_utf8_lossy(&buf).into_owned())
  }

  #[instrument(level = "info", skip_all, fields(path = %path.display()))]
  pub fn load(path: &Path) -> Result<Self> {
    let raw = fs::read_to_string(path).map_err(|e| VerifyError::CorpusLoad {
      path: path.to_path_buf(),
      message: e.to_string(),
    })?;
    let doc = Self::from_json_str(&raw).map_err(|e| VerifyError::CorpusLoad {
      path: path.to_path_buf(),
      message: e.to_string(),
    })?;
    if doc.is_empty() {
      warn!(target: "verifier", "Corpus has no sentence records");
    }
    debug!(target: "verifier", records = doc.len(), "Corpus loaded");
    Ok(doc)
  }

  /// Write the whole document to `path`. The new contents go to a sibling temp
  /// file first and are renamed over the target, so readers never observe a
  /// half-written corpus.
  pub fn save(&self, path: &Path) -> Result<()> {
    let persist_err = |source: std::io::Error| VerifyError::PersistenceFailure {
      path: path.to_path_buf(),
      source,
    };
    let json = self.to_json_string().map_err(|e| persist_err(e.into()))?;

    let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or("corpus.json");
    let tmp = path.with_file_name(format!(".{}.{}.tmp", file_name, Uuid::new_v4().simple()));
    let write = || -> std::io::Result<()> {
      let mut f = fs::File::create(&tmp)?;
      f.write_all(json.as_bytes())?;
      f.sync_all()?;
      fs::rename(&tmp, path)
    };
    if let Err(e) = write() {
      let _ = fs::remove_file(&tmp);
      return Err(persist_err(e));
    }
    Ok(())
  }
}

/// Persistence collaborator used by the session loop.
pub trait CorpusStore {
  fn save(&self, doc: &CorpusDocument) -> Result<()>;
}

/// Saves to a fixed JSON file path.
#[derive(Clone, Debug)]
pub struct JsonFileStore {
  pub path: PathBuf,
}

impl JsonFileStore {
  pub fn new(path: impl Into<PathBuf>) -> Self { Self { path: path.into() } }
}

impl CorpusStore for JsonFileStore {
  fn save(&self, doc: &CorpusDocument) -> Result<()> {
    doc.save(&self.path)
  }
}

#[cfg(test)]
pub(crate) mod tests {
  use super::*;

  pub(crate) const SAMPLE: &str = r#"{
    "title": "03 advanced",
    "contents": [
      {
        "lesson": 26,
        "content": [
          {
            "type": "dialogue",
            "subcategories": [
              {
                "name": "greetings",
                "sentences": [
                  { "sentence": "你好", "pinyin": "ni hao", "korean": "안녕하세요", "audio": "a/1.mp3" },
                  { "sentence": "", "pinyin": "" }
                ]
              }
            ]
          },
          {
            "type": "text",
            "subcategories": [
              { "sentences": [ { "sentence": "我想喝咖啡", "english": "I want to drink coffee." } ] }
            ]
          }
        ]
      }
    ]
  }"#;

  pub(crate) fn sample_doc() -> CorpusDocument {
    CorpusDocument::from_json_str(SAMPLE).expect("sample corpus parses")
  }

  #[test]
  fn flattens_in_nesting_order() {
    let doc = sample_doc();
    assert_eq!(doc.len(), 3);
    let sources: Vec<&str> = doc.sentences().map(|s| s.source()).collect();
    assert_eq!(sources, vec!["你好", "", "我想喝咖啡"]);
    let p = doc.locate(2).unwrap();
    assert_eq!((p.content, p.lesson, p.subcategory, p.sentence), (0, 1, 0, 0));
    assert!(doc.locate(3).is_none());
  }

  #[test]
  fn missing_fields_read_empty_and_stay_absent() {
    let doc = sample_doc();
    let s = doc.at(doc.locate(2).unwrap()).unwrap();
    assert_eq!(s.get("pinyin"), "");
    assert_eq!(s.get("audio"), "");
    let json = doc.to_json_string().unwrap();
    assert!(!json.contains("\"japanese\""));
  }

  #[test]
  fn set_replaces_in_place_and_appends_new_keys() {
    let mut doc = sample_doc();
    let p = doc.locate(0).unwrap();
    let s = doc.at_mut(p).unwrap();
    assert_eq!(s.get("audio"), "a/1.mp3");
    s.set("hanja_note", "안녕".into());
    s.set("pinyin", "nǐ hǎo".into());
    assert_eq!(s.get("hanja_note"), "안녕");
    assert_eq!(s.get("pinyin"), "nǐ hǎo");
    let json = doc.to_json_string().unwrap();
    let pinyin = json.find("\"nǐ hǎo\"").unwrap();
    let korean = json.find("\"korean\"").unwrap();
    let note = json.find("\"hanja_note\"").unwrap();
    assert!(pinyin < korean && json.find("\"audio\"").unwrap() < note);
  }

  const ROUND_TRIP: &str = r#"{
    "title": "t",
    "contents": [
        {
            "lesson": 1,
            "content": [
                {
                    "subcategories": [
                        {
                            "sentences": [
                                {
                                    "id": 1,
                                    "sentence": "你好",
                                    "pinyin": null,
                                    "english": 5,
                                    "audio": "a/1.mp3"
                                }
                            ],
                            "name": "greetings"
                        }
                    ],
                    "type": "dialogue"
                }
            ]
        }
    ],
    "version": 2
}"#;

  #[test]
  fn load_then_save_reproduces_the_file_byte_for_byte() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("lesson.json");
    std::fs::write(&path, ROUND_TRIP).unwrap();
    let doc = CorpusDocument::load(&path).unwrap();
    assert_eq!(doc.to_json_string().unwrap(), ROUND_TRIP);
    JsonFileStore::new(&path).save(&doc).unwrap();
    assert_eq!(std::fs::read_to_string(&path).unwrap(), ROUND_TRIP);
  }

  #[test]
  fn null_and_non_string_values_read_empty_and_survive() {
    let mut doc = CorpusDocument::from_json_str(ROUND_TRIP).unwrap();
    let s = doc.at(doc.locate(0).unwrap()).unwrap();
    assert_eq!(s.get("pinyin"), "");
    assert_eq!(s.get("english"), "");
    assert!(doc.to_json_string().unwrap().contains("\"pinyin\": null"));

    let s = doc.at_mut(doc.locate(0).unwrap()).unwrap();
    s.set("pinyin", "nǐ hǎo".into());
    let json = doc.to_json_string().unwrap();
    let at = |needle: &str| json.find(needle).unwrap();
    assert!(at("\"sentence\"") < at("\"pinyin\": \"nǐ hǎo\"") && at("\"pinyin\"") < at("\"english\""));
    assert!(json.contains("\"english\": 5"));
  }

  #[test]
  fn empty_document_has_no_records() {
    let doc = CorpusDocument::from_json_str(r#"{ "contents": [] }"#).unwrap();
    assert!(doc.is_empty());
    assert_eq!(doc.len(), 0);
    assert!(doc.locate(0).is_none());
    assert!(!sample_doc().is_empty());
  }

  #[test]
  fn built_records_serialize_their_lists() {
    let sub = Subcategory::with_children(vec![Sentence::default().with("sentence", "好").with("pinyin", "hao")]);
    let lesson = LessonContent::with_children(vec![sub]);
    let content = Content::with_children(vec![lesson]);
    let doc = CorpusDocument { root: Node::with_children(vec![content]) };
    let back = CorpusDocument::from_json_str(&doc.to_json_string().unwrap()).unwrap();
    assert_eq!(back, doc);
    assert_eq!(back.len(), 1);
    assert_eq!(back.sentences().next().unwrap().get("pinyin"), "hao");
  }

  #[test]
  fn serializes_non_ascii_literally_with_four_space_indent() {
    let json = sample_doc().to_json_string().unwrap();
    assert!(json.contains("\"sentence\": \"你好\""));
    assert!(!json.contains("\\u"));
    assert!(json.contains("\n    \"contents\""));
  }

  #[test]
  fn save_and_reload_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("lesson.json");
    let doc = sample_doc();
    JsonFileStore::new(&path).save(&doc).unwrap();
    let back = CorpusDocument::load(&path).unwrap();
    assert_eq!(back, doc);
    let a: Vec<&Sentence> = doc.sentences().collect();
    let b: Vec<&Sentence> = back.sentences().collect();
    assert_eq!(a, b);
    // only the target file remains, no temp leftovers
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
  }

  #[test]
  fn save_into_missing_directory_is_a_persistence_failure() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nope").join("lesson.json");
    let err = sample_doc().save(&path).unwrap_err();
    assert!(matches!(err, VerifyError::PersistenceFailure { .. }));
  }

  #[test]
  fn load_reports_bad_json() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.json");
    std::fs::write(&path, "{ not json").unwrap();
    assert!(matches!(CorpusDocument::load(&path), Err(VerifyError::CorpusLoad { .. })));
  }
}
