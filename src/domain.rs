//! Domain models: which annotation field is being verified, how it is validated,
//! and the outcome of a verification.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::VerifyError;

/// One of the fixed annotation fields of a sentence record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
  /// The Chinese sentence itself (ground truth for every other field).
  Sentence,
  Pinyin,
  Korean,
  English,
  Japanese,
  JapaneseRomaji,
  Translation,
}

impl FieldKind {
  pub const ALL: [FieldKind; 7] = [
    FieldKind::Sentence,
    FieldKind::Pinyin,
    FieldKind::Korean,
    FieldKind::English,
    FieldKind::Japanese,
    FieldKind::JapaneseRomaji,
    FieldKind::Translation,
  ];

  /// JSON key of the field inside a sentence record.
  pub fn key(self) -> &'static str {
    match self {
      FieldKind::Sentence => "sentence",
      FieldKind::Pinyin => "pinyin",
      FieldKind::Korean => "korean",
      FieldKind::English => "english",
      FieldKind::Japanese => "japanese",
      FieldKind::JapaneseRomaji => "japanese_romaji",
      FieldKind::Translation => "translation",
    }
  }

  pub fn display_name(self) -> &'static str {
    match self {
      FieldKind::Sentence => "Chinese Sentence (sentence)",
      FieldKind::Pinyin => "Pinyin (pinyin)",
      FieldKind::Korean => "Korean Translation (korean)",
      FieldKind::English => "English Translation (english)",
      FieldKind::Japanese => "Japanese Translation (japanese)",
      FieldKind::JapaneseRomaji => "Japanese Romaji/Description (japanese_romaji)",
      FieldKind::Translation => "Translation",
    }
  }

  pub fn category(self) -> ValidatorCategory {
    match self {
      FieldKind::Sentence => ValidatorCategory::SourceScript,
      FieldKind::Pinyin => ValidatorCategory::PhoneticScript,
      FieldKind::Korean
      | FieldKind::English
      | FieldKind::Japanese
      | FieldKind::JapaneseRomaji
      | FieldKind::Translation => ValidatorCategory::FreeText,
    }
  }

  pub fn from_key(key: &str) -> Option<FieldKind> {
    FieldKind::ALL.into_iter().find(|k| k.key() == key)
  }
}

/// How a candidate value is accepted or rejected.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidatorCategory {
  /// Must contain Han characters.
  SourceScript,
  /// Latin letters with tone-marked vowels (pinyin).
  PhoneticScript,
  /// Any translation text that does not read like commentary.
  FreeText,
  /// Fallback for custom fields declared in configuration.
  Generic,
}

/// The field under verification: one of the fixed kinds, or a custom record key
/// for which a prompt template was configured.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Field {
  Known(FieldKind),
  Custom(String),
}

impl Field {
  pub fn parse(key: &str) -> Result<Field, VerifyError> {
    let key = key.trim();
    if key.is_empty() {
      return Err(VerifyError::UnknownField(key.to_string()));
    }
    Ok(match FieldKind::from_key(key) {
      Some(kind) => Field::Known(kind),
      None => Field::Custom(key.to_string()),
    })
  }

  pub fn key(&self) -> &str {
    match self {
      Field::Known(kind) => kind.key(),
      Field::Custom(key) => key,
    }
  }

  pub fn display_name(&self) -> String {
    match self {
      Field::Known(kind) => kind.display_name().to_string(),
      Field::Custom(key) => key.clone(),
    }
  }

  pub fn category(&self) -> ValidatorCategory {
    match self {
      Field::Known(kind) => kind.category(),
      Field::Custom(_) => ValidatorCategory::Generic,
    }
  }

  /// True for the Chinese sentence itself, which has no separate baseline.
  pub fn is_source(&self) -> bool {
    matches!(self, Field::Known(FieldKind::Sentence))
  }
}

impl From<FieldKind> for Field {
  fn from(kind: FieldKind) -> Self { Field::Known(kind) }
}

impl fmt::Display for Field {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.key())
  }
}

/// Result of normalizing + validating one oracle reply. Never persisted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
  Accepted(String),
  Rejected,
}

impl Outcome {
  pub fn accepted(&self) -> Option<&str> {
    match self {
      Outcome::Accepted(candidate) => Some(candidate),
      Outcome::Rejected => None,
    }
  }
}
