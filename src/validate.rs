//! Per-field acceptance rules for normalized candidates.
//!
//! All checks are pure predicates over the candidate string. Lengths count
//! characters, not bytes. An empty candidate is rejected by every category.

use std::sync::LazyLock;

use regex::Regex;

use crate::domain::{Outcome, ValidatorCategory};
use crate::util::is_cjk;

/// Hedging and meta-commentary words. A candidate containing any of them (as a
/// lowercase substring) reads like an explanation rather than a field value.
pub const DEFAULT_DENYLIST: &[&str] = &[
  "verify", "check", "please", "respond", "however", "happy", "help", "want", "could",
  "would", "should", "provide", "message", "sorry", "cannot", "matches", "answer",
  "correct", "chinese", "sentence",
];

// Latin letters, the tone-marked vowels used by Hanyu Pinyin, whitespace and apostrophes.
static PINYIN_CHARS: LazyLock<Regex> = LazyLock::new(|| {
  Regex::new(r"^[a-zA-Zāáǎàēéěèīíǐìōóǒòūúǔùǖǘǚǜ\s']+$").expect("pinyin regex")
});

#[derive(Clone, Debug)]
pub struct Validator {
  denylist: Vec<String>,
  /// Pinyin must contain a space (multi-syllable). Off for the all-fields tools.
  strict_pinyin: bool,
}

impl Default for Validator {
  fn default() -> Self {
    Self {
      denylist: DEFAULT_DENYLIST.iter().map(|w| w.to_string()).collect(),
      strict_pinyin: false,
    }
  }
}

impl Validator {
  pub fn new(denylist: Option<Vec<String>>, strict_pinyin: bool) -> Self {
    let denylist = match denylist {
      Some(words) => words.into_iter().map(|w| w.trim().to_lowercase()).filter(|w| !w.is_empty()).collect(),
      None => Self::default().denylist,
    };
    Self { denylist, strict_pinyin }
  }

  pub fn denylist(&self) -> &[String] { &self.denylist }

  pub fn strict_pinyin(&self) -> bool { self.strict_pinyin }

  /// First denylisted word found in the candidate, if any.
  pub fn meta_word<'a>(&'a self, candidate: &str) -> Option<&'a str> {
    let lower = candidate.to_lowercase();
    self.denylist.iter().find(|w| lower.contains(w.as_str())).map(String::as_str)
  }

  pub fn validate(&self, candidate: &str, category: ValidatorCategory) -> Outcome {
    let ok = match category {
      ValidatorCategory::PhoneticScript => self.is_pinyin(candidate),
      ValidatorCategory::SourceScript => is_source_script(candidate),
      ValidatorCategory::FreeText | ValidatorCategory::Generic => {
        candidate.chars().count() >= 2 && self.meta_word(candidate).is_none()
      }
    };
    if ok { Outcome::Accepted(candidate.to_string()) } else { Outcome::Rejected }
  }

  fn is_pinyin(&self, candidate: &str) -> bool {
    PINYIN_CHARS.is_match(candidate)
      && candidate.chars().count() >= 3
      && (!self.strict_pinyin || candidate.contains(' '))
      && self.meta_word(candidate).is_none()
  }
}

/// At least one Han character. No denylist: script presence is signal enough.
fn is_source_script(candidate: &str) -> bool {
  candidate.chars().any(is_cjk)
}
