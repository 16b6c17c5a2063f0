//! Oracle reply normalization: isolate the candidate answer line from a free-text
//! reply that may restate a label, use markdown emphasis, or add an explanation.
//!
//! Only the first non-blank line is trusted; trailing rationale is discarded.

use std::sync::LazyLock;

use regex::Regex;

/// Which lead-in labels may be stripped from the start of a reply.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LabelSet {
  /// `Your answer`, `Answer`, `Response`.
  Basic,
  /// Basic plus the field names `Pinyin`, `Korean`, `English`, `Japanese`, `Chinese`.
  FieldAware,
}

// The label must be followed by a colon or whitespace (or end the reply), so
// "Answering..." or "Englishman" are left alone.
static BASIC_LABEL: LazyLock<Regex> = LazyLock::new(|| {
  Regex::new(r"(?i)^(?:your answer|answer|response)(?:[:：\s]+|$)").expect("basic label regex")
});
static FIELD_AWARE_LABEL: LazyLock<Regex> = LazyLock::new(|| {
  Regex::new(r"(?i)^(?:your answer|pinyin|answer|response|korean|english|japanese|chinese)(?:[:：\s]+|$)")
    .expect("field-aware label regex")
});

impl LabelSet {
  fn pattern(self) -> &'static Regex {
    match self {
      LabelSet::Basic => &*BASIC_LABEL,
      LabelSet::FieldAware => &*FIELD_AWARE_LABEL,
    }
  }
}

/// Strip one leading label, keep the first non-blank line, drop `**` and
/// backticks. Returns `""` when nothing usable remains.
pub fn normalize(raw: &str, labels: LabelSet) -> String {
  let text = raw.trim();
  let text = labels.pattern().replace(text, "");

  let first_line = match text.lines().map(str::trim).find(|l| !l.is_empty()) {
    Some(line) => line,
    None => return String::new(),
  };

  first_line.replace("**", "").replace('`', "").trim().to_string()
}
