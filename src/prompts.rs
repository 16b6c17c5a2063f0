//! Verification prompt templates, one per field.
//!
//! Every template names the Chinese sentence as ground truth, shows the current
//! value of the field under verification (except for the sentence itself) and
//! asks the oracle to reply with the corrected value only.
//!
//! Placeholders:
//!   {chinese_sentence}            the record's Chinese sentence
//!   {current_<field key>}         current value of any fixed field, e.g. {current_pinyin}
//!   {current_value}               current value of the field being verified

use std::collections::BTreeMap;

use crate::corpus::Sentence;
use crate::domain::{Field, FieldKind};
use crate::error::{Result, VerifyError};
use crate::util::{fill_template, template_placeholders};

const PREVIEW_CHARS: usize = 80;

pub fn default_template(kind: FieldKind) -> &'static str {
  match kind {
    FieldKind::Sentence => "Chinese: {chinese_sentence} / Task: Verify if the Chinese sentence is correct. Reply with ONLY the correct Chinese sentence, nothing else.",
    FieldKind::Pinyin => "Chinese: {chinese_sentence} / Current pinyin: {current_pinyin} / Task: Verify if pinyin is correct. Reply with ONLY the correct pinyin, nothing else.",
    FieldKind::Korean => "Chinese: {chinese_sentence} / Current Korean: {current_korean} / Task: Verify if the Korean translation is correct. Reply with ONLY the correct Korean translation, nothing else.",
    FieldKind::English => "Chinese: {chinese_sentence} / Current English: {current_english} / Task: Verify if the English translation is correct. Reply with ONLY the correct English translation, nothing else.",
    FieldKind::Japanese => "Chinese: {chinese_sentence} / Current Japanese: {current_japanese} / Task: Verify if the Japanese translation is correct. Reply with ONLY the correct Japanese translation, nothing else.",
    FieldKind::JapaneseRomaji => "Chinese: {chinese_sentence} / Current Japanese Romaji/Description: {current_japanese_romaji} / Task: Verify if the Japanese romaji or description is correct. Reply with ONLY the correct Japanese romaji or description, nothing else.",
    FieldKind::Translation => "Chinese: {chinese_sentence} / Current Translation: {current_translation} / Task: Verify if the translation is correct. Reply with ONLY the correct translation, nothing else.",
  }
}

fn is_known_placeholder(name: &str) -> bool {
  match name {
    "chinese_sentence" | "current_value" => true,
    other => other
      .strip_prefix("current_")
      .map_or(false, |key| FieldKind::from_key(key).is_some()),
  }
}

/// Reject empty templates and templates that reference unknown placeholders.
pub fn check_template(template: &str) -> Result<()> {
  if template.trim().is_empty() {
    return Err(VerifyError::Template("template is empty".into()));
  }
  let unknown: Vec<&str> = template_placeholders(template)
    .into_iter()
    .filter(|p| !is_known_placeholder(p))
    .collect();
  if !unknown.is_empty() {
    return Err(VerifyError::Template(format!("unknown placeholder(s): {{{}}}", unknown.join("}, {"))));
  }
  Ok(())
}

/// Template set keyed by record key. Always holds the seven fixed fields; custom
/// keys appear when configured.
#[derive(Clone, Debug)]
pub struct PromptTemplates {
  templates: BTreeMap<String, String>,
}

impl Default for PromptTemplates {
  fn default() -> Self {
    let templates = FieldKind::ALL
      .into_iter()
      .map(|k| (k.key().to_string(), default_template(k).to_string()))
      .collect();
    Self { templates }
  }
}

impl PromptTemplates {
  /// Defaults overlaid with configured templates. Invalid overrides are errors.
  pub fn with_overrides<'a>(overrides: impl IntoIterator<Item = (&'a String, &'a String)>) -> Result<Self> {
    let mut set = Self::default();
    for (key, tpl) in overrides {
      let field = Field::parse(key)?;
      set.set(&field, tpl.clone())?;
    }
    Ok(set)
  }

  pub fn get(&self, field: &Field) -> Option<&str> {
    self.templates.get(field.key()).map(String::as_str)
  }

  pub fn set(&mut self, field: &Field, template: String) -> Result<()> {
    let template = template.trim().to_string();
    check_template(&template)?;
    self.templates.insert(field.key().to_string(), template);
    Ok(())
  }

  /// Restore the built-in template for a fixed field; custom fields are removed.
  pub fn reset(&mut self, field: &Field) {
    match field {
      Field::Known(kind) => {
        self.templates.insert(kind.key().to_string(), default_template(*kind).to_string());
      }
      Field::Custom(key) => {
        self.templates.remove(key);
      }
    }
  }

  /// Fields that can be verified, fixed kinds first.
  pub fn fields(&self) -> Vec<Field> {
    let mut out: Vec<Field> = FieldKind::ALL.into_iter().map(Field::Known).collect();
    out.extend(
      self.templates.keys()
        .filter(|k| FieldKind::from_key(k).is_none())
        .map(|k| Field::Custom(k.clone())),
    );
    out
  }

  pub fn preview(&self, field: &Field) -> String {
    let tpl = self.get(field).unwrap_or("");
    if tpl.chars().count() > PREVIEW_CHARS {
      format!("{}...", tpl.chars().take(PREVIEW_CHARS).collect::<String>())
    } else {
      tpl.to_string()
    }
  }

  /// Render the verification prompt for `field` from the record's current values.
  /// Pure; the caller is responsible for skipping records without a sentence.
  pub fn build_prompt(&self, field: &Field, record: &Sentence) -> Result<String> {
    let tpl = self.get(field).ok_or_else(|| VerifyError::UnknownField(field.key().to_string()))?;

    let current_keys: Vec<String> = FieldKind::ALL.iter().map(|k| format!("current_{}", k.key())).collect();
    let mut pairs: Vec<(&str, &str)> = Vec::with_capacity(current_keys.len() + 2);
    pairs.push(("chinese_sentence", record.source()));
    pairs.push(("current_value", record.get(field.key())));
    for (name, kind) in current_keys.iter().zip(FieldKind::ALL) {
      pairs.push((name.as_str(), record.get(kind.key())));
    }
    Ok(fill_template(tpl, &pairs))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn record() -> Sentence {
    Sentence::default().with("sentence", "你好").with("pinyin", "ni hao").with("english", "Hello")
  }

  #[test]
  fn pinyin_prompt_states_sentence_and_current_value() {
    let p = PromptTemplates::default().build_prompt(&FieldKind::Pinyin.into(), &record()).unwrap();
    assert_eq!(
      p,
      "Chinese: 你好 / Current pinyin: ni hao / Task: Verify if pinyin is correct. Reply with ONLY the correct pinyin, nothing else."
    );
  }

  #[test]
  fn sentence_prompt_has_no_current_baseline() {
    let p = PromptTemplates::default().build_prompt(&FieldKind::Sentence.into(), &record()).unwrap();
    assert!(p.starts_with("Chinese: 你好 / Task:"));
    assert!(!p.contains("Current"));
  }

  #[test]
  fn missing_fields_render_empty() {
    let p = PromptTemplates::default().build_prompt(&FieldKind::Korean.into(), &record()).unwrap();
    assert!(p.contains("Current Korean:  / Task"));
  }

  #[test]
  fn every_default_template_is_valid_and_ends_with_only_instruction() {
    for kind in FieldKind::ALL {
      let tpl = default_template(kind);
      check_template(tpl).unwrap();
      assert!(tpl.contains("{chinese_sentence}"));
      assert!(tpl.ends_with("nothing else."));
    }
  }

  #[test]
  fn edited_templates_are_checked() {
    let mut set = PromptTemplates::default();
    let pinyin: Field = FieldKind::Pinyin.into();
    assert!(matches!(set.set(&pinyin, "   ".into()), Err(VerifyError::Template(_))));
    assert!(matches!(set.set(&pinyin, "{chinese_sentence} {current_pinyn}".into()), Err(VerifyError::Template(_))));
    set.set(&pinyin, "Sentence {chinese_sentence}; pinyin {current_value}".into()).unwrap();
    assert_eq!(set.build_prompt(&pinyin, &record()).unwrap(), "Sentence 你好; pinyin ni hao");
    set.reset(&pinyin);
    assert_eq!(set.get(&pinyin), Some(default_template(FieldKind::Pinyin)));
  }

  #[test]
  fn custom_fields_use_current_value() {
    let mut rec = record();
    rec.set("hanja", "你好".into());
    let overrides = BTreeMap::from([("hanja".to_string(), "Chinese: {chinese_sentence} / Hanja: {current_value}".to_string())]);
    let set = PromptTemplates::with_overrides(&overrides).unwrap();
    let field = Field::parse("hanja").unwrap();
    assert_eq!(set.build_prompt(&field, &rec).unwrap(), "Chinese: 你好 / Hanja: 你好");
    assert_eq!(set.fields().len(), 8);
    assert!(set.build_prompt(&Field::parse("other").unwrap(), &rec).is_err());
  }

  #[test]
  fn preview_is_truncated() {
    let set = PromptTemplates::default();
    let pv = set.preview(&FieldKind::JapaneseRomaji.into());
    assert!(pv.ends_with("..."));
    assert_eq!(pv.chars().count(), PREVIEW_CHARS + 3);
  }
}
