//! Dictionary reading of a Chinese sentence, shown next to the stored pinyin in
//! the interactive view so a reviewer can spot disagreements before asking the
//! oracle.
//!
//! Per-character lookup without word segmentation: polyphonic characters get
//! their most common reading, so this is a hint and never written back.
use pinyin::ToPinyin;

/// Hanyu Pinyin with tone marks, one space between consecutive syllables.
/// Non-Chinese characters are copied as-is.
pub fn reference_reading(text: &str) -> String {
    let mut out = String::with_capacity(text.len() * 2);
    let mut last_was_hanzi = false;

    for ch in text.chars() {
        match ch.to_pinyin() {
            Some(py) => {
                if last_was_hanzi {
                    out.push(' ');
                }
                out.push_str(py.with_tone());
                last_was_hanzi = true;
            }
            None => {
                out.push(ch);
                last_was_hanzi = false;
            }
        }
    }
    out
}

/// Compare a stored pinyin value against the dictionary reading, ignoring case,
/// apostrophes and spacing.
pub fn agrees_with_reference(stored: &str, sentence: &str) -> bool {
    let squash = |s: &str| -> String {
        s.chars()
            .filter(|c| !c.is_whitespace() && *c != '\'' && !c.is_ascii_punctuation())
            .flat_map(char::to_lowercase)
            .collect()
    };
    let reference: String = sentence.chars().filter_map(|c| c.to_pinyin()).map(|p| p.with_tone()).collect();
    !reference.is_empty() && squash(stored) == squash(&reference)
}
