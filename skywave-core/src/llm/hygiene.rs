//! Response hygiene: what the model said versus what goes on air.
//!
//! Chat models pad answers with sign-offs and meta-chatter that waste
//! channel time. Everything spoken passes through [`clean_response`] and
//! then [`ensure_over`], which guarantees the radio convention: the
//! transmission ends with the word "over" and exactly one trailing period.

/// Stock patterns removed wherever they appear.
const STOCK_PATTERNS: &[&str] = &[
    "[end conversation]",
    "[End conversation]",
    "Remember,",
    "As an AI language model,",
    "As an AI,",
];

/// Maximum words kept after cleaning.
const MAX_WORDS: usize = 100;

/// Strip stock patterns, collapse whitespace, cap the length.
pub fn clean_response(raw: &str) -> String {
    let mut text = raw.to_string();
    for pattern in STOCK_PATTERNS {
        text = text.replace(pattern, " ");
    }

    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() > MAX_WORDS {
        words[..MAX_WORDS].join(" ")
    } else {
        words.join(" ")
    }
}

/// Guarantee the text ends with `over.` — exactly one period, appended
/// with a comma when the model did not say it itself.
pub fn ensure_over(text: &str) -> String {
    let trimmed = text.trim().trim_end_matches(['.', '!', '?', ',', ';', ':']);
    let trimmed = trimmed.trim_end();
    if trimmed.is_empty() {
        return "Over.".into();
    }

    // Did the cleaned text already end with the word "over"?
    let last_word = trimmed
        .rsplit(|c: char| c.is_whitespace() || c == ',')
        .next()
        .unwrap_or("");
    if last_word.eq_ignore_ascii_case("over") {
        return format!("{trimmed}.");
    }
    format!("{trimmed}, over.")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_over_to_plain_answer() {
        assert_eq!(ensure_over("All nominal"), "All nominal, over.");
    }

    #[test]
    fn normalizes_existing_over_to_single_period() {
        assert_eq!(ensure_over("Winds calm, over"), "Winds calm, over.");
        assert_eq!(ensure_over("Winds calm, over."), "Winds calm, over.");
        assert_eq!(ensure_over("Winds calm, OVER!!"), "Winds calm, OVER.");
        assert_eq!(ensure_over("Roger. Over."), "Roger. Over.");
    }

    #[test]
    fn strips_trailing_punctuation_before_appending() {
        assert_eq!(ensure_over("Copy that."), "Copy that, over.");
        assert_eq!(ensure_over("Copy that?!"), "Copy that, over.");
    }

    #[test]
    fn empty_input_becomes_bare_over() {
        assert_eq!(ensure_over(""), "Over.");
        assert_eq!(ensure_over("  ...  "), "Over.");
    }

    #[test]
    fn clean_removes_stock_patterns_and_collapses_whitespace() {
        let cleaned = clean_response("Roger.  [end conversation]   Remember, stay safe.");
        assert_eq!(cleaned, "Roger. stay safe.");
    }

    #[test]
    fn clean_caps_at_one_hundred_words() {
        let long = "word ".repeat(250);
        let cleaned = clean_response(&long);
        assert_eq!(cleaned.split_whitespace().count(), 100);
    }

    #[test]
    fn cleaned_then_ensured_satisfies_the_radio_convention() {
        for raw in ["short answer", "ends with over", "Trailing dots...", ""] {
            let spoken = ensure_over(&clean_response(raw));
            let lower = spoken.to_ascii_lowercase();
            assert!(lower.ends_with("over."), "bad spoken form: {spoken:?}");
            assert!(!lower.ends_with("over.."));
        }
    }
}
