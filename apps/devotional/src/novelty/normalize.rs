//! Text Normalizer: the canonical form every comparison runs on.

/// Lowercases, turns every non-word character into a space, collapses
/// whitespace runs and trims. Total: empty input yields an empty string.
pub fn normalize(text: &str) -> String {
    let spaced: String = text
        .to_lowercase()
        .chars()
        .map(|c| if is_word_char(c) { c } else { ' ' })
        .collect();

    spaced.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Normalizes an optional field, mapping blank values to `None`.
pub fn normalize_optional(text: Option<&str>) -> Option<String> {
    text.map(normalize).filter(|s| !s.is_empty())
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}
