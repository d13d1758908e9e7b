pub const DEFAULT_EXCERPT_MAX_CHARS: usize = 160;

/// Single-line preview of rendered content, used by the HTML report index and
/// the SQLite mirror.
#[must_use]
pub fn derive_excerpt(text: &str, max_chars: usize) -> Option<String> {
    if max_chars == 0 {
        return None;
    }

    let normalized = normalize_whitespace(text);
    if normalized.is_empty() {
        return None;
    }

    let char_count = normalized.chars().count();
    if char_count <= max_chars {
        return Some(normalized);
    }

    let mut excerpt = String::with_capacity(max_chars + 3);
    for ch in normalized.chars().take(max_chars) {
        excerpt.push(ch);
    }
    excerpt.push_str("...");
    Some(excerpt)
}

#[must_use]
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
