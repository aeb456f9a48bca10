//! Character-bounded text helpers for persisted previews.

/// Return the prefix of `text` holding at most `max_chars` characters.
///
/// Counts Unicode scalar values, never splitting a character.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
