/// Strips control characters below the space code point, keeping newline
/// and tab.
pub fn sanitize(text: &str) -> String {
    text.chars()
        .filter(|c| *c >= ' ' || *c == '\n' || *c == '\t')
        .collect()
}

/// Splits `text` into pieces of at most `limit` characters, in order.
/// Empty input yields no pieces.
pub fn chunk_text(text: &str, limit: usize) -> Vec<String> {
    let limit = limit.max(1);
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(limit)
        .map(|piece| piece.iter().collect())
        .collect()
}

/// Truncates to `max_len` characters, marking the cut with an ellipsis.
pub fn clamp(text: &str, max_len: usize) -> String {
    if text.chars().count() <= max_len {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_len.saturating_sub(1)).collect();
    out.push('…');
    out
}
