//! Splitting long extracted text into pieces the summarization service accepts.
//!
//! Lengths are counted in characters (Unicode scalar values), matching how the service meters
//! its per-call input ceiling. Boundaries prefer the last newline inside each window so chunks
//! end on a line; the newline itself opens the next chunk, which keeps the chunks an exact
//! partition of the input.

/// Split `text` into consecutive slices of at most `max_chars` characters.
///
/// - Text within the ceiling comes back as a single chunk; empty text yields no chunks.
/// - Each window of `max_chars` characters is cut at its last newline, provided that newline is
///   not the window's first character; otherwise the window is cut at the ceiling.
/// - `chunks.concat() == text` always holds.
pub fn split_for_summary(text: &str, max_chars: usize) -> Vec<&str> {
    let max_chars = max_chars.max(1);
    let mut chunks = Vec::new();
    let mut rest = text;

    while !rest.is_empty() {
        let Some((limit, _)) = rest.char_indices().nth(max_chars) else {
            chunks.push(rest);
            break;
        };
        let cut = match rest[..limit].rfind('\n') {
            Some(position) if position > 0 => position,
            _ => limit,
        };
        chunks.push(&rest[..cut]);
        rest = &rest[cut..];
    }

    chunks
}

/// Whether `text` must be chunked to fit under `max_chars`.
pub fn needs_chunking(text: &str, max_chars: usize) -> bool {
    text.chars().nth(max_chars).is_some()
}
