use std::num::NonZeroUsize;

use crate::RetrievalError;

/// Packs the non-blank lines of `body` into chunks of at most `max_chunk_chars`
/// characters, joining lines with a single space.
///
/// A line that alone exceeds the budget is kept whole as its own chunk.
pub fn chunk_document(body: &str, max_chunk_chars: usize) -> Result<Vec<String>, RetrievalError> {
    let budget = NonZeroUsize::new(max_chunk_chars).ok_or_else(|| {
        RetrievalError::InvalidArgument("max_chunk_chars must be greater than zero".to_string())
    })?;

    Ok(pack_lines(body, budget))
}

pub(crate) fn pack_lines(body: &str, budget: NonZeroUsize) -> Vec<String> {
    let budget = budget.get();
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_chars = 0usize;

    for line in body.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let line_chars = trimmed.chars().count();
        if !current.is_empty() && current_chars + 1 + line_chars > budget {
            chunks.push(std::mem::take(&mut current));
            current_chars = 0;
        }

        if !current.is_empty() {
            current.push(' ');
            current_chars += 1;
        }
        current.push_str(trimmed);
        current_chars += line_chars;
    }

    if !current.is_empty() {
        chunks.push(current);
    }

    chunks
}
