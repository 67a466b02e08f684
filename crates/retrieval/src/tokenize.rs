use std::collections::HashSet;

/// Lower-cased, whitespace-delimited unique tokens.
pub fn token_set(input: &str) -> HashSet<String> {
    input
        .to_lowercase()
        .split_whitespace()
        .map(str::to_string)
        .collect()
}
