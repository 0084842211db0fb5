//! Fuzzy matching utilities for spoken phrases
//!
//! Speech engines mangle short words; these helpers give "close enough"
//! comparisons for passphrases and command words.

use strsim::normalized_levenshtein;

/// Calculate similarity score between two strings
pub fn similarity(a: &str, b: &str) -> f64 {
    normalized_levenshtein(&a.to_lowercase(), &b.to_lowercase())
}

/// True when either string contains the other; empty strings never match
pub fn contains_either(a: &str, b: &str) -> bool {
    if a.is_empty() || b.is_empty() {
        return false;
    }
    a.contains(b) || b.contains(a)
}

/// Best similarity between `target` and any single word of `spoken`
pub fn best_word_similarity(spoken: &str, target: &str) -> f64 {
    spoken
        .split_whitespace()
        .map(|word| similarity(word, target))
        .fold(0.0, f64::max)
}
