//! Text Normalization
//!
//! Prepares transcripts for the controller's keyword tests.

use std::collections::HashMap;

/// Normalizes spoken text to fix common recognition errors
#[derive(Debug, Clone, Default)]
pub struct TextNormalizer {
    /// Manual corrections from config, stored lower-cased
    corrections: Vec<(String, String)>,
}

impl TextNormalizer {
    /// Create a new text normalizer
    pub fn new(corrections: &HashMap<String, String>) -> Self {
        let mut corrections: Vec<(String, String)> = corrections
            .iter()
            .map(|(from, to)| (collapse(&from.to_lowercase()), to.to_lowercase()))
            .filter(|(from, _)| !from.is_empty())
            .collect();
        // Longest first so "u p i" wins over a shorter overlapping entry
        corrections.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(&b.0)));

        Self { corrections }
    }

    /// Lower-case, trim, collapse whitespace, then apply corrections
    pub fn normalize(&self, text: &str) -> String {
        let mut result = collapse(&text.to_lowercase());

        for (from, to) in &self.corrections {
            result = result.replace(from.as_str(), to);
        }

        collapse(&result)
    }
}

fn collapse(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Substring test used by the flow grammar
pub fn mentions(normalized: &str, keyword: &str) -> bool {
    normalized.contains(keyword)
}
