//! Passphrase Policies
//!
//! The spoken passphrase is a demo stand-in for a real authentication factor.
//! How forgiving the comparison is depends on the configured policy.

use crate::config::Config;
use crate::utils::fuzzy::{best_word_similarity, contains_either};
use std::collections::HashMap;
use tracing::debug;

/// Decides whether a spoken phrase matches a stored secret
pub trait PassphrasePolicy: Send + Sync {
    fn matches(&self, spoken: &str, secret: &str) -> bool;
}

/// Case-insensitive equality, same rule the backend applies
#[derive(Debug, Clone, Default)]
pub struct ExactMatch;

impl PassphrasePolicy for ExactMatch {
    fn matches(&self, spoken: &str, secret: &str) -> bool {
        let spoken = spoken.trim().to_lowercase();
        !spoken.is_empty() && spoken == secret.trim().to_lowercase()
    }
}

/// Forgiving comparison for noisy recognizers
///
/// Accepts an exact match, a substring in either direction, any configured
/// variant of the secret, or (when `similarity_cutoff > 0`) a spoken word
/// whose edit-distance similarity to the secret reaches the cutoff.
#[derive(Debug, Clone, Default)]
pub struct FuzzyMatch {
    variants: HashMap<String, Vec<String>>,
    similarity_cutoff: f64,
}

impl FuzzyMatch {
    pub fn new(variants: HashMap<String, Vec<String>>, similarity_cutoff: f64) -> Self {
        let variants = variants
            .into_iter()
            .map(|(secret, list)| {
                (
                    secret.trim().to_lowercase(),
                    list.into_iter()
                        .map(|v| v.trim().to_lowercase())
                        .filter(|v| !v.is_empty())
                        .collect(),
                )
            })
            .collect();
        Self {
            variants,
            similarity_cutoff,
        }
    }
}

impl PassphrasePolicy for FuzzyMatch {
    fn matches(&self, spoken: &str, secret: &str) -> bool {
        let spoken = spoken.trim().to_lowercase();
        let target = secret.trim().to_lowercase();
        if spoken.is_empty() || target.is_empty() {
            return false;
        }

        let exact = spoken == target;
        let contains = contains_either(&spoken, &target);
        let variant = self
            .variants
            .get(&target)
            .map(|list| list.iter().any(|v| contains_either(&spoken, v)))
            .unwrap_or(false);
        let similar = self.similarity_cutoff > 0.0
            && best_word_similarity(&spoken, &target) >= self.similarity_cutoff;

        debug!(
            "Passphrase check: exact={} contains={} variant={} similar={}",
            exact, contains, variant, similar
        );

        exact || contains || variant || similar
    }
}

/// Build the policy named in config
pub fn policy_from_config(config: &Config) -> Box<dyn PassphrasePolicy> {
    match config.passphrase_policy.to_lowercase().as_str() {
        "exact" => Box::new(ExactMatch),
        _ => Box::new(FuzzyMatch::new(
            config.passphrase_variants.clone(),
            config.passphrase_similarity,
        )),
    }
}
