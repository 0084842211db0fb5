//! Utility modules

pub mod fuzzy;

pub use fuzzy::{best_word_similarity, contains_either, similarity};
