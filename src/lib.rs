//! VoicePay Library
//!
//! Core modules for the VoicePay voice-driven payment flow.

pub mod asr;
pub mod audio;
pub mod audit;
pub mod auth;
pub mod config;
pub mod core;
pub mod error;
pub mod flow;
pub mod recognition;
pub mod utils;
pub mod wallet;

pub use error::{PayError, PayResult};
