//! Core parsing modules
//!
//! Pure, synchronous building blocks the flow controller leans on: spoken
//! amounts, payment codes and transcript normalization.

pub mod amount;
pub mod payment_code;
pub mod text_normalizer;

pub use amount::{format_inr, parse_amount};
pub use payment_code::{PaymentCode, PaymentCodeParser};
pub use text_normalizer::TextNormalizer;
