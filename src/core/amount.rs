//! Spoken Amount Parsing
//!
//! Turns utterances like "500 rupees", "2000 34" or "one lakh fifty thousand"
//! into a rupee amount, and formats amounts the way they are read back.

use lazy_static::lazy_static;
use regex::Regex;
use rust_decimal::Decimal;
use std::str::FromStr;

lazy_static! {
    /// Currency and filler words, matched as whole words only
    static ref FILLER_WORDS: Regex =
        Regex::new(r"\b(?:rupees?|rs\b\.?|and|paisa|paise)\b|₹").expect("valid filler regex");
    static ref GROUPING_COMMA: Regex = Regex::new(r"(\d),(\d)").expect("valid grouping regex");
    static ref DIGIT_RUN: Regex = Regex::new(r"\d+").expect("valid digit regex");
}

/// Parse an amount from free text
///
/// Returns `None` when nothing (or zero) was understood; callers keep listening.
pub fn parse_amount(transcript: &str) -> Option<Decimal> {
    let normalized = transcript.to_lowercase();
    let cleaned = FILLER_WORDS.replace_all(normalized.trim(), " ");

    // "1,50,000" and "2,000" are a single number
    let mut cleaned = cleaned.into_owned();
    while GROUPING_COMMA.is_match(&cleaned) {
        cleaned = GROUPING_COMMA.replace_all(&cleaned, "$1$2").into_owned();
    }

    let runs: Vec<&str> = DIGIT_RUN.find_iter(&cleaned).map(|m| m.as_str()).collect();

    let amount = match runs.as_slice() {
        [] => parse_word_number(&cleaned)?,
        // "2000 34" reads as rupees and paise
        [rupees, paise] => Decimal::from_str(&format!("{}.{}", rupees, paise)).ok()?,
        [first, ..] => Decimal::from_str(first).ok()?,
    };

    if amount > Decimal::ZERO {
        Some(amount.normalize())
    } else {
        None
    }
}

fn word_value(word: &str) -> Option<u64> {
    let value = match word {
        "zero" => 0,
        "one" => 1,
        "two" => 2,
        "three" => 3,
        "four" => 4,
        "five" => 5,
        "six" => 6,
        "seven" => 7,
        "eight" => 8,
        "nine" => 9,
        "ten" => 10,
        "eleven" => 11,
        "twelve" => 12,
        "thirteen" => 13,
        "fourteen" => 14,
        "fifteen" => 15,
        "sixteen" => 16,
        "seventeen" => 17,
        "eighteen" => 18,
        "nineteen" => 19,
        "twenty" => 20,
        "thirty" => 30,
        "forty" => 40,
        "fifty" => 50,
        "sixty" => 60,
        "seventy" => 70,
        "eighty" => 80,
        "ninety" => 90,
        "hundred" => 100,
        "thousand" => 1_000,
        "lakh" | "lakhs" => 100_000,
        "crore" | "crores" => 10_000_000,
        _ => return None,
    };
    Some(value)
}

/// Spelled-out numbers on the Indian scale
///
/// `thousand`, `lakh` and `crore` close a group and flush it into the total;
/// `hundred` only multiplies the group in progress.
fn parse_word_number(text: &str) -> Option<Decimal> {
    let mut total: u64 = 0;
    let mut current: u64 = 0;

    for word in text.split(|c: char| c.is_whitespace() || c == '-') {
        let Some(num) = word_value(word) else {
            continue;
        };

        if num >= 100 {
            current = if current == 0 {
                num
            } else {
                current.saturating_mul(num)
            };
            if num >= 1_000 {
                total = total.saturating_add(current);
                current = 0;
            }
        } else {
            current = current.saturating_add(num);
        }
    }

    total = total.saturating_add(current);
    if total > 0 {
        Some(Decimal::from(total))
    } else {
        None
    }
}

/// Format an amount as Indian rupees, e.g. `₹1,50,000.00`
pub fn format_inr(amount: Decimal) -> String {
    let rounded = amount.round_dp(2);
    let negative = rounded.is_sign_negative() && !rounded.is_zero();
    let text = format!("{:.2}", rounded.abs());
    let (whole, fraction) = text.split_once('.').unwrap_or((text.as_str(), "00"));

    // Last three digits, then groups of two
    let grouped = if whole.len() <= 3 {
        whole.to_string()
    } else {
        let (head, tail) = whole.split_at(whole.len() - 3);
        let mut groups: Vec<&str> = Vec::new();
        let mut end = head.len();
        while end > 2 {
            groups.push(&head[end - 2..end]);
            end -= 2;
        }
        groups.push(&head[..end]);
        groups.reverse();
        format!("{},{}", groups.join(","), tail)
    };

    format!("{}₹{}.{}", if negative { "-" } else { "" }, grouped, fraction)
}
