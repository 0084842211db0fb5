//! Payment Code Parsing
//!
//! Decodes UPI-style payment URIs of the form
//! `upi://pay?pa=<vpa>&pn=<name>&am=<amount>&tn=<note>&mc=<merchant>&tr=<ref>`.

use rust_decimal::Decimal;
use std::str::FromStr;
use tracing::debug;

/// Everything a payment code can carry
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PaymentCode {
    pub payee_vpa: Option<String>,
    pub payee_name: Option<String>,
    pub amount: Option<Decimal>,
    pub note: Option<String>,
    pub merchant_code: Option<String>,
    pub transaction_ref: Option<String>,
}

/// Parser bound to one URI scheme
#[derive(Debug, Clone)]
pub struct PaymentCodeParser {
    scheme: String,
}

impl Default for PaymentCodeParser {
    fn default() -> Self {
        Self::new("upi")
    }
}

impl PaymentCodeParser {
    pub fn new(scheme: &str) -> Self {
        Self {
            scheme: scheme.trim().trim_end_matches("://").to_lowercase(),
        }
    }

    /// Parse a scanned payload
    ///
    /// Only a wrong scheme/authority is a rejection; bad fields come back as `None`.
    pub fn parse(&self, data: &str) -> Option<PaymentCode> {
        let data = data.trim();
        let rest = self.strip_prefix(data)?;

        let query = match rest.chars().next() {
            None => "",
            Some('?') => &rest[1..],
            Some('/') => rest.split_once('?').map(|(_, q)| q).unwrap_or(""),
            Some(_) => {
                debug!("Rejecting payment code with unexpected authority: {}", data);
                return None;
            }
        };
        // Fragments are not part of the payload
        let query = query.split('#').next().unwrap_or("");

        let mut code = PaymentCode::default();
        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (key, raw_value) = pair.split_once('=').unwrap_or((pair, ""));
            let Some(value) = decode_component(raw_value) else {
                continue;
            };

            match key {
                "pa" => code.payee_vpa = Some(value),
                "pn" => code.payee_name = Some(value),
                "am" => code.amount = parse_code_amount(&value),
                "tn" => code.note = Some(value),
                "mc" => code.merchant_code = Some(value),
                "tr" => code.transaction_ref = Some(value),
                _ => debug!("Ignoring payment code field '{}'", key),
            }
        }

        Some(code)
    }

    /// Returns whatever follows `<scheme>://pay`
    fn strip_prefix<'a>(&self, data: &'a str) -> Option<&'a str> {
        let (scheme, rest) = data.split_once("://")?;
        if !scheme.eq_ignore_ascii_case(&self.scheme) {
            return None;
        }
        let authority = rest.get(..3)?;
        if !authority.eq_ignore_ascii_case("pay") {
            return None;
        }
        Some(&rest[3..])
    }
}

/// Decode one query value; empty values count as absent
fn decode_component(raw: &str) -> Option<String> {
    let spaced = raw.replace('+', " ");
    let decoded = match urlencoding::decode(&spaced) {
        Ok(value) => value.into_owned(),
        Err(_) => spaced.clone(),
    };
    let trimmed = decoded.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn parse_code_amount(value: &str) -> Option<Decimal> {
    match Decimal::from_str(value) {
        Ok(amount) if amount > Decimal::ZERO => Some(amount),
        Ok(_) => None,
        Err(e) => {
            debug!("Unreadable amount '{}' in payment code: {}", value, e);
            None
        }
    }
}
