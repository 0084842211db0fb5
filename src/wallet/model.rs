//! Wallet data types
//!
//! Field names on the wire follow the backend's JSON (`type`, `payeeVPA`,
//! `transactionNote`); money travels as a JSON number.

use crate::core::format_inr;
use chrono::{Local, TimeZone};
use rand::Rng;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Sent,
    Received,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Sent => "sent",
            Direction::Received => "received",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "sent" => Some(Direction::Sent),
            "received" => Some(Direction::Received),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    #[default]
    Success,
    Failed,
    Pending,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Success => "success",
            TransactionStatus::Failed => "failed",
            TransactionStatus::Pending => "pending",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "success" => Some(TransactionStatus::Success),
            "failed" => Some(TransactionStatus::Failed),
            "pending" => Some(TransactionStatus::Pending),
            _ => None,
        }
    }
}

/// A recorded transaction; immutable once appended
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(rename = "type")]
    pub direction: Direction,
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payee_name: Option<String>,
    #[serde(rename = "payeeVPA", default, skip_serializing_if = "Option::is_none")]
    pub payee_vpa: Option<String>,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
    #[serde(default)]
    pub status: TransactionStatus,
    #[serde(
        rename = "transactionNote",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub note: Option<String>,
}

impl Transaction {
    /// One-line description for history listings
    pub fn summary(&self) -> String {
        let when = Local
            .timestamp_millis_opt(self.timestamp)
            .single()
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "unknown time".to_string());
        let sign = match self.direction {
            Direction::Sent => "-",
            Direction::Received => "+",
        };
        let counterparty = self
            .payee_name
            .as_deref()
            .or(self.payee_vpa.as_deref())
            .unwrap_or("unknown");
        format!(
            "{} {}{} {} [{}] {}",
            when,
            sign,
            format_inr(self.amount),
            counterparty,
            self.status.as_str(),
            self.id
        )
    }

    /// Signed effect on the balance; only successful transactions count
    pub fn balance_effect(&self) -> Decimal {
        if self.status != TransactionStatus::Success {
            return Decimal::ZERO;
        }
        match self.direction {
            Direction::Sent => -self.amount,
            Direction::Received => self.amount,
        }
    }
}

/// Request body for appending a transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTransaction {
    pub id: String,
    pub user_id: String,
    #[serde(rename = "type")]
    pub direction: Direction,
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payee_name: Option<String>,
    #[serde(rename = "payeeVPA", default, skip_serializing_if = "Option::is_none")]
    pub payee_vpa: Option<String>,
    #[serde(
        rename = "transactionNote",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub note: Option<String>,
}

/// Wallet owner as the backend reports it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub balance: Decimal,
    /// Only exposed by demo backends
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passphrase: Option<String>,
}

/// Balance plus history, newest first
#[derive(Debug, Clone, PartialEq, Default)]
pub struct WalletSnapshot {
    pub balance: Decimal,
    pub transactions: Vec<Transaction>,
}

impl WalletSnapshot {
    /// Record a freshly appended transaction in the cached view
    pub fn apply(&mut self, transaction: Transaction) {
        self.balance += transaction.balance_effect();
        self.transactions.insert(0, transaction);
    }

    /// Balance derived from an opening balance and the full history
    pub fn folded_balance(&self, opening: Decimal) -> Decimal {
        self.transactions
            .iter()
            .fold(opening, |acc, tx| acc + tx.balance_effect())
    }
}

/// Client-side transaction id: `TXN` + epoch millis + 9 base-36 chars, upper-case
pub fn generate_transaction_id() -> String {
    const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut rng = rand::thread_rng();
    let suffix: String = (0..9)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect();
    format!("TXN{}{}", chrono::Utc::now().timestamp_millis(), suffix).to_uppercase()
}
