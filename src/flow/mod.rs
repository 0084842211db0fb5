//! Payment Flow
//!
//! State machine types shared by the controller, the session loop and the
//! recognition sources that feed it.

pub mod controller;
pub mod session;

pub use controller::FlowController;
pub use session::{Session, SessionHandle, SessionParts};

use crate::core::PaymentCode;
use crate::recognition::{RecognitionIssue, TranscriptEvent};
use crate::wallet::Transaction;
use rust_decimal::Decimal;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FlowState {
    #[default]
    Idle,
    ListeningActivate,
    ScanningCode,
    ListeningAmount,
    ConfirmingPayment,
    Authenticating,
    Success,
    History,
}

impl FlowState {
    pub const ALL: [FlowState; 8] = [
        FlowState::Idle,
        FlowState::ListeningActivate,
        FlowState::ScanningCode,
        FlowState::ListeningAmount,
        FlowState::ConfirmingPayment,
        FlowState::Authenticating,
        FlowState::Success,
        FlowState::History,
    ];

    /// States that keep a live recognition subscription
    pub fn needs_listening(&self) -> bool {
        matches!(
            self,
            FlowState::Idle
                | FlowState::ListeningActivate
                | FlowState::ListeningAmount
                | FlowState::Authenticating
        )
    }

    /// Short prompt shown when entering the state
    pub fn prompt(&self) -> &'static str {
        match self {
            FlowState::Idle => "Say \"UPI activate\" or \"scan QR\"",
            FlowState::ListeningActivate => "Listening for \"UPI activate\"",
            FlowState::ScanningCode => "Scan a payment QR code",
            FlowState::ListeningAmount => "Say the amount, or \"cancel\"",
            FlowState::ConfirmingPayment => "Confirm or cancel the payment",
            FlowState::Authenticating => "Say your passphrase",
            FlowState::Success => "Payment complete",
            FlowState::History => "Transaction history",
        }
    }
}

impl fmt::Display for FlowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FlowState::Idle => "idle",
            FlowState::ListeningActivate => "listening-activate",
            FlowState::ScanningCode => "scanning-qr",
            FlowState::ListeningAmount => "listening-amount",
            FlowState::ConfirmingPayment => "confirming-payment",
            FlowState::Authenticating => "authenticating",
            FlowState::Success => "success",
            FlowState::History => "history",
        };
        f.write_str(name)
    }
}

/// Explicit user actions (buttons in a UI, commands in the CLI)
#[derive(Debug, Clone, PartialEq)]
pub enum UserAction {
    Listen,
    ScanManually,
    Confirm,
    Cancel,
    Reset,
    Done,
    ToggleHistory,
    SwitchUser(String),
    Refresh,
    SetBalance(Decimal),
}

/// Everything the controller reacts to, in arrival order
#[derive(Debug, Clone, PartialEq)]
pub enum FlowEvent {
    Transcript(TranscriptEvent),
    /// Decoded payment-code payload
    Scan(String),
    Action(UserAction),
    RecognitionError(RecognitionIssue),
    /// The active source stopped on its own
    ListeningEnded,
    /// Pushed balance for the current user
    BalanceChanged(Decimal),
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub title: String,
    pub message: String,
}

/// What the controller tells the outside world
#[derive(Debug, Clone, PartialEq)]
pub enum FlowOutput {
    StateChanged { from: FlowState, to: FlowState },
    /// Display buffer; interim text included
    Transcript(String),
    Notice(Notice),
    PaymentRecorded(Transaction),
    Balance(Decimal),
}

impl FlowOutput {
    pub fn notice(level: NoticeLevel, title: impl Into<String>, message: impl Into<String>) -> Self {
        FlowOutput::Notice(Notice {
            level,
            title: title.into(),
            message: message.into(),
        })
    }
}

/// Payment being assembled; the amount may arrive by voice
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PaymentIntent {
    pub payee_name: Option<String>,
    pub payee_vpa: Option<String>,
    pub amount: Option<Decimal>,
    pub note: Option<String>,
}

impl PaymentIntent {
    /// Intent for a decoded code; `None` without a payee id
    pub fn from_code(code: PaymentCode) -> Option<Self> {
        let payee_vpa = code.payee_vpa?;
        Some(Self {
            payee_name: code.payee_name,
            payee_vpa: Some(payee_vpa),
            amount: code.amount,
            note: code.note,
        })
    }

    /// Freeze into a payment; needs a payee id and a positive amount
    pub fn confirm(&self) -> Option<ConfirmedPayment> {
        let amount = self.amount.filter(|a| *a > Decimal::ZERO)?;
        Some(ConfirmedPayment {
            payee_vpa: self.payee_vpa.clone()?,
            payee_name: self.payee_name.clone(),
            amount,
            note: self.note.clone(),
        })
    }

    /// Name to show for the payee
    pub fn payee_label(&self) -> &str {
        self.payee_name
            .as_deref()
            .or(self.payee_vpa.as_deref())
            .unwrap_or("unknown payee")
    }
}

/// Frozen payment awaiting authentication; fields are read-only
#[derive(Debug, Clone, PartialEq)]
pub struct ConfirmedPayment {
    payee_vpa: String,
    payee_name: Option<String>,
    amount: Decimal,
    note: Option<String>,
}

impl ConfirmedPayment {
    pub fn payee_vpa(&self) -> &str {
        &self.payee_vpa
    }

    pub fn payee_name(&self) -> Option<&str> {
        self.payee_name.as_deref()
    }

    pub fn amount(&self) -> Decimal {
        self.amount
    }

    pub fn note(&self) -> Option<&str> {
        self.note.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listening_states() {
        let listening: Vec<_> = FlowState::ALL
            .iter()
            .filter(|s| s.needs_listening())
            .collect();
        assert_eq!(
            listening,
            vec![
                &FlowState::Idle,
                &FlowState::ListeningActivate,
                &FlowState::ListeningAmount,
                &FlowState::Authenticating
            ]
        );
    }

    #[test]
    fn test_intent_requires_payee() {
        let code = PaymentCode {
            payee_name: Some("Shop".to_string()),
            ..Default::default()
        };
        assert!(PaymentIntent::from_code(code).is_none());
    }

    #[test]
    fn test_confirm_requires_positive_amount() {
        let mut intent = PaymentIntent {
            payee_vpa: Some("merchant@bank".to_string()),
            ..Default::default()
        };
        assert!(intent.confirm().is_none());

        intent.amount = Some(Decimal::ZERO);
        assert!(intent.confirm().is_none());

        intent.amount = Some(Decimal::from(150));
        let confirmed = intent.confirm().unwrap();
        assert_eq!(confirmed.amount(), Decimal::from(150));
        assert_eq!(confirmed.payee_vpa(), "merchant@bank");
        assert_eq!(intent.payee_label(), "merchant@bank");
    }

    #[test]
    fn test_state_names() {
        assert_eq!(FlowState::ScanningCode.to_string(), "scanning-qr");
        assert_eq!(FlowState::default(), FlowState::Idle);
    }
}
