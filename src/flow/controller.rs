//! Flow Controller
//!
//! Drives the payment flow from one event at a time. The controller owns the
//! flow state, the payment being assembled and the recognition source; every
//! transition and its side effects finish before the next event is looked at.
//!
//! After each event the source is reconciled with the state: started once if
//! the state listens and the source does not, stopped in the opposite case.
//! Self-transitions therefore never restart a live subscription.

use super::{
    ConfirmedPayment, FlowEvent, FlowOutput, FlowState, NoticeLevel, PaymentIntent, UserAction,
};
use crate::audit::AuditLog;
use crate::auth::{policy_from_config, FuzzyMatch, PassphrasePolicy};
use crate::config::Config;
use crate::core::text_normalizer::mentions;
use crate::core::{format_inr, parse_amount, PaymentCodeParser, TextNormalizer};
use crate::error::PayError;
use crate::recognition::{RecognitionIssue, RecognitionSink, RecognitionSource, TranscriptEvent};
use crate::wallet::{Direction, Transfer, WalletStore};
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

pub struct FlowController {
    state: FlowState,
    source: Box<dyn RecognitionSource>,
    sink: RecognitionSink,
    wallet: Arc<WalletStore>,
    outputs: UnboundedSender<FlowOutput>,

    policy: Box<dyn PassphrasePolicy>,
    normalizer: TextNormalizer,
    codes: PaymentCodeParser,
    audit: Option<AuditLog>,
    min_confidence: f32,

    intent: Option<PaymentIntent>,
    confirmed: Option<ConfirmedPayment>,
    transcript: String,
    /// Event ids are monotonic; anything at or below this was already acted on
    last_consumed: u64,
    reported_sources: HashSet<String>,
    append_in_flight: bool,
}

impl FlowController {
    pub fn new(
        source: Box<dyn RecognitionSource>,
        sink: RecognitionSink,
        wallet: Arc<WalletStore>,
        outputs: UnboundedSender<FlowOutput>,
    ) -> Self {
        Self {
            state: FlowState::Idle,
            source,
            sink,
            wallet,
            outputs,
            policy: Box::new(FuzzyMatch::new(HashMap::new(), 0.0)),
            normalizer: TextNormalizer::default(),
            codes: PaymentCodeParser::default(),
            audit: None,
            min_confidence: 0.0,
            intent: None,
            confirmed: None,
            transcript: String::new(),
            last_consumed: 0,
            reported_sources: HashSet::new(),
            append_in_flight: false,
        }
    }

    /// Apply passphrase policy, corrections, code scheme and confidence floor from config
    pub fn configure(self, config: &Config) -> Self {
        let controller = self
            .with_policy(policy_from_config(config))
            .with_normalizer(TextNormalizer::new(&config.voice_corrections))
            .with_code_parser(PaymentCodeParser::new(&config.payment_scheme))
            .with_min_confidence(config.min_confidence);
        if config.audit_log {
            controller.with_audit(AuditLog::default_location())
        } else {
            controller
        }
    }

    pub fn with_policy(mut self, policy: Box<dyn PassphrasePolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_normalizer(mut self, normalizer: TextNormalizer) -> Self {
        self.normalizer = normalizer;
        self
    }

    pub fn with_code_parser(mut self, codes: PaymentCodeParser) -> Self {
        self.codes = codes;
        self
    }

    pub fn with_audit(mut self, audit: AuditLog) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn with_min_confidence(mut self, min_confidence: f32) -> Self {
        self.min_confidence = min_confidence;
        self
    }

    pub fn state(&self) -> FlowState {
        self.state
    }

    pub fn intent(&self) -> Option<&PaymentIntent> {
        self.intent.as_ref()
    }

    pub fn confirmed(&self) -> Option<&ConfirmedPayment> {
        self.confirmed.as_ref()
    }

    pub fn transcript(&self) -> &str {
        &self.transcript
    }

    pub fn is_listening(&self) -> bool {
        self.source.is_listening()
    }

    pub fn source_name(&self) -> &str {
        self.source.name()
    }

    /// Load the session user and arm listening for `Idle`
    pub async fn start(&mut self, user: &str) {
        match self.wallet.switch_user(user).await {
            Ok(user) => {
                self.emit(FlowOutput::Balance(user.balance));
                self.notify(
                    NoticeLevel::Info,
                    "Welcome",
                    format!("Logged in as {} ({})", user.name, format_inr(user.balance)),
                );
            }
            Err(e) => {
                warn!("⚠️ Could not load user {}: {}", user, e);
                self.notify(
                    NoticeLevel::Error,
                    "Connection Error",
                    format!("Could not load wallet for {}: {}", user, e),
                );
            }
        }
        self.sync_listening();
    }

    /// Process one event; returns false once the controller has shut down
    pub async fn handle(&mut self, event: FlowEvent) -> bool {
        match event {
            FlowEvent::Transcript(ev) => self.on_transcript(ev).await,
            FlowEvent::Scan(payload) => self.on_scan(&payload),
            FlowEvent::Action(action) => self.on_action(action).await,
            FlowEvent::RecognitionError(issue) => self.on_recognition_issue(issue),
            FlowEvent::ListeningEnded => {
                // Re-armed below if the current state still listens
                debug!("Source '{}' stopped listening", self.source.name());
            }
            FlowEvent::BalanceChanged(balance) => {
                self.wallet.apply_balance_update(balance);
                self.emit(FlowOutput::Balance(balance));
            }
            FlowEvent::Shutdown => {
                self.shutdown();
                return false;
            }
        }
        self.sync_listening();
        true
    }

    pub fn shutdown(&mut self) {
        info!("👋 Payment session closing");
        self.source.stop();
        self.wallet.clear();
    }

    // --- transcripts ---

    async fn on_transcript(&mut self, ev: TranscriptEvent) {
        if ev.is_final && ev.id <= self.last_consumed {
            debug!("Ignoring redelivered transcript #{}", ev.id);
            return;
        }

        self.transcript = ev.text.clone();
        self.emit(FlowOutput::Transcript(ev.text.clone()));
        if !ev.is_final {
            return;
        }
        if ev.confidence < self.min_confidence {
            info!(
                "🔇 Ignoring low-confidence transcript ({:.2}): '{}'",
                ev.confidence, ev.text
            );
            return;
        }

        let text = self.normalizer.normalize(&ev.text);
        debug!("[{}] heard '{}'", self.state, text);
        let activate = mentions(&text, "upi") && mentions(&text, "activate");
        let cancel = mentions(&text, "cancel");

        match self.state {
            FlowState::Idle => {
                if activate {
                    self.consume(ev.id);
                    self.begin_scan("Activating UPI Scanner");
                } else if mentions(&text, "scan") || mentions(&text, "qr") {
                    self.consume(ev.id);
                    self.begin_scan("Opening QR Scanner");
                }
            }
            FlowState::ListeningActivate => {
                if activate {
                    self.consume(ev.id);
                    self.begin_scan("Activating UPI Scanner");
                } else if cancel {
                    self.consume(ev.id);
                    self.clear_transcript();
                    self.transition(FlowState::Idle);
                }
            }
            FlowState::ListeningAmount => {
                if cancel {
                    self.consume(ev.id);
                    self.clear_transcript();
                    self.transition(FlowState::ScanningCode);
                } else if let Some(amount) = parse_amount(&text) {
                    self.consume(ev.id);
                    if let Some(intent) = self.intent.as_mut() {
                        intent.amount = Some(amount);
                    }
                    self.notify(
                        NoticeLevel::Info,
                        "Amount Captured",
                        format!("You said: {}", format_inr(amount)),
                    );
                    self.transition(FlowState::ConfirmingPayment);
                } else {
                    debug!("No amount in '{}', still listening", text);
                }
            }
            FlowState::Authenticating => self.authenticate(ev.id, &text).await,
            _ => debug!("Transcript ignored in state {}", self.state),
        }
    }

    fn consume(&mut self, id: u64) {
        self.last_consumed = self.last_consumed.max(id);
    }

    fn begin_scan(&mut self, title: &str) {
        self.intent = None;
        self.confirmed = None;
        self.notify(NoticeLevel::Info, title, "Scan a UPI QR code to continue");
        self.transition(FlowState::ScanningCode);
    }

    // --- payment codes ---

    fn on_scan(&mut self, payload: &str) {
        if self.state != FlowState::ScanningCode {
            debug!("Scan ignored in state {}", self.state);
            return;
        }

        let intent = self
            .codes
            .parse(payload)
            .and_then(PaymentIntent::from_code);
        let Some(intent) = intent else {
            self.notify(
                NoticeLevel::Error,
                "Invalid QR Code",
                "Please scan a valid UPI QR code",
            );
            self.reset();
            return;
        };

        info!(
            "📷 Scanned payment code for {} ({:?})",
            intent.payee_label(),
            intent.amount
        );
        let has_amount = intent.amount.is_some();
        self.intent = Some(intent);

        if has_amount {
            self.transition(FlowState::ConfirmingPayment);
        } else {
            self.notify(
                NoticeLevel::Info,
                "QR Scanned Successfully",
                "Now say the amount you want to pay",
            );
            self.transition(FlowState::ListeningAmount);
        }
    }

    // --- actions ---

    async fn on_action(&mut self, action: UserAction) {
        debug!("[{}] action {:?}", self.state, action);
        match action {
            UserAction::Listen => {
                if self.state == FlowState::Idle {
                    self.transition(FlowState::ListeningActivate);
                }
            }
            UserAction::ScanManually => {
                if matches!(self.state, FlowState::Idle | FlowState::ListeningActivate) {
                    self.begin_scan("Opening QR Scanner");
                }
            }
            UserAction::Confirm => self.confirm(),
            UserAction::Cancel => {
                if self.state == FlowState::ConfirmingPayment {
                    if let Some(intent) = self.intent.as_mut() {
                        intent.amount = None;
                    }
                    self.clear_transcript();
                    self.notify(
                        NoticeLevel::Info,
                        "Enter Amount Again",
                        "Say the amount you want to pay",
                    );
                    self.transition(FlowState::ListeningAmount);
                } else {
                    self.reset();
                }
            }
            UserAction::Reset => self.reset(),
            UserAction::Done => {
                if self.state == FlowState::Success {
                    self.reset();
                }
            }
            UserAction::ToggleHistory => {
                if self.state == FlowState::History {
                    self.transition(FlowState::Idle);
                } else {
                    self.clear_payment();
                    self.transition(FlowState::History);
                }
            }
            UserAction::SwitchUser(name) => self.switch_user(&name).await,
            UserAction::Refresh => self.refresh().await,
            UserAction::SetBalance(balance) => self.set_balance(balance).await,
        }
    }

    fn confirm(&mut self) {
        if self.state != FlowState::ConfirmingPayment {
            debug!("Confirm ignored in state {}", self.state);
            return;
        }

        match self.intent.as_ref().and_then(PaymentIntent::confirm) {
            Some(payment) => {
                info!(
                    "🧾 Confirmed {} to {}",
                    format_inr(payment.amount()),
                    payment.payee_vpa()
                );
                self.confirmed = Some(payment);
                self.clear_transcript();
                let user = self
                    .wallet
                    .current_user()
                    .map(|u| u.name)
                    .unwrap_or_default();
                self.notify(
                    NoticeLevel::Info,
                    "Authenticate Payment",
                    format!("Say your demo passphrase: \"{}\"", user),
                );
                self.transition(FlowState::Authenticating);
            }
            None => {
                self.notify(
                    NoticeLevel::Warning,
                    "Amount Needed",
                    "Say the amount you want to pay",
                );
                self.transition(FlowState::ListeningAmount);
            }
        }
    }

    /// Back to `Idle` with no payment context
    fn reset(&mut self) {
        self.clear_payment();
        self.transition(FlowState::Idle);
    }

    fn clear_payment(&mut self) {
        self.intent = None;
        self.confirmed = None;
        self.clear_transcript();
    }

    fn clear_transcript(&mut self) {
        if !self.transcript.is_empty() {
            self.transcript.clear();
            self.emit(FlowOutput::Transcript(String::new()));
        }
    }

    // --- authentication and recording ---

    async fn authenticate(&mut self, event_id: u64, spoken: &str) {
        let matched = match self
            .wallet
            .check_passphrase(spoken, &*self.policy)
            .await
        {
            Ok(matched) => matched,
            Err(e) => {
                warn!("⚠️ Passphrase check failed: {}", e);
                self.notify(
                    NoticeLevel::Error,
                    "Authentication Error",
                    "Failed to validate passphrase",
                );
                return;
            }
        };

        if !matched {
            let user = self
                .wallet
                .current_user()
                .map(|u| u.name)
                .unwrap_or_default();
            self.notify(
                NoticeLevel::Error,
                "Authentication Failed",
                format!("Incorrect passphrase. Try saying \"{}\"", user),
            );
            return;
        }

        let Some(payment) = self.confirmed.clone() else {
            warn!("Authenticated without a confirmed payment");
            self.reset();
            return;
        };

        self.consume(event_id);
        self.append_in_flight = true;
        self.source.stop();
        let result = self
            .wallet
            .append(Transfer {
                direction: Direction::Sent,
                amount: payment.amount(),
                payee_name: payment.payee_name().map(str::to_string),
                payee_vpa: Some(payment.payee_vpa().to_string()),
                note: payment.note().map(str::to_string),
            })
            .await;
        self.append_in_flight = false;

        match result {
            Ok(tx) => {
                if let Some(audit) = &self.audit {
                    if let Err(e) = audit.record_payment(&tx) {
                        warn!("Audit log write failed: {}", e);
                    }
                }
                self.emit(FlowOutput::PaymentRecorded(tx));

                let balance = match self.wallet.refresh().await {
                    Ok(snapshot) => Some(snapshot.balance),
                    Err(e) => {
                        warn!("⚠️ Refresh after payment failed, using cached wallet: {}", e);
                        self.wallet.cached().map(|s| s.balance)
                    }
                };
                if let Some(balance) = balance {
                    self.emit(FlowOutput::Balance(balance));
                }

                let payee = payment
                    .payee_name()
                    .unwrap_or(payment.payee_vpa())
                    .to_string();
                self.notify(
                    NoticeLevel::Success,
                    "Payment Successful! 🎉",
                    format!("Paid {} to {}", format_inr(payment.amount()), payee),
                );
                self.transition(FlowState::Success);
            }
            Err(PayError::InsufficientBalance { .. }) => {
                let available = self
                    .wallet
                    .cached()
                    .map(|s| format_inr(s.balance))
                    .unwrap_or_else(|| "unknown".to_string());
                self.notify(
                    NoticeLevel::Error,
                    "Insufficient Balance",
                    format!(
                        "Cannot pay {}; available balance is {}",
                        format_inr(payment.amount()),
                        available
                    ),
                );
            }
            Err(e) => {
                warn!("⚠️ Transaction failed: {}", e);
                let message = if e.is_transport() {
                    format!("Could not reach the wallet ({}). Check your connection and try again.", e)
                } else {
                    format!("Failed to process payment. Please try again. ({})", e)
                };
                self.notify(NoticeLevel::Error, "Transaction Failed", message);
            }
        }
    }

    // --- wallet actions ---

    async fn switch_user(&mut self, name: &str) {
        match self.wallet.switch_user(name).await {
            Ok(user) => {
                self.emit(FlowOutput::Balance(user.balance));
                self.notify(
                    NoticeLevel::Success,
                    "User Switched",
                    format!("Now logged in as {}", user.name),
                );
                if self.state != FlowState::History {
                    self.reset();
                }
            }
            Err(e) => {
                warn!("⚠️ Failed to switch user: {}", e);
                self.notify(
                    NoticeLevel::Error,
                    "Switch Failed",
                    format!("Failed to switch to {}: {}", name, e),
                );
            }
        }
    }

    async fn refresh(&mut self) {
        match self.wallet.refresh().await {
            Ok(snapshot) => {
                self.emit(FlowOutput::Balance(snapshot.balance));
                self.notify(
                    NoticeLevel::Success,
                    "Balance Refreshed",
                    "Wallet data updated successfully",
                );
            }
            Err(e) => {
                warn!("⚠️ Failed to refresh wallet: {}", e);
                let message = if e.is_transport() {
                    format!("Wallet unreachable, showing cached data ({})", e)
                } else {
                    format!("Failed to refresh wallet data: {}", e)
                };
                self.notify(NoticeLevel::Error, "Refresh Failed", message);
            }
        }
    }

    async fn set_balance(&mut self, balance: Decimal) {
        match self.wallet.set_balance(balance).await {
            Ok(balance) => {
                self.emit(FlowOutput::Balance(balance));
                self.notify(
                    NoticeLevel::Success,
                    "Balance Updated",
                    format!("Balance set to {}", format_inr(balance)),
                );
            }
            Err(e) => {
                self.notify(
                    NoticeLevel::Error,
                    "Update Failed",
                    format!("Could not set balance: {}", e),
                );
            }
        }
    }

    // --- recognition ---

    fn on_recognition_issue(&mut self, issue: RecognitionIssue) {
        debug!("Source '{}' reported: {}", self.source.name(), issue.message());
        match issue {
            RecognitionIssue::Resource(msg) => {
                let name = self.source.name().to_string();
                self.report_resource(&name, &msg);
                self.source.degrade();
            }
            RecognitionIssue::Transient(msg) => {
                self.notify(NoticeLevel::Warning, "Voice Recognition Error", msg);
            }
        }
    }

    /// Resource problems are reported once per source
    fn report_resource(&mut self, source: &str, msg: &str) {
        if self.reported_sources.insert(source.to_string()) {
            warn!("⚠️ Recognition source '{}' unavailable: {}", source, msg);
            self.notify(
                NoticeLevel::Warning,
                "Voice Recognition Unavailable",
                format!("{} ({})", msg, source),
            );
        }
    }

    fn sync_listening(&mut self) {
        let wanted = self.state.needs_listening() && !self.append_in_flight;
        let listening = self.source.is_listening();

        if wanted && !listening {
            self.start_listening();
        } else if !wanted && listening {
            debug!("Stopping recognition in state {}", self.state);
            self.source.stop();
        }
    }

    fn start_listening(&mut self) {
        loop {
            match self.source.start(self.sink.clone()) {
                Ok(()) => {
                    debug!("Listening via '{}' in {}", self.source.name(), self.state);
                    return;
                }
                Err(e) => {
                    let name = self.source.name().to_string();
                    self.report_resource(&name, &e.to_string());
                    if !self.source.degrade() {
                        return;
                    }
                }
            }
        }
    }

    // --- outputs ---

    fn transition(&mut self, to: FlowState) {
        let from = self.state;
        if from == to {
            return;
        }
        self.state = to;
        info!("🔀 {} -> {}", from, to);
        self.emit(FlowOutput::StateChanged { from, to });
    }

    fn notify(&self, level: NoticeLevel, title: &str, message: impl Into<String>) {
        self.emit(FlowOutput::notice(level, title, message));
    }

    fn emit(&self, output: FlowOutput) {
        // The display side may already be gone during shutdown
        let _ = self.outputs.send(output);
    }
}
