//! Shared fixtures for flow tests
//!
//! A recognition source that records how the controller drives it, a
//! scripted audio tap, and a wallet that can be told to fail.

#![allow(dead_code)]

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use voicepay::audio::AudioTap;
use voicepay::config::Config;
use voicepay::error::{PayError, PayResult};
use voicepay::flow::{FlowController, FlowEvent, FlowOutput, FlowState, Notice, UserAction};
use voicepay::recognition::{RecognitionSink, RecognitionSource, TranscriptEvent};
use voicepay::wallet::{
    LocalWallet, NewTransaction, Transaction, User, WalletBackend, WalletStore,
};

pub const MERCHANT_CODE: &str = "upi://pay?pa=merchant@bank&pn=Shop";
pub const MERCHANT_VPA: &str = "merchant@bank";

#[derive(Default)]
struct ProbeState {
    starts: AtomicUsize,
    redundant_starts: AtomicUsize,
    stops: AtomicUsize,
    start_failures: AtomicUsize,
    listening: AtomicBool,
}

/// Observer for a `MockSource`, kept by the test after the source is boxed
#[derive(Clone, Default)]
pub struct SourceProbe {
    state: Arc<ProbeState>,
}

impl SourceProbe {
    pub fn starts(&self) -> usize {
        self.state.starts.load(Ordering::SeqCst)
    }

    /// `start` calls while already listening
    pub fn redundant_starts(&self) -> usize {
        self.state.redundant_starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.state.stops.load(Ordering::SeqCst)
    }

    pub fn is_listening(&self) -> bool {
        self.state.listening.load(Ordering::SeqCst)
    }

    pub fn fail_next_starts(&self, count: usize) {
        self.state.start_failures.store(count, Ordering::SeqCst);
    }

    /// Stop on the source's own initiative, as an engine end-of-utterance would
    pub fn silence(&self) {
        self.state.listening.store(false, Ordering::SeqCst);
    }
}

pub struct MockSource {
    name: String,
    probe: SourceProbe,
}

impl MockSource {
    pub fn new(name: &str) -> (Self, SourceProbe) {
        let probe = SourceProbe::default();
        (
            Self {
                name: name.to_string(),
                probe: probe.clone(),
            },
            probe,
        )
    }
}

impl RecognitionSource for MockSource {
    fn start(&mut self, _sink: RecognitionSink) -> PayResult<()> {
        let state = &self.probe.state;
        let failures = state.start_failures.load(Ordering::SeqCst);
        if failures > 0 {
            state.start_failures.store(failures - 1, Ordering::SeqCst);
            return Err(PayError::Recognition(format!("{} unavailable", self.name)));
        }
        if state.listening.swap(true, Ordering::SeqCst) {
            state.redundant_starts.fetch_add(1, Ordering::SeqCst);
        } else {
            state.starts.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn stop(&mut self) {
        if self.probe.state.listening.swap(false, Ordering::SeqCst) {
            self.probe.state.stops.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn is_listening(&self) -> bool {
        self.probe.is_listening()
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Audio tap that replays fixed frames and keeps the capture open
pub struct ScriptedTap {
    frames: Vec<Vec<i16>>,
    senders: Mutex<Vec<UnboundedSender<Vec<i16>>>>,
}

impl ScriptedTap {
    /// `count` frames of constant amplitude
    pub fn constant(amplitude: i16, count: usize) -> Self {
        Self {
            frames: vec![vec![amplitude; 1024]; count],
            senders: Mutex::new(Vec::new()),
        }
    }

    pub fn opens(&self) -> usize {
        self.senders.lock().unwrap().len()
    }
}

impl AudioTap for ScriptedTap {
    fn open(&self) -> PayResult<UnboundedReceiver<Vec<i16>>> {
        let (tx, rx) = mpsc::unbounded_channel();
        for frame in &self.frames {
            let _ = tx.send(frame.clone());
        }
        self.senders.lock()?.push(tx);
        Ok(rx)
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// In-memory demo wallet with switchable failures and a slow-append mode
pub struct FlakyWallet {
    inner: LocalWallet,
    fail_appends: AtomicBool,
    fail_reads: AtomicBool,
    append_delay: Mutex<Option<Duration>>,
    appends: AtomicUsize,
    probe: Mutex<Option<SourceProbe>>,
    listening_during_append: Mutex<Vec<bool>>,
}

impl FlakyWallet {
    pub fn demo() -> Self {
        let inner = LocalWallet::in_memory().unwrap();
        inner.seed_demo().unwrap();
        Self {
            inner,
            fail_appends: AtomicBool::new(false),
            fail_reads: AtomicBool::new(false),
            append_delay: Mutex::new(None),
            appends: AtomicUsize::new(0),
            probe: Mutex::new(None),
            listening_during_append: Mutex::new(Vec::new()),
        }
    }

    pub fn fail_appends(&self, fail: bool) {
        self.fail_appends.store(fail, Ordering::SeqCst);
    }

    /// Make `get_user` and `list_transactions` fail as an unreachable server would
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Hold every append for `delay` before it reaches storage
    pub fn slow_appends(&self, delay: Duration) {
        *self.append_delay.lock().unwrap() = Some(delay);
    }

    fn check_reads(&self) -> PayResult<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(PayError::Transport("server unreachable".into()));
        }
        Ok(())
    }

    /// Append attempts, failed ones included
    pub fn appends(&self) -> usize {
        self.appends.load(Ordering::SeqCst)
    }

    pub fn watch(&self, probe: SourceProbe) {
        *self.probe.lock().unwrap() = Some(probe);
    }

    pub fn listening_during_append(&self) -> Vec<bool> {
        self.listening_during_append.lock().unwrap().clone()
    }

    /// Recorded payments to `vpa` for a user
    pub async fn payments_to(&self, user_id: &str, vpa: &str) -> Vec<Transaction> {
        self.inner
            .list_transactions(user_id, 100, 0)
            .await
            .unwrap()
            .into_iter()
            .filter(|tx| tx.payee_vpa.as_deref() == Some(vpa))
            .collect()
    }
}

#[async_trait]
impl WalletBackend for FlakyWallet {
    async fn get_user(&self, name: &str) -> PayResult<User> {
        self.check_reads()?;
        self.inner.get_user(name).await
    }

    async fn validate_passphrase(&self, name: &str, passphrase: &str) -> PayResult<bool> {
        self.inner.validate_passphrase(name, passphrase).await
    }

    async fn list_transactions(
        &self,
        user_id: &str,
        limit: usize,
        offset: usize,
    ) -> PayResult<Vec<Transaction>> {
        self.check_reads()?;
        self.inner.list_transactions(user_id, limit, offset).await
    }

    async fn append_transaction(&self, tx: NewTransaction) -> PayResult<Transaction> {
        self.appends.fetch_add(1, Ordering::SeqCst);
        let listening = self
            .probe
            .lock()?
            .as_ref()
            .map(|p| p.is_listening())
            .unwrap_or(false);
        self.listening_during_append.lock()?.push(listening);

        let delay = *self.append_delay.lock()?;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_appends.load(Ordering::SeqCst) {
            return Err(PayError::Transport("connection refused".into()));
        }
        self.inner.append_transaction(tx).await
    }

    async fn set_balance(&self, name: &str, balance: Decimal) -> PayResult<User> {
        self.inner.set_balance(name, balance).await
    }

    fn name(&self) -> &str {
        "flaky"
    }
}

pub fn test_config() -> Config {
    Config {
        audit_log: false,
        ..Config::default()
    }
}

/// Controller wired to a mock source and the flaky demo wallet
pub struct Harness {
    pub controller: FlowController,
    pub probe: SourceProbe,
    pub wallet: Arc<FlakyWallet>,
    pub store: Arc<WalletStore>,
    outputs: UnboundedReceiver<FlowOutput>,
    events: UnboundedReceiver<FlowEvent>,
}

impl Harness {
    /// Logged in as Harsh, sitting in `Idle`
    pub async fn new() -> Self {
        let (source, probe) = MockSource::new("mock");
        Self::with_source(Box::new(source), probe, &test_config()).await
    }

    pub async fn with_source(
        source: Box<dyn RecognitionSource>,
        probe: SourceProbe,
        config: &Config,
    ) -> Self {
        let wallet = Arc::new(FlakyWallet::demo());
        wallet.watch(probe.clone());
        let store = Arc::new(WalletStore::new(wallet.clone(), config.page_size));

        let (events_tx, events) = mpsc::unbounded_channel();
        let (outputs_tx, outputs) = mpsc::unbounded_channel();
        let mut controller = FlowController::new(
            source,
            RecognitionSink::new(events_tx),
            store.clone(),
            outputs_tx,
        )
        .configure(config);
        controller.start("Harsh").await;

        Self {
            controller,
            probe,
            wallet,
            store,
            outputs,
            events,
        }
    }

    pub fn state(&self) -> FlowState {
        self.controller.state()
    }

    /// Deliver a confident final transcript; returns it for redelivery
    pub async fn say(&mut self, text: &str) -> TranscriptEvent {
        let event = TranscriptEvent::final_result(text, 1.0);
        self.deliver(event.clone()).await;
        event
    }

    pub async fn deliver(&mut self, event: TranscriptEvent) {
        self.controller.handle(FlowEvent::Transcript(event)).await;
    }

    pub async fn act(&mut self, action: UserAction) {
        self.controller.handle(FlowEvent::Action(action)).await;
    }

    pub async fn scan(&mut self, payload: &str) {
        self.controller
            .handle(FlowEvent::Scan(payload.to_string()))
            .await;
    }

    /// Walk the happy path up to `Authenticating` for `amount`
    pub async fn reach_authenticating(&mut self, amount: &str) {
        self.say("UPI activate").await;
        self.scan(MERCHANT_CODE).await;
        self.say(amount).await;
        self.act(UserAction::Confirm).await;
        assert_eq!(self.state(), FlowState::Authenticating);
    }

    /// Feed whatever the source pushed into the queue back to the controller
    pub async fn pump_next(&mut self) -> Option<FlowEvent> {
        let event = tokio::time::timeout(Duration::from_secs(2), self.events.recv())
            .await
            .ok()??;
        self.controller.handle(event.clone()).await;
        Some(event)
    }

    pub fn drain_outputs(&mut self) -> Vec<FlowOutput> {
        let mut drained = Vec::new();
        while let Ok(output) = self.outputs.try_recv() {
            drained.push(output);
        }
        drained
    }

    pub fn notices(&mut self) -> Vec<Notice> {
        self.drain_outputs()
            .into_iter()
            .filter_map(|output| match output {
                FlowOutput::Notice(notice) => Some(notice),
                _ => None,
            })
            .collect()
    }

    pub fn balance(&self) -> Decimal {
        self.store.cached().unwrap().balance
    }
}
