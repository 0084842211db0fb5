//! Recognition Sources
//!
//! Every way of turning the user's voice (or keyboard) into transcript events
//! sits behind `RecognitionSource`. The flow controller only starts, stops and
//! queries a source; results come back through a `RecognitionSink` as events
//! on the controller's queue.
//!
//! Variants:
//! - Native: a `SpeechEngine` fed by microphone frames
//! - Heuristic: audio-level simulation over a fixed phrase set
//! - Typed: submitted text treated as a confident final result

pub mod heuristic;
pub mod native;
pub mod typed;

pub use heuristic::{HeuristicSource, PhrasePicker};
pub use native::NativeSource;
pub use typed::{TypedInput, TypedSource};

use crate::asr;
use crate::audio::AudioTap;
use crate::config::Config;
use crate::error::PayResult;
use crate::flow::FlowEvent;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{info, warn};

static NEXT_EVENT_ID: AtomicU64 = AtomicU64::new(1);

/// One recognizer output, interim or final
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptEvent {
    /// Process-wide sequence number; identifies this event instance
    pub id: u64,
    pub text: String,
    pub is_final: bool,
    pub confidence: f32,
}

impl TranscriptEvent {
    pub fn new(text: impl Into<String>, is_final: bool, confidence: f32) -> Self {
        Self {
            id: NEXT_EVENT_ID.fetch_add(1, Ordering::Relaxed),
            text: text.into(),
            is_final,
            confidence,
        }
    }

    pub fn final_result(text: impl Into<String>, confidence: f32) -> Self {
        Self::new(text, true, confidence)
    }

    pub fn interim(text: impl Into<String>) -> Self {
        Self::new(text, false, 0.0)
    }
}

/// Problems a source reports while running
#[derive(Debug, Clone, PartialEq)]
pub enum RecognitionIssue {
    /// The source cannot work (no device, permission denied, engine gone)
    Resource(String),
    /// A single failed attempt; the source keeps going
    Transient(String),
}

impl RecognitionIssue {
    pub fn message(&self) -> &str {
        match self {
            RecognitionIssue::Resource(msg) | RecognitionIssue::Transient(msg) => msg,
        }
    }
}

/// Push side of a source: everything lands on the controller's queue
#[derive(Debug, Clone)]
pub struct RecognitionSink {
    tx: UnboundedSender<FlowEvent>,
}

impl RecognitionSink {
    pub fn new(tx: UnboundedSender<FlowEvent>) -> Self {
        Self { tx }
    }

    /// Returns false once the controller is gone
    pub fn transcript(&self, event: TranscriptEvent) -> bool {
        self.tx.send(FlowEvent::Transcript(event)).is_ok()
    }

    pub fn issue(&self, issue: RecognitionIssue) -> bool {
        self.tx.send(FlowEvent::RecognitionError(issue)).is_ok()
    }

    /// The source stopped on its own
    pub fn ended(&self) -> bool {
        self.tx.send(FlowEvent::ListeningEnded).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// A way of producing transcript events
pub trait RecognitionSource: Send {
    /// Begin delivering events to `sink`. Starting an active source is a no-op.
    fn start(&mut self, sink: RecognitionSink) -> PayResult<()>;

    /// Stop delivering events. Safe to call repeatedly and before `start`.
    fn stop(&mut self);

    fn is_listening(&self) -> bool;

    fn name(&self) -> &str;

    /// Switch to a less capable variant; false when there is none
    fn degrade(&mut self) -> bool {
        false
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    Native,
    Heuristic,
    Typed,
}

/// What this machine can do, probed once per session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
    pub native_engine: bool,
    pub microphone: bool,
}

/// Ordered variants to try, best first; typed input is always last
pub fn plan(config: &Config, caps: Capabilities) -> Vec<Variant> {
    let native = caps.native_engine && caps.microphone;
    let heuristic = caps.microphone;

    let mut order = match config.recognition.to_lowercase().as_str() {
        "typed" => vec![],
        "native" => vec![(native, Variant::Native)],
        "heuristic" => vec![(heuristic, Variant::Heuristic)],
        _ => vec![
            (native, Variant::Native),
            (heuristic && config.allow_simulation, Variant::Heuristic),
        ],
    }
    .into_iter()
    .filter_map(|(ok, variant)| ok.then_some(variant))
    .collect::<Vec<_>>();

    order.push(Variant::Typed);
    order
}

/// Sources tried in order; the head is the active one
pub struct FallbackChain {
    sources: Vec<Box<dyn RecognitionSource>>,
    active: usize,
}

impl FallbackChain {
    pub fn new(sources: Vec<Box<dyn RecognitionSource>>) -> Self {
        Self { sources, active: 0 }
    }

    pub fn active_name(&self) -> &str {
        self.sources
            .get(self.active)
            .map(|s| s.name())
            .unwrap_or("none")
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

impl RecognitionSource for FallbackChain {
    fn start(&mut self, sink: RecognitionSink) -> PayResult<()> {
        match self.sources.get_mut(self.active) {
            Some(source) => source.start(sink),
            None => Err(crate::error::PayError::Recognition(
                "no recognition source configured".into(),
            )),
        }
    }

    fn stop(&mut self) {
        if let Some(source) = self.sources.get_mut(self.active) {
            source.stop();
        }
    }

    fn is_listening(&self) -> bool {
        self.sources
            .get(self.active)
            .map(|s| s.is_listening())
            .unwrap_or(false)
    }

    fn name(&self) -> &str {
        self.active_name()
    }

    fn degrade(&mut self) -> bool {
        if self.active + 1 >= self.sources.len() {
            return false;
        }
        self.stop();
        let from = self.active_name().to_string();
        self.active += 1;
        warn!(
            "⚠️ Recognition falling back: {} -> {}",
            from,
            self.active_name()
        );
        true
    }
}

/// Probe capabilities and build the session's source chain
///
/// Returns the chain plus the handle for typed input, which is always the
/// chain's last resort.
pub async fn select(config: &Config, tap: Option<Arc<dyn AudioTap>>) -> (FallbackChain, TypedInput) {
    let wants_native = matches!(
        config.recognition.to_lowercase().as_str(),
        "auto" | "native"
    );

    let mut engine = None;
    if wants_native && tap.is_some() {
        match asr::create_engine(config).await {
            Ok(e) => engine = Some(e),
            Err(e) => warn!("⚠️ Speech engine unavailable: {}", e),
        }
    }

    let caps = Capabilities {
        native_engine: engine.is_some(),
        microphone: tap.is_some(),
    };
    let order = plan(config, caps);
    info!("🎧 Recognition plan: {:?} ({:?})", order, caps);

    let (typed, input) = TypedSource::new();
    let mut typed = Some(typed);
    let mut sources: Vec<Box<dyn RecognitionSource>> = Vec::new();
    for variant in order {
        match (variant, tap.clone()) {
            (Variant::Native, Some(tap)) => {
                if let Some(engine) = engine.take() {
                    sources.push(Box::new(NativeSource::new(tap, engine)));
                }
            }
            (Variant::Heuristic, Some(tap)) => {
                sources.push(Box::new(HeuristicSource::new(
                    tap,
                    PhrasePicker::from_name(&config.heuristic_picker),
                    config.heuristic_phrases.clone(),
                )));
            }
            (Variant::Typed, _) => {
                if let Some(typed) = typed.take() {
                    sources.push(Box::new(typed));
                }
            }
            _ => {}
        }
    }

    (FallbackChain::new(sources), input)
}
