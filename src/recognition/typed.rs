//! Typed-text adapter
//!
//! Text submitted through `TypedInput` becomes a final transcript with full
//! confidence, but only while the source is listening.

use super::{RecognitionSink, RecognitionSource, TranscriptEvent};
use crate::error::PayResult;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::debug;

#[derive(Debug, Default)]
struct Shared {
    listening: AtomicBool,
    sink: Mutex<Option<RecognitionSink>>,
}

#[derive(Debug)]
pub struct TypedSource {
    shared: Arc<Shared>,
}

/// Handle for submitting text from outside the controller
#[derive(Debug, Clone)]
pub struct TypedInput {
    shared: Arc<Shared>,
}

impl TypedSource {
    pub fn new() -> (Self, TypedInput) {
        let shared = Arc::new(Shared::default());
        (
            Self {
                shared: shared.clone(),
            },
            TypedInput { shared },
        )
    }
}

impl TypedInput {
    /// Deliver `text` as a final event; false when nobody is listening
    pub fn submit(&self, text: &str) -> bool {
        let text = text.trim();
        if text.is_empty() || !self.is_listening() {
            return false;
        }
        let sink = match self.shared.sink.lock() {
            Ok(sink) => sink.clone(),
            Err(_) => None,
        };
        match sink {
            Some(sink) => {
                debug!("Typed input: '{}'", text);
                sink.transcript(TranscriptEvent::final_result(text, 1.0))
            }
            None => false,
        }
    }

    pub fn is_listening(&self) -> bool {
        self.shared.listening.load(Ordering::SeqCst)
    }
}

impl RecognitionSource for TypedSource {
    fn start(&mut self, sink: RecognitionSink) -> PayResult<()> {
        *self.shared.sink.lock()? = Some(sink);
        self.shared.listening.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&mut self) {
        self.shared.listening.store(false, Ordering::SeqCst);
    }

    fn is_listening(&self) -> bool {
        self.shared.listening.load(Ordering::SeqCst)
    }

    fn name(&self) -> &str {
        "typed"
    }
}
