//! Native recognition: microphone frames through a speech engine
//!
//! Interim results are forwarded as they come. After a long stretch without
//! speech the source silences itself and reports `ListeningEnded`; only the
//! controller restarts it.

use super::{RecognitionIssue, RecognitionSink, RecognitionSource, TranscriptEvent};
use crate::asr::{EngineOutput, SpeechEngine};
use crate::audio::{calculate_energy, AudioTap, SAMPLE_RATE};
use crate::error::{PayError, PayResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// RMS below which a chunk counts as quiet
const QUIET_ENERGY: f32 = 300.0;
const NO_SPEECH_TIMEOUT: Duration = Duration::from_secs(8);

pub struct NativeSource {
    tap: Arc<dyn AudioTap>,
    engine: Arc<Mutex<Box<dyn SpeechEngine>>>,
    listening: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
    no_speech_timeout: Duration,
}

impl NativeSource {
    pub fn new(tap: Arc<dyn AudioTap>, engine: Box<dyn SpeechEngine>) -> Self {
        Self {
            tap,
            engine: Arc::new(Mutex::new(engine)),
            listening: Arc::new(AtomicBool::new(false)),
            task: None,
            no_speech_timeout: NO_SPEECH_TIMEOUT,
        }
    }

    pub fn with_no_speech_timeout(mut self, timeout: Duration) -> Self {
        self.no_speech_timeout = timeout;
        self
    }
}

async fn listen_loop(
    mut frames: mpsc::UnboundedReceiver<Vec<i16>>,
    engine: Arc<Mutex<Box<dyn SpeechEngine>>>,
    listening: Arc<AtomicBool>,
    sink: RecognitionSink,
    no_speech_timeout: Duration,
) {
    let quiet_limit = (no_speech_timeout.as_secs_f32() * SAMPLE_RATE as f32) as usize;
    let mut quiet_samples = 0usize;
    let mut engine = engine.lock().await;
    engine.reset();

    while let Some(frame) = frames.recv().await {
        if calculate_energy(&frame) < QUIET_ENERGY {
            quiet_samples += frame.len();
        } else {
            quiet_samples = 0;
        }

        match engine.accept(&frame).await {
            Ok(EngineOutput::Partial(text)) => {
                sink.transcript(TranscriptEvent::interim(text));
            }
            Ok(EngineOutput::Final(result)) => {
                debug!("Heard '{}' ({:.2})", result.text, result.confidence);
                quiet_samples = 0;
                sink.transcript(TranscriptEvent::final_result(
                    result.text,
                    result.confidence,
                ));
            }
            Ok(EngineOutput::Nothing) => {}
            Err(e) => {
                warn!("⚠️ Speech engine error: {}", e);
                sink.issue(RecognitionIssue::Transient(e.to_string()));
            }
        }

        if quiet_samples >= quiet_limit {
            info!("🔇 No speech for {:?}, listening ended", no_speech_timeout);
            engine.reset();
            listening.store(false, Ordering::SeqCst);
            sink.ended();
            return;
        }
        if sink.is_closed() {
            break;
        }
    }

    listening.store(false, Ordering::SeqCst);
    if !sink.is_closed() {
        sink.issue(RecognitionIssue::Resource("audio capture stopped".into()));
    }
}

impl RecognitionSource for NativeSource {
    fn start(&mut self, sink: RecognitionSink) -> PayResult<()> {
        if self.is_listening() {
            return Ok(());
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }

        let frames = self
            .tap
            .open()
            .map_err(|e| PayError::Recognition(format!("{}: {}", self.tap.name(), e)))?;

        // Fresh flag per run so an aborted loop cannot clear the new one
        self.listening = Arc::new(AtomicBool::new(true));
        self.task = Some(tokio::spawn(listen_loop(
            frames,
            self.engine.clone(),
            self.listening.clone(),
            sink,
            self.no_speech_timeout,
        )));
        debug!("Native recognition started");
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.listening.store(false, Ordering::SeqCst);
    }

    fn is_listening(&self) -> bool {
        self.listening.load(Ordering::SeqCst)
    }

    fn name(&self) -> &str {
        "native"
    }
}

impl Drop for NativeSource {
    fn drop(&mut self) {
        self.stop();
    }
}
