//! Heuristic recognition
//!
//! A simulation, not a recognizer: the mean audio level over a window of
//! frames decides whether "something was said", and a picker maps that to
//! one phrase from a fixed vocabulary. Useful for demos on machines with a
//! microphone but no speech engine.

use super::{RecognitionIssue, RecognitionSink, RecognitionSource, TranscriptEvent};
use crate::audio::{calculate_level, AudioTap};
use crate::error::{PayError, PayResult};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Frames averaged per decision
pub const WINDOW_FRAMES: usize = 4;

/// How a level becomes a phrase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PhrasePicker {
    /// Any level above 0.1 picks a random phrase at confidence 0.8
    #[default]
    Random,
    /// Level of at least 0.01 indexes the vocabulary deterministically
    EnergyBucket,
}

impl PhrasePicker {
    pub fn from_name(name: &str) -> Self {
        match name.to_lowercase().as_str() {
            "energy" | "energy_bucket" => PhrasePicker::EnergyBucket,
            _ => PhrasePicker::Random,
        }
    }

    /// Phrase and confidence for one window, or `None` for silence
    pub fn pick<'a, R: Rng>(
        &self,
        level: f32,
        phrases: &'a [String],
        rng: &mut R,
    ) -> Option<(&'a str, f32)> {
        if phrases.is_empty() {
            return None;
        }
        match self {
            PhrasePicker::Random => {
                if level <= 0.1 {
                    return None;
                }
                let idx = rng.gen_range(0..phrases.len());
                Some((phrases[idx].as_str(), 0.8))
            }
            PhrasePicker::EnergyBucket => {
                if level < 0.01 {
                    return None;
                }
                let idx = (level * 1000.0).floor() as usize % phrases.len();
                Some((phrases[idx].as_str(), (level * 10.0).min(0.9)))
            }
        }
    }
}

/// Collects frames and yields the mean level of each full window
#[derive(Debug, Default)]
pub struct LevelWindow {
    frames: Vec<Vec<i16>>,
}

impl LevelWindow {
    pub fn push(&mut self, frame: Vec<i16>) -> Option<f32> {
        self.frames.push(frame);
        if self.frames.len() < WINDOW_FRAMES {
            return None;
        }
        let combined: Vec<i16> = self.frames.drain(..).flatten().collect();
        Some(calculate_level(&combined))
    }
}

pub struct HeuristicSource {
    tap: Arc<dyn AudioTap>,
    picker: PhrasePicker,
    phrases: Arc<Vec<String>>,
    listening: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl HeuristicSource {
    pub fn new(tap: Arc<dyn AudioTap>, picker: PhrasePicker, phrases: Vec<String>) -> Self {
        Self {
            tap,
            picker,
            phrases: Arc::new(phrases),
            listening: Arc::new(AtomicBool::new(false)),
            task: None,
        }
    }
}

async fn simulate(
    mut frames: mpsc::UnboundedReceiver<Vec<i16>>,
    picker: PhrasePicker,
    phrases: Arc<Vec<String>>,
    listening: Arc<AtomicBool>,
    sink: RecognitionSink,
) {
    let mut rng = StdRng::from_entropy();
    let mut window = LevelWindow::default();

    while let Some(frame) = frames.recv().await {
        let Some(level) = window.push(frame) else {
            continue;
        };
        if let Some((phrase, confidence)) = picker.pick(level, &phrases, &mut rng) {
            debug!("Simulated '{}' at level {:.3}", phrase, level);
            if !sink.transcript(TranscriptEvent::final_result(phrase, confidence)) {
                return;
            }
        }
    }

    listening.store(false, Ordering::SeqCst);
    sink.issue(RecognitionIssue::Resource("audio capture stopped".into()));
}

impl RecognitionSource for HeuristicSource {
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

        self.listening = Arc::new(AtomicBool::new(true));
        self.task = Some(tokio::spawn(simulate(
            frames,
            self.picker,
            self.phrases.clone(),
            self.listening.clone(),
            sink,
        )));
        info!("🎲 Simulated recognition started ({:?})", self.picker);
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
        "heuristic"
    }
}

impl Drop for HeuristicSource {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::FlowEvent;

    fn phrases() -> Vec<String> {
        ["UPI ACTIVATE", "scan QR", "two hundred rupees", "yes"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    #[test]
    fn test_random_picker_threshold() {
        let mut rng = StdRng::seed_from_u64(7);
        let vocab = phrases();
        assert_eq!(PhrasePicker::Random.pick(0.1, &vocab, &mut rng), None);

        let (phrase, confidence) = PhrasePicker::Random.pick(0.5, &vocab, &mut rng).unwrap();
        assert!(vocab.iter().any(|p| p == phrase));
        assert_eq!(confidence, 0.8);
    }

    #[test]
    fn test_energy_picker_is_deterministic() {
        let mut rng = StdRng::seed_from_u64(7);
        let vocab = phrases();
        assert_eq!(PhrasePicker::EnergyBucket.pick(0.009, &vocab, &mut rng), None);

        // floor(0.0125 * 1000) = 12, 12 mod 4 = 0
        let (phrase, confidence) = PhrasePicker::EnergyBucket
            .pick(0.0125, &vocab, &mut rng)
            .unwrap();
        assert_eq!(phrase, "UPI ACTIVATE");
        assert!((confidence - 0.125).abs() < 1e-6);

        // Confidence is capped
        let (_, loud) = PhrasePicker::EnergyBucket.pick(0.5, &vocab, &mut rng).unwrap();
        assert_eq!(loud, 0.9);
    }

    #[test]
    fn test_empty_vocabulary() {
        let mut rng = StdRng::seed_from_u64(7);
        assert_eq!(PhrasePicker::Random.pick(1.0, &[], &mut rng), None);
    }

    #[test]
    fn test_picker_names() {
        assert_eq!(PhrasePicker::from_name("energy"), PhrasePicker::EnergyBucket);
        assert_eq!(PhrasePicker::from_name("random"), PhrasePicker::Random);
        assert_eq!(PhrasePicker::from_name("???"), PhrasePicker::Random);
    }

    #[test]
    fn test_window_emits_every_four_frames() {
        let mut window = LevelWindow::default();
        for _ in 0..WINDOW_FRAMES - 1 {
            assert!(window.push(vec![16384; 8]).is_none());
        }
        let level = window.push(vec![16384; 8]).unwrap();
        assert!((level - 0.5).abs() < 1e-6);
        assert!(window.push(vec![0; 8]).is_none());
    }

    struct OnceTap(std::sync::Mutex<Option<mpsc::UnboundedReceiver<Vec<i16>>>>);

    impl AudioTap for OnceTap {
        fn open(&self) -> PayResult<mpsc::UnboundedReceiver<Vec<i16>>> {
            self.0
                .lock()?
                .take()
                .ok_or_else(|| PayError::Audio("busy".into()))
        }

        fn name(&self) -> &str {
            "once"
        }
    }

    #[tokio::test]
    async fn test_loud_window_produces_final_event() {
        let (frames_tx, frames_rx) = mpsc::unbounded_channel();
        let tap = Arc::new(OnceTap(std::sync::Mutex::new(Some(frames_rx))));
        let mut source = HeuristicSource::new(tap, PhrasePicker::EnergyBucket, phrases());

        let (tx, mut rx) = mpsc::unbounded_channel();
        source.start(RecognitionSink::new(tx)).unwrap();
        for _ in 0..WINDOW_FRAMES {
            frames_tx.send(vec![16384; 8]).unwrap();
        }

        match rx.recv().await {
            Some(FlowEvent::Transcript(ev)) => {
                assert!(ev.is_final);
                // floor(0.5 * 1000) = 500, 500 mod 4 = 0
                assert_eq!(ev.text, "UPI ACTIVATE");
            }
            other => panic!("unexpected {:?}", other),
        }

        // Capture ending is a resource problem
        drop(frames_tx);
        assert!(matches!(
            rx.recv().await,
            Some(FlowEvent::RecognitionError(RecognitionIssue::Resource(_)))
        ));
        assert!(!source.is_listening());
    }
}
