//! Local offline recognition using Vosk

use super::{AsrResult, EngineOutput, SpeechEngine, MIN_CONFIDENCE};
use crate::audio::SAMPLE_RATE;
use crate::config::Config;
use crate::error::{PayError, PayResult};
use anyhow::Context;
use async_trait::async_trait;
use std::path::Path;
use tracing::{debug, info};
use vosk::{DecodingState, Model, Recognizer};

/// Vosk-based engine with interim results
pub struct VoskEngine {
    recognizer: Recognizer,
    last_partial: String,
}

impl VoskEngine {
    pub fn new(config: &Config) -> PayResult<Self> {
        let model_path = Path::new(&config.vosk_model_path);
        if !model_path.exists() {
            return Err(PayError::Recognition(format!(
                "Vosk model not found at {}",
                model_path.display()
            )));
        }
        let model_str = model_path.to_str().ok_or_else(|| {
            PayError::Config(format!(
                "vosk_model_path is not valid UTF-8: {}",
                model_path.display()
            ))
        })?;

        info!("🧠 Loading Vosk model ({}) from {}", config.language, model_str);
        let model = Model::new(model_str).context("Failed to load Vosk model")?;
        let mut recognizer =
            Recognizer::new(&model, SAMPLE_RATE as f32).context("Failed to create Vosk recognizer")?;
        recognizer.set_words(true);
        recognizer.set_partial_words(false);

        Ok(Self {
            recognizer,
            last_partial: String::new(),
        })
    }

    fn finalize(&mut self) -> EngineOutput {
        self.last_partial.clear();
        let result = self.recognizer.final_result();
        let Some(single) = result.single() else {
            return EngineOutput::Nothing;
        };
        let Some(text) = extract_text(single.text) else {
            return EngineOutput::Nothing;
        };

        let confidence = mean_confidence(single.result.iter().map(|w| w.conf));
        if confidence < MIN_CONFIDENCE {
            info!(
                "🔇 Rejecting low-confidence utterance ({:.2}): '{}'",
                confidence, text
            );
            return EngineOutput::Nothing;
        }
        EngineOutput::Final(AsrResult { text, confidence })
    }
}

#[async_trait]
impl SpeechEngine for VoskEngine {
    async fn accept(&mut self, samples: &[i16]) -> PayResult<EngineOutput> {
        let output = match self.recognizer.accept_waveform(samples) {
            DecodingState::Finalized => self.finalize(),
            DecodingState::Running => {
                match extract_text(self.recognizer.partial_result().partial) {
                    Some(text) if text != self.last_partial => {
                        self.last_partial = text.clone();
                        EngineOutput::Partial(text)
                    }
                    _ => EngineOutput::Nothing,
                }
            }
            DecodingState::Failed => {
                debug!("Vosk could not decode chunk of {} samples", samples.len());
                EngineOutput::Nothing
            }
        };
        Ok(output)
    }

    fn reset(&mut self) {
        self.recognizer.reset();
        self.last_partial.clear();
    }

    fn name(&self) -> &str {
        "vosk"
    }
}

/// Mean word confidence; utterances without word data count as certain
fn mean_confidence(words: impl ExactSizeIterator<Item = f32>) -> f32 {
    let count = words.len();
    if count == 0 {
        return 1.0;
    }
    words.sum::<f32>() / count as f32
}

/// Trimmed text, or `None` when Vosk heard nothing
fn extract_text(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
