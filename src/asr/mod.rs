//! Speech engines behind the native recognition source
//!
//! - Vosk: local offline recognition (cargo feature `vosk`)
//! - Wyoming: remote ASR protocol (e.g., faster-whisper)

#[cfg(feature = "vosk")]
pub mod vosk;
pub mod wyoming;

use crate::config::Config;
use crate::error::{PayError, PayResult};
use async_trait::async_trait;

#[cfg(feature = "vosk")]
pub use self::vosk::VoskEngine;
pub use wyoming::{WyomingClient, WyomingEngine};

/// Result from ASR with confidence score
#[derive(Debug, Clone, PartialEq)]
pub struct AsrResult {
    pub text: String,
    pub confidence: f32,
}

/// Minimum confidence for an engine to report a final result
pub const MIN_CONFIDENCE: f32 = 0.5;

/// What an engine made of the latest frames
#[derive(Debug, Clone, PartialEq)]
pub enum EngineOutput {
    Nothing,
    Partial(String),
    Final(AsrResult),
}

/// Streaming speech-to-text engine
#[async_trait]
pub trait SpeechEngine: Send {
    async fn accept(&mut self, samples: &[i16]) -> PayResult<EngineOutput>;

    /// Drop any half-heard utterance
    fn reset(&mut self);

    fn name(&self) -> &str;
}

/// Build the configured engine and confirm it is reachable
pub async fn create_engine(config: &Config) -> PayResult<Box<dyn SpeechEngine>> {
    match config.asr_engine.to_lowercase().as_str() {
        "wyoming" => {
            let client = WyomingClient::new(&config.wyoming_host, config.wyoming_port);
            if !client.health_check().await {
                return Err(PayError::Recognition(format!(
                    "Wyoming server not reachable at {}:{}",
                    config.wyoming_host, config.wyoming_port
                )));
            }
            Ok(Box::new(WyomingEngine::new(client)))
        }
        #[cfg(feature = "vosk")]
        "vosk" => Ok(Box::new(VoskEngine::new(config)?)),
        other => Err(PayError::Recognition(format!(
            "speech engine '{}' is not available in this build",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unknown_engine_is_recognition_error() {
        let mut config = Config::default();
        config.asr_engine = "nonsense".to_string();
        assert!(matches!(
            create_engine(&config).await,
            Err(PayError::Recognition(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_wyoming_is_recognition_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut config = Config::default();
        config.asr_engine = "wyoming".to_string();
        config.wyoming_host = "127.0.0.1".to_string();
        config.wyoming_port = port;
        assert!(create_engine(&config).await.is_err());
    }
}
