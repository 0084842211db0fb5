//! Wyoming Protocol Engine
//!
//! Wyoming is a simple protocol where events are JSON lines over TCP.
//! Frames are buffered locally and each utterance (speech followed by a run
//! of quiet chunks) is sent to the server as one audio stream.
//!
//! Reference: https://github.com/rhasspy/wyoming

use super::{AsrResult, EngineOutput, SpeechEngine};
use crate::audio::{calculate_energy, SAMPLE_RATE};
use crate::error::PayResult;
use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

/// RMS above which a chunk counts as speech
const SPEECH_ENERGY: f32 = 500.0;
/// Quiet chunks that close an utterance
const TRAILING_SILENCE_CHUNKS: usize = 8;
/// Upper bound on one utterance (~15 s at 16 kHz)
const MAX_UTTERANCE_SAMPLES: usize = SAMPLE_RATE as usize * 15;
/// The server reports no score; transcripts get this fixed confidence
const WYOMING_CONFIDENCE: f32 = 0.9;
const TRANSCRIPT_TIMEOUT: Duration = Duration::from_secs(30);

/// Wyoming event types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum WyomingEvent {
    #[serde(rename = "describe")]
    Describe,

    #[serde(rename = "info")]
    Info(InfoData),

    #[serde(rename = "audio-start")]
    AudioStart(AudioFormat),

    #[serde(rename = "audio-chunk")]
    AudioChunk(AudioChunkData),

    #[serde(rename = "audio-stop")]
    AudioStop,

    #[serde(rename = "transcript")]
    Transcript(TranscriptData),
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct InfoData {
    #[serde(default)]
    pub asr: Vec<AsrInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AsrInfo {
    pub name: String,
    #[serde(default)]
    pub languages: Vec<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AudioFormat {
    pub rate: u32,
    pub width: u8,
    pub channels: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioChunkData {
    pub rate: u32,
    pub width: u8,
    pub channels: u8,
    #[serde(with = "base64_bytes")]
    pub audio: Vec<u8>,
    #[serde(default)]
    pub timestamp: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptData {
    pub text: String,
}

/// Base64 serialization for audio bytes
mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}

async fn send_event(writer: &mut OwnedWriteHalf, event: &WyomingEvent) -> anyhow::Result<()> {
    let line = serde_json::to_string(event)?;
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    Ok(())
}

/// Wyoming client for ASR services
#[derive(Debug, Clone)]
pub struct WyomingClient {
    host: String,
    port: u16,
    format: AudioFormat,
}

impl WyomingClient {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            host: host.to_string(),
            port,
            format: AudioFormat {
                rate: SAMPLE_RATE,
                width: 2,
                channels: 1,
            },
        }
    }

    /// Check if the server is available
    pub async fn health_check(&self) -> bool {
        match TcpStream::connect((&*self.host, self.port)).await {
            Ok(_) => {
                debug!("Wyoming server available at {}:{}", self.host, self.port);
                true
            }
            Err(e) => {
                warn!("Wyoming server not available: {}", e);
                false
            }
        }
    }

    /// Send one utterance and wait for its transcript
    pub async fn transcribe(&self, samples: &[i16]) -> anyhow::Result<String> {
        let stream = TcpStream::connect((&*self.host, self.port))
            .await
            .context("Failed to connect to Wyoming server")?;

        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);

        send_event(&mut writer, &WyomingEvent::Describe).await?;
        writer.flush().await?;

        let mut line = String::new();
        reader.read_line(&mut line).await?;
        debug!("Wyoming handshake: {}", line.trim());

        let audio: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        send_event(&mut writer, &WyomingEvent::AudioStart(self.format)).await?;
        send_event(
            &mut writer,
            &WyomingEvent::AudioChunk(AudioChunkData {
                rate: self.format.rate,
                width: self.format.width,
                channels: self.format.channels,
                audio,
                timestamp: 0,
            }),
        )
        .await?;
        send_event(&mut writer, &WyomingEvent::AudioStop).await?;
        writer.flush().await?;

        debug!("Sent {} samples, waiting for transcript...", samples.len());

        let transcript = tokio::time::timeout(TRANSCRIPT_TIMEOUT, async {
            loop {
                let mut line = String::new();
                if reader.read_line(&mut line).await? == 0 {
                    break;
                }
                if let Ok(WyomingEvent::Transcript(data)) = serde_json::from_str(&line) {
                    return Ok::<_, anyhow::Error>(data.text);
                }
            }
            Ok(String::new())
        })
        .await
        .context("Timeout waiting for transcript")??;

        info!("📝 Wyoming transcript: '{}'", transcript);
        Ok(transcript)
    }
}

/// Streaming adapter: energy-gated buffering in front of `WyomingClient`
pub struct WyomingEngine {
    client: WyomingClient,
    buffer: Vec<i16>,
    in_speech: bool,
    quiet_chunks: usize,
}

impl WyomingEngine {
    pub fn new(client: WyomingClient) -> Self {
        Self {
            client,
            buffer: Vec::new(),
            in_speech: false,
            quiet_chunks: 0,
        }
    }

    /// Feed one chunk; returns a finished utterance when one closes
    fn segment(&mut self, samples: &[i16]) -> Option<Vec<i16>> {
        let loud = calculate_energy(samples) > SPEECH_ENERGY;

        if !self.in_speech {
            if !loud {
                return None;
            }
            self.in_speech = true;
            self.quiet_chunks = 0;
        }

        self.buffer.extend_from_slice(samples);
        if loud {
            self.quiet_chunks = 0;
        } else {
            self.quiet_chunks += 1;
        }

        if self.quiet_chunks >= TRAILING_SILENCE_CHUNKS
            || self.buffer.len() >= MAX_UTTERANCE_SAMPLES
        {
            self.in_speech = false;
            self.quiet_chunks = 0;
            return Some(std::mem::take(&mut self.buffer));
        }
        None
    }
}

#[async_trait]
impl SpeechEngine for WyomingEngine {
    async fn accept(&mut self, samples: &[i16]) -> PayResult<EngineOutput> {
        let Some(utterance) = self.segment(samples) else {
            return Ok(EngineOutput::Nothing);
        };

        let text = self.client.transcribe(&utterance).await?;
        let text = text.trim();
        if text.is_empty() {
            return Ok(EngineOutput::Nothing);
        }
        Ok(EngineOutput::Final(AsrResult {
            text: text.to_string(),
            confidence: WYOMING_CONFIDENCE,
        }))
    }

    fn reset(&mut self) {
        self.buffer.clear();
        self.in_speech = false;
        self.quiet_chunks = 0;
    }

    fn name(&self) -> &str {
        "wyoming"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn test_event_wire_format() {
        let describe = serde_json::to_value(&WyomingEvent::Describe).unwrap();
        assert_eq!(describe["type"], "describe");

        let start = serde_json::to_value(&WyomingEvent::AudioStart(AudioFormat {
            rate: 16000,
            width: 2,
            channels: 1,
        }))
        .unwrap();
        assert_eq!(start["type"], "audio-start");
        assert_eq!(start["data"]["rate"], 16000);

        let event: WyomingEvent =
            serde_json::from_str(r#"{"type":"transcript","data":{"text":"scan qr"}}"#).unwrap();
        assert!(matches!(event, WyomingEvent::Transcript(t) if t.text == "scan qr"));
    }

    #[test]
    fn test_segmentation_closes_after_trailing_silence() {
        let mut engine = WyomingEngine::new(WyomingClient::new("127.0.0.1", 1));
        let loud = vec![4000i16; 1024];
        let quiet = vec![0i16; 1024];

        assert!(engine.segment(&quiet).is_none());
        assert!(engine.segment(&loud).is_none());
        for _ in 0..TRAILING_SILENCE_CHUNKS - 1 {
            assert!(engine.segment(&quiet).is_none());
        }
        let utterance = engine.segment(&quiet).unwrap();
        assert_eq!(utterance.len(), 1024 * (1 + TRAILING_SILENCE_CHUNKS));

        // Leading silence is not buffered
        assert!(engine.segment(&quiet).is_none());
        assert!(engine.buffer.is_empty());
    }

    #[tokio::test]
    async fn test_transcribe_against_fake_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let (reader, mut writer) = socket.into_split();
            let mut lines = BufReader::new(reader).lines();

            let describe = lines.next_line().await.unwrap().unwrap();
            assert!(describe.contains("describe"));
            writer
                .write_all(b"{\"type\":\"info\",\"data\":{\"asr\":[]}}\n")
                .await
                .unwrap();

            let mut seen = Vec::new();
            while let Some(line) = lines.next_line().await.unwrap() {
                let stop = line.contains("audio-stop");
                seen.push(line);
                if stop {
                    break;
                }
            }
            writer
                .write_all(b"{\"type\":\"transcript\",\"data\":{\"text\":\"two hundred rupees\"}}\n")
                .await
                .unwrap();
            seen
        });

        let client = WyomingClient::new("127.0.0.1", port);
        let text = client.transcribe(&[1, 2, 3]).await.unwrap();
        assert_eq!(text, "two hundred rupees");

        let seen = server.await.unwrap();
        assert_eq!(seen.len(), 3);
        assert!(seen[1].contains("audio-chunk"));
    }
}
