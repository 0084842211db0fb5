//! Microphone frames and level estimation
//!
//! Capture is behind the `AudioTap` trait so recognition sources can be fed
//! from a real device or from scripted frames in tests.

use crate::error::PayResult;
use tokio::sync::mpsc;

pub const SAMPLE_RATE: u32 = 16000;
pub const CHUNK_SIZE: usize = 1024;

/// Something that produces 16 kHz mono i16 frames
pub trait AudioTap: Send + Sync {
    /// Start a capture; frames stop when the receiver is dropped
    fn open(&self) -> PayResult<mpsc::UnboundedReceiver<Vec<i16>>>;

    fn name(&self) -> &str;
}

/// Calculate audio energy for VAD
pub fn calculate_energy(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum: i64 = samples.iter().map(|&s| (s as i64).pow(2)).sum();
    (sum as f32 / samples.len() as f32).sqrt()
}

/// Mean absolute amplitude scaled to 0.0..=1.0
pub fn calculate_level(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum: i64 = samples.iter().map(|&s| (s as i64).abs()).sum();
    (sum as f32 / samples.len() as f32) / 32768.0
}

/// Whether a capture device can be opened in this build
pub fn microphone_available() -> bool {
    #[cfg(feature = "microphone")]
    {
        use cpal::traits::HostTrait;
        cpal::default_host().default_input_device().is_some()
    }
    #[cfg(not(feature = "microphone"))]
    {
        false
    }
}

/// Default capture for this build, if any
pub fn default_tap() -> Option<std::sync::Arc<dyn AudioTap>> {
    #[cfg(feature = "microphone")]
    {
        if microphone_available() {
            return Some(std::sync::Arc::new(microphone::MicrophoneTap::new(None)));
        }
    }
    None
}

#[cfg(feature = "microphone")]
pub mod microphone {
    use super::{AudioTap, CHUNK_SIZE, SAMPLE_RATE};
    use crate::error::{PayError, PayResult};
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tracing::{debug, info, warn};

    /// Live capture via cpal
    ///
    /// cpal streams are not `Send`, so each capture owns a thread that holds
    /// the stream until the frame receiver goes away.
    pub struct MicrophoneTap {
        device_index: Option<usize>,
    }

    impl MicrophoneTap {
        pub fn new(device_index: Option<usize>) -> Self {
            Self { device_index }
        }
    }

    fn build_stream(
        device_index: Option<usize>,
        tx: mpsc::UnboundedSender<Vec<i16>>,
    ) -> PayResult<cpal::Stream> {
        let host = cpal::default_host();
        let device = match device_index {
            Some(idx) => host
                .input_devices()
                .map_err(|e| PayError::Audio(e.to_string()))?
                .nth(idx)
                .ok_or_else(|| PayError::Audio("Device index out of range".into()))?,
            None => host
                .default_input_device()
                .ok_or_else(|| PayError::Audio("No default input device".into()))?,
        };

        let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        info!("🎙️ Using audio device: {}", device_name);

        let config = cpal::StreamConfig {
            channels: 1,
            sample_rate: cpal::SampleRate(SAMPLE_RATE),
            buffer_size: cpal::BufferSize::Fixed(CHUNK_SIZE as u32),
        };

        let stream = device
            .build_input_stream(
                &config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    let _ = tx.send(data.to_vec());
                },
                |err| {
                    warn!("Audio stream error: {}", err);
                },
                None,
            )
            .map_err(|e| PayError::Audio(e.to_string()))?;
        stream.play().map_err(|e| PayError::Audio(e.to_string()))?;
        Ok(stream)
    }

    impl AudioTap for MicrophoneTap {
        fn open(&self) -> PayResult<mpsc::UnboundedReceiver<Vec<i16>>> {
            let (tx, rx) = mpsc::unbounded_channel();
            let (ready_tx, ready_rx) = std::sync::mpsc::channel();
            let device_index = self.device_index;

            std::thread::spawn(move || {
                let watch = tx.clone();
                match build_stream(device_index, tx) {
                    Ok(stream) => {
                        let _ = ready_tx.send(Ok(()));
                        while !watch.is_closed() {
                            std::thread::sleep(Duration::from_millis(100));
                        }
                        drop(stream);
                        debug!("Microphone capture closed");
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                    }
                }
            });

            match ready_rx.recv() {
                Ok(Ok(())) => Ok(rx),
                Ok(Err(e)) => Err(e),
                Err(_) => Err(PayError::Audio("capture thread exited".into())),
            }
        }

        fn name(&self) -> &str {
            "microphone"
        }
    }
}
