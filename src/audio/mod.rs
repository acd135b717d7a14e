pub mod capture;
pub mod decode;
pub mod resample;

use std::path::Path;

use thiserror::Error;

use crate::config::EngineConfig;

#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Unreadable audio: {0}")]
    InvalidAudio(String),
    #[error("Audio too short to produce a single frame")]
    EmptyAudio,
    #[error("Audio capture error: {0}")]
    Capture(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Decoded PCM as it came out of the container: interleaved samples at the
/// source rate and channel count.
#[derive(Debug, Clone)]
pub struct RawAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: usize,
}

/// Mono PCM at the canonical fingerprinting rate.
#[derive(Debug, Clone)]
pub struct AudioClip {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl AudioClip {
    pub fn duration_ms(&self) -> i64 {
        if self.sample_rate == 0 {
            return 0;
        }
        self.samples.len() as i64 * 1000 / self.sample_rate as i64
    }
}

/// Decode a file and bring it to the canonical rate in one step.
pub fn load_clip(path: &Path, cfg: &EngineConfig) -> Result<AudioClip, AudioError> {
    let raw = decode::decode_file(path)?;
    resample::to_canonical(&raw, cfg.sample_rate)
}
