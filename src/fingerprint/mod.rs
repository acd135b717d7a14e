pub mod hashing;
pub mod peaks;
pub mod spectrogram;

pub use hashing::Fingerprint;

use crate::audio::{AudioClip, AudioError};
use crate::config::EngineConfig;

/// Run the full extraction pipeline on canonical-rate mono PCM:
/// spectrogram → constellation map → paired hashes.
///
/// The result is a deterministic function of the samples and the config;
/// hashes come out ordered by anchor frame.
pub fn fingerprint_samples(
    samples: &[f32],
    cfg: &EngineConfig,
) -> Result<Vec<Fingerprint>, AudioError> {
    let spec = spectrogram::compute(samples, cfg)?;
    let peaks = peaks::find_peaks(&spec, cfg);
    let hashes = hashing::generate_hashes(&peaks, cfg);

    log::debug!(
        "Extracted {} frames, {} peaks, {} hashes",
        spec.len(),
        peaks.len(),
        hashes.len()
    );

    Ok(hashes)
}

/// Convenience wrapper for a decoded clip.
pub fn fingerprint_clip(clip: &AudioClip, cfg: &EngineConfig) -> Result<Vec<Fingerprint>, AudioError> {
    fingerprint_samples(&clip.samples, cfg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    /// A little four-note motif; rich enough to produce a real constellation.
    fn melody(seconds: f32, fs: u32) -> Vec<f32> {
        let notes = [440.0f32, 554.37, 659.25, 880.0];
        let total = (seconds * fs as f32) as usize;
        (0..total)
            .map(|i| {
                let t = i as f32 / fs as f32;
                let note = notes[(t * 4.0) as usize % notes.len()];
                0.5 * (2.0 * PI * note * t).sin() + 0.25 * (2.0 * PI * note * 2.0 * t).sin()
            })
            .collect()
    }

    #[test]
    fn test_pipeline_produces_hashes() {
        let cfg = EngineConfig::default();
        let samples = melody(5.0, cfg.sample_rate);
        let hashes = fingerprint_samples(&samples, &cfg).unwrap();
        assert!(
            hashes.len() >= cfg.min_votes,
            "only {} hashes from a 5s melody",
            hashes.len()
        );
    }

    #[test]
    fn test_pipeline_is_deterministic() {
        let cfg = EngineConfig::default();
        let samples = melody(3.0, cfg.sample_rate);
        let a = fingerprint_samples(&samples, &cfg).unwrap();
        let b = fingerprint_samples(&samples, &cfg).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_anchor_order_is_non_decreasing() {
        let cfg = EngineConfig::default();
        let samples = melody(4.0, cfg.sample_rate);
        let hashes = fingerprint_samples(&samples, &cfg).unwrap();
        assert!(hashes.windows(2).all(|w| w[0].t_anchor <= w[1].t_anchor));
    }

    #[test]
    fn test_short_input_is_empty_audio() {
        let cfg = EngineConfig::default();
        let samples = vec![0.5f32; cfg.window_size / 2];
        assert!(matches!(
            fingerprint_samples(&samples, &cfg),
            Err(AudioError::EmptyAudio)
        ));
    }

    #[test]
    fn test_silence_yields_zero_hashes() {
        let cfg = EngineConfig::default();
        let samples = vec![0.0f32; cfg.sample_rate as usize * 3];
        let hashes = fingerprint_samples(&samples, &cfg).unwrap();
        assert!(hashes.is_empty());
    }
}
