use std::f32::consts::PI;

use rayon::prelude::*;
use rustfft::{num_complex::Complex, FftPlanner};

use crate::audio::AudioError;
use crate::config::EngineConfig;

/// Magnitude spectrogram: `frames[t][f]` where `f` indexes bins
/// `1..=W/2` of the FFT (DC dropped), so each frame holds `W/2` values.
pub type Spectrogram = Vec<Vec<f32>>;

/// Compute the magnitude spectrogram of a mono clip.
///
/// Frames of `window_size` samples at `hop_size` intervals, Hann windowed.
/// A trailing partial frame is discarded. Per-frame FFTs run in parallel;
/// the indexed collect keeps frames in time order.
pub fn compute(samples: &[f32], cfg: &EngineConfig) -> Result<Spectrogram, AudioError> {
    let w = cfg.window_size;
    let h = cfg.hop_size;

    if samples.len() < w {
        return Err(AudioError::EmptyAudio);
    }

    let frame_count = (samples.len() - w) / h + 1;
    let window = hann_window(w);

    let mut planner = FftPlanner::<f32>::new();
    let fft = planner.plan_fft_forward(w);

    let spectra: Spectrogram = (0..frame_count)
        .into_par_iter()
        .map(|t| {
            let start = t * h;
            let mut buffer: Vec<Complex<f32>> = samples[start..start + w]
                .iter()
                .zip(window.iter())
                .map(|(&s, &win)| Complex { re: s * win, im: 0.0 })
                .collect();

            fft.process(&mut buffer);

            // Bins 1..=W/2; bin 0 (DC) carries no positional information.
            buffer[1..=w / 2]
                .iter()
                .map(|c| (c.re * c.re + c.im * c.im).sqrt())
                .collect()
        })
        .collect();

    Ok(spectra)
}

fn hann_window(size: usize) -> Vec<f32> {
    let n = size as f32;
    (0..size)
        .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f32 / (n - 1.0)).cos()))
        .collect()
}
