use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

use super::{AudioClip, AudioError, RawAudio};

/// Input chunk size for the sinc resampler. Fixed so the output is a
/// deterministic function of the sample stream alone.
const CHUNK_SIZE: usize = 1024;

/// Downmix to mono and resample to the canonical rate.
pub fn to_canonical(raw: &RawAudio, target_rate: u32) -> Result<AudioClip, AudioError> {
    let mono = downmix(&raw.samples, raw.channels)?;

    let samples = if raw.sample_rate == target_rate {
        mono
    } else {
        log::debug!(
            "Resampling {} Hz -> {} Hz ({} samples)",
            raw.sample_rate,
            target_rate,
            mono.len()
        );
        resample(&mono, raw.sample_rate, target_rate)?
    };

    Ok(AudioClip {
        samples,
        sample_rate: target_rate,
    })
}

/// Average interleaved channels into one.
pub fn downmix(samples: &[f32], channels: usize) -> Result<Vec<f32>, AudioError> {
    match channels {
        0 => Err(AudioError::InvalidAudio("zero audio channels".into())),
        1 => Ok(samples.to_vec()),
        n => Ok(samples
            .chunks_exact(n)
            .map(|frame| frame.iter().sum::<f32>() / n as f32)
            .collect()),
    }
}

/// Band-limited sinc resampling of a mono stream.
///
/// 128-tap sinc with a Blackman-Harris window keeps the stop-band above
/// 60 dB. Chunks are processed sequentially through one stateful filter,
/// so the result does not depend on how the input was buffered upstream.
fn resample(input: &[f32], input_rate: u32, output_rate: u32) -> Result<Vec<f32>, AudioError> {
    let params = SincInterpolationParameters {
        sinc_len: 128,
        f_cutoff: 0.95,
        oversampling_factor: 128,
        interpolation: SincInterpolationType::Linear,
        window: WindowFunction::BlackmanHarris2,
    };

    let mut resampler = SincFixedIn::<f32>::new(
        output_rate as f64 / input_rate as f64,
        2.0,
        params,
        CHUNK_SIZE,
        1,
    )
    .map_err(|e| AudioError::InvalidAudio(format!("resampler setup: {e}")))?;

    let expected = (input.len() as u64 * output_rate as u64 / input_rate as u64) as usize;
    let mut output = Vec::with_capacity(expected + CHUNK_SIZE);

    let mut chunks = input.chunks_exact(CHUNK_SIZE);
    for chunk in &mut chunks {
        let frames = resampler
            .process(&[chunk], None)
            .map_err(|e| AudioError::InvalidAudio(format!("resampling failed: {e}")))?;
        output.extend_from_slice(&frames[0]);
    }

    let tail = chunks.remainder();
    if !tail.is_empty() {
        let frames = resampler
            .process_partial(Some(&[tail]), None)
            .map_err(|e| AudioError::InvalidAudio(format!("resampling failed: {e}")))?;
        output.extend_from_slice(&frames[0]);
    }

    Ok(output)
}
