use std::sync::{Arc, Mutex};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::SampleFormat;

use super::{AudioError, RawAudio};

/// Record from the default input device for `seconds`, returning the raw
/// interleaved PCM at whatever rate and channel count the device uses.
pub fn record_default_input(seconds: u64) -> Result<RawAudio, AudioError> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| AudioError::Capture("no default input device".into()))?;

    let supported = device
        .default_input_config()
        .map_err(|e| AudioError::Capture(e.to_string()))?;
    let sample_format = supported.sample_format();
    let config: cpal::StreamConfig = supported.into();
    let sample_rate = config.sample_rate.0;
    let channels = config.channels as usize;

    log::info!(
        "Recording {}s from {} ({} Hz, {} ch)",
        seconds,
        device.name().unwrap_or_else(|_| "unknown device".into()),
        sample_rate,
        channels
    );

    let buffer: Arc<Mutex<Vec<f32>>> = Arc::new(Mutex::new(Vec::new()));
    let err_fn = |e| log::error!("input stream error: {e}");

    let stream = match sample_format {
        SampleFormat::F32 => {
            let sink = Arc::clone(&buffer);
            device.build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    sink.lock().unwrap().extend_from_slice(data);
                },
                err_fn,
                None,
            )
        }
        SampleFormat::I16 => {
            let sink = Arc::clone(&buffer);
            device.build_input_stream(
                &config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    let mut sink = sink.lock().unwrap();
                    sink.extend(data.iter().map(|&s| s as f32 / 32_768.0));
                },
                err_fn,
                None,
            )
        }
        SampleFormat::U16 => {
            let sink = Arc::clone(&buffer);
            device.build_input_stream(
                &config,
                move |data: &[u16], _: &cpal::InputCallbackInfo| {
                    let mut sink = sink.lock().unwrap();
                    sink.extend(data.iter().map(|&s| (s as f32 - 32_768.0) / 32_768.0));
                },
                err_fn,
                None,
            )
        }
        other => {
            return Err(AudioError::Capture(format!(
                "unsupported input sample format {other:?}"
            )))
        }
    }
    .map_err(|e| AudioError::Capture(e.to_string()))?;

    stream
        .play()
        .map_err(|e| AudioError::Capture(e.to_string()))?;
    std::thread::sleep(Duration::from_secs(seconds));
    drop(stream);

    let samples = Arc::try_unwrap(buffer)
        .map(|m| m.into_inner().unwrap_or_default())
        .unwrap_or_else(|arc| arc.lock().unwrap().clone());

    if samples.is_empty() {
        return Err(AudioError::Capture("captured no samples".into()));
    }

    Ok(RawAudio {
        samples,
        sample_rate,
        channels,
    })
}
