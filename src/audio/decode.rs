use std::fs::File;
use std::path::Path;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use super::{AudioError, RawAudio};

/// Decode an audio file into interleaved f32 PCM at its native rate.
///
/// Symphonia probes the container, so one path handles every format we
/// support. Corrupt packets inside an otherwise readable stream are
/// skipped; a stream that yields no samples at all is `EmptyAudio`.
pub fn decode_file(path: &Path) -> Result<RawAudio, AudioError> {
    log::debug!("Decoding {}", path.display());

    let file = File::open(path)?;
    let stream = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            stream,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| AudioError::InvalidAudio(format!("{}: {}", path.display(), e)))?;
    let mut format = probed.format;

    let track = format
        .default_track()
        .ok_or_else(|| AudioError::InvalidAudio(format!("{}: no audio track", path.display())))?;
    let track_id = track.id;

    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| AudioError::InvalidAudio(format!("{}: unknown sample rate", path.display())))?;
    let channels = track
        .codec_params
        .channels
        .map(|c| c.count())
        .unwrap_or(0);
    if channels == 0 {
        return Err(AudioError::InvalidAudio(format!(
            "{}: zero audio channels",
            path.display()
        )));
    }

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| AudioError::InvalidAudio(format!("{}: {}", path.display(), e)))?;

    let mut samples: Vec<f32> = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            // End of stream; symphonia surfaces it as an IO error.
            Err(SymphoniaError::IoError(_)) => break,
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => {
                return Err(AudioError::InvalidAudio(format!(
                    "{}: {}",
                    path.display(),
                    e
                )))
            }
        };

        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let mut buf =
                    SampleBuffer::<f32>::new(decoded.capacity() as u64, *decoded.spec());
                buf.copy_interleaved_ref(decoded);
                samples.extend_from_slice(buf.samples());
            }
            Err(SymphoniaError::DecodeError(e)) => {
                log::debug!("Skipping corrupt packet in {}: {}", path.display(), e);
            }
            Err(e) => {
                return Err(AudioError::InvalidAudio(format!(
                    "{}: {}",
                    path.display(),
                    e
                )))
            }
        }
    }

    if samples.is_empty() {
        return Err(AudioError::EmptyAudio);
    }

    log::debug!(
        "Decoded {} samples at {} Hz, {} channel(s)",
        samples.len(),
        sample_rate,
        channels
    );

    Ok(RawAudio {
        samples,
        sample_rate,
        channels,
    })
}
