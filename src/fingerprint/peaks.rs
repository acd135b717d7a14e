use crate::config::EngineConfig;

use super::spectrogram::Spectrogram;

/// Half-width of the time window for the running mean magnitude, in frames.
const LOCAL_MEAN_RADIUS: usize = 30;

/// Quantization of log-magnitudes for neighborhood comparison, in steps of
/// 0.5 dB: `round(20·log10(m) · 2)`.
const QUANT_STEPS_PER_LN: f32 = 40.0 / std::f32::consts::LN_10;

/// Comparison key for the local-maximum test. Raw float magnitudes carry
/// rounding jitter that breaks up the flat ridge of a steady tone into a
/// handful of arbitrary argmax points; comparing on coarse log steps makes
/// such a ridge an exact plateau, every point of which still beats its
/// off-ridge neighbors.
fn quantize(mag: f32) -> i32 {
    (mag.max(1e-12).ln() * QUANT_STEPS_PER_LN).round() as i32
}

/// One spectrogram peak: a time-frequency point that is a local maximum
/// and clears the dynamic magnitude threshold.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Peak {
    /// Frame index.
    pub t: usize,
    /// Frequency bin index (DC-dropped spectrum, `0..W/2`).
    pub f: usize,
    pub magnitude: f32,
}

/// Extract the constellation map from a spectrogram.
///
/// A point qualifies when its quantized log-magnitude is at least as large
/// as every neighbor within `(peak_time_radius, peak_freq_radius)`,
/// strictly larger than at least one of them, and its raw magnitude clears
/// `max(peak_floor, ratio · local mean)`. If the map is denser than
/// `target_density` peaks per second, the weakest peaks are shed. Output
/// is sorted by `(t, f)`, deterministically.
pub fn find_peaks(spec: &Spectrogram, cfg: &EngineConfig) -> Vec<Peak> {
    if spec.is_empty() {
        return Vec::new();
    }

    let frames = spec.len();
    let bins = spec[0].len();
    let means = local_means(spec);

    let qspec: Vec<Vec<i32>> = spec
        .iter()
        .map(|frame| frame.iter().map(|&m| quantize(m)).collect())
        .collect();

    let dt = cfg.peak_time_radius;
    let df = cfg.peak_freq_radius;

    let mut peaks = Vec::new();

    for t in 0..frames {
        let threshold = (cfg.peak_threshold_ratio * means[t]).max(cfg.peak_floor);

        for f in 0..bins {
            let mag = spec[t][f];
            if mag < threshold {
                continue;
            }
            let q = qspec[t][f];

            let t_lo = t.saturating_sub(dt);
            let t_hi = (t + dt).min(frames - 1);
            let f_lo = f.saturating_sub(df);
            let f_hi = (f + df).min(bins - 1);

            let mut is_peak = true;
            let mut beats_one = false;
            'scan: for tn in t_lo..=t_hi {
                for fn_ in f_lo..=f_hi {
                    if tn == t && fn_ == f {
                        continue;
                    }
                    let other = qspec[tn][fn_];
                    if other > q {
                        is_peak = false;
                        break 'scan;
                    }
                    if q > other {
                        beats_one = true;
                    }
                }
            }

            // A fully flat plateau has no strict winner and yields no peak.
            if is_peak && beats_one {
                peaks.push(Peak {
                    t,
                    f,
                    magnitude: mag,
                });
            }
        }
    }

    enforce_density(&mut peaks, frames, cfg);
    peaks
}

/// Mean magnitude per frame over all bins within `±LOCAL_MEAN_RADIUS`
/// frames, used as the noise-floor estimate for thresholding.
fn local_means(spec: &Spectrogram) -> Vec<f32> {
    let frames = spec.len();
    let bins = spec[0].len().max(1);

    let frame_sums: Vec<f64> = spec
        .iter()
        .map(|frame| frame.iter().map(|&m| m as f64).sum())
        .collect();

    let mut prefix = vec![0.0f64; frames + 1];
    for t in 0..frames {
        prefix[t + 1] = prefix[t] + frame_sums[t];
    }

    (0..frames)
        .map(|t| {
            let lo = t.saturating_sub(LOCAL_MEAN_RADIUS);
            let hi = (t + LOCAL_MEAN_RADIUS).min(frames - 1);
            let window = (hi - lo + 1) as f64;
            ((prefix[hi + 1] - prefix[lo]) / (window * bins as f64)) as f32
        })
        .collect()
}

/// Cap the map at `target_density` peaks per second, keeping the strongest.
/// Ties keep the earlier `(t, f)` so the result is input-deterministic.
fn enforce_density(peaks: &mut Vec<Peak>, frames: usize, cfg: &EngineConfig) {
    let seconds = frames as f32 * cfg.hop_size as f32 / cfg.sample_rate as f32;
    let max_peaks = (cfg.target_density * seconds).ceil().max(1.0) as usize;
    if peaks.len() <= max_peaks {
        return;
    }

    peaks.sort_by(|a, b| {
        b.magnitude
            .total_cmp(&a.magnitude)
            .then(a.t.cmp(&b.t))
            .then(a.f.cmp(&b.f))
    });
    peaks.truncate(max_peaks);
    peaks.sort_by(|a, b| a.t.cmp(&b.t).then(a.f.cmp(&b.f)));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(frames: usize, bins: usize, fill: f32) -> Spectrogram {
        vec![vec![fill; bins]; frames]
    }

    #[test]
    fn test_single_spike_is_found() {
        let cfg = EngineConfig::default();
        let mut spec = grid(40, 64, 0.1);
        spec[20][30] = 50.0;
        let peaks = find_peaks(&spec, &cfg);
        assert_eq!(peaks.len(), 1);
        assert_eq!((peaks[0].t, peaks[0].f), (20, 30));
    }

    #[test]
    fn test_silence_yields_nothing() {
        let cfg = EngineConfig::default();
        let spec = grid(40, 64, 0.0);
        assert!(find_peaks(&spec, &cfg).is_empty());
    }

    #[test]
    fn test_flat_plateau_is_rejected() {
        // Everything equal and above the threshold: no strict winner anywhere.
        let mut cfg = EngineConfig::default();
        cfg.peak_threshold_ratio = 0.5;
        let spec = grid(40, 64, 5.0);
        assert!(find_peaks(&spec, &cfg).is_empty());
    }

    #[test]
    fn test_neighbor_suppression() {
        let cfg = EngineConfig::default();
        let mut spec = grid(40, 64, 0.1);
        // Two spikes within one neighborhood: only the larger survives.
        spec[20][30] = 50.0;
        spec[22][32] = 40.0;
        let peaks = find_peaks(&spec, &cfg);
        assert_eq!(peaks.len(), 1);
        assert_eq!((peaks[0].t, peaks[0].f), (20, 30));
    }

    #[test]
    fn test_distant_spikes_both_survive() {
        let cfg = EngineConfig::default();
        let mut spec = grid(80, 64, 0.1);
        spec[10][10] = 50.0;
        spec[50][40] = 60.0;
        let peaks = find_peaks(&spec, &cfg);
        assert_eq!(peaks.len(), 2);
    }

    #[test]
    fn test_output_sorted_by_time_then_bin() {
        let cfg = EngineConfig::default();
        let mut spec = grid(100, 128, 0.1);
        spec[70][5] = 50.0;
        spec[10][100] = 50.0;
        spec[10][8] = 50.0;
        let peaks = find_peaks(&spec, &cfg);
        let coords: Vec<(usize, usize)> = peaks.iter().map(|p| (p.t, p.f)).collect();
        assert_eq!(coords, vec![(10, 8), (10, 100), (70, 5)]);
    }

    #[test]
    fn test_density_cap_keeps_strongest() {
        let mut cfg = EngineConfig::default();
        cfg.target_density = 1.0;
        cfg.peak_time_radius = 1;
        cfg.peak_freq_radius = 1;

        // 11 frames ≈ 2.04 s at the default hop → cap of 3 peaks.
        let mut spec = grid(11, 64, 0.0);
        spec[1][5] = 10.0;
        spec[3][20] = 30.0;
        spec[5][40] = 20.0;
        spec[7][10] = 40.0;
        spec[9][50] = 25.0;

        let peaks = find_peaks(&spec, &cfg);
        assert_eq!(peaks.len(), 3);
        // Strongest three, back in (t, f) order.
        let coords: Vec<(usize, usize)> = peaks.iter().map(|p| (p.t, p.f)).collect();
        assert_eq!(coords, vec![(3, 20), (7, 10), (9, 50)]);
    }
}
