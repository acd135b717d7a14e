use serde::Serialize;

use crate::config::EngineConfig;

use super::peaks::Peak;

/// Bit widths of the packed hash fields: anchor bin, target bin, frame delta.
const FA_BITS: u32 = 10;
const FB_BITS: u32 = 10;
const DT_BITS: u32 = 12;

/// Largest frame delta the layout can encode.
pub const MAX_PACKED_DT: usize = (1 << DT_BITS) - 1;

/// Layout descriptor recorded in the store header. Any change to the
/// packing below must change this string and the schema version with it.
pub const HASH_LAYOUT: &str = "fa10:fb10:dt12";

/// One fingerprint hash and the frame at which its anchor peak sits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Fingerprint {
    pub hash: u32,
    pub t_anchor: u32,
}

/// How far frequency bins are right-shifted to fit `FA_BITS`. With the
/// default `W = 4096` the spectrum has 2048 bins (11 bits), so one bit of
/// frequency resolution is traded away.
pub fn freq_shift(cfg: &EngineConfig) -> u32 {
    let bins = cfg.freq_bins().max(1) as u32;
    u32::BITS
        .saturating_sub(bins.saturating_sub(1).leading_zeros())
        .saturating_sub(FA_BITS)
}

/// Pack quantized fields into one hash. Injective for inputs within the
/// field widths.
pub fn pack(fa: u32, fb: u32, dt: u32) -> u32 {
    debug_assert!(fa < (1 << FA_BITS));
    debug_assert!(fb < (1 << FB_BITS));
    debug_assert!(dt < (1 << DT_BITS));
    (fa << (FB_BITS + DT_BITS)) | (fb << DT_BITS) | dt
}

/// Invert `pack`.
pub fn unpack(hash: u32) -> (u32, u32, u32) {
    (
        hash >> (FB_BITS + DT_BITS),
        (hash >> DT_BITS) & ((1 << FB_BITS) - 1),
        hash & ((1 << DT_BITS) - 1),
    )
}

/// Pair peaks into fingerprint hashes.
///
/// For each anchor, targets are the first `fan_out` later peaks whose
/// frame delta lies in `[pair_min_dt, pair_max_dt]` and whose bin is
/// within `pair_freq_span`. Peaks arrive sorted by `(t, f)`, so targets
/// are considered in `(t_b, f_b)` order and the emission order is a
/// deterministic function of the constellation map.
pub fn generate_hashes(peaks: &[Peak], cfg: &EngineConfig) -> Vec<Fingerprint> {
    let shift = freq_shift(cfg);
    let mut fingerprints = Vec::new();

    for (i, anchor) in peaks.iter().enumerate() {
        let mut fan_used = 0;

        for target in &peaks[i + 1..] {
            let dt = target.t - anchor.t;
            if dt > cfg.pair_max_dt {
                break;
            }
            if dt < cfg.pair_min_dt {
                continue;
            }
            if anchor.f.abs_diff(target.f) > cfg.pair_freq_span {
                continue;
            }

            let hash = pack(
                (anchor.f as u32) >> shift,
                (target.f as u32) >> shift,
                dt as u32,
            );
            fingerprints.push(Fingerprint {
                hash,
                t_anchor: anchor.t as u32,
            });

            fan_used += 1;
            if fan_used == cfg.fan_out {
                break;
            }
        }
    }

    fingerprints
}
