use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Fingerprint extraction and matching parameters.
///
/// Everything here except the match-acceptance knobs is part of the
/// fingerprint schema: two stores interoperate only if the values that
/// shape hashes agree. The store header records them on creation and
/// `Database::open` refuses a mismatch.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Canonical sample rate in Hz. All audio is resampled to this before
    /// fingerprinting.
    pub sample_rate: u32,
    /// FFT window size in samples.
    pub window_size: usize,
    /// Hop between consecutive frames in samples.
    pub hop_size: usize,
    /// Peak neighborhood half-width in frames.
    pub peak_time_radius: usize,
    /// Peak neighborhood half-width in frequency bins.
    pub peak_freq_radius: usize,
    /// A magnitude must exceed this multiple of the local mean to be a peak.
    pub peak_threshold_ratio: f32,
    /// Absolute magnitude floor for peaks.
    pub peak_floor: f32,
    /// Target constellation density in peaks per second.
    pub target_density: f32,
    /// Minimum frame distance between an anchor and a paired target.
    pub pair_min_dt: usize,
    /// Maximum frame distance between an anchor and a paired target.
    pub pair_max_dt: usize,
    /// Maximum number of targets paired with each anchor.
    pub fan_out: usize,
    /// Maximum frequency-bin distance between an anchor and a target.
    pub pair_freq_span: usize,
    /// Posting lists longer than this are non-selective and skipped on lookup.
    pub hot_hash_cap: usize,
    /// Minimum aligned votes before a match can be reported.
    pub min_votes: usize,
    /// Runner-up weight in the confidence ratio test.
    pub runner_up_weight: f64,
    /// Minimum confidence for a reported match.
    pub confidence_threshold: f64,
    /// Number of ranked candidates kept per query.
    pub top_n: usize,
    /// Fingerprint schema version advertised by stores built with this config.
    pub schema_version: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 11_025,
            window_size: 4096,
            hop_size: 2048,
            peak_time_radius: 10,
            peak_freq_radius: 10,
            peak_threshold_ratio: 2.5,
            peak_floor: 0.01,
            target_density: 40.0,
            pair_min_dt: 1,
            pair_max_dt: 100,
            fan_out: 5,
            pair_freq_span: 100,
            hot_hash_cap: 200,
            min_votes: 5,
            runner_up_weight: 0.1,
            confidence_threshold: 0.5,
            top_n: 5,
            schema_version: 1,
        }
    }
}

impl EngineConfig {
    /// Number of frequency bins per spectrum (DC is dropped).
    pub fn freq_bins(&self) -> usize {
        self.window_size / 2
    }

    /// Convert a frame offset at the configured hop to milliseconds.
    pub fn frames_to_ms(&self, frames: i64) -> i64 {
        frames * 1000 * self.hop_size as i64 / self.sample_rate as i64
    }

    /// Duration of one hop in milliseconds, the matcher's alignment resolution.
    pub fn hop_ms(&self) -> i64 {
        self.frames_to_ms(1)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.window_size.is_power_of_two() {
            return Err(ConfigError::Invalid(format!(
                "window_size must be a power of two, got {}",
                self.window_size
            )));
        }
        if self.hop_size == 0 || self.hop_size > self.window_size {
            return Err(ConfigError::Invalid(format!(
                "hop_size must be in 1..={}, got {}",
                self.window_size, self.hop_size
            )));
        }
        if self.sample_rate == 0 {
            return Err(ConfigError::Invalid("sample_rate must be non-zero".into()));
        }
        if self.pair_min_dt == 0 || self.pair_min_dt > self.pair_max_dt {
            return Err(ConfigError::Invalid(format!(
                "pair delta range [{}, {}] is empty or touches zero",
                self.pair_min_dt, self.pair_max_dt
            )));
        }
        if self.pair_max_dt > crate::fingerprint::hashing::MAX_PACKED_DT {
            return Err(ConfigError::Invalid(format!(
                "pair_max_dt {} exceeds the {} frames the hash layout can encode",
                self.pair_max_dt,
                crate::fingerprint::hashing::MAX_PACKED_DT
            )));
        }
        if self.fan_out == 0 {
            return Err(ConfigError::Invalid("fan_out must be at least 1".into()));
        }
        Ok(())
    }
}

/// Application configuration loaded from a TOML config file.
/// All fields have defaults and the config file is optional, but a file
/// that is present must parse cleanly: unknown keys are errors, not
/// warnings.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    /// Custom database path (overrides XDG default).
    pub db_path: Option<PathBuf>,
    /// Number of parallel workers for bulk ingest. 0 = all cores but one.
    pub workers: usize,
    /// Default recording length for `listen`, in seconds.
    pub listen_seconds: Option<u64>,
    /// Fingerprint engine tunables.
    pub engine: EngineConfig,
}

impl AppConfig {
    /// Load config from an explicit path, or from
    /// `~/.config/fftrack/config.toml` when none is given.
    /// A missing default file yields defaults; an explicit path must exist.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match explicit {
            Some(p) => {
                if !p.exists() {
                    return Err(ConfigError::NotFound(p.to_path_buf()));
                }
                p.to_path_buf()
            }
            None => {
                let default = ProjectDirs::from("", "", crate::APP_NAME)
                    .map(|dirs| dirs.config_dir().join("config.toml"));
                match default {
                    Some(p) if p.exists() => p,
                    _ => {
                        log::debug!("No config file found, using defaults");
                        return Ok(Self::default());
                    }
                }
            }
        };

        let contents = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        let config: AppConfig = toml::from_str(&contents).map_err(|e| ConfigError::Parse {
            path: path.clone(),
            message: e.to_string(),
        })?;
        config.engine.validate()?;
        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Resolve worker count for bulk ingest. Extraction is CPU-bound (the
    /// FFT dominates decode), so 0 auto-detects to every core but one,
    /// leaving the machine responsive while a library churns through.
    pub fn resolve_workers(&self) -> usize {
        if self.workers > 0 {
            self.workers
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get().saturating_sub(1))
                .unwrap_or(1)
                .max(1)
        }
    }
}

/// Default store location under the XDG data directory. Only names the
/// path; `Database::open` creates missing parent directories itself.
pub fn default_db_path() -> PathBuf {
    ProjectDirs::from("", "", crate::APP_NAME)
        .map(|dirs| dirs.data_dir().join("fftrack.db"))
        .unwrap_or_else(|| PathBuf::from("fftrack.db"))
}
