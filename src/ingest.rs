use std::path::{Path, PathBuf};

use indicatif::{ProgressBar, ProgressStyle};
use lofty::file::TaggedFileExt;
use lofty::prelude::*;
use thiserror::Error;
use walkdir::WalkDir;

use crate::audio::{self, AudioClip, AudioError};
use crate::cancel::{CancelToken, Cancelled};
use crate::config::EngineConfig;
use crate::db::models::NewTrack;
use crate::db::{Database, DbError};
use crate::fingerprint;
use crate::SUPPORTED_EXTENSIONS;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),
    #[error("Database error: {0}")]
    Db(#[from] DbError),
    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

pub struct BulkResult {
    pub ingested: u64,
    pub failed: u64,
    pub track_ids: Vec<i64>,
}

/// Ingest a canonical-rate clip under the given metadata. The catalog row
/// and every posting land in one transaction; cancellation up to that
/// point leaves the store untouched.
pub fn ingest_clip(
    db: &Database,
    cfg: &EngineConfig,
    clip: &AudioClip,
    track: &NewTrack,
    cancel: &CancelToken,
) -> Result<i64, IngestError> {
    cancel.check()?;
    let hashes = fingerprint::fingerprint_clip(clip, cfg)?;
    cancel.check()?;
    let track_id = db.insert_track(track, &hashes)?;
    Ok(track_id)
}

/// Decode, fingerprint and ingest one file. Explicit title/artist win over
/// file tags; the file stem is the title of last resort.
pub fn ingest_file(
    db: &Database,
    cfg: &EngineConfig,
    path: &Path,
    title: Option<&str>,
    artist: Option<&str>,
    cancel: &CancelToken,
) -> Result<i64, IngestError> {
    cancel.check()?;
    let clip = audio::load_clip(path, cfg)?;
    let track = track_meta(path, &clip, title, artist);
    ingest_clip(db, cfg, &clip, &track, cancel)
}

/// Ingest many files: fingerprint a chunk in parallel, then commit each
/// track in its own transaction before moving on. Per-file failures are
/// logged and counted, not fatal. A schema mismatch poisons every file
/// alike and aborts the run.
pub fn ingest_paths(
    db: &Database,
    cfg: &EngineConfig,
    paths: &[PathBuf],
    workers: usize,
    cancel: &CancelToken,
) -> Result<BulkResult, IngestError> {
    let files = collect_audio_files(paths);
    if files.is_empty() {
        log::info!("No audio files to ingest");
        return Ok(BulkResult {
            ingested: 0,
            failed: 0,
            track_ids: Vec::new(),
        });
    }

    log::info!("Ingesting {} files with {} workers", files.len(), workers);

    let pb = ProgressBar::new(files.len() as u64);
    pb.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
        )
        .unwrap()
        .progress_chars("#>-"),
    );

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .build()
        .unwrap();

    let mut result = BulkResult {
        ingested: 0,
        failed: 0,
        track_ids: Vec::new(),
    };

    // Chunk size = workers * 2 keeps all cores busy while bounding the
    // number of fingerprint vectors held in memory.
    let chunk_size = workers.max(1) * 2;

    for chunk in files.chunks(chunk_size) {
        cancel.check()?;

        let extracted: Vec<_> = pool.install(|| {
            use rayon::prelude::*;
            chunk
                .par_iter()
                .map(|path| {
                    let prepared = prepare_file(path, cfg, cancel);
                    pb.inc(1);
                    (path, prepared)
                })
                .collect()
        });

        for (path, prepared) in extracted {
            match prepared {
                Ok((track, hashes)) => match db.insert_track(&track, &hashes) {
                    Ok(id) => {
                        result.ingested += 1;
                        result.track_ids.push(id);
                    }
                    Err(e @ DbError::SchemaMismatch { .. }) => return Err(e.into()),
                    Err(e) => {
                        log::error!("DB error storing {}: {}", path.display(), e);
                        result.failed += 1;
                    }
                },
                Err(IngestError::Cancelled(c)) => return Err(c.into()),
                Err(e) => {
                    log::warn!("Skipping {}: {}", path.display(), e);
                    result.failed += 1;
                }
            }
        }

        pb.set_message(format!("{} stored, {} failed", result.ingested, result.failed));
    }

    pb.finish_with_message(format!(
        "Done: {} ingested, {} failed",
        result.ingested, result.failed
    ));

    Ok(result)
}

/// Expand files and directories into the list of audio files to ingest.
/// Directories are walked and filtered by extension; a path the caller
/// named directly is kept as-is and left for the decoder to judge.
pub fn collect_audio_files(paths: &[PathBuf]) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for path in paths {
        if path.is_file() {
            files.push(path.clone());
            continue;
        }
        for entry in WalkDir::new(path)
            .follow_links(true)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if !entry.file_type().is_file() {
                continue;
            }
            let ext = entry
                .path()
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or("")
                .to_lowercase();
            if SUPPORTED_EXTENSIONS.contains(&ext.as_str()) {
                files.push(entry.into_path());
            }
        }
    }

    files
}

fn prepare_file(
    path: &Path,
    cfg: &EngineConfig,
    cancel: &CancelToken,
) -> Result<(NewTrack, Vec<fingerprint::Fingerprint>), IngestError> {
    cancel.check()?;
    let clip = audio::load_clip(path, cfg)?;
    cancel.check()?;
    let hashes = fingerprint::fingerprint_clip(&clip, cfg)?;
    let track = track_meta(path, &clip, None, None);
    Ok((track, hashes))
}

/// Resolve track metadata: explicit values, then file tags, then the stem.
fn track_meta(
    path: &Path,
    clip: &AudioClip,
    title: Option<&str>,
    artist: Option<&str>,
) -> NewTrack {
    let (tag_title, tag_artist) = read_tags(path);

    let title = title
        .map(|s| s.to_string())
        .or(tag_title)
        .unwrap_or_else(|| {
            path.file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("Unknown Title")
                .to_string()
        });
    let artist = artist
        .map(|s| s.to_string())
        .or(tag_artist)
        .unwrap_or_else(|| "Unknown Artist".to_string());

    NewTrack {
        title,
        artist,
        duration_ms: clip.duration_ms(),
    }
}

/// Read title/artist tags. Returns `None`s on failure; untagged files are
/// normal, not errors.
fn read_tags(path: &Path) -> (Option<String>, Option<String>) {
    let tagged_file = match lofty::read_from_path(path) {
        Ok(f) => f,
        Err(e) => {
            log::debug!("Could not read tags from {}: {}", path.display(), e);
            return (None, None);
        }
    };

    let tag = tagged_file.primary_tag().or_else(|| tagged_file.first_tag());
    match tag {
        Some(t) => (
            t.title().map(|s| s.to_string()),
            t.artist().map(|s| s.to_string()),
        ),
        None => (None, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    fn melody_clip(cfg: &EngineConfig, seconds: f32) -> AudioClip {
        let fs = cfg.sample_rate;
        let notes = [330.0f32, 440.0, 495.0, 660.0];
        let samples = (0..(seconds * fs as f32) as usize)
            .map(|i| {
                let t = i as f32 / fs as f32;
                let note = notes[(t * 2.0) as usize % notes.len()];
                0.6 * (2.0 * PI * note * t).sin()
            })
            .collect();
        AudioClip {
            samples,
            sample_rate: fs,
        }
    }

    fn meta(title: &str) -> NewTrack {
        NewTrack {
            title: title.to_string(),
            artist: "Artist".to_string(),
            duration_ms: 5_000,
        }
    }

    #[test]
    fn test_ingest_clip_stores_postings() {
        let cfg = EngineConfig::default();
        let db = Database::open_in_memory(&cfg).unwrap();
        let clip = melody_clip(&cfg, 5.0);

        let id = ingest_clip(&db, &cfg, &clip, &meta("Melody"), &CancelToken::new()).unwrap();
        assert!(id > 0);

        let stats = db.stats().unwrap();
        assert_eq!(stats.track_count, 1);
        assert!(stats.posting_count > 0);
    }

    #[test]
    fn test_cancelled_ingest_leaves_store_unchanged() {
        let cfg = EngineConfig::default();
        let db = Database::open_in_memory(&cfg).unwrap();
        let clip = melody_clip(&cfg, 5.0);

        let token = CancelToken::new();
        token.cancel();
        let err = ingest_clip(&db, &cfg, &clip, &meta("Never"), &token).unwrap_err();
        assert!(matches!(err, IngestError::Cancelled(_)));

        let stats = db.stats().unwrap();
        assert_eq!(stats.track_count, 0);
        assert_eq!(stats.posting_count, 0);
    }

    #[test]
    fn test_empty_clip_is_rejected() {
        let cfg = EngineConfig::default();
        let db = Database::open_in_memory(&cfg).unwrap();
        let clip = AudioClip {
            samples: vec![0.0; cfg.window_size - 1],
            sample_rate: cfg.sample_rate,
        };
        let err = ingest_clip(&db, &cfg, &clip, &meta("Short"), &CancelToken::new()).unwrap_err();
        assert!(matches!(err, IngestError::Audio(AudioError::EmptyAudio)));
        assert_eq!(db.stats().unwrap().track_count, 0);
    }

    #[test]
    fn test_collect_audio_files_filters_extensions() {
        let dir = std::env::temp_dir().join(format!("fftrack_ingest_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("a.mp3"), b"x").unwrap();
        std::fs::write(dir.join("b.txt"), b"x").unwrap();
        std::fs::write(dir.join("c.WAV"), b"x").unwrap();

        let files = collect_audio_files(&[dir.clone()]);
        let names: Vec<String> = files
            .iter()
            .filter_map(|p| p.file_name().and_then(|n| n.to_str()).map(String::from))
            .collect();
        assert!(names.contains(&"a.mp3".to_string()));
        assert!(names.contains(&"c.WAV".to_string()));
        assert!(!names.contains(&"b.txt".to_string()));

        std::fs::remove_dir_all(&dir).ok();
    }
}
