use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;

use fftrack::audio::{self, AudioError};
use fftrack::cancel::CancelToken;
use fftrack::config::AppConfig;
use fftrack::db::models::Track;
use fftrack::db::{Database, DbError};
use fftrack::matcher::{self, Candidate, MatchOutcome};

/// Exit codes are a stable contract for scripted callers:
/// 0 success / confident match, 1 no match, 2 decode failure,
/// 3 schema mismatch, 4 anything else.
const EXIT_NO_MATCH: u8 = 1;
const EXIT_DECODE: u8 = 2;
const EXIT_SCHEMA: u8 = 3;
const EXIT_OTHER: u8 = 4;

#[derive(Parser)]
#[command(name = "fftrack", version, about = "Acoustic fingerprinting and track identification")]
struct Cli {
    /// Path to the fingerprint database
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    /// Path to a config file (defaults to the XDG location)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fingerprint audio files and add them to the catalog
    Ingest {
        /// Audio files or directories to ingest
        paths: Vec<PathBuf>,

        /// Track title (single file only; overrides file tags)
        #[arg(long)]
        title: Option<String>,

        /// Track artist (single file only; overrides file tags)
        #[arg(long)]
        artist: Option<String>,

        /// Number of parallel workers for bulk ingest (0 = auto-detect)
        #[arg(short = 'j', long, default_value = "0")]
        jobs: usize,
    },

    /// Identify an audio file against the catalog
    Identify {
        /// Audio file to identify
        audio: PathBuf,

        /// Emit the full outcome as JSON instead of the one-line result
        #[arg(long)]
        json: bool,
    },

    /// Record from the default input device, then identify
    Listen {
        /// Recording length in seconds (3-30)
        #[arg(long)]
        seconds: Option<u64>,

        /// Emit the full outcome as JSON instead of the one-line result
        #[arg(long)]
        json: bool,
    },

    /// Remove a track and all of its fingerprints
    Remove {
        /// Track id to remove
        track_id: i64,
    },

    /// List catalog tracks
    List,

    /// Show catalog statistics
    Stats,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    match run(cli) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::from(exit_code_for(&e))
        }
    }
}

fn run(cli: Cli) -> Result<u8> {
    let config = AppConfig::load(cli.config.as_deref()).context("Failed to load config")?;
    let engine = config.engine.clone();
    engine.validate()?;

    // Resolve database path: CLI > config > XDG default
    let db_path = cli
        .db_path
        .or_else(|| config.db_path.clone())
        .unwrap_or_else(fftrack::config::default_db_path);
    log::info!("Database: {}", db_path.display());

    let db = Database::open(&db_path, &engine).context("Failed to open database")?;
    let cancel = CancelToken::new();

    match cli.command {
        Commands::Ingest {
            paths,
            title,
            artist,
            jobs,
        } => {
            anyhow::ensure!(!paths.is_empty(), "Nothing to ingest. Pass files or directories.");
            let files = fftrack::ingest::collect_audio_files(&paths);
            anyhow::ensure!(!files.is_empty(), "No supported audio files under the given paths.");

            if files.len() == 1 {
                let id = fftrack::ingest::ingest_file(
                    &db,
                    &engine,
                    &files[0],
                    title.as_deref(),
                    artist.as_deref(),
                    &cancel,
                )
                .with_context(|| format!("Failed to ingest {}", files[0].display()))?;
                println!("{id}");
                return Ok(0);
            }

            anyhow::ensure!(
                title.is_none() && artist.is_none(),
                "--title/--artist apply to a single file, found {} files",
                files.len()
            );
            let workers = if jobs > 0 { jobs } else { config.resolve_workers() };
            let result =
                fftrack::ingest::ingest_paths(&db, &engine, &paths, workers, &cancel)
                    .context("Bulk ingest failed")?;
            for id in &result.track_ids {
                println!("{id}");
            }
            eprintln!(
                "Ingest complete: {} ingested, {} failed",
                result.ingested, result.failed
            );
            Ok(0)
        }

        Commands::Identify { audio, json } => {
            let clip = audio::load_clip(&audio, &engine)
                .with_context(|| format!("Failed to decode {}", audio.display()))?;
            let outcome = matcher::identify_clip(&db, &engine, &clip, &cancel)
                .context("Identification failed")?;
            report_outcome(&db, &outcome, json, cli.verbose > 0)
        }

        Commands::Listen { seconds, json } => {
            let seconds = seconds
                .or(config.listen_seconds)
                .unwrap_or(10)
                .clamp(3, 30);
            let raw = audio::capture::record_default_input(seconds)
                .context("Audio capture failed")?;
            let clip = audio::resample::to_canonical(&raw, engine.sample_rate)
                .context("Failed to resample captured audio")?;
            let outcome = matcher::identify_clip(&db, &engine, &clip, &cancel)
                .context("Identification failed")?;
            report_outcome(&db, &outcome, json, cli.verbose > 0)
        }

        Commands::Remove { track_id } => {
            let removed = db.delete_track(track_id).context("Delete failed")?;
            anyhow::ensure!(removed, "No track with id {track_id}");
            println!("Removed track {track_id}");
            Ok(0)
        }

        Commands::List => {
            let tracks = db.list_tracks().context("Query failed")?;
            if tracks.is_empty() {
                println!("Catalog is empty.");
                return Ok(0);
            }
            print_track_table(&tracks);
            Ok(0)
        }

        Commands::Stats => {
            let stats = db.stats().context("Failed to get stats")?;
            println!("Catalog Statistics");
            println!("==================");
            println!("Schema version:   {}", db.schema_version()?);
            println!("Tracks:           {}", stats.track_count);
            println!("Postings:         {}", stats.posting_count);
            println!("Distinct hashes:  {}", stats.distinct_hashes);
            println!("Total duration:   {:.1} hours", stats.total_duration_hours);
            Ok(0)
        }
    }
}

/// JSON shape for `identify --json` / `listen --json`.
#[derive(Serialize)]
struct IdentifyReport<'a> {
    matched: Option<MatchedTrack>,
    candidates: &'a [Candidate],
}

#[derive(Serialize)]
struct MatchedTrack {
    track_id: i64,
    title: String,
    artist: String,
    confidence: f64,
    aligned_offset_ms: i64,
    score: usize,
}

fn report_outcome(
    db: &Database,
    outcome: &MatchOutcome,
    json: bool,
    show_candidates: bool,
) -> Result<u8> {
    let matched = match &outcome.best {
        Some(best) => {
            let track = db
                .get_track(best.track_id)?
                .with_context(|| format!("Catalog is missing track {}", best.track_id))?;
            Some(MatchedTrack {
                track_id: track.id,
                title: track.title,
                artist: track.artist,
                confidence: best.confidence,
                aligned_offset_ms: best.aligned_offset_ms,
                score: best.score,
            })
        }
        None => None,
    };

    if json {
        let report = IdentifyReport {
            matched,
            candidates: &outcome.candidates,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(if outcome.is_match() { 0 } else { EXIT_NO_MATCH });
    }

    if show_candidates && !outcome.candidates.is_empty() {
        print_candidate_table(db, &outcome.candidates)?;
    }

    match matched {
        Some(m) => {
            println!(
                "{} {} {} {:.3} {}",
                m.track_id, m.title, m.artist, m.confidence, m.aligned_offset_ms
            );
            Ok(0)
        }
        None => {
            eprintln!("No match.");
            Ok(EXIT_NO_MATCH)
        }
    }
}

/// Print the ranked candidate list (shown with -v).
fn print_candidate_table(db: &Database, candidates: &[Candidate]) -> Result<()> {
    println!(
        "{:<4} {:<25} {:<20} {:>6} {:>6} {:>10} {:>6}",
        "ID", "Title", "Artist", "Votes", "Total", "Offset", "Conf"
    );
    println!("{}", "-".repeat(84));

    for c in candidates {
        let (title, artist) = match db.get_track(c.track_id)? {
            Some(t) => (t.title, t.artist),
            None => ("?".to_string(), "?".to_string()),
        };
        println!(
            "{:<4} {:<25} {:<20} {:>6} {:>6} {:>9.1}s {:>6.2}",
            c.track_id,
            truncate(&title, 25),
            truncate(&artist, 20),
            c.score,
            c.total_matches,
            c.aligned_offset_ms as f64 / 1000.0,
            c.confidence,
        );
    }
    println!();
    Ok(())
}

fn print_track_table(tracks: &[Track]) {
    println!(
        "{:<5} {:<30} {:<25} {:>7}  {}",
        "ID", "Title", "Artist", "Min", "Added"
    );
    println!("{}", "-".repeat(90));

    for t in tracks {
        println!(
            "{:<5} {:<30} {:<25} {:>7.1}  {}",
            t.id,
            truncate(&t.title, 30),
            truncate(&t.artist, 25),
            t.duration_ms as f64 / 60_000.0,
            t.created_at,
        );
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        let cut: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{cut}...")
    } else {
        s.to_string()
    }
}

/// Map an error chain onto the stable exit codes.
fn exit_code_for(err: &anyhow::Error) -> u8 {
    for cause in err.chain() {
        if let Some(audio) = cause.downcast_ref::<AudioError>() {
            return match audio {
                AudioError::InvalidAudio(_) | AudioError::EmptyAudio | AudioError::Io(_) => {
                    EXIT_DECODE
                }
                AudioError::Capture(_) => EXIT_OTHER,
            };
        }
        if let Some(db) = cause.downcast_ref::<DbError>() {
            return match db {
                DbError::SchemaMismatch { .. } => EXIT_SCHEMA,
                _ => EXIT_OTHER,
            };
        }
    }
    EXIT_OTHER
}
