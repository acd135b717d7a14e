use std::collections::HashMap;

use serde::Serialize;
use thiserror::Error;

use crate::audio::{AudioClip, AudioError};
use crate::cancel::{CancelToken, Cancelled};
use crate::config::EngineConfig;
use crate::db::{Database, DbError};
use crate::fingerprint::{self, Fingerprint};

/// How many query hashes are looked up between cancellation checks.
const CANCEL_CHECK_INTERVAL: usize = 256;

#[derive(Error, Debug)]
pub enum IdentifyError {
    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),
    #[error("Database error: {0}")]
    Db(#[from] DbError),
    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

/// One scored catalog candidate for a query.
#[derive(Debug, Clone, Serialize)]
pub struct Candidate {
    pub track_id: i64,
    /// Aligned votes: the height of the largest offset-delta bucket.
    pub score: usize,
    /// All posting matches for this track, aligned or not.
    pub total_matches: usize,
    /// The winning offset delta in frames (catalog time minus query time).
    pub delta: i64,
    /// The winning delta converted to milliseconds.
    pub aligned_offset_ms: i64,
    /// Ratio-test confidence against the strongest other candidate.
    pub confidence: f64,
}

/// Result of a query. `NoMatch` is not an error: it is an outcome with
/// `best == None`, with any below-threshold ranking preserved for callers
/// that want to inspect it.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MatchOutcome {
    pub candidates: Vec<Candidate>,
    pub best: Option<Candidate>,
}

impl MatchOutcome {
    pub fn is_match(&self) -> bool {
        self.best.is_some()
    }
}

/// Fingerprint a clip and match it against the catalog.
pub fn identify_clip(
    db: &Database,
    cfg: &EngineConfig,
    clip: &AudioClip,
    cancel: &CancelToken,
) -> Result<MatchOutcome, IdentifyError> {
    cancel.check()?;
    let hashes = fingerprint::fingerprint_clip(clip, cfg)?;
    cancel.check()?;
    match_hashes(db, cfg, &hashes, cancel)
}

/// Match already-extracted query hashes against the index.
///
/// Every posting match votes for its track at the offset delta
/// `t_catalog − t_query`; a true alignment stacks votes on one exact
/// delta while chance matches scatter. Candidates are ranked by the
/// height of their tallest bucket, ties by total matches, then by the
/// smaller track id.
pub fn match_hashes(
    db: &Database,
    cfg: &EngineConfig,
    hashes: &[Fingerprint],
    cancel: &CancelToken,
) -> Result<MatchOutcome, IdentifyError> {
    if hashes.is_empty() {
        log::info!("Query produced no hashes");
        return Ok(MatchOutcome::default());
    }

    let mut delta_buckets: HashMap<i64, HashMap<i64, usize>> = HashMap::new();
    let mut totals: HashMap<i64, usize> = HashMap::new();

    for (i, fp) in hashes.iter().enumerate() {
        if i % CANCEL_CHECK_INTERVAL == 0 {
            cancel.check()?;
        }
        for (track_id, t_anchor) in db.lookup(fp.hash)? {
            *totals.entry(track_id).or_default() += 1;
            let delta = t_anchor - fp.t_anchor as i64;
            *delta_buckets
                .entry(track_id)
                .or_default()
                .entry(delta)
                .or_default() += 1;
        }
    }
    cancel.check()?;

    let mut candidates: Vec<Candidate> = delta_buckets
        .into_iter()
        .map(|(track_id, buckets)| {
            // Tallest bucket; equal heights resolve to the smallest delta
            // so the result is independent of map iteration order.
            let (delta, score) = buckets
                .into_iter()
                .max_by_key(|&(delta, count)| (count, std::cmp::Reverse(delta)))
                .expect("track entry implies at least one delta");
            Candidate {
                track_id,
                score,
                total_matches: totals[&track_id],
                delta,
                aligned_offset_ms: cfg.frames_to_ms(delta),
                confidence: 0.0,
            }
        })
        .collect();

    candidates.sort_by(|a, b| {
        b.score
            .cmp(&a.score)
            .then(b.total_matches.cmp(&a.total_matches))
            .then(a.track_id.cmp(&b.track_id))
    });
    candidates.truncate(cfg.top_n.max(1));

    score_confidence(&mut candidates, cfg);

    let best = candidates
        .first()
        .filter(|top| top.score >= cfg.min_votes && top.confidence >= cfg.confidence_threshold)
        .cloned();

    match &best {
        Some(top) => log::info!(
            "Matched track {} with {} aligned votes (confidence {:.2}, offset {} ms)",
            top.track_id,
            top.score,
            top.confidence,
            top.aligned_offset_ms
        ),
        None => log::info!(
            "No confident match ({} candidate(s) below threshold)",
            candidates.len()
        ),
    }

    Ok(MatchOutcome { candidates, best })
}

/// Ratio test: each candidate's aligned votes against the strongest other
/// candidate, damped by its own height. A lone candidate saturates at
/// `1 / runner_up_weight`.
fn score_confidence(candidates: &mut [Candidate], cfg: &EngineConfig) {
    if candidates.is_empty() {
        return;
    }
    let top_score = candidates[0].score;
    let runner_up = candidates.get(1).map(|c| c.score).unwrap_or(0);

    for (i, candidate) in candidates.iter_mut().enumerate() {
        let rival = if i == 0 { runner_up } else { top_score };
        let own = candidate.score as f64;
        candidate.confidence = own / (rival as f64 + own * cfg.runner_up_weight).max(1.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::NewTrack;

    fn test_db() -> (Database, EngineConfig) {
        let cfg = EngineConfig::default();
        (Database::open_in_memory(&cfg).unwrap(), cfg)
    }

    fn meta(title: &str) -> NewTrack {
        NewTrack {
            title: title.to_string(),
            artist: "Artist".to_string(),
            duration_ms: 30_000,
        }
    }

    fn fp(hash: u32, t_anchor: u32) -> Fingerprint {
        Fingerprint { hash, t_anchor }
    }

    /// Postings for hashes `1..=n` anchored at `start, start+1, ...`.
    fn run_of_postings(n: u32, start: u32) -> Vec<Fingerprint> {
        (1..=n).map(|h| fp(h, start + h - 1)).collect()
    }

    #[test]
    fn test_aligned_votes_beat_scattered() {
        let (db, cfg) = test_db();
        let aligned = db
            .insert_track(&meta("Aligned"), &run_of_postings(8, 10))
            .unwrap();
        // Same hashes, but anchors jumbled so no delta repeats.
        let scattered: Vec<Fingerprint> = [40u32, 3, 91, 17, 66, 5, 83, 29]
            .iter()
            .enumerate()
            .map(|(i, &t)| fp(i as u32 + 1, t))
            .collect();
        db.insert_track(&meta("Scattered"), &scattered).unwrap();

        let query = run_of_postings(8, 0);
        let outcome = match_hashes(&db, &cfg, &query, &CancelToken::new()).unwrap();

        let best = outcome.best.expect("expected a confident match");
        assert_eq!(best.track_id, aligned);
        assert_eq!(best.score, 8);
        assert_eq!(best.delta, 10);
        assert_eq!(best.aligned_offset_ms, cfg.frames_to_ms(10));
    }

    #[test]
    fn test_min_votes_gate() {
        let (db, cfg) = test_db();
        db.insert_track(&meta("Thin"), &run_of_postings(3, 5))
            .unwrap();

        let query = run_of_postings(3, 0);
        let outcome = match_hashes(&db, &cfg, &query, &CancelToken::new()).unwrap();

        assert!(outcome.best.is_none());
        assert_eq!(outcome.candidates.len(), 1);
        assert_eq!(outcome.candidates[0].score, 3);
    }

    #[test]
    fn test_empty_query_is_no_match() {
        let (db, cfg) = test_db();
        db.insert_track(&meta("Anything"), &run_of_postings(8, 0))
            .unwrap();
        let outcome = match_hashes(&db, &cfg, &[], &CancelToken::new()).unwrap();
        assert!(outcome.candidates.is_empty());
        assert!(outcome.best.is_none());
    }

    #[test]
    fn test_identical_tracks_tie_breaks_to_smaller_id() {
        let (db, cfg) = test_db();
        let postings = run_of_postings(10, 0);
        let first = db.insert_track(&meta("Twin A"), &postings).unwrap();
        db.insert_track(&meta("Twin B"), &postings).unwrap();

        let outcome = match_hashes(&db, &cfg, &postings, &CancelToken::new()).unwrap();
        let best = outcome.best.expect("duplicates should still match");
        assert_eq!(best.track_id, first);
        assert_eq!(outcome.candidates.len(), 2);
    }

    #[test]
    fn test_negative_delta_query_still_aligns() {
        let (db, cfg) = test_db();
        // Catalog anchors start at 0; the query heard the same material
        // later in its own buffer, so deltas are negative.
        let id = db
            .insert_track(&meta("Early"), &run_of_postings(8, 0))
            .unwrap();
        let query = run_of_postings(8, 50);
        let outcome = match_hashes(&db, &cfg, &query, &CancelToken::new()).unwrap();

        let best = outcome.best.expect("expected a match");
        assert_eq!(best.track_id, id);
        assert_eq!(best.delta, -50);
        assert_eq!(best.aligned_offset_ms, cfg.frames_to_ms(-50));
    }

    #[test]
    fn test_equal_buckets_resolve_to_smallest_delta() {
        let (db, cfg) = test_db();
        let mut cfg = cfg;
        cfg.min_votes = 2;
        // Two buckets of two votes each: deltas {4, 9}.
        let id = db
            .insert_track(
                &meta("Split"),
                &[fp(1, 4), fp(2, 5), fp(3, 9), fp(4, 10)],
            )
            .unwrap();
        let query = vec![fp(1, 0), fp(2, 1), fp(3, 0), fp(4, 1)];
        let outcome = match_hashes(&db, &cfg, &query, &CancelToken::new()).unwrap();

        let best = outcome.best.expect("expected a match");
        assert_eq!(best.track_id, id);
        assert_eq!(best.score, 2);
        assert_eq!(best.delta, 4);
    }

    #[test]
    fn test_cancelled_query_returns_cancelled() {
        let (db, cfg) = test_db();
        db.insert_track(&meta("Whatever"), &run_of_postings(8, 0))
            .unwrap();
        let token = CancelToken::new();
        token.cancel();
        let err = match_hashes(&db, &cfg, &run_of_postings(8, 0), &token).unwrap_err();
        assert!(matches!(err, IdentifyError::Cancelled(_)));
    }

    #[test]
    fn test_sole_candidate_confidence_saturates() {
        let (db, cfg) = test_db();
        db.insert_track(&meta("Solo"), &run_of_postings(20, 0))
            .unwrap();
        let outcome =
            match_hashes(&db, &cfg, &run_of_postings(20, 0), &CancelToken::new()).unwrap();
        let best = outcome.best.expect("expected a match");
        // c2 = 0 → confidence = c1 / (c1 · β) = 1 / β
        assert!((best.confidence - 1.0 / cfg.runner_up_weight).abs() < 1e-9);
    }
}
