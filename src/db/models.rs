use serde::Serialize;

/// A catalog row. Tracks are immutable once ingested; deletion also purges
/// the track's postings from the index.
#[derive(Debug, Clone, Serialize)]
pub struct Track {
    pub id: i64,
    pub title: String,
    pub artist: String,
    pub duration_ms: i64,
    pub created_at: String,
}

/// Metadata for a track about to be ingested. The id is assigned by the
/// store and never reused.
#[derive(Debug, Clone)]
pub struct NewTrack {
    pub title: String,
    pub artist: String,
    pub duration_ms: i64,
}

#[derive(Debug, Clone)]
pub struct LibraryStats {
    pub track_count: i64,
    pub posting_count: i64,
    pub distinct_hashes: i64,
    pub total_duration_hours: f64,
}
