use rusqlite::params;

use crate::fingerprint::Fingerprint;

use super::models::{LibraryStats, NewTrack, Track};
use super::{Database, Result};

impl Database {
    /// Insert a track and all of its postings in one transaction. Either
    /// the new id and every posting become visible together, or nothing
    /// does; concurrent readers never observe a partial track.
    pub fn insert_track(&self, track: &NewTrack, postings: &[Fingerprint]) -> Result<i64> {
        let tx = self.conn.unchecked_transaction()?;

        tx.execute(
            "INSERT INTO tracks (title, artist, duration_ms) VALUES (?1, ?2, ?3)",
            params![track.title, track.artist, track.duration_ms],
        )?;
        let track_id = tx.last_insert_rowid();

        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO postings (hash, track_id, t_anchor) VALUES (?1, ?2, ?3)",
            )?;
            for fp in postings {
                stmt.execute(params![fp.hash as i64, track_id, fp.t_anchor as i64])?;
            }
        }

        tx.commit()?;
        log::info!(
            "Ingested track {} ({} postings): {} - {}",
            track_id,
            postings.len(),
            track.artist,
            track.title
        );
        Ok(track_id)
    }

    /// Postings for one hash as `(track_id, t_anchor)` pairs.
    ///
    /// A hash whose posting list exceeds the hot-hash cap matches too much
    /// of the catalog to discriminate; lookups treat it as absent.
    pub fn lookup(&self, hash: u32) -> Result<Vec<(i64, i64)>> {
        let cap = self.hot_hash_cap();
        let mut stmt = self.conn.prepare_cached(
            "SELECT track_id, t_anchor FROM postings WHERE hash = ?1 LIMIT ?2",
        )?;
        let rows: Vec<(i64, i64)> = stmt
            .query_map(params![hash as i64, (cap + 1) as i64], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })?
            .collect::<std::result::Result<_, _>>()?;

        if rows.len() > cap {
            log::trace!("Skipping hot hash {hash:#010x} (> {cap} postings)");
            return Ok(Vec::new());
        }
        Ok(rows)
    }

    /// Remove a track and its entire posting set. Returns false when the
    /// id was not in the catalog.
    pub fn delete_track(&self, track_id: i64) -> Result<bool> {
        // Postings ride along via ON DELETE CASCADE; a single statement is
        // atomic on its own.
        let deleted = self
            .conn
            .execute("DELETE FROM tracks WHERE id = ?1", params![track_id])?;
        if deleted > 0 {
            log::info!("Deleted track {track_id} and its postings");
        }
        Ok(deleted > 0)
    }

    pub fn get_track(&self, track_id: i64) -> Result<Option<Track>> {
        let track = self
            .conn
            .query_row(
                "SELECT id, title, artist, duration_ms, created_at
                 FROM tracks WHERE id = ?1",
                params![track_id],
                row_to_track,
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;
        Ok(track)
    }

    pub fn list_tracks(&self) -> Result<Vec<Track>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, title, artist, duration_ms, created_at
             FROM tracks ORDER BY id",
        )?;
        let tracks = stmt
            .query_map([], row_to_track)?
            .collect::<std::result::Result<_, _>>()?;
        Ok(tracks)
    }

    pub fn stats(&self) -> Result<LibraryStats> {
        let track_count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM tracks", [], |row| row.get(0))?;
        let posting_count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM postings", [], |row| row.get(0))?;
        let distinct_hashes: i64 = self.conn.query_row(
            "SELECT COUNT(DISTINCT hash) FROM postings",
            [],
            |row| row.get(0),
        )?;
        let total_duration_hours: f64 = self.conn.query_row(
            "SELECT COALESCE(SUM(duration_ms), 0) / 3600000.0 FROM tracks",
            [],
            |row| row.get(0),
        )?;

        Ok(LibraryStats {
            track_count,
            posting_count,
            distinct_hashes,
            total_duration_hours,
        })
    }
}

fn row_to_track(row: &rusqlite::Row<'_>) -> rusqlite::Result<Track> {
    Ok(Track {
        id: row.get(0)?,
        title: row.get(1)?,
        artist: row.get(2)?,
        duration_ms: row.get(3)?,
        created_at: row.get(4)?,
    })
}
