pub mod models;
pub mod queries;

use std::path::Path;

use rusqlite::Connection;
use thiserror::Error;

use crate::config::EngineConfig;
use crate::fingerprint::hashing;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Migration failed: {0}")]
    Migration(String),
    #[error("Schema mismatch: store has {field} = {stored}, runtime wants {runtime}")]
    SchemaMismatch {
        field: &'static str,
        stored: String,
        runtime: String,
    },
    #[error("Store corruption: {0}")]
    Corruption(String),
}

pub type Result<T> = std::result::Result<T, DbError>;

/// Header keys every store carries. A fresh store records the runtime
/// configuration; an existing store must agree on all of them before any
/// payload table is touched.
const HEADER_FIELDS: &[&str] = &[
    "schema_version",
    "sample_rate",
    "window_size",
    "hop_size",
    "hash_layout",
    "hot_hash_cap",
];

/// The fingerprint index and track catalog, one SQLite file.
#[derive(Debug)]
pub struct Database {
    pub conn: Connection,
    hot_hash_cap: usize,
}

impl Database {
    pub fn open(path: &Path, cfg: &EngineConfig) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn = Connection::open(path)?;
        Self::from_connection(conn, cfg)
    }

    pub fn open_in_memory(cfg: &EngineConfig) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn, cfg)
    }

    pub fn hot_hash_cap(&self) -> usize {
        self.hot_hash_cap
    }

    /// Fingerprint schema version recorded in the store header.
    pub fn schema_version(&self) -> Result<u32> {
        let value: String = self
            .conn
            .query_row(
                "SELECT value FROM meta WHERE key = 'schema_version'",
                [],
                |row| row.get(0),
            )
            .map_err(corruption_guard)?;
        value
            .parse()
            .map_err(|_| DbError::Corruption(format!("schema_version is not an integer: {value}")))
    }

    fn from_connection(conn: Connection, cfg: &EngineConfig) -> Result<Self> {
        let db = Self {
            conn,
            hot_hash_cap: cfg.hot_hash_cap,
        };
        db.init(cfg)?;
        Ok(db)
    }

    fn init(&self, cfg: &EngineConfig) -> Result<()> {
        // WAL mode for better concurrent read performance
        self.conn.pragma_update(None, "journal_mode", "WAL")?;
        self.conn.pragma_update(None, "synchronous", "NORMAL")?;
        self.conn.pragma_update(None, "foreign_keys", "ON")?;

        if self.has_table("meta").map_err(corruption_guard)? {
            // Existing store: the header decides before anything else runs.
            self.verify_header(cfg)?;
            self.migrate()?;
        } else if self.is_empty_store().map_err(corruption_guard)? {
            self.migrate()?;
            self.write_header(cfg)?;
        } else {
            return Err(DbError::Corruption(
                "store has payload tables but no schema header".into(),
            ));
        }
        Ok(())
    }

    fn has_table(&self, name: &str) -> rusqlite::Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [name],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn is_empty_store(&self) -> rusqlite::Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'",
            [],
            |row| row.get(0),
        )?;
        Ok(count == 0)
    }

    fn migrate(&self) -> Result<()> {
        let version: i32 = self
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap_or(0);

        if version < 1 {
            self.migrate_v1()?;
        }

        self.conn.pragma_update(None, "user_version", 1)?;
        Ok(())
    }

    /// V1: schema header + catalog + posting index
    fn migrate_v1(&self) -> Result<()> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS meta (
                key     TEXT PRIMARY KEY,
                value   TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS tracks (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                title           TEXT NOT NULL,
                artist          TEXT NOT NULL,
                duration_ms     INTEGER NOT NULL,
                created_at      TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS postings (
                hash        INTEGER NOT NULL,
                track_id    INTEGER NOT NULL REFERENCES tracks(id) ON DELETE CASCADE,
                t_anchor    INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_postings_hash ON postings(hash);
            CREATE INDEX IF NOT EXISTS idx_postings_track ON postings(track_id);
            ",
        )?;
        Ok(())
    }

    fn header_values(cfg: &EngineConfig) -> Vec<(&'static str, String)> {
        vec![
            ("schema_version", cfg.schema_version.to_string()),
            ("sample_rate", cfg.sample_rate.to_string()),
            ("window_size", cfg.window_size.to_string()),
            ("hop_size", cfg.hop_size.to_string()),
            ("hash_layout", hashing::HASH_LAYOUT.to_string()),
            ("hot_hash_cap", cfg.hot_hash_cap.to_string()),
        ]
    }

    fn write_header(&self, cfg: &EngineConfig) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare("INSERT INTO meta (key, value) VALUES (?1, ?2)")?;
            for (key, value) in Self::header_values(cfg) {
                stmt.execute([key, value.as_str()])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn verify_header(&self, cfg: &EngineConfig) -> Result<()> {
        for (field, runtime) in Self::header_values(cfg) {
            debug_assert!(HEADER_FIELDS.contains(&field));
            let stored: Option<String> = self
                .conn
                .query_row("SELECT value FROM meta WHERE key = ?1", [field], |row| {
                    row.get(0)
                })
                .map(Some)
                .or_else(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => Ok(None),
                    other => Err(corruption_guard(other)),
                })?;

            match stored {
                None => {
                    return Err(DbError::Corruption(format!(
                        "schema header is missing {field}"
                    )))
                }
                Some(stored) if stored != runtime => {
                    return Err(DbError::SchemaMismatch {
                        field,
                        stored,
                        runtime,
                    })
                }
                Some(_) => {}
            }
        }
        Ok(())
    }
}

/// Surface low-level SQLite corruption as `StoreCorruption` rather than a
/// generic database error.
fn corruption_guard(e: rusqlite::Error) -> DbError {
    match &e {
        rusqlite::Error::SqliteFailure(err, _)
            if matches!(
                err.code,
                rusqlite::ErrorCode::DatabaseCorrupt | rusqlite::ErrorCode::NotADatabase
            ) =>
        {
            DbError::Corruption(e.to_string())
        }
        _ => DbError::Sqlite(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Unique temp path per test; atomic counter avoids collisions when the
    /// test harness runs in parallel.
    fn temp_db_path(tag: &str) -> PathBuf {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let id = COUNTER.fetch_add(1, Ordering::Relaxed);
        std::env::temp_dir().join(format!(
            "fftrack_test_{}_{}_{}.db",
            tag,
            std::process::id(),
            id
        ))
    }

    #[test]
    fn test_fresh_store_writes_header() {
        let cfg = EngineConfig::default();
        let db = Database::open_in_memory(&cfg).unwrap();
        let version: String = db
            .conn
            .query_row(
                "SELECT value FROM meta WHERE key = 'schema_version'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(version, "1");
        assert_eq!(db.schema_version().unwrap(), 1);
    }

    #[test]
    fn test_reopen_with_same_config_succeeds() {
        let path = temp_db_path("reopen");
        let cfg = EngineConfig::default();
        drop(Database::open(&path, &cfg).unwrap());
        assert!(Database::open(&path, &cfg).is_ok());
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_window_size_mismatch_is_rejected() {
        let path = temp_db_path("mismatch");
        drop(Database::open(&path, &EngineConfig::default()).unwrap());

        let other = EngineConfig {
            window_size: 2048,
            hop_size: 1024,
            ..EngineConfig::default()
        };
        let err = Database::open(&path, &other).unwrap_err();
        assert!(matches!(
            err,
            DbError::SchemaMismatch {
                field: "window_size",
                ..
            }
        ));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_schema_version_mismatch_is_rejected() {
        let path = temp_db_path("version");
        drop(Database::open(&path, &EngineConfig::default()).unwrap());

        let other = EngineConfig {
            schema_version: 2,
            ..EngineConfig::default()
        };
        let err = Database::open(&path, &other).unwrap_err();
        assert!(matches!(
            err,
            DbError::SchemaMismatch {
                field: "schema_version",
                ..
            }
        ));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_hot_hash_cap_is_part_of_header() {
        let path = temp_db_path("hotcap");
        drop(Database::open(&path, &EngineConfig::default()).unwrap());

        let other = EngineConfig {
            hot_hash_cap: 500,
            ..EngineConfig::default()
        };
        let err = Database::open(&path, &other).unwrap_err();
        assert!(matches!(
            err,
            DbError::SchemaMismatch {
                field: "hot_hash_cap",
                ..
            }
        ));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_headerless_store_is_corruption() {
        let path = temp_db_path("headerless");
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute_batch("CREATE TABLE tracks (id INTEGER PRIMARY KEY);")
                .unwrap();
        }
        let err = Database::open(&path, &EngineConfig::default()).unwrap_err();
        assert!(matches!(err, DbError::Corruption(_)));
        std::fs::remove_file(&path).ok();
    }
}
