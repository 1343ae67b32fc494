//! Database schema creation and migrations.
//!
//! The schema version lives in a one-row `meta` table. On open, an older
//! version is upgraded in place before the first refresh; a newer version
//! than this build understands is refused.

use rusqlite::Connection;

use super::StoreError;

/// Schema version written by this build.
pub const SCHEMA_VERSION: i64 = 1;

/// Create all tables and indexes, then run any pending migrations.
pub fn init(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS meta (
            version INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS latest_events (
            fingerprint TEXT PRIMARY KEY,
            sport_key TEXT NOT NULL,
            commence_time TEXT NOT NULL,
            payload TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_latest_sport ON latest_events(sport_key);

        CREATE TABLE IF NOT EXISTS opportunities (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            fingerprint TEXT NOT NULL,
            sport_key TEXT NOT NULL,
            market TEXT NOT NULL,
            profit_pct REAL NOT NULL,
            detected_at TEXT NOT NULL,
            minute_bucket TEXT NOT NULL,
            payload TEXT NOT NULL
        );

        CREATE UNIQUE INDEX IF NOT EXISTS idx_opp_bucket
            ON opportunities(fingerprint, market, minute_bucket);
        CREATE INDEX IF NOT EXISTS idx_opp_detected
            ON opportunities(detected_at DESC, sport_key, profit_pct DESC);
        CREATE INDEX IF NOT EXISTS idx_opp_sport ON opportunities(sport_key);
        ",
    )?;

    migrate(conn)
}

fn current_version(conn: &Connection) -> Result<Option<i64>, StoreError> {
    let mut stmt = conn.prepare("SELECT version FROM meta LIMIT 1")?;
    let mut rows = stmt.query([])?;
    match rows.next()? {
        Some(row) => Ok(Some(row.get(0)?)),
        None => Ok(None),
    }
}

fn migrate(conn: &Connection) -> Result<(), StoreError> {
    match current_version(conn)? {
        None => {
            conn.execute("INSERT INTO meta (version) VALUES (?1)", [SCHEMA_VERSION])?;
            Ok(())
        }
        Some(v) if v == SCHEMA_VERSION => Ok(()),
        Some(v) if v < SCHEMA_VERSION => {
            // No historical versions exist yet; bump in place once
            // migrations start accruing here.
            conn.execute("UPDATE meta SET version = ?1", [SCHEMA_VERSION])?;
            Ok(())
        }
        Some(v) => Err(StoreError::VersionMismatch { found: v, supported: SCHEMA_VERSION }),
    }
}
