//! SQLite persistence for the latest odds snapshot and the opportunity log.
//!
//! Two logical tables: `latest_events`, replaced wholesale per refresh
//! cycle inside one transaction, and `opportunities`, append-only with a
//! minute-bucket uniqueness rule so a double-fired scheduler cannot write
//! duplicate rows. Writers are serialised behind a connection mutex;
//! every public operation is a single consistent transaction.

mod schema;

pub use schema::SCHEMA_VERSION;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::types::{rfc3339, Event, Opportunity};

/// Hard cap on rows returned by opportunity queries.
pub const MAX_QUERY_LIMIT: usize = 500;

/// Store-level failures. Writes never partially apply: a failed
/// transaction rolls back and the prior contents remain authoritative.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("serialisation error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store schema version {found} is newer than supported {supported}")]
    VersionMismatch { found: i64, supported: i64 },
}

/// Filters for [`Store::list_opportunities`].
#[derive(Debug, Clone, Default)]
pub struct OpportunityFilter {
    pub sport: Option<String>,
    pub min_profit_pct: Option<f64>,
    /// Only rows with `detected_at >= since`.
    pub since: Option<DateTime<Utc>>,
    /// Clamped to [`MAX_QUERY_LIMIT`]; 0 means the cap.
    pub limit: usize,
}

/// Shared handle over the embedded database. Internally synchronised;
/// clone the surrounding `Arc` to share across tasks.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open (creating if needed) the store at `path` and run migrations.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        schema::init(&conn)?;
        info!(path = %path.display(), "Store opened");
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        schema::init(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        // A poisoned mutex only means a panic mid-transaction; SQLite has
        // already rolled back, so the connection is safe to reuse.
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    // -- latest_events ---------------------------------------------------

    /// Atomically replace the latest-events snapshot. Readers observe
    /// either the previous or the new set, never a mix.
    pub fn replace_latest(&self, events: &[Event]) -> Result<(), StoreError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM latest_events", [])?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO latest_events
                 (fingerprint, sport_key, commence_time, payload)
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            for event in events {
                stmt.execute(params![
                    event.fingerprint(),
                    event.sport_key,
                    rfc3339(&event.commence_time),
                    serde_json::to_string(event)?,
                ])?;
            }
        }
        tx.commit()?;
        debug!(events = events.len(), "Latest snapshot replaced");
        Ok(())
    }

    /// The latest snapshot, optionally filtered by sport, ordered by
    /// commence time.
    pub fn list_latest(&self, sport: Option<&str>) -> Result<Vec<Event>, StoreError> {
        let conn = self.conn();
        let mut events = Vec::new();

        let mut collect = |payload: String| {
            match serde_json::from_str::<Event>(&payload) {
                Ok(event) => events.push(event),
                // A malformed row (e.g. written by a future build) is
                // skipped rather than failing the whole read.
                Err(e) => warn!(error = %e, "Skipping undecodable latest_events row"),
            }
        };

        match sport {
            Some(sport) => {
                let mut stmt = conn.prepare(
                    "SELECT payload FROM latest_events
                     WHERE sport_key = ?1
                     ORDER BY commence_time, fingerprint",
                )?;
                let rows = stmt.query_map([sport], |row| row.get::<_, String>(0))?;
                for payload in rows {
                    collect(payload?);
                }
            }
            None => {
                let mut stmt = conn.prepare(
                    "SELECT payload FROM latest_events
                     ORDER BY commence_time, fingerprint",
                )?;
                let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
                for payload in rows {
                    collect(payload?);
                }
            }
        }

        Ok(events)
    }

    // -- opportunities ---------------------------------------------------

    /// Append detected opportunities in one transaction. Rows whose
    /// `(fingerprint, market, minute_bucket)` already exist are skipped,
    /// making the append idempotent within a minute. Returns the number
    /// of rows actually inserted.
    pub fn append_opportunities(&self, ops: &[Opportunity]) -> Result<usize, StoreError> {
        if ops.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let mut inserted = 0usize;
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO opportunities
                 (fingerprint, sport_key, market, profit_pct, detected_at,
                  minute_bucket, payload)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for op in ops {
                inserted += stmt.execute(params![
                    op.fingerprint(),
                    op.sport_key,
                    op.market.as_str(),
                    op.profit_pct,
                    rfc3339(&op.detected_at),
                    op.minute_bucket(),
                    serde_json::to_string(op)?,
                ])?;
            }
        }
        tx.commit()?;
        debug!(
            offered = ops.len(),
            inserted,
            "Opportunities appended"
        );
        Ok(inserted)
    }

    /// Query the opportunity log, newest first (then highest profit).
    pub fn list_opportunities(
        &self,
        filter: &OpportunityFilter,
    ) -> Result<Vec<Opportunity>, StoreError> {
        let limit = if filter.limit == 0 {
            MAX_QUERY_LIMIT
        } else {
            filter.limit.min(MAX_QUERY_LIMIT)
        };

        let mut sql = String::from("SELECT payload FROM opportunities WHERE 1=1");
        let mut args: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
        if let Some(sport) = &filter.sport {
            sql.push_str(" AND sport_key = ?");
            args.push(Box::new(sport.clone()));
        }
        if let Some(min_profit) = filter.min_profit_pct {
            sql.push_str(" AND profit_pct >= ?");
            args.push(Box::new(min_profit));
        }
        if let Some(since) = &filter.since {
            sql.push_str(" AND detected_at >= ?");
            args.push(Box::new(rfc3339(since)));
        }
        sql.push_str(" ORDER BY detected_at DESC, profit_pct DESC LIMIT ?");
        args.push(Box::new(limit as i64));

        let conn = self.conn();
        let mut stmt = conn.prepare(&sql)?;
        let params = rusqlite::params_from_iter(args.iter().map(|a| a.as_ref()));
        let rows = stmt.query_map(params, |row| row.get::<_, String>(0))?;

        let mut ops = Vec::new();
        for payload in rows {
            match serde_json::from_str::<Opportunity>(&payload?) {
                Ok(op) => ops.push(op),
                Err(e) => warn!(error = %e, "Skipping undecodable opportunities row"),
            }
        }
        Ok(ops)
    }

    /// Delete opportunities detected before `older_than`. Returns the
    /// number of rows removed.
    pub fn purge_opportunities(&self, older_than: DateTime<Utc>) -> Result<usize, StoreError> {
        let conn = self.conn();
        let removed = conn.execute(
            "DELETE FROM opportunities WHERE detected_at < ?1",
            [rfc3339(&older_than)],
        )?;
        if removed > 0 {
            debug!(removed, "Old opportunities purged");
        }
        Ok(removed)
    }

    /// Most recent detection instant in the log, if any.
    pub fn latest_detection(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        let conn = self.conn();
        let raw: Option<String> = conn
            .query_row(
                "SELECT detected_at FROM opportunities
                 ORDER BY detected_at DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;
        Ok(raw
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc)))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Bookmaker, Leg, MarketKey, MarketQuote, Outcome};
    use chrono::{Duration, TimeZone};

    fn ts(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 9, 1, h, m, s).unwrap()
    }

    fn make_event(sport: &str, home: &str) -> Event {
        Event {
            sport_key: sport.into(),
            sport_title: sport.into(),
            commence_time: ts(18, 0, 0),
            home_team: home.into(),
            away_team: "Visitors".into(),
            bookmakers: vec![Bookmaker {
                key: "draftkings".into(),
                title: "DraftKings".into(),
                last_update: None,
                markets: vec![MarketQuote {
                    key: MarketKey::H2h,
                    last_update: None,
                    outcomes: vec![
                        Outcome { name: home.into(), price: -130.0, point: None },
                        Outcome { name: "Visitors".into(), price: 110.0, point: None },
                    ],
                }],
            }],
        }
    }

    fn make_op(sport: &str, home: &str, profit: f64, detected_at: DateTime<Utc>) -> Opportunity {
        Opportunity {
            sport_key: sport.into(),
            event_name: format!("Visitors @ {home}"),
            home_team: home.into(),
            away_team: "Visitors".into(),
            commence_time: ts(18, 0, 0),
            market: MarketKey::H2h,
            legs: vec![Leg {
                outcome: home.into(),
                point: None,
                bookmaker: "draftkings".into(),
                price: 150.0,
                decimal_price: 2.5,
                implied_prob: 0.4,
                stake_share: 0.456,
                stake_per_100: 45.64,
            }],
            total_implied_prob: 1.0 / (1.0 + profit / 100.0),
            profit_pct: profit,
            detected_at,
        }
    }

    #[test]
    fn test_replace_and_list_latest() {
        let store = Store::open_in_memory().unwrap();
        store
            .replace_latest(&[make_event("basketball_nba", "Celtics"), make_event("soccer_epl", "Arsenal")])
            .unwrap();

        assert_eq!(store.list_latest(None).unwrap().len(), 2);
        let nba = store.list_latest(Some("basketball_nba")).unwrap();
        assert_eq!(nba.len(), 1);
        assert_eq!(nba[0].home_team, "Celtics");
        assert!(store.list_latest(Some("icehockey_nhl")).unwrap().is_empty());
    }

    #[test]
    fn test_replace_latest_swaps_whole_snapshot() {
        let store = Store::open_in_memory().unwrap();
        store.replace_latest(&[make_event("basketball_nba", "Celtics")]).unwrap();
        store.replace_latest(&[make_event("basketball_nba", "Lakers")]).unwrap();

        let events = store.list_latest(None).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].home_team, "Lakers");
    }

    #[test]
    fn test_replace_latest_empty_clears() {
        let store = Store::open_in_memory().unwrap();
        store.replace_latest(&[make_event("basketball_nba", "Celtics")]).unwrap();
        store.replace_latest(&[]).unwrap();
        assert!(store.list_latest(None).unwrap().is_empty());
    }

    #[test]
    fn test_append_opportunities_minute_dedup() {
        let store = Store::open_in_memory().unwrap();
        let op = make_op("basketball_nba", "Celtics", 3.5, ts(12, 30, 10));

        assert_eq!(store.append_opportunities(&[op.clone()]).unwrap(), 1);

        // Same fingerprint/market/minute, different second: skipped.
        let mut again = op.clone();
        again.detected_at = ts(12, 30, 45);
        assert_eq!(store.append_opportunities(&[again]).unwrap(), 0);

        // Next minute: inserted.
        let mut later = op;
        later.detected_at = ts(12, 31, 0);
        assert_eq!(store.append_opportunities(&[later]).unwrap(), 1);

        let all = store.list_opportunities(&OpportunityFilter::default()).unwrap();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn test_append_empty_is_noop() {
        let store = Store::open_in_memory().unwrap();
        assert_eq!(store.append_opportunities(&[]).unwrap(), 0);
    }

    #[test]
    fn test_list_opportunities_filters() {
        let store = Store::open_in_memory().unwrap();
        store
            .append_opportunities(&[
                make_op("basketball_nba", "Celtics", 1.0, ts(10, 0, 0)),
                make_op("basketball_nba", "Lakers", 5.0, ts(11, 0, 0)),
                make_op("soccer_epl", "Arsenal", 3.0, ts(12, 0, 0)),
            ])
            .unwrap();

        let nba = store
            .list_opportunities(&OpportunityFilter {
                sport: Some("basketball_nba".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(nba.len(), 2);

        let profitable = store
            .list_opportunities(&OpportunityFilter {
                min_profit_pct: Some(2.5),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(profitable.len(), 2);

        let recent = store
            .list_opportunities(&OpportunityFilter {
                since: Some(ts(11, 0, 0)),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(recent.len(), 2);

        let limited = store
            .list_opportunities(&OpportunityFilter { limit: 1, ..Default::default() })
            .unwrap();
        assert_eq!(limited.len(), 1);
        // Newest first
        assert_eq!(limited[0].home_team, "Arsenal");
    }

    #[test]
    fn test_list_opportunities_limit_clamped() {
        let store = Store::open_in_memory().unwrap();
        let filter = OpportunityFilter { limit: 100_000, ..Default::default() };
        // Just exercises the clamp path; no rows to return.
        assert!(store.list_opportunities(&filter).unwrap().is_empty());
    }

    #[test]
    fn test_purge_opportunities() {
        let store = Store::open_in_memory().unwrap();
        store
            .append_opportunities(&[
                make_op("basketball_nba", "Celtics", 1.0, ts(10, 0, 0)),
                make_op("basketball_nba", "Lakers", 2.0, ts(12, 0, 0)),
            ])
            .unwrap();

        assert_eq!(store.purge_opportunities(ts(11, 0, 0)).unwrap(), 1);
        let rest = store.list_opportunities(&OpportunityFilter::default()).unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].home_team, "Lakers");
    }

    #[test]
    fn test_latest_detection() {
        let store = Store::open_in_memory().unwrap();
        assert!(store.latest_detection().unwrap().is_none());

        store
            .append_opportunities(&[
                make_op("basketball_nba", "Celtics", 1.0, ts(10, 0, 0)),
                make_op("basketball_nba", "Lakers", 2.0, ts(12, 0, 0)),
            ])
            .unwrap();
        assert_eq!(store.latest_detection().unwrap(), Some(ts(12, 0, 0)));
    }

    #[test]
    fn test_open_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/deeper/arbscan.db");
        let store = Store::open(&path).unwrap();
        store.replace_latest(&[make_event("basketball_nba", "Celtics")]).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_reopen_preserves_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("arbscan.db");
        {
            let store = Store::open(&path).unwrap();
            store
                .append_opportunities(&[make_op("basketball_nba", "Celtics", 2.0, ts(10, 0, 0))])
                .unwrap();
        }
        let store = Store::open(&path).unwrap();
        assert_eq!(
            store.list_opportunities(&OpportunityFilter::default()).unwrap().len(),
            1
        );
    }

    #[test]
    fn test_opportunity_roundtrip_preserves_legs() {
        let store = Store::open_in_memory().unwrap();
        let op = make_op("basketball_nba", "Celtics", 3.5, ts(12, 0, 0));
        store.append_opportunities(&[op.clone()]).unwrap();

        let back = store.list_opportunities(&OpportunityFilter::default()).unwrap();
        assert_eq!(back[0].legs.len(), 1);
        assert_eq!(back[0].legs[0].bookmaker, "draftkings");
        assert!((back[0].legs[0].stake_per_100 - 45.64).abs() < 1e-9);
        assert_eq!(back[0].detected_at, op.detected_at);
    }

    #[test]
    fn test_sum_to_one_not_required_for_storage() {
        // The store does not validate detector maths; it persists rows
        // verbatim. Guard that profit filters operate on the column.
        let store = Store::open_in_memory().unwrap();
        store
            .append_opportunities(&[make_op("x", "Y", 0.0, ts(9, 0, 0))])
            .unwrap();
        let none = store
            .list_opportunities(&OpportunityFilter {
                min_profit_pct: Some(0.1),
                ..Default::default()
            })
            .unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn test_purge_is_age_based_not_count_based() {
        let store = Store::open_in_memory().unwrap();
        let base = ts(0, 0, 0);
        let ops: Vec<Opportunity> = (0..10)
            .map(|i| make_op("basketball_nba", &format!("Team{i}"), 1.0, base + Duration::minutes(i)))
            .collect();
        store.append_opportunities(&ops).unwrap();
        assert_eq!(store.purge_opportunities(base + Duration::minutes(5)).unwrap(), 5);
    }
}
