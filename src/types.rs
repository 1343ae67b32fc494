//! Shared types for the arbscan service.
//!
//! These types form the data model used across all modules: the normalised
//! odds snapshot coming out of the feed client, the opportunities produced
//! by the detector, and the refresh bookkeeping published by the scheduler.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Markets and price formats
// ---------------------------------------------------------------------------

/// Betting market kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketKey {
    H2h,
    Spreads,
    Totals,
}

impl MarketKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarketKey::H2h => "h2h",
            MarketKey::Spreads => "spreads",
            MarketKey::Totals => "totals",
        }
    }

    /// Parse a CSV list like `"h2h,spreads"` into market keys.
    pub fn parse_csv(csv: &str) -> Result<Vec<MarketKey>, String> {
        let mut keys = Vec::new();
        for part in csv.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let key = part.parse::<MarketKey>()?;
            if !keys.contains(&key) {
                keys.push(key);
            }
        }
        if keys.is_empty() {
            return Err("markets list is empty".to_string());
        }
        Ok(keys)
    }
}

impl FromStr for MarketKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "h2h" => Ok(MarketKey::H2h),
            "spreads" => Ok(MarketKey::Spreads),
            "totals" => Ok(MarketKey::Totals),
            other => Err(format!("unknown market key: {other}")),
        }
    }
}

impl fmt::Display for MarketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Price display format. Display-only: the upstream is always queried in
/// `american` or `decimal` (fractional is rendered locally).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OddsFormat {
    American,
    Decimal,
    Fractional,
}

impl FromStr for OddsFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "american" => Ok(OddsFormat::American),
            "decimal" => Ok(OddsFormat::Decimal),
            "fractional" => Ok(OddsFormat::Fractional),
            other => Err(format!("unknown odds format: {other}")),
        }
    }
}

impl fmt::Display for OddsFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OddsFormat::American => "american",
            OddsFormat::Decimal => "decimal",
            OddsFormat::Fractional => "fractional",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Odds snapshot model
// ---------------------------------------------------------------------------

/// An entry in the upstream sports catalogue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sport {
    pub key: String,
    pub group: String,
    pub title: String,
    pub active: bool,
    /// True while wagers are still accepted on this sport.
    pub has_outcomes: bool,
}

/// A single outcome line from a bookmaker. `price` is in the configured
/// display format; `point` carries the spread/total line where applicable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Outcome {
    pub name: String,
    pub price: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub point: Option<f64>,
}

/// One market quoted by one bookmaker on one event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketQuote {
    pub key: MarketKey,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update: Option<DateTime<Utc>>,
    pub outcomes: Vec<Outcome>,
}

/// A bookmaker's quotes on one event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bookmaker {
    pub key: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update: Option<DateTime<Utc>>,
    pub markets: Vec<MarketQuote>,
}

/// A sporting event with odds from multiple bookmakers.
///
/// Identity for dedup, joins and store keys is the fingerprint
/// `(sport_key, commence_time, home_team, away_team)` — not the upstream
/// id, which is opaque and not guaranteed stable across sweeps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub sport_key: String,
    pub sport_title: String,
    pub commence_time: DateTime<Utc>,
    pub home_team: String,
    pub away_team: String,
    #[serde(default)]
    pub bookmakers: Vec<Bookmaker>,
}

impl Event {
    /// Stable identity string used as the store key and for joins.
    pub fn fingerprint(&self) -> String {
        format!(
            "{}|{}|{}|{}",
            self.sport_key,
            rfc3339(&self.commence_time),
            self.home_team,
            self.away_team,
        )
    }

    /// Human-readable "Away @ Home" label.
    pub fn name(&self) -> String {
        format!("{} @ {}", self.away_team, self.home_team)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}, {} books)",
            self.name(),
            self.sport_key,
            self.bookmakers.len()
        )
    }
}

// ---------------------------------------------------------------------------
// Opportunities
// ---------------------------------------------------------------------------

/// A single wager in a proposed arbitrage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Leg {
    pub outcome: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub point: Option<f64>,
    /// Key of the bookmaker offering the best price for this outcome.
    pub bookmaker: String,
    /// Price in the configured display format.
    pub price: f64,
    pub decimal_price: f64,
    /// Implied probability, banker's-rounded at 6 decimal places.
    pub implied_prob: f64,
    /// Fraction of unit bankroll to stake on this leg (unrounded; sums to 1).
    pub stake_share: f64,
    /// Monetary stake per 100 units of bankroll, banker's-rounded at 2 dp.
    pub stake_per_100: f64,
}

/// A detected arbitrage opportunity. Immutable once emitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Opportunity {
    pub sport_key: String,
    pub event_name: String,
    pub home_team: String,
    pub away_team: String,
    pub commence_time: DateTime<Utc>,
    pub market: MarketKey,
    /// Legs ordered by outcome key, one per outcome.
    pub legs: Vec<Leg>,
    /// Sum of the legs' implied probabilities; strictly below 1.
    pub total_implied_prob: f64,
    /// `(1 / total_implied_prob - 1) * 100`.
    pub profit_pct: f64,
    pub detected_at: DateTime<Utc>,
}

impl Opportunity {
    /// Event identity, matching [`Event::fingerprint`].
    pub fn fingerprint(&self) -> String {
        format!(
            "{}|{}|{}|{}",
            self.sport_key,
            rfc3339(&self.commence_time),
            self.home_team,
            self.away_team,
        )
    }

    /// Minute-granularity detection bucket used for append idempotence.
    pub fn minute_bucket(&self) -> String {
        self.detected_at.format("%Y-%m-%dT%H:%M").to_string()
    }
}

impl fmt::Display for Opportunity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}) {:.2}% across {:?}",
            self.event_name,
            self.market,
            self.profit_pct,
            self.legs.iter().map(|l| l.bookmaker.as_str()).collect::<Vec<_>>(),
        )
    }
}

// ---------------------------------------------------------------------------
// Quota and refresh bookkeeping
// ---------------------------------------------------------------------------

/// Advisory view of the upstream request quota, read from response headers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requests_remaining: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requests_used: Option<u64>,
    pub observed_at: DateTime<Utc>,
}

/// Terminal status of one refresh cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefreshStatus {
    /// Every sport fetched and both store transactions committed.
    Ok,
    /// Some sports were skipped, the cycle aborted on quota, or the
    /// opportunity append failed after the snapshot was replaced.
    Partial,
    /// Cycle failed; the prior snapshot remains authoritative.
    Failed,
    Cancelled,
}

impl fmt::Display for RefreshStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RefreshStatus::Ok => "ok",
            RefreshStatus::Partial => "partial",
            RefreshStatus::Failed => "failed",
            RefreshStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Result of one refresh cycle, returned to manual-refresh callers and
/// folded into [`LastRun`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshResult {
    pub status: RefreshStatus,
    pub events_fetched: usize,
    pub opportunities_found: usize,
    pub opportunities_persisted: usize,
    pub sports_checked: Vec<String>,
    pub errors: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quota: Option<QuotaSnapshot>,
    pub duration_ms: u64,
    pub finished_at: DateTime<Utc>,
}

impl RefreshResult {
    /// The result handed to waiters when shutdown pre-empts their refresh.
    pub fn cancelled() -> Self {
        RefreshResult {
            status: RefreshStatus::Cancelled,
            events_fetched: 0,
            opportunities_found: 0,
            opportunities_persisted: 0,
            sports_checked: Vec::new(),
            errors: Vec::new(),
            quota: None,
            duration_ms: 0,
            finished_at: Utc::now(),
        }
    }
}

/// Published snapshot of the most recent refresh. Single writer (the
/// scheduler), replaced wholesale so readers never see a half-updated run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LastRun {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub status: RefreshStatus,
    pub events_fetched: usize,
    pub detected: usize,
    pub persisted: usize,
    pub errors: Vec<String>,
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Classified upstream feed failures. The scheduler's retry and abort
/// policy dispatches on these variants.
#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    #[error("upstream rejected the API key")]
    Auth,

    #[error("upstream rejected the request: {0}")]
    BadRequest(String),

    #[error("request quota exhausted")]
    QuotaExhausted { retry_after: Option<Duration> },

    #[error("transient upstream failure: {0}")]
    Transient(String),

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("cancelled")]
    Cancelled,
}

/// Invalid price inputs to the conversion functions.
#[derive(Debug, PartialEq, thiserror::Error)]
pub enum PriceError {
    #[error("invalid price: {0}")]
    InvalidPrice(String),
}

/// Render an instant in the fixed RFC3339/UTC form used for store keys and
/// comparisons (`2026-08-02T12:00:00Z`).
pub fn rfc3339(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
