//! The Odds API integration.
//!
//! Fetches the sports catalogue and per-sport odds pages, tracks the
//! request quota advertised in response headers, and normalises the
//! loosely-typed upstream JSON into the domain model.
//!
//! API docs: https://the-odds-api.com/liveapi/guides/v4/
//! Quota headers: `x-requests-remaining`, `x-requests-used`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, warn};

use super::OddsFeed;
use crate::config::FeedConfig;
use crate::types::{
    Bookmaker, Event, FeedError, MarketKey, OddsFormat, Outcome, MarketQuote, QuotaSnapshot,
    Sport,
};

const FEED_NAME: &str = "the-odds-api";

/// Per-request timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// API response types (upstream JSON → Rust)
// ---------------------------------------------------------------------------

/// Catalogue entry as served by `/v4/sports`. Only the fields we need.
#[derive(Debug, Deserialize)]
struct RawSport {
    key: String,
    #[serde(default)]
    group: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    active: bool,
    #[serde(default)]
    has_outcomes: bool,
}

/// Event as served by `/v4/sports/{key}/odds`.
#[derive(Debug, Deserialize)]
struct RawEvent {
    #[serde(default)]
    sport_key: Option<String>,
    #[serde(default)]
    sport_title: Option<String>,
    #[serde(default)]
    commence_time: Option<String>,
    #[serde(default)]
    home_team: Option<String>,
    #[serde(default)]
    away_team: Option<String>,
    #[serde(default)]
    bookmakers: Vec<RawBookmaker>,
}

#[derive(Debug, Deserialize)]
struct RawBookmaker {
    #[serde(default)]
    key: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    last_update: Option<String>,
    #[serde(default)]
    markets: Vec<RawMarket>,
}

#[derive(Debug, Deserialize)]
struct RawMarket {
    #[serde(default)]
    key: Option<String>,
    #[serde(default)]
    last_update: Option<String>,
    #[serde(default)]
    outcomes: Vec<RawOutcome>,
}

#[derive(Debug, Deserialize)]
struct RawOutcome {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    price: Option<f64>,
    #[serde(default)]
    point: Option<f64>,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// HTTP client for The Odds API.
pub struct TheOddsApi {
    http: Client,
    base_url: String,
    api_key: String,
    regions: String,
    markets: String,
    odds_format: OddsFormat,
}

impl TheOddsApi {
    pub fn new(cfg: &FeedConfig, api_key: String, odds_format: OddsFormat) -> Result<Self, FeedError> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent("arbscan/0.1.0 (sports-arbitrage-monitor)")
            .build()
            .map_err(|e| FeedError::Transient(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            api_key,
            regions: cfg.regions.clone(),
            markets: cfg.markets.clone(),
            odds_format,
        })
    }

    // -- Internal helpers ------------------------------------------------

    /// Map a non-success status to the classified feed error.
    async fn classify_error(resp: Response) -> FeedError {
        let status = resp.status();
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => FeedError::Auth,
            StatusCode::UNPROCESSABLE_ENTITY => {
                let body = resp.text().await.unwrap_or_default();
                FeedError::BadRequest(body)
            }
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after = resp
                    .headers()
                    .get(reqwest::header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|s| s.parse::<u64>().ok())
                    .map(Duration::from_secs);
                FeedError::QuotaExhausted { retry_after }
            }
            s if s.is_server_error() => {
                FeedError::Transient(format!("upstream returned {s}"))
            }
            s => {
                let body = resp.text().await.unwrap_or_default();
                FeedError::BadRequest(format!("upstream returned {s}: {body}"))
            }
        }
    }

    fn map_request_error(e: reqwest::Error) -> FeedError {
        FeedError::Transient(format!("request failed: {e}"))
    }
}

/// Read the advisory quota counters from response headers.
fn quota_from_headers(headers: &reqwest::header::HeaderMap) -> Option<QuotaSnapshot> {
    let read = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            // The API serves these as decimal strings, occasionally with
            // a fractional part.
            .and_then(|s| s.parse::<f64>().ok())
            .map(|n| n.max(0.0) as u64)
    };
    let remaining = read("x-requests-remaining");
    let used = read("x-requests-used");
    if remaining.is_none() && used.is_none() {
        return None;
    }
    Some(QuotaSnapshot {
        requests_remaining: remaining,
        requests_used: used,
        observed_at: Utc::now(),
    })
}

// ---------------------------------------------------------------------------
// Normalisation
// ---------------------------------------------------------------------------

/// Parse an upstream timestamp. Only offset-carrying RFC3339 is accepted;
/// naïve local times are rejected.
fn parse_utc(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn parse_sports(raw: Vec<RawSport>) -> Vec<Sport> {
    raw.into_iter()
        .map(|s| Sport {
            key: s.key,
            group: s.group,
            title: s.title,
            active: s.active,
            has_outcomes: s.has_outcomes,
        })
        .collect()
}

/// Normalise one odds page into domain events.
///
/// Records missing required fields drop the enclosing object with a
/// warning; the pipeline never aborts on a malformed entry.
fn parse_events(raw: Vec<RawEvent>, sport_key: &str) -> Vec<Event> {
    let mut events = Vec::with_capacity(raw.len());

    for item in raw {
        let (home_team, away_team) = match (item.home_team, item.away_team) {
            (Some(h), Some(a)) if !h.is_empty() && !a.is_empty() => (h, a),
            _ => {
                warn!(sport = sport_key, "Dropping event without both team names");
                continue;
            }
        };

        let commence_time = match item.commence_time.as_deref().and_then(parse_utc) {
            Some(ts) => ts,
            None => {
                warn!(
                    sport = sport_key,
                    home = %home_team,
                    away = %away_team,
                    raw = ?item.commence_time,
                    "Dropping event with missing or non-UTC commence time"
                );
                continue;
            }
        };

        let mut bookmakers = Vec::with_capacity(item.bookmakers.len());
        let mut seen_quotes: HashSet<(String, MarketKey)> = HashSet::new();

        for bm in item.bookmakers {
            let (key, title) = match (bm.key, bm.title) {
                (Some(k), Some(t)) if !k.is_empty() => (k, t),
                _ => {
                    warn!(sport = sport_key, "Dropping bookmaker without a key");
                    continue;
                }
            };

            let mut markets = Vec::with_capacity(bm.markets.len());
            for market in bm.markets {
                let Some(market_key) = market
                    .key
                    .as_deref()
                    .and_then(|k| k.parse::<MarketKey>().ok())
                else {
                    debug!(
                        bookmaker = %key,
                        raw_key = ?market.key,
                        "Skipping unrecognised market"
                    );
                    continue;
                };

                // A market needs at least two sides to be quotable.
                if market.outcomes.len() < 2 {
                    warn!(
                        bookmaker = %key,
                        market = %market_key,
                        outcomes = market.outcomes.len(),
                        "Dropping market with fewer than two outcomes"
                    );
                    continue;
                }

                if !seen_quotes.insert((key.clone(), market_key)) {
                    warn!(
                        bookmaker = %key,
                        market = %market_key,
                        "Duplicate quote for (bookmaker, market); keeping the first"
                    );
                    continue;
                }

                let mut outcomes = Vec::with_capacity(market.outcomes.len());
                let mut dropped = false;
                for o in market.outcomes {
                    match (o.name, o.price) {
                        (Some(name), Some(price)) if price.is_finite() => {
                            outcomes.push(Outcome { name, price, point: o.point });
                        }
                        _ => {
                            warn!(
                                bookmaker = %key,
                                market = %market_key,
                                "Dropping market with a malformed outcome"
                            );
                            dropped = true;
                            break;
                        }
                    }
                }
                if dropped || outcomes.len() < 2 {
                    continue;
                }

                // Stable ordering: by (name, point).
                outcomes.sort_by(|a, b| {
                    a.name.cmp(&b.name).then_with(|| {
                        let pa = a.point.unwrap_or(f64::NEG_INFINITY);
                        let pb = b.point.unwrap_or(f64::NEG_INFINITY);
                        pa.total_cmp(&pb)
                    })
                });

                markets.push(MarketQuote {
                    key: market_key,
                    last_update: market.last_update.as_deref().and_then(parse_utc),
                    outcomes,
                });
            }

            if markets.is_empty() {
                continue;
            }

            bookmakers.push(Bookmaker {
                key,
                title,
                last_update: bm.last_update.as_deref().and_then(parse_utc),
                markets,
            });
        }

        events.push(Event {
            sport_key: item.sport_key.unwrap_or_else(|| sport_key.to_string()),
            sport_title: item.sport_title.unwrap_or_else(|| sport_key.to_string()),
            commence_time,
            home_team,
            away_team,
            bookmakers,
        });
    }

    events
}

// ---------------------------------------------------------------------------
// OddsFeed trait implementation
// ---------------------------------------------------------------------------

#[async_trait]
impl OddsFeed for TheOddsApi {
    async fn list_sports(&self) -> Result<Vec<Sport>, FeedError> {
        let url = format!("{}/sports", self.base_url);
        debug!(url = %url, "Fetching sports catalogue");

        let resp = self
            .http
            .get(&url)
            .query(&[("apiKey", self.api_key.as_str())])
            .send()
            .await
            .map_err(Self::map_request_error)?;

        if !resp.status().is_success() {
            return Err(Self::classify_error(resp).await);
        }

        let raw: Vec<RawSport> = resp
            .json()
            .await
            .map_err(|e| FeedError::InvalidPayload(format!("sports catalogue: {e}")))?;

        Ok(parse_sports(raw))
    }

    async fn fetch_odds(
        &self,
        sport_key: &str,
    ) -> Result<(Vec<Event>, Option<QuotaSnapshot>), FeedError> {
        let url = format!("{}/sports/{}/odds", self.base_url, sport_key);
        debug!(url = %url, "Fetching odds");

        let resp = self
            .http
            .get(&url)
            .query(&[
                ("apiKey", self.api_key.as_str()),
                ("regions", self.regions.as_str()),
                ("markets", self.markets.as_str()),
                ("oddsFormat", self.odds_format.upstream_param()),
            ])
            .send()
            .await
            .map_err(Self::map_request_error)?;

        if !resp.status().is_success() {
            return Err(Self::classify_error(resp).await);
        }

        let quota = quota_from_headers(resp.headers());

        let raw: Vec<RawEvent> = resp
            .json()
            .await
            .map_err(|e| FeedError::InvalidPayload(format!("odds page: {e}")))?;

        let events = parse_events(raw, sport_key);
        Ok((events, quota))
    }

    fn name(&self) -> &str {
        FEED_NAME
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
