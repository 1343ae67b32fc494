//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs. The
//! upstream API key is referenced by env-var name in the config and
//! resolved at startup via `std::env::var`.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fs;

use crate::types::{MarketKey, OddsFormat};

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub detector: DetectorConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct FeedConfig {
    /// Name of the env var holding The Odds API key.
    pub api_key_env: String,
    pub base_url: String,
    /// CSV of upstream regions (`us`, `us2`, `uk`, `eu`, `au`).
    pub regions: String,
    /// CSV subset of `h2h,spreads,totals`.
    pub markets: String,
    /// `american` | `decimal` | `fractional`; display-only.
    pub odds_format: String,
    /// Sport keys to poll. Empty = all active sports in the catalogue.
    pub sports: Vec<String>,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            api_key_env: "ODDS_API_KEY".to_string(),
            base_url: "https://api.the-odds-api.com/v4".to_string(),
            regions: "us,us2".to_string(),
            markets: "h2h".to_string(),
            odds_format: "american".to_string(),
            sports: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DetectorConfig {
    /// Minimum arbitrage profit % to surface.
    pub min_profit_pct: f64,
    /// Minimum distinct bookmakers that must quote a market.
    pub min_books: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self { min_profit_pct: 0.0, min_books: 2 }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Auto-refresh period in seconds; 0 = manual refreshes only.
    pub refresh_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { refresh_interval_secs: 14_400 }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StoreConfig {
    pub db_path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { db_path: "data/arbscan.db".to_string() }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { enabled: true, port: 8000 }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        let config: AppConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {path}"))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        self.markets()?;
        self.odds_format()?;
        if self.detector.min_books == 0 {
            bail!("detector.min_books must be at least 1");
        }
        if self.feed.regions.trim().is_empty() {
            bail!("feed.regions must not be empty");
        }
        Ok(())
    }

    /// Resolve the upstream API key from the configured env var.
    /// Missing or empty keys are fatal startup errors.
    pub fn resolve_api_key(&self) -> Result<String> {
        let key = std::env::var(&self.feed.api_key_env).unwrap_or_default();
        if key.trim().is_empty() {
            bail!(
                "No API key found: set the {} environment variable",
                self.feed.api_key_env
            );
        }
        Ok(key)
    }

    /// The configured market keys, parsed.
    pub fn markets(&self) -> Result<Vec<MarketKey>> {
        MarketKey::parse_csv(&self.feed.markets)
            .map_err(|e| anyhow::anyhow!("invalid feed.markets: {e}"))
    }

    /// The configured display format, parsed.
    pub fn odds_format(&self) -> Result<OddsFormat> {
        self.feed
            .odds_format
            .parse::<OddsFormat>()
            .map_err(|e| anyhow::anyhow!("invalid feed.odds_format: {e}"))
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            feed: FeedConfig::default(),
            detector: DetectorConfig::default(),
            scheduler: SchedulerConfig::default(),
            store: StoreConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
