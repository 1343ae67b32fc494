//! Upstream odds feed integration.
//!
//! Defines the `OddsFeed` trait the scheduler polls through, and the
//! concrete client for The Odds API. The trait seam keeps the scheduler
//! testable against an in-process mock feed.

pub mod the_odds_api;

use async_trait::async_trait;

use crate::types::{Event, FeedError, QuotaSnapshot, Sport};

/// Abstraction over the upstream odds feed.
#[async_trait]
pub trait OddsFeed: Send + Sync {
    /// Fetch the upstream sports catalogue.
    async fn list_sports(&self) -> Result<Vec<Sport>, FeedError>;

    /// Fetch current odds for one sport. Returns normalised events plus
    /// the quota snapshot observed on the response, when present.
    async fn fetch_odds(
        &self,
        sport_key: &str,
    ) -> Result<(Vec<Event>, Option<QuotaSnapshot>), FeedError>;

    /// Feed name for logging.
    fn name(&self) -> &str;
}
