//! Arbitrage detection engine.
//!
//! Scans odds across bookmakers for the same event and identifies markets
//! where the combined best-price implied probabilities sum to less than
//! 1.0, guaranteeing a risk-free profit when staked proportionally.
//!
//! Pure over its input: given identical events the output list is
//! byte-identical, including ordering and tie-break choices.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::prices::{decimal_to_implied_prob, round_half_even};
use crate::types::{Event, Leg, MarketKey, OddsFormat, Opportunity};

/// Tolerance for treating two spread/total lines as the same line.
const POINT_EPSILON: f64 = 1e-9;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Runtime detection parameters, snapshotted per refresh.
#[derive(Debug, Clone)]
pub struct DetectionConfig {
    /// Markets to scan.
    pub markets: Vec<MarketKey>,
    /// Minimum profit percentage for an opportunity to be emitted.
    pub min_profit_pct: f64,
    /// Minimum distinct bookmakers that must quote a market.
    pub min_books: usize,
    /// Format the feed prices are expressed in.
    pub odds_format: OddsFormat,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            markets: vec![MarketKey::H2h],
            min_profit_pct: 0.0,
            min_books: 2,
            odds_format: OddsFormat::American,
        }
    }
}

// ---------------------------------------------------------------------------
// Internal working set
// ---------------------------------------------------------------------------

/// One priced outcome from one bookmaker, decimal-converted.
#[derive(Debug, Clone)]
struct PricedOutcome {
    name: String,
    point: Option<f64>,
    bookmaker: String,
    price: f64,
    decimal: f64,
}

/// Identity of an outcome within a line group: name plus (for markets with
/// a line) the signed point. Ordered so that leg output is stable.
#[derive(Debug, Clone)]
struct OutcomeKey {
    name: String,
    point: Option<f64>,
}

impl Ord for OutcomeKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.name.cmp(&other.name).then_with(|| {
            let a = self.point.unwrap_or(f64::NEG_INFINITY);
            let b = other.point.unwrap_or(f64::NEG_INFINITY);
            a.total_cmp(&b)
        })
    }
}

impl PartialOrd for OutcomeKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for OutcomeKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == std::cmp::Ordering::Equal
    }
}

impl Eq for OutcomeKey {}

// ---------------------------------------------------------------------------
// Detection
// ---------------------------------------------------------------------------

/// Scan events for arbitrage opportunities.
///
/// Events that have already commenced are discarded. The result is sorted
/// by profit descending, then event fingerprint, then market.
pub fn detect(events: &[Event], cfg: &DetectionConfig, now: DateTime<Utc>) -> Vec<Opportunity> {
    let mut opportunities = Vec::new();

    for event in events {
        if event.commence_time <= now {
            debug!(event = %event.name(), "Skipping event that has already commenced");
            continue;
        }
        for market in &cfg.markets {
            scan_market(event, *market, cfg, now, &mut opportunities);
        }
    }

    opportunities.sort_by(|a, b| {
        b.profit_pct
            .total_cmp(&a.profit_pct)
            .then_with(|| a.fingerprint().cmp(&b.fingerprint()))
            .then_with(|| a.market.cmp(&b.market))
    });

    opportunities
}

/// Scan one market of one event, appending any opportunities found.
fn scan_market(
    event: &Event,
    market: MarketKey,
    cfg: &DetectionConfig,
    now: DateTime<Utc>,
    out: &mut Vec<Opportunity>,
) {
    let priced = collect_priced_outcomes(event, market, cfg.odds_format);
    if priced.is_empty() {
        return;
    }

    let mut books: Vec<&str> = priced.iter().map(|p| p.bookmaker.as_str()).collect();
    books.sort_unstable();
    books.dedup();
    if books.len() < cfg.min_books {
        return;
    }

    for group in line_groups(&priced, market) {
        let Some((total, legs)) = best_price_coverage(&group) else {
            continue;
        };

        if total >= 1.0 {
            continue;
        }
        let profit_pct = (1.0 / total - 1.0) * 100.0;
        if profit_pct < cfg.min_profit_pct {
            continue;
        }

        out.push(Opportunity {
            sport_key: event.sport_key.clone(),
            event_name: event.name(),
            home_team: event.home_team.clone(),
            away_team: event.away_team.clone(),
            commence_time: event.commence_time,
            market,
            legs,
            total_implied_prob: total,
            profit_pct,
            detected_at: now,
        });
    }
}

/// Gather every outcome for `market` across the event's bookmakers, with
/// decimal conversions. A bookmaker whose quote contains any unconvertible
/// or non-positive price is dropped for this market.
fn collect_priced_outcomes(
    event: &Event,
    market: MarketKey,
    format: OddsFormat,
) -> Vec<PricedOutcome> {
    let mut priced = Vec::new();

    'books: for bm in &event.bookmakers {
        // At most one quote per (bookmaker, market); the client enforces
        // this, `find` keeps the first either way.
        let Some(quote) = bm.markets.iter().find(|m| m.key == market) else {
            continue;
        };

        let mut converted = Vec::with_capacity(quote.outcomes.len());
        for outcome in &quote.outcomes {
            if market != MarketKey::H2h && outcome.point.is_none() {
                warn!(
                    event = %event.name(),
                    bookmaker = %bm.key,
                    market = %market,
                    outcome = %outcome.name,
                    "Dropping bookmaker quote missing a line point"
                );
                continue 'books;
            }
            match format.to_decimal(outcome.price) {
                Ok(decimal) => converted.push(PricedOutcome {
                    name: outcome.name.clone(),
                    point: if market == MarketKey::H2h { None } else { outcome.point },
                    bookmaker: bm.key.clone(),
                    price: outcome.price,
                    decimal,
                }),
                Err(e) => {
                    warn!(
                        event = %event.name(),
                        bookmaker = %bm.key,
                        market = %market,
                        outcome = %outcome.name,
                        error = %e,
                        "Dropping bookmaker quote with invalid price"
                    );
                    continue 'books;
                }
            }
        }
        priced.extend(converted);
    }

    priced
}

/// Partition priced outcomes into line groups.
///
/// `h2h` forms a single group. `spreads` groups by absolute point so that
/// symmetric handicaps (`-2.5` / `+2.5`) land together; `totals` groups by
/// point so Over/Under on the same line pair up. Lines are equal when they
/// differ by at most 1e-9 — cross-line ("middle") pairings never form.
fn line_groups(priced: &[PricedOutcome], market: MarketKey) -> Vec<Vec<PricedOutcome>> {
    if market == MarketKey::H2h {
        return vec![priced.to_vec()];
    }

    let line_of = |p: &PricedOutcome| -> f64 {
        // point presence is guaranteed by collect_priced_outcomes
        let pt = p.point.unwrap_or(0.0);
        if market == MarketKey::Spreads {
            pt.abs()
        } else {
            pt
        }
    };

    let mut sorted: Vec<PricedOutcome> = priced.to_vec();
    sorted.sort_by(|a, b| {
        line_of(a)
            .total_cmp(&line_of(b))
            .then_with(|| a.name.cmp(&b.name))
            .then_with(|| a.bookmaker.cmp(&b.bookmaker))
    });

    let mut groups: Vec<Vec<PricedOutcome>> = Vec::new();
    let mut current_line = f64::NAN;
    for p in sorted {
        let line = line_of(&p);
        if groups.is_empty() || (line - current_line).abs() > POINT_EPSILON {
            current_line = line;
            groups.push(Vec::new());
        }
        if let Some(group) = groups.last_mut() {
            group.push(p);
        }
    }
    groups
}

/// Pick the best decimal price per outcome key in the group and compute
/// the stake split. Returns `None` when the group does not cover at least
/// two distinct outcomes.
///
/// Ties on the best price go to the lexicographically smallest bookmaker
/// key, which keeps the output deterministic under input shuffling.
fn best_price_coverage(group: &[PricedOutcome]) -> Option<(f64, Vec<Leg>)> {
    let mut best: BTreeMap<OutcomeKey, &PricedOutcome> = BTreeMap::new();

    for p in group {
        let key = OutcomeKey { name: p.name.clone(), point: p.point };
        match best.get(&key) {
            Some(current)
                if p.decimal > current.decimal
                    || (p.decimal == current.decimal && p.bookmaker < current.bookmaker) =>
            {
                best.insert(key, p);
            }
            None => {
                best.insert(key, p);
            }
            _ => {}
        }
    }

    if best.len() < 2 {
        return None;
    }

    // Implied probabilities are banker's-rounded at 6 dp before summation
    // so the stored legs, total and profit stay mutually consistent.
    let mut probs = Vec::with_capacity(best.len());
    for chosen in best.values() {
        let prob = decimal_to_implied_prob(chosen.decimal).ok()?;
        probs.push(round_half_even(prob, 6));
    }
    let total: f64 = probs.iter().sum();

    let legs = best
        .values()
        .zip(probs.iter())
        .map(|(chosen, &prob)| {
            let share = prob / total;
            Leg {
                outcome: chosen.name.clone(),
                point: chosen.point,
                bookmaker: chosen.bookmaker.clone(),
                price: chosen.price,
                decimal_price: chosen.decimal,
                implied_prob: prob,
                stake_share: share,
                stake_per_100: round_half_even(share * 100.0, 2),
            }
        })
        .collect();

    Some((total, legs))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Bookmaker, MarketQuote, Outcome};
    use chrono::{Duration, TimeZone};

    fn future() -> DateTime<Utc> {
        now() + Duration::days(7)
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 9, 1, 12, 0, 0).unwrap()
    }

    fn h2h_quote(outcomes: &[(&str, f64)]) -> MarketQuote {
        MarketQuote {
            key: MarketKey::H2h,
            last_update: None,
            outcomes: outcomes
                .iter()
                .map(|(name, price)| Outcome { name: name.to_string(), price: *price, point: None })
                .collect(),
        }
    }

    fn spreads_quote(outcomes: &[(&str, f64, f64)]) -> MarketQuote {
        MarketQuote {
            key: MarketKey::Spreads,
            last_update: None,
            outcomes: outcomes
                .iter()
                .map(|(name, price, point)| Outcome {
                    name: name.to_string(),
                    price: *price,
                    point: Some(*point),
                })
                .collect(),
        }
    }

    fn book(key: &str, markets: Vec<MarketQuote>) -> Bookmaker {
        Bookmaker {
            key: key.to_string(),
            title: key.to_string(),
            last_update: None,
            markets,
        }
    }

    fn event(bookmakers: Vec<Bookmaker>) -> Event {
        Event {
            sport_key: "americanfootball_nfl".into(),
            sport_title: "NFL".into(),
            commence_time: future(),
            home_team: "Kansas City Chiefs".into(),
            away_team: "Buffalo Bills".into(),
            bookmakers,
        }
    }

    fn h2h_config() -> DetectionConfig {
        DetectionConfig::default()
    }

    // -- Classic scenarios -----------------------------------------------

    #[test]
    fn test_classic_two_way_h2h_arb() {
        // BookA: Chiefs +150 / Bills -180; BookB: Chiefs +120 / Bills +110.
        // Best: Chiefs @ BookA (d=2.5, p=0.4), Bills @ BookB (d=2.1, p~0.47619).
        let e = event(vec![
            book("booka", vec![h2h_quote(&[
                ("Kansas City Chiefs", 150.0),
                ("Buffalo Bills", -180.0),
            ])]),
            book("bookb", vec![h2h_quote(&[
                ("Kansas City Chiefs", 120.0),
                ("Buffalo Bills", 110.0),
            ])]),
        ]);

        let ops = detect(&[e], &h2h_config(), now());
        assert_eq!(ops.len(), 1);
        let op = &ops[0];

        assert!((op.total_implied_prob - 0.876190).abs() < 1e-6);
        assert!((op.profit_pct - 14.13).abs() < 0.01);

        assert_eq!(op.legs.len(), 2);
        // Legs ordered by outcome name
        assert_eq!(op.legs[0].outcome, "Buffalo Bills");
        assert_eq!(op.legs[0].bookmaker, "bookb");
        assert!((op.legs[0].decimal_price - 2.1).abs() < 1e-9);
        assert_eq!(op.legs[1].outcome, "Kansas City Chiefs");
        assert_eq!(op.legs[1].bookmaker, "booka");
        assert!((op.legs[1].decimal_price - 2.5).abs() < 1e-9);

        // Stake split ~ {Bills: 0.5436, Chiefs: 0.4564}
        assert!((op.legs[0].stake_share - 0.5436).abs() < 1e-3);
        assert!((op.legs[1].stake_share - 0.4564).abs() < 1e-3);
        let share_sum: f64 = op.legs.iter().map(|l| l.stake_share).sum();
        assert!((share_sum - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_no_arb_when_probs_exceed_one() {
        // Both books -110 / -110: best decimal per side 1.9091, sum ~1.0476.
        let e = event(vec![
            book("booka", vec![h2h_quote(&[
                ("Kansas City Chiefs", -110.0),
                ("Buffalo Bills", -110.0),
            ])]),
            book("bookb", vec![h2h_quote(&[
                ("Kansas City Chiefs", -110.0),
                ("Buffalo Bills", -110.0),
            ])]),
        ]);
        assert!(detect(&[e], &h2h_config(), now()).is_empty());
    }

    #[test]
    fn test_spreads_pair_only_symmetric_lines() {
        // BookA: ±2.5 at -110/-110 (no arb); BookB: ±3.0 at +100/-120 (no
        // arb). The cross-book -2.5 with +3.0 pairing would look like an
        // arb but must be rejected.
        let e = event(vec![
            book("booka", vec![spreads_quote(&[
                ("Kansas City Chiefs", -110.0, -2.5),
                ("Buffalo Bills", -110.0, 2.5),
            ])]),
            book("bookb", vec![spreads_quote(&[
                ("Kansas City Chiefs", 100.0, -3.0),
                ("Buffalo Bills", -120.0, 3.0),
            ])]),
        ]);
        let cfg = DetectionConfig {
            markets: vec![MarketKey::Spreads],
            ..DetectionConfig::default()
        };
        assert!(detect(&[e], &cfg, now()).is_empty());
    }

    #[test]
    fn test_spreads_symmetric_arb_detected() {
        // Same ±4.5 line quoted by both books with crossed prices.
        let e = event(vec![
            book("booka", vec![spreads_quote(&[
                ("Kansas City Chiefs", 120.0, -4.5),
                ("Buffalo Bills", -140.0, 4.5),
            ])]),
            book("bookb", vec![spreads_quote(&[
                ("Kansas City Chiefs", -105.0, -4.5),
                ("Buffalo Bills", 115.0, 4.5),
            ])]),
        ]);
        let cfg = DetectionConfig {
            markets: vec![MarketKey::Spreads],
            ..DetectionConfig::default()
        };
        let ops = detect(&[e], &cfg, now());
        assert_eq!(ops.len(), 1);
        // Chiefs +120 @ booka, Bills +115 @ bookb
        assert_eq!(ops[0].legs[0].bookmaker, "bookb");
        assert_eq!(ops[0].legs[1].bookmaker, "booka");
        assert!(ops[0].total_implied_prob < 1.0);
        assert_eq!(ops[0].legs[0].point, Some(4.5));
        assert_eq!(ops[0].legs[1].point, Some(-4.5));
    }

    #[test]
    fn test_totals_group_by_point() {
        // Over/Under 45.5 crossed across books.
        let e = event(vec![
            book("booka", vec![MarketQuote {
                key: MarketKey::Totals,
                last_update: None,
                outcomes: vec![
                    Outcome { name: "Over".into(), price: 110.0, point: Some(45.5) },
                    Outcome { name: "Under".into(), price: -130.0, point: Some(45.5) },
                ],
            }]),
            book("bookb", vec![MarketQuote {
                key: MarketKey::Totals,
                last_update: None,
                outcomes: vec![
                    Outcome { name: "Over".into(), price: -120.0, point: Some(45.5) },
                    Outcome { name: "Under".into(), price: 105.0, point: Some(45.5) },
                ],
            }]),
        ]);
        let cfg = DetectionConfig {
            markets: vec![MarketKey::Totals],
            ..DetectionConfig::default()
        };
        let ops = detect(&[e], &cfg, now());
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].legs.len(), 2);
        assert_eq!(ops[0].legs[0].outcome, "Over");
        assert_eq!(ops[0].legs[0].bookmaker, "booka");
        assert_eq!(ops[0].legs[1].outcome, "Under");
        assert_eq!(ops[0].legs[1].bookmaker, "bookb");
    }

    // -- Determinism and tie-breaks --------------------------------------

    #[test]
    fn test_determinism_under_bookmaker_shuffle() {
        let books = || {
            vec![
                book("zeta", vec![h2h_quote(&[
                    ("Kansas City Chiefs", 150.0),
                    ("Buffalo Bills", -180.0),
                ])]),
                book("alpha", vec![h2h_quote(&[
                    ("Kansas City Chiefs", 150.0),
                    ("Buffalo Bills", 110.0),
                ])]),
                book("mid", vec![h2h_quote(&[
                    ("Kansas City Chiefs", 120.0),
                    ("Buffalo Bills", 105.0),
                ])]),
            ]
        };
        let mut shuffled = books();
        shuffled.rotate_left(2);

        let a = detect(&[event(books())], &h2h_config(), now());
        let b = detect(&[event(shuffled)], &h2h_config(), now());

        assert_eq!(serde_json::to_string(&a).unwrap(), serde_json::to_string(&b).unwrap());
        // Chiefs +150 tie between zeta and alpha resolves to alpha.
        assert_eq!(a[0].legs[1].outcome, "Kansas City Chiefs");
        assert_eq!(a[0].legs[1].bookmaker, "alpha");
    }

    #[test]
    fn test_detector_idempotent() {
        let e = event(vec![
            book("booka", vec![h2h_quote(&[
                ("Kansas City Chiefs", 150.0),
                ("Buffalo Bills", -180.0),
            ])]),
            book("bookb", vec![h2h_quote(&[
                ("Kansas City Chiefs", 120.0),
                ("Buffalo Bills", 110.0),
            ])]),
        ]);
        let a = detect(std::slice::from_ref(&e), &h2h_config(), now());
        let b = detect(std::slice::from_ref(&e), &h2h_config(), now());
        assert_eq!(serde_json::to_string(&a).unwrap(), serde_json::to_string(&b).unwrap());
    }

    // -- Edge policies ----------------------------------------------------

    #[test]
    fn test_degenerate_single_book_arb_emitted() {
        // One book misprices both sides; a second book quotes the market
        // so the min_books gate passes, but best-price selection lands on
        // the mistaken book for every outcome.
        let e = event(vec![
            book("mistake", vec![h2h_quote(&[
                ("Kansas City Chiefs", 150.0),
                ("Buffalo Bills", 120.0),
            ])]),
            book("sane", vec![h2h_quote(&[
                ("Kansas City Chiefs", -200.0),
                ("Buffalo Bills", -200.0),
            ])]),
        ]);
        let ops = detect(&[e], &h2h_config(), now());
        assert_eq!(ops.len(), 1);
        assert!(ops[0].legs.iter().all(|l| l.bookmaker == "mistake"));
    }

    #[test]
    fn test_past_event_filtered() {
        let mut e = event(vec![
            book("booka", vec![h2h_quote(&[
                ("Kansas City Chiefs", 150.0),
                ("Buffalo Bills", 120.0),
            ])]),
            book("bookb", vec![h2h_quote(&[
                ("Kansas City Chiefs", 140.0),
                ("Buffalo Bills", 110.0),
            ])]),
        ]);
        e.commence_time = now() - Duration::seconds(1);
        assert!(detect(&[e], &h2h_config(), now()).is_empty());
    }

    #[test]
    fn test_commence_exactly_now_filtered() {
        let mut e = event(vec![
            book("booka", vec![h2h_quote(&[
                ("Kansas City Chiefs", 150.0),
                ("Buffalo Bills", 120.0),
            ])]),
            book("bookb", vec![h2h_quote(&[
                ("Kansas City Chiefs", 140.0),
                ("Buffalo Bills", 110.0),
            ])]),
        ]);
        e.commence_time = now();
        assert!(detect(&[e], &h2h_config(), now()).is_empty());
    }

    #[test]
    fn test_invalid_price_drops_book_not_market() {
        // booka has an invalid price and is dropped; bookb and bookc
        // still form an arb between them.
        let e = event(vec![
            book("booka", vec![h2h_quote(&[
                ("Kansas City Chiefs", f64::NAN),
                ("Buffalo Bills", 500.0),
            ])]),
            book("bookb", vec![h2h_quote(&[
                ("Kansas City Chiefs", 150.0),
                ("Buffalo Bills", -180.0),
            ])]),
            book("bookc", vec![h2h_quote(&[
                ("Kansas City Chiefs", 120.0),
                ("Buffalo Bills", 110.0),
            ])]),
        ]);
        let ops = detect(&[e], &h2h_config(), now());
        assert_eq!(ops.len(), 1);
        assert!(ops[0].legs.iter().all(|l| l.bookmaker != "booka"));
    }

    #[test]
    fn test_min_books_gate() {
        let e = event(vec![book("only", vec![h2h_quote(&[
            ("Kansas City Chiefs", 150.0),
            ("Buffalo Bills", 120.0),
        ])])]);
        assert!(detect(std::slice::from_ref(&e), &h2h_config(), now()).is_empty());

        // With min_books = 1 the lone mispriced book is surfaced.
        let cfg = DetectionConfig { min_books: 1, ..DetectionConfig::default() };
        assert_eq!(detect(&[e], &cfg, now()).len(), 1);
    }

    #[test]
    fn test_min_profit_threshold() {
        // Chiefs +150 / Bills +110 across books: profit ~14.13%.
        let make = || {
            event(vec![
                book("booka", vec![h2h_quote(&[
                    ("Kansas City Chiefs", 150.0),
                    ("Buffalo Bills", -180.0),
                ])]),
                book("bookb", vec![h2h_quote(&[
                    ("Kansas City Chiefs", 120.0),
                    ("Buffalo Bills", 110.0),
                ])]),
            ])
        };
        let below = DetectionConfig { min_profit_pct: 14.0, ..DetectionConfig::default() };
        let above = DetectionConfig { min_profit_pct: 15.0, ..DetectionConfig::default() };
        assert_eq!(detect(&[make()], &below, now()).len(), 1);
        assert!(detect(&[make()], &above, now()).is_empty());
    }

    #[test]
    fn test_sum_exactly_one_not_emitted() {
        // Both sides at even odds (+100): p = 0.5 each, sum exactly 1.0.
        let e = event(vec![
            book("booka", vec![h2h_quote(&[
                ("Kansas City Chiefs", 100.0),
                ("Buffalo Bills", 100.0),
            ])]),
            book("bookb", vec![h2h_quote(&[
                ("Kansas City Chiefs", -110.0),
                ("Buffalo Bills", -110.0),
            ])]),
        ]);
        assert!(detect(&[e], &h2h_config(), now()).is_empty());
    }

    #[test]
    fn test_empty_events() {
        assert!(detect(&[], &h2h_config(), now()).is_empty());
    }

    #[test]
    fn test_three_way_market() {
        // Soccer-style Home/Draw/Away split across three books.
        let e = Event {
            sport_key: "soccer_epl".into(),
            sport_title: "EPL".into(),
            commence_time: future(),
            home_team: "Arsenal".into(),
            away_team: "Chelsea".into(),
            bookmakers: vec![
                book("booka", vec![h2h_quote(&[
                    ("Arsenal", 220.0),
                    ("Chelsea", 240.0),
                    ("Draw", 230.0),
                ])]),
                book("bookb", vec![h2h_quote(&[
                    ("Arsenal", 200.0),
                    ("Chelsea", 280.0),
                    ("Draw", 250.0),
                ])]),
            ],
        };
        let ops = detect(&[e], &h2h_config(), now());
        assert_eq!(ops.len(), 1);
        let op = &ops[0];
        assert_eq!(op.legs.len(), 3);
        // Best: Arsenal 3.2 (booka), Chelsea 3.8 (bookb), Draw 3.5 (bookb)
        assert_eq!(op.legs[0].outcome, "Arsenal");
        assert_eq!(op.legs[0].bookmaker, "booka");
        assert_eq!(op.legs[1].outcome, "Chelsea");
        assert_eq!(op.legs[1].bookmaker, "bookb");
        assert_eq!(op.legs[2].outcome, "Draw");
        assert_eq!(op.legs[2].bookmaker, "bookb");
        let share_sum: f64 = op.legs.iter().map(|l| l.stake_share).sum();
        assert!((share_sum - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_profit_consistent_with_leg_probs() {
        let e = event(vec![
            book("booka", vec![h2h_quote(&[
                ("Kansas City Chiefs", 150.0),
                ("Buffalo Bills", -180.0),
            ])]),
            book("bookb", vec![h2h_quote(&[
                ("Kansas City Chiefs", 120.0),
                ("Buffalo Bills", 110.0),
            ])]),
        ]);
        let ops = detect(&[e], &h2h_config(), now());
        let op = &ops[0];
        let sum: f64 = op.legs.iter().map(|l| l.implied_prob).sum();
        assert!((sum - op.total_implied_prob).abs() < 1e-9);
        assert!((op.profit_pct - (1.0 / sum - 1.0) * 100.0).abs() < 1e-9);
        assert!(sum < 1.0);
    }

    #[test]
    fn test_output_sorted_by_profit_desc() {
        let small = event(vec![
            book("booka", vec![h2h_quote(&[
                ("Kansas City Chiefs", 105.0),
                ("Buffalo Bills", -180.0),
            ])]),
            book("bookb", vec![h2h_quote(&[
                ("Kansas City Chiefs", 100.0),
                ("Buffalo Bills", 105.0),
            ])]),
        ]);
        let mut big = event(vec![
            book("booka", vec![h2h_quote(&[
                ("Kansas City Chiefs", 150.0),
                ("Buffalo Bills", -180.0),
            ])]),
            book("bookb", vec![h2h_quote(&[
                ("Kansas City Chiefs", 120.0),
                ("Buffalo Bills", 110.0),
            ])]),
        ]);
        big.home_team = "Denver Broncos".into();

        let ops = detect(&[small, big], &h2h_config(), now());
        assert_eq!(ops.len(), 2);
        assert!(ops[0].profit_pct >= ops[1].profit_pct);
        assert_eq!(ops[0].home_team, "Denver Broncos");
    }
}
