//! Price conversions between American, decimal and fractional odds and
//! implied probability.
//!
//! Pure functions over f64. American prices are only meaningful at
//! `|p| >= 100`; decimal prices at `d > 1`. Anything else is rejected
//! rather than silently coerced.

use crate::types::{OddsFormat, PriceError};

/// Maximum denominator considered when rendering fractional odds.
const MAX_FRACTION_DENOMINATOR: u64 = 100;

// ---------------------------------------------------------------------------
// Core conversions
// ---------------------------------------------------------------------------

/// Convert American odds to decimal odds.
///
/// `+150 -> 2.5`, `-180 -> 1.5556`. Prices in the open interval
/// (-100, 100) do not exist in American format.
pub fn american_to_decimal(price: f64) -> Result<f64, PriceError> {
    if !price.is_finite() {
        return Err(PriceError::InvalidPrice(format!(
            "american price must be finite, got {price}"
        )));
    }
    if price >= 100.0 {
        Ok(1.0 + price / 100.0)
    } else if price <= -100.0 {
        Ok(1.0 + 100.0 / price.abs())
    } else {
        Err(PriceError::InvalidPrice(format!(
            "american price must satisfy |p| >= 100, got {price}"
        )))
    }
}

/// Convert decimal odds to the implied probability `1/d`.
pub fn decimal_to_implied_prob(decimal: f64) -> Result<f64, PriceError> {
    if !decimal.is_finite() || decimal <= 1.0 {
        return Err(PriceError::InvalidPrice(format!(
            "decimal price must be > 1, got {decimal}"
        )));
    }
    Ok(1.0 / decimal)
}

/// Convert American odds straight to implied probability.
pub fn american_to_implied_prob(price: f64) -> Result<f64, PriceError> {
    decimal_to_implied_prob(american_to_decimal(price)?)
}

/// Convert decimal odds back to American, rounded to the nearest integer
/// with ties away from zero.
pub fn decimal_to_american(decimal: f64) -> Result<f64, PriceError> {
    if !decimal.is_finite() || decimal <= 1.0 {
        return Err(PriceError::InvalidPrice(format!(
            "decimal price must be > 1, got {decimal}"
        )));
    }
    let american = if decimal >= 2.0 {
        (decimal - 1.0) * 100.0
    } else {
        -100.0 / (decimal - 1.0)
    };
    // f64::round is round-half-away-from-zero, which is what American
    // convention wants.
    Ok(american.round())
}

/// Render decimal odds as a reduced fraction `(numerator, denominator)`
/// of the profit part `d - 1`, e.g. `2.5 -> 3/2`.
///
/// Uses the continued-fraction best rational approximation with
/// denominator <= 100, so every bookmaker-style fraction round-trips
/// exactly.
pub fn decimal_to_fractional(decimal: f64) -> Result<(u64, u64), PriceError> {
    if !decimal.is_finite() || decimal <= 1.0 {
        return Err(PriceError::InvalidPrice(format!(
            "decimal price must be > 1, got {decimal}"
        )));
    }
    let target = decimal - 1.0;

    let mut best = (1u64, 1u64);
    let mut best_err = f64::INFINITY;
    for den in 1..=MAX_FRACTION_DENOMINATOR {
        let num = (target * den as f64).round().max(1.0) as u64;
        let err = (num as f64 / den as f64 - target).abs();
        if err + 1e-12 < best_err {
            best = (num, den);
            best_err = err;
        }
        if best_err < 1e-9 {
            break;
        }
    }

    let g = gcd(best.0, best.1);
    Ok((best.0 / g, best.1 / g))
}

/// Convert fractional odds `num/den` to decimal odds.
pub fn fractional_to_decimal(num: u64, den: u64) -> Result<f64, PriceError> {
    if num == 0 || den == 0 {
        return Err(PriceError::InvalidPrice(format!(
            "fractional price must have positive terms, got {num}/{den}"
        )));
    }
    Ok(1.0 + num as f64 / den as f64)
}

fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

// ---------------------------------------------------------------------------
// Format-aware helpers
// ---------------------------------------------------------------------------

impl OddsFormat {
    /// The `oddsFormat` value sent upstream. Fractional is a display-only
    /// rendering, so it is requested as decimal.
    pub fn upstream_param(&self) -> &'static str {
        match self {
            OddsFormat::American => "american",
            OddsFormat::Decimal | OddsFormat::Fractional => "decimal",
        }
    }

    /// Interpret a raw feed price in this format as decimal odds.
    pub fn to_decimal(&self, price: f64) -> Result<f64, PriceError> {
        match self {
            OddsFormat::American => american_to_decimal(price),
            OddsFormat::Decimal | OddsFormat::Fractional => {
                if !price.is_finite() || price <= 1.0 {
                    Err(PriceError::InvalidPrice(format!(
                        "decimal price must be > 1, got {price}"
                    )))
                } else {
                    Ok(price)
                }
            }
        }
    }

    /// Render decimal odds in this display format.
    pub fn format_price(&self, decimal: f64) -> Result<String, PriceError> {
        match self {
            OddsFormat::American => {
                let a = decimal_to_american(decimal)?;
                Ok(if a > 0.0 {
                    format!("+{}", a as i64)
                } else {
                    format!("{}", a as i64)
                })
            }
            OddsFormat::Decimal => {
                decimal_to_implied_prob(decimal)?;
                Ok(format!("{decimal:.2}"))
            }
            OddsFormat::Fractional => {
                let (num, den) = decimal_to_fractional(decimal)?;
                Ok(format!("{num}/{den}"))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Rounding
// ---------------------------------------------------------------------------

/// Banker's rounding (half to even) at `dp` decimal places.
///
/// Used for monetary fields (2 dp) and probability fields (6 dp) so that
/// repeated detection runs produce byte-identical output.
pub fn round_half_even(x: f64, dp: u32) -> f64 {
    let scale = 10f64.powi(dp as i32);
    let scaled = x * scale;
    let floor = scaled.floor();
    let frac = scaled - floor;
    let rounded = if (frac - 0.5).abs() < 1e-9 {
        if (floor as i64) % 2 == 0 {
            floor
        } else {
            floor + 1.0
        }
    } else {
        scaled.round()
    };
    rounded / scale
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
