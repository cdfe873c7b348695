//! Order-book depth walking.
//!
//! One walk implementation serves both the scan-time liquidity/slippage
//! model and the pre-trade liquidity checks of the execution and close
//! protocols.

use funding_arb_core::market::PriceLevel;

/// Result of walking one side of a book against a notional target.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DepthWalk {
    /// Quote value consumed, USD. At most the target when the book covers
    /// it, otherwise everything the side offers.
    pub available_usd: f64,
    /// Base units consumed.
    pub filled_base: f64,
    /// Size-weighted average price over the consumed levels; 0 when the
    /// side is empty.
    pub effective_price: f64,
}

/// Walks `levels` in order, consuming liquidity until `target_usd` of quote
/// value is covered or the side is exhausted.
#[must_use]
pub fn walk(levels: &[PriceLevel], target_usd: f64) -> DepthWalk {
    let mut available_usd = 0.0;
    let mut filled_base = 0.0;

    for level in levels {
        if level.price <= 0.0 || level.size <= 0.0 {
            continue;
        }
        let remaining = target_usd - available_usd;
        if remaining <= 0.0 {
            break;
        }
        let level_value = level.quote_value();
        if level_value <= remaining {
            available_usd += level_value;
            filled_base += level.size;
        } else {
            let partial_base = remaining / level.price;
            available_usd += remaining;
            filled_base += partial_base;
            break;
        }
    }

    let effective_price = if filled_base > 0.0 {
        available_usd / filled_base
    } else {
        0.0
    };

    DepthWalk {
        available_usd,
        filled_base,
        effective_price,
    }
}

/// Realised slippage of a walk against a reference price, percent.
///
/// Positive means the walk fills at a worse price than the reference:
/// above it when lifting asks, below it when hitting bids.
#[must_use]
pub fn slippage_pct(walk: &DepthWalk, reference_price: f64, lifting_asks: bool) -> f64 {
    if walk.filled_base <= 0.0 || reference_price <= 0.0 {
        return 0.0;
    }
    let ratio = walk.effective_price / reference_price;
    if lifting_asks {
        (ratio - 1.0) * 100.0
    } else {
        (1.0 - ratio) * 100.0
    }
}

/// Quote value available on a side, capped at `target_usd`.
#[must_use]
pub fn available_quote(levels: &[PriceLevel], target_usd: f64) -> f64 {
    walk(levels, target_usd).available_usd
}

#[cfg(test)]
mod tests {
    use super::*;

    fn level(price: f64, size: f64) -> PriceLevel {
        PriceLevel { price, size }
    }

    #[test]
    fn walk_consumes_whole_levels_until_target() {
        let asks = vec![level(100.0, 10.0), level(101.0, 10.0), level(102.0, 10.0)];
        // Target 1500: first level (1000) plus ~4.95 units of the second.
        let walk = walk(&asks, 1500.0);
        assert!((walk.available_usd - 1500.0).abs() < 1e-9);
        assert!((walk.filled_base - (10.0 + 500.0 / 101.0)).abs() < 1e-9);
        assert!(walk.effective_price > 100.0 && walk.effective_price < 101.0);
    }

    #[test]
    fn walk_exhausts_thin_book() {
        let asks = vec![level(100.0, 1.0)];
        let walk = walk(&asks, 10_000.0);
        assert!((walk.available_usd - 100.0).abs() < 1e-9);
        assert!((walk.filled_base - 1.0).abs() < 1e-9);
        assert!((walk.effective_price - 100.0).abs() < 1e-9);
    }

    #[test]
    fn empty_side_yields_zero() {
        let walk = walk(&[], 1000.0);
        assert_eq!(walk.available_usd, 0.0);
        assert_eq!(walk.filled_base, 0.0);
        assert_eq!(walk.effective_price, 0.0);
    }

    #[test]
    fn slippage_sign_matches_side() {
        let asks = vec![level(101.0, 100.0)];
        let ask_walk = walk(&asks, 5_000.0);
        // Lifting asks above a 100.0 reference costs ~1%.
        assert!((slippage_pct(&ask_walk, 100.0, true) - 1.0).abs() < 1e-9);

        let bids = vec![level(99.0, 100.0)];
        let bid_walk = walk(&bids, 5_000.0);
        assert!((slippage_pct(&bid_walk, 100.0, false) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn zero_reference_yields_zero_slippage() {
        let asks = vec![level(101.0, 100.0)];
        let w = walk(&asks, 5_000.0);
        assert_eq!(slippage_pct(&w, 0.0, true), 0.0);
    }
}
