//! Market-data types shared across venues.
//!
//! Every venue adapter normalises its wire format into these types; nothing
//! in the engine depends on a venue-specific response shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Hours in a (non-leap) year, used to annualise funding rates.
pub const HOURS_PER_YEAR: f64 = 24.0 * 365.0;

// =============================================================================
// Market Kind
// =============================================================================

/// The kind of market an instrument trades on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MarketKind {
    /// Spot market.
    Spot,
    /// Margin market.
    Margin,
    /// Perpetual futures market.
    Perpetual,
}

impl MarketKind {
    /// Returns the display string.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Spot => "spot",
            Self::Margin => "margin",
            Self::Perpetual => "perpetual",
        }
    }

    /// Returns true if instruments of this kind pay funding.
    #[must_use]
    pub fn pays_funding(self) -> bool {
        matches!(self, Self::Perpetual)
    }
}

impl std::fmt::Display for MarketKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Instrument
// =============================================================================

/// A tradable symbol on a venue. Immutable once obtained.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instrument {
    /// Venue the instrument trades on.
    pub venue: String,
    /// Venue-native symbol (e.g. "BTC/USDT").
    pub symbol: String,
    /// Market kind.
    pub kind: MarketKind,
    /// Base currency (e.g. "BTC").
    pub base_currency: String,
    /// Quote currency (e.g. "USDT").
    pub quote_currency: String,
    /// Minimum order size in base units.
    pub min_order_size: f64,
    /// Decimal places for order quantity.
    pub qty_precision: u32,
    /// Minimum price movement.
    pub tick_size: f64,
}

impl Instrument {
    /// Returns true if both instruments trade the same (base, quote) pair.
    #[must_use]
    pub fn same_pair(&self, other: &Self) -> bool {
        self.base_currency == other.base_currency && self.quote_currency == other.quote_currency
    }
}

// =============================================================================
// Order Book
// =============================================================================

/// One price level of an order book: (price, size in base units).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: f64,
    pub size: f64,
}

impl PriceLevel {
    /// Quote-currency value of the level.
    #[must_use]
    pub fn quote_value(&self) -> f64 {
        self.price * self.size
    }
}

/// Snapshot of an order book.
///
/// Bids are sorted by price descending, asks ascending. When both sides are
/// non-empty the top bid is strictly below the top ask.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderBook {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
}

impl OrderBook {
    /// Best bid price, if any.
    #[must_use]
    pub fn best_bid(&self) -> Option<f64> {
        self.bids.first().map(|l| l.price)
    }

    /// Best ask price, if any.
    #[must_use]
    pub fn best_ask(&self) -> Option<f64> {
        self.asks.first().map(|l| l.price)
    }

    /// Mid price, if both sides are present.
    #[must_use]
    pub fn mid(&self) -> Option<f64> {
        Some((self.best_bid()? + self.best_ask()?) / 2.0)
    }

    /// Returns true if the book is internally consistent (top bid < top ask).
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => bid < ask,
            _ => true,
        }
    }
}

// =============================================================================
// Funding Rate
// =============================================================================

/// Funding information for a perpetual symbol.
///
/// Sign convention: positive means longs pay shorts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundingRate {
    pub symbol: String,
    /// Current rate as a signed decimal fraction per payment period.
    pub rate: f64,
    /// Payment cadence in hours (commonly 8, occasionally 1 or 4).
    pub payment_interval_hours: f64,
    /// Timestamp of the next payment.
    pub next_payment: DateTime<Utc>,
    /// Predicted next rate, when the venue publishes one.
    pub predicted_rate: Option<f64>,
}

impl FundingRate {
    /// Number of funding payments per year at this cadence.
    #[must_use]
    pub fn payments_per_year(&self) -> f64 {
        HOURS_PER_YEAR / self.payment_interval_hours
    }

    /// Rate annualised to a percentage, assuming constant cadence.
    #[must_use]
    pub fn annualized_pct(&self) -> f64 {
        self.rate * self.payments_per_year() * 100.0
    }
}

/// Annualises a per-period rate to a percentage.
#[must_use]
pub fn annualize_pct(rate: f64, interval_hours: f64) -> f64 {
    rate * (HOURS_PER_YEAR / interval_hours) * 100.0
}

// =============================================================================
// Fee Structure
// =============================================================================

/// Per-venue fee schedule. Venue implementations cache this for up to 24 h.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeStructure {
    pub maker_fee: f64,
    pub taker_fee: f64,
    pub spot_maker_fee: f64,
    pub spot_taker_fee: f64,
    pub perp_maker_fee: f64,
    pub perp_taker_fee: f64,
    pub margin_maker_fee: f64,
    pub margin_taker_fee: f64,
    /// VIP tier index (0 = base).
    pub fee_tier: u32,
    /// Withdrawal fee per currency.
    pub withdrawal_fees: HashMap<String, f64>,
}

impl Default for FeeStructure {
    fn default() -> Self {
        Self {
            maker_fee: 0.0001,
            taker_fee: 0.0005,
            spot_maker_fee: 0.0001,
            spot_taker_fee: 0.0005,
            perp_maker_fee: 0.0001,
            perp_taker_fee: 0.0005,
            margin_maker_fee: 0.0001,
            margin_taker_fee: 0.0005,
            fee_tier: 0,
            withdrawal_fees: HashMap::new(),
        }
    }
}

impl FeeStructure {
    /// Returns the taker fee for a market kind.
    #[must_use]
    pub fn taker_fee_for(&self, kind: MarketKind) -> f64 {
        match kind {
            MarketKind::Spot => self.spot_taker_fee,
            MarketKind::Margin => self.margin_taker_fee,
            MarketKind::Perpetual => self.perp_taker_fee,
        }
    }

    /// Returns the maker fee for a market kind.
    #[must_use]
    pub fn maker_fee_for(&self, kind: MarketKind) -> f64 {
        match kind {
            MarketKind::Spot => self.spot_maker_fee,
            MarketKind::Margin => self.margin_maker_fee,
            MarketKind::Perpetual => self.perp_maker_fee,
        }
    }
}
