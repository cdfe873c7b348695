//! Order and account types.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// =============================================================================
// Sides and Types
// =============================================================================

/// Side of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// Returns the opposite side.
    #[must_use]
    pub fn opposite(self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }

    /// Returns the display string.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Buy => "buy",
            Self::Sell => "sell",
        }
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Order type. The engine only ever submits market orders; limit support
/// exists for venue adapters that need it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Market,
    Limit,
}

/// Lifecycle status of an order as reported by a venue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
    Expired,
}

impl OrderStatus {
    /// Returns true if the order has at least some fills.
    #[must_use]
    pub fn has_fills(self) -> bool {
        matches!(self, Self::Filled | Self::PartiallyFilled)
    }

    /// Returns true if the order can no longer fill.
    #[must_use]
    pub fn is_terminal_failure(self) -> bool {
        matches!(self, Self::Canceled | Self::Rejected | Self::Expired)
    }
}

// =============================================================================
// Order Request
// =============================================================================

/// An order to be placed on a venue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    /// Quantity in base units.
    pub quantity: f64,
    /// Limit price; `None` for market orders.
    pub price: Option<f64>,
}

impl OrderRequest {
    /// Creates a market order.
    #[must_use]
    pub fn market(symbol: impl Into<String>, side: OrderSide, quantity: f64) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            order_type: OrderType::Market,
            quantity,
            price: None,
        }
    }
}

// =============================================================================
// Account State
// =============================================================================

/// Per-currency balance breakdown.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CurrencyBalance {
    pub total: f64,
    pub available: f64,
    pub locked: f64,
}

/// Account balances keyed by currency.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccountBalance {
    pub balances: HashMap<String, CurrencyBalance>,
}

impl AccountBalance {
    /// Available balance for a currency, zero if absent.
    #[must_use]
    pub fn available(&self, currency: &str) -> f64 {
        self.balances.get(currency).map_or(0.0, |b| b.available)
    }

    /// Total balance for a currency, zero if absent.
    #[must_use]
    pub fn total(&self, currency: &str) -> f64 {
        self.balances.get(currency).map_or(0.0, |b| b.total)
    }
}

/// A position as reported by a venue. Size is signed: positive long,
/// negative short.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VenuePosition {
    pub symbol: String,
    pub size: f64,
    pub entry_price: f64,
    pub liquidation_price: f64,
    pub unrealized_pnl: f64,
    pub leverage: f64,
}

impl VenuePosition {
    /// Side that closes this position.
    #[must_use]
    pub fn closing_side(&self) -> OrderSide {
        if self.size > 0.0 {
            OrderSide::Sell
        } else {
            OrderSide::Buy
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn side_opposite() {
        assert_eq!(OrderSide::Buy.opposite(), OrderSide::Sell);
        assert_eq!(OrderSide::Sell.opposite(), OrderSide::Buy);
    }

    #[test]
    fn status_classification() {
        assert!(OrderStatus::Filled.has_fills());
        assert!(OrderStatus::PartiallyFilled.has_fills());
        assert!(!OrderStatus::New.has_fills());
        assert!(OrderStatus::Rejected.is_terminal_failure());
        assert!(OrderStatus::Canceled.is_terminal_failure());
        assert!(!OrderStatus::PartiallyFilled.is_terminal_failure());
    }

    #[test]
    fn market_order_has_no_price() {
        let order = OrderRequest::market("BTC/USDT", OrderSide::Buy, 0.5);
        assert_eq!(order.order_type, OrderType::Market);
        assert!(order.price.is_none());
        assert_eq!(order.quantity, 0.5);
    }

    #[test]
    fn balance_lookup_defaults_to_zero() {
        let mut balance = AccountBalance::default();
        balance.balances.insert(
            "USDT".to_string(),
            CurrencyBalance {
                total: 1000.0,
                available: 900.0,
                locked: 100.0,
            },
        );
        assert_eq!(balance.available("USDT"), 900.0);
        assert_eq!(balance.available("BTC"), 0.0);
        assert_eq!(balance.total("USDT"), 1000.0);
    }

    #[test]
    fn venue_position_closing_side() {
        let long = VenuePosition {
            symbol: "BTC/USDT_PERP".to_string(),
            size: 1.5,
            entry_price: 50000.0,
            liquidation_price: 40000.0,
            unrealized_pnl: 0.0,
            leverage: 1.0,
        };
        assert_eq!(long.closing_side(), OrderSide::Sell);

        let short = VenuePosition { size: -1.5, ..long };
        assert_eq!(short.closing_side(), OrderSide::Buy);
    }
}
