//! Arbitrage geometry and opportunity types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::market::MarketKind;

// =============================================================================
// Trading Pair
// =============================================================================

/// Declarative description of an arbitrage geometry: two legs, each a
/// (venue, symbol, market kind) triple. Equality is structural over all six
/// fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TradingPair {
    pub venue1: String,
    pub symbol1: String,
    pub kind1: MarketKind,
    pub venue2: String,
    pub symbol2: String,
    pub kind2: MarketKind,
}

impl TradingPair {
    /// Creates a same-venue pair (e.g. spot and perp on one exchange).
    #[must_use]
    pub fn same_venue(
        venue: impl Into<String>,
        symbol1: impl Into<String>,
        kind1: MarketKind,
        symbol2: impl Into<String>,
        kind2: MarketKind,
    ) -> Self {
        let venue = venue.into();
        Self {
            venue1: venue.clone(),
            symbol1: symbol1.into(),
            kind1,
            venue2: venue,
            symbol2: symbol2.into(),
            kind2,
        }
    }

    /// Creates a cross-venue pair.
    #[must_use]
    pub fn cross_venue(
        venue1: impl Into<String>,
        symbol1: impl Into<String>,
        kind1: MarketKind,
        venue2: impl Into<String>,
        symbol2: impl Into<String>,
        kind2: MarketKind,
    ) -> Self {
        Self {
            venue1: venue1.into(),
            symbol1: symbol1.into(),
            kind1,
            venue2: venue2.into(),
            symbol2: symbol2.into(),
            kind2,
        }
    }

    /// Returns true if both legs live on the same venue.
    #[must_use]
    pub fn is_same_venue(&self) -> bool {
        self.venue1 == self.venue2
    }

    /// Returns true if no leg has been filled in.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.venue1.is_empty() && self.venue2.is_empty()
    }
}

impl std::fmt::Display for TradingPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{} <-> {}:{}",
            self.venue1, self.symbol1, self.venue2, self.symbol2
        )
    }
}

// =============================================================================
// Arbitrage Opportunity
// =============================================================================

/// Output of a strategy scan. Never mutated after creation, except for the
/// composite stamping `strategy_index` on collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArbitrageOpportunity {
    /// The two legs.
    pub pair: TradingPair,

    /// Raw signed per-period funding rate of leg 1 (0 for spot legs).
    pub funding_rate1: f64,
    /// Raw signed per-period funding rate of leg 2.
    pub funding_rate2: f64,
    /// Funding cadence of leg 1 in hours; `None` for spot legs.
    pub payment_interval1: Option<f64>,
    /// Funding cadence of leg 2 in hours; `None` for spot legs.
    pub payment_interval2: Option<f64>,

    /// Net funding edge, annualised, as a percentage.
    pub net_funding_rate: f64,
    /// Signed entry spread: `(price2 - price1) / price1 * 100`.
    pub entry_price_spread_pct: f64,
    /// Widening beyond which the trade becomes a loss, percent.
    pub max_allowable_spread_pct: f64,
    /// Round-trip fees plus slippage estimate, percent.
    pub transaction_cost_pct: f64,
    /// Annualised net edge after costs, percent.
    pub estimated_profit_pct: f64,
    /// Funding periods needed to recoup transaction costs.
    pub periods_to_breakeven: f64,

    /// Liquidity-bounded notional cap in USD.
    pub max_position_size_usd: f64,
    /// Composite risk score in [0, 100]; higher is riskier.
    pub risk_score: f64,

    /// When the scan produced this opportunity.
    pub discovery_time: DateTime<Utc>,

    /// Name of the strategy that produced the opportunity.
    pub strategy_tag: String,
    /// Index of the owning child inside a composite; -1 when unset.
    /// Persisted state may carry `null` or omit the field entirely; both
    /// normalise to -1 and take the slow dispatch path.
    #[serde(
        default = "default_strategy_index",
        deserialize_with = "strategy_index_or_default"
    )]
    pub strategy_index: i32,
}

fn default_strategy_index() -> i32 {
    -1
}

fn strategy_index_or_default<'de, D>(deserializer: D) -> Result<i32, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::Deserialize;
    Ok(Option::<i32>::deserialize(deserializer)?.unwrap_or(-1))
}

impl ArbitrageOpportunity {
    /// Returns true if the opportunity clears its own cost estimate.
    #[must_use]
    pub fn is_profitable(&self) -> bool {
        self.estimated_profit_pct > 0.0
    }

    /// Risk-adjusted return used for cross-venue ranking.
    #[must_use]
    pub fn risk_adjusted_return(&self) -> f64 {
        self.estimated_profit_pct / (self.risk_score + 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::MarketKind;

    fn sample_pair() -> TradingPair {
        TradingPair::same_venue(
            "Binance",
            "BTC/USDT",
            MarketKind::Spot,
            "BTC/USDT_PERP",
            MarketKind::Perpetual,
        )
    }

    fn sample_opportunity() -> ArbitrageOpportunity {
        ArbitrageOpportunity {
            pair: sample_pair(),
            funding_rate1: 0.0,
            funding_rate2: 0.0005,
            payment_interval1: None,
            payment_interval2: Some(8.0),
            net_funding_rate: 54.75,
            entry_price_spread_pct: 0.2,
            max_allowable_spread_pct: 5.475,
            transaction_cost_pct: 0.2,
            estimated_profit_pct: 54.55,
            periods_to_breakeven: 4.0,
            max_position_size_usd: 10000.0,
            risk_score: 30.0,
            discovery_time: Utc::now(),
            strategy_tag: "same_venue_spot_perp".to_string(),
            strategy_index: -1,
        }
    }

    #[test]
    fn pair_equality_is_structural() {
        let a = sample_pair();
        let b = sample_pair();
        assert_eq!(a, b);

        let mut c = sample_pair();
        c.symbol2 = "ETH/USDT_PERP".to_string();
        assert_ne!(a, c);

        let mut d = sample_pair();
        d.kind1 = MarketKind::Margin;
        assert_ne!(a, d);
    }

    #[test]
    fn same_venue_detection() {
        assert!(sample_pair().is_same_venue());
        let cross = TradingPair::cross_venue(
            "Binance",
            "BTC/USDT_PERP",
            MarketKind::Perpetual,
            "Bybit",
            "BTC/USDT_PERP",
            MarketKind::Perpetual,
        );
        assert!(!cross.is_same_venue());
        assert!(!cross.is_empty());
    }

    #[test]
    fn risk_adjusted_return_divides_by_score() {
        let opp = sample_opportunity();
        assert!((opp.risk_adjusted_return() - 54.55 / 31.0).abs() < 1e-9);
    }

    #[test]
    fn missing_strategy_index_deserializes_to_minus_one() {
        // Persisted state from before index stamping omits the field.
        let mut value = serde_json::to_value(sample_opportunity()).unwrap();
        value.as_object_mut().unwrap().remove("strategy_index");
        let opp: ArbitrageOpportunity = serde_json::from_value(value).unwrap();
        assert_eq!(opp.strategy_index, -1);
    }

    #[test]
    fn null_strategy_index_deserializes_to_minus_one() {
        let mut value = serde_json::to_value(sample_opportunity()).unwrap();
        value
            .as_object_mut()
            .unwrap()
            .insert("strategy_index".to_string(), serde_json::Value::Null);
        let opp: ArbitrageOpportunity = serde_json::from_value(value).unwrap();
        assert_eq!(opp.strategy_index, -1);
    }
}
