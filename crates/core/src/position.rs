//! Live hedged-position state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::opportunity::ArbitrageOpportunity;

/// A live delta-neutral position, owned by the risk manager's registry and
/// keyed by `position_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArbitragePosition {
    /// The opportunity this position was opened against.
    pub opportunity: ArbitrageOpportunity,

    /// Notional size in USD. Non-negative.
    pub position_size_usd: f64,
    /// When the hedge was opened.
    pub entry_time: DateTime<Utc>,

    pub entry_price1: f64,
    pub entry_price2: f64,
    pub current_price1: f64,
    pub current_price2: f64,

    /// Spread at entry, percent.
    pub initial_spread_pct: f64,
    /// Latest observed spread, percent.
    pub current_spread_pct: f64,

    /// Net funding received so far, USD. Can decrease when a
    /// negative-funding leg pays out.
    pub funding_collected_usd: f64,
    /// Mark-to-market PnL, USD.
    pub unrealized_pnl_usd: f64,

    /// Deterministic identifier derived from venues, symbols and entry time.
    pub position_id: String,
    pub is_active: bool,
}

impl ArbitragePosition {
    /// Builds the deterministic position id for an opportunity entered at
    /// `entry_time`.
    #[must_use]
    pub fn make_id(opportunity: &ArbitrageOpportunity, entry_time: DateTime<Utc>) -> String {
        format!(
            "{}_{}_{}_{}_{}",
            opportunity.pair.venue1,
            opportunity.pair.symbol1,
            opportunity.pair.venue2,
            opportunity.pair.symbol2,
            entry_time.timestamp_millis()
        )
    }

    /// Creates a freshly opened position from post-fill quotes.
    #[must_use]
    pub fn open(
        opportunity: ArbitrageOpportunity,
        position_size_usd: f64,
        entry_price1: f64,
        entry_price2: f64,
        entry_time: DateTime<Utc>,
    ) -> Self {
        let position_id = Self::make_id(&opportunity, entry_time);
        let initial_spread_pct = opportunity.entry_price_spread_pct;
        Self {
            opportunity,
            position_size_usd,
            entry_time,
            entry_price1,
            entry_price2,
            current_price1: entry_price1,
            current_price2: entry_price2,
            initial_spread_pct,
            current_spread_pct: initial_spread_pct,
            funding_collected_usd: 0.0,
            unrealized_pnl_usd: 0.0,
            position_id,
            is_active: true,
        }
    }

    /// PnL as a percentage of notional. Zero for a zero-size position.
    #[must_use]
    pub fn pnl_pct(&self) -> f64 {
        if self.position_size_usd <= 0.0 {
            return 0.0;
        }
        self.unrealized_pnl_usd / self.position_size_usd * 100.0
    }

    /// Relative divergence of the current spread from the entry spread,
    /// percent. A zero initial spread yields zero divergence.
    #[must_use]
    pub fn spread_divergence_pct(&self) -> f64 {
        if self.initial_spread_pct == 0.0 {
            return 0.0;
        }
        (self.current_spread_pct - self.initial_spread_pct).abs() / self.initial_spread_pct.abs()
            * 100.0
    }

    /// Age of the position relative to `now`.
    #[must_use]
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.entry_time
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::MarketKind;
    use crate::opportunity::TradingPair;

    fn sample_opportunity() -> ArbitrageOpportunity {
        ArbitrageOpportunity {
            pair: TradingPair::same_venue(
                "Binance",
                "BTC/USDT",
                MarketKind::Spot,
                "BTC/USDT_PERP",
                MarketKind::Perpetual,
            ),
            funding_rate1: 0.0,
            funding_rate2: 0.0005,
            payment_interval1: None,
            payment_interval2: Some(8.0),
            net_funding_rate: 54.75,
            entry_price_spread_pct: 0.1,
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
    fn position_id_is_deterministic() {
        let opp = sample_opportunity();
        let t = Utc::now();
        let a = ArbitragePosition::make_id(&opp, t);
        let b = ArbitragePosition::make_id(&opp, t);
        assert_eq!(a, b);
        assert!(a.starts_with("Binance_BTC/USDT_Binance_BTC/USDT_PERP_"));
        assert!(a.ends_with(&t.timestamp_millis().to_string()));
    }

    #[test]
    fn open_initializes_from_quotes() {
        let pos =
            ArbitragePosition::open(sample_opportunity(), 5000.0, 50000.0, 50100.0, Utc::now());
        assert!(pos.is_active);
        assert_eq!(pos.position_size_usd, 5000.0);
        assert_eq!(pos.current_price1, 50000.0);
        assert_eq!(pos.current_price2, 50100.0);
        assert_eq!(pos.initial_spread_pct, pos.current_spread_pct);
        assert_eq!(pos.funding_collected_usd, 0.0);
        assert_eq!(pos.unrealized_pnl_usd, 0.0);
    }

    #[test]
    fn spread_divergence_relative_to_entry() {
        let mut pos =
            ArbitragePosition::open(sample_opportunity(), 5000.0, 50000.0, 50100.0, Utc::now());
        pos.initial_spread_pct = 0.1;
        pos.current_spread_pct = 0.3;
        assert!((pos.spread_divergence_pct() - 200.0).abs() < 1e-9);
    }

    #[test]
    fn pnl_pct_of_notional() {
        let mut pos =
            ArbitragePosition::open(sample_opportunity(), 5000.0, 50000.0, 50100.0, Utc::now());
        pos.unrealized_pnl_usd = 100.0;
        assert!((pos.pnl_pct() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn serde_round_trip() {
        let pos =
            ArbitragePosition::open(sample_opportunity(), 5000.0, 50000.0, 50100.0, Utc::now());
        let json = serde_json::to_string(&pos).unwrap();
        let back: ArbitragePosition = serde_json::from_str(&json).unwrap();
        assert_eq!(back.position_id, pos.position_id);
        assert_eq!(back.opportunity.pair, pos.opportunity.pair);
        assert_eq!(back.position_size_usd, pos.position_size_usd);
    }
}
