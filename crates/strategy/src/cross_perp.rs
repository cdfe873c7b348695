//! Perp vs. perp funding differential across two venues.
//!
//! The edge is the difference between the two annualised funding streams:
//! long the venue with the lower rate, short the higher one. Liquidity is
//! modelled with a depth walk against a $50k notional target on each
//! relevant book side; realised slippage beyond a flat buffer is charged to
//! the transaction cost.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, info, warn};

use funding_arb_core::clock::SharedClock;
use funding_arb_core::error::ExecError;
use funding_arb_core::market::{FundingRate, Instrument, MarketKind, OrderBook};
use funding_arb_core::opportunity::{ArbitrageOpportunity, TradingPair};
use funding_arb_core::order::OrderSide;
use funding_arb_core::position::ArbitragePosition;
use funding_arb_core::retry::with_retry;
use funding_arb_core::venue::Exchange;
use funding_arb_risk::scoring::{self, ScoreInputs, LIQUIDITY_REFERENCE_USD};

use crate::hedge::{self, CloseLeg, CloseOutcome, HedgeLeg, HedgeOutcome};
use crate::{depth, persistent_flip, ExecutionOutcome};

/// Minimum raw funding differential worth acting on.
const MIN_FUNDING_DIFF: f64 = 0.0002;

/// Flat slippage buffer charged up front, percent.
const SLIPPAGE_BUFFER_PCT: f64 = 0.15;

/// Fraction of one conservative funding period tolerated as spread.
const SPREAD_ALLOWANCE_FRACTION: f64 = 0.75;

/// Relative funding move since discovery that invalidates an opportunity.
const MAX_RATE_DRIFT: f64 = 0.20;

/// Fraction of the liquidity-implied cap taken as `max_position_size_usd`.
const LIQUIDITY_SIZE_FRACTION: f64 = 0.25;

/// Fraction of `max_position_size_usd` actually deployed.
const SIZE_FRACTION: f64 = 0.40;

/// Book depth used for the scan-time market-impact walk.
const IMPACT_BOOK_DEPTH: usize = 10;

/// Emergency reduction applied when funding has flipped persistently.
const FLIP_REDUCTION: f64 = 0.75;

pub struct CrossVenuePerp {
    venue1: Arc<dyn Exchange>,
    venue2: Arc<dyn Exchange>,
    clock: SharedClock,
    min_funding_rate: f64,
    min_expected_profit: f64,
}

impl CrossVenuePerp {
    #[must_use]
    pub fn new(
        venue1: Arc<dyn Exchange>,
        venue2: Arc<dyn Exchange>,
        clock: SharedClock,
        min_funding_rate: f64,
        min_expected_profit: f64,
    ) -> Self {
        Self {
            venue1,
            venue2,
            clock,
            min_funding_rate,
            min_expected_profit,
        }
    }

    #[must_use]
    pub fn name(&self) -> String {
        format!(
            "cross_venue_perp({}, {})",
            self.venue1.name(),
            self.venue2.name()
        )
    }

    #[must_use]
    pub fn min_funding_rate(&self) -> f64 {
        self.min_funding_rate
    }

    pub fn set_min_funding_rate(&mut self, rate: f64) {
        self.min_funding_rate = rate;
    }

    #[must_use]
    pub fn min_expected_profit(&self) -> f64 {
        self.min_expected_profit
    }

    pub fn set_min_expected_profit(&mut self, profit: f64) {
        self.min_expected_profit = profit;
    }

    /// Returns true if this strategy trades the given geometry.
    #[must_use]
    pub fn covers(&self, pair: &TradingPair) -> bool {
        pair.venue1 == self.venue1.name()
            && pair.venue2 == self.venue2.name()
            && pair.kind1 == MarketKind::Perpetual
            && pair.kind2 == MarketKind::Perpetual
    }

    pub async fn symbols(&self) -> BTreeSet<String> {
        let mut symbols = BTreeSet::new();
        for venue in [&self.venue1, &self.venue2] {
            if let Ok(instruments) = venue.available_instruments(MarketKind::Perpetual).await {
                symbols.extend(instruments.into_iter().map(|i| i.symbol));
            }
        }
        symbols
    }

    // =========================================================================
    // Scan
    // =========================================================================

    pub async fn find_opportunities(&self) -> Vec<ArbitrageOpportunity> {
        let mut opportunities = Vec::new();

        let perps1 = match with_retry("perp instruments v1", || {
            self.venue1.available_instruments(MarketKind::Perpetual)
        })
        .await
        {
            Ok(instruments) => instruments,
            Err(err) => {
                warn!(venue = self.venue1.name(), error = %err, "scan: instrument listing failed");
                return opportunities;
            }
        };
        let perps2 = match with_retry("perp instruments v2", || {
            self.venue2.available_instruments(MarketKind::Perpetual)
        })
        .await
        {
            Ok(instruments) => instruments,
            Err(err) => {
                warn!(venue = self.venue2.name(), error = %err, "scan: instrument listing failed");
                return opportunities;
            }
        };

        for perp1 in &perps1 {
            let Some(perp2) = perps2.iter().find(|p| p.same_pair(perp1)) else {
                continue;
            };
            if let Some(opportunity) = self.evaluate_pair(perp1, perp2).await {
                opportunities.push(opportunity);
            }
        }

        // Rank by risk-adjusted return, not raw profit.
        opportunities.sort_by(|a, b| {
            b.risk_adjusted_return()
                .partial_cmp(&a.risk_adjusted_return())
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        info!(
            venue1 = self.venue1.name(),
            venue2 = self.venue2.name(),
            count = opportunities.len(),
            "cross-venue perp scan complete"
        );
        opportunities
    }

    async fn evaluate_pair(
        &self,
        perp1: &Instrument,
        perp2: &Instrument,
    ) -> Option<ArbitrageOpportunity> {
        let symbol1 = perp1.symbol.clone();
        let symbol2 = perp2.symbol.clone();

        let funding1 = with_retry("funding v1", || self.venue1.funding_rate(&symbol1))
            .await
            .ok()?;
        let funding2 = with_retry("funding v2", || self.venue2.funding_rate(&symbol2))
            .await
            .ok()?;

        let funding_diff = funding1.rate - funding2.rate;
        if funding_diff.abs() < MIN_FUNDING_DIFF.max(self.min_funding_rate) {
            return None;
        }

        let price1 = with_retry("price v1", || self.venue1.price(&symbol1))
            .await
            .ok()?;
        let price2 = with_retry("price v2", || self.venue2.price(&symbol2))
            .await
            .ok()?;
        if price1 <= 0.0 || price2 <= 0.0 {
            return None;
        }
        let spread_pct = (price1 - price2) / price2 * 100.0;

        let net_funding_rate = funding1.annualized_pct() - funding2.annualized_pct();

        let fee1 = with_retry("fee v1", || self.venue1.trading_fee(&symbol1, false))
            .await
            .ok()?;
        let fee2 = with_retry("fee v2", || self.venue2.trading_fee(&symbol2, false))
            .await
            .ok()?;
        let mut transaction_cost_pct = (fee1 * 2.0 + fee2 * 2.0) * 100.0 + SLIPPAGE_BUFFER_PCT;

        let min_payments_per_year = funding1
            .payments_per_year()
            .min(funding2.payments_per_year());
        let max_allowable_spread_pct =
            net_funding_rate.abs() / min_payments_per_year * SPREAD_ALLOWANCE_FRACTION;

        // Depth walk both books against the $50k target on the sides the
        // trade would take; charge realised slippage past the flat buffer.
        let book1 = with_retry("book v1", || {
            self.venue1.order_book(&symbol1, IMPACT_BOOK_DEPTH)
        })
        .await
        .ok()?;
        let book2 = with_retry("book v2", || {
            self.venue2.order_book(&symbol2, IMPACT_BOOK_DEPTH)
        })
        .await
        .ok()?;

        let long_venue1 = funding1.rate < funding2.rate;
        let (liquidity1, liquidity2, total_slippage_pct) =
            impact_model(&book1, &book2, price1, price2, long_venue1);
        if total_slippage_pct > SLIPPAGE_BUFFER_PCT {
            transaction_cost_pct += total_slippage_pct - SLIPPAGE_BUFFER_PCT;
        }

        let estimated_profit_pct =
            net_funding_rate.abs() - spread_pct.abs() - transaction_cost_pct;
        if estimated_profit_pct <= self.min_expected_profit {
            return None;
        }
        if spread_pct.abs() > max_allowable_spread_pct {
            debug!(
                symbol1 = %symbol1,
                symbol2 = %symbol2,
                spread_pct,
                max_allowable_spread_pct,
                "spread too wide"
            );
            return None;
        }

        let risk_score = scoring::risk_score(&ScoreInputs {
            entry_spread_pct: spread_pct,
            max_allowable_spread_pct,
            liquidity1_usd: liquidity1,
            liquidity2_usd: liquidity2,
            venue1: self.venue1.name(),
            venue2: self.venue2.name(),
            same_venue: false,
            payment_interval1: Some(funding1.payment_interval_hours),
            payment_interval2: Some(funding2.payment_interval_hours),
            venue_risk_override: None,
        });
        if risk_score > 75.0 {
            return None;
        }

        let opportunity = ArbitrageOpportunity {
            pair: TradingPair::cross_venue(
                self.venue1.name(),
                &symbol1,
                MarketKind::Perpetual,
                self.venue2.name(),
                &symbol2,
                MarketKind::Perpetual,
            ),
            funding_rate1: funding1.rate,
            funding_rate2: funding2.rate,
            payment_interval1: Some(funding1.payment_interval_hours),
            payment_interval2: Some(funding2.payment_interval_hours),
            net_funding_rate,
            entry_price_spread_pct: spread_pct,
            max_allowable_spread_pct,
            transaction_cost_pct,
            estimated_profit_pct,
            periods_to_breakeven: transaction_cost_pct / (funding_diff.abs() * 100.0),
            max_position_size_usd: LIQUIDITY_SIZE_FRACTION * liquidity1.min(liquidity2),
            risk_score,
            discovery_time: self.clock.now(),
            strategy_tag: "cross_venue_perp".to_string(),
            strategy_index: -1,
        };

        info!(
            symbol1 = %symbol1,
            symbol2 = %symbol2,
            funding_diff_pct = funding_diff * 100.0,
            net_funding_rate,
            estimated_profit_pct,
            risk_score,
            "opportunity found"
        );
        Some(opportunity)
    }

    // =========================================================================
    // Validate / size
    // =========================================================================

    pub async fn validate(&self, opportunity: &ArbitrageOpportunity) -> bool {
        let symbol1 = &opportunity.pair.symbol1;
        let symbol2 = &opportunity.pair.symbol2;

        let (funding1, funding2) = match (
            with_retry("validate funding v1", || self.venue1.funding_rate(symbol1)).await,
            with_retry("validate funding v2", || self.venue2.funding_rate(symbol2)).await,
        ) {
            (Ok(a), Ok(b)) => (a, b),
            _ => return false,
        };

        let (price1, price2) = match (
            with_retry("validate price v1", || self.venue1.price(symbol1)).await,
            with_retry("validate price v2", || self.venue2.price(symbol2)).await,
        ) {
            (Ok(a), Ok(b)) if a > 0.0 && b > 0.0 => (a, b),
            _ => return false,
        };

        let spread_pct = (price1 - price2) / price2 * 100.0;
        if spread_pct.abs() > opportunity.max_allowable_spread_pct {
            return false;
        }

        let current_net = funding1.annualized_pct() - funding2.annualized_pct();
        if opportunity.net_funding_rate != 0.0
            && (current_net - opportunity.net_funding_rate).abs()
                / opportunity.net_funding_rate.abs()
                > MAX_RATE_DRIFT
        {
            return false;
        }

        // The differential must keep its sign.
        if (funding1.rate - funding2.rate) * (opportunity.funding_rate1 - opportunity.funding_rate2)
            < 0.0
        {
            return false;
        }

        true
    }

    #[must_use]
    pub fn size(&self, opportunity: &ArbitrageOpportunity) -> f64 {
        opportunity.max_position_size_usd * SIZE_FRACTION
    }

    // =========================================================================
    // Execute / close / reduce
    // =========================================================================

    pub async fn execute(
        &self,
        opportunity: &ArbitrageOpportunity,
        size_usd: f64,
    ) -> Result<ExecutionOutcome, ExecError> {
        if !self.validate(opportunity).await {
            return Ok(ExecutionOutcome::Skipped {
                reason: "opportunity no longer valid".to_string(),
            });
        }

        // Long the venue with the lower funding rate, short the other.
        let (side1, side2) = if opportunity.funding_rate1 < opportunity.funding_rate2 {
            (OrderSide::Buy, OrderSide::Sell)
        } else {
            (OrderSide::Sell, OrderSide::Buy)
        };
        info!(
            pair = %opportunity.pair,
            side1 = %side1,
            side2 = %side2,
            size_usd,
            "executing cross-venue hedge"
        );

        let leg1 = HedgeLeg {
            venue: Arc::clone(&self.venue1),
            symbol: opportunity.pair.symbol1.clone(),
            kind: MarketKind::Perpetual,
            side: side1,
        };
        let leg2 = HedgeLeg {
            venue: Arc::clone(&self.venue2),
            symbol: opportunity.pair.symbol2.clone(),
            kind: MarketKind::Perpetual,
            side: side2,
        };

        match hedge::open_hedged(&leg1, &leg2, size_usd, opportunity.max_allowable_spread_pct)
            .await?
        {
            HedgeOutcome::Filled(fill) => {
                let position = ArbitragePosition::open(
                    opportunity.clone(),
                    fill.size_base * fill.price1,
                    fill.price1,
                    fill.price2,
                    self.clock.now(),
                );
                Ok(ExecutionOutcome::Filled(position))
            }
            HedgeOutcome::Aborted { reason } | HedgeOutcome::RolledBack { reason } => {
                Ok(ExecutionOutcome::Skipped { reason })
            }
        }
    }

    pub async fn close(&self, opportunity: &ArbitrageOpportunity) -> Result<bool, ExecError> {
        let outcome =
            hedge::close_hedged(&self.close_leg1(opportunity), &self.close_leg2(opportunity), 1.0)
                .await?;
        Ok(outcome == CloseOutcome::Closed)
    }

    pub async fn reduce(
        &self,
        opportunity: &ArbitrageOpportunity,
        fraction: f64,
    ) -> Result<bool, ExecError> {
        let outcome = hedge::close_hedged(
            &self.close_leg1(opportunity),
            &self.close_leg2(opportunity),
            fraction,
        )
        .await?;
        Ok(outcome == CloseOutcome::Closed)
    }

    fn close_leg1(&self, opportunity: &ArbitrageOpportunity) -> CloseLeg {
        CloseLeg {
            venue: Arc::clone(&self.venue1),
            symbol: opportunity.pair.symbol1.clone(),
            kind: MarketKind::Perpetual,
        }
    }

    fn close_leg2(&self, opportunity: &ArbitrageOpportunity) -> CloseLeg {
        CloseLeg {
            venue: Arc::clone(&self.venue2),
            symbol: opportunity.pair.symbol2.clone(),
            kind: MarketKind::Perpetual,
        }
    }

    // =========================================================================
    // Monitor
    // =========================================================================

    /// Pairs venue-reported legs by base currency, logs imminent funding
    /// payments, and applies an emergency reduction on persistent flips.
    pub async fn monitor(&self) {
        let positions1 = match with_retry("monitor positions v1", || self.venue1.open_positions())
            .await
        {
            Ok(positions) => positions,
            Err(err) => {
                warn!(venue = self.venue1.name(), error = %err, "monitor: position read failed");
                return;
            }
        };
        let positions2 = match with_retry("monitor positions v2", || self.venue2.open_positions())
            .await
        {
            Ok(positions) => positions,
            Err(err) => {
                warn!(venue = self.venue2.name(), error = %err, "monitor: position read failed");
                return;
            }
        };

        for pos1 in positions1.iter().filter(|p| p.size != 0.0) {
            let base1 = hedge::base_currency(&pos1.symbol);
            let Some(pos2) = positions2
                .iter()
                .find(|p| p.size != 0.0 && hedge::base_currency(&p.symbol) == base1)
            else {
                warn!(venue = self.venue1.name(), symbol = %pos1.symbol, "unpaired leg");
                continue;
            };

            let symbol1 = pos1.symbol.clone();
            let symbol2 = pos2.symbol.clone();
            let (funding1, funding2) = match (
                with_retry("monitor funding v1", || self.venue1.funding_rate(&symbol1)).await,
                with_retry("monitor funding v2", || self.venue2.funding_rate(&symbol2)).await,
            ) {
                (Ok(a), Ok(b)) => (a, b),
                _ => continue,
            };

            self.log_upcoming_payments(pos1, pos2, &funding1, &funding2);

            // The leg we are long should be the one paying less funding; a
            // persistent flip on either leg unwinds most of the hedge.
            if persistent_flip(pos1.size, &funding1) || persistent_flip(pos2.size, &funding2) {
                warn!(
                    symbol1 = %pos1.symbol,
                    symbol2 = %pos2.symbol,
                    rate1 = funding1.rate,
                    rate2 = funding2.rate,
                    "funding direction flipped persistently, emergency reduction"
                );
                let leg1 = CloseLeg {
                    venue: Arc::clone(&self.venue1),
                    symbol: pos1.symbol.clone(),
                    kind: MarketKind::Perpetual,
                };
                let leg2 = CloseLeg {
                    venue: Arc::clone(&self.venue2),
                    symbol: pos2.symbol.clone(),
                    kind: MarketKind::Perpetual,
                };
                if let Err(err) = hedge::close_hedged(&leg1, &leg2, FLIP_REDUCTION).await {
                    warn!(symbol = %pos1.symbol, error = %err, "emergency reduction failed");
                }
            }
        }
    }

    fn log_upcoming_payments(
        &self,
        pos1: &funding_arb_core::order::VenuePosition,
        pos2: &funding_arb_core::order::VenuePosition,
        funding1: &FundingRate,
        funding2: &FundingRate,
    ) {
        let now = self.clock.now();
        let minutes1 = (funding1.next_payment - now).num_minutes();
        let minutes2 = (funding2.next_payment - now).num_minutes();
        if minutes1 < 60 || minutes2 < 60 {
            // Shorts receive positive funding on their leg.
            let payment1 =
                funding1.rate * pos1.size.abs() * pos1.entry_price * -pos1.size.signum();
            let payment2 =
                funding2.rate * pos2.size.abs() * pos2.entry_price * -pos2.size.signum();
            info!(
                symbol1 = %pos1.symbol,
                symbol2 = %pos2.symbol,
                minutes1,
                minutes2,
                expected_payment_usd = payment1 + payment2,
                "funding payment imminent"
            );
        }
    }
}

/// Market-impact walk for both legs: returns (liquidity1, liquidity2,
/// combined slippage percent) for the sides the trade would take.
fn impact_model(
    book1: &OrderBook,
    book2: &OrderBook,
    price1: f64,
    price2: f64,
    long_venue1: bool,
) -> (f64, f64, f64) {
    let (side1, side2) = if long_venue1 {
        (&book1.asks, &book2.bids)
    } else {
        (&book1.bids, &book2.asks)
    };

    let walk1 = depth::walk(side1, LIQUIDITY_REFERENCE_USD);
    let walk2 = depth::walk(side2, LIQUIDITY_REFERENCE_USD);

    let slippage1 = depth::slippage_pct(&walk1, price1, long_venue1);
    let slippage2 = depth::slippage_pct(&walk2, price2, !long_venue1);

    (
        walk1.available_usd,
        walk2.available_usd,
        slippage1 + slippage2,
    )
}
