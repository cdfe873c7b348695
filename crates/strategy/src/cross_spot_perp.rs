//! Spot on one venue vs. perpetual on another.
//!
//! Same economics as the single-venue basis trade, but the legs settle on
//! different venues, so counterparty risk is pinned higher and sizing is
//! tightened.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, info, warn};

use funding_arb_core::clock::SharedClock;
use funding_arb_core::error::ExecError;
use funding_arb_core::market::MarketKind;
use funding_arb_core::opportunity::{ArbitrageOpportunity, TradingPair};
use funding_arb_core::order::OrderSide;
use funding_arb_core::position::ArbitragePosition;
use funding_arb_core::retry::with_retry;
use funding_arb_core::venue::Exchange;
use funding_arb_risk::scoring::{self, ScoreInputs, LIQUIDITY_REFERENCE_USD};

use crate::hedge::{self, CloseLeg, CloseOutcome, HedgeLeg, HedgeOutcome};
use crate::{depth, persistent_flip, ExecutionOutcome, DEFAULT_TAKER_FEE, SCAN_BOOK_DEPTH};

/// Fraction of the annualised funding edge tolerated as entry spread.
const SPREAD_ALLOWANCE_FRACTION: f64 = 0.10;

/// Relative funding move since discovery that invalidates an opportunity.
const MAX_RATE_DRIFT: f64 = 0.20;

/// Fraction of the liquidity-implied cap taken as `max_position_size_usd`.
const LIQUIDITY_SIZE_FRACTION: f64 = 0.25;

/// Fraction of `max_position_size_usd` actually deployed.
const SIZE_FRACTION: f64 = 0.35;

/// Cross-venue spot-perp carries a pinned venue risk contribution.
const VENUE_RISK: f64 = 15.0;

/// Emergency reduction applied when funding has flipped persistently.
const FLIP_REDUCTION: f64 = 0.75;

pub struct CrossVenueSpotPerp {
    spot_venue: Arc<dyn Exchange>,
    perp_venue: Arc<dyn Exchange>,
    clock: SharedClock,
    min_funding_rate: f64,
    min_expected_profit: f64,
}

impl CrossVenueSpotPerp {
    #[must_use]
    pub fn new(
        spot_venue: Arc<dyn Exchange>,
        perp_venue: Arc<dyn Exchange>,
        clock: SharedClock,
        min_funding_rate: f64,
        min_expected_profit: f64,
    ) -> Self {
        Self {
            spot_venue,
            perp_venue,
            clock,
            min_funding_rate,
            min_expected_profit,
        }
    }

    #[must_use]
    pub fn name(&self) -> String {
        format!(
            "cross_venue_spot_perp({}, {})",
            self.spot_venue.name(),
            self.perp_venue.name()
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
        pair.venue1 == self.spot_venue.name()
            && pair.venue2 == self.perp_venue.name()
            && pair.kind1 == MarketKind::Spot
            && pair.kind2 == MarketKind::Perpetual
    }

    pub async fn symbols(&self) -> BTreeSet<String> {
        let mut symbols = BTreeSet::new();
        if let Ok(instruments) = self
            .spot_venue
            .available_instruments(MarketKind::Spot)
            .await
        {
            symbols.extend(instruments.into_iter().map(|i| i.symbol));
        }
        if let Ok(instruments) = self
            .perp_venue
            .available_instruments(MarketKind::Perpetual)
            .await
        {
            symbols.extend(instruments.into_iter().map(|i| i.symbol));
        }
        symbols
    }

    // =========================================================================
    // Scan
    // =========================================================================

    pub async fn find_opportunities(&self) -> Vec<ArbitrageOpportunity> {
        let mut opportunities = Vec::new();

        let perps = match with_retry("perp instruments", || {
            self.perp_venue.available_instruments(MarketKind::Perpetual)
        })
        .await
        {
            Ok(instruments) => instruments,
            Err(err) => {
                warn!(venue = self.perp_venue.name(), error = %err, "scan: instrument listing failed");
                return opportunities;
            }
        };
        let spots = match with_retry("spot instruments", || {
            self.spot_venue.available_instruments(MarketKind::Spot)
        })
        .await
        {
            Ok(instruments) => instruments,
            Err(err) => {
                warn!(venue = self.spot_venue.name(), error = %err, "scan: instrument listing failed");
                return opportunities;
            }
        };

        for perp in &perps {
            if perp.base_currency.is_empty() || perp.quote_currency.is_empty() {
                continue;
            }
            for spot in spots.iter().filter(|s| s.same_pair(perp)) {
                if let Some(opportunity) = self.evaluate_pair(&spot.symbol, &perp.symbol).await {
                    opportunities.push(opportunity);
                }
            }
        }

        opportunities.sort_by(|a, b| {
            b.estimated_profit_pct
                .partial_cmp(&a.estimated_profit_pct)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        info!(
            spot_venue = self.spot_venue.name(),
            perp_venue = self.perp_venue.name(),
            count = opportunities.len(),
            "cross-venue spot-perp scan complete"
        );
        opportunities
    }

    async fn evaluate_pair(
        &self,
        spot_symbol: &str,
        perp_symbol: &str,
    ) -> Option<ArbitrageOpportunity> {
        let funding = with_retry("funding rate", || self.perp_venue.funding_rate(perp_symbol))
            .await
            .ok()?;
        if funding.rate.abs() < self.min_funding_rate {
            return None;
        }
        let annualized_pct = funding.annualized_pct();

        let spot_price = with_retry("spot price", || self.spot_venue.price(spot_symbol))
            .await
            .ok()?;
        let perp_price = with_retry("perp price", || self.perp_venue.price(perp_symbol))
            .await
            .ok()?;
        if spot_price <= 0.0 || perp_price <= 0.0 {
            return None;
        }
        let spread_pct = (perp_price - spot_price) / spot_price * 100.0;

        let spot_fee = match with_retry("spot fee", || {
            self.spot_venue.trading_fee(spot_symbol, false)
        })
        .await
        {
            Ok(fee) => fee,
            Err(err) => {
                warn!(symbol = spot_symbol, error = %err, "fee lookup failed, using default");
                DEFAULT_TAKER_FEE
            }
        };
        let perp_fee = match with_retry("perp fee", || {
            self.perp_venue.trading_fee(perp_symbol, false)
        })
        .await
        {
            Ok(fee) => fee,
            Err(err) => {
                warn!(symbol = perp_symbol, error = %err, "fee lookup failed, using default");
                DEFAULT_TAKER_FEE
            }
        };

        let transaction_cost_pct = (spot_fee + perp_fee) * 2.0 * 100.0;
        let estimated_profit_pct = annualized_pct.abs() - transaction_cost_pct;
        if estimated_profit_pct <= self.min_expected_profit {
            return None;
        }

        let max_allowable_spread_pct = annualized_pct.abs() * SPREAD_ALLOWANCE_FRACTION;
        if spread_pct.abs() > max_allowable_spread_pct {
            debug!(
                spot = spot_symbol,
                perp = perp_symbol,
                spread_pct,
                max_allowable_spread_pct,
                "spread too wide"
            );
            return None;
        }

        let spot_book = with_retry("spot book", || {
            self.spot_venue.order_book(spot_symbol, SCAN_BOOK_DEPTH)
        })
        .await
        .ok()?;
        let perp_book = with_retry("perp book", || {
            self.perp_venue.order_book(perp_symbol, SCAN_BOOK_DEPTH)
        })
        .await
        .ok()?;

        let liquidity1 = depth::available_quote(&spot_book.bids, LIQUIDITY_REFERENCE_USD);
        let liquidity2 = depth::available_quote(&perp_book.bids, LIQUIDITY_REFERENCE_USD);

        let risk_score = scoring::risk_score(&ScoreInputs {
            entry_spread_pct: spread_pct,
            max_allowable_spread_pct,
            liquidity1_usd: liquidity1,
            liquidity2_usd: liquidity2,
            venue1: self.spot_venue.name(),
            venue2: self.perp_venue.name(),
            same_venue: false,
            payment_interval1: None,
            payment_interval2: Some(funding.payment_interval_hours),
            venue_risk_override: Some(VENUE_RISK),
        });

        let opportunity = ArbitrageOpportunity {
            pair: TradingPair::cross_venue(
                self.spot_venue.name(),
                spot_symbol,
                MarketKind::Spot,
                self.perp_venue.name(),
                perp_symbol,
                MarketKind::Perpetual,
            ),
            funding_rate1: 0.0,
            funding_rate2: funding.rate,
            payment_interval1: None,
            payment_interval2: Some(funding.payment_interval_hours),
            net_funding_rate: annualized_pct,
            entry_price_spread_pct: spread_pct,
            max_allowable_spread_pct,
            transaction_cost_pct,
            estimated_profit_pct,
            periods_to_breakeven: transaction_cost_pct / (funding.rate.abs() * 100.0),
            max_position_size_usd: LIQUIDITY_SIZE_FRACTION * liquidity1.min(liquidity2),
            risk_score,
            discovery_time: self.clock.now(),
            strategy_tag: "cross_venue_spot_perp".to_string(),
            strategy_index: -1,
        };

        info!(
            spot = spot_symbol,
            perp = perp_symbol,
            annualized_pct,
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
        let symbol2 = &opportunity.pair.symbol2;
        let funding = match with_retry("validate funding", || {
            self.perp_venue.funding_rate(symbol2)
        })
        .await
        {
            Ok(funding) => funding,
            Err(_) => return false,
        };

        if funding.rate.abs() < self.min_funding_rate {
            return false;
        }
        if funding.rate * opportunity.funding_rate2 < 0.0 {
            return false;
        }
        let annualized_pct = funding.annualized_pct();
        if opportunity.net_funding_rate != 0.0
            && (annualized_pct - opportunity.net_funding_rate).abs()
                / opportunity.net_funding_rate.abs()
                > MAX_RATE_DRIFT
        {
            return false;
        }

        let symbol1 = &opportunity.pair.symbol1;
        let (spot_price, perp_price) = match (
            with_retry("validate spot price", || self.spot_venue.price(symbol1)).await,
            with_retry("validate perp price", || self.perp_venue.price(symbol2)).await,
        ) {
            (Ok(s), Ok(p)) if s > 0.0 && p > 0.0 => (s, p),
            _ => return false,
        };
        let spread_pct = (perp_price - spot_price) / spot_price * 100.0;
        spread_pct.abs() <= opportunity.max_allowable_spread_pct
    }

    /// Cross-venue spot-perp deploys a tightened fraction of the cap.
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

        let symbol2 = opportunity.pair.symbol2.clone();
        let funding = with_retry("execution funding", || {
            self.perp_venue.funding_rate(&symbol2)
        })
        .await?;
        let (spot_side, perp_side) = if funding.rate > 0.0 {
            (OrderSide::Buy, OrderSide::Sell)
        } else {
            (OrderSide::Sell, OrderSide::Buy)
        };

        let spot_leg = HedgeLeg {
            venue: Arc::clone(&self.spot_venue),
            symbol: opportunity.pair.symbol1.clone(),
            kind: MarketKind::Spot,
            side: spot_side,
        };
        let perp_leg = HedgeLeg {
            venue: Arc::clone(&self.perp_venue),
            symbol: opportunity.pair.symbol2.clone(),
            kind: MarketKind::Perpetual,
            side: perp_side,
        };

        match hedge::open_hedged(
            &spot_leg,
            &perp_leg,
            size_usd,
            opportunity.max_allowable_spread_pct,
        )
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
            venue: Arc::clone(&self.spot_venue),
            symbol: opportunity.pair.symbol1.clone(),
            kind: MarketKind::Spot,
        }
    }

    fn close_leg2(&self, opportunity: &ArbitrageOpportunity) -> CloseLeg {
        CloseLeg {
            venue: Arc::clone(&self.perp_venue),
            symbol: opportunity.pair.symbol2.clone(),
            kind: MarketKind::Perpetual,
        }
    }

    // =========================================================================
    // Monitor
    // =========================================================================

    pub async fn monitor(&self) {
        let positions = match with_retry("monitor positions", || self.perp_venue.open_positions())
            .await
        {
            Ok(positions) => positions,
            Err(err) => {
                warn!(venue = self.perp_venue.name(), error = %err, "monitor: position read failed");
                return;
            }
        };
        let balances = match with_retry("monitor balances", || self.spot_venue.account_balance())
            .await
        {
            Ok(balances) => balances,
            Err(err) => {
                warn!(venue = self.spot_venue.name(), error = %err, "monitor: balance read failed");
                return;
            }
        };

        for perp_pos in positions.iter().filter(|p| p.size != 0.0) {
            let base = hedge::base_currency(&perp_pos.symbol);
            let spot_held = balances.total(base);
            if spot_held.abs() <= hedge::RESIDUAL_EPS {
                continue;
            }

            let symbol = perp_pos.symbol.clone();
            let funding = match with_retry("monitor funding", || {
                self.perp_venue.funding_rate(&symbol)
            })
            .await
            {
                Ok(funding) => funding,
                Err(_) => continue,
            };

            let minutes_to_payment = (funding.next_payment - self.clock.now()).num_minutes();
            if minutes_to_payment < 60 {
                let payment_usd = funding.rate
                    * perp_pos.size.abs()
                    * perp_pos.entry_price
                    * -perp_pos.size.signum();
                info!(
                    symbol = %perp_pos.symbol,
                    rate_pct = funding.rate * 100.0,
                    minutes_to_payment,
                    expected_payment_usd = payment_usd,
                    "funding payment imminent"
                );
            }

            if persistent_flip(perp_pos.size, &funding) {
                warn!(
                    symbol = %perp_pos.symbol,
                    rate = funding.rate,
                    predicted = funding.predicted_rate,
                    "funding direction flipped persistently, emergency reduction"
                );
                let spot_symbol = format!("{base}/{}", hedge::quote_currency(&perp_pos.symbol));
                let spot_leg = CloseLeg {
                    venue: Arc::clone(&self.spot_venue),
                    symbol: spot_symbol,
                    kind: MarketKind::Spot,
                };
                let perp_leg = CloseLeg {
                    venue: Arc::clone(&self.perp_venue),
                    symbol: perp_pos.symbol.clone(),
                    kind: MarketKind::Perpetual,
                };
                if let Err(err) = hedge::close_hedged(&spot_leg, &perp_leg, FLIP_REDUCTION).await {
                    warn!(symbol = %perp_pos.symbol, error = %err, "emergency reduction failed");
                }
            }
        }
    }
}
