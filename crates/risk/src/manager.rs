//! Entry gating, sizing, close/reduce signals, and the live position
//! registry.
//!
//! The registry is the single source of truth for live positions. The lock
//! is never held across a venue call: callers take a snapshot, do their I/O,
//! and merge updates back with [`RiskManager::apply_update`].

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{info, warn};

use funding_arb_core::config::RiskConfig;
use funding_arb_core::error::VenueError;
use funding_arb_core::opportunity::ArbitrageOpportunity;
use funding_arb_core::position::ArbitragePosition;
use funding_arb_core::retry::with_retry;
use funding_arb_core::venue::Exchange;

/// Risk score above which opportunities are rejected outright.
const MAX_ENTRY_RISK_SCORE: f64 = 75.0;

/// Risk score above which position sizes are scaled down.
const SIZE_DAMPING_THRESHOLD: f64 = 50.0;

/// Fraction of the divergence / stop-loss budget at which reduction starts.
const REDUCE_BAND_START: f64 = 0.75;

/// Default fraction of a position to close when reduction triggers.
const DEFAULT_REDUCE_FRACTION: f64 = 0.5;

/// Manages risk for all arbitrage positions.
pub struct RiskManager {
    config: RiskConfig,
    positions: RwLock<HashMap<String, ArbitragePosition>>,
}

impl RiskManager {
    #[must_use]
    pub fn new(config: RiskConfig) -> Self {
        Self {
            config,
            positions: RwLock::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    // =========================================================================
    // Entry gating and sizing
    // =========================================================================

    /// Returns false if the opportunity would breach total exposure, carries
    /// too much risk, or has no positive edge.
    #[must_use]
    pub fn can_enter(&self, opportunity: &ArbitrageOpportunity) -> bool {
        let total_active = self.total_active_notional();
        if total_active + opportunity.max_position_size_usd > self.config.max_total_position_usd {
            return false;
        }
        if opportunity.risk_score > MAX_ENTRY_RISK_SCORE {
            return false;
        }
        if opportunity.estimated_profit_pct <= 0.0 {
            return false;
        }
        true
    }

    /// Sizes a position in USD: the opportunity's liquidity cap bounded by
    /// config, damped above risk score 50, and capped by remaining total
    /// exposure.
    #[must_use]
    pub fn position_size(&self, opportunity: &ArbitrageOpportunity) -> f64 {
        let mut size = opportunity
            .max_position_size_usd
            .min(self.config.max_position_size_usd);

        if opportunity.risk_score > SIZE_DAMPING_THRESHOLD {
            size *= 1.0 - (opportunity.risk_score - SIZE_DAMPING_THRESHOLD) / 100.0;
        }

        let available = self.config.max_total_position_usd - self.total_active_notional();
        size.min(available).max(0.0)
    }

    // =========================================================================
    // Close / reduce signals
    // =========================================================================

    /// Returns true when the position hit its profit target, its stop loss,
    /// or drifted past the divergence budget.
    #[must_use]
    pub fn should_close(&self, position: &ArbitragePosition) -> bool {
        let pnl_pct = position.pnl_pct();

        if position.unrealized_pnl_usd > 0.0 && pnl_pct >= self.config.target_profit_pct {
            return true;
        }
        if position.unrealized_pnl_usd < 0.0 && pnl_pct.abs() >= self.config.stop_loss_pct {
            return true;
        }
        if position.spread_divergence_pct() > self.config.max_price_divergence_pct {
            return true;
        }
        false
    }

    /// Returns the reduction fraction when the position sits in the warning
    /// band (75-100% of the divergence or stop-loss budget). Close takes
    /// precedence: positions that already qualify for closing do not reduce.
    #[must_use]
    pub fn should_reduce(&self, position: &ArbitragePosition) -> Option<f64> {
        if self.should_close(position) {
            return None;
        }

        let divergence = position.spread_divergence_pct();
        let divergence_band_start = self.config.max_price_divergence_pct * REDUCE_BAND_START;
        if divergence > divergence_band_start && divergence <= self.config.max_price_divergence_pct
        {
            return Some(DEFAULT_REDUCE_FRACTION);
        }

        if position.unrealized_pnl_usd < 0.0 {
            let loss_pct = position.pnl_pct().abs();
            let loss_band_start = self.config.stop_loss_pct * REDUCE_BAND_START;
            if loss_pct > loss_band_start && loss_pct <= self.config.stop_loss_pct {
                return Some(DEFAULT_REDUCE_FRACTION);
            }
        }

        None
    }

    // =========================================================================
    // Mark-to-market
    // =========================================================================

    /// Refreshes both leg prices and recomputes spread and PnL on the given
    /// snapshot. The caller merges the result back with [`Self::apply_update`].
    pub async fn update_mark_to_market(
        &self,
        position: &mut ArbitragePosition,
        venues: &HashMap<String, Arc<dyn Exchange>>,
    ) -> Result<(), VenueError> {
        let pair = &position.opportunity.pair;
        let venue1 = venues
            .get(&pair.venue1)
            .ok_or_else(|| VenueError::NotConnected(pair.venue1.clone()))?;
        let venue2 = venues
            .get(&pair.venue2)
            .ok_or_else(|| VenueError::NotConnected(pair.venue2.clone()))?;

        let symbol1 = pair.symbol1.clone();
        let symbol2 = pair.symbol2.clone();
        let price1 = with_retry("mark price leg1", || venue1.price(&symbol1)).await?;
        let price2 = with_retry("mark price leg2", || venue2.price(&symbol2)).await?;

        position.current_price1 = price1;
        position.current_price2 = price2;
        position.current_spread_pct =
            (price1 - price2).abs() / ((price1 + price2) / 2.0) * 100.0;
        position.unrealized_pnl_usd = (position.current_spread_pct
            - position.initial_spread_pct)
            * position.position_size_usd
            + position.funding_collected_usd;

        Ok(())
    }

    // =========================================================================
    // Registry
    // =========================================================================

    /// Registers (or re-registers) a position.
    pub fn register_position(&self, position: ArbitragePosition) {
        info!(
            position_id = %position.position_id,
            size_usd = position.position_size_usd,
            pair = %position.opportunity.pair,
            "registering position"
        );
        self.positions
            .write()
            .insert(position.position_id.clone(), position);
    }

    /// Snapshot of all active positions.
    #[must_use]
    pub fn active_positions(&self) -> Vec<ArbitragePosition> {
        self.positions
            .read()
            .values()
            .filter(|p| p.is_active)
            .cloned()
            .collect()
    }

    /// Looks up one position by id.
    #[must_use]
    pub fn position(&self, position_id: &str) -> Option<ArbitragePosition> {
        self.positions.read().get(position_id).cloned()
    }

    /// Merges an updated snapshot back into the registry. Ignored if the
    /// position was closed concurrently.
    pub fn apply_update(&self, position: &ArbitragePosition) {
        let mut positions = self.positions.write();
        match positions.get_mut(&position.position_id) {
            Some(existing) if existing.is_active => *existing = position.clone(),
            Some(_) => {}
            None => {
                warn!(
                    position_id = %position.position_id,
                    "update for unknown position dropped"
                );
            }
        }
    }

    /// Marks a position inactive and returns its final state.
    pub fn mark_closed(&self, position_id: &str) -> Option<ArbitragePosition> {
        let mut positions = self.positions.write();
        let position = positions.get_mut(position_id)?;
        position.is_active = false;
        Some(position.clone())
    }

    /// Drops inactive positions from the registry.
    pub fn evict_inactive(&self) {
        self.positions.write().retain(|_, p| p.is_active);
    }

    /// Total notional of active positions, USD.
    #[must_use]
    pub fn total_active_notional(&self) -> f64 {
        self.positions
            .read()
            .values()
            .filter(|p| p.is_active)
            .map(|p| p.position_size_usd)
            .sum()
    }
}
