//! Funding-rate arbitrage strategies.
//!
//! Three concrete geometries plus a composite, modelled as a tagged enum
//! with a shared operation set:
//!
//! - [`SameVenueSpotPerp`]: spot vs. perp basis on one venue
//! - [`CrossVenuePerp`]: funding differential between two perp venues
//! - [`CrossVenueSpotPerp`]: spot on one venue vs. perp on another
//! - [`CompositeStrategy`]: ordered collection of the above with indexed
//!   dispatch
//!
//! The hedged two-leg execution, close and reduce protocol shared by all of
//! them lives in [`hedge`]; the consolidated order-book walk in [`depth`].

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use anyhow::bail;

use funding_arb_core::clock::SharedClock;
use funding_arb_core::config::{StrategyConfig, StrategyKind};
use funding_arb_core::error::ExecError;
use funding_arb_core::market::FundingRate;
use funding_arb_core::opportunity::{ArbitrageOpportunity, TradingPair};
use funding_arb_core::position::ArbitragePosition;
use funding_arb_core::venue::Exchange;

pub mod composite;
pub mod cross_perp;
pub mod cross_spot_perp;
pub mod depth;
pub mod hedge;
pub mod same_venue;

pub use composite::CompositeStrategy;
pub use cross_perp::CrossVenuePerp;
pub use cross_spot_perp::CrossVenueSpotPerp;
pub use hedge::{CloseLeg, CloseOutcome, HedgeFill, HedgeLeg, HedgeOutcome};
pub use same_venue::SameVenueSpotPerp;

/// Fallback taker fee when a venue's fee endpoint is unavailable.
pub(crate) const DEFAULT_TAKER_FEE: f64 = 0.001;

/// Book depth requested during scans.
pub(crate) const SCAN_BOOK_DEPTH: usize = 5;

/// Result of a strategy execution attempt.
#[derive(Debug, Clone)]
pub enum ExecutionOutcome {
    /// Both legs filled; the position is ready for the risk registry.
    Filled(ArbitragePosition),
    /// Nothing was opened (validation, spread, fill failure, clean
    /// rollback); the account holds no new exposure.
    Skipped { reason: String },
}

/// True when a perp leg's funding has crossed zero against the held
/// direction in both the current and predicted rate.
///
/// Shorts collect positive funding, longs collect negative funding; a
/// persistent flip means the position now pays instead.
pub(crate) fn persistent_flip(perp_size: f64, funding: &FundingRate) -> bool {
    const FLIP_EPS: f64 = 1e-4;
    let Some(predicted) = funding.predicted_rate else {
        return false;
    };
    if perp_size < 0.0 {
        funding.rate < -FLIP_EPS && predicted < -FLIP_EPS
    } else {
        funding.rate > FLIP_EPS && predicted > FLIP_EPS
    }
}

// =============================================================================
// Child strategies (composite members)
// =============================================================================

/// One of the three concrete geometries. The composite owns an ordered
/// collection of these.
pub enum ChildStrategy {
    SameVenueSpotPerp(SameVenueSpotPerp),
    CrossVenuePerp(CrossVenuePerp),
    CrossVenueSpotPerp(CrossVenueSpotPerp),
}

macro_rules! child_dispatch {
    ($self:expr, $inner:ident => $body:expr) => {
        match $self {
            ChildStrategy::SameVenueSpotPerp($inner) => $body,
            ChildStrategy::CrossVenuePerp($inner) => $body,
            ChildStrategy::CrossVenueSpotPerp($inner) => $body,
        }
    };
}

impl ChildStrategy {
    #[must_use]
    pub fn name(&self) -> String {
        child_dispatch!(self, s => s.name())
    }

    #[must_use]
    pub fn min_funding_rate(&self) -> f64 {
        child_dispatch!(self, s => s.min_funding_rate())
    }

    pub fn set_min_funding_rate(&mut self, rate: f64) {
        child_dispatch!(self, s => s.set_min_funding_rate(rate));
    }

    #[must_use]
    pub fn min_expected_profit(&self) -> f64 {
        child_dispatch!(self, s => s.min_expected_profit())
    }

    pub fn set_min_expected_profit(&mut self, profit: f64) {
        child_dispatch!(self, s => s.set_min_expected_profit(profit));
    }

    #[must_use]
    pub fn covers(&self, pair: &TradingPair) -> bool {
        child_dispatch!(self, s => s.covers(pair))
    }

    pub async fn symbols(&self) -> BTreeSet<String> {
        child_dispatch!(self, s => s.symbols().await)
    }

    pub async fn find_opportunities(&self) -> Vec<ArbitrageOpportunity> {
        child_dispatch!(self, s => s.find_opportunities().await)
    }

    pub async fn validate(&self, opportunity: &ArbitrageOpportunity) -> bool {
        child_dispatch!(self, s => s.validate(opportunity).await)
    }

    #[must_use]
    pub fn size(&self, opportunity: &ArbitrageOpportunity) -> f64 {
        child_dispatch!(self, s => s.size(opportunity))
    }

    pub async fn execute(
        &self,
        opportunity: &ArbitrageOpportunity,
        size_usd: f64,
    ) -> Result<ExecutionOutcome, ExecError> {
        child_dispatch!(self, s => s.execute(opportunity, size_usd).await)
    }

    pub async fn close(&self, opportunity: &ArbitrageOpportunity) -> Result<bool, ExecError> {
        child_dispatch!(self, s => s.close(opportunity).await)
    }

    pub async fn reduce(
        &self,
        opportunity: &ArbitrageOpportunity,
        fraction: f64,
    ) -> Result<bool, ExecError> {
        child_dispatch!(self, s => s.reduce(opportunity, fraction).await)
    }

    pub async fn monitor(&self) {
        child_dispatch!(self, s => s.monitor().await);
    }
}

// =============================================================================
// Top-level strategy
// =============================================================================

/// A scheduled strategy: one of the three concrete geometries or a
/// composite of them.
pub enum ArbStrategy {
    SameVenueSpotPerp(SameVenueSpotPerp),
    CrossVenuePerp(CrossVenuePerp),
    CrossVenueSpotPerp(CrossVenueSpotPerp),
    Composite(CompositeStrategy),
}

impl From<ChildStrategy> for ArbStrategy {
    fn from(child: ChildStrategy) -> Self {
        match child {
            ChildStrategy::SameVenueSpotPerp(s) => Self::SameVenueSpotPerp(s),
            ChildStrategy::CrossVenuePerp(s) => Self::CrossVenuePerp(s),
            ChildStrategy::CrossVenueSpotPerp(s) => Self::CrossVenueSpotPerp(s),
        }
    }
}

macro_rules! strategy_dispatch {
    ($self:expr, $inner:ident => $body:expr) => {
        match $self {
            ArbStrategy::SameVenueSpotPerp($inner) => $body,
            ArbStrategy::CrossVenuePerp($inner) => $body,
            ArbStrategy::CrossVenueSpotPerp($inner) => $body,
            ArbStrategy::Composite($inner) => $body,
        }
    };
}

impl ArbStrategy {
    #[must_use]
    pub fn name(&self) -> String {
        strategy_dispatch!(self, s => s.name())
    }

    #[must_use]
    pub fn min_funding_rate(&self) -> f64 {
        strategy_dispatch!(self, s => s.min_funding_rate())
    }

    pub fn set_min_funding_rate(&mut self, rate: f64) {
        strategy_dispatch!(self, s => s.set_min_funding_rate(rate));
    }

    #[must_use]
    pub fn min_expected_profit(&self) -> f64 {
        strategy_dispatch!(self, s => s.min_expected_profit())
    }

    pub fn set_min_expected_profit(&mut self, profit: f64) {
        strategy_dispatch!(self, s => s.set_min_expected_profit(profit));
    }

    #[must_use]
    pub fn covers(&self, pair: &TradingPair) -> bool {
        strategy_dispatch!(self, s => s.covers(pair))
    }

    pub async fn symbols(&self) -> BTreeSet<String> {
        strategy_dispatch!(self, s => s.symbols().await)
    }

    pub async fn find_opportunities(&self) -> Vec<ArbitrageOpportunity> {
        strategy_dispatch!(self, s => s.find_opportunities().await)
    }

    pub async fn validate(&self, opportunity: &ArbitrageOpportunity) -> bool {
        strategy_dispatch!(self, s => s.validate(opportunity).await)
    }

    #[must_use]
    pub fn size(&self, opportunity: &ArbitrageOpportunity) -> f64 {
        strategy_dispatch!(self, s => s.size(opportunity))
    }

    pub async fn execute(
        &self,
        opportunity: &ArbitrageOpportunity,
        size_usd: f64,
    ) -> Result<ExecutionOutcome, ExecError> {
        strategy_dispatch!(self, s => s.execute(opportunity, size_usd).await)
    }

    pub async fn close(&self, opportunity: &ArbitrageOpportunity) -> Result<bool, ExecError> {
        strategy_dispatch!(self, s => s.close(opportunity).await)
    }

    pub async fn reduce(
        &self,
        opportunity: &ArbitrageOpportunity,
        fraction: f64,
    ) -> Result<bool, ExecError> {
        strategy_dispatch!(self, s => s.reduce(opportunity, fraction).await)
    }

    pub async fn monitor(&self) {
        strategy_dispatch!(self, s => s.monitor().await);
    }
}

// =============================================================================
// Factory
// =============================================================================

/// Builds the strategy for one config entry, fanning it out over the
/// connected venues: same-venue gets a child per venue, cross-venue perp a
/// child per unordered venue pair, cross-venue spot-perp a child per ordered
/// pair. Multiple children are wrapped in a composite.
pub fn build_strategy(
    config: &StrategyConfig,
    venues: &HashMap<String, Arc<dyn Exchange>>,
    clock: &SharedClock,
) -> anyhow::Result<ArbStrategy> {
    let mut names: Vec<&String> = venues.keys().collect();
    names.sort();

    let mut children = Vec::new();
    match config.kind {
        StrategyKind::SameExchangeSpotPerp => {
            for name in &names {
                children.push(ChildStrategy::SameVenueSpotPerp(SameVenueSpotPerp::new(
                    Arc::clone(&venues[*name]),
                    Arc::clone(clock),
                    config.min_funding_rate,
                    config.min_expected_profit,
                )));
            }
        }
        StrategyKind::CrossExchangePerp => {
            for (i, a) in names.iter().enumerate() {
                for b in names.iter().skip(i + 1) {
                    children.push(ChildStrategy::CrossVenuePerp(CrossVenuePerp::new(
                        Arc::clone(&venues[*a]),
                        Arc::clone(&venues[*b]),
                        Arc::clone(clock),
                        config.min_funding_rate,
                        config.min_expected_profit,
                    )));
                }
            }
        }
        StrategyKind::CrossExchangeSpotPerp => {
            for a in &names {
                for b in &names {
                    if a == b {
                        continue;
                    }
                    children.push(ChildStrategy::CrossVenueSpotPerp(CrossVenueSpotPerp::new(
                        Arc::clone(&venues[*a]),
                        Arc::clone(&venues[*b]),
                        Arc::clone(clock),
                        config.min_funding_rate,
                        config.min_expected_profit,
                    )));
                }
            }
        }
    }

    match children.len() {
        0 => bail!(
            "strategy {:?} needs more venues than the {} configured",
            config.kind,
            venues.len()
        ),
        1 => Ok(ArbStrategy::from(children.remove(0))),
        _ => Ok(ArbStrategy::Composite(CompositeStrategy::new(children))),
    }
}
