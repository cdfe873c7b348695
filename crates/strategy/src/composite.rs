//! Composite over an ordered collection of sub-strategies.
//!
//! `find_opportunities` stamps every opportunity with the index of the child
//! that produced it; later calls dispatch on that index. Opportunities
//! reloaded from persisted state may carry index -1, in which case dispatch
//! falls back to a linear search over children by pair geometry.

use tracing::warn;

use funding_arb_core::error::ExecError;
use funding_arb_core::opportunity::{ArbitrageOpportunity, TradingPair};

use crate::{ChildStrategy, ExecutionOutcome};

pub struct CompositeStrategy {
    children: Vec<ChildStrategy>,
    min_funding_rate: f64,
    min_expected_profit: f64,
}

impl CompositeStrategy {
    #[must_use]
    pub fn new(children: Vec<ChildStrategy>) -> Self {
        let min_funding_rate = children.first().map_or(0.0, ChildStrategy::min_funding_rate);
        let min_expected_profit = children
            .first()
            .map_or(0.0, ChildStrategy::min_expected_profit);
        Self {
            children,
            min_funding_rate,
            min_expected_profit,
        }
    }

    #[must_use]
    pub fn children(&self) -> &[ChildStrategy] {
        &self.children
    }

    #[must_use]
    pub fn name(&self) -> String {
        let names: Vec<String> = self.children.iter().map(ChildStrategy::name).collect();
        format!("composite({})", names.join(", "))
    }

    #[must_use]
    pub fn min_funding_rate(&self) -> f64 {
        self.min_funding_rate
    }

    /// Propagates to every child.
    pub fn set_min_funding_rate(&mut self, rate: f64) {
        self.min_funding_rate = rate;
        for child in &mut self.children {
            child.set_min_funding_rate(rate);
        }
    }

    #[must_use]
    pub fn min_expected_profit(&self) -> f64 {
        self.min_expected_profit
    }

    /// Propagates to every child.
    pub fn set_min_expected_profit(&mut self, profit: f64) {
        self.min_expected_profit = profit;
        for child in &mut self.children {
            child.set_min_expected_profit(profit);
        }
    }

    #[must_use]
    pub fn covers(&self, pair: &TradingPair) -> bool {
        self.children.iter().any(|c| c.covers(pair))
    }

    pub async fn symbols(&self) -> std::collections::BTreeSet<String> {
        let mut symbols = std::collections::BTreeSet::new();
        for child in &self.children {
            symbols.extend(child.symbols().await);
        }
        symbols
    }

    /// Concatenates child results, stamping each opportunity with its
    /// originating child index, sorted by raw estimated profit.
    pub async fn find_opportunities(&self) -> Vec<ArbitrageOpportunity> {
        let mut all = Vec::new();
        for (index, child) in self.children.iter().enumerate() {
            let mut opportunities = child.find_opportunities().await;
            for opportunity in &mut opportunities {
                opportunity.strategy_index = index as i32;
            }
            all.extend(opportunities);
        }

        all.sort_by(|a, b| {
            b.estimated_profit_pct
                .partial_cmp(&a.estimated_profit_pct)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        all
    }

    /// Index fast path; pair-equality slow path for unstamped opportunities.
    fn child_for(&self, opportunity: &ArbitrageOpportunity) -> Option<&ChildStrategy> {
        let index = opportunity.strategy_index;
        if index >= 0 && (index as usize) < self.children.len() {
            return Some(&self.children[index as usize]);
        }
        self.children.iter().find(|c| c.covers(&opportunity.pair))
    }

    pub async fn validate(&self, opportunity: &ArbitrageOpportunity) -> bool {
        match self.child_for(opportunity) {
            Some(child) => child.validate(opportunity).await,
            None => false,
        }
    }

    #[must_use]
    pub fn size(&self, opportunity: &ArbitrageOpportunity) -> f64 {
        self.child_for(opportunity).map_or(0.0, |c| c.size(opportunity))
    }

    pub async fn execute(
        &self,
        opportunity: &ArbitrageOpportunity,
        size_usd: f64,
    ) -> Result<ExecutionOutcome, ExecError> {
        match self.child_for(opportunity) {
            Some(child) => child.execute(opportunity, size_usd).await,
            None => {
                warn!(pair = %opportunity.pair, "no child strategy covers this opportunity");
                Ok(ExecutionOutcome::Skipped {
                    reason: "no child strategy covers this pair".to_string(),
                })
            }
        }
    }

    pub async fn close(&self, opportunity: &ArbitrageOpportunity) -> Result<bool, ExecError> {
        match self.child_for(opportunity) {
            Some(child) => child.close(opportunity).await,
            None => Ok(false),
        }
    }

    pub async fn reduce(
        &self,
        opportunity: &ArbitrageOpportunity,
        fraction: f64,
    ) -> Result<bool, ExecError> {
        match self.child_for(opportunity) {
            Some(child) => child.reduce(opportunity, fraction).await,
            None => Ok(false),
        }
    }

    pub async fn monitor(&self) {
        for child in &self.children {
            child.monitor().await;
        }
    }
}
