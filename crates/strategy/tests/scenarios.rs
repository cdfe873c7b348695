//! End-to-end strategy scenarios against the simulated venue.

use std::sync::Arc;

use funding_arb_core::clock::{SharedClock, SystemClock};
use funding_arb_core::error::ExecError;
use funding_arb_core::market::{Instrument, MarketKind};
use funding_arb_core::order::OrderSide;
use funding_arb_core::venue::Exchange;
use funding_arb_exchange_sim::SimExchange;
use funding_arb_strategy::{
    ArbStrategy, ChildStrategy, CompositeStrategy, CrossVenuePerp, CrossVenueSpotPerp,
    ExecutionOutcome, SameVenueSpotPerp,
};

const SPOT: &str = "BTC/USDT";
const PERP: &str = "BTC/USDT_PERP";

fn clock() -> SharedClock {
    Arc::new(SystemClock)
}

fn instrument(venue: &str, symbol: &str, kind: MarketKind) -> Instrument {
    Instrument {
        venue: venue.to_string(),
        symbol: symbol.to_string(),
        kind,
        base_currency: "BTC".to_string(),
        quote_currency: "USDT".to_string(),
        min_order_size: 0.0001,
        qty_precision: 4,
        tick_size: 0.1,
    }
}

/// Venue with spot 50000, perp 50100, +0.05% funding every 8h, 5 bp taker
/// fees, deep books, and a large quote balance.
fn same_venue_fixture() -> Arc<SimExchange> {
    let venue = Arc::new(SimExchange::new("SimA"));
    venue.add_instrument(instrument("SimA", SPOT, MarketKind::Spot));
    venue.add_instrument(instrument("SimA", PERP, MarketKind::Perpetual));
    venue.set_price(SPOT, 50_000.0);
    venue.set_price(PERP, 50_100.0);
    venue.set_funding_rate(PERP, 0.0005, 8.0);
    venue.set_taker_fee(SPOT, 0.0005);
    venue.set_taker_fee(PERP, 0.0005);
    venue.set_symmetric_book(SPOT, 50_000.0, 10.0, 5);
    venue.set_symmetric_book(PERP, 50_100.0, 10.0, 5);
    venue.set_balance("USDT", 1_000_000.0);
    venue
}

fn same_venue_strategy(venue: &Arc<SimExchange>) -> SameVenueSpotPerp {
    SameVenueSpotPerp::new(
        Arc::clone(venue) as Arc<dyn Exchange>,
        clock(),
        0.0001,
        0.0,
    )
}

// =============================================================================
// Scenario: single same-venue opportunity is taken
// =============================================================================

#[tokio::test(start_paused = true)]
async fn same_venue_opportunity_is_taken() {
    let venue = same_venue_fixture();
    let strategy = same_venue_strategy(&venue);

    let opportunities = strategy.find_opportunities().await;
    assert_eq!(opportunities.len(), 1);
    let opp = &opportunities[0];

    // 0.05% every 8h annualises to ~54.75%.
    assert!((opp.net_funding_rate - 54.75).abs() < 1e-9);
    assert!((opp.entry_price_spread_pct - 0.2).abs() < 1e-9);
    // Two taker fees of 5 bp, entry and exit: 0.2%.
    assert!((opp.transaction_cost_pct - 0.2).abs() < 1e-9);
    assert!((opp.estimated_profit_pct - 54.55).abs() < 1e-9);
    // Breakeven law: cost / (|rate| * 100).
    assert!((opp.periods_to_breakeven * opp.funding_rate2.abs() * 100.0
        - opp.transaction_cost_pct)
        .abs()
        < 1e-9);
    assert!(opp.max_position_size_usd > 0.0);
    assert!(opp.risk_score <= 75.0);
    // Fees alone bound the transaction cost from below.
    assert!(opp.transaction_cost_pct >= (0.0005 + 0.0005) * 100.0);

    let size = strategy.size(opp);
    assert!(size > 0.0);

    let outcome = strategy.execute(opp, size).await.unwrap();
    let position = match outcome {
        ExecutionOutcome::Filled(position) => position,
        ExecutionOutcome::Skipped { reason } => panic!("execution skipped: {reason}"),
    };
    assert!(position.is_active);
    assert!(position.position_size_usd > 0.0);

    // Positive funding: long spot, short perp.
    let orders = venue.order_log();
    assert_eq!(orders.len(), 2);
    assert_eq!(orders[0].symbol, SPOT);
    assert_eq!(orders[0].side, OrderSide::Buy);
    assert_eq!(orders[1].symbol, PERP);
    assert_eq!(orders[1].side, OrderSide::Sell);
    assert!(venue.position_size(PERP) < 0.0);
}

// =============================================================================
// Scenario: funding too small
// =============================================================================

#[tokio::test(start_paused = true)]
async fn funding_below_threshold_yields_nothing() {
    let venue = same_venue_fixture();
    venue.set_funding_rate(PERP, 0.00001, 8.0);
    let strategy = same_venue_strategy(&venue);

    let opportunities = strategy.find_opportunities().await;
    assert!(opportunities.is_empty());
}

// =============================================================================
// Scenario: opportunity invalidated after discovery
// =============================================================================

#[tokio::test(start_paused = true)]
async fn sign_flip_invalidates_before_execute() {
    let venue = same_venue_fixture();
    let strategy = same_venue_strategy(&venue);

    let opportunities = strategy.find_opportunities().await;
    let opp = opportunities.into_iter().next().unwrap();

    // Funding flips sign between discovery and execution.
    venue.set_funding_rate(PERP, -0.0005, 8.0);

    assert!(!strategy.validate(&opp).await);
    let outcome = strategy.execute(&opp, 1_000.0).await.unwrap();
    assert!(matches!(outcome, ExecutionOutcome::Skipped { .. }));
    assert_eq!(venue.order_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn large_rate_drift_invalidates() {
    let venue = same_venue_fixture();
    let strategy = same_venue_strategy(&venue);

    let opp = strategy.find_opportunities().await.remove(0);

    // Same sign but a 40% move in magnitude.
    venue.set_funding_rate(PERP, 0.0003, 8.0);
    assert!(!strategy.validate(&opp).await);
}

// =============================================================================
// Scenario: partial hedge rollback
// =============================================================================

#[tokio::test(start_paused = true)]
async fn second_leg_failure_reverses_first() {
    let venue = same_venue_fixture();
    let strategy = same_venue_strategy(&venue);

    let opp = strategy.find_opportunities().await.remove(0);
    venue.reject_fills_for(PERP);

    let outcome = strategy.execute(&opp, strategy.size(&opp)).await.unwrap();
    assert!(matches!(outcome, ExecutionOutcome::Skipped { .. }));

    // Spot buy, rejected perp sell, then the reversing spot sell.
    let orders = venue.order_log();
    assert_eq!(orders.len(), 3);
    assert_eq!(orders[0].symbol, SPOT);
    assert_eq!(orders[0].side, OrderSide::Buy);
    assert_eq!(orders[1].symbol, PERP);
    assert_eq!(orders[2].symbol, SPOT);
    assert_eq!(orders[2].side, OrderSide::Sell);

    // Account is flat again.
    assert_eq!(venue.position_size(PERP), 0.0);
    let balance = venue.account_balance().await.unwrap();
    assert!(balance.total("BTC").abs() < 1e-9);
}

#[tokio::test(start_paused = true)]
async fn failed_reversal_raises_hedge_imbalance() {
    let venue = same_venue_fixture();
    let strategy = same_venue_strategy(&venue);

    let opp = strategy.find_opportunities().await.remove(0);
    venue.reject_fills_for(PERP);
    // One spot order is allowed (the entry); the reversal is refused.
    venue.fail_place_after(SPOT, 1);

    let err = strategy
        .execute(&opp, strategy.size(&opp))
        .await
        .unwrap_err();
    assert!(matches!(err, ExecError::HedgeImbalance { .. }));

    // The naked spot leg is still there for manual unwinding.
    let balance = venue.account_balance().await.unwrap();
    assert!(balance.total("BTC") > 0.0);
}

#[tokio::test(start_paused = true)]
async fn insufficient_margin_aborts_cleanly() {
    let venue = same_venue_fixture();
    venue.set_balance("USDT", 100.0);
    let strategy = same_venue_strategy(&venue);

    let opp = strategy.find_opportunities().await.remove(0);
    let err = strategy
        .execute(&opp, strategy.size(&opp))
        .await
        .unwrap_err();
    assert!(matches!(err, ExecError::InsufficientMargin(_)));
    assert_eq!(venue.order_count(), 0);
}

// =============================================================================
// Scenario: close and reduce
// =============================================================================

#[tokio::test(start_paused = true)]
async fn close_unwinds_both_legs() {
    let venue = same_venue_fixture();
    let strategy = same_venue_strategy(&venue);

    let opp = strategy.find_opportunities().await.remove(0);
    let outcome = strategy.execute(&opp, strategy.size(&opp)).await.unwrap();
    assert!(matches!(outcome, ExecutionOutcome::Filled(_)));
    assert!(venue.position_size(PERP) < 0.0);

    assert!(strategy.close(&opp).await.unwrap());
    assert_eq!(venue.position_size(PERP), 0.0);
    let balance = venue.account_balance().await.unwrap();
    assert!(balance.total("BTC").abs() < 1e-3);
}

#[tokio::test(start_paused = true)]
async fn orphan_single_leg_is_closed_with_warning() {
    let venue = same_venue_fixture();
    let strategy = same_venue_strategy(&venue);

    let opp = strategy.find_opportunities().await.remove(0);
    // Venue reports only a perp leg; there is no spot balance.
    venue
        .place_order(&funding_arb_core::order::OrderRequest::market(
            PERP,
            OrderSide::Sell,
            0.2,
        ))
        .await
        .unwrap();
    assert!(venue.position_size(PERP) < 0.0);

    assert!(strategy.close(&opp).await.unwrap());
    assert_eq!(venue.position_size(PERP), 0.0);
}

#[tokio::test(start_paused = true)]
async fn reduce_halves_the_position() {
    let venue = same_venue_fixture();
    let strategy = same_venue_strategy(&venue);

    let opp = strategy.find_opportunities().await.remove(0);
    strategy.execute(&opp, strategy.size(&opp)).await.unwrap();
    let before = venue.position_size(PERP).abs();

    assert!(strategy.reduce(&opp, 0.5).await.unwrap());
    let after = venue.position_size(PERP).abs();
    assert!((after - before / 2.0).abs() < 1e-6);
}

// =============================================================================
// Scenario: cross-venue perp differential
// =============================================================================

fn cross_venue_fixture() -> (Arc<SimExchange>, Arc<SimExchange>) {
    let venue1 = Arc::new(SimExchange::new("SimA"));
    let venue2 = Arc::new(SimExchange::new("SimB"));
    for venue in [&venue1, &venue2] {
        venue.add_instrument(instrument(venue.name(), PERP, MarketKind::Perpetual));
        venue.set_symmetric_book(PERP, 50_000.0, 10.0, 10);
        venue.set_balance("USDT", 1_000_000.0);
        venue.set_taker_fee(PERP, 0.0002);
    }
    venue1.set_price(PERP, 50_000.0);
    venue2.set_price(PERP, 50_005.0);
    venue1.set_funding_rate(PERP, 0.0008, 8.0);
    venue2.set_funding_rate(PERP, 0.0001, 8.0);
    (venue1, venue2)
}

#[tokio::test(start_paused = true)]
async fn cross_venue_differential_is_found_and_executed() {
    let (venue1, venue2) = cross_venue_fixture();
    let strategy = CrossVenuePerp::new(
        Arc::clone(&venue1) as Arc<dyn Exchange>,
        Arc::clone(&venue2) as Arc<dyn Exchange>,
        clock(),
        0.0001,
        0.0,
    );

    let opportunities = strategy.find_opportunities().await;
    assert_eq!(opportunities.len(), 1);
    let opp = &opportunities[0];

    // Net edge is the difference of the annualised streams.
    let expected_net = 0.0008 * 1095.0 * 100.0 - 0.0001 * 1095.0 * 100.0;
    assert!((opp.net_funding_rate - expected_net).abs() < 1e-6);
    assert!(opp.transaction_cost_pct >= (0.0002 * 2.0 + 0.0002 * 2.0) * 100.0);

    let outcome = strategy
        .execute(opp, strategy.size(opp))
        .await
        .unwrap();
    assert!(matches!(outcome, ExecutionOutcome::Filled(_)));

    // Venue 1 pays the higher funding: short there, long the other side.
    assert!(venue1.position_size(PERP) < 0.0);
    assert!(venue2.position_size(PERP) > 0.0);
}

#[tokio::test(start_paused = true)]
async fn tiny_differential_is_ignored() {
    let (venue1, venue2) = cross_venue_fixture();
    venue1.set_funding_rate(PERP, 0.00025, 8.0);
    venue2.set_funding_rate(PERP, 0.0002, 8.0);
    let strategy = CrossVenuePerp::new(
        Arc::clone(&venue1) as Arc<dyn Exchange>,
        Arc::clone(&venue2) as Arc<dyn Exchange>,
        clock(),
        0.0001,
        0.0,
    );

    assert!(strategy.find_opportunities().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn differential_drift_invalidates() {
    let (venue1, venue2) = cross_venue_fixture();
    let strategy = CrossVenuePerp::new(
        Arc::clone(&venue1) as Arc<dyn Exchange>,
        Arc::clone(&venue2) as Arc<dyn Exchange>,
        clock(),
        0.0001,
        0.0,
    );

    let opp = strategy.find_opportunities().await.remove(0);
    assert!(strategy.validate(&opp).await);

    // Halving the differential is a >20% move of the net rate.
    venue1.set_funding_rate(PERP, 0.0004, 8.0);
    assert!(!strategy.validate(&opp).await);
}

// =============================================================================
// Scenario: cross-venue spot-perp
// =============================================================================

#[tokio::test(start_paused = true)]
async fn cross_spot_perp_tightens_sizing_and_hedges_across_venues() {
    let spot_venue = Arc::new(SimExchange::new("SimA"));
    let perp_venue = Arc::new(SimExchange::new("SimB"));

    spot_venue.add_instrument(instrument("SimA", SPOT, MarketKind::Spot));
    spot_venue.set_price(SPOT, 50_000.0);
    spot_venue.set_taker_fee(SPOT, 0.0005);
    spot_venue.set_symmetric_book(SPOT, 50_000.0, 10.0, 5);
    spot_venue.set_balance("USDT", 1_000_000.0);

    perp_venue.add_instrument(instrument("SimB", PERP, MarketKind::Perpetual));
    perp_venue.set_price(PERP, 50_100.0);
    perp_venue.set_funding_rate(PERP, 0.0005, 8.0);
    perp_venue.set_taker_fee(PERP, 0.0005);
    perp_venue.set_symmetric_book(PERP, 50_100.0, 10.0, 5);
    perp_venue.set_balance("USDT", 1_000_000.0);

    let strategy = CrossVenueSpotPerp::new(
        Arc::clone(&spot_venue) as Arc<dyn Exchange>,
        Arc::clone(&perp_venue) as Arc<dyn Exchange>,
        clock(),
        0.0001,
        0.0,
    );

    let opportunities = strategy.find_opportunities().await;
    assert_eq!(opportunities.len(), 1);
    let opp = &opportunities[0];
    assert!((opp.net_funding_rate - 54.75).abs() < 1e-9);
    // Cross-venue counterparty risk is pinned, never the table average.
    assert!(opp.risk_score >= 15.0);

    // Sizing is tightened to 35% of the liquidity cap.
    let size = strategy.size(opp);
    assert!((size - opp.max_position_size_usd * 0.35).abs() < 1e-9);

    let outcome = strategy.execute(opp, size).await.unwrap();
    assert!(matches!(outcome, ExecutionOutcome::Filled(_)));

    // Positive funding: long spot on venue A, short perp on venue B.
    let spot_balance = spot_venue.account_balance().await.unwrap();
    assert!(spot_balance.total("BTC") > 0.0);
    assert!(perp_venue.position_size(PERP) < 0.0);

    assert!(strategy.close(opp).await.unwrap());
    assert_eq!(perp_venue.position_size(PERP), 0.0);
    let spot_balance = spot_venue.account_balance().await.unwrap();
    assert!(spot_balance.total("BTC").abs() < 1e-3);
}

// =============================================================================
// Scenario: composite dispatch
// =============================================================================

/// Two same-venue children with different edges; fees are zeroed so the
/// profit equals the annualised rate.
fn composite_fixture() -> (Arc<SimExchange>, Arc<SimExchange>, CompositeStrategy) {
    let venue_a = Arc::new(SimExchange::new("SimA"));
    let venue_b = Arc::new(SimExchange::new("SimB"));
    for venue in [&venue_a, &venue_b] {
        venue.add_instrument(instrument(venue.name(), SPOT, MarketKind::Spot));
        venue.add_instrument(instrument(venue.name(), PERP, MarketKind::Perpetual));
        venue.set_price(SPOT, 50_000.0);
        venue.set_price(PERP, 50_000.0);
        venue.set_taker_fee(SPOT, 0.0);
        venue.set_taker_fee(PERP, 0.0);
        venue.set_symmetric_book(SPOT, 50_000.0, 10.0, 5);
        venue.set_symmetric_book(PERP, 50_000.0, 10.0, 5);
        venue.set_balance("USDT", 1_000_000.0);
    }
    // Child 0 yields ~10% annualised, child 1 ~15%.
    venue_a.set_funding_rate(PERP, 10.0 / 109_500.0, 8.0);
    venue_b.set_funding_rate(PERP, 15.0 / 109_500.0, 8.0);

    let children = vec![
        ChildStrategy::SameVenueSpotPerp(SameVenueSpotPerp::new(
            Arc::clone(&venue_a) as Arc<dyn Exchange>,
            clock(),
            0.00001,
            0.0,
        )),
        ChildStrategy::SameVenueSpotPerp(SameVenueSpotPerp::new(
            Arc::clone(&venue_b) as Arc<dyn Exchange>,
            clock(),
            0.00001,
            0.0,
        )),
    ];
    (venue_a, venue_b, CompositeStrategy::new(children))
}

#[tokio::test(start_paused = true)]
async fn composite_stamps_and_sorts_by_profit() {
    let (_venue_a, _venue_b, composite) = composite_fixture();

    let opportunities = composite.find_opportunities().await;
    assert_eq!(opportunities.len(), 2);

    // Best first: the 15% edge from child 1, then the 10% edge from child 0.
    assert!(opportunities[0].estimated_profit_pct > opportunities[1].estimated_profit_pct);
    assert_eq!(opportunities[0].strategy_index, 1);
    assert_eq!(opportunities[1].strategy_index, 0);
    for opp in &opportunities {
        assert!(opp.strategy_index >= 0);
        assert!((opp.strategy_index as usize) < composite.children().len());
        assert!(composite.validate(opp).await);
    }
}

#[tokio::test(start_paused = true)]
async fn composite_executes_via_stamped_child() {
    let (venue_a, venue_b, composite) = composite_fixture();

    let opportunities = composite.find_opportunities().await;
    let best = &opportunities[0];
    let size = composite.size(best);
    assert!(size > 0.0);

    let outcome = composite.execute(best, size).await.unwrap();
    assert!(matches!(outcome, ExecutionOutcome::Filled(_)));

    // The 15% edge lives on venue B; venue A must stay untouched.
    assert_eq!(venue_a.order_count(), 0);
    assert!(venue_b.order_count() > 0);
}

#[tokio::test(start_paused = true)]
async fn composite_falls_back_to_pair_dispatch() {
    let (_venue_a, venue_b, composite) = composite_fixture();

    let mut opp = composite.find_opportunities().await.remove(0);
    // Opportunities reloaded from persisted state may carry no index.
    opp.strategy_index = -1;

    assert!(composite.validate(&opp).await);
    let outcome = composite.execute(&opp, 1_000.0).await.unwrap();
    assert!(matches!(outcome, ExecutionOutcome::Filled(_)));
    assert!(venue_b.order_count() > 0);
}

#[tokio::test(start_paused = true)]
async fn composite_setters_propagate() {
    let (_venue_a, _venue_b, mut composite) = composite_fixture();

    composite.set_min_funding_rate(0.5);
    composite.set_min_expected_profit(99.0);
    for child in composite.children() {
        assert_eq!(child.min_funding_rate(), 0.5);
        assert_eq!(child.min_expected_profit(), 99.0);
    }

    // Raised thresholds silence both children.
    assert!(composite.find_opportunities().await.is_empty());
}

// =============================================================================
// Strategy factory
// =============================================================================

#[tokio::test(start_paused = true)]
async fn factory_wraps_multi_venue_setups_in_composite() {
    use funding_arb_core::config::{StrategyConfig, StrategyKind};
    use std::collections::HashMap;

    let mut venues: HashMap<String, Arc<dyn Exchange>> = HashMap::new();
    venues.insert(
        "SimA".to_string(),
        Arc::new(SimExchange::new("SimA")) as Arc<dyn Exchange>,
    );
    venues.insert(
        "SimB".to_string(),
        Arc::new(SimExchange::new("SimB")) as Arc<dyn Exchange>,
    );

    let clock = clock();
    let config = StrategyConfig {
        kind: StrategyKind::SameExchangeSpotPerp,
        min_funding_rate: 0.0001,
        min_expected_profit: 1.0,
        scan_interval_seconds: 60,
    };
    let strategy = funding_arb_strategy::build_strategy(&config, &venues, &clock).unwrap();
    assert!(matches!(strategy, ArbStrategy::Composite(_)));

    let cross = StrategyConfig {
        kind: StrategyKind::CrossExchangePerp,
        ..config
    };
    // Exactly one unordered pair of two venues: no composite wrapper.
    let strategy = funding_arb_strategy::build_strategy(&cross, &venues, &clock).unwrap();
    assert!(matches!(strategy, ArbStrategy::CrossVenuePerp(_)));
}
