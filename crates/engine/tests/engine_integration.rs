//! Engine lifecycle tests against simulated venues.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use funding_arb_core::clock::{SharedClock, SystemClock};
use funding_arb_core::config::{
    BotConfig, ExchangeConfig, RiskConfig, StrategyConfig, StrategyKind,
};
use funding_arb_core::market::{Instrument, MarketKind};
use funding_arb_core::opportunity::{ArbitrageOpportunity, TradingPair};
use funding_arb_core::position::ArbitragePosition;
use funding_arb_core::venue::Exchange;
use funding_arb_engine::{FundingEngine, StateStore};
use funding_arb_exchange_sim::SimExchange;

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

fn sim_venue() -> Arc<SimExchange> {
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

fn bot_config(scan_interval_seconds: u64) -> BotConfig {
    let mut exchanges = HashMap::new();
    exchanges.insert(
        "SimA".to_string(),
        ExchangeConfig {
            api_key: String::new(),
            api_secret: String::new(),
            passphrase: None,
            base_url: "sim://sima".to_string(),
            use_testnet: false,
            connect_timeout_ms: 5_000,
            request_timeout_ms: 10_000,
        },
    );
    BotConfig {
        bot_name: "funding-arb-test".to_string(),
        simulation_mode: true,
        log_level: "info".to_string(),
        log_file: None,
        exchanges,
        strategies: vec![StrategyConfig {
            kind: StrategyKind::SameExchangeSpotPerp,
            min_funding_rate: 0.0001,
            min_expected_profit: 0.0,
            scan_interval_seconds,
        }],
        risk_config: RiskConfig {
            max_position_size_usd: 5_000.0,
            max_total_position_usd: 50_000.0,
            max_position_per_exchange: 0.3,
            max_price_divergence_pct: 1.0,
            target_profit_pct: 1.0,
            stop_loss_pct: 1.0,
            dynamic_position_sizing: true,
            min_liquidity_depth: 50_000.0,
        },
    }
}

fn venues_of(venue: &Arc<SimExchange>) -> HashMap<String, Arc<dyn Exchange>> {
    let mut venues: HashMap<String, Arc<dyn Exchange>> = HashMap::new();
    venues.insert("SimA".to_string(), Arc::clone(venue) as Arc<dyn Exchange>);
    venues
}

#[tokio::test(start_paused = true)]
async fn scan_worker_opens_and_persists_a_position() {
    let dir = tempfile::TempDir::new().unwrap();
    let venue = sim_venue();
    let mut engine = FundingEngine::with_venues(
        bot_config(5),
        venues_of(&venue),
        clock(),
        dir.path(),
    )
    .await
    .unwrap();

    engine.start().unwrap();
    assert!(engine.is_running());

    // First scan fires after one interval.
    tokio::time::sleep(std::time::Duration::from_secs(7)).await;

    let positions = engine.active_positions();
    assert_eq!(positions.len(), 1);
    assert!(positions[0].position_size_usd > 0.0);
    assert_eq!(engine.performance_stats().total_trades, 1);
    assert!(venue.position_size(PERP) < 0.0);

    engine.stop().await.unwrap();
    assert!(!engine.is_running());
    assert!(dir.path().join("positions.json").exists());
    assert!(dir.path().join("performance.json").exists());
}

#[tokio::test(start_paused = true)]
async fn monitor_closes_position_on_divergence() {
    let dir = tempfile::TempDir::new().unwrap();
    let venue = sim_venue();
    let mut engine = FundingEngine::with_venues(
        bot_config(5),
        venues_of(&venue),
        clock(),
        dir.path(),
    )
    .await
    .unwrap();

    engine.start().unwrap();
    tokio::time::sleep(std::time::Duration::from_secs(7)).await;
    assert_eq!(engine.active_positions().len(), 1);

    // Spread blows out, and funding drops below threshold so the scanner
    // does not immediately re-enter.
    venue.set_price(PERP, 50_600.0);
    venue.set_funding_rate(PERP, 0.00001, 8.0);

    // Next monitor tick (30s cadence) marks to market and closes.
    tokio::time::sleep(std::time::Duration::from_secs(35)).await;

    assert!(engine.active_positions().is_empty());
    let stats = engine.performance_stats();
    assert_eq!(stats.total_trades, 1);
    assert_eq!(stats.profitable_trades, 1);
    assert!(stats.total_profit_usd > 0.0);
    assert_eq!(venue.position_size(PERP), 0.0);

    engine.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn shutdown_is_prompt() {
    let dir = tempfile::TempDir::new().unwrap();
    let venue = sim_venue();
    let mut engine = FundingEngine::with_venues(
        bot_config(60),
        venues_of(&venue),
        clock(),
        dir.path(),
    )
    .await
    .unwrap();

    engine.start().unwrap();
    tokio::time::sleep(std::time::Duration::from_secs(3)).await;

    let before = tokio::time::Instant::now();
    engine.stop().await.unwrap();
    // Workers wake at least once a second; stopping never waits a full
    // scan interval.
    assert!(before.elapsed() < std::time::Duration::from_secs(2));
}

#[tokio::test(start_paused = true)]
async fn restores_persisted_positions_into_registry() {
    let dir = tempfile::TempDir::new().unwrap();

    let opportunity = ArbitrageOpportunity {
        pair: TradingPair::same_venue(
            "SimA",
            SPOT,
            MarketKind::Spot,
            PERP,
            MarketKind::Perpetual,
        ),
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
        max_position_size_usd: 10_000.0,
        risk_score: 30.0,
        discovery_time: Utc::now(),
        strategy_tag: "same_venue_spot_perp".to_string(),
        strategy_index: -1,
    };
    let position = ArbitragePosition::open(opportunity, 5_000.0, 50_000.0, 50_100.0, Utc::now());
    let mut closed = position.clone();
    closed.position_id = format!("{}-closed", closed.position_id);
    closed.is_active = false;

    StateStore::new(dir.path())
        .save_positions(&[position.clone(), closed])
        .unwrap();

    let venue = sim_venue();
    let engine = FundingEngine::with_venues(
        bot_config(60),
        venues_of(&venue),
        clock(),
        dir.path(),
    )
    .await
    .unwrap();

    let restored = engine.active_positions();
    assert_eq!(restored.len(), 1);
    assert_eq!(restored[0].position_id, position.position_id);
}

#[tokio::test(start_paused = true)]
async fn disconnected_venue_fails_startup_when_alone() {
    let dir = tempfile::TempDir::new().unwrap();
    let venue = sim_venue();
    venue.disconnect();

    // The sim venue reconnects on request, so startup succeeds.
    let engine = FundingEngine::with_venues(
        bot_config(60),
        venues_of(&venue),
        clock(),
        dir.path(),
    )
    .await;
    assert!(engine.is_ok());
    assert!(venue.is_connected());
}
