//! The supervisor: two cooperating periodic workers over shared state.
//!
//! The scan worker discovers and enters opportunities; the monitor worker
//! marks positions to market, accrues funding, and closes or reduces when
//! the risk manager says so. Both tick once a second against a shutdown
//! watch channel, so a stop request is at most a second late plus any
//! in-flight venue call.
//!
//! The registry lock is never held across venue I/O: the monitor takes a
//! snapshot, does its reads, and merges updates back.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use funding_arb_core::clock::{SharedClock, SystemClock};
use funding_arb_core::config::BotConfig;
use funding_arb_core::error::ExecError;
use funding_arb_core::market::MarketKind;
use funding_arb_core::opportunity::ArbitrageOpportunity;
use funding_arb_core::position::ArbitragePosition;
use funding_arb_core::retry::with_retry;
use funding_arb_core::venue::Exchange;
use funding_arb_exchange_sim::SimExchange;
use funding_arb_risk::RiskManager;
use funding_arb_strategy::{build_strategy, ArbStrategy, ExecutionOutcome};

use crate::performance::{PerformanceStats, PerformanceTracker};
use crate::state::StateStore;

/// Worker wake-up cadence; bounds shutdown latency.
const TICK: Duration = Duration::from_secs(1);

/// Position walk cadence.
const MONITOR_INTERVAL: Duration = Duration::from_secs(30);

/// Performance stats cadence.
const PERFORMANCE_INTERVAL: Duration = Duration::from_secs(300);

/// State save cadence.
const SAVE_INTERVAL: Duration = Duration::from_secs(900);

struct Shared {
    venues: HashMap<String, Arc<dyn Exchange>>,
    strategies: Vec<ArbStrategy>,
    risk: Arc<RiskManager>,
    performance: Mutex<PerformanceTracker>,
    store: StateStore,
    clock: SharedClock,
}

/// The funding-rate arbitrage engine.
pub struct FundingEngine {
    config: BotConfig,
    shared: Arc<Shared>,
    running: Arc<AtomicBool>,
    shutdown_tx: watch::Sender<bool>,
    workers: Vec<JoinHandle<()>>,
}

impl FundingEngine {
    /// Builds an engine from config alone, constructing simulated venues.
    /// Live venue adapters are wired by the embedding application; this
    /// build refuses non-simulated venues.
    pub async fn from_config(config: BotConfig) -> Result<Self> {
        let venues = venues_from_config(&config)?;
        Self::with_venues(config, venues, Arc::new(SystemClock), "data").await
    }

    /// Builds an engine over caller-supplied venue clients.
    pub async fn with_venues(
        config: BotConfig,
        venues: HashMap<String, Arc<dyn Exchange>>,
        clock: SharedClock,
        data_dir: impl Into<std::path::PathBuf>,
    ) -> Result<Self> {
        let venues = connect_venues(venues).await?;

        let mut strategies = Vec::new();
        for strategy_config in &config.strategies {
            let strategy = build_strategy(strategy_config, &venues, &clock)
                .context("failed to build strategy")?;
            info!(strategy = %strategy.name(), "strategy loaded");
            strategies.push(strategy);
        }

        let risk = Arc::new(RiskManager::new(config.risk_config.clone()));
        let store = StateStore::new(data_dir);

        // Restore persisted state.
        let mut restored = 0;
        for position in store.load_positions() {
            if position.is_active {
                risk.register_position(position);
                restored += 1;
            }
        }
        if restored > 0 {
            info!(count = restored, "restored active positions from disk");
        }
        let performance = Mutex::new(PerformanceTracker::from_stats(store.load_performance()));

        Ok(Self {
            config,
            shared: Arc::new(Shared {
                venues,
                strategies,
                risk,
                performance,
                store,
                clock,
            }),
            running: Arc::new(AtomicBool::new(false)),
            shutdown_tx: watch::channel(false).0,
            workers: Vec::new(),
        })
    }

    /// Spawns the scan and monitor workers.
    pub fn start(&mut self) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            info!("engine is already running");
            return Ok(());
        }

        let scan_interval = Duration::from_secs(
            self.config
                .strategies
                .first()
                .map_or(60, |s| s.scan_interval_seconds),
        );
        info!(
            bot = %self.config.bot_name,
            scan_interval_secs = scan_interval.as_secs(),
            strategies = self.shared.strategies.len(),
            venues = self.shared.venues.len(),
            "starting engine"
        );

        self.workers.push(tokio::spawn(scan_worker(
            Arc::clone(&self.shared),
            Arc::clone(&self.running),
            self.shutdown_tx.subscribe(),
            scan_interval,
        )));
        self.workers.push(tokio::spawn(monitor_worker(
            Arc::clone(&self.shared),
            Arc::clone(&self.running),
            self.shutdown_tx.subscribe(),
        )));
        Ok(())
    }

    /// Stops both workers and saves state. In-flight venue calls run to
    /// completion.
    pub async fn stop(&mut self) -> Result<()> {
        if !self.running.swap(false, Ordering::SeqCst) {
            info!("engine is not running");
            return Ok(());
        }
        info!("stopping engine");
        let _ = self.shutdown_tx.send(true);
        for worker in self.workers.drain(..) {
            let _ = worker.await;
        }
        save_state(&self.shared);
        info!("engine stopped");
        Ok(())
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn active_positions(&self) -> Vec<ArbitragePosition> {
        self.shared.risk.active_positions()
    }

    #[must_use]
    pub fn performance_stats(&self) -> PerformanceStats {
        self.shared.performance.lock().stats().clone()
    }
}

/// Constructs simulated venue clients for every configured exchange.
fn venues_from_config(config: &BotConfig) -> Result<HashMap<String, Arc<dyn Exchange>>> {
    let mut venues: HashMap<String, Arc<dyn Exchange>> = HashMap::new();
    for (name, exchange_config) in &config.exchanges {
        if config.simulation_mode || exchange_config.base_url.starts_with("sim://") {
            venues.insert(name.clone(), Arc::new(SimExchange::new(name.clone())));
        } else {
            bail!(
                "no venue client available for '{name}' ({}); enable simulation_mode",
                exchange_config.base_url
            );
        }
    }
    Ok(venues)
}

/// Drops venues that fail their connectivity check; fails only when none
/// remain.
async fn connect_venues(
    venues: HashMap<String, Arc<dyn Exchange>>,
) -> Result<HashMap<String, Arc<dyn Exchange>>> {
    let mut connected = HashMap::new();
    for (name, venue) in venues {
        if venue.is_connected() {
            connected.insert(name, venue);
            continue;
        }
        warn!(venue = %name, "venue not connected, attempting reconnect");
        match venue.reconnect().await {
            Ok(()) => {
                connected.insert(name, venue);
            }
            Err(err) => {
                warn!(venue = %name, error = %err, "dropping unreachable venue");
            }
        }
    }
    if connected.is_empty() {
        bail!("no venues could be connected");
    }
    info!(count = connected.len(), "venues connected");
    Ok(connected)
}

// =============================================================================
// Scan worker
// =============================================================================

async fn scan_worker(
    shared: Arc<Shared>,
    running: Arc<AtomicBool>,
    mut shutdown: watch::Receiver<bool>,
    scan_interval: Duration,
) {
    info!("scan worker started");
    let mut last_scan = Instant::now();

    while running.load(Ordering::SeqCst) {
        if last_scan.elapsed() >= scan_interval {
            scan_once(&shared).await;
            last_scan = Instant::now();
        }
        tokio::select! {
            _ = shutdown.changed() => break,
            () = tokio::time::sleep(TICK) => {}
        }
    }
    info!("scan worker stopped");
}

async fn scan_once(shared: &Shared) {
    let mut total = 0usize;
    let mut accepted = 0usize;
    let mut executed = 0usize;

    for strategy in &shared.strategies {
        let opportunities = strategy.find_opportunities().await;
        total += opportunities.len();

        for opportunity in opportunities {
            if !shared.risk.can_enter(&opportunity) {
                debug!(pair = %opportunity.pair, "risk manager rejected opportunity");
                continue;
            }
            accepted += 1;

            let size_usd = shared.risk.position_size(&opportunity);
            if size_usd <= 0.0 {
                debug!(pair = %opportunity.pair, "no capital available for opportunity");
                continue;
            }

            info!(
                pair = %opportunity.pair,
                strategy = %opportunity.strategy_tag,
                net_funding_rate = opportunity.net_funding_rate,
                estimated_profit_pct = opportunity.estimated_profit_pct,
                size_usd,
                "entering opportunity"
            );

            match strategy.execute(&opportunity, size_usd).await {
                Ok(ExecutionOutcome::Filled(position)) => {
                    executed += 1;
                    info!(
                        position_id = %position.position_id,
                        size_usd = position.position_size_usd,
                        "position opened"
                    );
                    shared.risk.register_position(position);
                    shared.performance.lock().record_trade_opened();
                    persist_positions(shared);
                }
                Ok(ExecutionOutcome::Skipped { reason }) => {
                    debug!(pair = %opportunity.pair, reason = %reason, "execution skipped");
                }
                Err(err @ ExecError::HedgeImbalance { .. }) => {
                    error!(
                        alert = "critical",
                        pair = %opportunity.pair,
                        error = %err,
                        "hedge imbalance, manual intervention required"
                    );
                }
                Err(err) => {
                    warn!(pair = %opportunity.pair, error = %err, "execution failed");
                }
            }
        }
    }

    if total > 0 {
        info!(total, accepted, executed, "opportunity scan complete");
    } else {
        debug!("no arbitrage opportunities found in this scan");
    }
}

// =============================================================================
// Monitor worker
// =============================================================================

async fn monitor_worker(
    shared: Arc<Shared>,
    running: Arc<AtomicBool>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!("monitor worker started");
    let mut accruer = FundingAccruer::default();
    let mut last_monitor = Instant::now();
    let mut last_performance = Instant::now();
    let mut last_save = Instant::now();

    while running.load(Ordering::SeqCst) {
        if last_monitor.elapsed() >= MONITOR_INTERVAL {
            monitor_once(&shared, &mut accruer).await;
            last_monitor = Instant::now();
        }
        if last_performance.elapsed() >= PERFORMANCE_INTERVAL {
            update_performance(&shared);
            last_performance = Instant::now();
        }
        if last_save.elapsed() >= SAVE_INTERVAL {
            save_state(&shared);
            last_save = Instant::now();
        }
        tokio::select! {
            _ = shutdown.changed() => break,
            () = tokio::time::sleep(TICK) => {}
        }
    }
    info!("monitor worker stopped");
}

async fn monitor_once(shared: &Shared, accruer: &mut FundingAccruer) {
    // Strategy-internal bookkeeping first (funding flips, payment logs).
    for strategy in &shared.strategies {
        strategy.monitor().await;
    }

    let positions = shared.risk.active_positions();
    if positions.is_empty() {
        return;
    }
    info!(count = positions.len(), "monitoring active positions");

    for mut position in positions {
        if let Err(err) = shared
            .risk
            .update_mark_to_market(&mut position, &shared.venues)
            .await
        {
            warn!(
                position_id = %position.position_id,
                error = %err,
                "mark-to-market failed"
            );
            continue;
        }
        accruer.accrue(shared, &mut position).await;
        shared.risk.apply_update(&position);

        let age = position.age(shared.clock.now());
        info!(
            position_id = %position.position_id,
            age_mins = age.num_minutes(),
            unrealized_pnl_usd = position.unrealized_pnl_usd,
            funding_collected_usd = position.funding_collected_usd,
            initial_spread_pct = position.initial_spread_pct,
            current_spread_pct = position.current_spread_pct,
            "position status"
        );

        if shared.risk.should_close(&position) {
            close_position(shared, &position).await;
        } else if let Some(fraction) = shared.risk.should_reduce(&position) {
            reduce_position(shared, &mut position, fraction).await;
        }
    }
}

fn strategy_for<'a>(
    shared: &'a Shared,
    opportunity: &ArbitrageOpportunity,
) -> Option<&'a ArbStrategy> {
    shared
        .strategies
        .iter()
        .find(|s| s.covers(&opportunity.pair))
}

async fn close_position(shared: &Shared, position: &ArbitragePosition) {
    info!(position_id = %position.position_id, "risk manager signals close");
    let Some(strategy) = strategy_for(shared, &position.opportunity) else {
        warn!(position_id = %position.position_id, "no strategy covers this position");
        return;
    };

    match strategy.close(&position.opportunity).await {
        Ok(true) => {
            info!(
                position_id = %position.position_id,
                pnl_usd = position.unrealized_pnl_usd,
                "position closed"
            );
            shared.risk.mark_closed(&position.position_id);
            shared
                .performance
                .lock()
                .record_trade_closed(position.unrealized_pnl_usd);
            shared.risk.evict_inactive();
            persist_positions(shared);
        }
        Ok(false) => {
            warn!(position_id = %position.position_id, "close unverified, will retry");
        }
        Err(err) => {
            warn!(position_id = %position.position_id, error = %err, "close failed");
        }
    }
}

async fn reduce_position(shared: &Shared, position: &mut ArbitragePosition, fraction: f64) {
    info!(
        position_id = %position.position_id,
        fraction,
        "risk manager signals reduction"
    );
    let Some(strategy) = strategy_for(shared, &position.opportunity) else {
        return;
    };

    match strategy.reduce(&position.opportunity, fraction).await {
        Ok(true) => {
            position.position_size_usd *= 1.0 - fraction;
            shared.risk.apply_update(position);
            persist_positions(shared);
        }
        Ok(false) => {
            warn!(position_id = %position.position_id, "reduction incomplete");
        }
        Err(err) => {
            warn!(position_id = %position.position_id, error = %err, "reduction failed");
        }
    }
}

// =============================================================================
// Funding accrual
// =============================================================================

/// Remembers each perp leg's last observed next-payment time; when the
/// venue rolls it forward, a payment boundary has passed and the signed
/// per-period amount is credited to the position.
#[derive(Default)]
struct FundingAccruer {
    next_payments: HashMap<String, DateTime<Utc>>,
}

impl FundingAccruer {
    async fn accrue(&mut self, shared: &Shared, position: &mut ArbitragePosition) {
        let opportunity = &position.opportunity;
        let (sign1, sign2) = leg_directions(opportunity);
        let legs = [
            (
                "leg1",
                &opportunity.pair.venue1,
                &opportunity.pair.symbol1,
                opportunity.pair.kind1,
                sign1,
            ),
            (
                "leg2",
                &opportunity.pair.venue2,
                &opportunity.pair.symbol2,
                opportunity.pair.kind2,
                sign2,
            ),
        ];

        let mut payment_usd = 0.0;
        for (leg, venue_name, symbol, kind, sign) in legs {
            if kind != MarketKind::Perpetual || sign == 0.0 {
                continue;
            }
            let Some(venue) = shared.venues.get(venue_name) else {
                continue;
            };
            let symbol = symbol.clone();
            let Ok(funding) = with_retry("accrual funding", || venue.funding_rate(&symbol)).await
            else {
                continue;
            };

            let key = format!("{}:{leg}", position.position_id);
            if let Some(&previous) = self.next_payments.get(&key) {
                if funding.next_payment > previous {
                    // Longs pay positive funding; shorts receive it.
                    payment_usd += -sign * funding.rate * position.position_size_usd;
                }
            }
            self.next_payments.insert(key, funding.next_payment);
        }

        if payment_usd != 0.0 {
            position.funding_collected_usd += payment_usd;
            position.unrealized_pnl_usd += payment_usd;
            info!(
                position_id = %position.position_id,
                payment_usd,
                funding_collected_usd = position.funding_collected_usd,
                "funding payment accrued"
            );
        }
    }
}

/// Signed holding direction per leg (+1 long, -1 short, 0 for spot legs),
/// implied by the entry funding rates and the direction table.
fn leg_directions(opportunity: &ArbitrageOpportunity) -> (f64, f64) {
    if opportunity.pair.kind1 == MarketKind::Spot {
        let sign2 = if opportunity.funding_rate2 > 0.0 {
            -1.0
        } else {
            1.0
        };
        (0.0, sign2)
    } else {
        let sign1 = if opportunity.funding_rate1 < opportunity.funding_rate2 {
            1.0
        } else {
            -1.0
        };
        (sign1, -sign1)
    }
}

// =============================================================================
// Persistence helpers
// =============================================================================

fn persist_positions(shared: &Shared) {
    let positions = shared.risk.active_positions();
    if let Err(err) = shared.store.save_positions(&positions) {
        warn!(error = %err, "failed to save positions");
    }
}

fn update_performance(shared: &Shared) {
    let positions = shared.risk.active_positions();
    let unrealized: f64 = positions.iter().map(|p| p.unrealized_pnl_usd).sum();
    let deployed = shared.risk.total_active_notional();

    let mut performance = shared.performance.lock();
    performance.update(shared.clock.now(), unrealized, deployed);
    if let Err(err) = shared
        .store
        .save_performance(performance.stats(), shared.clock.now())
    {
        warn!(error = %err, "failed to save performance stats");
    }
}

fn save_state(shared: &Shared) {
    persist_positions(shared);
    let performance = shared.performance.lock();
    if let Err(err) = shared
        .store
        .save_performance(performance.stats(), shared.clock.now())
    {
        warn!(error = %err, "failed to save performance stats");
    }
}
