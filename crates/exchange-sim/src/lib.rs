//! Deterministic in-memory venue.
//!
//! Backs simulation mode and doubles as the configurable test venue: prices,
//! books, funding rates, balances and order outcomes are all scripted through
//! setter methods. Market orders fill instantly against the scripted state;
//! perpetual fills move the venue-reported position, spot fills move the
//! base/quote balances.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use tracing::debug;

use funding_arb_core::error::VenueError;
use funding_arb_core::market::{FeeStructure, FundingRate, Instrument, MarketKind, OrderBook, PriceLevel};
use funding_arb_core::order::{
    AccountBalance, CurrencyBalance, OrderRequest, OrderSide, OrderStatus, VenuePosition,
};
use funding_arb_core::venue::Exchange;

#[derive(Debug, Clone)]
struct SimOrder {
    request: OrderRequest,
    status: OrderStatus,
}

#[derive(Default)]
struct SimState {
    instruments: HashMap<&'static str, Vec<Instrument>>,
    prices: HashMap<String, f64>,
    books: HashMap<String, OrderBook>,
    funding: HashMap<String, FundingRate>,
    fees: FeeStructure,
    taker_fees: HashMap<String, f64>,
    balances: HashMap<String, CurrencyBalance>,
    positions: HashMap<String, VenuePosition>,
    orders: HashMap<String, SimOrder>,
    // scripted failure modes
    fail_place: HashSet<String>,
    fail_place_after: HashMap<String, u64>,
    placed_counts: HashMap<String, u64>,
    reject_fills: HashSet<String>,
    stall_fills: HashSet<String>,
    connected: bool,
}

/// An in-memory venue with scripted market state.
pub struct SimExchange {
    name: String,
    base_url: String,
    state: RwLock<SimState>,
    next_order_id: AtomicU64,
}

impl SimExchange {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let base_url = format!("sim://{}", name.to_lowercase());
        let mut state = SimState::default();
        state.connected = true;
        Self {
            name,
            base_url,
            state: RwLock::new(state),
            next_order_id: AtomicU64::new(1),
        }
    }

    // =========================================================================
    // Scenario setup
    // =========================================================================

    /// Registers an instrument and makes it discoverable by kind.
    pub fn add_instrument(&self, instrument: Instrument) {
        self.state
            .write()
            .instruments
            .entry(instrument.kind.as_str())
            .or_default()
            .push(instrument);
    }

    /// Sets the last price for a symbol.
    pub fn set_price(&self, symbol: &str, price: f64) {
        self.state.write().prices.insert(symbol.to_string(), price);
    }

    /// Installs a full order-book snapshot.
    pub fn set_order_book(&self, symbol: &str, bids: Vec<PriceLevel>, asks: Vec<PriceLevel>) {
        let book = OrderBook {
            symbol: symbol.to_string(),
            timestamp: Utc::now(),
            bids,
            asks,
        };
        self.state.write().books.insert(symbol.to_string(), book);
    }

    /// Builds a symmetric book around `mid` with `levels` levels of `size`
    /// base units each, 1 bp apart.
    pub fn set_symmetric_book(&self, symbol: &str, mid: f64, size: f64, levels: usize) {
        let step = mid * 0.0001;
        let bids = (0..levels)
            .map(|i| PriceLevel {
                price: mid - step * (i as f64 + 1.0),
                size,
            })
            .collect();
        let asks = (0..levels)
            .map(|i| PriceLevel {
                price: mid + step * (i as f64 + 1.0),
                size,
            })
            .collect();
        self.set_order_book(symbol, bids, asks);
    }

    /// Sets the funding rate for a perpetual symbol; next payment defaults to
    /// one interval from now.
    pub fn set_funding_rate(&self, symbol: &str, rate: f64, interval_hours: f64) {
        let next_payment = Utc::now() + Duration::minutes((interval_hours * 60.0) as i64);
        self.set_funding_rate_at(symbol, rate, interval_hours, next_payment, None);
    }

    /// Sets the funding rate with an explicit next payment and prediction.
    pub fn set_funding_rate_at(
        &self,
        symbol: &str,
        rate: f64,
        interval_hours: f64,
        next_payment: DateTime<Utc>,
        predicted_rate: Option<f64>,
    ) {
        let funding = FundingRate {
            symbol: symbol.to_string(),
            rate,
            payment_interval_hours: interval_hours,
            next_payment,
            predicted_rate,
        };
        self.state
            .write()
            .funding
            .insert(symbol.to_string(), funding);
    }

    /// Replaces the venue fee schedule.
    pub fn set_fee_structure(&self, fees: FeeStructure) {
        self.state.write().fees = fees;
    }

    /// Overrides the taker fee for one symbol.
    pub fn set_taker_fee(&self, symbol: &str, fee: f64) {
        self.state
            .write()
            .taker_fees
            .insert(symbol.to_string(), fee);
    }

    /// Sets a currency balance (total == available, nothing locked).
    pub fn set_balance(&self, currency: &str, amount: f64) {
        self.state.write().balances.insert(
            currency.to_string(),
            CurrencyBalance {
                total: amount,
                available: amount,
                locked: 0.0,
            },
        );
    }

    /// Installs a venue-reported position directly.
    pub fn set_position(&self, position: VenuePosition) {
        self.state
            .write()
            .positions
            .insert(position.symbol.clone(), position);
    }

    /// Scripts `place_order` for a symbol to fail with a protocol error.
    pub fn fail_place_for(&self, symbol: &str) {
        self.state.write().fail_place.insert(symbol.to_string());
    }

    /// Scripts `place_order` for a symbol to fail after the first
    /// `successes` placements have been accepted.
    pub fn fail_place_after(&self, symbol: &str, successes: u64) {
        self.state
            .write()
            .fail_place_after
            .insert(symbol.to_string(), successes);
    }

    /// Scripts orders on a symbol to come back REJECTED.
    pub fn reject_fills_for(&self, symbol: &str) {
        self.state.write().reject_fills.insert(symbol.to_string());
    }

    /// Scripts orders on a symbol to stay NEW (never fill).
    pub fn stall_fills_for(&self, symbol: &str) {
        self.state.write().stall_fills.insert(symbol.to_string());
    }

    /// Clears all scripted failure modes.
    pub fn clear_failures(&self) {
        let mut state = self.state.write();
        state.fail_place.clear();
        state.fail_place_after.clear();
        state.reject_fills.clear();
        state.stall_fills.clear();
    }

    /// Simulates a dropped connection.
    pub fn disconnect(&self) {
        self.state.write().connected = false;
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    /// Number of orders the venue accepted.
    #[must_use]
    pub fn order_count(&self) -> usize {
        self.state.read().orders.len()
    }

    /// Requests of all accepted orders, in id order.
    #[must_use]
    pub fn order_log(&self) -> Vec<OrderRequest> {
        let state = self.state.read();
        let mut ids: Vec<_> = state.orders.keys().cloned().collect();
        ids.sort_by_key(|id| {
            id.rsplit('-')
                .next()
                .and_then(|n| n.parse::<u64>().ok())
                .unwrap_or(0)
        });
        ids.iter()
            .map(|id| state.orders[id].request.clone())
            .collect()
    }

    /// Net signed position size for a symbol (0 when flat).
    #[must_use]
    pub fn position_size(&self, symbol: &str) -> f64 {
        self.state
            .read()
            .positions
            .get(symbol)
            .map_or(0.0, |p| p.size)
    }

    fn instrument_kind(state: &SimState, symbol: &str) -> MarketKind {
        for (key, instruments) in &state.instruments {
            if instruments.iter().any(|i| i.symbol == symbol) {
                return match *key {
                    "spot" => MarketKind::Spot,
                    "margin" => MarketKind::Margin,
                    _ => MarketKind::Perpetual,
                };
            }
        }
        MarketKind::Perpetual
    }

    fn apply_fill(state: &mut SimState, request: &OrderRequest, fill_price: f64) {
        let signed = match request.side {
            OrderSide::Buy => request.quantity,
            OrderSide::Sell => -request.quantity,
        };

        match Self::instrument_kind(state, &request.symbol) {
            MarketKind::Perpetual | MarketKind::Margin => {
                let position = state
                    .positions
                    .entry(request.symbol.clone())
                    .or_insert_with(|| VenuePosition {
                        symbol: request.symbol.clone(),
                        size: 0.0,
                        entry_price: fill_price,
                        liquidation_price: 0.0,
                        unrealized_pnl: 0.0,
                        leverage: 1.0,
                    });
                position.size += signed;
                if position.size.abs() < 1e-9 {
                    state.positions.remove(&request.symbol);
                }
            }
            MarketKind::Spot => {
                let base = request
                    .symbol
                    .split('/')
                    .next()
                    .unwrap_or(&request.symbol)
                    .to_string();
                let quote = request
                    .symbol
                    .split('/')
                    .nth(1)
                    .unwrap_or("USDT")
                    .to_string();
                let base_entry = state.balances.entry(base).or_default();
                base_entry.total += signed;
                base_entry.available += signed;
                let quote_entry = state.balances.entry(quote).or_default();
                quote_entry.total -= signed * fill_price;
                quote_entry.available -= signed * fill_price;
            }
        }
    }
}

#[async_trait]
impl Exchange for SimExchange {
    fn name(&self) -> &str {
        &self.name
    }

    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn available_instruments(
        &self,
        kind: MarketKind,
    ) -> Result<Vec<Instrument>, VenueError> {
        let state = self.state.read();
        Ok(state
            .instruments
            .get(kind.as_str())
            .cloned()
            .unwrap_or_default())
    }

    async fn price(&self, symbol: &str) -> Result<f64, VenueError> {
        self.state
            .read()
            .prices
            .get(symbol)
            .copied()
            .ok_or_else(|| VenueError::Protocol(format!("no price for {symbol}")))
    }

    async fn order_book(&self, symbol: &str, depth: usize) -> Result<OrderBook, VenueError> {
        let state = self.state.read();
        let book = state
            .books
            .get(symbol)
            .ok_or_else(|| VenueError::Protocol(format!("no book for {symbol}")))?;
        let mut book = book.clone();
        book.bids.truncate(depth);
        book.asks.truncate(depth);
        Ok(book)
    }

    async fn funding_rate(&self, symbol: &str) -> Result<FundingRate, VenueError> {
        self.state
            .read()
            .funding
            .get(symbol)
            .cloned()
            .ok_or_else(|| VenueError::Protocol(format!("no funding rate for {symbol}")))
    }

    async fn fee_structure(&self) -> Result<FeeStructure, VenueError> {
        Ok(self.state.read().fees.clone())
    }

    async fn trading_fee(&self, symbol: &str, is_maker: bool) -> Result<f64, VenueError> {
        let state = self.state.read();
        if let Some(fee) = state.taker_fees.get(symbol) {
            return Ok(*fee);
        }
        Ok(if is_maker {
            state.fees.maker_fee
        } else {
            state.fees.taker_fee
        })
    }

    async fn withdrawal_fee(&self, currency: &str, _amount: f64) -> Result<f64, VenueError> {
        Ok(self
            .state
            .read()
            .fees
            .withdrawal_fees
            .get(currency)
            .copied()
            .unwrap_or(0.0))
    }

    async fn account_balance(&self) -> Result<AccountBalance, VenueError> {
        Ok(AccountBalance {
            balances: self.state.read().balances.clone(),
        })
    }

    async fn open_positions(&self) -> Result<Vec<VenuePosition>, VenueError> {
        Ok(self.state.read().positions.values().cloned().collect())
    }

    async fn place_order(&self, order: &OrderRequest) -> Result<String, VenueError> {
        let mut state = self.state.write();
        if !state.connected {
            return Err(VenueError::NotConnected(self.name.clone()));
        }
        if state.fail_place.contains(&order.symbol) {
            return Err(VenueError::Protocol(format!(
                "order rejected at gateway for {}",
                order.symbol
            )));
        }
        if let Some(&allowed) = state.fail_place_after.get(&order.symbol) {
            let placed = state.placed_counts.get(&order.symbol).copied().unwrap_or(0);
            if placed >= allowed {
                return Err(VenueError::Protocol(format!(
                    "order rejected at gateway for {}",
                    order.symbol
                )));
            }
        }
        *state
            .placed_counts
            .entry(order.symbol.clone())
            .or_default() += 1;

        let id = format!(
            "{}-{}",
            self.name.to_lowercase(),
            self.next_order_id.fetch_add(1, Ordering::SeqCst)
        );

        let status = if state.reject_fills.contains(&order.symbol) {
            OrderStatus::Rejected
        } else if state.stall_fills.contains(&order.symbol) {
            OrderStatus::New
        } else {
            let fill_price = order
                .price
                .or_else(|| state.prices.get(&order.symbol).copied())
                .unwrap_or(0.0);
            Self::apply_fill(&mut state, order, fill_price);
            OrderStatus::Filled
        };

        debug!(venue = %self.name, order_id = %id, symbol = %order.symbol, ?status, "sim order placed");
        state.orders.insert(
            id.clone(),
            SimOrder {
                request: order.clone(),
                status,
            },
        );
        Ok(id)
    }

    async fn cancel_order(&self, order_id: &str) -> Result<bool, VenueError> {
        let mut state = self.state.write();
        match state.orders.get_mut(order_id) {
            Some(order) if !order.status.has_fills() => {
                order.status = OrderStatus::Canceled;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(VenueError::Protocol(format!("unknown order {order_id}"))),
        }
    }

    async fn order_status(&self, order_id: &str) -> Result<OrderStatus, VenueError> {
        self.state
            .read()
            .orders
            .get(order_id)
            .map(|o| o.status)
            .ok_or_else(|| VenueError::Protocol(format!("unknown order {order_id}")))
    }

    fn is_connected(&self) -> bool {
        self.state.read().connected
    }

    async fn reconnect(&self) -> Result<(), VenueError> {
        self.state.write().connected = true;
        Ok(())
    }
}
