//! Venue capability trait.
//!
//! Each venue client implements [`Exchange`]; the engine is agnostic to the
//! transport (REST, WebSocket, FIX) behind it. Clients are expected to batch,
//! rate-limit and retry HTTP failures internally; the engine still wraps
//! read-only calls in its own bounded retry on top.

use async_trait::async_trait;

use crate::error::VenueError;
use crate::market::{FeeStructure, FundingRate, Instrument, MarketKind, OrderBook};
use crate::order::{AccountBalance, OrderRequest, OrderStatus, VenuePosition};

/// Uniform contract over market-data, fee, account and trading operations.
#[async_trait]
pub trait Exchange: Send + Sync {
    /// Venue display name (e.g. "Binance").
    fn name(&self) -> &str;

    /// API base URL.
    fn base_url(&self) -> &str;

    /// Instruments available for a market kind.
    async fn available_instruments(
        &self,
        kind: MarketKind,
    ) -> Result<Vec<Instrument>, VenueError>;

    /// Last traded price for a symbol.
    async fn price(&self, symbol: &str) -> Result<f64, VenueError>;

    /// Order-book snapshot with at least `depth` levels per side when the
    /// venue has them.
    async fn order_book(&self, symbol: &str, depth: usize) -> Result<OrderBook, VenueError>;

    /// Funding information. Perpetual symbols only.
    async fn funding_rate(&self, symbol: &str) -> Result<FundingRate, VenueError>;

    /// Full fee schedule, cached by the implementation for up to 24 h.
    async fn fee_structure(&self) -> Result<FeeStructure, VenueError>;

    /// Trading fee for one symbol as a decimal fraction.
    async fn trading_fee(&self, symbol: &str, is_maker: bool) -> Result<f64, VenueError>;

    /// Withdrawal fee for a currency and amount.
    async fn withdrawal_fee(&self, currency: &str, amount: f64) -> Result<f64, VenueError>;

    /// Account balances.
    async fn account_balance(&self) -> Result<AccountBalance, VenueError>;

    /// Open positions as reported by the venue.
    async fn open_positions(&self) -> Result<Vec<VenuePosition>, VenueError>;

    /// Places an order and returns the venue order id.
    async fn place_order(&self, order: &OrderRequest) -> Result<String, VenueError>;

    /// Cancels an order; returns whether the venue accepted the cancel.
    async fn cancel_order(&self, order_id: &str) -> Result<bool, VenueError>;

    /// Current status of an order.
    async fn order_status(&self, order_id: &str) -> Result<OrderStatus, VenueError>;

    /// Whether the client believes its connection is healthy.
    fn is_connected(&self) -> bool;

    /// Attempts to re-establish the connection.
    async fn reconnect(&self) -> Result<(), VenueError>;
}
