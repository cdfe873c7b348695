//! Core types and contracts for the funding-rate arbitrage engine.
//!
//! This crate holds the domain model (instruments, order books, funding
//! rates, opportunities, positions), the venue capability trait every
//! exchange client implements, the error taxonomy, and the configuration
//! model. Nothing here performs I/O beyond the retry helper's sleeps.

pub mod clock;
pub mod config;
pub mod config_loader;
pub mod error;
pub mod market;
pub mod opportunity;
pub mod order;
pub mod position;
pub mod retry;
pub mod venue;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::{BotConfig, ExchangeConfig, RiskConfig, StrategyConfig, StrategyKind};
pub use config_loader::ConfigLoader;
pub use error::{ExecError, VenueError};
pub use market::{
    annualize_pct, FeeStructure, FundingRate, Instrument, MarketKind, OrderBook, PriceLevel,
    HOURS_PER_YEAR,
};
pub use opportunity::{ArbitrageOpportunity, TradingPair};
pub use order::{
    AccountBalance, CurrencyBalance, OrderRequest, OrderSide, OrderStatus, OrderType,
    VenuePosition,
};
pub use position::ArbitragePosition;
pub use retry::with_retry;
pub use venue::Exchange;
