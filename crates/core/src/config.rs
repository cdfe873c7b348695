use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    pub bot_name: String,
    #[serde(default)]
    pub simulation_mode: bool,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_file: Option<String>,
    pub exchanges: HashMap<String, ExchangeConfig>,
    pub strategies: Vec<StrategyConfig>,
    pub risk_config: RiskConfig,
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub api_secret: String,
    #[serde(default)]
    pub passphrase: Option<String>,
    pub base_url: String,
    #[serde(default)]
    pub use_testnet: bool,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

/// The three supported arbitrage geometries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StrategyKind {
    #[serde(rename = "same_exchange_spot_perp")]
    SameExchangeSpotPerp,
    #[serde(rename = "cross_exchange_perp")]
    CrossExchangePerp,
    #[serde(rename = "cross_exchange_spot_perp")]
    CrossExchangeSpotPerp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    #[serde(rename = "type")]
    pub kind: StrategyKind,
    pub min_funding_rate: f64,
    pub min_expected_profit: f64,
    #[serde(default = "default_scan_interval_seconds")]
    pub scan_interval_seconds: u64,
}

fn default_scan_interval_seconds() -> u64 {
    60
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Maximum notional per opportunity, USD.
    pub max_position_size_usd: f64,
    /// Maximum total exposure across all positions, USD.
    pub max_total_position_usd: f64,
    /// Maximum fraction of an exchange balance to deploy.
    pub max_position_per_exchange: f64,
    /// Spread divergence, percent, beyond which positions are reduced/closed.
    pub max_price_divergence_pct: f64,
    /// Profit percentage at which positions are closed.
    pub target_profit_pct: f64,
    /// Loss percentage at which positions are closed.
    pub stop_loss_pct: f64,
    #[serde(default)]
    pub dynamic_position_sizing: bool,
    /// Minimum order-book depth, USD, required for entry.
    pub min_liquidity_depth: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_position_size_usd: 5_000.0,
            max_total_position_usd: 50_000.0,
            max_position_per_exchange: 0.3,
            max_price_divergence_pct: 1.0,
            target_profit_pct: 1.0,
            stop_loss_pct: 1.0,
            dynamic_position_sizing: true,
            min_liquidity_depth: 50_000.0,
        }
    }
}
