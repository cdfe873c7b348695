use crate::config::BotConfig;
use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Json},
    Figment,
};
use std::path::Path;

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads bot configuration from a JSON file, with `FUNDING_ARB_`
    /// environment overrides on top.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing, unreadable, or does not
    /// deserialize into [`BotConfig`]; initialisation must abort in that case.
    pub fn load(path: impl AsRef<Path>) -> Result<BotConfig> {
        let path = path.as_ref();
        if !path.exists() {
            anyhow::bail!("config file not found: {}", path.display());
        }

        let config: BotConfig = Figment::new()
            .merge(Json::file(path))
            .merge(Env::prefixed("FUNDING_ARB_").split("__"))
            .extract()
            .with_context(|| format!("failed to parse config file {}", path.display()))?;

        if config.exchanges.is_empty() {
            anyhow::bail!("config declares no exchanges");
        }
        if config.strategies.is_empty() {
            anyhow::bail!("config declares no strategies");
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(".json")
            .tempfile()
            .unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    const VALID: &str = r#"{
        "bot_name": "funding-arb",
        "simulation_mode": true,
        "exchanges": {
            "sim-a": { "base_url": "sim://a" },
            "sim-b": { "base_url": "sim://b" }
        },
        "strategies": [
            {
                "type": "same_exchange_spot_perp",
                "min_funding_rate": 0.0001,
                "min_expected_profit": 2.0,
                "scan_interval_seconds": 30
            }
        ],
        "risk_config": {
            "max_position_size_usd": 5000.0,
            "max_total_position_usd": 50000.0,
            "max_position_per_exchange": 0.3,
            "max_price_divergence_pct": 1.0,
            "target_profit_pct": 1.0,
            "stop_loss_pct": 1.0,
            "min_liquidity_depth": 50000.0
        }
    }"#;

    #[test]
    fn loads_valid_config() {
        let file = write_config(VALID);
        let config = ConfigLoader::load(file.path()).unwrap();
        assert_eq!(config.bot_name, "funding-arb");
        assert!(config.simulation_mode);
        assert_eq!(config.exchanges.len(), 2);
        assert_eq!(config.strategies[0].scan_interval_seconds, 30);
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = ConfigLoader::load("/nonexistent/bot_config.json").unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn unparseable_file_is_an_error() {
        let file = write_config("{ not json");
        assert!(ConfigLoader::load(file.path()).is_err());
    }

    #[test]
    fn empty_exchanges_rejected() {
        let doc = VALID.replace(
            r#""sim-a": { "base_url": "sim://a" },
            "sim-b": { "base_url": "sim://b" }"#,
            "",
        );
        let file = write_config(&doc);
        assert!(ConfigLoader::load(file.path()).is_err());
    }
}
