use crate::engine::Adcoin;
use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::time::Duration;

/// Ledger settings, read from an optional `adcoin.toml` and `ADCOIN_*` variables.
#[derive(Debug, Clone, Deserialize)]
pub struct LedgerConfig {
    #[serde(default = "default_level_step")]
    pub level_step: Adcoin,
    /// Display-currency value of one Adcoin.
    #[serde(default = "default_pool_rate")]
    pub pool_rate: Decimal,
    #[serde(default = "default_adcoin_limit")]
    pub adcoin_limit: Adcoin,
    #[serde(default = "default_view_ttl_secs")]
    pub view_ttl_secs: u64,
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,
    #[serde(default = "default_max_amount")]
    pub max_amount: Adcoin,
}

fn default_level_step() -> Adcoin {
    100
}

fn default_pool_rate() -> Decimal {
    dec!(0.1)
}

fn default_adcoin_limit() -> Adcoin {
    1_000_000
}

fn default_view_ttl_secs() -> u64 {
    60
}

fn default_store_timeout_ms() -> u64 {
    2_000
}

fn default_max_amount() -> Adcoin {
    1_000_000
}

impl Default for LedgerConfig {
    fn default() -> Self {
        LedgerConfig {
            level_step: default_level_step(),
            pool_rate: default_pool_rate(),
            adcoin_limit: default_adcoin_limit(),
            view_ttl_secs: default_view_ttl_secs(),
            store_timeout_ms: default_store_timeout_ms(),
            max_amount: default_max_amount(),
        }
    }
}

impl LedgerConfig {
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let settings = Config::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(Environment::with_prefix("ADCOIN"))
            .build()?;
        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.level_step == 0 {
            return Err(ConfigError::Message("level_step must be positive".to_string()));
        }
        if self.pool_rate.is_sign_negative() {
            return Err(ConfigError::Message("pool_rate must not be negative".to_string()));
        }
        if self.max_amount == 0 {
            return Err(ConfigError::Message("max_amount must be positive".to_string()));
        }
        Ok(())
    }

    pub fn view_ttl(&self) -> Duration {
        Duration::from_secs(self.view_ttl_secs)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }
}
