//! Connector configuration
//!
//! Loaded from a TOML file; every tuning knob has a default.

use std::path::Path;
use std::time::Duration;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;

use crate::error::ConfigError;
use crate::order::{RegistryConfig, TradingPair, DEFAULT_NOT_FOUND_LIMIT};

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ConnectorConfig {
    #[serde(default = "default_gateway_url")]
    pub gateway_url: String,
    pub chain: String,
    pub network: String,
    pub connector: String,
    pub wallet_address: String,
    /// `BASE-QUOTE` strings
    #[serde(default)]
    pub trading_pairs: Vec<String>,
    /// Extra tokens whose balances are tracked
    #[serde(default)]
    pub tokens: Vec<String>,
    /// Skips the network status lookup when set
    #[serde(default)]
    pub native_currency: Option<String>,
    /// Spender passed to approval transactions (defaults to the connector name)
    #[serde(default)]
    pub spender: Option<String>,

    /// Scheduling loop fixed-period tick
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// Tick source period; new orders are picked up at most this late
    #[serde(default = "default_min_poll_interval")]
    pub min_poll_interval_ms: u64,
    /// Balance reconciliation debounce
    #[serde(default = "default_balance_interval")]
    pub balance_interval_ms: u64,
    #[serde(default = "default_not_found_limit")]
    pub not_found_limit: u32,
    #[serde(default)]
    pub ambiguous_limit: Option<u32>,
    #[serde(default = "default_exchange_id_wait")]
    pub exchange_id_wait_ms: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_slippage_buffer")]
    pub slippage_buffer: Decimal,
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_gateway_url() -> String {
    "http://localhost:15888".to_string()
}

fn default_poll_interval() -> u64 {
    10_000
}

fn default_min_poll_interval() -> u64 {
    1_000
}

fn default_balance_interval() -> u64 {
    30_000
}

fn default_not_found_limit() -> u32 {
    DEFAULT_NOT_FOUND_LIMIT
}

fn default_exchange_id_wait() -> u64 {
    2_000
}

fn default_request_timeout() -> u64 {
    10_000
}

fn default_slippage_buffer() -> Decimal {
    dec!(0.01)
}

fn default_event_capacity() -> usize {
    256
}

impl ConnectorConfig {
    /// Minimal config with every tuning knob at its default
    pub fn new(chain: &str, network: &str, connector: &str, wallet_address: &str) -> Self {
        Self {
            gateway_url: default_gateway_url(),
            chain: chain.to_string(),
            network: network.to_string(),
            connector: connector.to_string(),
            wallet_address: wallet_address.to_string(),
            trading_pairs: Vec::new(),
            tokens: Vec::new(),
            native_currency: None,
            spender: None,
            poll_interval_ms: default_poll_interval(),
            min_poll_interval_ms: default_min_poll_interval(),
            balance_interval_ms: default_balance_interval(),
            not_found_limit: default_not_found_limit(),
            ambiguous_limit: None,
            exchange_id_wait_ms: default_exchange_id_wait(),
            request_timeout_ms: default_request_timeout(),
            slippage_buffer: default_slippage_buffer(),
            event_capacity: default_event_capacity(),
        }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("chain", &self.chain),
            ("network", &self.network),
            ("connector", &self.connector),
            ("wallet_address", &self.wallet_address),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("{} must not be empty", name)));
            }
        }
        if self.poll_interval_ms == 0 || self.min_poll_interval_ms == 0 || self.balance_interval_ms == 0 {
            return Err(ConfigError::Invalid("intervals must be positive".into()));
        }
        if self.not_found_limit == 0 {
            return Err(ConfigError::Invalid("not_found_limit must be positive".into()));
        }
        if self.ambiguous_limit == Some(0) {
            return Err(ConfigError::Invalid("ambiguous_limit must be positive when set".into()));
        }
        if self.slippage_buffer.is_sign_negative() || self.slippage_buffer >= Decimal::ONE {
            return Err(ConfigError::Invalid(format!(
                "slippage_buffer {} outside [0, 1)",
                self.slippage_buffer
            )));
        }
        self.parsed_trading_pairs()?;
        Ok(())
    }

    pub fn parsed_trading_pairs(&self) -> Result<Vec<TradingPair>, ConfigError> {
        self.trading_pairs
            .iter()
            .map(|raw| {
                raw.parse::<TradingPair>()
                    .map_err(|e| ConfigError::Invalid(e.to_string()))
            })
            .collect()
    }

    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            not_found_limit: self.not_found_limit,
            ambiguous_limit: self.ambiguous_limit,
        }
    }

    pub fn spender(&self) -> &str {
        self.spender.as_deref().unwrap_or(&self.connector)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn min_poll_interval(&self) -> Duration {
        Duration::from_millis(self.min_poll_interval_ms)
    }

    pub fn balance_interval(&self) -> Duration {
        Duration::from_millis(self.balance_interval_ms)
    }

    pub fn exchange_id_wait(&self) -> Duration {
        Duration::from_millis(self.exchange_id_wait_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}
