//! Error taxonomy for the connector
//!
//! Gateway failures are split into transport and application errors so the
//! poller and the submission path can treat them differently.

use thiserror::Error;

use crate::order::OrderState;

/// Errors returned by a [`GatewayClient`](crate::gateway::GatewayClient).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GatewayError {
    /// Gateway unreachable, timed out or the body could not be read
    #[error("transport error: {0}")]
    Transport(String),

    /// Gateway answered with a non-success status
    #[error("gateway rejected request ({status}): {message}")]
    Application { status: u16, message: String },

    /// Gateway answered but the payload does not match the endpoint schema
    #[error("malformed gateway response: {0}")]
    Malformed(String),
}

impl GatewayError {
    pub fn is_transport(&self) -> bool {
        matches!(self, GatewayError::Transport(_))
    }

    /// Malformed payloads count as application errors: the remote side
    /// answered, it just did not answer with anything usable.
    pub fn is_application(&self) -> bool {
        !self.is_transport()
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            GatewayError::Malformed(err.to_string())
        } else {
            GatewayError::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        GatewayError::Malformed(err.to_string())
    }
}

/// Errors raised by the order registry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("order {0} is already tracked")]
    DuplicateOrder(String),

    #[error("invalid state transition: from {from} to {to}")]
    InvalidTransition { from: OrderState, to: OrderState },
}

/// Configuration loading and validation errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Errors surfaced by the caller-facing connector API.
#[derive(Error, Debug)]
pub enum ConnectorError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error("invalid trading pair: {0}")]
    InvalidTradingPair(String),

    #[error("connector is not running")]
    NotRunning,

    #[error("connector is already running")]
    AlreadyRunning,
}

pub type Result<T> = std::result::Result<T, ConnectorError>;
