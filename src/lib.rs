//! Gateway AMM connector
//!
//! Submits swaps, approvals and liquidity changes to a decentralized-exchange
//! gateway and keeps a local view of every order and of the wallet's
//! balances reconciled against it.

pub mod balances;
pub mod config;
pub mod connector;
pub mod error;
pub mod events;
pub mod gateway;
pub mod order;
pub mod poller;
pub mod scheduler;

pub use balances::{BalanceMap, BalanceReconciler, ReconcileOutcome, TokenBalance};
pub use config::ConnectorConfig;
pub use connector::{GatewayConnector, PriceQuote, StatusDict};
pub use error::{ConfigError, ConnectorError, GatewayError, RegistryError};
pub use events::{EventSink, FillEvent, OrderEvent};
pub use gateway::{GatewayClient, HttpGatewayClient};
pub use order::{OrderKind, OrderRecord, OrderState, Side, TradingPair};
