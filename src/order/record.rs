//! Order Record - identity and mutable state for one tracked order
//!
//! Records are owned by the [`OrderRegistry`](super::OrderRegistry); callers
//! only ever see clones.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::ConnectorError;

// ============================================================================
// Side
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Trading Pair
// ============================================================================

/// `BASE-QUOTE` pair, e.g. `SBERRY-ADA`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TradingPair {
    pub base: String,
    pub quote: String,
}

impl TradingPair {
    pub fn new(base: impl Into<String>, quote: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            quote: quote.into(),
        }
    }
}

impl FromStr for TradingPair {
    type Err = ConnectorError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let mut parts = raw.trim().split('-');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(base), Some(quote), None) if !base.is_empty() && !quote.is_empty() => {
                Ok(Self::new(base.to_uppercase(), quote.to_uppercase()))
            }
            _ => Err(ConnectorError::InvalidTradingPair(raw.to_string())),
        }
    }
}

impl fmt::Display for TradingPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.base, self.quote)
    }
}

impl Serialize for TradingPair {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TradingPair {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// Order Kind
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderKind {
    /// AMM swap
    Trade,
    /// Token spend approval
    Approval,
    AddLiquidity,
    RemoveLiquidity,
}

impl OrderKind {
    /// State a freshly tracked order of this kind starts in
    pub fn initial_state(&self) -> OrderState {
        match self {
            OrderKind::Approval => OrderState::PendingApproval,
            _ => OrderState::PendingCreate,
        }
    }
}

// ============================================================================
// Order States
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderState {
    /// Approval transaction requested, awaiting submission or confirmation
    PendingApproval,
    /// Trade requested, awaiting submission
    PendingCreate,
    /// Transaction submitted, awaiting confirmation
    Open,
    /// Cancel requested
    PendingCancel,
    Filled,
    Failed,
    Canceled,
}

impl OrderState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderState::Filled | OrderState::Failed | OrderState::Canceled)
    }

    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderState::PendingApproval => "PENDING_APPROVAL",
            OrderState::PendingCreate => "PENDING_CREATE",
            OrderState::Open => "OPEN",
            OrderState::PendingCancel => "PENDING_CANCEL",
            OrderState::Filled => "FILLED",
            OrderState::Failed => "FAILED",
            OrderState::Canceled => "CANCELED",
        }
    }

    /// Whether `self -> next` is a legal lifecycle step.
    ///
    /// A same-state step on a non-terminal order is a metadata refresh.
    pub fn can_transition_to(&self, next: OrderState) -> bool {
        use OrderState::*;

        if self.is_terminal() {
            return false;
        }
        match (*self, next) {
            (from, to) if from == to => true,
            (_, Failed) => true,
            (PendingApproval, Open) | (PendingApproval, Filled) => true,
            (PendingCreate, Open) | (PendingCreate, Filled) => true,
            (Open, Filled) | (Open, PendingCancel) => true,
            (PendingCancel, Canceled) | (PendingCancel, Filled) => true,
            _ => false,
        }
    }
}

impl fmt::Display for OrderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Order Record
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRecord {
    pub client_order_id: String,
    #[serde(default)]
    pub exchange_order_id: Option<String>,
    pub trading_pair: TradingPair,
    pub side: Side,
    pub price: Decimal,
    pub amount: Decimal,
    pub kind: OrderKind,
    pub created_at: DateTime<Utc>,
    pub last_update: DateTime<Utc>,
    pub state: OrderState,
    #[serde(default)]
    pub fee: Decimal,
    #[serde(default)]
    pub fee_asset: Option<String>,
    #[serde(default)]
    pub failure_reason: Option<String>,
    /// Provider specific fields (gas price, nonce, ...), opaque to the engine
    #[serde(default)]
    pub misc: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub not_found_count: u32,
    #[serde(default)]
    pub ambiguous_count: u32,
}

impl OrderRecord {
    pub fn new(
        client_order_id: String,
        trading_pair: TradingPair,
        side: Side,
        price: Decimal,
        amount: Decimal,
        kind: OrderKind,
    ) -> Self {
        let now = Utc::now();
        Self {
            client_order_id,
            exchange_order_id: None,
            trading_pair,
            side,
            price,
            amount,
            kind,
            created_at: now,
            last_update: now,
            state: kind.initial_state(),
            fee: Decimal::ZERO,
            fee_asset: None,
            failure_reason: None,
            misc: BTreeMap::new(),
            not_found_count: 0,
            ambiguous_count: 0,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Decimal stored under `key` in `misc`, if it parses.
    pub fn misc_decimal(&self, key: &str) -> Option<Decimal> {
        match self.misc.get(key)? {
            serde_json::Value::String(s) => s.parse().ok(),
            serde_json::Value::Number(n) => {
                let raw = n.to_string();
                raw.parse::<Decimal>().or_else(|_| Decimal::from_scientific(&raw)).ok()
            }
            _ => None,
        }
    }
}
