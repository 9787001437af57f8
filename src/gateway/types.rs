//! Gateway request/response schema
//!
//! One typed struct per endpoint. Responses are validated while they are
//! deserialized, so a missing key or an unknown status code surfaces as
//! [`GatewayError::Malformed`](crate::error::GatewayError::Malformed) at the
//! boundary instead of deep inside the poller.

use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::order::Side;

// ======================= TRADE =======================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeRequest {
    pub chain: String,
    pub network: String,
    pub connector: String,
    pub address: String,
    pub base: String,
    pub quote: String,
    pub side: Side,
    pub amount: Decimal,
    pub limit_price: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeResponse {
    pub tx_hash: String,
    #[serde(default)]
    pub gas_price: Option<Decimal>,
    #[serde(default)]
    pub gas_price_token: Option<String>,
    #[serde(default)]
    pub gas_limit: Option<Decimal>,
    #[serde(default)]
    pub gas_cost: Option<Decimal>,
    #[serde(default)]
    pub nonce: Option<u64>,
}

// ======================= PRICE =======================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceRequest {
    pub chain: String,
    pub network: String,
    pub connector: String,
    pub base: String,
    pub quote: String,
    pub amount: Decimal,
    pub side: Side,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceResponse {
    pub price: Decimal,
    #[serde(default)]
    pub expected_amount: Option<Decimal>,
    #[serde(default)]
    pub gas_cost: Option<Decimal>,
}

// ======================= TRANSACTION STATUS =======================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollRequest {
    pub chain: String,
    pub network: String,
    pub tx_hash: String,
}

/// `txStatus` reported by the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "i64")]
pub enum TxStatus {
    /// -1: the chain does not know the transaction
    NotFound,
    /// 0: in the mempool, no estimate
    Pending,
    /// 1: mined
    Confirmed,
    /// 2: in the mempool, likely to succeed
    LikelySuccess,
    /// 3: in the mempool, likely to fail
    LikelyFailure,
}

impl TryFrom<i64> for TxStatus {
    type Error = String;

    fn try_from(code: i64) -> Result<Self, Self::Error> {
        match code {
            -1 => Ok(TxStatus::NotFound),
            0 => Ok(TxStatus::Pending),
            1 => Ok(TxStatus::Confirmed),
            2 => Ok(TxStatus::LikelySuccess),
            3 => Ok(TxStatus::LikelyFailure),
            other => Err(format!("unknown txStatus {}", other)),
        }
    }
}

impl TxStatus {
    /// Still in the mempool; outcome unknown
    pub fn is_ambiguous(&self) -> bool {
        matches!(self, TxStatus::Pending | TxStatus::LikelySuccess | TxStatus::LikelyFailure)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxReceipt {
    /// 1 = success, 0 = reverted
    pub status: i64,
    pub gas_used: Decimal,
    #[serde(default)]
    pub effective_gas_price: Option<Decimal>,
}

impl TxReceipt {
    pub fn succeeded(&self) -> bool {
        self.status == 1
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxStatusResponse {
    pub tx_hash: String,
    pub tx_status: TxStatus,
    #[serde(default)]
    pub tx_receipt: Option<TxReceipt>,
    #[serde(default)]
    pub current_block: Option<u64>,
}

// ======================= BALANCES =======================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BalancesRequest {
    pub chain: String,
    pub network: String,
    pub address: String,
    pub token_symbols: Vec<String>,
}

/// One token's reported balance. Entries that are not a decimal are kept
/// as raw values so a single bad token does not reject the whole response.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum BalanceValue {
    Amount(Decimal),
    Invalid(serde_json::Value),
}

impl BalanceValue {
    pub fn amount(&self) -> Option<Decimal> {
        match self {
            BalanceValue::Amount(amount) if !amount.is_sign_negative() => Some(*amount),
            _ => None,
        }
    }
}

impl From<Decimal> for BalanceValue {
    fn from(amount: Decimal) -> Self {
        BalanceValue::Amount(amount)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BalancesResponse {
    pub balances: HashMap<String, BalanceValue>,
}

// ======================= NETWORK =======================

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkStatusResponse {
    pub chain: String,
    pub network: String,
    pub native_currency: String,
    #[serde(default)]
    pub current_block_number: Option<u64>,
    #[serde(default)]
    pub rpc_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PingResponse {
    pub status: String,
}

// ======================= APPROVAL =======================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApproveRequest {
    pub chain: String,
    pub network: String,
    pub address: String,
    pub spender: String,
    pub token: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ApprovalTx {
    pub hash: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApproveResponse {
    pub approval: ApprovalTx,
    #[serde(default)]
    pub nonce: Option<u64>,
}

// ======================= LIQUIDITY =======================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddLiquidityRequest {
    pub chain: String,
    pub network: String,
    pub connector: String,
    pub address: String,
    pub token0: String,
    pub token1: String,
    pub amount0: Decimal,
    pub amount1: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveLiquidityRequest {
    pub chain: String,
    pub network: String,
    pub connector: String,
    pub address: String,
    pub token0: String,
    pub token1: String,
    pub decrease_percent: Decimal,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiquidityResponse {
    pub tx_hash: String,
    #[serde(default)]
    pub gas_price: Option<Decimal>,
    #[serde(default)]
    pub gas_price_token: Option<String>,
    #[serde(default)]
    pub nonce: Option<u64>,
}

/// Gateway error body, e.g. `{"statusCode":500,"message":"..."}`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}
