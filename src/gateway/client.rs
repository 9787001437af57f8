//! Gateway Client Abstraction
//!
//! The connector consumes the remote execution service only through this
//! trait. Every call is a suspension point and may fail with a
//! [`GatewayError`].

use async_trait::async_trait;

use super::types::*;
use crate::error::GatewayError;

pub type GatewayResult<T> = Result<T, GatewayError>;

#[async_trait]
pub trait GatewayClient: Send + Sync {
    /// Submit an AMM swap
    async fn submit_trade(&self, req: &TradeRequest) -> GatewayResult<TradeResponse>;

    /// Status of a submitted transaction
    async fn get_transaction_status(&self, req: &PollRequest) -> GatewayResult<TxStatusResponse>;

    /// Balances of the given tokens for one wallet
    async fn get_balances(&self, req: &BalancesRequest) -> GatewayResult<BalancesResponse>;

    /// Network metadata, including the native (fee paying) currency
    async fn get_network_status(&self, chain: &str, network: &str) -> GatewayResult<NetworkStatusResponse>;

    /// Whether the gateway answers at all
    async fn ping(&self) -> GatewayResult<bool>;

    /// Current swap price
    async fn get_price(&self, req: &PriceRequest) -> GatewayResult<PriceResponse>;

    /// Approve a spender for a token
    async fn approve_token(&self, req: &ApproveRequest) -> GatewayResult<ApproveResponse>;

    async fn add_liquidity(&self, req: &AddLiquidityRequest) -> GatewayResult<LiquidityResponse>;

    async fn remove_liquidity(&self, req: &RemoveLiquidityRequest) -> GatewayResult<LiquidityResponse>;
}
