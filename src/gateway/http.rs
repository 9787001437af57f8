//! Gateway HTTP Client

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use super::client::{GatewayClient, GatewayResult};
use super::types::*;
use crate::error::GatewayError;

// ==================== ENDPOINTS ====================

const TRADE: &str = "/amm/trade";
const PRICE: &str = "/amm/price";
const LIQUIDITY_ADD: &str = "/amm/liquidity/add";
const LIQUIDITY_REMOVE: &str = "/amm/liquidity/remove";
const POLL: &str = "/chain/poll";
const BALANCES: &str = "/chain/balances";
const APPROVE: &str = "/chain/approve";

fn status_endpoint(chain: &str, network: &str) -> String {
    format!(
        "/chain/status?chain={}&network={}",
        urlencoding::encode(chain),
        urlencoding::encode(network)
    )
}

// ==================== HTTP CLIENT ====================

pub struct HttpGatewayClient {
    client: Client,
    base_url: String,
}

impl HttpGatewayClient {
    pub fn new(base_url: &str, timeout: Duration) -> GatewayResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .tcp_keepalive(Duration::from_secs(30))
            .pool_idle_timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(10)
            .tcp_nodelay(true)
            .build()
            .map_err(|e| GatewayError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post<Req, Resp>(&self, endpoint: &str, req: &Req) -> GatewayResult<Resp>
    where
        Req: Serialize + ?Sized + Sync,
        Resp: DeserializeOwned,
    {
        let body = serde_json::to_string(req)?;
        debug!("[GATEWAY] POST {} | {}", endpoint, body);

        let resp = self
            .client
            .post(format!("{}{}", self.base_url, endpoint))
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;

        Self::decode(endpoint, resp).await
    }

    async fn get<Resp: DeserializeOwned>(&self, endpoint: &str) -> GatewayResult<Resp> {
        debug!("[GATEWAY] GET {}", endpoint);

        let resp = self
            .client
            .get(format!("{}{}", self.base_url, endpoint))
            .send()
            .await?;

        Self::decode(endpoint, resp).await
    }

    async fn decode<Resp: DeserializeOwned>(endpoint: &str, resp: Response) -> GatewayResult<Resp> {
        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        debug!("[GATEWAY] {} -> {} | {}", endpoint, status, body);

        if !status.is_success() {
            let message = serde_json::from_str::<ErrorBody>(&body)
                .ok()
                .and_then(|b| b.message.or(b.error))
                .unwrap_or(body);
            return Err(GatewayError::Application {
                status: status.as_u16(),
                message,
            });
        }

        Ok(serde_json::from_str(&body)?)
    }
}

#[async_trait]
impl GatewayClient for HttpGatewayClient {
    async fn submit_trade(&self, req: &TradeRequest) -> GatewayResult<TradeResponse> {
        self.post(TRADE, req).await
    }

    async fn get_transaction_status(&self, req: &PollRequest) -> GatewayResult<TxStatusResponse> {
        self.post(POLL, req).await
    }

    async fn get_balances(&self, req: &BalancesRequest) -> GatewayResult<BalancesResponse> {
        self.post(BALANCES, req).await
    }

    async fn get_network_status(&self, chain: &str, network: &str) -> GatewayResult<NetworkStatusResponse> {
        self.get(&status_endpoint(chain, network)).await
    }

    async fn ping(&self) -> GatewayResult<bool> {
        let resp: PingResponse = self.get("/").await?;
        Ok(resp.status == "ok")
    }

    async fn get_price(&self, req: &PriceRequest) -> GatewayResult<PriceResponse> {
        self.post(PRICE, req).await
    }

    async fn approve_token(&self, req: &ApproveRequest) -> GatewayResult<ApproveResponse> {
        self.post(APPROVE, req).await
    }

    async fn add_liquidity(&self, req: &AddLiquidityRequest) -> GatewayResult<LiquidityResponse> {
        self.post(LIQUIDITY_ADD, req).await
    }

    async fn remove_liquidity(&self, req: &RemoveLiquidityRequest) -> GatewayResult<LiquidityResponse> {
        self.post(LIQUIDITY_REMOVE, req).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_endpoint_encodes_query() {
        assert_eq!(
            status_endpoint("cardano", "pre prod"),
            "/chain/status?chain=cardano&network=pre%20prod"
        );
    }

    #[test]
    fn trims_trailing_slash() {
        let client = HttpGatewayClient::new("http://localhost:15888/", Duration::from_secs(1)).unwrap();
        assert_eq!(client.base_url(), "http://localhost:15888");
    }

    #[tokio::test]
    async fn unreachable_gateway_is_a_transport_error() {
        // Port 9 (discard) is not expected to run an HTTP server.
        let client = HttpGatewayClient::new("http://127.0.0.1:9", Duration::from_millis(500)).unwrap();
        let err = client.ping().await.unwrap_err();
        assert!(err.is_transport(), "{err:?}");
    }
}
