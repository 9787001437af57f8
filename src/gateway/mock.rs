//! Scripted gateway for tests

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;

use super::client::{GatewayClient, GatewayResult};
use super::types::*;
use crate::error::GatewayError;

pub(crate) struct MockGateway {
    pub trade_results: Mutex<VecDeque<GatewayResult<TradeResponse>>>,
    pub statuses: Mutex<HashMap<String, GatewayResult<TxStatusResponse>>>,
    pub status_delays: Mutex<HashMap<String, Duration>>,
    pub balances: Mutex<GatewayResult<HashMap<String, Decimal>>>,
    pub native_currency: Mutex<GatewayResult<String>>,
    pub price: Mutex<Decimal>,
    pub last_balance_tokens: Mutex<Vec<String>>,
    pub balance_delay: Mutex<Option<Duration>>,
    pub balances_in_flight: AtomicUsize,
    pub max_balances_in_flight: AtomicUsize,
    pub trade_calls: AtomicUsize,
    pub status_calls: AtomicUsize,
    pub balance_calls: AtomicUsize,
    pub network_calls: AtomicUsize,
    tx_counter: AtomicUsize,
}

impl MockGateway {
    pub fn new() -> Self {
        Self {
            trade_results: Mutex::new(VecDeque::new()),
            statuses: Mutex::new(HashMap::new()),
            status_delays: Mutex::new(HashMap::new()),
            balances: Mutex::new(Ok(HashMap::new())),
            native_currency: Mutex::new(Ok("ADA".to_string())),
            price: Mutex::new(Decimal::ONE),
            last_balance_tokens: Mutex::new(Vec::new()),
            balance_delay: Mutex::new(None),
            balances_in_flight: AtomicUsize::new(0),
            max_balances_in_flight: AtomicUsize::new(0),
            trade_calls: AtomicUsize::new(0),
            status_calls: AtomicUsize::new(0),
            balance_calls: AtomicUsize::new(0),
            network_calls: AtomicUsize::new(0),
            tx_counter: AtomicUsize::new(0),
        }
    }

    pub fn push_trade_result(&self, result: GatewayResult<TradeResponse>) {
        self.trade_results.lock().unwrap().push_back(result);
    }

    pub fn set_status(&self, tx_hash: &str, result: GatewayResult<TxStatusResponse>) {
        self.statuses.lock().unwrap().insert(tx_hash.to_string(), result);
    }

    pub fn set_status_delay(&self, tx_hash: &str, delay: Duration) {
        self.status_delays.lock().unwrap().insert(tx_hash.to_string(), delay);
    }

    pub fn set_balances(&self, balances: &[(&str, Decimal)]) {
        *self.balances.lock().unwrap() =
            Ok(balances.iter().map(|(k, v)| (k.to_string(), *v)).collect());
    }

    pub fn fail_balances(&self, err: GatewayError) {
        *self.balances.lock().unwrap() = Err(err);
    }

    pub fn set_balance_delay(&self, delay: Duration) {
        *self.balance_delay.lock().unwrap() = Some(delay);
    }

    pub fn set_native_currency(&self, result: GatewayResult<String>) {
        *self.native_currency.lock().unwrap() = result;
    }

    fn next_tx_hash(&self) -> String {
        format!("0xtx{}", self.tx_counter.fetch_add(1, Ordering::SeqCst))
    }

    fn liquidity_response(&self) -> LiquidityResponse {
        LiquidityResponse {
            tx_hash: self.next_tx_hash(),
            gas_price: Some(Decimal::ONE),
            gas_price_token: Some("ADA".to_string()),
            nonce: Some(1),
        }
    }
}

pub(crate) fn trade_response(tx_hash: &str, gas_price: Decimal) -> TradeResponse {
    TradeResponse {
        tx_hash: tx_hash.to_string(),
        gas_price: Some(gas_price),
        gas_price_token: Some("ADA".to_string()),
        gas_limit: None,
        gas_cost: None,
        nonce: Some(1),
    }
}

pub(crate) fn confirmed(tx_hash: &str, gas_used: Decimal, effective_gas_price: Option<Decimal>) -> TxStatusResponse {
    TxStatusResponse {
        tx_hash: tx_hash.to_string(),
        tx_status: TxStatus::Confirmed,
        tx_receipt: Some(TxReceipt {
            status: 1,
            gas_used,
            effective_gas_price,
        }),
        current_block: Some(100),
    }
}

pub(crate) fn reverted(tx_hash: &str) -> TxStatusResponse {
    TxStatusResponse {
        tx_hash: tx_hash.to_string(),
        tx_status: TxStatus::Confirmed,
        tx_receipt: Some(TxReceipt {
            status: 0,
            gas_used: Decimal::ZERO,
            effective_gas_price: None,
        }),
        current_block: Some(100),
    }
}

pub(crate) fn with_status(tx_hash: &str, tx_status: TxStatus) -> TxStatusResponse {
    TxStatusResponse {
        tx_hash: tx_hash.to_string(),
        tx_status,
        tx_receipt: None,
        current_block: Some(100),
    }
}

#[async_trait]
impl GatewayClient for MockGateway {
    async fn submit_trade(&self, _req: &TradeRequest) -> GatewayResult<TradeResponse> {
        self.trade_calls.fetch_add(1, Ordering::SeqCst);
        let scripted = self.trade_results.lock().unwrap().pop_front();
        match scripted {
            Some(result) => result,
            None => Ok(trade_response(&self.next_tx_hash(), Decimal::ONE)),
        }
    }

    async fn get_transaction_status(&self, req: &PollRequest) -> GatewayResult<TxStatusResponse> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.status_delays.lock().unwrap().get(&req.tx_hash).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let scripted = self.statuses.lock().unwrap().get(&req.tx_hash).cloned();
        scripted.unwrap_or_else(|| Ok(with_status(&req.tx_hash, TxStatus::Pending)))
    }

    async fn get_balances(&self, req: &BalancesRequest) -> GatewayResult<BalancesResponse> {
        self.balance_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_balance_tokens.lock().unwrap() = req.token_symbols.clone();
        let in_flight = self.balances_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_balances_in_flight.fetch_max(in_flight, Ordering::SeqCst);
        let delay = *self.balance_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.balances_in_flight.fetch_sub(1, Ordering::SeqCst);
        let balances = self.balances.lock().unwrap().clone()?;
        Ok(BalancesResponse {
            balances: balances.into_iter().map(|(k, v)| (k, v.into())).collect(),
        })
    }

    async fn get_network_status(&self, chain: &str, network: &str) -> GatewayResult<NetworkStatusResponse> {
        self.network_calls.fetch_add(1, Ordering::SeqCst);
        let native_currency = self.native_currency.lock().unwrap().clone()?;
        Ok(NetworkStatusResponse {
            chain: chain.to_string(),
            network: network.to_string(),
            native_currency,
            current_block_number: Some(100),
            rpc_url: None,
        })
    }

    async fn ping(&self) -> GatewayResult<bool> {
        Ok(true)
    }

    async fn get_price(&self, _req: &PriceRequest) -> GatewayResult<PriceResponse> {
        Ok(PriceResponse {
            price: *self.price.lock().unwrap(),
            expected_amount: None,
            gas_cost: None,
        })
    }

    async fn approve_token(&self, _req: &ApproveRequest) -> GatewayResult<ApproveResponse> {
        Ok(ApproveResponse {
            approval: ApprovalTx {
                hash: self.next_tx_hash(),
            },
            nonce: Some(1),
        })
    }

    async fn add_liquidity(&self, _req: &AddLiquidityRequest) -> GatewayResult<LiquidityResponse> {
        Ok(self.liquidity_response())
    }

    async fn remove_liquidity(&self, _req: &RemoveLiquidityRequest) -> GatewayResult<LiquidityResponse> {
        Ok(self.liquidity_response())
    }
}
