//! Gateway Connector - caller-facing API over the reconciliation engine
//!
//! Owns the registry, the balance reconciler, the poller and the worker
//! tasks. Orders are fire-and-forget: `place_order` returns the client order
//! id at once and the submission runs as a task owned by the connector.

use std::collections::BTreeMap;
use std::sync::Arc;

use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::{broadcast, watch, Mutex, Notify};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use crate::balances::{BalanceMap, BalanceReconciler, ReconcileOutcome, SharedBalanceState};
use crate::config::ConnectorConfig;
use crate::error::{ConnectorError, GatewayError, Result};
use crate::events::{EventSink, OrderEvent};
use crate::gateway::{
    AddLiquidityRequest, ApproveRequest, GatewayClient, GatewayResult, PriceRequest,
    RemoveLiquidityRequest, TradeRequest,
};
use crate::order::{
    new_shared_registry, ClientOrderIdGenerator, OrderKind, OrderRecord, OrderState, OrderStats,
    OrderUpdate, SharedRegistry, Side, TradingPair,
};
use crate::poller::{StatusPoller, GAS_PRICE_KEY, GAS_PRICE_TOKEN_KEY};
use crate::scheduler::{run_tick_source, Scheduler, SharedReconciler};

/// misc key holding the submission error text
pub const ERROR_KEY: &str = "error";

/// Readiness probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatusDict {
    pub balances_loaded: bool,
    pub native_currency_known: bool,
}

impl StatusDict {
    pub fn is_ready(&self) -> bool {
        self.balances_loaded && self.native_currency_known
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceQuote {
    pub price: Decimal,
    /// price widened by the slippage buffer, usable as a limit price
    pub limit_price: Decimal,
    pub expected_amount: Option<Decimal>,
    pub gas_cost: Option<Decimal>,
}

/// Apply the slippage buffer: buys may pay more, sells may receive less.
pub fn apply_slippage(price: Decimal, side: Side, buffer: Decimal) -> Decimal {
    match side {
        Side::Buy => price * (Decimal::ONE + buffer),
        Side::Sell => price * (Decimal::ONE - buffer),
    }
}

// ============================================================================
// Submissions
// ============================================================================

enum Submission {
    Trade(TradeRequest),
    Approve(ApproveRequest),
    AddLiquidity(AddLiquidityRequest),
    RemoveLiquidity(RemoveLiquidityRequest),
}

/// Accepted transaction: hash plus provider fields kept in `misc`
struct Submitted {
    tx_hash: String,
    misc: BTreeMap<String, Value>,
}

fn gas_misc(
    gas_price: Option<Decimal>,
    gas_price_token: Option<String>,
    nonce: Option<u64>,
) -> BTreeMap<String, Value> {
    let mut misc = BTreeMap::new();
    if let Some(price) = gas_price {
        misc.insert(GAS_PRICE_KEY.to_string(), json!(price.to_string()));
    }
    if let Some(token) = gas_price_token {
        misc.insert(GAS_PRICE_TOKEN_KEY.to_string(), json!(token));
    }
    if let Some(nonce) = nonce {
        misc.insert("nonce".to_string(), json!(nonce));
    }
    misc
}

impl Submission {
    async fn send(&self, gateway: &dyn GatewayClient) -> GatewayResult<Submitted> {
        match self {
            Submission::Trade(req) => {
                let resp = gateway.submit_trade(req).await?;
                let mut misc = gas_misc(resp.gas_price, resp.gas_price_token, resp.nonce);
                if let Some(limit) = resp.gas_limit {
                    misc.insert("gasLimit".to_string(), json!(limit.to_string()));
                }
                if let Some(cost) = resp.gas_cost {
                    misc.insert("gasCost".to_string(), json!(cost.to_string()));
                }
                Ok(Submitted {
                    tx_hash: resp.tx_hash,
                    misc,
                })
            }
            Submission::Approve(req) => {
                let resp = gateway.approve_token(req).await?;
                Ok(Submitted {
                    tx_hash: resp.approval.hash,
                    misc: gas_misc(None, None, resp.nonce),
                })
            }
            Submission::AddLiquidity(req) => {
                let resp = gateway.add_liquidity(req).await?;
                Ok(Submitted {
                    tx_hash: resp.tx_hash,
                    misc: gas_misc(resp.gas_price, resp.gas_price_token, resp.nonce),
                })
            }
            Submission::RemoveLiquidity(req) => {
                let resp = gateway.remove_liquidity(req).await?;
                Ok(Submitted {
                    tx_hash: resp.tx_hash,
                    misc: gas_misc(resp.gas_price, resp.gas_price_token, resp.nonce),
                })
            }
        }
    }
}

// ============================================================================
// Connector
// ============================================================================

struct Workers {
    shutdown: watch::Sender<bool>,
    scheduler: JoinHandle<()>,
    ticker: JoinHandle<()>,
}

struct Inner {
    config: ConnectorConfig,
    trading_pairs: Vec<TradingPair>,
    gateway: Arc<dyn GatewayClient>,
    registry: SharedRegistry,
    events: EventSink,
    balances: SharedBalanceState,
    reconciler: SharedReconciler,
    poller: Arc<StatusPoller>,
    ids: ClientOrderIdGenerator,
    wake: Arc<Notify>,
    workers: Mutex<Option<Workers>>,
    submissions: Mutex<JoinSet<()>>,
}

#[derive(Clone)]
pub struct GatewayConnector {
    inner: Arc<Inner>,
}

impl GatewayConnector {
    pub fn new(config: ConnectorConfig, gateway: Arc<dyn GatewayClient>, events: EventSink) -> Result<Self> {
        let trading_pairs = config
            .trading_pairs
            .iter()
            .map(|raw| raw.parse())
            .collect::<Result<Vec<TradingPair>>>()?;

        let registry = new_shared_registry(config.registry_config(), events.clone());
        let reconciler = BalanceReconciler::new(
            gateway.clone(),
            config.chain.clone(),
            config.network.clone(),
            config.wallet_address.clone(),
            &trading_pairs,
            &config.tokens,
            config.balance_interval(),
        )
        .with_native_currency(config.native_currency.clone());
        let balances = reconciler.state();
        let poller = StatusPoller::new(
            gateway.clone(),
            registry.clone(),
            balances.clone(),
            config.chain.clone(),
            config.network.clone(),
            config.exchange_id_wait(),
        );

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                trading_pairs,
                gateway,
                registry,
                events,
                balances,
                reconciler: Arc::new(Mutex::new(reconciler)),
                poller: Arc::new(poller),
                ids: ClientOrderIdGenerator::new(),
                wake: Arc::new(Notify::new()),
                workers: Mutex::new(None),
                submissions: Mutex::new(JoinSet::new()),
            }),
        })
    }

    pub fn config(&self) -> &ConnectorConfig {
        &self.inner.config
    }

    pub fn trading_pairs(&self) -> &[TradingPair] {
        &self.inner.trading_pairs
    }

    pub fn registry(&self) -> SharedRegistry {
        self.inner.registry.clone()
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Spawn the scheduling loop and the tick source.
    pub async fn start(&self) -> Result<()> {
        let mut workers = self.inner.workers.lock().await;
        if workers.is_some() {
            return Err(ConnectorError::AlreadyRunning);
        }

        let (shutdown, rx) = watch::channel(false);
        let scheduler = Scheduler::new(
            self.inner.poller.clone(),
            self.inner.reconciler.clone(),
            self.inner.wake.clone(),
            self.inner.config.poll_interval(),
        );
        let scheduler = tokio::spawn(scheduler.run(rx.clone()));
        let ticker = tokio::spawn(run_tick_source(
            self.inner.registry.clone(),
            self.inner.wake.clone(),
            self.inner.config.min_poll_interval(),
            rx,
        ));

        info!(
            "[CONNECTOR] started {} on {}/{} for {}",
            self.inner.config.connector,
            self.inner.config.chain,
            self.inner.config.network,
            self.inner.config.wallet_address
        );
        *workers = Some(Workers {
            shutdown,
            scheduler,
            ticker,
        });
        Ok(())
    }

    /// Stop the workers. Submissions still in flight get one request
    /// timeout to finish and are aborted after that.
    pub async fn stop(&self) -> Result<()> {
        let Some(workers) = self.inner.workers.lock().await.take() else {
            return Err(ConnectorError::NotRunning);
        };

        let _ = workers.shutdown.send(true);
        for (name, handle) in [("scheduler", workers.scheduler), ("tick source", workers.ticker)] {
            if let Err(e) = handle.await {
                warn!("[CONNECTOR] {} task ended abnormally: {}", name, e);
            }
        }

        let mut submissions = std::mem::take(&mut *self.inner.submissions.lock().await);
        if !submissions.is_empty() {
            info!("[CONNECTOR] waiting for {} submissions", submissions.len());
            let drain = async { while submissions.join_next().await.is_some() {} };
            if tokio::time::timeout(self.inner.config.request_timeout(), drain).await.is_err() {
                warn!("[CONNECTOR] aborting {} unfinished submissions", submissions.len());
                submissions.shutdown().await;
            }
        }

        info!("[CONNECTOR] stopped");
        Ok(())
    }

    pub async fn is_running(&self) -> bool {
        self.inner.workers.lock().await.is_some()
    }

    /// Run a scheduling cycle now instead of at the next tick.
    pub fn wake(&self) {
        self.inner.wake.notify_one();
    }

    // ========================================================================
    // Orders
    // ========================================================================

    /// Submit a swap. Returns the client order id at once; the outcome is
    /// observed through [`get_order`](Self::get_order) or events.
    pub async fn place_order(
        &self,
        side: Side,
        pair: &TradingPair,
        amount: Decimal,
        price: Decimal,
    ) -> Result<String> {
        let config = &self.inner.config;
        let request = Submission::Trade(TradeRequest {
            chain: config.chain.clone(),
            network: config.network.clone(),
            connector: config.connector.clone(),
            address: config.wallet_address.clone(),
            base: pair.base.clone(),
            quote: pair.quote.clone(),
            side,
            amount,
            limit_price: price,
            nonce: None,
        });
        self.track_and_submit(OrderKind::Trade, side, pair.clone(), amount, price, request)
            .await
    }

    /// Cancelling an on-chain swap is not attempted: once broadcast, a
    /// replacement transaction costs gas and rarely wins the race.
    /// Always returns `Ok(false)` for a known order.
    pub async fn cancel_order(&self, client_order_id: &str) -> Result<bool> {
        match self.inner.registry.read().await.get(client_order_id) {
            Some(order) => debug!(
                "[CONNECTOR] cancel of {} ({}) not attempted on-chain",
                client_order_id, order.state
            ),
            None => warn!("[CONNECTOR] cancel requested for unknown order {}", client_order_id),
        }
        Ok(false)
    }

    /// Submit an approval for `token` to the configured spender.
    pub async fn approve_token(&self, token: &str) -> Result<String> {
        let config = &self.inner.config;
        let token = token.to_uppercase();
        let request = Submission::Approve(ApproveRequest {
            chain: config.chain.clone(),
            network: config.network.clone(),
            address: config.wallet_address.clone(),
            spender: config.spender().to_string(),
            token: token.clone(),
        });
        let pair = TradingPair::new(token.clone(), token);
        self.track_and_submit(OrderKind::Approval, Side::Buy, pair, Decimal::ZERO, Decimal::ZERO, request)
            .await
    }

    pub async fn add_liquidity(
        &self,
        pair: &TradingPair,
        amount_base: Decimal,
        amount_quote: Decimal,
    ) -> Result<String> {
        let config = &self.inner.config;
        let request = Submission::AddLiquidity(AddLiquidityRequest {
            chain: config.chain.clone(),
            network: config.network.clone(),
            connector: config.connector.clone(),
            address: config.wallet_address.clone(),
            token0: pair.base.clone(),
            token1: pair.quote.clone(),
            amount0: amount_base,
            amount1: amount_quote,
        });
        let price = if amount_base.is_zero() {
            Decimal::ZERO
        } else {
            amount_quote / amount_base
        };
        self.track_and_submit(OrderKind::AddLiquidity, Side::Buy, pair.clone(), amount_base, price, request)
            .await
    }

    /// `decrease_percent` is in (0, 100]
    pub async fn remove_liquidity(&self, pair: &TradingPair, decrease_percent: Decimal) -> Result<String> {
        let config = &self.inner.config;
        let request = Submission::RemoveLiquidity(RemoveLiquidityRequest {
            chain: config.chain.clone(),
            network: config.network.clone(),
            connector: config.connector.clone(),
            address: config.wallet_address.clone(),
            token0: pair.base.clone(),
            token1: pair.quote.clone(),
            decrease_percent,
        });
        self.track_and_submit(
            OrderKind::RemoveLiquidity,
            Side::Sell,
            pair.clone(),
            decrease_percent,
            Decimal::ZERO,
            request,
        )
        .await
    }

    async fn track_and_submit(
        &self,
        kind: OrderKind,
        side: Side,
        pair: TradingPair,
        amount: Decimal,
        price: Decimal,
        request: Submission,
    ) -> Result<String> {
        if !self.is_running().await {
            return Err(ConnectorError::NotRunning);
        }

        let client_order_id = self.inner.ids.next_id(kind, side, &pair);
        let record = OrderRecord::new(client_order_id.clone(), pair, side, price, amount, kind);
        self.inner.registry.write().await.start_tracking(record)?;

        let inner = self.inner.clone();
        let id = client_order_id.clone();
        let mut submissions = self.inner.submissions.lock().await;
        while submissions.try_join_next().is_some() {}
        submissions.spawn(async move { submit(inner, id, kind, request).await });

        Ok(client_order_id)
    }

    pub async fn get_order(&self, client_order_id: &str) -> Option<OrderRecord> {
        self.inner.registry.read().await.get(client_order_id).cloned()
    }

    pub async fn active_orders(&self) -> Vec<OrderRecord> {
        self.inner.registry.read().await.active_orders()
    }

    /// Serializable copy of every tracked order, keyed by client order id
    pub async fn tracking_states(&self) -> BTreeMap<String, OrderRecord> {
        self.inner.registry.read().await.snapshot()
    }

    /// Reload persisted orders; locally terminal orders are kept as they are.
    pub async fn restore_tracking_states(&self, states: BTreeMap<String, OrderRecord>) -> usize {
        let restored = self.inner.registry.write().await.restore(states);
        if restored > 0 {
            self.wake();
        }
        restored
    }

    pub async fn purge_terminal(&self, older_than: chrono::Duration) -> usize {
        let purged = self.inner.registry.write().await.purge_terminal(older_than);
        if purged > 0 {
            debug!("[CONNECTOR] purged {} terminal orders", purged);
        }
        purged
    }

    pub async fn order_stats(&self) -> OrderStats {
        self.inner.registry.read().await.stats()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OrderEvent> {
        self.inner.events.subscribe()
    }

    // ========================================================================
    // Balances / network
    // ========================================================================

    pub async fn balances(&self) -> BalanceMap {
        self.inner.balances.balances().await
    }

    /// One reconciliation pass, serialized with the scheduling loop's.
    pub async fn update_balances(&self, force: bool) -> Result<ReconcileOutcome> {
        Ok(self.inner.reconciler.lock().await.reconcile(force).await?)
    }

    pub async fn status_dict(&self) -> StatusDict {
        StatusDict {
            balances_loaded: self.inner.balances.is_loaded().await,
            native_currency_known: self.inner.balances.native_currency().await.is_some(),
        }
    }

    pub async fn check_network(&self) -> bool {
        match self.inner.gateway.ping().await {
            Ok(up) => up,
            Err(e) => {
                warn!("[GATEWAY] {} unreachable: {}", self.inner.config.gateway_url, e);
                false
            }
        }
    }

    pub async fn quote_price(&self, pair: &TradingPair, side: Side, amount: Decimal) -> Result<PriceQuote> {
        let config = &self.inner.config;
        let resp = self
            .inner
            .gateway
            .get_price(&PriceRequest {
                chain: config.chain.clone(),
                network: config.network.clone(),
                connector: config.connector.clone(),
                base: pair.base.clone(),
                quote: pair.quote.clone(),
                amount,
                side,
            })
            .await?;

        Ok(PriceQuote {
            price: resp.price,
            limit_price: apply_slippage(resp.price, side, config.slippage_buffer),
            expected_amount: resp.expected_amount,
            gas_cost: resp.gas_cost,
        })
    }
}

/// Submission task body. Any failure fails the order; nothing is retried.
async fn submit(inner: Arc<Inner>, client_order_id: String, kind: OrderKind, request: Submission) {
    let result = request.send(inner.gateway.as_ref()).await;

    let update = match result {
        Ok(submitted) => {
            info!("[SUBMIT] {} accepted, tx {}", client_order_id, submitted.tx_hash);
            let state = match kind {
                OrderKind::Approval => OrderState::PendingApproval,
                _ => OrderState::Open,
            };
            OrderUpdate::new(&client_order_id, state)
                .with_exchange_order_id(submitted.tx_hash)
                .with_misc(submitted.misc)
        }
        Err(e) => {
            report_submission_failure(&inner.config, &client_order_id, &e);
            let mut misc = BTreeMap::new();
            misc.insert(ERROR_KEY.to_string(), json!(e.to_string()));
            OrderUpdate::new(&client_order_id, OrderState::Failed)
                .with_misc(misc)
                .with_failure_reason(e.to_string())
        }
    };

    let submitted = update.new_state != OrderState::Failed;
    inner.registry.write().await.apply_update(update);
    if submitted {
        inner.wake.notify_one();
    }
}

fn report_submission_failure(config: &ConnectorConfig, client_order_id: &str, e: &GatewayError) {
    warn!(
        "[SUBMIT] {} failed on {}/{} via {}: {}",
        client_order_id, config.chain, config.network, config.connector, e
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::mock::{confirmed, trade_response, MockGateway};
    use rust_decimal_macros::dec;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    fn config() -> ConnectorConfig {
        let mut config = ConnectorConfig::new("cardano", "preview", "sundaeswap", "addr_test1qz");
        config.trading_pairs = vec!["SBERRY-ADA".into()];
        config
    }

    fn connector(gateway: Arc<MockGateway>) -> GatewayConnector {
        GatewayConnector::new(config(), gateway, EventSink::new(64)).unwrap()
    }

    fn pair() -> TradingPair {
        TradingPair::new("SBERRY", "ADA")
    }

    /// let spawned tasks run; virtual time makes this instant
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[test]
    fn slippage_widens_limit_price() {
        assert_eq!(apply_slippage(dec!(100), Side::Buy, dec!(0.01)), dec!(101.00));
        assert_eq!(apply_slippage(dec!(100), Side::Sell, dec!(0.01)), dec!(99.00));
    }

    #[test]
    fn rejects_malformed_pairs() {
        let mut bad = config();
        bad.trading_pairs = vec!["SBERRYADA".into()];
        let result = GatewayConnector::new(bad, Arc::new(MockGateway::new()), EventSink::new(8));
        assert!(matches!(result, Err(ConnectorError::InvalidTradingPair(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn orders_require_a_running_connector() {
        let conn = connector(Arc::new(MockGateway::new()));
        let result = conn.place_order(Side::Buy, &pair(), dec!(100), dec!(0.5)).await;
        assert!(matches!(result, Err(ConnectorError::NotRunning)));

        conn.start().await.unwrap();
        assert!(matches!(conn.start().await, Err(ConnectorError::AlreadyRunning)));
        conn.stop().await.unwrap();
        assert!(matches!(conn.stop().await, Err(ConnectorError::NotRunning)));
    }

    #[tokio::test(start_paused = true)]
    async fn placed_order_opens_then_fills() {
        let gateway = Arc::new(MockGateway::new());
        gateway.push_trade_result(Ok(trade_response("0xswap", dec!(0.000000044))));
        gateway.set_status("0xswap", Ok(confirmed("0xswap", dec!(250000), None)));
        let conn = connector(gateway.clone());
        let mut events = conn.subscribe();
        conn.start().await.unwrap();

        let id = conn.place_order(Side::Buy, &pair(), dec!(10000), dec!(0.000095)).await.unwrap();
        assert!(id.starts_with("buy-SBERRY-ADA-"));
        settle().await;

        let order = conn.get_order(&id).await.unwrap();
        assert_eq!(order.state, OrderState::Filled);
        assert_eq!(order.exchange_order_id.as_deref(), Some("0xswap"));
        assert_eq!(order.fee, dec!(0.011));
        assert_eq!(order.fee_asset.as_deref(), Some("ADA"));
        assert_eq!(order.misc_decimal(GAS_PRICE_KEY), Some(dec!(0.000000044)));
        assert_eq!(gateway.trade_calls.load(Ordering::SeqCst), 1);

        let mut filled = false;
        while let Ok(event) = events.try_recv() {
            assert_eq!(event.client_order_id(), id);
            filled |= matches!(event, OrderEvent::Filled(_));
        }
        assert!(filled);

        conn.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_submission_fails_without_retry() {
        let gateway = Arc::new(MockGateway::new());
        gateway.push_trade_result(Err(GatewayError::Application {
            status: 500,
            message: "insufficient funds".into(),
        }));
        let conn = connector(gateway.clone());
        conn.start().await.unwrap();

        let id = conn.place_order(Side::Sell, &pair(), dec!(5), dec!(0.0001)).await.unwrap();
        settle().await;
        tokio::time::sleep(Duration::from_secs(30)).await;

        let order = conn.get_order(&id).await.unwrap();
        assert_eq!(order.state, OrderState::Failed);
        assert!(order.misc[ERROR_KEY].as_str().unwrap().contains("insufficient funds"));
        assert!(order.failure_reason.unwrap().contains("insufficient funds"));
        assert_eq!(gateway.trade_calls.load(Ordering::SeqCst), 1);

        conn.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn transport_failure_on_submit_also_fails() {
        let gateway = Arc::new(MockGateway::new());
        gateway.push_trade_result(Err(GatewayError::Transport("timed out".into())));
        let conn = connector(gateway.clone());
        conn.start().await.unwrap();

        let id = conn.place_order(Side::Buy, &pair(), dec!(5), dec!(0.0001)).await.unwrap();
        settle().await;
        assert_eq!(conn.get_order(&id).await.unwrap().state, OrderState::Failed);

        conn.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_is_a_documented_no_op() {
        let conn = connector(Arc::new(MockGateway::new()));
        conn.start().await.unwrap();
        let id = conn.place_order(Side::Buy, &pair(), dec!(1), dec!(1)).await.unwrap();
        settle().await;

        let before = conn.get_order(&id).await.unwrap();
        assert!(!conn.cancel_order(&id).await.unwrap());
        assert!(!conn.cancel_order("ghost").await.unwrap());
        assert_eq!(conn.get_order(&id).await.unwrap().state, before.state);

        conn.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn approval_and_liquidity_orders_are_tracked() {
        let gateway = Arc::new(MockGateway::new());
        let conn = connector(gateway.clone());
        conn.start().await.unwrap();

        let approve = conn.approve_token("sberry").await.unwrap();
        let add = conn.add_liquidity(&pair(), dec!(100), dec!(50)).await.unwrap();
        let remove = conn.remove_liquidity(&pair(), dec!(25)).await.unwrap();
        settle().await;

        let approval = conn.get_order(&approve).await.unwrap();
        assert!(approve.starts_with("approve-SBERRY"));
        assert_eq!(approval.kind, OrderKind::Approval);
        assert_eq!(approval.state, OrderState::PendingApproval);
        assert!(approval.exchange_order_id.is_some());

        let add = conn.get_order(&add).await.unwrap();
        assert_eq!(add.state, OrderState::Open);
        assert_eq!(add.price, dec!(0.5));
        assert_eq!(conn.get_order(&remove).await.unwrap().kind, OrderKind::RemoveLiquidity);

        let hash = approval.exchange_order_id.unwrap();
        gateway.set_status(&hash, Ok(confirmed(&hash, dec!(50000), Some(dec!(0.000001)))));
        let mut events = conn.subscribe();
        conn.wake();
        settle().await;

        assert_eq!(conn.get_order(&approve).await.unwrap().state, OrderState::Filled);
        let mut confirmed_token = None;
        while let Ok(event) = events.try_recv() {
            if let OrderEvent::ApprovalConfirmed { token, .. } = event {
                confirmed_token = Some(token);
            }
        }
        assert_eq!(confirmed_token.as_deref(), Some("SBERRY"));

        conn.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn tracking_states_round_trip() {
        let conn = connector(Arc::new(MockGateway::new()));
        conn.start().await.unwrap();
        let id = conn.place_order(Side::Buy, &pair(), dec!(1), dec!(2)).await.unwrap();
        settle().await;

        let saved = serde_json::to_string(&conn.tracking_states().await).unwrap();
        conn.stop().await.unwrap();

        let fresh = connector(Arc::new(MockGateway::new()));
        let states: BTreeMap<String, OrderRecord> = serde_json::from_str(&saved).unwrap();
        assert_eq!(fresh.restore_tracking_states(states).await, 1);
        assert_eq!(fresh.get_order(&id).await, conn.get_order(&id).await);
        assert_eq!(fresh.order_stats().await.open, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn status_dict_reports_readiness() {
        let gateway = Arc::new(MockGateway::new());
        gateway.set_balances(&[("ADA", dec!(42)), ("SBERRY", dec!(7))]);
        let conn = connector(gateway.clone());

        let status = conn.status_dict().await;
        assert!(!status.is_ready());
        assert_eq!(
            serde_json::to_value(status).unwrap(),
            serde_json::json!({ "balances_loaded": false, "native_currency_known": false })
        );

        conn.start().await.unwrap();
        settle().await;
        assert!(conn.status_dict().await.is_ready());
        assert_eq!(conn.balances().await.total("ADA"), dec!(42));

        gateway.set_balances(&[("ADA", dec!(40))]);
        assert_eq!(
            conn.update_balances(false).await.unwrap(),
            ReconcileOutcome::Skipped
        );
        assert!(matches!(conn.update_balances(true).await.unwrap(), ReconcileOutcome::Applied(_)));
        assert_eq!(conn.balances().await.total("SBERRY"), Decimal::ZERO);

        conn.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn quotes_and_network_check() {
        let gateway = Arc::new(MockGateway::new());
        *gateway.price.lock().unwrap() = dec!(0.000095);
        let conn = connector(gateway);

        let quote = conn.quote_price(&pair(), Side::Buy, dec!(1000)).await.unwrap();
        assert_eq!(quote.price, dec!(0.000095));
        assert_eq!(quote.limit_price, dec!(0.00009595));
        assert!(conn.check_network().await);
    }

    #[tokio::test(start_paused = true)]
    async fn purge_and_stats() {
        let gateway = Arc::new(MockGateway::new());
        gateway.push_trade_result(Err(GatewayError::Malformed("missing txHash".into())));
        let conn = connector(gateway);
        conn.start().await.unwrap();

        conn.place_order(Side::Buy, &pair(), dec!(1), dec!(1)).await.unwrap();
        conn.place_order(Side::Buy, &pair(), dec!(1), dec!(1)).await.unwrap();
        settle().await;

        let stats = conn.order_stats().await;
        assert_eq!(stats.total, 2);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.active(), 1);

        assert_eq!(conn.purge_terminal(chrono::Duration::zero()).await, 1);
        assert_eq!(conn.order_stats().await.total, 1);

        conn.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn forced_balance_update_waits_for_running_pass() {
        let gateway = Arc::new(MockGateway::new());
        gateway.set_balances(&[("ADA", dec!(120)), ("SBERRY", dec!(5000))]);
        gateway.set_balance_delay(Duration::from_secs(5));
        let conn = connector(gateway.clone());
        conn.start().await.unwrap();

        // startup pass is now blocked inside get_balances
        settle().await;
        assert_eq!(gateway.balances_in_flight.load(Ordering::SeqCst), 1);

        let started = tokio::time::Instant::now();
        let outcome = conn.update_balances(true).await.unwrap();
        assert!(matches!(outcome, ReconcileOutcome::Applied(_)));
        assert!(started.elapsed() >= Duration::from_secs(9));

        assert_eq!(gateway.balance_calls.load(Ordering::SeqCst), 2);
        assert_eq!(gateway.max_balances_in_flight.load(Ordering::SeqCst), 1);
        assert_eq!(conn.balances().await.get("SBERRY").map(|b| b.total), Some(dec!(5000)));

        conn.stop().await.unwrap();
    }
}
