//! Status Poller - refreshes active orders from on-chain transaction status
//!
//! One pass reads the active orders, queries the gateway for every known
//! transaction concurrently and applies each answer as soon as it arrives.
//! A failed query is counted and logged; the rest of the pass continues.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{FuturesUnordered, StreamExt};
use rust_decimal::Decimal;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::balances::SharedBalanceState;
use crate::gateway::{GatewayClient, PollRequest, TxStatus, TxStatusResponse};
use crate::order::{OrderRecord, OrderState, OrderUpdate, SharedRegistry, UpdateOutcome};

/// misc key holding the gas price quoted at submission
pub const GAS_PRICE_KEY: &str = "gasPrice";
/// misc key holding the token gas is paid in
pub const GAS_PRICE_TOKEN_KEY: &str = "gasPriceToken";

/// What a status report means for the order it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Mined with a successful receipt
    Filled { fee: Decimal },
    /// Still in the mempool
    Ambiguous,
    /// Unknown to the chain, or mined and reverted
    NotFound,
    /// Reported mined but no receipt yet
    AwaitingReceipt,
}

/// Map a gateway status report to a [`Resolution`].
///
/// Fee is `gasUsed × effectiveGasPrice`, falling back to the gas price
/// quoted at submission when the receipt carries none.
pub fn interpret(resp: &TxStatusResponse, quoted_gas_price: Option<Decimal>) -> Resolution {
    match resp.tx_status {
        TxStatus::NotFound => Resolution::NotFound,
        status if status.is_ambiguous() => Resolution::Ambiguous,
        _ => match &resp.tx_receipt {
            None => Resolution::AwaitingReceipt,
            Some(receipt) if !receipt.succeeded() => Resolution::NotFound,
            Some(receipt) => {
                let unit_price = receipt
                    .effective_gas_price
                    .or(quoted_gas_price)
                    .unwrap_or(Decimal::ZERO);
                Resolution::Filled {
                    fee: receipt.gas_used * unit_price,
                }
            }
        },
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PollReport {
    pub polled: usize,
    pub filled: usize,
    pub failed: usize,
    /// still active after this pass
    pub pending: usize,
    pub errors: usize,
    /// active orders whose transaction hash never arrived
    pub awaiting_id: usize,
}

pub struct StatusPoller {
    gateway: Arc<dyn GatewayClient>,
    registry: SharedRegistry,
    balances: SharedBalanceState,
    chain: String,
    network: String,
    exchange_id_wait: Duration,
}

impl StatusPoller {
    pub fn new(
        gateway: Arc<dyn GatewayClient>,
        registry: SharedRegistry,
        balances: SharedBalanceState,
        chain: String,
        network: String,
        exchange_id_wait: Duration,
    ) -> Self {
        Self {
            gateway,
            registry,
            balances,
            chain,
            network,
            exchange_id_wait,
        }
    }

    /// One polling pass. Idle when nothing is active.
    pub async fn poll_once(&self) -> PollReport {
        let active = self.registry.read().await.active_orders();
        if active.is_empty() {
            return PollReport::default();
        }

        let (ready, missing) = self.resolve_exchange_ids(active).await;
        let mut report = PollReport {
            awaiting_id: missing.len(),
            ..Default::default()
        };

        // a hash that never arrives counts against the not-found budget
        for client_order_id in &missing {
            warn!(
                "[POLL] {} still has no transaction hash after {:?}",
                client_order_id, self.exchange_id_wait
            );
            let outcome = self.registry.write().await.mark_not_found(client_order_id);
            if let UpdateOutcome::Applied { to: OrderState::Failed, .. } = outcome {
                report.failed += 1;
            }
        }

        let mut queries: FuturesUnordered<_> = ready
            .into_iter()
            .map(|(client_order_id, tx_hash)| {
                let req = PollRequest {
                    chain: self.chain.clone(),
                    network: self.network.clone(),
                    tx_hash,
                };
                async move {
                    let result = self.gateway.get_transaction_status(&req).await;
                    (client_order_id, req.tx_hash, result)
                }
            })
            .collect();

        while let Some((client_order_id, tx_hash, result)) = queries.next().await {
            report.polled += 1;
            match result {
                Ok(resp) => self.apply_status(&client_order_id, &tx_hash, &resp, &mut report).await,
                Err(e) => {
                    report.errors += 1;
                    warn!(
                        "[POLL] status query failed for {} (tx {}) on {}/{}: {}",
                        client_order_id, tx_hash, self.chain, self.network, e
                    );
                }
            }
        }

        report.pending = report.polled + report.awaiting_id - report.filled - report.failed;
        if report.filled > 0 || report.failed > 0 || report.errors > 0 {
            info!(
                "[POLL] polled {} | filled {} | failed {} | errors {} | awaiting id {}",
                report.polled, report.filled, report.failed, report.errors, report.awaiting_id
            );
        }
        report
    }

    /// Pair every active order with its transaction hash, waiting up to
    /// `exchange_id_wait` for submissions still in flight. Returns the
    /// pairs and the orders whose hash did not arrive in time.
    async fn resolve_exchange_ids(&self, orders: Vec<OrderRecord>) -> (Vec<(String, String)>, Vec<String>) {
        let mut ready = Vec::with_capacity(orders.len());
        let mut waiting = HashSet::new();
        for order in orders {
            match order.exchange_order_id {
                Some(tx_hash) => ready.push((order.client_order_id, tx_hash)),
                None => {
                    waiting.insert(order.client_order_id);
                }
            }
        }
        if waiting.is_empty() {
            return (ready, Vec::new());
        }

        let notify = self.registry.read().await.exchange_id_notify();
        let deadline = Instant::now() + self.exchange_id_wait;
        loop {
            // register before checking so an assignment in between is not missed
            let notified = notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let registry = self.registry.read().await;
                waiting.retain(|id| match registry.get(id) {
                    Some(order) if order.is_terminal() => false,
                    Some(order) => match &order.exchange_order_id {
                        Some(tx_hash) => {
                            ready.push((id.clone(), tx_hash.clone()));
                            false
                        }
                        None => true,
                    },
                    None => false,
                });
            }

            if waiting.is_empty() {
                break;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                debug!("[POLL] {} orders still without a transaction hash", waiting.len());
                break;
            }
        }
        (ready, waiting.into_iter().collect())
    }

    async fn apply_status(
        &self,
        client_order_id: &str,
        tx_hash: &str,
        resp: &TxStatusResponse,
        report: &mut PollReport,
    ) {
        let (quoted_gas_price, fee_token) = match self.registry.read().await.get_by_exchange_id(tx_hash) {
            Some(order) if order.client_order_id == client_order_id => (
                order.misc_decimal(GAS_PRICE_KEY),
                order.misc.get(GAS_PRICE_TOKEN_KEY).and_then(|v| v.as_str()).map(str::to_string),
            ),
            _ => {
                debug!("[POLL] {} no longer tracks tx {}, dropping report", client_order_id, tx_hash);
                return;
            }
        };

        let outcome = match interpret(resp, quoted_gas_price) {
            Resolution::Filled { fee } => {
                let fee_asset = match self.balances.native_currency().await {
                    Some(native) => Some(native),
                    None => fee_token,
                };
                self.registry.write().await.apply_update(
                    OrderUpdate::new(client_order_id, OrderState::Filled)
                        .with_exchange_order_id(tx_hash)
                        .with_fee(fee, fee_asset),
                )
            }
            Resolution::Ambiguous => {
                debug!("[POLL] {} tx {} still in mempool ({:?})", client_order_id, tx_hash, resp.tx_status);
                self.registry.write().await.record_ambiguous(client_order_id)
            }
            Resolution::NotFound => {
                warn!(
                    "[POLL] network error: tx {} for {} not found or reverted on {}/{}",
                    tx_hash, client_order_id, self.chain, self.network
                );
                self.registry.write().await.mark_not_found(client_order_id)
            }
            Resolution::AwaitingReceipt => {
                debug!("[POLL] {} tx {} mined, receipt not available yet", client_order_id, tx_hash);
                return;
            }
        };

        if let UpdateOutcome::Applied { to, .. } = outcome {
            match to {
                OrderState::Filled => {
                    info!("[POLL] {} filled (tx {})", client_order_id, tx_hash);
                    report.filled += 1;
                }
                OrderState::Failed => report.failed += 1,
                _ => {}
            }
        }
    }
}
