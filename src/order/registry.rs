//! Order Registry - owns every tracked order and applies transitions
//!
//! All mutation goes through [`OrderRegistry::apply_update`],
//! [`OrderRegistry::mark_not_found`] and [`OrderRegistry::record_ambiguous`].
//! The registry is shared as [`SharedRegistry`]; holding the write lock for
//! the duration of one transition keeps state, exchange id, fee and metadata
//! of an order consistent with each other.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use tokio::sync::{Notify, RwLock};
use tracing::{debug, info, warn};

use super::record::{OrderRecord, OrderState};
use crate::error::RegistryError;
use crate::events::{EventSink, OrderEvent};

pub const DEFAULT_NOT_FOUND_LIMIT: u32 = 10;

/// Reason recorded when an order exhausts its not-found budget
pub const LOST_REASON: &str = "lost";
/// Reason recorded when an order exhausts its ambiguous-status budget
pub const UNRESOLVED_REASON: &str = "unresolved";

// ============================================================================
// Updates
// ============================================================================

/// One state report about one order.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderUpdate {
    pub client_order_id: String,
    pub new_state: OrderState,
    pub exchange_order_id: Option<String>,
    pub fee: Option<Decimal>,
    pub fee_asset: Option<String>,
    pub misc: Option<BTreeMap<String, serde_json::Value>>,
    pub failure_reason: Option<String>,
}

impl OrderUpdate {
    pub fn new(client_order_id: impl Into<String>, new_state: OrderState) -> Self {
        Self {
            client_order_id: client_order_id.into(),
            new_state,
            exchange_order_id: None,
            fee: None,
            fee_asset: None,
            misc: None,
            failure_reason: None,
        }
    }

    pub fn with_exchange_order_id(mut self, id: impl Into<String>) -> Self {
        self.exchange_order_id = Some(id.into());
        self
    }

    pub fn with_fee(mut self, fee: Decimal, asset: Option<String>) -> Self {
        self.fee = Some(fee);
        self.fee_asset = asset;
        self
    }

    pub fn with_misc(mut self, misc: BTreeMap<String, serde_json::Value>) -> Self {
        self.misc = Some(misc);
        self
    }

    pub fn with_failure_reason(mut self, reason: impl Into<String>) -> Self {
        self.failure_reason = Some(reason.into());
        self
    }
}

/// What happened to a reported update.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOutcome {
    Applied { from: OrderState, to: OrderState },
    /// The order is not tracked; nothing was changed
    UnknownOrder,
    /// The order already reached a terminal state; nothing was changed
    IgnoredTerminal(OrderState),
    /// The transition is not part of the lifecycle; nothing was changed
    Rejected(RegistryError),
    /// A not-found or ambiguous report was counted without a transition
    Retained { count: u32 },
}

impl UpdateOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, UpdateOutcome::Applied { .. })
    }
}

// ============================================================================
// Registry
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryConfig {
    pub not_found_limit: u32,
    /// `None` re-polls ambiguous transactions forever
    pub ambiguous_limit: Option<u32>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            not_found_limit: DEFAULT_NOT_FOUND_LIMIT,
            ambiguous_limit: None,
        }
    }
}

pub struct OrderRegistry {
    orders: HashMap<String, OrderRecord>,  // client_order_id -> record
    exchange_id_map: HashMap<String, String>,  // exchange_order_id -> client_order_id
    config: RegistryConfig,
    events: EventSink,
    exchange_id_notify: Arc<Notify>,
}

impl OrderRegistry {
    pub fn new(config: RegistryConfig, events: EventSink) -> Self {
        Self {
            orders: HashMap::new(),
            exchange_id_map: HashMap::new(),
            config,
            events,
            exchange_id_notify: Arc::new(Notify::new()),
        }
    }

    /// Notified whenever an order receives its exchange order id.
    pub fn exchange_id_notify(&self) -> Arc<Notify> {
        self.exchange_id_notify.clone()
    }

    pub fn events(&self) -> &EventSink {
        &self.events
    }

    pub fn config(&self) -> RegistryConfig {
        self.config
    }

    /// Start tracking a new order
    pub fn start_tracking(&mut self, record: OrderRecord) -> Result<(), RegistryError> {
        if self.orders.contains_key(&record.client_order_id) {
            warn!("[REGISTRY] duplicate tracking request for {}", record.client_order_id);
            return Err(RegistryError::DuplicateOrder(record.client_order_id));
        }
        if let Some(exchange_id) = &record.exchange_order_id {
            self.exchange_id_map.insert(exchange_id.clone(), record.client_order_id.clone());
        }

        debug!("[REGISTRY] tracking {} ({:?}, {})", record.client_order_id, record.kind, record.state);
        self.events.emit(OrderEvent::Created {
            client_order_id: record.client_order_id.clone(),
            kind: record.kind,
            state: record.state,
        });
        self.orders.insert(record.client_order_id.clone(), record);
        Ok(())
    }

    /// Apply one reported state. Idempotent once the order is terminal.
    pub fn apply_update(&mut self, update: OrderUpdate) -> UpdateOutcome {
        let Some(order) = self.orders.get_mut(&update.client_order_id) else {
            warn!(
                "[REGISTRY] update for unknown order {} ({}) ignored",
                update.client_order_id, update.new_state
            );
            return UpdateOutcome::UnknownOrder;
        };

        let from = order.state;
        if from.is_terminal() {
            info!(
                "[REGISTRY] {} already {}, ignoring late {} report",
                update.client_order_id, from, update.new_state
            );
            return UpdateOutcome::IgnoredTerminal(from);
        }
        if !from.can_transition_to(update.new_state) {
            warn!(
                "[REGISTRY] {} rejected transition {} -> {}",
                update.client_order_id, from, update.new_state
            );
            return UpdateOutcome::Rejected(RegistryError::InvalidTransition {
                from,
                to: update.new_state,
            });
        }

        let mut id_assigned = false;
        if let Some(exchange_id) = update.exchange_order_id {
            if order.exchange_order_id.as_deref() != Some(exchange_id.as_str()) {
                if let Some(old) = order.exchange_order_id.take() {
                    self.exchange_id_map.remove(&old);
                }
                self.exchange_id_map.insert(exchange_id.clone(), order.client_order_id.clone());
                order.exchange_order_id = Some(exchange_id);
                id_assigned = true;
            }
        }
        if let Some(fee) = update.fee {
            order.fee = fee;
            if update.fee_asset.is_some() {
                order.fee_asset = update.fee_asset;
            }
        }
        if let Some(misc) = update.misc {
            order.misc = misc;
        }
        if update.failure_reason.is_some() {
            order.failure_reason = update.failure_reason;
        }
        order.state = update.new_state;
        order.last_update = Utc::now();

        debug!("[REGISTRY] {} {} -> {}", order.client_order_id, from, order.state);
        self.events.emit_transition(from, order);
        if id_assigned {
            self.exchange_id_notify.notify_waiters();
        }

        UpdateOutcome::Applied { from, to: update.new_state }
    }

    /// Count one "transaction not found" report; fails the order as lost
    /// once the budget is used up.
    pub fn mark_not_found(&mut self, client_order_id: &str) -> UpdateOutcome {
        let limit = self.config.not_found_limit;
        let count = match self.orders.get_mut(client_order_id) {
            None => {
                warn!("[REGISTRY] not-found report for unknown order {}", client_order_id);
                return UpdateOutcome::UnknownOrder;
            }
            Some(order) if order.state.is_terminal() => {
                return UpdateOutcome::IgnoredTerminal(order.state);
            }
            Some(order) => {
                order.not_found_count += 1;
                order.not_found_count
            }
        };

        if count >= limit {
            warn!(
                "[REGISTRY] {} not found {} consecutive times, marking lost",
                client_order_id, count
            );
            return self.apply_update(
                OrderUpdate::new(client_order_id, OrderState::Failed).with_failure_reason(LOST_REASON),
            );
        }
        debug!("[REGISTRY] {} not found ({}/{})", client_order_id, count, limit);
        UpdateOutcome::Retained { count }
    }

    /// Count one ambiguous (still in mempool) report. The transaction exists,
    /// so the consecutive not-found counter restarts.
    pub fn record_ambiguous(&mut self, client_order_id: &str) -> UpdateOutcome {
        let count = match self.orders.get_mut(client_order_id) {
            None => return UpdateOutcome::UnknownOrder,
            Some(order) if order.state.is_terminal() => {
                return UpdateOutcome::IgnoredTerminal(order.state);
            }
            Some(order) => {
                order.not_found_count = 0;
                order.ambiguous_count += 1;
                order.ambiguous_count
            }
        };

        match self.config.ambiguous_limit {
            Some(limit) if count >= limit => {
                warn!(
                    "[REGISTRY] {} still unresolved after {} polls, giving up",
                    client_order_id, count
                );
                self.apply_update(
                    OrderUpdate::new(client_order_id, OrderState::Failed)
                        .with_failure_reason(UNRESOLVED_REASON),
                )
            }
            _ => UpdateOutcome::Retained { count },
        }
    }

    pub fn get(&self, client_order_id: &str) -> Option<&OrderRecord> {
        self.orders.get(client_order_id)
    }

    pub fn get_by_exchange_id(&self, exchange_order_id: &str) -> Option<&OrderRecord> {
        self.exchange_id_map
            .get(exchange_order_id)
            .and_then(|id| self.orders.get(id))
    }

    /// Copies of every non-terminal order
    pub fn active_orders(&self) -> Vec<OrderRecord> {
        self.orders.values().filter(|o| o.state.is_active()).cloned().collect()
    }

    pub fn has_active(&self) -> bool {
        self.orders.values().any(|o| o.state.is_active())
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    /// Point-in-time deep copy of all tracked orders, keyed by client order id
    pub fn snapshot(&self) -> BTreeMap<String, OrderRecord> {
        self.orders.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }

    /// Load persisted records. A locally terminal order is never replaced.
    pub fn restore(&mut self, records: BTreeMap<String, OrderRecord>) -> usize {
        let mut restored = 0;
        for (client_order_id, mut record) in records {
            if self.orders.get(&client_order_id).is_some_and(|o| o.is_terminal()) {
                debug!("[REGISTRY] keeping terminal {} over restored copy", client_order_id);
                continue;
            }
            record.client_order_id = client_order_id.clone();
            if let Some(old) = self.orders.get(&client_order_id).and_then(|o| o.exchange_order_id.clone()) {
                self.exchange_id_map.remove(&old);
            }
            if let Some(exchange_id) = &record.exchange_order_id {
                self.exchange_id_map.insert(exchange_id.clone(), client_order_id.clone());
            }
            self.orders.insert(client_order_id, record);
            restored += 1;
        }
        if restored > 0 {
            info!("[REGISTRY] restored {} orders", restored);
            self.exchange_id_notify.notify_waiters();
        }
        restored
    }

    /// Remove terminal orders older than `max_age`
    pub fn purge_terminal(&mut self, max_age: Duration) -> usize {
        let cutoff = Utc::now() - max_age;
        let before = self.orders.len();
        let exchange_id_map = &mut self.exchange_id_map;
        self.orders.retain(|_, o| {
            let keep = !o.is_terminal() || o.last_update > cutoff;
            if !keep {
                if let Some(exchange_id) = &o.exchange_order_id {
                    exchange_id_map.remove(exchange_id);
                }
            }
            keep
        });
        before - self.orders.len()
    }

    /// Statistics
    pub fn stats(&self) -> OrderStats {
        let mut stats = OrderStats::default();
        for order in self.orders.values() {
            match order.state {
                OrderState::PendingApproval => stats.pending_approval += 1,
                OrderState::PendingCreate => stats.pending_create += 1,
                OrderState::Open => stats.open += 1,
                OrderState::PendingCancel => stats.pending_cancel += 1,
                OrderState::Filled => stats.filled += 1,
                OrderState::Failed => stats.failed += 1,
                OrderState::Canceled => stats.canceled += 1,
            }
        }
        stats.total = self.orders.len();
        stats
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct OrderStats {
    pub total: usize,
    pub pending_approval: usize,
    pub pending_create: usize,
    pub open: usize,
    pub pending_cancel: usize,
    pub filled: usize,
    pub failed: usize,
    pub canceled: usize,
}

impl OrderStats {
    pub fn active(&self) -> usize {
        self.pending_approval + self.pending_create + self.open + self.pending_cancel
    }

    pub fn log(&self) {
        info!(
            "[ORDER STATS] total: {} | pending: {} | open: {} | filled: {} | failed: {} | canceled: {}",
            self.total,
            self.pending_approval + self.pending_create + self.pending_cancel,
            self.open,
            self.filled,
            self.failed,
            self.canceled
        );
    }
}

/// Thread-safe wrapper
pub type SharedRegistry = Arc<RwLock<OrderRegistry>>;

pub fn new_shared_registry(config: RegistryConfig, events: EventSink) -> SharedRegistry {
    Arc::new(RwLock::new(OrderRegistry::new(config, events)))
}
