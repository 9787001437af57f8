//! Order events for downstream bookkeeping
//!
//! The registry publishes every transition into an [`EventSink`]. Sinks are
//! constructed by the owner of the connector and handed in explicitly.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::broadcast;
use tracing::trace;

use crate::order::{OrderKind, OrderRecord, OrderState, Side, TradingPair};

/// Fill/execution info
#[derive(Debug, Clone, PartialEq)]
pub struct FillEvent {
    pub client_order_id: String,
    pub exchange_order_id: Option<String>,
    pub trading_pair: TradingPair,
    pub kind: OrderKind,
    pub side: Side,
    pub price: Decimal,
    pub amount: Decimal,
    pub fee: Decimal,
    pub fee_asset: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl FillEvent {
    pub fn from_record(record: &OrderRecord) -> Self {
        Self {
            client_order_id: record.client_order_id.clone(),
            exchange_order_id: record.exchange_order_id.clone(),
            trading_pair: record.trading_pair.clone(),
            kind: record.kind,
            side: record.side,
            price: record.price,
            amount: record.amount,
            fee: record.fee,
            fee_asset: record.fee_asset.clone(),
            timestamp: record.last_update,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum OrderEvent {
    Created {
        client_order_id: String,
        kind: OrderKind,
        state: OrderState,
    },
    StateChanged {
        client_order_id: String,
        from: OrderState,
        to: OrderState,
    },
    Filled(FillEvent),
    ApprovalConfirmed {
        client_order_id: String,
        token: String,
        fee: Decimal,
    },
    Failed {
        client_order_id: String,
        reason: Option<String>,
    },
}

impl OrderEvent {
    pub fn client_order_id(&self) -> &str {
        match self {
            OrderEvent::Created { client_order_id, .. }
            | OrderEvent::StateChanged { client_order_id, .. }
            | OrderEvent::ApprovalConfirmed { client_order_id, .. }
            | OrderEvent::Failed { client_order_id, .. } => client_order_id,
            OrderEvent::Filled(fill) => &fill.client_order_id,
        }
    }
}

/// Broadcast sink for [`OrderEvent`]s. Cloning shares the channel.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: broadcast::Sender<OrderEvent>,
}

impl EventSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OrderEvent> {
        self.tx.subscribe()
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn emit(&self, event: OrderEvent) {
        if self.tx.send(event).is_err() {
            trace!("[EVENTS] no subscribers");
        }
    }

    /// Emit the events implied by `record` having moved from `from` to its current state.
    pub fn emit_transition(&self, from: OrderState, record: &OrderRecord) {
        if from != record.state {
            self.emit(OrderEvent::StateChanged {
                client_order_id: record.client_order_id.clone(),
                from,
                to: record.state,
            });
        }
        match record.state {
            OrderState::Filled if from != OrderState::Filled => match record.kind {
                OrderKind::Approval => self.emit(OrderEvent::ApprovalConfirmed {
                    client_order_id: record.client_order_id.clone(),
                    token: record.trading_pair.base.clone(),
                    fee: record.fee,
                }),
                _ => self.emit(OrderEvent::Filled(FillEvent::from_record(record))),
            },
            OrderState::Failed if from != OrderState::Failed => self.emit(OrderEvent::Failed {
                client_order_id: record.client_order_id.clone(),
                reason: record.failure_reason.clone(),
            }),
            _ => {}
        }
    }
}

impl Default for EventSink {
    fn default() -> Self {
        Self::new(256)
    }
}
