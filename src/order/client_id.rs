//! Client order id generation
//!
//! Ids are `<prefix>-<BASE>-<QUOTE>-<counter><nonce>`. The random nonce keeps
//! ids unique across process restarts, when restored orders share the registry.

use std::sync::atomic::{AtomicU64, Ordering};

use super::record::{OrderKind, Side, TradingPair};

pub struct ClientOrderIdGenerator {
    counter: AtomicU64,
    nonce: String,
}

impl ClientOrderIdGenerator {
    pub fn new() -> Self {
        let nonce = uuid::Uuid::new_v4().simple().to_string();
        Self {
            counter: AtomicU64::new(0),
            nonce: nonce[..8].to_string(),
        }
    }

    pub fn next_id(&self, kind: OrderKind, side: Side, pair: &TradingPair) -> String {
        let count = self.counter.fetch_add(1, Ordering::SeqCst);
        let prefix = match (kind, side) {
            (OrderKind::Trade, Side::Buy) => "buy",
            (OrderKind::Trade, Side::Sell) => "sell",
            (OrderKind::Approval, _) => "approve",
            (OrderKind::AddLiquidity, _) => "addlp",
            (OrderKind::RemoveLiquidity, _) => "rmlp",
        };
        format!("{}-{}-{}-{}{}", prefix, pair.base, pair.quote, count, self.nonce)
    }
}

impl Default for ClientOrderIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_prefixed_and_unique() {
        let ids = ClientOrderIdGenerator::new();
        let pair = TradingPair::new("ADA", "MIN");

        let buy = ids.next_id(OrderKind::Trade, Side::Buy, &pair);
        let sell = ids.next_id(OrderKind::Trade, Side::Sell, &pair);
        let approve = ids.next_id(OrderKind::Approval, Side::Buy, &pair);

        assert!(buy.starts_with("buy-ADA-MIN-0"));
        assert!(sell.starts_with("sell-ADA-MIN-1"));
        assert!(approve.starts_with("approve-ADA-MIN-2"));
        assert_ne!(buy, sell);
        assert!(ids.next_id(OrderKind::Trade, Side::Buy, &pair).starts_with("buy-ADA-MIN-3"));
    }

    #[test]
    fn generators_do_not_collide() {
        let pair = TradingPair::new("ADA", "MIN");
        let a = ClientOrderIdGenerator::new().next_id(OrderKind::Trade, Side::Buy, &pair);
        let b = ClientOrderIdGenerator::new().next_id(OrderKind::Trade, Side::Buy, &pair);
        assert_ne!(a, b);
    }
}
