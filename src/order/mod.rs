//! Order tracking: records, the lifecycle state machine and the registry.

pub mod client_id;
pub mod record;
pub mod registry;

pub use client_id::ClientOrderIdGenerator;
pub use record::{OrderKind, OrderRecord, OrderState, Side, TradingPair};
pub use registry::{
    new_shared_registry, OrderRegistry, OrderStats, OrderUpdate, RegistryConfig, SharedRegistry,
    UpdateOutcome, DEFAULT_NOT_FOUND_LIMIT, LOST_REASON, UNRESOLVED_REASON,
};
