//! Balance Reconciliation - keeps local balances in sync with the gateway
//!
//! Every successful pass replaces the local map with the remote snapshot,
//! token by token: tokens missing from the snapshot are dropped.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::GatewayError;
use crate::gateway::{BalanceValue, BalancesRequest, GatewayClient};
use crate::order::TradingPair;

// ============================================================================
// Balance Map
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenBalance {
    pub total: Decimal,
    pub available: Decimal,
}

/// token symbol -> balance; only ever built from a remote snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BalanceMap {
    entries: BTreeMap<String, TokenBalance>,
}

impl BalanceMap {
    pub fn from_snapshot(snapshot: &HashMap<String, BalanceValue>) -> Self {
        let mut entries = BTreeMap::new();
        for (token, value) in snapshot {
            match value.amount() {
                Some(amount) => {
                    entries.insert(
                        token.clone(),
                        TokenBalance {
                            total: amount,
                            available: amount,
                        },
                    );
                }
                None => warn!("[BAL] ignoring invalid balance for {}: {:?}", token, value),
            }
        }
        Self { entries }
    }

    pub fn get(&self, token: &str) -> Option<TokenBalance> {
        self.entries.get(token).copied()
    }

    pub fn total(&self, token: &str) -> Decimal {
        self.get(token).map(|b| b.total).unwrap_or(Decimal::ZERO)
    }

    pub fn available(&self, token: &str) -> Decimal {
        self.get(token).map(|b| b.available).unwrap_or(Decimal::ZERO)
    }

    pub fn tokens(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &TokenBalance)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Tokens added, removed and changed going from `self` to `next`
    pub fn diff(&self, next: &BalanceMap) -> BalanceDiff {
        let mut diff = BalanceDiff::default();
        for (token, balance) in &next.entries {
            match self.entries.get(token) {
                None => diff.added.push(token.clone()),
                Some(prev) if prev != balance => diff.changed.push(token.clone()),
                Some(_) => {}
            }
        }
        for token in self.entries.keys() {
            if !next.entries.contains_key(token) {
                diff.removed.push(token.clone());
            }
        }
        diff
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BalanceDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub changed: Vec<String>,
}

// ============================================================================
// Shared State
// ============================================================================

/// Reconciler output readable without waiting for a pass in progress.
#[derive(Debug, Default)]
pub struct BalanceState {
    /// `None` until the first successful pass
    balances: RwLock<Option<BalanceMap>>,
    native_currency: RwLock<Option<String>>,
}

impl BalanceState {
    pub fn with_native_currency(native: String) -> Self {
        Self {
            balances: RwLock::new(None),
            native_currency: RwLock::new(Some(native)),
        }
    }

    pub async fn balances(&self) -> BalanceMap {
        self.balances.read().await.clone().unwrap_or_default()
    }

    pub async fn is_loaded(&self) -> bool {
        self.balances.read().await.is_some()
    }

    pub async fn native_currency(&self) -> Option<String> {
        self.native_currency.read().await.clone()
    }

    pub(crate) async fn set_native_currency(&self, native: String) {
        *self.native_currency.write().await = Some(native);
    }

    /// Swap in a new map, returning what changed
    async fn replace(&self, next: BalanceMap) -> BalanceDiff {
        let mut guard = self.balances.write().await;
        let diff = guard.as_ref().map(|prev| prev.diff(&next)).unwrap_or_else(|| BalanceDiff {
            added: next.tokens().map(str::to_string).collect(),
            ..Default::default()
        });
        *guard = Some(next);
        diff
    }
}

pub type SharedBalanceState = Arc<BalanceState>;

// ============================================================================
// Reconciler
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Debounced: the last pass is too recent
    Skipped,
    /// Native currency still unknown
    Deferred,
    Applied(BalanceDiff),
}

pub struct BalanceReconciler {
    gateway: Arc<dyn GatewayClient>,
    chain: String,
    network: String,
    wallet_address: String,
    /// pair tokens and explicitly configured tokens
    tracked_tokens: BTreeSet<String>,
    native_currency: Option<String>,
    state: SharedBalanceState,
    last_sync: Option<Instant>,
    sync_interval: Duration,
}

impl BalanceReconciler {
    pub fn new(
        gateway: Arc<dyn GatewayClient>,
        chain: String,
        network: String,
        wallet_address: String,
        trading_pairs: &[TradingPair],
        tokens: &[String],
        sync_interval: Duration,
    ) -> Self {
        let tracked_tokens = trading_pairs
            .iter()
            .flat_map(|p| [p.base.clone(), p.quote.clone()])
            .chain(tokens.iter().map(|t| t.to_uppercase()))
            .collect();

        Self {
            gateway,
            chain,
            network,
            wallet_address,
            tracked_tokens,
            native_currency: None,
            state: Arc::new(BalanceState::default()),
            last_sync: None,
            sync_interval,
        }
    }

    /// Skip the network status lookup
    pub fn with_native_currency(mut self, native_currency: Option<String>) -> Self {
        if let Some(native) = native_currency {
            self.state = Arc::new(BalanceState::with_native_currency(native.clone()));
            self.native_currency = Some(native);
        }
        self
    }

    pub fn state(&self) -> SharedBalanceState {
        self.state.clone()
    }

    pub fn should_sync(&self) -> bool {
        self.last_sync
            .map_or(true, |last| last.elapsed() >= self.sync_interval)
    }

    pub fn tokens_of_interest(&self) -> BTreeSet<String> {
        let mut tokens = self.tracked_tokens.clone();
        if let Some(native) = &self.native_currency {
            tokens.insert(native.clone());
        }
        tokens
    }

    /// Resolve the native currency once; failures are reported and retried next pass.
    pub async fn ensure_native_currency(&mut self) -> Option<String> {
        if let Some(native) = &self.native_currency {
            return Some(native.clone());
        }

        match self.gateway.get_network_status(&self.chain, &self.network).await {
            Ok(status) => {
                info!(
                    "[BAL] native currency for {}/{} is {}",
                    self.chain, self.network, status.native_currency
                );
                self.state.set_native_currency(status.native_currency.clone()).await;
                self.native_currency = Some(status.native_currency.clone());
                Some(status.native_currency)
            }
            Err(e) => {
                warn!(
                    "[BAL] cannot resolve native currency for {}/{}: {}",
                    self.chain, self.network, e
                );
                None
            }
        }
    }

    /// One reconciliation pass. `force` bypasses the debounce interval.
    pub async fn reconcile(&mut self, force: bool) -> Result<ReconcileOutcome, GatewayError> {
        if !force && !self.should_sync() {
            return Ok(ReconcileOutcome::Skipped);
        }
        if self.ensure_native_currency().await.is_none() {
            debug!("[BAL] deferring reconciliation until native currency is known");
            return Ok(ReconcileOutcome::Deferred);
        }

        let req = BalancesRequest {
            chain: self.chain.clone(),
            network: self.network.clone(),
            address: self.wallet_address.clone(),
            token_symbols: self.tokens_of_interest().into_iter().collect(),
        };
        let resp = match self.gateway.get_balances(&req).await {
            Ok(resp) => resp,
            Err(e) => {
                warn!(
                    "[BAL] balance fetch failed for {} on {}/{}: {}",
                    self.wallet_address, self.chain, self.network, e
                );
                return Err(e);
            }
        };

        let next = BalanceMap::from_snapshot(&resp.balances);
        let diff = self.state.replace(next).await;
        self.last_sync = Some(Instant::now());

        if !diff.removed.is_empty() {
            info!("[BAL] dropped stale balances: {:?}", diff.removed);
        }
        debug!(
            "[BAL] synced: {} added, {} changed, {} removed",
            diff.added.len(),
            diff.changed.len(),
            diff.removed.len()
        );
        Ok(ReconcileOutcome::Applied(diff))
    }
}
