//! Connector runner: wires the engine to a live gateway and keeps order
//! state on disk between runs.
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use gateway_amm_connector::{
    ConnectorConfig, EventSink, GatewayConnector, HttpGatewayClient, OrderEvent, OrderRecord,
};

const CONFIG_ENV: &str = "GATEWAY_CONNECTOR_CONFIG";
const STATE_ENV: &str = "GATEWAY_CONNECTOR_STATE";
const STATS_INTERVAL: Duration = Duration::from_secs(30);
const TERMINAL_RETENTION_HOURS: i64 = 24;

fn load_state(path: &Path) -> Result<BTreeMap<String, OrderRecord>> {
    if !path.exists() {
        return Ok(BTreeMap::new());
    }
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

fn save_state(path: &Path, states: &BTreeMap<String, OrderRecord>) -> Result<()> {
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, serde_json::to_vec_pretty(states)?)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

async fn log_events(mut rx: tokio::sync::broadcast::Receiver<OrderEvent>) {
    loop {
        match rx.recv().await {
            Ok(OrderEvent::Filled(fill)) => info!(
                "[FILL] {} {} {} {} @ {} | fee {} {}",
                fill.client_order_id,
                fill.side,
                fill.amount,
                fill.trading_pair,
                fill.price,
                fill.fee,
                fill.fee_asset.as_deref().unwrap_or("?")
            ),
            Ok(OrderEvent::ApprovalConfirmed { client_order_id, token, .. }) => {
                info!("[APPROVE] {} approved ({})", token, client_order_id)
            }
            Ok(OrderEvent::Failed { client_order_id, reason }) => {
                warn!("[FAIL] {}: {}", client_order_id, reason.as_deref().unwrap_or("unknown"))
            }
            Ok(_) => {}
            Err(RecvError::Lagged(n)) => warn!("[EVENTS] dropped {} events", n),
            Err(RecvError::Closed) => break,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let level = std::env::var("RUST_LOG")
        .ok()
        .and_then(|raw| tracing::Level::from_str(&raw).ok())
        .unwrap_or(tracing::Level::INFO);
    tracing_subscriber::fmt().with_max_level(level).with_target(false).init();

    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var(CONFIG_ENV).ok())
        .with_context(|| format!("usage: gateway_amm_connector <config.toml> (or set {})", CONFIG_ENV))?;
    let config = ConnectorConfig::load(&config_path)?;
    info!(
        "═══ {} on {}/{} via {} ═══",
        config.connector, config.chain, config.network, config.gateway_url
    );

    let gateway = Arc::new(HttpGatewayClient::new(&config.gateway_url, config.request_timeout())?);
    let events = EventSink::new(config.event_capacity);
    tokio::spawn(log_events(events.subscribe()));
    let connector = GatewayConnector::new(config, gateway, events)?;

    if !connector.check_network().await {
        warn!("[GATEWAY] not reachable yet, continuing; transport errors will be retried");
    }

    let state_path = std::env::var(STATE_ENV).ok().map(PathBuf::from);
    if let Some(path) = &state_path {
        let restored = connector.restore_tracking_states(load_state(path)?).await;
        info!("[STATE] {} orders restored from {}", restored, path.display());
    }

    connector.start().await?;

    let mut stats = tokio::time::interval(STATS_INTERVAL);
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("[SHUTDOWN] signal received");
                break;
            }
            _ = stats.tick() => {
                connector
                    .purge_terminal(chrono::Duration::hours(TERMINAL_RETENTION_HOURS))
                    .await;
                connector.order_stats().await.log();

                let status = connector.status_dict().await;
                let balances = connector.balances().await;
                let summary: Vec<String> = balances.iter().map(|(t, b)| format!("{} {}", b.total, t)).collect();
                info!("[BAL] ready={} | {}", status.is_ready(), summary.join(", "));

                if let Some(path) = &state_path {
                    if let Err(e) = save_state(path, &connector.tracking_states().await) {
                        warn!("[STATE] save failed: {:#}", e);
                    }
                }
            }
        }
    }

    connector.stop().await?;
    if let Some(path) = &state_path {
        save_state(path, &connector.tracking_states().await)?;
        info!("[STATE] saved to {}", path.display());
    }
    Ok(())
}
