use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use log::{error, info, warn};
use tokio_util::sync::CancellationToken;

use ariawatch::{
    AlertEngine, ClientConfig, PushClient, RealtimeMonitor, RestClient, SimulationController,
    WebSocketTransport,
};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("ariawatch.json"));
    let config = ClientConfig::load(&config_path).context("failed to load configuration")?;
    info!("api: {}  hub: {}", config.api_base_url, config.hub_url);

    let rest = RestClient::new(&config.api_base_url);
    let push = PushClient::new(
        Arc::new(WebSocketTransport),
        &config.hub_url,
        config.max_reconnect_attempts,
        config.reconnect_base_delay(),
        config.reconnect_max_delay(),
    );
    let simulation = SimulationController::new(rest.clone());
    let alerts = AlertEngine::new(
        rest.clone(),
        config.active_alert_capacity,
        config.email_log_capacity,
    );
    let monitor = RealtimeMonitor::new(
        rest.clone(),
        push,
        simulation,
        alerts.clone(),
        &config,
    );

    monitor.install_callbacks().await;
    monitor.connect().await?;

    let points = match rest.points().await {
        Ok(points) => points,
        Err(err) => {
            warn!("point discovery failed, nothing to subscribe: {err:#}");
            Vec::new()
        }
    };
    for punto in &points {
        if let Err(err) = monitor.subscribe(punto).await {
            error!("subscription for {punto} failed: {err:#}");
        }
    }
    info!("following {} monitoring points", points.len());

    let shutdown = CancellationToken::new();
    let poller = alerts.spawn_polling(config.alert_poll_interval(), shutdown.clone());

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutting down");

    shutdown.cancel();
    let _ = poller.await;
    monitor.disconnect().await?;
    Ok(())
}
