/**
 * FLEET KERNEL - Point d'entrée du serveur de coordination
 *
 * RÔLE : Bootstrap : config, logging, stores, hub MQTT, boucles de dispatch et
 * de surveillance, API HTTP. Ctrl-C arrête le serveur puis les boucles.
 */

use anyhow::{Context, Result};
use fleet_kernel::config::load_config;
use fleet_kernel::http::{build_router, AppState};
use fleet_kernel::logging::init_logging;
use fleet_kernel::mqtt::{create_mqtt_client, MqttHub, MqttTransport};
use fleet_kernel::store::{CommandStore, InMemoryCommandStore, InMemoryNodeStore, NodeStore};
use fleet_kernel::{CommandDispatcher, ConnectionRegistry, HealthMonitor, HealthTracker, QualityTracker};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let config = load_config().await.context("failed to load kernel config")?;
    init_logging(&config.log_level);
    info!(bind = %config.http.bind, broker = %config.mqtt.host, "fleet kernel starting");

    // Stores
    tokio::fs::create_dir_all(&config.data_dir)
        .await
        .with_context(|| format!("failed to create data dir {}", config.data_dir.display()))?;
    let node_store = InMemoryNodeStore::new().with_data_file(config.nodes_file());
    let restored = node_store.load().await.context("failed to load persisted nodes")?;
    info!(count = restored, "nodes restored");
    let nodes: Arc<dyn NodeStore> = Arc::new(node_store);
    let commands: Arc<dyn CommandStore> = Arc::new(InMemoryCommandStore::new(config.commands.queue_policy()));

    let registry = Arc::new(ConnectionRegistry::new());
    let quality = Arc::new(
        QualityTracker::new(config.windows.latency_capacity).context("invalid latency window capacity")?,
    );
    let health = HealthTracker::new();
    let shutdown = CancellationToken::new();

    // MQTT
    let (client, eventloop) = create_mqtt_client(&config.mqtt);
    let hub = Arc::new(MqttHub::new(
        Arc::clone(&registry),
        Arc::clone(&nodes),
        Arc::clone(&commands),
        Arc::clone(&quality),
        health.clone(),
    ));
    let hub_task = hub.spawn(client.clone(), eventloop, shutdown.child_token());
    let transport = Arc::new(MqttTransport::new(client.clone()));

    // Boucles périodiques
    let dispatcher = Arc::new(CommandDispatcher::new(
        Arc::clone(&registry),
        Arc::clone(&commands),
        transport,
        &config.dispatch,
    ));
    let monitor = Arc::new(HealthMonitor::new(Arc::clone(&nodes), Arc::clone(&registry), &config.health));
    let dispatch_task = dispatcher.spawn(&shutdown);
    let monitor_task = monitor.spawn(&shutdown);

    // HTTP
    let app = build_router(AppState {
        registry,
        nodes,
        commands,
        quality,
        health,
    });
    let listener = TcpListener::bind(config.http.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.http.bind))?;
    info!(addr = %config.http.bind, "HTTP API listening");

    let http_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for ctrl-c");
            }
            info!("shutdown requested");
            http_shutdown.cancel();
        })
        .await
        .context("HTTP server error")?;

    shutdown.cancel();
    for task in [dispatch_task, monitor_task] {
        let name = task.name();
        task.stop().await;
        info!(task = name, "background loop joined");
    }
    if let Err(e) = client.disconnect().await {
        warn!(error = %e, "MQTT disconnect failed");
    }
    if let Err(e) = hub_task.await {
        warn!(error = %e, "MQTT hub task ended abnormally");
    }
    info!("fleet kernel stopped");
    Ok(())
}
