use clap::Parser;
use dataset_cluster::cluster::ClusterNode;
use dataset_cluster::config::{NodeConfig, Profile};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const STATS_INTERVAL: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = NodeConfig::parse();

    tracing::info!("Starting node on {} ({:?} profile)", config.bind, config.profile);
    if config.profile == Profile::Clustered {
        if !config.seeds.is_empty() {
            tracing::info!("Seed nodes: {:?}", config.seeds);
        } else {
            tracing::info!("Starting as seed node (founder)");
        }
    }

    // 1. Membership, ownership, entities, router, coordinator:
    let node = ClusterNode::start(&config).await?;
    tracing::info!("Node ID: {}", node.local_id());

    // 2. HTTP Router:
    let app = node.http_router();

    // 3. Spawn stats reporter:
    let stats_directory = node.directory.clone();
    let stats_registry = node.registry.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(STATS_INTERVAL);

        loop {
            interval.tick().await;
            let view = stats_directory.current_view();
            tracing::info!(
                "Cluster stats: view v{} with {} reachable / {} unreachable node(s), authoritative={}, {} active entit(ies)",
                view.version,
                view.reachable().len(),
                view.unreachable().len(),
                view.authoritative,
                stats_registry.active_count()
            );
            for member in &view.members {
                tracing::debug!(
                    "  - {} gossip={} http={} reachable={} role={:?}",
                    member.id,
                    member.gossip_addr,
                    member.http_addr,
                    member.reachable,
                    member.role
                );
            }
        }
    });

    // 4. Start HTTP server:
    let http_addr = config.http_addr();
    tracing::info!("HTTP server listening on {}", http_addr);
    tracing::info!("Press Ctrl+C to shutdown");

    let listener = tokio::net::TcpListener::bind(http_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
            }
        })
        .await?;

    // 5. Leave gracefully so peers take over our datasets:
    tracing::info!("Shutting down, leaving cluster");
    node.leave().await;

    Ok(())
}
