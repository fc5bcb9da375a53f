//! Demo reward server: in-memory catalog with a single `demo_block` placement.

use std::time::Duration;

use reward_sessions::server::reward_routes;
use reward_sessions::{
    Creative, Dispatcher, HttpTransport, InMemoryCatalog, InMemorySessionStore, Placement,
    RewardConfig, RewardService,
};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use url::Url;

const PURGE_INTERVAL: Duration = Duration::from_secs(10 * 60);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = RewardConfig::from_env()?;
    let bind_addr = std::env::var("REWARD_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".into());
    let callback_url: Url = std::env::var("REWARD_DEMO_CALLBACK_URL")
        .unwrap_or_else(|_| "http://127.0.0.1:9000/reward".into())
        .parse()?;

    let catalog = InMemoryCatalog::new().with_placement(
        "demo_block",
        Placement::new(
            callback_url,
            vec![
                Creative::new(
                    "demo-15s",
                    "https://cdn.example.com/ads/demo-15s.mp4".parse()?,
                    15,
                ),
                Creative::new(
                    "demo-30s",
                    "https://cdn.example.com/ads/demo-30s.mp4".parse()?,
                    30,
                ),
            ],
        ),
    );

    let transport = HttpTransport::new(config.postback().request_timeout())?;
    let (queue, dispatcher) = Dispatcher::new(transport, config.postback().retry().clone())
        .spawn(config.postback().queue_capacity());

    let service = RewardService::new(&config, catalog, InMemorySessionStore::new(), queue)?;

    let purger = service.clone();
    let purge_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(PURGE_INTERVAL);
        loop {
            ticker.tick().await;
            match purger.purge_expired().await {
                Ok(0) => {}
                Ok(purged) => info!(purged, "Purged expired sessions"),
                Err(e) => error!(error = %e, "Session purge failed"),
            }
        }
    });

    let app = reward_routes(service);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, "Reward server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for shutdown signal");
            }
            info!("Shutdown signal received");
        })
        .await?;

    purge_task.abort();
    let report = dispatcher.shutdown().await?;
    info!(
        delivered = report.delivered,
        failed = report.failed.len(),
        "Reward server stopped"
    );
    Ok(())
}
