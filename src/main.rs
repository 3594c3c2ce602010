//! Process bootstrap: logging, config, store connection, the supervised
//! stream-processor task, and the HTTP surface. Shutdown is cooperative:
//! ctrl-c cancels the token, the HTTP server drains, and the processor
//! finishes its in-flight transaction before exiting.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use txsentinel::config::MonitorConfig;
use txsentinel::metrics::Metrics;
use txsentinel::server;
use txsentinel::store::{RedisStore, StateStore};
use txsentinel::stream::{MockMempoolFeed, StreamProcessor};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,txsentinel=debug"));
    fmt().with_env_filter(filter).with_target(true).init();

    let config = MonitorConfig::from_env();
    info!(redis_url = %config.redis_url, listen_addr = %config.listen_addr, "starting txsentinel");

    let metrics = Arc::new(Metrics::new()?);
    let store: Arc<dyn StateStore> = Arc::new(RedisStore::connect(&config.redis_url).await?);

    let cancel = CancellationToken::new();

    let processor = StreamProcessor::new(store, metrics.clone());
    let feed_config = config.feed_config();
    let processor_cancel = cancel.clone();
    let processor_task = tokio::spawn(async move {
        let mut feed = MockMempoolFeed::new(feed_config);
        processor.run(&mut feed, processor_cancel).await;
    });

    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            signal_cancel.cancel();
        }
    });

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!(addr = %config.listen_addr, "serving /healthz and /metrics");
    axum::serve(listener, server::router(metrics))
        .with_graceful_shutdown(cancel.clone().cancelled_owned())
        .await?;

    processor_task.await?;
    info!("txsentinel stopped");
    Ok(())
}
