use anyhow::{Context, Result};
use statpoll_agent::config::AgentConfig;
use statpoll_agent::scheduler::Scheduler;
use statpoll_agent::sink::{self, BufferedSink};
use statpoll_sources::build_collectors;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;

#[tokio::main]
async fn main() -> Result<()> {
    statpoll_agent::init_tracing()?;

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config/agent.toml".to_string());
    let config = AgentConfig::load(&config_path)
        .with_context(|| format!("failed to load config from {config_path}"))?;

    tracing::info!(path = %config_path, "statpoll agent starting");

    let sink = Arc::new(BufferedSink::new(config.sink.buffer_max_size));
    let mut scheduler = Scheduler::new();

    for entry in config.enabled_collectors() {
        let schedule = entry.schedule(&config.defaults);
        let collectors = build_collectors(&entry.source)
            .with_context(|| format!("failed to set up {} collector", entry.source.kind()))?;
        for collector in collectors {
            scheduler.spawn(Box::new(collector), schedule, sink.clone());
        }
    }

    if scheduler.is_empty() {
        tracing::warn!("No collectors enabled");
    } else {
        tracing::info!(instances = scheduler.len(), "Collectors started");
    }

    let (writer_tx, writer_rx) = watch::channel(false);
    let writer = tokio::spawn(sink::run_writer(
        sink.clone(),
        Duration::from_secs(config.sink.flush_interval_secs),
        tokio::io::stdout(),
        writer_rx,
    ));

    signal::ctrl_c().await?;
    tracing::info!("Shutting down gracefully");

    scheduler.shutdown().await;
    let _ = writer_tx.send(true);
    writer.await??;
    Ok(())
}
