//! Runs each configured collector for a fixed number of cycles and prints
//! the samples, without the scheduler.
//!
//! Usage: `statpoll-probe [config] [cycles]`. With more than one cycle the
//! probe waits one collector interval between cycles so counters have a
//! previous observation to derive from.

use anyhow::{Context, Result};
use chrono::Utc;
use statpoll_agent::config::AgentConfig;
use statpoll_collector::Collector;
use statpoll_common::types::MemorySink;
use statpoll_sources::build_collectors;

#[tokio::main]
async fn main() -> Result<()> {
    statpoll_agent::init_tracing()?;

    let mut args = std::env::args().skip(1);
    let config_path = args
        .next()
        .unwrap_or_else(|| "config/agent.toml".to_string());
    let cycles: u32 = match args.next() {
        Some(n) => n.parse().context("cycles must be a positive integer")?,
        None => 1,
    };
    let config = AgentConfig::load(&config_path)
        .with_context(|| format!("failed to load config from {config_path}"))?;

    let sink = MemorySink::new();
    for entry in config.enabled_collectors() {
        let schedule = entry.schedule(&config.defaults);
        let mut collectors = build_collectors(&entry.source)
            .with_context(|| format!("failed to set up {} collector", entry.source.kind()))?;

        for round in 1..=cycles {
            if round > 1 {
                tokio::time::sleep(schedule.interval).await;
            }
            for collector in &mut collectors {
                let report = collector.collect(&sink).await;
                println!(
                    "# {} cycle {round}: emitted={} missed={} fetch_failed={}",
                    collector.name(),
                    report.emitted,
                    report.missed,
                    report.fetch_failed
                );
                let now = Utc::now();
                for sample in sink.take() {
                    println!("{}", sample.to_plaintext(now));
                }
            }
        }
    }
    Ok(())
}
