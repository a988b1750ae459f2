//! Per-instance collection loops.
//!
//! Each collector instance gets its own task. The first cycle waits a random
//! splay so instances configured together do not fire together, and cycles
//! run inline in the task, so a slow cycle delays the next tick instead of
//! overlapping with it.

use crate::config::Schedule;
use rand::Rng;
use statpoll_collector::Collector;
use statpoll_common::types::MetricSink;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

pub struct Scheduler {
    shutdown: watch::Sender<bool>,
    tasks: Vec<(String, JoinHandle<()>)>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            shutdown,
            tasks: Vec::new(),
        }
    }

    /// Starts the loop for one collector instance.
    pub fn spawn(
        &mut self,
        collector: Box<dyn Collector>,
        schedule: Schedule,
        sink: Arc<dyn MetricSink>,
    ) {
        let name = collector.name().to_string();
        let rx = self.shutdown.subscribe();
        let handle = tokio::spawn(run_instance(collector, schedule, sink, rx));
        self.tasks.push((name, handle));
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Stops every loop. An in-flight cycle is abandoned, not awaited.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for (name, handle) in self.tasks {
            if let Err(e) = handle.await {
                tracing::error!(collector = %name, error = %e, "Collector task ended abnormally");
            }
        }
    }
}

/// Random delay in `[0, max]` applied before an instance's first cycle.
pub fn initial_splay(max: Duration) -> Duration {
    let max_ms = u64::try_from(max.as_millis()).unwrap_or(u64::MAX);
    if max_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
}

async fn run_instance(
    mut collector: Box<dyn Collector>,
    schedule: Schedule,
    sink: Arc<dyn MetricSink>,
    mut shutdown: watch::Receiver<bool>,
) {
    let name = collector.name().to_string();
    let splay = initial_splay(schedule.splay_max);
    tracing::info!(
        collector = %name,
        interval_secs = schedule.interval.as_secs(),
        splay_ms = splay.as_millis() as u64,
        "Collector scheduled"
    );

    tokio::select! {
        _ = shutdown.changed() => return,
        _ = tokio::time::sleep(splay) => {}
    }

    let mut ticker = interval(schedule.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {}
        }

        tokio::select! {
            biased;
            _ = shutdown.changed() => {
                tracing::debug!(collector = %name, "Abandoning in-flight cycle");
                break;
            }
            report = collector.collect(sink.as_ref()) => {
                if report.fetch_failed {
                    tracing::debug!(collector = %name, "Cycle produced no samples");
                } else {
                    tracing::debug!(
                        collector = %name,
                        emitted = report.emitted,
                        missed = report.missed,
                        "Cycle complete"
                    );
                }
            }
        }
    }

    tracing::info!(collector = %name, "Collector stopped");
}
