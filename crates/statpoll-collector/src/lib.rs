//! Polling collector runtime.
//!
//! A [`cycle::PollingCollector`] pairs a [`source::SourceAdapter`] with a
//! [`catalog::VersionedCatalog`]. Each cycle fetches one
//! [`snapshot::Snapshot`], resolves every catalog entry against it, turns
//! counters into deltas through a [`derivative::DerivativeTracker`] and
//! publishes [`NormalizedSample`](statpoll_common::types::NormalizedSample)s
//! to a sink.

pub mod catalog;
pub mod cycle;
pub mod derivative;
pub mod snapshot;
pub mod source;


use statpoll_common::types::MetricSink;

/// Outcome counters for one collection cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub emitted: usize,
    /// Entries skipped because the value was absent or not numeric.
    pub missed: usize,
    pub fetch_failed: bool,
}

/// A metric source driven by the scheduler.
///
/// The scheduler calls `collect` once per interval and never runs two calls
/// for the same collector concurrently, so implementations may keep mutable
/// per-instance state without locking.
#[async_trait::async_trait]
pub trait Collector: Send {
    /// Instance name used for logging (e.g. `"snmp_interface:core-sw1"`).
    fn name(&self) -> &str;

    async fn collect(&mut self, sink: &dyn MetricSink) -> CycleReport;
}
