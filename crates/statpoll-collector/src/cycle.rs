use crate::catalog::{ResolvedCatalog, ValueKind, VersionedCatalog};
use crate::derivative::{DerivativeTracker, FirstObservation};
use crate::snapshot::{resolve_all, Resolution, Snapshot};
use crate::source::{FetchFailure, SourceAdapter};
use crate::{Collector, CycleReport};
use chrono::{DateTime, Utc};
use statpoll_common::path::MetricPath;
use statpoll_common::types::{MetricSink, NormalizedSample};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// One configured source: adapter, catalog and the counter history that
/// belongs to it.
pub struct PollingCollector {
    name: String,
    adapter: Box<dyn SourceAdapter>,
    catalog: Arc<VersionedCatalog>,
    version: Option<String>,
    path: MetricPath,
    fetch_timeout: Duration,
    tracker: DerivativeTracker,
}

impl PollingCollector {
    pub fn new(
        name: impl Into<String>,
        adapter: Box<dyn SourceAdapter>,
        catalog: Arc<VersionedCatalog>,
        path: MetricPath,
    ) -> Self {
        Self {
            name: name.into(),
            adapter,
            catalog,
            version: None,
            path,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            tracker: DerivativeTracker::new(),
        }
    }

    /// Version hint used to pick the catalog overlay.
    pub fn with_version(mut self, version: Option<String>) -> Self {
        self.version = version.filter(|v| !v.is_empty());
        self
    }

    /// Upper bound for a whole fetch, on top of per-call adapter timeouts.
    pub fn with_fetch_timeout(mut self, fetch_timeout: Duration) -> Self {
        self.fetch_timeout = fetch_timeout;
        self
    }

    pub fn with_first_observation(mut self, first: FirstObservation) -> Self {
        self.tracker = DerivativeTracker::with_first_observation(first);
        self
    }

    pub fn metric_path(&self) -> &MetricPath {
        &self.path
    }

    pub fn tracker(&self) -> &DerivativeTracker {
        &self.tracker
    }

    /// Runs one full cycle: fetch, resolve, derive, publish.
    ///
    /// Never fails: a failed or timed-out fetch publishes nothing and the
    /// next scheduled cycle is the retry.
    pub async fn run_cycle(&mut self, sink: &dyn MetricSink) -> CycleReport {
        let catalog = self.catalog.resolve(self.version.as_deref());
        if let Some(version) = self.version.as_deref() {
            if !self.catalog.knows(version) {
                tracing::debug!(
                    collector = %self.name,
                    version,
                    "unknown source version, using latest catalog"
                );
            }
        }

        let snapshot = match self.fetch().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::warn!(
                    collector = %self.name,
                    adapter = self.adapter.name(),
                    error = %e,
                    "fetch failed, skipping cycle"
                );
                return CycleReport {
                    fetch_failed: true,
                    ..CycleReport::default()
                };
            }
        };

        let report = self.process(&catalog, &snapshot, Utc::now(), sink);
        tracing::debug!(
            collector = %self.name,
            emitted = report.emitted,
            missed = report.missed,
            "collection cycle finished"
        );
        report
    }

    async fn fetch(&self) -> Result<Snapshot, FetchFailure> {
        match timeout(self.fetch_timeout, self.adapter.fetch()).await {
            Ok(result) => result,
            Err(_) => Err(FetchFailure::Timeout(self.fetch_timeout)),
        }
    }

    /// Resolves every catalog entry against `snapshot` and publishes the
    /// survivors.
    pub fn process(
        &mut self,
        catalog: &ResolvedCatalog,
        snapshot: &Snapshot,
        now: DateTime<Utc>,
        sink: &dyn MetricSink,
    ) -> CycleReport {
        let mut report = CycleReport::default();

        for def in catalog.iter() {
            for branch in resolve_all(snapshot, &def.path) {
                let reading = match branch.resolution {
                    Resolution::Found(reading) => reading,
                    Resolution::NotFound => {
                        tracing::debug!(collector = %self.name, stat = %def.name, "value not found");
                        report.missed += 1;
                        continue;
                    }
                    Resolution::Malformed(reason) => {
                        tracing::debug!(
                            collector = %self.name,
                            stat = %def.name,
                            reason = %reason,
                            "value is not numeric"
                        );
                        report.missed += 1;
                        continue;
                    }
                };

                let path = self.path.join(&def.output_name(&branch.captures));
                let (value, timestamp) = match def.kind {
                    ValueKind::Counter => {
                        let delta = self.tracker.derive(&path, reading, def.wrap, now);
                        (delta, Some(now))
                    }
                    ValueKind::Gauge | ValueKind::Percent | ValueKind::Bytes => {
                        (reading.as_f64(), None)
                    }
                };
                let value = def.unit.map_or(value, |unit| unit.apply(value));

                match NormalizedSample::new(path, value, timestamp) {
                    Some(sample) => {
                        sink.publish(sample);
                        report.emitted += 1;
                    }
                    None => report.missed += 1,
                }
            }
        }

        report
    }
}

#[async_trait::async_trait]
impl Collector for PollingCollector {
    fn name(&self) -> &str {
        &self.name
    }

    async fn collect(&mut self, sink: &dyn MetricSink) -> CycleReport {
        self.run_cycle(sink).await
    }
}
