//! Marathon `/metrics` (Dropwizard registry dump).
//!
//! Each group maps a metric name to an object of sub-metrics. Output names
//! are `name.sub_metric`; non-numeric sub-metrics such as `units` are
//! skipped during resolution.

use statpoll_collector::catalog::{CatalogError, StatDefinition, ValueKind, VersionedCatalog};
use statpoll_collector::snapshot::PathSegment;

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 5052;
pub const METRICS_PATH: &str = "metrics";

pub const GROUPS: &[&str] = &["gauges", "histograms", "meters", "timers", "counters"];

pub fn catalog() -> Result<VersionedCatalog, CatalogError> {
    VersionedCatalog::fixed(GROUPS.iter().map(|group| {
        StatDefinition::new(
            *group,
            ValueKind::Gauge,
            [PathSegment::from(*group), PathSegment::Any, PathSegment::Any],
        )
        .unlabeled()
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use statpoll_collector::cycle::PollingCollector;
    use statpoll_collector::snapshot::Snapshot;
    use statpoll_collector::source::{FetchFailure, SourceAdapter};
    use statpoll_common::path::MetricPath;
    use statpoll_common::types::MemorySink;
    use std::sync::Arc;

    struct NoFetch;

    #[async_trait::async_trait]
    impl SourceAdapter for NoFetch {
        fn name(&self) -> &str {
            "none"
        }

        async fn fetch(&self) -> Result<Snapshot, FetchFailure> {
            Err(FetchFailure::Transport("unused".into()))
        }
    }

    #[test]
    fn groups_flatten_to_name_and_sub_metric() {
        let catalog = Arc::new(catalog().unwrap());
        let resolved = catalog.resolve(None);
        let mut collector = PollingCollector::new(
            "marathon",
            Box::new(NoFetch),
            catalog,
            MetricPath::new("servers", "m1", "marathon"),
        );
        let snapshot = Snapshot::new(json!({
            "version": "3.0.0",
            "gauges": {"jvm.memory.heap.used": {"value": 1024}},
            "meters": {"service.requests": {"count": 7, "mean_rate": 0.5, "units": "events/second"}},
            "counters": {"tasks.launched": {"count": 0}}
        }));

        let sink = MemorySink::new();
        let report = collector.process(&resolved, &snapshot, Utc::now(), &sink);
        let mut paths: Vec<String> = sink.take().into_iter().map(|s| s.path).collect();
        paths.sort();

        assert_eq!(
            paths,
            vec![
                "servers.m1.marathon.jvm.memory.heap.used.value",
                "servers.m1.marathon.service.requests.count",
                "servers.m1.marathon.service.requests.mean_rate",
                "servers.m1.marathon.tasks.launched.count",
            ]
        );
        // `units` string plus the missing histograms and timers groups.
        assert_eq!(report.missed, 3);
    }

    #[test]
    fn numeric_looking_string_gauges_are_skipped() {
        let catalog = Arc::new(catalog().unwrap());
        let resolved = catalog.resolve(None);
        let mut collector = PollingCollector::new(
            "marathon",
            Box::new(NoFetch),
            catalog,
            MetricPath::new("servers", "m1", "marathon"),
        );
        let snapshot = Snapshot::new(json!({
            "gauges": {
                "build.version": {"value": "42"},
                "jvm.threads.count": {"value": 12}
            }
        }));

        let sink = MemorySink::new();
        collector.process(&resolved, &snapshot, Utc::now(), &sink);
        let emitted: Vec<(String, f64)> = sink.take().into_iter().map(|s| (s.path, s.value)).collect();

        assert_eq!(
            emitted,
            vec![("servers.m1.marathon.jvm.threads.count.value".to_string(), 12.0)]
        );
    }
}
