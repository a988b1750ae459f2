//! Mesos agent (`/metrics/snapshot`) stat tables.
//!
//! The snapshot is a flat object keyed by `group/name`, so every path is a
//! single key.

use statpoll_collector::catalog::{CatalogError, StatDefinition, ValueKind, VersionedCatalog};
use ValueKind::{Bytes, Counter, Gauge, Percent};

pub const DEFAULT_PORT: u16 = 5051;
pub const DEFAULT_VERSION: &str = "0.20.1";
pub const SNAPSHOT_PATH: &str = "metrics/snapshot";

/// Present in every supported release.
const BASE: &[(&str, ValueKind)] = &[
    ("slave/frameworks_active", Gauge),
    ("slave/invalid_framework_messages", Counter),
    ("slave/invalid_status_updates", Counter),
    ("slave/recovery_errors", Counter),
    ("slave/registered", Gauge),
    ("slave/tasks_failed", Counter),
    ("slave/tasks_finished", Counter),
    ("slave/tasks_killed", Counter),
    ("slave/tasks_lost", Counter),
    ("slave/tasks_running", Gauge),
    ("slave/tasks_starting", Gauge),
    ("slave/tasks_staging", Gauge),
    ("slave/uptime_secs", Gauge),
    ("slave/valid_framework_messages", Counter),
    ("slave/valid_status_updates", Counter),
    ("system/cpus_total", Gauge),
    ("system/load_15min", Gauge),
    ("system/load_1min", Gauge),
    ("system/load_5min", Gauge),
    ("system/mem_free_bytes", Bytes),
    ("system/mem_total_bytes", Bytes),
];

const EXECUTORS: &[(&str, ValueKind)] = &[
    ("slave/executors_registering", Gauge),
    ("slave/executors_running", Gauge),
    ("slave/executors_terminating", Gauge),
    ("slave/executors_terminated", Counter),
];

const RESOURCES_0_21: &[(&str, ValueKind)] = &[
    ("slave/cpus_percent", Percent),
    ("slave/cpus_total", Gauge),
    ("slave/cpus_used", Gauge),
    ("slave/disk_percent", Percent),
    ("slave/disk_total", Gauge),
    ("slave/disk_used", Gauge),
    ("slave/mem_percent", Percent),
    ("slave/mem_total", Gauge),
    ("slave/mem_used", Gauge),
];

fn table<'a>(
    entries: impl IntoIterator<Item = &'a (&'a str, ValueKind)>,
) -> Vec<StatDefinition> {
    entries
        .into_iter()
        .map(|(name, kind)| StatDefinition::keyed(*name, *kind))
        .collect()
}

/// Base table plus the 0.19, 0.20 and 0.21 overlays. Unknown versions get
/// the 0.21 set.
pub fn catalog() -> Result<VersionedCatalog, CatalogError> {
    VersionedCatalog::builder()
        .base(table(BASE))
        .overlay(&["0.19.0", "0.19.1"], [])
        .overlay(&["0.20.0", "0.20.1"], table(EXECUTORS))
        .latest_overlay(
            &["0.21.0", "0.21.1"],
            table(RESOURCES_0_21.iter().chain(EXECUTORS)),
        )
        .build()
}
