//! Versioned stat catalogs.
//!
//! A catalog maps a logical metric name to where it lives in a snapshot and
//! how its value is interpreted. Sources whose metric set changes between
//! releases register a base table plus one overlay per release family.

use crate::snapshot::PathSegment;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Modulus of a 32-bit SNMP counter.
pub const COUNTER32_MODULUS: i128 = 1 << 32;
/// Modulus of a 64-bit SNMP counter.
pub const COUNTER64_MODULUS: i128 = 1 << 64;

/// How a raw value is interpreted.
///
/// # Examples
///
/// ```
/// use statpoll_collector::catalog::ValueKind;
///
/// let kind: ValueKind = "bytes".parse().unwrap();
/// assert_eq!(kind, ValueKind::Bytes);
/// assert_eq!(ValueKind::Counter.to_string(), "counter");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    Gauge,
    /// Monotonically increasing; emitted as a per-cycle delta.
    Counter,
    Percent,
    Bytes,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueKind::Gauge => write!(f, "gauge"),
            ValueKind::Counter => write!(f, "counter"),
            ValueKind::Percent => write!(f, "percent"),
            ValueKind::Bytes => write!(f, "bytes"),
        }
    }
}

impl FromStr for ValueKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "gauge" => Ok(ValueKind::Gauge),
            "counter" => Ok(ValueKind::Counter),
            "percent" => Ok(ValueKind::Percent),
            "bytes" => Ok(ValueKind::Bytes),
            _ => Err(format!("unknown value kind: {s}")),
        }
    }
}

/// Unit conversion applied to a value right before emission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Unit {
    /// Bytes to megabits (`/ 1024 / 1024 * 8`).
    Megabits,
    /// Bytes to megabytes (`/ 1024 / 1024`).
    Megabytes,
}

impl Unit {
    pub fn apply(self, bytes: f64) -> f64 {
        match self {
            Unit::Megabits => bytes / 1024.0 / 1024.0 * 8.0,
            Unit::Megabytes => bytes / 1024.0 / 1024.0,
        }
    }
}

/// One catalog entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StatDefinition {
    /// Logical name, unique within a catalog.
    pub name: String,
    pub kind: ValueKind,
    pub path: Vec<PathSegment>,
    pub unit: Option<Unit>,
    /// Wraparound modulus for fixed-width counters.
    pub wrap: Option<i128>,
    /// Trailing component of the emitted name. `None` emits only the keys
    /// captured by wildcards.
    pub label: Option<String>,
}

impl StatDefinition {
    pub fn new(
        name: impl Into<String>,
        kind: ValueKind,
        path: impl IntoIterator<Item = PathSegment>,
    ) -> Self {
        let name = name.into();
        Self {
            label: Some(name.clone()),
            name,
            kind,
            path: path.into_iter().collect(),
            unit: None,
            wrap: None,
        }
    }

    /// Entry whose source path is the single top-level key `name`.
    pub fn keyed(name: impl Into<String>, kind: ValueKind) -> Self {
        let name = name.into();
        let path = [PathSegment::Key(name.clone())];
        Self::new(name, kind, path)
    }

    pub fn with_unit(mut self, unit: Unit) -> Self {
        self.unit = Some(unit);
        self
    }

    pub fn wrapping_at(mut self, modulus: i128) -> Self {
        self.wrap = Some(modulus);
        self
    }

    pub fn emitted_as(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn unlabeled(mut self) -> Self {
        self.label = None;
        self
    }

    /// Emitted metric name for one resolved branch.
    pub fn output_name(&self, captures: &[String]) -> String {
        let mut parts: Vec<&str> = captures.iter().map(String::as_str).collect();
        if let Some(label) = &self.label {
            parts.push(label);
        }
        parts.join(".")
    }

    fn same_meaning(&self, other: &StatDefinition) -> bool {
        self.kind == other.kind
            && self.path == other.path
            && self.unit == other.unit
            && self.wrap == other.wrap
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CatalogError {
    #[error("stat {name} declared twice in {table}")]
    DuplicateName { table: String, name: String },

    #[error("overlay for {version} redefines base stat {name} with a different meaning")]
    Conflict { version: String, name: String },

    #[error("version {0} is claimed by more than one overlay")]
    DuplicateVersion(String),
}

#[derive(Debug, Clone)]
struct Overlay {
    versions: Vec<String>,
    stats: BTreeMap<String, StatDefinition>,
}

/// Immutable base table plus version overlays. Built once at startup.
#[derive(Debug, Clone)]
pub struct VersionedCatalog {
    base: BTreeMap<String, StatDefinition>,
    overlays: Vec<Overlay>,
    latest: Option<usize>,
}

impl VersionedCatalog {
    pub fn builder() -> CatalogBuilder {
        CatalogBuilder::default()
    }

    /// Catalog with no version-specific entries.
    pub fn fixed(
        stats: impl IntoIterator<Item = StatDefinition>,
    ) -> Result<Self, CatalogError> {
        Self::builder().base(stats).build()
    }

    /// Whether `version` is claimed by an overlay.
    pub fn knows(&self, version: &str) -> bool {
        self.overlay_for(version).is_some()
    }

    /// Versions covered by the overlay used for unknown versions.
    pub fn latest_versions(&self) -> &[String] {
        self.latest
            .map(|idx| self.overlays[idx].versions.as_slice())
            .unwrap_or(&[])
    }

    /// Effective catalog for `version`.
    ///
    /// Unknown or absent versions get the latest overlay, so a newer source
    /// release keeps reporting the newest known stat set.
    pub fn resolve(&self, version: Option<&str>) -> ResolvedCatalog {
        let overlay = version
            .and_then(|v| self.overlay_for(v))
            .or(self.latest)
            .map(|idx| &self.overlays[idx]);

        let mut stats = self.base.clone();
        if let Some(overlay) = overlay {
            for (name, def) in &overlay.stats {
                stats.insert(name.clone(), def.clone());
            }
        }
        ResolvedCatalog { stats }
    }

    fn overlay_for(&self, version: &str) -> Option<usize> {
        self.overlays
            .iter()
            .position(|o| o.versions.iter().any(|v| v == version))
    }
}

#[derive(Debug, Default)]
pub struct CatalogBuilder {
    base: Vec<StatDefinition>,
    overlays: Vec<(Vec<String>, Vec<StatDefinition>)>,
    latest: Option<usize>,
}

impl CatalogBuilder {
    pub fn base(mut self, stats: impl IntoIterator<Item = StatDefinition>) -> Self {
        self.base.extend(stats);
        self
    }

    pub fn overlay(
        mut self,
        versions: &[&str],
        stats: impl IntoIterator<Item = StatDefinition>,
    ) -> Self {
        self.overlays.push((
            versions.iter().map(|v| v.to_string()).collect(),
            stats.into_iter().collect(),
        ));
        self
    }

    /// Registers an overlay and marks it as the fallback for unknown
    /// versions. Without this the last registered overlay is used.
    pub fn latest_overlay(
        mut self,
        versions: &[&str],
        stats: impl IntoIterator<Item = StatDefinition>,
    ) -> Self {
        self = self.overlay(versions, stats);
        self.latest = Some(self.overlays.len() - 1);
        self
    }

    pub fn build(self) -> Result<VersionedCatalog, CatalogError> {
        let base = into_table("base", self.base)?;

        let mut seen_versions: Vec<String> = Vec::new();
        let mut overlays: Vec<Overlay> = Vec::with_capacity(self.overlays.len());
        for (versions, stats) in self.overlays {
            let label = versions.join("/");
            for v in &versions {
                if seen_versions.contains(v) {
                    return Err(CatalogError::DuplicateVersion(v.clone()));
                }
                seen_versions.push(v.clone());
            }

            let stats = into_table(&format!("overlay {label}"), stats)?;
            for (name, def) in &stats {
                let earlier = base
                    .get(name)
                    .into_iter()
                    .chain(overlays.iter().filter_map(|o| o.stats.get(name)));
                for existing in earlier {
                    if !existing.same_meaning(def) {
                        return Err(CatalogError::Conflict {
                            version: label,
                            name: name.clone(),
                        });
                    }
                }
            }
            overlays.push(Overlay { versions, stats });
        }

        let latest = self
            .latest
            .or_else(|| overlays.len().checked_sub(1));

        Ok(VersionedCatalog {
            base,
            overlays,
            latest,
        })
    }
}

fn into_table(
    table: &str,
    stats: Vec<StatDefinition>,
) -> Result<BTreeMap<String, StatDefinition>, CatalogError> {
    let mut map = BTreeMap::new();
    for def in stats {
        if map.contains_key(&def.name) {
            return Err(CatalogError::DuplicateName {
                table: table.to_string(),
                name: def.name,
            });
        }
        map.insert(def.name.clone(), def);
    }
    Ok(map)
}

/// The effective `name -> definition` mapping for one version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCatalog {
    stats: BTreeMap<String, StatDefinition>,
}

impl ResolvedCatalog {
    /// `None` means the stat is not part of this catalog at all.
    pub fn get(&self, name: &str) -> Option<&StatDefinition> {
        self.stats.get(name)
    }

    pub fn path_of(&self, name: &str) -> Option<&[PathSegment]> {
        self.stats.get(name).map(|def| def.path.as_slice())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.stats.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &StatDefinition> {
        self.stats.values()
    }

    pub fn len(&self) -> usize {
        self.stats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stats.is_empty()
    }
}
