use crate::snapshot::Snapshot;
use std::time::Duration;

/// Why a fetch produced no snapshot. Always recovered within the cycle.
#[derive(Debug, thiserror::Error)]
pub enum FetchFailure {
    /// Connection, DNS or I/O failure before a response arrived.
    #[error("transport error: {0}")]
    Transport(String),

    #[error("{url} answered with HTTP status {status}")]
    Status { url: String, status: u16 },

    /// Response arrived but does not have the expected shape.
    #[error("unparseable response: {0}")]
    Parse(String),

    #[error("fetch timed out after {0:?}")]
    Timeout(Duration),

    #[error("SNMP error: {0}")]
    Snmp(String),
}

/// Retrieves one raw snapshot from an external system.
///
/// Adapters hold no state between fetches apart from configuration;
/// connections are opened and released inside `fetch`.
#[async_trait::async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Adapter name used in logs (e.g. `"mesos_slave"`).
    fn name(&self) -> &str;

    async fn fetch(&self) -> Result<Snapshot, FetchFailure>;
}
