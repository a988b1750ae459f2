pub mod config;
pub mod scheduler;
pub mod sink;

use anyhow::Result;
use tracing_subscriber::EnvFilter;

/// Installs the global subscriber. `RUST_LOG` refines the default
/// `statpoll=info`.
pub fn init_tracing() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("statpoll=info".parse()?))
        .init();
    Ok(())
}
