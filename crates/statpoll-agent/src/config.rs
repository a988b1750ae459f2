use serde::Deserialize;
use statpoll_sources::SourceConfig;
use std::time::Duration;

#[derive(Debug, Deserialize)]
pub struct AgentConfig {
    #[serde(default)]
    pub defaults: CollectorDefaults,
    #[serde(default)]
    pub sink: SinkConfig,
    #[serde(default)]
    pub collectors: Vec<CollectorEntry>,
}

/// Fallbacks for collectors that do not set their own schedule.
#[derive(Debug, Deserialize)]
pub struct CollectorDefaults {
    #[serde(default = "default_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_splay_max")]
    pub splay_max_secs: u64,
}

impl Default for CollectorDefaults {
    fn default() -> Self {
        Self {
            interval_secs: default_interval(),
            splay_max_secs: default_splay_max(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SinkConfig {
    #[serde(default = "default_buffer_max_size")]
    pub buffer_max_size: usize,
    #[serde(default = "default_flush_interval")]
    pub flush_interval_secs: u64,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            buffer_max_size: default_buffer_max_size(),
            flush_interval_secs: default_flush_interval(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CollectorEntry {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub interval_secs: Option<u64>,
    pub splay_max_secs: Option<u64>,
    #[serde(flatten)]
    pub source: SourceConfig,
}

/// When a collector instance runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    pub interval: Duration,
    /// Upper bound of the random delay before the first cycle.
    pub splay_max: Duration,
}

fn default_interval() -> u64 {
    60
}

fn default_splay_max() -> u64 {
    1
}

fn default_buffer_max_size() -> usize {
    10_000
}

fn default_flush_interval() -> u64 {
    10
}

fn default_enabled() -> bool {
    true
}

impl CollectorEntry {
    pub fn schedule(&self, defaults: &CollectorDefaults) -> Schedule {
        Schedule {
            interval: Duration::from_secs(self.interval_secs.unwrap_or(defaults.interval_secs)),
            splay_max: Duration::from_secs(self.splay_max_secs.unwrap_or(defaults.splay_max_secs)),
        }
    }
}

impl AgentConfig {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.defaults.interval_secs == 0 {
            anyhow::bail!("defaults.interval_secs must be greater than zero");
        }
        for entry in &self.collectors {
            if entry.interval_secs == Some(0) {
                anyhow::bail!(
                    "collector {} has interval_secs = 0",
                    entry.source.kind()
                );
            }
        }
        if self.sink.flush_interval_secs == 0 {
            anyhow::bail!("sink.flush_interval_secs must be greater than zero");
        }
        Ok(())
    }

    pub fn enabled_collectors(&self) -> impl Iterator<Item = &CollectorEntry> {
        self.collectors.iter().filter(|c| c.enabled)
    }
}
