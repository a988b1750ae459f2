use statpoll_collector::catalog::CatalogError;

/// Errors raised while turning collector configuration into running
/// collectors. Fetch-time problems are reported as
/// [`FetchFailure`](statpoll_collector::source::FetchFailure) instead.
///
/// # Examples
///
/// ```rust
/// use statpoll_sources::error::SourceError;
///
/// let err = SourceError::ConfigError("no devices configured".to_string());
/// assert!(err.to_string().contains("no devices"));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// A built-in stat table is inconsistent.
    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    /// The HTTP client could not be constructed.
    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    /// Collector configuration is missing or invalid.
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

pub type Result<T> = std::result::Result<T, SourceError>;
