use crate::error::Result;
use reqwest::Client;
use serde_json::Value;
use statpoll_collector::snapshot::Snapshot;
use statpoll_collector::source::{FetchFailure, SourceAdapter};
use std::time::Duration;

/// Fetches a JSON object from a single HTTP GET.
pub struct HttpJsonAdapter {
    name: String,
    url: String,
    credentials: Option<(String, String)>,
    timeout: Duration,
    client: Client,
}

impl HttpJsonAdapter {
    pub fn new(name: &str, url: &str, timeout: Duration) -> Result<Self> {
        // No idle pooling: every fetch opens and releases its own connection.
        let client = Client::builder()
            .use_rustls_tls()
            .timeout(timeout)
            .pool_max_idle_per_host(0)
            .user_agent(concat!("statpoll/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            name: name.to_string(),
            url: url.to_string(),
            credentials: None,
            timeout,
            client,
        })
    }

    /// Sends basic auth only when both parts are non-empty.
    pub fn with_basic_auth(mut self, username: &str, password: &str) -> Self {
        self.credentials = if username.is_empty() || password.is_empty() {
            None
        } else {
            Some((username.to_string(), password.to_string()))
        };
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn has_credentials(&self) -> bool {
        self.credentials.is_some()
    }

    fn transport_error(&self, err: reqwest::Error) -> FetchFailure {
        if err.is_timeout() {
            FetchFailure::Timeout(self.timeout)
        } else {
            FetchFailure::Transport(err.to_string())
        }
    }
}

#[async_trait::async_trait]
impl SourceAdapter for HttpJsonAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self) -> std::result::Result<Snapshot, FetchFailure> {
        let mut request = self.client.get(&self.url);
        if let Some((username, password)) = &self.credentials {
            request = request.basic_auth(username, Some(password));
        }

        let response = request.send().await.map_err(|e| self.transport_error(e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchFailure::Status {
                url: self.url.clone(),
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await.map_err(|e| self.transport_error(e))?;
        let value: Value =
            serde_json::from_slice(&body).map_err(|e| FetchFailure::Parse(e.to_string()))?;
        if !value.is_object() {
            return Err(FetchFailure::Parse(
                "expected a JSON object at the top level".to_string(),
            ));
        }

        tracing::trace!(adapter = %self.name, url = %self.url, bytes = body.len(), "fetched snapshot");
        Ok(Snapshot::new(value))
    }
}

/// Builds `http://host:port/path`.
pub fn endpoint_url(host: &str, port: u16, path: &str) -> String {
    let path = path.trim_start_matches('/');
    format!("http://{host}:{port}/{path}")
}
