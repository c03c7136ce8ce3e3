use crate::error::FetchError;
use crate::source::FetchPlan;
use async_trait::async_trait;
use std::io::ErrorKind;

pub const USER_AGENT: &str = concat!("reqloader/", env!("CARGO_PKG_VERSION"));

/// Status and body of a GET request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Anything that can perform a GET and hand back status + body.
///
/// Implement this to fetch manifests through a session that carries custom
/// headers, credentials, proxies or TLS settings. A transport error means the
/// request never produced a response.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, url: &str) -> anyhow::Result<TransportResponse>;
}

/// Default transport backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    /// Use a preconfigured client (proxy, TLS roots, default headers...).
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn get(&self, url: &str) -> anyhow::Result<TransportResponse> {
        let mut request = self.client.get(url).header("User-Agent", USER_AGENT);

        if let Ok(token) = std::env::var("GITHUB_TOKEN") {
            request = request.header("Authorization", format!("token {}", token));
            tracing::debug!("Using GITHUB_TOKEN");
        }

        let response = request.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok(TransportResponse { status, body })
    }
}

/// Retrieve manifest content for a resolved plan. Nothing is persisted.
pub async fn fetch(plan: &FetchPlan, transport: &dyn Transport) -> Result<String, FetchError> {
    match plan {
        FetchPlan::Local(path) => {
            tracing::debug!("Reading manifest from {}", path.display());
            tokio::fs::read_to_string(path)
                .await
                .map_err(|source| match source.kind() {
                    ErrorKind::NotFound => FetchError::NotFound { path: path.clone() },
                    _ => FetchError::IoFailure {
                        path: path.clone(),
                        source,
                    },
                })
        }
        FetchPlan::Remote(url) => {
            tracing::debug!("Fetching manifest from {}", url);
            let response = transport
                .get(url)
                .await
                .map_err(|e| FetchError::Unreachable {
                    url: url.clone(),
                    reason: format!("{:#}", e),
                })?;

            if !response.is_success() {
                return Err(FetchError::BadStatus {
                    url: url.clone(),
                    status: response.status,
                });
            }
            Ok(response.body)
        }
    }
}
