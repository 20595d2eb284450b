//! HTTP client for a remote opsml registry

use reqwest::{RequestBuilder, Response, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{ApiErrorBody, RegistryError, Result};

/// Every route lives under this prefix on the server
pub const API_PREFIX: &str = "opsml";

/// JSON-over-HTTP client with bounded retries
///
/// Transport failures and gateway errors (502, 503, 504) are retried up to
/// `retries` attempts. Any other error status is decoded into the
/// corresponding [`RegistryError`] and returned at once.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: reqwest::Client,
    base_url: String,
    retries: u32,
}

impl HttpClient {
    pub fn new(base_url: &str, retries: u32, timeout_secs: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| RegistryError::Config(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            retries: retries.max(1),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn api_url(&self, route: &str) -> String {
        format!("{}/{}/{}", self.base_url, API_PREFIX, route.trim_start_matches('/'))
    }

    /// POST a JSON body and decode the JSON response
    pub async fn post_json<B, R>(&self, route: &str, body: &B) -> Result<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let url = self.api_url(route);
        let response = self.send(&url, || self.client.post(&url).json(body)).await?;
        response.json().await.map_err(|e| RegistryError::Transport {
            detail: format!("Invalid response from {url}: {e}"),
        })
    }

    /// PUT raw bytes
    pub async fn put_bytes(&self, route: &str, data: Vec<u8>) -> Result<()> {
        let url = self.api_url(route);
        self.send(&url, || self.client.put(&url).body(data.clone()))
            .await?;
        Ok(())
    }

    /// GET raw bytes
    pub async fn get_bytes(&self, route: &str) -> Result<Vec<u8>> {
        let url = self.api_url(route);
        let response = self.send(&url, || self.client.get(&url)).await?;
        let bytes = response.bytes().await.map_err(|e| RegistryError::Transport {
            detail: format!("Failed to read body from {url}: {e}"),
        })?;
        Ok(bytes.to_vec())
    }

    pub async fn delete(&self, route: &str) -> Result<()> {
        let url = self.api_url(route);
        self.send(&url, || self.client.delete(&url)).await?;
        Ok(())
    }

    async fn send<F>(&self, url: &str, build: F) -> Result<Response>
    where
        F: Fn() -> RequestBuilder,
    {
        let mut last_error = String::new();

        for attempt in 1..=self.retries {
            debug!("Request {} (attempt {}/{})", url, attempt, self.retries);

            match build().send().await {
                Ok(response) if is_gateway_error(response.status()) => {
                    last_error = format!("{url} returned {}", response.status());
                }
                Ok(response) => return check_response(response).await,
                Err(e) => {
                    last_error = format!("Request to {url} failed: {e}");
                }
            }

            if attempt < self.retries {
                warn!("{}; retrying ({}/{})", last_error, attempt, self.retries);
                tokio::time::sleep(Duration::from_millis(100 * u64::from(attempt))).await;
            }
        }

        Err(RegistryError::Transport { detail: last_error })
    }
}

fn is_gateway_error(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT
    )
}

async fn check_response(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let text = response.text().await.unwrap_or_default();
    match serde_json::from_str::<ApiErrorBody>(&text) {
        Ok(body) => Err(RegistryError::from_api_error(body)),
        Err(_) => Err(RegistryError::Transport {
            detail: format!("{status}: {text}"),
        }),
    }
}
