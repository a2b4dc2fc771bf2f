use std::future::Future;
use std::time::Duration;

use reqwest::{header, StatusCode, Url};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::FetchError;
use crate::models::{Measurement, MeasurementPage};
use crate::normalize::normalize_measurements;

pub const DEFAULT_API_BASE: &str = "http://localhost:8080";
pub const DEFAULT_API_PORT: u16 = 8080;
const MEASUREMENTS_PATH: &str = "/api/measurements";
const USER_AGENT: &str = concat!("nutrisync-dashboard/", env!("CARGO_PKG_VERSION"));

/// Picks the API base URL: an explicit override wins, then the web origin's
/// host on `api_port`, then the local default. Trailing slashes are dropped.
pub fn resolve_api_base(explicit: Option<&str>, web_origin: Option<&str>, api_port: u16) -> String {
    if let Some(base) = explicit.map(str::trim).filter(|b| !b.is_empty()) {
        return base.trim_end_matches('/').to_string();
    }

    if let Some(origin) = web_origin.map(str::trim).filter(|o| !o.is_empty()) {
        match Url::parse(origin) {
            Ok(url) => {
                if let Some(host) = url.host_str() {
                    return format!("{}://{}:{}", url.scheme(), host, api_port);
                }
            }
            Err(err) => debug!(origin, error = %err, "ignoring unparseable web origin"),
        }
    }

    DEFAULT_API_BASE.to_string()
}

/// HTTP client for the measurement endpoints. Every call takes a cancellation
/// token; a cancelled call resolves to `FetchError::Cancelled`.
#[derive(Debug, Clone)]
pub struct MeasurementClient {
    http: reqwest::Client,
    base: String,
}

impl MeasurementClient {
    pub fn new(base: impl Into<String>, timeout: Option<Duration>) -> Result<Self, FetchError> {
        let mut builder = reqwest::Client::builder().user_agent(USER_AGENT);
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder.build()?;

        Ok(Self {
            http,
            base: base.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base
    }

    pub fn list_url(&self) -> String {
        format!("{}{}", self.base, MEASUREMENTS_PATH)
    }

    pub fn detail_url(&self, id: &str) -> String {
        format!("{}{}/{}", self.base, MEASUREMENTS_PATH, urlencoding::encode(id))
    }

    /// `GET /api/measurements`, normalized. An unexpected body shape is an
    /// empty page, not an error.
    pub async fn fetch_measurements(
        &self,
        cancel: &CancellationToken,
    ) -> Result<MeasurementPage, FetchError> {
        let url = self.list_url();
        let page = cancellable(cancel, async {
            let response = self.get(&url).await?;
            let status = response.status();
            if !status.is_success() {
                return Err(FetchError::Status {
                    status: status.as_u16(),
                    url: url.clone(),
                });
            }
            let body: Value = response.json().await?;
            Ok::<_, FetchError>(normalize_measurements(&body))
        })
        .await?;

        info!(
            records = page.items.len(),
            total = ?page.total,
            "fetched measurements"
        );
        Ok(page)
    }

    /// `GET /api/measurements/{id}`. A 404 is `Ok(None)`.
    pub async fn fetch_measurement(
        &self,
        id: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<Measurement>, FetchError> {
        if id.trim().is_empty() {
            return Ok(None);
        }
        let url = self.detail_url(id);
        cancellable(cancel, async {
            let response = self.get(&url).await?;
            let status = response.status();
            if status == StatusCode::NOT_FOUND {
                debug!(id, "measurement not found");
                return Ok(None);
            }
            if !status.is_success() {
                return Err(FetchError::Status {
                    status: status.as_u16(),
                    url: url.clone(),
                });
            }
            let body: Value = response.json().await?;
            let measurement = serde_json::from_value(body)
                .map_err(|err| FetchError::Decode(err.to_string()))?;
            Ok::<_, FetchError>(Some(measurement))
        })
        .await
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response, FetchError> {
        debug!(url, "GET");
        let response = self
            .http
            .get(url)
            .header(header::CACHE_CONTROL, "no-store")
            .send()
            .await?;
        Ok(response)
    }
}

async fn cancellable<F, T>(cancel: &CancellationToken, fut: F) -> Result<T, FetchError>
where
    F: Future<Output = Result<T, FetchError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(FetchError::Cancelled),
        result = fut => result,
    }
}
