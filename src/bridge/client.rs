//! HTTP client for the control plane.

use reqwest::{Client, Method, Url};
use serde_json::Value;
use tracing::debug;

use crate::{AppError, Result};

/// Environment variable overriding the control-plane URL.
pub const API_URL_ENV: &str = "DEVTABS_API_URL";

/// Control-plane URL used when [`API_URL_ENV`] is unset.
pub const DEFAULT_API_URL: &str = "http://127.0.0.1:9876";

/// Message returned when the control plane cannot be reached.
pub const UNAVAILABLE: &str = "control plane unavailable - is the orchestrator running?";

/// Response from one control-plane request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlResponse {
    /// Whether the status was 2xx.
    pub ok: bool,
    /// Response body as text.
    pub body: String,
}

/// Thin reqwest wrapper; one call is one HTTP request.
#[derive(Debug, Clone)]
pub struct ControlClient {
    base: Url,
    http: Client,
}

impl ControlClient {
    /// Client for `base_url`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the URL is invalid.
    pub fn new(base_url: &str) -> Result<Self> {
        let base = Url::parse(base_url)
            .map_err(|err| AppError::Config(format!("invalid control plane url {base_url:?}: {err}")))?;
        if base.cannot_be_a_base() {
            return Err(AppError::Config(format!(
                "control plane url {base_url:?} cannot carry paths"
            )));
        }
        Ok(Self {
            base,
            http: Client::new(),
        })
    }

    /// Client for `$DEVTABS_API_URL`, or the default local URL.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the variable holds an invalid URL.
    pub fn from_env() -> Result<Self> {
        let url = std::env::var(API_URL_ENV).unwrap_or_else(|_| DEFAULT_API_URL.to_owned());
        Self::new(&url)
    }

    /// Base URL.
    #[must_use]
    pub fn base(&self) -> &Url {
        &self.base
    }

    /// Build `base/segments…?query`, percent-encoding each segment.
    #[must_use]
    pub fn url(&self, segments: &[&str], query: &[(&str, String)]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in query {
                pairs.append_pair(key, value);
            }
        }
        url
    }

    /// Issue one request.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Control` with [`UNAVAILABLE`] when the server
    /// cannot be reached. Non-2xx responses are not errors.
    pub async fn request(&self, method: Method, url: Url, body: Option<&Value>) -> Result<ControlResponse> {
        debug!(%method, %url, "control request");
        let mut request = self.http.request(method, url);
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().await.map_err(|err| {
            debug!(%err, "control plane request failed");
            AppError::Control(UNAVAILABLE.to_owned())
        })?;
        let ok = response.status().is_success();
        let body = response
            .text()
            .await
            .map_err(|err| AppError::Control(format!("failed to read response: {err}")))?;
        Ok(ControlResponse { ok, body })
    }
}
