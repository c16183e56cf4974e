//! HTTP device API of FarmBot OS before v8.
//!
//! Synchronous from the caller's point of view: the HTTP response is the
//! reply, so no correlation table is involved.

use crate::error::{Error, Result};
use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde_json::Value;
use tracing::{debug, error};

pub const CELERY_SCRIPT_ENDPOINT: &str = "celery_script";
pub const BOT_STATE_ENDPOINT: &str = "bot/state";

/// Client for `{base_url}api/v1/*`.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl HttpTransport {
    /// `base_url` is used verbatim as a prefix and should end in `/`.
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            token: token.into(),
        })
    }

    #[must_use]
    pub fn url(&self, endpoint: &str) -> String {
        format!("{}api/v1/{endpoint}", self.base_url)
    }

    async fn request(
        &self,
        method: reqwest::Method,
        endpoint: &str,
        payload: Option<&Value>,
    ) -> Result<reqwest::Response> {
        let url = self.url(endpoint);
        debug!("{} {}", method, url);
        let mut request = self
            .client
            .request(method, &url)
            .header(AUTHORIZATION, format!("Bearer {}", self.token))
            .header(CONTENT_TYPE, "application/json");
        if let Some(payload) = payload {
            request = request.json(payload);
        }
        let response = request.send().await?;
        let status = response.status();
        if status != StatusCode::OK {
            error!("{} request to {} returned {}", endpoint, url, status);
            return Err(Error::Remote {
                endpoint: endpoint.to_string(),
                status: status.as_u16().to_string(),
            });
        }
        Ok(response)
    }

    /// POST a Celery Script envelope for execution.
    pub async fn post_celery_script(&self, envelope: &Value) -> Result<()> {
        self.request(reqwest::Method::POST, CELERY_SCRIPT_ENDPOINT, Some(envelope))
            .await?;
        Ok(())
    }

    /// GET the device state tree.
    pub async fn get_bot_state(&self) -> Result<Value> {
        let response = self
            .request(reqwest::Method::GET, BOT_STATE_ENDPOINT, None)
            .await?;
        Ok(response.json().await?)
    }
}
