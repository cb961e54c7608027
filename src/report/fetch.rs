//! Session log download

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use std::time::Duration;

use crate::common::{Error, Result};

/// Downloads one session log
#[async_trait]
pub trait LogFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String>;
}

/// `Authorization` header value for HTTP Basic auth
pub fn basic_auth_header(username: &str, api_key: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!("{}:{}", username, api_key)))
}

/// Fetches logs from the Sauce Labs REST API
#[derive(Debug, Clone)]
pub struct HttpLogFetcher {
    client: reqwest::Client,
    authorization: String,
}

impl HttpLogFetcher {
    pub fn new(username: &str, api_key: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("sauceconnect/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Internal(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            authorization: basic_auth_header(username, api_key),
        })
    }
}

#[async_trait]
impl LogFetcher for HttpLogFetcher {
    async fn fetch(&self, url: &str) -> Result<String> {
        let response = self
            .client
            .get(url)
            .header(reqwest::header::AUTHORIZATION, &self.authorization)
            .send()
            .await
            .map_err(|e| Error::log_fetch_failed(url, e))?;

        if !response.status().is_success() {
            return Err(Error::log_fetch_failed(
                url,
                format!("HTTP status {}", response.status()),
            ));
        }

        response
            .text()
            .await
            .map_err(|e| Error::log_fetch_failed(url, e))
    }
}
