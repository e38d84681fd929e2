use std::time::Duration;

use reqwest::{Client, RequestBuilder, header};
use serde::{Serialize, de::DeserializeOwned};
use tracing::debug;

use crate::error::UpstreamError;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0 Safari/537.36";

/// Shared HTTP handle for every provider. Cloning is cheap.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    pub fn new(user_agent: &str, timeout: Duration) -> reqwest::Result<Self> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }

    pub fn get(&self, url: impl Into<String>) -> Fetch {
        let url = url.into();
        Fetch {
            builder: self.client.get(&url),
            url,
        }
    }

    pub fn post(&self, url: impl Into<String>) -> Fetch {
        let url = url.into();
        Fetch {
            builder: self.client.post(&url),
            url,
        }
    }
}

/// A single request being assembled; consumed by [`Fetch::text`] or [`Fetch::json`].
#[must_use]
pub struct Fetch {
    builder: RequestBuilder,
    url: String,
}

impl Fetch {
    pub fn header(mut self, key: &str, value: &str) -> Self {
        self.builder = self.builder.header(key, value);
        self
    }

    pub fn referer(self, value: &str) -> Self {
        self.header(header::REFERER.as_str(), value)
    }

    pub fn user_agent(self, value: &str) -> Self {
        self.header(header::USER_AGENT.as_str(), value)
    }

    /// Marks the request as the XHR the site's own frontend would send.
    pub fn xhr(self) -> Self {
        self.header("X-Requested-With", "XMLHttpRequest")
    }

    pub fn json_body<T: Serialize + ?Sized>(mut self, body: &T) -> Self {
        self.builder = self.builder.json(body);
        self
    }

    pub fn form<T: Serialize + ?Sized>(mut self, form: &T) -> Self {
        self.builder = self.builder.form(form);
        self
    }

    /// Sends the request and returns the raw body of a 2xx response.
    pub async fn text(self) -> Result<String, UpstreamError> {
        let Fetch { builder, url } = self;
        debug!(%url, "upstream request");
        let response = builder
            .send()
            .await
            .map_err(|source| UpstreamError::Transport {
                url: url.clone(),
                source,
            })?;
        let status = response.status();
        if !status.is_success() {
            return Err(UpstreamError::Status { url, status });
        }
        response
            .text()
            .await
            .map_err(|source| UpstreamError::Transport { url, source })
    }

    pub async fn json<T: DeserializeOwned>(self) -> Result<T, UpstreamError> {
        let url = self.url.clone();
        let body = self.text().await?;
        serde_json::from_str(&body).map_err(|source| UpstreamError::Json { url, source })
    }
}
