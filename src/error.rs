use std::path::PathBuf;

use reqwest::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("no match for \"{0}\" on the upstream site")]
    NotFound(String),

    #[error("unknown provider: {0}")]
    UnknownProvider(String),

    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    #[error("no video links found: {0}")]
    NoLinksFound(String),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("{0} is not implemented")]
    NotImplemented(&'static str),

    #[error("resolution cancelled")]
    Cancelled,
}

/// Failures talking to an upstream site.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: StatusCode },

    #[error("failed to parse response from {url}: {source}")]
    Json {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("unexpected response from {site}: {detail}")]
    Shape { site: &'static str, detail: String },
}

impl UpstreamError {
    pub fn shape(site: &'static str, detail: impl Into<String>) -> Self {
        UpstreamError::Shape {
            site,
            detail: detail.into(),
        }
    }
}

/// Errors that can occur while reading or writing the provider id cache
#[derive(Debug, Error)]
pub enum CacheError {
    /// Failed to determine the default cache location
    #[error("could not determine a home directory for the provider cache")]
    NoCacheDir,

    /// A row exists but does not parse
    #[error("invalid cache entry [{provider}] {key}: {reason}")]
    InvalidFormat {
        provider: String,
        key: String,
        reason: String,
    },

    #[error("failed to read cache file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to write cache file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, ProviderError>;
