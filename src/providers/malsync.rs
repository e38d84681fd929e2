//! Tracked-media id → site page lookups via the public mal-backup index.

use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

use crate::error::{ProviderError, Result, UpstreamError};
use crate::http::HttpClient;

pub const MAL_BACKUP_URL: &str =
    "https://raw.githubusercontent.com/bal-mackup/mal-backup/master/anilist/anime";

#[derive(Debug, Deserialize)]
pub struct MalBackupEntry {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(rename = "Sites", default)]
    sites: HashMap<String, BTreeMap<String, SitePage>>,
}

#[derive(Debug, Deserialize)]
struct SitePage {
    #[serde(default)]
    url: String,
}

impl MalBackupEntry {
    /// First page URL recorded for `site` (e.g. `"Zoro"`, `"YugenAnime"`).
    pub fn site_url(&self, site: &str) -> Option<&str> {
        self.sites
            .get(site)?
            .values()
            .map(|page| page.url.as_str())
            .find(|url| !url.is_empty())
    }
}

pub async fn lookup(http: &HttpClient, base_url: &str, media_id: u64) -> Result<MalBackupEntry> {
    let url = format!("{}/{media_id}.json", base_url.trim_end_matches('/'));
    match http.get(url).json::<MalBackupEntry>().await {
        Ok(entry) => Ok(entry),
        Err(UpstreamError::Status { status, .. }) if status.as_u16() == 404 => {
            debug!(media_id, "media id missing from mal-backup");
            Err(ProviderError::NotFound(format!("media {media_id}")))
        }
        Err(err) => Err(err.into()),
    }
}

/// Convenience for providers that only need one site's URL.
pub async fn site_url(
    http: &HttpClient,
    base_url: &str,
    media_id: u64,
    site: &str,
) -> Result<String> {
    let entry = lookup(http, base_url, media_id).await?;
    entry
        .site_url(site)
        .map(str::to_string)
        .ok_or_else(|| ProviderError::NotFound(format!("{site} page for media {media_id}")))
}
