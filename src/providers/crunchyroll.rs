use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

use super::{Provider, malsync};
use crate::cache::ProviderCache;
use crate::error::{ProviderError, Result, UpstreamError};
use crate::http::HttpClient;
use crate::types::{EpisodeInfo, Translation, VideoDescriptor};

pub const NAME: &str = "crunchyroll";

const CRUNCHYROLL_BASE_URL: &str = "https://www.crunchyroll.com";
const MAL_SITE: &str = "Crunchyroll";
/// `cr_web:` as HTTP basic credentials, the web client's anonymous id.
const ANONYMOUS_CLIENT: &str = "Basic Y3Jfd2ViOg==";

pub struct Crunchyroll {
    http: HttpClient,
    cache: ProviderCache,
    base_url: String,
    mal_backup_url: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct Listing<T> {
    #[serde(default = "Vec::new")]
    data: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct Season {
    id: String,
}

#[derive(Debug, Deserialize)]
struct Episode {
    id: String,
    #[serde(default)]
    title: Option<String>,
}

impl Crunchyroll {
    pub fn new(http: HttpClient, cache: ProviderCache) -> Self {
        Self::with_base_urls(http, cache, CRUNCHYROLL_BASE_URL, malsync::MAL_BACKUP_URL)
    }

    pub fn with_base_urls(
        http: HttpClient,
        cache: ProviderCache,
        base_url: impl Into<String>,
        mal_backup_url: impl Into<String>,
    ) -> Self {
        Self {
            http,
            cache,
            base_url: base_url.into(),
            mal_backup_url: mal_backup_url.into(),
        }
    }

    async fn series_id(&self, media_id: u64) -> Result<String> {
        if let Some(entry) = self.cache.load(NAME, media_id)? {
            return Ok(entry.provider_id);
        }
        let page = malsync::site_url(&self.http, &self.mal_backup_url, media_id, MAL_SITE).await?;
        series_id_from_url(&page)
            .ok_or_else(|| UpstreamError::shape(NAME, format!("no series id in {page}")).into())
    }

    async fn anonymous_token(&self) -> Result<String> {
        let token: TokenResponse = self
            .http
            .post(format!("{}/auth/v1/token", self.base_url))
            .header("Authorization", ANONYMOUS_CLIENT)
            .form(&[("grant_type", "client_id"), ("scope", "offline_access")])
            .json()
            .await?;
        Ok(token.access_token)
    }

    async fn listing<T: DeserializeOwned>(&self, path: &str, token: &str) -> Result<Vec<T>> {
        let listing: Listing<T> = self
            .http
            .get(format!("{}{path}", self.base_url))
            .header("Authorization", &format!("Bearer {token}"))
            .json()
            .await?;
        Ok(listing.data)
    }
}

impl Provider for Crunchyroll {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn fetch_episode_info(
        &self,
        media_id: u64,
        episode: u32,
        _title: &str,
    ) -> Result<EpisodeInfo> {
        let series_id = self.series_id(media_id).await?;
        let token = self.anonymous_token().await?;

        let seasons: Vec<Season> = self
            .listing(&format!("/content/v2/cms/series/{series_id}/seasons"), &token)
            .await?;
        let season = seasons
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::NotFound(format!("seasons of {series_id}")))?;
        debug!(%series_id, season = %season.id, "using first season");

        let episodes: Vec<Episode> = self
            .listing(&format!("/content/v2/cms/seasons/{}/episodes", season.id), &token)
            .await?;
        let found = episode
            .checked_sub(1)
            .and_then(|index| episodes.into_iter().nth(index as usize))
            .ok_or_else(|| ProviderError::NotFound(format!("episode {episode} of {series_id}")))?;

        Ok(EpisodeInfo {
            episode_handle: found.id,
            episode_title: found
                .title
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| format!("Episode {episode}")),
            media_kind: None,
            internal_show_id: Some(series_id),
        })
    }

    async fn fetch_video_link(
        &self,
        _info: &EpisodeInfo,
        _quality: &str,
        _translation: Translation,
    ) -> Result<VideoDescriptor> {
        Err(ProviderError::NotImplemented("crunchyroll playback (DRM-protected)"))
    }
}

/// `https://www.crunchyroll.com/series/GG5H5XQX4/frieren` → `GG5H5XQX4`
fn series_id_from_url(page: &str) -> Option<String> {
    let url = Url::parse(page).ok()?;
    let segments: Vec<&str> = url.path_segments()?.filter(|s| !s.is_empty()).collect();
    if let Some(pos) = segments.iter().position(|s| *s == "series") {
        return segments.get(pos + 1).map(|id| id.to_string());
    }
    segments
        .len()
        .checked_sub(2)
        .and_then(|idx| segments.get(idx))
        .map(|id| id.to_string())
}
