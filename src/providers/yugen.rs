use regex::Regex;
use scraper::{Html, Selector};
use serde::Deserialize;
use std::sync::OnceLock;
use tracing::debug;

use super::{Provider, malsync};
use crate::cache::ProviderCache;
use crate::error::{ProviderError, Result, UpstreamError};
use crate::http::HttpClient;
use crate::scrape::{first_capture, leading_number};
use crate::types::{EpisodeInfo, Translation, VideoDescriptor};

pub const NAME: &str = "yugen";

const YUGEN_BASE_URL: &str = "https://yugenanime.tv";
const MAL_SITE: &str = "YugenAnime";

static MAIN_EMBED: OnceLock<Regex> = OnceLock::new();

fn main_embed_pattern() -> &'static Regex {
    MAIN_EMBED.get_or_init(|| Regex::new(r"/e/([^/]+)/?").unwrap())
}

pub struct Yugen {
    http: HttpClient,
    cache: ProviderCache,
    base_url: String,
    mal_backup_url: String,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    #[serde(default)]
    hls: Vec<String>,
}

impl Yugen {
    pub fn new(http: HttpClient, cache: ProviderCache) -> Self {
        Self::with_base_urls(http, cache, YUGEN_BASE_URL, malsync::MAL_BACKUP_URL)
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

    /// The show's `/anime/` page URL, from cache or mal-backup.
    async fn anime_url(&self, media_id: u64) -> Result<String> {
        if let Some(entry) = self.cache.load(NAME, media_id)? {
            debug!(media_id, url = %entry.provider_id, "anime url from cache");
            return Ok(entry.provider_id);
        }
        malsync::site_url(&self.http, &self.mal_backup_url, media_id, MAL_SITE).await
    }
}

impl Provider for Yugen {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn fetch_episode_info(
        &self,
        media_id: u64,
        episode: u32,
        _title: &str,
    ) -> Result<EpisodeInfo> {
        let anime_url = self.anime_url(media_id).await?;
        let watch_url = watch_page_url(&anime_url, episode);
        let page = self.http.get(&watch_url).text().await?;
        let handle = embed_id(&page)
            .ok_or_else(|| UpstreamError::shape(NAME, format!("no embed on {watch_url}")))?;
        debug!(%watch_url, %handle, "episode embed found");
        Ok(EpisodeInfo {
            episode_handle: handle,
            episode_title: episode_title(&page, episode)
                .unwrap_or_else(|| format!("Episode {episode}")),
            media_kind: None,
            internal_show_id: Some(anime_url),
        })
    }

    async fn fetch_video_link(
        &self,
        info: &EpisodeInfo,
        quality: &str,
        translation: Translation,
    ) -> Result<VideoDescriptor> {
        let ac = match translation {
            Translation::Sub => "0",
            Translation::Dub => "1",
        };
        let response: EmbedResponse = self
            .http
            .post(format!("{}/api/embed/", self.base_url))
            .xhr()
            .form(&[("id", info.episode_handle.as_str()), ("ac", ac)])
            .json()
            .await?;
        let playlist = response
            .hls
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::NoLinksFound("embed api returned no hls".into()))?;
        Ok(VideoDescriptor::new(apply_quality(&playlist, quality))
            .with_referer(format!("{}/", self.base_url)))
    }
}

/// `https://yugenanime.tv/anime/1/x/` → `https://yugenanime.tv/watch/1/x/<episode>/`
fn watch_page_url(anime_url: &str, episode: u32) -> String {
    let watch = anime_url.replacen("tv/anime", "tv/watch", 1);
    let sep = if watch.ends_with('/') { "" } else { "/" };
    format!("{watch}{sep}{episode}/")
}

fn embed_id(page: &str) -> Option<String> {
    let doc = Html::parse_document(page);
    let sel = Selector::parse("iframe#main-embed").expect("valid CSS selector");
    let src = doc.select(&sel).next()?.value().attr("src")?.to_string();
    first_capture(main_embed_pattern(), &src, 1)
}

/// Text after `<episode> : ` in the page, e.g. `3 : Killing Magic`.
fn episode_title(page: &str, episode: u32) -> Option<String> {
    let pattern = Regex::new(&format!(r"\b{episode}\s:\s([^<]*)")).ok()?;
    first_capture(&pattern, page, 1)
        .map(|title| title.trim().to_string())
        .filter(|title| !title.is_empty())
}

fn apply_quality(playlist: &str, quality: &str) -> String {
    match leading_number(quality) {
        Some(q) => playlist.replacen(".m3u8", &format!(".{q}.m3u8"), 1),
        None => playlist.to_string(),
    }
}
