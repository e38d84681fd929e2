use regex::Regex;
use scraper::{Html, Selector};
use serde::Deserialize;
use std::sync::OnceLock;
use tracing::debug;

use super::{Provider, malsync};
use crate::cache::ProviderCache;
use crate::error::{ProviderError, Result, UpstreamError};
use crate::http::HttpClient;
use crate::scrape::{all_captures, first_capture, leading_number, unescape_json_slashes};
use crate::types::{EpisodeInfo, Translation, VideoDescriptor};

pub const NAME: &str = "aniwatch";

const ANIWATCH_BASE_URL: &str = "https://hianime.to";
const MAL_SITE: &str = "Zoro";

static SITE_ID: OnceLock<Regex> = OnceLock::new();
static EMBED_LINK: OnceLock<Regex> = OnceLock::new();
static SOURCE_FILE: OnceLock<Regex> = OnceLock::new();

fn site_id_pattern() -> &'static Regex {
    SITE_ID.get_or_init(|| Regex::new(r"-([0-9]+)/?$").unwrap())
}

fn embed_link_pattern() -> &'static Regex {
    EMBED_LINK.get_or_init(|| Regex::new(r"(.*)/embed-([246])/e-([0-9])/(.*)\?k=1").unwrap())
}

fn source_file_pattern() -> &'static Regex {
    SOURCE_FILE.get_or_init(|| Regex::new(r#""file":"([^"]*)""#).unwrap())
}

pub struct AniWatch {
    http: HttpClient,
    cache: ProviderCache,
    base_url: String,
    mal_backup_url: String,
}

#[derive(Debug, Deserialize)]
struct HtmlFragment {
    html: String,
}

#[derive(Debug, Deserialize)]
struct EmbedLink {
    link: String,
}

impl AniWatch {
    pub fn new(http: HttpClient, cache: ProviderCache) -> Self {
        Self::with_base_urls(http, cache, ANIWATCH_BASE_URL, malsync::MAL_BACKUP_URL)
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

    async fn site_id(&self, media_id: u64) -> Result<String> {
        if let Some(entry) = self.cache.load(NAME, media_id)? {
            debug!(media_id, site_id = %entry.provider_id, "site id from cache");
            return Ok(entry.provider_id);
        }
        let page = malsync::site_url(&self.http, &self.mal_backup_url, media_id, MAL_SITE).await?;
        let path = page.split('?').next().unwrap_or(&page);
        first_capture(site_id_pattern(), path, 1)
            .ok_or_else(|| UpstreamError::shape(NAME, format!("no id in {page}")).into())
    }

    async fn ajax_html(&self, path: &str) -> Result<String> {
        let fragment: HtmlFragment = self
            .http
            .get(format!("{}{path}", self.base_url))
            .xhr()
            .json()
            .await?;
        Ok(fragment.html)
    }
}

impl Provider for AniWatch {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn fetch_episode_info(
        &self,
        media_id: u64,
        episode: u32,
        _title: &str,
    ) -> Result<EpisodeInfo> {
        let site_id = self.site_id(media_id).await?;
        let html = self
            .ajax_html(&format!("/ajax/v2/episode/list/{site_id}"))
            .await?;
        let (handle, title) = find_episode(&html, episode)
            .ok_or_else(|| ProviderError::NotFound(format!("episode {episode} of {site_id}")))?;
        debug!(%site_id, episode, %handle, "episode found");
        Ok(EpisodeInfo {
            episode_handle: handle,
            episode_title: title.unwrap_or_else(|| format!("Episode {episode}")),
            media_kind: None,
            internal_show_id: Some(site_id),
        })
    }

    async fn fetch_video_link(
        &self,
        info: &EpisodeInfo,
        quality: &str,
        translation: Translation,
    ) -> Result<VideoDescriptor> {
        let servers = self
            .ajax_html(&format!(
                "/ajax/v2/episode/servers?episodeId={}",
                info.episode_handle
            ))
            .await?;
        let server_id = find_server(&servers, translation.as_str())
            .or_else(|| find_server(&servers, "raw"))
            .ok_or_else(|| ProviderError::NoLinksFound("no streaming server listed".into()))?;

        let embed: EmbedLink = self
            .http
            .get(format!(
                "{}/ajax/v2/episode/sources?id={server_id}",
                self.base_url
            ))
            .xhr()
            .json()
            .await?;
        let caps = embed_link_pattern().captures(&embed.link).ok_or_else(|| {
            UpstreamError::shape(NAME, format!("unrecognised embed link {}", embed.link))
        })?;
        let (host, kind, e_number, source_id) = (&caps[1], &caps[2], &caps[3], &caps[4]);
        debug!(host, kind, source_id, "embed resolved");

        let body = self
            .http
            .get(format!(
                "{host}/embed-{kind}/ajax/e-{e_number}/getSources?id={source_id}"
            ))
            .referer(&embed.link)
            .xhr()
            .text()
            .await?;
        let (video_url, subtitles) = parse_sources(&body, quality)
            .ok_or_else(|| ProviderError::NoLinksFound("getSources carried no playlist".into()))?;

        Ok(VideoDescriptor::new(video_url)
            .with_referer(format!("{host}/"))
            .with_subtitles(subtitles))
    }
}

/// `(data-id, title)` of the `a.ep-item` numbered `episode`.
fn find_episode(html: &str, episode: u32) -> Option<(String, Option<String>)> {
    let doc = Html::parse_fragment(html);
    let sel = Selector::parse("a.ep-item[data-number][data-id]").expect("valid CSS selector");
    let wanted = episode.to_string();
    doc.select(&sel)
        .find(|el| el.value().attr("data-number").map(str::trim) == Some(wanted.as_str()))
        .and_then(|el| {
            let id = el.value().attr("data-id")?.to_string();
            let title = el
                .value()
                .attr("title")
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string);
            Some((id, title))
        })
}

fn find_server(html: &str, kind: &str) -> Option<String> {
    let doc = Html::parse_fragment(html);
    let sel = Selector::parse(".server-item[data-type][data-id]").expect("valid CSS selector");
    doc.select(&sel)
        .find(|el| el.value().attr("data-type") == Some(kind))
        .and_then(|el| el.value().attr("data-id"))
        .map(str::to_string)
}

/// First `.m3u8` file plus every `.vtt` track from a getSources body.
fn parse_sources(body: &str, quality: &str) -> Option<(String, Vec<String>)> {
    let files: Vec<String> = all_captures(source_file_pattern(), body, 1)
        .iter()
        .map(|file| unescape_json_slashes(file))
        .collect();
    let mut video_url = files.iter().find(|f| f.ends_with(".m3u8"))?.clone();
    if let Some(q) = leading_number(quality) {
        video_url = video_url.replacen("/playlist.m3u8", &format!("/{q}/index.m3u8"), 1);
    }
    let subtitles = files.into_iter().filter(|f| f.ends_with(".vtt")).collect();
    Some((video_url, subtitles))
}
