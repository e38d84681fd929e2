//! HDRezka: HTML search, then the site's CDN ajax endpoint.
//!
//! Stream lists come back base64-encoded with `//_//` separators and
//! base64-encoded junk sprinkled in; [`decode_stream_field`] undoes that.

use regex::Regex;
use scraper::{Html, Selector};
use serde::Deserialize;
use std::sync::OnceLock;
use tracing::debug;
use url::Url;

use super::Provider;
use crate::cache::ProviderCache;
use crate::decode::{decode_base64_str, encode_base64};
use crate::error::{ProviderError, Result, UpstreamError};
use crate::http::HttpClient;
use crate::quality::QualityLinkSet;
use crate::scrape::first_capture;
use crate::types::{EpisodeInfo, MediaKind, Translation, VideoDescriptor};

pub const NAME: &str = "hdrezka";

const HDREZKA_BASE_URL: &str = "https://hdrezka.website";
const TRASH_ALPHABET: [char; 5] = ['@', '#', '!', '^', '$'];

static CDN_EVENTS: OnceLock<Regex> = OnceLock::new();
static SEASON_TAB: OnceLock<Regex> = OnceLock::new();
static BRACKETED_LINK: OnceLock<Regex> = OnceLock::new();
static TRASH_TOKENS: OnceLock<Vec<String>> = OnceLock::new();

fn cdn_events_pattern() -> &'static Regex {
    CDN_EVENTS
        .get_or_init(|| Regex::new(r"initCDN(Series|Movies)Events\((\d+),\s*(\d+)").unwrap())
}

fn season_tab_pattern() -> &'static Regex {
    SEASON_TAB.get_or_init(|| Regex::new(r#"data-tab_id="(\d+)""#).unwrap())
}

fn bracketed_link_pattern() -> &'static Regex {
    BRACKETED_LINK.get_or_init(|| Regex::new(r"\[([^\]]+)\]([^,\[]+)").unwrap())
}

/// Base64 of every 2- and 3-character string over `@#!^$`.
fn trash_tokens() -> &'static [String] {
    TRASH_TOKENS.get_or_init(|| {
        let mut tokens = Vec::with_capacity(150);
        for a in TRASH_ALPHABET {
            for b in TRASH_ALPHABET {
                tokens.push(encode_base64(format!("{a}{b}").as_bytes()));
            }
        }
        for a in TRASH_ALPHABET {
            for b in TRASH_ALPHABET {
                for c in TRASH_ALPHABET {
                    tokens.push(encode_base64(format!("{a}{b}{c}").as_bytes()));
                }
            }
        }
        tokens
    })
}

pub struct HdRezka {
    http: HttpClient,
    cache: ProviderCache,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct CdnResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    url: Option<String>,
    /// A bracketed list, or `false` when the episode has none.
    #[serde(default)]
    subtitle: serde_json::Value,
    #[serde(default)]
    message: Option<String>,
}

/// Ids scraped from a show page's player bootstrap call.
#[derive(Debug, PartialEq, Eq)]
struct PlayerIds {
    kind: MediaKind,
    id: String,
    translator_id: String,
    season: Option<String>,
}

impl HdRezka {
    pub fn new(http: HttpClient, cache: ProviderCache) -> Self {
        Self::with_base_url(http, cache, HDREZKA_BASE_URL)
    }

    pub fn with_base_url(http: HttpClient, cache: ProviderCache, base_url: impl Into<String>) -> Self {
        Self {
            http,
            cache,
            base_url: base_url.into(),
        }
    }

    fn referer(&self) -> String {
        format!("{}/", self.base_url.trim_end_matches('/'))
    }

    async fn search(&self, title: &str) -> Result<String> {
        let query = title
            .split_whitespace()
            .map(|word| urlencoding::encode(word).into_owned())
            .collect::<Vec<_>>()
            .join("+");
        let url = format!(
            "{}/search/?do=search&subaction=search&q={query}",
            self.base_url
        );
        let page = self.http.get(url).referer(&self.referer()).text().await?;
        let show_path = first_result_path(&page)
            .ok_or_else(|| ProviderError::NotFound(title.to_string()))?;
        debug!(%show_path, "taking first search result");
        Ok(show_path)
    }
}

impl Provider for HdRezka {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn fetch_episode_info(
        &self,
        media_id: u64,
        episode: u32,
        title: &str,
    ) -> Result<EpisodeInfo> {
        let show_path = match self.cache.load(NAME, media_id)? {
            Some(entry) => {
                debug!(media_id, path = %entry.provider_id, "show path from cache");
                entry.provider_id
            }
            None => self.search(title).await?,
        };
        let mut info = EpisodeInfo::numbered(episode, show_path.as_str());
        info.media_kind = Some(media_kind_of(&show_path));
        Ok(info)
    }

    async fn fetch_video_link(
        &self,
        info: &EpisodeInfo,
        quality: &str,
        _translation: Translation,
    ) -> Result<VideoDescriptor> {
        let show_path = info
            .internal_show_id
            .as_deref()
            .ok_or_else(|| UpstreamError::shape(NAME, "episode info carries no show path"))?;
        let page = self
            .http
            .get(format!("{}/{show_path}.html", self.base_url))
            .referer(&self.referer())
            .text()
            .await?;
        let ids = player_ids(&page)
            .ok_or_else(|| UpstreamError::shape(NAME, format!("no player on {show_path}")))?;
        debug!(id = %ids.id, translator = %ids.translator_id, kind = ?ids.kind, "player ids");

        let mut form = vec![
            ("id", ids.id.clone()),
            ("translator_id", ids.translator_id.clone()),
        ];
        if let Some(season) = &ids.season {
            form.push(("season", season.clone()));
            form.push(("episode", info.episode_handle.clone()));
            form.push(("action", "get_stream".to_string()));
        } else {
            form.push(("action", "get_movie".to_string()));
        }

        let response: CdnResponse = self
            .http
            .post(format!("{}/ajax/get_cdn_series/", self.base_url))
            .referer(&self.referer())
            .xhr()
            .form(&form)
            .json()
            .await?;
        let encoded = match response.url.filter(|url| response.success && !url.is_empty()) {
            Some(url) => url,
            None => {
                let reason = response.message.unwrap_or_else(|| "no stream url".to_string());
                return Err(ProviderError::NoLinksFound(reason));
            }
        };
        let decoded = decode_stream_field(&encoded)
            .ok_or_else(|| UpstreamError::shape(NAME, "stream field did not decode"))?;
        let links = parse_bracketed_links(&decoded);
        let video_url = links
            .select(quality)
            .ok_or_else(|| ProviderError::NoLinksFound("decoded stream list is empty".into()))?;

        let subtitles = response
            .subtitle
            .as_str()
            .map(parse_bracketed_urls)
            .unwrap_or_default();
        Ok(VideoDescriptor::new(video_url)
            .with_referer(self.referer())
            .with_subtitles(subtitles))
    }
}

/// `https://hdrezka.website/animation/adventures/123-name.html` → `animation/adventures/123-name`
fn first_result_path(page: &str) -> Option<String> {
    let doc = Html::parse_document(page);
    let sel = Selector::parse(".b-content__inline_item-link a").expect("valid CSS selector");
    let href = doc.select(&sel).next()?.value().attr("href")?;
    let path = match Url::parse(href) {
        Ok(url) => url.path().to_string(),
        Err(_) => href.to_string(),
    };
    let path = path.trim_matches('/');
    let path = path.strip_suffix(".html").unwrap_or(path);
    (!path.is_empty()).then(|| path.to_string())
}

fn media_kind_of(show_path: &str) -> MediaKind {
    if show_path.split('/').next() == Some("films") {
        MediaKind::Film
    } else {
        MediaKind::Series
    }
}

fn player_ids(page: &str) -> Option<PlayerIds> {
    let caps = cdn_events_pattern().captures(page)?;
    let kind = match &caps[1] {
        "Movies" => MediaKind::Film,
        _ => MediaKind::Series,
    };
    let season = match kind {
        MediaKind::Series => {
            Some(first_capture(season_tab_pattern(), page, 1).unwrap_or_else(|| "1".to_string()))
        }
        MediaKind::Film => None,
    };
    Some(PlayerIds {
        kind,
        id: caps[2].to_string(),
        translator_id: caps[3].to_string(),
        season,
    })
}

/// Strips the `#h` marker, separators and junk tokens, then base64-decodes.
pub fn decode_stream_field(encoded: &str) -> Option<String> {
    let body = encoded.strip_prefix("#h").unwrap_or(encoded);
    let mut cleaned = body.replace("//_//", "");
    for token in trash_tokens() {
        cleaned = cleaned.replace(token.as_str(), "");
    }
    decode_base64_str(&cleaned)
}

/// `[720p]a or b,[1080p]c` → `{720: a, 1080: c}`; the first alternative wins.
pub fn parse_bracketed_links(decoded: &str) -> QualityLinkSet {
    bracketed_link_pattern()
        .captures_iter(decoded)
        .filter_map(|caps| {
            let url = first_alternative(&caps[2])?;
            Some((caps[1].to_string(), url))
        })
        .collect()
}

fn parse_bracketed_urls(list: &str) -> Vec<String> {
    bracketed_link_pattern()
        .captures_iter(list)
        .filter_map(|caps| first_alternative(&caps[2]))
        .collect()
}

fn first_alternative(urls: &str) -> Option<String> {
    let url = urls.split(" or ").next()?.trim();
    (!url.is_empty()).then(|| url.to_string())
}
