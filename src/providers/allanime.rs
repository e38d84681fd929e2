use futures::future::join_all;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::value::RawValue;
use tracing::debug;
use url::Url;

use super::Provider;
use crate::cache::ProviderCache;
use crate::decode::{decode_path, with_clock_json};
use crate::error::{ProviderError, Result, UpstreamError};
use crate::http::HttpClient;
use crate::scrape::{extract_source_pairs, find_labelled, normalize_source_blob, render_source_lines};
use crate::types::{EpisodeInfo, Translation, VideoDescriptor};

mod mirrors;

pub use mirrors::{ClockShape, MirrorBrand, MirrorLinks};
use mirrors::{
    ClockResponse, classify, direct_links, english_subtitles, expand_repackager, merge_branches,
    parse_master_playlist,
};

pub const NAME: &str = "allanime";

const ALLANIME_API_URL: &str = "https://api.allanime.day/api";
const ALLANIME_BASE_URL: &str = "https://allanime.day";
const ALLANIME_REFERER: &str = "https://allmanga.to";
const MIRROR_USER_AGENT: &str = "uwu";

/// Where the GraphQL API and the clock mirrors live.
#[derive(Debug, Clone)]
pub struct AllAnimeEndpoints {
    pub api_url: String,
    pub base_url: String,
    pub referer: String,
}

impl Default for AllAnimeEndpoints {
    fn default() -> Self {
        Self {
            api_url: ALLANIME_API_URL.to_string(),
            base_url: ALLANIME_BASE_URL.to_string(),
            referer: ALLANIME_REFERER.to_string(),
        }
    }
}

pub struct AllAnime {
    http: HttpClient,
    cache: ProviderCache,
    endpoints: AllAnimeEndpoints,
}

impl AllAnime {
    pub fn new(http: HttpClient, cache: ProviderCache) -> Self {
        Self::with_endpoints(http, cache, AllAnimeEndpoints::default())
    }

    pub fn with_endpoints(
        http: HttpClient,
        cache: ProviderCache,
        endpoints: AllAnimeEndpoints,
    ) -> Self {
        Self {
            http,
            cache,
            endpoints,
        }
    }

    async fn graphql<T: DeserializeOwned>(
        &self,
        query: &str,
        variables: serde_json::Value,
    ) -> Result<T> {
        let body = serde_json::json!({ "query": query, "variables": variables });
        let envelope: GraphQlEnvelope<T> = self
            .http
            .post(&self.endpoints.api_url)
            .referer(&self.endpoints.referer)
            .header("Origin", &self.endpoints.base_url)
            .header("Accept", "application/json")
            .json_body(&body)
            .json()
            .await?;
        Self::extract_data(envelope)
    }

    fn extract_data<T>(envelope: GraphQlEnvelope<T>) -> Result<T> {
        if let Some(errors) = envelope.errors {
            let joined = errors
                .into_iter()
                .map(|e| e.message)
                .collect::<Vec<_>>()
                .join("; ");
            return Err(UpstreamError::shape(NAME, format!("API error: {joined}")).into());
        }
        envelope
            .data
            .ok_or_else(|| UpstreamError::shape(NAME, "API returned empty response").into())
    }

    async fn search_show(&self, title: &str) -> Result<SearchEdge> {
        debug!(stage = "SEARCHING", title, "searching allanime");
        let query = title.trim().replace(' ', "+");
        let payload: SearchPayload = self
            .graphql(
                SEARCH_SHOWS_QUERY,
                serde_json::json!({
                    "search": {
                        "allowAdult": false,
                        "allowUnknown": false,
                        "query": query,
                    },
                    "limit": 40,
                    "page": 1,
                    "translationType": Translation::Sub.as_str(),
                    "countryOrigin": "ALL"
                }),
            )
            .await?;
        let show = payload
            .shows
            .edges
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::NotFound(title.to_string()))?;
        debug!(stage = "SHOW_FOUND", id = %show.id, name = %show.name, "taking first search result");
        Ok(show)
    }

    /// The episode's `sourceUrls` value, untouched.
    async fn fetch_source_blob(
        &self,
        show_id: &str,
        translation: Translation,
        episode: &str,
    ) -> Result<String> {
        let payload: EpisodePayload = self
            .graphql(
                EPISODE_SOURCES_QUERY,
                serde_json::json!({
                    "showId": show_id,
                    "translationType": translation.as_str(),
                    "episodeString": episode
                }),
            )
            .await?;
        let blob = payload
            .episode
            .and_then(|episode| episode.source_urls)
            .map(|raw| raw.get().to_string())
            .filter(|raw| !matches!(raw.trim(), "null" | "[]" | ""))
            .ok_or_else(|| {
                ProviderError::NoLinksFound(format!(
                    "episode {episode} ({}) has no sources",
                    translation.as_str()
                ))
            })?;
        debug!(stage = "SOURCES_FETCHED", show_id, episode, bytes = blob.len(), "episode sources");
        Ok(blob)
    }

    /// Fans out to all five mirrors at once and merges what comes back.
    async fn resolve_mirrors(&self, blob: &str) -> Result<MirrorLinks> {
        let pairs = extract_source_pairs(&normalize_source_blob(blob));
        let lines = render_source_lines(&pairs);
        debug!(stage = "MIRRORS_RESOLVING", sources = pairs.len(), "resolving mirrors");

        let branches = join_all(
            MirrorBrand::ALL.map(|brand| self.resolve_mirror(brand, &lines)),
        )
        .await;
        let merged = merge_branches(branches)?;
        debug!(
            stage = "LINKS_MERGED",
            qualities = ?merged.qualities.labels().collect::<Vec<_>>(),
            subtitles = merged.subtitles.len(),
            "mirror links merged"
        );
        Ok(merged)
    }

    /// A failing mirror contributes nothing rather than failing the episode.
    async fn resolve_mirror(&self, brand: MirrorBrand, lines: &str) -> MirrorLinks {
        match self.try_resolve_mirror(brand, lines).await {
            Ok(links) => {
                debug!(mirror = brand.name(), qualities = links.qualities.len(), "mirror resolved");
                links
            }
            Err(err) => {
                debug!(mirror = brand.name(), error = %err, "mirror unavailable");
                MirrorLinks::default()
            }
        }
    }

    async fn try_resolve_mirror(&self, brand: MirrorBrand, lines: &str) -> Result<MirrorLinks> {
        let Some(encoded) = find_labelled(lines, brand.label()) else {
            debug!(mirror = brand.name(), "mirror not offered for this episode");
            return Ok(MirrorLinks::default());
        };
        let path = with_clock_json(&decode_path(&encoded));
        let url = if path.starts_with("http") {
            path
        } else {
            format!("{}{path}", self.endpoints.base_url.trim_end_matches('/'))
        };

        let body = self.mirror_get(&url).await?;
        let response: ClockResponse = serde_json::from_str(&body)
            .map_err(|source| UpstreamError::Json { url: url.clone(), source })?;

        let qualities = match classify(&response) {
            ClockShape::Repackager(link) => expand_repackager(&link),
            ClockShape::MasterPlaylist(link) => {
                let playlist_url = Url::parse(&link).map_err(|err| {
                    UpstreamError::shape(NAME, format!("bad playlist url {link}: {err}"))
                })?;
                let playlist = self.mirror_get(&link).await?;
                parse_master_playlist(&playlist, &playlist_url)
            }
            ClockShape::Direct => direct_links(&response, &body),
        };
        Ok(MirrorLinks {
            qualities,
            subtitles: english_subtitles(&response),
        })
    }

    async fn mirror_get(&self, url: &str) -> Result<String> {
        Ok(self
            .http
            .get(url)
            .referer(&self.endpoints.referer)
            .user_agent(MIRROR_USER_AGENT)
            .text()
            .await?)
    }
}

impl Provider for AllAnime {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn fetch_episode_info(
        &self,
        media_id: u64,
        episode: u32,
        title: &str,
    ) -> Result<EpisodeInfo> {
        if let Some(entry) = self.cache.load(NAME, media_id)? {
            debug!(media_id, show_id = %entry.provider_id, "show id from cache");
            return Ok(EpisodeInfo::numbered(episode, entry.provider_id));
        }
        let show = self.search_show(title).await?;
        Ok(EpisodeInfo::numbered(episode, show.id))
    }

    async fn fetch_video_link(
        &self,
        info: &EpisodeInfo,
        quality: &str,
        translation: Translation,
    ) -> Result<VideoDescriptor> {
        let show_id = info
            .internal_show_id
            .as_deref()
            .ok_or_else(|| UpstreamError::shape(NAME, "episode info carries no show id"))?;
        let blob = self
            .fetch_source_blob(show_id, translation, &info.episode_handle)
            .await?;
        let links = self.resolve_mirrors(&blob).await?;

        let video_url = links.qualities.select(quality).ok_or_else(|| {
            ProviderError::NoLinksFound(format!("no link for quality {quality:?}"))
        })?;
        debug!(stage = "QUALITY_SELECTED", quality, url = video_url, "picked link");

        let descriptor = VideoDescriptor::new(video_url)
            .with_referer(&self.endpoints.referer)
            .with_subtitles(links.subtitles);
        debug!(stage = "DONE", "allanime resolution finished");
        Ok(descriptor)
    }
}

#[derive(Debug, Deserialize)]
struct GraphQlEnvelope<T> {
    data: Option<T>,
    errors: Option<Vec<GraphQlError>>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct SearchPayload {
    shows: SearchShows,
}

#[derive(Debug, Deserialize)]
struct SearchShows {
    #[serde(default)]
    edges: Vec<SearchEdge>,
}

#[derive(Debug, Deserialize)]
struct SearchEdge {
    #[serde(rename = "_id")]
    id: String,
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct EpisodePayload {
    episode: Option<EpisodeSources>,
}

#[derive(Debug, Deserialize)]
struct EpisodeSources {
    #[serde(rename = "sourceUrls")]
    #[serde(default)]
    source_urls: Option<Box<RawValue>>,
}

pub(crate) const SEARCH_SHOWS_QUERY: &str = r#"query($search: SearchInput, $limit: Int, $page: Int, $translationType: VaildTranslationTypeEnumType, $countryOrigin: VaildCountryOriginEnumType) {
  shows(search: $search, limit: $limit, page: $page, translationType: $translationType, countryOrigin: $countryOrigin) {
    edges {
      _id
      name
      availableEpisodes
    }
  }
}"#;

pub(crate) const EPISODE_SOURCES_QUERY: &str = r#"query($showId: String!, $translationType: VaildTranslationTypeEnumType!, $episodeString: String!) {
  episode(showId: $showId, translationType: $translationType, episodeString: $episodeString) {
    episodeString
        sourceUrls
  }
}"#;
