use regex::Regex;
use scraper::{Html, Selector};
use serde::Deserialize;
use std::sync::OnceLock;
use tracing::debug;

use super::{Provider, malsync};
use crate::cache::ProviderCache;
use crate::decode::decode_base64_str;
use crate::error::{ProviderError, Result, UpstreamError};
use crate::http::HttpClient;
use crate::scrape::first_capture;
use crate::types::{EpisodeInfo, Translation, VideoDescriptor};

pub const NAME: &str = "aniworld";

const ANIWORLD_BASE_URL: &str = "https://aniworld.to";
const DUB_LANG_KEY: &str = "1";
const SUB_LANG_KEY: &str = "3";

static QUOTED_M3U8: OnceLock<Regex> = OnceLock::new();
static QUOTED_BASE64: OnceLock<Regex> = OnceLock::new();

fn quoted_m3u8_pattern() -> &'static Regex {
    QUOTED_M3U8.get_or_init(|| Regex::new(r#"["'](https?://[^"']*\.m3u8[^"']*)["']"#).unwrap())
}

fn quoted_base64_pattern() -> &'static Regex {
    QUOTED_BASE64.get_or_init(|| Regex::new(r#"["']([A-Za-z0-9+/]{24,}={0,2})["']"#).unwrap())
}

pub struct AniWorld {
    http: HttpClient,
    cache: ProviderCache,
    base_url: String,
    mal_backup_url: String,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    #[serde(default)]
    title: String,
    link: String,
}

impl AniWorld {
    pub fn new(http: HttpClient, cache: ProviderCache) -> Self {
        Self::with_base_urls(http, cache, ANIWORLD_BASE_URL, malsync::MAL_BACKUP_URL)
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

    /// The romaji title mal-backup records for `media_id`, else `fallback`.
    async fn search_title(&self, media_id: u64, fallback: &str) -> Result<String> {
        match malsync::lookup(&self.http, &self.mal_backup_url, media_id).await {
            Ok(entry) => Ok(entry
                .title
                .filter(|title| !title.trim().is_empty())
                .unwrap_or_else(|| fallback.to_string())),
            Err(ProviderError::NotFound(_)) => {
                debug!(media_id, "no mal-backup entry, searching with the given title");
                Ok(fallback.to_string())
            }
            Err(err) => Err(err),
        }
    }

    async fn search(&self, title: &str) -> Result<String> {
        let results: Vec<SearchResult> = self
            .http
            .post(format!("{}/ajax/search", self.base_url))
            .xhr()
            .form(&[("keyword", title.trim())])
            .json()
            .await?;
        let first = results
            .into_iter()
            .find(|result| !result.link.is_empty())
            .ok_or_else(|| ProviderError::NotFound(title.to_string()))?;
        debug!(link = %first.link, title = %first.title, "taking first search result");
        Ok(first.link)
    }
}

impl Provider for AniWorld {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn fetch_episode_info(
        &self,
        media_id: u64,
        episode: u32,
        title: &str,
    ) -> Result<EpisodeInfo> {
        let link = match self.cache.load(NAME, media_id)? {
            Some(entry) => {
                debug!(media_id, link = %entry.provider_id, "show link from cache");
                entry.provider_id
            }
            None => {
                let title = self.search_title(media_id, title).await?;
                self.search(&title).await?
            }
        };
        Ok(EpisodeInfo::numbered(episode, link))
    }

    async fn fetch_video_link(
        &self,
        info: &EpisodeInfo,
        _quality: &str,
        translation: Translation,
    ) -> Result<VideoDescriptor> {
        let link = info
            .internal_show_id
            .as_deref()
            .ok_or_else(|| UpstreamError::shape(NAME, "episode info carries no show link"))?;
        let page = self
            .http
            .get(format!(
                "{}{}/staffel-1/episode-{}",
                self.base_url,
                link.trim_end_matches('/'),
                info.episode_handle
            ))
            .text()
            .await?;
        let redirect = hoster_redirect(&page, translation)
            .ok_or_else(|| ProviderError::NoLinksFound("episode lists no hoster".into()))?;
        debug!(%redirect, "following hoster redirect");

        // reqwest follows the redirect chain to the hoster's player page.
        let player = self
            .http
            .get(format!("{}{redirect}", self.base_url))
            .referer(&format!("{}/", self.base_url))
            .text()
            .await?;
        let video_url = find_playlist(&player)
            .ok_or_else(|| ProviderError::NoLinksFound("hoster page has no playlist".into()))?;
        Ok(VideoDescriptor::new(video_url))
    }
}

/// `/redirect/..` target of the hoster row for the wanted language, else the first row.
fn hoster_redirect(page: &str, translation: Translation) -> Option<String> {
    let doc = Html::parse_document(page);
    let sel = Selector::parse("li[data-lang-key][data-link-target]").expect("valid CSS selector");
    let wanted = match translation {
        Translation::Dub => DUB_LANG_KEY,
        Translation::Sub => SUB_LANG_KEY,
    };
    let rows: Vec<(&str, &str)> = doc
        .select(&sel)
        .filter_map(|el| {
            let key = el.value().attr("data-lang-key")?;
            let target = el.value().attr("data-link-target")?;
            target.starts_with("/redirect/").then_some((key, target))
        })
        .collect();
    rows.iter()
        .find(|(key, _)| *key == wanted)
        .or_else(|| rows.first())
        .map(|(_, target)| target.to_string())
}

/// First quoted `.m3u8` URL, plain or base64-encoded.
fn find_playlist(page: &str) -> Option<String> {
    if let Some(url) = first_capture(quoted_m3u8_pattern(), page, 1) {
        return Some(url);
    }
    quoted_base64_pattern()
        .captures_iter(page)
        .filter_map(|caps| decode_base64_str(&caps[1]))
        .find(|decoded| decoded.starts_with("http") && decoded.contains(".m3u8"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::encode_base64;
    use crate::http::DEFAULT_USER_AGENT;
    use std::time::Duration;
    use tempfile::TempDir;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(server: &MockServer, dir: &TempDir) -> AniWorld {
        let http = HttpClient::new(DEFAULT_USER_AGENT, Duration::from_secs(5)).unwrap();
        AniWorld::with_base_urls(
            http,
            ProviderCache::new(dir.path().join("cache.ini")),
            server.uri(),
            format!("{}/mal", server.uri()),
        )
    }

    const EPISODE_PAGE: &str = r#"<ul class="row">
        <li class="col-md-3 col-xs-12 col-sm-6 episodeLink1" data-lang-key="1" data-link-id="1" data-link-target="/redirect/1001" data-external-embed="false"><a class="watchEpisode" href="/redirect/1001"><h4>VOE</h4></a></li>
        <li class="col-md-3 col-xs-12 col-sm-6 episodeLink2" data-lang-key="3" data-link-id="2" data-link-target="/redirect/3003" data-external-embed="false"><a class="watchEpisode" href="/redirect/3003"><h4>VOE</h4></a></li>
    </ul>"#;

    #[test]
    fn picks_hoster_row_by_language_key() {
        assert_eq!(
            hoster_redirect(EPISODE_PAGE, Translation::Dub).as_deref(),
            Some("/redirect/1001")
        );
        assert_eq!(
            hoster_redirect(EPISODE_PAGE, Translation::Sub).as_deref(),
            Some("/redirect/3003")
        );
    }

    #[test]
    fn falls_back_to_first_row() {
        let page = r#"<li data-lang-key="2" data-link-target="/redirect/2002"></li>"#;
        assert_eq!(
            hoster_redirect(page, Translation::Sub).as_deref(),
            Some("/redirect/2002")
        );
        assert_eq!(hoster_redirect("<ul></ul>", Translation::Sub), None);
    }

    #[test]
    fn finds_plain_playlist() {
        let page = r#"<script>var sources = {'hls': 'https://delivery.example/engine/hls/ep/master.m3u8?t=1', 'video_height': 1080};</script>"#;
        assert_eq!(
            find_playlist(page).as_deref(),
            Some("https://delivery.example/engine/hls/ep/master.m3u8?t=1")
        );
    }

    #[test]
    fn finds_base64_playlist() {
        let url = "https://delivery.example/engine/hls/ep/master.m3u8";
        let page = format!(
            r#"<script>let nodes = ["aWdub3JlIG1lIHBsZWFzZQ==", "{}"];</script>"#,
            encode_base64(url.as_bytes())
        );
        assert_eq!(find_playlist(&page).as_deref(), Some(url));
        assert_eq!(find_playlist("<html></html>"), None);
    }

    #[tokio::test]
    async fn searches_and_follows_hoster_redirect() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/mal/154587.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "title": "Sousou no Frieren", "Sites": {}
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/ajax/search"))
            .and(body_string_contains("keyword=Sousou+no+Frieren"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                { "title": "Frieren - Nach dem Ende der Reise", "link": "/anime/stream/frieren" },
                { "title": "Other", "link": "/anime/stream/other" }
            ])))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/anime/stream/frieren/staffel-1/episode-7"))
            .respond_with(ResponseTemplate::new(200).set_body_string(EPISODE_PAGE))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/redirect/3003"))
            .respond_with(
                ResponseTemplate::new(302).insert_header("location", "/e/voe-player"),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/e/voe-player"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<script>var src = "https://delivery.example/ep7/master.m3u8";</script>"#,
            ))
            .expect(1)
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let provider = provider(&server, &dir);

        let info = provider.fetch_episode_info(154587, 7, "Frieren").await.unwrap();
        assert_eq!(info.internal_show_id.as_deref(), Some("/anime/stream/frieren"));

        let video = provider
            .fetch_video_link(&info, "best", Translation::Sub)
            .await
            .unwrap();
        assert_eq!(video.video_url, "https://delivery.example/ep7/master.m3u8");
    }

    #[tokio::test]
    async fn missing_mal_backup_entry_searches_with_given_title() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/mal/1.json"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/ajax/search"))
            .and(body_string_contains("keyword=Frieren"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                { "title": "Frieren", "link": "/anime/stream/frieren" }
            ])))
            .expect(1)
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let info = provider(&server, &dir)
            .fetch_episode_info(1, 2, "Frieren")
            .await
            .unwrap();
        assert_eq!(info.internal_show_id.as_deref(), Some("/anime/stream/frieren"));
    }

    #[tokio::test]
    async fn cached_link_skips_lookup_and_search() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/mal/154587.json"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/ajax/search"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let provider = provider(&server, &dir);
        provider
            .cache
            .save(NAME, 154587, "/anime/stream/frieren", "Frieren")
            .unwrap();

        let info = provider.fetch_episode_info(154587, 4, "Frieren").await.unwrap();
        assert_eq!(info.internal_show_id.as_deref(), Some("/anime/stream/frieren"));
        assert_eq!(info.episode_handle, "4");
    }
}
