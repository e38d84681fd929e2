use tracing::{debug, info};

use crate::cache::ProviderCache;
use crate::error::{ProviderError, Result};
use crate::http::HttpClient;
use crate::types::{EpisodeInfo, Translation, VideoDescriptor};

pub mod allanime;
pub mod aniwatch;
pub mod aniworld;
pub mod crunchyroll;
pub mod hdrezka;
pub mod malsync;
pub mod yugen;

use allanime::AllAnime;
use aniwatch::AniWatch;
use aniworld::AniWorld;
use crunchyroll::Crunchyroll;
use hdrezka::HdRezka;
use yugen::Yugen;

/// One upstream streaming site.
#[allow(async_fn_in_trait)]
pub trait Provider {
    /// Registry key and cache namespace.
    fn name(&self) -> &'static str;

    /// Resolves a tracked title + episode number to this site's episode handle.
    ///
    /// Consults the id cache first; a cached show id skips the search.
    async fn fetch_episode_info(
        &self,
        media_id: u64,
        episode: u32,
        title: &str,
    ) -> Result<EpisodeInfo>;

    async fn fetch_video_link(
        &self,
        info: &EpisodeInfo,
        quality: &str,
        translation: Translation,
    ) -> Result<VideoDescriptor>;
}

pub const PROVIDER_NAMES: &[&str] = &[
    allanime::NAME,
    aniwatch::NAME,
    yugen::NAME,
    hdrezka::NAME,
    aniworld::NAME,
    crunchyroll::NAME,
];

/// Name-dispatched provider, as handed out by [`ProviderRegistry::get`].
pub enum AnyProvider {
    AllAnime(AllAnime),
    AniWatch(AniWatch),
    Yugen(Yugen),
    HdRezka(HdRezka),
    AniWorld(AniWorld),
    Crunchyroll(Crunchyroll),
}

macro_rules! dispatch {
    ($self:ident, $inner:ident => $body:expr) => {
        match $self {
            AnyProvider::AllAnime($inner) => $body,
            AnyProvider::AniWatch($inner) => $body,
            AnyProvider::Yugen($inner) => $body,
            AnyProvider::HdRezka($inner) => $body,
            AnyProvider::AniWorld($inner) => $body,
            AnyProvider::Crunchyroll($inner) => $body,
        }
    };
}

impl Provider for AnyProvider {
    fn name(&self) -> &'static str {
        dispatch!(self, p => p.name())
    }

    async fn fetch_episode_info(
        &self,
        media_id: u64,
        episode: u32,
        title: &str,
    ) -> Result<EpisodeInfo> {
        dispatch!(self, p => p.fetch_episode_info(media_id, episode, title).await)
    }

    async fn fetch_video_link(
        &self,
        info: &EpisodeInfo,
        quality: &str,
        translation: Translation,
    ) -> Result<VideoDescriptor> {
        dispatch!(self, p => p.fetch_video_link(info, quality, translation).await)
    }
}

/// Builds providers by name around one shared HTTP client and cache handle.
#[derive(Debug, Clone)]
pub struct ProviderRegistry {
    http: HttpClient,
    cache: ProviderCache,
}

impl ProviderRegistry {
    pub fn new(http: HttpClient, cache: ProviderCache) -> Self {
        Self { http, cache }
    }

    pub fn names() -> &'static [&'static str] {
        PROVIDER_NAMES
    }

    pub fn cache(&self) -> &ProviderCache {
        &self.cache
    }

    pub fn get(&self, name: &str) -> Result<AnyProvider> {
        debug!(provider = name, "looking up provider");
        let http = self.http.clone();
        let cache = self.cache.clone();
        let provider = match name.trim().to_lowercase().as_str() {
            allanime::NAME => AnyProvider::AllAnime(AllAnime::new(http, cache)),
            aniwatch::NAME => AnyProvider::AniWatch(AniWatch::new(http, cache)),
            yugen::NAME => AnyProvider::Yugen(Yugen::new(http, cache)),
            hdrezka::NAME => AnyProvider::HdRezka(HdRezka::new(http, cache)),
            aniworld::NAME => AnyProvider::AniWorld(AniWorld::new(http, cache)),
            crunchyroll::NAME => AnyProvider::Crunchyroll(Crunchyroll::new(http, cache)),
            _ => return Err(ProviderError::UnknownProvider(name.to_string())),
        };
        info!(provider = provider.name(), "using provider");
        Ok(provider)
    }
}
