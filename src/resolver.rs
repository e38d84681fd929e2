use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cache::ProviderCache;
use crate::error::{ProviderError, Result};
use crate::providers::{Provider, ProviderRegistry};
use crate::types::{EpisodeInfo, Translation, VideoDescriptor};

/// One "title + episode → playable URL" lookup.
#[derive(Debug, Clone)]
pub struct ResolveRequest {
    pub provider: String,
    pub media_id: u64,
    pub episode: u32,
    pub title: String,
    pub quality: String,
    pub translation: Translation,
}

#[derive(Debug, Clone, Serialize)]
pub struct Resolution {
    pub provider: &'static str,
    pub episode: EpisodeInfo,
    pub video: VideoDescriptor,
}

pub struct Resolver {
    registry: ProviderRegistry,
}

impl Resolver {
    pub fn new(registry: ProviderRegistry) -> Self {
        Self { registry }
    }

    pub async fn resolve(
        &self,
        request: &ResolveRequest,
        cancel: &CancellationToken,
    ) -> Result<Resolution> {
        let provider = self.registry.get(&request.provider)?;
        resolve_with(&provider, self.registry.cache(), request, cancel).await
    }
}

/// Runs both provider stages, racing them against `cancel`.
///
/// The show id is written to `cache` only once a video link came back;
/// a cancelled or failed resolution leaves the cache untouched.
pub async fn resolve_with<P: Provider>(
    provider: &P,
    cache: &ProviderCache,
    request: &ResolveRequest,
    cancel: &CancellationToken,
) -> Result<Resolution> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            info!(provider = provider.name(), "resolution cancelled");
            Err(ProviderError::Cancelled)
        }
        result = run(provider, cache, request) => result,
    }
}

async fn run<P: Provider>(
    provider: &P,
    cache: &ProviderCache,
    request: &ResolveRequest,
) -> Result<Resolution> {
    let episode = provider
        .fetch_episode_info(request.media_id, request.episode, &request.title)
        .await?;
    let video = provider
        .fetch_video_link(&episode, &request.quality, request.translation)
        .await?;

    if let Some(show_id) = &episode.internal_show_id {
        if let Err(err) = cache.save(provider.name(), request.media_id, show_id, &request.title) {
            warn!(error = %err, "could not record provider mapping");
        }
    }
    info!(
        provider = provider.name(),
        episode = %episode.episode_title,
        url = %video.video_url,
        hls = video.is_hls(),
        "resolved"
    );
    Ok(Resolution {
        provider: provider.name(),
        episode,
        video,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    /// Counts calls; `fetch_video_link` sleeps for `delay` first.
    struct FakeProvider {
        delay: Duration,
        fail_links: bool,
        link_calls: AtomicUsize,
    }

    impl FakeProvider {
        fn new(delay: Duration, fail_links: bool) -> Self {
            Self {
                delay,
                fail_links,
                link_calls: AtomicUsize::new(0),
            }
        }
    }

    impl Provider for FakeProvider {
        fn name(&self) -> &'static str {
            "fake"
        }

        async fn fetch_episode_info(
            &self,
            _media_id: u64,
            episode: u32,
            _title: &str,
        ) -> Result<EpisodeInfo> {
            Ok(EpisodeInfo::numbered(episode, "show-1"))
        }

        async fn fetch_video_link(
            &self,
            info: &EpisodeInfo,
            _quality: &str,
            _translation: Translation,
        ) -> Result<VideoDescriptor> {
            self.link_calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if self.fail_links {
                return Err(ProviderError::NoLinksFound("fake".into()));
            }
            Ok(VideoDescriptor::new(format!(
                "https://cdn.example/{}.mp4",
                info.episode_handle
            )))
        }
    }

    fn request() -> ResolveRequest {
        ResolveRequest {
            provider: "fake".into(),
            media_id: 42,
            episode: 5,
            title: "Some Show".into(),
            quality: "best".into(),
            translation: Translation::Sub,
        }
    }

    #[tokio::test]
    async fn success_records_show_id() {
        let dir = TempDir::new().unwrap();
        let cache = ProviderCache::new(dir.path().join("cache.ini"));
        let provider = FakeProvider::new(Duration::ZERO, false);

        let resolution = resolve_with(&provider, &cache, &request(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(resolution.video.video_url, "https://cdn.example/5.mp4");
        assert_eq!(resolution.provider, "fake");

        let entry = cache.load("fake", 42).unwrap().unwrap();
        assert_eq!(entry.provider_id, "show-1");
        assert_eq!(entry.title, "Some Show");
    }

    #[tokio::test]
    async fn failure_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let cache = ProviderCache::new(dir.path().join("cache.ini"));
        let provider = FakeProvider::new(Duration::ZERO, true);

        let err = resolve_with(&provider, &cache, &request(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::NoLinksFound(_)));
        assert!(cache.load("fake", 42).unwrap().is_none());
    }

    #[tokio::test]
    async fn cancelling_mid_flight_returns_cancelled_without_cache_write() {
        let dir = TempDir::new().unwrap();
        let cache = ProviderCache::new(dir.path().join("cache.ini"));
        let provider = FakeProvider::new(Duration::from_secs(30), false);
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let err = resolve_with(&provider, &cache, &request(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Cancelled));
        assert_eq!(provider.link_calls.load(Ordering::SeqCst), 1);
        assert!(cache.load("fake", 42).unwrap().is_none());
    }

    #[tokio::test]
    async fn already_cancelled_token_short_circuits() {
        let dir = TempDir::new().unwrap();
        let cache = ProviderCache::new(dir.path().join("cache.ini"));
        let provider = FakeProvider::new(Duration::ZERO, false);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = resolve_with(&provider, &cache, &request(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Cancelled));
        assert_eq!(provider.link_calls.load(Ordering::SeqCst), 0);
    }
}
