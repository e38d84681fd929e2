use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Translation {
    #[default]
    Sub,
    Dub,
}

impl Translation {
    pub fn as_str(self) -> &'static str {
        match self {
            Translation::Sub => "sub",
            Translation::Dub => "dub",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Translation::Sub => "Sub",
            Translation::Dub => "Dub",
        }
    }
}

impl fmt::Display for Translation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Series,
    Film,
}

/// A provider's handle for one episode, produced by `fetch_episode_info`.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct EpisodeInfo {
    pub episode_handle: String,
    pub episode_title: String,
    pub media_kind: Option<MediaKind>,
    /// Show-level id on the provider's site; this is what the id cache keeps.
    pub internal_show_id: Option<String>,
}

impl EpisodeInfo {
    /// Info for sites that address episodes by their number.
    pub fn numbered(episode: u32, show_id: impl Into<String>) -> Self {
        Self {
            episode_handle: episode.to_string(),
            episode_title: format!("Episode {episode}"),
            media_kind: None,
            internal_show_id: Some(show_id.into()),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct VideoDescriptor {
    pub video_url: String,
    pub subtitle_urls: Vec<String>,
    pub referer: Option<String>,
}

impl VideoDescriptor {
    pub fn new(video_url: impl Into<String>) -> Self {
        Self {
            video_url: video_url.into(),
            ..Self::default()
        }
    }

    pub fn with_referer(mut self, referer: impl Into<String>) -> Self {
        self.referer = Some(referer.into());
        self
    }

    pub fn with_subtitles(mut self, subtitles: Vec<String>) -> Self {
        self.subtitle_urls = subtitles;
        self
    }

    pub fn is_hls(&self) -> bool {
        self.video_url
            .split('?')
            .next()
            .is_some_and(|path| path.ends_with(".m3u8"))
    }
}
