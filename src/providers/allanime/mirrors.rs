//! The five CDN mirrors AllAnime multiplexes through, and the three clock
//! response shapes they answer with.

use regex::Regex;
use serde::Deserialize;
use std::sync::OnceLock;
use url::Url;

use crate::error::{ProviderError, Result};
use crate::quality::QualityLinkSet;
use crate::scrape::{all_captures, first_capture, leading_number, unescape_json_slashes};

static REPACKAGER_QUALITIES: OnceLock<Regex> = OnceLock::new();
static REPACKAGER_SEGMENT: OnceLock<Regex> = OnceLock::new();
static STREAM_RESOLUTION: OnceLock<Regex> = OnceLock::new();
static BARE_HLS_URL: OnceLock<Regex> = OnceLock::new();

fn repackager_qualities() -> &'static Regex {
    REPACKAGER_QUALITIES.get_or_init(|| Regex::new(r"/,([^/]*),/mp4").unwrap())
}

fn repackager_segment() -> &'static Regex {
    REPACKAGER_SEGMENT.get_or_init(|| Regex::new(r",[^/]*").unwrap())
}

fn stream_resolution() -> &'static Regex {
    STREAM_RESOLUTION.get_or_init(|| Regex::new(r"RESOLUTION=\d+x(\d+)").unwrap())
}

fn bare_hls_url() -> &'static Regex {
    BARE_HLS_URL.get_or_init(|| Regex::new(r#"hls","url":"([^"]*)""#).unwrap())
}

const REPACKAGER_HOST: &str = "repackager.wixmp.com";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MirrorBrand {
    Gogoanime,
    Wixmp,
    Dropbox,
    Wetransfer,
    Sharepoint,
}

impl MirrorBrand {
    pub const ALL: [MirrorBrand; 5] = [
        MirrorBrand::Gogoanime,
        MirrorBrand::Wixmp,
        MirrorBrand::Dropbox,
        MirrorBrand::Wetransfer,
        MirrorBrand::Sharepoint,
    ];

    /// The `sourceName` AllAnime files this mirror under.
    pub fn label(self) -> &'static str {
        match self {
            MirrorBrand::Gogoanime => "Luf-mp4",
            MirrorBrand::Wixmp => "Default",
            MirrorBrand::Dropbox => "Sak",
            MirrorBrand::Wetransfer => "Kir",
            MirrorBrand::Sharepoint => "S-mp4",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            MirrorBrand::Gogoanime => "gogoanime",
            MirrorBrand::Wixmp => "wixmp",
            MirrorBrand::Dropbox => "dropbox",
            MirrorBrand::Wetransfer => "wetransfer",
            MirrorBrand::Sharepoint => "sharepoint",
        }
    }
}

/// What one mirror contributed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MirrorLinks {
    pub qualities: QualityLinkSet,
    pub subtitles: Vec<String>,
}

impl MirrorLinks {
    pub fn is_empty(&self) -> bool {
        self.qualities.is_empty()
    }

    fn absorb(&mut self, other: MirrorLinks) {
        self.qualities.merge(other.qualities);
        for subtitle in other.subtitles {
            if !self.subtitles.contains(&subtitle) {
                self.subtitles.push(subtitle);
            }
        }
    }
}

/// Folds branch results in order; later branches win label collisions.
pub fn merge_branches(branches: impl IntoIterator<Item = MirrorLinks>) -> Result<MirrorLinks> {
    let mut merged = MirrorLinks::default();
    for branch in branches {
        merged.absorb(branch);
    }
    if merged.is_empty() {
        return Err(ProviderError::NoLinksFound(
            "every mirror came back empty".to_string(),
        ));
    }
    Ok(merged)
}

#[derive(Debug, Default, Deserialize)]
pub struct ClockResponse {
    #[serde(default)]
    pub links: Vec<ClockLink>,
}

#[derive(Debug, Deserialize)]
pub struct ClockLink {
    pub link: String,
    #[serde(rename = "resolutionStr")]
    #[serde(default)]
    pub resolution: Option<String>,
    #[serde(default)]
    pub hls: bool,
    #[serde(default)]
    pub subtitles: Vec<ClockSubtitle>,
}

#[derive(Debug, Deserialize)]
pub struct ClockSubtitle {
    pub src: String,
    #[serde(default)]
    pub lang: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
}

impl ClockLink {
    fn has_numeric_resolution(&self) -> bool {
        self.resolution.as_deref().and_then(leading_number).is_some()
    }

    fn is_master_playlist(&self) -> bool {
        let path = self.link.split('?').next().unwrap_or(&self.link);
        (self.hls || path.ends_with(".m3u8")) && !self.link.contains("original.m3u")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClockShape {
    /// One wixmp URL template carrying every quality in a comma list.
    Repackager(String),
    /// An HLS master playlist that has to be fetched and scanned.
    MasterPlaylist(String),
    /// Links already labelled by resolution.
    Direct,
}

pub fn classify(response: &ClockResponse) -> ClockShape {
    if let Some(link) = response
        .links
        .iter()
        .find(|link| link.link.contains(REPACKAGER_HOST))
    {
        return ClockShape::Repackager(link.link.clone());
    }
    if response.links.iter().any(ClockLink::has_numeric_resolution) {
        return ClockShape::Direct;
    }
    match response.links.iter().find(|link| link.is_master_playlist()) {
        Some(link) => ClockShape::MasterPlaylist(link.link.clone()),
        None => ClockShape::Direct,
    }
}

/// `https://repackager.wixmp.com/host/v/,480p,720p,/mp4/f.mp4.urlset/master.m3u8`
/// → `{480: https://host/v/480p/mp4/f.mp4, 720: ...}`
pub fn expand_repackager(link: &str) -> QualityLinkSet {
    let template = link.replace(&format!("{REPACKAGER_HOST}/"), "");
    let template = template.split(".urlset").next().unwrap_or(&template);
    let Some(qualities) = first_capture(repackager_qualities(), link, 1) else {
        return QualityLinkSet::new();
    };
    qualities
        .split(',')
        .filter(|quality| !quality.is_empty())
        .map(|quality| {
            let url = repackager_segment().replace_all(template, quality);
            (quality.to_string(), url.into_owned())
        })
        .collect()
}

/// Pairs each `RESOLUTION=WxH` stream tag with the URI line after it.
pub fn parse_master_playlist(playlist: &str, playlist_url: &Url) -> QualityLinkSet {
    let lines: Vec<&str> = playlist.lines().map(str::trim).collect();
    let mut links = QualityLinkSet::new();
    for (idx, line) in lines.iter().enumerate() {
        if !line.starts_with('#') {
            continue;
        }
        let Some(height) = first_capture(stream_resolution(), line, 1) else {
            continue;
        };
        let Some(uri) = lines[idx + 1..].iter().find(|l| !l.is_empty()) else {
            continue;
        };
        if uri.starts_with('#') {
            continue;
        }
        if let Ok(resolved) = playlist_url.join(uri) {
            links.insert(&height, resolved.to_string());
        }
    }
    links
}

pub fn direct_links(response: &ClockResponse, raw_body: &str) -> QualityLinkSet {
    let mut links = QualityLinkSet::new();
    for link in &response.links {
        if let Some(label) = link.resolution.as_deref().filter(|l| !l.is_empty()) {
            links.insert(label, link.link.clone());
        }
    }
    if let Some(hls) = all_captures(bare_hls_url(), raw_body, 1).into_iter().next() {
        links.insert("1080", unescape_json_slashes(&hls));
    }
    links
}

pub fn english_subtitles(response: &ClockResponse) -> Vec<String> {
    let mut subtitles = Vec::new();
    for sub in response.links.iter().flat_map(|link| &link.subtitles) {
        let english = sub.lang.as_deref() == Some("en") || sub.label.as_deref() == Some("English");
        if english && !subtitles.contains(&sub.src) {
            subtitles.push(sub.src.clone());
        }
    }
    subtitles
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(json: &str) -> ClockResponse {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn brand_labels_are_distinct() {
        let labels: Vec<_> = MirrorBrand::ALL.iter().map(|b| b.label()).collect();
        assert_eq!(labels, ["Luf-mp4", "Default", "Sak", "Kir", "S-mp4"]);
    }

    #[test]
    fn single_non_empty_branch_wins() {
        let only: QualityLinkSet = [("720", "https://cdn/720.mp4")].into_iter().collect();
        let branches = vec![
            MirrorLinks::default(),
            MirrorLinks::default(),
            MirrorLinks {
                qualities: only.clone(),
                subtitles: vec![],
            },
            MirrorLinks::default(),
            MirrorLinks::default(),
        ];
        let merged = merge_branches(branches).unwrap();
        assert_eq!(merged.qualities, only);
    }

    #[test]
    fn all_empty_branches_is_no_links_found() {
        let branches = std::iter::repeat_with(MirrorLinks::default).take(5);
        assert!(matches!(
            merge_branches(branches),
            Err(ProviderError::NoLinksFound(_))
        ));
    }

    #[test]
    fn later_branch_overwrites_colliding_label_and_subtitles_dedupe() {
        let first = MirrorLinks {
            qualities: [("1080", "a")].into_iter().collect(),
            subtitles: vec!["en.vtt".into()],
        };
        let second = MirrorLinks {
            qualities: [("1080", "b"), ("480", "c")].into_iter().collect(),
            subtitles: vec!["en.vtt".into()],
        };
        let merged = merge_branches([first, second]).unwrap();
        assert_eq!(merged.qualities.get("1080"), Some("b"));
        assert_eq!(merged.qualities.len(), 2);
        assert_eq!(merged.subtitles, vec!["en.vtt".to_string()]);
    }

    #[test]
    fn repackager_template_expands_each_quality() {
        let link = "https://repackager.wixmp.com/video.wixstatic.com/video/7a6e_x/,1080p,720p,480p,/mp4/file.mp4.urlset/master.m3u8";
        let resp = response(&format!(
            r#"{{"links":[{{"link":"{link}","resolutionStr":"Mp4"}}]}}"#
        ));
        assert_eq!(classify(&resp), ClockShape::Repackager(link.to_string()));

        let links = expand_repackager(link);
        assert_eq!(links.len(), 3);
        assert_eq!(
            links.get("720"),
            Some("https://video.wixstatic.com/video/7a6e_x/720p/mp4/file.mp4")
        );
        assert_eq!(
            links.select(""),
            Some("https://video.wixstatic.com/video/7a6e_x/1080p/mp4/file.mp4")
        );
    }

    #[test]
    fn repackager_without_quality_list_yields_nothing() {
        assert!(expand_repackager("https://repackager.wixmp.com/a/b.mp4").is_empty());
    }

    #[test]
    fn master_playlist_pairs_resolution_with_next_uri() {
        let playlist = "#EXTM3U\n\
            #EXT-X-STREAM-INF:BANDWIDTH=800000,RESOLUTION=640x360\n\
            ep.360.m3u8\n\
            #EXT-X-STREAM-INF:BANDWIDTH=5000000,RESOLUTION=1920x1080\n\
            \n\
            https://other.cdn/ep.1080.m3u8\n\
            #EXT-X-I-FRAME-STREAM-INF:RESOLUTION=1280x720,URI=\"iframe.m3u8\"\n\
            #EXT-X-ENDLIST\n";
        let base = Url::parse("https://cdn.example/hls/ep/master.m3u8").unwrap();
        let links = parse_master_playlist(playlist, &base);

        assert_eq!(links.len(), 2);
        assert_eq!(
            links.get("360"),
            Some("https://cdn.example/hls/ep/ep.360.m3u8")
        );
        assert_eq!(links.get("1080"), Some("https://other.cdn/ep.1080.m3u8"));
        assert_eq!(links.get("720"), None);
    }

    #[test]
    fn hls_only_response_is_a_master_playlist() {
        let resp = response(
            r#"{"links":[{"link":"https://vipanicdn.net/stream/ep.m3u8","resolutionStr":"Hls","hls":true}]}"#,
        );
        assert_eq!(
            classify(&resp),
            ClockShape::MasterPlaylist("https://vipanicdn.net/stream/ep.m3u8".into())
        );
    }

    #[test]
    fn original_rendition_is_read_directly() {
        let resp = response(
            r#"{"links":[{"link":"https://anifastcdn.info/ep/original.m3u8","resolutionStr":"Hls","hls":true}]}"#,
        );
        assert_eq!(classify(&resp), ClockShape::Direct);
    }

    #[test]
    fn direct_links_use_resolution_labels_and_subtitles() {
        let body = r#"{"links":[
            {"link":"https://cdn.example/1080.mp4","resolutionStr":"1080p","subtitles":[{"src":"https://cdn.example/en.vtt","lang":"en"},{"src":"https://cdn.example/es.vtt","lang":"es"}]},
            {"link":"https://cdn.example/480.mp4","resolutionStr":"480p","subtitles":[{"src":"https://cdn.example/en.vtt","label":"English"}]}
        ]}"#;
        let resp = response(body);
        assert_eq!(classify(&resp), ClockShape::Direct);

        let links = direct_links(&resp, body);
        assert_eq!(links.get("1080"), Some("https://cdn.example/1080.mp4"));
        assert_eq!(links.get("480"), Some("https://cdn.example/480.mp4"));
        assert_eq!(
            english_subtitles(&resp),
            vec!["https://cdn.example/en.vtt".to_string()]
        );
    }

    #[test]
    fn bare_hls_entry_fills_missing_1080() {
        let body = r#"{"links":[{"link":"https://cdn.example/720.mp4","resolutionStr":"720"}],"rawUrls":{"type":"hls","url":"https:\/\/cdn.example\/master.m3u8"}}"#;
        let resp = response(body);
        let links = direct_links(&resp, body);
        assert_eq!(links.get("1080"), Some("https://cdn.example/master.m3u8"));
        assert_eq!(links.get("720"), Some("https://cdn.example/720.mp4"));
    }

    #[test]
    fn bare_hls_entry_replaces_labelled_1080() {
        let body = r#"{"links":[{"link":"https://cdn.example/a.mp4","resolutionStr":"1080p"}],"x":{"type":"hls","url":"https:\/\/cdn.example\/m.m3u8"}}"#;
        let resp = response(body);
        assert!(matches!(classify(&resp), ClockShape::Direct));
        let links = direct_links(&resp, body);
        assert_eq!(links.get("1080"), Some("https://cdn.example/m.m3u8"));
        assert_eq!(links.select("1080"), Some("https://cdn.example/m.m3u8"));
        assert_eq!(links.len(), 1);
    }
}
