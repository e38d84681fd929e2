//! Persistent (provider, media id) → provider-internal id mapping.
//!
//! The backing file is section-keyed, one section per provider:
//!
//! ```text
//! [allanime]
//! 21 = ReooPAxPMsHM4KPMY|One Piece|2026-10-19T08:15:02Z
//! ```
//!
//! Every call reads the file and every write rewrites it whole, so two
//! concurrent saves against the same file can lose one of the updates.
//! Comment lines and lines that are not `key = value` are written back as
//! they were read.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use dirs_next::data_dir;
use std::{
    collections::BTreeMap,
    fmt::Write as _,
    fs, io,
    path::{Path, PathBuf},
};
use tracing::{debug, info};

use crate::error::CacheError;

const LEGACY_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderCacheEntry {
    pub provider_id: String,
    pub title: String,
    pub last_used: DateTime<Utc>,
}

/// Handle to the cache file. Cheap to clone; holds no open file.
#[derive(Debug, Clone)]
pub struct ProviderCache {
    path: PathBuf,
}

impl ProviderCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<data dir>/sora/provider_cache.ini`
    pub fn open_default() -> Result<Self, CacheError> {
        Ok(Self::new(default_cache_path()?))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(
        &self,
        provider: &str,
        media_id: u64,
    ) -> Result<Option<ProviderCacheEntry>, CacheError> {
        let file = CacheFile::read(&self.path)?;
        let key = media_id.to_string();
        let Some(value) = file.get(provider, &key) else {
            return Ok(None);
        };
        parse_entry(value)
            .map(Some)
            .map_err(|reason| CacheError::InvalidFormat {
                provider: provider.to_string(),
                key,
                reason,
            })
    }

    pub fn save(
        &self,
        provider: &str,
        media_id: u64,
        provider_id: &str,
        title: &str,
    ) -> Result<(), CacheError> {
        if provider_id.contains('|') || provider_id.contains('\n') {
            return Err(CacheError::InvalidFormat {
                provider: provider.to_string(),
                key: media_id.to_string(),
                reason: format!("provider id {provider_id:?} cannot be stored"),
            });
        }
        let title = title.replace('|', "/").replace(['\r', '\n'], " ");
        let stamp = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);

        let mut file = CacheFile::read(&self.path)?;
        file.set(
            provider,
            &media_id.to_string(),
            format!("{provider_id}|{title}|{stamp}"),
        );
        file.write(&self.path)?;
        info!(provider, media_id, provider_id, "cached provider mapping");
        Ok(())
    }

    pub fn clear(&self, provider: &str, media_id: u64) -> Result<(), CacheError> {
        let mut file = CacheFile::read(&self.path)?;
        if file.remove(provider, &media_id.to_string()) {
            file.write(&self.path)?;
            debug!(provider, media_id, "cleared provider mapping");
        }
        Ok(())
    }

    /// Deletes the backing file.
    pub fn clear_all(&self) -> Result<(), CacheError> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                info!(path = %self.path.display(), "removed provider cache");
                Ok(())
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(CacheError::Write {
                path: self.path.clone(),
                source,
            }),
        }
    }
}

pub fn default_cache_path() -> Result<PathBuf, CacheError> {
    let base = data_dir().ok_or(CacheError::NoCacheDir)?;
    Ok(base.join("sora").join("provider_cache.ini"))
}

fn parse_entry(value: &str) -> Result<ProviderCacheEntry, String> {
    let parts: Vec<&str> = value.split('|').collect();
    let [provider_id, title, stamp] = parts.as_slice() else {
        return Err(format!("expected 3 fields, found {}", parts.len()));
    };
    Ok(ProviderCacheEntry {
        provider_id: provider_id.to_string(),
        title: title.to_string(),
        last_used: parse_timestamp(stamp)?,
    })
}

fn parse_timestamp(stamp: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(stamp) {
        return Ok(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(stamp, LEGACY_TIMESTAMP_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|err| format!("invalid timestamp {stamp:?}: {err}"))
}

/// The file as a sequence of lines, so comments and lines this module does
/// not understand survive a rewrite.
#[derive(Debug, Default)]
struct CacheFile {
    lines: Vec<CacheLine>,
}

#[derive(Debug)]
enum CacheLine {
    Section(String),
    Entry {
        section: String,
        key: String,
        value: String,
    },
    Verbatim(String),
}

impl CacheLine {
    fn is_entry(&self, wanted_section: &str, wanted_key: &str) -> bool {
        matches!(self, CacheLine::Entry { section, key, .. } if section == wanted_section && key == wanted_key)
    }

    fn belongs_to(&self, wanted: &str) -> bool {
        match self {
            CacheLine::Section(name) => name == wanted,
            CacheLine::Entry { section, .. } => section == wanted,
            CacheLine::Verbatim(_) => false,
        }
    }
}

impl CacheFile {
    fn read(path: &Path) -> Result<Self, CacheError> {
        match fs::read_to_string(path) {
            Ok(text) => Ok(Self::parse(&text)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            Err(source) => Err(CacheError::Read {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    fn parse(text: &str) -> Self {
        let mut lines = Vec::new();
        let mut section = String::new();
        for raw in text.lines() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
                lines.push(CacheLine::Verbatim(raw.to_string()));
                continue;
            }
            if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
                section = name.trim().to_string();
                lines.push(CacheLine::Section(section.clone()));
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                debug!(line, "keeping unrecognised cache line");
                lines.push(CacheLine::Verbatim(raw.to_string()));
                continue;
            };
            let value = value.trim();
            let value = value
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .unwrap_or(value);
            lines.push(CacheLine::Entry {
                section: section.clone(),
                key: key.trim().to_string(),
                value: value.to_string(),
            });
        }
        Self { lines }
    }

    fn render(&self) -> String {
        let mut out = String::new();
        for line in &self.lines {
            let _ = match line {
                CacheLine::Section(name) => writeln!(out, "[{name}]"),
                CacheLine::Entry { key, value, .. } => writeln!(out, "{key} = {value}"),
                CacheLine::Verbatim(raw) => writeln!(out, "{raw}"),
            };
        }
        out
    }

    fn write(&self, path: &Path) -> Result<(), CacheError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| CacheError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        fs::write(path, self.render()).map_err(|source| CacheError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Last occurrence wins, as it would in a map.
    fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.lines
            .iter()
            .rev()
            .find_map(|line| match line {
                CacheLine::Entry { value, .. } if line.is_entry(section, key) => {
                    Some(value.as_str())
                }
                _ => None,
            })
            .filter(|value| !value.is_empty())
    }

    fn set(&mut self, section: &str, key: &str, value: String) {
        if let Some(pos) = self.lines.iter().rposition(|line| line.is_entry(section, key)) {
            self.lines[pos] = CacheLine::Entry {
                section: section.to_string(),
                key: key.to_string(),
                value,
            };
            let mut index = 0;
            self.lines.retain(|line| {
                let keep = index >= pos || !line.is_entry(section, key);
                index += 1;
                keep
            });
            return;
        }

        let entry = CacheLine::Entry {
            section: section.to_string(),
            key: key.to_string(),
            value,
        };
        match self.lines.iter().rposition(|line| line.belongs_to(section)) {
            Some(pos) => self.lines.insert(pos + 1, entry),
            None if section.is_empty() => self.lines.insert(0, entry),
            None => {
                if self
                    .lines
                    .last()
                    .is_some_and(|line| !matches!(line, CacheLine::Verbatim(raw) if raw.trim().is_empty()))
                {
                    self.lines.push(CacheLine::Verbatim(String::new()));
                }
                self.lines.push(CacheLine::Section(section.to_string()));
                self.lines.push(entry);
            }
        }
    }

    fn remove(&mut self, section: &str, key: &str) -> bool {
        let before = self.lines.len();
        self.lines.retain(|line| !line.is_entry(section, key));
        self.lines.len() != before
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::TempDir;

    fn cache_in(dir: &TempDir) -> ProviderCache {
        ProviderCache::new(dir.path().join("nested").join("provider_cache.ini"))
    }

    #[test]
    fn missing_file_loads_as_absent() {
        let dir = TempDir::new().unwrap();
        assert_eq!(cache_in(&dir).load("allanime", 1).unwrap(), None);
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = TempDir::new().unwrap();
        let cache = cache_in(&dir);
        let before = Utc::now() - Duration::seconds(1);

        cache.save("allanime", 123, "abc", "Title").unwrap();
        let entry = cache.load("allanime", 123).unwrap().unwrap();

        assert_eq!(entry.provider_id, "abc");
        assert_eq!(entry.title, "Title");
        assert!(entry.last_used >= before);
        assert!(entry.last_used <= Utc::now() + Duration::seconds(1));
    }

    #[test]
    fn sections_keep_providers_apart() {
        let dir = TempDir::new().unwrap();
        let cache = cache_in(&dir);
        cache.save("allanime", 7, "a", "A").unwrap();
        cache.save("aniworld", 7, "/anime/stream/b", "B").unwrap();

        assert_eq!(cache.load("allanime", 7).unwrap().unwrap().provider_id, "a");
        assert_eq!(
            cache.load("aniworld", 7).unwrap().unwrap().provider_id,
            "/anime/stream/b"
        );
        assert_eq!(cache.load("hdrezka", 7).unwrap(), None);
    }

    #[test]
    fn save_overwrites_existing_row() {
        let dir = TempDir::new().unwrap();
        let cache = cache_in(&dir);
        cache.save("allanime", 5, "old", "Title").unwrap();
        cache.save("allanime", 5, "new", "Title").unwrap();
        assert_eq!(cache.load("allanime", 5).unwrap().unwrap().provider_id, "new");
    }

    #[test]
    fn file_uses_section_and_pipe_format() {
        let dir = TempDir::new().unwrap();
        let cache = cache_in(&dir);
        cache.save("allanime", 42, "xyz", "Some | Show").unwrap();

        let text = fs::read_to_string(cache.path()).unwrap();
        assert!(text.starts_with("[allanime]\n42 = xyz|Some / Show|"));
        assert!(text.trim_end().ends_with('Z'));
    }

    #[test]
    fn two_field_row_is_invalid_format() {
        let dir = TempDir::new().unwrap();
        let cache = cache_in(&dir);
        fs::create_dir_all(cache.path().parent().unwrap()).unwrap();
        fs::write(cache.path(), "[allanime]\n9 = abc|Title\n").unwrap();

        let err = cache.load("allanime", 9).unwrap_err();
        assert!(matches!(err, CacheError::InvalidFormat { .. }));
    }

    #[test]
    fn bad_timestamp_is_invalid_format() {
        let dir = TempDir::new().unwrap();
        let cache = cache_in(&dir);
        fs::create_dir_all(cache.path().parent().unwrap()).unwrap();
        fs::write(cache.path(), "[allanime]\n9 = abc|Title|yesterday\n").unwrap();

        assert!(matches!(
            cache.load("allanime", 9),
            Err(CacheError::InvalidFormat { .. })
        ));
    }

    #[test]
    fn legacy_timestamp_is_accepted() {
        let dir = TempDir::new().unwrap();
        let cache = cache_in(&dir);
        fs::create_dir_all(cache.path().parent().unwrap()).unwrap();
        fs::write(
            cache.path(),
            "; written by an older version\n[allanime]\n9 = abc|Title|2024-03-01T10:20:30\n",
        )
        .unwrap();

        let entry = cache.load("allanime", 9).unwrap().unwrap();
        assert_eq!(entry.last_used.to_rfc3339(), "2024-03-01T10:20:30+00:00");
    }

    #[test]
    fn provider_id_with_pipe_is_rejected() {
        let dir = TempDir::new().unwrap();
        let cache = cache_in(&dir);
        assert!(matches!(
            cache.save("hdrezka", 1, "films|123", "T"),
            Err(CacheError::InvalidFormat { .. })
        ));
        assert!(!cache.path().exists());
    }

    #[test]
    fn clear_removes_only_one_row() {
        let dir = TempDir::new().unwrap();
        let cache = cache_in(&dir);
        cache.save("allanime", 1, "a", "A").unwrap();
        cache.save("allanime", 2, "b", "B").unwrap();

        cache.clear("allanime", 1).unwrap();
        assert_eq!(cache.load("allanime", 1).unwrap(), None);
        assert!(cache.load("allanime", 2).unwrap().is_some());
        cache.clear("unknown", 3).unwrap();
    }

    #[test]
    fn clear_all_deletes_file_and_tolerates_absence() {
        let dir = TempDir::new().unwrap();
        let cache = cache_in(&dir);
        cache.save("allanime", 1, "a", "A").unwrap();

        cache.clear_all().unwrap();
        assert!(!cache.path().exists());
        cache.clear_all().unwrap();
    }

    #[test]
    fn rewrites_keep_comments_and_unknown_lines() {
        let dir = TempDir::new().unwrap();
        let cache = cache_in(&dir);
        fs::create_dir_all(cache.path().parent().unwrap()).unwrap();
        fs::write(
            cache.path(),
            "; keep me\n[allanime]\n1 = a|A|2024-03-01T10:20:30Z\nnot a row\n\n[hdrezka]\n# pinned\n3 = films/x/1-y|Y|2024-03-01T10:20:30Z\n",
        )
        .unwrap();

        cache.save("allanime", 2, "b", "B").unwrap();
        cache.save("aniworld", 4, "/anime/stream/d", "D").unwrap();
        cache.clear("hdrezka", 3).unwrap();

        let text = fs::read_to_string(cache.path()).unwrap();
        assert!(text.starts_with("; keep me\n[allanime]\n1 = a|A|"));
        assert!(text.contains("not a row\n"));
        assert!(text.contains("# pinned\n"));
        assert!(!text.contains("films/x/1-y"));
        assert!(text.contains("[aniworld]\n4 = /anime/stream/d|D|"));

        assert_eq!(cache.load("allanime", 1).unwrap().unwrap().provider_id, "a");
        assert_eq!(cache.load("allanime", 2).unwrap().unwrap().provider_id, "b");
        assert_eq!(cache.load("hdrezka", 3).unwrap(), None);
    }
}
