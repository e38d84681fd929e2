use std::collections::BTreeMap;

use crate::scrape::leading_number;

pub const BEST: &str = "best";
pub const WORST: &str = "worst";

/// Quality label → candidate URL, collected mid-pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QualityLinkSet {
    links: BTreeMap<String, String>,
}

impl QualityLinkSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts under the canonical label, replacing any previous URL.
    pub fn insert(&mut self, label: &str, url: impl Into<String>) {
        self.links.insert(canonical_label(label), url.into());
    }

    /// Later sets win on label collisions.
    pub fn merge(&mut self, other: QualityLinkSet) {
        self.links.extend(other.links);
    }

    pub fn get(&self, label: &str) -> Option<&str> {
        self.links.get(&canonical_label(label)).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.links.keys().map(String::as_str)
    }

    /// Exact label match, otherwise the numerically highest label.
    ///
    /// `worst` picks the numerically lowest label when no entry is literally
    /// named `worst`. Labels without a leading number rank as zero.
    pub fn select(&self, preferred: &str) -> Option<&str> {
        if let Some(url) = self.get(preferred) {
            return Some(url);
        }
        let ranked = self.links.iter().map(|(label, url)| (quality_rank(label), url));
        let chosen = if preferred.trim().eq_ignore_ascii_case(WORST) {
            ranked.min_by_key(|(rank, _)| *rank)
        } else {
            ranked.max_by_key(|(rank, _)| *rank)
        };
        chosen.map(|(_, url)| url.as_str())
    }
}

impl<L: AsRef<str>, U: Into<String>> FromIterator<(L, U)> for QualityLinkSet {
    fn from_iter<T: IntoIterator<Item = (L, U)>>(iter: T) -> Self {
        let mut set = QualityLinkSet::new();
        for (label, url) in iter {
            set.insert(label.as_ref(), url);
        }
        set
    }
}

/// `"1080p"` → `"1080"`; anything that is not digits plus `p` is kept as-is.
pub fn canonical_label(label: &str) -> String {
    let trimmed = label.trim();
    let digits = trimmed
        .strip_suffix('p')
        .or_else(|| trimmed.strip_suffix('P'))
        .unwrap_or(trimmed);
    if !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()) {
        digits.to_string()
    } else {
        trimmed.to_string()
    }
}

pub fn quality_rank(label: &str) -> u64 {
    leading_number(label).unwrap_or(0)
}
