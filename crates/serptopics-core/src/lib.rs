use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("serp fetch failed: {0}")]
    Serp(String),
    #[error("cache error: {0}")]
    Cache(String),
    #[error("llm failed: {0}")]
    Llm(String),
    #[error("sitemap fetch failed: {0}")]
    Sitemap(String),
    #[error("not configured: {0}")]
    NotConfigured(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Organic results are captured down to this depth; ranks are 1-based and
/// never exceed it.
pub const SERP_DEPTH: usize = 10;

/// The top organic results recorded for one keyword.
///
/// `urls` and `titles` are parallel, rank 1 at index 0. Either list may be
/// shorter than [`SERP_DEPTH`]; they are truncated, never padded.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SerpSnapshot {
    pub urls: Vec<String>,
    pub titles: Vec<String>,
}

impl SerpSnapshot {
    pub fn new(mut urls: Vec<String>, mut titles: Vec<String>) -> Self {
        urls.truncate(SERP_DEPTH);
        titles.truncate(SERP_DEPTH);
        Self { urls, titles }
    }

    /// A snapshot with no URLs is excluded from clustering entirely.
    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerpQuery {
    /// Search locale, provider-specific numeric code (2840 = United States).
    pub location_code: u32,
    pub language_code: String,
    pub depth: usize,
}

impl Default for SerpQuery {
    fn default() -> Self {
        Self {
            location_code: 2840,
            language_code: "en".to_string(),
            depth: SERP_DEPTH,
        }
    }
}

/// A group of keywords whose SERPs overlap with the group's leader.
///
/// The leader is the first keyword and never changes after creation; all
/// membership decisions compare candidates against the leader's snapshot
/// only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Cluster {
    pub id: u32,
    pub keywords: Vec<String>,
}

impl Cluster {
    pub fn leader(&self) -> Option<&str> {
        self.keywords.first().map(String::as_str)
    }
}

/// Reverse lookup: keyword -> id of the single cluster it belongs to.
pub type ClusterIndex = BTreeMap<String, u32>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RankedKeyword {
    pub keyword: String,
    /// 1-based position in the keyword's SERP.
    pub rank: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OwnedUrlEntry {
    pub url: String,
    /// Keywords this URL ranks for, in the order they were recorded
    /// (cluster member order, then rank order within a keyword).
    pub rankings: Vec<RankedKeyword>,
}

/// Owned URLs for one cluster, keyed by URL in first-seen order.
///
/// Iteration order is part of the contract: the detector's tie-breaks fall
/// back to first-seen order, so this is a vec of entries with a linear
/// lookup rather than a map with incidental iteration order.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct OwnedUrlMap {
    entries: Vec<OwnedUrlEntry>,
}

impl OwnedUrlMap {
    pub fn push(&mut self, url: &str, ranking: RankedKeyword) {
        match self.entries.iter_mut().find(|e| e.url == url) {
            Some(entry) => entry.rankings.push(ranking),
            None => self.entries.push(OwnedUrlEntry {
                url: url.to_string(),
                rankings: vec![ranking],
            }),
        }
    }

    /// Number of distinct URLs.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[OwnedUrlEntry] {
        &self.entries
    }

    pub fn get(&self, url: &str) -> Option<&[RankedKeyword]> {
        self.entries
            .iter()
            .find(|e| e.url == url)
            .map(|e| e.rankings.as_slice())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    High,
    Medium,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    Consolidate,
    #[serde(rename = "Review Intent")]
    ReviewIntent,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CannibalizationIssue {
    pub cluster_id: u32,
    pub primary_url: String,
    pub cannibal_url: String,
    pub severity: Severity,
    pub action: Action,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMode {
    /// Plain substring containment against the whole URL. An empty pattern
    /// matches every URL, and a pattern that is a substring of an unrelated
    /// domain matches that domain too.
    #[default]
    Substring,
    /// The URL's host must equal the pattern or be a subdomain of it.
    Host,
}

/// Decides whether a ranking URL belongs to the target site.
#[derive(Debug, Clone)]
pub struct SiteMatcher {
    pattern: String,
    mode: MatchMode,
}

impl SiteMatcher {
    pub fn new(pattern: impl Into<String>, mode: MatchMode) -> Self {
        Self {
            pattern: pattern.into(),
            mode,
        }
    }

    pub fn substring(pattern: impl Into<String>) -> Self {
        Self::new(pattern, MatchMode::Substring)
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn matches(&self, url: &str) -> bool {
        match self.mode {
            MatchMode::Substring => url.contains(&self.pattern),
            MatchMode::Host => {
                let Ok(parsed) = url::Url::parse(url) else {
                    return false;
                };
                let Some(host) = parsed.host_str() else {
                    return false;
                };
                host == self.pattern
                    || host
                        .strip_suffix(&self.pattern)
                        .is_some_and(|rest| rest.ends_with('.'))
            }
        }
    }
}

/// Label assigned to a cluster by the AI collaborator.
///
/// All fields are best-effort; a cluster may have no label at all when the
/// collaborator fails or has not run yet.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClusterLabel {
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub intent: String,
    #[serde(default)]
    pub reasoning: String,
}

#[async_trait::async_trait]
pub trait SerpSource: Send + Sync {
    fn name(&self) -> &'static str;
    async fn fetch_serp(&self, keyword: &str, query: &SerpQuery) -> Result<SerpSnapshot>;
}

#[async_trait::async_trait]
pub trait ClusterLabeler: Send + Sync {
    fn name(&self) -> &'static str;
    async fn label(&self, keywords: &[String], titles: &[String]) -> Result<ClusterLabel>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_truncates_to_depth() {
        let urls: Vec<String> = (0..15).map(|i| format!("https://u{i}.test/")).collect();
        let titles: Vec<String> = (0..12).map(|i| format!("t{i}")).collect();
        let s = SerpSnapshot::new(urls, titles);
        assert_eq!(s.urls.len(), SERP_DEPTH);
        assert_eq!(s.titles.len(), SERP_DEPTH);
    }

    #[test]
    fn owned_url_map_preserves_first_seen_order() {
        let mut m = OwnedUrlMap::default();
        m.push(
            "https://example.com/b",
            RankedKeyword {
                keyword: "kw1".to_string(),
                rank: 3,
            },
        );
        m.push(
            "https://example.com/a",
            RankedKeyword {
                keyword: "kw1".to_string(),
                rank: 7,
            },
        );
        m.push(
            "https://example.com/b",
            RankedKeyword {
                keyword: "kw2".to_string(),
                rank: 1,
            },
        );
        let urls: Vec<&str> = m.entries().iter().map(|e| e.url.as_str()).collect();
        assert_eq!(urls, vec!["https://example.com/b", "https://example.com/a"]);
        assert_eq!(m.get("https://example.com/b").unwrap().len(), 2);
        assert_eq!(m.len(), 2);
    }

    #[test]
    fn substring_matcher_is_plain_containment() {
        let m = SiteMatcher::substring("example.com");
        assert!(m.matches("https://example.com/page"));
        assert!(m.matches("https://www.example.com/page"));
        // Containment, not host matching: unrelated domains that embed the
        // pattern also match.
        assert!(m.matches("https://notexample.com/page"));
        assert!(!m.matches("https://other.test/page"));
    }

    #[test]
    fn empty_substring_pattern_matches_everything() {
        let m = SiteMatcher::substring("");
        assert!(m.matches("https://anything.test/"));
        assert!(m.matches(""));
    }

    #[test]
    fn host_matcher_respects_domain_boundaries() {
        let m = SiteMatcher::new("example.com", MatchMode::Host);
        assert!(m.matches("https://example.com/page"));
        assert!(m.matches("https://blog.example.com/page"));
        assert!(!m.matches("https://notexample.com/page"));
        assert!(!m.matches("not a url"));
    }

    #[test]
    fn action_serializes_with_report_vocabulary() {
        let s = serde_json::to_string(&Action::ReviewIntent).unwrap();
        assert_eq!(s, "\"Review Intent\"");
        let s = serde_json::to_string(&Action::Consolidate).unwrap();
        assert_eq!(s, "\"Consolidate\"");
    }
}
