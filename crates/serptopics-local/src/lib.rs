use serptopics_core::{Error, Result, SerpQuery, SerpSnapshot, SerpSource};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub mod cannibalization;
pub mod cluster;
pub mod dataforseo;
pub mod labeler;
pub mod overlap;
pub mod sitemap;

/// SERP results drift slowly; a month-old snapshot is still useful for
/// clustering.
pub const DEFAULT_SNAPSHOT_TTL_S: u64 = 30 * 24 * 60 * 60;

/// Filesystem cache for SERP snapshots.
///
/// One JSON file per (keyword, query) pair, fanned out over two directory
/// levels keyed by a sha256 of the lookup fields. Entries older than the
/// TTL are treated as a miss.
#[derive(Debug, Clone)]
pub struct SnapshotCache {
    root: PathBuf,
    ttl_s: u64,
}

#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct CacheEntry {
    schema_version: u32,
    fetched_at_epoch_s: u64,
    keyword: String,
    snapshot: SerpSnapshot,
}

impl SnapshotCache {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            ttl_s: DEFAULT_SNAPSHOT_TTL_S,
        }
    }

    pub fn with_ttl(root: PathBuf, ttl_s: u64) -> Self {
        Self { root, ttl_s }
    }

    fn key(keyword: &str, query: &SerpQuery) -> String {
        // Deterministic key: keyword + the query knobs that change results.
        let mut h = Sha256::new();
        h.update(b"keyword:");
        h.update(keyword.as_bytes());
        h.update(b"\nlocation_code:");
        h.update(query.location_code.to_string().as_bytes());
        h.update(b"\nlanguage_code:");
        h.update(query.language_code.as_bytes());
        h.update(b"\ndepth:");
        h.update(query.depth.to_string().as_bytes());
        hex::encode(h.finalize())
    }

    fn path(&self, key: &str) -> PathBuf {
        self.root
            .join(&key[0..2])
            .join(&key[2..4])
            .join(format!("{key}.json"))
    }

    fn now_epoch_s() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::from_secs(0))
            .as_secs()
    }

    pub fn get(&self, keyword: &str, query: &SerpQuery) -> Result<Option<SerpSnapshot>> {
        let p = self.path(&Self::key(keyword, query));
        if !p.exists() {
            return Ok(None);
        }
        let bytes = fs::read(&p).map_err(|e| Error::Cache(e.to_string()))?;
        let entry: CacheEntry =
            serde_json::from_slice(&bytes).map_err(|e| Error::Cache(e.to_string()))?;
        if Self::now_epoch_s().saturating_sub(entry.fetched_at_epoch_s) > self.ttl_s {
            return Ok(None);
        }
        Ok(Some(entry.snapshot))
    }

    pub fn put(&self, keyword: &str, query: &SerpQuery, snapshot: &SerpSnapshot) -> Result<()> {
        let p = self.path(&Self::key(keyword, query));
        if let Some(parent) = p.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::Cache(e.to_string()))?;
        }
        let entry = CacheEntry {
            schema_version: 1,
            fetched_at_epoch_s: Self::now_epoch_s(),
            keyword: keyword.to_string(),
            snapshot: snapshot.clone(),
        };
        fs::write(
            &p,
            serde_json::to_vec(&entry).map_err(|e| Error::Cache(e.to_string()))?,
        )
        .map_err(|e| Error::Cache(e.to_string()))
    }
}

/// Fetches snapshots for `keywords`, reading the cache first.
///
/// Misses are fetched one at a time: the SERP API processes one task per
/// request and throttles concurrent submissions. A keyword whose fetch
/// fails is logged and left out of the result; downstream stages treat
/// absence as "no snapshot". Cache failures degrade to a miss (reads) or a
/// warning (writes) rather than aborting the run.
pub async fn fetch_snapshots(
    source: &dyn SerpSource,
    cache: Option<&SnapshotCache>,
    keywords: &[String],
    query: &SerpQuery,
) -> BTreeMap<String, SerpSnapshot> {
    let mut out = BTreeMap::new();

    for keyword in keywords {
        if let Some(cache) = cache {
            // File IO off the async runtime, as with any blocking work.
            let cache2 = cache.clone();
            let keyword2 = keyword.clone();
            let query2 = query.clone();
            match tokio::task::spawn_blocking(move || cache2.get(&keyword2, &query2)).await {
                Ok(Ok(Some(snapshot))) => {
                    out.insert(keyword.clone(), snapshot);
                    continue;
                }
                Ok(Ok(None)) => {}
                Ok(Err(e)) => log::warn!("snapshot cache read failed for {keyword:?}: {e}"),
                Err(e) => log::warn!("snapshot cache read join failed for {keyword:?}: {e}"),
            }
        }

        match source.fetch_serp(keyword, query).await {
            Ok(snapshot) => {
                if let Some(cache) = cache {
                    let cache2 = cache.clone();
                    let keyword2 = keyword.clone();
                    let query2 = query.clone();
                    let snapshot2 = snapshot.clone();
                    let put = tokio::task::spawn_blocking(move || {
                        cache2.put(&keyword2, &query2, &snapshot2)
                    })
                    .await;
                    match put {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => {
                            log::warn!("snapshot cache write failed for {keyword:?}: {e}")
                        }
                        Err(e) => {
                            log::warn!("snapshot cache write join failed for {keyword:?}: {e}")
                        }
                    }
                }
                out.insert(keyword.clone(), snapshot);
            }
            Err(e) => log::warn!("serp fetch failed for {keyword:?} via {}: {e}", source.name()),
        }
    }

    out
}
