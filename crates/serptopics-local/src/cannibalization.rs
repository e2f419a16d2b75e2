//! Cannibalization mapping and detection.
//!
//! Projects clusters onto the target site's ranking URLs, then flags
//! clusters where more than one owned URL competes for the same topic.

use serptopics_core::{
    Action, CannibalizationIssue, Cluster, OwnedUrlMap, RankedKeyword, SerpSnapshot, Severity,
    SiteMatcher,
};
use std::collections::BTreeMap;

/// Ranks are drawn from the top-10 window, so in practice a mean rank never
/// exceeds this and the `Consolidate` branch cannot fire; the threshold is
/// kept as shipped pending a decision on what should actually trigger it.
const CONSOLIDATE_AVG_RANK: f64 = 10.0;

/// For each cluster, collects the member keywords' ranking URLs that belong
/// to the target site.
///
/// Entries are recorded in cluster member order, then rank order within a
/// keyword; that first-seen order is what the detector's residual
/// tie-breaks fall back to. Members without a snapshot contribute nothing.
pub fn map_owned_urls(
    clusters: &[Cluster],
    snapshots: &BTreeMap<String, SerpSnapshot>,
    matcher: &SiteMatcher,
) -> BTreeMap<u32, OwnedUrlMap> {
    let mut out = BTreeMap::new();
    for cluster in clusters {
        let mut owned = OwnedUrlMap::default();
        for kw in &cluster.keywords {
            let Some(snapshot) = snapshots.get(kw) else {
                continue;
            };
            for (pos, ranking_url) in snapshot.urls.iter().enumerate() {
                if matcher.matches(ranking_url) {
                    owned.push(
                        ranking_url,
                        RankedKeyword {
                            keyword: kw.clone(),
                            rank: pos as u32 + 1,
                        },
                    );
                }
            }
        }
        out.insert(cluster.id, owned);
    }
    out
}

#[derive(Debug)]
struct UrlStats<'a> {
    url: &'a str,
    keyword_count: usize,
    avg_rank: f64,
}

/// Flags clusters where two or more owned URLs compete.
///
/// Per URL: `keyword_count` is the number of recorded rankings and
/// `avg_rank` their arithmetic mean. URLs sort by keyword count descending,
/// then average rank ascending (stable, so exact ties keep first-seen
/// order). The head of the sorted list is the cluster's primary URL and
/// emits no issue; every other URL emits one, in that same order. Clusters
/// with zero or one owned URL produce nothing.
pub fn detect_cannibalization(
    owned_by_cluster: &BTreeMap<u32, OwnedUrlMap>,
) -> Vec<CannibalizationIssue> {
    let mut issues = Vec::new();

    for (cluster_id, url_map) in owned_by_cluster {
        if url_map.len() <= 1 {
            continue;
        }

        let mut stats: Vec<UrlStats> = url_map
            .entries()
            .iter()
            .map(|entry| {
                let count = entry.rankings.len();
                let rank_sum: u32 = entry.rankings.iter().map(|r| r.rank).sum();
                UrlStats {
                    url: &entry.url,
                    keyword_count: count,
                    avg_rank: f64::from(rank_sum) / count as f64,
                }
            })
            .collect();

        stats.sort_by(|a, b| {
            b.keyword_count.cmp(&a.keyword_count).then_with(|| {
                a.avg_rank
                    .partial_cmp(&b.avg_rank)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
        });

        let primary_url = stats[0].url;
        for cannibal in &stats[1..] {
            issues.push(CannibalizationIssue {
                cluster_id: *cluster_id,
                primary_url: primary_url.to_string(),
                cannibal_url: cannibal.url.to_string(),
                severity: if cannibal.keyword_count > 1 {
                    Severity::High
                } else {
                    Severity::Medium
                },
                action: if cannibal.avg_rank > CONSOLIDATE_AVG_RANK {
                    Action::Consolidate
                } else {
                    Action::ReviewIntent
                },
            });
        }
    }

    issues
}
