//! Greedy leader-anchored keyword clustering.
//!
//! Keywords are processed in sorted order and compared against the leaders
//! of already-created clusters, in creation order; the first cluster whose
//! leader scores at or above the threshold wins. This is deliberately
//! greedy and non-transitive: members of one cluster are only ever compared
//! to its leader, never to each other, so two members need not overlap
//! above the threshold themselves.

use crate::overlap::serp_overlap;
use serptopics_core::{Cluster, ClusterIndex, SerpSnapshot};
use std::collections::BTreeMap;

/// Groups `keywords` into clusters by SERP overlap against cluster leaders.
///
/// Returns the clusters in creation order and the keyword -> cluster id
/// reverse index. The two outputs partition the clustered keyword set:
/// every indexed keyword appears in exactly one cluster's member list.
///
/// Keywords with no snapshot, or an empty URL list, are skipped and appear
/// in neither output. `threshold` is a percentage, nominally in `[0, 100]`;
/// out-of-range values are used verbatim and simply make matching
/// always-succeed or always-fail.
pub fn cluster_keywords(
    keywords: &[String],
    snapshots: &BTreeMap<String, SerpSnapshot>,
    threshold: f64,
) -> (Vec<Cluster>, ClusterIndex) {
    // Sorted scan order decides which keyword founds (and leads) a cluster;
    // it must stay byte-lexicographic for reproducible runs.
    let mut sorted: Vec<&String> = keywords.iter().collect();
    sorted.sort();

    let mut clusters: Vec<Cluster> = Vec::new();
    let mut index: ClusterIndex = BTreeMap::new();
    // Ids are owned by this invocation: assigned once, monotonically, never
    // reused. Repeated runs cannot interfere with each other.
    let mut next_id: u32 = 1;

    for kw in sorted {
        let Some(snapshot) = snapshots.get(kw.as_str()) else {
            continue;
        };
        if snapshot.is_empty() {
            continue;
        }

        // First match wins, scanning clusters in creation order.
        let mut assigned_to: Option<usize> = None;
        for (pos, cluster) in clusters.iter().enumerate() {
            let Some(leader) = cluster.leader() else {
                continue;
            };
            let leader_urls = snapshots
                .get(leader)
                .map(|s| s.urls.as_slice())
                .unwrap_or(&[]);
            if serp_overlap(&snapshot.urls, leader_urls) >= threshold {
                assigned_to = Some(pos);
                break;
            }
        }

        match assigned_to {
            Some(pos) => {
                index.insert(kw.clone(), clusters[pos].id);
                clusters[pos].keywords.push(kw.clone());
            }
            None => {
                index.insert(kw.clone(), next_id);
                clusters.push(Cluster {
                    id: next_id,
                    keywords: vec![kw.clone()],
                });
                next_id += 1;
            }
        }
    }

    (clusters, index)
}
