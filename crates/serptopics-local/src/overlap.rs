//! SERP overlap scoring.

use std::collections::BTreeSet;

/// Fixed scoring window: snapshots are capped at the top-10 organic
/// results, and the score is the share of that window, not of either
/// input's size. A keyword with fewer than 10 ranking URLs can therefore
/// never reach 100 even on a perfect subset match.
const OVERLAP_WINDOW: f64 = 10.0;

/// Percentage overlap between two ranked URL lists, in `[0, 100]`.
///
/// Inputs are treated as unordered sets; duplicates collapse. URLs are
/// compared verbatim (no canonicalization; callers normalize upstream if
/// they want to). Either side empty scores exactly 0.0.
pub fn serp_overlap(a: &[String], b: &[String]) -> f64 {
    let set_a: BTreeSet<&str> = a.iter().map(String::as_str).collect();
    let set_b: BTreeSet<&str> = b.iter().map(String::as_str).collect();
    if set_a.is_empty() || set_b.is_empty() {
        return 0.0;
    }
    let intersection = set_a.intersection(&set_b).count();
    (intersection as f64 / OVERLAP_WINDOW) * 100.0
}
