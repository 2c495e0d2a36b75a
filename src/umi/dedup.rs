use std::collections::HashMap;

use crate::utils::min_seq_ld;

use super::BaseError;

/// Largest edit distance the cleanup will bridge.
pub const MAX_DEGEN_ERRORS: usize = 3;

/// Multisets beyond this many distinct windows skip the sweep entirely.
pub const MAX_DEDUP_MULTISET: usize = 10_000;

/// Error-aware collapse of a degenerate-window multiset.
///
/// Distinct windows are ordered by descending count (ties broken
/// lexicographically). The least-counted and the most-counted windows are
/// guaranteed survivors. Walking the high-count side, a low-count window `v`
/// is folded into `u` when its count falls below
/// `count(u) × |u| × baseError[e]` and it sits within edit distance `e`;
/// the ascending scan stops at the first window that fails either test.
pub fn dedup_count(umis: &HashMap<Vec<u8>, u64>, base_error: &BaseError) -> u64 {
    if umis.is_empty() {
        return 0;
    }
    if umis.len() > MAX_DEDUP_MULTISET {
        return umis.len() as u64;
    }

    let mut by_count: Vec<(&Vec<u8>, u64)> = umis.iter().map(|(u, &c)| (u, c)).collect();
    by_count.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));

    let n = by_count.len();
    let mut dedup = n as u64;
    if n < 2 {
        return dedup;
    }

    let mut removed = vec![false; n];

    // the descending list drops its last element, the ascending one drops
    // the most-counted window; both stay as survivors
    for ai in 0..n - 1 {
        if removed[ai] {
            continue;
        }
        let (u, cu) = by_count[ai];
        for e in 1..=MAX_DEGEN_ERRORS {
            let Some(rate) = base_error.rate(e) else {
                continue;
            };
            let threshold = cu as f64 * u.len() as f64 * rate;
            for ri in (1..n).rev() {
                if ri == ai {
                    continue;
                }
                if removed[ri] {
                    continue;
                }
                let (v, cv) = by_count[ri];
                if (cv as f64) < threshold && min_seq_ld(u, v, e) <= e {
                    removed[ri] = true;
                    dedup -= 1;
                } else {
                    break;
                }
            }
        }
    }

    dedup
}

#[cfg(test)]
mod tests {
    use super::*;

    fn multiset(entries: &[(&[u8], u64)]) -> HashMap<Vec<u8>, u64> {
        entries.iter().map(|(u, c)| (u.to_vec(), *c)).collect()
    }

    fn model(rate1: f64) -> BaseError {
        BaseError::from_rates(vec![None, Some(rate1)])
    }

    #[test]
    fn below_threshold_is_not_collapsed() {
        // count(AAAT)=1 is not under 2 * 4 * 0.01 = 0.08: both survive
        let umis = multiset(&[(b"AAAA", 2), (b"AAAT", 1)]);
        assert_eq!(dedup_count(&umis, &model(0.01)), 2);
    }

    #[test]
    fn high_error_rate_collapses_neighbors() {
        // threshold = 1000 * 4 * 0.05 = 200; the two 1-distance singletons fold in
        let umis = multiset(&[(b"AAAA", 1000), (b"AAAT", 1), (b"AATA", 2)]);
        assert_eq!(dedup_count(&umis, &model(0.05)), 1);
    }

    #[test]
    fn distant_windows_survive() {
        // distance 4 exceeds every allowed error count
        let umis = multiset(&[(b"AAAA", 1000), (b"TTTT", 1)]);
        assert_eq!(dedup_count(&umis, &model(0.05)), 2);
    }

    #[test]
    fn first_failure_ends_the_ascending_scan() {
        // TTTT (distance 4) is scanned first and fails; the break shields
        // AAAT behind it in count order even though it would collapse
        let umis = multiset(&[(b"AAAA", 1000), (b"TTTT", 1), (b"AAAT", 2)]);
        assert_eq!(dedup_count(&umis, &model(0.05)), 3);
    }

    #[test]
    fn no_calibration_no_collapse() {
        let umis = multiset(&[(b"AAAA", 1000), (b"AAAT", 1)]);
        assert_eq!(dedup_count(&umis, &BaseError::default()), 2);
    }

    #[test]
    fn unique_windows_only() {
        let umis = multiset(&[(b"AAAA", 5)]);
        assert_eq!(dedup_count(&umis, &model(0.5)), 1);
    }
}
