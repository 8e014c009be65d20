//! Token-set text similarity

use std::collections::HashSet;

/// Jaccard similarity of the lowercase whitespace token sets of `a` and `b`.
///
/// Identical strings (after lowercasing) score 1.0; two strings with no tokens at
/// all score 0.0 unless they are identical.
pub fn jaccard(a: &str, b: &str) -> f64 {
    let a = a.to_lowercase();
    let b = b.to_lowercase();
    if a == b {
        return 1.0;
    }

    let left: HashSet<&str> = a.split_whitespace().collect();
    let right: HashSet<&str> = b.split_whitespace().collect();

    let union = left.union(&right).count();
    if union == 0 {
        return 0.0;
    }
    let intersection = left.intersection(&right).count();

    intersection as f64 / union as f64
}
