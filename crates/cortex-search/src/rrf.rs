//! Reciprocal Rank Fusion.

use std::collections::HashSet;

pub const K: f64 = 60.0;

/// One ranked list (best match first) with its fusion weight.
pub struct RankedList<'a> {
    pub ids: &'a [i64],
    pub weight: f64,
}

/// `Σ w_source · 1/(K + rank)` for every id appearing in at least one
/// list, using `rank = len(list) + 1` for a list that doesn't contain the
/// id. Deterministic and order-independent in the input lists themselves
/// (only positions within each list matter).
pub fn fuse(lists: &[RankedList<'_>]) -> Vec<(i64, f64)> {
    let mut ids: HashSet<i64> = HashSet::new();
    for list in lists {
        ids.extend(list.ids.iter().copied());
    }

    let mut scores = Vec::with_capacity(ids.len());
    for id in ids {
        let mut score = 0.0;
        for list in lists {
            let rank = list.ids.iter().position(|&x| x == id).map(|i| i + 1).unwrap_or(list.ids.len() + 1);
            score += list.weight * (1.0 / (K + rank as f64));
        }
        scores.push((id, score));
    }
    scores
}
