//! Set, multiset, and histogram similarity primitives.
//!
//! Edge definitions are part of the score contract: two empty sets (or
//! multisets) agree vacuously and score `1`, while a histogram with no mass
//! carries no evidence and any cosine involving it scores `0`.

use std::collections::{BTreeMap, BTreeSet};

/// Multiset of strings (value -> occurrence count).
pub type Multiset = BTreeMap<String, u32>;

pub fn jaccard<T: Ord>(a: &BTreeSet<T>, b: &BTreeSet<T>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.len() + b.len() - intersection;
    if union == 0 {
        return 0.0;
    }
    intersection as f64 / union as f64
}

/// Weighted Jaccard: `Σ min(a, b) / Σ max(a, b)` over the union of keys.
pub fn multiset_jaccard(a: &Multiset, b: &Multiset) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let mut min_sum: u64 = 0;
    let mut max_sum: u64 = 0;
    for (key, &count_a) in a {
        let count_b = b.get(key).copied().unwrap_or(0);
        min_sum += u64::from(count_a.min(count_b));
        max_sum += u64::from(count_a.max(count_b));
    }
    for (key, &count_b) in b {
        if !a.contains_key(key) {
            max_sum += u64::from(count_b);
        }
    }
    if max_sum == 0 {
        return 0.0;
    }
    min_sum as f64 / max_sum as f64
}

/// Cosine similarity of two histograms viewed as sparse vectors.
pub fn cosine(a: &Multiset, b: &Multiset) -> f64 {
    let mut dot = 0.0;
    for (key, &count_a) in a {
        if let Some(&count_b) = b.get(key) {
            dot += f64::from(count_a) * f64::from(count_b);
        }
    }
    let norm_a: f64 = a.values().map(|&v| f64::from(v) * f64::from(v)).sum();
    let norm_b: f64 = b.values().map(|&v| f64::from(v) * f64::from(v)).sum();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    // sqrt(n * n) == n exactly, so identical histograms score exactly 1.
    (dot / (norm_a * norm_b).sqrt()).min(1.0)
}

pub fn equality<T: PartialEq>(a: &T, b: &T) -> f64 {
    if a == b {
        1.0
    } else {
        0.0
    }
}

/// `1 − |a − b| / max(1, max(a, b))`.
pub fn count_closeness(a: u32, b: u32) -> f64 {
    let delta = a.abs_diff(b);
    1.0 - f64::from(delta) / f64::from(a.max(b).max(1))
}

/// `Σ w·s / Σ w` over `(weight, score)` pairs; `0` when all weights are zero.
pub fn weighted_mean(components: &[(f64, f64)]) -> f64 {
    let mut numerator = 0.0;
    let mut denominator = 0.0;
    for &(weight, score) in components {
        numerator += weight * score;
        denominator += weight;
    }
    if denominator == 0.0 {
        return 0.0;
    }
    numerator / denominator
}

pub fn tally<I, S>(values: I) -> Multiset
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut multiset = Multiset::new();
    for value in values {
        *multiset.entry(value.into()).or_insert(0) += 1;
    }
    multiset
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(values: &[&str]) -> BTreeSet<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_jaccard_empty_sets_agree() {
        assert_eq!(jaccard(&set(&[]), &set(&[])), 1.0);
    }

    #[test]
    fn test_jaccard_one_empty() {
        assert_eq!(jaccard(&set(&["a"]), &set(&[])), 0.0);
    }

    #[test]
    fn test_jaccard_partial_overlap() {
        assert_eq!(jaccard(&set(&["a", "b"]), &set(&["b", "c"])), 1.0 / 3.0);
    }

    #[test]
    fn test_multiset_jaccard_counts_repeats() {
        let a = tally(["(I)V", "(I)V", "()V"]);
        let b = tally(["(I)V", "()V", "()V"]);
        // min: (I)V 1 + ()V 1 = 2, max: 2 + 2 = 4
        assert_eq!(multiset_jaccard(&a, &b), 0.5);
    }

    #[test]
    fn test_multiset_jaccard_empty() {
        assert_eq!(multiset_jaccard(&Multiset::new(), &Multiset::new()), 1.0);
        assert_eq!(multiset_jaccard(&tally(["x"]), &Multiset::new()), 0.0);
    }

    #[test]
    fn test_cosine_zero_histograms_score_zero() {
        assert_eq!(cosine(&Multiset::new(), &Multiset::new()), 0.0);
        assert_eq!(cosine(&tally(["ALOAD"]), &Multiset::new()), 0.0);
    }

    #[test]
    fn test_cosine_identical_is_exactly_one() {
        let h = tally(["ALOAD", "ALOAD", "ALOAD", "GETFIELD", "IRETURN", "IADD", "IADD"]);
        assert_eq!(cosine(&h, &h), 1.0);
    }

    #[test]
    fn test_cosine_orthogonal() {
        assert_eq!(cosine(&tally(["ALOAD"]), &tally(["RETURN"])), 0.0);
    }

    #[test]
    fn test_cosine_scaled_histograms_match() {
        let a = tally(["A", "B"]);
        let b = tally(["A", "A", "B", "B"]);
        assert!((cosine(&a, &b) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_count_closeness() {
        assert_eq!(count_closeness(0, 0), 1.0);
        assert_eq!(count_closeness(2, 2), 1.0);
        assert_eq!(count_closeness(1, 3), 1.0 - 2.0 / 3.0);
        assert_eq!(count_closeness(0, 1), 0.0);
    }

    #[test]
    fn test_weighted_mean() {
        assert_eq!(weighted_mean(&[(1.0, 1.0), (3.0, 0.0)]), 0.25);
        assert_eq!(weighted_mean(&[(0.0, 1.0)]), 0.0);
    }
}
