//! Vector index primitives: cosine similarity, bounded top-k
//! accumulators, and median-vector aggregation.
//!
//! These are the building blocks for nearest-neighbor lookup and
//! centroid computation. They operate on plain slices and on [`Item`]s;
//! items without a vector are filtered out before scoring and never
//! enter the accumulators.

use crate::item::Item;

/// A scored candidate, keyed by item key.
#[derive(Debug, Clone, PartialEq)]
pub struct Scored {
    pub key: String,
    pub score: f32,
}

/// Bounded accumulator retaining the `k` highest-scoring candidates.
///
/// While below capacity, candidates are inserted unconditionally. At
/// capacity the current minimum is computed once and cached; a new
/// candidate is accepted only if its score *strictly* exceeds that
/// minimum, evicting the prior minimum and recomputing the cache from
/// the remaining set. Because the comparison is strict, re-inserting a
/// boundary value is a no-op, making insertion idempotent.
#[derive(Debug, Clone)]
pub struct NearestAcc {
    k: usize,
    entries: Vec<Scored>,
    cached_min: Option<f32>,
}

impl NearestAcc {
    pub fn new(k: usize) -> Self {
        Self {
            k,
            entries: Vec::with_capacity(k),
            cached_min: None,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Offer a candidate. Returns whether it was retained.
    pub fn insert(&mut self, candidate: Scored) -> bool {
        if self.k == 0 {
            return false;
        }
        if self.entries.len() < self.k {
            self.entries.push(candidate);
            return true;
        }

        let min = match self.cached_min {
            Some(min) => min,
            None => {
                let min = self
                    .entries
                    .iter()
                    .map(|e| e.score)
                    .fold(f32::INFINITY, f32::min);
                self.cached_min = Some(min);
                min
            }
        };

        if candidate.score <= min {
            return false;
        }

        if let Some(pos) = self.entries.iter().position(|e| e.score == min) {
            self.entries.swap_remove(pos);
        }
        self.entries.push(candidate);
        self.cached_min = Some(
            self.entries
                .iter()
                .map(|e| e.score)
                .fold(f32::INFINITY, f32::min),
        );
        true
    }

    /// Retained candidates, best first.
    pub fn into_sorted(mut self) -> Vec<Scored> {
        self.entries.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.key.cmp(&b.key))
        });
        self.entries
    }
}

/// Mirror of [`NearestAcc`]: retains the `k` *lowest*-scoring
/// candidates against a cached maximum, accepting strictly smaller
/// scores.
#[derive(Debug, Clone)]
pub struct FurthestAcc {
    k: usize,
    entries: Vec<Scored>,
    cached_max: Option<f32>,
}

impl FurthestAcc {
    pub fn new(k: usize) -> Self {
        Self {
            k,
            entries: Vec::with_capacity(k),
            cached_max: None,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn insert(&mut self, candidate: Scored) -> bool {
        if self.k == 0 {
            return false;
        }
        if self.entries.len() < self.k {
            self.entries.push(candidate);
            return true;
        }

        let max = match self.cached_max {
            Some(max) => max,
            None => {
                let max = self
                    .entries
                    .iter()
                    .map(|e| e.score)
                    .fold(f32::NEG_INFINITY, f32::max);
                self.cached_max = Some(max);
                max
            }
        };

        if candidate.score >= max {
            return false;
        }

        if let Some(pos) = self.entries.iter().position(|e| e.score == max) {
            self.entries.swap_remove(pos);
        }
        self.entries.push(candidate);
        self.cached_max = Some(
            self.entries
                .iter()
                .map(|e| e.score)
                .fold(f32::NEG_INFINITY, f32::max),
        );
        true
    }

    /// Retained candidates, worst (lowest) first.
    pub fn into_sorted(mut self) -> Vec<Scored> {
        self.entries.sort_by(|a, b| {
            a.score
                .partial_cmp(&b.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.key.cmp(&b.key))
        });
        self.entries
    }
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`:
/// - `1.0` = identical direction
/// - `0.0` = orthogonal (unrelated)
/// - `-1.0` = opposite direction
///
/// Returns `0.0` for empty vectors or vectors of different lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

/// Element-wise median of a set of equal-length vectors.
///
/// For an even count, each element is the average of the two middle
/// values. Robust to outlier members compared to a mean. Vectors whose
/// length differs from the first are skipped. Returns `None` when no
/// usable vectors remain.
pub fn median_vector<V: AsRef<[f32]>>(vectors: &[V]) -> Option<Vec<f32>> {
    let dims = vectors.first()?.as_ref().len();
    let usable: Vec<&[f32]> = vectors
        .iter()
        .map(AsRef::as_ref)
        .filter(|v| v.len() == dims)
        .collect();
    if usable.is_empty() || dims == 0 {
        return None;
    }

    let mut median = Vec::with_capacity(dims);
    let mut column = Vec::with_capacity(usable.len());
    for dim in 0..dims {
        column.clear();
        column.extend(usable.iter().map(|v| v[dim]));
        column.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let mid = column.len() / 2;
        let value = if column.len() % 2 == 1 {
            column[mid]
        } else {
            (column[mid - 1] + column[mid]) / 2.0
        };
        median.push(value);
    }
    Some(median)
}

/// The `k` items most similar to `query`, by cosine similarity.
///
/// Vector-less items are excluded before scoring.
pub fn nearest<'a, I>(items: I, query: &[f32], k: usize) -> Vec<Scored>
where
    I: IntoIterator<Item = &'a Item>,
{
    let mut acc = NearestAcc::new(k);
    for item in items {
        if let Some(vec) = &item.vec {
            acc.insert(Scored {
                key: item.key.clone(),
                score: cosine_similarity(query, vec),
            });
        }
    }
    acc.into_sorted()
}

/// The `k` items least similar to `query`, by cosine similarity.
pub fn furthest<'a, I>(items: I, query: &[f32], k: usize) -> Vec<Scored>
where
    I: IntoIterator<Item = &'a Item>,
{
    let mut acc = FurthestAcc::new(k);
    for item in items {
        if let Some(vec) = &item.vec {
            acc.insert(Scored {
                key: item.key.clone(),
                score: cosine_similarity(query, vec),
            });
        }
    }
    acc.into_sorted()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::{Item, ItemKind};

    fn scored(key: &str, score: f32) -> Scored {
        Scored {
            key: key.to_string(),
            score,
        }
    }

    #[test]
    fn test_nearest_acc_evicts_minimum() {
        let mut acc = NearestAcc::new(3);
        acc.insert(scored("a", 10.0));
        acc.insert(scored("b", 8.0));
        acc.insert(scored("c", 6.0));
        assert!(acc.insert(scored("d", 9.0)));

        let result = acc.into_sorted();
        let scores: Vec<f32> = result.iter().map(|s| s.score).collect();
        assert_eq!(scores, vec![10.0, 9.0, 8.0]);
        assert!(!result.iter().any(|s| s.key == "c"));
    }

    #[test]
    fn test_nearest_acc_boundary_is_rejected() {
        let mut acc = NearestAcc::new(2);
        acc.insert(scored("a", 5.0));
        acc.insert(scored("b", 3.0));
        // equal to the current minimum: strict comparison rejects it
        assert!(!acc.insert(scored("c", 3.0)));
        assert!(!acc.insert(scored("c", 3.0)));
        assert_eq!(acc.len(), 2);
    }

    #[test]
    fn test_nearest_acc_below_capacity_accepts_everything() {
        let mut acc = NearestAcc::new(5);
        assert!(acc.insert(scored("a", -1.0)));
        assert!(acc.insert(scored("b", -1.0)));
        assert_eq!(acc.len(), 2);
    }

    #[test]
    fn test_nearest_acc_zero_capacity() {
        let mut acc = NearestAcc::new(0);
        assert!(!acc.insert(scored("a", 1.0)));
        assert!(acc.is_empty());
    }

    #[test]
    fn test_furthest_acc_evicts_maximum() {
        let mut acc = FurthestAcc::new(3);
        acc.insert(scored("a", 1.0));
        acc.insert(scored("b", 3.0));
        acc.insert(scored("c", 5.0));
        assert!(acc.insert(scored("d", 2.0)));

        let scores: Vec<f32> = acc.into_sorted().iter().map(|s| s.score).collect();
        assert_eq!(scores, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_furthest_acc_boundary_is_rejected() {
        let mut acc = FurthestAcc::new(2);
        acc.insert(scored("a", 1.0));
        acc.insert(scored("b", 4.0));
        assert!(!acc.insert(scored("c", 4.0)));
    }

    #[test]
    fn test_cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_opposite() {
        let a = vec![1.0, 0.0];
        let b = vec![-1.0, 0.0];
        assert!((cosine_similarity(&a, &b) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_length_mismatch() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
    }

    #[test]
    fn test_median_odd_count() {
        let vectors = vec![vec![1.0, 1.0], vec![2.0, 2.0], vec![3.0, 3.0]];
        assert_eq!(median_vector(&vectors), Some(vec![2.0, 2.0]));
    }

    #[test]
    fn test_median_even_count_averages_middles() {
        let vectors = vec![vec![1.0, 1.0], vec![3.0, 3.0]];
        assert_eq!(median_vector(&vectors), Some(vec![2.0, 2.0]));
    }

    #[test]
    fn test_median_resists_outlier() {
        let vectors = vec![vec![1.0], vec![1.1], vec![0.9], vec![100.0], vec![1.0]];
        assert_eq!(median_vector(&vectors), Some(vec![1.0]));
    }

    #[test]
    fn test_median_empty() {
        let vectors: Vec<Vec<f32>> = Vec::new();
        assert_eq!(median_vector(&vectors), None);
    }

    #[test]
    fn test_nearest_filters_vectorless_items() {
        let mut with_vec = Item::new("a", ItemKind::Block);
        with_vec.vec = Some(vec![1.0, 0.0]);
        let without_vec = Item::new("b", ItemKind::Block);
        let items = vec![with_vec, without_vec];

        let result = nearest(items.iter(), &[1.0, 0.0], 10);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].key, "a");
    }
}
