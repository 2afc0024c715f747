//! Bounded-memory joint distributions used by pattern statistics.
//!
//! - [`NumericHistogram`]: streaming joint histogram over a fixed list of
//!   numeric dimensions. Bins carry a count and a per-dimension mean and are
//!   merged pairwise (closest first) once `max_bins` is exceeded. Bins only
//!   merge with bins sharing the same presence mask, so a missing value is
//!   never imputed. While the number of distinct rows stays under
//!   `max_bins` every query is exact.
//! - [`CategoricalHistogram`]: joint frequency table over a fixed list of
//!   categorical dimensions, capped at `max_tuples` distinct tuples.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

/// Default bin budget of a numeric histogram.
pub const DEFAULT_MAX_NUMERIC_BINS: usize = 32;
/// Default tuple budget of a categorical histogram.
pub const DEFAULT_MAX_CATEGORICAL_TUPLES: usize = 1024;

/// Memory limits shared by every histogram of a pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistogramLimits {
    pub max_numeric_bins: usize,
    pub max_categorical_tuples: usize,
}

impl Default for HistogramLimits {
    fn default() -> Self {
        Self {
            max_numeric_bins: DEFAULT_MAX_NUMERIC_BINS,
            max_categorical_tuples: DEFAULT_MAX_CATEGORICAL_TUPLES,
        }
    }
}

/// Bound on one numeric dimension: `lower < value <= upper`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DimensionBound {
    pub dimension: usize,
    pub lower: Option<f64>,
    pub upper: Option<f64>,
}

impl DimensionBound {
    fn admits(&self, value: Option<f64>) -> bool {
        match value {
            Some(v) => {
                self.lower.map_or(true, |lo| v > lo) && self.upper.map_or(true, |hi| v <= hi)
            }
            None => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct NumericBin {
    count: u64,
    /// Per-dimension mean; `None` where the rows in this bin had no value.
    means: Vec<Option<f64>>,
}

impl NumericBin {
    fn same_mask(&self, other: &NumericBin) -> bool {
        self.means
            .iter()
            .zip(&other.means)
            .all(|(a, b)| a.is_some() == b.is_some())
    }

    fn distance(&self, other: &NumericBin) -> f64 {
        self.means
            .iter()
            .zip(&other.means)
            .map(|(a, b)| match (a, b) {
                (Some(a), Some(b)) => (a - b) * (a - b),
                _ => 0.0,
            })
            .sum()
    }

    fn absorb(&mut self, other: NumericBin) {
        let total = (self.count + other.count) as f64;
        let (wa, wb) = (self.count as f64 / total, other.count as f64 / total);
        for (a, b) in self.means.iter_mut().zip(other.means) {
            if let (Some(a), Some(b)) = (a.as_mut(), b) {
                *a = *a * wa + b * wb;
            }
        }
        self.count += other.count;
    }
}

/// Streaming joint histogram over numeric dimensions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumericHistogram {
    dimensions: Vec<String>,
    max_bins: usize,
    bins: Vec<NumericBin>,
    total: u64,
}

impl NumericHistogram {
    pub fn new(dimensions: Vec<String>, max_bins: usize) -> Self {
        Self {
            dimensions,
            max_bins: max_bins.max(1),
            bins: Vec::new(),
            total: 0,
        }
    }

    pub fn dimensions(&self) -> &[String] {
        &self.dimensions
    }

    pub fn dimension_index(&self, name: &str) -> Option<usize> {
        self.dimensions.iter().position(|d| d == name)
    }

    /// Number of rows added.
    pub fn count(&self) -> u64 {
        self.total
    }

    pub fn bin_count(&self) -> usize {
        self.bins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    /// Drop every row, keeping dimensions and budget.
    pub fn clear(&mut self) {
        self.bins.clear();
        self.total = 0;
    }

    /// Add one row. `row` must have one entry per dimension.
    pub fn add(&mut self, row: &[Option<f64>]) {
        self.add_weighted(row, 1);
    }

    /// Add `weight` identical rows.
    pub fn add_weighted(&mut self, row: &[Option<f64>], weight: u64) {
        debug_assert_eq!(row.len(), self.dimensions.len());
        if weight == 0 {
            return;
        }
        self.total += weight;
        if let Some(bin) = self.bins.iter_mut().find(|b| b.means.as_slice() == row) {
            bin.count += weight;
            return;
        }
        self.bins.push(NumericBin {
            count: weight,
            means: row.to_vec(),
        });
        if self.bins.len() > self.max_bins {
            self.merge_closest();
        }
    }

    /// Merge the closest pair of bins sharing a presence mask. When every
    /// mask is distinct the budget is exceeded rather than imputing values.
    fn merge_closest(&mut self) {
        let mut best: Option<(usize, usize, f64)> = None;
        for i in 0..self.bins.len() {
            for j in (i + 1)..self.bins.len() {
                if !self.bins[i].same_mask(&self.bins[j]) {
                    continue;
                }
                let d = self.bins[i].distance(&self.bins[j]);
                if best.map_or(true, |(_, _, bd)| d < bd) {
                    best = Some((i, j, d));
                }
            }
        }
        if let Some((i, j, _)) = best {
            let other = self.bins.swap_remove(j);
            self.bins[i].absorb(other);
        }
    }

    /// Probability mass inside the box described by `bounds`. Rows missing a
    /// bounded dimension fall outside the box. No bounds means mass 1.
    pub fn cdf(&self, bounds: &[DimensionBound]) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        let inside: u64 = self
            .bins
            .iter()
            .filter(|bin| {
                bounds.iter().all(|b| {
                    bin.means
                        .get(b.dimension)
                        .is_some_and(|v| b.admits(*v))
                })
            })
            .map(|bin| bin.count)
            .sum();
        inside as f64 / self.total as f64
    }

    /// Mean of one dimension over the rows that carried a value.
    pub fn mean(&self, dimension: usize) -> Option<f64> {
        let mut weight = 0u64;
        let mut sum = 0.0;
        for bin in &self.bins {
            if let Some(Some(v)) = bin.means.get(dimension) {
                weight += bin.count;
                sum += v * bin.count as f64;
            }
        }
        (weight > 0).then(|| sum / weight as f64)
    }

    /// Mean of a dimension addressed by name.
    pub fn mean_of(&self, name: &str) -> Option<f64> {
        self.dimension_index(name).and_then(|idx| self.mean(idx))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct CategoricalBin {
    values: Vec<Option<String>>,
    count: u64,
}

/// Joint frequency table over categorical dimensions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoricalHistogram {
    dimensions: Vec<String>,
    max_tuples: usize,
    bins: Vec<CategoricalBin>,
    /// Rows whose tuple arrived after the tuple budget was exhausted.
    overflow: u64,
    total: u64,
    #[serde(skip)]
    index: FxHashMap<Vec<Option<String>>, usize>,
}

impl PartialEq for CategoricalHistogram {
    fn eq(&self, other: &Self) -> bool {
        self.dimensions == other.dimensions
            && self.max_tuples == other.max_tuples
            && self.bins == other.bins
            && self.overflow == other.overflow
            && self.total == other.total
    }
}

impl CategoricalHistogram {
    pub fn new(dimensions: Vec<String>, max_tuples: usize) -> Self {
        Self {
            dimensions,
            max_tuples,
            bins: Vec::new(),
            overflow: 0,
            total: 0,
            index: FxHashMap::default(),
        }
    }

    pub fn dimensions(&self) -> &[String] {
        &self.dimensions
    }

    pub fn dimension_index(&self, name: &str) -> Option<usize> {
        self.dimensions.iter().position(|d| d == name)
    }

    pub fn count(&self) -> u64 {
        self.total
    }

    pub fn overflow(&self) -> u64 {
        self.overflow
    }

    pub fn tuple_count(&self) -> usize {
        self.bins.len()
    }

    /// Add one row. `row` must have one entry per dimension.
    pub fn add(&mut self, row: Vec<Option<String>>) {
        self.add_weighted(row, 1);
    }

    pub fn add_weighted(&mut self, row: Vec<Option<String>>, weight: u64) {
        debug_assert_eq!(row.len(), self.dimensions.len());
        if weight == 0 {
            return;
        }
        self.total += weight;
        if self.index.len() != self.bins.len() {
            self.rebuild_index();
        }
        if let Some(&idx) = self.index.get(&row) {
            self.bins[idx].count += weight;
            return;
        }
        if self.bins.len() >= self.max_tuples {
            self.overflow += weight;
            return;
        }
        self.index.insert(row.clone(), self.bins.len());
        self.bins.push(CategoricalBin {
            values: row,
            count: weight,
        });
    }

    pub fn clear(&mut self) {
        self.bins.clear();
        self.index.clear();
        self.overflow = 0;
        self.total = 0;
    }

    fn rebuild_index(&mut self) {
        self.index = self
            .bins
            .iter()
            .enumerate()
            .map(|(i, b)| (b.values.clone(), i))
            .collect();
    }

    /// Probability that every `(dimension, value)` equality holds.
    /// Overflow rows never match. No equalities means mass 1.
    pub fn pdf(&self, equalities: &[(usize, &str)]) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        if equalities.is_empty() {
            return 1.0;
        }
        let matching: u64 = self
            .bins
            .iter()
            .filter(|bin| {
                equalities.iter().all(|(dim, value)| {
                    matches!(bin.values.get(*dim), Some(Some(v)) if v == value)
                })
            })
            .map(|bin| bin.count)
            .sum();
        matching as f64 / self.total as f64
    }

    /// Frequency of each observed value of one dimension, most frequent first.
    pub fn value_counts(&self, dimension: usize) -> Vec<(String, u64)> {
        let mut counts: FxHashMap<&str, u64> = FxHashMap::default();
        for bin in &self.bins {
            if let Some(Some(v)) = bin.values.get(dimension) {
                *counts.entry(v.as_str()).or_insert(0) += bin.count;
            }
        }
        let mut out: Vec<(String, u64)> =
            counts.into_iter().map(|(k, c)| (k.to_string(), c)).collect();
        out.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dims(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_numeric_exact_under_budget() {
        let mut h = NumericHistogram::new(dims(&["1.amount"]), 8);
        for v in [1.0, 2.0, 3.0, 4.0] {
            h.add(&[Some(v)]);
        }
        let at_most_two = DimensionBound {
            dimension: 0,
            lower: None,
            upper: Some(2.0),
        };
        assert_eq!(h.cdf(&[at_most_two]), 0.5);
        assert_eq!(h.mean(0), Some(2.5));
        assert_eq!(h.cdf(&[]), 1.0);
    }

    #[test]
    fn test_numeric_merge_preserves_mean_and_count() {
        let mut h = NumericHistogram::new(dims(&["x"]), 4);
        let values: Vec<f64> = (0..100).map(|i| i as f64).collect();
        for v in &values {
            h.add(&[Some(*v)]);
        }
        assert!(h.bin_count() <= 4);
        assert_eq!(h.count(), 100);
        let mean = h.mean(0).unwrap();
        assert!((mean - 49.5).abs() < 1e-9, "mean drifted: {}", mean);
    }

    #[test]
    fn test_numeric_duplicate_rows_share_bin() {
        let mut h = NumericHistogram::new(dims(&["x", "y"]), 2);
        for _ in 0..10 {
            h.add(&[Some(1.0), Some(2.0)]);
        }
        assert_eq!(h.bin_count(), 1);
        assert_eq!(h.count(), 10);
    }

    #[test]
    fn test_numeric_missing_values_never_merge() {
        let mut h = NumericHistogram::new(dims(&["x"]), 1);
        h.add(&[Some(1.0)]);
        h.add(&[None]);
        assert_eq!(h.bin_count(), 2);
        let bounded = DimensionBound {
            dimension: 0,
            lower: None,
            upper: Some(10.0),
        };
        assert_eq!(h.cdf(&[bounded]), 0.5);
        assert_eq!(h.mean(0), Some(1.0));
    }

    #[test]
    fn test_weighted_rows_and_clear() {
        let mut h = NumericHistogram::new(dims(&["x"]), 4);
        h.add_weighted(&[Some(3.0)], 5);
        h.add(&[Some(1.0)]);
        assert_eq!(h.count(), 6);
        assert_eq!(h.mean(0), Some(16.0 / 6.0));
        h.clear();
        assert!(h.is_empty());
        assert_eq!(h.dimensions(), &["x".to_string()]);

        let mut c = CategoricalHistogram::new(dims(&["c"]), 4);
        c.add_weighted(vec![Some("a".into())], 3);
        c.add(vec![Some("b".into())]);
        assert_eq!(c.pdf(&[(0, "a")]), 0.75);
        c.clear();
        assert_eq!(c.count(), 0);
        c.add(vec![Some("b".into())]);
        assert_eq!(c.pdf(&[(0, "b")]), 1.0);
    }

    #[test]
    fn test_numeric_empty() {
        let h = NumericHistogram::new(dims(&["x"]), 4);
        assert!(h.is_empty());
        assert_eq!(h.cdf(&[]), 0.0);
        assert_eq!(h.mean(0), None);
        assert_eq!(h.mean_of("y"), None);
    }

    #[test]
    fn test_categorical_pdf() {
        let mut h = CategoricalHistogram::new(dims(&["1.country", "1.plan"]), 16);
        h.add(vec![Some("IN".into()), Some("pro".into())]);
        h.add(vec![Some("IN".into()), Some("free".into())]);
        h.add(vec![Some("US".into()), Some("pro".into())]);
        h.add(vec![None, Some("pro".into())]);

        assert_eq!(h.pdf(&[(0, "IN")]), 0.5);
        assert_eq!(h.pdf(&[(0, "IN"), (1, "pro")]), 0.25);
        assert_eq!(h.pdf(&[(1, "pro")]), 0.75);
        assert_eq!(h.pdf(&[(0, "FR")]), 0.0);
        assert_eq!(h.pdf(&[]), 1.0);
        assert_eq!(h.value_counts(0), vec![("IN".into(), 2), ("US".into(), 1)]);
    }

    #[test]
    fn test_categorical_overflow() {
        let mut h = CategoricalHistogram::new(dims(&["c"]), 2);
        h.add(vec![Some("a".into())]);
        h.add(vec![Some("b".into())]);
        h.add(vec![Some("c".into())]);
        h.add(vec![Some("a".into())]);
        assert_eq!(h.tuple_count(), 2);
        assert_eq!(h.overflow(), 1);
        assert_eq!(h.count(), 4);
        assert_eq!(h.pdf(&[(0, "a")]), 0.5);
        assert_eq!(h.pdf(&[(0, "c")]), 0.0);
    }

    #[test]
    fn test_categorical_serde_rebuilds_index() {
        let mut h = CategoricalHistogram::new(dims(&["c"]), 4);
        h.add(vec![Some("a".into())]);
        let json = serde_json::to_string(&h).unwrap();
        let mut back: CategoricalHistogram = serde_json::from_str(&json).unwrap();
        assert_eq!(back, h);
        back.add(vec![Some("a".into())]);
        assert_eq!(back.tuple_count(), 1);
        assert_eq!(back.pdf(&[(0, "a")]), 1.0);
    }
}
