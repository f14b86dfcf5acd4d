//! Named validation metrics over a partition, `(data, labels) -> score`.
//!
//! The ensemble and the elbow search only invoke these; the built-ins exist so callers do not
//! have to bring their own for the common cases. Scores that are undefined for the given
//! partition (a single cluster, say) come back as NaN.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use ndarray::{Array1, Array2, ArrayView2};

use crate::dataset::distance;
use crate::error::{Error, Result};

/// A validation metric.
pub type MetricFn = Arc<dyn Fn(ArrayView2<'_, f64>, &[usize]) -> f64 + Send + Sync>;

/// Names of the built-in metrics.
pub const BUILTIN: &[&str] = &[
    "calinski_harabasz",
    "davies_bouldin",
    "dunn_index",
    "inertia",
    "silhouette",
    "simplified_silhouette",
];

/// Look up a built-in metric by name.
pub fn builtin(name: &str) -> Option<MetricFn> {
    let f: MetricFn = match name {
        "calinski_harabasz" => Arc::new(calinski_harabasz),
        "davies_bouldin" => Arc::new(davies_bouldin),
        "dunn_index" => Arc::new(dunn_index),
        "inertia" => Arc::new(inertia),
        "silhouette" => Arc::new(silhouette),
        "simplified_silhouette" => Arc::new(simplified_silhouette),
        _ => return None,
    };
    Some(f)
}

/// An ordered set of uniquely named metrics.
#[derive(Clone, Default)]
pub struct MetricSet {
    metrics: Vec<(String, MetricFn)>,
}

impl MetricSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every built-in metric.
    pub fn all() -> Self {
        Self::from_names(BUILTIN).unwrap_or_default()
    }

    /// Built-in metrics by name; `"all"` selects every built-in.
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Result<Self> {
        let mut set = Self::new();
        for name in names {
            let name = name.as_ref();
            if name == "all" {
                for b in BUILTIN {
                    if !set.contains(b) {
                        set.insert(*b, builtin(b).ok_or_else(|| Error::UnknownMetric(b.to_string()))?)?;
                    }
                }
                continue;
            }
            let f = builtin(name).ok_or_else(|| Error::UnknownMetric(name.to_string()))?;
            set.insert(name, f)?;
        }
        Ok(set)
    }

    /// Register a metric under a new name.
    pub fn insert(&mut self, name: impl Into<String>, metric: MetricFn) -> Result<()> {
        let name = name.into();
        if self.contains(&name) {
            return Err(Error::DuplicateName(name));
        }
        self.metrics.push((name, metric));
        Ok(())
    }

    pub fn with(mut self, name: impl Into<String>, metric: MetricFn) -> Result<Self> {
        self.insert(name, metric)?;
        Ok(self)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.metrics.iter().any(|(n, _)| n == name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.metrics.iter().map(|(n, _)| n.as_str())
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    /// Evaluate every metric except those named in `skip`.
    pub fn evaluate(&self, data: ArrayView2<'_, f64>, labels: &[usize], skip: &[&str]) -> BTreeMap<String, f64> {
        self.metrics
            .iter()
            .filter(|(name, _)| !skip.contains(&name.as_str()))
            .map(|(name, f)| (name.clone(), f(data, labels)))
            .collect()
    }
}

impl fmt::Debug for MetricSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

/// Dense regrouping of a label vector: cluster centers, sizes and per-sample cluster index.
struct Clusters {
    centers: Array2<f64>,
    sizes: Vec<usize>,
    index: Vec<usize>,
}

impl Clusters {
    fn new(data: ArrayView2<'_, f64>, labels: &[usize]) -> Self {
        debug_assert_eq!(data.nrows(), labels.len());
        let mut ids: BTreeMap<usize, usize> = BTreeMap::new();
        for &l in labels {
            let next = ids.len();
            ids.entry(l).or_insert(next);
        }
        let index: Vec<usize> = labels.iter().map(|l| ids[l]).collect();

        let m = ids.len();
        let mut centers = Array2::<f64>::zeros((m, data.ncols()));
        let mut sizes = vec![0usize; m];
        for (i, &c) in index.iter().enumerate() {
            let mut row = centers.row_mut(c);
            row += &data.row(i);
            sizes[c] += 1;
        }
        for (c, mut row) in centers.outer_iter_mut().enumerate() {
            row.mapv_inplace(|x| x / sizes[c] as f64);
        }
        Self { centers, sizes, index }
    }

    fn len(&self) -> usize {
        self.sizes.len()
    }

    /// Mean distance of the members of each cluster to its center.
    fn scatter(&self, data: ArrayView2<'_, f64>) -> Vec<f64> {
        let mut total = vec![0.0; self.len()];
        for (i, &c) in self.index.iter().enumerate() {
            total[c] += distance(data.row(i), self.centers.row(c));
        }
        total
            .into_iter()
            .zip(&self.sizes)
            .map(|(t, &s)| t / s as f64)
            .collect()
    }
}

/// Sum of squared distances between each sample and the mean of its cluster. Lower is better.
pub fn inertia(data: ArrayView2<'_, f64>, labels: &[usize]) -> f64 {
    let clusters = Clusters::new(data, labels);
    clusters
        .index
        .iter()
        .enumerate()
        .map(|(i, &c)| distance(data.row(i), clusters.centers.row(c)).powi(2))
        .sum()
}

/// Silhouette computed against cluster centers instead of all pairs. Higher is better.
pub fn simplified_silhouette(data: ArrayView2<'_, f64>, labels: &[usize]) -> f64 {
    let clusters = Clusters::new(data, labels);
    if clusters.len() < 2 {
        return f64::NAN;
    }
    let n = data.nrows();
    let total: f64 = (0..n)
        .map(|i| {
            let own = clusters.index[i];
            let a = distance(data.row(i), clusters.centers.row(own));
            let b = (0..clusters.len())
                .filter(|&c| c != own)
                .map(|c| distance(data.row(i), clusters.centers.row(c)))
                .fold(f64::INFINITY, f64::min);
            silhouette_value(a, b)
        })
        .sum();
    total / n as f64
}

/// Mean silhouette coefficient over all samples. Higher is better.
pub fn silhouette(data: ArrayView2<'_, f64>, labels: &[usize]) -> f64 {
    let clusters = Clusters::new(data, labels);
    let n = data.nrows();
    let m = clusters.len();
    if m < 2 || m >= n {
        return f64::NAN;
    }
    let mut total = 0.0;
    for i in 0..n {
        let own = clusters.index[i];
        if clusters.sizes[own] == 1 {
            continue;
        }
        let mut sums = vec![0.0; m];
        for j in 0..n {
            if i != j {
                sums[clusters.index[j]] += distance(data.row(i), data.row(j));
            }
        }
        let a = sums[own] / (clusters.sizes[own] - 1) as f64;
        let b = (0..m)
            .filter(|&c| c != own)
            .map(|c| sums[c] / clusters.sizes[c] as f64)
            .fold(f64::INFINITY, f64::min);
        total += silhouette_value(a, b);
    }
    total / n as f64
}

fn silhouette_value(a: f64, b: f64) -> f64 {
    let m = a.max(b);
    if m > 0.0 {
        (b - a) / m
    } else {
        0.0
    }
}

/// Davies-Bouldin index. Lower is better.
pub fn davies_bouldin(data: ArrayView2<'_, f64>, labels: &[usize]) -> f64 {
    let clusters = Clusters::new(data, labels);
    let m = clusters.len();
    if m < 2 {
        return f64::NAN;
    }
    let scatter = clusters.scatter(data);
    let total: f64 = (0..m)
        .map(|i| {
            (0..m)
                .filter(|&j| j != i)
                .map(|j| {
                    let d = distance(clusters.centers.row(i), clusters.centers.row(j));
                    if d > 0.0 {
                        (scatter[i] + scatter[j]) / d
                    } else {
                        0.0
                    }
                })
                .fold(0.0, f64::max)
        })
        .sum();
    total / m as f64
}

/// Calinski-Harabasz variance ratio. Higher is better.
pub fn calinski_harabasz(data: ArrayView2<'_, f64>, labels: &[usize]) -> f64 {
    let clusters = Clusters::new(data, labels);
    let n = data.nrows();
    let m = clusters.len();
    if m < 2 || n <= m {
        return f64::NAN;
    }
    let mean: Array1<f64> = match data.mean_axis(ndarray::Axis(0)) {
        Some(mean) => mean,
        None => return f64::NAN,
    };
    let between: f64 = clusters
        .centers
        .outer_iter()
        .zip(&clusters.sizes)
        .map(|(c, &s)| s as f64 * distance(c, mean.view()).powi(2))
        .sum();
    let within = inertia(data, labels);
    if within == 0.0 {
        return 1.0;
    }
    (between / (m - 1) as f64) / (within / (n - m) as f64)
}

/// Smallest distance between two centers over the largest mean member-to-center distance.
/// Higher is better.
pub fn dunn_index(data: ArrayView2<'_, f64>, labels: &[usize]) -> f64 {
    let clusters = Clusters::new(data, labels);
    let m = clusters.len();
    if m < 2 {
        return f64::NAN;
    }
    let diameter = clusters.scatter(data).into_iter().fold(0.0, f64::max);
    let mut separation = f64::INFINITY;
    for i in 0..m {
        for j in (i + 1)..m {
            separation = separation.min(distance(clusters.centers.row(i), clusters.centers.row(j)));
        }
    }
    separation / diameter
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn blobs() -> (Array2<f64>, Vec<usize>) {
        let data = array![[0.0, 0.0], [0.0, 2.0], [10.0, 0.0], [10.0, 2.0]];
        (data, vec![0, 0, 1, 1])
    }

    #[test]
    fn inertia_of_two_pairs() {
        let (data, labels) = blobs();
        // Each sample is 1 away from its center.
        assert_abs_diff_eq!(inertia(data.view(), &labels), 4.0, epsilon = 1e-12);
    }

    #[test]
    fn labels_need_not_be_contiguous() {
        let (data, _) = blobs();
        assert_abs_diff_eq!(inertia(data.view(), &[7, 7, 2, 2]), 4.0, epsilon = 1e-12);
    }

    #[test]
    fn silhouettes_of_separated_blobs() {
        let (data, labels) = blobs();
        // a = 2, b = mean(10, sqrt(104)) for every sample.
        let b = (10.0 + 104f64.sqrt()) / 2.0;
        assert_abs_diff_eq!(silhouette(data.view(), &labels), (b - 2.0) / b, epsilon = 1e-12);
        // a = 1, b = sqrt(101).
        let b = 101f64.sqrt();
        assert_abs_diff_eq!(simplified_silhouette(data.view(), &labels), (b - 1.0) / b, epsilon = 1e-12);
    }

    #[test]
    fn separation_scores() {
        let (data, labels) = blobs();
        // Both clusters scatter 1 around centers 10 apart.
        assert_abs_diff_eq!(davies_bouldin(data.view(), &labels), 0.2, epsilon = 1e-12);
        assert_abs_diff_eq!(dunn_index(data.view(), &labels), 10.0, epsilon = 1e-12);
        // Between = 2 * 25 * 2 = 100, within = 4; (100 / 1) / (4 / 2) = 50.
        assert_abs_diff_eq!(calinski_harabasz(data.view(), &labels), 50.0, epsilon = 1e-9);
    }

    #[test]
    fn single_cluster_is_undefined() {
        let (data, _) = blobs();
        let labels = [0, 0, 0, 0];
        assert!(silhouette(data.view(), &labels).is_nan());
        assert!(simplified_silhouette(data.view(), &labels).is_nan());
        assert!(davies_bouldin(data.view(), &labels).is_nan());
        assert!(calinski_harabasz(data.view(), &labels).is_nan());
        assert!(dunn_index(data.view(), &labels).is_nan());
        assert!(inertia(data.view(), &labels).is_finite());
    }

    #[test]
    fn metric_set_by_name() {
        let set = MetricSet::from_names(&["silhouette", "inertia"]).unwrap();
        assert_eq!(set.names().collect::<Vec<_>>(), vec!["silhouette", "inertia"]);
        assert!(matches!(MetricSet::from_names(&["nope"]), Err(Error::UnknownMetric(_))));
        assert!(matches!(
            MetricSet::from_names(&["inertia", "inertia"]),
            Err(Error::DuplicateName(_))
        ));
        assert_eq!(MetricSet::from_names(&["all"]).unwrap().len(), BUILTIN.len());
        assert_eq!(MetricSet::all().len(), BUILTIN.len());
    }

    fn sample_count(data: ArrayView2<'_, f64>, _labels: &[usize]) -> f64 {
        data.nrows() as f64
    }

    #[test]
    fn evaluate_skips_and_accepts_custom_metrics() {
        let (data, labels) = blobs();
        let set = MetricSet::from_names(&["inertia"])
            .unwrap()
            .with("n", Arc::new(sample_count))
            .unwrap();
        let scores = set.evaluate(data.view(), &labels, &["inertia"]);
        assert_eq!(scores.len(), 1);
        assert_eq!(scores["n"], 4.0);
    }
}
