//! Label stabilization across progressive results.
//!
//! K-means labels are arbitrary: the same partition can come back with its cluster ids
//! permuted from one iteration to the next. [`stabilize_labels`] renames the current clusters
//! after the nearest clusters of the previous result so identities stay put for a viewer.

use ndarray::Array2;

use crate::dataset::distance;

/// Greedy matching of current to previous centroids.
///
/// Returns `mapping` with `mapping[i] = j` meaning current cluster `i` takes previous label `j`.
/// The globally closest remaining pair is matched first, then its row and column are removed.
/// The result is always a permutation of `0..k`, though not necessarily the minimum-cost one.
pub fn label_mapping(current: &Array2<f64>, previous: &Array2<f64>) -> Vec<usize> {
    let k = current.nrows();
    debug_assert_eq!(previous.nrows(), k, "centroid matrices must have the same number of rows");
    debug_assert_eq!(previous.ncols(), current.ncols());

    let mut dist = Array2::<f64>::from_shape_fn((k, k), |(i, j)| distance(current.row(i), previous.row(j)));

    let mut mapping: Vec<Option<usize>> = vec![None; k];
    for _ in 0..k {
        // First minimum in row-major order; ties go to the lowest (i, j).
        let mut best: Option<(usize, usize, f64)> = None;
        for ((i, j), &d) in dist.indexed_iter() {
            if mapping[i].is_some() || d == f64::INFINITY {
                continue;
            }
            if best.map_or(true, |(_, _, b)| d < b) {
                best = Some((i, j, d));
            }
        }
        let (i, j) = match best {
            Some((i, j, _)) => (i, j),
            None => break,
        };
        mapping[i] = Some(j);
        dist.row_mut(i).fill(f64::INFINITY);
        dist.column_mut(j).fill(f64::INFINITY);
    }

    // Only reachable with non-finite centroids; keep the result a permutation regardless.
    let mut unused = (0..k).filter(|j| !mapping.contains(&Some(*j)));
    mapping
        .iter()
        .enumerate()
        .map(|(i, m)| m.or_else(|| unused.next()).unwrap_or(i))
        .collect()
}

/// Relabel `labels` (computed against `current`) so each cluster carries the label of its
/// nearest counterpart in `previous`.
pub fn stabilize_labels(current: &Array2<f64>, previous: &Array2<f64>, labels: &[usize]) -> Vec<usize> {
    let mapping = label_mapping(current, previous);
    labels.iter().map(|&l| mapping[l]).collect()
}

/// Apply a label mapping to the rows of a centroid matrix, so row `mapping[i]` of the result
/// holds current centroid `i`.
pub fn permute_centroids(centroids: &Array2<f64>, mapping: &[usize]) -> Array2<f64> {
    let mut out = centroids.clone();
    for (i, &j) in mapping.iter().enumerate() {
        out.row_mut(j).assign(&centroids.row(i));
    }
    out
}
