//! Centroid seeding schemes.
//!
//! Both schemes pick rows of the sample matrix, so the initial centroids are always actual
//! samples and are distinct row indices.

use std::fmt;
use std::str::FromStr;

use ndarray::Array2;
use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::dataset::{squared_distance, SampleMatrix};
use crate::error::Error;

/// How the first centroids of a run are chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum InitMode {
    /// Uniform sample of k distinct rows.
    #[serde(rename = "random")]
    Random,
    /// k-means++: sequential sampling weighted by the squared distance to the nearest centroid
    /// chosen so far.
    #[default]
    #[serde(rename = "k-means++")]
    KMeansPlusPlus,
}

impl InitMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            InitMode::Random => "random",
            InitMode::KMeansPlusPlus => "k-means++",
        }
    }

    /// Choose `k` distinct row indices of `data`.
    pub(crate) fn select<R: Rng + ?Sized>(self, data: &SampleMatrix, k: usize, rng: &mut R) -> Vec<usize> {
        match self {
            InitMode::Random => random_rows(data.n_samples(), k, rng),
            InitMode::KMeansPlusPlus => kmeans_plus_plus(data, k, rng),
        }
    }

    /// Initial k x d centroid matrix for `data`.
    pub(crate) fn centroids<R: Rng + ?Sized>(self, data: &SampleMatrix, k: usize, rng: &mut R) -> Array2<f64> {
        let mut centroids = Array2::<f64>::zeros((k, data.n_features()));
        for (ci, idx) in self.select(data, k, rng).into_iter().enumerate() {
            centroids.row_mut(ci).assign(&data.row(idx));
        }
        centroids
    }
}

impl fmt::Display for InitMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InitMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "random" => Ok(InitMode::Random),
            "k-means++" => Ok(InitMode::KMeansPlusPlus),
            other => Err(Error::invalid(
                "init",
                format!("unsupported init mode {other:?}, expected \"random\" or \"k-means++\""),
            )),
        }
    }
}

fn random_rows<R: Rng + ?Sized>(n: usize, k: usize, rng: &mut R) -> Vec<usize> {
    debug_assert!(k <= n, "k must not exceed the number of samples");
    rand::seq::index::sample(rng, n, k).into_vec()
}

fn kmeans_plus_plus<R: Rng + ?Sized>(data: &SampleMatrix, k: usize, rng: &mut R) -> Vec<usize> {
    let n = data.n_samples();
    debug_assert!(k > 0, "k must be at least 1");
    debug_assert!(k <= n, "k must not exceed the number of samples");

    let mut chosen: Vec<usize> = Vec::with_capacity(k);
    chosen.push(rng.gen_range(0..n));

    // Squared distance of every sample to its nearest chosen centroid.
    let mut nearest: Vec<f64> = (0..n)
        .map(|i| squared_distance(data.row(i), data.row(chosen[0])))
        .collect();

    while chosen.len() < k {
        let next = match WeightedIndex::new(&nearest) {
            Ok(dist) => dist.sample(rng),
            // All remaining samples coincide with chosen centroids.
            Err(_) => match (0..n).find(|i| !chosen.contains(i)) {
                Some(i) => i,
                None => break,
            },
        };
        chosen.push(next);
        for (i, d) in nearest.iter_mut().enumerate() {
            let candidate = squared_distance(data.row(i), data.row(next));
            if candidate < *d {
                *d = candidate;
            }
        }
    }

    chosen
}
