//! A single K-means instance advanced one Lloyd iteration per call.

use std::sync::Arc;

use ndarray::Array2;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::dataset::{squared_distance, SampleMatrix};
use crate::error::{Error, Result};
use crate::init::InitMode;

/// Output of one Lloyd iteration of a [`ProgressiveKMeansRun`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunPartialResult {
    /// Zero-based index of the iteration that produced this result.
    pub iteration: usize,
    pub labels: Vec<usize>,
    /// k x d centroid matrix, the means of `labels`.
    pub centroids: Array2<f64>,
    /// Sum of squared distances from each sample to its assigned centroid.
    pub inertia: f64,
    /// Frobenius norm of the centroid change made by this iteration.
    pub shift: f64,
    pub is_last: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Initialized,
    Iterating,
    Converged,
    Killed,
}

/// One K-means run over a shared sample matrix.
///
/// Each call to [`step`](Self::step) performs exactly one assignment/update round. The first
/// call also seeds the centroids with the configured [`InitMode`].
///
/// Empty clusters are reseeded from the sample currently farthest from its own centroid, which
/// keeps every label in use and inertia non-increasing.
#[derive(Debug, Clone)]
pub struct ProgressiveKMeansRun {
    data: Arc<SampleMatrix>,
    n_clusters: usize,
    init: InitMode,
    max_iter: usize,
    tol: f64,
    seed: u64,
    rng: ChaCha8Rng,

    centroids: Array2<f64>,
    labels: Vec<usize>,
    distances: Vec<f64>,
    iteration: usize,
    inertia: f64,
    status: RunStatus,
}

impl ProgressiveKMeansRun {
    pub fn new(
        data: Arc<SampleMatrix>,
        n_clusters: usize,
        init: InitMode,
        max_iter: usize,
        tol: f64,
        seed: u64,
    ) -> Result<Self> {
        if n_clusters < 1 {
            return Err(Error::invalid("n_clusters", "must be at least 1"));
        }
        if n_clusters > data.n_samples() {
            return Err(Error::InvalidClusterCount {
                requested: n_clusters,
                n_samples: data.n_samples(),
            });
        }
        if max_iter < 1 {
            return Err(Error::invalid("max_iter", "must be at least 1"));
        }
        if !(tol.is_finite() && tol >= 0.0) {
            return Err(Error::invalid("tol", format!("must be finite and >= 0, got {tol}")));
        }

        let n = data.n_samples();
        let d = data.n_features();
        Ok(Self {
            data,
            n_clusters,
            init,
            max_iter,
            tol,
            seed,
            rng: ChaCha8Rng::seed_from_u64(seed),
            centroids: Array2::zeros((n_clusters, d)),
            labels: vec![0; n],
            distances: vec![0.0; n],
            iteration: 0,
            inertia: f64::INFINITY,
            status: RunStatus::Initialized,
        })
    }

    pub fn has_next(&self) -> bool {
        matches!(self.status, RunStatus::Initialized | RunStatus::Iterating)
    }

    /// Run one Lloyd iteration.
    ///
    /// # Panics
    ///
    /// Panics if the run has converged or was killed.
    pub fn step(&mut self) -> RunPartialResult {
        assert!(
            self.has_next(),
            "no next iteration: run (seed {}) is {:?}",
            self.seed,
            self.status
        );

        if self.status == RunStatus::Initialized {
            self.centroids = self.init.centroids(&self.data, self.n_clusters, &mut self.rng);
            self.status = RunStatus::Iterating;
        }

        let previous = self.centroids.clone();
        let previous_labels = self.labels.clone();
        self.assign();
        self.update();
        let changed = self.iteration == 0 || self.labels != previous_labels;
        self.inertia = self.compute_inertia();

        let shift = (&self.centroids - &previous).mapv(|x| x * x).sum().sqrt();
        let iteration = self.iteration;
        self.iteration += 1;

        // Unchanged labels reproduce the same means, which is strict convergence.
        let converged = shift < self.tol || !changed;
        let is_last = converged || self.iteration >= self.max_iter;

        debug!(
            seed = self.seed,
            iteration,
            inertia = self.inertia,
            shift,
            "run step complete"
        );

        if is_last {
            self.status = RunStatus::Converged;
            info!(
                seed = self.seed,
                iterations = self.iteration,
                inertia = self.inertia,
                converged,
                "run finished"
            );
        }

        RunPartialResult {
            iteration,
            labels: self.labels.clone(),
            centroids: self.centroids.clone(),
            inertia: self.inertia,
            shift,
            is_last,
        }
    }

    /// Stop the run at the next iteration boundary.
    pub fn kill(&mut self) {
        if self.has_next() {
            debug!(seed = self.seed, iteration = self.iteration, "run killed");
        }
        self.status = RunStatus::Killed;
    }

    /// Assign every sample to its nearest centroid, lowest index winning ties.
    fn assign(&mut self) {
        for i in 0..self.data.n_samples() {
            let row = self.data.row(i);
            let mut best_cluster = 0;
            let mut best_dist = f64::INFINITY;
            for (ci, c_row) in self.centroids.outer_iter().enumerate() {
                let dist = squared_distance(row, c_row);
                if dist < best_dist {
                    best_dist = dist;
                    best_cluster = ci;
                }
            }
            self.labels[i] = best_cluster;
            self.distances[i] = best_dist;
        }
    }

    /// Recompute centroids as the mean of their samples.
    fn update(&mut self) {
        let k = self.n_clusters;
        let mut counts = vec![0usize; k];
        for &c in &self.labels {
            counts[c] += 1;
        }

        for empty in 0..k {
            if counts[empty] > 0 {
                continue;
            }
            // Farthest sample whose cluster survives losing it.
            let donor = (0..self.labels.len())
                .filter(|&i| counts[self.labels[i]] > 1)
                .max_by(|&a, &b| self.distances[a].total_cmp(&self.distances[b]).then(b.cmp(&a)));
            if let Some(i) = donor {
                warn!(
                    seed = self.seed,
                    iteration = self.iteration,
                    cluster = empty,
                    sample = i,
                    "reseeding empty cluster"
                );
                counts[self.labels[i]] -= 1;
                counts[empty] = 1;
                self.labels[i] = empty;
                self.distances[i] = 0.0;
            }
        }

        let mut sums = Array2::<f64>::zeros(self.centroids.dim());
        for (i, &c) in self.labels.iter().enumerate() {
            let mut row = sums.row_mut(c);
            row += &self.data.row(i);
        }
        for (ci, mut row) in sums.outer_iter_mut().enumerate() {
            if counts[ci] > 0 {
                row.mapv_inplace(|x| x / counts[ci] as f64);
                self.centroids.row_mut(ci).assign(&row);
            }
        }
    }

    fn compute_inertia(&self) -> f64 {
        self.labels
            .iter()
            .enumerate()
            .map(|(i, &c)| squared_distance(self.data.row(i), self.centroids.row(c)))
            .sum()
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    pub fn is_killed(&self) -> bool {
        self.status == RunStatus::Killed
    }

    /// Number of iterations performed so far.
    pub fn iteration(&self) -> usize {
        self.iteration
    }

    pub fn inertia(&self) -> f64 {
        self.inertia
    }

    pub fn labels(&self) -> &[usize] {
        &self.labels
    }

    pub fn centroids(&self) -> &Array2<f64> {
        &self.centroids
    }

    pub fn n_clusters(&self) -> usize {
        self.n_clusters
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }
}
