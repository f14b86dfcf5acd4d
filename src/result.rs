//! Immutable snapshots emitted by the progressive coordinators.

use std::collections::BTreeMap;

use ndarray::Array2;
use serde::Serialize;

/// Name of the metric that always carries the best inertia.
pub const INERTIA: &str = "inertia";

/// One iteration of a [`ProgressiveEnsemble`](crate::ProgressiveEnsemble).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnsemblePartialResult {
    /// Zero-based iteration index of the ensemble.
    pub iteration: usize,
    /// Master seed the run seeds were derived from.
    pub seed: u64,
    /// True when no run has a next iteration.
    pub completed: bool,
    /// Number of runs advanced by this iteration.
    pub cost: usize,
    pub runs_completed: Vec<bool>,
    pub runs_killed: Vec<bool>,
    /// Iterations performed so far by each run.
    pub runs_iteration: Vec<usize>,
    pub best_run: usize,
    pub worst_run: usize,
    /// Minimum inertia over all runs.
    pub inertia: f64,
    /// Centroids of the best run, rows ordered by the (stabilized) labels.
    pub centroids: Array2<f64>,
    /// Labels of the best run.
    pub labels: Vec<usize>,
    /// n x R label matrix, one column per run.
    pub partitions: Array2<usize>,
    /// `"inertia"` plus every configured validation metric, evaluated on `labels`.
    pub metrics: BTreeMap<String, f64>,
    /// Policy name to whether it fired this iteration.
    pub early_termination: BTreeMap<String, bool>,
}

impl EnsemblePartialResult {
    /// Whether any early-termination policy fired on this result.
    pub fn early_terminated(&self) -> bool {
        self.early_termination.values().any(|&fired| fired)
    }

    pub fn n_clusters(&self) -> usize {
        self.centroids.nrows()
    }
}

/// One candidate k of a [`ProgressiveElbow`](crate::ProgressiveElbow).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ElbowPartialResult {
    /// Zero-based index of the candidate within the search.
    pub iteration: usize,
    pub seed: u64,
    pub n_clusters: usize,
    /// Best inertia reached by the ensemble for `n_clusters`.
    pub inertia: f64,
    /// True when this was the last pending candidate.
    pub completed: bool,
    /// Cluster count at the knee of the inertia curve accumulated so far, if one is found.
    pub elbow: Option<usize>,
    pub metrics: BTreeMap<String, f64>,
    pub labels: Vec<usize>,
    pub centroids: Array2<f64>,
    /// Iterations the ensemble needed for this candidate.
    pub ensemble_iterations: usize,
    /// Whether an early-termination policy fired on the ensemble's last result.
    pub early_terminated: bool,
}
