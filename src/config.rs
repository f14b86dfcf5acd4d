use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::init::InitMode;

/// Parameters of a [`ProgressiveEnsemble`](crate::ProgressiveEnsemble).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnsembleConfig {
    /// Number of clusters
    pub n_clusters: usize,
    /// Number of independent K-means runs
    pub n_runs: usize,
    pub init: InitMode,
    /// Maximum Lloyd iterations per run
    pub max_iter: usize,
    /// A run converges once its centroid shift (Frobenius norm) drops below this value
    pub tol: f64,
    /// Master seed; drawn at random when absent
    pub seed: Option<u64>,
    /// Minimum wall time between two emitted results
    pub min_interval: Option<Duration>,
    /// Keep cluster ids of the best partition consistent across iterations
    pub stabilize_labels: bool,
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        Self {
            n_clusters: 2,
            n_runs: 4,
            init: InitMode::KMeansPlusPlus,
            max_iter: 300,
            tol: 1e-4,
            seed: None,
            min_interval: None,
            stabilize_labels: true,
        }
    }
}

impl EnsembleConfig {
    pub fn new(n_clusters: usize) -> Self {
        Self {
            n_clusters,
            ..Default::default()
        }
    }

    pub fn with_runs(mut self, n_runs: usize) -> Self {
        self.n_runs = n_runs;
        self
    }

    pub fn with_init(mut self, init: InitMode) -> Self {
        self.init = init;
        self
    }

    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    pub fn with_tol(mut self, tol: f64) -> Self {
        self.tol = tol;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_min_interval(mut self, interval: Duration) -> Self {
        self.min_interval = Some(interval);
        self
    }

    pub fn with_stabilize_labels(mut self, stabilize: bool) -> Self {
        self.stabilize_labels = stabilize;
        self
    }

    /// Check every parameter against a dataset of `n_samples` rows.
    pub fn validate(&self, n_samples: usize) -> Result<()> {
        check_n_clusters(self.n_clusters, n_samples)?;
        check_common(self.n_runs, self.max_iter, self.tol)
    }
}

/// Parameters of a [`ProgressiveElbow`](crate::ProgressiveElbow).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ElbowConfig {
    /// Cluster counts to try, strictly increasing, at least three of them
    pub candidates: Vec<usize>,
    pub n_runs: usize,
    pub init: InitMode,
    pub max_iter: usize,
    pub tol: f64,
    pub seed: Option<u64>,
}

impl Default for ElbowConfig {
    fn default() -> Self {
        Self {
            candidates: (2..=10).collect(),
            n_runs: 4,
            init: InitMode::KMeansPlusPlus,
            max_iter: 300,
            tol: 1e-4,
            seed: None,
        }
    }
}

impl ElbowConfig {
    pub fn new(candidates: Vec<usize>) -> Self {
        Self {
            candidates,
            ..Default::default()
        }
    }

    pub fn with_runs(mut self, n_runs: usize) -> Self {
        self.n_runs = n_runs;
        self
    }

    pub fn with_init(mut self, init: InitMode) -> Self {
        self.init = init;
        self
    }

    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    pub fn with_tol(mut self, tol: f64) -> Self {
        self.tol = tol;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn validate(&self, n_samples: usize) -> Result<()> {
        if self.candidates.len() < 3 {
            return Err(Error::invalid(
                "candidates",
                format!("need at least 3 cluster counts, got {}", self.candidates.len()),
            ));
        }
        if let Some(w) = self.candidates.windows(2).find(|w| w[0] >= w[1]) {
            return Err(Error::invalid(
                "candidates",
                format!("must be strictly increasing, found {} before {}", w[0], w[1]),
            ));
        }
        for &k in &self.candidates {
            check_n_clusters(k, n_samples)?;
        }
        check_common(self.n_runs, self.max_iter, self.tol)
    }

    /// Ensemble parameters for one candidate; every candidate shares the master seed.
    pub fn ensemble_config(&self, n_clusters: usize, seed: u64) -> EnsembleConfig {
        EnsembleConfig {
            n_clusters,
            n_runs: self.n_runs,
            init: self.init,
            max_iter: self.max_iter,
            tol: self.tol,
            seed: Some(seed),
            min_interval: None,
            stabilize_labels: false,
        }
    }
}

fn check_n_clusters(n_clusters: usize, n_samples: usize) -> Result<()> {
    if n_clusters < 1 {
        return Err(Error::invalid("n_clusters", "must be at least 1"));
    }
    if n_clusters > n_samples {
        return Err(Error::InvalidClusterCount {
            requested: n_clusters,
            n_samples,
        });
    }
    Ok(())
}

fn check_common(n_runs: usize, max_iter: usize, tol: f64) -> Result<()> {
    if n_runs < 1 {
        return Err(Error::invalid("n_runs", "must be at least 1"));
    }
    if max_iter < 1 {
        return Err(Error::invalid("max_iter", "must be at least 1"));
    }
    if !(tol.is_finite() && tol >= 0.0) {
        return Err(Error::invalid("tol", format!("must be finite and >= 0, got {tol}")));
    }
    Ok(())
}
