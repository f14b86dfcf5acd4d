//! Elbow search: one full ensemble per candidate cluster count.

use std::sync::Arc;

use rand::Rng;
use tracing::{debug, info};

use crate::config::ElbowConfig;
use crate::dataset::SampleMatrix;
use crate::ensemble::ProgressiveEnsemble;
use crate::error::{Error, Result};
use crate::knee::knee_index;
use crate::metrics::MetricSet;
use crate::result::ElbowPartialResult;
use crate::termination::EarlyTerminator;

/// Progressive elbow search over an increasing list of cluster counts.
///
/// Each [`step`](ProgressiveElbow::step) runs the ensemble of the next candidate to completion,
/// adds `(k, inertia)` to the curve and re-estimates the knee over everything seen so far.
#[derive(Debug)]
pub struct ProgressiveElbow {
    data: Arc<SampleMatrix>,
    config: ElbowConfig,
    seed: u64,
    terminators: Vec<Box<dyn EarlyTerminator>>,
    metrics: MetricSet,

    next_candidate: usize,
    curve: Vec<(usize, f64)>,
    elbow: Option<usize>,
    killed: bool,
}

impl ProgressiveElbow {
    pub fn new(data: impl Into<Arc<SampleMatrix>>, config: ElbowConfig) -> Result<Self> {
        let data = data.into();
        config.validate(data.n_samples())?;
        let seed = config.seed.unwrap_or_else(|| rand::thread_rng().gen());
        debug!(seed, candidates = ?config.candidates, "elbow search created");
        Ok(Self {
            data,
            config,
            seed,
            terminators: Vec::new(),
            metrics: MetricSet::new(),
            next_candidate: 0,
            curve: Vec::new(),
            elbow: None,
            killed: false,
        })
    }

    /// Policies used as templates; every candidate ensemble gets a fresh copy.
    pub fn with_terminators(mut self, terminators: Vec<Box<dyn EarlyTerminator>>) -> Result<Self> {
        for t in terminators {
            if self.terminators.iter().any(|known| known.name() == t.name()) {
                return Err(Error::DuplicateName(t.name().to_string()));
            }
            self.terminators.push(t);
        }
        Ok(self)
    }

    pub fn with_metrics(mut self, metrics: MetricSet) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn has_next(&self) -> bool {
        !self.killed && self.next_candidate < self.config.candidates.len()
    }

    /// Run the next candidate to completion.
    ///
    /// # Panics
    ///
    /// Panics if [`has_next`](Self::has_next) is false.
    pub fn step(&mut self) -> Result<ElbowPartialResult> {
        assert!(
            self.has_next(),
            "no next iteration: elbow search (seed {}) is {}",
            self.seed,
            if self.killed { "killed" } else { "completed" }
        );

        let iteration = self.next_candidate;
        let n_clusters = self.config.candidates[iteration];
        self.next_candidate += 1;

        let terminators = self.terminators.iter().map(|t| t.fresh()).collect();
        let mut ensemble = ProgressiveEnsemble::new(
            self.data.clone(),
            self.config.ensemble_config(n_clusters, self.seed),
        )?
        .with_terminators(terminators)?
        .with_metrics(self.metrics.clone());
        let last = ensemble.execute_all();

        self.curve.push((n_clusters, last.inertia));
        let (x, y): (Vec<f64>, Vec<f64>) = self.curve.iter().map(|&(k, v)| (k as f64, v)).unzip();
        self.elbow = knee_index(&x, &y).map(|i| self.curve[i].0);

        let completed = !self.has_next();
        info!(
            n_clusters,
            inertia = last.inertia,
            ensemble_iterations = ensemble.iterations(),
            elbow = ?self.elbow,
            "elbow candidate finished"
        );

        Ok(ElbowPartialResult {
            iteration,
            seed: self.seed,
            n_clusters,
            inertia: last.inertia,
            completed,
            elbow: self.elbow,
            early_terminated: last.early_terminated(),
            ensemble_iterations: ensemble.iterations(),
            metrics: last.metrics,
            labels: last.labels,
            centroids: last.centroids,
        })
    }

    /// Run every remaining candidate and return the last result.
    ///
    /// # Panics
    ///
    /// Panics if [`has_next`](Self::has_next) is false on entry.
    pub fn execute_all(&mut self) -> Result<ElbowPartialResult> {
        let mut last = self.step()?;
        while self.has_next() {
            last = self.step()?;
        }
        Ok(last)
    }

    /// Stop before the next candidate.
    pub fn kill(&mut self) {
        if !self.killed {
            info!(seed = self.seed, "elbow search killed");
        }
        self.killed = true;
    }

    pub fn is_killed(&self) -> bool {
        self.killed
    }

    /// Current knee estimate.
    pub fn elbow(&self) -> Option<usize> {
        self.elbow
    }

    /// `(k, inertia)` points accumulated so far.
    pub fn curve(&self) -> &[(usize, f64)] {
        &self.curve
    }

    /// Candidates that have not been run yet.
    pub fn pending(&self) -> &[usize] {
        &self.config.candidates[self.next_candidate..]
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn config(&self) -> &ElbowConfig {
        &self.config
    }
}

impl Iterator for ProgressiveElbow {
    type Item = Result<ElbowPartialResult>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.has_next() {
            Some(self.step())
        } else {
            None
        }
    }
}
