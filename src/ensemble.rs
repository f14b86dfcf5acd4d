//! Ensemble coordinator: several K-means runs advanced in lockstep.
//!
//! Every [`step`](ProgressiveEnsemble::step) advances each live run by one Lloyd iteration and
//! reports the run with the lowest inertia as the current answer. On top of that the
//! coordinator keeps the best partition's cluster ids stable between results, evaluates the
//! early-termination policies and, optionally, throttles how often results are produced.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use ndarray::{Array1, Array2};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
#[cfg(feature = "parallel")]
use rayon::prelude::*;
use tracing::{debug, info};

use crate::config::EnsembleConfig;
use crate::dataset::SampleMatrix;
use crate::error::{Error, Result};
use crate::metrics::MetricSet;
use crate::result::{EnsemblePartialResult, INERTIA};
use crate::run::{ProgressiveKMeansRun, RunPartialResult};
use crate::stabilize::{label_mapping, permute_centroids};
use crate::termination::{EarlyTerminationAction, EarlyTerminator};

/// Derive `n` run seeds in `[0, i32::MAX)` from a master seed.
pub fn derive_seeds(master: u64, n: usize) -> Vec<u64> {
    let mut rng = ChaCha8Rng::seed_from_u64(master);
    (0..n).map(|_| rng.gen_range(0..i32::MAX as u64)).collect()
}

/// Index of the first minimum.
fn argmin(values: &[f64]) -> usize {
    let mut best = 0;
    for (i, &v) in values.iter().enumerate() {
        if v < values[best] {
            best = i;
        }
    }
    best
}

/// Index of the first maximum.
fn argmax(values: &[f64]) -> usize {
    let mut worst = 0;
    for (i, &v) in values.iter().enumerate() {
        if v > values[worst] {
            worst = i;
        }
    }
    worst
}

/// Progressive ensemble K-means.
///
/// A killed run keeps its last inertia, labels and centroids, and stays eligible as best or
/// worst run in later iterations.
#[derive(Debug)]
pub struct ProgressiveEnsemble {
    data: Arc<SampleMatrix>,
    config: EnsembleConfig,
    seed: u64,
    runs: Vec<ProgressiveKMeansRun>,

    partitions: Array2<usize>,
    centroids: Vec<Array2<f64>>,
    runs_inertia: Vec<f64>,
    runs_completed: Vec<bool>,
    runs_killed: Vec<bool>,

    terminators: Vec<Box<dyn EarlyTerminator>>,
    metrics: MetricSet,

    next_iteration: usize,
    killed: bool,
    prev_centroids: Option<Array2<f64>>,
    last_emission: Option<Instant>,
}

impl ProgressiveEnsemble {
    pub fn new(data: impl Into<Arc<SampleMatrix>>, config: EnsembleConfig) -> Result<Self> {
        let data = data.into();
        config.validate(data.n_samples())?;

        let seed = config.seed.unwrap_or_else(|| rand::thread_rng().gen());
        let runs = derive_seeds(seed, config.n_runs)
            .into_iter()
            .map(|run_seed| {
                ProgressiveKMeansRun::new(
                    data.clone(),
                    config.n_clusters,
                    config.init,
                    config.max_iter,
                    config.tol,
                    run_seed,
                )
            })
            .collect::<Result<Vec<_>>>()?;

        let n_runs = config.n_runs;
        let partitions = Array2::zeros((data.n_samples(), n_runs));
        let centroids = vec![Array2::zeros((config.n_clusters, data.n_features())); n_runs];

        debug!(
            seed,
            n_clusters = config.n_clusters,
            n_runs,
            init = %config.init,
            "ensemble created"
        );

        Ok(Self {
            data,
            config,
            seed,
            runs,
            partitions,
            centroids,
            runs_inertia: vec![f64::INFINITY; n_runs],
            runs_completed: vec![false; n_runs],
            runs_killed: vec![false; n_runs],
            terminators: Vec::new(),
            metrics: MetricSet::new(),
            next_iteration: 0,
            killed: false,
            prev_centroids: None,
            last_emission: None,
        })
    }

    /// Add an early-termination policy; policies run in the order they were added.
    pub fn with_terminator(mut self, terminator: Box<dyn EarlyTerminator>) -> Result<Self> {
        if self.terminators.iter().any(|t| t.name() == terminator.name()) {
            return Err(Error::DuplicateName(terminator.name().to_string()));
        }
        self.terminators.push(terminator);
        Ok(self)
    }

    pub fn with_terminators(self, terminators: Vec<Box<dyn EarlyTerminator>>) -> Result<Self> {
        terminators.into_iter().try_fold(self, |ens, t| ens.with_terminator(t))
    }

    /// Validation metrics evaluated on the best labels of every result.
    pub fn with_metrics(mut self, metrics: MetricSet) -> Self {
        self.metrics = metrics;
        self
    }

    /// True unless every run is done or the ensemble was killed.
    pub fn has_next(&self) -> bool {
        !self.killed && self.runs.iter().any(|r| r.has_next())
    }

    /// Advance every live run by one iteration and report the best partition.
    ///
    /// # Panics
    ///
    /// Panics if [`has_next`](Self::has_next) is false.
    pub fn step(&mut self) -> EnsemblePartialResult {
        assert!(
            self.has_next(),
            "no next iteration: ensemble (seed {}) is {}",
            self.seed,
            if self.killed { "killed" } else { "completed" }
        );

        let iteration = self.next_iteration;
        self.next_iteration += 1;

        let advanced = self.advance_runs();
        let mut cost = 0;
        let mut new_computation = vec![false; self.runs.len()];
        for (j, result) in advanced.into_iter().enumerate() {
            if let Some(result) = result {
                cost += 1;
                new_computation[j] = true;
                self.partitions.column_mut(j).assign(&Array1::from(result.labels));
                self.centroids[j] = result.centroids;
                self.runs_completed[j] = result.is_last;
                self.runs_inertia[j] = result.inertia;
            }
        }

        let completed = self.runs.iter().all(|r| !r.has_next());
        let best = argmin(&self.runs_inertia);
        let worst = argmax(&self.runs_inertia);

        if new_computation[best] && self.config.stabilize_labels {
            if let Some(prev) = &self.prev_centroids {
                let mapping = label_mapping(&self.centroids[best], prev);
                self.partitions.column_mut(best).mapv_inplace(|l| mapping[l]);
                self.centroids[best] = permute_centroids(&self.centroids[best], &mapping);
            }
        }

        let labels = self.partitions.column(best).to_vec();
        let inertia = self.runs_inertia[best];
        let mut metrics = BTreeMap::from([(INERTIA.to_string(), inertia)]);
        metrics.extend(self.metrics.evaluate(self.data.view(), &labels, &[INERTIA]));

        let mut result = EnsemblePartialResult {
            iteration,
            seed: self.seed,
            completed,
            cost,
            runs_completed: self.runs_completed.clone(),
            runs_killed: self.runs_killed.clone(),
            runs_iteration: self.runs.iter().map(|r| r.iteration()).collect(),
            best_run: best,
            worst_run: worst,
            inertia,
            centroids: self.centroids[best].clone(),
            labels,
            partitions: self.partitions.clone(),
            metrics,
            early_termination: BTreeMap::new(),
        };

        let mut early_termination = BTreeMap::new();
        let mut kill = false;
        for terminator in &mut self.terminators {
            let action = terminator.evaluate(&result);
            if action != EarlyTerminationAction::None {
                info!(
                    policy = terminator.name(),
                    %action,
                    iteration,
                    inertia,
                    "early termination"
                );
            }
            kill |= action == EarlyTerminationAction::Kill;
            early_termination.insert(
                terminator.name().to_string(),
                action != EarlyTerminationAction::None,
            );
        }
        result.early_termination = early_termination;
        if kill {
            self.kill();
        }

        debug!(
            iteration,
            cost,
            best_run = best,
            worst_run = worst,
            inertia,
            completed,
            "ensemble step complete"
        );
        if completed {
            info!(seed = self.seed, iterations = iteration + 1, inertia, "ensemble completed");
        }

        self.throttle();
        self.prev_centroids = Some(result.centroids.clone());
        result
    }

    #[cfg(feature = "parallel")]
    fn advance_runs(&mut self) -> Vec<Option<RunPartialResult>> {
        self.runs
            .par_iter_mut()
            .map(|run| run.has_next().then(|| run.step()))
            .collect()
    }

    #[cfg(not(feature = "parallel"))]
    fn advance_runs(&mut self) -> Vec<Option<RunPartialResult>> {
        self.runs
            .iter_mut()
            .map(|run| run.has_next().then(|| run.step()))
            .collect()
    }

    /// Sleep until `min_interval` has passed since the previous result.
    fn throttle(&mut self) {
        if let (Some(interval), Some(last)) = (self.config.min_interval, self.last_emission) {
            let elapsed = last.elapsed();
            if elapsed < interval {
                thread::sleep(interval - elapsed);
            }
        }
        self.last_emission = Some(Instant::now());
    }

    /// Step until no iteration is left and return the last result.
    ///
    /// # Panics
    ///
    /// Panics if [`has_next`](Self::has_next) is false on entry.
    pub fn execute_all(&mut self) -> EnsemblePartialResult {
        let mut last = self.step();
        while self.has_next() {
            last = self.step();
        }
        last
    }

    /// Stop the ensemble; takes effect at the next iteration boundary.
    pub fn kill(&mut self) {
        if !self.killed {
            info!(seed = self.seed, iteration = self.next_iteration, "ensemble killed");
        }
        self.killed = true;
    }

    /// Stop a single run. Its last labels and centroids stay frozen in later results.
    pub fn kill_run(&mut self, run: usize) -> Result<()> {
        let n_runs = self.runs.len();
        let target = self
            .runs
            .get_mut(run)
            .ok_or(Error::RunIndexOutOfRange { index: run, n_runs })?;
        target.kill();
        self.runs_killed[run] = true;
        Ok(())
    }

    pub fn is_killed(&self) -> bool {
        self.killed
    }

    /// True when no run has a next iteration.
    pub fn is_completed(&self) -> bool {
        self.runs.iter().all(|r| !r.has_next())
    }

    /// Number of results emitted so far.
    pub fn iterations(&self) -> usize {
        self.next_iteration
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn config(&self) -> &EnsembleConfig {
        &self.config
    }

    pub fn runs(&self) -> &[ProgressiveKMeansRun] {
        &self.runs
    }

    pub fn data(&self) -> &SampleMatrix {
        &self.data
    }
}

impl Iterator for ProgressiveEnsemble {
    type Item = EnsemblePartialResult;

    fn next(&mut self) -> Option<Self::Item> {
        if self.has_next() {
            Some(self.step())
        } else {
            None
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::init::InitMode;
    use crate::termination::RatioInertiaTerminator;
    use std::time::Duration;

    /// `per_blob` points uniformly jittered around each center.
    pub(crate) fn blobs(centers: &[[f64; 2]], per_blob: usize, spread: f64, seed: u64) -> SampleMatrix {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut rows = Vec::with_capacity(centers.len() * per_blob);
        for c in centers {
            for _ in 0..per_blob {
                rows.push(vec![
                    c[0] + rng.gen_range(-spread..spread),
                    c[1] + rng.gen_range(-spread..spread),
                ]);
            }
        }
        SampleMatrix::from_rows(&rows).unwrap()
    }

    fn three_blobs() -> SampleMatrix {
        blobs(&[[0.0, 0.0], [10.0, 0.0], [5.0, 9.0]], 20, 1.5, 1)
    }

    fn config() -> EnsembleConfig {
        EnsembleConfig::new(3)
            .with_runs(4)
            .with_init(InitMode::Random)
            .with_seed(17)
    }

    #[test]
    fn run_seeds_are_reproducible() {
        assert_eq!(derive_seeds(5, 4), derive_seeds(5, 4));
        assert_ne!(derive_seeds(5, 4), derive_seeds(6, 4));
        assert!(derive_seeds(5, 16).iter().all(|&s| s < i32::MAX as u64));
    }

    #[test]
    fn argmin_and_argmax_prefer_the_first_index() {
        assert_eq!(argmin(&[3.0, 1.0, 1.0, 2.0]), 1);
        assert_eq!(argmax(&[3.0, 1.0, 3.0, 2.0]), 0);
        assert_eq!(argmin(&[f64::INFINITY, 2.0]), 1);
    }

    #[test]
    fn best_inertia_is_the_minimum_over_runs() {
        let mut ens = ProgressiveEnsemble::new(three_blobs(), config()).unwrap();
        while ens.has_next() {
            let r = ens.step();
            let min = ens.runs().iter().map(|run| run.inertia()).fold(f64::INFINITY, f64::min);
            assert_eq!(r.inertia, min);
            assert_eq!(r.metrics[INERTIA], min);
            let max = ens.runs().iter().map(|run| run.inertia()).fold(f64::NEG_INFINITY, f64::max);
            assert_eq!(ens.runs()[r.worst_run].inertia(), max);
            assert_eq!(r.labels, r.partitions.column(r.best_run).to_vec());
        }
        assert!(ens.is_completed());
    }

    #[test]
    fn cost_counts_the_runs_that_advanced() {
        let mut ens = ProgressiveEnsemble::new(three_blobs(), config()).unwrap();
        let mut prev_completed = vec![false; 4];
        for (i, r) in ens.by_ref().enumerate() {
            assert_eq!(r.iteration, i);
            let live = prev_completed.iter().filter(|&&c| !c).count();
            assert_eq!(r.cost, live);
            prev_completed = r.runs_completed.clone();
        }
        assert!(prev_completed.iter().all(|&c| c));
    }

    #[test]
    fn execute_all_returns_the_completed_result() {
        let mut ens = ProgressiveEnsemble::new(three_blobs(), config()).unwrap();
        let last = ens.execute_all();
        assert!(last.completed);
        assert!(!ens.has_next());
        assert_eq!(last.iteration + 1, ens.iterations());
        let mut distinct = last.labels.clone();
        distinct.sort_unstable();
        distinct.dedup();
        assert_eq!(distinct, vec![0, 1, 2]);
    }

    #[test]
    fn stabilized_labels_keep_their_identity() {
        let mut ens = ProgressiveEnsemble::new(three_blobs(), config()).unwrap();
        let mut prev: Option<EnsemblePartialResult> = None;
        while ens.has_next() {
            let r = ens.step();
            if let Some(p) = &prev {
                assert_eq!(label_mapping(&r.centroids, &p.centroids), vec![0, 1, 2]);
            }
            prev = Some(r);
        }
    }

    #[test]
    fn same_seed_same_results() {
        let data = Arc::new(three_blobs());
        let a: Vec<_> = ProgressiveEnsemble::new(data.clone(), config()).unwrap().collect();
        let b: Vec<_> = ProgressiveEnsemble::new(data, config()).unwrap().collect();
        assert_eq!(a, b);
    }

    #[test]
    fn kill_stops_the_ensemble() {
        let mut ens = ProgressiveEnsemble::new(three_blobs(), config()).unwrap();
        ens.step();
        ens.kill();
        assert!(!ens.has_next());
        assert!(ens.is_killed());
        assert!(ens.next().is_none());
    }

    #[test]
    #[should_panic(expected = "no next iteration")]
    fn step_after_kill_panics() {
        let mut ens = ProgressiveEnsemble::new(three_blobs(), config()).unwrap();
        ens.kill();
        ens.step();
    }

    #[test]
    fn killed_run_is_frozen() {
        let mut ens = ProgressiveEnsemble::new(three_blobs(), config().with_stabilize_labels(false)).unwrap();
        let first = ens.step();
        ens.kill_run(2).unwrap();
        assert!(!ens.runs()[2].has_next());
        let frozen_labels = first.partitions.column(2).to_vec();
        let frozen_centroids = ens.runs()[2].centroids().clone();
        let frozen_iteration = ens.runs()[2].iteration();
        assert_eq!(ens.runs()[2].labels(), frozen_labels.as_slice());
        while ens.has_next() {
            let r = ens.step();
            assert!(r.runs_killed[2]);
            assert_eq!(r.partitions.column(2).to_vec(), frozen_labels);
            assert_eq!(r.runs_iteration[2], frozen_iteration);
            assert_eq!(ens.runs()[2].centroids(), &frozen_centroids);
            assert_eq!(ens.runs()[2].labels(), frozen_labels.as_slice());
        }
        assert!(matches!(
            ens.kill_run(4),
            Err(Error::RunIndexOutOfRange { index: 4, n_runs: 4 })
        ));
    }

    #[test]
    fn killing_every_run_completes_the_ensemble() {
        let mut ens = ProgressiveEnsemble::new(three_blobs(), config()).unwrap();
        ens.step();
        for i in 0..4 {
            ens.kill_run(i).unwrap();
        }
        assert!(!ens.has_next());
        assert!(ens.is_completed());
    }

    /// Returns the same action on every result.
    #[derive(Debug, Clone)]
    pub(crate) struct FixedPolicy {
        pub(crate) name: &'static str,
        pub(crate) action: EarlyTerminationAction,
    }

    impl EarlyTerminator for FixedPolicy {
        fn name(&self) -> &str {
            self.name
        }

        fn evaluate(&mut self, _result: &EnsemblePartialResult) -> EarlyTerminationAction {
            self.action
        }

        fn fresh(&self) -> Box<dyn EarlyTerminator> {
            Box::new(self.clone())
        }
    }

    #[test]
    fn kill_policy_stops_live_runs_after_every_policy_ran() {
        let kill = FixedPolicy { name: "stop", action: EarlyTerminationAction::Kill };
        let notify = FixedPolicy { name: "watch", action: EarlyTerminationAction::Notify };
        let mut ens = ProgressiveEnsemble::new(three_blobs(), config().with_tol(0.0))
            .unwrap()
            .with_terminators(vec![Box::new(kill), Box::new(notify)])
            .unwrap();

        let r = ens.step();
        assert!(r.early_termination["stop"]);
        assert!(r.early_termination["watch"]);
        assert!(r.early_terminated());
        assert!(!r.completed);
        assert!(ens.is_killed());
        assert!(!ens.has_next());
        // The first iteration never converges, so every run could have gone on.
        assert!(ens.runs().iter().all(|run| run.has_next()));
        assert!(ens.next().is_none());
    }

    #[test]
    fn plateau_kill_fires_once_inertia_stops_moving() {
        // Threshold 1 accepts any non-increasing inertia, so the policy fires at min_iteration.
        let policy = RatioInertiaTerminator::killer("plateau", 1.0).unwrap().with_min_iteration(1);
        let notify = RatioInertiaTerminator::notifier("watch", 0.0).unwrap();
        let mut ens = ProgressiveEnsemble::new(three_blobs(), config())
            .unwrap()
            .with_terminator(Box::new(policy))
            .unwrap()
            .with_terminator(Box::new(notify))
            .unwrap();
        let results: Vec<_> = ens.by_ref().collect();
        assert_eq!(results.len(), 2);
        assert!(!results[0].early_termination["plateau"]);
        assert!(results[1].early_termination["plateau"]);
        assert!(!results[1].early_termination["watch"]);
        assert!(ens.is_killed());
    }

    #[test]
    fn duplicate_policy_names_are_rejected() {
        let ens = ProgressiveEnsemble::new(three_blobs(), config())
            .unwrap()
            .with_terminators(vec![
                Box::new(RatioInertiaTerminator::notifier("same", 0.1).unwrap()),
                Box::new(RatioInertiaTerminator::killer("same", 0.1).unwrap()),
            ]);
        assert!(matches!(ens, Err(Error::DuplicateName(_))));
    }

    #[test]
    fn metrics_are_attached_to_every_result() {
        let metrics = MetricSet::from_names(&["simplified_silhouette", "inertia"]).unwrap();
        let mut ens = ProgressiveEnsemble::new(three_blobs(), config())
            .unwrap()
            .with_metrics(metrics);
        let r = ens.step();
        assert_eq!(r.n_clusters(), 3);
        assert_eq!(ens.data().n_samples(), r.labels.len());
        assert_eq!(r.metrics.len(), 2);
        assert_eq!(r.metrics[INERTIA], r.inertia);
        assert!(r.metrics["simplified_silhouette"] <= 1.0);
    }

    #[test]
    fn results_are_throttled() {
        let interval = Duration::from_millis(20);
        let mut ens = ProgressiveEnsemble::new(three_blobs(), config().with_min_interval(interval)).unwrap();
        let start = Instant::now();
        let emitted = ens.by_ref().take(3).count() as u32;
        assert!(emitted >= 2);
        assert!(start.elapsed() >= interval * (emitted - 1));
    }

    #[test]
    fn rejects_invalid_configuration() {
        assert!(ProgressiveEnsemble::new(three_blobs(), EnsembleConfig::new(0)).is_err());
        assert!(ProgressiveEnsemble::new(three_blobs(), EnsembleConfig::new(61)).is_err());
        assert!(ProgressiveEnsemble::new(three_blobs(), config().with_runs(0)).is_err());
    }

    #[test]
    fn random_seed_is_reported() {
        let mut ens = ProgressiveEnsemble::new(three_blobs(), EnsembleConfig::new(3)).unwrap();
        let seed = ens.seed();
        assert_eq!(ens.step().seed, seed);
    }
}
