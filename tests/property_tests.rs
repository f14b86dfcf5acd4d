use std::sync::Arc;

use progressive_kmeans::stabilize::{label_mapping, permute_centroids, stabilize_labels};
use progressive_kmeans::{EnsembleConfig, InitMode, ProgressiveEnsemble, ProgressiveKMeansRun, SampleMatrix};
use proptest::prelude::*;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

fn points(max_rows: usize) -> impl Strategy<Value = Vec<Vec<f64>>> {
    prop::collection::vec(prop::collection::vec(-10.0f64..10.0, 2), 1..max_rows)
}

fn init_mode() -> impl Strategy<Value = InitMode> {
    prop_oneof![Just(InitMode::Random), Just(InitMode::KMeansPlusPlus)]
}

proptest! {
    #[test]
    fn prop_run_inertia_never_increases(
        data in points(40),
        k in 1usize..6,
        init in init_mode(),
        seed in any::<u64>()
    ) {
        prop_assume!(k <= data.len());
        let matrix = Arc::new(SampleMatrix::from_rows(&data).unwrap());
        let mut run = ProgressiveKMeansRun::new(matrix, k, init, 100, 1e-6, seed).unwrap();

        let mut previous = f64::INFINITY;
        let mut steps = 0;
        while run.has_next() {
            let r = run.step();
            steps += 1;
            prop_assert_eq!(r.iteration + 1, steps);
            prop_assert_eq!(r.labels.len(), data.len());
            prop_assert!(r.labels.iter().all(|&l| l < k));
            prop_assert_eq!(r.centroids.dim(), (k, 2));
            prop_assert!(r.inertia >= 0.0);
            prop_assert!(r.inertia <= previous + 1e-9 * previous.max(1.0));
            previous = r.inertia;
        }
        prop_assert!(steps <= 100);
    }

    #[test]
    fn prop_mapping_undoes_a_permutation(
        rows in prop::collection::vec(prop::collection::vec(-10.0f64..10.0, 3), 1..8),
        seed in any::<u64>()
    ) {
        let k = rows.len();
        for i in 0..k {
            for j in 0..i {
                prop_assume!(rows[i] != rows[j]);
            }
        }
        let flat: Vec<f64> = rows.iter().flatten().copied().collect();
        let original = ndarray::Array2::from_shape_vec((k, 3), flat).unwrap();

        let mut order: Vec<usize> = (0..k).collect();
        order.shuffle(&mut ChaCha8Rng::seed_from_u64(seed));
        let permuted = original.select(ndarray::Axis(0), &order);

        let mapping = label_mapping(&permuted, &original);
        prop_assert_eq!(&mapping, &order);
        prop_assert_eq!(permute_centroids(&permuted, &mapping), original.clone());

        let labels: Vec<usize> = (0..k).collect();
        prop_assert_eq!(stabilize_labels(&permuted, &original, &labels), order);
    }

    #[test]
    fn prop_mapping_is_a_permutation(
        current in prop::collection::vec(-10.0f64..10.0, 8),
        previous in prop::collection::vec(-10.0f64..10.0, 8)
    ) {
        let current = ndarray::Array2::from_shape_vec((4, 2), current).unwrap();
        let previous = ndarray::Array2::from_shape_vec((4, 2), previous).unwrap();
        let mut mapping = label_mapping(&current, &previous);
        mapping.sort_unstable();
        prop_assert_eq!(mapping, vec![0, 1, 2, 3]);
        prop_assert_eq!(label_mapping(&previous, &previous), vec![0, 1, 2, 3]);
    }

    #[test]
    fn prop_ensemble_reports_the_best_run(
        data in points(30),
        k in 1usize..4,
        runs in 1usize..4,
        seed in any::<u64>()
    ) {
        prop_assume!(k <= data.len());
        let n = data.len();
        let matrix = SampleMatrix::from_rows(&data).unwrap();
        let config = EnsembleConfig::new(k).with_runs(runs).with_max_iter(50).with_seed(seed);
        let mut ensemble = ProgressiveEnsemble::new(matrix, config).unwrap();

        while ensemble.has_next() {
            let r = ensemble.step();
            let inertias: Vec<f64> = ensemble.runs().iter().map(|run| run.inertia()).collect();
            let min = inertias.iter().copied().fold(f64::INFINITY, f64::min);
            prop_assert_eq!(r.inertia, min);
            prop_assert_eq!(inertias[r.best_run], min);
            prop_assert_eq!(r.partitions.dim(), (n, runs));
            prop_assert!(r.labels.iter().all(|&l| l < k));
            prop_assert!(r.cost >= 1 && r.cost <= runs);
        }
        prop_assert!(ensemble.iterations() <= 50);
    }
}
