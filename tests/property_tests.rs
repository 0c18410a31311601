#[cfg(test)]
mod property_tests {
    use ndarray::{Array1, Array2};
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use quench::network::{NetworkSpec, QNetwork};
    use quench::normalizer::NormalizationParams;
    use quench::policy::ActionPolicy;
    use quench::target::TargetNetwork;
    use quench::trainer::{compute_targets, BootstrapMode};

    // Strategy for generating state samples with a handful of features
    fn sample_strategy() -> impl Strategy<Value = Vec<Vec<f32>>> {
        (2usize..=20, 1usize..=6).prop_flat_map(|(rows, cols)| {
            prop::collection::vec(
                prop::collection::vec(-100.0f32..100.0, cols..=cols),
                rows..=rows,
            )
        })
    }

    fn to_matrix(rows: &[Vec<f32>]) -> Array2<f32> {
        let dim = rows[0].len();
        let mut matrix = Array2::zeros((rows.len(), dim));
        for (i, row) in rows.iter().enumerate() {
            matrix.row_mut(i).assign(&Array1::from_vec(row.clone()));
        }
        matrix
    }

    proptest! {
        #[test]
        fn normalized_sample_has_zero_mean_unit_variance(rows in sample_strategy()) {
            let sample = to_matrix(&rows);
            let params = NormalizationParams::fit(sample.view(), None).unwrap();

            let dim = sample.ncols();
            let n = sample.nrows() as f32;
            let mut sums = vec![0.0f32; dim];
            let mut sq_sums = vec![0.0f32; dim];
            for row in sample.rows() {
                let normalized = params.apply(row).unwrap();
                for col in 0..dim {
                    prop_assert!(normalized[col].is_finite());
                    sums[col] += normalized[col];
                    sq_sums[col] += normalized[col] * normalized[col];
                }
            }
            for col in 0..dim {
                let mean = sums[col] / n;
                prop_assert!(mean.abs() < 1e-2, "column {} mean {}", col, mean);
                // Degenerate columns normalize to exactly zero; the rest to
                // unit variance.
                let variance = sq_sums[col] / n - mean * mean;
                prop_assert!(
                    variance < 1.1,
                    "column {} variance {}",
                    col,
                    variance
                );
            }
        }

        #[test]
        fn degenerate_features_stay_finite(
            value in -1000.0f32..1000.0,
            rows in 1usize..=30,
            probe in -1000.0f32..1000.0,
        ) {
            let sample = Array2::from_elem((rows, 1), value);
            let params = NormalizationParams::fit(sample.view(), None).unwrap();
            let normalized = params.apply(Array1::from_vec(vec![probe]).view()).unwrap();
            prop_assert!(normalized[0].is_finite());
        }

        #[test]
        fn softmax_probabilities_lie_on_the_simplex(
            q in prop::collection::vec(-500.0f32..500.0, 1..8),
            temperature in 0.01f32..100.0,
        ) {
            let policy = ActionPolicy::softmax(temperature).unwrap();
            let probabilities = policy.probabilities(Array1::from_vec(q).view());
            let total: f32 = probabilities.iter().sum();
            prop_assert!((total - 1.0).abs() < 1e-4);
            for &p in probabilities.iter() {
                prop_assert!((0.0..=1.0).contains(&p));
            }
        }

        #[test]
        fn epsilon_greedy_probabilities_lie_on_the_simplex(
            q in prop::collection::vec(-500.0f32..500.0, 1..8),
            epsilon in 0.0f32..=1.0,
        ) {
            let policy = ActionPolicy::epsilon_greedy(epsilon).unwrap();
            let probabilities = policy.probabilities(Array1::from_vec(q).view());
            let total: f32 = probabilities.iter().sum();
            prop_assert!((total - 1.0).abs() < 1e-4);
            for &p in probabilities.iter() {
                prop_assert!((-1e-6..=1.0 + 1e-6).contains(&p));
            }
        }

        #[test]
        fn terminal_targets_ignore_bootstrap_values(
            rewards in prop::collection::vec(-100.0f32..100.0, 1..10),
            gamma in 0.0f32..0.999,
            q_scale in 1.0f32..1e6,
        ) {
            let n = rewards.len();
            let next_q = Array2::from_elem((n, 3), q_scale);
            let terminals = vec![true; n];
            let mut rng = StdRng::seed_from_u64(0);
            let targets = compute_targets(
                &rewards,
                &terminals,
                next_q.view(),
                next_q.view(),
                gamma,
                &BootstrapMode::MaxQ,
                &mut rng,
            );
            for (target, reward) in targets.iter().zip(&rewards) {
                prop_assert_eq!(target, reward);
            }
        }

        #[test]
        fn full_rate_soft_update_equals_clone(seed in 0u64..1000) {
            let mut rng = StdRng::seed_from_u64(seed);
            let spec = NetworkSpec::new(
                vec![-1, 6, -1],
                vec!["relu".to_string(), "linear".to_string()],
            );
            let online = QNetwork::build(&spec, 3, 2, false, &mut rng).unwrap();
            let stale = QNetwork::build(&spec, 3, 2, false, &mut rng).unwrap();

            let mut target = TargetNetwork::new(&stale);
            target.soft_update(&online, 1.0);

            for ((tw, tb), (ow, ob)) in target
                .network()
                .param_slots()
                .into_iter()
                .zip(online.param_slots())
            {
                prop_assert_eq!(tw, ow);
                prop_assert_eq!(tb, ob);
            }
        }

        #[test]
        fn soft_update_stays_between_endpoints(
            seed in 0u64..1000,
            rate in 0.001f32..=1.0,
        ) {
            let mut rng = StdRng::seed_from_u64(seed);
            let spec = NetworkSpec::new(vec![-1, -1], vec!["linear".to_string()]);
            let online = QNetwork::build(&spec, 2, 2, false, &mut rng).unwrap();
            let stale = QNetwork::build(&spec, 2, 2, false, &mut rng).unwrap();

            let mut target = TargetNetwork::new(&stale);
            target.soft_update(&online, rate);

            for (((tw, _), (ow, _)), (sw, _)) in target
                .network()
                .param_slots()
                .into_iter()
                .zip(online.param_slots())
                .zip(stale.param_slots())
            {
                for ((&t, &o), &s) in tw.iter().zip(ow.iter()).zip(sw.iter()) {
                    let low = o.min(s) - 1e-6;
                    let high = o.max(s) + 1e-6;
                    prop_assert!(t >= low && t <= high, "{} outside [{}, {}]", t, low, high);
                }
            }
        }
    }
}
