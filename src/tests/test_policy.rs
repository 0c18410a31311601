use ndarray::array;
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::error::QuenchError;
use crate::policy::{argmax, ActionPolicy};

#[test]
fn test_argmax_breaks_ties_toward_lowest_index() {
    assert_eq!(argmax(array![1.0, 3.0, 3.0, 2.0].view()), 1);
    assert_eq!(argmax(array![5.0, 5.0].view()), 0);
}

#[test]
fn test_epsilon_zero_is_always_greedy() {
    let policy = ActionPolicy::epsilon_greedy(0.0).unwrap();
    let q_values = array![0.2, 1.7, -0.4];
    let mut rng = StdRng::seed_from_u64(42);
    for _ in 0..200 {
        assert_eq!(policy.select(q_values.view(), &mut rng), 1);
    }
}

#[test]
fn test_epsilon_one_is_uniform() {
    let policy = ActionPolicy::epsilon_greedy(1.0).unwrap();
    let q_values = array![0.2, 1.7, -0.4, 0.0];
    let mut rng = StdRng::seed_from_u64(42);
    let mut counts = [0usize; 4];
    let draws = 40_000;
    for _ in 0..draws {
        counts[policy.select(q_values.view(), &mut rng)] += 1;
    }
    for &count in &counts {
        let frequency = count as f32 / draws as f32;
        assert!((frequency - 0.25).abs() < 0.02, "frequency {}", frequency);
    }
}

#[test]
fn test_softmax_low_temperature_concentrates_on_max() {
    let policy = ActionPolicy::softmax(1e-3).unwrap();
    let q_values = array![0.2, 1.7, -0.4];
    let probabilities = policy.probabilities(q_values.view());
    assert!(probabilities[1] > 0.999);

    let mut rng = StdRng::seed_from_u64(7);
    let mut max_count = 0;
    for _ in 0..1000 {
        if policy.select(q_values.view(), &mut rng) == 1 {
            max_count += 1;
        }
    }
    assert!(max_count > 995);
}

#[test]
fn test_softmax_high_temperature_approaches_uniform() {
    let policy = ActionPolicy::softmax(1e6).unwrap();
    let q_values = array![0.2, 1.7, -0.4];
    let probabilities = policy.probabilities(q_values.view());
    for &p in probabilities.iter() {
        assert!((p - 1.0 / 3.0).abs() < 1e-3, "probability {}", p);
    }
}

#[test]
fn test_softmax_probabilities_form_a_distribution() {
    let policy = ActionPolicy::softmax(0.5).unwrap();
    // Large Q-values must not overflow the exponentials.
    let q_values = array![500.0, 499.0, -500.0];
    let probabilities = policy.probabilities(q_values.view());
    let total: f32 = probabilities.iter().sum();
    assert!((total - 1.0).abs() < 1e-5);
    for &p in probabilities.iter() {
        assert!(p.is_finite() && p >= 0.0);
    }
}

#[test]
fn test_nonpositive_temperature_is_rejected() {
    assert!(matches!(
        ActionPolicy::softmax(0.0),
        Err(QuenchError::InvalidTemperature { .. })
    ));
    assert!(matches!(
        ActionPolicy::softmax(-1.0),
        Err(QuenchError::InvalidTemperature { .. })
    ));
}

#[test]
fn test_epsilon_outside_unit_interval_is_rejected() {
    assert!(ActionPolicy::epsilon_greedy(1.5).is_err());
    assert!(ActionPolicy::epsilon_greedy(-0.1).is_err());
}

#[test]
fn test_epsilon_greedy_probabilities() {
    let policy = ActionPolicy::epsilon_greedy(0.2).unwrap();
    let probabilities = policy.probabilities(array![0.0, 2.0].view());
    assert!((probabilities[0] - 0.1).abs() < 1e-6);
    assert!((probabilities[1] - 0.9).abs() < 1e-6);
}
