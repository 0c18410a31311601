use ndarray::{array, Array1, Array2};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::network::{NetworkSpec, QNetwork};
use crate::optimizer::{Adam, LearningRateSchedule, Optimizer, OptimizerWrapper, SGD};

fn build_network(seed: u64) -> QNetwork {
    let mut rng = StdRng::seed_from_u64(seed);
    let spec = NetworkSpec::new(
        vec![-1, 4, -1],
        vec!["relu".to_string(), "linear".to_string()],
    );
    QNetwork::build(&spec, 2, 2, false, &mut rng).unwrap()
}

#[test]
fn test_sgd_subtracts_scaled_gradient() {
    let mut sgd = SGD::new();
    let mut weights = array![[1.0, 2.0], [3.0, 4.0]];
    let gradients = array![[0.5, -0.5], [1.0, 0.0]];
    sgd.update_weights(0, &mut weights, &gradients, 0.1);
    let expected = array![[0.95, 2.05], [2.9, 4.0]];
    for (&w, &e) in weights.iter().zip(expected.iter()) {
        assert!((w - e).abs() < 1e-6, "weight {} expected {}", w, e);
    }

    let mut biases = array![1.0, -1.0];
    let bias_gradients = array![2.0, -2.0];
    sgd.update_biases(0, &mut biases, &bias_gradients, 0.1);
    assert!((biases[0] - 0.8).abs() < 1e-6);
    assert!((biases[1] + 0.8).abs() < 1e-6);
}

#[test]
fn test_adam_first_step_is_signed_learning_rate() {
    // With zeroed moments and bias correction at t = 1, m_hat = g and
    // v_hat = g^2, so the first update is lr * g / (|g| + eps).
    let network = build_network(1);
    let mut adam = Adam::default_for(&network);

    let mut weights = Array2::zeros((2, 4));
    let gradients = array![[1.0, -2.0, 0.5, 0.0], [-0.25, 4.0, 0.0, -1.0]];
    adam.update_weights(0, &mut weights, &gradients, 0.1);

    for (&w, &g) in weights.iter().zip(gradients.iter()) {
        if g == 0.0 {
            assert_eq!(w, 0.0);
        } else {
            assert!((w + 0.1 * g.signum()).abs() < 1e-4, "weight {} grad {}", w, g);
        }
    }
}

#[test]
fn test_adam_slots_keep_independent_moments() {
    let network = build_network(2);
    let mut adam = Adam::default_for(&network);

    // Drive slot 0 with a large gradient, slot 1 with none; slot 1's update
    // must be unaffected by slot 0's accumulated moments.
    let mut w0 = Array2::zeros((2, 4));
    let big = Array2::from_elem((2, 4), 10.0);
    for _ in 0..5 {
        adam.update_weights(0, &mut w0, &big, 0.01);
        adam.advance_step();
    }

    let mut w1 = Array2::zeros((4, 2));
    let zero = Array2::zeros((4, 2));
    adam.update_weights(1, &mut w1, &zero, 0.01);
    assert!(w1.iter().all(|&w| w == 0.0));
}

#[test]
fn test_adam_bias_update_moves_against_gradient() {
    let network = build_network(3);
    let mut adam = Adam::default_for(&network);

    let mut biases = Array1::zeros(4);
    let gradients = array![1.0, -1.0, 2.0, -0.5];
    adam.update_biases(0, &mut biases, &gradients, 0.05);
    for (&b, &g) in biases.iter().zip(gradients.iter()) {
        assert!(b * g < 0.0, "bias {} did not oppose gradient {}", b, g);
    }
}

#[test]
fn test_optimizer_name_parsing() {
    let network = build_network(4);
    assert!(matches!(
        OptimizerWrapper::parse("sgd", &network).unwrap(),
        OptimizerWrapper::SGD(_)
    ));
    assert!(matches!(
        OptimizerWrapper::parse("Adam", &network).unwrap(),
        OptimizerWrapper::Adam(_)
    ));
    assert!(OptimizerWrapper::parse("rmsprop", &network).is_err());
}

#[test]
fn test_exponential_decay_schedule() {
    let schedule = LearningRateSchedule::ExponentialDecay {
        initial_lr: 0.1,
        decay_rate: 0.5,
    };
    assert!((schedule.lr_at(0) - 0.1).abs() < 1e-7);
    assert!((schedule.lr_at(1) - 0.05).abs() < 1e-7);
    assert!((schedule.lr_at(3) - 0.0125).abs() < 1e-7);

    let constant = LearningRateSchedule::Constant { lr: 0.01 };
    assert_eq!(constant.lr_at(0), constant.lr_at(100));
}
