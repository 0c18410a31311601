use ndarray::{array, Array1, Array2};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::error::QuenchError;
use crate::evaluator::Evaluator;
use crate::network::{NetworkSpec, QNetwork};
use crate::timeline::Transition;

/// A single linear layer pinned to the identity, so `Q(s) = s` and every
/// expected value below can be computed by hand.
fn identity_network() -> QNetwork {
    let mut rng = StdRng::seed_from_u64(0);
    let spec = NetworkSpec::new(vec![-1, -1], vec!["linear".to_string()]);
    let mut network = QNetwork::build(&spec, 2, 2, false, &mut rng).unwrap();
    for (weights, biases) in network.param_slots_mut() {
        weights.assign(&Array2::from_shape_vec((2, 2), vec![1.0, 0.0, 0.0, 1.0]).unwrap());
        biases.fill(0.0);
    }
    network
}

fn transition(
    state: [f32; 2],
    action: usize,
    reward: f32,
    next_state: [f32; 2],
    terminal: bool,
) -> Transition {
    Transition {
        state: Array1::from_vec(state.to_vec()),
        action,
        reward,
        next_state: Array1::from_vec(next_state.to_vec()),
        terminal,
    }
}

#[test]
fn test_mean_q_and_td_residual_on_identity_network() {
    let network = identity_network();
    let evaluator = Evaluator::new(0.5);

    // Q(s, a) = s[a]; max_a' Q(s', a') = max(s').
    // First: q_taken = 5, bootstrap = 3, residual = 1 + 0.5*3 - 5 = -2.5.
    // Second (terminal): q_taken = 2, residual = -1 - 2 = -3.
    let transitions = vec![
        transition([2.0, 5.0], 1, 1.0, [1.0, 3.0], false),
        transition([2.0, 0.5], 0, -1.0, [9.0, 9.0], true),
    ];

    let report = evaluator.evaluate(&network, &transitions).unwrap();
    assert_eq!(report.transitions, 2);
    assert!((report.mean_q - 3.5).abs() < 1e-6);
    assert!((report.mean_td_residual - 2.75).abs() < 1e-6);
}

#[test]
fn test_terminal_transitions_drop_the_bootstrap_term() {
    let network = identity_network();
    let evaluator = Evaluator::new(0.99);

    // Identical except for the terminal flag; the enormous next-state value
    // must only show up in the non-terminal residual.
    let terminal = vec![transition([1.0, 0.0], 0, 2.0, [1e6, 1e6], true)];
    let ongoing = vec![transition([1.0, 0.0], 0, 2.0, [1e6, 1e6], false)];

    let report_terminal = evaluator.evaluate(&network, &terminal).unwrap();
    let report_ongoing = evaluator.evaluate(&network, &ongoing).unwrap();
    assert!((report_terminal.mean_td_residual - 1.0).abs() < 1e-6);
    assert!(report_ongoing.mean_td_residual > 1e5);
}

#[test]
fn test_evaluation_never_mutates_the_network() {
    let network = identity_network();
    let before: Vec<Array2<f32>> = network
        .param_slots()
        .into_iter()
        .map(|(w, _)| w.clone())
        .collect();

    let evaluator = Evaluator::new(0.9);
    let transitions = vec![transition([0.5, -0.5], 0, 1.0, [0.0, 0.0], false)];
    evaluator.evaluate(&network, &transitions).unwrap();

    for ((w, _), saved) in network.param_slots().into_iter().zip(&before) {
        assert_eq!(w, saved);
    }
}

#[test]
fn test_empty_eval_timeline_is_an_error() {
    let network = identity_network();
    let evaluator = Evaluator::new(0.9);
    assert!(matches!(
        evaluator.evaluate(&network, &[]),
        Err(QuenchError::InsufficientData(_))
    ));
}

#[test]
fn test_mean_q_reads_the_taken_action_column() {
    let network = identity_network();
    let evaluator = Evaluator::new(0.0);

    let transitions = vec![
        transition([10.0, -10.0], 0, 0.0, [0.0, 0.0], true),
        transition([10.0, -10.0], 1, 0.0, [0.0, 0.0], true),
    ];
    let report = evaluator.evaluate(&network, &transitions).unwrap();
    // (10 + -10) / 2
    assert!(report.mean_q.abs() < 1e-6);
}

#[test]
fn test_q_values_match_hand_computation() {
    let network = identity_network();
    let q = network.predict_batch(array![[3.0, 7.0]].view()).unwrap();
    assert_eq!(q, array![[3.0, 7.0]]);
}
