use ndarray::{array, Array2, Axis};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::error::QuenchError;
use crate::network::{NetworkSpec, QNetwork};

fn spec(layers: Vec<i64>, activations: Vec<&str>) -> NetworkSpec {
    NetworkSpec::new(
        layers,
        activations.into_iter().map(String::from).collect(),
    )
}

#[test]
fn test_placeholder_resolution() {
    let spec = spec(vec![-1, 16, -1], vec!["relu", "linear"]);
    let (sizes, _) = spec.resolve(4, 2).unwrap();
    assert_eq!(sizes, vec![4, 16, 2]);
}

#[test]
fn test_activation_count_must_match() {
    let spec = spec(vec![-1, 16, -1], vec!["relu"]);
    assert!(matches!(
        spec.resolve(4, 2),
        Err(QuenchError::ConfigValidation { .. })
    ));
}

#[test]
fn test_explicit_input_width_must_match() {
    let spec = spec(vec![8, 16, -1], vec!["relu", "linear"]);
    assert!(matches!(
        spec.resolve(4, 2),
        Err(QuenchError::ShapeMismatch { .. })
    ));
}

#[test]
fn test_interior_placeholder_rejected() {
    let spec = spec(vec![-1, -1, -1], vec!["relu", "linear"]);
    assert!(matches!(
        spec.resolve(4, 2),
        Err(QuenchError::ConfigValidation { .. })
    ));
}

#[test]
fn test_forward_shape_and_mismatch() {
    let mut rng = StdRng::seed_from_u64(7);
    let spec = spec(vec![-1, 8, -1], vec!["relu", "linear"]);
    let mut network = QNetwork::build(&spec, 3, 2, false, &mut rng).unwrap();

    let states = Array2::zeros((5, 3));
    let q = network.forward_batch(states.view()).unwrap();
    assert_eq!(q.dim(), (5, 2));

    let wrong = Array2::zeros((5, 4));
    assert!(matches!(
        network.predict_batch(wrong.view()),
        Err(QuenchError::ShapeMismatch { .. })
    ));
}

#[test]
fn test_predict_matches_forward() {
    let mut rng = StdRng::seed_from_u64(11);
    let spec = spec(vec![-1, 8, -1], vec!["tanh", "linear"]);
    let mut network = QNetwork::build(&spec, 3, 4, false, &mut rng).unwrap();

    let states = array![[0.5, -1.0, 2.0], [0.0, 0.25, -0.75]];
    let cached = network.forward_batch(states.view()).unwrap();
    let detached = network.predict_batch(states.view()).unwrap();
    assert_eq!(cached, detached);
}

#[test]
fn test_dueling_combination_centers_advantages() {
    // Q = V + A - mean(A) implies mean_a Q(s, a) == V(s); with the advantage
    // head centered the network stays well-defined regardless of any
    // constant shift between the branches.
    let mut rng = StdRng::seed_from_u64(3);
    let spec = spec(vec![-1, 8, -1], vec!["relu", "linear"]);
    let network = QNetwork::build(&spec, 3, 4, true, &mut rng).unwrap();
    assert!(network.is_dueling());

    let states = array![[0.1, -0.4, 0.9], [1.5, 0.0, -2.0]];
    let q = network.predict_batch(states.view()).unwrap();
    assert_eq!(q.dim(), (2, 4));

    // The mean over actions equals the value branch output, which is finite
    // and shared across the row.
    let row_means = q.mean_axis(Axis(1)).unwrap();
    for &m in row_means.iter() {
        assert!(m.is_finite());
    }
}

#[test]
fn test_dueling_requires_linear_output() {
    let mut rng = StdRng::seed_from_u64(5);
    let spec = spec(vec![-1, 8, -1], vec!["relu", "sigmoid"]);
    assert!(matches!(
        QNetwork::build(&spec, 3, 2, true, &mut rng),
        Err(QuenchError::ConfigValidation { .. })
    ));
}

#[test]
fn test_gradient_descends_on_fixed_target() {
    // A few handcrafted gradient steps must reduce squared error against a
    // fixed target, for both head shapes.
    for dueling in [false, true] {
        let mut rng = StdRng::seed_from_u64(13);
        let spec = spec(vec![-1, 8, -1], vec!["relu", "linear"]);
        let mut network = QNetwork::build(&spec, 2, 2, dueling, &mut rng).unwrap();

        let states = array![[0.5, -0.5], [1.0, 0.25]];
        let targets = array![[1.0, -1.0], [0.5, 0.5]];

        let initial = network.predict_batch(states.view()).unwrap();
        let initial_error = (&initial - &targets).mapv(|d| d * d).sum();

        for _ in 0..50 {
            let q = network.forward_batch(states.view()).unwrap();
            let errors = (&q - &targets) / states.nrows() as f32;
            let gradients = network.backward_batch(errors.view());
            for ((weights, biases), slot) in network
                .param_slots_mut()
                .into_iter()
                .zip(gradients.slots.iter())
            {
                weights.zip_mut_with(&slot.weights, |w, &g| *w -= 0.05 * g);
                biases.zip_mut_with(&slot.biases, |b, &g| *b -= 0.05 * g);
            }
        }

        let trained = network.predict_batch(states.view()).unwrap();
        let trained_error = (&trained - &targets).mapv(|d| d * d).sum();
        assert!(
            trained_error < initial_error,
            "dueling={}: {} !< {}",
            dueling,
            trained_error,
            initial_error
        );
    }
}

#[test]
fn test_param_slot_count() {
    let mut rng = StdRng::seed_from_u64(1);
    let spec = spec(vec![-1, 8, 4, -1], vec!["relu", "relu", "linear"]);

    let plain = QNetwork::build(&spec, 3, 2, false, &mut rng).unwrap();
    assert_eq!(plain.num_slots(), 3);
    assert_eq!(plain.param_slots().len(), 3);

    let dueling = QNetwork::build(&spec, 3, 2, true, &mut rng).unwrap();
    assert_eq!(dueling.num_slots(), 4);
    assert_eq!(dueling.param_slots().len(), 4);
}
