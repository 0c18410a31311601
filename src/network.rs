//! Q-network: dense layers assembled from a configured topology.
//!
//! A [`NetworkSpec`] lists layer widths (with `-1` placeholders at both ends,
//! resolved to the state width and the action-set size at build time) and the
//! activation name for each layer. The built [`QNetwork`] is a feed-forward
//! trunk ending either in a single linear output layer or, when the dueling
//! architecture is enabled, in parallel state-value and per-action advantage
//! heads recombined as `Q(s,a) = V(s) + A(s,a) - mean_a'(A(s,a'))`.
//!
//! Two forward paths exist: [`QNetwork::forward_batch`] caches layer inputs
//! and pre-activations for a following [`QNetwork::backward_batch`], while
//! [`QNetwork::predict_batch`] is read-only and is what target computation,
//! action selection, and evaluation go through.

use ndarray::{Array1, Array2, ArrayView2, Axis};
use ndarray_rand::RandomExt;
use rand::Rng;
use rand_distr::Uniform;
use serde::{Deserialize, Serialize};

use crate::activations::Activation;
use crate::error::{QuenchError, Result};

/// Placeholder width in a [`NetworkSpec`], resolved at build time.
pub const PLACEHOLDER_DIM: i64 = -1;

/// Ordered layer widths and matching activation names defining a topology.
///
/// Invariant: `activations.len() == layers.len() - 1`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NetworkSpec {
    pub layers: Vec<i64>,
    pub activations: Vec<String>,
}

impl NetworkSpec {
    pub fn new(layers: Vec<i64>, activations: Vec<String>) -> Self {
        NetworkSpec { layers, activations }
    }

    /// Resolve placeholder widths against the actual feature and action
    /// dimensionality, and parse the activation names.
    pub fn resolve(
        &self,
        input_dim: usize,
        num_actions: usize,
    ) -> Result<(Vec<usize>, Vec<Activation>)> {
        if self.layers.len() < 2 {
            return Err(QuenchError::config_validation(
                "training.layers",
                "a network needs at least an input and an output width",
            ));
        }
        if self.activations.len() != self.layers.len() - 1 {
            return Err(QuenchError::config_validation(
                "training.activations",
                &format!(
                    "{} layer widths need {} activations, got {}",
                    self.layers.len(),
                    self.layers.len() - 1,
                    self.activations.len()
                ),
            ));
        }

        let last = self.layers.len() - 1;
        let mut sizes = Vec::with_capacity(self.layers.len());
        for (i, &width) in self.layers.iter().enumerate() {
            let resolved = if width == PLACEHOLDER_DIM {
                if i == 0 {
                    input_dim
                } else if i == last {
                    num_actions
                } else {
                    return Err(QuenchError::config_validation(
                        "training.layers",
                        "placeholder width -1 is only valid for the first and last layer",
                    ));
                }
            } else if width <= 0 {
                return Err(QuenchError::config_validation(
                    "training.layers",
                    &format!("layer width {} must be positive", width),
                ));
            } else {
                width as usize
            };
            sizes.push(resolved);
        }

        if sizes[0] != input_dim {
            return Err(QuenchError::shape_mismatch(
                format!("input width {}", input_dim),
                format!("first layer width {}", sizes[0]),
            ));
        }
        if sizes[last] != num_actions {
            return Err(QuenchError::shape_mismatch(
                format!("{} actions", num_actions),
                format!("output width {}", sizes[last]),
            ));
        }

        let activations = self
            .activations
            .iter()
            .map(|name| Activation::parse(name))
            .collect::<Result<Vec<_>>>()?;
        Ok((sizes, activations))
    }
}

/// A fully connected layer: weights, biases, and an activation.
///
/// The forward pass stores inputs and pre-activations so a following
/// backward pass can compute gradients with the chain rule.
#[derive(Clone, Serialize, Deserialize)]
pub struct DenseLayer {
    pub weights: Array2<f32>,
    pub biases: Array1<f32>,
    pub activation: Activation,
    #[serde(skip)]
    inputs: Option<Array2<f32>>,
    #[serde(skip)]
    pre_activation: Option<Array2<f32>>,
}

impl DenseLayer {
    /// Create a layer with uniform random weights in [-0.1, 0.1] and zero
    /// biases, drawn from the given generator so replicas are reproducible.
    pub fn new<R: Rng>(
        input_size: usize,
        output_size: usize,
        activation: Activation,
        rng: &mut R,
    ) -> Self {
        let weights =
            Array2::random_using((input_size, output_size), Uniform::new(-0.1, 0.1), rng);
        let biases = Array1::zeros(output_size);
        DenseLayer {
            weights,
            biases,
            activation,
            inputs: None,
            pre_activation: None,
        }
    }

    pub fn input_size(&self) -> usize {
        self.weights.shape()[0]
    }

    pub fn output_size(&self) -> usize {
        self.weights.shape()[1]
    }

    /// Forward pass for a batch, caching inputs and pre-activations for a
    /// later backward pass.
    pub fn forward_batch(&mut self, inputs: ArrayView2<f32>) -> Array2<f32> {
        self.inputs = Some(inputs.to_owned());
        let mut outputs = inputs.dot(&self.weights) + &self.biases.view().insert_axis(Axis(0));
        self.pre_activation = Some(outputs.clone());
        self.activation.apply_batch(&mut outputs);
        outputs
    }

    /// Forward pass for a batch without touching the caches.
    pub fn predict_batch(&self, inputs: ArrayView2<f32>) -> Array2<f32> {
        let mut outputs = inputs.dot(&self.weights) + &self.biases.view().insert_axis(Axis(0));
        self.activation.apply_batch(&mut outputs);
        outputs
    }

    /// Gradients of weights and biases for the cached batch.
    ///
    /// Returns `(adjusted_error, weight_gradients, bias_gradients)` where
    /// `adjusted_error` is the output error scaled by the activation
    /// derivative; the caller propagates it through the transposed weights.
    pub fn backward_batch(
        &self,
        output_errors: ArrayView2<f32>,
    ) -> (Array2<f32>, Array2<f32>, Array1<f32>) {
        let pre_activation = self
            .pre_activation
            .as_ref()
            .expect("forward_batch() must be called before backward_batch()");
        let inputs = self
            .inputs
            .as_ref()
            .expect("forward_batch() must be called before backward_batch()");
        let activation_deriv = self.activation.derivative_batch(pre_activation.view());
        let adjusted_error = output_errors.to_owned() * &activation_deriv;
        let weight_gradients = inputs.t().dot(&adjusted_error);
        let bias_gradients = adjusted_error.sum_axis(Axis(0));
        (adjusted_error, weight_gradients, bias_gradients)
    }
}

/// Output stage of a [`QNetwork`].
#[derive(Clone, Serialize, Deserialize)]
pub enum Head {
    /// A single linear output layer producing all action values.
    Linear(DenseLayer),
    /// Dueling split: a scalar state-value branch and a per-action advantage
    /// branch, recombined with the advantage mean subtracted.
    Dueling {
        value: DenseLayer,
        advantage: DenseLayer,
    },
}

/// Per-parameter-slot gradients, ordered like [`QNetwork::param_slots`].
#[derive(Clone, Debug)]
pub struct GradientSlot {
    pub weights: Array2<f32>,
    pub biases: Array1<f32>,
}

/// Gradients for every trainable tensor of a network, in slot order.
#[derive(Clone, Debug)]
pub struct Gradients {
    pub slots: Vec<GradientSlot>,
}

impl Gradients {
    /// Elementwise accumulate another worker's contribution.
    pub fn add_assign(&mut self, other: &Gradients) {
        debug_assert_eq!(self.slots.len(), other.slots.len());
        for (mine, theirs) in self.slots.iter_mut().zip(&other.slots) {
            mine.weights.zip_mut_with(&theirs.weights, |a, &b| *a += b);
            mine.biases.zip_mut_with(&theirs.biases, |a, &b| *a += b);
        }
    }

    /// Scale every gradient, e.g. by `1 / world_size` when averaging.
    pub fn scale(&mut self, factor: f32) {
        for slot in &mut self.slots {
            slot.weights.mapv_inplace(|g| g * factor);
            slot.biases.mapv_inplace(|g| g * factor);
        }
    }

    /// True when every gradient element is finite.
    pub fn is_finite(&self) -> bool {
        self.slots.iter().all(|slot| {
            slot.weights.iter().all(|g| g.is_finite())
                && slot.biases.iter().all(|g| g.is_finite())
        })
    }
}

/// Feed-forward Q-value approximator: a dense trunk plus an output head.
#[derive(Clone, Serialize, Deserialize)]
pub struct QNetwork {
    trunk: Vec<DenseLayer>,
    head: Head,
    input_dim: usize,
    num_actions: usize,
}

impl QNetwork {
    /// Build a network from the configured topology.
    ///
    /// Placeholder widths resolve to `input_dim` and `num_actions`. With the
    /// dueling architecture the configured output activation must be linear;
    /// the value and advantage branches grow out of the last hidden width.
    pub fn build<R: Rng>(
        spec: &NetworkSpec,
        input_dim: usize,
        num_actions: usize,
        dueling: bool,
        rng: &mut R,
    ) -> Result<Self> {
        if num_actions == 0 {
            return Err(QuenchError::config_validation(
                "actions",
                "action set is empty",
            ));
        }
        let (sizes, activations) = spec.resolve(input_dim, num_actions)?;
        let hidden_end = sizes.len() - 2;

        let mut trunk = Vec::with_capacity(hidden_end);
        for i in 0..hidden_end {
            trunk.push(DenseLayer::new(sizes[i], sizes[i + 1], activations[i], rng));
        }

        let output_activation = activations[hidden_end];
        let head = if dueling {
            if !output_activation.is_linear() {
                return Err(QuenchError::config_validation(
                    "training.activations",
                    "the dueling architecture requires a linear output activation",
                ));
            }
            Head::Dueling {
                value: DenseLayer::new(sizes[hidden_end], 1, Activation::Linear, rng),
                advantage: DenseLayer::new(
                    sizes[hidden_end],
                    num_actions,
                    Activation::Linear,
                    rng,
                ),
            }
        } else {
            Head::Linear(DenseLayer::new(
                sizes[hidden_end],
                num_actions,
                output_activation,
                rng,
            ))
        };

        Ok(QNetwork {
            trunk,
            head,
            input_dim: sizes[0],
            num_actions,
        })
    }

    pub fn input_dim(&self) -> usize {
        self.input_dim
    }

    pub fn num_actions(&self) -> usize {
        self.num_actions
    }

    pub fn is_dueling(&self) -> bool {
        matches!(self.head, Head::Dueling { .. })
    }

    fn check_input(&self, states: ArrayView2<f32>) -> Result<()> {
        if states.ncols() != self.input_dim {
            return Err(QuenchError::shape_mismatch(
                format!("state width {}", self.input_dim),
                format!("state width {}", states.ncols()),
            ));
        }
        Ok(())
    }

    /// Q-values for a batch of states without mutating the network.
    pub fn predict_batch(&self, states: ArrayView2<f32>) -> Result<Array2<f32>> {
        self.check_input(states)?;
        let mut current = states.to_owned();
        for layer in &self.trunk {
            current = layer.predict_batch(current.view());
        }
        Ok(match &self.head {
            Head::Linear(output) => output.predict_batch(current.view()),
            Head::Dueling { value, advantage } => {
                let v = value.predict_batch(current.view());
                let a = advantage.predict_batch(current.view());
                combine_dueling(&v, &a)
            }
        })
    }

    /// Q-values for a batch of states, caching intermediates for
    /// [`QNetwork::backward_batch`].
    pub fn forward_batch(&mut self, states: ArrayView2<f32>) -> Result<Array2<f32>> {
        self.check_input(states)?;
        let mut current = states.to_owned();
        for layer in &mut self.trunk {
            current = layer.forward_batch(current.view());
        }
        Ok(match &mut self.head {
            Head::Linear(output) => output.forward_batch(current.view()),
            Head::Dueling { value, advantage } => {
                let v = value.forward_batch(current.view());
                let a = advantage.forward_batch(current.view());
                combine_dueling(&v, &a)
            }
        })
    }

    /// Backpropagate the loss gradient w.r.t. the Q-value matrix through the
    /// head and trunk, returning gradients in parameter-slot order.
    ///
    /// Through the dueling combination, `∂Q(s,a)/∂V = 1` and
    /// `∂Q(s,a)/∂A_j = δ_aj - 1/num_actions`.
    pub fn backward_batch(&mut self, q_errors: ArrayView2<f32>) -> Gradients {
        let mut reversed = Vec::with_capacity(self.trunk.len() + 2);

        let mut current_error = match &self.head {
            Head::Linear(output) => {
                let (adjusted, wg, bg) = output.backward_batch(q_errors);
                reversed.push(GradientSlot { weights: wg, biases: bg });
                adjusted.dot(&output.weights.t())
            }
            Head::Dueling { value, advantage } => {
                let value_error = q_errors.sum_axis(Axis(1)).insert_axis(Axis(1));
                let row_mean = q_errors
                    .mean_axis(Axis(1))
                    .expect("q_errors has at least one action column")
                    .insert_axis(Axis(1));
                let advantage_error = &q_errors.to_owned() - &row_mean;

                let (adj_a, wg_a, bg_a) = advantage.backward_batch(advantage_error.view());
                let (adj_v, wg_v, bg_v) = value.backward_batch(value_error.view());
                reversed.push(GradientSlot { weights: wg_a, biases: bg_a });
                reversed.push(GradientSlot { weights: wg_v, biases: bg_v });
                adj_v.dot(&value.weights.t()) + adj_a.dot(&advantage.weights.t())
            }
        };

        for i in (0..self.trunk.len()).rev() {
            let layer = &self.trunk[i];
            let (adjusted, wg, bg) = layer.backward_batch(current_error.view());
            reversed.push(GradientSlot { weights: wg, biases: bg });
            if i != 0 {
                current_error = adjusted.dot(&layer.weights.t());
            }
        }

        reversed.reverse();
        Gradients { slots: reversed }
    }

    /// Trainable tensors in slot order: trunk layers first, then the head
    /// (value before advantage for a dueling head).
    pub fn param_slots(&self) -> Vec<(&Array2<f32>, &Array1<f32>)> {
        let mut slots: Vec<_> = self
            .trunk
            .iter()
            .map(|layer| (&layer.weights, &layer.biases))
            .collect();
        match &self.head {
            Head::Linear(output) => slots.push((&output.weights, &output.biases)),
            Head::Dueling { value, advantage } => {
                slots.push((&value.weights, &value.biases));
                slots.push((&advantage.weights, &advantage.biases));
            }
        }
        slots
    }

    /// Mutable view of the trainable tensors, in the same slot order.
    pub fn param_slots_mut(&mut self) -> Vec<(&mut Array2<f32>, &mut Array1<f32>)> {
        let mut slots: Vec<_> = self
            .trunk
            .iter_mut()
            .map(|layer| (&mut layer.weights, &mut layer.biases))
            .collect();
        match &mut self.head {
            Head::Linear(output) => slots.push((&mut output.weights, &mut output.biases)),
            Head::Dueling { value, advantage } => {
                slots.push((&mut value.weights, &mut value.biases));
                slots.push((&mut advantage.weights, &mut advantage.biases));
            }
        }
        slots
    }

    pub fn num_slots(&self) -> usize {
        self.trunk.len()
            + match self.head {
                Head::Linear(_) => 1,
                Head::Dueling { .. } => 2,
            }
    }
}

/// `Q(s,a) = V(s) + A(s,a) - mean_a'(A(s,a'))`; the mean subtraction removes
/// the additive degree of freedom between the two branches.
fn combine_dueling(value: &Array2<f32>, advantage: &Array2<f32>) -> Array2<f32> {
    let advantage_mean = advantage
        .mean_axis(Axis(1))
        .expect("advantage has at least one action column")
        .insert_axis(Axis(1));
    advantage - &advantage_mean + value
}
