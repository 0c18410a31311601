//! Optimization algorithms and the learning-rate schedule.
//!
//! Optimizers are keyed by parameter slot so stateful algorithms (Adam)
//! keep per-tensor moment estimates. The wrapper enum is a closed set
//! resolved once from the configured optimizer name.

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::error::{QuenchError, Result};
use crate::network::QNetwork;

pub trait Optimizer {
    fn update_weights(
        &mut self,
        slot: usize,
        weights: &mut Array2<f32>,
        gradients: &Array2<f32>,
        learning_rate: f32,
    );
    fn update_biases(
        &mut self,
        slot: usize,
        biases: &mut Array1<f32>,
        gradients: &Array1<f32>,
        learning_rate: f32,
    );
    /// Called once per training step, after every slot has been updated.
    fn advance_step(&mut self) {}
}

#[derive(Clone, Serialize, Deserialize)]
pub enum OptimizerWrapper {
    SGD(SGD),
    Adam(Adam),
}

impl OptimizerWrapper {
    /// Resolve the configured optimizer name against the network's slots.
    pub fn parse(name: &str, network: &QNetwork) -> Result<Self> {
        match name.to_ascii_uppercase().as_str() {
            "SGD" => Ok(OptimizerWrapper::SGD(SGD::new())),
            "ADAM" => Ok(OptimizerWrapper::Adam(Adam::default_for(network))),
            other => Err(QuenchError::config_validation(
                "training.optimizer",
                &format!("unknown optimizer '{}' (expected SGD or ADAM)", other),
            )),
        }
    }
}

impl Optimizer for OptimizerWrapper {
    fn update_weights(
        &mut self,
        slot: usize,
        weights: &mut Array2<f32>,
        gradients: &Array2<f32>,
        learning_rate: f32,
    ) {
        match self {
            OptimizerWrapper::SGD(optimizer) => {
                optimizer.update_weights(slot, weights, gradients, learning_rate)
            }
            OptimizerWrapper::Adam(optimizer) => {
                optimizer.update_weights(slot, weights, gradients, learning_rate)
            }
        }
    }

    fn update_biases(
        &mut self,
        slot: usize,
        biases: &mut Array1<f32>,
        gradients: &Array1<f32>,
        learning_rate: f32,
    ) {
        match self {
            OptimizerWrapper::SGD(optimizer) => {
                optimizer.update_biases(slot, biases, gradients, learning_rate)
            }
            OptimizerWrapper::Adam(optimizer) => {
                optimizer.update_biases(slot, biases, gradients, learning_rate)
            }
        }
    }

    fn advance_step(&mut self) {
        match self {
            OptimizerWrapper::SGD(optimizer) => optimizer.advance_step(),
            OptimizerWrapper::Adam(optimizer) => optimizer.advance_step(),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct SGD;

impl SGD {
    pub fn new() -> SGD {
        SGD
    }
}

impl Default for SGD {
    fn default() -> Self {
        Self::new()
    }
}

impl Optimizer for SGD {
    fn update_weights(
        &mut self,
        _slot: usize,
        weights: &mut Array2<f32>,
        gradients: &Array2<f32>,
        learning_rate: f32,
    ) {
        weights.zip_mut_with(gradients, |w, &g| *w -= learning_rate * g);
    }

    fn update_biases(
        &mut self,
        _slot: usize,
        biases: &mut Array1<f32>,
        gradients: &Array1<f32>,
        learning_rate: f32,
    ) {
        biases.zip_mut_with(gradients, |b, &g| *b -= learning_rate * g);
    }
}

/// Adam with per-slot first and second moment estimates and shared bias
/// correction; the step counter advances once per training step so every
/// slot sees the same correction within a step.
#[derive(Clone, Serialize, Deserialize)]
pub struct Adam {
    pub beta1: f32,
    pub beta2: f32,
    pub epsilon: f32,
    m_weights: Vec<Array2<f32>>,
    v_weights: Vec<Array2<f32>>,
    m_biases: Vec<Array1<f32>>,
    v_biases: Vec<Array1<f32>>,
    t: usize,
}

impl Adam {
    pub fn new(network: &QNetwork, beta1: f32, beta2: f32, epsilon: f32) -> Self {
        let slots = network.param_slots();
        let m_weights = slots
            .iter()
            .map(|(w, _)| Array2::zeros(w.dim()))
            .collect::<Vec<_>>();
        let v_weights = m_weights.clone();
        let m_biases = slots
            .iter()
            .map(|(_, b)| Array1::zeros(b.dim()))
            .collect::<Vec<_>>();
        let v_biases = m_biases.clone();

        Adam {
            beta1,
            beta2,
            epsilon,
            m_weights,
            v_weights,
            m_biases,
            v_biases,
            t: 1,
        }
    }

    pub fn default_for(network: &QNetwork) -> Self {
        Self::new(network, 0.9, 0.999, 1e-8)
    }
}

impl Optimizer for Adam {
    fn update_weights(
        &mut self,
        slot: usize,
        weights: &mut Array2<f32>,
        gradients: &Array2<f32>,
        learning_rate: f32,
    ) {
        let (beta1, beta2, epsilon, t) = (self.beta1, self.beta2, self.epsilon, self.t as i32);
        let m = &mut self.m_weights[slot];
        let v = &mut self.v_weights[slot];

        m.zip_mut_with(gradients, |m, &g| *m = beta1 * *m + (1.0 - beta1) * g);
        v.zip_mut_with(gradients, |v, &g| *v = beta2 * *v + (1.0 - beta2) * g * g);

        let m_hat = m.mapv(|m| m / (1.0 - beta1.powi(t)));
        let v_hat = v.mapv(|v| v / (1.0 - beta2.powi(t)));

        *weights -= &((&m_hat / (v_hat.mapv(f32::sqrt) + epsilon)) * learning_rate);
    }

    fn update_biases(
        &mut self,
        slot: usize,
        biases: &mut Array1<f32>,
        gradients: &Array1<f32>,
        learning_rate: f32,
    ) {
        let (beta1, beta2, epsilon, t) = (self.beta1, self.beta2, self.epsilon, self.t as i32);
        let m = &mut self.m_biases[slot];
        let v = &mut self.v_biases[slot];

        m.zip_mut_with(gradients, |m, &g| *m = beta1 * *m + (1.0 - beta1) * g);
        v.zip_mut_with(gradients, |v, &g| *v = beta2 * *v + (1.0 - beta2) * g * g);

        let m_hat = m.mapv(|m| m / (1.0 - beta1.powi(t)));
        let v_hat = v.mapv(|v| v / (1.0 - beta2.powi(t)));

        *biases -= &((&m_hat / (v_hat.mapv(f32::sqrt) + epsilon)) * learning_rate);
    }

    fn advance_step(&mut self) {
        self.t += 1;
    }
}

/// Learning rate as a function of the epoch index.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum LearningRateSchedule {
    /// Constant learning rate
    Constant { lr: f32 },

    /// Exponential decay: lr = initial_lr * decay_rate^epoch
    ExponentialDecay { initial_lr: f32, decay_rate: f32 },
}

impl LearningRateSchedule {
    pub fn lr_at(&self, epoch: usize) -> f32 {
        match self {
            LearningRateSchedule::Constant { lr } => *lr,
            LearningRateSchedule::ExponentialDecay {
                initial_lr,
                decay_rate,
            } => initial_lr * decay_rate.powf(epoch as f32),
        }
    }
}
