//! Read-only replay of the evaluation timeline through a frozen network.
//!
//! The evaluation timeline is disjoint from the training data. Replay goes
//! through the non-mutating forward path only; the network parameters are
//! never touched.

use ndarray::Array2;

use log::info;

use crate::error::{QuenchError, Result};
use crate::network::QNetwork;
use crate::timeline::Transition;

const EVAL_CHUNK: usize = 1024;

/// Value estimates reported from an evaluation replay.
#[derive(Clone, Copy, Debug)]
pub struct EvalReport {
    /// Number of transitions replayed.
    pub transitions: usize,
    /// Mean predicted Q-value for the actions actually taken.
    pub mean_q: f32,
    /// Mean absolute temporal-difference residual
    /// `|r + gamma * max_a' Q(s', a') - Q(s, a)|` (bootstrap term dropped on
    /// terminal transitions).
    pub mean_td_residual: f32,
}

pub struct Evaluator {
    gamma: f32,
}

impl Evaluator {
    pub fn new(gamma: f32) -> Self {
        Evaluator { gamma }
    }

    pub fn evaluate(&self, network: &QNetwork, transitions: &[Transition]) -> Result<EvalReport> {
        if transitions.is_empty() {
            return Err(QuenchError::InsufficientData(
                "evaluation timeline is empty".to_string(),
            ));
        }

        let state_dim = network.input_dim();
        let mut q_sum = 0.0f64;
        let mut residual_sum = 0.0f64;

        for chunk in transitions.chunks(EVAL_CHUNK) {
            let mut states = Array2::zeros((chunk.len(), state_dim));
            let mut next_states = Array2::zeros((chunk.len(), state_dim));
            for (i, transition) in chunk.iter().enumerate() {
                states.row_mut(i).assign(&transition.state);
                next_states.row_mut(i).assign(&transition.next_state);
            }
            let q_values = network.predict_batch(states.view())?;
            let next_q_values = network.predict_batch(next_states.view())?;

            for (i, transition) in chunk.iter().enumerate() {
                let q_taken = q_values[[i, transition.action]];
                let bootstrap = if transition.terminal {
                    0.0
                } else {
                    next_q_values
                        .row(i)
                        .iter()
                        .copied()
                        .fold(f32::NEG_INFINITY, f32::max)
                };
                let td_residual = transition.reward + self.gamma * bootstrap - q_taken;
                q_sum += q_taken as f64;
                residual_sum += td_residual.abs() as f64;
            }
        }

        let n = transitions.len() as f64;
        let report = EvalReport {
            transitions: transitions.len(),
            mean_q: (q_sum / n) as f32,
            mean_td_residual: (residual_sum / n) as f32,
        };
        info!(
            "evaluated {} transitions: mean Q {:.4}, mean |TD residual| {:.4}",
            report.transitions, report.mean_q, report.mean_td_residual
        );
        Ok(report)
    }
}
