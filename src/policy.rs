//! Action selection from Q-value vectors.
//!
//! The two modes are mutually exclusive, chosen once by the configuration's
//! `softmax_policy` flag: epsilon-greedy (uniform exploration with
//! probability epsilon, greedy otherwise) or softmax sampling with a
//! temperature. Ties in the greedy arm break toward the lowest action index
//! so selection is deterministic.

use ndarray::{Array1, ArrayView1};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::RLParameters;
use crate::error::{QuenchError, Result};

/// Index of the maximal Q-value, first index on ties.
pub fn argmax(q_values: ArrayView1<f32>) -> usize {
    let mut best = 0;
    let mut best_value = f32::NEG_INFINITY;
    for (i, &q) in q_values.iter().enumerate() {
        if q > best_value {
            best = i;
            best_value = q;
        }
    }
    best
}

/// Closed set of action-selection modes, resolved once from configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ActionPolicy {
    EpsilonGreedy { epsilon: f32 },
    Softmax { temperature: f32 },
}

impl ActionPolicy {
    pub fn epsilon_greedy(epsilon: f32) -> Result<Self> {
        if !(0.0..=1.0).contains(&epsilon) {
            return Err(QuenchError::config_validation(
                "rl.epsilon",
                &format!("{} is outside [0, 1]", epsilon),
            ));
        }
        Ok(ActionPolicy::EpsilonGreedy { epsilon })
    }

    pub fn softmax(temperature: f32) -> Result<Self> {
        if temperature <= 0.0 || !temperature.is_finite() {
            return Err(QuenchError::InvalidTemperature { temperature });
        }
        Ok(ActionPolicy::Softmax { temperature })
    }

    /// Build the policy the configuration selects.
    pub fn from_rl(rl: &RLParameters) -> Result<Self> {
        if rl.softmax_policy {
            if rl.epsilon > 0.0 {
                log::warn!(
                    "epsilon = {} is ignored while softmax_policy is set",
                    rl.epsilon
                );
            }
            Self::softmax(rl.temperature)
        } else {
            Self::epsilon_greedy(rl.epsilon)
        }
    }

    /// Select an action index for the given Q-values.
    pub fn select<R: Rng>(&self, q_values: ArrayView1<f32>, rng: &mut R) -> usize {
        match self {
            ActionPolicy::EpsilonGreedy { epsilon } => {
                if rng.gen::<f32>() < *epsilon {
                    rng.gen_range(0..q_values.len())
                } else {
                    argmax(q_values)
                }
            }
            ActionPolicy::Softmax { .. } => {
                let probabilities = self.probabilities(q_values);
                let draw = rng.gen::<f32>();
                let mut cumulative = 0.0;
                for (i, &p) in probabilities.iter().enumerate() {
                    cumulative += p;
                    if draw < cumulative {
                        return i;
                    }
                }
                // Cumulative rounding can leave the draw past the last bucket.
                probabilities.len() - 1
            }
        }
    }

    /// Per-action selection probabilities under this policy.
    pub fn probabilities(&self, q_values: ArrayView1<f32>) -> Array1<f32> {
        let n = q_values.len();
        match self {
            ActionPolicy::EpsilonGreedy { epsilon } => {
                let mut probabilities = Array1::from_elem(n, epsilon / n as f32);
                probabilities[argmax(q_values)] += 1.0 - epsilon;
                probabilities
            }
            ActionPolicy::Softmax { temperature } => {
                // Subtract the max before exponentiating so large Q-values
                // cannot overflow.
                let max_q = q_values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
                let mut weights = q_values.mapv(|q| ((q - max_q) / temperature).exp());
                let total = weights.sum();
                weights.mapv_inplace(|w| w / total);
                weights
            }
        }
    }
}
