//! Slowly-tracking target network for stable bootstrapped targets.
//!
//! The target owns a full parameter copy of the online network (a clone, not
//! a shared reference) and is only ever written through
//! [`TargetNetwork::soft_update`], never by gradient descent. Within a
//! training step the update runs strictly after the optimizer step; reads and
//! updates never overlap because each worker owns its target exclusively.

use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::network::QNetwork;

#[derive(Clone, Serialize, Deserialize)]
pub struct TargetNetwork {
    network: QNetwork,
}

impl TargetNetwork {
    /// Clone the online network's parameters exactly.
    pub fn new(online: &QNetwork) -> Self {
        TargetNetwork {
            network: online.clone(),
        }
    }

    /// Polyak interpolation toward the online parameters:
    /// `target ← rate * online + (1 - rate) * target` for every tensor.
    ///
    /// `rate = 1.0` degenerates to a hard copy.
    pub fn soft_update(&mut self, online: &QNetwork, rate: f32) {
        debug_assert!(rate > 0.0 && rate <= 1.0, "soft-update rate outside (0, 1]");
        let keep = 1.0 - rate;
        for ((tw, tb), (ow, ob)) in self
            .network
            .param_slots_mut()
            .into_iter()
            .zip(online.param_slots())
        {
            tw.zip_mut_with(ow, |t, &o| *t = rate * o + keep * *t);
            tb.zip_mut_with(ob, |t, &o| *t = rate * o + keep * *t);
        }
    }

    /// Q-values from the target parameters; never mutates them.
    pub fn predict_batch(&self, states: ArrayView2<f32>) -> Result<Array2<f32>> {
        self.network.predict_batch(states)
    }

    pub fn network(&self) -> &QNetwork {
        &self.network
    }
}
