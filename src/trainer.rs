//! Minibatch training loop: target computation, loss, optimizer step,
//! target synchronization.
//!
//! Each training step is a synchronous compute-then-communicate unit: stack
//! the minibatch, compute bootstrap targets from detached Q-values, forward
//! and backpropagate the online network, all-reduce the gradients through
//! the injected [`Reduce`] capability, apply the optimizer, then soft-update
//! the target network, strictly in that order, on every worker.
//!
//! A non-finite loss poisons this worker's gradient contribution so the
//! whole group skips the same step together; the step is logged and training
//! continues with the next batch. Running out of epochs ends training
//! normally.

use ndarray::{Array1, Array2, ArrayView2};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, info, warn};

use crate::config::{RLParameters, RainbowParameters, TrainingParameters};
use crate::distributed::Reduce;
use crate::error::{QuenchError, Result};
use crate::network::QNetwork;
use crate::optimizer::{LearningRateSchedule, Optimizer, OptimizerWrapper};
use crate::policy::{argmax, ActionPolicy};
use crate::target::TargetNetwork;
use crate::timeline::Transition;

/// Loss on the taken-action Q-value, reduced by mean over the minibatch.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum QLoss {
    Mse,
    Huber { delta: f32 },
}

impl QLoss {
    pub fn parse(name: &str) -> Result<Self> {
        match name.to_ascii_lowercase().as_str() {
            "mse" => Ok(QLoss::Mse),
            "huber" => Ok(QLoss::Huber { delta: 1.0 }),
            other => Err(QuenchError::config_validation(
                "training.loss",
                &format!("unknown loss '{}' (expected mse or huber)", other),
            )),
        }
    }

    fn value(&self, diff: f32) -> f32 {
        match self {
            QLoss::Mse => 0.5 * diff * diff,
            QLoss::Huber { delta } => {
                let abs = diff.abs();
                if abs <= *delta {
                    0.5 * diff * diff
                } else {
                    delta * abs - 0.5 * delta * delta
                }
            }
        }
    }

    fn gradient(&self, diff: f32) -> f32 {
        match self {
            QLoss::Mse => diff,
            QLoss::Huber { delta } => {
                if diff.abs() <= *delta {
                    diff
                } else {
                    delta * diff.signum()
                }
            }
        }
    }
}

/// How the bootstrap value at the next state is chosen, fixed at trainer
/// construction.
#[derive(Clone, Debug)]
pub enum BootstrapMode {
    /// `max_a' Q_target(s', a')`.
    MaxQ,
    /// Action chosen by the online network, value read from the target
    /// network, decoupling selection from estimation.
    DoubleQ,
    /// Action chosen by the action policy over the online Q-values, value
    /// read from the target network.
    OnPolicy(ActionPolicy),
}

/// Bootstrapped regression targets for a minibatch.
///
/// Terminal transitions contribute zero bootstrap value: their target is the
/// reward exactly, independent of gamma and of either network.
pub fn compute_targets<R: Rng>(
    rewards: &[f32],
    terminals: &[bool],
    next_q_online: ArrayView2<f32>,
    next_q_target: ArrayView2<f32>,
    gamma: f32,
    mode: &BootstrapMode,
    rng: &mut R,
) -> Array1<f32> {
    let batch_size = rewards.len();
    let mut targets = Array1::zeros(batch_size);
    for i in 0..batch_size {
        if terminals[i] {
            targets[i] = rewards[i];
            continue;
        }
        let bootstrap = match mode {
            BootstrapMode::MaxQ => next_q_target
                .row(i)
                .iter()
                .copied()
                .fold(f32::NEG_INFINITY, f32::max),
            BootstrapMode::DoubleQ => {
                let chosen = argmax(next_q_online.row(i));
                next_q_target[[i, chosen]]
            }
            BootstrapMode::OnPolicy(policy) => {
                let chosen = policy.select(next_q_online.row(i), rng);
                next_q_target[[i, chosen]]
            }
        };
        targets[i] = rewards[i] + gamma * bootstrap;
    }
    targets
}

/// Lifecycle of a trainer; construction is the transition to `Ready`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TrainerPhase {
    Ready,
    Exhausted,
}

/// Outcome of one training step.
#[derive(Clone, Copy, Debug)]
pub struct StepReport {
    pub loss: f32,
    pub skipped: bool,
}

/// Aggregate outcome of a training run.
#[derive(Clone, Debug)]
pub struct TrainingSummary {
    pub epochs: usize,
    pub steps: usize,
    pub skipped_steps: usize,
    pub final_epoch_loss: Option<f32>,
}

struct StackedBatch {
    states: Array2<f32>,
    next_states: Array2<f32>,
    actions: Vec<usize>,
    rewards: Vec<f32>,
    terminals: Vec<bool>,
}

/// Orchestrates minibatch sampling, target computation, the optimizer step,
/// and target synchronization for one worker replica.
pub struct Trainer {
    network: QNetwork,
    target: TargetNetwork,
    optimizer: OptimizerWrapper,
    bootstrap: BootstrapMode,
    loss: QLoss,
    schedule: LearningRateSchedule,
    gamma: f32,
    target_update_rate: f32,
    l2_decay: f32,
    minibatch_size: usize,
    reducer: Box<dyn Reduce>,
    rng: StdRng,
    phase: TrainerPhase,
    steps: usize,
    skipped_steps: usize,
}

impl Trainer {
    pub fn new(
        network: QNetwork,
        rl: &RLParameters,
        rainbow: &RainbowParameters,
        training: &TrainingParameters,
        reducer: Box<dyn Reduce>,
    ) -> Result<Self> {
        if !(0.0..1.0).contains(&rl.gamma) {
            return Err(QuenchError::config_validation(
                "rl.gamma",
                &format!("{} is outside [0, 1)", rl.gamma),
            ));
        }
        if !(rl.target_update_rate > 0.0 && rl.target_update_rate <= 1.0) {
            return Err(QuenchError::config_validation(
                "rl.target_update_rate",
                &format!("{} is outside (0, 1]", rl.target_update_rate),
            ));
        }
        if training.minibatch_size == 0 {
            return Err(QuenchError::config_validation(
                "training.minibatch_size",
                "must be at least 1",
            ));
        }

        let bootstrap = if rl.maxq_learning {
            if rainbow.double_q_learning {
                BootstrapMode::DoubleQ
            } else {
                BootstrapMode::MaxQ
            }
        } else {
            BootstrapMode::OnPolicy(ActionPolicy::from_rl(rl)?)
        };

        let optimizer = OptimizerWrapper::parse(&training.optimizer, &network)?;
        let loss = QLoss::parse(&training.loss)?;
        let schedule = LearningRateSchedule::ExponentialDecay {
            initial_lr: training.learning_rate,
            decay_rate: training.lr_decay,
        };
        let target = TargetNetwork::new(&network);

        Ok(Trainer {
            network,
            target,
            optimizer,
            bootstrap,
            loss,
            schedule,
            gamma: rl.gamma,
            target_update_rate: rl.target_update_rate,
            l2_decay: training.l2_decay,
            minibatch_size: training.minibatch_size,
            reducer,
            rng: StdRng::seed_from_u64(training.seed),
            phase: TrainerPhase::Ready,
            steps: 0,
            skipped_steps: 0,
        })
    }

    pub fn phase(&self) -> TrainerPhase {
        self.phase
    }

    pub fn steps(&self) -> usize {
        self.steps
    }

    pub fn skipped_steps(&self) -> usize {
        self.skipped_steps
    }

    pub fn network(&self) -> &QNetwork {
        &self.network
    }

    pub fn target(&self) -> &TargetNetwork {
        &self.target
    }

    pub fn into_network(self) -> QNetwork {
        self.network
    }

    fn stack_batch(&self, batch: &[&Transition]) -> Result<StackedBatch> {
        if batch.is_empty() {
            return Err(QuenchError::InsufficientData(
                "empty minibatch".to_string(),
            ));
        }
        let batch_size = batch.len();
        let state_dim = self.network.input_dim();
        let mut states = Array2::zeros((batch_size, state_dim));
        let mut next_states = Array2::zeros((batch_size, state_dim));
        let mut actions = Vec::with_capacity(batch_size);
        let mut rewards = Vec::with_capacity(batch_size);
        let mut terminals = Vec::with_capacity(batch_size);

        for (i, transition) in batch.iter().enumerate() {
            if transition.state.len() != state_dim || transition.next_state.len() != state_dim {
                return Err(QuenchError::shape_mismatch(
                    format!("state width {}", state_dim),
                    format!("state width {}", transition.state.len()),
                ));
            }
            states.row_mut(i).assign(&transition.state);
            next_states.row_mut(i).assign(&transition.next_state);
            actions.push(transition.action);
            rewards.push(transition.reward);
            terminals.push(transition.terminal);
        }

        Ok(StackedBatch {
            states,
            next_states,
            actions,
            rewards,
            terminals,
        })
    }

    /// Loss over a batch against the current networks, without any update.
    pub fn batch_loss(&mut self, batch: &[&Transition]) -> Result<f32> {
        let stacked = self.stack_batch(batch)?;
        let next_q_online = self.network.predict_batch(stacked.next_states.view())?;
        let next_q_target = self.target.predict_batch(stacked.next_states.view())?;
        let targets = compute_targets(
            &stacked.rewards,
            &stacked.terminals,
            next_q_online.view(),
            next_q_target.view(),
            self.gamma,
            &self.bootstrap,
            &mut self.rng,
        );
        let q_all = self.network.predict_batch(stacked.states.view())?;
        let mut loss = 0.0;
        for i in 0..batch.len() {
            loss += self.loss.value(q_all[[i, stacked.actions[i]]] - targets[i]);
        }
        Ok(loss / batch.len() as f32 + self.weight_penalty())
    }

    fn weight_penalty(&self) -> f32 {
        if self.l2_decay == 0.0 {
            return 0.0;
        }
        let mut sum_sq = 0.0;
        for (weights, _) in self.network.param_slots() {
            sum_sq += weights.iter().map(|w| w * w).sum::<f32>();
        }
        0.5 * self.l2_decay * sum_sq
    }

    /// Run one training step on a minibatch.
    ///
    /// Gradients are all-reduced before the optimizer step; the target
    /// network is soft-updated strictly after it. A non-finite loss (on any
    /// worker in the group) skips the update without corrupting the network.
    pub fn train_step(
        &mut self,
        batch: &[&Transition],
        learning_rate: f32,
        batch_index: usize,
    ) -> Result<StepReport> {
        let stacked = self.stack_batch(batch)?;
        let batch_size = batch.len();
        let num_actions = self.network.num_actions();

        // Detached Q-values at the next state from both networks.
        let next_q_online = self.network.predict_batch(stacked.next_states.view())?;
        let next_q_target = self.target.predict_batch(stacked.next_states.view())?;
        let targets = compute_targets(
            &stacked.rewards,
            &stacked.terminals,
            next_q_online.view(),
            next_q_target.view(),
            self.gamma,
            &self.bootstrap,
            &mut self.rng,
        );

        // Current Q estimate for the taken actions; the loss gradient only
        // flows through the taken-action column of each row.
        let q_all = self.network.forward_batch(stacked.states.view())?;
        let mut q_errors = Array2::zeros((batch_size, num_actions));
        let mut loss = 0.0;
        for i in 0..batch_size {
            let diff = q_all[[i, stacked.actions[i]]] - targets[i];
            loss += self.loss.value(diff);
            q_errors[[i, stacked.actions[i]]] = self.loss.gradient(diff) / batch_size as f32;
        }
        loss = loss / batch_size as f32 + self.weight_penalty();

        let mut gradients = self.network.backward_batch(q_errors.view());
        if self.l2_decay > 0.0 {
            let l2 = self.l2_decay;
            for (slot, (weights, _)) in gradients.slots.iter_mut().zip(self.network.param_slots())
            {
                slot.weights.zip_mut_with(weights, |g, &w| *g += l2 * w);
            }
        }

        // A non-finite local loss poisons this contribution so every replica
        // in the group skips the same step.
        if !loss.is_finite() {
            gradients.scale(f32::NAN);
        }
        let reduced = self.reducer.reduce(gradients)?;
        if !reduced.is_finite() {
            self.skipped_steps += 1;
            warn!(
                "skipping optimizer update for batch {}: non-finite loss or gradient",
                batch_index
            );
            return Ok(StepReport { loss, skipped: true });
        }

        for (slot, ((weights, biases), grad)) in self
            .network
            .param_slots_mut()
            .into_iter()
            .zip(reduced.slots.iter())
            .enumerate()
        {
            self.optimizer
                .update_weights(slot, weights, &grad.weights, learning_rate);
            self.optimizer
                .update_biases(slot, biases, &grad.biases, learning_rate);
        }
        self.optimizer.advance_step();

        // Target synchronization strictly after the optimizer step.
        self.target.soft_update(&self.network, self.target_update_rate);

        self.steps += 1;
        debug!("step {} batch {} loss {:.6}", self.steps, batch_index, loss);
        Ok(StepReport { loss, skipped: false })
    }

    /// Train over the given transitions for a bounded number of epochs.
    ///
    /// Minibatches are drawn in a fresh shuffled order each epoch; the index
    /// sequence wraps around so every step sees a full minibatch, which keeps
    /// lock-stepped workers on identical step counts (`steps_per_epoch` pins
    /// the count for a worker group; a single worker derives it from its own
    /// data). A stop signal is honored between steps, never mid-step.
    pub fn train(
        &mut self,
        transitions: &[Transition],
        epochs: usize,
        steps_per_epoch: Option<usize>,
        stop: Option<&AtomicBool>,
    ) -> Result<TrainingSummary> {
        if transitions.is_empty() {
            return Err(QuenchError::InsufficientData(
                "no transitions to train on".to_string(),
            ));
        }
        let steps_per_epoch = steps_per_epoch.unwrap_or(
            (transitions.len() + self.minibatch_size - 1) / self.minibatch_size,
        );
        let mut final_epoch_loss = None;

        'epochs: for epoch in 0..epochs {
            let learning_rate = self.schedule.lr_at(epoch);
            let mut indices: Vec<usize> = (0..transitions.len()).collect();
            indices.shuffle(&mut self.rng);

            let mut epoch_loss = 0.0;
            let mut counted = 0usize;
            for step in 0..steps_per_epoch {
                if let Some(flag) = stop {
                    // The decision to stop is agreed through the reducer so a
                    // whole worker group leaves at the same step boundary.
                    if self.reducer.stop_consensus(flag.load(Ordering::Relaxed))? {
                        info!("stop signal received; ending training at a step boundary");
                        break 'epochs;
                    }
                }
                let batch: Vec<&Transition> = (0..self.minibatch_size)
                    .map(|j| {
                        &transitions[indices[(step * self.minibatch_size + j) % indices.len()]]
                    })
                    .collect();
                let report = self.train_step(&batch, learning_rate, step)?;
                if !report.skipped {
                    epoch_loss += report.loss;
                    counted += 1;
                }
            }
            if counted > 0 {
                let mean = epoch_loss / counted as f32;
                final_epoch_loss = Some(mean);
                info!(
                    "epoch {} complete: lr {:.6}, mean loss {:.6}",
                    epoch, learning_rate, mean
                );
            } else {
                warn!("epoch {} complete: every step was skipped", epoch);
            }
        }

        self.phase = TrainerPhase::Exhausted;
        Ok(TrainingSummary {
            epochs,
            steps: self.steps,
            skipped_steps: self.skipped_steps,
            final_epoch_loss,
        })
    }
}
