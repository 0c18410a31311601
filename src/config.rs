//! Job configuration objects.
//!
//! The configuration is produced by an external loader (typically
//! deserialized from JSON) and consumed here as immutable value objects.
//! [`JobParameters::validate`] enforces the cross-field invariants once, up
//! front, so every component downstream can assume a coherent configuration.

use serde::{Deserialize, Serialize};

use crate::error::{QuenchError, Result};
use crate::network::NetworkSpec;

/// Reinforcement-learning hyperparameters.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RLParameters {
    /// Discount factor, in [0, 1).
    #[serde(default = "default_gamma")]
    pub gamma: f32,
    /// Soft-update coefficient for the target network, in (0, 1].
    #[serde(default = "default_target_update_rate")]
    pub target_update_rate: f32,
    /// Off-policy max-Q bootstrap when true, on-policy otherwise.
    #[serde(default = "default_true")]
    pub maxq_learning: bool,
    /// Exploration rate for the epsilon-greedy policy.
    #[serde(default = "default_epsilon")]
    pub epsilon: f32,
    /// Softmax temperature; only meaningful when `softmax_policy` is set.
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Select actions by softmax sampling instead of epsilon-greedy.
    #[serde(default)]
    pub softmax_policy: bool,
}

impl Default for RLParameters {
    fn default() -> Self {
        RLParameters {
            gamma: default_gamma(),
            target_update_rate: default_target_update_rate(),
            maxq_learning: true,
            epsilon: default_epsilon(),
            temperature: default_temperature(),
            softmax_policy: false,
        }
    }
}

/// Structural and algorithmic toggles, resolved once at trainer construction.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RainbowParameters {
    /// Select the bootstrap action with the online network, evaluate it with
    /// the target network.
    #[serde(default = "default_true")]
    pub double_q_learning: bool,
    /// Split the output into state-value and advantage heads.
    #[serde(default = "default_true")]
    pub dueling_architecture: bool,
}

impl Default for RainbowParameters {
    fn default() -> Self {
        RainbowParameters {
            double_q_learning: true,
            dueling_architecture: true,
        }
    }
}

/// Network topology and optimization hyperparameters.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TrainingParameters {
    /// Layer widths; -1 at either end resolves to the state/action width.
    pub layers: Vec<i64>,
    /// Activation name per layer; must be one shorter than `layers`.
    pub activations: Vec<String>,
    #[serde(default = "default_minibatch_size")]
    pub minibatch_size: usize,
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f32,
    /// "SGD" or "ADAM".
    #[serde(default = "default_optimizer")]
    pub optimizer: String,
    /// Per-epoch multiplicative learning-rate decay, in (0, 1].
    #[serde(default = "default_lr_decay")]
    pub lr_decay: f32,
    /// L2 weight penalty coefficient.
    #[serde(default)]
    pub l2_decay: f32,
    /// "mse" or "huber".
    #[serde(default = "default_loss")]
    pub loss: String,
    /// Seed for weight initialization and minibatch shuffling.
    #[serde(default)]
    pub seed: u64,
}

impl TrainingParameters {
    pub fn network_spec(&self) -> NetworkSpec {
        NetworkSpec::new(self.layers.clone(), self.activations.clone())
    }
}

/// Scope of the one-time feature-statistics fit.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NormalizationParameters {
    /// Column indices to normalize; every column when absent.
    #[serde(default)]
    pub cols_to_norm: Option<Vec<usize>>,
    /// Upper bound on the number of states sampled for the fit.
    #[serde(default = "default_num_samples")]
    pub num_samples: usize,
}

impl Default for NormalizationParameters {
    fn default() -> Self {
        NormalizationParameters {
            cols_to_norm: None,
            num_samples: default_num_samples(),
        }
    }
}

/// Worker topology and rendezvous configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DistributedParameters {
    #[serde(default)]
    pub use_gpu: bool,
    /// One worker per available host core when set (and `num_workers` is not).
    #[serde(default)]
    pub use_all_avail_gpus: bool,
    #[serde(default = "default_num_nodes")]
    pub num_nodes: usize,
    /// Rendezvous endpoint; only `file://` paths are supported.
    #[serde(default = "default_init_method")]
    pub init_method: String,
    /// Explicit worker count, overriding `use_all_avail_gpus`.
    #[serde(default)]
    pub num_workers: Option<usize>,
    #[serde(default = "default_rendezvous_timeout")]
    pub rendezvous_timeout_secs: u64,
    #[serde(default = "default_step_timeout")]
    pub step_timeout_secs: u64,
}

impl Default for DistributedParameters {
    fn default() -> Self {
        DistributedParameters {
            use_gpu: false,
            use_all_avail_gpus: false,
            num_nodes: 1,
            init_method: default_init_method(),
            num_workers: None,
            rendezvous_timeout_secs: default_rendezvous_timeout(),
            step_timeout_secs: default_step_timeout(),
        }
    }
}

impl DistributedParameters {
    /// Number of worker replicas the job will run.
    pub fn world_size(&self) -> usize {
        if let Some(workers) = self.num_workers {
            return workers;
        }
        if self.use_all_avail_gpus {
            num_cpus::get().max(1)
        } else {
            1
        }
    }
}

/// The full training-job configuration handed in by the external loader.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JobParameters {
    /// Ordered, immutable action identifiers; defines the output width.
    pub actions: Vec<String>,
    #[serde(default)]
    pub rl: RLParameters,
    #[serde(default)]
    pub rainbow: RainbowParameters,
    pub training: TrainingParameters,
    /// Outer training loop bound.
    #[serde(default = "default_epochs")]
    pub epochs: usize,
    #[serde(default)]
    pub norm_params: NormalizationParameters,
    #[serde(default)]
    pub distributed: DistributedParameters,
    #[serde(default)]
    pub training_data_path: String,
    #[serde(default)]
    pub eval_data_path: String,
    /// Separate timeline whose states seed the normalization fit.
    #[serde(default)]
    pub state_norm_data_path: Option<String>,
    #[serde(default)]
    pub model_output_path: String,
}

impl JobParameters {
    /// Check every cross-field invariant; errors name the offending field.
    pub fn validate(&self) -> Result<()> {
        if self.actions.is_empty() {
            return Err(QuenchError::config_validation(
                "actions",
                "at least one action is required",
            ));
        }
        for (i, label) in self.actions.iter().enumerate() {
            if self.actions[..i].contains(label) {
                return Err(QuenchError::config_validation(
                    "actions",
                    &format!("duplicate action label '{}'", label),
                ));
            }
        }

        if !(0.0..1.0).contains(&self.rl.gamma) {
            return Err(QuenchError::config_validation(
                "rl.gamma",
                &format!("{} is outside [0, 1)", self.rl.gamma),
            ));
        }
        if !(self.rl.target_update_rate > 0.0 && self.rl.target_update_rate <= 1.0) {
            return Err(QuenchError::config_validation(
                "rl.target_update_rate",
                &format!("{} is outside (0, 1]", self.rl.target_update_rate),
            ));
        }
        if !(0.0..=1.0).contains(&self.rl.epsilon) {
            return Err(QuenchError::config_validation(
                "rl.epsilon",
                &format!("{} is outside [0, 1]", self.rl.epsilon),
            ));
        }
        if self.rl.softmax_policy && self.rl.temperature <= 0.0 {
            return Err(QuenchError::config_validation(
                "rl.temperature",
                &format!(
                    "{} must be > 0 when softmax_policy is set",
                    self.rl.temperature
                ),
            ));
        }

        if self.training.layers.len() < 2 {
            return Err(QuenchError::config_validation(
                "training.layers",
                "a network needs at least an input and an output width",
            ));
        }
        if self.training.activations.len() != self.training.layers.len() - 1 {
            return Err(QuenchError::config_validation(
                "training.activations",
                &format!(
                    "expected {} activations for {} layer widths, got {}",
                    self.training.layers.len() - 1,
                    self.training.layers.len(),
                    self.training.activations.len()
                ),
            ));
        }
        if self.training.minibatch_size == 0 {
            return Err(QuenchError::config_validation(
                "training.minibatch_size",
                "must be at least 1",
            ));
        }
        if self.training.learning_rate <= 0.0 {
            return Err(QuenchError::config_validation(
                "training.learning_rate",
                "must be > 0",
            ));
        }
        if !(self.training.lr_decay > 0.0 && self.training.lr_decay <= 1.0) {
            return Err(QuenchError::config_validation(
                "training.lr_decay",
                &format!("{} is outside (0, 1]", self.training.lr_decay),
            ));
        }
        if self.training.l2_decay < 0.0 {
            return Err(QuenchError::config_validation(
                "training.l2_decay",
                "must be >= 0",
            ));
        }
        if self.epochs == 0 {
            return Err(QuenchError::config_validation("epochs", "must be at least 1"));
        }
        if self.norm_params.num_samples == 0 {
            return Err(QuenchError::config_validation(
                "norm_params.num_samples",
                "must be at least 1",
            ));
        }

        if self.distributed.use_gpu {
            return Err(QuenchError::config_validation(
                "distributed.use_gpu",
                "no GPU backend is available; workers run on host cores",
            ));
        }
        if self.distributed.num_nodes != 1 {
            return Err(QuenchError::config_validation(
                "distributed.num_nodes",
                "only single-node training is supported",
            ));
        }
        if !self.distributed.init_method.starts_with("file://") {
            return Err(QuenchError::config_validation(
                "distributed.init_method",
                "only file:// rendezvous endpoints are supported",
            ));
        }
        if self.distributed.num_workers == Some(0) {
            return Err(QuenchError::config_validation(
                "distributed.num_workers",
                "must be at least 1 when set",
            ));
        }
        if self.distributed.rendezvous_timeout_secs == 0
            || self.distributed.step_timeout_secs == 0
        {
            return Err(QuenchError::config_validation(
                "distributed.rendezvous_timeout_secs",
                "timeouts must be at least 1 second",
            ));
        }

        Ok(())
    }
}

fn default_gamma() -> f32 {
    0.99
}

fn default_target_update_rate() -> f32 {
    0.001
}

fn default_epsilon() -> f32 {
    0.1
}

fn default_temperature() -> f32 {
    0.01
}

fn default_true() -> bool {
    true
}

fn default_minibatch_size() -> usize {
    128
}

fn default_learning_rate() -> f32 {
    0.001
}

fn default_optimizer() -> String {
    "ADAM".to_string()
}

fn default_lr_decay() -> f32 {
    0.999
}

fn default_loss() -> String {
    "mse".to_string()
}

fn default_num_samples() -> usize {
    1000
}

fn default_num_nodes() -> usize {
    1
}

fn default_init_method() -> String {
    "file:///tmp/quench_rendezvous".to_string()
}

fn default_rendezvous_timeout() -> u64 {
    30
}

fn default_step_timeout() -> u64 {
    60
}

fn default_epochs() -> usize {
    1
}
