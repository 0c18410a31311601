//! # Quench - Offline Q-Learning from Recorded Timelines
//!
//! Quench trains discrete-action Q-learning agents (Rainbow-style DQN with
//! optional double-Q and dueling heads) from fixed, pre-collected timelines of
//! state/action/reward transitions. The environment never runs live: all
//! experience is read from recorded data, normalized once, and consumed in
//! minibatches by one or more lock-stepped worker replicas whose gradients
//! are averaged before every optimizer step.
//!
//! ## Key Features
//!
//! - **Bootstrap targets**: max-Q, double-Q (online selection, target
//!   evaluation), or on-policy selection through the configured action policy
//! - **Network topology from configuration**: layer widths with placeholder
//!   dimensions, named activations, optional dueling value/advantage split
//! - **Soft target synchronization**: Polyak averaging after every optimizer
//!   step, degenerating to a hard copy at rate 1.0
//! - **Data-parallel workers**: deterministic timeline partitioning and a
//!   pluggable gradient all-reduce keeping replicas bit-identical
//! - **Frozen feature normalization**: per-feature statistics fitted once
//!   before training and shared read-only by every worker and the evaluator
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use quench::config::JobParameters;
//!
//! let raw = r#"{
//!     "actions": ["hold", "buy"],
//!     "rl": {"gamma": 0.99, "maxq_learning": true},
//!     "training": {"layers": [-1, 64, -1], "activations": ["relu", "linear"]},
//!     "training_data_path": "train.jsonl",
//!     "eval_data_path": "eval.jsonl",
//!     "model_output_path": "model.bin"
//! }"#;
//! let config: JobParameters = serde_json::from_str(raw).unwrap();
//! let report = quench::job::run(&config).unwrap();
//! println!("mean Q on eval timeline: {}", report.eval.unwrap().mean_q);
//! ```
//!
//! ## Module Organization
//!
//! - [`activations`] - Activation functions applied after each linear layer
//! - [`artifact`] - Serialized model output (network + normalization)
//! - [`config`] - Job configuration objects and validation
//! - [`distributed`] - Worker rendezvous and gradient all-reduce
//! - [`error`] - Error types and result handling
//! - [`evaluator`] - Read-only replay of the evaluation timeline
//! - [`job`] - End-to-end job orchestration
//! - [`network`] - Q-network layers, architecture builder, backprop
//! - [`normalizer`] - Per-feature normalization statistics
//! - [`optimizer`] - SGD/Adam and the learning-rate schedule
//! - [`policy`] - Epsilon-greedy and softmax action selection
//! - [`target`] - Slowly-tracking target network
//! - [`timeline`] - Transition records, action set, partitioning
//! - [`trainer`] - Minibatch training loop and target computation

pub mod activations;
pub mod artifact;
pub mod config;
pub mod distributed;
pub mod error;
pub mod evaluator;
pub mod job;
pub mod network;
pub mod normalizer;
pub mod optimizer;
pub mod policy;
pub mod target;
pub mod timeline;
pub mod trainer;

#[cfg(test)]
mod tests;
