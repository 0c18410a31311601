//! Recorded transitions and the fixed action set.
//!
//! A timeline is a pre-collected sequence of decision steps; it is the only
//! source of experience (nothing runs live). Records arrive as JSON lines
//! with the action as a label drawn from the configured action set; labels
//! resolve to indices at parse time and an unknown label is fatal; the
//! timeline is never silently truncated.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use ndarray::{Array1, Array2, ArrayView1};
use serde::{Deserialize, Serialize};

use crate::error::{QuenchError, Result};
use crate::normalizer::NormalizationParams;

/// Fixed, ordered, immutable list of action identifiers.
///
/// Defines the Q-network's output width and the index space for
/// [`Transition::action`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActionSet {
    names: Vec<String>,
}

impl ActionSet {
    pub fn new(names: Vec<String>) -> Result<Self> {
        if names.is_empty() {
            return Err(QuenchError::config_validation(
                "actions",
                "at least one action is required",
            ));
        }
        for (i, label) in names.iter().enumerate() {
            if names[..i].contains(label) {
                return Err(QuenchError::config_validation(
                    "actions",
                    &format!("duplicate action label '{}'", label),
                ));
            }
        }
        Ok(ActionSet { names })
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn name(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(String::as_str)
    }

    pub fn index_of(&self, label: &str) -> Result<usize> {
        self.names
            .iter()
            .position(|name| name == label)
            .ok_or_else(|| QuenchError::InvalidAction {
                label: label.to_string(),
            })
    }
}

/// One decision step, immutable once read from the timeline.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    pub state: Array1<f32>,
    pub action: usize,
    pub reward: f32,
    pub next_state: Array1<f32>,
    pub terminal: bool,
}

/// Raw timeline record as it appears on disk, before label resolution.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub state: Vec<f32>,
    pub action: String,
    pub reward: f32,
    pub next_state: Vec<f32>,
    pub terminal: bool,
}

/// A validated collection of transitions with a consistent state width.
#[derive(Clone, Debug)]
pub struct Timeline {
    transitions: Vec<Transition>,
    state_dim: usize,
}

impl Timeline {
    /// Resolve raw records against the action set, checking that every state
    /// and next-state vector has the same width.
    pub fn from_records(records: Vec<TransitionRecord>, actions: &ActionSet) -> Result<Self> {
        if records.is_empty() {
            return Err(QuenchError::InsufficientData(
                "timeline contains no transitions".to_string(),
            ));
        }
        let state_dim = records[0].state.len();
        if state_dim == 0 {
            return Err(QuenchError::InsufficientData(
                "timeline states have zero features".to_string(),
            ));
        }

        let mut transitions = Vec::with_capacity(records.len());
        for (i, record) in records.into_iter().enumerate() {
            if record.state.len() != state_dim || record.next_state.len() != state_dim {
                return Err(QuenchError::shape_mismatch(
                    format!("state width {}", state_dim),
                    format!(
                        "widths {}/{} at transition {}",
                        record.state.len(),
                        record.next_state.len(),
                        i
                    ),
                ));
            }
            let action = actions.index_of(&record.action)?;
            transitions.push(Transition {
                state: Array1::from_vec(record.state),
                action,
                reward: record.reward,
                next_state: Array1::from_vec(record.next_state),
                terminal: record.terminal,
            });
        }

        Ok(Timeline {
            transitions,
            state_dim,
        })
    }

    /// Read a timeline from JSON-lines records.
    pub fn read_json_lines<R: BufRead>(reader: R, actions: &ActionSet) -> Result<Self> {
        let mut records = Vec::new();
        for (line_no, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let record: TransitionRecord = serde_json::from_str(&line).map_err(|err| {
                QuenchError::SerializationError(format!(
                    "timeline line {}: {}",
                    line_no + 1,
                    err
                ))
            })?;
            records.push(record);
        }
        Self::from_records(records, actions)
    }

    pub fn load<P: AsRef<Path>>(path: P, actions: &ActionSet) -> Result<Self> {
        let file = File::open(path.as_ref()).map_err(|err| {
            QuenchError::IoError(format!("{}: {}", path.as_ref().display(), err))
        })?;
        Self::read_json_lines(BufReader::new(file), actions)
    }

    pub fn transitions(&self) -> &[Transition] {
        &self.transitions
    }

    pub fn len(&self) -> usize {
        self.transitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transitions.is_empty()
    }

    pub fn state_dim(&self) -> usize {
        self.state_dim
    }

    /// The first `limit` states stacked into a sample matrix, for fitting
    /// normalization statistics.
    pub fn state_sample(&self, limit: usize) -> Array2<f32> {
        let n = limit.min(self.transitions.len());
        let mut sample = Array2::zeros((n, self.state_dim));
        for (i, transition) in self.transitions[..n].iter().enumerate() {
            sample.row_mut(i).assign(&transition.state);
        }
        sample
    }

    pub fn states(&self) -> impl Iterator<Item = ArrayView1<'_, f32>> {
        self.transitions.iter().map(|t| t.state.view())
    }

    /// A copy of the timeline with states and next-states normalized.
    pub fn normalized(&self, params: &NormalizationParams) -> Result<Timeline> {
        let transitions = self
            .transitions
            .iter()
            .map(|t| {
                Ok(Transition {
                    state: params.apply(t.state.view())?,
                    action: t.action,
                    reward: t.reward,
                    next_state: params.apply(t.next_state.view())?,
                    terminal: t.terminal,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Timeline {
            transitions,
            state_dim: self.state_dim,
        })
    }

    /// Deterministic worker partition: transition `i` goes to worker
    /// `i % world`, so every transition is consumed by exactly one worker.
    pub fn partition(&self, rank: usize, world: usize) -> Vec<Transition> {
        assert!(world > 0 && rank < world, "invalid partition rank/world");
        self.transitions
            .iter()
            .enumerate()
            .filter(|(i, _)| i % world == rank)
            .map(|(_, t)| t.clone())
            .collect()
    }
}
