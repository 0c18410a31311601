use std::fmt;

/// Result type for Quench operations
pub type Result<T> = std::result::Result<T, QuenchError>;

/// Main error type for the Quench library
#[derive(Debug, Clone)]
pub enum QuenchError {
    /// Missing or contradictory configuration fields
    ConfigValidation {
        field: String,
        reason: String,
    },

    /// Normalization sample too small or degenerate
    InsufficientData(String),

    /// Network/input dimensionality mismatch
    ShapeMismatch {
        expected: String,
        actual: String,
    },

    /// Softmax temperature must be strictly positive
    InvalidTemperature {
        temperature: f32,
    },

    /// Action label not present in the configured action set
    InvalidAction {
        label: String,
    },

    /// NaN/Inf loss or gradient
    NumericInstability(String),

    /// Worker group failed to assemble within the startup timeout
    RendezvousTimeout {
        joined: usize,
        world: usize,
    },

    /// A worker died or missed a step barrier; fatal for the whole job
    WorkerFailure {
        rank: usize,
        reason: String,
    },

    /// IO errors (file operations)
    IoError(String),

    /// Serialization/deserialization errors
    SerializationError(String),
}

impl fmt::Display for QuenchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuenchError::ConfigValidation { field, reason } => {
                write!(f, "Invalid configuration field '{}': {}", field, reason)
            }
            QuenchError::InsufficientData(msg) => write!(f, "Insufficient data: {}", msg),
            QuenchError::ShapeMismatch { expected, actual } => {
                write!(f, "Shape mismatch: expected {}, got {}", expected, actual)
            }
            QuenchError::InvalidTemperature { temperature } => {
                write!(f, "Invalid softmax temperature {}: must be > 0", temperature)
            }
            QuenchError::InvalidAction { label } => {
                write!(f, "Unknown action label '{}'", label)
            }
            QuenchError::NumericInstability(msg) => write!(f, "Numeric instability: {}", msg),
            QuenchError::RendezvousTimeout { joined, world } => {
                write!(
                    f,
                    "Rendezvous timed out: {} of {} workers joined",
                    joined, world
                )
            }
            QuenchError::WorkerFailure { rank, reason } => {
                write!(f, "Worker {} failed: {}", rank, reason)
            }
            QuenchError::IoError(msg) => write!(f, "IO error: {}", msg),
            QuenchError::SerializationError(msg) => write!(f, "Serialization error: {}", msg),
        }
    }
}

impl std::error::Error for QuenchError {}

// Conversion from std::io::Error
impl From<std::io::Error> for QuenchError {
    fn from(err: std::io::Error) -> Self {
        QuenchError::IoError(err.to_string())
    }
}

// Conversion from bincode::Error
impl From<bincode::Error> for QuenchError {
    fn from(err: bincode::Error) -> Self {
        QuenchError::SerializationError(err.to_string())
    }
}

// Helper functions for common error patterns
impl QuenchError {
    pub fn config_validation<S: Into<String>>(field: S, reason: S) -> Self {
        QuenchError::ConfigValidation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn shape_mismatch<S: Into<String>>(expected: S, actual: S) -> Self {
        QuenchError::ShapeMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    pub fn worker_failure<S: Into<String>>(rank: usize, reason: S) -> Self {
        QuenchError::WorkerFailure {
            rank,
            reason: reason.into(),
        }
    }
}
