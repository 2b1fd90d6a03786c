//! Error types for TCU driver operations

use thiserror::Error;

/// Result type alias for TCU operations
pub type Result<T> = std::result::Result<T, TcuError>;

/// Errors that can occur during TCU operations
#[derive(Debug, Error)]
pub enum TcuError {
    /// No free span can hold the requested allocation
    #[error("Cannot allocate {size} elements\n{table}")]
    Allocation {
        /// Requested size in elements
        size: usize,
        /// Allocation table at the time of failure
        table: String,
    },

    /// Argument outside its valid domain
    #[error("Invalid argument: {reason}")]
    InvalidArgument {
        /// What was wrong
        reason: String,
    },

    /// Element type does not match the memory view's scalar type
    #[error("Type mismatch: expected {expected}-byte scalars, got {found}-byte")]
    TypeMismatch {
        /// Scalar size of the view
        expected: usize,
        /// Scalar size supplied
        found: usize,
    },

    /// Byte access not aligned to the scalar size
    #[error("Alignment error: {reason}")]
    Alignment {
        /// What was misaligned
        reason: String,
    },

    /// Model compiled for a different architecture
    #[error("Architecture mismatch: driver has {expected}, model was compiled for {found}")]
    ArchitectureMismatch {
        /// Driver architecture
        expected: String,
        /// Model architecture
        found: String,
    },

    /// `run` called before `load_model`
    #[error("No model loaded")]
    ModelNotLoaded,

    /// A declared input variable was not supplied
    #[error("No data supplied for variable '{name}'")]
    UnknownVariable {
        /// Variable name
        name: String,
    },

    /// Requested size exceeds a hard limit
    #[error("Capacity exceeded: requested {requested}, maximum {max}")]
    CapacityExceeded {
        /// Requested size
        requested: usize,
        /// Largest allowed size
        max: usize,
    },

    /// Polling gave up before the condition held
    #[error("Operation timeout after {polls} polls")]
    Timeout {
        /// Polls performed
        polls: u64,
    },

    /// Object is in the wrong state for the operation
    #[error("Invalid state: {state}")]
    InvalidState {
        /// Current state description
        state: String,
    },

    /// DMA transfer failed
    #[error("Transfer failed: {reason}")]
    TransferFailed {
        /// Reason for failure
        reason: String,
    },

    /// Model manifest could not be parsed
    #[error("Malformed model manifest: {source}")]
    Manifest {
        /// Underlying parse error
        #[from]
        source: serde_json::Error,
    },

    /// I/O error
    #[error("I/O error: {source}")]
    Io {
        /// Underlying I/O error
        #[from]
        source: std::io::Error,
    },
}

impl TcuError {
    /// Create an invalid argument error
    pub fn invalid_argument(reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            reason: reason.into(),
        }
    }

    /// Create an alignment error
    pub fn alignment(reason: impl Into<String>) -> Self {
        Self::Alignment {
            reason: reason.into(),
        }
    }

    /// Create an invalid state error
    pub fn invalid_state(state: impl Into<String>) -> Self {
        Self::InvalidState {
            state: state.into(),
        }
    }

    /// Create a transfer failed error
    pub fn transfer_failed(reason: impl Into<String>) -> Self {
        Self::TransferFailed {
            reason: reason.into(),
        }
    }

    /// Create an unknown variable error
    pub fn unknown_variable(name: impl Into<String>) -> Self {
        Self::UnknownVariable { name: name.into() }
    }
}
