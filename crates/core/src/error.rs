//! Error types for vector acceleration
//!
//! One error enum covers the whole subsystem. Validation errors are always
//! returned to the caller; backend errors are surfaced by `sync_to_gpu` and
//! strict accelerator construction, and absorbed everywhere else.

use thiserror::Error;

/// Errors produced by devices, the accelerator and embedding indexes
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AccelError {
    /// Vector length doesn't match the index dimensionality
    #[error("Invalid dimensions: expected {expected}, got {got}")]
    InvalidDimensions {
        /// Dimensionality configured on the index
        expected: usize,
        /// Length of the offending vector
        got: usize,
    },

    /// Index dimensionality is unusable (must be > 0)
    #[error("Invalid dimension: {dimension} (must be > 0)")]
    InvalidDimension {
        /// The rejected dimensionality
        dimension: usize,
    },

    /// Batch insert received a different number of ids and vectors
    #[error("Batch length mismatch: {ids} ids, {vectors} vectors")]
    BatchLengthMismatch {
        /// Number of ids supplied
        ids: usize,
        /// Number of vectors supplied
        vectors: usize,
    },

    /// Hardware variant not compiled in, or no compatible device found
    #[error("Backend not available: {backend} ({reason})")]
    BackendNotAvailable {
        /// Backend name ("cuda", "metal", "opencl", "none")
        backend: String,
        /// Why it is unavailable
        reason: String,
    },

    /// Device or native context could not be created
    #[error("Device creation failed: {0}")]
    DeviceCreation(String),

    /// Device memory allocation or upload failed
    #[error("Buffer creation failed: {0}")]
    BufferCreation(String),

    /// Kernel launch, execution or readback failed
    #[error("Kernel execution failed: {0}")]
    KernelExecution(String),

    /// Buffer is too small or belongs to another backend
    #[error("Invalid buffer: {0}")]
    InvalidBuffer(String),

    /// Configuration could not be read or parsed
    #[error("Config error: {0}")]
    Config(String),
}

impl AccelError {
    /// Shorthand for a `BackendNotAvailable` error
    pub fn not_available(backend: impl Into<String>, reason: impl Into<String>) -> Self {
        AccelError::BackendNotAvailable {
            backend: backend.into(),
            reason: reason.into(),
        }
    }

    /// Check if this error is a caller contract violation
    pub fn is_validation_error(&self) -> bool {
        matches!(
            self,
            AccelError::InvalidDimensions { .. }
                | AccelError::InvalidDimension { .. }
                | AccelError::BatchLengthMismatch { .. }
        )
    }

    /// Check if this error originates from the device layer
    pub fn is_backend_error(&self) -> bool {
        matches!(
            self,
            AccelError::BackendNotAvailable { .. }
                | AccelError::DeviceCreation(_)
                | AccelError::BufferCreation(_)
                | AccelError::KernelExecution(_)
                | AccelError::InvalidBuffer(_)
        )
    }
}

/// Result type alias for acceleration operations
pub type AccelResult<T> = Result<T, AccelError>;
