//! Model-related error types

use thiserror::Error;

use sd_core::data::DataError;
use sd_core::{ErrorRecord, ErrorStage};

/// Model-related errors
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ModelError {
    /// Configuration rejected before any data is touched
    #[error("{message}")]
    InvalidConfig {
        /// User-facing message
        message: String,
    },

    /// Data-related error
    #[error("{0}")]
    Data(#[from] DataError),

    /// A named input block has no usable cells
    #[error("{block} contains all null values")]
    AllMissing {
        /// Block name, e.g. `dependent`
        block: String,
    },

    /// Model expression could not be parsed
    #[error("Expression error at position {position}: {message}")]
    Expression {
        /// Character offset into the expression
        position: usize,
        /// What went wrong
        message: String,
    },

    /// Numerical computation error
    #[error("Numerical error: {message} (operation: {operation})")]
    NumericalError {
        /// Error message
        message: String,
        /// Operation that failed
        operation: String,
    },

    /// Insufficient data for model fitting
    #[error("Not enough data: {n_samples} cases for {n_predictors} parameters")]
    InsufficientData {
        /// Number of usable cases
        n_samples: usize,
        /// Number of parameters
        n_predictors: usize,
    },

    /// Model fitting failed to converge
    #[error("Failed to converge after {max_iter} iterations")]
    NotConverged {
        /// Maximum number of iterations attempted
        max_iter: usize,
    },

    /// A design term is linearly dependent on earlier terms
    #[error("Design matrix is rank deficient: term '{term}' is aliased with other terms")]
    Aliased {
        /// Offending term
        term: String,
    },

    /// Cooperative cancellation was observed
    #[error("Analysis cancelled")]
    Cancelled,

    /// The pool gave up waiting for the run
    #[error("Analysis timed out after {seconds:.1} seconds")]
    TimedOut {
        /// Timeout that elapsed
        seconds: f64,
    },

    /// Custom error
    #[error("{message}")]
    Custom {
        /// Custom error message
        message: String,
    },
}

impl ModelError {
    pub fn invalid(message: impl Into<String>) -> Self {
        ModelError::InvalidConfig {
            message: message.into(),
        }
    }

    pub fn numerical(message: impl Into<String>, operation: impl Into<String>) -> Self {
        ModelError::NumericalError {
            message: message.into(),
            operation: operation.into(),
        }
    }

    pub fn custom(message: impl Into<String>) -> Self {
        ModelError::Custom {
            message: message.into(),
        }
    }

    /// Stage the error is reported under
    pub fn stage(&self) -> ErrorStage {
        match self {
            ModelError::InvalidConfig { .. } | ModelError::Expression { .. } => {
                ErrorStage::Validation
            }
            // structurally broken blocks are configuration problems
            ModelError::Data(DataError::Parse { .. }) => ErrorStage::Validation,
            ModelError::Data(_) | ModelError::AllMissing { .. } => ErrorStage::Coercion,
            _ => ErrorStage::Computation,
        }
    }

    pub fn to_record(&self) -> ErrorRecord {
        ErrorRecord::new(self.stage(), self.to_string())
    }
}

/// Result type for model operations
pub type Result<T> = std::result::Result<T, ModelError>;
