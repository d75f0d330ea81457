use serde::{Deserialize, Serialize};
use std::fmt;

use crate::data::DataError;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum CoreError {
    #[error("Data error: {0}")]
    Data(#[from] DataError),

    #[error("Statistical error: {0}")]
    Stats(String),

    #[error("Result table error: {0}")]
    Table(String),
}

/// Result type for crate-level operations
pub type Result<T> = std::result::Result<T, CoreError>;

/// Pipeline stage an error was raised in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorStage {
    Validation,
    Coercion,
    Computation,
}

impl fmt::Display for ErrorStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorStage::Validation => write!(f, "validation"),
            ErrorStage::Coercion => write!(f, "coercion"),
            ErrorStage::Computation => write!(f, "computation"),
        }
    }
}

/// One reported failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub stage: ErrorStage,
    pub message: String,
}

impl ErrorRecord {
    pub fn new(stage: ErrorStage, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorStage::Validation, message)
    }

    pub fn coercion(message: impl Into<String>) -> Self {
        Self::new(ErrorStage::Coercion, message)
    }

    pub fn computation(message: impl Into<String>) -> Self {
        Self::new(ErrorStage::Computation, message)
    }
}

impl fmt::Display for ErrorRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Ordered collection of every failure of one analysis run.
///
/// Validators push into it instead of returning on the first problem, so
/// callers can show all issues at once.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorAccumulator {
    errors: Vec<ErrorRecord>,
}

impl ErrorAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: ErrorRecord) {
        tracing::debug!(stage = %record.stage, message = %record.message, "analysis error recorded");
        self.errors.push(record);
    }

    pub fn validation(&mut self, message: impl Into<String>) {
        self.push(ErrorRecord::validation(message));
    }

    pub fn coercion(&mut self, message: impl Into<String>) {
        self.push(ErrorRecord::coercion(message));
    }

    pub fn computation(&mut self, message: impl Into<String>) {
        self.push(ErrorRecord::computation(message));
    }

    /// Record a validation error when `condition` is false
    pub fn check(&mut self, condition: bool, message: impl Into<String>) {
        if !condition {
            self.validation(message);
        }
    }

    pub fn extend(&mut self, other: ErrorAccumulator) {
        for record in other.errors {
            self.push(record);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn errors(&self) -> &[ErrorRecord] {
        &self.errors
    }

    pub fn into_errors(self) -> Vec<ErrorRecord> {
        self.errors
    }

    pub fn first_error(&self) -> Option<&ErrorRecord> {
        self.errors.first()
    }

    /// Every message, newline separated
    pub fn get_all_errors(&self) -> String {
        self.errors
            .iter()
            .map(|e| e.message.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn clear_errors(&mut self) {
        self.errors.clear();
    }

    /// Whether any error was raised in the given stage
    pub fn has_stage(&self, stage: ErrorStage) -> bool {
        self.errors.iter().any(|e| e.stage == stage)
    }
}
