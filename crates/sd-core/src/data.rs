//! Core data structures for StatDeck
//!
//! This module provides the raw-cell data model handed over by callers
//! (cells, variables, data blocks) together with the missing-value
//! classifier, numeric coercion and the case-weighting layer that every
//! statistic is built on.

mod block;
mod builder;
mod cell;
mod coerce;
mod date;
mod missing;
mod variable;
mod weights;

#[cfg(test)]
mod tests;

// Re-exports
pub use block::{DataBlock, DataMatrix};
pub use builder::{DataBlockBuilder, VariableBuilder};
pub use cell::CellValue;
pub use coerce::{
    CoercedColumn, CoercedLabels, coerce_column, coerce_labels, listwise, parse_number,
    require_non_empty,
};
pub use date::{SPSS_EPOCH, date_to_seconds, seconds_to_date_string};
pub use missing::{MissingKind, classify, is_missing};
pub use variable::{Measure, MissingRange, MissingSpec, Role, ValueLabel, Variable, VariableType};
pub use weights::CaseWeights;

/// Error types specific to data operations
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum DataError {
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: String, actual: String },

    #[error("Variable '{0}' not found")]
    VariableNotFound(String),

    #[error("Column index {index} out of bounds for row of length {len}")]
    ColumnOutOfBounds { index: usize, len: usize },

    #[error("Duplicate variable name: {0}")]
    DuplicateVariable(String),

    #[error("Duplicate column index: {0}")]
    DuplicateColumnIndex(usize),

    #[error("Failed to parse {block} data")]
    Parse { block: String },

    #[error("{field} contains all null/invalid values")]
    AllInvalid { field: String },

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
}

/// Result type for data operations
pub type Result<T> = std::result::Result<T, DataError>;
