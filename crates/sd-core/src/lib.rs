//! StatDeck core
//!
//! Data model, missing-value semantics, numeric coercion, case weighting,
//! descriptive statistics, frequency tables and result tables shared by
//! every analysis engine in `sd-models`.

pub mod data;
pub mod error;
pub mod logging;
pub mod stats;
pub mod table;

pub use error::{CoreError, ErrorAccumulator, ErrorRecord, ErrorStage, Result};
pub use table::{ColumnHeader, ResultTable, TableRow};
