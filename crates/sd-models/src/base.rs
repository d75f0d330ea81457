//! Core traits and types shared by every analysis
//!
//! An analysis is a unit struct implementing [`Analysis`]; the driver in
//! [`run_analysis`] walks it through validation, coercion and computation
//! and always hands back an [`AnalysisOutput`], never a panic or a bare
//! error.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;
use tracing::{debug, info, warn};

use sd_core::{ErrorAccumulator, ErrorRecord, ResultTable};

pub use coefficient::Coefficient;
pub use input::AnalysisInput;
pub use statistics::{SourceStatistics, source_table};

pub use crate::error::{ModelError, Result};

pub mod coefficient;
pub mod input;
pub mod statistics;

/// Lifecycle of one run; states are only ever entered in this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RunState {
    Created,
    Validating,
    Invalid,
    Coercing,
    AllMissing,
    Computing,
    DoneWithErrors,
    DoneWithResults,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::DoneWithErrors | RunState::DoneWithResults)
    }
}

/// Per-run context handed to `compute`.
///
/// Iterative engines call [`RunContext::check`] between iterations so a
/// caller that gave up on the run (timeout, user abort) stops the work.
#[derive(Debug, Clone, Default)]
pub struct RunContext {
    cancelled: Arc<AtomicBool>,
}

impl RunContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared flag; setting it cancels the run
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// `Err(Cancelled)` once cancellation was requested
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(ModelError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Overall outcome of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Error,
}

/// What a run hands back to its caller
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisOutput {
    pub status: Status,
    #[serde(skip)]
    pub state: RunState,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tables: Vec<ResultTable>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ErrorRecord>,
}

impl AnalysisOutput {
    pub fn success(tables: Vec<ResultTable>) -> Self {
        Self {
            status: Status::Success,
            state: RunState::DoneWithResults,
            tables,
            errors: Vec::new(),
        }
    }

    pub fn failure(state: RunState, errors: ErrorAccumulator) -> Self {
        Self {
            status: Status::Error,
            state,
            tables: Vec::new(),
            errors: errors.into_errors(),
        }
    }

    /// Single-error failure, used outside the lifecycle (bad request, timeout)
    pub fn from_error(error: &ModelError) -> Self {
        let mut errors = ErrorAccumulator::new();
        errors.push(error.to_record());
        Self::failure(RunState::DoneWithErrors, errors)
    }

    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }

    /// Table with the given title, if emitted
    pub fn table(&self, title: &str) -> Option<&ResultTable> {
        self.tables.iter().find(|t| t.title == title)
    }

    /// Every message, newline separated
    pub fn get_all_errors(&self) -> String {
        self.errors
            .iter()
            .map(|e| e.message.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// One analysis family
pub trait Analysis {
    /// Name used in logs and as the request tag
    const NAME: &'static str;

    /// Caller-supplied configuration
    type Config;

    /// Coerced, validated inputs ready for computation
    type Prepared;

    /// Check configuration semantics; every problem is pushed, none returned.
    fn validate(config: &Self::Config, errors: &mut ErrorAccumulator);

    /// Coerce the input blocks. `None` (or any pushed error) stops the run.
    fn prepare(
        input: &AnalysisInput,
        config: &Self::Config,
        errors: &mut ErrorAccumulator,
    ) -> Option<Self::Prepared>;

    /// Run the algorithm
    fn compute(
        prepared: Self::Prepared,
        config: &Self::Config,
        ctx: &RunContext,
    ) -> Result<Vec<ResultTable>>;
}

/// Drive one analysis through its lifecycle.
///
/// `errors` may already hold problems found while parsing the input
/// blocks; they count as validation failures.
pub fn run_analysis<A: Analysis>(
    input: &AnalysisInput,
    config: &A::Config,
    mut errors: ErrorAccumulator,
    ctx: &RunContext,
) -> AnalysisOutput {
    let mut state = RunState::Created;
    debug!(analysis = A::NAME, ?state, "analysis created");

    state = RunState::Validating;
    debug!(analysis = A::NAME, ?state, "validating configuration");
    A::validate(config, &mut errors);
    if !errors.is_empty() {
        state = RunState::Invalid;
        info!(analysis = A::NAME, ?state, errors = errors.len(), "configuration rejected");
        return AnalysisOutput::failure(RunState::DoneWithErrors, errors);
    }

    state = RunState::Coercing;
    debug!(analysis = A::NAME, ?state, cases = input.ncases(), "coercing input");
    if !input.check_blocks(&mut errors) {
        state = RunState::AllMissing;
        info!(analysis = A::NAME, ?state, errors = errors.len(), "empty input block");
        return AnalysisOutput::failure(RunState::DoneWithErrors, errors);
    }
    let prepared = A::prepare(input, config, &mut errors);
    let prepared = match prepared {
        Some(p) if errors.is_empty() => p,
        _ => {
            state = RunState::AllMissing;
            if errors.is_empty() {
                errors.coercion("No valid cases are available for the analysis");
            }
            info!(analysis = A::NAME, ?state, errors = errors.len(), "input rejected");
            return AnalysisOutput::failure(RunState::DoneWithErrors, errors);
        }
    };

    state = RunState::Computing;
    debug!(analysis = A::NAME, ?state, "computing");
    match A::compute(prepared, config, ctx) {
        Ok(tables) => {
            info!(analysis = A::NAME, tables = tables.len(), "analysis finished");
            AnalysisOutput::success(tables)
        }
        Err(err) => {
            warn!(analysis = A::NAME, error = %err, "analysis failed");
            errors.push(err.to_record());
            AnalysisOutput::failure(RunState::DoneWithErrors, errors)
        }
    }
}

#[cfg(test)]
mod tests;
