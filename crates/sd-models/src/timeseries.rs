//! Time-series engines
//!
//! Autocorrelation, seasonal decomposition and exponential smoothing over
//! evenly spaced series. Each selected variable is one series; cases are
//! taken in input order and case weights do not apply.

use sd_core::ErrorAccumulator;
use sd_core::data::{MissingKind, classify};

use crate::base::AnalysisInput;

pub mod acf;
pub mod decomposition;
pub mod smoothing;


pub use acf::{Autocorrelation, AutocorrelationConfig, StandardErrorMethod};
pub use decomposition::{
    Decomposed, Decomposition, DecompositionConfig, DecompositionModel, MovingAverage, decompose,
};
pub use smoothing::{
    ExponentialSmoothing, SmoothingConfig, SmoothingModel, SmoothingParameter,
};

/// Time specification of an undated series
pub const NOT_DATED: &str = "Not Dated";

pub(crate) fn is_not_dated(time_spec: Option<&str>) -> bool {
    time_spec.is_some_and(|s| s.trim().eq_ignore_ascii_case(NOT_DATED))
}

/// Seasonal period when one is usable
pub(crate) fn seasonal_period(periodicity: Option<u32>) -> Option<usize> {
    periodicity.filter(|p| *p >= 2).map(|p| p as usize)
}

/// One variable's valid run of observations
#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    pub name: String,
    pub label: String,
    pub values: Vec<f64>,
    /// Case index of the first value
    pub start: usize,
    /// Cases in the input column
    pub length: usize,
    pub user_missing: usize,
    pub system_missing: usize,
}

impl Series {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Case number (1-based) of the `i`-th value
    pub fn case_number(&self, i: usize) -> usize {
        self.start + i + 1
    }
}

/// Load the named variables as series. Leading and trailing missing values
/// are trimmed; a gap inside the series is a data error.
pub(crate) fn load_series(
    input: &AnalysisInput,
    names: &[String],
    errors: &mut ErrorAccumulator,
) -> Vec<Series> {
    let mut series = Vec::new();
    for (variable, cells) in input.resolve(names, errors) {
        if !variable.is_numeric() {
            errors.coercion(format!("Variable '{}' is not numeric", variable.name));
            continue;
        }

        let mut user_missing = 0;
        let mut system_missing = 0;
        let values: Vec<Option<f64>> = cells
            .iter()
            .map(|cell| {
                match classify(cell, variable.missing.as_ref(), variable.is_numeric()) {
                    MissingKind::UserMissing => user_missing += 1,
                    MissingKind::SystemMissing => system_missing += 1,
                    MissingKind::Valid => {}
                }
                variable.coerce_cell(cell)
            })
            .collect();

        let Some(first) = values.iter().position(Option::is_some) else {
            errors.coercion(format!("Variable '{}' has no valid values", variable.name));
            continue;
        };
        let last = values.iter().rposition(Option::is_some).unwrap_or(first);
        let run: Option<Vec<f64>> = values[first..=last].iter().copied().collect();
        let Some(run) = run else {
            errors.coercion(format!(
                "Variable '{}' has missing values inside the series",
                variable.name
            ));
            continue;
        };

        series.push(Series {
            name: variable.name.clone(),
            label: variable.display_name().to_string(),
            values: run,
            start: first,
            length: cells.len(),
            user_missing,
            system_missing,
        });
    }
    series
}

/// `ln x`; `None` when any value is not positive
pub fn natural_log(values: &[f64]) -> Option<Vec<f64>> {
    values
        .iter()
        .map(|&v| (v > 0.0).then(|| v.ln()))
        .collect()
}

/// Apply `times` rounds of lag-`lag` differencing
pub fn difference(values: &[f64], lag: usize, times: u32) -> Vec<f64> {
    let mut out = values.to_vec();
    for _ in 0..times {
        if out.len() <= lag {
            return Vec::new();
        }
        out = (lag..out.len()).map(|t| out[t] - out[t - lag]).collect();
    }
    out
}
