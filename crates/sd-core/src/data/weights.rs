//! Case weights
//!
//! Without a weight variable every case weighs 1. A configured weight
//! variable is coerced like any numeric column; a weight that is missing,
//! zero, negative or not finite drops the case from every weighted
//! aggregate of the run.

use super::{CellValue, Variable, classify};

/// Per-case weights; `None` marks an excluded case.
#[derive(Debug, Clone, PartialEq)]
pub struct CaseWeights {
    weights: Vec<Option<f64>>,
    weighted: bool,
}

impl CaseWeights {
    /// Unit weights for `n` cases
    pub fn unit(n: usize) -> Self {
        Self {
            weights: vec![Some(1.0); n],
            weighted: false,
        }
    }

    /// Weights taken from a weight variable's raw cells
    pub fn from_cells(cells: &[CellValue], variable: &Variable) -> Self {
        let weights = cells
            .iter()
            .map(|cell| {
                if classify(cell, variable.missing.as_ref(), true).is_missing() {
                    return None;
                }
                cell.as_f64().filter(|w| w.is_finite() && *w > 0.0)
            })
            .collect();
        Self {
            weights,
            weighted: true,
        }
    }

    /// Weights from plain numbers, with the same positivity rule
    pub fn from_values(values: &[f64]) -> Self {
        Self {
            weights: values
                .iter()
                .map(|&w| (w.is_finite() && w > 0.0).then_some(w))
                .collect(),
            weighted: true,
        }
    }

    /// Weights from an optional weight column, defaulting to unit weights
    pub fn resolve(cells: Option<(&[CellValue], &Variable)>, n: usize) -> Self {
        match cells {
            Some((cells, variable)) => Self::from_cells(cells, variable),
            None => Self::unit(n),
        }
    }

    /// Weight of case `i`; cases past the end of a weight column are excluded.
    pub fn get(&self, i: usize) -> Option<f64> {
        if self.weighted {
            self.weights.get(i).copied().flatten()
        } else {
            Some(1.0)
        }
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    /// Whether a weight variable is in effect
    pub fn is_weighted(&self) -> bool {
        self.weighted
    }

    /// Sum of usable weights
    pub fn total(&self) -> f64 {
        self.weights.iter().flatten().sum()
    }
}
