//! Numeric coercion and filtering
//!
//! Turns a raw column into the clean `(values, weights, total_weight)`
//! triple consumed by every statistic, applying the missing-value
//! classifier, the variable's type and the case weights.

use super::{
    CaseWeights, CellValue, DataError, MissingKind, Result, Variable, VariableType, classify,
    date_to_seconds,
};

/// Parse a number the way a float parser would, after trimming.
/// Non-finite results (`"inf"`, `"NaN"`) are rejected.
pub fn parse_number(input: &str) -> Option<f64> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// A numeric column after filtering
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CoercedColumn {
    /// Valid values in case order
    pub values: Vec<f64>,
    /// Weight paired with each valid value
    pub weights: Vec<f64>,
    /// Sum of included weights (weighted N)
    pub total_weight: f64,
    /// Number of included cases (unweighted N)
    pub valid_n: usize,
    /// Source row of each included value
    pub case_indices: Vec<usize>,
    /// Weight of system-missing or unparseable cases
    pub system_missing: f64,
    /// User-missing values with their weights, in case order
    pub user_missing: Vec<(f64, f64)>,
}

impl CoercedColumn {
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Total weight of missing cases
    pub fn missing_weight(&self) -> f64 {
        self.system_missing + self.user_missing.iter().map(|(_, w)| w).sum::<f64>()
    }
}

/// A string column after filtering
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CoercedLabels {
    pub labels: Vec<String>,
    pub weights: Vec<f64>,
    pub total_weight: f64,
    pub valid_n: usize,
    pub case_indices: Vec<usize>,
    pub system_missing: f64,
    pub user_missing: Vec<(String, f64)>,
}

/// Numeric value of one cell under the variable's type, ignoring missing rules.
pub(crate) fn cell_number(cell: &CellValue, var_type: VariableType) -> Option<f64> {
    match (var_type, cell) {
        (VariableType::String, _) => None,
        (_, CellValue::Null) => None,
        (_, CellValue::Number(v)) => v.is_finite().then_some(*v),
        (VariableType::Numeric, CellValue::Text(s)) => parse_number(s),
        (VariableType::Date, CellValue::Text(s)) => date_to_seconds(s).or_else(|| parse_number(s)),
    }
}

impl Variable {
    /// Valid numeric value of a cell, or `None` when missing or unparseable.
    pub fn coerce_cell(&self, cell: &CellValue) -> Option<f64> {
        if classify(cell, self.missing.as_ref(), self.is_numeric()).is_missing() {
            return None;
        }
        cell_number(cell, self.var_type)
    }
}

/// Coerce a raw column into valid values and weights.
///
/// Cells that fail to parse, are missing, or whose weight is not a
/// positive finite number are excluded from the values and from every
/// weight accumulator.
pub fn coerce_column(cells: &[CellValue], variable: &Variable, weights: &CaseWeights) -> CoercedColumn {
    let mut column = CoercedColumn::default();

    for (i, cell) in cells.iter().enumerate() {
        let Some(w) = weights.get(i) else {
            continue;
        };

        match classify(cell, variable.missing.as_ref(), variable.is_numeric()) {
            MissingKind::SystemMissing => column.system_missing += w,
            MissingKind::UserMissing => match cell_number(cell, variable.var_type) {
                Some(v) => column.user_missing.push((v, w)),
                None => column.system_missing += w,
            },
            MissingKind::Valid => match cell_number(cell, variable.var_type) {
                Some(v) => {
                    column.values.push(v);
                    column.weights.push(w);
                    column.total_weight += w;
                    column.valid_n += 1;
                    column.case_indices.push(i);
                }
                None => column.system_missing += w,
            },
        }
    }

    column
}

/// Coerce a raw column into string categories, used for STRING variables.
pub fn coerce_labels(cells: &[CellValue], variable: &Variable, weights: &CaseWeights) -> CoercedLabels {
    let mut column = CoercedLabels::default();

    for (i, cell) in cells.iter().enumerate() {
        let Some(w) = weights.get(i) else {
            continue;
        };
        match classify(cell, variable.missing.as_ref(), variable.is_numeric()) {
            MissingKind::SystemMissing => column.system_missing += w,
            MissingKind::UserMissing => {
                column
                    .user_missing
                    .push((cell.as_text().unwrap_or_default(), w));
            }
            MissingKind::Valid => {
                column.labels.push(cell.as_text().unwrap_or_default());
                column.weights.push(w);
                column.total_weight += w;
                column.valid_n += 1;
                column.case_indices.push(i);
            }
        }
    }

    column
}

/// Fail with a data error when a required column has no valid values.
pub fn require_non_empty(column: &CoercedColumn, field: &str) -> Result<()> {
    if column.is_empty() {
        return Err(DataError::AllInvalid {
            field: field.to_string(),
        });
    }
    Ok(())
}

/// Case indices valid in every column (listwise deletion), ascending.
pub fn listwise(columns: &[&CoercedColumn]) -> Vec<usize> {
    let Some((first, rest)) = columns.split_first() else {
        return Vec::new();
    };
    first
        .case_indices
        .iter()
        .copied()
        .filter(|case| rest.iter().all(|c| c.case_indices.binary_search(case).is_ok()))
        .collect()
}
