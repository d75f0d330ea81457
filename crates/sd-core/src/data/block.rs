//! Data matrices and named input blocks
//!
//! A `DataMatrix` is the caller's immutable row snapshot addressed by
//! column index. A `DataBlock` is one named input of an analysis
//! (dependent, factor, covariate, weight, ...) holding its variable
//! definitions and one raw column per variable.

use indexmap::IndexMap;
use serde_json::Value;
use std::collections::HashSet;

use super::{CellValue, DataError, Result, Variable, classify};

/// Row-major snapshot of raw cells
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DataMatrix {
    rows: Vec<Vec<CellValue>>,
}

impl DataMatrix {
    pub fn new(rows: Vec<Vec<CellValue>>) -> Self {
        Self { rows }
    }

    pub fn nrows(&self) -> usize {
        self.rows.len()
    }

    pub fn rows(&self) -> &[Vec<CellValue>] {
        &self.rows
    }

    /// Raw cells of one column; short rows yield system-missing cells.
    pub fn column(&self, column_index: usize) -> Vec<CellValue> {
        self.rows
            .iter()
            .map(|row| row.get(column_index).cloned().unwrap_or_default())
            .collect()
    }
}

/// One named input block of an analysis
#[derive(Debug, Clone, PartialEq)]
pub struct DataBlock {
    pub(crate) name: String,
    pub(crate) columns: IndexMap<String, (Variable, Vec<CellValue>)>,
    pub(crate) ncases: usize,
}

impl DataBlock {
    /// An empty block (no variables selected)
    pub fn empty(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: IndexMap::new(),
            ncases: 0,
        }
    }

    /// Build a block from a matrix snapshot and the variables to extract.
    pub fn from_matrix(
        name: impl Into<String>,
        matrix: &DataMatrix,
        variables: &[Variable],
    ) -> Result<Self> {
        check_unique(variables)?;
        let columns = variables
            .iter()
            .map(|v| (v.name.clone(), (v.clone(), matrix.column(v.column_index))))
            .collect();
        Ok(Self {
            name: name.into(),
            columns,
            ncases: matrix.nrows(),
        })
    }

    /// Parse a block from the caller's JSON: `rows` is an array of objects
    /// keyed by variable name (or arrays addressed by column index) and
    /// `variables` an array of variable definitions.
    pub fn from_json(name: impl Into<String>, rows: &Value, variables: &Value) -> Result<Self> {
        let name = name.into();
        let parse_error = || DataError::Parse {
            block: name.clone(),
        };

        let variables: Vec<Variable> = match variables {
            Value::Null => Vec::new(),
            other => serde_json::from_value(other.clone()).map_err(|_| parse_error())?,
        };
        check_unique(&variables)?;

        let no_rows = Vec::new();
        let rows = match rows {
            Value::Null => &no_rows,
            Value::Array(rows) => rows,
            _ => return Err(parse_error()),
        };

        let mut columns: IndexMap<String, (Variable, Vec<CellValue>)> = variables
            .iter()
            .map(|v| (v.name.clone(), (v.clone(), Vec::with_capacity(rows.len()))))
            .collect();

        for row in rows {
            for (var_name, (variable, cells)) in columns.iter_mut() {
                let raw = match row {
                    Value::Object(map) => map.get(var_name.as_str()).unwrap_or(&Value::Null),
                    Value::Array(items) => items.get(variable.column_index).unwrap_or(&Value::Null),
                    _ => return Err(parse_error()),
                };
                cells.push(CellValue::from_json(raw).ok_or_else(parse_error)?);
            }
        }

        Ok(Self {
            name,
            columns,
            ncases: rows.len(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of cases (rows)
    pub fn ncases(&self) -> usize {
        self.ncases
    }

    /// Number of variables
    pub fn nvars(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn variables(&self) -> impl Iterator<Item = &Variable> {
        self.columns.values().map(|(v, _)| v)
    }

    pub fn variable(&self, name: &str) -> Option<&Variable> {
        self.columns.get(name).map(|(v, _)| v)
    }

    pub fn column(&self, name: &str) -> Option<&[CellValue]> {
        self.columns.get(name).map(|(_, c)| c.as_slice())
    }

    /// Variable and raw cells for a name, or a lookup error
    pub fn get(&self, name: &str) -> Result<(&Variable, &[CellValue])> {
        self.columns
            .get(name)
            .map(|(v, c)| (v, c.as_slice()))
            .ok_or_else(|| DataError::VariableNotFound(name.to_string()))
    }

    /// Variables with their raw cells, in definition order
    pub fn iter(&self) -> impl Iterator<Item = (&Variable, &[CellValue])> {
        self.columns.values().map(|(v, c)| (v, c.as_slice()))
    }

    /// First variable of the block, for single-variable inputs
    pub fn first(&self) -> Option<(&Variable, &[CellValue])> {
        self.iter().next()
    }

    /// `true` when no column holds a single valid cell: every cell is
    /// system-missing, user-missing or (for numeric types) unparseable
    pub fn all_null(&self) -> bool {
        self.columns.values().all(|(variable, cells)| {
            cells.iter().all(|c| {
                if variable.is_numeric() {
                    variable.coerce_cell(c).is_none()
                } else {
                    classify(c, variable.missing.as_ref(), false).is_missing()
                }
            })
        })
    }
}

pub(crate) fn check_unique(variables: &[Variable]) -> Result<()> {
    let mut names = HashSet::new();
    let mut indices = HashSet::new();
    for v in variables {
        if !names.insert(v.name.as_str()) {
            return Err(DataError::DuplicateVariable(v.name.clone()));
        }
        if !indices.insert(v.column_index) {
            return Err(DataError::DuplicateColumnIndex(v.column_index));
        }
    }
    Ok(())
}
