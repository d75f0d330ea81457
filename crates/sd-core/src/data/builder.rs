//! Builder pattern for constructing variables and data blocks

use indexmap::IndexMap;

use super::*;

/// Builder for creating Variables
pub struct VariableBuilder {
    variable: Variable,
}

impl VariableBuilder {
    /// Start a numeric scale variable
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            variable: Variable::numeric(0, name),
        }
    }

    /// Set the column index
    pub fn column(mut self, column_index: usize) -> Self {
        self.variable.column_index = column_index;
        self
    }

    /// Mark as a string variable
    pub fn string(mut self) -> Self {
        self.variable.var_type = VariableType::String;
        self.variable.measure = Measure::Nominal;
        self
    }

    /// Mark as a date variable
    pub fn date(mut self) -> Self {
        self.variable.var_type = VariableType::Date;
        self
    }

    /// Set the level of measurement
    pub fn measure(mut self, measure: Measure) -> Self {
        self.variable.measure = measure;
        self
    }

    /// Set the label
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.variable.label = label.into();
        self
    }

    /// Set the number of decimals
    pub fn decimals(mut self, decimals: u32) -> Self {
        self.variable.decimals = decimals;
        self
    }

    /// Set the missing-value specification
    pub fn missing(mut self, spec: MissingSpec) -> Self {
        self.variable.missing = Some(spec);
        self
    }

    /// Attach a value label
    pub fn value_label(mut self, value: impl Into<CellValue>, label: impl Into<String>) -> Self {
        self.variable.values.push(ValueLabel {
            value: value.into(),
            label: label.into(),
        });
        self
    }

    /// Build the Variable
    pub fn build(self) -> Variable {
        self.variable
    }
}

/// Builder for creating DataBlocks
pub struct DataBlockBuilder {
    name: String,
    columns: IndexMap<String, (Variable, Vec<CellValue>)>,
    ncases: Option<usize>,
}

impl DataBlockBuilder {
    /// Create a new DataBlockBuilder
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: IndexMap::new(),
            ncases: None,
        }
    }

    /// Add a variable with its raw cells
    pub fn with_column<I, C>(mut self, variable: Variable, cells: I) -> Result<Self>
    where
        I: IntoIterator<Item = C>,
        C: Into<CellValue>,
    {
        if self.columns.contains_key(&variable.name) {
            return Err(DataError::DuplicateVariable(variable.name));
        }
        if self
            .columns
            .values()
            .any(|(v, _)| v.column_index == variable.column_index)
        {
            return Err(DataError::DuplicateColumnIndex(variable.column_index));
        }

        let cells: Vec<CellValue> = cells.into_iter().map(Into::into).collect();

        // Check dimension consistency
        match self.ncases {
            Some(n) if cells.len() != n => {
                return Err(DataError::DimensionMismatch {
                    expected: format!("{} cases", n),
                    actual: format!("{} cases", cells.len()),
                });
            }
            None => {
                self.ncases = Some(cells.len());
            }
            _ => {}
        }

        self.columns.insert(variable.name.clone(), (variable, cells));
        Ok(self)
    }

    /// Add a numeric column; the column index follows insertion order
    pub fn with_numeric<I>(self, name: &str, values: I) -> Result<Self>
    where
        I: IntoIterator<Item = Option<f64>>,
    {
        let index = self.columns.len();
        self.with_column(Variable::numeric(index, name), values)
    }

    /// Build the DataBlock
    pub fn build(self) -> DataBlock {
        DataBlock {
            name: self.name,
            columns: self.columns,
            ncases: self.ncases.unwrap_or(0),
        }
    }
}
