//! Named input blocks of one run

use indexmap::IndexMap;
use serde_json::Value;

use sd_core::ErrorAccumulator;
use sd_core::data::{
    CaseWeights, CellValue, CoercedColumn, DataBlock, DataError, Variable, coerce_column,
};

use crate::error::{ModelError, Result};

/// The data blocks (`dependent`, `factor`, `target`, ...) of one run plus
/// the optional frequency-weight variable.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnalysisInput {
    blocks: IndexMap<String, DataBlock>,
    weight: Option<String>,
}

impl AnalysisInput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) a block
    pub fn with_block(mut self, block: DataBlock) -> Self {
        self.blocks.insert(block.name().to_string(), block);
        self
    }

    /// Weight cases by the named variable
    pub fn with_weight(mut self, variable: impl Into<String>) -> Self {
        self.weight = Some(variable.into());
        self
    }

    /// Parse the caller's `{name -> rows}` and `{name -> variables}` maps.
    ///
    /// A block that fails to parse is skipped and reported, tagged with its
    /// name, so every malformed block shows up in one run.
    pub fn from_json(
        data: &IndexMap<String, Value>,
        variables: &IndexMap<String, Value>,
        weight: Option<String>,
        errors: &mut ErrorAccumulator,
    ) -> Self {
        let mut names: Vec<&String> = data.keys().collect();
        names.extend(variables.keys().filter(|k| !data.contains_key(*k)));

        let mut input = Self {
            blocks: IndexMap::new(),
            weight,
        };
        for name in names {
            let rows = data.get(name).unwrap_or(&Value::Null);
            let defs = variables.get(name).unwrap_or(&Value::Null);
            match DataBlock::from_json(name.as_str(), rows, defs) {
                Ok(block) => {
                    input.blocks.insert(name.clone(), block);
                }
                Err(err) => errors.push(ModelError::Data(err).to_record()),
            }
        }

        if let Err(err) = input.check_case_counts() {
            errors.push(err.to_record());
        }
        input
    }

    pub fn block(&self, name: &str) -> Option<&DataBlock> {
        self.blocks.get(name)
    }

    pub fn blocks(&self) -> impl Iterator<Item = &DataBlock> {
        self.blocks.values()
    }

    /// Case count shared by the blocks that define variables
    pub fn ncases(&self) -> usize {
        self.blocks
            .values()
            .filter(|b| b.nvars() > 0)
            .map(DataBlock::ncases)
            .max()
            .unwrap_or(0)
    }

    /// Blocks that define variables must agree on the number of cases
    pub fn check_case_counts(&self) -> Result<()> {
        let mut counts = self.blocks.values().filter(|b| b.nvars() > 0);
        let Some(first) = counts.next() else {
            return Ok(());
        };
        match counts.find(|b| b.ncases() != first.ncases()) {
            Some(other) => Err(ModelError::Data(DataError::DimensionMismatch {
                expected: format!("{} cases in {}", first.ncases(), first.name()),
                actual: format!("{} cases in {}", other.ncases(), other.name()),
            })),
            None => Ok(()),
        }
    }

    /// First block defining `name`
    pub fn lookup(&self, name: &str) -> Option<(&Variable, &[CellValue])> {
        self.blocks.values().find_map(|b| b.get(name).ok())
    }

    pub fn require(&self, name: &str) -> Result<(&Variable, &[CellValue])> {
        self.lookup(name)
            .ok_or_else(|| ModelError::Data(DataError::VariableNotFound(name.to_string())))
    }

    /// Frequency weights, unit when no weight variable is configured
    pub fn case_weights(&self) -> Result<CaseWeights> {
        match &self.weight {
            Some(name) => {
                let (variable, cells) = self.require(name)?;
                Ok(CaseWeights::from_cells(cells, variable))
            }
            None => Ok(CaseWeights::unit(self.ncases())),
        }
    }

    /// Coerce a named variable under the given weights
    pub fn column(&self, name: &str, weights: &CaseWeights) -> Result<CoercedColumn> {
        let (variable, cells) = self.require(name)?;
        Ok(coerce_column(cells, variable, weights))
    }

    /// Record an error when the named block exists and holds only nulls.
    /// Returns `true` when the block is usable (or absent).
    pub fn check_not_all_null(&self, block: &str, errors: &mut ErrorAccumulator) -> bool {
        match self.blocks.get(block) {
            Some(b) if b.nvars() > 0 && b.all_null() => {
                errors.push(
                    ModelError::AllMissing {
                        block: block.to_string(),
                    }
                    .to_record(),
                );
                false
            }
            _ => true,
        }
    }

    /// Check every block that defines variables, recording one error per
    /// block with no valid cell. Returns `true` when all blocks are usable.
    pub fn check_blocks(&self, errors: &mut ErrorAccumulator) -> bool {
        let mut usable = true;
        for name in self.blocks.keys() {
            usable &= self.check_not_all_null(name, errors);
        }
        usable
    }

    /// Resolve a list of variable names, recording every unknown one
    pub fn resolve<'a>(
        &'a self,
        names: &[String],
        errors: &mut ErrorAccumulator,
    ) -> Vec<(&'a Variable, &'a [CellValue])> {
        let mut found = Vec::with_capacity(names.len());
        for name in names {
            match self.require(name) {
                Ok(column) => found.push(column),
                Err(err) => errors.push(err.to_record()),
            }
        }
        found
    }
}
