//! Cases, factor levels, model terms and design matrices

use std::cmp::Ordering;
use std::ops::Range;

use nalgebra::{DMatrix, DVector};

use sd_core::ErrorAccumulator;
use sd_core::data::{CellValue, Variable, classify};

use super::config::{GlmConfig, split_term};
use crate::base::AnalysisInput;

// ==================== Cases ====================

#[derive(Debug, Clone, PartialEq)]
enum LevelKey {
    Number(f64),
    Text(String),
}

impl LevelKey {
    fn compare(&self, other: &LevelKey) -> Ordering {
        match (self, other) {
            (LevelKey::Number(a), LevelKey::Number(b)) => a.total_cmp(b),
            (LevelKey::Text(a), LevelKey::Text(b)) => a.cmp(b),
            (LevelKey::Number(_), LevelKey::Text(_)) => Ordering::Less,
            (LevelKey::Text(_), LevelKey::Number(_)) => Ordering::Greater,
        }
    }
}

/// One level of a factor
#[derive(Debug, Clone, PartialEq)]
pub struct Level {
    /// Value as printed in parameter names, e.g. `2`
    pub value: String,
    /// Value label when the variable defines one
    pub label: Option<String>,
    key: LevelKey,
}

impl Level {
    /// Label when defined, otherwise the value
    pub fn display(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.value)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Factor {
    pub name: String,
    pub label: String,
    /// Observed levels in ascending order
    pub levels: Vec<Level>,
    pub random: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Covariate {
    pub name: String,
    /// Case-weighted mean over the analysed cases
    pub mean: f64,
}

/// Complete cases of a GLM run
#[derive(Debug, Clone, PartialEq)]
pub struct GlmData {
    pub dependent: String,
    pub y: Vec<f64>,
    /// Frequency weights
    pub case_weights: Vec<f64>,
    /// Frequency weight times WLS weight
    pub fit_weights: Vec<f64>,
    pub factors: Vec<Factor>,
    /// `codes[factor][case]` is the level index of the case
    pub codes: Vec<Vec<usize>>,
    pub covariates: Vec<Covariate>,
    pub covariate_values: Vec<Vec<f64>>,
}

impl GlmData {
    pub fn ncases(&self) -> usize {
        self.y.len()
    }

    /// Weighted N
    pub fn total_weight(&self) -> f64 {
        self.case_weights.iter().sum()
    }

    pub fn factor_index(&self, name: &str) -> Option<usize> {
        self.factors.iter().position(|f| f.name == name)
    }

    pub fn covariate_index(&self, name: &str) -> Option<usize> {
        self.covariates.iter().position(|c| c.name == name)
    }

    pub fn y_vector(&self) -> DVector<f64> {
        DVector::from_column_slice(&self.y)
    }

    pub fn weight_vector(&self) -> DVector<f64> {
        DVector::from_column_slice(&self.fit_weights)
    }
}

fn level_key(variable: &Variable, cell: &CellValue) -> Option<LevelKey> {
    if variable.is_numeric() {
        return variable.coerce_cell(cell).map(LevelKey::Number);
    }
    if classify(cell, variable.missing.as_ref(), false).is_missing() {
        return None;
    }
    cell.as_text().map(LevelKey::Text)
}

fn make_level(variable: &Variable, key: LevelKey) -> Level {
    match &key {
        LevelKey::Number(v) => {
            let value = if v.fract() == 0.0 {
                format!("{}", *v as i64)
            } else {
                format!("{:.*}", variable.decimals as usize, v)
            };
            Level {
                value,
                label: variable.value_label(*v).map(str::to_string),
                key,
            }
        }
        LevelKey::Text(s) => Level {
            value: s.clone(),
            label: variable.text_label(s).map(str::to_string),
            key,
        },
    }
}

/// Coerce the dependent variable, factors, covariates and weights and keep
/// the cases valid in all of them.
pub(super) fn prepare_data(
    input: &AnalysisInput,
    config: &GlmConfig,
    errors: &mut ErrorAccumulator,
) -> Option<GlmData> {
    let main = &config.main;
    let weights = match input.case_weights() {
        Ok(w) => Some(w),
        Err(err) => {
            errors.push(err.to_record());
            None
        }
    };

    let dependent = main
        .dependent
        .as_deref()
        .and_then(|name| input.resolve(&[name.to_string()], errors).pop());
    let factors = input.resolve(&main.factors().cloned().collect::<Vec<_>>(), errors);
    let covariates = input.resolve(&main.covar, errors);
    let wls = main
        .wls_weight
        .as_deref()
        .and_then(|name| input.resolve(&[name.to_string()], errors).pop());

    for (variable, _) in dependent.iter().chain(&covariates).chain(&wls) {
        if !variable.is_numeric() {
            errors.coercion(format!("Variable '{}' is not numeric", variable.name));
        }
    }
    let (Some(weights), Some((dep_var, dep_cells))) = (weights, dependent) else {
        return None;
    };
    if !errors.is_empty() {
        return None;
    }

    let mut y = Vec::new();
    let mut case_weights = Vec::new();
    let mut fit_weights = Vec::new();
    let mut keys: Vec<Vec<LevelKey>> = vec![Vec::new(); factors.len()];
    let mut covariate_values: Vec<Vec<f64>> = vec![Vec::new(); covariates.len()];

    'cases: for case in 0..input.ncases() {
        let Some(w) = weights.get(case) else {
            continue;
        };
        let Some(value) = dep_cells.get(case).and_then(|c| dep_var.coerce_cell(c)) else {
            continue;
        };
        let wls_w = match &wls {
            Some((var, cells)) => {
                match cells.get(case).and_then(|c| var.coerce_cell(c)) {
                    Some(v) if v > 0.0 => v,
                    _ => continue,
                }
            }
            None => 1.0,
        };

        let mut case_keys = Vec::with_capacity(factors.len());
        for (var, cells) in &factors {
            match cells.get(case).and_then(|c| level_key(var, c)) {
                Some(k) => case_keys.push(k),
                None => continue 'cases,
            }
        }
        let mut case_covs = Vec::with_capacity(covariates.len());
        for (var, cells) in &covariates {
            match cells.get(case).and_then(|c| var.coerce_cell(c)) {
                Some(v) => case_covs.push(v),
                None => continue 'cases,
            }
        }

        y.push(value);
        case_weights.push(w);
        fit_weights.push(w * wls_w);
        for (dst, k) in keys.iter_mut().zip(case_keys) {
            dst.push(k);
        }
        for (dst, v) in covariate_values.iter_mut().zip(case_covs) {
            dst.push(v);
        }
    }

    if y.is_empty() {
        return None;
    }

    let n_fixed = main.fix_factor.len();
    let mut factor_defs = Vec::with_capacity(factors.len());
    let mut codes = Vec::with_capacity(factors.len());
    for (i, ((var, _), case_keys)) in factors.iter().zip(&keys).enumerate() {
        let mut distinct: Vec<LevelKey> = case_keys.clone();
        distinct.sort_by(|a, b| a.compare(b));
        distinct.dedup_by(|a, b| a.compare(b) == Ordering::Equal);
        codes.push(
            case_keys
                .iter()
                .map(|k| {
                    distinct
                        .binary_search_by(|level| level.compare(k))
                        .unwrap_or_default()
                })
                .collect(),
        );
        factor_defs.push(Factor {
            name: var.name.clone(),
            label: var.display_name().to_string(),
            levels: distinct.into_iter().map(|k| make_level(var, k)).collect(),
            random: i >= n_fixed,
        });
    }

    let total: f64 = case_weights.iter().sum();
    let covariate_defs = covariates
        .iter()
        .zip(&covariate_values)
        .map(|((var, _), values)| Covariate {
            name: var.name.clone(),
            mean: values.iter().zip(&case_weights).map(|(v, w)| v * w).sum::<f64>() / total,
        })
        .collect();

    Some(GlmData {
        dependent: dep_var.display_name().to_string(),
        y,
        case_weights,
        fit_weights,
        factors: factor_defs,
        codes,
        covariates: covariate_defs,
        covariate_values,
    })
}

// ==================== Terms ====================

/// A main effect or interaction of factors and covariates
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Term {
    /// Factor indices, ascending
    pub factors: Vec<usize>,
    /// Covariate indices, ascending
    pub covariates: Vec<usize>,
}

impl Term {
    pub fn order(&self) -> usize {
        self.factors.len() + self.covariates.len()
    }

    /// `self` is a different, higher-order term including every variable of `inner`
    pub fn contains(&self, inner: &Term) -> bool {
        self != inner
            && inner.factors.iter().all(|f| self.factors.contains(f))
            && inner.covariates.iter().all(|c| self.covariates.contains(c))
    }

    pub fn is_random(&self, data: &GlmData) -> bool {
        self.factors.iter().any(|&f| data.factors[f].random)
    }

    pub fn name(&self, data: &GlmData) -> String {
        self.factors
            .iter()
            .map(|&f| data.factors[f].name.as_str())
            .chain(self.covariates.iter().map(|&c| data.covariates[c].name.as_str()))
            .collect::<Vec<_>>()
            .join(" * ")
    }
}

/// Model terms: covariates then every factor combination by ascending
/// order, or the custom terms in the order given.
pub(super) fn build_terms(config: &GlmConfig, data: &GlmData) -> Vec<Term> {
    let mut terms = Vec::new();
    if config.model.full_factorial {
        for c in 0..data.covariates.len() {
            terms.push(Term {
                factors: Vec::new(),
                covariates: vec![c],
            });
        }
        let nf = data.factors.len();
        for order in 1..=nf {
            for combo in combinations(nf, order) {
                terms.push(Term {
                    factors: combo,
                    covariates: Vec::new(),
                });
            }
        }
        return terms;
    }

    for names in &config.model.custom_terms {
        let mut term = Term {
            factors: Vec::new(),
            covariates: Vec::new(),
        };
        for name in names.iter().flat_map(|n| split_term(n)) {
            if let Some(f) = data.factor_index(&name) {
                term.factors.push(f);
            } else if let Some(c) = data.covariate_index(&name) {
                term.covariates.push(c);
            }
        }
        term.factors.sort_unstable();
        term.factors.dedup();
        term.covariates.sort_unstable();
        term.covariates.dedup();
        if term.order() > 0 && !terms.contains(&term) {
            terms.push(term);
        }
    }
    terms
}

/// Index combinations of size `k` from `0..n`, lexicographic
fn combinations(n: usize, k: usize) -> Vec<Vec<usize>> {
    let mut out = Vec::new();
    let mut current = Vec::with_capacity(k);
    fn walk(start: usize, n: usize, k: usize, current: &mut Vec<usize>, out: &mut Vec<Vec<usize>>) {
        if current.len() == k {
            out.push(current.clone());
            return;
        }
        for i in start..n {
            current.push(i);
            walk(i + 1, n, k, current, out);
            current.pop();
        }
    }
    walk(0, n, k, &mut current, &mut out);
    out
}

// ==================== Design matrices ====================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coding {
    /// Sum-to-zero columns, last level coded -1
    Effect,
    /// One indicator per level; aliased columns are screened afterwards
    Indicator,
}

/// A design column's origin
#[derive(Debug, Clone, PartialEq)]
pub struct ParamColumn {
    /// `None` for the intercept
    pub term: Option<usize>,
    /// `(factor, level)` pairs
    pub levels: Vec<(usize, usize)>,
    pub covariates: Vec<usize>,
}

impl ParamColumn {
    /// Parameter name, e.g. `[a=1] * [b=2]`
    pub fn name(&self, data: &GlmData) -> String {
        if self.term.is_none() {
            return "Intercept".to_string();
        }
        self.levels
            .iter()
            .map(|&(f, l)| {
                let factor = &data.factors[f];
                format!("[{}={}]", factor.name, factor.levels[l].value)
            })
            .chain(self.covariates.iter().map(|&c| data.covariates[c].name.clone()))
            .collect::<Vec<_>>()
            .join(" * ")
    }
}

/// Columns belonging to the intercept or one term
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub term: Option<usize>,
    pub columns: Range<usize>,
}

#[derive(Debug, Clone)]
pub struct Design {
    pub x: DMatrix<f64>,
    pub blocks: Vec<Block>,
    pub params: Vec<ParamColumn>,
}

impl Design {
    pub fn build(data: &GlmData, terms: &[Term], intercept: bool, coding: Coding) -> Self {
        let n = data.ncases();
        let mut columns: Vec<Vec<f64>> = Vec::new();
        let mut params = Vec::new();
        let mut blocks = Vec::new();

        if intercept {
            columns.push(vec![1.0; n]);
            params.push(ParamColumn {
                term: None,
                levels: Vec::new(),
                covariates: Vec::new(),
            });
            blocks.push(Block {
                term: None,
                columns: 0..1,
            });
        }

        for (t, term) in terms.iter().enumerate() {
            let start = columns.len();
            for (values, param) in term_columns(data, t, term, coding) {
                columns.push(values);
                params.push(param);
            }
            blocks.push(Block {
                term: Some(t),
                columns: start..columns.len(),
            });
        }

        let x = DMatrix::from_fn(n, columns.len(), |i, j| columns[j][i]);
        Self { x, blocks, params }
    }

    pub fn ncols(&self) -> usize {
        self.x.ncols()
    }

    /// Block index of the intercept
    pub fn intercept_block(&self) -> Option<usize> {
        self.blocks.iter().position(|b| b.term.is_none())
    }

    /// Block index of a term
    pub fn term_block(&self, term: usize) -> Option<usize> {
        self.blocks.iter().position(|b| b.term == Some(term))
    }

    /// Column indices of the given blocks, ascending
    pub fn columns_of(&self, blocks: &[usize]) -> Vec<usize> {
        let mut cols: Vec<usize> = blocks
            .iter()
            .flat_map(|&b| self.blocks[b].columns.clone())
            .collect();
        cols.sort_unstable();
        cols
    }

    /// Block owning a column
    pub fn block_of(&self, column: usize) -> Option<&Block> {
        self.blocks.iter().find(|b| b.columns.contains(&column))
    }
}

fn code_value(coding: Coding, code: usize, level: usize, nlevels: usize) -> f64 {
    match coding {
        Coding::Indicator => f64::from(u8::from(code == level)),
        Coding::Effect if code == level => 1.0,
        Coding::Effect if code + 1 == nlevels => -1.0,
        Coding::Effect => 0.0,
    }
}

/// Row-wise products of the factor codings and covariate values, first
/// factor varying slowest.
fn term_columns(
    data: &GlmData,
    index: usize,
    term: &Term,
    coding: Coding,
) -> Vec<(Vec<f64>, ParamColumn)> {
    let mut cols = vec![(
        vec![1.0; data.ncases()],
        ParamColumn {
            term: Some(index),
            levels: Vec::new(),
            covariates: Vec::new(),
        },
    )];

    for &f in &term.factors {
        let nlevels = data.factors[f].levels.len();
        let codes = &data.codes[f];
        let count = match coding {
            Coding::Effect => nlevels.saturating_sub(1),
            Coding::Indicator => nlevels,
        };
        let mut next = Vec::with_capacity(cols.len() * count);
        for (values, param) in &cols {
            for level in 0..count {
                let coded = values
                    .iter()
                    .zip(codes)
                    .map(|(v, &code)| v * code_value(coding, code, level, nlevels))
                    .collect();
                let mut param = param.clone();
                param.levels.push((f, level));
                next.push((coded, param));
            }
        }
        cols = next;
    }

    for &c in &term.covariates {
        let covariate = &data.covariate_values[c];
        for (values, param) in &mut cols {
            for (v, x) in values.iter_mut().zip(covariate) {
                *v *= x;
            }
            param.covariates.push(c);
        }
    }
    cols
}
