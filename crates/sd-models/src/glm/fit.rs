//! Model fit, sums of squares and the between-subjects tables

use std::collections::BTreeMap;

use nalgebra::DVector;
use tracing::debug;

use sd_core::stats::distribution::f_sf;
use sd_core::stats::{weighted_mean, weighted_variance};
use sd_core::{ColumnHeader, ResultTable, TableRow};

use super::config::{GlmConfig, SumOfSquares};
use super::design::{Coding, Design, GlmData, Term};
use crate::base::{ModelError, Result, RunContext, SourceStatistics, source_table};
use crate::linalg::{independent_columns, select_columns, weighted_fit};

/// Source of variation in the between-subjects table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Intercept,
    Term(usize),
}

/// Sum of squares of one source
#[derive(Debug, Clone, PartialEq)]
pub struct Effect {
    pub source: Source,
    pub ss: f64,
    pub df: f64,
}

/// Full-model fit on effect-coded columns
#[derive(Debug, Clone)]
pub struct ModelFit {
    pub design: Design,
    y: DVector<f64>,
    w: DVector<f64>,
    pub beta: DVector<f64>,
    pub rank: usize,
    /// Weighted N
    pub n: f64,
    pub sse: f64,
    pub df_error: f64,
}

impl ModelFit {
    /// Fit the full model; an aliased column is an error naming its term.
    pub fn fit(data: &GlmData, terms: &[Term], intercept: bool) -> Result<Self> {
        let design = Design::build(data, terms, intercept, Coding::Effect);
        let y = data.y_vector();
        let w = data.weight_vector();

        let keep = independent_columns(&design.x, &w);
        if let Some(column) = keep.iter().position(|k| !k) {
            let term = match design.block_of(column).and_then(|b| b.term) {
                Some(t) => terms[t].name(data),
                None => "Intercept".to_string(),
            };
            return Err(ModelError::Aliased { term });
        }

        let fit = weighted_fit(&design.x, &y, &w)?;
        let n = data.total_weight();
        let df_error = (n - fit.rank as f64).max(0.0);
        debug!(columns = design.ncols(), rank = fit.rank, n, "fitted full model");

        Ok(Self {
            design,
            y,
            w,
            beta: fit.beta,
            rank: fit.rank,
            n,
            sse: fit.rss,
            df_error,
        })
    }

    pub fn mse(&self) -> Option<f64> {
        (self.df_error > 0.0).then(|| self.sse / self.df_error)
    }

    pub fn has_intercept(&self) -> bool {
        self.design.intercept_block().is_some()
    }

    /// Residual sum of squares of the model spanned by `blocks`
    fn rss(&self, blocks: &[usize]) -> Result<f64> {
        let cols = self.design.columns_of(blocks);
        let x = select_columns(&self.design.x, &cols);
        Ok(weighted_fit(&x, &self.y, &self.w)?.rss)
    }

    pub fn residuals(&self) -> DVector<f64> {
        &self.y - &self.design.x * &self.beta
    }

    /// `Σ w y²`
    pub fn uncorrected_total(&self) -> f64 {
        self.y
            .iter()
            .zip(self.w.iter())
            .map(|(y, w)| w * y * y)
            .sum()
    }

    /// Model sum of squares and df, corrected for the mean when the
    /// model has an intercept
    pub fn model_ss(&self) -> Result<(f64, f64)> {
        match self.design.intercept_block() {
            Some(b) => Ok((
                (self.rss(&[b])? - self.sse).max(0.0),
                self.rank as f64 - 1.0,
            )),
            None => Ok(((self.rss(&[])? - self.sse).max(0.0), self.rank as f64)),
        }
    }

    /// `Σ w (y − ȳ)²`
    pub fn corrected_total(&self) -> Result<f64> {
        match self.design.intercept_block() {
            Some(b) => self.rss(&[b]),
            None => {
                let ones = nalgebra::DMatrix::from_element(self.y.len(), 1, 1.0);
                Ok(weighted_fit(&ones, &self.y, &self.w)?.rss)
            }
        }
    }

    /// Sums of squares of the intercept and every term
    pub fn effects(&self, terms: &[Term], kind: SumOfSquares, ctx: &RunContext) -> Result<Vec<Effect>> {
        let nblocks = self.design.blocks.len();
        let all: Vec<usize> = (0..nblocks).collect();
        let without = |skip: usize| -> Vec<usize> { all.iter().copied().filter(|&b| b != skip).collect() };
        let intercept = self.design.intercept_block();
        let mut effects = Vec::with_capacity(terms.len() + 1);

        if let Some(ib) = intercept {
            let ss = match kind {
                SumOfSquares::TypeIII => self.rss(&without(ib))? - self.sse,
                SumOfSquares::TypeI | SumOfSquares::TypeII => self.rss(&[])? - self.rss(&[ib])?,
            };
            effects.push(Effect {
                source: Source::Intercept,
                ss: ss.max(0.0),
                df: 1.0,
            });
        }

        for (t, term) in terms.iter().enumerate() {
            ctx.check()?;
            let Some(block) = self.design.term_block(t) else {
                continue;
            };
            let df = self.design.blocks[block].columns.len() as f64;
            let ss = match kind {
                SumOfSquares::TypeI => {
                    let mut base: Vec<usize> = intercept.into_iter().collect();
                    base.extend((0..t).filter_map(|u| self.design.term_block(u)));
                    let reduced = self.rss(&base)?;
                    base.push(block);
                    reduced - self.rss(&base)?
                }
                SumOfSquares::TypeII => {
                    let mut base: Vec<usize> = intercept.into_iter().collect();
                    base.extend(
                        terms
                            .iter()
                            .enumerate()
                            .filter(|(u, other)| *u != t && !other.contains(term))
                            .filter_map(|(u, _)| self.design.term_block(u)),
                    );
                    let reduced = self.rss(&base)?;
                    base.push(block);
                    reduced - self.rss(&base)?
                }
                SumOfSquares::TypeIII => self.rss(&without(block))? - self.sse,
            };
            effects.push(Effect {
                source: Source::Term(t),
                ss: ss.max(0.0),
                df,
            });
        }
        Ok(effects)
    }
}

// ==================== Tests of between-subjects effects ====================

/// Error term of a source in a model with random factors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Denominator {
    Residual,
    Term(usize),
    Ambiguous,
}

/// The unique lowest-order term that contains `target` and involves a
/// random factor; the residual when there is none.
pub fn denominator(target: Source, terms: &[Term], data: &GlmData) -> Denominator {
    let candidates: Vec<usize> = terms
        .iter()
        .enumerate()
        .filter(|(u, term)| {
            term.is_random(data)
                && match target {
                    Source::Intercept => true,
                    Source::Term(t) => *u != t && term.contains(&terms[t]),
                }
        })
        .map(|(u, _)| u)
        .collect();
    let Some(lowest) = candidates.iter().map(|&u| terms[u].order()).min() else {
        return Denominator::Residual;
    };
    let smallest: Vec<usize> = candidates
        .into_iter()
        .filter(|&u| terms[u].order() == lowest)
        .collect();
    match smallest.as_slice() {
        [only] => Denominator::Term(*only),
        _ => Denominator::Ambiguous,
    }
}

fn source_name(source: Source, terms: &[Term], data: &GlmData) -> String {
    match source {
        Source::Intercept => "Intercept".to_string(),
        Source::Term(t) => terms[t].name(data),
    }
}

/// "Intercept + a + b + a * b"
pub fn design_label(terms: &[Term], data: &GlmData, intercept: bool) -> String {
    intercept
        .then(|| "Intercept".to_string())
        .into_iter()
        .chain(terms.iter().map(|t| t.name(data)))
        .collect::<Vec<_>>()
        .join(" + ")
}

/// `0.523` → `.523`, the way the reference package prints proportions
pub fn short_decimal(value: f64) -> String {
    let text = format!("{:.3}", value);
    match text.strip_prefix("0.") {
        Some(rest) => format!(".{}", rest),
        None => match text.strip_prefix("-0.") {
            Some(rest) => format!("-.{}", rest),
            None => text,
        },
    }
}

pub const TESTS_TITLE: &str = "Tests of Between-Subjects Effects";

pub fn tests_table(
    fit: &ModelFit,
    effects: &[Effect],
    terms: &[Term],
    data: &GlmData,
    config: &GlmConfig,
) -> Result<ResultTable> {
    let effect_size = config.options.effect_size;
    let ss_label = config.model.sum_of_squares.label();
    let has_random = data.factors.iter().any(|f| f.random);

    if has_random {
        return random_tests_table(fit, effects, terms, data, config);
    }

    let mse = fit.mse().unwrap_or(0.0);
    let (model_ss, model_df) = fit.model_ss()?;
    let corrected_total = fit.corrected_total()?;

    let mut sources = Vec::with_capacity(effects.len() + 5);
    let model_label = if fit.has_intercept() { "Corrected Model" } else { "Model" };
    sources.push(SourceStatistics::new(model_label, model_ss, model_df).tested_against(
        mse,
        fit.df_error,
        fit.sse,
    ));
    for effect in effects {
        sources.push(
            SourceStatistics::new(source_name(effect.source, terms, data), effect.ss, effect.df)
                .tested_against(mse, fit.df_error, fit.sse),
        );
    }
    sources.push(SourceStatistics::new("Error", fit.sse, fit.df_error));
    sources.push(SourceStatistics::total("Total", fit.uncorrected_total(), fit.n));
    if fit.has_intercept() {
        sources.push(SourceStatistics::total("Corrected Total", corrected_total, fit.n - 1.0));
    }

    let mut table = source_table(TESTS_TITLE, ss_label, &sources, effect_size);
    table.footnote(format!("Dependent Variable: {}", data.dependent));
    if fit.has_intercept() && corrected_total > 0.0 {
        let r2 = model_ss / corrected_total;
        let adjusted = if fit.df_error > 0.0 {
            1.0 - (1.0 - r2) * (fit.n - 1.0) / fit.df_error
        } else {
            f64::NAN
        };
        table.footnote(format!(
            "a. R Squared = {} (Adjusted R Squared = {})",
            short_decimal(r2),
            short_decimal(adjusted)
        ));
    }
    Ok(table)
}

/// Hypothesis/Error row pairs, each source tested against its own error term
fn random_tests_table(
    fit: &ModelFit,
    effects: &[Effect],
    terms: &[Term],
    data: &GlmData,
    config: &GlmConfig,
) -> Result<ResultTable> {
    let effect_size = config.options.effect_size;
    let mut headers = vec![
        ColumnHeader::row_label("Source"),
        ColumnHeader::row_label(""),
        ColumnHeader::leaf(config.model.sum_of_squares.label(), "sumOfSquares"),
        ColumnHeader::leaf("df", "df"),
        ColumnHeader::leaf("Mean Square", "meanSquare"),
        ColumnHeader::leaf("F", "f"),
        ColumnHeader::leaf("Sig.", "sig"),
    ];
    if effect_size {
        headers.push(ColumnHeader::leaf("Partial Eta Squared", "partialEtaSquared"));
    }
    let mut table = ResultTable::new(TESTS_TITLE, headers);
    let mut notes: Vec<String> = Vec::new();

    let by_source: BTreeMap<usize, &Effect> = effects
        .iter()
        .filter_map(|e| match e.source {
            Source::Term(t) => Some((t, e)),
            Source::Intercept => None,
        })
        .collect();

    for effect in effects {
        let name = source_name(effect.source, terms, data);
        let (error_ss, error_df, note) = match denominator(effect.source, terms, data) {
            Denominator::Residual => (Some(fit.sse), fit.df_error, "MS(Error)".to_string()),
            Denominator::Term(u) => {
                let (ss, df) = by_source
                    .get(&u)
                    .map(|e| (e.ss, e.df))
                    .unwrap_or((0.0, 0.0));
                (Some(ss), df, format!("MS({})", terms[u].name(data)))
            }
            Denominator::Ambiguous => match effect.source {
                Source::Intercept => (
                    None,
                    0.0,
                    "Cannot compute the error term for the Intercept".to_string(),
                ),
                Source::Term(_) => {
                    return Err(ModelError::custom(format!(
                        "Cannot determine an error term for '{}': it is contained in several random terms of the same order",
                        name
                    )));
                }
            },
        };

        let mut hypothesis = SourceStatistics::new(name.clone(), effect.ss, effect.df);
        if let Some(error_ss) = error_ss {
            let error_ms = if error_df > 0.0 { error_ss / error_df } else { 0.0 };
            hypothesis = hypothesis.tested_against(error_ms, error_df, error_ss);
        }
        let mut row = hypothesis.to_row(effect_size);
        row.row_header = vec![name.clone(), "Hypothesis".to_string()];
        table.push(row);

        let mut error_row = TableRow::new([name.clone(), "Error".to_string()]);
        if let Some(ss) = error_ss {
            error_row = error_row
                .num("sumOfSquares", ss)
                .num("df", error_df)
                .opt("meanSquare", (error_df > 0.0).then(|| ss / error_df));
        }
        table.push(error_row);
        notes.push(format!("{}: {}", name, note));
    }

    table.footnote(format!("Dependent Variable: {}", data.dependent));
    for note in notes {
        table.footnote(note);
    }
    Ok(table)
}

// ==================== Factor and cell summaries ====================

pub fn factors_table(data: &GlmData) -> Option<ResultTable> {
    if data.factors.is_empty() {
        return None;
    }
    let mut table = ResultTable::new(
        "Between-Subjects Factors",
        vec![
            ColumnHeader::row_label(""),
            ColumnHeader::row_label(""),
            ColumnHeader::leaf("Value Label", "valueLabel"),
            ColumnHeader::leaf("N", "n"),
        ],
    );
    for (f, factor) in data.factors.iter().enumerate() {
        for (l, level) in factor.levels.iter().enumerate() {
            let n: f64 = data.codes[f]
                .iter()
                .zip(&data.case_weights)
                .filter(|(code, _)| **code == l)
                .map(|(_, w)| w)
                .sum();
            let mut row = TableRow::new([factor.label.clone(), level.value.clone()]).num("n", n);
            if let Some(label) = &level.label {
                row = row.text("valueLabel", label.clone());
            }
            table.push(row);
        }
    }
    Some(table)
}

/// Mean, standard deviation and N of every cell and marginal, `Total`
/// after the levels of each factor.
pub fn descriptives_table(data: &GlmData) -> ResultTable {
    let mut headers: Vec<ColumnHeader> = data
        .factors
        .iter()
        .map(|f| ColumnHeader::row_label(f.label.clone()))
        .collect();
    if headers.is_empty() {
        headers.push(ColumnHeader::row_label(""));
    }
    headers.extend([
        ColumnHeader::leaf("Mean", "mean"),
        ColumnHeader::leaf("Std. Deviation", "stdDev"),
        ColumnHeader::leaf("N", "n"),
    ]);
    let mut table = ResultTable::new("Descriptive Statistics", headers);

    let mut selection: Vec<Option<usize>> = Vec::with_capacity(data.factors.len());
    push_cells(data, &mut selection, &mut table);
    table.footnote(format!("Dependent Variable: {}", data.dependent));
    table
}

fn push_cells(data: &GlmData, selection: &mut Vec<Option<usize>>, table: &mut ResultTable) {
    let depth = selection.len();
    if depth == data.factors.len() {
        let (values, weights): (Vec<f64>, Vec<f64>) = (0..data.ncases())
            .filter(|&i| {
                selection
                    .iter()
                    .enumerate()
                    .all(|(f, level)| level.is_none_or(|l| data.codes[f][i] == l))
            })
            .map(|i| (data.y[i], data.case_weights[i]))
            .unzip();
        let n: f64 = weights.iter().sum();
        if n <= 0.0 {
            return;
        }
        let header: Vec<String> = if selection.is_empty() {
            vec!["Total".to_string()]
        } else {
            selection
                .iter()
                .enumerate()
                .map(|(f, level)| match level {
                    Some(l) => data.factors[f].levels[*l].display().to_string(),
                    None => "Total".to_string(),
                })
                .collect()
        };
        table.push(
            TableRow::new(header)
                .opt("mean", weighted_mean(&values, &weights))
                .opt("stdDev", weighted_variance(&values, &weights).map(f64::sqrt))
                .num("n", n),
        );
        return;
    }

    let nlevels = data.factors[depth].levels.len();
    for level in (0..nlevels).map(Some).chain([None]) {
        selection.push(level);
        push_cells(data, selection, table);
        selection.pop();
    }
}

/// Levene's test: one-way ANOVA of absolute deviations from the cell
/// means, or of absolute residuals when the model has covariates.
pub fn levene_table(data: &GlmData, fit: &ModelFit, design: &str) -> Option<ResultTable> {
    if data.factors.is_empty() {
        return None;
    }
    let n = data.ncases();
    let mut cells: BTreeMap<Vec<usize>, Vec<usize>> = BTreeMap::new();
    for i in 0..n {
        let key: Vec<usize> = data.codes.iter().map(|codes| codes[i]).collect();
        cells.entry(key).or_default().push(i);
    }

    let w = &data.case_weights;
    let z: Vec<f64> = if data.covariates.is_empty() {
        let mut z = vec![0.0; n];
        for members in cells.values() {
            let values: Vec<f64> = members.iter().map(|&i| data.y[i]).collect();
            let weights: Vec<f64> = members.iter().map(|&i| w[i]).collect();
            let mean = weighted_mean(&values, &weights).unwrap_or(0.0);
            for &i in members {
                z[i] = (data.y[i] - mean).abs();
            }
        }
        z
    } else {
        fit.residuals().iter().map(|r| r.abs()).collect()
    };

    let grand = weighted_mean(&z, w).unwrap_or(0.0);
    let total: f64 = w.iter().sum();
    let mut between = 0.0;
    let mut within = 0.0;
    for members in cells.values() {
        let cz: Vec<f64> = members.iter().map(|&i| z[i]).collect();
        let cw: Vec<f64> = members.iter().map(|&i| w[i]).collect();
        let cell_w: f64 = cw.iter().sum();
        let cell_mean = weighted_mean(&cz, &cw).unwrap_or(0.0);
        between += cell_w * (cell_mean - grand).powi(2);
        within += cz.iter().zip(&cw).map(|(z, w)| w * (z - cell_mean).powi(2)).sum::<f64>();
    }
    let k = cells.len() as f64;
    let df1 = k - 1.0;
    let df2 = total - k;
    let f = (df1 > 0.0 && df2 > 0.0 && within > 0.0).then(|| (between / df1) / (within / df2));

    let mut table = ResultTable::new(
        "Levene's Test of Equality of Error Variances",
        vec![
            ColumnHeader::row_label(""),
            ColumnHeader::leaf("F", "f"),
            ColumnHeader::leaf("df1", "df1"),
            ColumnHeader::leaf("df2", "df2"),
            ColumnHeader::leaf("Sig.", "sig"),
        ],
    );
    table.push(
        TableRow::new([data.dependent.clone()])
            .opt("f", f)
            .num("df1", df1)
            .num("df2", df2)
            .opt("sig", f.and_then(|f| f_sf(f, df1, df2))),
    );
    table.footnote(
        "Tests the null hypothesis that the error variance of the dependent variable is equal across groups.",
    );
    table.footnote(format!("a. Design: {}", design));
    Some(table)
}
