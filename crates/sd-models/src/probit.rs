//! PROBIT: dose–response models fitted by maximum likelihood
//!
//! `P = C + (1 − C)·F(αⱼ + β'x)` where `F` is the normal or logistic CDF,
//! `αⱼ` the intercept of factor level `j` and `C` the natural response rate.

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use sd_core::data::{Variable, coerce_column, require_non_empty};
use sd_core::stats::distribution::{
    chi_square_sf, normal_cdf, normal_pdf, normal_quantile, normal_two_tailed, t_quantile,
};
use sd_core::{ColumnHeader, ErrorAccumulator, ResultTable, TableRow};

use crate::base::{Analysis, AnalysisInput, Result, RunContext};
use crate::error::ModelError;
use crate::linalg::{spd_inverse, weighted_fit};
use crate::nonparametric::GroupRange;

#[cfg(test)]
mod tests;

/// Probabilities listed in the confidence-limits table
pub const CONFIDENCE_PROBABILITIES: [f64; 35] = [
    0.01, 0.02, 0.03, 0.04, 0.05, 0.06, 0.07, 0.08, 0.09, 0.10, 0.15, 0.20, 0.25, 0.30, 0.35,
    0.40, 0.45, 0.50, 0.55, 0.60, 0.65, 0.70, 0.75, 0.80, 0.85, 0.90, 0.91, 0.92, 0.93, 0.94,
    0.95, 0.96, 0.97, 0.98, 0.99,
];

/// Fitted probabilities are kept this far from 0 and 1
const PROBABILITY_FLOOR: f64 = 1e-12;

/// Upper bound on an estimated natural response rate
const MAX_NATURAL_RESPONSE: f64 = 0.999;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Transform {
    #[default]
    None,
    Log10,
    Ln,
}

impl Transform {
    fn apply(self, dose: f64) -> Option<f64> {
        match self {
            Transform::None => Some(dose),
            Transform::Log10 => (dose > 0.0).then(|| dose.log10()),
            Transform::Ln => (dose > 0.0).then(|| dose.ln()),
        }
    }

    fn invert(self, x: f64) -> f64 {
        match self {
            Transform::None => x,
            Transform::Log10 => 10f64.powf(x),
            Transform::Ln => x.exp(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ProbitModel {
    #[default]
    Probit,
    Logit,
}

impl ProbitModel {
    pub fn cdf(self, eta: f64) -> f64 {
        match self {
            ProbitModel::Probit => normal_cdf(eta),
            ProbitModel::Logit => 1.0 / (1.0 + (-eta).exp()),
        }
    }

    pub fn pdf(self, eta: f64) -> f64 {
        match self {
            ProbitModel::Probit => normal_pdf(eta),
            ProbitModel::Logit => {
                let p = self.cdf(eta);
                p * (1.0 - p)
            }
        }
    }

    pub fn quantile(self, p: f64) -> f64 {
        match self {
            ProbitModel::Probit => normal_quantile(p),
            ProbitModel::Logit => (p / (1.0 - p)).ln(),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ProbitModel::Probit => "PROBIT",
            ProbitModel::Logit => "LOGIT",
        }
    }
}

/// Handling of the natural response rate `C`
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NaturalResponse {
    /// `C = 0`
    #[default]
    None,
    /// Estimate `C` with the other parameters
    Estimate,
    /// Fixed `C`
    Value(f64),
}

/// Configuration of a PROBIT run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProbitConfig {
    pub response_frequency: Option<String>,
    pub total_observed: Option<String>,
    pub factor: Option<String>,
    pub factor_range: GroupRange,
    pub covariates: Vec<String>,
    pub transform: Transform,
    pub model: ProbitModel,
    pub natural_response: NaturalResponse,
    pub max_iterations: i64,
    pub convergence: f64,
    /// Goodness-of-fit significance below which the heterogeneity factor
    /// is applied
    pub sig_level: f64,
}

impl Default for ProbitConfig {
    fn default() -> Self {
        Self {
            response_frequency: None,
            total_observed: None,
            factor: None,
            factor_range: GroupRange::default(),
            covariates: Vec::new(),
            transform: Transform::None,
            model: ProbitModel::Probit,
            natural_response: NaturalResponse::None,
            max_iterations: 20,
            convergence: 1e-8,
            sig_level: 0.15,
        }
    }
}

/// One case: a dose combination with its subjects and responders
#[derive(Debug, Clone, PartialEq)]
pub struct DoseCell {
    /// Case number, from 1
    pub case: usize,
    /// Index into the factor levels
    pub level: usize,
    /// Untransformed covariate values
    pub doses: Vec<f64>,
    /// Transformed covariate values
    pub x: Vec<f64>,
    pub responses: f64,
    pub subjects: f64,
}

#[derive(Debug, Clone)]
pub struct PreparedProbit {
    pub covariates: Vec<Variable>,
    pub factor: Option<Variable>,
    /// Factor level values and labels, ascending
    pub levels: Vec<(f64, String)>,
    pub cells: Vec<DoseCell>,
    pub missing: usize,
}

/// Maximum-likelihood solution
#[derive(Debug, Clone)]
pub struct ProbitFit {
    /// Intercepts per level, then slopes, then `C` when estimated
    pub theta: DVector<f64>,
    /// Inverse information at `theta`
    pub covariance: DMatrix<f64>,
    pub natural_response: f64,
    pub estimates_natural_response: bool,
    pub log_likelihood: f64,
    pub iterations: usize,
}

struct Layout {
    levels: usize,
    slopes: usize,
    natural: NaturalResponse,
}

impl Layout {
    fn len(&self) -> usize {
        self.levels + self.slopes + usize::from(self.natural == NaturalResponse::Estimate)
    }

    fn natural_response(&self, theta: &DVector<f64>) -> f64 {
        match self.natural {
            NaturalResponse::None => 0.0,
            NaturalResponse::Value(c) => c,
            NaturalResponse::Estimate => theta[self.levels + self.slopes],
        }
    }

    fn eta(&self, theta: &DVector<f64>, cell: &DoseCell) -> f64 {
        theta[cell.level]
            + cell
                .x
                .iter()
                .enumerate()
                .map(|(j, x)| theta[self.levels + j] * x)
                .sum::<f64>()
    }
}

/// Fitted response probability of `cell`
fn probability(model: ProbitModel, layout: &Layout, theta: &DVector<f64>, cell: &DoseCell) -> f64 {
    let c = layout.natural_response(theta);
    let p = c + (1.0 - c) * model.cdf(layout.eta(theta, cell));
    p.clamp(PROBABILITY_FLOOR, 1.0 - PROBABILITY_FLOOR)
}

fn log_likelihood(model: ProbitModel, layout: &Layout, theta: &DVector<f64>, cells: &[DoseCell]) -> f64 {
    cells
        .iter()
        .map(|cell| {
            let p = probability(model, layout, theta, cell);
            cell.responses * p.ln() + (cell.subjects - cell.responses) * (1.0 - p).ln()
        })
        .sum()
}

/// Score vector and expected information
fn score(
    model: ProbitModel,
    layout: &Layout,
    theta: &DVector<f64>,
    cells: &[DoseCell],
) -> (DVector<f64>, DMatrix<f64>) {
    let q = layout.len();
    let mut gradient = DVector::zeros(q);
    let mut information = DMatrix::zeros(q, q);
    let c = layout.natural_response(theta);

    for cell in cells {
        let eta = layout.eta(theta, cell);
        let p = probability(model, layout, theta, cell);
        let density = (1.0 - c) * model.pdf(eta);

        let mut dp = DVector::zeros(q);
        dp[cell.level] = density;
        for (j, x) in cell.x.iter().enumerate() {
            dp[layout.levels + j] = density * x;
        }
        if layout.natural == NaturalResponse::Estimate {
            dp[q - 1] = 1.0 - model.cdf(eta);
        }

        let v = p * (1.0 - p);
        gradient.axpy((cell.responses - cell.subjects * p) / v, &dp, 1.0);
        information += (&dp * dp.transpose()) * (cell.subjects / v);
    }
    (gradient, information)
}

/// Weighted least squares on the empirical transform of the observed rates
fn starting_values(model: ProbitModel, layout: &Layout, cells: &[DoseCell]) -> Result<DVector<f64>> {
    let c0 = match layout.natural {
        NaturalResponse::None => 0.0,
        NaturalResponse::Value(c) => c,
        NaturalResponse::Estimate => cells
            .iter()
            .map(|cell| cell.responses / cell.subjects)
            .fold(f64::INFINITY, f64::min)
            .clamp(1e-3, 0.5),
    };

    let p = layout.levels + layout.slopes;
    let mut x = DMatrix::zeros(cells.len(), p);
    let mut z = DVector::zeros(cells.len());
    let mut w = DVector::zeros(cells.len());
    for (i, cell) in cells.iter().enumerate() {
        x[(i, cell.level)] = 1.0;
        for (j, v) in cell.x.iter().enumerate() {
            x[(i, layout.levels + j)] = *v;
        }
        let observed = (cell.responses + 0.5) / (cell.subjects + 1.0);
        let adjusted = ((observed - c0) / (1.0 - c0)).clamp(1e-3, 1.0 - 1e-3);
        z[i] = model.quantile(adjusted);
        w[i] = cell.subjects;
    }
    let fit = weighted_fit(&x, &z, &w)?;

    let mut theta = DVector::zeros(layout.len());
    theta.rows_mut(0, p).copy_from(&fit.beta);
    if layout.natural == NaturalResponse::Estimate {
        theta[p] = c0;
    }
    Ok(theta)
}

/// Fisher scoring with step halving
pub fn fit(
    cells: &[DoseCell],
    levels: usize,
    model: ProbitModel,
    natural: NaturalResponse,
    max_iterations: usize,
    convergence: f64,
    ctx: &RunContext,
) -> Result<ProbitFit> {
    let slopes = cells.first().map_or(0, |c| c.x.len());
    let layout = Layout {
        levels,
        slopes,
        natural,
    };
    if cells.len() < layout.len() {
        return Err(ModelError::InsufficientData {
            n_samples: cells.len(),
            n_predictors: layout.len(),
        });
    }

    let mut theta = starting_values(model, &layout, cells)?;
    let mut ll = log_likelihood(model, &layout, &theta, cells);
    let mut converged = false;
    let mut iterations = 0;

    while iterations < max_iterations {
        ctx.check()?;
        iterations += 1;
        let (gradient, information) = score(model, &layout, &theta, cells);
        let mut step = spd_inverse(&information, "probit_fisher_scoring")? * gradient;

        let mut candidate = &theta + &step;
        let mut candidate_ll = f64::NEG_INFINITY;
        for _ in 0..20 {
            if natural == NaturalResponse::Estimate {
                let last = layout.len() - 1;
                candidate[last] = candidate[last].clamp(0.0, MAX_NATURAL_RESPONSE);
            }
            candidate_ll = log_likelihood(model, &layout, &candidate, cells);
            if candidate_ll.is_finite() && candidate_ll >= ll - 1e-12 * ll.abs().max(1.0) {
                break;
            }
            step /= 2.0;
            candidate = &theta + &step;
        }

        let change = (&candidate - &theta).amax();
        let ll_change = (candidate_ll - ll).abs();
        theta = candidate;
        ll = candidate_ll;
        debug!(iteration = iterations, log_likelihood = ll, change, "probit iteration");

        if change <= convergence || ll_change <= convergence * ll.abs().max(1.0) {
            converged = true;
            break;
        }
    }
    if !converged {
        return Err(ModelError::NotConverged {
            max_iter: max_iterations,
        });
    }

    let (_, information) = score(model, &layout, &theta, cells);
    let covariance = spd_inverse(&information, "probit_covariance")?;
    Ok(ProbitFit {
        natural_response: layout.natural_response(&theta),
        estimates_natural_response: natural == NaturalResponse::Estimate,
        theta,
        covariance,
        log_likelihood: ll,
        iterations,
    })
}

/// Pearson goodness of fit
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GoodnessOfFit {
    pub chi_square: f64,
    pub df: f64,
    pub sig: Option<f64>,
}

impl GoodnessOfFit {
    /// `χ²/df` when the fit is poor at `sig_level`
    pub fn heterogeneity(&self, sig_level: f64) -> Option<f64> {
        match self.sig {
            Some(sig) if sig < sig_level && self.df > 0.0 => Some(self.chi_square / self.df),
            _ => None,
        }
    }
}

pub fn goodness_of_fit(model: ProbitModel, fitted: &ProbitFit, levels: usize, cells: &[DoseCell]) -> GoodnessOfFit {
    let layout = fitted_layout(fitted, levels, cells);
    let chi_square = cells
        .iter()
        .map(|cell| {
            let p = probability(model, &layout, &fitted.theta, cell);
            let expected = cell.subjects * p;
            (cell.responses - expected).powi(2) / (expected * (1.0 - p))
        })
        .sum();
    let df = cells.len() as f64 - fitted.theta.len() as f64;
    GoodnessOfFit {
        chi_square,
        df,
        sig: (df > 0.0).then(|| chi_square_sf(chi_square, df)).flatten(),
    }
}

fn fitted_layout(fitted: &ProbitFit, levels: usize, cells: &[DoseCell]) -> Layout {
    Layout {
        levels,
        slopes: cells.first().map_or(0, |c| c.x.len()),
        natural: if fitted.estimates_natural_response {
            NaturalResponse::Estimate
        } else {
            NaturalResponse::Value(fitted.natural_response)
        },
    }
}

/// Dose (on the transformed scale) at response probability `p` for a
/// level, with its delta-method standard error
pub fn effective_dose(
    model: ProbitModel,
    fitted: &ProbitFit,
    levels: usize,
    level: usize,
    p: f64,
) -> Option<(f64, f64)> {
    let alpha = fitted.theta[level];
    let beta = fitted.theta[levels];
    if beta == 0.0 {
        return None;
    }
    let x = (model.quantile(p) - alpha) / beta;
    let cov = &fitted.covariance;
    let variance = (cov[(level, level)] + x * x * cov[(levels, levels)]
        + 2.0 * x * cov[(level, levels)])
        / (beta * beta);
    Some((x, variance.max(0.0).sqrt()))
}

/// PROBIT analysis
pub struct Probit;

impl Analysis for Probit {
    const NAME: &'static str = "probit";
    type Config = ProbitConfig;
    type Prepared = PreparedProbit;

    fn validate(config: &ProbitConfig, errors: &mut ErrorAccumulator) {
        errors.check(
            config.response_frequency.is_some(),
            "A response frequency variable must be selected.",
        );
        errors.check(
            config.total_observed.is_some(),
            "A total observed variable must be selected.",
        );
        errors.check(
            !config.covariates.is_empty(),
            "At least one covariate must be selected.",
        );
        if config.factor.is_some() {
            errors.check(
                config.factor_range.min < config.factor_range.max,
                "The minimum of the factor range must be less than the maximum.",
            );
        }
        errors.check(
            config.max_iterations >= 1,
            "Maximum iterations must be at least 1.",
        );
        errors.check(
            config.convergence > 0.0 && config.convergence < 1.0,
            "Convergence criterion must be between 0 and 1.",
        );
        errors.check(
            config.sig_level > 0.0 && config.sig_level < 1.0,
            "The heterogeneity significance level must be between 0 and 1.",
        );
        if let NaturalResponse::Value(c) = config.natural_response {
            errors.check(
                (0.0..1.0).contains(&c),
                "The natural response rate must be between 0 and 1.",
            );
        }
    }

    fn prepare(
        input: &AnalysisInput,
        config: &ProbitConfig,
        errors: &mut ErrorAccumulator,
    ) -> Option<PreparedProbit> {
        let weights = match input.case_weights() {
            Ok(w) => w,
            Err(err) => {
                errors.push(err.to_record());
                return None;
            }
        };
        let mut named = Vec::new();
        for name in [&config.response_frequency, &config.total_observed].into_iter().flatten() {
            match input.require(name) {
                Ok(found) => named.push(found),
                Err(err) => errors.push(err.to_record()),
            }
        }
        let factor = match &config.factor {
            Some(name) => match input.require(name) {
                Ok(found) => Some(found),
                Err(err) => {
                    errors.push(err.to_record());
                    return None;
                }
            },
            None => None,
        };
        let covariates = input.resolve(&config.covariates, errors);
        if named.len() < 2 || covariates.len() < config.covariates.len() {
            return None;
        }

        for (variable, _) in named.iter().chain(&covariates).chain(factor.iter()) {
            if !variable.is_numeric() {
                errors.coercion(format!("Variable '{}' is not numeric", variable.name));
            }
        }
        if !errors.is_empty() {
            return None;
        }
        for ((variable, cells), role) in named.iter().zip(["Response frequency", "Total observed"]) {
            let column = coerce_column(cells, variable, &weights);
            let field = format!("{} variable '{}'", role, variable.name);
            if let Err(err) = require_non_empty(&column, &field) {
                errors.push(ModelError::Data(err).to_record());
            }
        }
        if !errors.is_empty() {
            return None;
        }

        let (response, total) = (named[0], named[1]);
        let GroupRange { min, max } = config.factor_range;
        let mut level_values: Vec<f64> = Vec::new();
        let mut case_levels: Vec<f64> = Vec::new();
        let mut cells = Vec::new();
        let mut missing = 0;

        for case in 0..input.ncases() {
            let r = response.1.get(case).and_then(|c| response.0.coerce_cell(c));
            let n = total.1.get(case).and_then(|c| total.0.coerce_cell(c));
            let doses: Option<Vec<f64>> = covariates
                .iter()
                .map(|(v, column)| column.get(case).and_then(|c| v.coerce_cell(c)))
                .collect();
            let level = match &factor {
                Some((v, column)) => match column.get(case).and_then(|c| v.coerce_cell(c)) {
                    Some(g) if (min..=max).contains(&g) => Some(g),
                    _ => None,
                },
                None => Some(0.0),
            };
            let (Some(r), Some(n), Some(doses), Some(level), Some(w)) =
                (r, n, doses, level, weights.get(case))
            else {
                missing += 1;
                continue;
            };
            if n <= 0.0 || r < 0.0 {
                missing += 1;
                continue;
            }
            if r > n {
                errors.coercion(format!(
                    "Number of responses ({}) exceeds the number of subjects ({}) in case {}",
                    r,
                    n,
                    case + 1
                ));
                continue;
            }
            let x: Option<Vec<f64>> = doses.iter().map(|d| config.transform.apply(*d)).collect();
            let Some(x) = x else {
                errors.coercion(format!(
                    "The log transform requires positive covariate values (case {})",
                    case + 1
                ));
                continue;
            };
            if !level_values.contains(&level) {
                level_values.push(level);
            }
            case_levels.push(level);
            cells.push(DoseCell {
                case: case + 1,
                level: 0,
                doses,
                x,
                responses: r * w,
                subjects: n * w,
            });
        }
        if !errors.is_empty() {
            return None;
        }

        level_values.sort_by(|a, b| a.total_cmp(b));
        for (cell, value) in cells.iter_mut().zip(&case_levels) {
            cell.level = level_values.iter().position(|v| v == value).unwrap_or(0);
        }
        let factor_variable = factor.map(|(v, _)| v.clone());
        let levels = level_values
            .iter()
            .map(|v| {
                let label = factor_variable
                    .as_ref()
                    .map(|f| f.format_value(*v))
                    .unwrap_or_default();
                (*v, label)
            })
            .collect();

        if cells.is_empty() {
            return None;
        }
        Some(PreparedProbit {
            covariates: covariates.into_iter().map(|(v, _)| v.clone()).collect(),
            factor: factor_variable,
            levels,
            cells,
            missing,
        })
    }

    #[instrument(name = "probit", skip_all, fields(cases = prepared.cells.len()))]
    fn compute(
        prepared: PreparedProbit,
        config: &ProbitConfig,
        ctx: &RunContext,
    ) -> Result<Vec<ResultTable>> {
        let levels = prepared.levels.len();
        let fitted = fit(
            &prepared.cells,
            levels,
            config.model,
            config.natural_response,
            config.max_iterations.max(1) as usize,
            config.convergence,
            ctx,
        )?;
        let gof = goodness_of_fit(config.model, &fitted, levels, &prepared.cells);
        let heterogeneity = gof.heterogeneity(config.sig_level);
        info!(
            iterations = fitted.iterations,
            chi_square = gof.chi_square,
            heterogeneity = heterogeneity.is_some(),
            "probit model fitted"
        );

        let mut tables = vec![
            data_information_table(&prepared),
            convergence_table(config, &fitted),
            estimates_table(&prepared, config, &fitted, heterogeneity, gof.df),
            chi_square_table(config, &gof, heterogeneity.is_some()),
            cell_counts_table(&prepared, config, &fitted),
        ];
        if prepared.covariates.len() == 1 {
            tables.push(confidence_limits_table(&prepared, config, &fitted, heterogeneity, gof.df));
        }
        Ok(tables)
    }
}

fn multiplier(heterogeneity: Option<f64>, df: f64) -> f64 {
    match heterogeneity {
        Some(_) => t_quantile(0.975, df).unwrap_or(1.96),
        None => normal_quantile(0.975),
    }
}

fn data_information_table(prepared: &PreparedProbit) -> ResultTable {
    let mut table = ResultTable::new(
        "Data Information",
        vec![
            ColumnHeader::row_label(""),
            ColumnHeader::row_label(""),
            ColumnHeader::leaf("N of Cases", "n"),
        ],
    );
    table.push(TableRow::new(["Valid"]).int("n", prepared.cells.len()));
    table.push(TableRow::new(["Rejected", "Missing"]).int("n", prepared.missing));
    if let Some(factor) = &prepared.factor {
        for (index, (_, label)) in prepared.levels.iter().enumerate() {
            let count = prepared.cells.iter().filter(|c| c.level == index).count();
            table.push(TableRow::new([factor.display_name().to_string(), label.clone()]).int("n", count));
        }
    }
    table
}

fn convergence_table(config: &ProbitConfig, fitted: &ProbitFit) -> ResultTable {
    let mut table = ResultTable::new(
        "Convergence Information",
        vec![
            ColumnHeader::row_label(""),
            ColumnHeader::leaf("Number of Iterations", "iterations"),
            ColumnHeader::leaf("Optimal Solution Found", "optimal"),
        ],
    );
    table.push(
        TableRow::new([config.model.label()])
            .int("iterations", fitted.iterations)
            .text("optimal", "Yes"),
    );
    table
}

fn estimates_table(
    prepared: &PreparedProbit,
    config: &ProbitConfig,
    fitted: &ProbitFit,
    heterogeneity: Option<f64>,
    df: f64,
) -> ResultTable {
    let mut table = ResultTable::new(
        "Parameter Estimates",
        vec![
            ColumnHeader::row_label("Parameter"),
            ColumnHeader::row_label(""),
            ColumnHeader::row_label(""),
            ColumnHeader::leaf("Estimate", "estimate"),
            ColumnHeader::leaf("Std. Error", "stdError"),
            ColumnHeader::leaf("Z", "z"),
            ColumnHeader::leaf("Sig.", "sig"),
            ColumnHeader::group(
                "95% Confidence Interval",
                vec![
                    ColumnHeader::leaf("Lower Bound", "lowerBound"),
                    ColumnHeader::leaf("Upper Bound", "upperBound"),
                ],
            ),
        ],
    );
    let scale = heterogeneity.unwrap_or(1.0);
    let critical = multiplier(heterogeneity, df);
    let model = config.model.label();
    let levels = prepared.levels.len();

    let row = |header: Vec<String>, index: usize| {
        let estimate = fitted.theta[index];
        let se = (fitted.covariance[(index, index)] * scale).max(0.0).sqrt();
        let z = (se > 0.0).then(|| estimate / se);
        TableRow::new(header)
            .num("estimate", estimate)
            .num("stdError", se)
            .opt("z", z)
            .opt("sig", z.and_then(normal_two_tailed))
            .num("lowerBound", estimate - critical * se)
            .num("upperBound", estimate + critical * se)
    };

    for (j, variable) in prepared.covariates.iter().enumerate() {
        table.push(row(
            vec![model.to_string(), variable.display_name().to_string()],
            levels + j,
        ));
    }
    match &prepared.factor {
        Some(factor) => {
            for (index, (_, label)) in prepared.levels.iter().enumerate() {
                table.push(row(
                    vec![
                        model.to_string(),
                        "Intercept".to_string(),
                        format!("{} = {}", factor.display_name(), label),
                    ],
                    index,
                ));
            }
        }
        None => table.push(row(vec![model.to_string(), "Intercept".to_string()], 0)),
    }
    if fitted.estimates_natural_response {
        let index = fitted.theta.len() - 1;
        let se = (fitted.covariance[(index, index)] * scale).max(0.0).sqrt();
        table.push(
            TableRow::new(["Natural Response Rate"])
                .num("estimate", fitted.natural_response)
                .num("stdError", se),
        );
    }

    let keys: Vec<String> = table.keys().into_iter().map(str::to_string).collect();
    for row in &mut table.rows {
        row.cells.retain(|k, _| keys.contains(k));
    }
    table.footnote(format!("a. {} model: {}(p) = Intercept + BX", model, model));
    match config.transform {
        Transform::None => {}
        Transform::Log10 => table.footnote("b. Covariates X are transformed using the base 10.000 logarithm."),
        Transform::Ln => table.footnote("b. Covariates X are transformed using the base 2.718 logarithm."),
    }
    table
}

fn chi_square_table(config: &ProbitConfig, gof: &GoodnessOfFit, heterogeneous: bool) -> ResultTable {
    let mut table = ResultTable::new(
        "Chi-Square Tests",
        vec![
            ColumnHeader::row_label(""),
            ColumnHeader::row_label(""),
            ColumnHeader::leaf("Chi-Square", "chiSquare"),
            ColumnHeader::leaf("df", "df"),
            ColumnHeader::leaf("Sig.", "sig"),
        ],
    );
    table.push(
        TableRow::new([config.model.label(), "Pearson Goodness-of-Fit Test"])
            .num("chiSquare", gof.chi_square)
            .num("df", gof.df)
            .opt("sig", gof.sig),
    );
    if heterogeneous {
        table.footnote(format!(
            "a. Since the significance level is less than {:.3}, a heterogeneity factor is used in the calculation of confidence limits.",
            config.sig_level
        ));
    }
    table
}

fn cell_counts_table(prepared: &PreparedProbit, config: &ProbitConfig, fitted: &ProbitFit) -> ResultTable {
    let mut headers = vec![ColumnHeader::row_label(""), ColumnHeader::row_label("Number")];
    if let Some(factor) = &prepared.factor {
        headers.push(ColumnHeader::leaf(factor.display_name(), "level"));
    }
    headers.extend(
        prepared
            .covariates
            .iter()
            .map(|v| ColumnHeader::leaf(v.display_name(), v.name.clone())),
    );
    headers.extend([
        ColumnHeader::leaf("Number of Subjects", "subjects"),
        ColumnHeader::leaf("Observed Responses", "observed"),
        ColumnHeader::leaf("Expected Responses", "expected"),
        ColumnHeader::leaf("Residual", "residual"),
        ColumnHeader::leaf("Probability", "probability"),
    ]);
    let mut table = ResultTable::new("Cell Counts and Residuals", headers);

    let layout = fitted_layout(fitted, prepared.levels.len(), &prepared.cells);
    for cell in &prepared.cells {
        let p = probability(config.model, &layout, &fitted.theta, cell);
        let expected = cell.subjects * p;
        let mut row = TableRow::new([config.model.label().to_string(), cell.case.to_string()]);
        if prepared.factor.is_some() {
            row = row.text("level", prepared.levels[cell.level].1.clone());
        }
        for (variable, dose) in prepared.covariates.iter().zip(&cell.doses) {
            row = row.num(&variable.name, *dose);
        }
        table.push(
            row.num("subjects", cell.subjects)
                .num("observed", cell.responses)
                .num("expected", expected)
                .num("residual", cell.responses - expected)
                .num("probability", p),
        );
    }
    table
}

fn confidence_limits_table(
    prepared: &PreparedProbit,
    config: &ProbitConfig,
    fitted: &ProbitFit,
    heterogeneity: Option<f64>,
    df: f64,
) -> ResultTable {
    let dose = prepared.covariates[0].display_name();
    let limits = |title: String, prefix: &str| {
        ColumnHeader::group(
            title,
            vec![
                ColumnHeader::leaf("Estimate", format!("{}estimate", prefix)),
                ColumnHeader::leaf("Lower Bound", format!("{}lowerBound", prefix)),
                ColumnHeader::leaf("Upper Bound", format!("{}upperBound", prefix)),
            ],
        )
    };
    let transformed = config.transform != Transform::None;
    let mut headers = vec![
        ColumnHeader::row_label(""),
        ColumnHeader::row_label("Probability"),
        limits(format!("95% Confidence Limits for {}", dose), ""),
    ];
    if transformed {
        headers.push(limits(format!("95% Confidence Limits for log({})", dose), "log."));
    }
    let mut table = ResultTable::new("Confidence Limits", headers);

    let scale = heterogeneity.unwrap_or(1.0).sqrt();
    let critical = multiplier(heterogeneity, df);
    let levels = prepared.levels.len();
    for (level, (_, label)) in prepared.levels.iter().enumerate() {
        let group = match &prepared.factor {
            Some(factor) => format!("{} = {}", factor.display_name(), label),
            None => config.model.label().to_string(),
        };
        for p in CONFIDENCE_PROBABILITIES {
            let Some((x, se)) = effective_dose(config.model, fitted, levels, level, p) else {
                continue;
            };
            let se = se * scale;
            let (lower, upper) = (x - critical * se, x + critical * se);
            let mut row = TableRow::new([group.clone(), format!("{:.3}", p)])
                .num("estimate", config.transform.invert(x))
                .num("lowerBound", config.transform.invert(lower))
                .num("upperBound", config.transform.invert(upper));
            if transformed {
                row = row
                    .num("log.estimate", x)
                    .num("log.lowerBound", lower)
                    .num("log.upperBound", upper);
            }
            table.push(row);
        }
    }
    match config.transform {
        Transform::None => {}
        Transform::Log10 => table.footnote("a. Logarithm base = 10."),
        Transform::Ln => table.footnote("a. Logarithm base = 2.718."),
    }
    table
}
