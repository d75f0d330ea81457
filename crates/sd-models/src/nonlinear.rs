//! NLR: nonlinear least squares by Levenberg–Marquardt
//!
//! Derivatives are forward differences; the damping term is scaled by the
//! diagonal of `J'WJ`.

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use sd_core::data::{Variable, coerce_column, require_non_empty};
use sd_core::stats::distribution::t_quantile;
use sd_core::{ColumnHeader, ErrorAccumulator, ResultTable, TableRow};

use crate::base::{Analysis, AnalysisInput, Result, RunContext};
use crate::error::ModelError;
use crate::linalg::{cross_product, pseudo_inverse, spd_inverse};

pub mod expression;

#[cfg(test)]
mod tests;

pub use expression::{Arity, Expression, FunctionRegistry};

/// Initial Marquardt damping
const INITIAL_LAMBDA: f64 = 1e-3;

/// Damping beyond which a step is abandoned
const MAX_LAMBDA: f64 = 1e16;

/// A model parameter with its starting value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterSpec {
    pub name: String,
    #[serde(default = "default_start")]
    pub start: f64,
}

fn default_start() -> f64 {
    1.0
}

/// Configuration of a nonlinear regression run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NonlinearConfig {
    pub dependent: Option<String>,
    pub model_expression: String,
    pub parameters: Vec<ParameterSpec>,
    pub max_iterations: i64,
    /// Relative reduction of the residual sum of squares
    pub sum_squares_convergence: f64,
    /// Relative change of the parameters
    pub parameter_convergence: f64,
}

impl Default for NonlinearConfig {
    fn default() -> Self {
        Self {
            dependent: None,
            model_expression: String::new(),
            parameters: Vec::new(),
            max_iterations: 100,
            sum_squares_convergence: 1e-8,
            parameter_convergence: 1e-8,
        }
    }
}

impl NonlinearConfig {
    pub fn parameter_names(&self) -> Vec<String> {
        self.parameters.iter().map(|p| p.name.clone()).collect()
    }
}

#[derive(Debug, Clone)]
pub struct PreparedNonlinear {
    pub dependent: Variable,
    pub expression: Expression,
    pub y: Vec<f64>,
    /// One row of model-variable values per case
    pub x: Vec<Vec<f64>>,
    pub weights: Vec<f64>,
}

impl PreparedNonlinear {
    fn predict(&self, theta: &[f64]) -> Vec<f64> {
        self.x.iter().map(|row| self.expression.eval(theta, row)).collect()
    }

    fn sum_of_squares(&self, predicted: &[f64]) -> f64 {
        self.y
            .iter()
            .zip(predicted)
            .zip(&self.weights)
            .map(|((y, f), w)| w * (y - f).powi(2))
            .sum()
    }

    /// Forward-difference Jacobian of the predictions
    fn jacobian(&self, theta: &[f64], predicted: &[f64]) -> DMatrix<f64> {
        let mut jacobian = DMatrix::zeros(self.y.len(), theta.len());
        let mut shifted = theta.to_vec();
        for j in 0..theta.len() {
            let h = f64::EPSILON.sqrt() * theta[j].abs().max(1.0);
            shifted[j] = theta[j] + h;
            for (i, row) in self.x.iter().enumerate() {
                jacobian[(i, j)] = (self.expression.eval(&shifted, row) - predicted[i]) / h;
            }
            shifted[j] = theta[j];
        }
        jacobian
    }
}

/// Why the iterations stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    SumOfSquares,
    Parameters,
    IterationLimit,
    /// No damped step reduces the sum of squares
    NoImprovement,
}

/// One row of the iteration history
#[derive(Debug, Clone, PartialEq)]
pub struct IterationRecord {
    pub iteration: usize,
    pub sum_of_squares: f64,
    pub parameters: Vec<f64>,
}

#[derive(Debug, Clone)]
pub struct NonlinearFit {
    pub parameters: Vec<f64>,
    pub sum_of_squares: f64,
    pub history: Vec<IterationRecord>,
    pub stop: StopReason,
    /// Asymptotic covariance of the estimates
    pub covariance: DMatrix<f64>,
    pub residual_df: f64,
    pub predicted: Vec<f64>,
}

impl NonlinearFit {
    pub fn standard_errors(&self) -> Vec<f64> {
        (0..self.parameters.len())
            .map(|i| self.covariance[(i, i)].max(0.0).sqrt())
            .collect()
    }
}

/// Minimise the weighted residual sum of squares from `start`
pub fn levenberg_marquardt(
    prepared: &PreparedNonlinear,
    start: &[f64],
    config: &NonlinearConfig,
    ctx: &RunContext,
) -> Result<NonlinearFit> {
    let p = start.len();
    let total_weight: f64 = prepared.weights.iter().sum();
    if total_weight <= p as f64 {
        return Err(ModelError::InsufficientData {
            n_samples: total_weight as usize,
            n_predictors: p,
        });
    }

    let mut theta = start.to_vec();
    let mut predicted = prepared.predict(&theta);
    if let Some(case) = predicted.iter().position(|v| !v.is_finite()) {
        return Err(ModelError::numerical(
            format!("the model cannot be evaluated at the starting values (case {})", case + 1),
            "nonlinear_regression",
        ));
    }
    let mut ss = prepared.sum_of_squares(&predicted);
    let weights = DVector::from_vec(prepared.weights.clone());
    let mut history = vec![IterationRecord {
        iteration: 0,
        sum_of_squares: ss,
        parameters: theta.clone(),
    }];

    let mut lambda = INITIAL_LAMBDA;
    let max_iterations = config.max_iterations.max(1) as usize;
    let mut stop = StopReason::IterationLimit;

    for iteration in 1..=max_iterations {
        ctx.check()?;
        if ss == 0.0 {
            stop = StopReason::SumOfSquares;
            break;
        }
        let jacobian = prepared.jacobian(&theta, &predicted);
        let information = cross_product(&jacobian, &weights);
        let residuals = DVector::from_iterator(
            prepared.y.len(),
            prepared.y.iter().zip(&predicted).map(|(y, f)| y - f),
        );
        let gradient = jacobian.transpose() * residuals.component_mul(&weights);

        let mut accepted = None;
        while lambda <= MAX_LAMBDA {
            let mut damped = information.clone();
            for j in 0..p {
                damped[(j, j)] += lambda * information[(j, j)].max(1e-12);
            }
            let Ok(inverse) = spd_inverse(&damped, "nonlinear_step") else {
                lambda *= 10.0;
                continue;
            };
            let step = inverse * &gradient;
            let candidate: Vec<f64> = theta.iter().zip(step.iter()).map(|(t, s)| t + s).collect();
            let candidate_predicted = prepared.predict(&candidate);
            let candidate_ss = prepared.sum_of_squares(&candidate_predicted);
            if candidate_ss.is_finite() && candidate_ss <= ss {
                accepted = Some((candidate, candidate_predicted, candidate_ss));
                lambda = (lambda / 10.0).max(1e-12);
                break;
            }
            lambda *= 10.0;
        }

        let Some((candidate, candidate_predicted, candidate_ss)) = accepted else {
            stop = StopReason::NoImprovement;
            break;
        };

        let ss_reduction = (ss - candidate_ss) / ss;
        let parameter_change = theta
            .iter()
            .zip(&candidate)
            .map(|(old, new)| (new - old).abs() / old.abs().max(1e-10))
            .fold(0.0, f64::max);

        theta = candidate;
        predicted = candidate_predicted;
        ss = candidate_ss;
        history.push(IterationRecord {
            iteration,
            sum_of_squares: ss,
            parameters: theta.clone(),
        });
        debug!(iteration, sum_of_squares = ss, lambda, "nonlinear iteration");

        if ss_reduction <= config.sum_squares_convergence {
            stop = StopReason::SumOfSquares;
            break;
        }
        if parameter_change <= config.parameter_convergence {
            stop = StopReason::Parameters;
            break;
        }
    }

    let jacobian = prepared.jacobian(&theta, &predicted);
    let information = cross_product(&jacobian, &weights);
    let inverse = match spd_inverse(&information, "nonlinear_covariance") {
        Ok(inverse) => inverse,
        Err(_) => pseudo_inverse(&information, "nonlinear_covariance")?,
    };
    let residual_df = total_weight - p as f64;
    Ok(NonlinearFit {
        covariance: inverse * (ss / residual_df),
        parameters: theta,
        sum_of_squares: ss,
        history,
        stop,
        residual_df,
        predicted,
    })
}

/// Nonlinear regression analysis
pub struct Nonlinear;

impl Analysis for Nonlinear {
    const NAME: &'static str = "nonlinear";
    type Config = NonlinearConfig;
    type Prepared = PreparedNonlinear;

    fn validate(config: &NonlinearConfig, errors: &mut ErrorAccumulator) {
        errors.check(
            config.dependent.is_some(),
            "A dependent variable must be selected.",
        );
        errors.check(
            !config.model_expression.trim().is_empty(),
            "A model expression must be specified.",
        );
        errors.check(
            !config.parameters.is_empty(),
            "At least one parameter must be defined.",
        );
        for (i, parameter) in config.parameters.iter().enumerate() {
            if config.parameters[..i]
                .iter()
                .any(|other| other.name.eq_ignore_ascii_case(&parameter.name))
            {
                errors.validation(format!(
                    "Parameter '{}' is defined more than once.",
                    parameter.name
                ));
            }
        }
        errors.check(
            config.max_iterations >= 1,
            "Maximum iterations must be at least 1.",
        );
        errors.check(
            (0.0..1.0).contains(&config.sum_squares_convergence),
            "Sum-of-squares convergence must be between 0 and 1.",
        );
        errors.check(
            (0.0..1.0).contains(&config.parameter_convergence),
            "Parameter convergence must be between 0 and 1.",
        );

        if config.model_expression.trim().is_empty() {
            return;
        }
        let registry = FunctionRegistry::standard();
        match Expression::parse(&config.model_expression, &config.parameter_names(), &registry) {
            Ok(expression) => {
                for (i, parameter) in config.parameters.iter().enumerate() {
                    if !expression.uses_parameter(i) {
                        errors.validation(format!(
                            "Parameter '{}' does not appear in the model expression.",
                            parameter.name
                        ));
                    }
                }
            }
            Err(err) => errors.push(err.to_record()),
        }
    }

    fn prepare(
        input: &AnalysisInput,
        config: &NonlinearConfig,
        errors: &mut ErrorAccumulator,
    ) -> Option<PreparedNonlinear> {
        let registry = FunctionRegistry::standard();
        let expression =
            match Expression::parse(&config.model_expression, &config.parameter_names(), &registry) {
                Ok(expression) => expression,
                Err(err) => {
                    errors.push(err.to_record());
                    return None;
                }
            };
        let weights = match input.case_weights() {
            Ok(w) => w,
            Err(err) => {
                errors.push(err.to_record());
                return None;
            }
        };
        let dependent = match input.require(config.dependent.as_deref()?) {
            Ok(found) => found,
            Err(err) => {
                errors.push(err.to_record());
                return None;
            }
        };
        let model_variables = input.resolve(expression.variables(), errors);
        if model_variables.len() < expression.variables().len() {
            return None;
        }
        for (variable, _) in std::iter::once(&dependent).chain(&model_variables) {
            if !variable.is_numeric() {
                errors.coercion(format!("Variable '{}' is not numeric", variable.name));
            }
        }
        if !errors.is_empty() {
            return None;
        }
        let dependent_column = coerce_column(dependent.1, dependent.0, &weights);
        let field = format!("Dependent variable '{}'", dependent.0.name);
        if let Err(err) = require_non_empty(&dependent_column, &field) {
            errors.push(ModelError::Data(err).to_record());
            return None;
        }

        let mut y = Vec::new();
        let mut x = Vec::new();
        let mut case_weights = Vec::new();
        for case in 0..input.ncases() {
            let Some(w) = weights.get(case) else {
                continue;
            };
            let Some(value) = dependent.1.get(case).and_then(|c| dependent.0.coerce_cell(c)) else {
                continue;
            };
            let row: Option<Vec<f64>> = model_variables
                .iter()
                .map(|(v, column)| column.get(case).and_then(|c| v.coerce_cell(c)))
                .collect();
            let Some(row) = row else {
                continue;
            };
            y.push(value);
            x.push(row);
            case_weights.push(w);
        }
        if y.is_empty() {
            return None;
        }

        Some(PreparedNonlinear {
            dependent: dependent.0.clone(),
            expression,
            y,
            x,
            weights: case_weights,
        })
    }

    #[instrument(name = "nonlinear", skip_all, fields(cases = prepared.y.len()))]
    fn compute(
        prepared: PreparedNonlinear,
        config: &NonlinearConfig,
        ctx: &RunContext,
    ) -> Result<Vec<ResultTable>> {
        let start: Vec<f64> = config.parameters.iter().map(|p| p.start).collect();
        let fitted = levenberg_marquardt(&prepared, &start, config, ctx)?;
        info!(
            iterations = fitted.history.len() - 1,
            sum_of_squares = fitted.sum_of_squares,
            stop = ?fitted.stop,
            "nonlinear model fitted"
        );

        Ok(vec![
            history_table(config, &fitted),
            estimates_table(config, &fitted),
            correlations_table(config, &fitted),
            anova_table(&prepared, config, &fitted),
        ])
    }
}

fn parameter_columns(config: &NonlinearConfig) -> Vec<ColumnHeader> {
    config
        .parameters
        .iter()
        .map(|p| ColumnHeader::leaf(p.name.clone(), p.name.clone()))
        .collect()
}

fn history_table(config: &NonlinearConfig, fitted: &NonlinearFit) -> ResultTable {
    let mut table = ResultTable::new(
        "Iteration History",
        vec![
            ColumnHeader::row_label("Iteration Number"),
            ColumnHeader::leaf("Residual Sum of Squares", "residualSumOfSquares"),
            ColumnHeader::group("Parameter", parameter_columns(config)),
        ],
    );
    for record in &fitted.history {
        let mut row = TableRow::new([record.iteration.to_string()])
            .num("residualSumOfSquares", record.sum_of_squares);
        for (spec, value) in config.parameters.iter().zip(&record.parameters) {
            row = row.num(&spec.name, *value);
        }
        table.push(row);
    }

    table.footnote("Derivatives are calculated numerically.");
    let iterations = fitted.history.len() - 1;
    table.footnote(match fitted.stop {
        StopReason::SumOfSquares => format!(
            "a. Run stopped after {} iterations because the relative reduction between successive residual sums of squares is at most SSCON = {:e}.",
            iterations, config.sum_squares_convergence
        ),
        StopReason::Parameters => format!(
            "a. Run stopped after {} iterations because the relative change between successive parameter estimates is at most PCON = {:e}.",
            iterations, config.parameter_convergence
        ),
        StopReason::IterationLimit => format!(
            "a. Run stopped after {} iterations because the maximum number of iterations was reached. The solution may not be optimal.",
            iterations
        ),
        StopReason::NoImprovement => format!(
            "a. Run stopped after {} iterations because no step reduces the residual sum of squares.",
            iterations
        ),
    });
    table
}

fn estimates_table(config: &NonlinearConfig, fitted: &NonlinearFit) -> ResultTable {
    let mut table = ResultTable::new(
        "Parameter Estimates",
        vec![
            ColumnHeader::row_label("Parameter"),
            ColumnHeader::leaf("Estimate", "estimate"),
            ColumnHeader::leaf("Std. Error", "stdError"),
            ColumnHeader::group(
                "95% Confidence Interval",
                vec![
                    ColumnHeader::leaf("Lower Bound", "lowerBound"),
                    ColumnHeader::leaf("Upper Bound", "upperBound"),
                ],
            ),
        ],
    );
    let critical = t_quantile(0.975, fitted.residual_df);
    for ((spec, estimate), se) in config
        .parameters
        .iter()
        .zip(&fitted.parameters)
        .zip(fitted.standard_errors())
    {
        table.push(
            TableRow::new([spec.name.clone()])
                .num("estimate", *estimate)
                .num("stdError", se)
                .opt("lowerBound", critical.map(|t| estimate - t * se))
                .opt("upperBound", critical.map(|t| estimate + t * se)),
        );
    }
    table
}

fn correlations_table(config: &NonlinearConfig, fitted: &NonlinearFit) -> ResultTable {
    let mut headers = vec![ColumnHeader::row_label("")];
    headers.extend(parameter_columns(config));
    let mut table = ResultTable::new("Correlations of Parameter Estimates", headers);

    let se = fitted.standard_errors();
    for (i, spec) in config.parameters.iter().enumerate() {
        let mut row = TableRow::new([spec.name.clone()]);
        for (j, other) in config.parameters.iter().enumerate() {
            let denominator = se[i] * se[j];
            let r = (denominator > 0.0).then(|| fitted.covariance[(i, j)] / denominator);
            row = row.opt(&other.name, r);
        }
        table.push(row);
    }
    table
}

fn anova_table(prepared: &PreparedNonlinear, config: &NonlinearConfig, fitted: &NonlinearFit) -> ResultTable {
    let mut table = ResultTable::new(
        "ANOVA",
        vec![
            ColumnHeader::row_label("Source"),
            ColumnHeader::leaf("Sum of Squares", "sumOfSquares"),
            ColumnHeader::leaf("df", "df"),
            ColumnHeader::leaf("Mean Squares", "meanSquare"),
        ],
    );
    let w = &prepared.weights;
    let n: f64 = w.iter().sum();
    let p = config.parameters.len() as f64;
    let regression: f64 = fitted.predicted.iter().zip(w).map(|(f, w)| w * f * f).sum();
    let uncorrected: f64 = prepared.y.iter().zip(w).map(|(y, w)| w * y * y).sum();
    let mean = prepared.y.iter().zip(w).map(|(y, w)| w * y).sum::<f64>() / n;
    let corrected: f64 = prepared.y.iter().zip(w).map(|(y, w)| w * (y - mean).powi(2)).sum();

    table.push(
        TableRow::new(["Regression"])
            .num("sumOfSquares", regression)
            .num("df", p)
            .num("meanSquare", regression / p),
    );
    table.push(
        TableRow::new(["Residual"])
            .num("sumOfSquares", fitted.sum_of_squares)
            .num("df", fitted.residual_df)
            .num("meanSquare", fitted.sum_of_squares / fitted.residual_df),
    );
    table.push(
        TableRow::new(["Uncorrected Total"])
            .num("sumOfSquares", uncorrected)
            .num("df", n),
    );
    table.push(
        TableRow::new(["Corrected Total"])
            .num("sumOfSquares", corrected)
            .num("df", n - 1.0),
    );

    table.footnote(format!("Dependent variable: {}", prepared.dependent.display_name()));
    if corrected > 0.0 {
        table.footnote(format!(
            "a. R squared = 1 - (Residual Sum of Squares) / (Corrected Sum of Squares) = {:.3}.",
            1.0 - fitted.sum_of_squares / corrected
        ));
    }
    table
}
