//! Tests for PROBIT

use approx::assert_abs_diff_eq;

use sd_core::data::{DataBlock, DataBlockBuilder, MissingSpec, VariableBuilder};
use sd_core::stats::distribution::normal_cdf;
use sd_core::{ErrorAccumulator, ErrorStage, ResultTable};

use super::*;
use crate::base::{AnalysisOutput, run_analysis};

const DOSES: [f64; 5] = [1.0, 2.0, 3.0, 4.0, 5.0];

fn column(name: &str, values: &[f64]) -> DataBlock {
    DataBlockBuilder::new(name)
        .with_numeric(name, values.iter().map(|v| Some(*v)))
        .unwrap()
        .build()
}

/// Responses that sit exactly on `C + (1 − C)·F(a + b·x)`
fn exact_responses(model: ProbitModel, a: f64, b: f64, c: f64, x: &[f64]) -> Vec<f64> {
    x.iter()
        .map(|x| 100.0 * (c + (1.0 - c) * model.cdf(a + b * x)))
        .collect()
}

fn cells(x: &[f64], responses: &[f64]) -> Vec<DoseCell> {
    x.iter()
        .zip(responses)
        .enumerate()
        .map(|(i, (x, r))| DoseCell {
            case: i + 1,
            level: 0,
            doses: vec![*x],
            x: vec![*x],
            responses: *r,
            subjects: 100.0,
        })
        .collect()
}

fn input(doses: &[f64], responses: &[f64]) -> AnalysisInput {
    AnalysisInput::new()
        .with_block(column("r", responses))
        .with_block(column("n", &vec![100.0; responses.len()]))
        .with_block(column("dose", doses))
}

fn config() -> ProbitConfig {
    ProbitConfig {
        response_frequency: Some("r".into()),
        total_observed: Some("n".into()),
        covariates: vec!["dose".into()],
        ..ProbitConfig::default()
    }
}

fn run(input: &AnalysisInput, config: &ProbitConfig) -> AnalysisOutput {
    run_analysis::<Probit>(input, config, ErrorAccumulator::new(), &RunContext::new())
}

fn value(table: &ResultTable, row: &[&str], key: &str) -> f64 {
    table.find_row(row).and_then(|r| r.get_f64(key)).unwrap()
}

const OVERDISPERSED: [f64; 6] = [5.0, 60.0, 20.0, 90.0, 40.0, 99.0];

#[test]
fn test_link_functions() {
    assert_abs_diff_eq!(ProbitModel::Probit.cdf(0.0), 0.5, epsilon = 1e-12);
    assert_abs_diff_eq!(ProbitModel::Logit.cdf(0.0), 0.5, epsilon = 1e-12);
    assert_abs_diff_eq!(ProbitModel::Logit.quantile(0.75), 3f64.ln(), epsilon = 1e-12);
    assert_abs_diff_eq!(ProbitModel::Logit.pdf(0.0), 0.25, epsilon = 1e-12);
    assert_abs_diff_eq!(ProbitModel::Probit.quantile(normal_cdf(1.3)), 1.3, epsilon = 1e-6);
}

#[test]
fn test_fit_recovers_probit_parameters() {
    let r = exact_responses(ProbitModel::Probit, -3.0, 1.0, 0.0, &DOSES);
    let fitted = fit(
        &cells(&DOSES, &r),
        1,
        ProbitModel::Probit,
        NaturalResponse::None,
        20,
        1e-10,
        &RunContext::new(),
    )
    .unwrap();
    assert_abs_diff_eq!(fitted.theta[0], -3.0, epsilon = 1e-5);
    assert_abs_diff_eq!(fitted.theta[1], 1.0, epsilon = 1e-5);
    assert!(fitted.covariance[(1, 1)] > 0.0);

    let gof = goodness_of_fit(ProbitModel::Probit, &fitted, 1, &cells(&DOSES, &r));
    assert_abs_diff_eq!(gof.chi_square, 0.0, epsilon = 1e-6);
    assert_eq!(gof.df, 3.0);
    assert!(gof.heterogeneity(0.15).is_none());

    let (ed50, se) = effective_dose(ProbitModel::Probit, &fitted, 1, 0, 0.5).unwrap();
    assert_abs_diff_eq!(ed50, 3.0, epsilon = 1e-5);
    assert!(se > 0.0);
}

#[test]
fn test_fit_recovers_logit_parameters() {
    let r = exact_responses(ProbitModel::Logit, -6.0, 2.0, 0.0, &DOSES);
    let fitted = fit(
        &cells(&DOSES, &r),
        1,
        ProbitModel::Logit,
        NaturalResponse::None,
        20,
        1e-10,
        &RunContext::new(),
    )
    .unwrap();
    assert_abs_diff_eq!(fitted.theta[0], -6.0, epsilon = 1e-5);
    assert_abs_diff_eq!(fitted.theta[1], 2.0, epsilon = 1e-5);
}

#[test]
fn test_estimated_natural_response() {
    let r = exact_responses(ProbitModel::Probit, -3.0, 1.0, 0.1, &DOSES);
    let fitted = fit(
        &cells(&DOSES, &r),
        1,
        ProbitModel::Probit,
        NaturalResponse::Estimate,
        100,
        1e-12,
        &RunContext::new(),
    )
    .unwrap();
    assert!(fitted.estimates_natural_response);
    assert_abs_diff_eq!(fitted.natural_response, 0.1, epsilon = 1e-4);
    assert_abs_diff_eq!(fitted.theta[1], 1.0, epsilon = 1e-3);
}

#[test]
fn test_fixed_natural_response() {
    let r = exact_responses(ProbitModel::Probit, -3.0, 1.0, 0.2, &DOSES);
    let fitted = fit(
        &cells(&DOSES, &r),
        1,
        ProbitModel::Probit,
        NaturalResponse::Value(0.2),
        20,
        1e-10,
        &RunContext::new(),
    )
    .unwrap();
    assert_eq!(fitted.theta.len(), 2);
    assert_abs_diff_eq!(fitted.theta[0], -3.0, epsilon = 1e-5);
}

#[test]
fn test_analysis_tables() {
    let r = exact_responses(ProbitModel::Probit, -3.0, 1.0, 0.0, &DOSES);
    let output = run(&input(&DOSES, &r), &config());
    assert!(output.is_success(), "{}", output.get_all_errors());

    let info = output.table("Data Information").unwrap();
    assert_eq!(value(info, &["Valid"], "n"), 5.0);

    let estimates = output.table("Parameter Estimates").unwrap();
    assert_abs_diff_eq!(value(estimates, &["PROBIT", "dose"], "estimate"), 1.0, epsilon = 1e-5);
    assert_abs_diff_eq!(value(estimates, &["PROBIT", "Intercept"], "estimate"), -3.0, epsilon = 1e-5);
    let lower = value(estimates, &["PROBIT", "dose"], "lowerBound");
    let upper = value(estimates, &["PROBIT", "dose"], "upperBound");
    assert!(lower < 1.0 && upper > 1.0);

    let chi = output.table("Chi-Square Tests").unwrap();
    assert_abs_diff_eq!(
        value(chi, &["PROBIT", "Pearson Goodness-of-Fit Test"], "chiSquare"),
        0.0,
        epsilon = 1e-6
    );
    assert!(chi.footnotes.is_empty());

    let counts = output.table("Cell Counts and Residuals").unwrap();
    assert_abs_diff_eq!(value(counts, &["PROBIT", "3"], "expected"), 50.0, epsilon = 1e-4);
    assert_abs_diff_eq!(value(counts, &["PROBIT", "3"], "residual"), 0.0, epsilon = 1e-4);

    let limits = output.table("Confidence Limits").unwrap();
    assert_eq!(limits.rows.len(), CONFIDENCE_PROBABILITIES.len());
    assert_abs_diff_eq!(value(limits, &["PROBIT", "0.500"], "estimate"), 3.0, epsilon = 1e-5);
    assert!(value(limits, &["PROBIT", "0.010"], "estimate") < value(limits, &["PROBIT", "0.990"], "estimate"));
}

#[test]
fn test_log10_transform_reports_both_scales() {
    let log_doses: Vec<f64> = DOSES.iter().map(|x| 10f64.powf(*x)).collect();
    let r = exact_responses(ProbitModel::Probit, -3.0, 1.0, 0.0, &DOSES);
    let cfg = ProbitConfig {
        transform: Transform::Log10,
        ..config()
    };
    let output = run(&input(&log_doses, &r), &cfg);
    assert!(output.is_success(), "{}", output.get_all_errors());

    let limits = output.table("Confidence Limits").unwrap();
    assert_abs_diff_eq!(value(limits, &["PROBIT", "0.500"], "log.estimate"), 3.0, epsilon = 1e-5);
    assert_abs_diff_eq!(value(limits, &["PROBIT", "0.500"], "estimate"), 1000.0, epsilon = 1e-1);
    assert_eq!(limits.footnotes, vec!["a. Logarithm base = 10.".to_string()]);
}

#[test]
fn test_log_transform_rejects_zero_dose() {
    let cfg = ProbitConfig {
        transform: Transform::Ln,
        ..config()
    };
    let output = run(&input(&[0.0, 1.0, 2.0], &[1.0, 2.0, 3.0]), &cfg);
    assert_eq!(
        output.get_all_errors(),
        "The log transform requires positive covariate values (case 1)"
    );
}

#[test]
fn test_factor_levels_get_separate_intercepts() {
    let mut doses = DOSES.to_vec();
    doses.extend(DOSES);
    let mut r = exact_responses(ProbitModel::Probit, -3.0, 1.0, 0.0, &DOSES);
    r.extend(exact_responses(ProbitModel::Probit, -2.0, 1.0, 0.0, &DOSES));
    let groups: Vec<f64> = [1.0; 5].into_iter().chain([2.0; 5]).collect();

    let data = input(&doses, &r).with_block(column("g", &groups));
    let cfg = ProbitConfig {
        factor: Some("g".into()),
        ..config()
    };
    let output = run(&data, &cfg);
    assert!(output.is_success(), "{}", output.get_all_errors());

    let estimates = output.table("Parameter Estimates").unwrap();
    assert_abs_diff_eq!(
        value(estimates, &["PROBIT", "Intercept", "g = 1"], "estimate"),
        -3.0,
        epsilon = 1e-5
    );
    assert_abs_diff_eq!(
        value(estimates, &["PROBIT", "Intercept", "g = 2"], "estimate"),
        -2.0,
        epsilon = 1e-5
    );
    let limits = output.table("Confidence Limits").unwrap();
    assert_abs_diff_eq!(value(limits, &["g = 2", "0.500"], "estimate"), 2.0, epsilon = 1e-5);
    assert_eq!(value(output.table("Data Information").unwrap(), &["g", "1"], "n"), 5.0);
}

#[test]
fn test_heterogeneity_factor_applied_to_poor_fit() {
    let doses = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
    let cfg = ProbitConfig {
        max_iterations: 100,
        ..config()
    };
    let output = run(&input(&doses, &OVERDISPERSED), &cfg);
    assert!(output.is_success(), "{}", output.get_all_errors());
    let chi = output.table("Chi-Square Tests").unwrap();
    assert!(value(chi, &["PROBIT", "Pearson Goodness-of-Fit Test"], "sig") < 0.15);
    assert_eq!(chi.footnotes.len(), 1);
    assert!(chi.footnotes[0].contains("heterogeneity factor"));
}

#[test]
fn test_not_converged_is_a_computation_error() {
    let doses = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
    let cfg = ProbitConfig {
        max_iterations: 1,
        convergence: 1e-12,
        ..config()
    };
    let output = run(&input(&doses, &OVERDISPERSED), &cfg);
    assert_eq!(output.get_all_errors(), "Failed to converge after 1 iterations");
    assert_eq!(output.errors[0].stage, ErrorStage::Computation);
}

#[test]
fn test_responses_exceeding_subjects() {
    let output = run(&input(&[1.0, 2.0], &[20.0, 150.0]), &config());
    assert_eq!(
        output.get_all_errors(),
        "Number of responses (150) exceeds the number of subjects (100) in case 2"
    );
    assert_eq!(output.errors[0].stage, ErrorStage::Coercion);
}

#[test]
fn test_validation_messages() {
    let cfg = ProbitConfig {
        natural_response: NaturalResponse::Value(1.5),
        max_iterations: 0,
        ..ProbitConfig::default()
    };
    let output = run(&input(&DOSES, &DOSES), &cfg);
    let messages = output.get_all_errors();
    assert!(messages.contains("A response frequency variable must be selected."));
    assert!(messages.contains("At least one covariate must be selected."));
    assert!(messages.contains("Maximum iterations must be at least 1."));
    assert!(messages.contains("The natural response rate must be between 0 and 1."));
    assert!(output.errors.iter().all(|e| e.stage == ErrorStage::Validation));
}

#[test]
fn test_all_user_missing_response() {
    let r = VariableBuilder::new("r").missing(MissingSpec::discrete([-1.0])).build();
    let n = VariableBuilder::new("n").column(1).build();
    let counts = DataBlockBuilder::new("counts")
        .with_column(r, vec![-1.0; DOSES.len()])
        .unwrap()
        .with_column(n, vec![100.0; DOSES.len()])
        .unwrap()
        .build();
    let data = AnalysisInput::new()
        .with_block(counts)
        .with_block(column("dose", &DOSES));
    let output = run(&data, &config());
    assert_eq!(output.errors.len(), 1);
    assert_eq!(output.errors[0].stage, ErrorStage::Coercion);
    assert_eq!(
        output.get_all_errors(),
        "Response frequency variable 'r' contains all null/invalid values"
    );
}

#[test]
fn test_config_from_json() {
    let config: ProbitConfig = serde_json::from_value(serde_json::json!({
        "responseFrequency": "r",
        "totalObserved": "n",
        "covariates": ["dose"],
        "transform": "log10",
        "model": "logit",
        "naturalResponse": { "value": 0.05 }
    }))
    .unwrap();
    assert_eq!(config.transform, Transform::Log10);
    assert_eq!(config.model, ProbitModel::Logit);
    assert_eq!(config.natural_response, NaturalResponse::Value(0.05));
    assert_eq!(config.max_iterations, 20);
}
