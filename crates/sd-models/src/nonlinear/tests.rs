//! Tests for nonlinear regression and model expressions

use approx::assert_abs_diff_eq;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};

use sd_core::data::{DataBlock, DataBlockBuilder, MissingSpec, VariableBuilder};
use sd_core::{ErrorAccumulator, ErrorStage, ResultTable};

use super::expression::Arity;
use super::*;
use crate::base::{AnalysisOutput, run_analysis};

fn eval(source: &str) -> f64 {
    Expression::parse(source, &[], &FunctionRegistry::standard())
        .unwrap()
        .eval(&[], &[])
}

fn parse_error(source: &str) -> ModelError {
    Expression::parse(source, &["a".to_string()], &FunctionRegistry::standard()).unwrap_err()
}

// ==================== Expressions ====================

#[test]
fn test_operator_precedence() {
    assert_eq!(eval("2 + 3 * 4 ^ 2"), 50.0);
    assert_eq!(eval("(1 + 2) * 3"), 9.0);
    assert_eq!(eval("10 - 4 - 3"), 3.0);
    assert_eq!(eval("12 / 3 / 2"), 2.0);
    assert_eq!(eval("-2 ^ 2"), -4.0);
    assert_eq!(eval("2 ^ 3 ^ 2"), 512.0);
    assert_eq!(eval("2 ** 3"), 8.0);
    assert_eq!(eval("2 ^ -1"), 0.5);
    assert_eq!(eval("1.5e1 + .5"), 15.5);
    assert_eq!(eval("1e-2 * 100"), 1.0);
}

#[test]
fn test_functions() {
    assert_eq!(eval("exp(0)"), 1.0);
    assert_abs_diff_eq!(eval("LN(exp(2))"), 2.0, epsilon = 1e-12);
    assert_eq!(eval("lg10(1000)"), 3.0);
    assert_eq!(eval("max(1, 7, 3) - min(4, 2)"), 5.0);
    assert_eq!(eval("sqrt(abs(-16))"), 4.0);
}

#[test]
fn test_custom_function_registry() {
    let mut registry = FunctionRegistry::new();
    registry.register("double", Arity::Exact(1), |a| 2.0 * a[0]);
    let expression = Expression::parse("double(a) + x", &["a".to_string()], &registry).unwrap();
    assert_eq!(expression.eval(&[3.0], &[1.0]), 7.0);
    assert!(Expression::parse("exp(a)", &["a".to_string()], &registry).is_err());
}

#[test]
fn test_parameters_and_variables() {
    let parameters = vec!["b0".to_string(), "b1".to_string()];
    let expression =
        Expression::parse("b0 * exp(B1 * x) + z - x", &parameters, &FunctionRegistry::standard())
            .unwrap();
    assert_eq!(expression.variables(), &["x".to_string(), "z".to_string()]);
    assert!(expression.uses_parameter(0) && expression.uses_parameter(1));
    assert_abs_diff_eq!(expression.eval(&[2.0, 0.5], &[2.0, 1.0]), 2.0 * 1f64.exp() - 1.0, epsilon = 1e-12);
}

#[test]
fn test_parse_errors_carry_positions() {
    assert_eq!(
        parse_error("a +").to_string(),
        "Expression error at position 3: Unexpected end of expression"
    );
    assert_eq!(
        parse_error("foo(a)").to_string(),
        "Expression error at position 0: Unknown function 'foo'"
    );
    assert_eq!(
        parse_error("exp(a, 2)").to_string(),
        "Expression error at position 0: Function 'exp' expects 1 argument(s), found 2"
    );
    assert_eq!(
        parse_error("(a + 1").to_string(),
        "Expression error at position 6: Unexpected end of expression, expected ')'"
    );
    assert_eq!(
        parse_error("a 2").to_string(),
        "Expression error at position 2: Unexpected '2'"
    );
    assert!(matches!(parse_error(""), ModelError::Expression { position: 0, .. }));
}

// ==================== Regression ====================

fn block(name: &str, values: &[f64]) -> DataBlock {
    DataBlockBuilder::new(name)
        .with_numeric(name, values.iter().map(|v| Some(*v)))
        .unwrap()
        .build()
}

fn input(x: &[f64], y: &[f64]) -> AnalysisInput {
    AnalysisInput::new()
        .with_block(block("y", y))
        .with_block(block("x", x))
}

fn config(expression: &str, parameters: &[(&str, f64)]) -> NonlinearConfig {
    NonlinearConfig {
        dependent: Some("y".into()),
        model_expression: expression.into(),
        parameters: parameters
            .iter()
            .map(|(name, start)| ParameterSpec {
                name: name.to_string(),
                start: *start,
            })
            .collect(),
        ..NonlinearConfig::default()
    }
}

fn run(input: &AnalysisInput, config: &NonlinearConfig) -> AnalysisOutput {
    run_analysis::<Nonlinear>(input, config, ErrorAccumulator::new(), &RunContext::new())
}

fn value(table: &ResultTable, row: &[&str], key: &str) -> f64 {
    table.find_row(row).and_then(|r| r.get_f64(key)).unwrap()
}

const LINE_X: [f64; 5] = [1.0, 2.0, 3.0, 4.0, 5.0];
const LINE_Y: [f64; 5] = [2.1, 3.9, 6.2, 7.8, 10.1];

#[test]
fn test_linear_model_matches_least_squares() {
    let output = run(&input(&LINE_X, &LINE_Y), &config("a + b * x", &[("a", 0.0), ("b", 0.0)]));
    assert!(output.is_success(), "{}", output.get_all_errors());

    let estimates = output.table("Parameter Estimates").unwrap();
    assert_abs_diff_eq!(value(estimates, &["a"], "estimate"), 0.05, epsilon = 1e-6);
    assert_abs_diff_eq!(value(estimates, &["b"], "estimate"), 1.99, epsilon = 1e-6);
    assert_abs_diff_eq!(value(estimates, &["b"], "stdError"), 0.0597216, epsilon = 1e-5);
    assert_abs_diff_eq!(value(estimates, &["a"], "stdError"), 0.198074, epsilon = 1e-5);

    let correlations = output.table("Correlations of Parameter Estimates").unwrap();
    assert_abs_diff_eq!(value(correlations, &["a"], "b"), -3.0 / 11f64.sqrt(), epsilon = 1e-5);
    assert_abs_diff_eq!(value(correlations, &["b"], "b"), 1.0, epsilon = 1e-12);

    let anova = output.table("ANOVA").unwrap();
    assert_abs_diff_eq!(value(anova, &["Residual"], "sumOfSquares"), 0.107, epsilon = 1e-8);
    assert_eq!(value(anova, &["Residual"], "df"), 3.0);
    assert_abs_diff_eq!(value(anova, &["Corrected Total"], "sumOfSquares"), 39.708, epsilon = 1e-8);
    assert!(anova.footnotes.iter().any(|f| f.ends_with("= .997.") || f.ends_with("= 0.997.")));
}

#[test]
fn test_exponential_model_converges_to_exact_fit() {
    let x = [0.0, 1.0, 2.0, 3.0, 4.0, 5.0];
    let y: Vec<f64> = x.iter().map(|x| 2.0 * (0.3_f64 * x).exp()).collect();
    let output = run(&input(&x, &y), &config("a * exp(b * x)", &[("a", 1.0), ("b", 0.1)]));
    assert!(output.is_success(), "{}", output.get_all_errors());

    let estimates = output.table("Parameter Estimates").unwrap();
    assert_abs_diff_eq!(value(estimates, &["a"], "estimate"), 2.0, epsilon = 1e-5);
    assert_abs_diff_eq!(value(estimates, &["b"], "estimate"), 0.3, epsilon = 1e-6);

    let history = output.table("Iteration History").unwrap();
    let first = value(history, &["0"], "residualSumOfSquares");
    let last = history.rows.last().and_then(|r| r.get_f64("residualSumOfSquares")).unwrap();
    assert!(last < first * 1e-6);
    assert_eq!(value(history, &["0"], "b"), 0.1);
}

#[test]
fn test_exponential_model_with_noise() {
    let mut rng = StdRng::seed_from_u64(42);
    let noise = Normal::new(0.0, 0.05).unwrap();
    let x: Vec<f64> = (0..=20).map(|i| i as f64 * 0.5).collect();
    let y: Vec<f64> = x
        .iter()
        .map(|x| 2.0 * (0.3_f64 * x).exp() + noise.sample(&mut rng))
        .collect();
    let output = run(&input(&x, &y), &config("a * exp(b * x)", &[("a", 1.0), ("b", 0.1)]));
    assert!(output.is_success(), "{}", output.get_all_errors());

    let estimates = output.table("Parameter Estimates").unwrap();
    assert_abs_diff_eq!(value(estimates, &["a"], "estimate"), 2.0, epsilon = 0.05);
    assert_abs_diff_eq!(value(estimates, &["b"], "estimate"), 0.3, epsilon = 0.005);
    let se = value(estimates, &["b"], "stdError");
    assert!(se > 0.0 && se < 0.005);
    assert!(value(estimates, &["b"], "lowerBound") < value(estimates, &["b"], "upperBound"));
}

#[test]
fn test_iteration_limit_is_reported() {
    let x = [0.0, 1.0, 2.0, 3.0, 4.0, 5.0];
    let y: Vec<f64> = x.iter().map(|x| 2.0 * (0.3_f64 * x).exp()).collect();
    let mut cfg = config("a * exp(b * x)", &[("a", 1.0), ("b", 0.1)]);
    cfg.max_iterations = 1;
    let output = run(&input(&x, &y), &cfg);
    assert!(output.is_success());
    let history = output.table("Iteration History").unwrap();
    assert_eq!(history.rows.len(), 2);
    assert!(history.footnotes.iter().any(|f| f.contains("maximum number of iterations")));
}

#[test]
fn test_case_weights_scale_the_fit() {
    let weighted = input(&[1.0, 2.0, 3.0], &[1.0, 2.0, 6.0])
        .with_block(block("w", &[2.0, 1.0, 1.0]))
        .with_weight("w");
    let replicated = input(&[1.0, 1.0, 2.0, 3.0], &[1.0, 1.0, 2.0, 6.0]);
    let cfg = config("a + b * x", &[("a", 0.0), ("b", 1.0)]);

    let a = run(&weighted, &cfg);
    let b = run(&replicated, &cfg);
    let ea = a.table("Parameter Estimates").unwrap();
    let eb = b.table("Parameter Estimates").unwrap();
    assert_abs_diff_eq!(value(ea, &["b"], "estimate"), value(eb, &["b"], "estimate"), epsilon = 1e-6);
    assert_abs_diff_eq!(value(ea, &["b"], "stdError"), value(eb, &["b"], "stdError"), epsilon = 1e-6);
}

#[test]
fn test_missing_cases_are_dropped() {
    let data = AnalysisInput::new()
        .with_block(
            DataBlockBuilder::new("y")
                .with_numeric("y", [Some(2.0), None, Some(6.0), Some(8.0)])
                .unwrap()
                .build(),
        )
        .with_block(block("x", &[1.0, 2.0, 3.0, 4.0]));
    let output = run(&data, &config("a + b * x", &[("a", 0.0), ("b", 1.0)]));
    let anova = output.table("ANOVA").unwrap();
    assert_eq!(value(anova, &["Uncorrected Total"], "df"), 3.0);
}

#[test]
fn test_validation_messages() {
    let mut cfg = config("a * exp(b * x", &[("a", 1.0), ("A", 1.0)]);
    cfg.dependent = None;
    cfg.max_iterations = 0;
    let output = run(&input(&LINE_X, &LINE_Y), &cfg);
    let messages = output.get_all_errors();
    assert!(messages.contains("A dependent variable must be selected."));
    assert!(messages.contains("Parameter 'A' is defined more than once."));
    assert!(messages.contains("Maximum iterations must be at least 1."));
    assert!(messages.contains("Expression error at position"));
    assert!(output.errors.iter().all(|e| e.stage == ErrorStage::Validation));
}

#[test]
fn test_unused_parameter_is_rejected() {
    let output = run(
        &input(&LINE_X, &LINE_Y),
        &config("a * x", &[("a", 1.0), ("c", 1.0)]),
    );
    assert_eq!(
        output.get_all_errors(),
        "Parameter 'c' does not appear in the model expression."
    );
}

#[test]
fn test_all_user_missing_dependent() {
    let y = VariableBuilder::new("y").missing(MissingSpec::discrete([9.0])).build();
    let x = VariableBuilder::new("x").column(1).build();
    let data = DataBlockBuilder::new("data")
        .with_column(y, vec![9.0; LINE_X.len()])
        .unwrap()
        .with_column(x, LINE_X.to_vec())
        .unwrap()
        .build();
    let output = run(
        &AnalysisInput::new().with_block(data),
        &config("a + b * x", &[("a", 0.0), ("b", 1.0)]),
    );
    assert_eq!(output.errors.len(), 1);
    assert_eq!(output.errors[0].stage, ErrorStage::Coercion);
    assert_eq!(
        output.get_all_errors(),
        "Dependent variable 'y' contains all null/invalid values"
    );
}

#[test]
fn test_unknown_model_variable() {
    let output = run(&input(&LINE_X, &LINE_Y), &config("a * t", &[("a", 1.0)]));
    assert_eq!(output.get_all_errors(), "Variable 't' not found");
    assert_eq!(output.errors[0].stage, ErrorStage::Coercion);
}

#[test]
fn test_model_undefined_at_start() {
    let output = run(&input(&LINE_X, &LINE_Y), &config("ln(a - x)", &[("a", 0.0)]));
    assert!(!output.is_success());
    assert_eq!(output.errors[0].stage, ErrorStage::Computation);
    assert!(output.get_all_errors().contains("starting values (case 1)"));
}

#[test]
fn test_config_from_json() {
    let config: NonlinearConfig = serde_json::from_value(serde_json::json!({
        "dependent": "y",
        "modelExpression": "a * exp(b * x)",
        "parameters": [{ "name": "a", "start": 2 }, { "name": "b" }]
    }))
    .unwrap();
    assert_eq!(config.parameters[1].start, 1.0);
    assert_eq!(config.max_iterations, 100);
    assert_eq!(config.parameter_convergence, 1e-8);
}
