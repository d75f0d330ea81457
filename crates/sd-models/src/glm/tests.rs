//! Tests for the univariate GLM

use approx::assert_abs_diff_eq;
use indexmap::IndexMap;

use sd_core::data::{DataBlock, DataBlockBuilder};
use sd_core::stats::distribution::{f_sf, t_two_tailed};
use sd_core::{ErrorAccumulator, ErrorStage, ResultTable};

use super::*;
use crate::base::{AnalysisOutput, run_analysis};

// ==================== Test Fixtures ====================

fn block(name: &str, columns: &[(&str, &[f64])]) -> DataBlock {
    let mut builder = DataBlockBuilder::new(name);
    for (var, values) in columns {
        builder = builder
            .with_numeric(var, values.iter().map(|v| Some(*v)))
            .unwrap();
    }
    builder.build()
}

/// Three groups of three, means 3, 6 and 9
fn one_way_input() -> AnalysisInput {
    AnalysisInput::new()
        .with_block(block(
            "dependent",
            &[("y", &[2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0])],
        ))
        .with_block(block(
            "fixFactor",
            &[("g", &[1.0, 1.0, 1.0, 2.0, 2.0, 2.0, 3.0, 3.0, 3.0])],
        ))
}

fn one_way_config() -> GlmConfig {
    GlmConfig {
        main: GlmMain {
            dependent: Some("y".into()),
            fix_factor: vec!["g".into()],
            ..GlmMain::default()
        },
        ..GlmConfig::default()
    }
}

fn run(input: &AnalysisInput, config: &GlmConfig) -> AnalysisOutput {
    run_analysis::<UnivariateGlm>(input, config, ErrorAccumulator::new(), &RunContext::new())
}

fn value(table: &ResultTable, row: &[&str], key: &str) -> f64 {
    table
        .find_row(row)
        .and_then(|r| r.get_f64(key))
        .unwrap_or_else(|| panic!("no {} in row {:?} of {}", key, row, table.title))
}

fn tests_of(output: &AnalysisOutput) -> &ResultTable {
    assert!(output.is_success(), "{}", output.get_all_errors());
    output.table("Tests of Between-Subjects Effects").unwrap()
}

// ==================== Validation ====================

#[test]
fn test_requires_a_predictor() {
    let mut cfg = one_way_config();
    cfg.main.fix_factor.clear();
    let output = run(&one_way_input(), &cfg);
    assert!(!output.is_success());
    assert_eq!(
        output.get_all_errors(),
        "At least one fixed factor, random factor, or covariate must be provided."
    );
    assert_eq!(output.errors[0].stage, ErrorStage::Validation);
}

#[test]
fn test_significance_level_bounds() {
    for sig in [-0.1, 0.0, 1.0, 1.1] {
        let mut cfg = one_way_config();
        cfg.options.sig_level = sig;
        let output = run(&one_way_input(), &cfg);
        assert_eq!(
            output.get_all_errors(),
            "Significance level must be between 0 and 1."
        );
    }
}

#[test]
fn test_validation_errors_accumulate() {
    let mut cfg = one_way_config();
    cfg.main.dependent = None;
    cfg.options.sig_level = 2.0;
    cfg.posthoc.factors = vec!["x".into()];
    cfg.posthoc.lsd = true;
    let output = run(&one_way_input(), &cfg);
    let messages: Vec<&str> = output.errors.iter().map(|e| e.message.as_str()).collect();
    assert_eq!(
        messages,
        vec![
            "A dependent variable must be selected.",
            "Significance level must be between 0 and 1.",
            "Post hoc factor 'x' must be a fixed factor.",
        ]
    );
}

#[test]
fn test_all_null_dependent_block() {
    let input = AnalysisInput::new()
        .with_block(
            DataBlockBuilder::new("dependent")
                .with_numeric("y", [None, None, None])
                .unwrap()
                .build(),
        )
        .with_block(block("fixFactor", &[("g", &[1.0, 2.0, 3.0])]));
    let output = run(&input, &one_way_config());
    assert!(!output.is_success());
    assert_eq!(output.errors[0].message, "dependent contains all null values");
    assert_eq!(output.errors[0].stage, ErrorStage::Coercion);
}

// ==================== Between-subjects tests ====================

#[test]
fn test_one_way_anova() {
    let mut cfg = one_way_config();
    cfg.options.effect_size = true;
    let output = run(&one_way_input(), &cfg);
    let table = tests_of(&output);

    assert_abs_diff_eq!(value(table, &["Corrected Model"], "sumOfSquares"), 54.0, epsilon = 1e-9);
    assert_abs_diff_eq!(value(table, &["Intercept"], "sumOfSquares"), 324.0, epsilon = 1e-9);
    assert_abs_diff_eq!(value(table, &["g"], "sumOfSquares"), 54.0, epsilon = 1e-9);
    assert_abs_diff_eq!(value(table, &["g"], "df"), 2.0);
    assert_abs_diff_eq!(value(table, &["g"], "f"), 27.0, epsilon = 1e-9);
    assert_abs_diff_eq!(value(table, &["g"], "partialEtaSquared"), 0.9, epsilon = 1e-12);
    assert_abs_diff_eq!(
        value(table, &["g"], "sig"),
        f_sf(27.0, 2.0, 6.0).unwrap(),
        epsilon = 1e-12
    );
    assert_abs_diff_eq!(value(table, &["Error"], "sumOfSquares"), 6.0, epsilon = 1e-9);
    assert_abs_diff_eq!(value(table, &["Error"], "meanSquare"), 1.0, epsilon = 1e-9);
    assert_abs_diff_eq!(value(table, &["Total"], "sumOfSquares"), 384.0, epsilon = 1e-9);
    assert_abs_diff_eq!(value(table, &["Total"], "df"), 9.0);
    assert_abs_diff_eq!(value(table, &["Corrected Total"], "sumOfSquares"), 60.0, epsilon = 1e-9);
    assert_abs_diff_eq!(value(table, &["Corrected Total"], "df"), 8.0);
    assert!(table.find_row(&["Total"]).unwrap().get("meanSquare").unwrap().is_null());

    assert!(
        table
            .footnotes
            .contains(&"a. R Squared = .900 (Adjusted R Squared = .867)".to_string())
    );
}

#[test]
fn test_sum_of_squares_types_agree_for_one_way() {
    for kind in [SumOfSquares::TypeI, SumOfSquares::TypeII, SumOfSquares::TypeIII] {
        let mut cfg = one_way_config();
        cfg.model.sum_of_squares = kind;
        let output = run(&one_way_input(), &cfg);
        let table = tests_of(&output);
        assert_eq!(table.column_headers[1].header, kind.label());
        assert_abs_diff_eq!(value(table, &["g"], "sumOfSquares"), 54.0, epsilon = 1e-9);
        assert_abs_diff_eq!(value(table, &["Intercept"], "sumOfSquares"), 324.0, epsilon = 1e-9);
    }
}

/// Unbalanced 2x2 layout, main effects only
fn additive_input() -> AnalysisInput {
    AnalysisInput::new()
        .with_block(block(
            "dependent",
            &[("y", &[3.0, 5.0, 6.0, 4.0, 2.0, 8.0, 3.0, 4.0])],
        ))
        .with_block(block(
            "fixFactor",
            &[
                ("a", &[1.0, 1.0, 1.0, 2.0, 2.0, 2.0, 2.0, 1.0]),
                ("b", &[1.0, 2.0, 2.0, 1.0, 1.0, 2.0, 1.0, 1.0]),
            ],
        ))
}

fn additive_config(kind: SumOfSquares) -> GlmConfig {
    GlmConfig {
        main: GlmMain {
            dependent: Some("y".into()),
            fix_factor: vec!["a".into(), "b".into()],
            ..GlmMain::default()
        },
        model: GlmModel {
            full_factorial: false,
            custom_terms: vec![vec!["a".into()], vec!["b".into()]],
            sum_of_squares: kind,
            intercept: true,
        },
        ..GlmConfig::default()
    }
}

#[test]
fn test_unbalanced_sum_of_squares_types() {
    let ss = |kind, source: &str| {
        let output = run(&additive_input(), &additive_config(kind));
        value(tests_of(&output), &[source], "sumOfSquares")
    };

    // sequential: a ignores b, so it equals the one-way sum of squares
    assert_abs_diff_eq!(ss(SumOfSquares::TypeI, "a"), 0.125, epsilon = 1e-9);
    assert_abs_diff_eq!(
        ss(SumOfSquares::TypeI, "b"),
        ss(SumOfSquares::TypeII, "b"),
        epsilon = 1e-9
    );
    assert_abs_diff_eq!(
        ss(SumOfSquares::TypeII, "a"),
        ss(SumOfSquares::TypeIII, "a"),
        epsilon = 1e-9
    );
    assert!((ss(SumOfSquares::TypeI, "a") - ss(SumOfSquares::TypeII, "a")).abs() > 1e-6);
}

#[test]
fn test_frequency_weights_match_replicated_cases() {
    let weighted = AnalysisInput::new()
        .with_block(block("dependent", &[("y", &[1.0, 2.0, 4.0, 7.0, 8.0])]))
        .with_block(block("fixFactor", &[("g", &[1.0, 1.0, 2.0, 2.0, 2.0])]))
        .with_block(block("weight", &[("w", &[2.0, 1.0, 1.0, 3.0, 1.0])]))
        .with_weight("w");
    let replicated = AnalysisInput::new()
        .with_block(block(
            "dependent",
            &[("y", &[1.0, 1.0, 2.0, 4.0, 7.0, 7.0, 7.0, 8.0])],
        ))
        .with_block(block(
            "fixFactor",
            &[("g", &[1.0, 1.0, 1.0, 2.0, 2.0, 2.0, 2.0, 2.0])],
        ));

    let a = run(&weighted, &one_way_config());
    let b = run(&replicated, &one_way_config());
    let (ta, tb) = (tests_of(&a), tests_of(&b));
    for source in ["Corrected Model", "Intercept", "g", "Error", "Total", "Corrected Total"] {
        assert_abs_diff_eq!(
            value(ta, &[source], "sumOfSquares"),
            value(tb, &[source], "sumOfSquares"),
            epsilon = 1e-9
        );
        assert_abs_diff_eq!(value(ta, &[source], "df"), value(tb, &[source], "df"));
    }
}

#[test]
fn test_covariate_only_model() {
    let input = AnalysisInput::new()
        .with_block(block("dependent", &[("y", &[1.0, 3.0, 2.0, 5.0, 4.0])]))
        .with_block(block("covar", &[("x", &[1.0, 2.0, 3.0, 4.0, 5.0])]));
    let cfg = GlmConfig {
        main: GlmMain {
            dependent: Some("y".into()),
            covar: vec!["x".into()],
            ..GlmMain::default()
        },
        options: GlmOptions {
            param_est: true,
            ..GlmOptions::default()
        },
        ..GlmConfig::default()
    };
    let output = run(&input, &cfg);
    let table = tests_of(&output);
    // slope 0.8, Sxx 10
    assert_abs_diff_eq!(value(table, &["x"], "sumOfSquares"), 6.4, epsilon = 1e-9);
    assert_abs_diff_eq!(value(table, &["Error"], "sumOfSquares"), 3.6, epsilon = 1e-9);

    let estimates = output.table("Parameter Estimates").unwrap();
    assert_abs_diff_eq!(value(estimates, &["x"], "estimate"), 0.8, epsilon = 1e-9);
    assert_abs_diff_eq!(value(estimates, &["Intercept"], "estimate"), 0.6, epsilon = 1e-9);
    assert!(output.table("Between-Subjects Factors").is_none());
}

#[test]
fn test_aliased_covariate_is_a_computation_error() {
    let input = AnalysisInput::new()
        .with_block(block("dependent", &[("y", &[1.0, 3.0, 2.0, 5.0])]))
        .with_block(block(
            "covar",
            &[("x", &[1.0, 2.0, 3.0, 4.0]), ("z", &[2.0, 4.0, 6.0, 8.0])],
        ));
    let cfg = GlmConfig {
        main: GlmMain {
            dependent: Some("y".into()),
            covar: vec!["x".into(), "z".into()],
            ..GlmMain::default()
        },
        ..GlmConfig::default()
    };
    let output = run(&input, &cfg);
    assert!(!output.is_success());
    assert_eq!(output.errors[0].stage, ErrorStage::Computation);
    assert_eq!(
        output.get_all_errors(),
        "Design matrix is rank deficient: term 'z' is aliased with other terms"
    );
    assert!(output.tables.is_empty());
}

#[test]
fn test_empty_cell_in_full_factorial_names_interaction() {
    let input = AnalysisInput::new()
        .with_block(block("dependent", &[("y", &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0])]))
        .with_block(block(
            "fixFactor",
            &[
                ("a", &[1.0, 1.0, 2.0, 2.0, 1.0, 2.0]),
                ("b", &[1.0, 2.0, 1.0, 1.0, 1.0, 1.0]),
            ],
        ));
    let mut cfg = additive_config(SumOfSquares::TypeIII);
    cfg.model.full_factorial = true;
    let output = run(&input, &cfg);
    assert!(output.get_all_errors().contains("term 'a * b'"));
}

// ==================== Random factors ====================

fn mixed_input() -> AnalysisInput {
    AnalysisInput::new()
        .with_block(block(
            "dependent",
            &[(
                "y",
                &[4.0, 6.0, 5.0, 9.0, 7.0, 8.0, 6.0, 5.0, 10.0, 12.0, 9.0, 7.0],
            )],
        ))
        .with_block(block(
            "fixFactor",
            &[("a", &[1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 2.0, 2.0, 2.0, 2.0, 2.0, 2.0])],
        ))
        .with_block(block(
            "randFactor",
            &[("b", &[1.0, 1.0, 2.0, 2.0, 3.0, 3.0, 1.0, 1.0, 2.0, 2.0, 3.0, 3.0])],
        ))
}

#[test]
fn test_random_factor_denominators() {
    let fixed_cfg = GlmConfig {
        main: GlmMain {
            dependent: Some("y".into()),
            fix_factor: vec!["a".into(), "b".into()],
            ..GlmMain::default()
        },
        ..GlmConfig::default()
    };
    let mixed_cfg = GlmConfig {
        main: GlmMain {
            dependent: Some("y".into()),
            fix_factor: vec!["a".into()],
            rand_factor: vec!["b".into()],
            ..GlmMain::default()
        },
        ..GlmConfig::default()
    };

    let fixed = run(&mixed_input(), &fixed_cfg);
    let fixed = tests_of(&fixed);
    let ms = |source: &str| value(fixed, &[source], "meanSquare");

    let mixed = run(&mixed_input(), &mixed_cfg);
    let mixed = tests_of(&mixed);
    assert_abs_diff_eq!(value(mixed, &["a", "Hypothesis"], "f"), ms("a") / ms("a * b"), epsilon = 1e-9);
    assert_abs_diff_eq!(value(mixed, &["a", "Error"], "df"), 2.0);
    assert_abs_diff_eq!(value(mixed, &["b", "Hypothesis"], "f"), ms("b") / ms("a * b"), epsilon = 1e-9);
    assert_abs_diff_eq!(
        value(mixed, &["a * b", "Hypothesis"], "f"),
        ms("a * b") / ms("Error"),
        epsilon = 1e-9
    );
    assert_abs_diff_eq!(
        value(mixed, &["Intercept", "Hypothesis"], "f"),
        ms("Intercept") / ms("b"),
        epsilon = 1e-9
    );
    assert!(mixed.footnotes.contains(&"a: MS(a * b)".to_string()));
}

#[test]
fn test_ambiguous_random_denominator_fails() {
    let n = 16;
    let y: Vec<f64> = (0..n).map(|i| ((i * 7) % 5) as f64 + i as f64 * 0.1).collect();
    let a: Vec<f64> = (0..n).map(|i| (i % 2) as f64).collect();
    let b: Vec<f64> = (0..n).map(|i| ((i / 2) % 2) as f64).collect();
    let c: Vec<f64> = (0..n).map(|i| ((i / 4) % 2) as f64).collect();
    let input = AnalysisInput::new()
        .with_block(block("dependent", &[("y", &y)]))
        .with_block(block("fixFactor", &[("a", &a)]))
        .with_block(block("randFactor", &[("b", &b), ("c", &c)]));
    let cfg = GlmConfig {
        main: GlmMain {
            dependent: Some("y".into()),
            fix_factor: vec!["a".into()],
            rand_factor: vec!["b".into(), "c".into()],
            ..GlmMain::default()
        },
        ..GlmConfig::default()
    };
    let output = run(&input, &cfg);
    assert!(!output.is_success());
    assert_eq!(output.errors[0].stage, ErrorStage::Computation);
    assert!(output.get_all_errors().starts_with("Cannot determine an error term for 'a'"));
}

// ==================== Optional tables ====================

#[test]
fn test_descriptives_and_levene() {
    let mut cfg = one_way_config();
    cfg.options.desc_stats = true;
    cfg.options.homogeneity = true;
    let output = run(&one_way_input(), &cfg);
    assert!(output.is_success());

    let desc = output.table("Descriptive Statistics").unwrap();
    assert_eq!(desc.rows.len(), 4);
    assert_abs_diff_eq!(value(desc, &["2"], "mean"), 6.0);
    assert_abs_diff_eq!(value(desc, &["2"], "stdDev"), 1.0, epsilon = 1e-12);
    assert_abs_diff_eq!(value(desc, &["Total"], "n"), 9.0);
    assert_abs_diff_eq!(value(desc, &["Total"], "mean"), 6.0);

    // equal spreads in every group
    let levene = output.table("Levene's Test of Equality of Error Variances").unwrap();
    assert_abs_diff_eq!(value(levene, &["y"], "f"), 0.0, epsilon = 1e-12);
    assert_abs_diff_eq!(value(levene, &["y"], "df1"), 2.0);
    assert_abs_diff_eq!(value(levene, &["y"], "df2"), 6.0);
    assert_abs_diff_eq!(value(levene, &["y"], "sig"), 1.0, epsilon = 1e-9);
    assert!(levene.footnotes.contains(&"a. Design: Intercept + g".to_string()));
}

#[test]
fn test_two_way_descriptives_nest_totals() {
    let mut cfg = additive_config(SumOfSquares::TypeIII);
    cfg.options.desc_stats = true;
    let output = run(&additive_input(), &cfg);
    let desc = output.table("Descriptive Statistics").unwrap();
    let headers: Vec<Vec<String>> = desc.rows.iter().map(|r| r.row_header.clone()).collect();
    assert_eq!(headers.len(), 9);
    assert_eq!(headers[2], vec!["1".to_string(), "Total".to_string()]);
    assert_eq!(headers[8], vec!["Total".to_string(), "Total".to_string()]);
    assert_abs_diff_eq!(value(desc, &["1", "Total"], "mean"), 4.5);
}

#[test]
fn test_parameter_estimates_reference_last() {
    let mut cfg = one_way_config();
    cfg.options.param_est = true;
    let output = run(&one_way_input(), &cfg);
    let table = output.table("Parameter Estimates").unwrap();

    assert_abs_diff_eq!(value(table, &["Intercept"], "estimate"), 9.0, epsilon = 1e-9);
    assert_abs_diff_eq!(value(table, &["Intercept"], "stdError"), (1.0f64 / 3.0).sqrt(), epsilon = 1e-9);
    assert_abs_diff_eq!(value(table, &["[g=1]"], "estimate"), -6.0, epsilon = 1e-9);
    assert_abs_diff_eq!(value(table, &["[g=2]"], "estimate"), -3.0, epsilon = 1e-9);
    let t = -6.0 / (2.0f64 / 3.0).sqrt();
    assert_abs_diff_eq!(value(table, &["[g=1]"], "statistic"), t, epsilon = 1e-9);
    assert_abs_diff_eq!(value(table, &["[g=1]"], "sig"), t_two_tailed(t, 6.0).unwrap(), epsilon = 1e-12);

    let redundant = table.find_row(&["[g=3]"]).unwrap();
    assert_eq!(redundant.get_f64("estimate"), Some(0.0));
    assert!(redundant.get("stdError").unwrap().is_null());
    assert!(
        table
            .footnotes
            .contains(&"a. This parameter is set to zero because it is redundant.".to_string())
    );
}

#[test]
fn test_confidence_level_follows_significance_level() {
    let mut cfg = one_way_config();
    cfg.options.param_est = true;
    cfg.options.sig_level = 0.1;
    let output = run(&one_way_input(), &cfg);
    let table = output.table("Parameter Estimates").unwrap();
    assert!(
        table
            .column_headers
            .iter()
            .any(|h| h.header == "90% Confidence Interval")
    );
}

#[test]
fn test_estimated_marginal_means_and_pairwise() {
    let mut cfg = one_way_config();
    cfg.emmeans = EmmeansConfig {
        factors: vec!["(OVERALL)".into(), "g".into()],
        compare_main_effects: true,
        adjustment: Adjustment::Bonferroni,
    };
    let output = run(&one_way_input(), &cfg);
    assert!(output.is_success(), "{}", output.get_all_errors());

    let grand = output.table("Estimated Marginal Means: Grand Mean").unwrap();
    assert_abs_diff_eq!(value(grand, &["y"], "mean"), 6.0, epsilon = 1e-9);
    assert_abs_diff_eq!(value(grand, &["y"], "stdError"), 1.0 / 3.0, epsilon = 1e-9);

    let means = output.table("Estimated Marginal Means: g").unwrap();
    assert_abs_diff_eq!(value(means, &["1"], "mean"), 3.0, epsilon = 1e-9);
    assert_abs_diff_eq!(value(means, &["3"], "mean"), 9.0, epsilon = 1e-9);
    assert_abs_diff_eq!(value(means, &["2"], "stdError"), (1.0f64 / 3.0).sqrt(), epsilon = 1e-9);

    let pairs = output.table("Pairwise Comparisons: g").unwrap();
    assert_eq!(pairs.rows.len(), 6);
    let se = (2.0f64 / 3.0).sqrt();
    assert_abs_diff_eq!(value(pairs, &["1", "2"], "meanDifference"), -3.0, epsilon = 1e-9);
    assert_abs_diff_eq!(value(pairs, &["2", "1"], "meanDifference"), 3.0, epsilon = 1e-9);
    let raw = t_two_tailed(3.0 / se, 6.0).unwrap();
    assert_abs_diff_eq!(
        value(pairs, &["1", "2"], "sig"),
        (raw * 3.0).min(1.0),
        epsilon = 1e-12
    );
}

#[test]
fn test_emmeans_with_covariate_note() {
    let input = one_way_input().with_block(block(
        "covar",
        &[("x", &[1.0, 2.0, 2.0, 3.0, 1.0, 2.0, 4.0, 3.0, 3.0])],
    ));
    let mut cfg = one_way_config();
    cfg.main.covar = vec!["x".into()];
    cfg.emmeans.factors = vec!["g".into()];
    let output = run(&input, &cfg);
    let means = output.table("Estimated Marginal Means: g").unwrap();
    assert!(
        means
            .footnotes
            .iter()
            .any(|f| f.ends_with("values: x = 2.33."))
    );
}

#[test]
fn test_contrast_matrices() {
    let simple = contrast_rows(
        ContrastSpec {
            kind: ContrastKind::Simple,
            reference: ReferenceCategory::Last,
        },
        3,
    );
    assert_eq!(simple[0].0, "Level 1 vs. Level 3");
    assert_eq!(simple[1].1, vec![0.0, 1.0, -1.0]);

    let helmert = contrast_rows(
        ContrastSpec {
            kind: ContrastKind::Helmert,
            ..ContrastSpec::default()
        },
        3,
    );
    assert_eq!(helmert[0].1, vec![1.0, -0.5, -0.5]);

    let difference = contrast_rows(
        ContrastSpec {
            kind: ContrastKind::Difference,
            ..ContrastSpec::default()
        },
        3,
    );
    assert_eq!(difference[1].1, vec![-0.5, -0.5, 1.0]);

    let poly = contrast_rows(
        ContrastSpec {
            kind: ContrastKind::Polynomial,
            ..ContrastSpec::default()
        },
        3,
    );
    assert_eq!(poly[1].0, "Quadratic");
    let s = 1.0 / 2.0f64.sqrt();
    for (got, want) in poly[0].1.iter().zip([-s, 0.0, s]) {
        assert_abs_diff_eq!(*got, want, epsilon = 1e-12);
    }

    let deviation = contrast_rows(
        ContrastSpec {
            kind: ContrastKind::Deviation,
            reference: ReferenceCategory::First,
        },
        3,
    );
    assert_eq!(deviation.len(), 2);
    assert_eq!(deviation[0].0, "Level 2 vs. Mean");
}

#[test]
fn test_contrast_results_and_joint_test() {
    let mut cfg = one_way_config();
    let mut contrast = IndexMap::new();
    contrast.insert(
        "g".to_string(),
        ContrastSpec {
            kind: ContrastKind::Polynomial,
            ..ContrastSpec::default()
        },
    );
    cfg.contrast = contrast;
    let output = run(&one_way_input(), &cfg);
    assert!(output.is_success(), "{}", output.get_all_errors());

    let results = output.table("Contrast Results (K Matrix): g").unwrap();
    assert_abs_diff_eq!(value(results, &["Linear"], "estimate"), 6.0 / 2.0f64.sqrt(), epsilon = 1e-9);
    assert_abs_diff_eq!(value(results, &["Quadratic"], "estimate"), 0.0, epsilon = 1e-9);
    assert_abs_diff_eq!(value(results, &["Linear"], "stdError"), (1.0f64 / 3.0).sqrt(), epsilon = 1e-9);

    let test = output.table("Test Results: g").unwrap();
    assert_abs_diff_eq!(value(test, &["Contrast"], "sumOfSquares"), 54.0, epsilon = 1e-8);
    assert_abs_diff_eq!(value(test, &["Contrast"], "df"), 2.0);
    assert_abs_diff_eq!(value(test, &["Contrast"], "f"), 27.0, epsilon = 1e-8);
}

#[test]
fn test_post_hoc_comparisons() {
    let mut cfg = one_way_config();
    cfg.posthoc = PostHocConfig {
        factors: vec!["g".into()],
        lsd: true,
        scheffe: true,
        ..PostHocConfig::default()
    };
    let output = run(&one_way_input(), &cfg);
    let table = output.table("Multiple Comparisons: g").unwrap();
    assert_eq!(table.rows.len(), 12);

    let se = (2.0f64 / 3.0).sqrt();
    assert_abs_diff_eq!(value(table, &["LSD", "1", "3"], "meanDifference"), -6.0, epsilon = 1e-9);
    assert_abs_diff_eq!(value(table, &["LSD", "1", "3"], "stdError"), se, epsilon = 1e-12);
    assert_abs_diff_eq!(
        value(table, &["Scheffe", "1", "2"], "sig"),
        f_sf(6.75, 2.0, 6.0).unwrap(),
        epsilon = 1e-9
    );
    assert!(
        table
            .footnotes
            .contains(&"The error term is Mean Square(Error) = 1.000.".to_string())
    );
}

#[test]
fn test_compare_adjustments() {
    let lsd = compare(PostHocMethod::Lsd, 1.0, 0.5, 3.0, 10.0, 0.05);
    let bonf = compare(PostHocMethod::Bonferroni, 1.0, 0.5, 3.0, 10.0, 0.05);
    let sidak = compare(PostHocMethod::Sidak, 1.0, 0.5, 3.0, 10.0, 0.05);
    let p = lsd.sig.unwrap();
    assert_abs_diff_eq!(bonf.sig.unwrap(), (3.0 * p).min(1.0), epsilon = 1e-12);
    assert_abs_diff_eq!(sidak.sig.unwrap(), 1.0 - (1.0 - p).powi(3), epsilon = 1e-12);
    assert!(sidak.sig.unwrap() <= bonf.sig.unwrap());
    assert!(bonf.upper.unwrap() - bonf.lower.unwrap() > lsd.upper.unwrap() - lsd.lower.unwrap());
}

#[test]
fn test_string_factor_levels_sorted() {
    let input = AnalysisInput::new()
        .with_block(block("dependent", &[("y", &[1.0, 2.0, 3.0, 4.0])]))
        .with_block(
            DataBlockBuilder::new("fixFactor")
                .with_column(
                    sd_core::data::VariableBuilder::new("g").string().build(),
                    ["b", "a", "b", "a"],
                )
                .unwrap()
                .build(),
        );
    let output = run(&input, &one_way_config());
    let factors = output.table("Between-Subjects Factors").unwrap();
    let levels: Vec<&str> = factors.rows.iter().map(|r| r.row_header[1].as_str()).collect();
    assert_eq!(levels, vec!["a", "b"]);
}

#[test]
fn test_deterministic_output() {
    let mut cfg = one_way_config();
    cfg.options.param_est = true;
    cfg.options.desc_stats = true;
    let a = serde_json::to_string(&run(&one_way_input(), &cfg)).unwrap();
    let b = serde_json::to_string(&run(&one_way_input(), &cfg)).unwrap();
    assert_eq!(a, b);
}

#[test]
fn test_config_deserializes_from_camel_case() {
    let cfg: GlmConfig = serde_json::from_value(serde_json::json!({
        "main": { "dependent": "y", "fixFactor": ["g"], "wlsWeight": "w" },
        "model": { "sumOfSquares": "I" },
        "options": { "sigLevel": 0.01, "paramEst": true },
        "emmeans": { "factors": ["g"], "compareMainEffects": true, "adjustment": "sidak" }
    }))
    .unwrap();
    assert_eq!(cfg.main.wls_weight.as_deref(), Some("w"));
    assert_eq!(cfg.model.sum_of_squares, SumOfSquares::TypeI);
    assert!(cfg.model.full_factorial);
    assert_eq!(cfg.emmeans.adjustment, Adjustment::Sidak);
    assert_abs_diff_eq!(cfg.options.confidence(), 0.99);
}
