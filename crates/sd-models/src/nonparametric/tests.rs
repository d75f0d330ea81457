//! Tests for the independent-samples nonparametric tests

use approx::assert_abs_diff_eq;
use proptest::prelude::*;

use sd_core::data::{DataBlock, DataBlockBuilder, MissingSpec, VariableBuilder};
use sd_core::{ErrorAccumulator, ErrorStage, ResultTable};

use super::k_samples::{jonckheere_terpstra, kruskal_wallis, median_test};
use super::two_samples::{
    kolmogorov_smirnov, mann_whitney, mann_whitney_counts, moses, moses_probability,
    runs_probability, wald_wolfowitz,
};
use super::*;
use crate::base::{AnalysisOutput, RunContext, run_analysis};

fn sample(groups: &[&[f64]]) -> GroupedSample {
    GroupedSample {
        name: "y".to_string(),
        label: "y".to_string(),
        groups: groups
            .iter()
            .enumerate()
            .map(|(i, values)| Group {
                value: (i + 1) as f64,
                label: (i + 1).to_string(),
                values: values.to_vec(),
            })
            .collect(),
    }
}

fn block(name: &str, var: &str, values: &[Option<f64>]) -> DataBlock {
    DataBlockBuilder::new(name)
        .with_numeric(var, values.iter().copied())
        .unwrap()
        .build()
}

/// `y` and grouping variable `g`, one case per pair
fn input(pairs: &[(f64, f64)]) -> AnalysisInput {
    let y: Vec<Option<f64>> = pairs.iter().map(|p| Some(p.0)).collect();
    let g: Vec<Option<f64>> = pairs.iter().map(|p| Some(p.1)).collect();
    AnalysisInput::new()
        .with_block(block("test", "y", &y))
        .with_block(block("group", "g", &g))
}

fn three_groups() -> AnalysisInput {
    input(&[
        (1.0, 1.0),
        (2.0, 1.0),
        (3.0, 1.0),
        (4.0, 2.0),
        (5.0, 2.0),
        (6.0, 2.0),
        (7.0, 3.0),
        (8.0, 3.0),
        (9.0, 3.0),
    ])
}

fn value(table: &ResultTable, row: &[&str], key: &str) -> Option<f64> {
    table.find_row(row).and_then(|r| r.get_f64(key))
}

// ==================== k samples ====================

#[test]
fn test_kruskal_wallis_separated_groups() {
    let kw = kruskal_wallis(&sample(&[&[1.0, 2.0, 3.0], &[4.0, 5.0, 6.0], &[7.0, 8.0, 9.0]])).unwrap();
    assert_abs_diff_eq!(kw.h, 7.2, epsilon = 1e-10);
    assert_eq!(kw.df, 2.0);
    assert_abs_diff_eq!(kw.sig.unwrap(), (-3.6f64).exp(), epsilon = 1e-8);
}

#[test]
fn test_kruskal_wallis_all_tied_is_undefined() {
    assert!(kruskal_wallis(&sample(&[&[4.0, 4.0], &[4.0, 4.0]])).is_none());
}

#[test]
fn test_median_test_counts() {
    let m = median_test(&sample(&[&[1.0, 2.0, 3.0], &[4.0, 5.0, 6.0], &[7.0, 8.0, 9.0]])).unwrap();
    assert_eq!(m.median, 5.0);
    assert_eq!(m.counts, vec![(0.0, 3.0), (1.0, 2.0), (3.0, 0.0)]);
    assert_abs_diff_eq!(m.chi_square.unwrap(), 6.3, epsilon = 1e-10);
    assert_eq!(m.df, 2.0);
}

#[test]
fn test_jonckheere_terpstra_ordered_groups() {
    let jt = jonckheere_terpstra(&sample(&[&[1.0, 2.0, 3.0], &[4.0, 5.0, 6.0], &[7.0, 8.0, 9.0]]));
    assert_eq!(jt.levels, 3);
    assert_eq!(jt.observed, 27.0);
    assert_abs_diff_eq!(jt.mean, 13.5, epsilon = 1e-12);
    assert_abs_diff_eq!(jt.std_dev, 4.5, epsilon = 1e-12);
    assert_abs_diff_eq!(jt.z.unwrap(), 3.0, epsilon = 1e-12);
    assert_abs_diff_eq!(jt.sig.unwrap(), 0.0026998, epsilon = 1e-6);
}

#[test]
fn test_jonckheere_terpstra_counts_ties_as_half() {
    let jt = jonckheere_terpstra(&sample(&[&[1.0, 2.0], &[2.0, 3.0]]));
    // pairs (1,2) (1,3) (2,3) plus a half for (2,2)
    assert_eq!(jt.observed, 3.5);
}

#[test]
fn test_k_samples_tables() {
    let config = KSamplesConfig {
        test_variables: vec!["y".into()],
        grouping_variable: Some("g".into()),
        range: GroupRange { min: 1.0, max: 3.0 },
        median: true,
        jonckheere_terpstra: true,
        descriptives: true,
        ..KSamplesConfig::default()
    };
    let output = run_analysis::<KIndependentSamples>(
        &three_groups(),
        &config,
        ErrorAccumulator::new(),
        &RunContext::new(),
    );
    assert!(output.is_success(), "{}", output.get_all_errors());

    let descriptives = output.table("Descriptive Statistics").unwrap();
    assert_eq!(value(descriptives, &["y"], "mean"), Some(5.0));

    let ranks = output.table("Ranks").unwrap();
    assert_eq!(value(ranks, &["y", "2"], "meanRank"), Some(5.0));
    assert_eq!(value(ranks, &["y", "Total"], "n"), Some(9.0));

    let kw = output.table("Test Statistics: Kruskal-Wallis").unwrap();
    assert_abs_diff_eq!(value(kw, &["Kruskal-Wallis H"], "y").unwrap(), 7.2, epsilon = 1e-10);
    assert!(kw.footnotes.iter().any(|f| f == "b. Grouping Variable: g"));

    let jt = output.table("Test Statistics: Jonckheere-Terpstra").unwrap();
    assert_eq!(value(jt, &["Number of Levels in g"], "y"), Some(3.0));
    assert_eq!(value(jt, &["Std. J-T Statistic"], "y"), Some(3.0));
    assert!(output.table("Test Statistics: Median Test").is_some());
}

#[test]
fn test_group_range_filters_cases() {
    let config = KSamplesConfig {
        test_variables: vec!["y".into()],
        grouping_variable: Some("g".into()),
        range: GroupRange { min: 2.0, max: 3.0 },
        ..KSamplesConfig::default()
    };
    let output = run_analysis::<KIndependentSamples>(
        &three_groups(),
        &config,
        ErrorAccumulator::new(),
        &RunContext::new(),
    );
    let ranks = output.table("Ranks").unwrap();
    assert!(ranks.find_row(&["y", "1"]).is_none());
    assert_eq!(value(ranks, &["y", "Total"], "n"), Some(6.0));
}

#[test]
fn test_k_samples_validation() {
    let config = KSamplesConfig {
        range: GroupRange { min: 3.0, max: 1.0 },
        kruskal_wallis: false,
        ..KSamplesConfig::default()
    };
    let output = run_analysis::<KIndependentSamples>(
        &three_groups(),
        &config,
        ErrorAccumulator::new(),
        &RunContext::new(),
    );
    assert_eq!(output.errors.len(), 4);
    assert!(output.errors.iter().all(|e| e.stage == ErrorStage::Validation));
}

#[test]
fn test_single_group_is_rejected() {
    let config = KSamplesConfig {
        test_variables: vec!["y".into()],
        grouping_variable: Some("g".into()),
        range: GroupRange { min: 0.0, max: 1.5 },
        ..KSamplesConfig::default()
    };
    let output = run_analysis::<KIndependentSamples>(
        &three_groups(),
        &config,
        ErrorAccumulator::new(),
        &RunContext::new(),
    );
    assert_eq!(
        output.get_all_errors(),
        "At least two groups with valid cases are required ('y')"
    );
}

// ==================== two samples ====================

#[test]
fn test_mann_whitney_counts_distribution() {
    assert_eq!(mann_whitney_counts(2, 2), vec![1.0, 1.0, 2.0, 1.0, 1.0]);
    assert_eq!(mann_whitney_counts(3, 4).iter().sum::<f64>(), 35.0);
}

#[test]
fn test_mann_whitney_complete_separation() {
    let mw = mann_whitney(&sample(&[&[1.0, 2.0, 3.0], &[4.0, 5.0, 6.0, 7.0]]));
    assert_eq!(mw.u, 0.0);
    assert_eq!(mw.w, 6.0);
    assert_eq!(mw.rank_sums, (6.0, 22.0));
    assert_abs_diff_eq!(mw.z.unwrap(), -6.0 / 8f64.sqrt(), epsilon = 1e-12);
    assert_abs_diff_eq!(mw.exact_sig.unwrap(), 2.0 / 35.0, epsilon = 1e-12);
}

#[test]
fn test_mann_whitney_ties_skip_exact() {
    let mw = mann_whitney(&sample(&[&[1.0, 2.0, 2.0], &[2.0, 3.0]]));
    assert!(mw.exact_sig.is_none());
    assert!(mw.z.is_some());
}

#[test]
fn test_kolmogorov_smirnov_differences() {
    let ks = kolmogorov_smirnov(&sample(&[&[1.0, 2.0, 3.0], &[4.0, 5.0, 6.0, 7.0]]));
    assert_eq!(ks.absolute, 1.0);
    assert_eq!(ks.positive, 1.0);
    assert_eq!(ks.negative, 0.0);
    assert_abs_diff_eq!(ks.z, (12.0f64 / 7.0).sqrt(), epsilon = 1e-12);
    assert!(ks.sig > 0.0 && ks.sig < 0.1);
}

#[test]
fn test_moses_span_probabilities() {
    // four consecutive control ranks out of ten
    assert_abs_diff_eq!(moses_probability(4.0, 4, 6, 0), 7.0 / 210.0, epsilon = 1e-12);
    assert_abs_diff_eq!(moses_probability(2.0, 4, 6, 1), 84.0 / 210.0, epsilon = 1e-12);
    assert_eq!(moses_probability(2.0, 4, 6, 0), 0.0);

    let m = moses(
        &sample(&[&[4.0, 5.0, 6.0, 7.0], &[1.0, 2.0, 3.0, 8.0, 9.0, 10.0]]),
        Some(1),
    );
    assert_eq!(m.span, 4.0);
    assert_eq!(m.trimmed_span, 2.0);
    assert_eq!(m.trimmed, 1);
    assert_abs_diff_eq!(m.trimmed_sig, 0.4, epsilon = 1e-12);
}

#[test]
fn test_moses_trim_is_capped_by_control_size() {
    let m = moses(&sample(&[&[5.0, 6.0], &[1.0, 2.0, 9.0, 10.0]]), None);
    assert_eq!(m.trimmed, 0);
    assert_eq!(m.span, 2.0);
    assert_abs_diff_eq!(m.sig, 1.0 / 3.0, epsilon = 1e-12);
}

#[test]
fn test_runs_without_ties() {
    assert_abs_diff_eq!(runs_probability(2, 3, 4), 2.0 / 35.0, epsilon = 1e-12);
    assert_abs_diff_eq!(runs_probability(7, 3, 4), 1.0, epsilon = 1e-12);

    let ww = wald_wolfowitz(&sample(&[&[1.0, 2.0, 3.0], &[4.0, 5.0, 6.0, 7.0]]));
    assert!(!ww.inter_group_ties);
    assert_eq!(ww.minimum.runs, 2);
    assert_abs_diff_eq!(ww.minimum.z.unwrap(), -1.63712, epsilon = 1e-4);
}

#[test]
fn test_runs_with_inter_group_ties() {
    let ww = wald_wolfowitz(&sample(&[&[1.0, 2.0, 2.0], &[2.0, 3.0, 4.0]]));
    assert!(ww.inter_group_ties);
    assert_eq!(ww.minimum.runs, 2);
    assert_eq!(ww.maximum.runs, 4);
    assert!(ww.minimum.sig <= ww.maximum.sig);
}

fn two_sample_config() -> TwoSamplesConfig {
    TwoSamplesConfig {
        test_variables: vec!["y".into()],
        grouping_variable: Some("g".into()),
        ..TwoSamplesConfig::default()
    }
}

fn run_two(input: &AnalysisInput, config: &TwoSamplesConfig) -> AnalysisOutput {
    run_analysis::<TwoIndependentSamples>(input, config, ErrorAccumulator::new(), &RunContext::new())
}

#[test]
fn test_two_samples_tables() {
    let data = input(&[
        (1.0, 1.0),
        (2.0, 1.0),
        (3.0, 1.0),
        (4.0, 2.0),
        (5.0, 2.0),
        (6.0, 2.0),
        (7.0, 2.0),
        (100.0, 3.0),
    ]);
    let config = TwoSamplesConfig {
        kolmogorov_smirnov: true,
        moses_extreme_reactions: true,
        wald_wolfowitz: true,
        ..two_sample_config()
    };
    let output = run_two(&data, &config);
    assert!(output.is_success(), "{}", output.get_all_errors());

    let ranks = output.table("Ranks").unwrap();
    assert_eq!(value(ranks, &["y", "1"], "sumOfRanks"), Some(6.0));
    assert_eq!(value(ranks, &["y", "2"], "meanRank"), Some(5.5));
    assert_eq!(value(ranks, &["y", "Total"], "n"), Some(7.0));

    let mw = output.table("Test Statistics: Mann-Whitney").unwrap();
    assert_eq!(value(mw, &["Mann-Whitney U"], "y"), Some(0.0));
    assert_eq!(value(mw, &["Wilcoxon W"], "y"), Some(6.0));
    assert_abs_diff_eq!(
        value(mw, &["Exact Sig. [2*(1-tailed Sig.)]"], "y").unwrap(),
        2.0 / 35.0,
        epsilon = 1e-12
    );

    let ks = output.table("Test Statistics: Kolmogorov-Smirnov").unwrap();
    assert_eq!(value(ks, &["Most Extreme Differences", "Absolute"], "y"), Some(1.0));

    let moses = output.table("Test Statistics: Moses").unwrap();
    assert_eq!(value(moses, &["Observed Control Group Span"], "y"), Some(3.0));

    let runs = output.table("Test Statistics: Wald-Wolfowitz").unwrap();
    assert_eq!(value(runs, &["y", "Exact Number of Runs"], "runs"), Some(2.0));
}

#[test]
fn test_weights_replicate_cases() {
    let data = input(&[(1.0, 1.0), (2.0, 1.0), (3.0, 2.0), (4.0, 2.0)]).with_block(block(
        "weight",
        "w",
        &[Some(2.0), Some(1.0), Some(1.0), Some(0.0)],
    ));
    let output = run_two(&data.with_weight("w"), &two_sample_config());
    let ranks = output.table("Ranks").unwrap();
    assert_eq!(value(ranks, &["y", "1"], "n"), Some(3.0));
    assert_eq!(value(ranks, &["y", "2"], "n"), Some(1.0));
}

#[test]
fn test_two_samples_validation() {
    let config = TwoSamplesConfig {
        group2: 1.0,
        mann_whitney: false,
        ..two_sample_config()
    };
    let output = run_two(&input(&[(1.0, 1.0), (2.0, 2.0)]), &config);
    let messages = output.get_all_errors();
    assert!(messages.contains("The two groups must have different values."));
    assert!(messages.contains("At least one test must be selected."));
}

#[test]
fn test_empty_group_is_reported() {
    let output = run_two(&input(&[(1.0, 1.0), (2.0, 1.0), (3.0, 3.0)]), &two_sample_config());
    assert!(!output.is_success());
    assert_eq!(output.errors[0].stage, ErrorStage::Coercion);
    assert_eq!(
        output.get_all_errors(),
        "Group 2 has no valid cases for variable 'y'"
    );
}

#[test]
fn test_string_grouping_variable_is_rejected() {
    let g = VariableBuilder::new("g").string().build();
    let data = AnalysisInput::new()
        .with_block(block("test", "y", &[Some(1.0), Some(2.0)]))
        .with_block(
            DataBlockBuilder::new("group")
                .with_column(g, ["a", "b"])
                .unwrap()
                .build(),
        );
    let output = run_two(&data, &two_sample_config());
    assert_eq!(output.get_all_errors(), "Grouping variable 'g' is not numeric");
}

#[test]
fn test_config_from_json() {
    let config: TwoSamplesConfig = serde_json::from_value(serde_json::json!({
        "testVariables": ["y"],
        "groupingVariable": "g",
        "group1": 0,
        "group2": 1,
        "mosesExtremeReactions": true,
        "mosesTrim": 2
    }))
    .unwrap();
    assert_eq!(config.group1, 0.0);
    assert!(config.mann_whitney);
    assert_eq!(config.moses_trim, Some(2));
}

#[test]
fn test_weights_below_half_are_counted() {
    let data = input(&[(1.0, 1.0), (2.0, 1.0), (3.0, 2.0), (4.0, 2.0)])
        .with_block(block("weight", "w", &[Some(0.3), Some(1.0), Some(1.0), Some(1.0)]))
        .with_weight("w");
    let mut errors = ErrorAccumulator::new();
    let prepared = load_samples(&data, &["y".to_string()], "g", |_| true, None, &mut errors).unwrap();
    assert!(errors.is_empty());
    assert_eq!(prepared.rounded_away, 1);
    let sample = &prepared.samples[0];
    assert_eq!(sample.groups[0].values, vec![2.0]);
    assert_eq!(sample.groups[1].values, vec![3.0, 4.0]);
}

#[test]
fn test_huge_weight_is_rejected() {
    let data = input(&[(1.0, 1.0), (2.0, 1.0), (3.0, 2.0), (4.0, 2.0)])
        .with_block(block("weight", "w", &[Some(1e12), Some(1.0), Some(1.0), Some(1.0)]))
        .with_weight("w");
    let output = run_two(&data, &two_sample_config());
    assert!(!output.is_success());
    assert_eq!(output.errors[0].stage, ErrorStage::Coercion);
    assert_eq!(
        output.get_all_errors(),
        format!("The weighted number of cases for variable 'y' exceeds {}", MAX_WEIGHTED_CASES)
    );
}

#[test]
fn test_median_frequencies_with_repeated_group_labels() {
    let g = VariableBuilder::new("g")
        .value_label(1.0, "Low")
        .value_label(2.0, "Low")
        .value_label(3.0, "High")
        .build();
    let y: Vec<Option<f64>> = (1..=6).map(|v| Some(v as f64)).collect();
    let data = AnalysisInput::new().with_block(block("test", "y", &y)).with_block(
        DataBlockBuilder::new("group")
            .with_column(g, [1.0, 1.0, 2.0, 2.0, 3.0, 3.0])
            .unwrap()
            .build(),
    );
    let config = KSamplesConfig {
        test_variables: vec!["y".into()],
        grouping_variable: Some("g".into()),
        range: GroupRange { min: 1.0, max: 3.0 },
        median: true,
        ..KSamplesConfig::default()
    };
    let output = run_analysis::<KIndependentSamples>(&data, &config, ErrorAccumulator::new(), &RunContext::new());
    assert!(output.is_success(), "{}", output.get_all_errors());

    let frequencies = output.table("Frequencies").unwrap();
    assert_eq!(value(frequencies, &["y", "> Median"], "group1"), Some(0.0));
    assert_eq!(value(frequencies, &["y", "> Median"], "group2"), Some(1.0));
    assert_eq!(value(frequencies, &["y", "> Median"], "group3"), Some(2.0));
    assert_eq!(value(frequencies, &["y", "<= Median"], "group1"), Some(2.0));
}

#[test]
fn test_all_user_missing_test_block() {
    let y = VariableBuilder::new("y").missing(MissingSpec::discrete([9.0])).build();
    let data = AnalysisInput::new()
        .with_block(
            DataBlockBuilder::new("test")
                .with_column(y, [9.0, 9.0, 9.0])
                .unwrap()
                .build(),
        )
        .with_block(block("group", "g", &[Some(1.0), Some(2.0), Some(2.0)]));
    let output = run_two(&data, &two_sample_config());
    assert_eq!(output.errors.len(), 1);
    assert_eq!(output.errors[0].stage, ErrorStage::Coercion);
    assert_eq!(output.get_all_errors(), "test contains all null values");
}

proptest! {
    #[test]
    fn prop_mann_whitney_counts_cover_every_arrangement(m in 1usize..7, n in 1usize..7) {
        let counts = mann_whitney_counts(m, n);
        prop_assert_eq!(counts.len(), m * n + 1);
        let total: f64 = counts.iter().sum();
        let arrangements: f64 = (1..=m).map(|k| (n + k) as f64 / k as f64).product();
        prop_assert!((total - arrangements).abs() < 1e-6 * arrangements);
        for u in 0..=m * n {
            prop_assert_eq!(counts[u], counts[m * n - u]);
        }
    }

    #[test]
    fn prop_mann_whitney_u_is_the_smaller_statistic(
        a in proptest::collection::vec(-50.0f64..50.0, 1..12),
        b in proptest::collection::vec(-50.0f64..50.0, 1..12),
    ) {
        let (m, n) = (a.len() as f64, b.len() as f64);
        let result = mann_whitney(&sample(&[a.as_slice(), b.as_slice()]));
        prop_assert!(result.u >= -1e-9 && result.u <= m * n / 2.0 + 1e-9);
        let (r1, r2) = result.rank_sums;
        prop_assert!((r1 + r2 - (m + n) * (m + n + 1.0) / 2.0).abs() < 1e-9);
        if let Some(p) = result.exact_sig {
            prop_assert!((0.0..=1.0 + 1e-12).contains(&p));
        }
    }
}
