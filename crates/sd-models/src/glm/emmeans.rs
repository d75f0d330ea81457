//! Estimated marginal means, pairwise comparisons and contrasts
//!
//! A marginal mean is `L·b` where `L` averages the cell predictions over
//! the levels of the factors not in the term with equal weights, covariates
//! held at their means.

use nalgebra::{DMatrix, DVector};

use sd_core::stats::distribution::{t_quantile, t_two_tailed};
use sd_core::{ColumnHeader, ResultTable, TableRow};

use super::config::{Adjustment, ContrastKind, ContrastSpec, GlmConfig, ReferenceCategory};
use super::design::GlmData;
use super::estimates::ParameterFit;
use crate::base::coefficient::format_level;
use crate::base::{Result, SourceStatistics, source_table};
use crate::linalg::{pseudo_inverse, rank};

/// `L` for the cell fixing `selection` (`(factor, level)` pairs)
pub fn cell_vector(fit: &ParameterFit, data: &GlmData, selection: &[(usize, usize)]) -> DVector<f64> {
    DVector::from_iterator(
        fit.design.params.len(),
        fit.design.params.iter().map(|param| {
            let mut v = 1.0;
            for &(f, l) in &param.levels {
                match selection.iter().find(|(sf, _)| *sf == f) {
                    Some(&(_, chosen)) if chosen != l => v = 0.0,
                    Some(_) => {}
                    None => v /= data.factors[f].levels.len() as f64,
                }
            }
            for &c in &param.covariates {
                v *= data.covariates[c].mean;
            }
            v
        }),
    )
}

/// Estimate, standard error and interval of one linear function
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Estimate {
    pub value: Option<f64>,
    pub std_error: Option<f64>,
    pub lower: Option<f64>,
    pub upper: Option<f64>,
    pub sig: Option<f64>,
}

impl Estimate {
    const MISSING: Estimate = Estimate {
        value: None,
        std_error: None,
        lower: None,
        upper: None,
        sig: None,
    };

    /// Two-sided interval at `1 − alpha`, sig adjusted over `m` comparisons
    fn of(fit: &ParameterFit, l: &DVector<f64>, alpha: f64, adjustment: Adjustment, m: f64) -> Self {
        if !fit.is_estimable(l) {
            return Self::MISSING;
        }
        let value = fit.estimate(l);
        let se = fit.std_error(l);
        let df = fit.df_error;
        let crit = t_quantile(1.0 - adjustment.alpha(alpha, m) / 2.0, df);
        let (lower, upper) = match (se, crit) {
            (Some(se), Some(crit)) if crit.is_finite() => {
                (Some(value - crit * se), Some(value + crit * se))
            }
            _ => (None, None),
        };
        let sig = se
            .filter(|se| *se > 0.0)
            .and_then(|se| t_two_tailed(value / se, df))
            .map(|p| adjustment.adjust(p, m));
        Self {
            value: Some(value),
            std_error: se,
            lower,
            upper,
            sig,
        }
    }
}

fn interval_group(confidence: f64, title: &str) -> ColumnHeader {
    ColumnHeader::group(
        format!("{}% {}", format_level(confidence), title),
        vec![
            ColumnHeader::leaf("Lower Bound", "lower"),
            ColumnHeader::leaf("Upper Bound", "upper"),
        ],
    )
}

/// Every level combination of `factors`, first factor varying slowest
fn level_combinations(data: &GlmData, factors: &[usize]) -> Vec<Vec<(usize, usize)>> {
    let mut combos: Vec<Vec<(usize, usize)>> = vec![Vec::new()];
    for &f in factors {
        let nlevels = data.factors[f].levels.len();
        combos = combos
            .into_iter()
            .flat_map(|prefix| {
                (0..nlevels).map(move |l| {
                    let mut next = prefix.clone();
                    next.push((f, l));
                    next
                })
            })
            .collect();
    }
    combos
}

fn covariate_note(data: &GlmData) -> Option<String> {
    if data.covariates.is_empty() {
        return None;
    }
    let values: Vec<String> = data
        .covariates
        .iter()
        .map(|c| format!("{} = {:.2}", c.name, c.mean))
        .collect();
    Some(format!(
        "a. Covariates appearing in the model are evaluated at the following values: {}.",
        values.join(", ")
    ))
}

/// Marginal means of a term; an empty `factors` gives the grand mean.
pub fn emmeans_table(
    fit: &ParameterFit,
    data: &GlmData,
    factors: &[usize],
    config: &GlmConfig,
) -> ResultTable {
    let alpha = config.options.sig_level;
    let confidence = config.options.confidence();
    let title = if factors.is_empty() {
        "Estimated Marginal Means: Grand Mean".to_string()
    } else {
        let names: Vec<&str> = factors.iter().map(|&f| data.factors[f].name.as_str()).collect();
        format!("Estimated Marginal Means: {}", names.join(" * "))
    };

    let mut headers: Vec<ColumnHeader> = factors
        .iter()
        .map(|&f| ColumnHeader::row_label(data.factors[f].label.clone()))
        .collect();
    if headers.is_empty() {
        headers.push(ColumnHeader::row_label(""));
    }
    headers.extend([
        ColumnHeader::leaf("Mean", "mean"),
        ColumnHeader::leaf("Std. Error", "stdError"),
        interval_group(confidence, "Confidence Interval"),
    ]);
    let mut table = ResultTable::new(title, headers);

    let mut not_estimable = false;
    for selection in level_combinations(data, factors) {
        let l = cell_vector(fit, data, &selection);
        let est = Estimate::of(fit, &l, alpha, Adjustment::Lsd, 1.0);
        not_estimable |= est.value.is_none();
        let header: Vec<String> = if selection.is_empty() {
            vec![data.dependent.clone()]
        } else {
            selection
                .iter()
                .map(|&(f, l)| data.factors[f].levels[l].display().to_string())
                .collect()
        };
        table.push(
            TableRow::new(header)
                .opt("mean", est.value)
                .opt("stdError", est.std_error)
                .opt("lower", est.lower)
                .opt("upper", est.upper),
        );
    }

    table.footnote(format!("Dependent Variable: {}", data.dependent));
    if let Some(note) = covariate_note(data) {
        table.footnote(note);
    }
    if not_estimable {
        table.footnote("b. This level combination of factors is not estimable.");
    }
    table
}

/// Every ordered pair of levels of one factor
pub fn pairwise_table(
    fit: &ParameterFit,
    data: &GlmData,
    factor: usize,
    config: &GlmConfig,
) -> ResultTable {
    let adjustment = config.emmeans.adjustment;
    let alpha = config.options.sig_level;
    let confidence = config.options.confidence();
    let def = &data.factors[factor];
    let k = def.levels.len() as f64;
    let m = (k * (k - 1.0) / 2.0).max(1.0);

    let mut table = ResultTable::new(
        format!("Pairwise Comparisons: {}", def.name),
        vec![
            ColumnHeader::row_label(format!("(I) {}", def.label)),
            ColumnHeader::row_label(format!("(J) {}", def.label)),
            ColumnHeader::leaf("Mean Difference (I-J)", "meanDifference"),
            ColumnHeader::leaf("Std. Error", "stdError"),
            ColumnHeader::leaf("Sig.", "sig"),
            interval_group(confidence, "Confidence Interval for Difference"),
        ],
    );

    let vectors: Vec<DVector<f64>> = (0..def.levels.len())
        .map(|l| cell_vector(fit, data, &[(factor, l)]))
        .collect();
    for (i, li) in vectors.iter().enumerate() {
        for (j, lj) in vectors.iter().enumerate() {
            if i == j {
                continue;
            }
            let est = Estimate::of(fit, &(li - lj), alpha, adjustment, m);
            table.push(
                TableRow::new([
                    def.levels[i].display().to_string(),
                    def.levels[j].display().to_string(),
                ])
                .opt("meanDifference", est.value)
                .opt("stdError", est.std_error)
                .opt("sig", est.sig)
                .opt("lower", est.lower)
                .opt("upper", est.upper),
            );
        }
    }

    table.footnote("Based on estimated marginal means");
    table.footnote(format!("Adjustment for multiple comparisons: {}.", adjustment.label()));
    table
}

// ==================== Contrasts ====================

/// Orthonormal polynomial contrasts over `k` equally spaced levels, one
/// row per degree `1..k`
fn polynomial_rows(k: usize) -> Vec<Vec<f64>> {
    let x: Vec<f64> = (1..=k).map(|i| i as f64).collect();
    let mut basis: Vec<Vec<f64>> = Vec::with_capacity(k);
    for degree in 0..k {
        let mut v: Vec<f64> = x.iter().map(|xi| xi.powi(degree as i32)).collect();
        for q in &basis {
            let proj: f64 = q.iter().zip(&v).map(|(a, b)| a * b).sum();
            for (vi, qi) in v.iter_mut().zip(q) {
                *vi -= proj * qi;
            }
        }
        let norm = v.iter().map(|a| a * a).sum::<f64>().sqrt();
        if norm > 0.0 {
            v.iter_mut().for_each(|a| *a /= norm);
        }
        basis.push(v);
    }
    basis.into_iter().skip(1).collect()
}

fn polynomial_label(degree: usize) -> String {
    match degree {
        1 => "Linear".to_string(),
        2 => "Quadratic".to_string(),
        3 => "Cubic".to_string(),
        d => format!("Order {}", d),
    }
}

fn unit(k: usize, i: usize) -> Vec<f64> {
    let mut v = vec![0.0; k];
    v[i] = 1.0;
    v
}

fn minus(a: Vec<f64>, b: &[f64]) -> Vec<f64> {
    a.into_iter().zip(b).map(|(x, y)| x - y).collect()
}

fn mean_of(k: usize, levels: std::ops::Range<usize>) -> Vec<f64> {
    let count = levels.len() as f64;
    let mut v = vec![0.0; k];
    for i in levels {
        v[i] = 1.0 / count;
    }
    v
}

/// Labelled coefficient rows over the `k` level means
pub fn contrast_rows(spec: ContrastSpec, k: usize) -> Vec<(String, Vec<f64>)> {
    if k < 2 {
        return Vec::new();
    }
    let reference = match spec.reference {
        ReferenceCategory::Last => k - 1,
        ReferenceCategory::First => 0,
    };
    match spec.kind {
        ContrastKind::None => Vec::new(),
        ContrastKind::Deviation => (0..k)
            .filter(|&i| i != reference)
            .map(|i| {
                (
                    format!("Level {} vs. Mean", i + 1),
                    minus(unit(k, i), &mean_of(k, 0..k)),
                )
            })
            .collect(),
        ContrastKind::Simple => (0..k)
            .filter(|&i| i != reference)
            .map(|i| {
                (
                    format!("Level {} vs. Level {}", i + 1, reference + 1),
                    minus(unit(k, i), &unit(k, reference)),
                )
            })
            .collect(),
        ContrastKind::Difference => (1..k)
            .map(|i| {
                (
                    format!("Level {} vs. Previous", i + 1),
                    minus(unit(k, i), &mean_of(k, 0..i)),
                )
            })
            .collect(),
        ContrastKind::Helmert => (0..k - 1)
            .map(|i| {
                (
                    format!("Level {} vs. Later", i + 1),
                    minus(unit(k, i), &mean_of(k, i + 1..k)),
                )
            })
            .collect(),
        ContrastKind::Repeated => (0..k - 1)
            .map(|i| {
                (
                    format!("Level {} vs. Level {}", i + 1, i + 2),
                    minus(unit(k, i), &unit(k, i + 1)),
                )
            })
            .collect(),
        ContrastKind::Polynomial => polynomial_rows(k)
            .into_iter()
            .enumerate()
            .map(|(d, row)| (polynomial_label(d + 1), row))
            .collect(),
    }
}

/// Individual contrast estimates plus the joint F test of all of them
pub fn contrast_tables(
    fit: &ParameterFit,
    data: &GlmData,
    factor: usize,
    spec: ContrastSpec,
    config: &GlmConfig,
) -> Result<Vec<ResultTable>> {
    let def = &data.factors[factor];
    let rows = contrast_rows(spec, def.levels.len());
    if rows.is_empty() {
        return Ok(Vec::new());
    }
    let alpha = config.options.sig_level;
    let confidence = config.options.confidence();
    let level_vectors: Vec<DVector<f64>> = (0..def.levels.len())
        .map(|l| cell_vector(fit, data, &[(factor, l)]))
        .collect();

    let mut results = ResultTable::new(
        format!("Contrast Results (K Matrix): {}", def.name),
        vec![
            ColumnHeader::row_label("Contrast"),
            ColumnHeader::leaf("Contrast Estimate", "estimate"),
            ColumnHeader::leaf("Hypothesized Value", "hypothesized"),
            ColumnHeader::leaf("Difference (Estimate - Hypothesized)", "difference"),
            ColumnHeader::leaf("Std. Error", "stdError"),
            ColumnHeader::leaf("Sig.", "sig"),
            interval_group(confidence, "Confidence Interval for Difference"),
        ],
    );

    let p = fit.design.params.len();
    let mut k_rows: Vec<DVector<f64>> = Vec::with_capacity(rows.len());
    for (label, coefficients) in &rows {
        let mut l: DVector<f64> = DVector::zeros(p);
        for (c, lv) in coefficients.iter().zip(&level_vectors) {
            l += lv * *c;
        }
        let est = Estimate::of(fit, &l, alpha, Adjustment::Lsd, 1.0);
        results.push(
            TableRow::new([label.clone()])
                .opt("estimate", est.value)
                .num("hypothesized", 0.0)
                .opt("difference", est.value)
                .opt("stdError", est.std_error)
                .opt("sig", est.sig)
                .opt("lower", est.lower)
                .opt("upper", est.upper),
        );
        if est.value.is_some() {
            k_rows.push(l);
        }
    }
    results.footnote(format!("Dependent Variable: {}", data.dependent));
    if matches!(spec.kind, ContrastKind::Deviation | ContrastKind::Simple) {
        let reference = match spec.reference {
            ReferenceCategory::Last => "last",
            ReferenceCategory::First => "first",
        };
        results.footnote(format!("Reference category = {}", reference));
    }

    let mut tables = vec![results];
    if let (Some(mse), false) = (fit.mse, k_rows.is_empty()) {
        let kmat = DMatrix::from_fn(k_rows.len(), p, |i, j| k_rows[i][j]);
        let kb = &kmat * &fit.beta;
        let v = &kmat * &fit.ginv * kmat.transpose();
        let df = rank(&v) as f64;
        let ss = (pseudo_inverse(&v, "contrast test")? * &kb).dot(&kb);
        let sse = mse * fit.df_error;
        let sources = [
            SourceStatistics::new("Contrast", ss, df).tested_against(mse, fit.df_error, sse),
            SourceStatistics::new("Error", sse, fit.df_error),
        ];
        let mut test = source_table(
            &format!("Test Results: {}", def.name),
            "Sum of Squares",
            &sources,
            config.options.effect_size,
        );
        test.footnote(format!("Dependent Variable: {}", data.dependent));
        tables.push(test);
    }
    Ok(tables)
}
