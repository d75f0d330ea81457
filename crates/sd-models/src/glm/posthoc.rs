//! Post hoc multiple comparisons on observed means

use sd_core::stats::distribution::{f_quantile, f_sf, t_quantile, t_two_tailed};
use sd_core::{ColumnHeader, ResultTable, TableRow};

use super::config::{GlmConfig, PostHocMethod};
use super::design::GlmData;
use crate::base::coefficient::format_level;

/// One pairwise comparison
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Comparison {
    pub difference: f64,
    pub std_error: f64,
    pub sig: Option<f64>,
    pub lower: Option<f64>,
    pub upper: Option<f64>,
}

/// Compare two observed means under `method` with `k` groups
pub fn compare(
    method: PostHocMethod,
    difference: f64,
    std_error: f64,
    k: f64,
    df_error: f64,
    alpha: f64,
) -> Comparison {
    let m = (k * (k - 1.0) / 2.0).max(1.0);
    let t = difference / std_error;
    let (sig, half_width) = match method {
        PostHocMethod::Lsd => (
            t_two_tailed(t, df_error),
            t_quantile(1.0 - alpha / 2.0, df_error).map(|q| q * std_error),
        ),
        PostHocMethod::Bonferroni => (
            t_two_tailed(t, df_error).map(|p| (p * m).min(1.0)),
            t_quantile(1.0 - alpha / (2.0 * m), df_error).map(|q| q * std_error),
        ),
        PostHocMethod::Sidak => {
            let per_comparison = 1.0 - (1.0 - alpha).powf(1.0 / m);
            (
                t_two_tailed(t, df_error).map(|p| (1.0 - (1.0 - p).powf(m)).min(1.0)),
                t_quantile(1.0 - per_comparison / 2.0, df_error).map(|q| q * std_error),
            )
        }
        PostHocMethod::Scheffe => {
            let f = difference * difference / (std_error * std_error * (k - 1.0));
            (
                f_sf(f, k - 1.0, df_error),
                f_quantile(1.0 - alpha, k - 1.0, df_error)
                    .map(|q| ((k - 1.0) * q).sqrt() * std_error),
            )
        }
    };
    let half_width = half_width.filter(|h| h.is_finite());
    Comparison {
        difference,
        std_error,
        sig,
        lower: half_width.map(|h| difference - h),
        upper: half_width.map(|h| difference + h),
    }
}

/// Multiple comparisons of one fixed factor; `None` with fewer than two
/// observed levels or no error degrees of freedom.
pub fn posthoc_table(
    data: &GlmData,
    factor: usize,
    mse: Option<f64>,
    df_error: f64,
    config: &GlmConfig,
) -> Option<ResultTable> {
    let mse = mse.filter(|m| *m > 0.0)?;
    let def = &data.factors[factor];
    let nlevels = def.levels.len();
    if nlevels < 2 {
        return None;
    }
    let alpha = config.options.sig_level;
    let k = nlevels as f64;

    let mut sums = vec![0.0; nlevels];
    let mut counts = vec![0.0; nlevels];
    for ((&code, &y), &w) in data.codes[factor].iter().zip(&data.y).zip(&data.case_weights) {
        sums[code] += w * y;
        counts[code] += w;
    }
    let means: Vec<f64> = sums.iter().zip(&counts).map(|(s, n)| s / n).collect();

    let mut table = ResultTable::new(
        format!("Multiple Comparisons: {}", def.name),
        vec![
            ColumnHeader::row_label(""),
            ColumnHeader::row_label(format!("(I) {}", def.label)),
            ColumnHeader::row_label(format!("(J) {}", def.label)),
            ColumnHeader::leaf("Mean Difference (I-J)", "meanDifference"),
            ColumnHeader::leaf("Std. Error", "stdError"),
            ColumnHeader::leaf("Sig.", "sig"),
            ColumnHeader::group(
                format!("{}% Confidence Interval", format_level(config.options.confidence())),
                vec![
                    ColumnHeader::leaf("Lower Bound", "lower"),
                    ColumnHeader::leaf("Upper Bound", "upper"),
                ],
            ),
        ],
    );

    for method in config.posthoc.methods() {
        for i in 0..nlevels {
            for j in 0..nlevels {
                if i == j {
                    continue;
                }
                let se = (mse * (1.0 / counts[i] + 1.0 / counts[j])).sqrt();
                let c = compare(method, means[i] - means[j], se, k, df_error, alpha);
                table.push(
                    TableRow::new([
                        method.label().to_string(),
                        def.levels[i].display().to_string(),
                        def.levels[j].display().to_string(),
                    ])
                    .num("meanDifference", c.difference)
                    .num("stdError", c.std_error)
                    .opt("sig", c.sig)
                    .opt("lower", c.lower)
                    .opt("upper", c.upper),
                );
            }
        }
    }

    table.footnote(format!("Dependent Variable: {}", data.dependent));
    table.footnote("Based on observed means.");
    table.footnote(format!("The error term is Mean Square(Error) = {:.3}.", mse));
    Some(table)
}
