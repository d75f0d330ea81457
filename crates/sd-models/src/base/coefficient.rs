//! Coefficient definition

use serde::{Deserialize, Serialize};

use sd_core::stats::distribution::{normal_quantile, normal_two_tailed, t_quantile, t_two_tailed};
use sd_core::{ColumnHeader, TableRow};

/// Parameter estimate with its inference
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Coefficient {
    /// Parameter name, e.g. `[group=2]`
    pub name: String,
    /// Coefficient estimate
    pub estimate: f64,
    /// Standard error
    pub std_error: Option<f64>,
    /// t (or z) statistic
    pub t_stat: Option<f64>,
    /// p-value
    pub p_value: Option<f64>,
    /// Lower bound of confidence interval
    pub ci_lower: Option<f64>,
    /// Upper bound of confidence interval
    pub ci_upper: Option<f64>,
    /// Degrees of freedom; `None` for normal-theory inference
    pub df: Option<f64>,
    /// Aliased parameter fixed at zero
    pub redundant: bool,
}

impl Coefficient {
    /// Create a new coefficient
    pub fn new(name: impl Into<String>, estimate: f64) -> Self {
        Self {
            name: name.into(),
            estimate,
            std_error: None,
            t_stat: None,
            p_value: None,
            ci_lower: None,
            ci_upper: None,
            df: None,
            redundant: false,
        }
    }

    /// A parameter set to zero because it is redundant
    pub fn redundant(name: impl Into<String>) -> Self {
        Self {
            redundant: true,
            ..Self::new(name, 0.0)
        }
    }

    /// Set standard error
    pub fn with_std_error(mut self, se: f64) -> Self {
        self.std_error = Some(se);
        self
    }

    /// Set confidence interval
    pub fn with_ci(mut self, lower: f64, upper: f64) -> Self {
        self.ci_lower = Some(lower);
        self.ci_upper = Some(upper);
        self
    }

    /// Fill statistic, p-value and interval from the standard error.
    ///
    /// With `df` the statistic is referred to Student's t, otherwise to the
    /// standard normal. `confidence` is e.g. `0.95`.
    pub fn with_inference(mut self, se: f64, df: Option<f64>, confidence: f64) -> Self {
        self.std_error = Some(se);
        self.df = df;
        if !(se > 0.0) || !se.is_finite() {
            return self;
        }
        let stat = self.estimate / se;
        let upper_q = 1.0 - (1.0 - confidence) / 2.0;
        let (p, crit) = match df {
            Some(df) => (t_two_tailed(stat, df), t_quantile(upper_q, df)),
            None => (normal_two_tailed(stat), Some(normal_quantile(upper_q))),
        };
        self.t_stat = Some(stat);
        self.p_value = p;
        if let Some(crit) = crit.filter(|c| c.is_finite()) {
            let (lower, upper) = (self.estimate - crit * se, self.estimate + crit * se);
            self = self.with_ci(lower, upper);
        }
        self
    }

    /// Standard headers for an estimates table; `stat` is `"t"` or `"Z"`.
    pub fn headers(stat: &str, confidence: f64) -> Vec<ColumnHeader> {
        vec![
            ColumnHeader::row_label("Parameter"),
            ColumnHeader::leaf("B", "estimate"),
            ColumnHeader::leaf("Std. Error", "stdError"),
            ColumnHeader::leaf(stat, "statistic"),
            ColumnHeader::leaf("Sig.", "sig"),
            ColumnHeader::group(
                format!("{}% Confidence Interval", format_level(confidence)),
                vec![
                    ColumnHeader::leaf("Lower Bound", "lower"),
                    ColumnHeader::leaf("Upper Bound", "upper"),
                ],
            ),
        ]
    }

    /// Table row keyed by [`Coefficient::headers`]
    pub fn to_row(&self, row_header: Vec<String>) -> TableRow {
        let row = TableRow::new(row_header).num("estimate", self.estimate);
        if self.redundant {
            return row;
        }
        row.opt("stdError", self.std_error)
            .opt("statistic", self.t_stat)
            .opt("sig", self.p_value)
            .opt("lower", self.ci_lower)
            .opt("upper", self.ci_upper)
    }
}

/// `0.95` → `"95"`, `0.975` → `"97.5"`
pub fn format_level(confidence: f64) -> String {
    let pct = confidence * 100.0;
    if (pct - pct.round()).abs() < 1e-9 {
        format!("{}", pct.round() as i64)
    } else {
        format!("{:.1}", pct)
    }
}
