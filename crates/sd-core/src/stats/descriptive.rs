//! Weighted moments and summary statistics

use serde::{Deserialize, Serialize};

use super::{PercentileMethod, SortedWeightedTable, percentile};

/// Which statistics a caller asked for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StatisticSet {
    pub mean: bool,
    pub std_dev: bool,
    pub variance: bool,
    pub skewness: bool,
    pub kurtosis: bool,
    pub minimum: bool,
    pub maximum: bool,
    pub range: bool,
    pub sum: bool,
    pub sem: bool,
    pub median: bool,
    pub mode: bool,
}

impl Default for StatisticSet {
    fn default() -> Self {
        Self {
            mean: true,
            std_dev: true,
            variance: false,
            skewness: false,
            kurtosis: false,
            minimum: true,
            maximum: true,
            range: false,
            sum: false,
            sem: false,
            median: false,
            mode: false,
        }
    }
}

impl StatisticSet {
    /// Every statistic switched on
    pub fn all() -> Self {
        Self {
            mean: true,
            std_dev: true,
            variance: true,
            skewness: true,
            kurtosis: true,
            minimum: true,
            maximum: true,
            range: true,
            sum: true,
            sem: true,
            median: true,
            mode: true,
        }
    }

    /// Nothing switched on
    pub fn none() -> Self {
        Self {
            mean: false,
            std_dev: false,
            minimum: false,
            maximum: false,
            ..Self::default()
        }
    }
}

/// Summary statistics of one weighted variable.
///
/// Undefined statistics are `None`, never NaN or infinite.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DescriptiveStats {
    /// Weighted N
    pub n: f64,
    /// Unweighted number of valid cases
    pub valid_n: usize,
    pub mean: Option<f64>,
    pub sem: Option<f64>,
    pub std_dev: Option<f64>,
    pub variance: Option<f64>,
    pub skewness: Option<f64>,
    pub se_skewness: Option<f64>,
    pub kurtosis: Option<f64>,
    pub se_kurtosis: Option<f64>,
    pub minimum: Option<f64>,
    pub maximum: Option<f64>,
    pub range: Option<f64>,
    pub sum: Option<f64>,
    pub median: Option<f64>,
    pub modes: Vec<f64>,
}

impl DescriptiveStats {
    /// Compute every statistic from parallel values and weights.
    pub fn compute(values: &[f64], weights: &[f64]) -> Self {
        let table = SortedWeightedTable::build(values, weights);
        Self::from_table(&table, values, weights, PercentileMethod::HAverage)
    }

    /// Compute with an existing sorted table (shared with percentiles and
    /// frequency rows) and a percentile definition for the median.
    pub fn from_table(
        table: &SortedWeightedTable,
        values: &[f64],
        weights: &[f64],
        method: PercentileMethod,
    ) -> Self {
        let valid_n = values
            .iter()
            .zip(weights)
            .filter(|(v, w)| v.is_finite() && w.is_finite() && **w > 0.0)
            .count();
        let w = table.total_weight();
        if table.is_empty() || w <= 0.0 {
            return Self::default();
        }

        let Some(mean) = weighted_mean(values, weights) else {
            return Self::default();
        };
        let (m2, m3, m4) = central_moments(values, weights, mean);

        let variance = (w > 1.0).then(|| m2 / (w - 1.0));
        let std_dev = variance.map(f64::sqrt);
        let sem = std_dev.map(|s| s / w.sqrt());

        let s = std_dev.filter(|s| *s > 0.0);
        let skewness = match s {
            Some(s) if w > 2.0 => Some(w * m3 / ((w - 1.0) * (w - 2.0) * s.powi(3))),
            _ => None,
        };
        let kurtosis = match s {
            Some(s) if w > 3.0 => Some(
                (w * (w + 1.0) * m4 - 3.0 * m2 * m2 * (w - 1.0))
                    / ((w - 1.0) * (w - 2.0) * (w - 3.0) * s.powi(4)),
            ),
            _ => None,
        };
        let se_skewness = (w > 2.0)
            .then(|| (6.0 * w * (w - 1.0) / ((w - 2.0) * (w + 1.0) * (w + 3.0))).sqrt());
        let se_kurtosis = match se_skewness {
            Some(se) if w > 3.0 => {
                Some((4.0 * (w * w - 1.0) * se * se / ((w - 3.0) * (w + 5.0))).sqrt())
            }
            _ => None,
        };

        let minimum = table.min();
        let maximum = table.max();
        let sum: f64 = values
            .iter()
            .zip(weights)
            .filter(|(v, w)| v.is_finite() && w.is_finite() && **w > 0.0)
            .map(|(v, w)| v * w)
            .sum();

        Self {
            n: w,
            valid_n,
            mean: Some(mean),
            sem,
            std_dev,
            variance,
            skewness,
            se_skewness,
            kurtosis,
            se_kurtosis,
            minimum,
            maximum,
            range: minimum.zip(maximum).map(|(lo, hi)| hi - lo),
            sum: Some(sum),
            median: percentile(table, 0.5, method),
            modes: table.modes(),
        }
    }

    /// Null out the statistics that were not requested
    pub fn restrict(mut self, set: &StatisticSet) -> Self {
        if !set.mean {
            self.mean = None;
        }
        if !set.sem {
            self.sem = None;
        }
        if !set.std_dev {
            self.std_dev = None;
        }
        if !set.variance {
            self.variance = None;
        }
        if !set.skewness {
            self.skewness = None;
            self.se_skewness = None;
        }
        if !set.kurtosis {
            self.kurtosis = None;
            self.se_kurtosis = None;
        }
        if !set.minimum {
            self.minimum = None;
        }
        if !set.maximum {
            self.maximum = None;
        }
        if !set.range {
            self.range = None;
        }
        if !set.sum {
            self.sum = None;
        }
        if !set.median {
            self.median = None;
        }
        if !set.mode {
            self.modes.clear();
        }
        self
    }

    /// Smallest mode, as reported in single-valued tables
    pub fn mode(&self) -> Option<f64> {
        self.modes.first().copied()
    }

    /// Whether several values share the maximal weight
    pub fn has_multiple_modes(&self) -> bool {
        self.modes.len() > 1
    }
}

/// Weighted mean `Σwx / Σw` over valid pairs
pub fn weighted_mean(values: &[f64], weights: &[f64]) -> Option<f64> {
    let (sum, total) = values
        .iter()
        .zip(weights)
        .filter(|(v, w)| v.is_finite() && w.is_finite() && **w > 0.0)
        .fold((0.0, 0.0), |(s, t), (v, w)| (s + v * w, t + w));
    (total > 0.0).then(|| sum / total)
}

/// Bessel-corrected weighted variance `Σw(x−m)² / (Σw − 1)`
pub fn weighted_variance(values: &[f64], weights: &[f64]) -> Option<f64> {
    let mean = weighted_mean(values, weights)?;
    let total: f64 = weights.iter().filter(|w| w.is_finite() && **w > 0.0).sum();
    if total <= 1.0 {
        return None;
    }
    let (m2, _, _) = central_moments(values, weights, mean);
    Some(m2 / (total - 1.0))
}

fn central_moments(values: &[f64], weights: &[f64], mean: f64) -> (f64, f64, f64) {
    values
        .iter()
        .zip(weights)
        .filter(|(v, w)| v.is_finite() && w.is_finite() && **w > 0.0)
        .fold((0.0, 0.0, 0.0), |(m2, m3, m4), (&x, &w)| {
            let d = x - mean;
            let d2 = d * d;
            (m2 + w * d2, m3 + w * d2 * d, m4 + w * d2 * d2)
        })
}
