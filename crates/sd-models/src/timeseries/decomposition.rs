//! Seasonal decomposition (ratio-to-moving-average)

use serde::{Deserialize, Serialize};
use tracing::instrument;

use sd_core::{ColumnHeader, ErrorAccumulator, ResultTable, TableRow};

use super::{Series, is_not_dated, load_series, seasonal_period};
use crate::base::{Analysis, AnalysisInput, ModelError, Result, RunContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DecompositionModel {
    #[default]
    Multiplicative,
    Additive,
}

impl DecompositionModel {
    pub fn label(&self) -> &'static str {
        match self {
            DecompositionModel::Multiplicative => "Multiplicative",
            DecompositionModel::Additive => "Additive",
        }
    }

    fn remove(&self, x: f64, component: f64) -> f64 {
        match self {
            DecompositionModel::Multiplicative => x / component,
            DecompositionModel::Additive => x - component,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MovingAverage {
    /// Span `p + 1` with half-weighted endpoints for even periods
    #[default]
    Centered,
    /// Span `p`, all points weighted equally
    EqualWeights,
}

/// Configuration of a seasonal decomposition run
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DecompositionConfig {
    pub variables: Vec<String>,
    pub model: DecompositionModel,
    pub moving_average: MovingAverage,
    pub periodicity: Option<u32>,
    pub time_spec: Option<String>,
}

/// Components of one decomposed series, parallel to its values
#[derive(Debug, Clone, PartialEq)]
pub struct Decomposed {
    pub moving_average: Vec<Option<f64>>,
    /// Ratio (multiplicative) or difference (additive) to the moving average
    pub ratio: Vec<Option<f64>>,
    /// One factor per season, normalised to mean 1 or sum 0
    pub factors: Vec<f64>,
    pub adjusted: Vec<f64>,
    pub trend_cycle: Vec<f64>,
    pub irregular: Vec<f64>,
}

impl Decomposed {
    pub fn seasonal(&self, t: usize) -> f64 {
        self.factors[t % self.factors.len()]
    }
}

fn moving_average(x: &[f64], period: usize, method: MovingAverage) -> Vec<Option<f64>> {
    let n = x.len();
    let half = period / 2;
    let centered = period % 2 == 0 && method == MovingAverage::Centered;
    (0..n)
        .map(|t| {
            if t < half {
                return None;
            }
            if period % 2 == 1 {
                (t + half < n).then(|| x[t - half..=t + half].iter().sum::<f64>() / period as f64)
            } else if centered {
                (t + half < n).then(|| {
                    let inner: f64 = x[t - half + 1..t + half].iter().sum();
                    (inner + 0.5 * (x[t - half] + x[t + half])) / period as f64
                })
            } else {
                (t + half <= n).then(|| x[t - half..t + half].iter().sum::<f64>() / period as f64)
            }
        })
        .collect()
}

/// 3×3 moving average; windows shrink towards the ends
fn trend_cycle(x: &[f64]) -> Vec<f64> {
    let n = x.len();
    (0..n)
        .map(|t| {
            if t >= 2 && t + 2 < n {
                (x[t - 2] + 2.0 * x[t - 1] + 3.0 * x[t] + 2.0 * x[t + 1] + x[t + 2]) / 9.0
            } else if t >= 1 && t + 1 < n {
                (x[t - 1] + x[t] + x[t + 1]) / 3.0
            } else {
                x[t]
            }
        })
        .collect()
}

/// Decompose `x` with seasonal period `period`. Season `j` holds the
/// values at positions `t` with `t % period == j`.
pub fn decompose(
    x: &[f64],
    period: usize,
    model: DecompositionModel,
    method: MovingAverage,
) -> Result<Decomposed> {
    if period < 2 || x.len() < 2 * period {
        return Err(ModelError::InsufficientData {
            n_samples: x.len(),
            n_predictors: 2 * period,
        });
    }
    let ma = moving_average(x, period, method);
    let ratio: Vec<Option<f64>> = x
        .iter()
        .zip(&ma)
        .map(|(v, m)| m.map(|m| model.remove(*v, m)))
        .collect();

    let mut sums = vec![0.0; period];
    let mut counts = vec![0usize; period];
    for (t, r) in ratio.iter().enumerate() {
        if let Some(r) = r {
            sums[t % period] += r;
            counts[t % period] += 1;
        }
    }
    let mut factors: Vec<f64> = sums
        .iter()
        .zip(&counts)
        .map(|(s, c)| if *c > 0 { s / *c as f64 } else { 0.0 })
        .collect();
    let mean = factors.iter().sum::<f64>() / period as f64;
    for f in &mut factors {
        *f = match model {
            DecompositionModel::Multiplicative => *f / mean,
            DecompositionModel::Additive => *f - mean,
        };
    }
    if factors.iter().any(|f| !f.is_finite()) {
        return Err(ModelError::numerical(
            "seasonal factors are not finite",
            "decompose",
        ));
    }

    let adjusted: Vec<f64> = x
        .iter()
        .enumerate()
        .map(|(t, v)| model.remove(*v, factors[t % period]))
        .collect();
    let trend = trend_cycle(&adjusted);
    let irregular = adjusted
        .iter()
        .zip(&trend)
        .map(|(a, s)| model.remove(*a, *s))
        .collect();

    Ok(Decomposed {
        moving_average: ma,
        ratio,
        factors,
        adjusted,
        trend_cycle: trend,
        irregular,
    })
}

/// Seasonal decomposition analysis
pub struct Decomposition;

impl Analysis for Decomposition {
    const NAME: &'static str = "decomposition";
    type Config = DecompositionConfig;
    type Prepared = Vec<Series>;

    fn validate(config: &DecompositionConfig, errors: &mut ErrorAccumulator) {
        errors.check(
            !config.variables.is_empty(),
            "At least one variable must be selected.",
        );
        errors.check(
            seasonal_period(config.periodicity).is_some(),
            "Periodicity must be at least 2.",
        );
        errors.check(
            !is_not_dated(config.time_spec.as_deref()),
            "Seasonal decomposition is not available when the time specification is 'Not Dated'.",
        );
    }

    fn prepare(
        input: &AnalysisInput,
        config: &DecompositionConfig,
        errors: &mut ErrorAccumulator,
    ) -> Option<Vec<Series>> {
        let period = seasonal_period(config.periodicity)?;
        let series = load_series(input, &config.variables, errors);
        for s in &series {
            if s.len() < 2 * period {
                errors.coercion(format!(
                    "Data length must be at least {} observations for seasonal decomposition ('{}')",
                    2 * period,
                    s.name
                ));
            }
            if config.model == DecompositionModel::Multiplicative
                && s.values.iter().any(|v| *v <= 0.0)
            {
                errors.coercion(format!(
                    "The multiplicative model requires strictly positive values ('{}')",
                    s.name
                ));
            }
        }
        Some(series).filter(|s| !s.is_empty())
    }

    #[instrument(name = "decomposition", skip_all, fields(series = prepared.len()))]
    fn compute(
        prepared: Vec<Series>,
        config: &DecompositionConfig,
        ctx: &RunContext,
    ) -> Result<Vec<ResultTable>> {
        let period = seasonal_period(config.periodicity)
            .ok_or_else(|| ModelError::invalid("Periodicity must be at least 2."))?;
        let mut tables = vec![model_description(config, period)];
        for series in &prepared {
            ctx.check()?;
            let parts = decompose(&series.values, period, config.model, config.moving_average)?;
            tables.push(factors_table(series, &parts, config.model));
            tables.push(components_table(series, &parts));
        }
        Ok(tables)
    }
}

fn model_description(config: &DecompositionConfig, period: usize) -> ResultTable {
    let method = if period % 2 == 0 && config.moving_average == MovingAverage::Centered {
        "Span equal to the periodicity plus 1 and endpoints weighted by .5"
    } else {
        "Span equal to the periodicity and all points weighted equally"
    };
    let mut table = ResultTable::new(
        "Model Description",
        vec![ColumnHeader::row_label(""), ColumnHeader::leaf("", "value")],
    );
    table.push(TableRow::new(["Model Type"]).text("value", config.model.label()));
    table.push(TableRow::new(["Length of Seasonal Period"]).int("value", period));
    table.push(TableRow::new(["Computing Method of Moving Averages"]).text("value", method));
    table
}

fn factors_table(series: &Series, parts: &Decomposed, model: DecompositionModel) -> ResultTable {
    let (header, scale) = match model {
        DecompositionModel::Multiplicative => ("Seasonal Factor (%)", 100.0),
        DecompositionModel::Additive => ("Seasonal Factor", 1.0),
    };
    let mut table = ResultTable::new(
        format!("Seasonal Factors: {}", series.label),
        vec![
            ColumnHeader::row_label("Period"),
            ColumnHeader::leaf(header, "seasonalFactor"),
        ],
    );
    // season 1 is the season of the first valid case
    for (j, f) in parts.factors.iter().enumerate() {
        table.push(TableRow::new([(j + 1).to_string()]).num("seasonalFactor", f * scale));
    }
    table
}

fn components_table(series: &Series, parts: &Decomposed) -> ResultTable {
    let mut table = ResultTable::new(
        format!("Seasonal Decomposition: {}", series.label),
        vec![
            ColumnHeader::row_label("Case"),
            ColumnHeader::leaf("Original Series", "original"),
            ColumnHeader::leaf("Moving Average Series", "movingAverage"),
            ColumnHeader::leaf("Ratio or Difference", "ratio"),
            ColumnHeader::leaf("Seasonal Factor", "seasonalFactor"),
            ColumnHeader::leaf("Seasonally Adjusted Series", "adjusted"),
            ColumnHeader::leaf("Smoothed Trend-Cycle", "trendCycle"),
            ColumnHeader::leaf("Irregular Component", "irregular"),
        ],
    );
    for (t, x) in series.values.iter().enumerate() {
        table.push(
            TableRow::new([series.case_number(t).to_string()])
                .num("original", *x)
                .opt("movingAverage", parts.moving_average[t])
                .opt("ratio", parts.ratio[t])
                .num("seasonalFactor", parts.seasonal(t))
                .num("adjusted", parts.adjusted[t])
                .num("trendCycle", parts.trend_cycle[t])
                .num("irregular", parts.irregular[t]),
        );
    }
    table
}
