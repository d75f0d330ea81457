//! Autocorrelation and partial autocorrelation functions

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use sd_core::stats::distribution::chi_square_sf;
use sd_core::{ColumnHeader, ErrorAccumulator, ResultTable, TableRow};

use super::{Series, difference, is_not_dated, load_series, natural_log, seasonal_period};
use crate::base::{Analysis, AnalysisInput, ModelError, Result, RunContext};

/// Fewest valid observations accepted per series
pub const MIN_OBSERVATIONS: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StandardErrorMethod {
    /// White-noise assumption
    #[default]
    Independence,
    /// MA(k−1) assumption
    Bartlett,
}

/// Configuration of an autocorrelation run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AutocorrelationConfig {
    pub variables: Vec<String>,
    pub maximum_lags: i64,
    pub natural_log: bool,
    /// Degree of non-seasonal differencing
    pub difference: u32,
    /// Degree of seasonal differencing
    pub seasonal_difference: u32,
    pub periodicity: Option<u32>,
    pub time_spec: Option<String>,
    pub autocorrelations: bool,
    pub partial_autocorrelations: bool,
    pub standard_error_method: StandardErrorMethod,
}

impl Default for AutocorrelationConfig {
    fn default() -> Self {
        Self {
            variables: Vec::new(),
            maximum_lags: 16,
            natural_log: false,
            difference: 0,
            seasonal_difference: 0,
            periodicity: None,
            time_spec: None,
            autocorrelations: true,
            partial_autocorrelations: true,
            standard_error_method: StandardErrorMethod::Independence,
        }
    }
}

impl AutocorrelationConfig {
    fn transformations(&self) -> Vec<String> {
        let mut steps = Vec::new();
        if self.natural_log {
            steps.push("natural log".to_string());
        }
        if self.difference > 0 {
            steps.push(format!("difference ({})", self.difference));
        }
        if self.seasonal_difference > 0 {
            steps.push(format!(
                "seasonal difference ({}, period {})",
                self.seasonal_difference,
                self.periodicity.unwrap_or(0)
            ));
        }
        steps
    }
}

/// A loaded series and its transformed values
#[derive(Debug, Clone)]
pub struct PreparedSeries {
    pub series: Series,
    pub transformed: Vec<f64>,
}

/// ACF / PACF analysis
pub struct Autocorrelation;

impl Analysis for Autocorrelation {
    const NAME: &'static str = "autocorrelation";
    type Config = AutocorrelationConfig;
    type Prepared = Vec<PreparedSeries>;

    fn validate(config: &AutocorrelationConfig, errors: &mut ErrorAccumulator) {
        errors.check(
            !config.variables.is_empty(),
            "At least one variable must be selected.",
        );
        errors.check(
            (10..=20).contains(&config.maximum_lags),
            "Lag length must be between 10 and 20.",
        );
        errors.check(
            config.autocorrelations || config.partial_autocorrelations,
            "At least one of autocorrelations or partial autocorrelations must be selected.",
        );
        if config.seasonal_difference > 0 {
            errors.check(
                seasonal_period(config.periodicity).is_some(),
                "Seasonal differencing requires a periodicity of at least 2.",
            );
            errors.check(
                !is_not_dated(config.time_spec.as_deref()),
                "Seasonal differencing is not available when the time specification is 'Not Dated'.",
            );
        }
    }

    fn prepare(
        input: &AnalysisInput,
        config: &AutocorrelationConfig,
        errors: &mut ErrorAccumulator,
    ) -> Option<Vec<PreparedSeries>> {
        let loaded = load_series(input, &config.variables, errors);
        if loaded.iter().any(|s| s.len() < MIN_OBSERVATIONS) {
            errors.coercion("Data length must be at least 20 observations.");
            return None;
        }

        let period = seasonal_period(config.periodicity).unwrap_or(1);
        let mut prepared = Vec::with_capacity(loaded.len());
        for series in loaded {
            let mut values = series.values.clone();
            if config.natural_log {
                match natural_log(&values) {
                    Some(logged) => values = logged,
                    None => {
                        errors.coercion(format!(
                            "The natural log transform requires positive values ('{}')",
                            series.name
                        ));
                        continue;
                    }
                }
            }
            values = difference(&values, 1, config.difference);
            values = difference(&values, period, config.seasonal_difference);
            if values.len() < 2 {
                errors.coercion(format!(
                    "Too few observations remain after differencing '{}'",
                    series.name
                ));
                continue;
            }
            prepared.push(PreparedSeries {
                series,
                transformed: values,
            });
        }
        Some(prepared).filter(|p| !p.is_empty())
    }

    #[instrument(name = "autocorrelation", skip_all, fields(series = prepared.len()))]
    fn compute(
        prepared: Vec<PreparedSeries>,
        config: &AutocorrelationConfig,
        ctx: &RunContext,
    ) -> Result<Vec<ResultTable>> {
        let max_lag = usize::try_from(config.maximum_lags).unwrap_or(16);
        let mut tables = vec![summary_table(&prepared, config)];

        for p in &prepared {
            ctx.check()?;
            let n = p.transformed.len();
            let lags = max_lag.min(n - 1);
            let r = autocorrelations(&p.transformed, lags).ok_or_else(|| {
                ModelError::custom(format!(
                    "Variable '{}' is constant; autocorrelations cannot be computed",
                    p.series.name
                ))
            })?;
            debug!(series = %p.series.name, n, lags, "autocorrelations computed");

            if config.autocorrelations {
                tables.push(acf_table(&p.series.label, &r, n, config.standard_error_method));
            }
            if config.partial_autocorrelations {
                tables.push(pacf_table(&p.series.label, &partial_autocorrelations(&r), n));
            }
        }
        Ok(tables)
    }
}

/// Sample autocorrelations at lags `1..=max_lag`; `None` for a constant
/// series.
pub fn autocorrelations(x: &[f64], max_lag: usize) -> Option<Vec<f64>> {
    let n = x.len();
    if n == 0 {
        return None;
    }
    let mean = x.iter().sum::<f64>() / n as f64;
    let dev: Vec<f64> = x.iter().map(|v| v - mean).collect();
    let c0: f64 = dev.iter().map(|d| d * d).sum();
    if c0 <= 0.0 {
        return None;
    }
    Some(
        (1..=max_lag.min(n.saturating_sub(1)))
            .map(|k| (0..n - k).map(|t| dev[t] * dev[t + k]).sum::<f64>() / c0)
            .collect(),
    )
}

/// Partial autocorrelations by the Durbin–Levinson recursion
pub fn partial_autocorrelations(r: &[f64]) -> Vec<f64> {
    let mut pacf = Vec::with_capacity(r.len());
    let mut phi: Vec<f64> = Vec::new();
    for k in 0..r.len() {
        let num = r[k] - (0..k).map(|j| phi[j] * r[k - 1 - j]).sum::<f64>();
        let den = 1.0 - (0..k).map(|j| phi[j] * r[j]).sum::<f64>();
        let phi_kk = if den.abs() > f64::EPSILON { num / den } else { 0.0 };
        let mut next: Vec<f64> = (0..k).map(|j| phi[j] - phi_kk * phi[k - 1 - j]).collect();
        next.push(phi_kk);
        phi = next;
        pacf.push(phi_kk);
    }
    pacf
}

/// Standard error of `r[k-1]` (lag `k`)
pub fn acf_standard_error(r: &[f64], k: usize, n: usize, method: StandardErrorMethod) -> f64 {
    let n = n as f64;
    match method {
        StandardErrorMethod::Independence => ((n - k as f64) / (n * (n + 2.0))).sqrt(),
        StandardErrorMethod::Bartlett => {
            let sum: f64 = r[..k - 1].iter().map(|v| v * v).sum();
            ((1.0 + 2.0 * sum) / n).sqrt()
        }
    }
}

/// Ljung–Box `Q` at every lag
pub fn ljung_box(r: &[f64], n: usize) -> Vec<f64> {
    let nf = n as f64;
    let mut q = 0.0;
    r.iter()
        .enumerate()
        .map(|(i, rk)| {
            q += rk * rk / (nf - (i + 1) as f64);
            nf * (nf + 2.0) * q
        })
        .collect()
}

fn summary_table(prepared: &[PreparedSeries], config: &AutocorrelationConfig) -> ResultTable {
    let mut headers = vec![ColumnHeader::row_label(""), ColumnHeader::row_label("")];
    headers.extend(
        prepared
            .iter()
            .map(|p| ColumnHeader::leaf(p.series.label.clone(), p.series.name.clone())),
    );
    let mut table = ResultTable::new("Case Processing Summary", headers);

    type Getter = fn(&PreparedSeries) -> f64;
    let rows: [(&str, &str, Getter); 5] = [
        ("Series Length", "", |p| p.series.length as f64),
        ("Number of Missing Values", "User-Missing", |p| p.series.user_missing as f64),
        ("Number of Missing Values", "System-Missing", |p| p.series.system_missing as f64),
        ("Number of Valid Values", "", |p| p.series.len() as f64),
        ("Number of Computable First Lags", "", |p| (p.transformed.len() - 1) as f64),
    ];
    for (first, second, get) in rows {
        let header: Vec<&str> = if second.is_empty() { vec![first] } else { vec![first, second] };
        let mut row = TableRow::new(header);
        for p in prepared {
            row = row.num(&p.series.name, get(p));
        }
        table.push(row);
    }

    let steps = config.transformations();
    if !steps.is_empty() {
        table.footnote(format!("Transformations: {}", steps.join(", ")));
    }
    table
}

fn acf_table(label: &str, r: &[f64], n: usize, method: StandardErrorMethod) -> ResultTable {
    let mut table = ResultTable::new(
        format!("Autocorrelations: {}", label),
        vec![
            ColumnHeader::row_label("Lag"),
            ColumnHeader::leaf("Autocorrelation", "autocorrelation"),
            ColumnHeader::leaf("Std. Error", "stdError"),
            ColumnHeader::group(
                "Box-Ljung Statistic",
                vec![
                    ColumnHeader::leaf("Value", "value"),
                    ColumnHeader::leaf("df", "df"),
                    ColumnHeader::leaf("Sig.", "sig"),
                ],
            ),
        ],
    );

    for (i, (rk, q)) in r.iter().zip(ljung_box(r, n)).enumerate() {
        let lag = i + 1;
        table.push(
            TableRow::new([lag.to_string()])
                .num("autocorrelation", *rk)
                .num("stdError", acf_standard_error(r, lag, n, method))
                .num("value", q)
                .int("df", lag)
                .opt("sig", chi_square_sf(q, lag as f64)),
        );
    }

    table.footnote(match method {
        StandardErrorMethod::Independence => {
            "a. The underlying process assumed is independence (white noise)."
        }
        StandardErrorMethod::Bartlett => {
            "a. The underlying process assumed is MA with the order equal to the lag number minus one. The Bartlett approximation is used."
        }
    });
    table.footnote("b. Based on the asymptotic chi-square approximation.");
    table
}

fn pacf_table(label: &str, pacf: &[f64], n: usize) -> ResultTable {
    let mut table = ResultTable::new(
        format!("Partial Autocorrelations: {}", label),
        vec![
            ColumnHeader::row_label("Lag"),
            ColumnHeader::leaf("Partial Autocorrelation", "partialAutocorrelation"),
            ColumnHeader::leaf("Std. Error", "stdError"),
        ],
    );
    let se = 1.0 / (n as f64).sqrt();
    for (i, value) in pacf.iter().enumerate() {
        table.push(
            TableRow::new([(i + 1).to_string()])
                .num("partialAutocorrelation", *value)
                .num("stdError", se),
        );
    }
    table
}
