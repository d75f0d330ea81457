//! Exponential smoothing (simple, Holt, Winters)
//!
//! Every parameter is either fixed or searched over a grid; the grid point
//! with the smallest sum of squared one-step errors wins, ties going to the
//! first point in grid order (alpha varies slowest).

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use sd_core::{ColumnHeader, ErrorAccumulator, ResultTable, TableRow};

use super::decomposition::{DecompositionModel, MovingAverage, decompose};
use super::{Series, is_not_dated, load_series, seasonal_period};
use crate::base::{Analysis, AnalysisInput, ModelError, Result, RunContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SmoothingModel {
    #[default]
    Simple,
    Holt,
    WintersAdditive,
    WintersMultiplicative,
}

impl SmoothingModel {
    pub fn label(&self) -> &'static str {
        match self {
            SmoothingModel::Simple => "Simple",
            SmoothingModel::Holt => "Holt",
            SmoothingModel::WintersAdditive => "Winters Additive",
            SmoothingModel::WintersMultiplicative => "Winters Multiplicative",
        }
    }

    fn has_trend(&self) -> bool {
        !matches!(self, SmoothingModel::Simple)
    }

    fn is_seasonal(&self) -> bool {
        matches!(
            self,
            SmoothingModel::WintersAdditive | SmoothingModel::WintersMultiplicative
        )
    }

    fn min_length(&self, period: usize) -> usize {
        match self {
            SmoothingModel::Simple => 2,
            SmoothingModel::Holt => 3,
            _ => 2 * period,
        }
    }
}

/// A fixed value, or a grid `start, start + by, …, end`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SmoothingParameter {
    Value(f64),
    Grid { start: f64, end: f64, by: f64 },
}

impl Default for SmoothingParameter {
    fn default() -> Self {
        SmoothingParameter::Value(0.1)
    }
}

impl SmoothingParameter {
    fn is_valid(&self) -> bool {
        let unit = |v: f64| (0.0..=1.0).contains(&v);
        match *self {
            SmoothingParameter::Value(v) => unit(v),
            SmoothingParameter::Grid { start, end, by } => {
                unit(start) && unit(end) && start <= end && by > 0.0
            }
        }
    }

    /// Number of values [`SmoothingParameter::points`] yields
    pub fn count(&self) -> usize {
        match *self {
            SmoothingParameter::Grid { start, end, by } if by > 0.0 && end >= start => {
                // float-to-int casts saturate
                (((end - start) / by + 1e-9).floor() as usize).saturating_add(1)
            }
            _ => 1,
        }
    }

    /// Values to try, in order
    pub fn points(&self) -> Vec<f64> {
        match *self {
            SmoothingParameter::Value(v) => vec![v],
            SmoothingParameter::Grid { start, end, by } => {
                let steps = ((end - start) / by + 1e-9).floor().max(0.0) as usize;
                (0..=steps)
                    .map(|i| (start + i as f64 * by).clamp(0.0, 1.0))
                    .collect()
            }
        }
    }
}

/// Largest parameter grid searched in one run
pub const MAX_GRID_POINTS: usize = 100_000;

/// Largest number of forecast periods
pub const MAX_FORECAST_HORIZON: u32 = 10_000;

/// Configuration of an exponential smoothing run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SmoothingConfig {
    pub variables: Vec<String>,
    pub model: SmoothingModel,
    /// Level
    pub alpha: SmoothingParameter,
    /// Trend
    pub gamma: SmoothingParameter,
    /// Season
    pub delta: SmoothingParameter,
    pub periodicity: Option<u32>,
    pub time_spec: Option<String>,
    pub forecast_horizon: u32,
    /// Grid points listed in the smallest-SSE table
    pub display_best: u32,
}

impl Default for SmoothingConfig {
    fn default() -> Self {
        Self {
            variables: Vec::new(),
            model: SmoothingModel::Simple,
            alpha: SmoothingParameter::default(),
            gamma: SmoothingParameter::default(),
            delta: SmoothingParameter::default(),
            periodicity: None,
            time_spec: None,
            forecast_horizon: 0,
            display_best: 10,
        }
    }
}

/// One point of the parameter grid
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Parameters {
    pub alpha: f64,
    pub gamma: f64,
    pub delta: f64,
}

/// Starting level, trend and seasonal factors
#[derive(Debug, Clone, PartialEq)]
pub struct InitialState {
    pub level: f64,
    pub trend: f64,
    pub seasonal: Vec<f64>,
}

impl InitialState {
    /// Simple: the series mean. Holt: the average slope, with the level
    /// placed so the first forecast equals the first value. Winters: the
    /// Holt start on the deseasonalised series, factors from the
    /// decomposition engine.
    pub fn estimate(x: &[f64], model: SmoothingModel, period: usize) -> Result<Self> {
        let n = x.len();
        if n < 2 {
            return Err(ModelError::InsufficientData {
                n_samples: n,
                n_predictors: 2,
            });
        }
        let holt = |d: &[f64]| {
            let trend = (d[d.len() - 1] - d[0]) / (d.len() - 1) as f64;
            (d[0] - trend, trend)
        };
        match model {
            SmoothingModel::Simple => Ok(Self {
                level: x.iter().sum::<f64>() / n as f64,
                trend: 0.0,
                seasonal: Vec::new(),
            }),
            SmoothingModel::Holt => {
                let (level, trend) = holt(x);
                Ok(Self {
                    level,
                    trend,
                    seasonal: Vec::new(),
                })
            }
            SmoothingModel::WintersAdditive | SmoothingModel::WintersMultiplicative => {
                let kind = if model == SmoothingModel::WintersAdditive {
                    DecompositionModel::Additive
                } else {
                    DecompositionModel::Multiplicative
                };
                let parts = decompose(x, period, kind, MovingAverage::Centered)?;
                let (level, trend) = holt(&parts.adjusted);
                Ok(Self {
                    level,
                    trend,
                    seasonal: parts.factors,
                })
            }
        }
    }
}

/// Result of smoothing a series with one parameter set
#[derive(Debug, Clone, PartialEq)]
pub struct Smoothed {
    pub fitted: Vec<f64>,
    pub sse: f64,
    pub level: f64,
    pub trend: f64,
    pub seasonal: Vec<f64>,
}

impl Smoothed {
    /// Forecast `h` steps past the end of a series of length `n`
    pub fn forecast(&self, model: SmoothingModel, n: usize, h: usize) -> f64 {
        let base = self.level + h as f64 * self.trend;
        let season = || self.seasonal[(n + h - 1) % self.seasonal.len()];
        match model {
            SmoothingModel::Simple | SmoothingModel::Holt => base,
            SmoothingModel::WintersAdditive => base + season(),
            SmoothingModel::WintersMultiplicative => base * season(),
        }
    }
}

/// Run the smoothing recursions from `init`
pub fn smooth(
    x: &[f64],
    model: SmoothingModel,
    params: Parameters,
    init: &InitialState,
) -> Smoothed {
    let Parameters { alpha, gamma, delta } = params;
    let mut level = init.level;
    let mut trend = init.trend;
    let mut seasonal = init.seasonal.clone();
    let mut fitted = Vec::with_capacity(x.len());
    let mut sse = 0.0;

    for (t, &xt) in x.iter().enumerate() {
        let base = level + trend;
        let (forecast, deseasonalised) = match model {
            SmoothingModel::Simple => (level, xt),
            SmoothingModel::Holt => (base, xt),
            SmoothingModel::WintersAdditive => {
                let i = seasonal[t % seasonal.len()];
                (base + i, xt - i)
            }
            SmoothingModel::WintersMultiplicative => {
                let i = seasonal[t % seasonal.len()];
                (base * i, xt / i)
            }
        };
        let error = xt - forecast;
        fitted.push(forecast);
        sse += error * error;

        let previous = level;
        level = match model {
            SmoothingModel::Simple => level + alpha * error,
            _ => alpha * deseasonalised + (1.0 - alpha) * base,
        };
        if model.has_trend() {
            trend = gamma * (level - previous) + (1.0 - gamma) * trend;
        }
        if model.is_seasonal() {
            let k = t % seasonal.len();
            seasonal[k] = match model {
                SmoothingModel::WintersAdditive => delta * (xt - level) + (1.0 - delta) * seasonal[k],
                _ => delta * (xt / level) + (1.0 - delta) * seasonal[k],
            };
        }
    }

    Smoothed {
        fitted,
        sse,
        level,
        trend,
        seasonal,
    }
}

/// Grid points in search order
/// Number of grid points searched, saturating
pub fn grid_size(config: &SmoothingConfig) -> usize {
    let gammas = if config.model.has_trend() { config.gamma.count() } else { 1 };
    let deltas = if config.model.is_seasonal() { config.delta.count() } else { 1 };
    config.alpha.count().saturating_mul(gammas).saturating_mul(deltas)
}

pub fn parameter_grid(config: &SmoothingConfig) -> Vec<Parameters> {
    let gammas = if config.model.has_trend() { config.gamma.points() } else { vec![0.0] };
    let deltas = if config.model.is_seasonal() { config.delta.points() } else { vec![0.0] };
    let mut grid = Vec::new();
    for alpha in config.alpha.points() {
        for &gamma in &gammas {
            for &delta in &deltas {
                grid.push(Parameters { alpha, gamma, delta });
            }
        }
    }
    grid
}

/// Exponential smoothing analysis
pub struct ExponentialSmoothing;

impl Analysis for ExponentialSmoothing {
    const NAME: &'static str = "smoothing";
    type Config = SmoothingConfig;
    type Prepared = Vec<Series>;

    fn validate(config: &SmoothingConfig, errors: &mut ErrorAccumulator) {
        errors.check(
            !config.variables.is_empty(),
            "At least one variable must be selected.",
        );
        errors.check(
            config.alpha.is_valid(),
            "Alpha must lie in [0, 1]; a grid needs start <= end and a positive step.",
        );
        if config.model.has_trend() {
            errors.check(
                config.gamma.is_valid(),
                "Gamma must lie in [0, 1]; a grid needs start <= end and a positive step.",
            );
        }
        if config.model.is_seasonal() {
            errors.check(
                config.delta.is_valid(),
                "Delta must lie in [0, 1]; a grid needs start <= end and a positive step.",
            );
            errors.check(
                seasonal_period(config.periodicity).is_some(),
                "Winters models require a periodicity of at least 2.",
            );
            errors.check(
                !is_not_dated(config.time_spec.as_deref()),
                "Winters models are not available when the time specification is 'Not Dated'.",
            );
        }
        errors.check(
            config.display_best >= 1,
            "The number of models to display must be at least 1.",
        );
        errors.check(
            grid_size(config) <= MAX_GRID_POINTS,
            format!(
                "The parameter grid may hold at most {} points; increase the step sizes.",
                MAX_GRID_POINTS
            ),
        );
        errors.check(
            config.forecast_horizon <= MAX_FORECAST_HORIZON,
            format!(
                "The forecast horizon must not exceed {} periods.",
                MAX_FORECAST_HORIZON
            ),
        );
    }

    fn prepare(
        input: &AnalysisInput,
        config: &SmoothingConfig,
        errors: &mut ErrorAccumulator,
    ) -> Option<Vec<Series>> {
        let period = seasonal_period(config.periodicity).unwrap_or(1);
        let min_length = config.model.min_length(period);
        let series = load_series(input, &config.variables, errors);
        for s in &series {
            if s.len() < min_length {
                errors.coercion(format!(
                    "Data length must be at least {} observations for the {} model ('{}')",
                    min_length,
                    config.model.label(),
                    s.name
                ));
            }
            if config.model == SmoothingModel::WintersMultiplicative
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

    #[instrument(name = "smoothing", skip_all, fields(series = prepared.len(), model = config.model.label()))]
    fn compute(
        prepared: Vec<Series>,
        config: &SmoothingConfig,
        ctx: &RunContext,
    ) -> Result<Vec<ResultTable>> {
        let period = seasonal_period(config.periodicity).unwrap_or(1);
        let grid = parameter_grid(config);
        let mut tables = vec![model_description(config, period)];

        for series in &prepared {
            let init = InitialState::estimate(&series.values, config.model, period)?;
            let mut results: Vec<(Parameters, Smoothed)> = Vec::with_capacity(grid.len());
            for params in &grid {
                ctx.check()?;
                results.push((*params, smooth(&series.values, config.model, *params, &init)));
            }
            // stable: equal SSEs keep grid order
            results.sort_by(|a, b| a.1.sse.total_cmp(&b.1.sse));
            let Some((best_params, best)) = results.first() else {
                return Err(ModelError::custom("The parameter grid is empty"));
            };
            debug!(
                series = %series.name,
                candidates = results.len(),
                sse = best.sse,
                "best smoothing parameters found"
            );

            tables.push(best_table(series, config, &results));
            tables.push(series_table(series, config, best_params, best));
        }
        Ok(tables)
    }
}

fn model_description(config: &SmoothingConfig, period: usize) -> ResultTable {
    let mut table = ResultTable::new(
        "Model Description",
        vec![ColumnHeader::row_label(""), ColumnHeader::leaf("", "value")],
    );
    table.push(TableRow::new(["Model"]).text("value", config.model.label()));
    if config.model.is_seasonal() {
        table.push(TableRow::new(["Length of Seasonal Period"]).int("value", period));
    }
    table.push(TableRow::new(["Forecast Horizon"]).int("value", config.forecast_horizon as usize));
    table
}

fn parameter_headers(model: SmoothingModel) -> Vec<ColumnHeader> {
    let mut headers = vec![ColumnHeader::leaf("Alpha (Level)", "alpha")];
    if model.has_trend() {
        headers.push(ColumnHeader::leaf("Gamma (Trend)", "gamma"));
    }
    if model.is_seasonal() {
        headers.push(ColumnHeader::leaf("Delta (Season)", "delta"));
    }
    headers
}

fn parameter_row(row: TableRow, params: &Parameters) -> TableRow {
    row.num("alpha", params.alpha)
        .num("gamma", params.gamma)
        .num("delta", params.delta)
}

fn best_table(
    series: &Series,
    config: &SmoothingConfig,
    results: &[(Parameters, Smoothed)],
) -> ResultTable {
    let mut headers = vec![ColumnHeader::row_label("Model Rank")];
    headers.extend(parameter_headers(config.model));
    headers.push(ColumnHeader::leaf("Sums of Squared Errors", "sse"));
    let mut table = ResultTable::new(
        format!("Smallest Sums of Squared Errors: {}", series.label),
        headers,
    );
    for (rank, (params, smoothed)) in results
        .iter()
        .take(config.display_best as usize)
        .enumerate()
    {
        table.push(parameter_row(TableRow::new([(rank + 1).to_string()]), params).num("sse", smoothed.sse));
    }
    retain_declared(&mut table);
    table
}

fn series_table(
    series: &Series,
    config: &SmoothingConfig,
    params: &Parameters,
    best: &Smoothed,
) -> ResultTable {
    let mut table = ResultTable::new(
        format!("Smoothed Series: {}", series.label),
        vec![
            ColumnHeader::row_label("Case"),
            ColumnHeader::leaf("Observed", "observed"),
            ColumnHeader::leaf("Fit", "fit"),
            ColumnHeader::leaf("Error", "error"),
        ],
    );
    for (t, (x, fit)) in series.values.iter().zip(&best.fitted).enumerate() {
        table.push(
            TableRow::new([series.case_number(t).to_string()])
                .num("observed", *x)
                .num("fit", *fit)
                .num("error", x - fit),
        );
    }
    let n = series.len();
    for h in 1..=config.forecast_horizon as usize {
        table.push(
            TableRow::new([series.case_number(n - 1 + h).to_string()])
                .num("fit", best.forecast(config.model, n, h)),
        );
    }

    let mut note = format!("Parameters: alpha = {:.3}", params.alpha);
    if config.model.has_trend() {
        note.push_str(&format!(", gamma = {:.3}", params.gamma));
    }
    if config.model.is_seasonal() {
        note.push_str(&format!(", delta = {:.3}", params.delta));
    }
    table.footnote(note);
    table
}

/// Drop parameter cells the model does not use
fn retain_declared(table: &mut ResultTable) {
    let keys: Vec<String> = table.keys().into_iter().map(str::to_string).collect();
    for row in &mut table.rows {
        row.cells.retain(|k, _| keys.contains(k));
    }
}
