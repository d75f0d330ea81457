//! FREQUENCIES
//!
//! A "Statistics" table over every selected variable followed by one
//! frequency table per variable. STRING variables get frequency rows but
//! only N in the statistics table.

use serde::{Deserialize, Serialize};
use tracing::instrument;

use sd_core::data::{CoercedColumn, CoercedLabels, Variable, coerce_column, coerce_labels};
use sd_core::stats::{
    DescriptiveStats, FrequencyTable, PercentileMethod, SortedWeightedTable, StatisticSet,
    percentile, round1,
};
use sd_core::{ColumnHeader, ErrorAccumulator, ResultTable, TableRow};

use crate::base::{Analysis, AnalysisInput, Result, RunContext};


/// Configuration of a FREQUENCIES run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FrequenciesConfig {
    pub variables: Vec<String>,
    pub statistics: StatisticSet,
    pub percentile_method: PercentileMethod,
    /// Add the 25th, 50th and 75th percentiles
    pub quartiles: bool,
    /// Split into this many equal groups
    pub cut_points: Option<u32>,
    /// Extra percentiles, each in `[0, 100]`
    pub percentiles: Vec<f64>,
    /// Emit the per-variable frequency tables
    pub frequency_tables: bool,
}

impl Default for FrequenciesConfig {
    fn default() -> Self {
        Self {
            variables: Vec::new(),
            statistics: StatisticSet::none(),
            percentile_method: PercentileMethod::HAverage,
            quartiles: false,
            cut_points: None,
            percentiles: Vec::new(),
            frequency_tables: true,
        }
    }
}

impl FrequenciesConfig {
    /// Requested percentiles as fractions, ascending and deduplicated
    pub fn percentile_points(&self) -> Vec<f64> {
        let mut points: Vec<f64> = self.percentiles.clone();
        if self.quartiles {
            points.extend([25.0, 50.0, 75.0]);
        }
        if let Some(n) = self.cut_points.filter(|n| *n >= 2) {
            points.extend((1..n).map(|i| 100.0 * f64::from(i) / f64::from(n)));
        }
        points.sort_by(|a, b| a.total_cmp(b));
        points.dedup_by(|a, b| (*a - *b).abs() < 1e-9);
        points
    }
}

pub(crate) enum Coerced {
    Numeric(CoercedColumn),
    Labels(CoercedLabels),
}

pub struct PreparedVariable {
    variable: Variable,
    coerced: Coerced,
    /// Weight of every case with a usable case weight
    total_n: f64,
}

/// FREQUENCIES analysis
pub struct Frequencies;

impl Analysis for Frequencies {
    const NAME: &'static str = "frequencies";
    type Config = FrequenciesConfig;
    type Prepared = Vec<PreparedVariable>;

    fn validate(config: &FrequenciesConfig, errors: &mut ErrorAccumulator) {
        errors.check(
            !config.variables.is_empty(),
            "At least one variable must be selected.",
        );
        errors.check(
            config.percentiles.iter().all(|p| (0.0..=100.0).contains(p)),
            "Percentile values must be between 0 and 100.",
        );
        if let Some(n) = config.cut_points {
            errors.check(
                (2..=100).contains(&n),
                "Cut points must be between 2 and 100.",
            );
        }
    }

    fn prepare(
        input: &AnalysisInput,
        config: &FrequenciesConfig,
        errors: &mut ErrorAccumulator,
    ) -> Option<Vec<PreparedVariable>> {
        let weights = match input.case_weights() {
            Ok(w) => w,
            Err(err) => {
                errors.push(err.to_record());
                return None;
            }
        };
        let total_n = weights.total();

        let prepared = input
            .resolve(&config.variables, errors)
            .into_iter()
            .map(|(variable, cells)| {
                let coerced = if variable.is_numeric() {
                    Coerced::Numeric(coerce_column(cells, variable, &weights))
                } else {
                    Coerced::Labels(coerce_labels(cells, variable, &weights))
                };
                PreparedVariable {
                    variable: variable.clone(),
                    coerced,
                    total_n,
                }
            })
            .collect();
        Some(prepared)
    }

    #[instrument(name = "frequencies", skip_all, fields(variables = prepared.len()))]
    fn compute(
        prepared: Vec<PreparedVariable>,
        config: &FrequenciesConfig,
        ctx: &RunContext,
    ) -> Result<Vec<ResultTable>> {
        let mut tables = vec![statistics_table(&prepared, config)];
        if config.frequency_tables {
            for var in &prepared {
                ctx.check()?;
                tables.push(frequency_table(var));
            }
        }
        Ok(tables)
    }
}

/// Percentile label as SPSS prints it: `25`, `33.33333333`
pub(crate) fn percentile_label(p: f64) -> String {
    if (p - p.round()).abs() < 1e-9 {
        format!("{}", p.round() as i64)
    } else {
        let text = format!("{:.8}", p);
        text.trim_end_matches('0').trim_end_matches('.').to_string()
    }
}

fn statistics_table(prepared: &[PreparedVariable], config: &FrequenciesConfig) -> ResultTable {
    let mut headers = vec![ColumnHeader::row_label("")];
    headers.extend(
        prepared
            .iter()
            .map(|p| ColumnHeader::leaf(p.variable.display_name(), p.variable.name.clone())),
    );
    let mut table = ResultTable::new("Statistics", headers);

    let stats: Vec<Option<(SortedWeightedTable, DescriptiveStats)>> = prepared
        .iter()
        .map(|p| match &p.coerced {
            Coerced::Numeric(col) => {
                let sorted = SortedWeightedTable::build(&col.values, &col.weights);
                let stats = DescriptiveStats::from_table(
                    &sorted,
                    &col.values,
                    &col.weights,
                    config.percentile_method,
                );
                Some((sorted, stats))
            }
            Coerced::Labels(_) => None,
        })
        .collect();

    let valid_n: Vec<f64> = prepared
        .iter()
        .map(|p| match &p.coerced {
            Coerced::Numeric(c) => c.total_weight,
            Coerced::Labels(c) => c.total_weight,
        })
        .collect();

    let mut valid_row = TableRow::new(["N", "Valid"]);
    let mut missing_row = TableRow::new(["N", "Missing"]);
    for (p, valid) in prepared.iter().zip(&valid_n) {
        valid_row = valid_row.num(&p.variable.name, *valid);
        missing_row = missing_row.num(&p.variable.name, p.total_n - valid);
    }
    table.push(valid_row);
    table.push(missing_row);

    let set = &config.statistics;
    type Getter = fn(&DescriptiveStats) -> Option<f64>;
    let rows: [(bool, &str, Getter); 14] = [
        (set.mean, "Mean", |s| s.mean),
        (set.sem, "Std. Error of Mean", |s| s.sem),
        (set.median, "Median", |s| s.median),
        (set.mode, "Mode", |s| s.mode()),
        (set.std_dev, "Std. Deviation", |s| s.std_dev),
        (set.variance, "Variance", |s| s.variance),
        (set.skewness, "Skewness", |s| s.skewness),
        (set.skewness, "Std. Error of Skewness", |s| s.se_skewness),
        (set.kurtosis, "Kurtosis", |s| s.kurtosis),
        (set.kurtosis, "Std. Error of Kurtosis", |s| s.se_kurtosis),
        (set.range, "Range", |s| s.range),
        (set.minimum, "Minimum", |s| s.minimum),
        (set.maximum, "Maximum", |s| s.maximum),
        (set.sum, "Sum", |s| s.sum),
    ];

    let mut multiple_modes = false;
    for (_, label, get) in rows.iter().filter(|r| r.0) {
        let mut row = TableRow::new([*label]);
        for (p, s) in prepared.iter().zip(&stats) {
            let value = s.as_ref().and_then(|(_, s)| get(s));
            if *label == "Mode" && s.as_ref().is_some_and(|(_, s)| s.has_multiple_modes()) {
                multiple_modes = true;
            }
            row = row.opt(&p.variable.name, value);
        }
        table.push(row);
    }

    for point in config.percentile_points() {
        let mut row = TableRow::new(["Percentiles".to_string(), percentile_label(point)]);
        for (p, s) in prepared.iter().zip(&stats) {
            let value = s
                .as_ref()
                .and_then(|(sorted, _)| percentile(sorted, point / 100.0, config.percentile_method));
            row = row.opt(&p.variable.name, value);
        }
        table.push(row);
    }

    if multiple_modes {
        table.footnote("a. Multiple modes exist. The smallest value is shown");
    }
    table
}

fn frequency_table(prepared: &PreparedVariable) -> ResultTable {
    let variable = &prepared.variable;
    let headers = vec![
        ColumnHeader::row_label(""),
        ColumnHeader::leaf("Frequency", "frequency"),
        ColumnHeader::leaf("Percent", "percent"),
        ColumnHeader::leaf("Valid Percent", "validPercent"),
        ColumnHeader::leaf("Cumulative Percent", "cumulativePercent"),
    ];
    let mut table = ResultTable::new(variable.display_name(), headers);
    let total_n = prepared.total_n;

    let (freq, missing): (FrequencyTable, Vec<(String, f64)>) = match &prepared.coerced {
        Coerced::Numeric(col) => {
            let sorted = SortedWeightedTable::build(&col.values, &col.weights);
            let freq = FrequencyTable::build(&sorted, total_n, |v| variable.format_value(v));
            let mut user: Vec<(f64, f64)> = Vec::new();
            for (value, weight) in &col.user_missing {
                match user.iter_mut().find(|(v, _)| v == value) {
                    Some((_, w)) => *w += weight,
                    None => user.push((*value, *weight)),
                }
            }
            user.sort_by(|a, b| a.0.total_cmp(&b.0));
            let mut missing: Vec<(String, f64)> = user
                .into_iter()
                .map(|(v, w)| (variable.format_value(v), w))
                .collect();
            missing.push(("System".to_string(), col.system_missing));
            (freq, missing)
        }
        Coerced::Labels(col) => {
            let labels: Vec<String> = col
                .labels
                .iter()
                .map(|l| variable.text_label(l).unwrap_or(l).to_string())
                .collect();
            let freq = FrequencyTable::build_labels(&labels, &col.weights, total_n);
            let mut user: Vec<(String, f64)> = Vec::new();
            for (value, weight) in &col.user_missing {
                match user.iter_mut().find(|(v, _)| v == value) {
                    Some((_, w)) => *w += weight,
                    None => user.push((value.clone(), *weight)),
                }
            }
            user.sort_by(|a, b| a.0.cmp(&b.0));
            user.push(("System".to_string(), col.system_missing));
            (freq, user)
        }
    };

    let mut freq = freq;
    for (label, weight) in missing {
        freq.add_missing(label, weight);
    }

    let percent_of_total = |w: f64| if total_n > 0.0 { round1(w / total_n * 100.0) } else { 0.0 };

    for row in &freq.rows {
        table.push(
            TableRow::new(["Valid".to_string(), row.label.clone()])
                .num("frequency", row.frequency)
                .num("percent", row.percent)
                .num("validPercent", row.valid_percent)
                .num("cumulativePercent", row.cumulative_percent),
        );
    }
    if !freq.rows.is_empty() {
        table.push(
            TableRow::new(["Valid", "Total"])
                .num("frequency", freq.valid_n)
                .num("percent", percent_of_total(freq.valid_n))
                .num("validPercent", 100.0),
        );
    }
    if !freq.missing.is_empty() {
        for row in &freq.missing {
            table.push(
                TableRow::new(["Missing".to_string(), row.label.clone()])
                    .num("frequency", row.frequency)
                    .num("percent", row.percent),
            );
        }
        let missing_n: f64 = freq.missing.iter().map(|r| r.frequency).sum();
        table.push(
            TableRow::new(["Missing", "Total"])
                .num("frequency", missing_n)
                .num("percent", percent_of_total(missing_n)),
        );
    }
    table.push(
        TableRow::new(["Total"])
            .num("frequency", total_n)
            .num("percent", if total_n > 0.0 { 100.0 } else { 0.0 }),
    );
    table
}
