//! DESCRIPTIVES

use serde::{Deserialize, Serialize};
use tracing::instrument;

use sd_core::data::{CaseWeights, CoercedColumn, Variable, coerce_column, listwise};
use sd_core::stats::{DescriptiveStats, StatisticSet};
use sd_core::{ColumnHeader, ErrorAccumulator, ResultTable, TableRow};

use crate::base::{Analysis, AnalysisInput, Result, RunContext};


/// Configuration of a DESCRIPTIVES run
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DescriptivesConfig {
    pub variables: Vec<String>,
    pub statistics: StatisticSet,
    /// Emit z-scores for every case
    pub save_standardized: bool,
}

pub struct PreparedDescriptives {
    columns: Vec<(Variable, CoercedColumn)>,
    weights: CaseWeights,
    ncases: usize,
}

/// DESCRIPTIVES analysis
pub struct Descriptives;

impl Analysis for Descriptives {
    const NAME: &'static str = "descriptives";
    type Config = DescriptivesConfig;
    type Prepared = PreparedDescriptives;

    fn validate(config: &DescriptivesConfig, errors: &mut ErrorAccumulator) {
        errors.check(
            !config.variables.is_empty(),
            "At least one variable must be selected.",
        );
    }

    fn prepare(
        input: &AnalysisInput,
        config: &DescriptivesConfig,
        errors: &mut ErrorAccumulator,
    ) -> Option<PreparedDescriptives> {
        let weights = match input.case_weights() {
            Ok(w) => w,
            Err(err) => {
                errors.push(err.to_record());
                return None;
            }
        };

        let mut columns = Vec::new();
        for (variable, cells) in input.resolve(&config.variables, errors) {
            if !variable.is_numeric() {
                errors.coercion(format!(
                    "Variable '{}' is not numeric and cannot be summarised",
                    variable.name
                ));
                continue;
            }
            columns.push((variable.clone(), coerce_column(cells, variable, &weights)));
        }

        Some(PreparedDescriptives {
            columns,
            weights,
            ncases: input.ncases(),
        })
    }

    #[instrument(name = "descriptives", skip_all, fields(variables = prepared.columns.len()))]
    fn compute(
        prepared: PreparedDescriptives,
        config: &DescriptivesConfig,
        ctx: &RunContext,
    ) -> Result<Vec<ResultTable>> {
        let stats: Vec<DescriptiveStats> = prepared
            .columns
            .iter()
            .map(|(_, col)| DescriptiveStats::compute(&col.values, &col.weights))
            .collect();
        ctx.check()?;

        let mut tables = vec![descriptives_table(&prepared, &stats, &config.statistics)];
        if config.save_standardized {
            tables.push(standardized_table(&prepared, &stats));
        }
        Ok(tables)
    }
}

fn stat_group(header: &str, key: &str, with_error: bool) -> ColumnHeader {
    let mut children = vec![ColumnHeader::leaf("Statistic", key)];
    if with_error {
        children.push(ColumnHeader::leaf("Std. Error", format!("{}StdError", key)));
    }
    ColumnHeader::group(header, children)
}

fn descriptives_table(
    prepared: &PreparedDescriptives,
    stats: &[DescriptiveStats],
    set: &StatisticSet,
) -> ResultTable {
    let mut headers = vec![ColumnHeader::row_label(""), stat_group("N", "n", false)];
    if set.range {
        headers.push(stat_group("Range", "range", false));
    }
    if set.minimum {
        headers.push(stat_group("Minimum", "minimum", false));
    }
    if set.maximum {
        headers.push(stat_group("Maximum", "maximum", false));
    }
    if set.sum {
        headers.push(stat_group("Sum", "sum", false));
    }
    if set.mean {
        headers.push(stat_group("Mean", "mean", set.sem));
    }
    if set.std_dev {
        headers.push(stat_group("Std. Deviation", "stdDev", false));
    }
    if set.variance {
        headers.push(stat_group("Variance", "variance", false));
    }
    if set.skewness {
        headers.push(stat_group("Skewness", "skewness", true));
    }
    if set.kurtosis {
        headers.push(stat_group("Kurtosis", "kurtosis", true));
    }

    let mut table = ResultTable::new("Descriptive Statistics", headers);
    for ((variable, _), s) in prepared.columns.iter().zip(stats) {
        table.push(
            TableRow::new([variable.display_name()])
                .num("n", s.n)
                .opt("range", s.range)
                .opt("minimum", s.minimum)
                .opt("maximum", s.maximum)
                .opt("sum", s.sum)
                .opt("mean", s.mean)
                .opt("meanStdError", s.sem)
                .opt("stdDev", s.std_dev)
                .opt("variance", s.variance)
                .opt("skewness", s.skewness)
                .opt("skewnessStdError", s.se_skewness)
                .opt("kurtosis", s.kurtosis)
                .opt("kurtosisStdError", s.se_kurtosis),
        );
    }

    let columns: Vec<&CoercedColumn> = prepared.columns.iter().map(|(_, c)| c).collect();
    let listwise_n: f64 = listwise(&columns)
        .into_iter()
        .filter_map(|case| prepared.weights.get(case))
        .sum();
    table.push(TableRow::new(["Valid N (listwise)"]).num("n", listwise_n));

    // undeclared keys of the variable rows are dropped to keep rows uniform
    let keys: Vec<String> = table.keys().into_iter().map(str::to_string).collect();
    for row in &mut table.rows {
        row.cells.retain(|k, _| keys.contains(k));
    }
    table
}

fn standardized_table(prepared: &PreparedDescriptives, stats: &[DescriptiveStats]) -> ResultTable {
    let mut headers = vec![ColumnHeader::row_label("Case")];
    headers.extend(
        prepared
            .columns
            .iter()
            .map(|(v, _)| ColumnHeader::leaf(format!("Z{}", v.name), format!("Z{}", v.name))),
    );
    let mut table = ResultTable::new("Standardized Values", headers);

    // case index -> value, per variable
    let lookups: Vec<Vec<Option<f64>>> = prepared
        .columns
        .iter()
        .map(|(_, col)| {
            let mut values = vec![None; prepared.ncases];
            for (&case, &v) in col.case_indices.iter().zip(&col.values) {
                if case < values.len() {
                    values[case] = Some(v);
                }
            }
            values
        })
        .collect();

    for case in 0..prepared.ncases {
        let mut row = TableRow::new([(case + 1).to_string()]);
        for (((variable, _), s), values) in prepared.columns.iter().zip(stats).zip(&lookups) {
            let z = match (values[case], s.mean, s.std_dev) {
                (Some(x), Some(mean), Some(sd)) if sd > 0.0 => Some((x - mean) / sd),
                _ => None,
            };
            row = row.opt(&format!("Z{}", variable.name), z);
        }
        table.push(row);
    }
    table
}
