//! Nonparametric tests for independent samples
//!
//! Frequency weights are honoured by replicating each case
//! `round(weight)` times, so rank statistics see whole cases. The
//! replicated sample of one test variable is capped at
//! [`MAX_WEIGHTED_CASES`].

use tracing::debug;

use sd_core::data::Variable;
use sd_core::stats::{DescriptiveStats, PercentileMethod, SortedWeightedTable, percentile};
use sd_core::{ColumnHeader, ErrorAccumulator, ResultTable, TableRow};

use crate::base::AnalysisInput;

pub mod k_samples;
pub mod two_samples;

#[cfg(test)]
mod tests;

pub use k_samples::{GroupRange, KIndependentSamples, KSamplesConfig};
pub use two_samples::{TwoIndependentSamples, TwoSamplesConfig};

/// Observations of one test variable in one group
#[derive(Debug, Clone, PartialEq)]
pub struct Group {
    pub value: f64,
    pub label: String,
    pub values: Vec<f64>,
}

impl Group {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// One test variable split by the grouping variable
#[derive(Debug, Clone, PartialEq)]
pub struct GroupedSample {
    pub name: String,
    pub label: String,
    /// Ascending by group value
    pub groups: Vec<Group>,
}

impl GroupedSample {
    pub fn total(&self) -> usize {
        self.groups.iter().map(Group::len).sum()
    }

    /// Every observation, group by group
    pub fn pooled(&self) -> Vec<f64> {
        self.groups.iter().flat_map(|g| g.values.iter().copied()).collect()
    }
}

/// Largest replicated sample a single test variable may expand to
pub const MAX_WEIGHTED_CASES: usize = 1_000_000;

/// Prepared input shared by the independent-samples tests
#[derive(Debug, Clone)]
pub struct PreparedSamples {
    pub grouping: Variable,
    pub samples: Vec<GroupedSample>,
    /// Pooled test-variable values for the descriptives table
    pub descriptive_columns: Vec<(String, Vec<f64>)>,
    /// Valid cases with a positive weight that rounds to zero copies
    pub rounded_away: usize,
}

pub(crate) fn group_label(grouping: &Variable, value: f64) -> String {
    grouping
        .value_label(value)
        .map(str::to_string)
        .unwrap_or_else(|| grouping.format_value(value))
}

/// Load test variables split by the grouping variable, keeping the cases
/// whose group value passes `keep`. Group order follows `order` when given,
/// ascending group value otherwise.
pub(crate) fn load_samples(
    input: &AnalysisInput,
    test_variables: &[String],
    grouping_name: &str,
    keep: impl Fn(f64) -> bool,
    order: Option<&[f64]>,
    errors: &mut ErrorAccumulator,
) -> Option<PreparedSamples> {
    let weights = match input.case_weights() {
        Ok(w) => w,
        Err(err) => {
            errors.push(err.to_record());
            return None;
        }
    };
    let (grouping, group_cells) = match input.require(grouping_name) {
        Ok(found) => found,
        Err(err) => {
            errors.push(err.to_record());
            return None;
        }
    };
    if !grouping.is_numeric() {
        errors.coercion(format!("Grouping variable '{}' is not numeric", grouping.name));
        return None;
    }

    let mut samples = Vec::new();
    let mut descriptive_columns = Vec::new();
    let mut rounded_away = 0;
    for (variable, cells) in input.resolve(test_variables, errors) {
        if !variable.is_numeric() {
            errors.coercion(format!("Variable '{}' is not numeric", variable.name));
            continue;
        }

        let mut groups: Vec<Group> = order
            .map(|values| {
                values
                    .iter()
                    .map(|v| Group {
                        value: *v,
                        label: group_label(grouping, *v),
                        values: Vec::new(),
                    })
                    .collect()
            })
            .unwrap_or_default();
        let mut pooled = Vec::new();
        let mut dropped = 0;

        for (case, cell) in cells.iter().enumerate() {
            let Some(w) = weights.get(case) else {
                continue;
            };
            let Some(x) = variable.coerce_cell(cell) else {
                continue;
            };
            let Some(g) = group_cells.get(case).and_then(|c| grouping.coerce_cell(c)) else {
                continue;
            };
            if !keep(g) {
                continue;
            }
            let copies = w.round();
            if copies < 1.0 {
                dropped += 1;
                continue;
            }
            if pooled.len() as f64 + copies > MAX_WEIGHTED_CASES as f64 {
                errors.coercion(format!(
                    "The weighted number of cases for variable '{}' exceeds {}",
                    variable.name, MAX_WEIGHTED_CASES
                ));
                return None;
            }
            let index = match groups.iter().position(|group| group.value == g) {
                Some(i) => i,
                None if order.is_some() => continue,
                None => {
                    groups.push(Group {
                        value: g,
                        label: group_label(grouping, g),
                        values: Vec::new(),
                    });
                    groups.len() - 1
                }
            };
            for _ in 0..copies as usize {
                groups[index].values.push(x);
                pooled.push(x);
            }
        }

        if dropped > 0 {
            debug!(
                variable = %variable.name,
                cases = dropped,
                "cases with a weight below 0.5 dropped from rank tests"
            );
        }
        rounded_away += dropped;
        if order.is_none() {
            groups.sort_by(|a, b| a.value.total_cmp(&b.value));
        }
        samples.push(GroupedSample {
            name: variable.name.clone(),
            label: variable.display_name().to_string(),
            groups,
        });
        descriptive_columns.push((variable.display_name().to_string(), pooled));
    }

    Some(PreparedSamples {
        grouping: grouping.clone(),
        samples,
        descriptive_columns,
        rounded_away,
    })
}

/// "Descriptive Statistics" over the pooled test variables, with optional
/// quartiles
pub(crate) fn descriptives_table(
    prepared: &PreparedSamples,
    descriptives: bool,
    quartiles: bool,
) -> ResultTable {
    let mut headers = vec![ColumnHeader::row_label(""), ColumnHeader::leaf("N", "n")];
    if descriptives {
        headers.extend([
            ColumnHeader::leaf("Mean", "mean"),
            ColumnHeader::leaf("Std. Deviation", "stdDev"),
            ColumnHeader::leaf("Minimum", "minimum"),
            ColumnHeader::leaf("Maximum", "maximum"),
        ]);
    }
    if quartiles {
        headers.push(ColumnHeader::group(
            "Percentiles",
            vec![
                ColumnHeader::leaf("25th", "p25"),
                ColumnHeader::leaf("50th (Median)", "p50"),
                ColumnHeader::leaf("75th", "p75"),
            ],
        ));
    }
    let mut table = ResultTable::new("Descriptive Statistics", headers);

    for (label, values) in &prepared.descriptive_columns {
        let weights = vec![1.0; values.len()];
        let stats = DescriptiveStats::compute(values, &weights);
        let sorted = SortedWeightedTable::unweighted(values);
        let q = |p: f64| percentile(&sorted, p, PercentileMethod::HAverage);
        let mut row = TableRow::new([label.clone()]).num("n", stats.n);
        if descriptives {
            row = row
                .opt("mean", stats.mean)
                .opt("stdDev", stats.std_dev)
                .opt("minimum", stats.minimum)
                .opt("maximum", stats.maximum);
        }
        if quartiles {
            row = row.opt("p25", q(0.25)).opt("p50", q(0.5)).opt("p75", q(0.75));
        }
        table.push(row);
    }
    table
}

/// Statistic rows keyed by test variable
pub(crate) fn statistics_table(title: &str, samples: &[GroupedSample]) -> ResultTable {
    let mut headers = vec![ColumnHeader::row_label(""), ColumnHeader::row_label("")];
    headers.extend(
        samples
            .iter()
            .map(|s| ColumnHeader::leaf(s.label.clone(), s.name.clone())),
    );
    ResultTable::new(title, headers)
}

/// Two-tailed normal p-value of an optional `Z`
pub(crate) fn two_tailed(z: Option<f64>) -> Option<f64> {
    z.and_then(sd_core::stats::distribution::normal_two_tailed)
}
