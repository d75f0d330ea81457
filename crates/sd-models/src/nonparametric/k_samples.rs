//! Tests for several independent samples: Kruskal–Wallis, median test and
//! Jonckheere–Terpstra

use serde::{Deserialize, Serialize};
use tracing::instrument;

use sd_core::stats::distribution::{chi_square_sf, normal_two_tailed};
use sd_core::stats::{PercentileMethod, SortedWeightedTable, mid_ranks, percentile, tie_counts};
use sd_core::{ColumnHeader, ErrorAccumulator, ResultTable, TableRow};

use super::{GroupedSample, PreparedSamples, descriptives_table, load_samples, statistics_table};
use crate::base::{Analysis, AnalysisInput, Result, RunContext};

/// Inclusive range of grouping values taken into the test
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupRange {
    pub min: f64,
    pub max: f64,
}

impl Default for GroupRange {
    fn default() -> Self {
        Self { min: 1.0, max: 2.0 }
    }
}

/// Configuration of a k-independent-samples run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct KSamplesConfig {
    pub test_variables: Vec<String>,
    pub grouping_variable: Option<String>,
    pub range: GroupRange,
    pub kruskal_wallis: bool,
    pub median: bool,
    pub jonckheere_terpstra: bool,
    pub descriptives: bool,
    pub quartiles: bool,
}

impl Default for KSamplesConfig {
    fn default() -> Self {
        Self {
            test_variables: Vec::new(),
            grouping_variable: None,
            range: GroupRange::default(),
            kruskal_wallis: true,
            median: false,
            jonckheere_terpstra: false,
            descriptives: false,
            quartiles: false,
        }
    }
}

/// Kruskal–Wallis `H` with its tie correction
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KruskalWallis {
    pub h: f64,
    pub df: f64,
    pub sig: Option<f64>,
}

/// Tie-corrected Kruskal–Wallis over the groups of `sample`; `None` when
/// every observation is tied.
pub fn kruskal_wallis(sample: &GroupedSample) -> Option<KruskalWallis> {
    let pooled = sample.pooled();
    let n = pooled.len() as f64;
    let ranks = mid_ranks(&pooled);
    let mut offset = 0;
    let mut sum = 0.0;
    for group in &sample.groups {
        let r: f64 = ranks[offset..offset + group.len()].iter().sum();
        offset += group.len();
        if !group.is_empty() {
            sum += r * r / group.len() as f64;
        }
    }
    let h = 12.0 / (n * (n + 1.0)) * sum - 3.0 * (n + 1.0);
    let ties: f64 = tie_counts(&pooled).iter().map(|t| t * t * t - t).sum();
    let correction = 1.0 - ties / (n * n * n - n);
    if correction <= 0.0 {
        return None;
    }
    let h = h / correction;
    let df = (sample.groups.iter().filter(|g| !g.is_empty()).count() as f64) - 1.0;
    Some(KruskalWallis {
        h,
        df,
        sig: chi_square_sf(h, df),
    })
}

/// Median test: counts above and at-or-below the pooled median
#[derive(Debug, Clone, PartialEq)]
pub struct MedianTest {
    pub median: f64,
    /// `(above, at or below)` per group
    pub counts: Vec<(f64, f64)>,
    pub chi_square: Option<f64>,
    pub df: f64,
    pub sig: Option<f64>,
}

pub fn median_test(sample: &GroupedSample) -> Option<MedianTest> {
    let pooled = sample.pooled();
    let median = percentile(&SortedWeightedTable::unweighted(&pooled), 0.5, PercentileMethod::HAverage)?;
    let counts: Vec<(f64, f64)> = sample
        .groups
        .iter()
        .map(|g| {
            let above = g.values.iter().filter(|v| **v > median).count() as f64;
            (above, g.len() as f64 - above)
        })
        .collect();

    let n = pooled.len() as f64;
    let above: f64 = counts.iter().map(|c| c.0).sum();
    let below = n - above;
    let mut chi = 0.0;
    let mut defined = above > 0.0 && below > 0.0;
    for (a, b) in &counts {
        let total = a + b;
        if total <= 0.0 {
            defined = false;
            continue;
        }
        let ea = total * above / n;
        let eb = total * below / n;
        chi += (a - ea).powi(2) / ea + (b - eb).powi(2) / eb;
    }
    let df = counts.len() as f64 - 1.0;
    let chi_square = defined.then_some(chi);
    Some(MedianTest {
        median,
        counts,
        chi_square,
        df,
        sig: chi_square.and_then(|c| chi_square_sf(c, df)),
    })
}

/// Jonckheere–Terpstra statistic and its normal approximation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JonckheereTerpstra {
    pub levels: usize,
    pub n: f64,
    pub observed: f64,
    pub mean: f64,
    pub std_dev: f64,
    pub z: Option<f64>,
    pub sig: Option<f64>,
}

/// Groups are taken in ascending order of the grouping value
pub fn jonckheere_terpstra(sample: &GroupedSample) -> JonckheereTerpstra {
    let groups: Vec<&Vec<f64>> = sample
        .groups
        .iter()
        .filter(|g| !g.is_empty())
        .map(|g| &g.values)
        .collect();
    let mut observed = 0.0;
    for (i, lower) in groups.iter().enumerate() {
        for upper in &groups[i + 1..] {
            for x in lower.iter() {
                for y in upper.iter() {
                    if x < y {
                        observed += 1.0;
                    } else if x == y {
                        observed += 0.5;
                    }
                }
            }
        }
    }

    let pooled = sample.pooled();
    let n = pooled.len() as f64;
    let sizes: Vec<f64> = groups.iter().map(|g| g.len() as f64).collect();
    let ties = tie_counts(&pooled);
    let mean = (n * n - sizes.iter().map(|s| s * s).sum::<f64>()) / 4.0;

    let a = |v: f64| v * (v - 1.0) * (2.0 * v + 5.0);
    let b = |v: f64| v * (v - 1.0) * (v - 2.0);
    let c = |v: f64| v * (v - 1.0);
    let sum = |xs: &[f64], f: &dyn Fn(f64) -> f64| xs.iter().map(|v| f(*v)).sum::<f64>();
    let mut variance = (a(n) - sum(&sizes, &a) - sum(&ties, &a)) / 72.0;
    if n > 2.0 {
        variance += sum(&sizes, &b) * sum(&ties, &b) / (36.0 * n * (n - 1.0) * (n - 2.0));
    }
    if n > 1.0 {
        variance += sum(&sizes, &c) * sum(&ties, &c) / (8.0 * n * (n - 1.0));
    }
    let std_dev = variance.max(0.0).sqrt();
    let z = (std_dev > 0.0).then(|| (observed - mean) / std_dev);

    JonckheereTerpstra {
        levels: groups.len(),
        n,
        observed,
        mean,
        std_dev,
        z,
        sig: z.and_then(normal_two_tailed),
    }
}

/// Tests for several independent samples
pub struct KIndependentSamples;

impl Analysis for KIndependentSamples {
    const NAME: &'static str = "kIndependentSamples";
    type Config = KSamplesConfig;
    type Prepared = PreparedSamples;

    fn validate(config: &KSamplesConfig, errors: &mut ErrorAccumulator) {
        errors.check(
            !config.test_variables.is_empty(),
            "At least one test variable must be selected.",
        );
        errors.check(
            config.grouping_variable.is_some(),
            "A grouping variable must be selected.",
        );
        errors.check(
            config.range.min < config.range.max,
            "The minimum of the grouping range must be less than the maximum.",
        );
        errors.check(
            config.kruskal_wallis || config.median || config.jonckheere_terpstra,
            "At least one test must be selected.",
        );
    }

    fn prepare(
        input: &AnalysisInput,
        config: &KSamplesConfig,
        errors: &mut ErrorAccumulator,
    ) -> Option<PreparedSamples> {
        let grouping = config.grouping_variable.as_deref()?;
        let GroupRange { min, max } = config.range;
        let prepared = load_samples(
            input,
            &config.test_variables,
            grouping,
            |g| (min..=max).contains(&g),
            None,
            errors,
        )?;
        for sample in &prepared.samples {
            if sample.groups.iter().filter(|g| !g.is_empty()).count() < 2 {
                errors.coercion(format!(
                    "At least two groups with valid cases are required ('{}')",
                    sample.name
                ));
            }
        }
        Some(prepared)
    }

    #[instrument(name = "k_independent_samples", skip_all, fields(variables = prepared.samples.len()))]
    fn compute(
        prepared: PreparedSamples,
        config: &KSamplesConfig,
        ctx: &RunContext,
    ) -> Result<Vec<ResultTable>> {
        let mut tables = Vec::new();
        if config.descriptives || config.quartiles {
            tables.push(descriptives_table(&prepared, config.descriptives, config.quartiles));
        }
        let grouping_note = format!("b. Grouping Variable: {}", prepared.grouping.display_name());

        if config.kruskal_wallis {
            ctx.check()?;
            tables.push(ranks_table(&prepared));
            let mut table = statistics_table("Test Statistics: Kruskal-Wallis", &prepared.samples);
            let results: Vec<Option<KruskalWallis>> =
                prepared.samples.iter().map(kruskal_wallis).collect();
            let mut h_row = TableRow::new(["Kruskal-Wallis H"]);
            let mut df_row = TableRow::new(["df"]);
            let mut sig_row = TableRow::new(["Asymp. Sig."]);
            for (sample, kw) in prepared.samples.iter().zip(&results) {
                h_row = h_row.opt(&sample.name, kw.map(|k| k.h));
                df_row = df_row.opt(&sample.name, kw.map(|k| k.df));
                sig_row = sig_row.opt(&sample.name, kw.and_then(|k| k.sig));
            }
            table.push(h_row);
            table.push(df_row);
            table.push(sig_row);
            table.footnote("a. Kruskal Wallis Test");
            table.footnote(grouping_note.clone());
            tables.push(table);
        }

        if config.median {
            ctx.check()?;
            let results: Vec<Option<MedianTest>> = prepared.samples.iter().map(median_test).collect();
            tables.push(median_frequencies_table(&prepared, &results));
            let mut table = statistics_table("Test Statistics: Median Test", &prepared.samples);
            let rows: [(&str, fn(&GroupedSample, &MedianTest) -> Option<f64>); 5] = [
                ("N", |s, _| Some(s.total() as f64)),
                ("Median", |_, m| Some(m.median)),
                ("Chi-Square", |_, m| m.chi_square),
                ("df", |_, m| Some(m.df)),
                ("Asymp. Sig.", |_, m| m.sig),
            ];
            for (label, get) in rows {
                let mut row = TableRow::new([label]);
                for (sample, result) in prepared.samples.iter().zip(&results) {
                    row = row.opt(&sample.name, result.as_ref().and_then(|m| get(sample, m)));
                }
                table.push(row);
            }
            table.footnote("a. Median Test");
            table.footnote(grouping_note.clone());
            tables.push(table);
        }

        if config.jonckheere_terpstra {
            ctx.check()?;
            let results: Vec<JonckheereTerpstra> =
                prepared.samples.iter().map(jonckheere_terpstra).collect();
            let mut table =
                statistics_table("Test Statistics: Jonckheere-Terpstra", &prepared.samples);
            let mut levels = TableRow::new([format!(
                "Number of Levels in {}",
                prepared.grouping.display_name()
            )]);
            for (sample, jt) in prepared.samples.iter().zip(&results) {
                levels = levels.int(&sample.name, jt.levels);
            }
            table.push(levels);

            let rows: [(&str, fn(&JonckheereTerpstra) -> Option<f64>); 6] = [
                ("N", |j| Some(j.n)),
                ("Observed J-T Statistic", |j| Some(j.observed)),
                ("Mean J-T Statistic", |j| Some(j.mean)),
                ("Std. Deviation of J-T Statistic", |j| Some(j.std_dev)),
                ("Std. J-T Statistic", |j| j.z),
                ("Asymp. Sig. (2-tailed)", |j| j.sig),
            ];
            for (label, get) in rows {
                let mut row = TableRow::new([label]);
                for (sample, jt) in prepared.samples.iter().zip(&results) {
                    row = row.opt(&sample.name, get(jt));
                }
                table.push(row);
            }
            table.footnote(format!(
                "a. Grouping Variable: {}",
                prepared.grouping.display_name()
            ));
            tables.push(table);
        }
        Ok(tables)
    }
}

fn ranks_table(prepared: &PreparedSamples) -> ResultTable {
    let mut table = ResultTable::new(
        "Ranks",
        vec![
            ColumnHeader::row_label(""),
            ColumnHeader::row_label(prepared.grouping.display_name()),
            ColumnHeader::leaf("N", "n"),
            ColumnHeader::leaf("Mean Rank", "meanRank"),
        ],
    );
    for sample in &prepared.samples {
        let ranks = mid_ranks(&sample.pooled());
        let mut offset = 0;
        for group in &sample.groups {
            let r: f64 = ranks[offset..offset + group.len()].iter().sum();
            offset += group.len();
            table.push(
                TableRow::new([sample.label.clone(), group.label.clone()])
                    .int("n", group.len())
                    .opt("meanRank", (!group.is_empty()).then(|| r / group.len() as f64)),
            );
        }
        table.push(TableRow::new([sample.label.clone(), "Total".to_string()]).int("n", sample.total()));
    }
    table
}

/// Column key of a group; labels may repeat across values, keys do not
fn group_key(value: f64) -> String {
    format!("group{}", value)
}

fn median_frequencies_table(prepared: &PreparedSamples, results: &[Option<MedianTest>]) -> ResultTable {
    // union of group values across variables, ascending
    let mut values: Vec<(f64, String)> = Vec::new();
    for sample in &prepared.samples {
        for group in &sample.groups {
            if !values.iter().any(|(v, _)| *v == group.value) {
                values.push((group.value, group.label.clone()));
            }
        }
    }
    values.sort_by(|a, b| a.0.total_cmp(&b.0));

    let mut headers = vec![ColumnHeader::row_label(""), ColumnHeader::row_label("")];
    headers.push(ColumnHeader::group(
        prepared.grouping.display_name(),
        values
            .iter()
            .map(|(value, label)| ColumnHeader::leaf(label.clone(), group_key(*value)))
            .collect(),
    ));
    let mut table = ResultTable::new("Frequencies", headers);

    for (sample, result) in prepared.samples.iter().zip(results) {
        let Some(result) = result else {
            continue;
        };
        let mut above = TableRow::new([sample.label.clone(), "> Median".to_string()]);
        let mut below = TableRow::new([sample.label.clone(), "<= Median".to_string()]);
        for (group, (a, b)) in sample.groups.iter().zip(&result.counts) {
            let key = group_key(group.value);
            above = above.num(&key, *a);
            below = below.num(&key, *b);
        }
        table.push(above);
        table.push(below);
    }
    table
}
