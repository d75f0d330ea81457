//! Tests for two independent samples: Mann–Whitney, Kolmogorov–Smirnov,
//! Moses extreme reactions and Wald–Wolfowitz runs

use serde::{Deserialize, Serialize};
use statrs::function::factorial::{binomial, ln_binomial};
use tracing::instrument;

use sd_core::stats::distribution::kolmogorov_sf;
use sd_core::stats::{mid_ranks, tie_correction_sum};
use sd_core::{ColumnHeader, ErrorAccumulator, ResultTable, TableRow};

use super::{GroupedSample, PreparedSamples, load_samples, statistics_table, two_tailed};
use crate::base::{Analysis, AnalysisInput, Result, RunContext};

/// Largest `n1·n2` for which the exact Mann–Whitney distribution is used
pub const EXACT_LIMIT: usize = 400;

/// Configuration of a two-independent-samples run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TwoSamplesConfig {
    pub test_variables: Vec<String>,
    pub grouping_variable: Option<String>,
    /// Group value of the first (control) group
    pub group1: f64,
    pub group2: f64,
    pub mann_whitney: bool,
    pub kolmogorov_smirnov: bool,
    pub moses_extreme_reactions: bool,
    pub wald_wolfowitz: bool,
    /// Outliers trimmed from each end of the control group; 5% of the
    /// control group (at least one case) when unset
    pub moses_trim: Option<u32>,
}

impl Default for TwoSamplesConfig {
    fn default() -> Self {
        Self {
            test_variables: Vec::new(),
            grouping_variable: None,
            group1: 1.0,
            group2: 2.0,
            mann_whitney: true,
            kolmogorov_smirnov: false,
            moses_extreme_reactions: false,
            wald_wolfowitz: false,
            moses_trim: None,
        }
    }
}

fn split(sample: &GroupedSample) -> (&[f64], &[f64]) {
    (&sample.groups[0].values, &sample.groups[1].values)
}

// ==================== Mann–Whitney ====================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MannWhitney {
    pub u: f64,
    pub w: f64,
    pub z: Option<f64>,
    pub asymp_sig: Option<f64>,
    /// `2 × P(U ≤ u)`, only without ties and for small samples
    pub exact_sig: Option<f64>,
    /// Rank sums of the two groups
    pub rank_sums: (f64, f64),
}

/// Frequencies of `U = 0..=m·n` under the null for sizes `m` and `n`
pub fn mann_whitney_counts(m: usize, n: usize) -> Vec<f64> {
    // table[i][j] holds the distribution for sizes (i, j)
    let mut table: Vec<Vec<Vec<f64>>> = vec![vec![Vec::new(); n + 1]; m + 1];
    for i in 0..=m {
        for j in 0..=n {
            if i == 0 || j == 0 {
                table[i][j] = vec![1.0];
                continue;
            }
            let mut counts = vec![0.0; i * j + 1];
            for (u, c) in table[i][j - 1].iter().enumerate() {
                counts[u] += c;
            }
            for (u, c) in table[i - 1][j].iter().enumerate() {
                counts[u + j] += c;
            }
            table[i][j] = counts;
        }
    }
    std::mem::take(&mut table[m][n])
}

pub fn mann_whitney(sample: &GroupedSample) -> MannWhitney {
    let (a, b) = split(sample);
    let (n1, n2) = (a.len() as f64, b.len() as f64);
    let pooled = sample.pooled();
    let n = pooled.len() as f64;
    let ranks = mid_ranks(&pooled);
    let r1: f64 = ranks[..a.len()].iter().sum();
    let r2: f64 = ranks[a.len()..].iter().sum();

    let u1 = r1 - n1 * (n1 + 1.0) / 2.0;
    let u2 = r2 - n2 * (n2 + 1.0) / 2.0;
    let (u, w) = if u1 <= u2 { (u1, r1) } else { (u2, r2) };

    let ties = tie_correction_sum(&pooled);
    let variance = n1 * n2 / (n * (n - 1.0)) * ((n * n * n - n) / 12.0 - ties / 12.0);
    let z = (variance > 0.0).then(|| (u - n1 * n2 / 2.0) / variance.sqrt());

    let exact_sig = (ties == 0.0 && a.len() * b.len() <= EXACT_LIMIT).then(|| {
        let counts = mann_whitney_counts(a.len(), b.len());
        let total = binomial(pooled.len() as u64, a.len() as u64);
        let below: f64 = counts.iter().take(u.round() as usize + 1).sum();
        (2.0 * below / total).min(1.0)
    });

    MannWhitney {
        u,
        w,
        z,
        asymp_sig: two_tailed(z),
        exact_sig,
        rank_sums: (r1, r2),
    }
}

// ==================== Kolmogorov–Smirnov ====================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KolmogorovSmirnov {
    pub absolute: f64,
    pub positive: f64,
    pub negative: f64,
    pub z: f64,
    pub sig: f64,
}

/// Differences are `F₁(x) − F₂(x)` over the pooled values
pub fn kolmogorov_smirnov(sample: &GroupedSample) -> KolmogorovSmirnov {
    let (a, b) = split(sample);
    let mut points = sample.pooled();
    points.sort_by(|x, y| x.total_cmp(y));
    points.dedup();

    let ecdf = |values: &[f64], x: f64| {
        values.iter().filter(|v| **v <= x).count() as f64 / values.len() as f64
    };
    let mut positive: f64 = 0.0;
    let mut negative: f64 = 0.0;
    for x in points {
        let d = ecdf(a, x) - ecdf(b, x);
        positive = positive.max(d);
        negative = negative.min(d);
    }
    let absolute = positive.max(-negative);
    let (n1, n2) = (a.len() as f64, b.len() as f64);
    let z = absolute * (n1 * n2 / (n1 + n2)).sqrt();
    KolmogorovSmirnov {
        absolute,
        positive,
        negative,
        z,
        sig: kolmogorov_sf(z),
    }
}

// ==================== Moses extreme reactions ====================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Moses {
    pub span: f64,
    pub sig: f64,
    pub trimmed_span: f64,
    pub trimmed_sig: f64,
    pub trimmed: usize,
}

/// `P(S_h ≤ s)` for a control group of `m` cases, `n` experimental cases
/// and `h` cases trimmed from each end
pub fn moses_probability(s: f64, m: usize, n: usize, h: usize) -> f64 {
    if m < 2 * h + 2 {
        return 1.0;
    }
    let upper = s - m as f64 + 2.0 * h as f64;
    if upper < 0.0 {
        return 0.0;
    }
    let core = m - 2 * h;
    let total = binomial((m + n) as u64, m as u64);
    let sum: f64 = (0..=(upper as usize).min(n))
        .map(|i| {
            binomial((i + core - 2) as u64, i as u64)
                * binomial((n + 2 * h + 1 - i) as u64, (n - i) as u64)
        })
        .sum();
    (sum / total).clamp(0.0, 1.0)
}

/// `max − min + 1` over sorted ranks
fn span(sorted: &[f64]) -> f64 {
    match (sorted.first(), sorted.last()) {
        (Some(lo), Some(hi)) => (hi - lo + 1.0).round(),
        _ => 0.0,
    }
}

/// The first group is the control group
pub fn moses(sample: &GroupedSample, trim: Option<u32>) -> Moses {
    let (a, b) = split(sample);
    let (m, n) = (a.len(), b.len());
    let ranks = mid_ranks(&sample.pooled());
    let mut control: Vec<f64> = ranks[..m].to_vec();
    control.sort_by(|x, y| x.total_cmp(y));

    let default_trim = ((0.05 * m as f64).round() as usize).max(1);
    let h = trim
        .map_or(default_trim, |t| t as usize)
        .min(m.saturating_sub(2) / 2);
    let observed = span(&control);
    let trimmed_span = span(&control[h..m - h]);

    Moses {
        span: observed,
        sig: moses_probability(observed, m, n, 0),
        trimmed_span,
        trimmed_sig: moses_probability(trimmed_span, m, n, h),
        trimmed: h,
    }
}

// ==================== Wald–Wolfowitz ====================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Runs {
    pub runs: usize,
    pub z: Option<f64>,
    pub sig: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WaldWolfowitz {
    pub minimum: Runs,
    pub maximum: Runs,
    /// Ties between the groups make the run count ambiguous
    pub inter_group_ties: bool,
}

/// Exact `P(R ≤ r)` for groups of `n1` and `n2`
pub fn runs_probability(r: usize, n1: usize, n2: usize) -> f64 {
    if n1 == 0 || n2 == 0 {
        return 1.0;
    }
    let total = ln_binomial((n1 + n2) as u64, n1 as u64);
    // C(n, k) / C(n1 + n2, n1) pieces multiply, so work in logs
    let ln_choose = |n: usize, k: usize| -> Option<f64> {
        (k <= n).then(|| ln_binomial(n as u64, k as u64))
    };
    let term = |a: (usize, usize), b: (usize, usize)| -> f64 {
        match (ln_choose(a.0, a.1), ln_choose(b.0, b.1)) {
            (Some(x), Some(y)) => (x + y - total).exp(),
            _ => 0.0,
        }
    };

    let mut p = 0.0;
    for runs in 2..=r {
        let k = runs / 2;
        p += if runs % 2 == 0 {
            2.0 * term((n1 - 1, k - 1), (n2 - 1, k - 1))
        } else {
            term((n1 - 1, k), (n2 - 1, k - 1)) + term((n1 - 1, k - 1), (n2 - 1, k))
        };
    }
    p.clamp(0.0, 1.0)
}

fn runs_z(r: usize, n1: f64, n2: f64) -> Option<f64> {
    let n = n1 + n2;
    let mean = 2.0 * n1 * n2 / n + 1.0;
    let variance = 2.0 * n1 * n2 * (2.0 * n1 * n2 - n) / (n * n * (n - 1.0));
    if variance <= 0.0 {
        return None;
    }
    let d = r as f64 - mean;
    let corrected = if d.abs() <= 0.5 { 0.0 } else { d - 0.5 * d.signum() };
    Some(corrected / variance.sqrt())
}

/// Fewest and most runs over the orderings of tied values. `(a, b)` are the
/// group counts of one tie block, in ascending value order.
fn run_bounds(blocks: &[(usize, usize)]) -> (usize, usize) {
    // state: runs so far when the sequence currently ends in group 0 / 1
    let mut min_runs = [Some(0usize), Some(0)];
    let mut max_runs = [Some(0usize), Some(0)];
    let mut first = true;

    for &(a, b) in blocks {
        // (start label, end label, runs inside the block)
        let mut shortest: Vec<(usize, usize, usize)> = Vec::new();
        let mut longest: Vec<(usize, usize, usize)> = Vec::new();
        match (a > 0, b > 0) {
            (true, false) => {
                shortest.push((0, 0, 1));
                longest.push((0, 0, 1));
            }
            (false, true) => {
                shortest.push((1, 1, 1));
                longest.push((1, 1, 1));
            }
            _ => {
                shortest.extend([(0, 1, 2), (1, 0, 2)]);
                let alternating = 2 * a.min(b);
                match a.cmp(&b) {
                    std::cmp::Ordering::Greater => longest.push((0, 0, alternating + 1)),
                    std::cmp::Ordering::Less => longest.push((1, 1, alternating + 1)),
                    std::cmp::Ordering::Equal => longest.extend([(0, 1, alternating), (1, 0, alternating)]),
                }
            }
        }

        let step = |state: [Option<usize>; 2], options: &[(usize, usize, usize)], better: fn(usize, usize) -> bool| {
            let mut next: [Option<usize>; 2] = [None, None];
            for last in 0..2 {
                let Some(so_far) = state[last] else { continue };
                for &(start, end, inside) in options {
                    let runs = if first {
                        inside
                    } else if start == last {
                        so_far + inside - 1
                    } else {
                        so_far + inside
                    };
                    if next[end].is_none_or(|r| better(runs, r)) {
                        next[end] = Some(runs);
                    }
                }
            }
            next
        };
        min_runs = step(min_runs, &shortest, |x, y| x < y);
        max_runs = step(max_runs, &longest, |x, y| x > y);
        first = false;
    }

    let pick = |state: [Option<usize>; 2], better: fn(usize, usize) -> bool| {
        state.iter().flatten().copied().reduce(|x, y| if better(x, y) { x } else { y }).unwrap_or(0)
    };
    (pick(min_runs, |x, y| x < y), pick(max_runs, |x, y| x > y))
}

pub fn wald_wolfowitz(sample: &GroupedSample) -> WaldWolfowitz {
    let (a, b) = split(sample);
    let mut tagged: Vec<(f64, usize)> = a
        .iter()
        .map(|v| (*v, 0))
        .chain(b.iter().map(|v| (*v, 1)))
        .collect();
    tagged.sort_by(|x, y| x.0.total_cmp(&y.0));

    let mut blocks: Vec<(usize, usize)> = Vec::new();
    let mut i = 0;
    while i < tagged.len() {
        let mut j = i;
        let mut counts = (0, 0);
        while j < tagged.len() && tagged[j].0 == tagged[i].0 {
            if tagged[j].1 == 0 {
                counts.0 += 1;
            } else {
                counts.1 += 1;
            }
            j += 1;
        }
        blocks.push(counts);
        i = j;
    }
    let inter_group_ties = blocks.iter().any(|(x, y)| *x > 0 && *y > 0);
    let (low, high) = run_bounds(&blocks);

    let (n1, n2) = (a.len(), b.len());
    let runs = |r: usize| Runs {
        runs: r,
        z: runs_z(r, n1 as f64, n2 as f64),
        sig: runs_probability(r, n1, n2),
    };
    WaldWolfowitz {
        minimum: runs(low),
        maximum: runs(high),
        inter_group_ties,
    }
}

// ==================== Analysis ====================

/// Tests for two independent samples
pub struct TwoIndependentSamples;

impl Analysis for TwoIndependentSamples {
    const NAME: &'static str = "twoIndependentSamples";
    type Config = TwoSamplesConfig;
    type Prepared = PreparedSamples;

    fn validate(config: &TwoSamplesConfig, errors: &mut ErrorAccumulator) {
        errors.check(
            !config.test_variables.is_empty(),
            "At least one test variable must be selected.",
        );
        errors.check(
            config.grouping_variable.is_some(),
            "A grouping variable must be selected.",
        );
        errors.check(
            config.group1 != config.group2,
            "The two groups must have different values.",
        );
        errors.check(
            config.mann_whitney
                || config.kolmogorov_smirnov
                || config.moses_extreme_reactions
                || config.wald_wolfowitz,
            "At least one test must be selected.",
        );
    }

    fn prepare(
        input: &AnalysisInput,
        config: &TwoSamplesConfig,
        errors: &mut ErrorAccumulator,
    ) -> Option<PreparedSamples> {
        let grouping = config.grouping_variable.as_deref()?;
        let order = [config.group1, config.group2];
        let prepared = load_samples(input, &config.test_variables, grouping, |_| true, Some(&order), errors)?;
        for sample in &prepared.samples {
            for group in sample.groups.iter().filter(|g| g.is_empty()) {
                errors.coercion(format!(
                    "Group {} has no valid cases for variable '{}'",
                    group.label, sample.name
                ));
            }
        }
        Some(prepared)
    }

    #[instrument(name = "two_independent_samples", skip_all, fields(variables = prepared.samples.len()))]
    fn compute(
        prepared: PreparedSamples,
        config: &TwoSamplesConfig,
        ctx: &RunContext,
    ) -> Result<Vec<ResultTable>> {
        let grouping_note = format!("b. Grouping Variable: {}", prepared.grouping.display_name());
        let samples = &prepared.samples;
        let mut tables = Vec::new();

        if config.mann_whitney {
            ctx.check()?;
            let results: Vec<MannWhitney> = samples.iter().map(mann_whitney).collect();
            tables.push(ranks_table(&prepared, &results));

            let mut table = statistics_table("Test Statistics: Mann-Whitney", samples);
            let rows: [(&str, fn(&MannWhitney) -> Option<f64>); 5] = [
                ("Mann-Whitney U", |r| Some(r.u)),
                ("Wilcoxon W", |r| Some(r.w)),
                ("Z", |r| r.z),
                ("Asymp. Sig. (2-tailed)", |r| r.asymp_sig),
                ("Exact Sig. [2*(1-tailed Sig.)]", |r| r.exact_sig),
            ];
            for (label, get) in rows {
                let mut row = TableRow::new([label]);
                for (sample, r) in samples.iter().zip(&results) {
                    row = row.opt(&sample.name, get(r));
                }
                table.push(row);
            }
            if results.iter().any(|r| r.exact_sig.is_some()) {
                table.footnote("a. Not corrected for ties.");
            }
            table.footnote(grouping_note.clone());
            tables.push(table);
        }

        if config.kolmogorov_smirnov {
            ctx.check()?;
            let results: Vec<KolmogorovSmirnov> = samples.iter().map(kolmogorov_smirnov).collect();
            let mut table = statistics_table("Test Statistics: Kolmogorov-Smirnov", samples);
            let rows: [(&str, &str, fn(&KolmogorovSmirnov) -> f64); 5] = [
                ("Most Extreme Differences", "Absolute", |r| r.absolute),
                ("Most Extreme Differences", "Positive", |r| r.positive),
                ("Most Extreme Differences", "Negative", |r| r.negative),
                ("Kolmogorov-Smirnov Z", "", |r| r.z),
                ("Asymp. Sig. (2-tailed)", "", |r| r.sig),
            ];
            for (first, second, get) in rows {
                let header: Vec<&str> = if second.is_empty() { vec![first] } else { vec![first, second] };
                let mut row = TableRow::new(header);
                for (sample, r) in samples.iter().zip(&results) {
                    row = row.num(&sample.name, get(r));
                }
                table.push(row);
            }
            table.footnote("a. Two-Sample Kolmogorov-Smirnov Test");
            table.footnote(grouping_note.clone());
            tables.push(table);
        }

        if config.moses_extreme_reactions {
            ctx.check()?;
            let results: Vec<Moses> = samples.iter().map(|s| moses(s, config.moses_trim)).collect();
            let mut table = statistics_table("Test Statistics: Moses", samples);
            let rows: [(&str, &str, fn(&Moses) -> f64); 5] = [
                ("Observed Control Group Span", "", |r| r.span),
                ("Observed Control Group Span", "Sig. (1-tailed)", |r| r.sig),
                ("Trimmed Control Group Span", "", |r| r.trimmed_span),
                ("Trimmed Control Group Span", "Sig. (1-tailed)", |r| r.trimmed_sig),
                ("Outliers Trimmed from each End", "", |r| r.trimmed as f64),
            ];
            for (first, second, get) in rows {
                let mut row = TableRow::new([first, second]);
                for (sample, r) in samples.iter().zip(&results) {
                    row = row.num(&sample.name, get(r));
                }
                table.push(row);
            }
            table.footnote("a. Moses Test");
            table.footnote(grouping_note.clone());
            tables.push(table);
        }

        if config.wald_wolfowitz {
            ctx.check()?;
            tables.push(runs_table(&prepared, &grouping_note));
        }
        Ok(tables)
    }
}

fn ranks_table(prepared: &PreparedSamples, results: &[MannWhitney]) -> ResultTable {
    let mut table = ResultTable::new(
        "Ranks",
        vec![
            ColumnHeader::row_label(""),
            ColumnHeader::row_label(prepared.grouping.display_name()),
            ColumnHeader::leaf("N", "n"),
            ColumnHeader::leaf("Mean Rank", "meanRank"),
            ColumnHeader::leaf("Sum of Ranks", "sumOfRanks"),
        ],
    );
    for (sample, result) in prepared.samples.iter().zip(results) {
        let sums = [result.rank_sums.0, result.rank_sums.1];
        for (group, sum) in sample.groups.iter().zip(sums) {
            table.push(
                TableRow::new([sample.label.clone(), group.label.clone()])
                    .int("n", group.len())
                    .num("meanRank", sum / group.len() as f64)
                    .num("sumOfRanks", sum),
            );
        }
        table.push(TableRow::new([sample.label.clone(), "Total".to_string()]).int("n", sample.total()));
    }
    table
}

fn runs_table(prepared: &PreparedSamples, grouping_note: &str) -> ResultTable {
    let mut table = ResultTable::new(
        "Test Statistics: Wald-Wolfowitz",
        vec![
            ColumnHeader::row_label(""),
            ColumnHeader::row_label(""),
            ColumnHeader::leaf("Number of Runs", "runs"),
            ColumnHeader::leaf("Z", "z"),
            ColumnHeader::leaf("Exact Sig. (1-tailed)", "sig"),
        ],
    );
    let mut tied = false;
    for sample in &prepared.samples {
        let result = wald_wolfowitz(sample);
        let row = |label: &str, runs: &Runs| {
            TableRow::new([sample.label.clone(), label.to_string()])
                .int("runs", runs.runs)
                .opt("z", runs.z)
                .num("sig", runs.sig)
        };
        if result.inter_group_ties {
            tied = true;
            table.push(row("Minimum Possible", &result.minimum));
            table.push(row("Maximum Possible", &result.maximum));
        } else {
            table.push(row("Exact Number of Runs", &result.minimum));
        }
    }
    table.footnote("a. Wald-Wolfowitz Test");
    table.footnote(grouping_note);
    if tied {
        table.footnote("c. There are inter-group ties involving cases.");
    }
    table
}
