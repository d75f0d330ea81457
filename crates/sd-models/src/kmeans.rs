//! K-Means cluster analysis (QUICK CLUSTER)
//!
//! Initial centers come from a single pass over the complete cases: the
//! first `k` distinct cases seed the centers and every later case may
//! replace one of them when it lies farther out than the current centers
//! lie from each other. Iteration then alternates assignment and update
//! until the largest center movement falls below
//! `convergence × (minimum distance between initial centers)`.

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use sd_core::data::CellValue;
use sd_core::stats::distribution::f_sf;
use sd_core::{ColumnHeader, ErrorAccumulator, ResultTable, TableRow};

use crate::base::{Analysis, AnalysisInput, ModelError, Result, RunContext};


// ==================== Configuration ====================

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct KMeansMain {
    /// Clustering variables
    pub target: Vec<String>,
    /// Variable labelling cases in the membership table
    pub case_target: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum KMeansMethod {
    #[default]
    IterateClassify,
    ClassifyOnly,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IterateConfig {
    pub max_iterations: i64,
    pub convergence: f64,
    /// Update a center as soon as a case joins its cluster
    pub use_running_means: bool,
}

impl Default for IterateConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            convergence: 0.0,
            use_running_means: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct KMeansOptions {
    pub initial_centers: bool,
    pub anova: bool,
    /// Emit the cluster membership table
    pub cluster_info: bool,
    /// Drop cases missing any clustering variable; otherwise distances use
    /// the variables present
    pub listwise: bool,
}

impl Default for KMeansOptions {
    fn default() -> Self {
        Self {
            initial_centers: true,
            anova: false,
            cluster_info: false,
            listwise: true,
        }
    }
}

/// Configuration of a K-Means run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct KMeansConfig {
    pub main: KMeansMain,
    /// Number of clusters
    pub cluster: i64,
    pub method: KMeansMethod,
    pub iterate: IterateConfig,
    pub options: KMeansOptions,
}

impl Default for KMeansConfig {
    fn default() -> Self {
        Self {
            main: KMeansMain::default(),
            cluster: 2,
            method: KMeansMethod::IterateClassify,
            iterate: IterateConfig::default(),
            options: KMeansOptions::default(),
        }
    }
}

// ==================== Prepared data ====================

#[derive(Debug, Clone, PartialEq)]
pub struct ClusterCase {
    /// Row in the input
    pub index: usize,
    pub values: Vec<Option<f64>>,
    pub weight: f64,
    pub label: Option<String>,
}

impl ClusterCase {
    fn complete(&self) -> Option<Vec<f64>> {
        self.values.iter().copied().collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PreparedKMeans {
    pub variables: Vec<String>,
    pub cases: Vec<ClusterCase>,
    /// Weight of cases left out
    pub missing: f64,
}

/// K-Means cluster analysis
pub struct KMeans;

impl Analysis for KMeans {
    const NAME: &'static str = "kmeans";
    type Config = KMeansConfig;
    type Prepared = PreparedKMeans;

    fn validate(config: &KMeansConfig, errors: &mut ErrorAccumulator) {
        errors.check(
            !config.main.target.is_empty(),
            "At least one target variable must be selected.",
        );
        errors.check(
            config.cluster > 0,
            "Number of clusters must be a positive integer.",
        );
        errors.check(
            config.iterate.max_iterations >= 1,
            "Maximum iterations must be at least 1.",
        );
        errors.check(
            (0.0..1.0).contains(&config.iterate.convergence),
            "Convergence criterion must be between 0 and 1.",
        );
    }

    fn prepare(
        input: &AnalysisInput,
        config: &KMeansConfig,
        errors: &mut ErrorAccumulator,
    ) -> Option<PreparedKMeans> {
        let weights = match input.case_weights() {
            Ok(w) => w,
            Err(err) => {
                errors.push(err.to_record());
                return None;
            }
        };
        let targets = input.resolve(&config.main.target, errors);
        for (variable, _) in &targets {
            if !variable.is_numeric() {
                errors.coercion(format!("Variable '{}' is not numeric", variable.name));
            }
        }
        let labels = config
            .main
            .case_target
            .as_deref()
            .and_then(|name| input.resolve(&[name.to_string()], errors).pop());
        if !errors.is_empty() {
            return None;
        }

        let mut cases = Vec::new();
        let mut missing = 0.0;
        for index in 0..input.ncases() {
            let Some(weight) = weights.get(index) else {
                continue;
            };
            let values: Vec<Option<f64>> = targets
                .iter()
                .map(|(var, cells)| cells.get(index).and_then(|c| var.coerce_cell(c)))
                .collect();
            let usable = if config.options.listwise {
                values.iter().all(Option::is_some)
            } else {
                values.iter().any(Option::is_some)
            };
            if !usable {
                missing += weight;
                continue;
            }
            let label = labels.and_then(|(var, cells)| {
                cells.get(index).and_then(|cell| match cell {
                    CellValue::Null => None,
                    CellValue::Number(v) => Some(var.format_value(*v)),
                    CellValue::Text(s) => Some(s.trim().to_string()),
                })
            });
            cases.push(ClusterCase {
                index,
                values,
                weight,
                label,
            });
        }

        Some(PreparedKMeans {
            variables: targets
                .iter()
                .map(|(v, _)| v.display_name().to_string())
                .collect(),
            cases,
            missing,
        })
        .filter(|p| !p.cases.is_empty())
    }

    #[instrument(name = "kmeans", skip_all, fields(cases = prepared.cases.len(), k = config.cluster))]
    fn compute(
        prepared: PreparedKMeans,
        config: &KMeansConfig,
        ctx: &RunContext,
    ) -> Result<Vec<ResultTable>> {
        let k = usize::try_from(config.cluster)
            .map_err(|_| ModelError::invalid("Number of clusters must be a positive integer."))?;
        let initial = initial_centers(&prepared.cases, k)?;
        let solution = iterate(&prepared.cases, initial.clone(), config, ctx)?;
        debug!(
            iterations = solution.history.len(),
            converged = solution.converged,
            "clustering finished"
        );

        let mut tables = Vec::new();
        if config.options.initial_centers {
            tables.push(centers_table("Initial Cluster Centers", &prepared.variables, &initial));
        }
        if config.method == KMeansMethod::IterateClassify {
            tables.push(history_table(&solution, k));
        }
        if config.options.cluster_info {
            tables.push(membership_table(&prepared, &solution));
        }
        tables.push(centers_table(
            "Final Cluster Centers",
            &prepared.variables,
            &solution.final_centers,
        ));
        tables.push(distances_table(&solution.final_centers));
        if config.options.anova {
            tables.push(anova_table(&prepared, &solution));
        }
        tables.push(counts_table(&prepared, &solution));
        Ok(tables)
    }
}

// ==================== Algorithm ====================

/// Euclidean distance over the coordinates present in `case`
pub fn case_distance(case: &[Option<f64>], center: &[f64]) -> f64 {
    case.iter()
        .zip(center)
        .filter_map(|(x, c)| x.map(|x| (x - c).powi(2)))
        .sum::<f64>()
        .sqrt()
}

pub fn center_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum::<f64>().sqrt()
}

/// Closest center; ties go to the lower cluster number
fn nearest(case: &[Option<f64>], centers: &[Vec<f64>]) -> (usize, f64) {
    let mut best = (0, f64::INFINITY);
    for (j, center) in centers.iter().enumerate() {
        let d = case_distance(case, center);
        if d < best.1 {
            best = (j, d);
        }
    }
    best
}

fn closest_pair(centers: &[Vec<f64>]) -> Option<(usize, usize, f64)> {
    let mut best: Option<(usize, usize, f64)> = None;
    for i in 0..centers.len() {
        for j in i + 1..centers.len() {
            let d = center_distance(&centers[i], &centers[j]);
            if best.is_none_or(|(_, _, b)| d < b) {
                best = Some((i, j, d));
            }
        }
    }
    best
}

fn min_center_distance(centers: &[Vec<f64>]) -> f64 {
    closest_pair(centers).map_or(0.0, |(_, _, d)| d)
}

/// Initial centers chosen by the max-separation scan over complete cases
pub fn initial_centers(cases: &[ClusterCase], k: usize) -> Result<Vec<Vec<f64>>> {
    let complete: Vec<Vec<f64>> = cases.iter().filter_map(ClusterCase::complete).collect();
    let mut centers: Vec<Vec<f64>> = Vec::with_capacity(k.min(complete.len()));
    let mut next = 0;
    while centers.len() < k && next < complete.len() {
        if !centers.contains(&complete[next]) {
            centers.push(complete[next].clone());
        }
        next += 1;
    }
    if centers.len() < k {
        return Err(ModelError::custom(format!(
            "Number of distinct cases ({}) is less than the number of clusters ({})",
            centers.len(),
            k
        )));
    }

    for x in &complete[next..] {
        let Some((m, n, dmn)) = closest_pair(&centers) else {
            break;
        };
        let mut by_distance: Vec<(usize, f64)> = centers
            .iter()
            .map(|c| center_distance(x, c))
            .enumerate()
            .collect();
        by_distance.sort_by(|a, b| a.1.total_cmp(&b.1));
        let (q, dq) = by_distance[0];

        if dq > dmn {
            let target = if center_distance(x, &centers[m]) <= center_distance(x, &centers[n]) {
                m
            } else {
                n
            };
            centers[target] = x.clone();
        } else {
            let second = by_distance[1].1;
            let q_to_others = centers
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != q)
                .map(|(_, c)| center_distance(&centers[q], c))
                .fold(f64::INFINITY, f64::min);
            if second > q_to_others {
                centers[q] = x.clone();
            }
        }
    }
    Ok(centers)
}

/// Outcome of the iteration and final classification
#[derive(Debug, Clone, PartialEq)]
pub struct Solution {
    /// Center movement per cluster, one entry per iteration
    pub history: Vec<Vec<f64>>,
    pub converged: bool,
    pub min_initial_distance: f64,
    /// Cluster of each case, parallel to the prepared cases
    pub membership: Vec<usize>,
    /// Distance of each case to its final center
    pub distances: Vec<f64>,
    pub final_centers: Vec<Vec<f64>>,
    /// Weighted size of each cluster
    pub sizes: Vec<f64>,
}

/// Weighted per-coordinate means of the cases in each cluster; clusters
/// (or coordinates) without cases keep `fallback`.
fn cluster_means(
    cases: &[ClusterCase],
    membership: &[usize],
    fallback: &[Vec<f64>],
) -> Vec<Vec<f64>> {
    let p = fallback.first().map_or(0, Vec::len);
    let mut sums = vec![vec![0.0; p]; fallback.len()];
    let mut weights = vec![vec![0.0; p]; fallback.len()];
    for (case, &j) in cases.iter().zip(membership) {
        for (v, x) in case.values.iter().enumerate() {
            if let Some(x) = x {
                sums[j][v] += case.weight * x;
                weights[j][v] += case.weight;
            }
        }
    }
    fallback
        .iter()
        .enumerate()
        .map(|(j, old)| {
            old.iter()
                .enumerate()
                .map(|(v, &c)| if weights[j][v] > 0.0 { sums[j][v] / weights[j][v] } else { c })
                .collect()
        })
        .collect()
}

pub fn iterate(
    cases: &[ClusterCase],
    initial: Vec<Vec<f64>>,
    config: &KMeansConfig,
    ctx: &RunContext,
) -> Result<Solution> {
    let min_initial_distance = min_center_distance(&initial);
    let threshold = config.iterate.convergence * min_initial_distance;
    let mut centers = initial;
    let mut history = Vec::new();
    let mut converged = false;

    if config.method == KMeansMethod::IterateClassify {
        let max_iter = usize::try_from(config.iterate.max_iterations).unwrap_or(1).max(1);
        let p = centers.first().map_or(0, Vec::len);
        for _ in 0..max_iter {
            ctx.check()?;
            let before = centers.clone();
            if config.iterate.use_running_means {
                let mut sums = vec![vec![0.0; p]; centers.len()];
                let mut weights = vec![vec![0.0; p]; centers.len()];
                for case in cases {
                    let (j, _) = nearest(&case.values, &centers);
                    for (v, x) in case.values.iter().enumerate() {
                        if let Some(x) = x {
                            sums[j][v] += case.weight * x;
                            weights[j][v] += case.weight;
                            centers[j][v] = sums[j][v] / weights[j][v];
                        }
                    }
                }
            } else {
                let membership: Vec<usize> =
                    cases.iter().map(|c| nearest(&c.values, &before).0).collect();
                centers = cluster_means(cases, &membership, &before);
            }

            let changes: Vec<f64> = before
                .iter()
                .zip(&centers)
                .map(|(a, b)| center_distance(a, b))
                .collect();
            let max_change = changes.iter().copied().fold(0.0, f64::max);
            history.push(changes);
            if max_change <= threshold {
                converged = true;
                break;
            }
        }
    }

    let membership: Vec<usize> = cases.iter().map(|c| nearest(&c.values, &centers).0).collect();
    let final_centers = cluster_means(cases, &membership, &centers);
    let distances = cases
        .iter()
        .zip(&membership)
        .map(|(c, &j)| case_distance(&c.values, &final_centers[j]))
        .collect();
    let mut sizes = vec![0.0; final_centers.len()];
    for (case, &j) in cases.iter().zip(&membership) {
        sizes[j] += case.weight;
    }

    Ok(Solution {
        history,
        converged,
        min_initial_distance,
        membership,
        distances,
        final_centers,
        sizes,
    })
}

// ==================== Tables ====================

fn cluster_headers(k: usize, first: &str) -> Vec<ColumnHeader> {
    vec![
        ColumnHeader::row_label(first),
        ColumnHeader::group(
            "Cluster",
            (1..=k)
                .map(|j| ColumnHeader::leaf(j.to_string(), j.to_string()))
                .collect(),
        ),
    ]
}

fn centers_table(title: &str, variables: &[String], centers: &[Vec<f64>]) -> ResultTable {
    let mut table = ResultTable::new(title, cluster_headers(centers.len(), ""));
    for (v, name) in variables.iter().enumerate() {
        let mut row = TableRow::new([name.clone()]);
        for (j, center) in centers.iter().enumerate() {
            row = row.num(&(j + 1).to_string(), center[v]);
        }
        table.push(row);
    }
    table
}

fn history_table(solution: &Solution, k: usize) -> ResultTable {
    let mut headers = cluster_headers(k, "Iteration");
    headers[1].header = "Change in Cluster Centers".to_string();
    let mut table = ResultTable::new("Iteration History", headers);
    for (i, changes) in solution.history.iter().enumerate() {
        let mut row = TableRow::new([(i + 1).to_string()]);
        for (j, change) in changes.iter().enumerate() {
            row = row.num(&(j + 1).to_string(), *change);
        }
        table.push(row);
    }

    let max_change = solution
        .history
        .last()
        .map_or(0.0, |c| c.iter().copied().fold(0.0, f64::max));
    let lead = if solution.converged {
        "a. Convergence achieved due to no or small change in cluster centers."
    } else {
        "a. Iterations stopped because the maximum number of iterations was performed. Iterations failed to converge."
    };
    table.footnote(format!(
        "{} The maximum absolute coordinate change for any center is {:.3}. The current iteration is {}. The minimum distance between initial centers is {:.3}.",
        lead,
        max_change,
        solution.history.len(),
        solution.min_initial_distance
    ));
    table
}

fn membership_table(prepared: &PreparedKMeans, solution: &Solution) -> ResultTable {
    let mut headers = vec![ColumnHeader::row_label("Case Number")];
    let labelled = prepared.cases.iter().any(|c| c.label.is_some());
    if labelled {
        headers.push(ColumnHeader::leaf("Case Label", "caseLabel"));
    }
    headers.push(ColumnHeader::leaf("Cluster", "cluster"));
    headers.push(ColumnHeader::leaf("Distance", "distance"));
    let mut table = ResultTable::new("Cluster Membership", headers);

    for ((case, &j), &d) in prepared
        .cases
        .iter()
        .zip(&solution.membership)
        .zip(&solution.distances)
    {
        let mut row = TableRow::new([(case.index + 1).to_string()]);
        if let Some(label) = &case.label {
            row = row.text("caseLabel", label.clone());
        }
        table.push(row.int("cluster", j + 1).num("distance", d));
    }
    table
}

fn distances_table(centers: &[Vec<f64>]) -> ResultTable {
    let mut table = ResultTable::new(
        "Distances between Final Cluster Centers",
        cluster_headers(centers.len(), "Cluster"),
    );
    for (i, a) in centers.iter().enumerate() {
        let mut row = TableRow::new([(i + 1).to_string()]);
        for (j, b) in centers.iter().enumerate() {
            let d = (i != j).then(|| center_distance(a, b));
            row = row.opt(&(j + 1).to_string(), d);
        }
        table.push(row);
    }
    table
}

fn anova_table(prepared: &PreparedKMeans, solution: &Solution) -> ResultTable {
    let k = solution.final_centers.len() as f64;
    let mut table = ResultTable::new(
        "ANOVA",
        vec![
            ColumnHeader::row_label(""),
            ColumnHeader::group(
                "Cluster",
                vec![
                    ColumnHeader::leaf("Mean Square", "clusterMeanSquare"),
                    ColumnHeader::leaf("df", "clusterDf"),
                ],
            ),
            ColumnHeader::group(
                "Error",
                vec![
                    ColumnHeader::leaf("Mean Square", "errorMeanSquare"),
                    ColumnHeader::leaf("df", "errorDf"),
                ],
            ),
            ColumnHeader::leaf("F", "f"),
            ColumnHeader::leaf("Sig.", "sig"),
        ],
    );

    for (v, name) in prepared.variables.iter().enumerate() {
        let mut total = 0.0;
        let mut sum = 0.0;
        for case in &prepared.cases {
            if let Some(x) = case.values[v] {
                total += case.weight;
                sum += case.weight * x;
            }
        }
        let grand = if total > 0.0 { sum / total } else { 0.0 };
        let mut between = 0.0;
        let mut within = 0.0;
        let mut sizes = vec![0.0; solution.final_centers.len()];
        for (case, &j) in prepared.cases.iter().zip(&solution.membership) {
            if let Some(x) = case.values[v] {
                sizes[j] += case.weight;
                within += case.weight * (x - solution.final_centers[j][v]).powi(2);
            }
        }
        for (j, n) in sizes.iter().enumerate() {
            between += n * (solution.final_centers[j][v] - grand).powi(2);
        }
        let df1 = k - 1.0;
        let df2 = total - k;
        let ms1 = (df1 > 0.0).then(|| between / df1);
        let ms2 = (df2 > 0.0).then(|| within / df2);
        let f = match (ms1, ms2) {
            (Some(a), Some(b)) if b > 0.0 => Some(a / b),
            _ => None,
        };
        table.push(
            TableRow::new([name.clone()])
                .opt("clusterMeanSquare", ms1)
                .num("clusterDf", df1)
                .opt("errorMeanSquare", ms2)
                .num("errorDf", df2)
                .opt("f", f)
                .opt("sig", f.and_then(|f| f_sf(f, df1, df2))),
        );
    }
    table.footnote(
        "The F tests should be used only for descriptive purposes because the clusters have been chosen to maximize the differences among cases in different clusters. The observed significance levels are not corrected for this and thus cannot be interpreted as tests of the hypothesis that the cluster means are equal.",
    );
    table
}

fn counts_table(prepared: &PreparedKMeans, solution: &Solution) -> ResultTable {
    let mut table = ResultTable::new(
        "Number of Cases in each Cluster",
        vec![
            ColumnHeader::row_label(""),
            ColumnHeader::row_label(""),
            ColumnHeader::leaf("N", "n"),
        ],
    );
    for (j, n) in solution.sizes.iter().enumerate() {
        table.push(TableRow::new(["Cluster".to_string(), (j + 1).to_string()]).num("n", *n));
    }
    table.push(TableRow::new(["Valid"]).num("n", solution.sizes.iter().sum()));
    table.push(TableRow::new(["Missing"]).num("n", prepared.missing));
    table
}
