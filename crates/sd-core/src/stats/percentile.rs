//! Percentile definitions
//!
//! Five definitions over a `SortedWeightedTable`, following the weighted
//! formulation used by SPSS. With total weight `W`, cumulative weights
//! `cc(i)` and per-value weights `c(i)`:
//!
//! * `tc = W·p` (`(W+1)·p` for `HAverage`)
//! * `k` is the largest index with `cc(k) <= tc`
//! * `g* = tc − cc(k)` and `g = g*/c(k+1)`
//!
//! `x(0)` is taken as the minimum and `x(len+1)` as the maximum.

use serde::{Deserialize, Serialize};

use super::SortedWeightedTable;

const EPS: f64 = 1e-9;

/// Percentile definition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PercentileMethod {
    /// Weighted average at `x(W·p)`
    WAverage,
    /// Weighted average at `x((W+1)·p)` (Tukey's hinges)
    #[default]
    HAverage,
    /// Empirical distribution function with averaging
    AEmpirical,
    /// Empirical distribution function
    Empirical,
    /// Observation closest to `W·p`
    Round,
}

struct Location {
    k: usize,
    g_star: f64,
    c_next: f64,
}

fn locate(table: &SortedWeightedTable, tc: f64) -> Location {
    let entries = table.entries();
    let k = entries.partition_point(|e| e.cumulative <= tc + EPS);
    let mut g_star = tc - table.cumulative_at(k);
    if g_star < EPS {
        g_star = 0.0;
    }
    Location {
        k,
        g_star,
        c_next: table.weight_at(k + 1),
    }
}

/// Percentile `p` (a fraction in `[0, 1]`) of the table.
///
/// Returns `None` for an empty table or `p` outside `[0, 1]`.
pub fn percentile(table: &SortedWeightedTable, p: f64, method: PercentileMethod) -> Option<f64> {
    if table.is_empty() || !(0.0..=1.0).contains(&p) {
        return None;
    }
    let w = table.total_weight();

    let value = match method {
        PercentileMethod::WAverage => weighted_average(table, w * p),
        PercentileMethod::HAverage => weighted_average(table, (w + 1.0) * p),
        PercentileMethod::Empirical => {
            let loc = locate(table, w * p);
            if loc.g_star == 0.0 {
                table.value_at(loc.k)
            } else {
                table.value_at(loc.k + 1)
            }
        }
        PercentileMethod::AEmpirical => {
            let loc = locate(table, w * p);
            if loc.g_star == 0.0 {
                0.5 * (table.value_at(loc.k) + table.value_at(loc.k + 1))
            } else {
                table.value_at(loc.k + 1)
            }
        }
        PercentileMethod::Round => {
            let loc = locate(table, w * p);
            let g = if loc.c_next >= 1.0 {
                loc.g_star
            } else {
                loc.g_star / loc.c_next
            };
            if g < 0.5 {
                table.value_at(loc.k)
            } else {
                table.value_at(loc.k + 1)
            }
        }
    };
    Some(value)
}

/// Interpolating definition shared by `WAverage` and `HAverage`.
///
/// The interpolation weight switches from `g*` to `g*/c(k+1)` when the
/// next value carries a fractional weight below one.
fn weighted_average(table: &SortedWeightedTable, tc: f64) -> f64 {
    let loc = locate(table, tc);
    let lower = table.value_at(loc.k);
    let upper = table.value_at(loc.k + 1);

    if loc.g_star >= 1.0 {
        upper
    } else if loc.c_next >= 1.0 {
        (1.0 - loc.g_star) * lower + loc.g_star * upper
    } else {
        let g = loc.g_star / loc.c_next;
        (1.0 - g) * lower + g * upper
    }
}

/// Several percentiles at once; entries are `None` where undefined.
pub fn percentiles(
    table: &SortedWeightedTable,
    ps: &[f64],
    method: PercentileMethod,
) -> Vec<Option<f64>> {
    ps.iter().map(|&p| percentile(table, p, method)).collect()
}
