//! Weighted descriptive statistics
//!
//! Everything here works on `(values, weights)` pairs produced by the
//! coercion layer. Sorting and weight accumulation happen once, in
//! `SortedWeightedTable`, and the result is passed to percentiles, mode
//! and frequency rows explicitly.

mod descriptive;
pub mod distribution;
mod frequency;
mod percentile;
mod rank;
mod sorted;


pub use descriptive::{DescriptiveStats, StatisticSet, weighted_mean, weighted_variance};
pub use frequency::{FrequencyRow, FrequencyTable, MissingRow, round1};
pub use percentile::{PercentileMethod, percentile, percentiles};
pub use rank::{mid_ranks, tie_counts, tie_correction_sum, weighted_mid_ranks};
pub use sorted::{SortedWeightedTable, WeightedValue};
