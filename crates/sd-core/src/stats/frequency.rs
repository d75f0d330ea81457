//! Frequency tables
//!
//! Percentages are rounded to one decimal place and the cumulative
//! column adds up the already-rounded valid percentages, which is how the
//! reference package displays them (the running total can drift by a few
//! tenths from a rounded true cumulative).

use serde::{Deserialize, Serialize};

use super::SortedWeightedTable;

/// Round to one decimal place
pub fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// A valid-value row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrequencyRow {
    pub label: String,
    /// Numeric value for numeric variables
    pub value: Option<f64>,
    pub frequency: f64,
    pub percent: f64,
    pub valid_percent: f64,
    pub cumulative_percent: f64,
}

/// A missing-value row (user-missing code or "System")
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MissingRow {
    pub label: String,
    pub frequency: f64,
    pub percent: f64,
}

/// Frequency table of one variable
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrequencyTable {
    pub rows: Vec<FrequencyRow>,
    pub missing: Vec<MissingRow>,
    /// Weighted N of valid cases
    pub valid_n: f64,
    /// Weighted N including missing cases
    pub total_n: f64,
}

impl FrequencyTable {
    /// Rows for a numeric variable; `label` renders each value.
    pub fn build<F>(table: &SortedWeightedTable, total_n: f64, label: F) -> Self
    where
        F: Fn(f64) -> String,
    {
        let items: Vec<(String, Option<f64>, f64)> = table
            .entries()
            .iter()
            .map(|e| (label(e.value), Some(e.value), e.weight))
            .collect();
        Self::from_items(items, table.total_weight(), total_n)
    }

    /// Rows for string categories, sorted ascending by text
    pub fn build_labels(labels: &[String], weights: &[f64], total_n: f64) -> Self {
        let mut pairs: Vec<(&String, f64)> = labels.iter().zip(weights.iter().copied()).collect();
        pairs.sort_by(|a, b| a.0.cmp(b.0));

        let mut items: Vec<(String, Option<f64>, f64)> = Vec::new();
        for (label, weight) in pairs {
            match items.last_mut() {
                Some((last, _, w)) if last == label => *w += weight,
                _ => items.push((label.clone(), None, weight)),
            }
        }
        let valid_n = items.iter().map(|(_, _, w)| w).sum();
        Self::from_items(items, valid_n, total_n)
    }

    fn from_items(items: Vec<(String, Option<f64>, f64)>, valid_n: f64, total_n: f64) -> Self {
        let mut cumulative = 0.0;
        let rows = items
            .into_iter()
            .map(|(label, value, frequency)| {
                let percent = if total_n > 0.0 {
                    round1(frequency / total_n * 100.0)
                } else {
                    0.0
                };
                let valid_percent = if valid_n > 0.0 {
                    round1(frequency / valid_n * 100.0)
                } else {
                    0.0
                };
                cumulative = round1(cumulative + valid_percent);
                FrequencyRow {
                    label,
                    value,
                    frequency,
                    percent,
                    valid_percent,
                    cumulative_percent: cumulative,
                }
            })
            .collect();

        Self {
            rows,
            missing: Vec::new(),
            valid_n,
            total_n,
        }
    }

    /// Add a missing row (one per user-missing code, plus "System")
    pub fn add_missing(&mut self, label: impl Into<String>, frequency: f64) {
        if frequency <= 0.0 {
            return;
        }
        let percent = if self.total_n > 0.0 {
            round1(frequency / self.total_n * 100.0)
        } else {
            0.0
        };
        self.missing.push(MissingRow {
            label: label.into(),
            frequency,
            percent,
        });
    }

    /// Weight of missing cases
    pub fn missing_n(&self) -> f64 {
        self.total_n - self.valid_n
    }

    /// Sum of the rounded valid percentages
    pub fn valid_percent_total(&self) -> f64 {
        self.rows.iter().map(|r| r.valid_percent).sum()
    }
}
