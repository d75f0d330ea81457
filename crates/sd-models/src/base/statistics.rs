//! Sums-of-squares rows shared by the ANOVA-style tables

use serde::{Deserialize, Serialize};

use sd_core::stats::distribution::f_sf;
use sd_core::{ColumnHeader, ResultTable, TableRow};

/// One source of variation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceStatistics {
    /// Source name
    pub source: String,
    /// Sum of squares
    pub sum_of_squares: f64,
    /// Degrees of freedom
    pub df: f64,
    /// Mean square
    pub mean_square: Option<f64>,
    /// F statistic
    pub f: Option<f64>,
    /// p-value of F
    pub sig: Option<f64>,
    /// Partial eta squared
    pub partial_eta_squared: Option<f64>,
}

impl SourceStatistics {
    /// Source with sum of squares and df; mean square when `df > 0`
    pub fn new(source: impl Into<String>, sum_of_squares: f64, df: f64) -> Self {
        Self {
            source: source.into(),
            sum_of_squares,
            df,
            mean_square: (df > 0.0).then(|| sum_of_squares / df),
            f: None,
            sig: None,
            partial_eta_squared: None,
        }
    }

    /// Total rows print no mean square
    pub fn total(source: impl Into<String>, sum_of_squares: f64, df: f64) -> Self {
        Self {
            mean_square: None,
            ..Self::new(source, sum_of_squares, df)
        }
    }

    /// Test against a denominator mean square with `error_df`
    pub fn tested_against(mut self, error_ms: f64, error_df: f64, error_ss: f64) -> Self {
        if let Some(ms) = self.mean_square {
            if error_ms > 0.0 && error_df > 0.0 {
                let f = ms / error_ms;
                self.f = Some(f);
                self.sig = f_sf(f, self.df, error_df);
            }
        }
        let denom = self.sum_of_squares + error_ss;
        if denom > 0.0 {
            self.partial_eta_squared = Some(self.sum_of_squares / denom);
        }
        self
    }

    pub fn to_row(&self, with_effect_size: bool) -> TableRow {
        let row = TableRow::new([self.source.clone()])
            .num("sumOfSquares", self.sum_of_squares)
            .num("df", self.df)
            .opt("meanSquare", self.mean_square)
            .opt("f", self.f)
            .opt("sig", self.sig);
        if with_effect_size {
            row.opt("partialEtaSquared", self.partial_eta_squared)
        } else {
            row
        }
    }
}

/// ANOVA table over `sources` with the standard headers
pub fn source_table(
    title: &str,
    sum_of_squares_label: &str,
    sources: &[SourceStatistics],
    with_effect_size: bool,
) -> ResultTable {
    let mut headers = vec![
        ColumnHeader::row_label("Source"),
        ColumnHeader::leaf(sum_of_squares_label, "sumOfSquares"),
        ColumnHeader::leaf("df", "df"),
        ColumnHeader::leaf("Mean Square", "meanSquare"),
        ColumnHeader::leaf("F", "f"),
        ColumnHeader::leaf("Sig.", "sig"),
    ];
    if with_effect_size {
        headers.push(ColumnHeader::leaf("Partial Eta Squared", "partialEtaSquared"));
    }
    let mut table = ResultTable::new(title, headers);
    for source in sources {
        table.push(source.to_row(with_effect_size));
    }
    table
}
