//! Result tables
//!
//! Every analysis emits its output as `ResultTable`s: a title, possibly
//! grouped column headers and rows keyed by the leaf column keys. A row
//! always carries every declared leaf key (as `null` when a value does
//! not apply), so renderers never need to special-case absent cells.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// A column header; `children` model grouped headers such as
/// "Skewness" over "Statistic" / "Std. Error".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnHeader {
    pub header: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ColumnHeader>,
}

impl ColumnHeader {
    /// Leaf header bound to a row key
    pub fn leaf(header: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            header: header.into(),
            key: Some(key.into()),
            children: Vec::new(),
        }
    }

    /// Header spanning the rows' header cells
    pub fn row_label(header: impl Into<String>) -> Self {
        Self {
            header: header.into(),
            key: None,
            children: Vec::new(),
        }
    }

    /// Grouping header over child columns
    pub fn group(header: impl Into<String>, children: Vec<ColumnHeader>) -> Self {
        Self {
            header: header.into(),
            key: None,
            children,
        }
    }

    fn collect_keys<'a>(&'a self, out: &mut Vec<&'a str>) {
        if let Some(key) = &self.key {
            out.push(key);
        }
        for child in &self.children {
            child.collect_keys(out);
        }
    }
}

/// One table row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableRow {
    pub row_header: Vec<String>,
    #[serde(flatten)]
    pub cells: IndexMap<String, Value>,
}

impl TableRow {
    pub fn new<I, S>(row_header: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            row_header: row_header.into_iter().map(Into::into).collect(),
            cells: IndexMap::new(),
        }
    }

    /// Set a numeric cell; non-finite numbers become `null`
    pub fn num(mut self, key: &str, value: f64) -> Self {
        self.cells.insert(key.to_string(), number(value));
        self
    }

    /// Set an optional numeric cell
    pub fn opt(mut self, key: &str, value: Option<f64>) -> Self {
        self.cells
            .insert(key.to_string(), value.map(number).unwrap_or(Value::Null));
        self
    }

    /// Set an integer cell
    pub fn int(mut self, key: &str, value: usize) -> Self {
        self.cells.insert(key.to_string(), Value::from(value as u64));
        self
    }

    /// Set a text cell
    pub fn text(mut self, key: &str, value: impl Into<String>) -> Self {
        self.cells.insert(key.to_string(), Value::String(value.into()));
        self
    }

    /// Set an arbitrary JSON cell
    pub fn value(mut self, key: &str, value: Value) -> Self {
        self.cells.insert(key.to_string(), value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.cells.get(key)
    }

    /// Numeric cell, if present and numeric
    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.cells.get(key).and_then(Value::as_f64)
    }
}

/// JSON number for a float, `null` when not finite
pub fn number(value: f64) -> Value {
    serde_json::Number::from_f64(value)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

/// An output table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultTable {
    pub title: String,
    pub column_headers: Vec<ColumnHeader>,
    pub rows: Vec<TableRow>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub footnotes: Vec<String>,
}

impl ResultTable {
    pub fn new(title: impl Into<String>, column_headers: Vec<ColumnHeader>) -> Self {
        Self {
            title: title.into(),
            column_headers,
            rows: Vec::new(),
            footnotes: Vec::new(),
        }
    }

    /// Leaf keys in header order
    pub fn keys(&self) -> Vec<&str> {
        let mut keys = Vec::new();
        for header in &self.column_headers {
            header.collect_keys(&mut keys);
        }
        keys
    }

    /// Append a row, filling every declared key that the row lacks with `null`
    /// and ordering cells by header order.
    pub fn push(&mut self, row: TableRow) {
        let keys: Vec<String> = self.keys().into_iter().map(str::to_string).collect();
        let TableRow {
            row_header,
            mut cells,
        } = row;
        let mut ordered = IndexMap::with_capacity(keys.len());
        for key in keys {
            let value = cells.shift_remove(&key).unwrap_or(Value::Null);
            ordered.insert(key, value);
        }
        // keys not declared in the headers are kept after the declared ones
        ordered.extend(cells);
        self.rows.push(TableRow {
            row_header,
            cells: ordered,
        });
    }

    pub fn footnote(&mut self, note: impl Into<String>) {
        self.footnotes.push(note.into());
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// First row whose header path starts with the given labels
    pub fn find_row(&self, header: &[&str]) -> Option<&TableRow> {
        self.rows.iter().find(|row| {
            row.row_header.len() >= header.len()
                && row.row_header.iter().zip(header).all(|(a, b)| a == b)
        })
    }
}

impl fmt::Display for ResultTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.title)?;
        writeln!(f, "{}", "=".repeat(self.title.chars().count()))?;
        let keys = self.keys();
        write!(f, "{:<24}", "")?;
        for key in &keys {
            write!(f, " {:>12}", key)?;
        }
        writeln!(f)?;
        for row in &self.rows {
            write!(f, "{:<24}", row.row_header.join(" / "))?;
            for key in &keys {
                match row.get(key) {
                    Some(Value::Number(n)) => match n.as_f64() {
                        Some(v) if n.is_f64() => write!(f, " {:>12.4}", v)?,
                        _ => write!(f, " {:>12}", n)?,
                    },
                    Some(Value::String(s)) => write!(f, " {:>12}", s)?,
                    Some(Value::Null) | None => write!(f, " {:>12}", ".")?,
                    Some(other) => write!(f, " {:>12}", other)?,
                }
            }
            writeln!(f)?;
        }
        for note in &self.footnotes {
            writeln!(f, "  {}", note)?;
        }
        Ok(())
    }
}
