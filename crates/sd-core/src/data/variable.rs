//! Variable definitions and their missing-value specification

use serde::{Deserialize, Serialize};

use super::CellValue;

/// Storage type of a variable; decides which coercion path applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum VariableType {
    #[default]
    Numeric,
    String,
    Date,
}

impl VariableType {
    /// NUMERIC and DATE share the numeric missing-value rules.
    pub fn is_numeric(&self) -> bool {
        matches!(self, VariableType::Numeric | VariableType::Date)
    }
}

/// Level of measurement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Measure {
    #[default]
    Scale,
    Nominal,
    Ordinal,
    Unknown,
}

/// Role of a variable in dialogs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Input,
    Target,
    Both,
    None,
    Partition,
    Split,
}

/// Inclusive user-missing range. Bounds stay raw so malformed ones can be detected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissingRange {
    pub min: CellValue,
    pub max: CellValue,
}

/// User-defined missing values of a variable
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct MissingSpec {
    #[serde(default)]
    pub discrete: Option<Vec<CellValue>>,
    #[serde(default)]
    pub range: Option<MissingRange>,
}

impl MissingSpec {
    pub fn discrete<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<CellValue>,
    {
        Self {
            discrete: Some(values.into_iter().map(Into::into).collect()),
            range: None,
        }
    }

    pub fn range(min: impl Into<CellValue>, max: impl Into<CellValue>) -> Self {
        Self {
            discrete: None,
            range: Some(MissingRange {
                min: min.into(),
                max: max.into(),
            }),
        }
    }

    pub fn with_discrete<I, V>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<CellValue>,
    {
        self.discrete = Some(values.into_iter().map(Into::into).collect());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.discrete.as_ref().is_none_or(|d| d.is_empty()) && self.range.is_none()
    }
}

/// Value label attached to a code
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueLabel {
    pub value: CellValue,
    pub label: String,
}

/// A variable definition as supplied with every data block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Variable {
    pub column_index: usize,
    pub name: String,
    #[serde(rename = "type", default)]
    pub var_type: VariableType,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_decimals")]
    pub decimals: u32,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub measure: Measure,
    #[serde(default)]
    pub missing: Option<MissingSpec>,
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub values: Vec<ValueLabel>,
}

fn default_width() -> u32 {
    8
}

fn default_decimals() -> u32 {
    2
}

impl Variable {
    /// Create a numeric scale variable at the given column
    pub fn numeric(column_index: usize, name: impl Into<String>) -> Self {
        Self {
            column_index,
            name: name.into(),
            var_type: VariableType::Numeric,
            width: default_width(),
            decimals: default_decimals(),
            label: String::new(),
            measure: Measure::Scale,
            missing: None,
            role: Role::Input,
            values: Vec::new(),
        }
    }

    /// Create a nominal string variable at the given column
    pub fn string(column_index: usize, name: impl Into<String>) -> Self {
        Self {
            var_type: VariableType::String,
            measure: Measure::Nominal,
            decimals: 0,
            ..Self::numeric(column_index, name)
        }
    }

    /// Create a date variable at the given column
    pub fn date(column_index: usize, name: impl Into<String>) -> Self {
        Self {
            var_type: VariableType::Date,
            decimals: 0,
            ..Self::numeric(column_index, name)
        }
    }

    pub fn is_numeric(&self) -> bool {
        self.var_type.is_numeric()
    }

    /// Label when set, otherwise the name
    pub fn display_name(&self) -> &str {
        if self.label.trim().is_empty() {
            &self.name
        } else {
            &self.label
        }
    }

    /// Value label for a numeric code, if defined
    pub fn value_label(&self, value: f64) -> Option<&str> {
        self.values
            .iter()
            .find(|vl| vl.value.as_f64().is_some_and(|v| v == value))
            .map(|vl| vl.label.as_str())
    }

    /// Value label for a text category, if defined
    pub fn text_label(&self, value: &str) -> Option<&str> {
        self.values
            .iter()
            .find(|vl| vl.value.as_text().is_some_and(|v| v == value))
            .map(|vl| vl.label.as_str())
    }

    /// Row header for a numeric value: the label when defined, else the
    /// value printed with the variable's decimals.
    pub fn format_value(&self, value: f64) -> String {
        match self.value_label(value) {
            Some(label) => label.to_string(),
            None if self.var_type == VariableType::Date => super::seconds_to_date_string(value),
            None if value.fract() == 0.0 => format!("{}", value as i64),
            None => format!("{:.*}", self.decimals as usize, value),
        }
    }
}
