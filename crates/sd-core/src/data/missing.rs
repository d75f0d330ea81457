//! Missing-value classifier
//!
//! Decides, for one raw cell and a variable's missing specification,
//! whether the cell is system-missing, user-missing or valid. Every
//! statistic routes its input through here.

use super::{CellValue, MissingSpec, date_to_seconds, parse_number};

/// Outcome of classifying a cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MissingKind {
    Valid,
    SystemMissing,
    UserMissing,
}

impl MissingKind {
    pub fn is_missing(&self) -> bool {
        !matches!(self, MissingKind::Valid)
    }
}

/// `true` when the cell is system- or user-missing.
pub fn is_missing(value: &CellValue, spec: Option<&MissingSpec>, is_numeric_type: bool) -> bool {
    classify(value, spec, is_numeric_type).is_missing()
}

/// Classify a cell.
///
/// * null is always system-missing
/// * `""` is system-missing only for numeric types
/// * discrete entries match numerically (numeric types) with a raw
///   string-equality fallback
/// * ranges apply to numeric types only and are inclusive; malformed
///   bounds never match
pub fn classify(value: &CellValue, spec: Option<&MissingSpec>, is_numeric_type: bool) -> MissingKind {
    match value {
        CellValue::Null => return MissingKind::SystemMissing,
        CellValue::Text(s) if is_numeric_type && s.trim().is_empty() => {
            return MissingKind::SystemMissing;
        }
        // an empty string is a category of its own for string variables
        CellValue::Text(s) if s.is_empty() => return MissingKind::Valid,
        _ => {}
    }

    let Some(spec) = spec else {
        return MissingKind::Valid;
    };

    if let Some(discrete) = &spec.discrete {
        if discrete
            .iter()
            .any(|candidate| discrete_matches(value, candidate, is_numeric_type))
        {
            return MissingKind::UserMissing;
        }
    }

    if is_numeric_type {
        if let Some(range) = &spec.range {
            if let (Some(v), Some(min), Some(max)) = (
                numeric_value(value),
                bound_value(&range.min),
                bound_value(&range.max),
            ) {
                if min <= max && v >= min && v <= max {
                    return MissingKind::UserMissing;
                }
            }
        }
    }

    MissingKind::Valid
}

fn discrete_matches(value: &CellValue, candidate: &CellValue, is_numeric_type: bool) -> bool {
    if candidate.is_null() {
        return false;
    }
    if is_numeric_type {
        if let (Some(a), Some(b)) = (numeric_value(value), numeric_value(candidate)) {
            if a == b {
                return true;
            }
        }
        return raw_text(value) == raw_text(candidate);
    }
    match (value.as_text(), candidate.as_text()) {
        (Some(a), Some(b)) => a.trim_end() == b.trim_end(),
        _ => false,
    }
}

/// Numbers pass through, text is parsed as a number and then as a date.
fn numeric_value(value: &CellValue) -> Option<f64> {
    match value {
        CellValue::Null => None,
        CellValue::Number(v) => v.is_finite().then_some(*v),
        CellValue::Text(s) => parse_number(s).or_else(|| date_to_seconds(s)),
    }
}

fn bound_value(bound: &CellValue) -> Option<f64> {
    numeric_value(bound).filter(|v| v.is_finite())
}

fn raw_text(value: &CellValue) -> Option<String> {
    value.as_text().map(|s| s.trim().to_string())
}
