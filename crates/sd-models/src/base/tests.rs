//! Tests for the shared analysis plumbing

use approx::assert_abs_diff_eq;

use sd_core::data::{CellValue, DataBlockBuilder, MissingSpec, VariableBuilder};
use sd_core::{ErrorAccumulator, ErrorStage};

use super::*;

#[test]
fn test_coefficient_normal_inference() {
    let c = Coefficient::new("b", 2.0).with_inference(1.0, None, 0.95);
    assert_eq!(c.std_error, Some(1.0));
    assert_eq!(c.t_stat, Some(2.0));
    assert_abs_diff_eq!(c.p_value.unwrap(), 0.0455003, epsilon = 1e-6);
    assert_abs_diff_eq!(c.ci_lower.unwrap(), 2.0 - 1.959964, epsilon = 1e-5);
    assert_abs_diff_eq!(c.ci_upper.unwrap(), 2.0 + 1.959964, epsilon = 1e-5);
}

#[test]
fn test_coefficient_t_inference() {
    let c = Coefficient::new("b", 2.0).with_inference(0.5, Some(10.0), 0.95);
    assert_eq!(c.df, Some(10.0));
    assert_eq!(c.t_stat, Some(4.0));
    assert_abs_diff_eq!(c.ci_lower.unwrap(), 2.0 - 0.5 * 2.228139, epsilon = 1e-5);
    assert_abs_diff_eq!(c.ci_upper.unwrap(), 2.0 + 0.5 * 2.228139, epsilon = 1e-5);
}

#[test]
fn test_coefficient_without_standard_error() {
    let c = Coefficient::new("b", 2.0).with_inference(0.0, None, 0.95);
    assert_eq!(c.std_error, Some(0.0));
    assert!(c.t_stat.is_none());
    assert!(c.ci_lower.is_none() && c.ci_upper.is_none());
}

#[test]
fn test_check_blocks_reports_each_empty_block() {
    let x = VariableBuilder::new("x").missing(MissingSpec::discrete([9.0])).build();
    let input = AnalysisInput::new()
        .with_block(
            DataBlockBuilder::new("dependent")
                .with_column(x, [9.0, 9.0])
                .unwrap()
                .build(),
        )
        .with_block(
            DataBlockBuilder::new("covariate")
                .with_column(
                    VariableBuilder::new("z").build(),
                    [CellValue::Null, CellValue::text("n/a")],
                )
                .unwrap()
                .build(),
        )
        .with_block(
            DataBlockBuilder::new("factor")
                .with_numeric("f", [Some(1.0), None])
                .unwrap()
                .build(),
        );

    let mut errors = ErrorAccumulator::new();
    assert!(!input.check_blocks(&mut errors));
    let records = errors.into_errors();
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| r.stage == ErrorStage::Coercion));
    assert_eq!(records[0].message, "dependent contains all null values");
    assert_eq!(records[1].message, "covariate contains all null values");
}

#[test]
fn test_check_blocks_accepts_usable_input() {
    let input = AnalysisInput::new().with_block(
        DataBlockBuilder::new("variables")
            .with_numeric("x", [None, Some(3.0)])
            .unwrap()
            .build(),
    );
    let mut errors = ErrorAccumulator::new();
    assert!(input.check_blocks(&mut errors));
    assert!(errors.is_empty());
}
