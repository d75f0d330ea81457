//! Tests for data module

use super::*;
use proptest::prelude::*;
use serde_json::json;

fn spec_99() -> MissingSpec {
    MissingSpec::discrete([99.0])
}

#[test]
fn test_null_is_always_missing() {
    assert!(is_missing(&CellValue::Null, None, true));
    assert!(is_missing(&CellValue::Null, None, false));
    assert_eq!(
        classify(&CellValue::Null, Some(&spec_99()), true),
        MissingKind::SystemMissing
    );
}

#[test]
fn test_empty_string_depends_on_type() {
    let empty = CellValue::text("");
    assert!(is_missing(&empty, None, true));
    assert!(!is_missing(&empty, None, false));

    // whitespace-only counts as blank for numeric types
    assert!(is_missing(&CellValue::text("   "), None, true));

    // even a spec listing "" does not make it missing for strings
    let spec = MissingSpec::discrete([""]);
    assert!(!is_missing(&empty, Some(&spec), false));
}

#[test]
fn test_discrete_numeric_and_string_fallback() {
    let spec = MissingSpec::discrete(vec![CellValue::Number(99.0), CellValue::text("N/A")]);

    assert!(is_missing(&CellValue::Number(99.0), Some(&spec), true));
    assert!(is_missing(&CellValue::text("99"), Some(&spec), true));
    assert!(is_missing(&CellValue::text("99.0"), Some(&spec), true));
    assert!(is_missing(&CellValue::text("N/A"), Some(&spec), true));
    assert!(!is_missing(&CellValue::Number(98.0), Some(&spec), true));

    assert_eq!(
        classify(&CellValue::Number(99.0), Some(&spec), true),
        MissingKind::UserMissing
    );
}

#[test]
fn test_discrete_string_variable() {
    let spec = MissingSpec::discrete(["unknown"]);
    assert!(is_missing(&CellValue::text("unknown"), Some(&spec), false));
    assert!(!is_missing(&CellValue::text("known"), Some(&spec), false));
}

#[test]
fn test_range_is_inclusive() {
    let spec = MissingSpec::range(90.0, 99.0);
    assert!(is_missing(&CellValue::Number(90.0), Some(&spec), true));
    assert!(is_missing(&CellValue::Number(95.5), Some(&spec), true));
    assert!(is_missing(&CellValue::text("99"), Some(&spec), true));
    assert!(!is_missing(&CellValue::Number(89.99), Some(&spec), true));
    assert!(!is_missing(&CellValue::Number(100.0), Some(&spec), true));
}

#[test]
fn test_malformed_range_never_matches() {
    let spec = MissingSpec::range("abc", 99.0);
    assert!(!is_missing(&CellValue::Number(50.0), Some(&spec), true));

    let inverted = MissingSpec::range(99.0, 90.0);
    assert!(!is_missing(&CellValue::Number(95.0), Some(&inverted), true));
}

#[test]
fn test_range_ignored_for_strings() {
    let spec = MissingSpec::range(1.0, 5.0);
    assert!(!is_missing(&CellValue::text("3"), Some(&spec), false));
}

#[test]
fn test_range_with_dates() {
    let spec = MissingSpec::range("01-01-2000", "31-12-2000");
    assert!(is_missing(&CellValue::text("15-06-2000"), Some(&spec), true));
    assert!(!is_missing(&CellValue::text("15-06-2001"), Some(&spec), true));
}

#[test]
fn test_date_conversion() {
    assert_eq!(date_to_seconds("14-10-1582"), Some(0.0));
    assert_eq!(date_to_seconds("15-10-1582"), Some(86_400.0));
    assert_eq!(date_to_seconds("1582-10-15 01:00"), Some(90_000.0));
    assert_eq!(date_to_seconds("not a date"), None);

    let secs = date_to_seconds("03-02-2021").unwrap();
    assert_eq!(seconds_to_date_string(secs), "03-02-2021");
}

#[test]
fn test_parse_number() {
    assert_eq!(parse_number(" 1.5 "), Some(1.5));
    assert_eq!(parse_number("1e3"), Some(1000.0));
    assert_eq!(parse_number("abc"), None);
    assert_eq!(parse_number("NaN"), None);
    assert_eq!(parse_number(""), None);
}

#[test]
fn test_coerce_numeric_column() {
    let variable = VariableBuilder::new("score").missing(spec_99()).build();
    let cells = vec![
        CellValue::Number(1.0),
        CellValue::text("2"),
        CellValue::text("abc"),
        CellValue::Null,
        CellValue::Number(99.0),
        CellValue::text(""),
        CellValue::Number(5.0),
    ];

    let column = coerce_column(&cells, &variable, &CaseWeights::unit(cells.len()));
    assert_eq!(column.values, vec![1.0, 2.0, 5.0]);
    assert_eq!(column.valid_n, 3);
    assert_eq!(column.total_weight, 3.0);
    assert_eq!(column.case_indices, vec![0, 1, 6]);
    assert_eq!(column.system_missing, 3.0);
    assert_eq!(column.user_missing, vec![(99.0, 1.0)]);
}

#[test]
fn test_coerce_with_weights() {
    let variable = Variable::numeric(0, "x");
    let weight_var = Variable::numeric(1, "w");
    let cells: Vec<CellValue> = vec![1.0, 2.0, 3.0, 4.0, 5.0]
        .into_iter()
        .map(CellValue::from)
        .collect();
    let weight_cells = vec![
        CellValue::Number(2.0),
        CellValue::Number(0.0),
        CellValue::Number(-1.0),
        CellValue::text("x"),
        CellValue::Number(0.5),
    ];
    let weights = CaseWeights::from_cells(&weight_cells, &weight_var);

    let column = coerce_column(&cells, &variable, &weights);
    assert_eq!(column.values, vec![1.0, 5.0]);
    assert_eq!(column.weights, vec![2.0, 0.5]);
    assert_eq!(column.valid_n, 2);
    assert_eq!(column.total_weight, 2.5);
}

#[test]
fn test_coerce_date_column() {
    let variable = Variable::date(0, "when");
    let cells = vec![CellValue::text("15-10-1582"), CellValue::text("garbage")];
    let column = coerce_column(&cells, &variable, &CaseWeights::unit(2));
    assert_eq!(column.values, vec![86_400.0]);
}

#[test]
fn test_coerce_string_column_has_no_numbers() {
    let variable = Variable::string(0, "city");
    let cells = vec![CellValue::text("1"), CellValue::text("Oslo"), CellValue::text("")];
    let column = coerce_column(&cells, &variable, &CaseWeights::unit(3));
    assert!(column.is_empty());

    let labels = coerce_labels(&cells, &variable, &CaseWeights::unit(3));
    assert_eq!(labels.labels, vec!["1", "Oslo", ""]);
    assert_eq!(labels.valid_n, 3);
}

#[test]
fn test_require_non_empty() {
    let variable = Variable::numeric(0, "x");
    let cells = vec![CellValue::Null, CellValue::text("")];
    let column = coerce_column(&cells, &variable, &CaseWeights::unit(2));

    let err = require_non_empty(&column, "Dependent variable").unwrap_err();
    assert_eq!(
        err.to_string(),
        "Dependent variable contains all null/invalid values"
    );
}

#[test]
fn test_listwise() {
    let x = Variable::numeric(0, "x");
    let a = coerce_column(
        &[1.0.into(), CellValue::Null, 3.0.into(), 4.0.into()],
        &x,
        &CaseWeights::unit(4),
    );
    let b = coerce_column(
        &[1.0.into(), 2.0.into(), CellValue::Null, 4.0.into()],
        &x,
        &CaseWeights::unit(4),
    );
    assert_eq!(listwise(&[&a, &b]), vec![0, 3]);
    assert!(listwise(&[]).is_empty());
}

#[test]
fn test_block_from_json_objects() {
    let rows = json!([
        {"age": 30, "city": "Oslo"},
        {"age": "41", "city": null},
        {"city": "Bergen"}
    ]);
    let variables = json!([
        {"columnIndex": 0, "name": "age", "type": "NUMERIC", "measure": "scale"},
        {"columnIndex": 1, "name": "city", "type": "STRING", "measure": "nominal"}
    ]);

    let block = DataBlock::from_json("dependent", &rows, &variables).unwrap();
    assert_eq!(block.ncases(), 3);
    assert_eq!(block.nvars(), 2);

    let (age, cells) = block.get("age").unwrap();
    assert_eq!(age.var_type, VariableType::Numeric);
    assert_eq!(cells[1], CellValue::text("41"));
    assert_eq!(cells[2], CellValue::Null);
    assert!(block.get("income").is_err());
}

#[test]
fn test_block_from_json_arrays() {
    let rows = json!([[1, "a"], [2, "b"]]);
    let variables = json!([{"columnIndex": 1, "name": "label", "type": "STRING"}]);
    let block = DataBlock::from_json("labels", &rows, &variables).unwrap();
    assert_eq!(block.column("label").unwrap()[1], CellValue::text("b"));
}

#[test]
fn test_block_parse_failure_names_block() {
    let err = DataBlock::from_json("dependent", &json!({"not": "rows"}), &json!([])).unwrap_err();
    assert_eq!(err.to_string(), "Failed to parse dependent data");

    let err = DataBlock::from_json("factor", &json!([[{"nested": 1}]]), &json!([
        {"columnIndex": 0, "name": "f"}
    ]))
    .unwrap_err();
    assert_eq!(err.to_string(), "Failed to parse factor data");
}

#[test]
fn test_block_rejects_duplicate_variables() {
    let variables = json!([
        {"columnIndex": 0, "name": "x"},
        {"columnIndex": 0, "name": "y"}
    ]);
    let err = DataBlock::from_json("covariate", &json!([]), &variables).unwrap_err();
    assert_eq!(err, DataError::DuplicateColumnIndex(0));
}

#[test]
fn test_block_all_null() {
    let block = DataBlockBuilder::new("target")
        .with_numeric("x", vec![None, None])
        .unwrap()
        .build();
    assert!(block.all_null());

    let block = DataBlockBuilder::new("target")
        .with_numeric("x", vec![None, Some(1.0)])
        .unwrap()
        .build();
    assert!(!block.all_null());
}

#[test]
fn test_block_all_null_after_coercion() {
    let user_missing = VariableBuilder::new("x")
        .missing(MissingSpec::discrete([9.0]))
        .build();
    let block = DataBlockBuilder::new("target")
        .with_column(user_missing.clone(), vec![CellValue::Number(9.0); 3])
        .unwrap()
        .build();
    assert!(block.all_null());

    let block = DataBlockBuilder::new("target")
        .with_column(user_missing, [CellValue::text("abc"), CellValue::Null, CellValue::Number(9.0)])
        .unwrap()
        .build();
    assert!(block.all_null());

    let block = DataBlockBuilder::new("target")
        .with_column(VariableBuilder::new("s").string().build(), [CellValue::text("abc")])
        .unwrap()
        .build();
    assert!(!block.all_null());
}

#[test]
fn test_builder_dimension_check() {
    let result = DataBlockBuilder::new("b")
        .with_numeric("x", vec![Some(1.0), Some(2.0)])
        .unwrap()
        .with_numeric("y", vec![Some(1.0)]);
    assert!(matches!(result, Err(DataError::DimensionMismatch { .. })));
}

#[test]
fn test_matrix_column_extraction() {
    let matrix = DataMatrix::new(vec![
        vec![1.0.into(), "a".into()],
        vec![2.0.into()],
    ]);
    let variables = vec![Variable::numeric(0, "x"), Variable::string(1, "s")];
    let block = DataBlock::from_matrix("data", &matrix, &variables).unwrap();
    assert_eq!(block.column("s").unwrap(), &[CellValue::text("a"), CellValue::Null]);
}

#[test]
fn test_variable_format_value() {
    let variable = VariableBuilder::new("sex")
        .value_label(1.0, "Male")
        .value_label(2.0, "Female")
        .build();
    assert_eq!(variable.format_value(1.0), "Male");
    assert_eq!(variable.format_value(3.0), "3");
    assert_eq!(variable.format_value(3.25), "3.25");
}

proptest! {
    #[test]
    fn prop_empty_string_numeric_always_missing(
        discrete in proptest::collection::vec(-100.0f64..100.0, 0..4),
        lo in -100.0f64..100.0,
        span in 0.0f64..50.0,
    ) {
        let spec = MissingSpec::range(lo, lo + span).with_discrete(discrete);
        prop_assert!(is_missing(&CellValue::text(""), Some(&spec), true));
        prop_assert!(!is_missing(&CellValue::text(""), Some(&spec), false));
    }

    #[test]
    fn prop_valid_n_matches_finite_values(values in proptest::collection::vec(proptest::option::of(-1e6f64..1e6), 0..50)) {
        let variable = Variable::numeric(0, "x");
        let cells: Vec<CellValue> = values.iter().map(|v| CellValue::from(*v)).collect();
        let column = coerce_column(&cells, &variable, &CaseWeights::unit(cells.len()));
        let expected = values.iter().filter(|v| v.is_some()).count();
        prop_assert_eq!(column.valid_n, expected);
        prop_assert_eq!(column.total_weight, expected as f64);
    }
}
