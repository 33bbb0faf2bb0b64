mod common;

use chrono::{Datelike, NaiveDate};
use color_eyre::Result;
use tablesight::chart_data::{compute_chart, ChartData, ChartMapping, ChartOptions, ChartType};
use tablesight::filter::{ChartView, FilterState, TimeFilter};
use tablesight::quality::{assess_quality, ColumnType, IssueType, Severity};
use tablesight::source::{load_path, LoadOptions};
use tablesight::timeseries::Grain;
use tablesight::transform::Pipeline;
use tablesight::value::Value;

#[test]
fn test_end_to_end_quality_group_and_bar() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = common::write_file(dir.path(), "sales.csv", &common::sales_csv(100));

    let raw = load_path(&path, &LoadOptions::default())?;
    assert_eq!(raw.len(), 100);
    assert_eq!(raw.columns, vec!["id", "category", "amount"]);
    assert!(raw.rows[0][2].is_null());

    let report = assess_quality(&raw);
    assert!(report.score <= 90, "score {}", report.score);
    let missing: Vec<_> = report
        .issues
        .iter()
        .filter(|i| i.issue_type == IssueType::MissingValues)
        .collect();
    assert_eq!(missing.len(), 1);
    assert_eq!(missing[0].severity, Severity::Medium);
    assert!(report.is_clean);

    let pipeline = Pipeline::from_json(
        r#"[{"type": "group_by", "columns": ["category"],
             "aggregations": [{"column": "amount", "op": "sum"}]}]"#,
    )?;
    let grouped = pipeline.apply(&raw);
    assert_eq!(grouped.columns, vec!["category", "amount_sum"]);
    let first_seen: Vec<String> = grouped
        .rows
        .iter()
        .map(|r| r[0].to_display_string())
        .collect();
    assert_eq!(first_seen, vec!["North", "South", "East", "West"]);

    let chart = compute_chart(
        &grouped,
        ChartType::Bar,
        &ChartMapping::new("category", "amount_sum"),
        Grain::default(),
        &ChartOptions::default(),
    )?;
    let ChartData::Bar(bar) = chart else {
        panic!("expected bar data");
    };
    let mut expected = common::expected_sums(100);
    expected.sort_by(|a, b| b.1.total_cmp(&a.1));
    let got: Vec<(&str, f64)> = bar
        .groups
        .iter()
        .map(|g| (g.label.as_str(), g.values[0]))
        .collect();
    assert_eq!(got, expected);
    Ok(())
}

#[test]
fn test_replay_is_deterministic() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = common::write_file(dir.path(), "sales.csv", &common::sales_csv(40));
    let raw = load_path(&path, &LoadOptions::default())?;

    let pipeline = Pipeline::from_json(
        r#"[
            {"type": "filter", "logic": "or", "conditions": [
                {"column": "category", "condition": "is", "value": "north"},
                {"column": "amount", "condition": "is_greater_than", "value": "30"}
            ]},
            {"type": "add_column", "name": "double", "formula": "[amount] * 2"},
            {"type": "sort", "column": "amount", "direction": "desc"},
            {"type": "transform_text", "column": "category", "case": "uppercase"}
        ]"#,
    )?;
    let a = pipeline.apply(&raw);
    let b = pipeline.apply(&raw);
    assert_eq!(a, b);
    assert!(!a.is_empty());

    // Rows with an empty amount sort last and carry the formula error.
    let last = a.rows.last().unwrap();
    assert!(last[2].is_null());
    assert_eq!(last[3], Value::from("Non-numeric value"));
    assert!(a
        .rows
        .iter()
        .all(|r| r[1] == Value::from("NORTH") || r[2].as_number().unwrap_or(0.0) > 30.0));
    Ok(())
}

#[test]
fn test_undo_redo_replays_from_raw() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = common::write_file(dir.path(), "sales.csv", &common::sales_csv(8));
    let raw = load_path(&path, &LoadOptions::default())?;

    let mut pipeline = Pipeline::from_json(
        r#"[{"type": "rename_column", "from": "amount", "to": "total"},
            {"type": "hide_columns", "columns": ["id"]}]"#,
    )?;
    assert_eq!(pipeline.apply(&raw).columns, vec!["category", "total"]);

    assert!(pipeline.undo());
    assert_eq!(pipeline.apply(&raw).columns, vec!["id", "category", "total"]);
    assert!(pipeline.redo());
    assert_eq!(pipeline.apply(&raw).columns, vec!["category", "total"]);
    assert_eq!(raw.columns, vec!["id", "category", "amount"]);
    Ok(())
}

#[test]
fn test_end_to_end_dated_scenario() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = common::write_file(dir.path(), "orders.csv", &common::dated_sales_csv(100));

    let raw = load_path(&path, &LoadOptions::default())?;
    assert_eq!(raw.columns, vec!["id", "category", "amount", "date"]);
    assert!(matches!(raw.rows[0][3], Value::Date(_)));

    let report = assess_quality(&raw);
    let types: Vec<ColumnType> = report.schema.iter().map(|c| c.column_type).collect();
    assert_eq!(
        types,
        vec![
            ColumnType::Numeric,
            ColumnType::Textual,
            ColumnType::Numeric,
            ColumnType::Temporal
        ]
    );

    let mut filters = FilterState::new();
    filters.allow("category", "West");
    filters.time = TimeFilter::custom(NaiveDate::from_ymd_opt(2024, 2, 1), None);
    let today = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
    let visible = filters.apply(&raw, Some("date"), today);
    let expected_rows = (0..100)
        .filter(|&i| common::category(i) == "West" && common::order_date(i).month() >= 2)
        .count();
    assert_eq!(visible.len(), expected_rows);
    assert_eq!(filters.apply(&visible, Some("date"), today), visible);

    let mut view = ChartView::new(ChartType::Line, ChartMapping::new("date", "amount"))
        .with_date_column("date");
    view.set_grain(Grain::Monthly);
    let ChartData::Temporal(line) = view.compute(&raw, &ChartOptions::default(), today)? else {
        panic!("expected temporal data");
    };
    assert!(line.is_date_axis);
    let labels: Vec<&str> = line.points.iter().map(|p| p.label.as_str()).collect();
    assert_eq!(labels, vec!["2024-01", "2024-02", "2024-03", "2024-04"]);
    let mut monthly = [0.0; 4];
    for i in 0..100 {
        let month = common::order_date(i).month() as usize;
        monthly[month - 1] += common::amount(i).unwrap_or(0) as f64;
    }
    let got: Vec<f64> = line.points.iter().map(|p| p.values[0].unwrap()).collect();
    assert_eq!(got, monthly.to_vec());
    Ok(())
}
