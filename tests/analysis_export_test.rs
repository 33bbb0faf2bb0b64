mod common;

use color_eyre::Result;
use tablesight::analysis::{
    build_sample, evaluate_kpi, validate_recommendations, AnalysisResult, SampleStrategy,
    Template,
};
use tablesight::chart_data::{ChartData, ChartType, PieData};
use tablesight::chart_export::{export_chart, ImageOptions};
use tablesight::export::export_csv;
use tablesight::filter::FilterState;
use tablesight::source::{load_path, LoadOptions};

#[test]
fn test_recommendations_are_revalidated() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = common::write_file(dir.path(), "sales.csv", &common::sales_csv(100));
    let ds = load_path(&path, &LoadOptions::default())?;

    let result = AnalysisResult::from_json(
        r#"{
            "summary": ["West leads on revenue"],
            "kpis": [
                {"label": "Revenue", "column": "amount", "operation": "sum", "format": "currency"},
                {"label": "Margin", "column": "margin", "operation": "average"}
            ],
            "charts": [
                {"title": "Revenue by region", "template": "ranked_comparison",
                 "mapping": {"x": "category", "y": "amount", "color": "segment"}},
                {"title": "Profit", "template": "part_to_whole",
                 "mapping": {"x": "category", "y": "profit"}}
            ]
        }"#,
    )?;
    let validated = validate_recommendations(result, &ds);

    assert_eq!(validated.summary, vec!["West leads on revenue"]);
    assert_eq!(validated.kpis.len(), 1);
    assert_eq!(validated.charts.len(), 1);
    let chart = &validated.charts[0];
    assert_eq!(chart.template, Template::RankedComparison);
    assert_eq!(chart.chart_type(), ChartType::Bar);
    assert_eq!(chart.mapping.color, None);

    let total: f64 = common::expected_sums(100).iter().map(|(_, s)| s).sum();
    let revenue = evaluate_kpi(&validated.kpis[0], &ds);
    assert_eq!(revenue.value, Some(total));
    assert_eq!(revenue.formatted, "$4,590.00");
    Ok(())
}

#[test]
fn test_unusable_recommendations_fall_back() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = common::write_file(dir.path(), "sales.csv", &common::sales_csv(12));
    let ds = load_path(&path, &LoadOptions::default())?;

    let validated = validate_recommendations(AnalysisResult::default(), &ds);
    assert_eq!(validated.kpis.len(), 1);
    assert_eq!(validated.kpis[0].label, "Total rows");
    assert_eq!(evaluate_kpi(&validated.kpis[0], &ds).value, Some(12.0));
    assert_eq!(validated.charts[0].mapping.x, "id");
    assert_eq!(validated.charts[0].mapping.y, "category");
    Ok(())
}

#[test]
fn test_sample_covers_head_middle_and_tail() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = common::write_file(dir.path(), "sales.csv", &common::sales_csv(1000));
    let ds = load_path(&path, &LoadOptions::default())?;

    let sample = build_sample(&ds, 50, 100_000);
    assert_eq!(sample.strategy, SampleStrategy::HeadMiddleTail);
    assert_eq!(sample.rows.len(), 150);
    assert_eq!(sample.total_rows, 1000);
    assert_eq!(sample.rows[0]["id"], serde_json::json!(0.0));
    assert_eq!(sample.rows[149]["id"], serde_json::json!(999.0));

    let small = build_sample(&ds, 50, 2_000);
    assert_eq!(small.strategy, SampleStrategy::HeadTail);
    assert!(small.json_chars <= 2_000);
    Ok(())
}

#[test]
fn test_export_visible_rows_to_csv() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = common::write_file(dir.path(), "sales.csv", &common::sales_csv(8));
    let ds = load_path(&path, &LoadOptions::default())?;

    let mut filters = FilterState::new();
    filters.allow("category", "South");
    let visible = filters.apply_now(&ds, None);

    let out = dir.path().join("visible.csv");
    export_csv(&visible, &out)?;
    let text = std::fs::read_to_string(&out)?;
    assert_eq!(
        text,
        "\"id\",\"category\",\"amount\"\n\"1\",\"South\",\"2\"\n\"5\",\"South\",\"6\"\n"
    );
    Ok(())
}

#[test]
fn test_chart_export_rejects_empty_and_unknown_extension() {
    let dir = tempfile::tempdir().unwrap();
    let empty = ChartData::Pie(PieData {
        slices: Vec::new(),
        total: 0.0,
    });
    let opts = ImageOptions::default();

    let err = export_chart(&dir.path().join("c.svg"), &empty, ChartType::Pie, None, &opts)
        .unwrap_err();
    assert!(err.to_string().contains("No data"), "{}", err);

    let err = export_chart(&dir.path().join("c.gif"), &empty, ChartType::Pie, None, &opts)
        .unwrap_err();
    assert!(err.to_string().contains("Unsupported"), "{}", err);
}
