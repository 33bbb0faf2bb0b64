//! Dashboard suggestions: the row sample handed to the analysis service, and validation of
//! what comes back.
//!
//! The service itself is external. It receives [`AnalysisSample::rows`] and answers with an
//! [`AnalysisResult`] (summary bullets, KPIs and chart recommendations). Nothing it returns is
//! trusted: every column reference is checked against the dataset before use, and a
//! deterministic fallback fills in when nothing usable survives.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, warn};

use crate::chart_data::{AggregationMode, ChartMapping, ChartType};
use crate::value::{format_number, Dataset};

/// Rows taken from each of head, middle and tail.
pub const SAMPLE_ROWS_PER_PART: usize = 50;
/// Upper bound on the serialized sample.
pub const SAMPLE_CHAR_BUDGET: usize = 100_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleStrategy {
    /// The dataset was small enough to send whole.
    Full,
    HeadMiddleTail,
    /// Resampled after exceeding the character budget.
    HeadTail,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisSample {
    pub columns: Vec<String>,
    pub rows: Vec<serde_json::Value>,
    pub strategy: SampleStrategy,
    pub total_rows: usize,
    pub json_chars: usize,
}

/// Builds a representative sample: head, middle and tail. While the JSON exceeds
/// `char_budget`, the sample is rebuilt from head and tail only with half as many rows.
pub fn build_sample(dataset: &Dataset, per_part: usize, char_budget: usize) -> AnalysisSample {
    let n = dataset.len();
    let per_part = per_part.max(1);
    let (mut indices, mut strategy) = if n <= per_part * 3 {
        ((0..n).collect::<Vec<_>>(), SampleStrategy::Full)
    } else {
        let mid_start = n / 2 - per_part / 2;
        let mut idx: Vec<usize> = (0..per_part).collect();
        idx.extend(mid_start..mid_start + per_part);
        idx.extend(n - per_part..n);
        (idx, SampleStrategy::HeadMiddleTail)
    };

    let mut take = per_part;
    loop {
        let rows = rows_json(dataset, &indices);
        let json_chars = serde_json::to_string(&rows).map(|s| s.len()).unwrap_or(0);
        if json_chars <= char_budget || indices.len() <= 2 {
            debug!(
                rows = rows.len(),
                json_chars,
                ?strategy,
                "built analysis sample"
            );
            return AnalysisSample {
                columns: dataset.columns.clone(),
                rows,
                strategy,
                total_rows: n,
                json_chars,
            };
        }
        take = (take / 2).max(1);
        let head = take.min(n);
        let tail_start = n.saturating_sub(take).max(head);
        indices = (0..head).chain(tail_start..n).collect();
        strategy = SampleStrategy::HeadTail;
    }
}

fn rows_json(dataset: &Dataset, indices: &[usize]) -> Vec<serde_json::Value> {
    indices
        .iter()
        .filter_map(|&i| dataset.row(i))
        .filter_map(|r| serde_json::to_value(r).ok())
        .collect()
}

/// Chart archetypes the analysis service picks from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Template {
    RankedComparison,
    Composition,
    TrendOverTime,
    VolumeOverTime,
    PartToWhole,
    Correlation,
    BubbleComparison,
}

impl Template {
    pub fn chart_type(&self) -> ChartType {
        match self {
            Template::RankedComparison => ChartType::Bar,
            Template::Composition => ChartType::StackedBar,
            Template::TrendOverTime => ChartType::Line,
            Template::VolumeOverTime => ChartType::Area,
            Template::PartToWhole => ChartType::Pie,
            Template::Correlation => ChartType::Scatter,
            Template::BubbleComparison => ChartType::Bubble,
        }
    }

    pub fn default_aggregation(&self) -> AggregationMode {
        match self {
            Template::VolumeOverTime => AggregationMode::Count,
            Template::Correlation | Template::BubbleComparison => AggregationMode::None,
            _ => AggregationMode::Sum,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KpiOperation {
    Sum,
    Average,
    Count,
    Min,
    Max,
    CountDistinct,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KpiFormat {
    #[default]
    Number,
    Currency,
    Percent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendPolarity {
    #[default]
    HigherIsBetter,
    LowerIsBetter,
    Neutral,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Kpi {
    pub label: String,
    pub column: String,
    pub operation: KpiOperation,
    #[serde(default)]
    pub format: KpiFormat,
    #[serde(default)]
    pub polarity: TrendPolarity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartRecommendation {
    pub title: String,
    pub template: Template,
    pub mapping: ChartMapping,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ChartRecommendation {
    pub fn chart_type(&self) -> ChartType {
        self.template.chart_type()
    }

    /// The mapping with the template's default aggregation filled in.
    pub fn resolved_mapping(&self) -> ChartMapping {
        let mut mapping = self.mapping.clone();
        if mapping.aggregation.is_none() {
            mapping.aggregation = Some(self.template.default_aggregation());
        }
        mapping
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    #[serde(default)]
    pub summary: Vec<String>,
    #[serde(default)]
    pub kpis: Vec<Kpi>,
    #[serde(default)]
    pub charts: Vec<ChartRecommendation>,
}

impl AnalysisResult {
    pub fn from_json(json: &str) -> color_eyre::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Drops KPIs and charts that reference unknown columns. A chart with valid x and y but an
/// invalid color or size column keeps its place with that channel removed. When nothing
/// usable is left, a row-count KPI and a bar chart over the first two columns stand in.
pub fn validate_recommendations(result: AnalysisResult, dataset: &Dataset) -> AnalysisResult {
    let known: HashSet<&str> = dataset.columns.iter().map(|c| c.as_str()).collect();

    let mut kpis: Vec<Kpi> = result
        .kpis
        .into_iter()
        .filter(|k| {
            let ok = known.contains(k.column.as_str());
            if !ok {
                warn!(kpi = %k.label, column = %k.column, "dropping KPI with unknown column");
            }
            ok
        })
        .collect();

    let mut charts: Vec<ChartRecommendation> = result
        .charts
        .into_iter()
        .filter_map(|mut c| {
            if !known.contains(c.mapping.x.as_str()) || !known.contains(c.mapping.y.as_str()) {
                warn!(chart = %c.title, x = %c.mapping.x, y = %c.mapping.y, "dropping chart with unknown column");
                return None;
            }
            if c.mapping.color.as_deref().is_some_and(|col| !known.contains(col)) {
                debug!(chart = %c.title, "dropping unknown color column");
                c.mapping.color = None;
            }
            if c.mapping.z.as_deref().is_some_and(|col| !known.contains(col)) {
                debug!(chart = %c.title, "dropping unknown size column");
                c.mapping.z = None;
            }
            Some(c)
        })
        .collect();

    if kpis.is_empty() {
        if let Some(kpi) = fallback_kpi(dataset) {
            kpis.push(kpi);
        }
    }
    if charts.is_empty() {
        if let Some(chart) = fallback_chart(dataset) {
            charts.push(chart);
        }
    }

    AnalysisResult {
        summary: result.summary,
        kpis,
        charts,
    }
}

pub fn fallback_kpi(dataset: &Dataset) -> Option<Kpi> {
    dataset.columns.first().map(|c| Kpi {
        label: "Total rows".to_string(),
        column: c.clone(),
        operation: KpiOperation::Count,
        format: KpiFormat::Number,
        polarity: TrendPolarity::Neutral,
    })
}

/// Bar chart of the second column by the first. A single-column dataset gets a count of each
/// value instead.
pub fn fallback_chart(dataset: &Dataset) -> Option<ChartRecommendation> {
    let x = dataset.columns.first()?;
    let (y, aggregation) = match dataset.columns.get(1) {
        Some(y) => (y.clone(), AggregationMode::Sum),
        None => (x.clone(), AggregationMode::Count),
    };
    Some(ChartRecommendation {
        title: format!("{} by {}", y, x),
        template: Template::RankedComparison,
        mapping: ChartMapping::new(x.clone(), y).with_aggregation(aggregation),
        description: None,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KpiValue {
    pub label: String,
    pub value: Option<f64>,
    pub formatted: String,
}

/// Evaluates a KPI over the visible rows. `Count` is the number of rows, `CountDistinct`
/// the number of distinct non-empty values; the other operations use numeric cells only and
/// yield None when there are none.
pub fn evaluate_kpi(kpi: &Kpi, dataset: &Dataset) -> KpiValue {
    let value = match dataset.column_values(&kpi.column) {
        None => None,
        Some(values) => match kpi.operation {
            KpiOperation::Count => Some(dataset.len() as f64),
            KpiOperation::CountDistinct => {
                let distinct: HashSet<String> = values
                    .filter(|v| !v.is_missing())
                    .map(|v| v.to_display_string())
                    .collect();
                Some(distinct.len() as f64)
            }
            op => {
                let nums: Vec<f64> = values.filter_map(|v| v.as_number()).collect();
                if nums.is_empty() {
                    None
                } else {
                    Some(match op {
                        KpiOperation::Sum => nums.iter().sum(),
                        KpiOperation::Average => nums.iter().sum::<f64>() / nums.len() as f64,
                        KpiOperation::Min => nums.iter().copied().fold(f64::INFINITY, f64::min),
                        KpiOperation::Max => {
                            nums.iter().copied().fold(f64::NEG_INFINITY, f64::max)
                        }
                        KpiOperation::Count | KpiOperation::CountDistinct => nums.len() as f64,
                    })
                }
            }
        },
    };
    KpiValue {
        label: kpi.label.clone(),
        value,
        formatted: value
            .map(|v| format_kpi(v, kpi.format))
            .unwrap_or_else(|| "-".to_string()),
    }
}

pub fn format_kpi(value: f64, format: KpiFormat) -> String {
    match format {
        KpiFormat::Number => with_thousands(&format_number((value * 100.0).round() / 100.0)),
        KpiFormat::Currency => {
            let sign = if value < 0.0 { "-" } else { "" };
            format!("{}${}", sign, with_thousands(&format!("{:.2}", value.abs())))
        }
        KpiFormat::Percent => format!("{:.1}%", value),
    }
}

/// Inserts `,` every three digits of the integer part.
fn with_thousands(s: &str) -> String {
    let (sign, rest) = match s.strip_prefix('-') {
        Some(r) => ("-", r),
        None => ("", s),
    };
    let (int_part, frac) = match rest.find('.') {
        Some(i) => (&rest[..i], &rest[i..]),
        None => (rest, ""),
    };
    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (i, c) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }
    format!("{}{}{}", sign, grouped, frac)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    fn numbered(n: usize) -> Dataset {
        Dataset::from_rows(
            &["id", "note"],
            (0..n)
                .map(|i| vec![Value::from(i as f64), Value::from("x".repeat(40))])
                .collect(),
        )
    }

    #[test]
    fn test_small_dataset_is_sent_whole() {
        let s = build_sample(&numbered(120), SAMPLE_ROWS_PER_PART, SAMPLE_CHAR_BUDGET);
        assert_eq!(s.strategy, SampleStrategy::Full);
        assert_eq!(s.rows.len(), 120);
    }

    #[test]
    fn test_head_middle_tail() {
        let s = build_sample(&numbered(1000), SAMPLE_ROWS_PER_PART, SAMPLE_CHAR_BUDGET);
        assert_eq!(s.strategy, SampleStrategy::HeadMiddleTail);
        assert_eq!(s.rows.len(), 150);
        assert_eq!(s.rows[0]["id"], serde_json::json!(0.0));
        assert_eq!(s.rows[50]["id"], serde_json::json!(475.0));
        assert_eq!(s.rows[149]["id"], serde_json::json!(999.0));
    }

    #[test]
    fn test_budget_forces_head_tail() {
        let s = build_sample(&numbered(1000), SAMPLE_ROWS_PER_PART, 2_000);
        assert_eq!(s.strategy, SampleStrategy::HeadTail);
        assert!(s.json_chars <= 2_000);
        assert_eq!(s.rows.first().unwrap()["id"], serde_json::json!(0.0));
        assert_eq!(s.rows.last().unwrap()["id"], serde_json::json!(999.0));
    }

    fn dataset() -> Dataset {
        Dataset::from_rows(
            &["region", "revenue"],
            vec![
                vec![Value::from("North"), Value::from(1200.5)],
                vec![Value::from("South"), Value::from(300)],
                vec![Value::from("North"), Value::Null],
            ],
        )
    }

    #[test]
    fn test_validation_drops_unknown_references() {
        let json = r#"{
            "summary": ["Revenue is concentrated in the North"],
            "kpis": [
                {"label": "Revenue", "column": "revenue", "operation": "sum", "format": "currency"},
                {"label": "Profit", "column": "profit", "operation": "sum"}
            ],
            "charts": [
                {"title": "By region", "template": "ranked_comparison",
                 "mapping": {"x": "region", "y": "revenue", "color": "segment"}},
                {"title": "Bad", "template": "trend_over_time",
                 "mapping": {"x": "date", "y": "revenue"}}
            ]
        }"#;
        let result = validate_recommendations(AnalysisResult::from_json(json).unwrap(), &dataset());
        assert_eq!(result.kpis.len(), 1);
        assert_eq!(result.kpis[0].column, "revenue");
        assert_eq!(result.charts.len(), 1);
        assert_eq!(result.charts[0].mapping.color, None);
        assert_eq!(result.charts[0].chart_type(), ChartType::Bar);
        assert_eq!(
            result.charts[0].resolved_mapping().aggregation,
            Some(AggregationMode::Sum)
        );
    }

    #[test]
    fn test_fallbacks_when_nothing_survives() {
        let result = validate_recommendations(AnalysisResult::default(), &dataset());
        assert_eq!(result.kpis.len(), 1);
        assert_eq!(result.kpis[0].operation, KpiOperation::Count);
        assert_eq!(evaluate_kpi(&result.kpis[0], &dataset()).value, Some(3.0));
        assert_eq!(result.charts.len(), 1);
        assert_eq!(result.charts[0].mapping.x, "region");
        assert_eq!(result.charts[0].mapping.y, "revenue");
    }

    #[test]
    fn test_kpi_evaluation_and_format() {
        let ds = dataset();
        let kpi = |op, format| Kpi {
            label: "k".into(),
            column: "revenue".into(),
            operation: op,
            format,
            polarity: TrendPolarity::HigherIsBetter,
        };
        assert_eq!(
            evaluate_kpi(&kpi(KpiOperation::Sum, KpiFormat::Currency), &ds).formatted,
            "$1,500.50"
        );
        assert_eq!(
            evaluate_kpi(&kpi(KpiOperation::Max, KpiFormat::Number), &ds).value,
            Some(1200.5)
        );
        let distinct = Kpi {
            column: "region".into(),
            ..kpi(KpiOperation::CountDistinct, KpiFormat::Number)
        };
        assert_eq!(evaluate_kpi(&distinct, &ds).value, Some(2.0));
        assert_eq!(format_kpi(1234567.0, KpiFormat::Number), "1,234,567");
        assert_eq!(format_kpi(12.345, KpiFormat::Percent), "12.3%");
    }
}
