//! Chart-ready data from the visible rows: one aggregation algorithm per chart family.
//!
//! Bar charts group by the x value, pie charts collapse the long tail into "Other", scatter
//! and bubble charts downsample to a point cap, and line/area charts bucket dates by grain
//! (see [`crate::timeseries`]). Everything here is synchronous and pure.

use color_eyre::eyre::eyre;
use color_eyre::Result;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use crate::timeseries::{temporal_series, Grain, TemporalData};
use crate::value::{natural_cmp, Dataset, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChartType {
    Bar,
    StackedBar,
    Line,
    Area,
    Pie,
    Scatter,
    Bubble,
}

impl ChartType {
    pub fn as_str(self) -> &'static str {
        match self {
            ChartType::Bar => "bar",
            ChartType::StackedBar => "stacked_bar",
            ChartType::Line => "line",
            ChartType::Area => "area",
            ChartType::Pie => "pie",
            ChartType::Scatter => "scatter",
            ChartType::Bubble => "bubble",
        }
    }

    pub fn is_temporal(self) -> bool {
        matches!(self, ChartType::Line | ChartType::Area)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregationMode {
    #[default]
    Sum,
    Average,
    Count,
    /// Plot values as-is. Bucketed charts still need one number per bucket and fall back to sum.
    None,
}

/// Column-to-channel binding for one chart.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChartMapping {
    pub x: String,
    pub y: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub z: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregation: Option<AggregationMode>,
}

impl ChartMapping {
    pub fn new(x: impl Into<String>, y: impl Into<String>) -> Self {
        Self {
            x: x.into(),
            y: y.into(),
            ..Self::default()
        }
    }

    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.color = Some(color.into());
        self
    }

    pub fn with_z(mut self, z: impl Into<String>) -> Self {
        self.z = Some(z.into());
        self
    }

    pub fn with_aggregation(mut self, aggregation: AggregationMode) -> Self {
        self.aggregation = Some(aggregation);
        self
    }

    pub fn aggregation_mode(&self) -> AggregationMode {
        self.aggregation.unwrap_or_default()
    }
}

/// Caps and thresholds. Overridable from the `[chart]` config section.
#[derive(Debug, Clone)]
pub struct ChartOptions {
    pub pie_max_slices: usize,
    pub pie_label_min_percent: f64,
    pub scatter_max_points: usize,
    pub filter_sample_rows: usize,
    pub filter_max_distinct: usize,
    pub filter_max_columns: usize,
}

impl Default for ChartOptions {
    fn default() -> Self {
        Self {
            pie_max_slices: 8,
            pie_label_min_percent: 3.0,
            scatter_max_points: 800,
            filter_sample_rows: 500,
            filter_max_distinct: 25,
            filter_max_columns: 4,
        }
    }
}

/// Running sum, count and incremental mean.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Accumulator {
    pub sum: f64,
    pub count: usize,
    pub mean: f64,
}

impl Accumulator {
    pub fn add(&mut self, v: f64) {
        self.sum += v;
        self.count += 1;
        self.mean += (v - self.mean) / self.count as f64;
    }

    /// Counts a row without a numeric contribution.
    pub fn tally(&mut self) {
        self.count += 1;
    }

    pub fn value(&self, mode: AggregationMode) -> f64 {
        match mode {
            AggregationMode::Sum | AggregationMode::None => self.sum,
            AggregationMode::Average => self.mean,
            AggregationMode::Count => self.count as f64,
        }
    }

    /// Feeds one cell according to the aggregation mode. Count takes every row; the other
    /// modes only take numeric cells.
    pub fn push(&mut self, cell: Option<&Value>, mode: AggregationMode) {
        match mode {
            AggregationMode::Count => self.tally(),
            _ => {
                if let Some(n) = cell.and_then(Value::as_number) {
                    self.add(n);
                }
            }
        }
    }
}

/// Label used for a missing category value.
pub const BLANK_LABEL: &str = "(blank)";

pub(crate) fn category_label(v: &Value) -> String {
    if v.is_missing() {
        BLANK_LABEL.to_string()
    } else {
        v.to_display_string()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BarGroup {
    pub label: String,
    /// One value per entry of [`BarData::series`].
    pub values: Vec<f64>,
    pub total: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BarData {
    pub series: Vec<String>,
    pub groups: Vec<BarGroup>,
    /// Category axis width in pixels, sized to the longest label.
    pub axis_width: u32,
}

const AXIS_CHAR_WIDTH: usize = 6;
const AXIS_MIN_WIDTH: usize = 80;
const AXIS_MAX_WIDTH: usize = 200;

pub fn axis_width(labels: &[String]) -> u32 {
    let longest = labels.iter().map(|l| l.chars().count()).max().unwrap_or(0);
    (longest * AXIS_CHAR_WIDTH).clamp(AXIS_MIN_WIDTH, AXIS_MAX_WIDTH) as u32
}

/// Groups by the x value. With a color column each distinct color becomes a series.
/// Groups are ordered by descending total; ties keep first-seen order.
pub fn bar_data(dataset: &Dataset, mapping: &ChartMapping) -> Result<BarData> {
    let mode = mapping.aggregation_mode();
    let x_idx = require_column(dataset, &mapping.x)?;
    let y_idx = if mode == AggregationMode::Count {
        dataset.column_index(&mapping.y)
    } else {
        Some(require_column(dataset, &mapping.y)?)
    };
    let color_idx = match &mapping.color {
        Some(c) => Some(require_column(dataset, c)?),
        None => None,
    };

    let mut series: Vec<String> = Vec::new();
    let mut series_lookup: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<(String, Vec<Accumulator>)> = Vec::new();
    let mut group_lookup: HashMap<String, usize> = HashMap::new();

    if color_idx.is_none() {
        series.push(mapping.y.clone());
    }

    for row in &dataset.rows {
        let label = category_label(&row[x_idx]);
        let s = match color_idx {
            Some(ci) => {
                let name = category_label(&row[ci]);
                match series_lookup.get(&name) {
                    Some(&i) => i,
                    None => {
                        series.push(name.clone());
                        series_lookup.insert(name, series.len() - 1);
                        series.len() - 1
                    }
                }
            }
            None => 0,
        };
        let g = *group_lookup.entry(label.clone()).or_insert_with(|| {
            groups.push((label, Vec::new()));
            groups.len() - 1
        });
        let accs = &mut groups[g].1;
        if accs.len() <= s {
            accs.resize(s + 1, Accumulator::default());
        }
        accs[s].push(y_idx.map(|i| &row[i]), mode);
    }

    let mut out: Vec<BarGroup> = groups
        .into_iter()
        .map(|(label, accs)| {
            let values: Vec<f64> = (0..series.len())
                .map(|s| accs.get(s).map(|a| a.value(mode)).unwrap_or(0.0))
                .collect();
            let total = values.iter().sum();
            BarGroup {
                label,
                values,
                total,
            }
        })
        .collect();
    out.sort_by(|a, b| b.total.partial_cmp(&a.total).unwrap_or(std::cmp::Ordering::Equal));

    let labels: Vec<String> = out.iter().map(|g| g.label.clone()).collect();
    Ok(BarData {
        series,
        groups: out,
        axis_width: axis_width(&labels),
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PieSlice {
    pub label: String,
    pub value: f64,
    pub percent: f64,
    /// False for slices too thin to carry a readable label.
    pub show_label: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PieData {
    pub slices: Vec<PieSlice>,
    pub total: f64,
}

pub const OTHER_LABEL: &str = "Other";

/// Groups by x and sums (or counts) y, largest first. More than `pie_max_slices` groups
/// collapse into the top `pie_max_slices - 1` plus one "Other" slice.
pub fn pie_data(dataset: &Dataset, mapping: &ChartMapping, options: &ChartOptions) -> Result<PieData> {
    let mode = match mapping.aggregation_mode() {
        AggregationMode::Count => AggregationMode::Count,
        _ => AggregationMode::Sum,
    };
    let single = ChartMapping {
        color: None,
        aggregation: Some(mode),
        ..mapping.clone()
    };
    let bars = bar_data(dataset, &single)?;
    let mut pairs: Vec<(String, f64)> = bars
        .groups
        .into_iter()
        .map(|g| (g.label, g.total))
        .collect();

    let max = options.pie_max_slices.max(2);
    if pairs.len() > max {
        let rest: f64 = pairs[max - 1..].iter().map(|(_, v)| v).sum();
        pairs.truncate(max - 1);
        pairs.push((OTHER_LABEL.to_string(), rest));
    }

    let total: f64 = pairs.iter().map(|(_, v)| v).sum();
    let slices = pairs
        .into_iter()
        .map(|(label, value)| {
            let percent = if total != 0.0 {
                value / total * 100.0
            } else {
                0.0
            };
            PieSlice {
                label,
                value,
                percent,
                show_label: percent >= options.pie_label_min_percent,
            }
        })
        .collect();
    Ok(PieData { slices, total })
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScatterPoint {
    pub x: f64,
    pub y: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub z: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScatterSeries {
    pub name: String,
    pub points: Vec<ScatterPoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScatterData {
    pub series: Vec<ScatterSeries>,
    /// Valid points before downsampling.
    pub total_points: usize,
    pub stride: usize,
}

/// Coerces x/y (and z) to numbers and drops rows where x or y fail. Above the point cap,
/// every `ceil(n / cap)`-th point is kept. A color column splits the points into series in
/// alphabetical order.
pub fn scatter_data(
    dataset: &Dataset,
    mapping: &ChartMapping,
    options: &ChartOptions,
) -> Result<ScatterData> {
    let x_idx = require_column(dataset, &mapping.x)?;
    let y_idx = require_column(dataset, &mapping.y)?;
    let z_idx = mapping.z.as_deref().and_then(|z| dataset.column_index(z));
    let color_idx = mapping.color.as_deref().and_then(|c| dataset.column_index(c));

    let valid: Vec<(ScatterPoint, Option<String>)> = dataset
        .rows
        .iter()
        .filter_map(|row| {
            let x = row[x_idx].as_number()?;
            let y = row[y_idx].as_number()?;
            let z = z_idx.and_then(|i| row[i].as_number());
            let color = color_idx.map(|i| category_label(&row[i]));
            Some((ScatterPoint { x, y, z }, color))
        })
        .collect();

    let total_points = valid.len();
    let stride = downsample_stride(total_points, options.scatter_max_points);
    let kept = valid.into_iter().step_by(stride);

    let series = if color_idx.is_some() {
        let mut by_color: BTreeMap<String, Vec<ScatterPoint>> = BTreeMap::new();
        for (p, color) in kept {
            by_color.entry(color.unwrap_or_default()).or_default().push(p);
        }
        by_color
            .into_iter()
            .map(|(name, points)| ScatterSeries { name, points })
            .collect()
    } else {
        vec![ScatterSeries {
            name: mapping.y.clone(),
            points: kept.map(|(p, _)| p).collect(),
        }]
    };

    Ok(ScatterData {
        series,
        total_points,
        stride,
    })
}

pub fn downsample_stride(n: usize, max_points: usize) -> usize {
    if max_points == 0 || n <= max_points {
        1
    } else {
        n.div_ceil(max_points)
    }
}

/// A low-cardinality column offered as a categorical filter.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilterableColumn {
    pub name: String,
    pub values: Vec<String>,
}

/// Columns worth offering as chip filters: more than one and at most `filter_max_distinct`
/// distinct values in the first `filter_sample_rows` rows. `exclude` holds the y column and
/// the date column.
pub fn filterable_columns(
    dataset: &Dataset,
    exclude: &[&str],
    options: &ChartOptions,
) -> Vec<FilterableColumn> {
    let sample = &dataset.rows[..dataset.len().min(options.filter_sample_rows)];
    let mut out = Vec::new();
    for (idx, name) in dataset.columns.iter().enumerate() {
        if out.len() >= options.filter_max_columns {
            break;
        }
        if exclude.contains(&name.as_str()) {
            continue;
        }
        let mut distinct: HashSet<String> = HashSet::new();
        let mut too_many = false;
        for row in sample {
            if distinct.insert(row[idx].to_display_string())
                && distinct.len() > options.filter_max_distinct
            {
                too_many = true;
                break;
            }
        }
        if too_many || distinct.len() <= 1 {
            continue;
        }
        let mut values: Vec<String> = dataset
            .rows
            .iter()
            .map(|row| row[idx].to_display_string())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        values.sort_by(|a, b| natural_cmp(a, b));
        out.push(FilterableColumn {
            name: name.clone(),
            values,
        });
    }
    out
}

/// Computed series for any chart family.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChartData {
    Bar(BarData),
    Temporal(TemporalData),
    Pie(PieData),
    Scatter(ScatterData),
}

impl ChartData {
    pub fn is_empty(&self) -> bool {
        match self {
            ChartData::Bar(b) => b.groups.is_empty(),
            ChartData::Temporal(t) => t.points.is_empty(),
            ChartData::Pie(p) => p.slices.is_empty(),
            ChartData::Scatter(s) => s.series.iter().all(|s| s.points.is_empty()),
        }
    }
}

/// Dispatches to the algorithm for the chart family.
pub fn compute_chart(
    dataset: &Dataset,
    chart_type: ChartType,
    mapping: &ChartMapping,
    grain: Grain,
    options: &ChartOptions,
) -> Result<ChartData> {
    Ok(match chart_type {
        ChartType::Bar => ChartData::Bar(bar_data(dataset, mapping)?),
        ChartType::StackedBar => ChartData::Bar(bar_data(dataset, mapping)?),
        ChartType::Line | ChartType::Area => {
            ChartData::Temporal(temporal_series(dataset, mapping, grain)?)
        }
        ChartType::Pie => ChartData::Pie(pie_data(dataset, mapping, options)?),
        ChartType::Scatter => ChartData::Scatter(scatter_data(
            dataset,
            &ChartMapping {
                z: None,
                ..mapping.clone()
            },
            options,
        )?),
        ChartType::Bubble => ChartData::Scatter(scatter_data(dataset, mapping, options)?),
    })
}

pub(crate) fn require_column(dataset: &Dataset, name: &str) -> Result<usize> {
    dataset
        .column_index(name)
        .ok_or_else(|| eyre!("Column '{}' not found", name))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sales() -> Dataset {
        Dataset::from_rows(
            &["region", "product", "revenue"],
            vec![
                vec![Value::from("North"), Value::from("A"), Value::from(10)],
                vec![Value::from("South"), Value::from("A"), Value::from(30)],
                vec![Value::from("North"), Value::from("B"), Value::from(5)],
                vec![Value::from("East"), Value::from("B"), Value::from(40)],
                vec![Value::from("South"), Value::from("B"), Value::from("n/a")],
            ],
        )
    }

    #[test]
    fn test_bar_single_series_descending() {
        let bars = bar_data(&sales(), &ChartMapping::new("region", "revenue")).unwrap();
        let got: Vec<(&str, f64)> = bars
            .groups
            .iter()
            .map(|g| (g.label.as_str(), g.total))
            .collect();
        assert_eq!(got, vec![("East", 40.0), ("South", 30.0), ("North", 15.0)]);
        assert_eq!(bars.series, vec!["revenue"]);
        assert_eq!(bars.axis_width, 80);
    }

    #[test]
    fn test_bar_color_series_by_total() {
        let bars = bar_data(
            &sales(),
            &ChartMapping::new("region", "revenue").with_color("product"),
        )
        .unwrap();
        assert_eq!(bars.series, vec!["A", "B"]);
        assert_eq!(bars.groups[0].label, "East");
        assert_eq!(bars.groups[0].values, vec![0.0, 40.0]);
        assert_eq!(bars.groups[2].label, "North");
        assert_eq!(bars.groups[2].values, vec![10.0, 5.0]);
    }

    #[test]
    fn test_bar_count_and_average() {
        let count = bar_data(
            &sales(),
            &ChartMapping::new("region", "revenue").with_aggregation(AggregationMode::Count),
        )
        .unwrap();
        assert_eq!(count.groups[0].label, "North");
        assert_eq!(count.groups[0].total, 2.0);

        let avg = bar_data(
            &sales(),
            &ChartMapping::new("region", "revenue").with_aggregation(AggregationMode::Average),
        )
        .unwrap();
        let north = avg.groups.iter().find(|g| g.label == "North").unwrap();
        assert_eq!(north.total, 7.5);
    }

    #[test]
    fn test_axis_width_clamped() {
        assert_eq!(axis_width(&["ab".to_string()]), 80);
        assert_eq!(axis_width(&["x".repeat(20)]), 120);
        assert_eq!(axis_width(&["x".repeat(100)]), 200);
    }

    #[test]
    fn test_pie_other_collapsing() {
        let rows = (0..10)
            .map(|i| vec![Value::from(format!("c{}", i)), Value::from(100 - i)])
            .collect();
        let ds = Dataset::from_rows(&["cat", "v"], rows);
        let pie = pie_data(&ds, &ChartMapping::new("cat", "v"), &ChartOptions::default()).unwrap();
        assert_eq!(pie.slices.len(), 8);
        assert_eq!(pie.slices[0].label, "c0");
        assert_eq!(pie.slices[7].label, OTHER_LABEL);
        assert_eq!(pie.slices[7].value, 93.0 + 92.0 + 91.0);
        assert_eq!(pie.total, (91..=100).sum::<i32>() as f64);
    }

    #[test]
    fn test_pie_small_slices_hide_labels() {
        let ds = Dataset::from_rows(
            &["cat", "v"],
            vec![
                vec![Value::from("big"), Value::from(98)],
                vec![Value::from("tiny"), Value::from(2)],
            ],
        );
        let pie = pie_data(&ds, &ChartMapping::new("cat", "v"), &ChartOptions::default()).unwrap();
        assert!(pie.slices[0].show_label);
        assert!(!pie.slices[1].show_label);
    }

    #[test]
    fn test_scatter_downsampling_keeps_order() {
        let rows = (0..2400)
            .map(|i| vec![Value::from(i), Value::from(i * 2)])
            .collect();
        let ds = Dataset::from_rows(&["x", "y"], rows);
        let data = scatter_data(&ds, &ChartMapping::new("x", "y"), &ChartOptions::default()).unwrap();
        assert_eq!(data.stride, 3);
        assert_eq!(data.total_points, 2400);
        let pts = &data.series[0].points;
        assert_eq!(pts.len(), 800);
        assert!(pts.windows(2).all(|w| w[0].x < w[1].x));
        assert_eq!(pts[1].x, 3.0);
    }

    #[test]
    fn test_scatter_color_series_alphabetical_and_drops_invalid() {
        let ds = Dataset::from_rows(
            &["x", "y", "g"],
            vec![
                vec![Value::from(1), Value::from(1), Value::from("zeta")],
                vec![Value::from("bad"), Value::from(2), Value::from("alpha")],
                vec![Value::from(3), Value::from(3), Value::from("alpha")],
            ],
        );
        let data = scatter_data(
            &ds,
            &ChartMapping::new("x", "y").with_color("g"),
            &ChartOptions::default(),
        )
        .unwrap();
        let names: Vec<&str> = data.series.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
        assert_eq!(data.total_points, 2);
    }

    #[test]
    fn test_filterable_columns() {
        let rows = (0..40)
            .map(|i| {
                vec![
                    Value::from(format!("id{}", i)),
                    Value::from(if i % 2 == 0 { "even" } else { "odd" }),
                    Value::from("same"),
                    Value::from(i),
                ]
            })
            .collect();
        let ds = Dataset::from_rows(&["id", "parity", "constant", "value"], rows);
        let cols = filterable_columns(&ds, &["value"], &ChartOptions::default());
        assert_eq!(cols.len(), 1);
        assert_eq!(cols[0].name, "parity");
        assert_eq!(cols[0].values, vec!["even", "odd"]);
    }

    #[test]
    fn test_filterable_values_scan_all_rows() {
        let rows = (0..40_000)
            .map(|i| {
                let tag = if i < 500 {
                    if i % 2 == 0 { "a".to_string() } else { "b".to_string() }
                } else {
                    format!("v{}", i)
                };
                vec![Value::from(tag), Value::from(i)]
            })
            .collect();
        let ds = Dataset::from_rows(&["tag", "value"], rows);
        let cols = filterable_columns(&ds, &["value"], &ChartOptions::default());
        assert_eq!(cols.len(), 1);
        let values = &cols[0].values;
        assert_eq!(values.len(), 2 + 39_500);
        assert_eq!(&values[..3], &["a", "b", "v500"]);
        assert_eq!(values.last().map(String::as_str), Some("v39999"));
    }

    #[test]
    fn test_missing_column_is_error() {
        assert!(bar_data(&sales(), &ChartMapping::new("nope", "revenue")).is_err());
    }
}
