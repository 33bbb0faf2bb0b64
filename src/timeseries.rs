//! Temporal bucketing for line and area charts, plus the zoom/pan window over the result.

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime};
use color_eyre::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::chart_data::{category_label, require_column, Accumulator, AggregationMode, ChartMapping};
use crate::transform::CellOrder;
use crate::value::{Dataset, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Grain {
    Daily,
    Weekly,
    #[default]
    Monthly,
    Quarterly,
    Yearly,
}

impl Grain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Grain::Daily => "daily",
            Grain::Weekly => "weekly",
            Grain::Monthly => "monthly",
            Grain::Quarterly => "quarterly",
            Grain::Yearly => "yearly",
        }
    }

    pub fn iterator() -> impl Iterator<Item = Grain> {
        [
            Grain::Daily,
            Grain::Weekly,
            Grain::Monthly,
            Grain::Quarterly,
            Grain::Yearly,
        ]
        .iter()
        .copied()
    }

    /// Start of the bucket containing `dt`. Weeks start on Monday.
    pub fn truncate(&self, dt: NaiveDateTime) -> NaiveDateTime {
        let d = dt.date();
        let start = match self {
            Grain::Daily => Some(d),
            Grain::Weekly => Some(d - Duration::days(d.weekday().num_days_from_monday() as i64)),
            Grain::Monthly => NaiveDate::from_ymd_opt(d.year(), d.month(), 1),
            Grain::Quarterly => {
                NaiveDate::from_ymd_opt(d.year(), (d.month() - 1) / 3 * 3 + 1, 1)
            }
            Grain::Yearly => NaiveDate::from_ymd_opt(d.year(), 1, 1),
        };
        start.unwrap_or(d).and_time(NaiveTime::MIN)
    }

    /// Axis label for a bucket start.
    pub fn label(&self, bucket: NaiveDateTime) -> String {
        match self {
            Grain::Daily | Grain::Weekly => bucket.format("%Y-%m-%d").to_string(),
            Grain::Monthly => bucket.format("%Y-%m").to_string(),
            Grain::Quarterly => format!("{}-Q{}", bucket.year(), (bucket.month() - 1) / 3 + 1),
            Grain::Yearly => bucket.format("%Y").to_string(),
        }
    }
}

/// Non-missing values inspected by [`is_date_like`].
const DATE_PROBE_VALUES: usize = 20;

/// A value is date-like when it parses as a date and is not a plain number.
pub fn value_is_date_like(v: &Value) -> bool {
    match v {
        Value::Date(_) => true,
        Value::String(s) => s.trim().parse::<f64>().is_err() && v.as_date().is_some(),
        _ => false,
    }
}

/// Whether a column should be bucketed by date: every one of its first few non-missing values
/// is date-like.
pub fn is_date_like(dataset: &Dataset, column: &str) -> bool {
    let Some(values) = dataset.column_values(column) else {
        return false;
    };
    let probe: Vec<&Value> = values
        .filter(|v| !v.is_missing())
        .take(DATE_PROBE_VALUES)
        .collect();
    !probe.is_empty() && probe.iter().all(|v| value_is_date_like(v))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TemporalPoint {
    pub label: String,
    /// Bucket start on a date axis; None on an ordinal axis.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bucket: Option<NaiveDateTime>,
    /// One value per entry of [`TemporalData::series`]; None where a series has no rows.
    pub values: Vec<Option<f64>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TemporalData {
    pub series: Vec<String>,
    pub points: Vec<TemporalPoint>,
    pub is_date_axis: bool,
    pub grain: Grain,
}

/// Buckets rows along x. A date-like x is truncated to the grain; anything else is an ordinal
/// category axis. Points come out in ascending bucket order.
pub fn temporal_series(
    dataset: &Dataset,
    mapping: &ChartMapping,
    grain: Grain,
) -> Result<TemporalData> {
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
    let is_date_axis = is_date_like(dataset, &mapping.x);

    let mut series: Vec<String> = match color_idx {
        Some(_) => Vec::new(),
        None => vec![mapping.y.clone()],
    };
    // (sort key, label, bucket, per-series accumulators)
    let mut buckets: Vec<(Value, String, Option<NaiveDateTime>, Vec<Option<Accumulator>>)> =
        Vec::new();
    let mut lookup: HashMap<String, usize> = HashMap::new();

    for row in &dataset.rows {
        let x = &row[x_idx];
        if x.is_missing() {
            continue;
        }
        let (key, label, bucket) = if is_date_axis {
            let Some(dt) = x.as_date() else { continue };
            let b = grain.truncate(dt);
            (Value::Date(b), grain.label(b), Some(b))
        } else {
            (x.clone(), category_label(x), None)
        };
        let s = match color_idx {
            Some(ci) => {
                let name = category_label(&row[ci]);
                match series.iter().position(|n| *n == name) {
                    Some(i) => i,
                    None => {
                        series.push(name);
                        series.len() - 1
                    }
                }
            }
            None => 0,
        };
        let slot = *lookup.entry(label.clone()).or_insert_with(|| {
            buckets.push((key, label, bucket, Vec::new()));
            buckets.len() - 1
        });
        let accs = &mut buckets[slot].3;
        if accs.len() <= s {
            accs.resize(s + 1, None);
        }
        accs[s]
            .get_or_insert_with(Accumulator::default)
            .push(y_idx.map(|i| &row[i]), mode);
    }

    let order = CellOrder::detect(buckets.iter().map(|b| &b.0));
    buckets.sort_by(|a, b| order.compare(&a.0, &b.0));
    let points = buckets
        .into_iter()
        .map(|(_, label, bucket, accs)| TemporalPoint {
            label,
            bucket,
            values: (0..series.len())
                .map(|s| accs.get(s).copied().flatten().map(|a| a.value(mode)))
                .collect(),
        })
        .collect();

    Ok(TemporalData {
        series,
        points,
        is_date_axis,
        grain,
    })
}

/// Share of the visible span removed or added per zoom tick.
const ZOOM_STEP: f64 = 0.10;

/// Visible index window over a series. `None` means the full series.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ZoomState {
    window: Option<(usize, usize)>,
}

impl ZoomState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_zoomed(&self) -> bool {
        self.window.is_some()
    }

    pub fn reset(&mut self) {
        self.window = None;
    }

    /// Inclusive (start, end) indices for a series of `len` points. None for an empty series.
    pub fn range(&self, len: usize) -> Option<(usize, usize)> {
        if len == 0 {
            return None;
        }
        let last = len - 1;
        Some(match self.window {
            Some((s, e)) if s <= e && e <= last => (s, e),
            _ => (0, last),
        })
    }

    pub fn visible<'a, T>(&self, points: &'a [T]) -> &'a [T] {
        match self.range(points.len()) {
            Some((s, e)) => &points[s..=e],
            None => points,
        }
    }

    fn step(span: usize) -> usize {
        ((span as f64 * ZOOM_STEP).ceil() as usize).max(1)
    }

    /// Narrows the window by one tick. `anchor` (0.0 to 1.0) is the cursor position within
    /// the window and decides how the cut splits between the two edges. A window never
    /// shrinks below two points.
    pub fn zoom_in(&mut self, len: usize, anchor: f64) {
        let Some((start, end)) = self.range(len) else {
            return;
        };
        let span = end - start;
        if span <= 1 {
            return;
        }
        let step = Self::step(span).min(span - 1);
        let anchor = anchor.clamp(0.0, 1.0);
        let left = (step as f64 * anchor).round() as usize;
        let right = step - left;
        self.window = Some((start + left, end - right));
    }

    /// Widens the window by one tick, returning to the full series once it covers it.
    pub fn zoom_out(&mut self, len: usize, anchor: f64) {
        let Some((start, end)) = self.range(len) else {
            return;
        };
        let last = len - 1;
        let step = Self::step(end - start);
        let new_span = (end - start + step).min(last);
        if new_span == last {
            self.window = None;
            return;
        }
        let left = (step as f64 * anchor.clamp(0.0, 1.0)).round() as isize;
        let new_start = (start as isize - left).clamp(0, (last - new_span) as isize) as usize;
        self.window = Some((new_start, new_start + new_span));
    }

    /// Shifts the window by `delta` points, keeping its width.
    pub fn pan(&mut self, len: usize, delta: isize) {
        let Some((start, end)) = self.window.and_then(|_| self.range(len)) else {
            return;
        };
        let width = end - start;
        let max_start = len - 1 - width;
        let new_start = (start as isize + delta).clamp(0, max_start as isize) as usize;
        self.window = Some((new_start, new_start + width));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dt(y: i32, m: u32, d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_time(NaiveTime::MIN)
    }

    #[test]
    fn test_grain_truncation() {
        let wed = dt(2024, 5, 15);
        assert_eq!(Grain::Daily.truncate(wed), wed);
        assert_eq!(Grain::Weekly.truncate(wed), dt(2024, 5, 13));
        assert_eq!(Grain::Monthly.truncate(wed), dt(2024, 5, 1));
        assert_eq!(Grain::Quarterly.truncate(wed), dt(2024, 4, 1));
        assert_eq!(Grain::Yearly.truncate(wed), dt(2024, 1, 1));
        assert_eq!(Grain::Quarterly.label(dt(2024, 4, 1)), "2024-Q2");
    }

    #[test]
    fn test_date_like_detection() {
        let dates = Dataset::from_rows(
            &["d"],
            vec![vec![Value::from("2024-01-02")], vec![Value::Null]],
        );
        assert!(is_date_like(&dates, "d"));
        let numbers = Dataset::from_rows(&["d"], vec![vec![Value::from("2024")]]);
        assert!(!is_date_like(&numbers, "d"));
        let empty = Dataset::from_rows(&["d"], vec![vec![Value::Null]]);
        assert!(!is_date_like(&empty, "d"));
    }

    #[test]
    fn test_monthly_sum_sorted() {
        let ds = Dataset::from_rows(
            &["when", "amount"],
            vec![
                vec![Value::from("2024-03-05"), Value::from(1)],
                vec![Value::from("2024-01-20"), Value::from(2)],
                vec![Value::from("2024-03-28"), Value::from(3)],
                vec![Value::from("not a date"), Value::from(100)],
            ],
        );
        let data = temporal_series(&ds, &ChartMapping::new("when", "amount"), Grain::Monthly);
        let data = data.unwrap();
        assert!(!data.is_date_axis);

        // Without the unparseable row the column is a date axis; rows 1 and 3 share March.
        let ds = Dataset::from_rows(ds.columns.as_slice(), ds.rows[..3].to_vec());
        let data = temporal_series(&ds, &ChartMapping::new("when", "amount"), Grain::Monthly)
            .unwrap();
        assert!(data.is_date_axis);
        let got: Vec<(&str, Option<f64>)> = data
            .points
            .iter()
            .map(|p| (p.label.as_str(), p.values[0]))
            .collect();
        assert_eq!(got, vec![("2024-01", Some(2.0)), ("2024-03", Some(4.0))]);
    }

    #[test]
    fn test_running_average_and_count() {
        let ds = Dataset::from_rows(
            &["when", "v"],
            vec![
                vec![Value::from(dt(2024, 1, 1)), Value::from(1)],
                vec![Value::from(dt(2024, 1, 2)), Value::from(2)],
                vec![Value::from(dt(2024, 1, 3)), Value::from(6)],
            ],
        );
        let avg = temporal_series(
            &ds,
            &ChartMapping::new("when", "v").with_aggregation(AggregationMode::Average),
            Grain::Yearly,
        )
        .unwrap();
        assert_eq!(avg.points[0].values, vec![Some(3.0)]);
        let count = temporal_series(
            &ds,
            &ChartMapping::new("when", "v").with_aggregation(AggregationMode::Count),
            Grain::Daily,
        )
        .unwrap();
        assert_eq!(count.points.len(), 3);
        assert!(count.points.iter().all(|p| p.values == vec![Some(1.0)]));
    }

    #[test]
    fn test_ordinal_axis_sorted_numerically() {
        let ds = Dataset::from_rows(
            &["x", "y"],
            vec![
                vec![Value::from(10), Value::from(1)],
                vec![Value::from(2), Value::from(1)],
            ],
        );
        let data = temporal_series(&ds, &ChartMapping::new("x", "y"), Grain::Daily).unwrap();
        let labels: Vec<&str> = data.points.iter().map(|p| p.label.as_str()).collect();
        assert_eq!(labels, vec!["2", "10"]);
    }

    #[test]
    fn test_zoom_in_floor_and_reset() {
        let mut z = ZoomState::new();
        assert_eq!(z.range(101), Some((0, 100)));
        z.zoom_in(101, 0.5);
        assert_eq!(z.range(101), Some((5, 95)));
        for _ in 0..200 {
            z.zoom_in(101, 0.5);
        }
        let (s, e) = z.range(101).unwrap();
        assert_eq!(e - s, 1);
        z.reset();
        assert!(!z.is_zoomed());
        assert_eq!(z.range(101), Some((0, 100)));
    }

    #[test]
    fn test_zoom_out_returns_to_full() {
        let mut z = ZoomState::new();
        z.zoom_in(11, 0.0);
        assert_eq!(z.range(11), Some((0, 9)));
        z.zoom_out(11, 1.0);
        assert!(!z.is_zoomed());
    }

    #[test]
    fn test_pan_keeps_width() {
        let mut z = ZoomState::new();
        z.pan(50, 5);
        assert!(!z.is_zoomed());
        z.zoom_in(50, 1.0);
        let (s, e) = z.range(50).unwrap();
        z.pan(50, -100);
        assert_eq!(z.range(50), Some((0, e - s)));
        z.pan(50, 100);
        assert_eq!(z.range(50), Some((49 - (e - s), 49)));
        let points: Vec<usize> = (0..50).collect();
        assert_eq!(z.visible(&points).len(), e - s + 1);
    }
}
