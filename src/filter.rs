//! Per-chart interactive filters: categorical value sets, a time window and the grain.
//!
//! Filter state belongs to one chart view and is thrown away when that chart's mapping
//! changes. Evaluation is a pure function of (rows, state).

use chrono::{Datelike, Duration, Local, NaiveDate};
use color_eyre::eyre::eyre;
use color_eyre::Result;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::chart_data::{
    compute_chart, filterable_columns, ChartData, ChartMapping, ChartOptions, ChartType,
    FilterableColumn,
};
use crate::timeseries::{Grain, ZoomState};
use crate::value::Dataset;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeWindow {
    #[default]
    All,
    #[serde(rename = "7d")]
    Last7Days,
    #[serde(rename = "30d")]
    Last30Days,
    #[serde(rename = "90d")]
    Last90Days,
    Ytd,
    Custom,
}

impl TimeWindow {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeWindow::All => "all",
            TimeWindow::Last7Days => "7d",
            TimeWindow::Last30Days => "30d",
            TimeWindow::Last90Days => "90d",
            TimeWindow::Ytd => "ytd",
            TimeWindow::Custom => "custom",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TimeFilter {
    pub window: TimeWindow,
    /// Inclusive; only used by `Custom`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<NaiveDate>,
    /// Inclusive; only used by `Custom`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<NaiveDate>,
}

impl TimeFilter {
    pub fn preset(window: TimeWindow) -> Self {
        Self {
            window,
            start: None,
            end: None,
        }
    }

    pub fn custom(start: Option<NaiveDate>, end: Option<NaiveDate>) -> Self {
        Self {
            window: TimeWindow::Custom,
            start,
            end,
        }
    }

    pub fn is_active(&self) -> bool {
        self.window != TimeWindow::All
    }

    /// Inclusive (lower, upper) date bounds relative to `today`. None when inactive.
    pub fn bounds(&self, today: NaiveDate) -> Option<(Option<NaiveDate>, Option<NaiveDate>)> {
        match self.window {
            TimeWindow::All => None,
            TimeWindow::Last7Days => Some((Some(today - Duration::days(7)), None)),
            TimeWindow::Last30Days => Some((Some(today - Duration::days(30)), None)),
            TimeWindow::Last90Days => Some((Some(today - Duration::days(90)), None)),
            TimeWindow::Ytd => Some((NaiveDate::from_ymd_opt(today.year(), 1, 1), None)),
            TimeWindow::Custom => Some((self.start, self.end)),
        }
    }
}

/// Filter state of one chart.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FilterState {
    /// Column -> allowed display values. Empty sets impose no constraint.
    pub categorical: BTreeMap<String, BTreeSet<String>>,
    pub time: TimeFilter,
    pub grain: Grain,
}

impl FilterState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or removes one allowed value.
    pub fn toggle_value(&mut self, column: &str, value: &str) {
        let set = self.categorical.entry(column.to_string()).or_default();
        if !set.remove(value) {
            set.insert(value.to_string());
        }
    }

    pub fn allow(&mut self, column: &str, value: &str) {
        self.categorical
            .entry(column.to_string())
            .or_default()
            .insert(value.to_string());
    }

    pub fn clear_column(&mut self, column: &str) {
        self.categorical.remove(column);
    }

    /// Clears categorical and time filters. The grain is kept.
    pub fn clear(&mut self) {
        self.categorical.clear();
        self.time = TimeFilter::default();
    }

    pub fn is_active(&self) -> bool {
        self.time.is_active() || self.categorical.values().any(|s| !s.is_empty())
    }

    /// Rows passing every active filter. The time filter needs a date column; without one it
    /// imposes no constraint. Rows whose date does not parse fail any active time filter.
    pub fn apply(&self, dataset: &Dataset, date_column: Option<&str>, today: NaiveDate) -> Dataset {
        let categorical: Vec<(usize, &BTreeSet<String>)> = self
            .categorical
            .iter()
            .filter(|(_, set)| !set.is_empty())
            .filter_map(|(col, set)| dataset.column_index(col).map(|i| (i, set)))
            .collect();
        let time = match (self.time.bounds(today), date_column.and_then(|c| dataset.column_index(c))) {
            (Some(bounds), Some(idx)) => Some((idx, bounds)),
            _ => None,
        };
        if categorical.is_empty() && time.is_none() {
            return dataset.clone();
        }
        dataset.filter_rows(|row| {
            let categorical_ok = categorical
                .iter()
                .all(|(i, set)| set.contains(&row.values[*i].to_display_string()));
            if !categorical_ok {
                return false;
            }
            match time {
                None => true,
                Some((idx, (lower, upper))) => match row.values[idx].as_date() {
                    Some(dt) => {
                        let d = dt.date();
                        lower.map_or(true, |l| d >= l) && upper.map_or(true, |u| d <= u)
                    }
                    None => false,
                },
            }
        })
    }

    /// [`FilterState::apply`] relative to the local date.
    pub fn apply_now(&self, dataset: &Dataset, date_column: Option<&str>) -> Dataset {
        self.apply(dataset, date_column, Local::now().date_naive())
    }
}

/// One chart: its mapping, filters and zoom window.
#[derive(Debug, Clone, PartialEq)]
pub struct ChartView {
    chart_type: ChartType,
    mapping: ChartMapping,
    date_column: Option<String>,
    pub filters: FilterState,
    pub zoom: ZoomState,
}

impl ChartView {
    pub fn new(chart_type: ChartType, mapping: ChartMapping) -> Self {
        Self {
            chart_type,
            mapping,
            date_column: None,
            filters: FilterState::new(),
            zoom: ZoomState::new(),
        }
    }

    pub fn with_date_column(mut self, column: impl Into<String>) -> Self {
        self.date_column = Some(column.into());
        self
    }

    pub fn chart_type(&self) -> ChartType {
        self.chart_type
    }

    pub fn mapping(&self) -> &ChartMapping {
        &self.mapping
    }

    pub fn date_column(&self) -> Option<&str> {
        self.date_column.as_deref()
    }

    /// Replaces the mapping. A different mapping resets filters and zoom.
    pub fn set_mapping(&mut self, mapping: ChartMapping) {
        if mapping != self.mapping {
            self.mapping = mapping;
            self.filters = FilterState::new();
            self.zoom.reset();
        }
    }

    pub fn set_chart_type(&mut self, chart_type: ChartType) {
        if chart_type != self.chart_type {
            self.chart_type = chart_type;
            self.zoom.reset();
        }
    }

    pub fn set_grain(&mut self, grain: Grain) {
        if grain != self.filters.grain {
            self.filters.grain = grain;
            self.zoom.reset();
        }
    }

    /// Categorical filter candidates, excluding the y column and the date column.
    pub fn filterable_columns(
        &self,
        dataset: &Dataset,
        options: &ChartOptions,
    ) -> Vec<FilterableColumn> {
        let mut exclude = vec![self.mapping.y.as_str()];
        if let Some(d) = self.date_column.as_deref() {
            exclude.push(d);
        }
        filterable_columns(dataset, &exclude, options)
    }

    pub fn visible_rows(&self, dataset: &Dataset, today: NaiveDate) -> Dataset {
        self.filters.apply(dataset, self.date_column.as_deref(), today)
    }

    /// Filters, aggregates, and for temporal charts applies the zoom window.
    pub fn compute(
        &self,
        dataset: &Dataset,
        options: &ChartOptions,
        today: NaiveDate,
    ) -> Result<ChartData> {
        if self.mapping.x.is_empty() {
            return Err(eyre!("Chart has no x column"));
        }
        let rows = self.visible_rows(dataset, today);
        let data = compute_chart(
            &rows,
            self.chart_type,
            &self.mapping,
            self.filters.grain,
            options,
        )?;
        Ok(match data {
            ChartData::Temporal(mut t) => {
                t.points = self.zoom.visible(&t.points).to_vec();
                ChartData::Temporal(t)
            }
            other => other,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn orders() -> Dataset {
        Dataset::from_rows(
            &["region", "date", "amount"],
            vec![
                vec![Value::from("North"), Value::from("2024-06-01"), Value::from(1)],
                vec![Value::from("South"), Value::from("2024-05-20"), Value::from(2)],
                vec![Value::from("North"), Value::from("2024-01-10"), Value::from(3)],
                vec![Value::from("East"), Value::Null, Value::from(4)],
            ],
        )
    }

    const TODAY: (i32, u32, u32) = (2024, 6, 3);

    fn today() -> NaiveDate {
        day(TODAY.0, TODAY.1, TODAY.2)
    }

    #[test]
    fn test_categorical_sets() {
        let mut f = FilterState::new();
        f.allow("region", "North");
        let out = f.apply(&orders(), Some("date"), today());
        assert_eq!(out.len(), 2);
        f.toggle_value("region", "North");
        assert!(!f.is_active());
        assert_eq!(f.apply(&orders(), Some("date"), today()).len(), 4);
    }

    #[test]
    fn test_categorical_filter_idempotent() {
        let mut f = FilterState::new();
        f.allow("region", "North");
        f.allow("region", "East");
        let once = f.apply(&orders(), Some("date"), today());
        let twice = f.apply(&once, Some("date"), today());
        assert_eq!(once.len(), 3);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_time_presets() {
        let mut f = FilterState::new();
        f.time = TimeFilter::preset(TimeWindow::Last7Days);
        assert_eq!(f.apply(&orders(), Some("date"), today()).len(), 1);
        f.time = TimeFilter::preset(TimeWindow::Last30Days);
        assert_eq!(f.apply(&orders(), Some("date"), today()).len(), 2);
        f.time = TimeFilter::preset(TimeWindow::Ytd);
        assert_eq!(f.apply(&orders(), Some("date"), today()).len(), 3);
        f.time = TimeFilter::preset(TimeWindow::All);
        assert_eq!(f.apply(&orders(), Some("date"), today()).len(), 4);
    }

    #[test]
    fn test_custom_range_inclusive() {
        let mut f = FilterState::new();
        f.time = TimeFilter::custom(Some(day(2024, 1, 10)), Some(day(2024, 5, 20)));
        let out = f.apply(&orders(), Some("date"), today());
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn test_time_filter_without_date_column_is_noop() {
        let mut f = FilterState::new();
        f.time = TimeFilter::preset(TimeWindow::Last7Days);
        assert_eq!(f.apply(&orders(), None, today()).len(), 4);
    }

    #[test]
    fn test_filters_combine_and_clear() {
        let mut f = FilterState::new();
        f.allow("region", "North");
        f.time = TimeFilter::preset(TimeWindow::Last30Days);
        assert_eq!(f.apply(&orders(), Some("date"), today()).len(), 1);
        f.clear();
        assert_eq!(f.apply(&orders(), Some("date"), today()), orders());
    }

    #[test]
    fn test_mapping_change_resets_state() {
        let mut view = ChartView::new(ChartType::Bar, ChartMapping::new("region", "amount"))
            .with_date_column("date");
        view.filters.allow("region", "North");
        view.set_mapping(ChartMapping::new("region", "amount"));
        assert!(view.filters.is_active());
        view.set_mapping(ChartMapping::new("date", "amount"));
        assert!(!view.filters.is_active());
    }

    #[test]
    fn test_view_compute_applies_filters() {
        let mut view = ChartView::new(ChartType::Bar, ChartMapping::new("region", "amount"));
        view.filters.allow("region", "North");
        let data = view
            .compute(&orders(), &ChartOptions::default(), today())
            .unwrap();
        match data {
            ChartData::Bar(b) => {
                assert_eq!(b.groups.len(), 1);
                assert_eq!(b.groups[0].total, 4.0);
            }
            other => panic!("unexpected chart data: {:?}", other),
        }
    }

    #[test]
    fn test_view_filterable_columns_exclude_y_and_date() {
        let view = ChartView::new(ChartType::Bar, ChartMapping::new("region", "amount"))
            .with_date_column("date");
        let cols = view.filterable_columns(&orders(), &ChartOptions::default());
        let names: Vec<&str> = cols.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["region"]);
    }
}
