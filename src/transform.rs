//! The transformation engine: an ordered list of steps folded over a dataset.
//!
//! Every step is a pure function `Dataset -> Dataset`. Steps that cannot apply (missing
//! column, empty payload) pass the dataset through unchanged. The list itself is the durable
//! description of the working dataset and is replayed in full on every change.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::time::Instant;
use tracing::{debug, warn};

use crate::formula::Formula;
use crate::value::{natural_cmp, Dataset, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterCondition {
    Contains,
    DoesNotContain,
    Is,
    IsNot,
    StartsWith,
    EndsWith,
    IsEmpty,
    IsNotEmpty,
    IsGreaterThan,
    IsLessThan,
    IsEqualTo,
    IsNotEqualTo,
}

impl FilterCondition {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterCondition::Contains => "contains",
            FilterCondition::DoesNotContain => "does not contain",
            FilterCondition::Is => "is",
            FilterCondition::IsNot => "is not",
            FilterCondition::StartsWith => "starts with",
            FilterCondition::EndsWith => "ends with",
            FilterCondition::IsEmpty => "is empty",
            FilterCondition::IsNotEmpty => "is not empty",
            FilterCondition::IsGreaterThan => ">",
            FilterCondition::IsLessThan => "<",
            FilterCondition::IsEqualTo => "=",
            FilterCondition::IsNotEqualTo => "!=",
        }
    }

    pub fn iterator() -> impl Iterator<Item = FilterCondition> {
        [
            FilterCondition::Contains,
            FilterCondition::DoesNotContain,
            FilterCondition::Is,
            FilterCondition::IsNot,
            FilterCondition::StartsWith,
            FilterCondition::EndsWith,
            FilterCondition::IsEmpty,
            FilterCondition::IsNotEmpty,
            FilterCondition::IsGreaterThan,
            FilterCondition::IsLessThan,
            FilterCondition::IsEqualTo,
            FilterCondition::IsNotEqualTo,
        ]
        .iter()
        .copied()
    }

    /// Conditions that ignore the clause value.
    pub fn is_unary(&self) -> bool {
        matches!(self, FilterCondition::IsEmpty | FilterCondition::IsNotEmpty)
    }

    fn matches(&self, cell: &Value, value: &str) -> bool {
        match self {
            FilterCondition::IsEmpty => is_blank(cell),
            FilterCondition::IsNotEmpty => !is_blank(cell),
            FilterCondition::IsGreaterThan => {
                compare_numeric(cell, value).is_some_and(|o| o == Ordering::Greater)
            }
            FilterCondition::IsLessThan => {
                compare_numeric(cell, value).is_some_and(|o| o == Ordering::Less)
            }
            FilterCondition::IsEqualTo => {
                compare_numeric(cell, value).is_some_and(|o| o == Ordering::Equal)
            }
            FilterCondition::IsNotEqualTo => {
                compare_numeric(cell, value).map_or(true, |o| o != Ordering::Equal)
            }
            _ => {
                let haystack = cell.to_display_string().to_lowercase();
                let needle = value.to_lowercase();
                match self {
                    FilterCondition::Contains => haystack.contains(&needle),
                    FilterCondition::DoesNotContain => !haystack.contains(&needle),
                    FilterCondition::Is => haystack == needle,
                    FilterCondition::IsNot => haystack != needle,
                    FilterCondition::StartsWith => haystack.starts_with(&needle),
                    FilterCondition::EndsWith => haystack.ends_with(&needle),
                    _ => false,
                }
            }
        }
    }
}

fn is_blank(cell: &Value) -> bool {
    match cell {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

fn compare_numeric(cell: &Value, value: &str) -> Option<Ordering> {
    let a = cell.as_number()?;
    let b = value.trim().parse::<f64>().ok().filter(|n| n.is_finite())?;
    a.partial_cmp(&b)
}

#[derive(Debug, Clone, PartialEq, Eq, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogicalOperator {
    #[default]
    And,
    Or,
}

impl LogicalOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogicalOperator::And => "AND",
            LogicalOperator::Or => "OR",
        }
    }

    pub fn iterator() -> impl Iterator<Item = LogicalOperator> {
        [LogicalOperator::And, LogicalOperator::Or].iter().copied()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterClause {
    pub column: String,
    pub condition: FilterCondition,
    #[serde(default)]
    pub value: String,
}

impl FilterClause {
    pub fn new(column: impl Into<String>, condition: FilterCondition, value: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            condition,
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextCase {
    Uppercase,
    Lowercase,
    Titlecase,
}

impl TextCase {
    pub fn apply(&self, s: &str) -> String {
        match self {
            TextCase::Uppercase => s.to_uppercase(),
            TextCase::Lowercase => s.to_lowercase(),
            TextCase::Titlecase => title_case(s),
        }
    }
}

fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut at_word_start = true;
    for c in s.chars() {
        if c.is_whitespace() {
            at_word_start = true;
            out.push(c);
        } else if at_word_start {
            out.extend(c.to_uppercase());
            at_word_start = false;
        } else {
            out.extend(c.to_lowercase());
        }
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateOp {
    Sum,
    Average,
    Count,
    Min,
    Max,
}

impl AggregateOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregateOp::Sum => "sum",
            AggregateOp::Average => "average",
            AggregateOp::Count => "count",
            AggregateOp::Min => "min",
            AggregateOp::Max => "max",
        }
    }

    /// Folds the numeric values of one group. `Count` is the number of numeric values;
    /// every other op over zero numeric values is null.
    pub fn reduce(&self, values: &[f64]) -> Value {
        if let AggregateOp::Count = self {
            return Value::Number(values.len() as f64);
        }
        if values.is_empty() {
            return Value::Null;
        }
        let v = match self {
            AggregateOp::Sum => values.iter().sum(),
            AggregateOp::Average => values.iter().sum::<f64>() / values.len() as f64,
            AggregateOp::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
            AggregateOp::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            AggregateOp::Count => values.len() as f64,
        };
        Value::Number(v)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aggregation {
    pub column: String,
    pub op: AggregateOp,
    /// Output column name; defaults to `<column>_<op>`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

impl Aggregation {
    pub fn new(column: impl Into<String>, op: AggregateOp) -> Self {
        Self {
            column: column.into(),
            op,
            alias: None,
        }
    }

    pub fn output_name(&self) -> String {
        match &self.alias {
            Some(a) if !a.is_empty() => a.clone(),
            _ => format!("{}_{}", self.column, self.op.as_str()),
        }
    }
}

/// Separator for composite group keys.
const GROUP_KEY_DELIMITER: &str = "||";

/// One pipeline step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Transformation {
    Sort {
        column: String,
        #[serde(default)]
        direction: SortDirection,
    },
    Filter {
        #[serde(default)]
        logic: LogicalOperator,
        #[serde(default)]
        conditions: Vec<FilterClause>,
    },
    AddColumn {
        name: String,
        formula: String,
    },
    RenameColumn {
        from: String,
        to: String,
    },
    TransformText {
        column: String,
        case: TextCase,
    },
    GroupBy {
        columns: Vec<String>,
        #[serde(default)]
        aggregations: Vec<Aggregation>,
    },
    HideColumns {
        columns: Vec<String>,
    },
}

impl Transformation {
    /// Short human-readable label for listings.
    pub fn describe(&self) -> String {
        match self {
            Transformation::Sort { column, direction } => {
                let dir = match direction {
                    SortDirection::Asc => "ascending",
                    SortDirection::Desc => "descending",
                };
                format!("Sort by {} ({})", column, dir)
            }
            Transformation::Filter { logic, conditions } => {
                let parts: Vec<String> = conditions
                    .iter()
                    .map(|c| {
                        if c.condition.is_unary() {
                            format!("{} {}", c.column, c.condition.as_str())
                        } else {
                            format!("{} {} \"{}\"", c.column, c.condition.as_str(), c.value)
                        }
                    })
                    .collect();
                format!("Filter: {}", parts.join(&format!(" {} ", logic.as_str())))
            }
            Transformation::AddColumn { name, formula } => format!("Add {} = {}", name, formula),
            Transformation::RenameColumn { from, to } => format!("Rename {} to {}", from, to),
            Transformation::TransformText { column, case } => {
                format!("{:?} {}", case, column)
            }
            Transformation::GroupBy {
                columns,
                aggregations,
            } => {
                let aggs: Vec<String> = aggregations.iter().map(|a| a.output_name()).collect();
                format!("Group by {} ({})", columns.join(", "), aggs.join(", "))
            }
            Transformation::HideColumns { columns } => format!("Hide {}", columns.join(", ")),
        }
    }

    /// Applies this step. Returns the input unchanged when the step cannot apply.
    pub fn apply(&self, dataset: &Dataset) -> Dataset {
        match self {
            Transformation::Sort { column, direction } => sort(dataset, column, *direction),
            Transformation::Filter { logic, conditions } => filter(dataset, *logic, conditions),
            Transformation::AddColumn { name, formula } => add_column(dataset, name, formula),
            Transformation::RenameColumn { from, to } => rename_column(dataset, from, to),
            Transformation::TransformText { column, case } => {
                transform_text(dataset, column, *case)
            }
            Transformation::GroupBy {
                columns,
                aggregations,
            } => group_by(dataset, columns, aggregations),
            Transformation::HideColumns { columns } => hide_columns(dataset, columns),
        }
    }
}

/// Folds all steps over `raw`. Deterministic: the same inputs always give identical rows.
pub fn apply_transformations(raw: &Dataset, steps: &[Transformation]) -> Dataset {
    let start = Instant::now();
    let mut current = raw.clone();
    for step in steps {
        current = step.apply(&current);
    }
    debug!(
        steps = steps.len(),
        rows_in = raw.len(),
        rows_out = current.len(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "applied transformations"
    );
    current
}

fn skipped(step: &str, reason: &str, dataset: &Dataset) -> Dataset {
    warn!(step, reason, "skipping transformation");
    dataset.clone()
}

fn sort(dataset: &Dataset, column: &str, direction: SortDirection) -> Dataset {
    let Some(idx) = dataset.column_index(column) else {
        return skipped("sort", "column not found", dataset);
    };
    let order = CellOrder::detect(dataset.rows.iter().map(|r| &r[idx]));
    let mut rows = dataset.rows.clone();
    rows.sort_by(|a, b| {
        let (x, y) = (&a[idx], &b[idx]);
        match (sorts_as_missing(x), sorts_as_missing(y)) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) => {
                let ord = order.compare_present(x, y);
                match direction {
                    SortDirection::Asc => ord,
                    SortDirection::Desc => ord.reverse(),
                }
            }
        }
    });
    Dataset {
        columns: dataset.columns.clone(),
        rows,
    }
}

/// Null, empty and non-finite cells have no position in an ordering and always go last.
pub fn sorts_as_missing(v: &Value) -> bool {
    match v {
        Value::Number(n) => !n.is_finite(),
        other => other.is_missing(),
    }
}

/// How the cells of one column compare. Chosen once per column so that every pair of cells
/// is compared the same way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellOrder {
    /// Every present cell coerces to a finite number.
    Numeric,
    /// Every present cell is a date.
    Temporal,
    /// Natural order of the display strings.
    Natural,
}

impl CellOrder {
    pub fn detect<'a>(cells: impl IntoIterator<Item = &'a Value>) -> Self {
        let (mut numeric, mut temporal) = (true, true);
        for v in cells.into_iter().filter(|v| !sorts_as_missing(v)) {
            numeric &= v.as_number().is_some();
            temporal &= matches!(v, Value::Date(_));
            if !numeric && !temporal {
                break;
            }
        }
        if numeric {
            CellOrder::Numeric
        } else if temporal {
            CellOrder::Temporal
        } else {
            CellOrder::Natural
        }
    }

    /// Ascending order with missing cells last.
    pub fn compare(self, a: &Value, b: &Value) -> Ordering {
        match (sorts_as_missing(a), sorts_as_missing(b)) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) => self.compare_present(a, b),
        }
    }

    /// Ascending order of two present cells of the column this order was detected from.
    pub fn compare_present(self, a: &Value, b: &Value) -> Ordering {
        match (self, a, b) {
            (CellOrder::Numeric, _, _) => match (a.as_number(), b.as_number()) {
                (Some(x), Some(y)) => x.total_cmp(&y),
                _ => natural_cmp(&a.to_display_string(), &b.to_display_string()),
            },
            (CellOrder::Temporal, Value::Date(x), Value::Date(y)) => x.cmp(y),
            _ => natural_cmp(&a.to_display_string(), &b.to_display_string()),
        }
    }
}

fn filter(dataset: &Dataset, logic: LogicalOperator, clauses: &[FilterClause]) -> Dataset {
    if clauses.is_empty() {
        return dataset.clone();
    }
    let resolved: Vec<(usize, &FilterClause)> = clauses
        .iter()
        .filter_map(|c| dataset.column_index(&c.column).map(|i| (i, c)))
        .collect();
    if resolved.len() != clauses.len() {
        return skipped("filter", "column not found", dataset);
    }
    dataset.filter_rows(|row| {
        let mut results = resolved
            .iter()
            .map(|(i, c)| c.condition.matches(&row.values[*i], &c.value));
        match logic {
            LogicalOperator::And => results.all(|r| r),
            LogicalOperator::Or => results.any(|r| r),
        }
    })
}

fn add_column(dataset: &Dataset, name: &str, formula: &str) -> Dataset {
    let name = name.trim();
    if name.is_empty() || formula.trim().is_empty() {
        return skipped("add_column", "empty name or formula", dataset);
    }
    let formula = Formula::parse(formula);
    let computed: Vec<Value> = dataset
        .iter()
        .map(|row| match formula.evaluate(&row) {
            Ok(n) => Value::Number(n),
            Err(e) => Value::String(e.to_string()),
        })
        .collect();

    let mut out = dataset.clone();
    match out.column_index(name) {
        Some(idx) => {
            for (row, v) in out.rows.iter_mut().zip(computed) {
                row[idx] = v;
            }
        }
        None => {
            out.columns.push(name.to_string());
            for (row, v) in out.rows.iter_mut().zip(computed) {
                row.push(v);
            }
        }
    }
    out
}

fn rename_column(dataset: &Dataset, from: &str, to: &str) -> Dataset {
    let to = to.trim();
    if from == to || to.is_empty() {
        return dataset.clone();
    }
    let Some(idx) = dataset.column_index(from) else {
        return dataset.clone();
    };
    if dataset.has_column(to) {
        return skipped("rename_column", "target name already exists", dataset);
    }
    let mut out = dataset.clone();
    out.columns[idx] = to.to_string();
    out
}

fn transform_text(dataset: &Dataset, column: &str, case: TextCase) -> Dataset {
    let Some(idx) = dataset.column_index(column) else {
        return skipped("transform_text", "column not found", dataset);
    };
    let mut out = dataset.clone();
    for row in out.rows.iter_mut() {
        if let Value::String(s) = &row[idx] {
            row[idx] = Value::String(case.apply(s));
        }
    }
    out
}

fn group_by(dataset: &Dataset, columns: &[String], aggregations: &[Aggregation]) -> Dataset {
    if columns.is_empty() {
        return skipped("group_by", "no group columns", dataset);
    }
    let Some(group_idx) = columns
        .iter()
        .map(|c| dataset.column_index(c))
        .collect::<Option<Vec<usize>>>()
    else {
        return skipped("group_by", "column not found", dataset);
    };
    let aggs: Vec<(usize, &Aggregation)> = aggregations
        .iter()
        .filter_map(|a| match dataset.column_index(&a.column) {
            Some(i) => Some((i, a)),
            None => {
                warn!(column = %a.column, "dropping aggregation over unknown column");
                None
            }
        })
        .collect();

    // First-seen group order; index lookup by key.
    let mut order: Vec<(Vec<Value>, Vec<Vec<f64>>)> = Vec::new();
    let mut lookup: std::collections::HashMap<String, usize> = std::collections::HashMap::new();
    for row in &dataset.rows {
        let key = group_idx
            .iter()
            .map(|&i| row[i].to_display_string())
            .collect::<Vec<_>>()
            .join(GROUP_KEY_DELIMITER);
        let slot = *lookup.entry(key).or_insert_with(|| {
            order.push((
                group_idx.iter().map(|&i| row[i].clone()).collect(),
                vec![Vec::new(); aggs.len()],
            ));
            order.len() - 1
        });
        for (k, (src, _)) in aggs.iter().enumerate() {
            if let Some(n) = row[*src].as_number() {
                order[slot].1[k].push(n);
            }
        }
    }

    let mut out_columns: Vec<String> = columns.to_vec();
    out_columns.extend(aggs.iter().map(|(_, a)| a.output_name()));
    let rows = order
        .into_iter()
        .map(|(mut keys, values)| {
            keys.extend(
                aggs.iter()
                    .zip(values.iter())
                    .map(|((_, a), vals)| a.op.reduce(vals)),
            );
            keys
        })
        .collect();
    Dataset::new(out_columns, rows)
}

fn hide_columns(dataset: &Dataset, columns: &[String]) -> Dataset {
    let keep: Vec<usize> = (0..dataset.column_count())
        .filter(|&i| !columns.contains(&dataset.columns[i]))
        .collect();
    if keep.len() == dataset.column_count() {
        return dataset.clone();
    }
    Dataset {
        columns: keep.iter().map(|&i| dataset.columns[i].clone()).collect(),
        rows: dataset
            .rows
            .iter()
            .map(|r| keep.iter().map(|&i| r[i].clone()).collect())
            .collect(),
    }
}

/// The user's step list with undo/redo. Every edit produces a new list to replay from the raw
/// dataset.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Pipeline {
    steps: Vec<Transformation>,
    undone: Vec<Transformation>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_steps(steps: Vec<Transformation>) -> Self {
        Self {
            steps,
            undone: Vec::new(),
        }
    }

    /// Parses a JSON array of steps.
    pub fn from_json(json: &str) -> color_eyre::Result<Self> {
        let steps: Vec<Transformation> = serde_json::from_str(json)?;
        Ok(Self::from_steps(steps))
    }

    pub fn to_json(&self) -> color_eyre::Result<String> {
        Ok(serde_json::to_string_pretty(&self.steps)?)
    }

    pub fn steps(&self) -> &[Transformation] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn push(&mut self, step: Transformation) {
        self.steps.push(step);
        self.undone.clear();
    }

    /// Removes the step at `index`. Out-of-range indices are ignored.
    pub fn remove(&mut self, index: usize) -> Option<Transformation> {
        if index < self.steps.len() {
            self.undone.clear();
            Some(self.steps.remove(index))
        } else {
            None
        }
    }

    pub fn clear(&mut self) {
        self.steps.clear();
        self.undone.clear();
    }

    pub fn can_undo(&self) -> bool {
        !self.steps.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.undone.is_empty()
    }

    pub fn undo(&mut self) -> bool {
        match self.steps.pop() {
            Some(step) => {
                self.undone.push(step);
                true
            }
            None => false,
        }
    }

    pub fn redo(&mut self) -> bool {
        match self.undone.pop() {
            Some(step) => {
                self.steps.push(step);
                true
            }
            None => false,
        }
    }

    pub fn apply(&self, raw: &Dataset) -> Dataset {
        apply_transformations(raw, &self.steps)
    }
}
