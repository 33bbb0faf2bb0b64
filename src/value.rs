//! Row model: tagged cell values and the in-memory dataset.
//!
//! A [`Dataset`] is an ordered list of rows sharing one column list. Rows are never mutated in
//! place; every pipeline stage builds a new dataset.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use std::cmp::Ordering;
use std::fmt;

/// A single cell.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    Date(NaiveDateTime),
    String(String),
}

/// Tag of a [`Value`], used by schema inference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Null,
    Boolean,
    Number,
    Date,
    String,
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Null => ValueKind::Null,
            Value::Bool(_) => ValueKind::Boolean,
            Value::Number(_) => ValueKind::Number,
            Value::Date(_) => ValueKind::Date,
            Value::String(_) => ValueKind::String,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Null or empty string.
    pub fn is_missing(&self) -> bool {
        match self {
            Value::Null => true,
            Value::String(s) => s.is_empty(),
            _ => false,
        }
    }

    /// Numeric coercion. Strings are trimmed and parsed; booleans map to 1/0.
    /// Dates, nulls, blank strings and non-finite results are not numbers.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) if n.is_finite() => Some(*n),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::String(s) => {
                let t = s.trim();
                if t.is_empty() {
                    return None;
                }
                t.parse::<f64>().ok().filter(|n| n.is_finite())
            }
            _ => None,
        }
    }

    /// Date coercion. Plain numbers are never treated as dates.
    pub fn as_date(&self) -> Option<NaiveDateTime> {
        match self {
            Value::Date(d) => Some(*d),
            Value::String(s) => parse_date_str(s),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// The string form used for grouping, filtering and export. Null renders as "".
    pub fn to_display_string(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => format_number(*n),
            Value::Date(d) => format_date(d),
            Value::String(s) => s.clone(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_display_string())
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(n as f64)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(d: NaiveDateTime) -> Self {
        Value::Date(d)
    }
}

impl From<NaiveDate> for Value {
    fn from(d: NaiveDate) -> Self {
        Value::Date(d.and_time(NaiveTime::MIN))
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// Integers print without a fractional part ("3", not "3.0").
pub fn format_number(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

/// Dates at midnight print as YYYY-MM-DD, others as ISO datetime.
pub fn format_date(d: &NaiveDateTime) -> String {
    if d.time() == NaiveTime::MIN {
        d.format("%Y-%m-%d").to_string()
    } else {
        d.format("%Y-%m-%dT%H:%M:%S").to_string()
    }
}

/// Parses a date or datetime string; tries FORMATS in order, then date-only formats, then RFC 3339.
pub fn parse_date_str(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    const FORMATS: &[&str] = &[
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M",
    ];
    for fmt in FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt);
        }
    }
    const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y", "%d.%m.%Y"];
    for fmt in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Some(d.and_time(NaiveTime::MIN));
        }
    }
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.naive_utc())
}

/// Case-insensitive comparison where runs of ASCII digits compare by numeric value
/// ("item 2" < "item 10").
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut ai = a.chars().peekable();
    let mut bi = b.chars().peekable();
    loop {
        match (ai.peek().copied(), bi.peek().copied()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(ca), Some(cb)) if ca.is_ascii_digit() && cb.is_ascii_digit() => {
                let na = take_digits(&mut ai);
                let nb = take_digits(&mut bi);
                let ta = na.trim_start_matches('0');
                let tb = nb.trim_start_matches('0');
                let ord = ta.len().cmp(&tb.len()).then_with(|| ta.cmp(tb));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            (Some(ca), Some(cb)) => {
                let la = ca.to_lowercase();
                let lb = cb.to_lowercase();
                let ord = la.cmp(lb);
                if ord != Ordering::Equal {
                    return ord;
                }
                ai.next();
                bi.next();
            }
        }
    }
}

fn take_digits(it: &mut std::iter::Peekable<std::str::Chars<'_>>) -> String {
    let mut out = String::new();
    while let Some(&c) = it.peek() {
        if c.is_ascii_digit() {
            out.push(c);
            it.next();
        } else {
            break;
        }
    }
    out
}

/// Ordered rows over a shared column list.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Dataset {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl Dataset {
    /// Builds a dataset; rows shorter than the header are padded with nulls, longer rows are cut.
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        let width = columns.len();
        let rows = rows
            .into_iter()
            .map(|mut r| {
                r.resize(width, Value::Null);
                r
            })
            .collect();
        Self { columns, rows }
    }

    /// Convenience constructor used heavily in tests.
    pub fn from_rows<S: AsRef<str>>(columns: &[S], rows: Vec<Vec<Value>>) -> Self {
        Self::new(
            columns.iter().map(|c| c.as_ref().to_string()).collect(),
            rows,
        )
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    pub fn row(&self, index: usize) -> Option<RowRef<'_>> {
        self.rows.get(index).map(|values| RowRef {
            columns: &self.columns,
            values,
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = RowRef<'_>> + '_ {
        self.rows.iter().map(move |values| RowRef {
            columns: &self.columns,
            values,
        })
    }

    /// Values of one column in row order. None if the column does not exist.
    pub fn column_values<'a>(&'a self, name: &str) -> Option<impl Iterator<Item = &'a Value> + 'a> {
        let idx = self.column_index(name)?;
        Some(self.rows.iter().map(move |r| &r[idx]))
    }

    /// Same columns, rows selected by a predicate.
    pub fn filter_rows<F>(&self, mut keep: F) -> Dataset
    where
        F: FnMut(RowRef<'_>) -> bool,
    {
        let rows = self
            .rows
            .iter()
            .filter(|values| {
                keep(RowRef {
                    columns: &self.columns,
                    values,
                })
            })
            .cloned()
            .collect();
        Dataset {
            columns: self.columns.clone(),
            rows,
        }
    }

    /// Same columns, rows at the given indices (in the given order).
    pub fn select_rows(&self, indices: &[usize]) -> Dataset {
        Dataset {
            columns: self.columns.clone(),
            rows: indices
                .iter()
                .filter_map(|&i| self.rows.get(i).cloned())
                .collect(),
        }
    }
}

/// Borrowed view of one row with name-based lookup.
#[derive(Debug, Clone, Copy)]
pub struct RowRef<'a> {
    pub columns: &'a [String],
    pub values: &'a [Value],
}

impl<'a> RowRef<'a> {
    pub fn get(&self, column: &str) -> Option<&'a Value> {
        self.columns
            .iter()
            .position(|c| c == column)
            .map(|i| &self.values[i])
    }

    /// Serializes the row as a JSON object in column order. Used as a stable row key.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

impl Serialize for RowRef<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.columns.len()))?;
        for (name, value) in self.columns.iter().zip(self.values.iter()) {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}
