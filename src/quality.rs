//! Schema inference and the data-quality report.
//!
//! The report is advisory: it is computed once per loaded file and never gates the
//! transformation or chart stages. Missing-value and duplicate rates are estimated from the
//! first `scan_sample_rows` rows and extrapolated, so datasets whose problems cluster at the
//! end of the file are under-reported.

use serde::Serialize;
use std::collections::HashSet;
use tracing::debug;

use crate::value::{Dataset, ValueKind};

/// Rows inspected for type inference.
pub const TYPE_SAMPLE_ROWS: usize = 50;
/// Rows scanned for missing values, duplicates and schema validation.
pub const SCAN_SAMPLE_ROWS: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Numeric,
    Textual,
    Temporal,
    Any,
}

impl ColumnType {
    /// Whether a cell of the given kind conforms to this column type. Nulls always conform.
    fn accepts(self, kind: ValueKind) -> bool {
        match (self, kind) {
            (_, ValueKind::Null) | (ColumnType::Any, _) => true,
            (ColumnType::Numeric, ValueKind::Number) => true,
            (ColumnType::Textual, ValueKind::String) => true,
            (ColumnType::Temporal, ValueKind::Date) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnSchema {
    pub name: String,
    pub column_type: ColumnType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueType {
    EmptyFile,
    MissingValues,
    DuplicateRows,
    MixedTypes,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QualityIssue {
    #[serde(rename = "type")]
    pub issue_type: IssueType,
    pub severity: Severity,
    pub title: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QualityReport {
    /// 0-100
    pub score: u8,
    pub issues: Vec<QualityIssue>,
    pub row_count: usize,
    pub column_count: usize,
    pub is_clean: bool,
    pub schema: Vec<ColumnSchema>,
    /// Estimated share of missing cells over the whole dataset (0.0-1.0).
    pub missing_rate: f64,
    /// Share of repeated rows within the scanned sample (0.0-1.0).
    pub duplicate_rate: f64,
}

/// Sample sizes and thresholds. Defaults are the documented behavior; `[quality]` in the
/// config file can override them.
#[derive(Debug, Clone)]
pub struct QualityOptions {
    pub type_sample_rows: usize,
    pub scan_sample_rows: usize,
    pub missing_high_threshold: f64,
    pub missing_medium_threshold: f64,
    pub duplicate_threshold: f64,
}

impl Default for QualityOptions {
    fn default() -> Self {
        Self {
            type_sample_rows: TYPE_SAMPLE_ROWS,
            scan_sample_rows: SCAN_SAMPLE_ROWS,
            missing_high_threshold: 0.20,
            missing_medium_threshold: 0.05,
            duplicate_threshold: 0.10,
        }
    }
}

const MISSING_HIGH_PENALTY: i32 = 30;
const MISSING_MEDIUM_PENALTY: i32 = 10;
const DUPLICATE_PENALTY: i32 = 20;
const MIXED_TYPE_PENALTY: i32 = 5;

/// Infers one type per column from the first `sample_rows` rows.
///
/// Strings make a column textual. Otherwise numbers make it numeric and dates make it temporal;
/// a column with no non-null values, booleans, or numbers mixed with dates is `Any`.
pub fn infer_schema(dataset: &Dataset, sample_rows: usize) -> Vec<ColumnSchema> {
    let sample = &dataset.rows[..dataset.len().min(sample_rows)];
    dataset
        .columns
        .iter()
        .enumerate()
        .map(|(idx, name)| {
            let mut kinds: HashSet<ValueKind> = HashSet::new();
            for row in sample {
                kinds.insert(row[idx].kind());
            }
            kinds.remove(&ValueKind::Null);
            let column_type = if kinds.contains(&ValueKind::String) {
                ColumnType::Textual
            } else if kinds.len() == 1 && kinds.contains(&ValueKind::Number) {
                ColumnType::Numeric
            } else if kinds.len() == 1 && kinds.contains(&ValueKind::Date) {
                ColumnType::Temporal
            } else {
                ColumnType::Any
            };
            ColumnSchema {
                name: name.clone(),
                column_type,
            }
        })
        .collect()
}

/// Builds the quality report with default options.
pub fn assess_quality(dataset: &Dataset) -> QualityReport {
    assess_quality_with_options(dataset, &QualityOptions::default())
}

pub fn assess_quality_with_options(dataset: &Dataset, options: &QualityOptions) -> QualityReport {
    let row_count = dataset.len();
    let column_count = dataset.column_count();

    if row_count == 0 {
        return QualityReport {
            score: 0,
            issues: vec![QualityIssue {
                issue_type: IssueType::EmptyFile,
                severity: Severity::High,
                title: "Empty file".to_string(),
                description: "The file contains no data rows.".to_string(),
            }],
            row_count,
            column_count,
            is_clean: false,
            schema: infer_schema(dataset, options.type_sample_rows),
            missing_rate: 0.0,
            duplicate_rate: 0.0,
        };
    }

    let schema = infer_schema(dataset, options.type_sample_rows);
    let sample = &dataset.rows[..row_count.min(options.scan_sample_rows)];
    let mut score: i32 = 100;
    let mut issues = Vec::new();

    // Missing values, extrapolated from the sample to the full dataset.
    let mut missing_cells = 0usize;
    let mut missing_per_column = vec![0usize; column_count];
    for row in sample {
        for (idx, v) in row.iter().enumerate() {
            if v.is_missing() {
                missing_cells += 1;
                missing_per_column[idx] += 1;
            }
        }
    }
    let sampled_cells = sample.len() * column_count;
    let missing_rate = if sampled_cells == 0 {
        0.0
    } else {
        missing_cells as f64 / sampled_cells as f64
    };
    let estimated_missing = (missing_rate * (row_count * column_count) as f64).round() as usize;
    let percent = missing_rate * 100.0;

    if missing_rate > options.missing_high_threshold {
        score -= MISSING_HIGH_PENALTY;
        issues.push(QualityIssue {
            issue_type: IssueType::MissingValues,
            severity: Severity::High,
            title: "Many missing values".to_string(),
            description: format!(
                "About {:.1}% of cells (~{} of {}) are empty.",
                percent,
                estimated_missing,
                row_count * column_count
            ),
        });
    } else if missing_rate >= options.missing_medium_threshold {
        score -= MISSING_MEDIUM_PENALTY;
        issues.push(QualityIssue {
            issue_type: IssueType::MissingValues,
            severity: Severity::Medium,
            title: "Some missing values".to_string(),
            description: format!(
                "About {:.1}% of cells (~{} of {}) are empty.",
                percent,
                estimated_missing,
                row_count * column_count
            ),
        });
    } else if let Some((name, share)) =
        worst_column(&dataset.columns, &missing_per_column, sample.len())
            .filter(|(_, share)| *share >= options.missing_medium_threshold)
    {
        // Overall rate is low but one column is noticeably sparse.
        score -= MISSING_MEDIUM_PENALTY;
        issues.push(QualityIssue {
            issue_type: IssueType::MissingValues,
            severity: Severity::Medium,
            title: "Some missing values".to_string(),
            description: format!(
                "Column \"{}\" is empty in about {:.1}% of rows.",
                name,
                share * 100.0
            ),
        });
    }

    // Duplicate rows within the sample.
    let mut seen: HashSet<String> = HashSet::with_capacity(sample.len());
    let mut duplicates = 0usize;
    for i in 0..sample.len() {
        if let Some(row) = dataset.row(i) {
            if !seen.insert(row.to_json()) {
                duplicates += 1;
            }
        }
    }
    let duplicate_rate = if sample.is_empty() {
        0.0
    } else {
        duplicates as f64 / sample.len() as f64
    };
    if duplicate_rate > options.duplicate_threshold {
        score -= DUPLICATE_PENALTY;
        issues.push(QualityIssue {
            issue_type: IssueType::DuplicateRows,
            severity: Severity::Medium,
            title: "Duplicate rows".to_string(),
            description: format!(
                "{} of the first {} rows ({:.1}%) repeat an earlier row.",
                duplicates,
                sample.len(),
                duplicate_rate * 100.0
            ),
        });
    }

    // Cells that do not match the type inferred from the head of the file.
    let mismatched: Vec<&str> = schema
        .iter()
        .enumerate()
        .filter(|(idx, col)| {
            sample
                .iter()
                .any(|row| !col.column_type.accepts(row[*idx].kind()))
        })
        .map(|(_, col)| col.name.as_str())
        .collect();
    if !mismatched.is_empty() {
        score -= MIXED_TYPE_PENALTY;
        issues.push(QualityIssue {
            issue_type: IssueType::MixedTypes,
            severity: Severity::Low,
            title: "Mixed value types".to_string(),
            description: format!(
                "Columns with inconsistent value types: {}.",
                mismatched.join(", ")
            ),
        });
    }

    let score = score.clamp(0, 100) as u8;
    let is_clean = !issues.iter().any(|i| i.severity == Severity::High);
    debug!(
        score,
        issues = issues.len(),
        missing_rate,
        duplicate_rate,
        "quality report"
    );

    QualityReport {
        score,
        issues,
        row_count,
        column_count,
        is_clean,
        schema,
        missing_rate,
        duplicate_rate,
    }
}

fn worst_column<'a>(
    columns: &'a [String],
    missing_per_column: &[usize],
    sampled_rows: usize,
) -> Option<(&'a str, f64)> {
    if sampled_rows == 0 {
        return None;
    }
    columns
        .iter()
        .zip(missing_per_column.iter())
        .map(|(name, &n)| (name.as_str(), n as f64 / sampled_rows as f64))
        .fold(None, |best: Option<(&str, f64)>, (name, share)| match best {
            Some((_, b)) if b >= share => best,
            _ => Some((name, share)),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    fn numbered(n: usize) -> Dataset {
        Dataset::from_rows(
            &["id", "name"],
            (0..n)
                .map(|i| vec![Value::from(i as f64), Value::from(format!("row {}", i))])
                .collect(),
        )
    }

    #[test]
    fn test_empty_dataset_scores_zero_with_one_high_issue() {
        let ds = Dataset::from_rows(&["a", "b"], vec![]);
        let report = assess_quality(&ds);
        assert_eq!(report.score, 0);
        assert_eq!(report.issues.len(), 1);
        assert_eq!(report.issues[0].issue_type, IssueType::EmptyFile);
        assert_eq!(report.issues[0].severity, Severity::High);
        assert!(!report.is_clean);
    }

    #[test]
    fn test_clean_dataset_scores_full() {
        let report = assess_quality(&numbered(20));
        assert_eq!(report.score, 100);
        assert!(report.issues.is_empty());
        assert!(report.is_clean);
        assert_eq!(report.schema[0].column_type, ColumnType::Numeric);
        assert_eq!(report.schema[1].column_type, ColumnType::Textual);
    }

    #[test]
    fn test_heavy_missing_values_are_high_severity() {
        let rows = (0..10)
            .map(|i| {
                if i < 5 {
                    vec![Value::Null, Value::from("")]
                } else {
                    vec![Value::from(i), Value::from("x")]
                }
            })
            .collect();
        let report = assess_quality(&Dataset::from_rows(&["a", "b"], rows));
        let issue = &report.issues[0];
        assert_eq!(issue.issue_type, IssueType::MissingValues);
        assert_eq!(issue.severity, Severity::High);
        assert!(!report.is_clean);
        assert!(report.score <= 70);
    }

    #[test]
    fn test_duplicates_over_ten_percent_are_flagged() {
        let mut rows: Vec<Vec<Value>> = (0..8).map(|i| vec![Value::from(i)]).collect();
        rows.push(vec![Value::from(1)]);
        rows.push(vec![Value::from(2)]);
        let report = assess_quality(&Dataset::from_rows(&["a"], rows));
        assert!(report
            .issues
            .iter()
            .any(|i| i.issue_type == IssueType::DuplicateRows && i.severity == Severity::Medium));
        assert_eq!(report.score, 80);
        assert!(report.is_clean);
    }

    #[test]
    fn test_strings_after_numeric_head_are_mixed_types() {
        let mut rows: Vec<Vec<Value>> = (0..60).map(|i| vec![Value::from(i)]).collect();
        rows.push(vec![Value::from("n/a")]);
        let report = assess_quality(&Dataset::from_rows(&["a"], rows));
        assert_eq!(report.schema[0].column_type, ColumnType::Numeric);
        let issue = report
            .issues
            .iter()
            .find(|i| i.issue_type == IssueType::MixedTypes)
            .unwrap();
        assert_eq!(issue.severity, Severity::Low);
        assert_eq!(report.score, 95);
    }

    #[test]
    fn test_missing_and_duplicate_penalties_add_up() {
        let options = QualityOptions {
            missing_high_threshold: 0.0,
            duplicate_threshold: 0.0,
            ..QualityOptions::default()
        };
        let rows = vec![vec![Value::Null], vec![Value::Null], vec![Value::Null]];
        let report = assess_quality_with_options(&Dataset::from_rows(&["a"], rows), &options);
        // 100 - 30 (missing, high) - 20 (duplicates)
        assert_eq!(report.score, 50);
        assert_eq!(report.issues.len(), 2);
    }

    #[test]
    fn test_inference_reads_only_the_head() {
        let mut rows: Vec<Vec<Value>> = (0..TYPE_SAMPLE_ROWS).map(|_| vec![Value::Null]).collect();
        rows.push(vec![Value::from("late")]);
        let schema = infer_schema(&Dataset::from_rows(&["a"], rows), TYPE_SAMPLE_ROWS);
        assert_eq!(schema[0].column_type, ColumnType::Any);
    }
}
