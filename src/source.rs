//! File ingestion: CSV through Polars, Excel through calamine. Produces a [`Dataset`] with
//! `Value::Null` for empty cells.

use calamine::{open_workbook_auto_from_rs, Data, Reader};
use chrono::{NaiveDate, NaiveTime};
use polars::prelude::*;
use std::io::Cursor;
use std::path::Path;
use tracing::debug;

use crate::cli::FileFormat;
use crate::value::{parse_date_str, Dataset, Value};

/// Ingestion failure. Fatal to the upload attempt; no partial dataset is produced.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("Unsupported file type: {0}. Expected CSV, TSV, PSV or Excel.")]
    UnsupportedFormat(String),
    #[error("The file contains no data rows")]
    Empty,
    #[error("Excel: {0}")]
    Excel(String),
    #[error("CSV: {0}")]
    Csv(#[from] PolarsError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Reader options. Defaults match the `[file_loading]` config section.
#[derive(Debug, Clone)]
pub struct LoadOptions {
    pub format: Option<FileFormat>,
    pub delimiter: Option<u8>,
    pub infer_schema_length: Option<usize>,
    pub try_parse_dates: bool,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            format: None,
            delimiter: None,
            infer_schema_length: Some(1000),
            try_parse_dates: true,
        }
    }
}

impl LoadOptions {
    pub fn with_format(mut self, format: FileFormat) -> Self {
        self.format = Some(format);
        self
    }

    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = Some(delimiter);
        self
    }

    pub fn with_infer_schema_length(mut self, n: usize) -> Self {
        self.infer_schema_length = Some(n);
        self
    }

    pub fn with_try_parse_dates(mut self, v: bool) -> Self {
        self.try_parse_dates = v;
        self
    }
}

/// Reads a file from disk, detecting the format from the extension unless one is forced.
pub fn load_path(path: &Path, options: &LoadOptions) -> Result<Dataset, LoadError> {
    let format = match options.format.or_else(|| FileFormat::from_path(path)) {
        Some(f) => f,
        None => {
            return Err(LoadError::UnsupportedFormat(
                path.extension()
                    .and_then(|e| e.to_str())
                    .unwrap_or("(no extension)")
                    .to_string(),
            ))
        }
    };
    let bytes = std::fs::read(path)?;
    debug!(path = %path.display(), bytes = bytes.len(), ?format, "read file");
    load_bytes(bytes, format, options)
}

/// Parses file bytes in the given format.
pub fn load_bytes(
    bytes: Vec<u8>,
    format: FileFormat,
    options: &LoadOptions,
) -> Result<Dataset, LoadError> {
    let dataset = match format {
        FileFormat::Excel => read_excel(bytes)?,
        FileFormat::Csv | FileFormat::Tsv | FileFormat::Psv => {
            let delimiter = options
                .delimiter
                .or_else(|| format.delimiter())
                .unwrap_or(b',');
            read_delimited(bytes, delimiter, options)?
        }
    };
    if dataset.is_empty() {
        return Err(LoadError::Empty);
    }
    Ok(dataset)
}

fn read_delimited(
    bytes: Vec<u8>,
    delimiter: u8,
    options: &LoadOptions,
) -> Result<Dataset, LoadError> {
    let mut read_options = CsvReadOptions::default().with_has_header(true);
    read_options.infer_schema_length = options.infer_schema_length;
    let try_parse_dates = options.try_parse_dates;
    read_options = read_options.map_parse_options(|opts| {
        opts.with_separator(delimiter)
            .with_try_parse_dates(try_parse_dates)
    });
    let df = CsvReader::new(Cursor::new(bytes))
        .with_options(read_options)
        .finish()?;
    dataframe_to_dataset(&df)
}

/// Converts an eager DataFrame into rows. Column names are trimmed.
pub fn dataframe_to_dataset(df: &DataFrame) -> Result<Dataset, LoadError> {
    let columns: Vec<String> = df
        .get_column_names()
        .iter()
        .map(|n| n.as_str().trim().to_string())
        .collect();
    let height = df.height();
    let mut rows: Vec<Vec<Value>> = (0..height)
        .map(|_| Vec::with_capacity(columns.len()))
        .collect();
    for column in df.get_columns() {
        for (i, row) in rows.iter_mut().enumerate() {
            row.push(any_value_to_value(column.get(i)?));
        }
    }
    Ok(Dataset::new(columns, rows))
}

fn any_value_to_value(av: AnyValue<'_>) -> Value {
    match av {
        AnyValue::Null => Value::Null,
        AnyValue::Boolean(b) => Value::Bool(b),
        AnyValue::String(s) => string_cell(s),
        AnyValue::StringOwned(s) => string_cell(s.as_str()),
        AnyValue::Int32(v) => Value::Number(v as f64),
        AnyValue::Int64(v) => Value::Number(v as f64),
        AnyValue::UInt32(v) => Value::Number(v as f64),
        AnyValue::UInt64(v) => Value::Number(v as f64),
        AnyValue::Float32(v) => Value::Number(v as f64),
        AnyValue::Float64(v) => Value::Number(v),
        AnyValue::Date(days) => {
            const UNIX_EPOCH_CE_DAYS: i32 = 719_163;
            NaiveDate::from_num_days_from_ce_opt(UNIX_EPOCH_CE_DAYS.saturating_add(days))
                .map(|d| Value::Date(d.and_time(NaiveTime::MIN)))
                .unwrap_or(Value::Null)
        }
        AnyValue::Datetime(v, unit, _) => {
            let micros = match unit {
                TimeUnit::Nanoseconds => v / 1_000,
                TimeUnit::Microseconds => v,
                TimeUnit::Milliseconds => v.saturating_mul(1_000),
            };
            chrono::DateTime::from_timestamp_micros(micros)
                .map(|dt| Value::Date(dt.naive_utc()))
                .unwrap_or(Value::Null)
        }
        other => string_cell(&other.to_string()),
    }
}

fn string_cell(s: &str) -> Value {
    if s.is_empty() {
        Value::Null
    } else {
        Value::String(s.to_string())
    }
}

/// Reads the first worksheet; the first row is the header.
fn read_excel(bytes: Vec<u8>) -> Result<Dataset, LoadError> {
    let mut workbook =
        open_workbook_auto_from_rs(Cursor::new(bytes)).map_err(|e| LoadError::Excel(e.to_string()))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| LoadError::Excel("no worksheets".to_string()))?
        .map_err(|e| LoadError::Excel(e.to_string()))?;
    let mut rows_iter = range.rows();
    let header = match rows_iter.next() {
        Some(h) => h,
        None => return Err(LoadError::Empty),
    };
    let columns: Vec<String> = header
        .iter()
        .enumerate()
        .map(|(idx, c)| {
            let name = excel_header_text(c);
            if name.is_empty() {
                format!("column_{}", idx + 1)
            } else {
                name
            }
        })
        .collect();
    let rows: Vec<Vec<Value>> = rows_iter
        .map(|r| r.iter().map(excel_cell_to_value).collect())
        .filter(|r: &Vec<Value>| r.iter().any(|v| !v.is_null()))
        .collect();
    Ok(Dataset::new(columns, rows))
}

fn excel_header_text(cell: &Data) -> String {
    use calamine::DataType;
    cell.as_string()
        .unwrap_or_else(|| cell.to_string())
        .trim()
        .to_string()
}

fn excel_cell_to_value(cell: &Data) -> Value {
    use calamine::DataType;
    match cell {
        Data::Empty => Value::Null,
        Data::Int(i) => Value::Number(*i as f64),
        Data::Float(f) => Value::Number(*f),
        Data::Bool(b) => Value::Bool(*b),
        Data::String(s) => string_cell(s),
        Data::DateTime(_) => cell
            .as_datetime()
            .map(Value::Date)
            .unwrap_or(Value::Null),
        Data::DateTimeIso(s) => parse_date_str(s)
            .map(Value::Date)
            .unwrap_or_else(|| string_cell(s)),
        Data::DurationIso(s) => string_cell(s),
        Data::Error(e) => Value::String(e.to_string()),
        #[allow(unreachable_patterns)]
        _ => string_cell(&cell.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn csv_opts() -> LoadOptions {
        LoadOptions::default().with_format(FileFormat::Csv)
    }

    #[test]
    fn test_csv_types_and_nulls() {
        let csv = "name,amount,when\nalpha,10,2024-01-02\nbeta,,2024-01-03\n";
        let ds = load_bytes(csv.as_bytes().to_vec(), FileFormat::Csv, &csv_opts()).unwrap();
        assert_eq!(ds.columns, vec!["name", "amount", "when"]);
        assert_eq!(ds.len(), 2);
        assert_eq!(ds.rows[0][0], Value::from("alpha"));
        assert_eq!(ds.rows[0][1], Value::Number(10.0));
        assert_eq!(ds.rows[1][1], Value::Null);
        assert!(matches!(ds.rows[0][2], Value::Date(_)));
    }

    #[test]
    fn test_header_only_csv_is_empty_error() {
        let err = load_bytes(b"a,b\n".to_vec(), FileFormat::Csv, &csv_opts()).unwrap_err();
        assert!(matches!(err, LoadError::Empty));
    }

    #[test]
    fn test_tsv_uses_tab_delimiter() {
        let tsv = "a\tb\n1\tx\n";
        let ds = load_bytes(tsv.as_bytes().to_vec(), FileFormat::Tsv, &LoadOptions::default())
            .unwrap();
        assert_eq!(ds.columns, vec!["a", "b"]);
        assert_eq!(ds.rows[0][1], Value::from("x"));
    }

    #[test]
    fn test_unknown_extension_is_rejected() {
        let err = load_path(Path::new("data.parquet"), &LoadOptions::default()).unwrap_err();
        assert!(matches!(err, LoadError::UnsupportedFormat(_)));
    }

    #[test]
    fn test_excel_cells_map_to_values() {
        assert_eq!(excel_cell_to_value(&Data::Empty), Value::Null);
        assert_eq!(excel_cell_to_value(&Data::Int(4)), Value::Number(4.0));
        assert_eq!(
            excel_cell_to_value(&Data::String(String::new())),
            Value::Null
        );
        assert!(matches!(
            excel_cell_to_value(&Data::DateTimeIso("2024-05-01".to_string())),
            Value::Date(_)
        ));
    }
}
