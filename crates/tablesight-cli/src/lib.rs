//! Shared CLI definitions for tablesight.
//!
//! Used by the main application and by the build script (manpage) and
//! gen_docs binary (command-line-options markdown).

use clap::{CommandFactory, Parser, ValueEnum};
use std::path::{Path, PathBuf};

/// File format for data files (used to bypass extension-based detection).
/// When `--format` is not specified, format is auto-detected from the file extension.
#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum FileFormat {
    /// Comma-separated values
    Csv,
    /// Tab-separated values
    Tsv,
    /// Pipe-separated values
    Psv,
    /// Excel (.xls, .xlsx, .xlsm, .xlsb); only the first sheet is read
    Excel,
}

impl FileFormat {
    /// Detect file format from path extension. Returns None when extension is missing or unknown.
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
    }

    /// Parse format from extension string (e.g. "csv", "xlsx").
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "csv" => Some(Self::Csv),
            "tsv" => Some(Self::Tsv),
            "psv" => Some(Self::Psv),
            "xls" | "xlsx" | "xlsm" | "xlsb" => Some(Self::Excel),
            _ => None,
        }
    }

    /// Field separator for delimited text formats. None for Excel.
    pub fn delimiter(&self) -> Option<u8> {
        match self {
            Self::Csv => Some(b','),
            Self::Tsv => Some(b'\t'),
            Self::Psv => Some(b'|'),
            Self::Excel => None,
        }
    }
}

/// Chart family to compute from the (transformed, filtered) dataset.
#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum ChartArg {
    Bar,
    StackedBar,
    Line,
    Area,
    Pie,
    Scatter,
    Bubble,
}

/// Aggregation applied to the y column.
#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum AggregationArg {
    Sum,
    Average,
    Count,
    None,
}

/// Time bucket size for line/area charts over a date column.
#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum GrainArg {
    Daily,
    Weekly,
    Monthly,
    Quarterly,
    Yearly,
}

/// Time window applied to the date column.
#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum TimeWindowArg {
    All,
    #[value(name = "7d")]
    Days7,
    #[value(name = "30d")]
    Days30,
    #[value(name = "90d")]
    Days90,
    Ytd,
    Custom,
}

/// Command-line arguments for tablesight
#[derive(Clone, Parser, Debug)]
#[command(
    name = "tablesight",
    version,
    about = "Profile, transform and chart tabular data files",
    long_about = "Loads a CSV or Excel file, prints a data-quality report, replays a saved list of \
                  transformations and computes chart-ready series as JSON. Charts can be exported \
                  as SVG or PNG, and the visible rows as CSV."
)]
pub struct Args {
    /// Path to the data file to open (not required with --generate-config)
    #[arg(required_unless_present_any = ["generate_config"], value_name = "PATH")]
    pub path: Option<PathBuf>,

    /// Force file format (csv, tsv, psv, excel).
    /// By default format is auto-detected from the file extension.
    #[arg(long = "format", value_enum)]
    pub format: Option<FileFormat>,

    /// Specify the delimiter to use when reading a delimited text file
    #[arg(long = "delimiter")]
    pub delimiter: Option<u8>,

    /// Number of rows to use when inferring CSV column types (default: 1000)
    #[arg(long = "infer-schema-length", value_name = "N")]
    pub infer_schema_length: Option<usize>,

    /// Try to parse CSV string columns as dates (default: true)
    #[arg(long = "parse-dates", value_name = "BOOL", value_parser = clap::value_parser!(bool))]
    pub parse_dates: Option<bool>,

    /// JSON file holding the ordered list of transformations to replay
    #[arg(long = "transforms", value_name = "FILE")]
    pub transforms: Option<PathBuf>,

    /// JSON file holding an analysis result (KPIs and chart recommendations) to validate
    #[arg(long = "recommendations", value_name = "FILE")]
    pub recommendations: Option<PathBuf>,

    /// Print the representative row sample that would be sent for analysis
    #[arg(long = "sample", action)]
    pub sample: bool,

    /// Chart to compute
    #[arg(long = "chart", value_enum)]
    pub chart: Option<ChartArg>,

    /// Column mapped to the x channel
    #[arg(long = "x", value_name = "COL", requires = "chart")]
    pub x: Option<String>,

    /// Column mapped to the y channel
    #[arg(long = "y", value_name = "COL", requires = "chart")]
    pub y: Option<String>,

    /// Column mapped to the size channel (bubble charts)
    #[arg(long = "z", value_name = "COL", requires = "chart")]
    pub z: Option<String>,

    /// Column used to split the chart into series
    #[arg(long = "color", value_name = "COL", requires = "chart")]
    pub color: Option<String>,

    /// Aggregation applied to y (default: sum)
    #[arg(long = "aggregation", value_enum)]
    pub aggregation: Option<AggregationArg>,

    /// Time bucket for line/area charts over dates (default: monthly)
    #[arg(long = "grain", value_enum)]
    pub grain: Option<GrainArg>,

    /// Column holding dates for the time filter
    #[arg(long = "date-column", value_name = "COL")]
    pub date_column: Option<String>,

    /// Keep only rows whose COL matches VAL. Repeatable; values for the same column are OR-ed. Example: --filter region=North
    #[arg(long = "filter", value_name = "COL=VAL")]
    pub filter: Vec<String>,

    /// Time window applied to --date-column (default: all)
    #[arg(long = "time-filter", value_enum)]
    pub time_filter: Option<TimeWindowArg>,

    /// Start date (YYYY-MM-DD, inclusive) for --time-filter custom
    #[arg(long = "time-start", value_name = "DATE")]
    pub time_start: Option<String>,

    /// End date (YYYY-MM-DD, inclusive) for --time-filter custom
    #[arg(long = "time-end", value_name = "DATE")]
    pub time_end: Option<String>,

    /// Write the visible rows to this CSV file
    #[arg(long = "export-csv", value_name = "FILE")]
    pub export_csv: Option<PathBuf>,

    /// Write the computed chart to this image file (.svg or .png)
    #[arg(long = "export-chart", value_name = "FILE", requires = "chart")]
    pub export_chart: Option<PathBuf>,

    /// Log level filter (overrides config and TABLESIGHT_LOG). Example: debug
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Generate default configuration file at ~/.config/tablesight/config.toml
    #[arg(long = "generate-config", action)]
    pub generate_config: bool,

    /// Force overwrite existing config file when using --generate-config
    #[arg(long = "force", requires = "generate_config", action)]
    pub force: bool,
}

/// Escape `|` and newlines for use in markdown table cells.
fn escape_table_cell(s: &str) -> String {
    s.replace('|', "\\|").replace(['\n', '\r'], " ")
}

/// Render command-line options as markdown.
pub fn render_options_markdown() -> String {
    let mut cmd = Args::command();
    cmd.build();

    let mut out = String::from("# Command Line Options\n\n");

    out.push_str("## Usage\n\n```\n");
    let usage = cmd.render_usage();
    out.push_str(&usage.to_string());
    out.push_str("\n```\n\n");

    out.push_str("## Options\n\n");
    out.push_str("| Option | Description |\n");
    out.push_str("|--------|-------------|\n");

    for arg in cmd.get_arguments() {
        let id = arg.get_id().as_ref().to_string();
        if id == "help" || id == "version" {
            continue;
        }

        let placeholder: String = arg
            .get_value_names()
            .map(|names| {
                names
                    .iter()
                    .map(|n: &clap::builder::Str| format!("<{}>", n.as_ref() as &str))
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .unwrap_or_default();

        let option_str = if arg.is_positional() {
            if arg.is_required_set() {
                placeholder
            } else {
                format!("[{placeholder}]")
            }
        } else {
            let mut parts = Vec::new();
            if let Some(s) = arg.get_short() {
                parts.push(format!("-{s}"));
            }
            if let Some(l) = arg.get_long() {
                parts.push(format!("--{l}"));
            }
            let op = parts.join(", ");
            if !arg.get_action().takes_values() || placeholder.is_empty() {
                op
            } else {
                format!("{op} {placeholder}")
            }
        };

        let help = arg
            .get_help()
            .map(|h| escape_table_cell(&h.to_string()))
            .unwrap_or_else(|| "-".to_string());

        out.push_str(&format!("| `{option_str}` | {help} |\n"));
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_format_from_path() {
        assert_eq!(
            FileFormat::from_path(Path::new("data.csv")),
            Some(FileFormat::Csv)
        );
        assert_eq!(
            FileFormat::from_path(Path::new("sales.XLSX")),
            Some(FileFormat::Excel)
        );
        assert_eq!(
            FileFormat::from_path(Path::new("data.tsv")),
            Some(FileFormat::Tsv)
        );
        assert_eq!(FileFormat::from_path(Path::new("noext")), None);
        assert_eq!(FileFormat::from_path(Path::new("data.parquet")), None);
    }

    #[test]
    fn test_delimiters() {
        assert_eq!(FileFormat::Csv.delimiter(), Some(b','));
        assert_eq!(FileFormat::Tsv.delimiter(), Some(b'\t'));
        assert_eq!(FileFormat::Excel.delimiter(), None);
    }

    #[test]
    fn test_args_parse_chart_options() {
        let args = Args::try_parse_from([
            "tablesight",
            "data.csv",
            "--chart",
            "stacked-bar",
            "--x",
            "region",
            "--y",
            "revenue",
            "--filter",
            "region=North",
            "--time-filter",
            "30d",
        ])
        .unwrap();
        assert_eq!(args.chart, Some(ChartArg::StackedBar));
        assert_eq!(args.x.as_deref(), Some("region"));
        assert_eq!(args.filter, vec!["region=North".to_string()]);
        assert_eq!(args.time_filter, Some(TimeWindowArg::Days30));
    }

    #[test]
    fn test_path_not_required_with_generate_config() {
        let args = Args::try_parse_from(["tablesight", "--generate-config"]).unwrap();
        assert!(args.generate_config);
        assert!(args.path.is_none());
        assert!(Args::try_parse_from(["tablesight"]).is_err());
    }

    #[test]
    fn test_options_markdown_lists_flags() {
        let md = render_options_markdown();
        assert!(md.contains("--transforms"));
        assert!(md.contains("--export-chart"));
    }
}
