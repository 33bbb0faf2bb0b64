use color_eyre::eyre::eyre;
use color_eyre::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::analysis::{SAMPLE_CHAR_BUDGET, SAMPLE_ROWS_PER_PART};
use crate::chart_data::ChartOptions;
use crate::chart_export::ImageOptions;
use crate::quality::QualityOptions;
use crate::source::LoadOptions;
use crate::timeseries::Grain;

pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Manages config directory and config file operations
#[derive(Clone)]
pub struct ConfigManager {
    pub(crate) config_dir: PathBuf,
}

impl ConfigManager {
    /// Create a ConfigManager with a custom config directory (primarily for testing)
    pub fn with_dir(config_dir: PathBuf) -> Self {
        Self { config_dir }
    }

    /// Create a new ConfigManager for the given app name
    pub fn new(app_name: &str) -> Result<Self> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| eyre!("Could not determine config directory"))?
            .join(app_name);

        Ok(Self { config_dir })
    }

    /// Get the config directory path
    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    /// Get path to a specific config file or subdirectory
    pub fn config_path(&self, path: &str) -> PathBuf {
        self.config_dir.join(path)
    }

    /// Ensure the config directory exists
    pub fn ensure_config_dir(&self) -> Result<()> {
        if !self.config_dir.exists() {
            std::fs::create_dir_all(&self.config_dir)?;
        }
        Ok(())
    }

    /// Generate the default configuration as commented-out TOML.
    /// Every field is commented so defaults apply until the user uncomments one.
    pub fn generate_default_config(&self) -> Result<String> {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config)
            .map_err(|e| eyre!("Failed to serialize default config: {}", e))?;
        Ok(Self::comment_all_fields(&toml_str, &Self::collect_all_comments()))
    }

    /// Collect all field comments into a map keyed by `section.field`
    fn collect_all_comments() -> HashMap<String, String> {
        let mut comments = HashMap::new();
        for (field, comment) in APP_COMMENTS {
            comments.insert(field.to_string(), comment.to_string());
        }
        let sections: [(&str, &[(&str, &str)]); 6] = [
            ("file_loading", FILE_LOADING_COMMENTS),
            ("quality", QUALITY_COMMENTS),
            ("chart", CHART_COMMENTS),
            ("analysis", ANALYSIS_COMMENTS),
            ("export", EXPORT_COMMENTS),
            ("logging", LOGGING_COMMENTS),
        ];
        for (section, fields) in sections {
            for (field, comment) in fields {
                comments.insert(format!("{}.{}", section, field), comment.to_string());
            }
        }
        comments
    }

    fn comment_all_fields(toml: &str, comments: &HashMap<String, String>) -> String {
        let mut result = String::new();
        result.push_str("# tablesight configuration file\n");
        result
            .push_str("# This file uses TOML format. See https://toml.io/ for syntax reference.\n");
        result.push('\n');

        let mut current_section = String::new();

        for line in toml.lines() {
            if let Some(section) = Self::extract_section_name(line) {
                if let Some((_, header)) = SECTION_HEADERS.iter().find(|(s, _)| *s == section) {
                    result.push_str(header);
                    result.push('\n');
                }
                result.push_str("# ");
                result.push_str(line);
                result.push('\n');
                // Option fields are skipped by the serializer; list them as null.
                for (path, comment) in OPTION_FIELDS {
                    if path.starts_with(&format!("{}.", section)) {
                        Self::push_comment(&mut result, comment);
                        let name = path.rsplit('.').next().unwrap_or(path);
                        result.push_str(&format!("# {} = null\n", name));
                    }
                }
                current_section = section;
                continue;
            }

            if let Some(field_path) = Self::extract_field_path(line, &current_section) {
                if let Some(comment) = comments.get(&field_path) {
                    Self::push_comment(&mut result, comment);
                }
                result.push_str("# ");
                result.push_str(line);
                result.push('\n');
            } else {
                result.push_str(line);
                result.push('\n');
            }
        }

        result
    }

    fn push_comment(out: &mut String, comment: &str) {
        for line in comment.lines() {
            out.push_str("# ");
            out.push_str(line);
            out.push('\n');
        }
    }

    /// Extract section name from TOML line like "[chart]"
    fn extract_section_name(line: &str) -> Option<String> {
        let trimmed = line.trim();
        if trimmed.starts_with('[') && trimmed.ends_with(']') {
            Some(trimmed[1..trimmed.len() - 1].to_string())
        } else {
            None
        }
    }

    fn extract_field_path(line: &str, current_section: &str) -> Option<String> {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with('[') {
            return None;
        }
        let eq_pos = trimmed.find('=')?;
        let field_name = trimmed[..eq_pos].trim();
        if current_section.is_empty() {
            Some(field_name.to_string())
        } else {
            Some(format!("{}.{}", current_section, field_name))
        }
    }

    /// Write default configuration to config file
    pub fn write_default_config(&self, force: bool) -> Result<PathBuf> {
        let config_path = self.config_path(CONFIG_FILE_NAME);

        if config_path.exists() && !force {
            return Err(eyre!(
                "Config file already exists at {}. Use --force to overwrite.",
                config_path.display()
            ));
        }

        self.ensure_config_dir()?;
        let template = self.generate_default_config()?;
        std::fs::write(&config_path, template)?;

        Ok(config_path)
    }
}

/// Complete application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Configuration format version (for future compatibility)
    pub version: String,
    pub file_loading: FileLoadingConfig,
    pub quality: QualityConfig,
    pub chart: ChartConfig,
    pub analysis: AnalysisConfig,
    pub export: ExportConfig,
    pub logging: LoggingConfig,
}

const APP_COMMENTS: &[(&str, &str)] = &[(
    "version",
    "Configuration format version (for future compatibility)",
)];

const SECTION_HEADERS: &[(&str, &str)] = &[
    (
        "file_loading",
        "# ============================================================================\n# File Loading Defaults\n# ============================================================================",
    ),
    (
        "quality",
        "# ============================================================================\n# Data Quality Report\n# ============================================================================",
    ),
    (
        "chart",
        "# ============================================================================\n# Chart Aggregation\n# ============================================================================",
    ),
    (
        "analysis",
        "# ============================================================================\n# Analysis Sample\n# ============================================================================",
    ),
    (
        "export",
        "# ============================================================================\n# Chart Image Export\n# ============================================================================",
    ),
    (
        "logging",
        "# ============================================================================\n# Logging\n# ============================================================================",
    ),
];

/// Option fields omitted by the serializer when None, with their comments.
const OPTION_FIELDS: &[(&str, &str)] = &[(
    "file_loading.delimiter",
    "Default delimiter for delimited files (as ASCII value, e.g., 59 for semicolon)\nIf not specified, the delimiter follows the file extension (csv, tsv, psv)",
)];

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            version: "0.1".to_string(),
            file_loading: FileLoadingConfig::default(),
            quality: QualityConfig::default(),
            chart: ChartConfig::default(),
            analysis: AnalysisConfig::default(),
            export: ExportConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileLoadingConfig {
    pub delimiter: Option<u8>,
    pub infer_schema_length: usize,
    pub try_parse_dates: bool,
}

const FILE_LOADING_COMMENTS: &[(&str, &str)] = &[
    (
        "infer_schema_length",
        "Number of rows the CSV reader uses to infer column types",
    ),
    (
        "try_parse_dates",
        "When true, the CSV reader tries to parse string columns as dates (e.g. YYYY-MM-DD, ISO datetime)",
    ),
];

impl Default for FileLoadingConfig {
    fn default() -> Self {
        Self {
            delimiter: None,
            infer_schema_length: 1000,
            try_parse_dates: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    pub type_sample_rows: usize,
    pub scan_sample_rows: usize,
    pub missing_high_threshold: f64,
    pub missing_medium_threshold: f64,
    pub duplicate_threshold: f64,
}

const QUALITY_COMMENTS: &[(&str, &str)] = &[
    ("type_sample_rows", "Rows inspected to infer each column's type"),
    (
        "scan_sample_rows",
        "Rows scanned for missing values, duplicate rows and mixed types\nRates are extrapolated from this sample to the whole file",
    ),
    (
        "missing_high_threshold",
        "Missing-cell share above which a high-severity issue is raised (0.0-1.0)",
    ),
    (
        "missing_medium_threshold",
        "Missing-cell share from which a medium-severity issue is raised (0.0-1.0)",
    ),
    (
        "duplicate_threshold",
        "Duplicate-row share above which an issue is raised (0.0-1.0)",
    ),
];

impl Default for QualityConfig {
    fn default() -> Self {
        let o = QualityOptions::default();
        Self {
            type_sample_rows: o.type_sample_rows,
            scan_sample_rows: o.scan_sample_rows,
            missing_high_threshold: o.missing_high_threshold,
            missing_medium_threshold: o.missing_medium_threshold,
            duplicate_threshold: o.duplicate_threshold,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChartConfig {
    pub default_grain: Grain,
    pub pie_max_slices: usize,
    pub pie_label_min_percent: f64,
    pub scatter_max_points: usize,
    pub filter_sample_rows: usize,
    pub filter_max_distinct: usize,
    pub filter_max_columns: usize,
}

const CHART_COMMENTS: &[(&str, &str)] = &[
    (
        "default_grain",
        "Time bucket for line and area charts over dates\nOptions: \"daily\", \"weekly\", \"monthly\", \"quarterly\", \"yearly\"",
    ),
    (
        "pie_max_slices",
        "Pie charts with more groups keep the largest (pie_max_slices - 1) and merge the rest into \"Other\"",
    ),
    (
        "pie_label_min_percent",
        "Pie slices below this share of the total (in percent) are drawn without a label",
    ),
    (
        "scatter_max_points",
        "Scatter and bubble charts with more points are downsampled to about this many",
    ),
    (
        "filter_sample_rows",
        "Rows inspected when looking for low-cardinality filter columns",
    ),
    (
        "filter_max_distinct",
        "Maximum distinct values for a column to be offered as a filter",
    ),
    ("filter_max_columns", "Maximum number of filter columns offered per chart"),
];

impl Default for ChartConfig {
    fn default() -> Self {
        let o = ChartOptions::default();
        Self {
            default_grain: Grain::default(),
            pie_max_slices: o.pie_max_slices,
            pie_label_min_percent: o.pie_label_min_percent,
            scatter_max_points: o.scatter_max_points,
            filter_sample_rows: o.filter_sample_rows,
            filter_max_distinct: o.filter_max_distinct,
            filter_max_columns: o.filter_max_columns,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub sample_rows_per_part: usize,
    pub sample_char_budget: usize,
}

const ANALYSIS_COMMENTS: &[(&str, &str)] = &[
    (
        "sample_rows_per_part",
        "Rows taken from each of the head, middle and tail of the dataset for analysis",
    ),
    (
        "sample_char_budget",
        "Maximum size of the serialized sample in characters\nLarger samples are cut down to head and tail rows",
    ),
];

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            sample_rows_per_part: SAMPLE_ROWS_PER_PART,
            sample_char_budget: SAMPLE_CHAR_BUDGET,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub image_width: u32,
    pub image_height: u32,
    pub image_scale: f64,
}

const EXPORT_COMMENTS: &[(&str, &str)] = &[
    ("image_width", "Chart image width in logical pixels"),
    ("image_height", "Chart image height in logical pixels"),
    ("image_scale", "PNG export renders at this multiple of the logical size"),
];

impl Default for ExportConfig {
    fn default() -> Self {
        let o = ImageOptions::default();
        Self {
            image_width: o.width,
            image_height: o.height,
            image_scale: o.scale,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

const LOGGING_COMMENTS: &[(&str, &str)] = &[(
    "level",
    "Log filter used when TABLESIGHT_LOG is not set (e.g. \"warn\", \"info\", \"tablesight=debug\")\nLogs are written to stderr",
)];

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
        }
    }
}

// Configuration loading and merging
impl AppConfig {
    /// Load configuration from all layers (default → user)
    pub fn load(app_name: &str) -> Result<Self> {
        let manager = ConfigManager::new(app_name)?;
        Self::load_from(&manager)
    }

    /// Load from a specific config directory
    pub fn load_from(manager: &ConfigManager) -> Result<Self> {
        let mut config = AppConfig::default();
        config.merge(Self::load_user_config(manager)?);
        config.validate()?;
        Ok(config)
    }

    fn load_user_config(manager: &ConfigManager) -> Result<AppConfig> {
        let config_path = manager.config_path(CONFIG_FILE_NAME);

        if !config_path.exists() {
            return Ok(AppConfig::default());
        }

        let content = std::fs::read_to_string(&config_path).map_err(|e| {
            eyre!(
                "Failed to read config file at {}: {}",
                config_path.display(),
                e
            )
        })?;

        toml::from_str(&content).map_err(|e| {
            eyre!(
                "Failed to parse config file at {}: {}",
                config_path.display(),
                e
            )
        })
    }

    /// Merge another config into this one (other takes precedence)
    pub fn merge(&mut self, other: AppConfig) {
        if other.version != AppConfig::default().version {
            self.version = other.version;
        }
        self.file_loading.merge(other.file_loading);
        self.quality.merge(other.quality);
        self.chart.merge(other.chart);
        self.analysis.merge(other.analysis);
        self.export.merge(other.export);
        self.logging.merge(other.logging);
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if !self.version.starts_with("0.1") {
            return Err(eyre!(
                "Unsupported config version: {}. Expected 0.1.x",
                self.version
            ));
        }

        let q = &self.quality;
        if q.type_sample_rows == 0 || q.scan_sample_rows == 0 {
            return Err(eyre!("quality sample sizes must be greater than 0"));
        }
        for (name, v) in [
            ("missing_high_threshold", q.missing_high_threshold),
            ("missing_medium_threshold", q.missing_medium_threshold),
            ("duplicate_threshold", q.duplicate_threshold),
        ] {
            if !(0.0..=1.0).contains(&v) {
                return Err(eyre!("{} must be between 0.0 and 1.0, got {}", name, v));
            }
        }
        if q.missing_medium_threshold > q.missing_high_threshold {
            return Err(eyre!(
                "missing_medium_threshold must not exceed missing_high_threshold"
            ));
        }

        if self.chart.pie_max_slices < 2 {
            return Err(eyre!("pie_max_slices must be at least 2"));
        }
        if self.chart.scatter_max_points == 0 {
            return Err(eyre!("scatter_max_points must be greater than 0"));
        }

        if self.analysis.sample_rows_per_part == 0 {
            return Err(eyre!("sample_rows_per_part must be greater than 0"));
        }

        if self.export.image_width == 0 || self.export.image_height == 0 {
            return Err(eyre!("image_width and image_height must be greater than 0"));
        }
        if !(self.export.image_scale > 0.0 && self.export.image_scale <= 8.0) {
            return Err(eyre!(
                "image_scale must be in (0, 8], got {}",
                self.export.image_scale
            ));
        }

        if tracing_subscriber::EnvFilter::try_new(&self.logging.level).is_err() {
            return Err(eyre!("Invalid logging level: {}", self.logging.level));
        }

        Ok(())
    }

    pub fn load_options(&self) -> LoadOptions {
        let mut opts = LoadOptions::default()
            .with_infer_schema_length(self.file_loading.infer_schema_length)
            .with_try_parse_dates(self.file_loading.try_parse_dates);
        if let Some(d) = self.file_loading.delimiter {
            opts = opts.with_delimiter(d);
        }
        opts
    }

    pub fn quality_options(&self) -> QualityOptions {
        QualityOptions {
            type_sample_rows: self.quality.type_sample_rows,
            scan_sample_rows: self.quality.scan_sample_rows,
            missing_high_threshold: self.quality.missing_high_threshold,
            missing_medium_threshold: self.quality.missing_medium_threshold,
            duplicate_threshold: self.quality.duplicate_threshold,
        }
    }

    pub fn chart_options(&self) -> ChartOptions {
        ChartOptions {
            pie_max_slices: self.chart.pie_max_slices,
            pie_label_min_percent: self.chart.pie_label_min_percent,
            scatter_max_points: self.chart.scatter_max_points,
            filter_sample_rows: self.chart.filter_sample_rows,
            filter_max_distinct: self.chart.filter_max_distinct,
            filter_max_columns: self.chart.filter_max_columns,
        }
    }

    pub fn image_options(&self) -> ImageOptions {
        ImageOptions {
            width: self.export.image_width,
            height: self.export.image_height,
            scale: self.export.image_scale,
        }
    }
}

// Merge implementations for each config section
impl FileLoadingConfig {
    pub fn merge(&mut self, other: Self) {
        let default = FileLoadingConfig::default();
        if other.delimiter.is_some() {
            self.delimiter = other.delimiter;
        }
        if other.infer_schema_length != default.infer_schema_length {
            self.infer_schema_length = other.infer_schema_length;
        }
        if other.try_parse_dates != default.try_parse_dates {
            self.try_parse_dates = other.try_parse_dates;
        }
    }
}

impl QualityConfig {
    pub fn merge(&mut self, other: Self) {
        let default = QualityConfig::default();
        if other.type_sample_rows != default.type_sample_rows {
            self.type_sample_rows = other.type_sample_rows;
        }
        if other.scan_sample_rows != default.scan_sample_rows {
            self.scan_sample_rows = other.scan_sample_rows;
        }
        if other.missing_high_threshold != default.missing_high_threshold {
            self.missing_high_threshold = other.missing_high_threshold;
        }
        if other.missing_medium_threshold != default.missing_medium_threshold {
            self.missing_medium_threshold = other.missing_medium_threshold;
        }
        if other.duplicate_threshold != default.duplicate_threshold {
            self.duplicate_threshold = other.duplicate_threshold;
        }
    }
}

impl ChartConfig {
    pub fn merge(&mut self, other: Self) {
        let default = ChartConfig::default();
        if other.default_grain != default.default_grain {
            self.default_grain = other.default_grain;
        }
        if other.pie_max_slices != default.pie_max_slices {
            self.pie_max_slices = other.pie_max_slices;
        }
        if other.pie_label_min_percent != default.pie_label_min_percent {
            self.pie_label_min_percent = other.pie_label_min_percent;
        }
        if other.scatter_max_points != default.scatter_max_points {
            self.scatter_max_points = other.scatter_max_points;
        }
        if other.filter_sample_rows != default.filter_sample_rows {
            self.filter_sample_rows = other.filter_sample_rows;
        }
        if other.filter_max_distinct != default.filter_max_distinct {
            self.filter_max_distinct = other.filter_max_distinct;
        }
        if other.filter_max_columns != default.filter_max_columns {
            self.filter_max_columns = other.filter_max_columns;
        }
    }
}

impl AnalysisConfig {
    pub fn merge(&mut self, other: Self) {
        let default = AnalysisConfig::default();
        if other.sample_rows_per_part != default.sample_rows_per_part {
            self.sample_rows_per_part = other.sample_rows_per_part;
        }
        if other.sample_char_budget != default.sample_char_budget {
            self.sample_char_budget = other.sample_char_budget;
        }
    }
}

impl ExportConfig {
    pub fn merge(&mut self, other: Self) {
        let default = ExportConfig::default();
        if other.image_width != default.image_width {
            self.image_width = other.image_width;
        }
        if other.image_height != default.image_height {
            self.image_height = other.image_height;
        }
        if other.image_scale != default.image_scale {
            self.image_scale = other.image_scale;
        }
    }
}

impl LoggingConfig {
    pub fn merge(&mut self, other: Self) {
        if other.level != LoggingConfig::default().level {
            self.level = other.level;
        }
    }
}
