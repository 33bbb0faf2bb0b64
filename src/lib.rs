//! tablesight: profile, transform and chart tabular data files.
//!
//! Data flows leaf-first through the modules: [`source`] parses a file into a [`Dataset`],
//! [`quality`] scores it, [`transform`] replays the user's pipeline (on the [`worker`] thread),
//! [`filter`] narrows the visible rows and [`chart_data`] / [`timeseries`] aggregate them into
//! chart series.

pub mod analysis;
pub mod chart_data;
pub mod chart_export;
pub mod cli;
pub mod config;
pub mod error_display;
pub mod export;
pub mod filter;
pub mod formula;
pub mod logging;
pub mod quality;
pub mod source;
pub mod timeseries;
pub mod transform;
pub mod value;
pub mod worker;

pub use analysis::{AnalysisResult, AnalysisSample, ChartRecommendation, Kpi};
pub use chart_data::{AggregationMode, ChartData, ChartMapping, ChartOptions, ChartType};
pub use cli::{Args, FileFormat};
pub use config::{AppConfig, ConfigManager};
pub use filter::{ChartView, FilterState, TimeFilter, TimeWindow};
pub use formula::{Formula, FormulaError};
pub use quality::{QualityIssue, QualityReport};
pub use source::{LoadError, LoadOptions};
pub use timeseries::Grain;
pub use transform::{Pipeline, Transformation};
pub use value::{Dataset, Value};
pub use worker::{LoadJob, LoadPhase, Session, SessionUpdate};

/// Application name used for the config directory and other app-specific paths
pub const APP_NAME: &str = "tablesight";
