use chrono::{Local, NaiveDate};
use clap::Parser;
use color_eyre::eyre::{eyre, WrapErr};
use color_eyre::Result;
use serde::Serialize;
use std::path::Path;
use tracing::info;

use tablesight::analysis::{evaluate_kpi, validate_recommendations, KpiValue};
use tablesight::chart_data::{ChartData, ChartMapping, ChartType, FilterableColumn};
use tablesight::chart_export::export_chart;
use tablesight::error_display::user_message_from_report;
use tablesight::export::export_csv;
use tablesight::filter::{ChartView, FilterState, TimeFilter, TimeWindow};
use tablesight::source::{LoadError, LoadOptions};
use tablesight::{
    logging, AnalysisResult, AnalysisSample, AppConfig, Args, ConfigManager, Dataset, FileFormat,
    LoadJob, Pipeline, QualityReport, Session, SessionUpdate, APP_NAME,
};

/// Everything printed to stdout, as one JSON document.
#[derive(Serialize)]
struct Output<'a> {
    file: String,
    rows: usize,
    columns: &'a [String],
    quality: &'a QualityReport,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pipeline: Vec<String>,
    visible_rows: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    filterable_columns: Option<Vec<FilterableColumn>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    chart: Option<ChartData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    recommendations: Option<AnalysisResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    kpis: Option<Vec<KpiValue>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sample: Option<&'a AnalysisSample>,
}

fn load_options(args: &Args, config: &AppConfig) -> LoadOptions {
    let mut opts = config.load_options();
    if let Some(format) = args.format {
        opts = opts.with_format(format);
    }
    if let Some(delimiter) = args.delimiter {
        opts = opts.with_delimiter(delimiter);
    }
    if let Some(n) = args.infer_schema_length {
        opts = opts.with_infer_schema_length(n);
    }
    if let Some(parse_dates) = args.parse_dates {
        opts = opts.with_try_parse_dates(parse_dates);
    }
    opts
}

/// Parses a `COL=VAL` categorical filter.
fn parse_filter(spec: &str) -> Result<(&str, &str)> {
    spec.split_once('=')
        .filter(|(col, _)| !col.trim().is_empty())
        .map(|(col, val)| (col.trim(), val))
        .ok_or_else(|| eyre!("Invalid --filter '{}'. Expected COL=VAL", spec))
}

fn parse_date_arg(flag: &str, value: Option<&str>) -> Result<Option<NaiveDate>> {
    value
        .map(|s| {
            NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
                .map_err(|_| eyre!("Invalid {} '{}'. Expected YYYY-MM-DD", flag, s))
        })
        .transpose()
}

fn filter_state(args: &Args, config: &AppConfig) -> Result<FilterState> {
    let mut state = FilterState::new();
    for spec in &args.filter {
        let (column, value) = parse_filter(spec)?;
        state.allow(column, value);
    }
    let window: TimeWindow = args.time_filter.map(Into::into).unwrap_or_default();
    state.time = match window {
        TimeWindow::Custom => TimeFilter::custom(
            parse_date_arg("--time-start", args.time_start.as_deref())?,
            parse_date_arg("--time-end", args.time_end.as_deref())?,
        ),
        preset => TimeFilter::preset(preset),
    };
    state.grain = args
        .grain
        .map(Into::into)
        .unwrap_or(config.chart.default_grain);
    if state.time.is_active() && args.date_column.is_none() {
        return Err(eyre!("--time-filter requires --date-column"));
    }
    Ok(state)
}

fn chart_view(args: &Args, filters: FilterState) -> Result<Option<ChartView>> {
    let Some(chart) = args.chart else {
        return Ok(None);
    };
    let chart_type: ChartType = chart.into();
    let x = args
        .x
        .clone()
        .ok_or_else(|| eyre!("--chart {} requires --x", chart_type.as_str()))?;
    let mut mapping = ChartMapping::new(x, args.y.clone().unwrap_or_default());
    if let Some(color) = &args.color {
        mapping = mapping.with_color(color.clone());
    }
    if let Some(z) = &args.z {
        mapping = mapping.with_z(z.clone());
    }
    if let Some(aggregation) = args.aggregation {
        mapping = mapping.with_aggregation(aggregation.into());
    }
    let mut view = ChartView::new(chart_type, mapping);
    if let Some(date_column) = &args.date_column {
        view = view.with_date_column(date_column.clone());
    }
    view.filters = filters;
    Ok(Some(view))
}

fn load_job(path: &Path, args: &Args, config: &AppConfig) -> Result<LoadJob> {
    let format = args
        .format
        .or_else(|| FileFormat::from_path(path))
        .ok_or_else(|| {
            LoadError::UnsupportedFormat(
                path.extension()
                    .and_then(|e| e.to_str())
                    .unwrap_or("(no extension)")
                    .to_string(),
            )
        })?;
    let bytes = std::fs::read(path).map_err(LoadError::from)?;
    Ok(LoadJob::new(bytes, format)
        .with_options(load_options(args, config))
        .with_quality(config.quality_options())
        .with_sample(
            config.analysis.sample_rows_per_part,
            config.analysis.sample_char_budget,
        ))
}

fn run(path: &Path, args: &Args, config: &AppConfig) -> Result<()> {
    let today = Local::now().date_naive();
    let filters = filter_state(args, config)?;
    let view = chart_view(args, filters.clone())?;

    let pipeline = match &args.transforms {
        Some(file) => {
            let json = std::fs::read_to_string(file)
                .wrap_err_with(|| format!("Failed to read {}", file.display()))?;
            Pipeline::from_json(&json)
                .wrap_err_with(|| format!("Invalid transformation list in {}", file.display()))?
        }
        None => Pipeline::new(),
    };

    let job = load_job(path, args, config)
        .map_err(|e| eyre!("{}", user_message_from_report(&e, Some(path))))?;
    let mut session = Session::new()?;
    session.set_pipeline(pipeline)?;
    session.load(job)?;
    session.wait(|update| {
        if let SessionUpdate::Progress(phase) = update {
            info!(phase = phase.as_str(), percent = phase.percent(), "loading");
        }
    })?;
    if let Some(message) = session.last_error() {
        return Err(eyre!("Failed to load {}: {}", path.display(), message));
    }

    let (Some(raw), Some(current), Some(report)) =
        (session.raw(), session.current(), session.report())
    else {
        return Err(eyre!("Failed to load {}", path.display()));
    };
    let current: &Dataset = current;

    let chart_options = config.chart_options();
    let (visible, chart, filterable) = match &view {
        Some(view) => {
            let chart = view.compute(current, &chart_options, today)?;
            (
                view.visible_rows(current, today),
                Some(chart),
                Some(view.filterable_columns(current, &chart_options)),
            )
        }
        None => (
            filters.apply(current, args.date_column.as_deref(), today),
            None,
            None,
        ),
    };

    let recommendations = match &args.recommendations {
        Some(file) => {
            let json = std::fs::read_to_string(file)
                .wrap_err_with(|| format!("Failed to read {}", file.display()))?;
            let result = AnalysisResult::from_json(&json)
                .wrap_err_with(|| format!("Invalid analysis result in {}", file.display()))?;
            Some(validate_recommendations(result, current))
        }
        None => None,
    };
    let kpis: Option<Vec<KpiValue>> = recommendations
        .as_ref()
        .map(|r| r.kpis.iter().map(|k| evaluate_kpi(k, &visible)).collect());

    if let Some(out) = &args.export_csv {
        export_csv(&visible, out)
            .wrap_err_with(|| format!("Failed to export CSV to {}", out.display()))?;
    }
    if let (Some(out), Some(view), Some(data)) = (&args.export_chart, &view, &chart) {
        let mapping = view.mapping();
        let title = if mapping.y.is_empty() {
            mapping.x.clone()
        } else {
            format!("{} by {}", mapping.y, mapping.x)
        };
        export_chart(
            out,
            data,
            view.chart_type(),
            Some(&title),
            &config.image_options(),
        )
        .wrap_err_with(|| format!("Failed to export chart to {}", out.display()))?;
    }

    let output = Output {
        file: path.display().to_string(),
        rows: raw.len(),
        columns: &current.columns,
        quality: report,
        pipeline: session
            .pipeline()
            .steps()
            .iter()
            .map(|s| s.describe())
            .collect(),
        visible_rows: visible.len(),
        filterable_columns: filterable,
        chart,
        recommendations,
        kpis,
        sample: if args.sample { session.sample() } else { None },
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn handle_early_exit_flags(args: &Args) -> Result<Option<()>> {
    if args.generate_config {
        match ConfigManager::new(APP_NAME) {
            Ok(config_manager) => match config_manager.write_default_config(args.force) {
                Ok(path) => {
                    println!("Configuration file written to: {}", path.display());
                    return Ok(Some(()));
                }
                Err(e) => {
                    eprintln!("Error writing configuration file: {}", e);
                    std::process::exit(1);
                }
            },
            Err(e) => {
                eprintln!("Error initializing config manager: {}", e);
                std::process::exit(1);
            }
        }
    }
    Ok(None)
}

fn main() -> Result<()> {
    let args = Args::parse();

    if let Some(()) = handle_early_exit_flags(&args)? {
        return Ok(());
    }

    color_eyre::install()?;

    let config = match AppConfig::load(APP_NAME) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading configuration: {}", e);
            std::process::exit(1);
        }
    };
    logging::init(args.log_level.as_deref(), &config.logging.level);

    let Some(path) = args.path.clone() else {
        eprintln!("Error: no input file given");
        std::process::exit(2);
    };
    if let Err(e) = run(&path, &args, &config) {
        eprintln!("Error: {}", user_message_from_report(&e, None));
        std::process::exit(1);
    }
    Ok(())
}
