//! User-facing error messages for load and export failures.
//!
//! Matches on typed errors (LoadError, PolarsError variants, io::ErrorKind) rather than
//! parsing message strings.

use polars::prelude::PolarsError;
use std::io;
use std::path::Path;

use crate::source::LoadError;

/// Message for a failed file load.
pub fn user_message_from_load_error(err: &LoadError) -> String {
    match err {
        LoadError::Csv(pe) => user_message_from_polars(pe),
        LoadError::Io(io_err) => user_message_from_io(io_err, None),
        LoadError::Excel(msg) => format!("Could not read the workbook: {}", msg),
        LoadError::Empty | LoadError::UnsupportedFormat(_) => err.to_string(),
    }
}

/// Format a PolarsError from the CSV reader.
pub fn user_message_from_polars(err: &PolarsError) -> String {
    use polars::prelude::PolarsError as PE;

    match err {
        PE::IO { error, msg } => {
            user_message_from_io(error.as_ref(), msg.as_ref().map(|m| m.as_ref()))
        }
        PE::NoData(_) => "The file contains no data rows".to_string(),
        PE::ComputeError(msg) => format!("Could not parse the file: {}", first_line(msg)),
        PE::SchemaMismatch(msg) | PE::ShapeMismatch(msg) => format!(
            "Rows do not match the header: {}. Check the delimiter.",
            first_line(msg)
        ),
        PE::Duplicate(msg) => format!("Duplicate column name in header: {}", msg),
        PE::ColumnNotFound(msg) => format!("Column not found: {}", msg),
        PE::Context { error, msg } => format!("{}: {}", msg, user_message_from_polars(error)),
        #[allow(unreachable_patterns)]
        _ => first_line(&err.to_string()).to_string(),
    }
}

/// Format an io::Error by ErrorKind.
pub fn user_message_from_io(err: &io::Error, context: Option<&str>) -> String {
    use std::io::ErrorKind;

    let base: String = match err.kind() {
        ErrorKind::NotFound => "File or directory not found.".to_string(),
        ErrorKind::PermissionDenied => "Permission denied. Check read access.".to_string(),
        ErrorKind::InvalidData | ErrorKind::InvalidInput => {
            "Invalid or corrupted data.".to_string()
        }
        ErrorKind::UnexpectedEof => "Unexpected end of file.".to_string(),
        ErrorKind::OutOfMemory => "Out of memory.".to_string(),
        ErrorKind::Other => {
            let msg = err.to_string();
            if msg.contains("No space left") {
                return "No space left on device. Free up disk space and try again.".to_string();
            }
            if msg.contains("Is a directory") {
                return "Path is a directory, not a file.".to_string();
            }
            return msg;
        }
        _ => err.to_string(),
    };

    match context {
        Some(ctx) if !ctx.is_empty() => format!("{} {}", base, ctx),
        _ => base,
    }
}

/// Walks a report's cause chain for a known error type; falls back to the first line of the
/// report. With a path, the message is prefixed "Failed to load <path>".
pub fn user_message_from_report(report: &color_eyre::eyre::Report, path: Option<&Path>) -> String {
    let msg = report
        .chain()
        .find_map(|cause| {
            if let Some(le) = cause.downcast_ref::<LoadError>() {
                Some(user_message_from_load_error(le))
            } else if let Some(pe) = cause.downcast_ref::<PolarsError>() {
                Some(user_message_from_polars(pe))
            } else {
                cause
                    .downcast_ref::<io::Error>()
                    .map(|io_err| user_message_from_io(io_err, None))
            }
        })
        .unwrap_or_else(|| {
            let display = report.to_string();
            first_line(&display).to_string()
        });
    match path {
        Some(p) => format!("Failed to load {}: {}", p.display(), msg),
        None => msg,
    }
}

fn first_line(s: &str) -> &str {
    s.lines().next().map(str::trim).unwrap_or("An error occurred")
}
