//! CSV export of the visible rows.
//!
//! Every field, header included, is written as a JSON string literal, so embedded quotes,
//! commas and newlines survive. Nulls export as `""`.

use color_eyre::Result;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::info;

use crate::value::Dataset;

fn quote(s: &str) -> Result<String> {
    Ok(serde_json::to_string(s)?)
}

pub fn write_csv<W: Write>(dataset: &Dataset, mut writer: W) -> Result<()> {
    let header = dataset
        .columns
        .iter()
        .map(|c| quote(c))
        .collect::<Result<Vec<_>>>()?;
    writeln!(writer, "{}", header.join(","))?;
    for row in &dataset.rows {
        let line = row
            .iter()
            .map(|v| quote(&v.to_display_string()))
            .collect::<Result<Vec<_>>>()?;
        writeln!(writer, "{}", line.join(","))?;
    }
    writer.flush()?;
    Ok(())
}

pub fn csv_string(dataset: &Dataset) -> Result<String> {
    let mut buf = Vec::new();
    write_csv(dataset, &mut buf)?;
    Ok(String::from_utf8(buf)?)
}

pub fn export_csv(dataset: &Dataset, path: &Path) -> Result<()> {
    let file = File::create(path)?;
    write_csv(dataset, BufWriter::new(file))?;
    info!(path = %path.display(), rows = dataset.len(), "exported CSV");
    Ok(())
}
