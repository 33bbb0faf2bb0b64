//! Chart export to SVG (plotters vector backend) and PNG (plotters bitmap, rasterized at a
//! scale factor, 2x by default).

use color_eyre::eyre::eyre;
use color_eyre::Result;
use plotters::coord::Shift;
use plotters::prelude::*;
use std::path::Path;
use tracing::info;

use crate::chart_data::{BarData, ChartData, ChartType, PieData, ScatterData};
use crate::timeseries::TemporalData;
use crate::value::format_number;

/// Export format for chart images.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChartImageFormat {
    Svg,
    Png,
}

impl ChartImageFormat {
    pub const ALL: [Self; 2] = [Self::Svg, Self::Png];

    pub fn extension(self) -> &'static str {
        match self {
            Self::Svg => "svg",
            Self::Png => "png",
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_lowercase();
        Self::ALL.into_iter().find(|f| f.extension() == ext)
    }
}

/// Image size in logical pixels and the raster scale factor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImageOptions {
    pub width: u32,
    pub height: u32,
    pub scale: f64,
}

impl Default for ImageOptions {
    fn default() -> Self {
        Self {
            width: 800,
            height: 500,
            scale: 2.0,
        }
    }
}

impl ImageOptions {
    /// Pixel dimensions of the rasterized image.
    pub fn raster_size(&self) -> (u32, u32) {
        let s = self.scale.max(0.1);
        (
            (self.width as f64 * s).round() as u32,
            (self.height as f64 * s).round() as u32,
        )
    }
}

const PALETTE: [RGBColor; 8] = [
    RGBColor(59, 130, 246),
    RGBColor(16, 185, 129),
    RGBColor(245, 158, 11),
    RGBColor(239, 68, 68),
    RGBColor(139, 92, 246),
    RGBColor(236, 72, 153),
    RGBColor(20, 184, 166),
    RGBColor(107, 114, 128),
];

fn series_color(idx: usize) -> RGBColor {
    PALETTE[idx % PALETTE.len()]
}

/// Writes the chart to `path`; the format follows the extension.
pub fn export_chart(
    path: &Path,
    data: &ChartData,
    chart_type: ChartType,
    title: Option<&str>,
    options: &ImageOptions,
) -> Result<()> {
    match ChartImageFormat::from_path(path) {
        Some(ChartImageFormat::Svg) => {
            let svg = render_svg(data, chart_type, title, options)?;
            std::fs::write(path, svg)?;
        }
        Some(ChartImageFormat::Png) => write_png(path, data, chart_type, title, options)?,
        None => {
            return Err(eyre!(
                "Unsupported chart image extension for {} (expected .svg or .png)",
                path.display()
            ))
        }
    }
    info!(path = %path.display(), chart = chart_type.as_str(), "exported chart");
    Ok(())
}

/// Renders the chart as an SVG document.
pub fn render_svg(
    data: &ChartData,
    chart_type: ChartType,
    title: Option<&str>,
    options: &ImageOptions,
) -> Result<String> {
    ensure_not_empty(data)?;
    let mut svg = String::new();
    {
        let root = SVGBackend::with_string(&mut svg, (options.width, options.height))
            .into_drawing_area();
        draw_chart(&root, data, chart_type, title, 1.0)?;
        root.present()?;
    }
    Ok(svg)
}

/// Rasterizes the chart to PNG at `options.scale` times the logical size.
pub fn write_png(
    path: &Path,
    data: &ChartData,
    chart_type: ChartType,
    title: Option<&str>,
    options: &ImageOptions,
) -> Result<()> {
    ensure_not_empty(data)?;
    let root = BitMapBackend::new(path, options.raster_size()).into_drawing_area();
    draw_chart(&root, data, chart_type, title, options.scale)?;
    root.present()?;
    Ok(())
}

fn ensure_not_empty(data: &ChartData) -> Result<()> {
    if data.is_empty() {
        Err(eyre!("No data to export"))
    } else {
        Ok(())
    }
}

fn draw_chart<DB: DrawingBackend>(
    root: &DrawingArea<DB, Shift>,
    data: &ChartData,
    chart_type: ChartType,
    title: Option<&str>,
    scale: f64,
) -> Result<()>
where
    DB::ErrorType: 'static,
{
    root.fill(&WHITE)?;
    let area = match title.filter(|t| !t.is_empty()) {
        Some(t) => root.titled(t, ("sans-serif", 20.0 * scale))?,
        None => root.clone(),
    };
    match data {
        ChartData::Bar(bars) => draw_bars(&area, bars, chart_type == ChartType::StackedBar, scale),
        ChartData::Temporal(t) => draw_temporal(&area, t, chart_type == ChartType::Area, scale),
        ChartData::Pie(p) => draw_pie(&area, p, scale),
        ChartData::Scatter(s) => draw_scatter(&area, s, chart_type == ChartType::Bubble, scale),
    }
}

fn px(v: f64, scale: f64) -> u32 {
    (v * scale).round().max(1.0) as u32
}

/// Label for a category axis tick; blank between categories.
fn label_at(labels: &[String], v: f64) -> String {
    let idx = v.round();
    if (v - idx).abs() > 0.25 || idx < 0.0 {
        return String::new();
    }
    labels.get(idx as usize).cloned().unwrap_or_default()
}

/// (min, max) padded so bars and lines do not touch the frame; always includes zero.
fn value_range(values: impl Iterator<Item = f64>) -> (f64, f64) {
    let (lo, hi) = values.fold((0.0_f64, 0.0_f64), |(lo, hi), v| (lo.min(v), hi.max(v)));
    let pad = ((hi - lo) * 0.05).max(1e-9);
    (if lo < 0.0 { lo - pad } else { lo }, hi + pad)
}

fn draw_bars<DB: DrawingBackend>(
    area: &DrawingArea<DB, Shift>,
    bars: &BarData,
    stacked: bool,
    scale: f64,
) -> Result<()>
where
    DB::ErrorType: 'static,
{
    let n = bars.groups.len();
    let labels: Vec<String> = bars.groups.iter().map(|g| g.label.clone()).collect();
    let (y_min, y_max) = if stacked {
        value_range(bars.groups.iter().map(|g| g.total))
    } else {
        value_range(bars.groups.iter().flat_map(|g| g.values.iter().copied()))
    };

    let mut chart = ChartBuilder::on(area)
        .margin(px(20.0, scale))
        .x_label_area_size(px(40.0, scale))
        .y_label_area_size(px(bars.axis_width as f64 * 0.5, scale))
        .build_cartesian_2d(-0.5..(n as f64 - 0.5), y_min..y_max)?;
    chart
        .configure_mesh()
        .disable_x_mesh()
        .x_labels(n.min(20))
        .x_label_formatter(&|v: &f64| label_at(&labels, *v))
        .y_label_formatter(&|v: &f64| format_number(*v))
        .label_style(("sans-serif", 12.0 * scale))
        .draw()?;

    let series_count = bars.series.len().max(1);
    let width = 0.8 / series_count as f64;
    for (s, name) in bars.series.iter().enumerate() {
        let color = series_color(s);
        let rects: Vec<Rectangle<(f64, f64)>> = bars
            .groups
            .iter()
            .enumerate()
            .map(|(i, g)| {
                let v = g.values.get(s).copied().unwrap_or(0.0);
                let x = i as f64;
                if stacked {
                    let base: f64 = g.values.iter().take(s).sum();
                    Rectangle::new([(x - 0.4, base), (x + 0.4, base + v)], color.filled())
                } else {
                    let x0 = x - 0.4 + s as f64 * width;
                    Rectangle::new([(x0, 0.0), (x0 + width, v)], color.filled())
                }
            })
            .collect();
        chart
            .draw_series(rects)?
            .label(name.as_str())
            .legend(move |(x, y)| Rectangle::new([(x, y - 5), (x + 10, y + 5)], color.filled()));
    }
    if bars.series.len() > 1 {
        chart
            .configure_series_labels()
            .background_style(WHITE.mix(0.8))
            .border_style(BLACK)
            .label_font(("sans-serif", 12.0 * scale))
            .draw()?;
    }
    Ok(())
}

fn draw_temporal<DB: DrawingBackend>(
    area: &DrawingArea<DB, Shift>,
    data: &TemporalData,
    filled: bool,
    scale: f64,
) -> Result<()>
where
    DB::ErrorType: 'static,
{
    let n = data.points.len();
    let labels: Vec<String> = data.points.iter().map(|p| p.label.clone()).collect();
    let (y_min, y_max) = value_range(data.points.iter().flat_map(|p| p.values.iter().flatten().copied()));
    let x_max = (n as f64 - 1.0).max(0.5);

    let mut chart = ChartBuilder::on(area)
        .margin(px(20.0, scale))
        .x_label_area_size(px(40.0, scale))
        .y_label_area_size(px(60.0, scale))
        .build_cartesian_2d(-0.5..x_max + 0.5, y_min..y_max)?;
    chart
        .configure_mesh()
        .x_labels(n.min(12))
        .x_label_formatter(&|v: &f64| label_at(&labels, *v))
        .y_label_formatter(&|v: &f64| format_number(*v))
        .label_style(("sans-serif", 12.0 * scale))
        .draw()?;

    let stroke = px(2.0, scale);
    for (s, name) in data.series.iter().enumerate() {
        let color = series_color(s);
        let points: Vec<(f64, f64)> = data
            .points
            .iter()
            .enumerate()
            .filter_map(|(i, p)| p.values.get(s).copied().flatten().map(|v| (i as f64, v)))
            .collect();
        if points.is_empty() {
            continue;
        }
        let anno = if filled {
            chart.draw_series(
                AreaSeries::new(points, 0.0, color.mix(0.3))
                    .border_style(color.stroke_width(stroke)),
            )?
        } else {
            chart.draw_series(LineSeries::new(points, color.stroke_width(stroke)))?
        };
        anno.label(name.as_str())
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color));
    }
    if data.series.len() > 1 {
        chart
            .configure_series_labels()
            .background_style(WHITE.mix(0.8))
            .border_style(BLACK)
            .label_font(("sans-serif", 12.0 * scale))
            .draw()?;
    }
    Ok(())
}

/// Points approximating a pie sector from `start` to `end` radians.
fn sector(center: (i32, i32), radius: f64, start: f64, end: f64) -> Vec<(i32, i32)> {
    let steps = (((end - start) / 0.05).ceil() as usize).max(1);
    let mut points = vec![center];
    for k in 0..=steps {
        let a = start + (end - start) * k as f64 / steps as f64;
        points.push((
            center.0 + (radius * a.cos()).round() as i32,
            center.1 + (radius * a.sin()).round() as i32,
        ));
    }
    points
}

fn draw_pie<DB: DrawingBackend>(area: &DrawingArea<DB, Shift>, pie: &PieData, scale: f64) -> Result<()>
where
    DB::ErrorType: 'static,
{
    let (w, h) = area.dim_in_pixel();
    let center = (w as i32 / 2, h as i32 / 2);
    let radius = w.min(h) as f64 * 0.35;
    let font = ("sans-serif", 12.0 * scale).into_font();

    let mut angle = -std::f64::consts::FRAC_PI_2;
    for (i, slice) in pie.slices.iter().enumerate() {
        if pie.total <= 0.0 || slice.value <= 0.0 {
            continue;
        }
        let sweep = slice.value / pie.total * std::f64::consts::TAU;
        area.draw(&Polygon::new(
            sector(center, radius, angle, angle + sweep),
            series_color(i).filled(),
        ))?;
        if slice.show_label {
            let mid = angle + sweep / 2.0;
            let pos = (
                center.0 + (radius * 1.2 * mid.cos()).round() as i32,
                center.1 + (radius * 1.2 * mid.sin()).round() as i32,
            );
            area.draw(&Text::new(
                format!("{} ({:.0}%)", slice.label, slice.percent),
                pos,
                font.clone(),
            ))?;
        }
        angle += sweep;
    }
    Ok(())
}

fn draw_scatter<DB: DrawingBackend>(
    area: &DrawingArea<DB, Shift>,
    data: &ScatterData,
    bubble: bool,
    scale: f64,
) -> Result<()>
where
    DB::ErrorType: 'static,
{
    let all = || data.series.iter().flat_map(|s| s.points.iter());
    let bounds = |f: fn(&crate::chart_data::ScatterPoint) -> f64| {
        let (lo, hi) = all().map(f).fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(v), hi.max(v))
        });
        let pad = ((hi - lo) * 0.05).max(0.5);
        (lo - pad, hi + pad)
    };
    let (x_min, x_max) = bounds(|p| p.x);
    let (y_min, y_max) = bounds(|p| p.y);
    let (z_min, z_max) = all()
        .filter_map(|p| p.z)
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));

    let mut chart = ChartBuilder::on(area)
        .margin(px(20.0, scale))
        .x_label_area_size(px(40.0, scale))
        .y_label_area_size(px(60.0, scale))
        .build_cartesian_2d(x_min..x_max, y_min..y_max)?;
    chart
        .configure_mesh()
        .x_label_formatter(&|v: &f64| format_number(*v))
        .y_label_formatter(&|v: &f64| format_number(*v))
        .label_style(("sans-serif", 12.0 * scale))
        .draw()?;

    let radius = |z: Option<f64>| -> u32 {
        let base = match (bubble, z) {
            (true, Some(z)) if z_max > z_min => 3.0 + 17.0 * (z - z_min) / (z_max - z_min),
            (true, Some(_)) => 10.0,
            _ => 3.0,
        };
        px(base, scale)
    };
    for (s, series) in data.series.iter().enumerate() {
        let color = series_color(s);
        chart
            .draw_series(
                series
                    .points
                    .iter()
                    .map(|p| Circle::new((p.x, p.y), radius(p.z), color.mix(0.7).filled())),
            )?
            .label(series.name.as_str())
            .legend(move |(x, y)| Circle::new((x + 5, y), 4, color.filled()));
    }
    if data.series.len() > 1 {
        chart
            .configure_series_labels()
            .background_style(WHITE.mix(0.8))
            .border_style(BLACK)
            .label_font(("sans-serif", 12.0 * scale))
            .draw()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chart_data::PieSlice;

    #[test]
    fn test_format_from_path() {
        assert_eq!(
            ChartImageFormat::from_path(Path::new("chart.SVG")),
            Some(ChartImageFormat::Svg)
        );
        assert_eq!(
            ChartImageFormat::from_path(Path::new("chart.png")),
            Some(ChartImageFormat::Png)
        );
        assert_eq!(ChartImageFormat::from_path(Path::new("chart.eps")), None);
    }

    #[test]
    fn test_raster_is_twice_logical_size_by_default() {
        assert_eq!(ImageOptions::default().raster_size(), (1600, 1000));
    }

    #[test]
    fn test_empty_chart_is_rejected() {
        let data = ChartData::Pie(PieData {
            slices: Vec::<PieSlice>::new(),
            total: 0.0,
        });
        let err = render_svg(&data, ChartType::Pie, None, &ImageOptions::default()).unwrap_err();
        assert!(err.to_string().contains("No data"));
    }

    #[test]
    fn test_unknown_extension_is_rejected() {
        let data = ChartData::Pie(PieData {
            slices: vec![PieSlice {
                label: "a".into(),
                value: 1.0,
                percent: 100.0,
                show_label: true,
            }],
            total: 1.0,
        });
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chart.gif");
        assert!(export_chart(&path, &data, ChartType::Pie, None, &ImageOptions::default()).is_err());
        assert!(!path.exists());
    }

    #[test]
    fn test_sector_starts_at_center() {
        let pts = sector((50, 50), 10.0, 0.0, std::f64::consts::FRAC_PI_2);
        assert_eq!(pts[0], (50, 50));
        assert_eq!(pts[1], (60, 50));
        assert_eq!(*pts.last().unwrap(), (50, 60));
    }

    #[test]
    fn test_label_at_snaps_to_categories() {
        let labels = vec!["a".to_string(), "b".to_string()];
        assert_eq!(label_at(&labels, 1.0), "b");
        assert_eq!(label_at(&labels, 0.5), "");
        assert_eq!(label_at(&labels, 5.0), "");
    }
}
