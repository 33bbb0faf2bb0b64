//! CLI definitions live in the `tablesight-cli` crate so `build.rs` can render the man page.

pub use tablesight_cli::{
    render_options_markdown, AggregationArg, Args, ChartArg, FileFormat, GrainArg, TimeWindowArg,
};

use crate::chart_data::{AggregationMode, ChartType};
use crate::filter::TimeWindow;
use crate::timeseries::Grain;

impl From<ChartArg> for ChartType {
    fn from(arg: ChartArg) -> Self {
        match arg {
            ChartArg::Bar => ChartType::Bar,
            ChartArg::StackedBar => ChartType::StackedBar,
            ChartArg::Line => ChartType::Line,
            ChartArg::Area => ChartType::Area,
            ChartArg::Pie => ChartType::Pie,
            ChartArg::Scatter => ChartType::Scatter,
            ChartArg::Bubble => ChartType::Bubble,
        }
    }
}

impl From<AggregationArg> for AggregationMode {
    fn from(arg: AggregationArg) -> Self {
        match arg {
            AggregationArg::Sum => AggregationMode::Sum,
            AggregationArg::Average => AggregationMode::Average,
            AggregationArg::Count => AggregationMode::Count,
            AggregationArg::None => AggregationMode::None,
        }
    }
}

impl From<GrainArg> for Grain {
    fn from(arg: GrainArg) -> Self {
        match arg {
            GrainArg::Daily => Grain::Daily,
            GrainArg::Weekly => Grain::Weekly,
            GrainArg::Monthly => Grain::Monthly,
            GrainArg::Quarterly => Grain::Quarterly,
            GrainArg::Yearly => Grain::Yearly,
        }
    }
}

impl From<TimeWindowArg> for TimeWindow {
    fn from(arg: TimeWindowArg) -> Self {
        match arg {
            TimeWindowArg::All => TimeWindow::All,
            TimeWindowArg::Days7 => TimeWindow::Last7Days,
            TimeWindowArg::Days30 => TimeWindow::Last30Days,
            TimeWindowArg::Days90 => TimeWindow::Last90Days,
            TimeWindowArg::Ytd => TimeWindow::Ytd,
            TimeWindowArg::Custom => TimeWindow::Custom,
        }
    }
}
