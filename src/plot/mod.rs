//! Descriptive plots of outcome against age.
//!
//! Box statistics are computed separately from drawing so they can be
//! tested without rendering.

pub mod render;
pub mod summary;

pub use render::{render_all, render_boxplot, render_scatter, PlotConfig};
pub use summary::{box_summary, grouped_box_summaries, quantile, BoxSummary};
