//! SVG rendering of the descriptive plots.

use crate::data::Table;
use crate::error::{LmmError, Result};
use crate::plot::summary::{grouped_box_summaries, BoxSummary};
use log::info;
use plotters::coord::types::RangedCoordf64;
use plotters::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

type Chart2d<'a, 'b> = ChartContext<'a, SVGBackend<'b>, Cartesian2d<RangedCoordf64, RangedCoordf64>>;
type DrawResult = std::result::Result<(), Box<dyn std::error::Error>>;

/// Plot output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlotConfig {
    pub enabled: bool,
    pub output_dir: String,
    pub scatter_file: String,
    pub boxplot_file: String,
    pub image_size: (u32, u32),
    pub font_size: u32,
    pub point_size: i32,
    /// Opacity of scatter points.
    pub alpha: f64,
    pub scatter_title: String,
    pub boxplot_title: String,
    pub x_label: String,
    pub y_label: String,
}

impl Default for PlotConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            output_dir: "plots".to_string(),
            scatter_file: "vsae_vs_age.svg".to_string(),
            boxplot_file: "vsae_by_age.svg".to_string(),
            image_size: (1000, 600),
            font_size: 24,
            point_size: 4,
            alpha: 0.6,
            scatter_title: "Socialization Score (VSAE) vs. Age".to_string(),
            boxplot_title: "Distribution of VSAE Scores at Each Measured Age".to_string(),
            x_label: "Age (years)".to_string(),
            y_label: "VSAE Score".to_string(),
        }
    }
}

fn padded_range(values: impl Iterator<Item = f64>) -> (f64, f64) {
    let (lo, hi) = values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
        (lo.min(v), hi.max(v))
    });
    if !lo.is_finite() || !hi.is_finite() {
        return (0.0, 1.0);
    }
    let pad = if hi > lo { 0.05 * (hi - lo) } else { 1.0 };
    (lo - pad, hi + pad)
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

/// Scatter plot of `y` against `x`, one point per row.
pub fn render_scatter(
    table: &Table,
    x: &str,
    y: &str,
    path: &Path,
    options: &PlotConfig,
) -> Result<()> {
    let xs = table.numeric_column(x)?;
    let ys = table.numeric_column(y)?;
    ensure_parent(path)?;

    draw_scatter(&xs, &ys, path, options).map_err(|e| LmmError::Plot(e.to_string()))?;
    info!("Wrote scatter plot to {}", path.display());
    Ok(())
}

fn draw_scatter(xs: &[f64], ys: &[f64], path: &Path, options: &PlotConfig) -> DrawResult {
    let root = SVGBackend::new(path, options.image_size).into_drawing_area();
    root.fill(&WHITE)?;

    let x_range = padded_range(xs.iter().copied());
    let y_range = padded_range(ys.iter().copied());

    let mut chart: Chart2d<'_, '_> = ChartBuilder::on(&root)
        .caption(&options.scatter_title, ("sans-serif", options.font_size).into_font())
        .margin(20)
        .x_label_area_size(50)
        .y_label_area_size(60)
        .build_cartesian_2d(x_range.0..x_range.1, y_range.0..y_range.1)?;

    chart
        .configure_mesh()
        .x_desc(options.x_label.as_str())
        .y_desc(options.y_label.as_str())
        .draw()?;

    let style = BLUE.mix(options.alpha).filled();
    chart.draw_series(
        xs.iter()
            .zip(ys)
            .map(|(&x, &y)| Circle::new((x, y), options.point_size, style)),
    )?;

    root.present()?;
    Ok(())
}

/// Box plot of `y` at each distinct value of `x`.
pub fn render_boxplot(
    table: &Table,
    x: &str,
    y: &str,
    path: &Path,
    options: &PlotConfig,
) -> Result<()> {
    let xs = table.numeric_column(x)?;
    let ys = table.numeric_column(y)?;
    let groups = grouped_box_summaries(&xs, &ys);
    if groups.is_empty() {
        return Err(LmmError::EmptyData(format!(
            "No values of '{}' to plot",
            y
        )));
    }
    ensure_parent(path)?;

    draw_boxplot(&groups, path, options).map_err(|e| LmmError::Plot(e.to_string()))?;
    info!(
        "Wrote box plot ({} groups) to {}",
        groups.len(),
        path.display()
    );
    Ok(())
}

fn draw_boxplot(groups: &[(f64, BoxSummary)], path: &Path, options: &PlotConfig) -> DrawResult {
    let root = SVGBackend::new(path, options.image_size).into_drawing_area();
    root.fill(&WHITE)?;

    let y_range = padded_range(groups.iter().flat_map(|(_, s)| {
        [s.lower_whisker, s.upper_whisker]
            .into_iter()
            .chain(s.outliers.iter().copied())
    }));
    let k = groups.len();

    // Boxes sit at positions 1..=k, labelled with their x value
    let labels: Vec<String> = groups
        .iter()
        .map(|(key, _)| {
            if key.fract() == 0.0 {
                format!("{}", *key as i64)
            } else {
                format!("{}", key)
            }
        })
        .collect();
    let label_for = |v: &f64| -> String {
        let pos = v.round();
        if (v - pos).abs() < 1e-6 && pos >= 1.0 && pos <= k as f64 {
            labels[pos as usize - 1].clone()
        } else {
            String::new()
        }
    };

    let mut chart: Chart2d<'_, '_> = ChartBuilder::on(&root)
        .caption(&options.boxplot_title, ("sans-serif", options.font_size).into_font())
        .margin(20)
        .x_label_area_size(50)
        .y_label_area_size(60)
        .build_cartesian_2d(0.5..(k as f64 + 0.5), y_range.0..y_range.1)?;

    chart
        .configure_mesh()
        .x_labels(k + 2)
        .x_label_formatter(&label_for)
        .disable_x_mesh()
        .x_desc(options.x_label.as_str())
        .y_desc(options.y_label.as_str())
        .draw()?;

    let half = 0.25;
    let cap = 0.1;
    for (i, (_, s)) in groups.iter().enumerate() {
        let c = (i + 1) as f64;

        chart.draw_series(std::iter::once(Rectangle::new(
            [(c - half, s.q1), (c + half, s.q3)],
            BLUE.mix(0.3).filled(),
        )))?;
        chart.draw_series(std::iter::once(Rectangle::new(
            [(c - half, s.q1), (c + half, s.q3)],
            BLUE.stroke_width(1),
        )))?;

        let segments = [
            vec![(c - half, s.median), (c + half, s.median)],
            vec![(c, s.q3), (c, s.upper_whisker)],
            vec![(c, s.q1), (c, s.lower_whisker)],
            vec![(c - cap, s.upper_whisker), (c + cap, s.upper_whisker)],
            vec![(c - cap, s.lower_whisker), (c + cap, s.lower_whisker)],
        ];
        for (j, seg) in segments.into_iter().enumerate() {
            let style = if j == 0 {
                RED.stroke_width(2)
            } else {
                BLACK.stroke_width(1)
            };
            chart.draw_series(std::iter::once(PathElement::new(seg, style)))?;
        }

        chart.draw_series(
            s.outliers
                .iter()
                .map(|&v| Circle::new((c, v), options.point_size, BLACK.stroke_width(1))),
        )?;
    }

    root.present()?;
    Ok(())
}

/// Render both plots into `options.output_dir`, returning the written paths.
pub fn render_all(table: &Table, x: &str, y: &str, options: &PlotConfig) -> Result<Vec<PathBuf>> {
    let dir = PathBuf::from(&options.output_dir);
    let scatter = dir.join(&options.scatter_file);
    let boxplot = dir.join(&options.boxplot_file);
    render_scatter(table, x, y, &scatter, options)?;
    render_boxplot(table, x, y, &boxplot, options)?;
    Ok(vec![scatter, boxplot])
}
