//! SVG charts for aggregates, series and hofx comparisons
//!
//! Plain unprojected charts: maps are drawn on grid indices, series on cycle
//! indices. Output is SVG so no system fonts are needed.

use crate::errors::{EnsStatError, Result};
use crate::statistics::DiffHistogram;
use ndarray::Array2;
use plotters::coord::Shift;
use plotters::prelude::*;
use std::path::Path;

/// Discrete colour levels used for maps
const COLOUR_LEVELS: usize = 24;

const LINE_COLOURS: [RGBColor; 8] = [
    RGBColor(31, 119, 180),
    RGBColor(255, 127, 14),
    RGBColor(44, 160, 44),
    RGBColor(214, 39, 40),
    RGBColor(148, 103, 189),
    RGBColor(140, 86, 75),
    RGBColor(227, 119, 194),
    RGBColor(127, 127, 127),
];

fn plot_err<E: std::fmt::Display>(error: E) -> EnsStatError {
    EnsStatError::PlotError(error.to_string())
}

/// Jet colour ramp, `t` in `[0, 1]`
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn jet(t: f64) -> RGBColor {
    let t = t.clamp(0.0, 1.0);
    let channel = |offset: f64| {
        let v = (1.5 - (4.0 * t - offset).abs()).clamp(0.0, 1.0);
        (v * 255.0).round() as u8
    };
    RGBColor(channel(3.0), channel(2.0), channel(1.0))
}

/// Colour of `value` on a 24-level jet scale spanning `[lo, hi]`
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
#[must_use]
pub fn level_colour(value: f64, lo: f64, hi: f64) -> RGBColor {
    let t = ((value - lo) / (hi - lo)).clamp(0.0, 1.0);
    let level = ((t * COLOUR_LEVELS as f64) as usize).min(COLOUR_LEVELS - 1);
    jet((level as f64 + 0.5) / COLOUR_LEVELS as f64)
}

/// Finite min/max of `values`, widened so the range is never empty
#[must_use]
pub fn finite_range(values: impl IntoIterator<Item = f64>) -> (f64, f64) {
    let (lo, hi) = values
        .into_iter()
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(v), hi.max(v))
        });
    if !lo.is_finite() {
        return (0.0, 1.0);
    }
    if hi > lo {
        (lo, hi)
    } else {
        let pad = (lo.abs() * 0.05).max(0.5);
        (lo - pad, hi + pad)
    }
}

fn padded_range(values: impl IntoIterator<Item = f64>) -> (f64, f64) {
    let (lo, hi) = finite_range(values);
    let pad = (hi - lo) * 0.05;
    (lo - pad, hi + pad)
}

fn checked_range(range: (f64, f64)) -> Result<(f64, f64)> {
    if range.1 > range.0 {
        Ok(range)
    } else {
        Err(EnsStatError::PlotError(format!(
            "empty value range [{}, {}]",
            range.0, range.1
        )))
    }
}

/// Draws a 2-D field as a colour grid with a colour bar
pub fn plot_field_map(
    field: &Array2<f64>,
    title: &str,
    range: Option<(f64, f64)>,
    path: &Path,
) -> Result<()> {
    let (ny, nx) = field.dim();
    if ny == 0 || nx == 0 {
        return Err(EnsStatError::PlotError(format!(
            "cannot map an empty {ny} x {nx} field"
        )));
    }
    let (lo, hi) = checked_range(range.unwrap_or_else(|| finite_range(field.iter().copied())))?;

    let root = SVGBackend::new(path, (1100, 640)).into_drawing_area();
    root.fill(&WHITE).map_err(plot_err)?;
    let (map_area, bar_area) = root.split_horizontally(980);

    let mut chart = ChartBuilder::on(&map_area)
        .caption(title, ("sans-serif", 18))
        .margin(10)
        .x_label_area_size(30)
        .y_label_area_size(40)
        .build_cartesian_2d(0.0..nx as f64, 0.0..ny as f64)
        .map_err(plot_err)?;

    chart
        .configure_mesh()
        .disable_mesh()
        .x_desc("x index")
        .y_desc("y index")
        .draw()
        .map_err(plot_err)?;

    chart
        .draw_series(
            field
                .indexed_iter()
                .filter(|(_, v)| v.is_finite())
                .map(|((i, j), &v)| {
                    let (x, y) = (j as f64, i as f64);
                    Rectangle::new(
                        [(x, y), (x + 1.0, y + 1.0)],
                        level_colour(v, lo, hi).filled(),
                    )
                }),
        )
        .map_err(plot_err)?;

    draw_colour_bar(&bar_area, lo, hi)?;
    root.present().map_err(plot_err)?;
    Ok(())
}

fn draw_colour_bar(area: &DrawingArea<SVGBackend<'_>, Shift>, lo: f64, hi: f64) -> Result<()> {
    let mut bar = ChartBuilder::on(area)
        .margin_top(40)
        .margin_bottom(40)
        .margin_right(10)
        .y_label_area_size(70)
        .build_cartesian_2d(0.0..1.0, lo..hi)
        .map_err(plot_err)?;

    bar.configure_mesh()
        .disable_x_mesh()
        .disable_y_mesh()
        .x_labels(0)
        .draw()
        .map_err(plot_err)?;

    let step = (hi - lo) / COLOUR_LEVELS as f64;
    bar.draw_series((0..COLOUR_LEVELS).map(|k| {
        let y0 = lo + k as f64 * step;
        Rectangle::new(
            [(0.0, y0), (1.0, y0 + step)],
            level_colour(y0 + step / 2.0, lo, hi).filled(),
        )
    }))
    .map_err(plot_err)?;
    Ok(())
}

/// One panel of stacked line charts
#[derive(Debug, Clone)]
pub struct SeriesPanel {
    pub y_label: String,
    /// `(legend label, values)`; an empty label draws no legend entry
    pub lines: Vec<(String, Vec<f64>)>,
    pub y_range: Option<(f64, f64)>,
}

/// Stacks `panels` vertically, all sharing the cycle-index x axis
pub fn plot_series_panels(
    title: &str,
    x_label: &str,
    panels: &[SeriesPanel],
    path: &Path,
) -> Result<()> {
    let points = panels
        .iter()
        .flat_map(|p| p.lines.iter().map(|(_, v)| v.len()))
        .max()
        .unwrap_or(0);
    if points == 0 {
        return Err(EnsStatError::PlotError("no series values to plot".to_string()));
    }

    let root = SVGBackend::new(path, (1000, 500 * panels.len() as u32)).into_drawing_area();
    root.fill(&WHITE).map_err(plot_err)?;
    let areas = root.split_evenly((panels.len(), 1));

    for (index, (panel, area)) in panels.iter().zip(areas.iter()).enumerate() {
        let y_range = match panel.y_range {
            Some(range) => checked_range(range)?,
            None => padded_range(panel.lines.iter().flat_map(|(_, v)| v.iter().copied())),
        };

        let mut builder = ChartBuilder::on(area);
        builder
            .margin(15)
            .x_label_area_size(40)
            .y_label_area_size(80);
        if index == 0 {
            builder.caption(title, ("sans-serif", 20));
        }
        let mut chart = builder
            .build_cartesian_2d(-0.5..(points as f64 - 0.5), y_range.0..y_range.1)
            .map_err(plot_err)?;

        chart
            .configure_mesh()
            .x_desc(x_label)
            .y_desc(panel.y_label.as_str())
            .draw()
            .map_err(plot_err)?;

        let mut labelled = false;
        for (i, (label, values)) in panel.lines.iter().enumerate() {
            let colour = LINE_COLOURS[i % LINE_COLOURS.len()];
            let series = chart
                .draw_series(LineSeries::new(
                    values
                        .iter()
                        .enumerate()
                        .filter(|(_, v)| v.is_finite())
                        .map(|(x, &y)| (x as f64, y)),
                    colour.stroke_width(2),
                ))
                .map_err(plot_err)?;
            if !label.is_empty() {
                labelled = true;
                series
                    .label(label.as_str())
                    .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], colour));
            }
        }

        if labelled {
            chart
                .configure_series_labels()
                .border_style(BLACK)
                .background_style(WHITE.mix(0.8))
                .draw()
                .map_err(plot_err)?;
        }
    }

    root.present().map_err(plot_err)?;
    Ok(())
}

/// Scatter plot of `(x, y)` points
pub fn plot_scatter(
    points: &[(f64, f64)],
    title: &str,
    x_label: &str,
    y_label: &str,
    path: &Path,
) -> Result<()> {
    if points.is_empty() {
        return Err(EnsStatError::PlotError("no points to plot".to_string()));
    }
    let x_range = padded_range(points.iter().map(|p| p.0));
    let y_range = padded_range(points.iter().map(|p| p.1));

    let root = SVGBackend::new(path, (800, 750)).into_drawing_area();
    root.fill(&WHITE).map_err(plot_err)?;

    let mut chart = ChartBuilder::on(&root)
        .caption(title, ("sans-serif", 20))
        .margin(15)
        .x_label_area_size(40)
        .y_label_area_size(70)
        .build_cartesian_2d(x_range.0..x_range.1, y_range.0..y_range.1)
        .map_err(plot_err)?;

    chart
        .configure_mesh()
        .x_desc(x_label)
        .y_desc(y_label)
        .draw()
        .map_err(plot_err)?;

    chart
        .draw_series(
            points
                .iter()
                .filter(|(x, y)| x.is_finite() && y.is_finite())
                .map(|&(x, y)| Circle::new((x, y), 2, BLUE.filled())),
        )
        .map_err(plot_err)?;

    root.present().map_err(plot_err)?;
    Ok(())
}

/// Bar chart of a fixed-bin histogram
pub fn plot_histogram(hist: &DiffHistogram, title: &str, x_label: &str, path: &Path) -> Result<()> {
    let top = hist.counts.iter().copied().max().unwrap_or(0).max(1) as f64 * 1.05;
    let width = hist.bin_width();

    let root = SVGBackend::new(path, (800, 750)).into_drawing_area();
    root.fill(&WHITE).map_err(plot_err)?;

    let mut chart = ChartBuilder::on(&root)
        .caption(title, ("sans-serif", 20))
        .margin(15)
        .x_label_area_size(40)
        .y_label_area_size(70)
        .build_cartesian_2d(hist.lower..hist.upper, 0.0..top)
        .map_err(plot_err)?;

    chart
        .configure_mesh()
        .x_desc(x_label)
        .y_desc("count")
        .draw()
        .map_err(plot_err)?;

    chart
        .draw_series(
            hist.left_edges()
                .into_iter()
                .zip(hist.counts.iter())
                .filter(|(_, count)| **count > 0)
                .map(|(left, &count)| {
                    Rectangle::new([(left, 0.0), (left + width, count as f64)], BLUE.filled())
                }),
        )
        .map_err(plot_err)?;

    root.present().map_err(plot_err)?;
    Ok(())
}
