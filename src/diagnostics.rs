//! Drivers for the observation-space diagnostics behind the `hofx` and `omb`
//! commands

use crate::errors::Result;
use crate::plot::{plot_histogram, plot_scatter};
use crate::statistics::hofx::{DiffRecord, HISTOGRAM_BINS, HISTOGRAM_RANGE};
use crate::statistics::{DiffHistogram, HofxComparison, HofxSummary};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Identifies one observation-space comparison
#[derive(Debug, Clone)]
pub struct HofxRequest<'a> {
    pub file: &'a Path,
    /// Observation type label, e.g. `sfc` or `aircraft`
    pub obs_type: &'a str,
    pub variable: &'a str,
    pub subtask: &'a str,
}

/// Result of a GSI/UFO comparison
#[derive(Debug, Clone)]
pub struct HofxReport {
    pub summary: HofxSummary,
    pub histogram: DiffHistogram,
    pub figures: Vec<PathBuf>,
}

/// Compares GSI and UFO hofx and, when `output_dir` is given, writes the
/// scatter, histogram and vertical-difference charts there
pub fn compare_hofx(request: &HofxRequest<'_>, output_dir: Option<&Path>) -> Result<HofxReport> {
    let comparison = HofxComparison::load(request.file, request.variable)?;
    let summary = comparison.summary()?;
    let diff = comparison.bias_corrected_diff().to_vec();
    let histogram = DiffHistogram::compute(
        &diff,
        HISTOGRAM_BINS,
        HISTOGRAM_RANGE.0,
        HISTOGRAM_RANGE.1,
    )?;

    let mut figures = Vec::new();
    if let Some(dir) = output_dir {
        fs::create_dir_all(dir)?;
        let name = |kind: &str| {
            dir.join(format!(
                "ufo_{}_{}_{}_{}.svg",
                request.obs_type, request.variable, kind, request.subtask
            ))
        };

        let scatter: Vec<(f64, f64)> = comparison
            .gsi_bias_corrected
            .iter()
            .copied()
            .zip(comparison.ufo.iter().copied())
            .collect();
        let path = name("scatter");
        plot_scatter(
            &scatter,
            &format!("{}: gsi and ufo hofx scatter", request.obs_type),
            "gsi",
            "ufo",
            &path,
        )?;
        figures.push(path);

        let path = name("hist");
        plot_histogram(
            &histogram,
            &format!("{}: gsi and ufo diff histogram", request.obs_type),
            "(gsi-ufo)",
            &path,
        )?;
        figures.push(path);

        let path = name("vdiff_scatter");
        plot_scatter(
            &comparison.vertical_profile(),
            &format!("{}: gsi-ufo diff in vertical", request.obs_type),
            "(gsi-ufo)",
            "geop-height",
            &path,
        )?;
        figures.push(path);
    }

    info!(
        file = %request.file.display(),
        obs_type = request.obs_type,
        var = request.variable,
        observations = summary.count,
        rms = summary.rms,
        figures = figures.len(),
        "Compared GSI and UFO hofx"
    );
    Ok(HofxReport {
        summary,
        histogram,
        figures,
    })
}

/// Observations with a large uncorrected GSI/UFO difference
#[derive(Debug, Clone)]
pub struct DiffListing {
    pub total: usize,
    pub threshold: f64,
    pub records: Vec<DiffRecord>,
}

pub fn list_differences(file: &Path, variable: &str, threshold: f64) -> Result<DiffListing> {
    let comparison = HofxComparison::load(file, variable)?;
    let records = comparison.large_differences(threshold);
    info!(
        file = %file.display(),
        var = variable,
        threshold,
        listed = records.len(),
        "Listed large hofx differences"
    );
    Ok(DiffListing {
        total: comparison.len(),
        threshold,
        records,
    })
}
