//! Comparison of GSI and UFO model equivalents (hofx) for one observation type
//!
//! Observation files store the GSI bias-corrected hofx as `<var>@GsiHofXBc`,
//! the uncorrected GSI hofx as `<var>@GsiHofX` and the UFO result as
//! `<var>@hofx`, all as 1-D vectors over observation locations.

use crate::errors::{EnsStatError, Result};
use crate::netcdf_io::{open_existing, read_optional_strings, read_optional_vector, read_vector};
use ndarray::Array1;
use std::path::Path;
use tracing::debug;

/// Default histogram layout: 50 bins over [-2, 2]
pub const HISTOGRAM_BINS: usize = 50;
pub const HISTOGRAM_RANGE: (f64, f64) = (-2.0, 2.0);

/// Threshold above which a GSI/UFO difference is listed
pub const DEFAULT_LIST_THRESHOLD: f64 = 0.0005;

/// Per-observation metadata printed by the difference listing
#[derive(Debug, Clone, Default)]
pub struct ObsMetadata {
    pub station_id: Option<Vec<String>>,
    pub latitude: Option<Array1<f64>>,
    pub longitude: Option<Array1<f64>>,
    pub station_elevation: Option<Array1<f64>>,
    pub obs_type: Option<Array1<f64>>,
    pub use_flag: Option<Array1<f64>>,
}

/// The hofx vectors of one variable in one observation file
#[derive(Debug, Clone)]
pub struct HofxComparison {
    pub gsi_bias_corrected: Array1<f64>,
    pub gsi: Array1<f64>,
    pub ufo: Array1<f64>,
    pub height: Array1<f64>,
    pub metadata: ObsMetadata,
}

/// One row of the difference listing
#[derive(Debug, Clone, PartialEq)]
pub struct DiffRecord {
    pub index: usize,
    pub diff: f64,
    pub ufo: f64,
    pub gsi: f64,
    pub height: f64,
    pub station_id: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub obs_type: Option<f64>,
    pub use_flag: Option<f64>,
    pub station_elevation: Option<f64>,
}

/// Count, RMS and range of the bias-corrected GSI minus UFO difference
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HofxSummary {
    pub count: usize,
    pub rms: f64,
    pub min: f64,
    pub max: f64,
}

impl HofxComparison {
    /// Builds a comparison, checking that all vectors have the same length
    pub fn new(
        gsi_bias_corrected: Array1<f64>,
        gsi: Array1<f64>,
        ufo: Array1<f64>,
        height: Array1<f64>,
    ) -> Result<Self> {
        let expected = ufo.len();
        for (index, v) in [&gsi_bias_corrected, &gsi, &height].iter().enumerate() {
            if v.len() != expected {
                return Err(EnsStatError::ShapeMismatch {
                    index,
                    expected: vec![expected],
                    found: vec![v.len()],
                });
            }
        }
        Ok(Self {
            gsi_bias_corrected,
            gsi,
            ufo,
            height,
            metadata: ObsMetadata::default(),
        })
    }

    /// Reads the hofx vectors and station metadata for `var_name` from a UFO file
    pub fn load(path: &Path, var_name: &str) -> Result<Self> {
        let file = open_existing(path)?;
        let read = |suffix: &str| read_vector(&file, &format!("{var_name}@{suffix}"), path);

        let mut comparison = Self::new(
            read("GsiHofXBc")?,
            read("GsiHofX")?,
            read("hofx")?,
            read_vector(&file, "height@MetaData", path)?,
        )?;

        let optional = |name: &str| read_optional_vector(&file, name, path);
        comparison.metadata = ObsMetadata {
            station_id: read_optional_strings(&file, "station_id@MetaData", path)?,
            latitude: optional("latitude@MetaData")?,
            longitude: optional("longitude@MetaData")?,
            station_elevation: optional("station_elevation@MetaData")?,
            obs_type: optional(&format!("{var_name}@ObsType"))?,
            use_flag: optional(&format!("{var_name}@GsiUseFlag"))?,
        };

        debug!(
            path = %path.display(),
            var = var_name,
            observations = comparison.len(),
            "Loaded hofx vectors"
        );
        Ok(comparison)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ufo.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ufo.is_empty()
    }

    /// `GsiHofXBc - hofx`
    #[must_use]
    pub fn bias_corrected_diff(&self) -> Array1<f64> {
        &self.gsi_bias_corrected - &self.ufo
    }

    /// `GsiHofX - hofx`
    #[must_use]
    pub fn raw_diff(&self) -> Array1<f64> {
        &self.gsi - &self.ufo
    }

    pub fn summary(&self) -> Result<HofxSummary> {
        let diff = self.bias_corrected_diff();
        Ok(HofxSummary {
            count: diff.len(),
            rms: rms(&diff)?,
            min: diff.iter().copied().fold(f64::INFINITY, f64::min),
            max: diff.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        })
    }

    /// `(difference, height)` pairs for the vertical profile plot
    #[must_use]
    pub fn vertical_profile(&self) -> Vec<(f64, f64)> {
        self.bias_corrected_diff()
            .iter()
            .copied()
            .zip(self.height.iter().copied())
            .collect()
    }

    /// Observations whose uncorrected difference exceeds `threshold` in magnitude
    #[must_use]
    pub fn large_differences(&self, threshold: f64) -> Vec<DiffRecord> {
        let pick = |v: &Option<Array1<f64>>, i: usize| v.as_ref().and_then(|a| a.get(i).copied());
        let meta = &self.metadata;

        self.raw_diff()
            .iter()
            .enumerate()
            .filter(|(_, d)| d.abs() > threshold)
            .map(|(index, &diff)| DiffRecord {
                index,
                diff,
                ufo: self.ufo[index],
                gsi: self.gsi[index],
                height: self.height[index],
                station_id: meta
                    .station_id
                    .as_ref()
                    .and_then(|ids| ids.get(index).cloned()),
                latitude: pick(&meta.latitude, index),
                longitude: pick(&meta.longitude, index),
                obs_type: pick(&meta.obs_type, index),
                use_flag: pick(&meta.use_flag, index),
                station_elevation: pick(&meta.station_elevation, index),
            })
            .collect()
    }
}

/// Root-mean-square of a vector
///
/// # Errors
///
/// Returns a statistics error for an empty vector.
pub fn rms(values: &Array1<f64>) -> Result<f64> {
    if values.is_empty() {
        return Err(EnsStatError::StatisticsError(
            "cannot compute the RMS of zero observations".to_string(),
        ));
    }
    #[allow(clippy::cast_precision_loss)]
    let n = values.len() as f64;
    Ok((values.iter().map(|x| x * x).sum::<f64>() / n).sqrt())
}

/// Fixed-width histogram, right-most bin closed
#[derive(Debug, Clone, PartialEq)]
pub struct DiffHistogram {
    pub lower: f64,
    pub upper: f64,
    pub counts: Vec<u64>,
}

impl DiffHistogram {
    /// Counts `values` into `bins` equal bins over `[lower, upper]`.
    /// Values outside the range and non-finite values are not counted.
    pub fn compute(values: &[f64], bins: usize, lower: f64, upper: f64) -> Result<Self> {
        if bins == 0 || !(upper > lower) {
            return Err(EnsStatError::StatisticsError(format!(
                "invalid histogram layout: {bins} bins over [{lower}, {upper}]"
            )));
        }

        let mut hist = Self {
            lower,
            upper,
            counts: vec![0_u64; bins],
        };
        let norm = bins as f64 / (upper - lower);
        for &x in values {
            if !(lower..=upper).contains(&x) {
                continue;
            }
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let mut bin = (((x - lower) * norm) as usize).min(bins - 1);
            // the truncated index can land one bin off when x sits on an edge
            if x < hist.edge(bin) {
                bin -= 1;
            } else if bin != bins - 1 && x >= hist.edge(bin + 1) {
                bin += 1;
            }
            hist.counts[bin] += 1;
        }
        Ok(hist)
    }

    /// Edge `k` of `bins + 1` evenly spaced edges; the last one is exactly `upper`
    fn edge(&self, k: usize) -> f64 {
        if k == self.counts.len() {
            self.upper
        } else {
            k as f64 * self.bin_width() + self.lower
        }
    }

    #[must_use]
    pub fn bin_width(&self) -> f64 {
        (self.upper - self.lower) / self.counts.len() as f64
    }

    /// Left edge of every bin
    #[must_use]
    pub fn left_edges(&self) -> Vec<f64> {
        (0..self.counts.len()).map(|k| self.edge(k)).collect()
    }

    #[must_use]
    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }
}
