//! NetCDF reading: layer extraction from forecast files and observation vectors
//!
//! Every call opens the file, reads what it needs and drops the handle before
//! returning. Nothing is cached between calls.

use crate::errors::{EnsStatError, Result};
use ndarray::{Array1, Array2};
use netcdf::{File, Variable};
use std::path::Path;
use tracing::debug;

/// Opens a NetCDF file, mapping a missing path to [`EnsStatError::FileNotFound`]
pub fn open_existing(path: &Path) -> Result<File> {
    if !path.is_file() {
        return Err(EnsStatError::FileNotFound {
            path: path.to_path_buf(),
        });
    }
    Ok(netcdf::open(path)?)
}

fn require_variable<'f>(file: &'f File, var_name: &str, path: &Path) -> Result<Variable<'f>> {
    file.variable(var_name)
        .ok_or_else(|| EnsStatError::VariableNotFound {
            var: var_name.to_string(),
            path: path.to_path_buf(),
        })
}

/// Extracts the 2-D horizontal slice of `var_name` at a 1-based `layer`.
///
/// The variable must be `(level, y, x)` once leading singleton dimensions
/// (typically a length-one `time`) are dropped. Only the requested layer is
/// read. Fill values are not masked.
///
/// # Errors
///
/// - [`EnsStatError::FileNotFound`] if `path` does not exist
/// - [`EnsStatError::VariableNotFound`] if the variable is absent
/// - [`EnsStatError::DimensionMismatch`] if the variable is not 3-D after squeezing
/// - [`EnsStatError::LayerOutOfRange`] if `layer` is 0 or exceeds the level count
pub fn extract_layer(path: &Path, var_name: &str, layer: usize) -> Result<Array2<f64>> {
    let file = open_existing(path)?;
    let var = require_variable(&file, var_name, path)?;

    let shape: Vec<usize> = var.dimensions().iter().map(netcdf::Dimension::len).collect();
    let leading = shape.len().saturating_sub(3);
    if shape.len() < 3 || shape[..leading].iter().any(|&len| len != 1) {
        return Err(EnsStatError::DimensionMismatch {
            var: var_name.to_string(),
            expected: "(level, y, x) with optional leading singleton dimensions".to_string(),
            found: shape,
        });
    }

    let (levels, ny, nx) = (shape[leading], shape[leading + 1], shape[leading + 2]);
    if layer == 0 || layer > levels {
        return Err(EnsStatError::LayerOutOfRange {
            var: var_name.to_string(),
            layer,
            levels,
            path: path.to_path_buf(),
        });
    }
    let level = layer - 1;

    debug!(
        path = %path.display(),
        var = var_name,
        layer,
        levels,
        "Reading layer slice ({ny} x {nx})"
    );

    let values: Vec<f64> = match leading {
        0 => var.get_values::<f64, _>((level, .., ..))?,
        1 => var.get_values::<f64, _>((0, level, .., ..))?,
        2 => var.get_values::<f64, _>((0, 0, level, .., ..))?,
        _ => {
            return Err(EnsStatError::DimensionMismatch {
                var: var_name.to_string(),
                expected: "at most 5 dimensions".to_string(),
                found: shape,
            })
        }
    };

    Ok(Array2::from_shape_vec((ny, nx), values)?)
}

/// Reads a whole 1-D variable, as found in observation files
pub fn read_vector(file: &File, var_name: &str, path: &Path) -> Result<Array1<f64>> {
    let var = require_variable(file, var_name, path)?;
    if var.dimensions().len() != 1 {
        return Err(EnsStatError::DimensionMismatch {
            var: var_name.to_string(),
            expected: "a 1-D vector".to_string(),
            found: var.dimensions().iter().map(netcdf::Dimension::len).collect(),
        });
    }
    let values: Vec<f64> = var.get_values::<f64, _>(..)?;
    Ok(Array1::from(values))
}

/// Like [`read_vector`] but returns `None` when the variable is absent
pub fn read_optional_vector(
    file: &File,
    var_name: &str,
    path: &Path,
) -> Result<Option<Array1<f64>>> {
    if file.variable(var_name).is_none() {
        return Ok(None);
    }
    read_vector(file, var_name, path).map(Some)
}

/// Reads a `(location, character)` matrix as one string per location, cut at
/// the first NUL and trimmed. `None` when the variable is absent.
pub fn read_optional_strings(
    file: &File,
    var_name: &str,
    path: &Path,
) -> Result<Option<Vec<String>>> {
    let var = match file.variable(var_name) {
        Some(var) => var,
        None => return Ok(None),
    };
    let shape: Vec<usize> = var.dimensions().iter().map(netcdf::Dimension::len).collect();
    if shape.len() != 2 {
        return Err(EnsStatError::DimensionMismatch {
            var: var_name.to_string(),
            expected: "a (location, character) matrix".to_string(),
            found: shape,
        });
    }

    let (rows, width) = (shape[0], shape[1]);
    let bytes = var.get_raw_values(..)?;
    if bytes.len() != rows * width {
        return Err(EnsStatError::DimensionMismatch {
            var: var_name.to_string(),
            expected: "one byte per character".to_string(),
            found: vec![bytes.len()],
        });
    }
    if width == 0 {
        return Ok(Some(vec![String::new(); rows]));
    }

    let strings = bytes
        .chunks(width)
        .map(|row| {
            let end = row.iter().position(|&b| b == 0).unwrap_or(row.len());
            String::from_utf8_lossy(&row[..end]).trim().to_string()
        })
        .collect();
    Ok(Some(strings))
}
