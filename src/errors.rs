//! Centralized error handling for ens_stat
//!
//! Every failure is fatal to the unit of work that hit it, so the variants
//! carry enough context (file, variable, layer, key) to locate the bad input.

use std::fmt;
use std::path::PathBuf;

/// Main error type for ens_stat operations
#[derive(Debug)]
pub enum EnsStatError {
    /// NetCDF library errors
    NetCDFError(netcdf::Error),

    /// I/O operation errors
    IoError(std::io::Error),

    /// Array shape construction errors
    ArrayError(ndarray::ShapeError),

    /// Configuration file could not be parsed
    JsonError(serde_json::Error),

    /// Input file does not exist
    FileNotFound { path: PathBuf },

    /// Variable not present in a file
    VariableNotFound { var: String, path: PathBuf },

    /// Requested layer is outside the variable's vertical extent
    LayerOutOfRange {
        var: String,
        layer: usize,
        levels: usize,
        path: PathBuf,
    },

    /// Variable does not have the expected dimensionality
    DimensionMismatch {
        var: String,
        expected: String,
        found: Vec<usize>,
    },

    /// Samples passed to a reduction differ in shape
    ShapeMismatch {
        index: usize,
        expected: Vec<usize>,
        found: Vec<usize>,
    },

    /// Reduction over zero samples
    EmptyEnsemble,

    /// A prerequisite aggregate has not been computed
    AggregateNotFound { key: String },

    /// A stored aggregate was computed with different run settings
    StaleAggregate { key: String, reason: String },

    /// A store file exists but lacks required content
    InvalidStoreEntry { path: PathBuf, reason: String },

    /// Failure while reading one member forecast
    MemberRead {
        case_id: u32,
        cycle: String,
        member: usize,
        var: String,
        path: PathBuf,
        source: Box<EnsStatError>,
    },

    /// Statistics computation errors
    StatisticsError(String),

    /// Invalid configuration
    Config(String),

    /// Thread pool configuration error
    ThreadPoolError(String),

    /// Chart rendering failed
    PlotError(String),
}

impl fmt::Display for EnsStatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnsStatError::NetCDFError(e) => write!(f, "NetCDF error: {}", e),
            EnsStatError::IoError(e) => write!(f, "I/O error: {}", e),
            EnsStatError::ArrayError(e) => write!(f, "Array error: {}", e),
            EnsStatError::JsonError(e) => write!(f, "Configuration parse error: {}", e),
            EnsStatError::FileNotFound { path } => {
                write!(f, "File not found: {}", path.display())
            }
            EnsStatError::VariableNotFound { var, path } => {
                write!(f, "Variable '{}' not found in {}", var, path.display())
            }
            EnsStatError::LayerOutOfRange {
                var,
                layer,
                levels,
                path,
            } => write!(
                f,
                "Layer {} out of range for variable '{}' with {} levels in {}",
                layer,
                var,
                levels,
                path.display()
            ),
            EnsStatError::DimensionMismatch {
                var,
                expected,
                found,
            } => write!(
                f,
                "Variable '{}' has shape {:?}, expected {}",
                var, found, expected
            ),
            EnsStatError::ShapeMismatch {
                index,
                expected,
                found,
            } => write!(
                f,
                "Shape mismatch at sample {}: expected {:?}, found {:?}",
                index, expected, found
            ),
            EnsStatError::EmptyEnsemble => write!(f, "Cannot aggregate an empty ensemble"),
            EnsStatError::AggregateNotFound { key } => {
                write!(f, "Aggregate not found for {} (run the producing stage first)", key)
            }
            EnsStatError::StaleAggregate { key, reason } => write!(
                f,
                "Stored aggregate for {} does not match this run: {} (re-run extract)",
                key, reason
            ),
            EnsStatError::InvalidStoreEntry { path, reason } => {
                write!(f, "Invalid store entry {}: {}", path.display(), reason)
            }
            EnsStatError::MemberRead {
                case_id,
                cycle,
                member,
                var,
                path,
                source,
            } => write!(
                f,
                "case {} cycle {} member {} variable '{}' ({}): {}",
                case_id,
                cycle,
                member,
                var,
                path.display(),
                source
            ),
            EnsStatError::StatisticsError(msg) => {
                write!(f, "Statistics computation error: {}", msg)
            }
            EnsStatError::Config(msg) => write!(f, "Configuration error: {}", msg),
            EnsStatError::ThreadPoolError(msg) => write!(f, "Thread pool error: {}", msg),
            EnsStatError::PlotError(msg) => write!(f, "Plot error: {}", msg),
        }
    }
}

impl std::error::Error for EnsStatError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EnsStatError::NetCDFError(e) => Some(e),
            EnsStatError::IoError(e) => Some(e),
            EnsStatError::ArrayError(e) => Some(e),
            EnsStatError::JsonError(e) => Some(e),
            EnsStatError::MemberRead { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

impl EnsStatError {
    /// Innermost error, looking through [`EnsStatError::MemberRead`] wrappers
    #[must_use]
    pub fn root(&self) -> &EnsStatError {
        match self {
            EnsStatError::MemberRead { source, .. } => source.root(),
            other => other,
        }
    }
}

impl From<netcdf::Error> for EnsStatError {
    fn from(error: netcdf::Error) -> Self {
        EnsStatError::NetCDFError(error)
    }
}

impl From<std::io::Error> for EnsStatError {
    fn from(error: std::io::Error) -> Self {
        EnsStatError::IoError(error)
    }
}

impl From<ndarray::ShapeError> for EnsStatError {
    fn from(error: ndarray::ShapeError) -> Self {
        EnsStatError::ArrayError(error)
    }
}

impl From<serde_json::Error> for EnsStatError {
    fn from(error: serde_json::Error) -> Self {
        EnsStatError::JsonError(error)
    }
}

/// Result type alias for ens_stat operations
pub type Result<T> = std::result::Result<T, EnsStatError>;
