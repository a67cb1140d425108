//! ens_stat: ensemble statistics and hofx diagnostics for FV3 NetCDF output
//!
//! Reads one model layer of one variable from every member of an FV3-LAM
//! ensemble, computes the element-wise ensemble mean and standard deviation
//! per forecast cycle, reduces those fields to domain means, and draws maps
//! and time series. A second set of tools compares GSI and UFO model
//! equivalents (hofx) stored in JEDI observation files.
//!
//! ## Key Features
//!
//! - **Streaming aggregation**: members are folded into a Welford accumulator
//!   one at a time, so only one member field is held in memory per unit
//! - **Parallel processing**: independent (case, cycle) units run on a Rayon pool
//! - **Persisted intermediates**: aggregates and series are stored as NetCDF so
//!   stages can be re-run independently
//! - **Charts**: SVG maps, time series and hofx diagnostics via plotters
//!
//! ## Module Organization
//!
//! - [`model`]: cases, cycles and the keys that name every file
//! - [`config`]: JSON pipeline configuration
//! - [`netcdf_io`]: layer extraction and observation vector reads
//! - [`statistics`]: ensemble, domain and hofx statistics
//! - [`store`]: persistence of aggregates and series
//! - [`pipeline`]: the extract, reduce, members and plot stages
//! - [`diagnostics`]: the hofx comparison and difference listing
//! - [`plot`]: chart rendering
//! - [`parallel`]: worker pool configuration
//! - [`errors`]: centralized error handling
//!
//! ## Usage
//!
//! ```rust,no_run
//! use ens_stat::prelude::*;
//! use std::path::Path;
//!
//! let config = PipelineConfig::from_path(Path::new("run.json")).unwrap();
//! let store = NetCdfStore::new(&config.data_dir).unwrap();
//! let pipeline = Pipeline::new(&config, &store).unwrap();
//! pipeline.run(&[Stage::Extract, Stage::Reduce]).unwrap();
//! ```

pub mod config;
pub mod diagnostics;
pub mod errors;
pub mod model;
pub mod netcdf_io;
pub mod parallel;
pub mod pipeline;
pub mod plot;
pub mod statistics;
pub mod store;

pub use errors::{EnsStatError, Result};

pub mod prelude {
    //! Commonly used imports for convenience
    pub use crate::config::PipelineConfig;
    pub use crate::errors::{EnsStatError, Result};
    pub use crate::model::{Case, Cycle, CycleKey, FileType, MemberKey, SeriesKey};
    pub use crate::netcdf_io::extract_layer;
    pub use crate::parallel::ParallelConfig;
    pub use crate::pipeline::{Pipeline, Stage};
    pub use crate::statistics::{EnsembleAggregate, EnsembleStat};
    pub use crate::store::{AggregateStore, MemoryStore, NetCdfStore};
}
