//! Statistical reductions over ensembles, horizontal domains and observation sets
//!
//! # Organization
//!
//! - [`operations`]: The statistic kinds and the shared result types
//! - [`ensemble`]: Element-wise mean/std across ensemble members
//! - [`domain`]: Spatial means of aggregated fields
//! - [`hofx`]: GSI versus UFO model-equivalent comparison

pub mod domain;
pub mod ensemble;
pub mod hofx;
pub mod operations;

pub use domain::{domain_mean, reduce_aggregate, spatial_stats, DomainMean};
pub use ensemble::aggregate_members;
pub use hofx::{DiffHistogram, HofxComparison, HofxSummary};
pub use operations::{DomainSeries, EnsembleAggregate, EnsembleStat, MemberSeries};
