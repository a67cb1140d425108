//! Whole-domain reductions of 2-D fields
//!
//! Plain arithmetic means with no area weighting and no masking: a non-finite
//! value anywhere in the field makes the result non-finite.

use super::operations::EnsembleAggregate;
use crate::errors::{EnsStatError, Result};
use ndarray::Array2;

/// Domain-mean values of one Ensemble Aggregate
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DomainMean {
    pub mean: f64,
    pub std: f64,
}

/// Unweighted arithmetic mean over every grid point
///
/// # Errors
///
/// Returns a statistics error for a field with no elements.
pub fn domain_mean(field: &Array2<f64>) -> Result<f64> {
    field.mean().ok_or_else(|| {
        EnsStatError::StatisticsError(format!(
            "cannot take the domain mean of an empty {:?} field",
            field.shape()
        ))
    })
}

/// Reduces an aggregate's mean and std maps to one scalar each
pub fn reduce_aggregate(aggregate: &EnsembleAggregate) -> Result<DomainMean> {
    Ok(DomainMean {
        mean: domain_mean(&aggregate.mean)?,
        std: domain_mean(&aggregate.std)?,
    })
}

/// Spatial mean and population std of a single field
pub fn spatial_stats(field: &Array2<f64>) -> Result<(f64, f64)> {
    let mean = domain_mean(field)?;
    #[allow(clippy::cast_precision_loss)]
    let n = field.len() as f64;
    let variance = field.iter().map(|&x| (x - mean).powi(2)).sum::<f64>() / n;
    Ok((mean, variance.sqrt()))
}
