//! Core statistic kinds and result containers
//!
//! This module defines the types passed between the aggregation, reduction,
//! persistence and plotting stages.

use crate::errors::{EnsStatError, Result};
use crate::model::{Cycle, Extraction};
use ndarray::Array2;

/// Statistics computed across the ensemble axis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnsembleStat {
    /// Arithmetic mean
    Mean,
    /// Population standard deviation
    Std,
}

impl EnsembleStat {
    pub const ALL: [EnsembleStat; 2] = [EnsembleStat::Mean, EnsembleStat::Std];

    /// Variable name used in persisted files
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Mean => "mean",
            Self::Std => "std",
        }
    }

    /// Label used in plot titles and file names
    #[must_use]
    pub const fn title(self) -> &'static str {
        match self {
            Self::Mean => "Mean",
            Self::Std => "STD",
        }
    }
}

/// Element-wise ensemble mean and standard deviation for one (case, cycle)
#[derive(Debug, Clone, PartialEq)]
pub struct EnsembleAggregate {
    pub mean: Array2<f64>,
    pub std: Array2<f64>,
    /// Number of members that went into the aggregate
    pub members: usize,
    /// Member slice the samples came from, when known
    pub extraction: Option<Extraction>,
}

impl EnsembleAggregate {
    #[must_use]
    pub fn field(&self, stat: EnsembleStat) -> &Array2<f64> {
        match stat {
            EnsembleStat::Mean => &self.mean,
            EnsembleStat::Std => &self.std,
        }
    }

    #[must_use]
    pub fn shape(&self) -> &[usize] {
        self.mean.shape()
    }
}

/// Domain-mean values of one case, ordered by cycle
#[derive(Debug, Clone, PartialEq)]
pub struct DomainSeries {
    pub cycles: Vec<Cycle>,
    pub mean: Vec<f64>,
    pub std: Vec<f64>,
}

impl DomainSeries {
    /// Builds a series, checking that all three vectors line up
    pub fn new(cycles: Vec<Cycle>, mean: Vec<f64>, std: Vec<f64>) -> Result<Self> {
        if mean.len() != cycles.len() || std.len() != cycles.len() {
            return Err(EnsStatError::ShapeMismatch {
                index: 0,
                expected: vec![cycles.len()],
                found: vec![mean.len(), std.len()],
            });
        }
        Ok(Self { cycles, mean, std })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.cycles.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cycles.is_empty()
    }

    #[must_use]
    pub fn values(&self, stat: EnsembleStat) -> &[f64] {
        match stat {
            EnsembleStat::Mean => &self.mean,
            EnsembleStat::Std => &self.std,
        }
    }
}

/// Spatial mean and spatial std of every member's field, shaped (member, cycle)
#[derive(Debug, Clone, PartialEq)]
pub struct MemberSeries {
    pub cycles: Vec<Cycle>,
    pub mean: Array2<f64>,
    pub std: Array2<f64>,
}

impl MemberSeries {
    pub fn new(cycles: Vec<Cycle>, mean: Array2<f64>, std: Array2<f64>) -> Result<Self> {
        if mean.shape() != std.shape() || mean.ncols() != cycles.len() {
            return Err(EnsStatError::ShapeMismatch {
                index: 0,
                expected: vec![mean.nrows(), cycles.len()],
                found: std.shape().to_vec(),
            });
        }
        Ok(Self { cycles, mean, std })
    }

    #[must_use]
    pub fn members(&self) -> usize {
        self.mean.nrows()
    }

    #[must_use]
    pub fn values(&self, stat: EnsembleStat) -> &Array2<f64> {
        match stat {
            EnsembleStat::Mean => &self.mean,
            EnsembleStat::Std => &self.std,
        }
    }
}
