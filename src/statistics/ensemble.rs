//! Element-wise aggregation across ensemble members
//!
//! Members are folded in one at a time with Welford's update, so a sample can
//! be dropped as soon as it has been pushed.

use super::operations::EnsembleAggregate;
use crate::errors::{EnsStatError, Result};
use ndarray::{Array2, Zip};

/// Running mean and sum of squared deviations for a stream of equal-shape fields
#[derive(Debug, Clone, Default)]
pub struct EnsembleAccumulator {
    count: usize,
    moments: Option<(Array2<f64>, Array2<f64>)>,
}

impl EnsembleAccumulator {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            count: 0,
            moments: None,
        }
    }

    #[must_use]
    pub const fn count(&self) -> usize {
        self.count
    }

    /// Folds one member field into the running statistics
    ///
    /// # Errors
    ///
    /// Returns [`EnsStatError::ShapeMismatch`] if `sample` differs in shape from
    /// the first sample pushed. The accumulator is left unchanged in that case.
    pub fn push(&mut self, sample: &Array2<f64>) -> Result<()> {
        if self.moments.is_none() {
            self.moments = Some((sample.to_owned(), Array2::zeros(sample.raw_dim())));
            self.count = 1;
            return Ok(());
        }

        if let Some((mean, m2)) = self.moments.as_mut() {
            if mean.shape() != sample.shape() {
                return Err(EnsStatError::ShapeMismatch {
                    index: self.count,
                    expected: mean.shape().to_vec(),
                    found: sample.shape().to_vec(),
                });
            }

            self.count += 1;
            #[allow(clippy::cast_precision_loss)]
            let n = self.count as f64;
            Zip::from(mean).and(m2).and(sample).par_for_each(|m, s, &x| {
                let delta = x - *m;
                *m += delta / n;
                *s += delta * (x - *m);
            });
        }
        Ok(())
    }

    /// Population statistics over everything pushed so far
    ///
    /// # Errors
    ///
    /// Returns [`EnsStatError::EmptyEnsemble`] if nothing was pushed.
    pub fn finish(self) -> Result<EnsembleAggregate> {
        let (mean, m2) = self.moments.ok_or(EnsStatError::EmptyEnsemble)?;
        #[allow(clippy::cast_precision_loss)]
        let n = self.count as f64;
        let std = m2.mapv_into(|s| (s / n).sqrt());
        Ok(EnsembleAggregate {
            mean,
            std,
            members: self.count,
            extraction: None,
        })
    }
}

/// Computes the element-wise mean and population standard deviation of `samples`
///
/// # Errors
///
/// - [`EnsStatError::EmptyEnsemble`] for an empty slice
/// - [`EnsStatError::ShapeMismatch`] if any sample differs in shape from the first
pub fn aggregate_members(samples: &[Array2<f64>]) -> Result<EnsembleAggregate> {
    let first = samples.first().ok_or(EnsStatError::EmptyEnsemble)?;
    if let Some((index, bad)) = samples
        .iter()
        .enumerate()
        .find(|(_, s)| s.shape() != first.shape())
    {
        return Err(EnsStatError::ShapeMismatch {
            index,
            expected: first.shape().to_vec(),
            found: bad.shape().to_vec(),
        });
    }

    let mut acc = EnsembleAccumulator::new();
    for sample in samples {
        acc.push(sample)?;
    }
    acc.finish()
}
