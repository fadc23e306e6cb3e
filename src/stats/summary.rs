//! Descriptive statistics for one group of observations

use serde::{Deserialize, Serialize};

/// Sample size, mean and spread of one group.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SampleStats {
    /// Number of observations.
    pub n: usize,
    /// Sample mean.
    pub mean: f64,
    /// Sample variance (n − 1 denominator; 0 for a single observation).
    pub variance: f64,
    /// Sum of squared deviations from the mean.
    pub sum_squares: f64,
    /// Smallest observation.
    pub min: f64,
    /// Largest observation.
    pub max: f64,
}

impl SampleStats {
    /// Describe a non-empty sample. Returns `None` for an empty slice.
    ///
    /// Uses a two-pass algorithm so identical values give exactly zero
    /// variance.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn from_values(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let n = values.len();
        let mean = values.iter().sum::<f64>() / n as f64;
        let sum_squares: f64 = values.iter().map(|v| (v - mean).powi(2)).sum();
        let variance = if n > 1 {
            sum_squares / (n - 1) as f64
        } else {
            0.0
        };
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        Some(Self {
            n,
            mean,
            variance,
            sum_squares,
            min,
            max,
        })
    }

    /// Sample standard deviation.
    #[must_use]
    pub fn std_dev(&self) -> f64 {
        self.variance.sqrt()
    }

    /// Standard error of the mean.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn std_error(&self) -> f64 {
        (self.variance / self.n as f64).sqrt()
    }
}

/// Harmonic mean of group sizes.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn harmonic_mean(sizes: &[usize]) -> f64 {
    if sizes.is_empty() || sizes.contains(&0) {
        return 0.0;
    }
    let reciprocal_sum: f64 = sizes.iter().map(|&n| 1.0 / n as f64).sum();
    sizes.len() as f64 / reciprocal_sum
}
