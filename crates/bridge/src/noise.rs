//! Bounded Gaussian perturbation for scalar sensor readings.

use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use serde::Deserialize;

use crate::error::ConfigError;

/// Perturbations are clamped to `mean ± BOUND_SIGMAS * stddev`.
pub const BOUND_SIGMAS: f64 = 3.0;

/// Mean and standard deviation of the noise added to one field.
#[derive(Debug, Clone, Copy, PartialEq, Default, Deserialize)]
#[serde(default)]
pub struct NoiseParams {
    pub mean: f64,
    pub stddev: f64,
}

impl NoiseParams {
    pub const NONE: Self = Self {
        mean: 0.0,
        stddev: 0.0,
    };

    pub fn new(mean: f64, stddev: f64) -> Self {
        Self { mean, stddev }
    }

    pub fn validate(&self, field: &'static str) -> Result<(), ConfigError> {
        if !self.mean.is_finite() || !self.stddev.is_finite() || self.stddev < 0.0 {
            return Err(ConfigError::InvalidNoise {
                field,
                mean: self.mean,
                stddev: self.stddev,
            });
        }
        Ok(())
    }
}

/// Adds noise to sensor values. Deterministic when built with a seed.
#[derive(Debug)]
pub struct NoiseInjector {
    rng: StdRng,
}

impl NoiseInjector {
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self { rng }
    }

    /// Return `value` plus one noise draw.
    pub fn add(&mut self, value: f64, params: NoiseParams) -> f64 {
        value + self.sample(params)
    }

    /// Draw one perturbation from `N(mean, stddev)`, clamped to the bound.
    pub fn sample(&mut self, params: NoiseParams) -> f64 {
        if params.stddev <= 0.0 {
            return params.mean;
        }
        let Ok(normal) = Normal::new(params.mean, params.stddev) else {
            return params.mean;
        };
        let bound = BOUND_SIGMAS * params.stddev;
        normal
            .sample(&mut self.rng)
            .clamp(params.mean - bound, params.mean + bound)
    }
}
