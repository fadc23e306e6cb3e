//! Engine configuration
//!
//! Hosts either build an [`EngineConfig`] in code or load it from JSON.

use serde::{Deserialize, Serialize};

use crate::stats::AnalysisConfig;
use crate::{Error, Result};

/// Engine-wide defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Layout seed used when a generation request carries none. Without
    /// either, a fresh seed is drawn and recorded.
    pub default_seed: Option<u64>,
    /// Plot-number base for blocked designs (`block × base + position`).
    /// Derived from the block size when absent.
    pub plot_number_base: Option<u32>,
    /// Average repeated readings on a plot before analysis.
    pub collapse_subsamples: bool,
}

impl EngineConfig {
    /// Create a configuration builder
    #[must_use]
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }

    /// Parse a JSON configuration document.
    ///
    /// # Errors
    ///
    /// - [`Error::Serialization`] for malformed JSON or unknown keys
    /// - [`Error::Configuration`] for a plot-number base below 2
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check field ranges.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] for a plot-number base below 2.
    pub fn validate(&self) -> Result<()> {
        if let Some(base) = self.plot_number_base {
            if base < 2 {
                return Err(Error::Configuration(format!(
                    "plot_number_base must be at least 2, got {base}"
                )));
            }
        }
        Ok(())
    }

    /// Analysis options derived from this configuration.
    #[must_use]
    pub const fn analysis(&self) -> AnalysisConfig {
        AnalysisConfig {
            collapse_subsamples: self.collapse_subsamples,
        }
    }
}

/// Builder for [`EngineConfig`]
#[derive(Debug, Default)]
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    /// Fix the default layout seed (reproducible layouts)
    #[must_use]
    pub const fn default_seed(mut self, seed: u64) -> Self {
        self.config.default_seed = Some(seed);
        self
    }

    /// Override the plot-number base
    #[must_use]
    pub const fn plot_number_base(mut self, base: u32) -> Self {
        self.config.plot_number_base = Some(base);
        self
    }

    /// Average subsamples per plot before analysis
    #[must_use]
    pub const fn collapse_subsamples(mut self, collapse: bool) -> Self {
        self.config.collapse_subsamples = collapse;
        self
    }

    /// Build the configuration
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] for out-of-range values
    pub fn build(self) -> Result<EngineConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
