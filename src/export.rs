//! Export snapshot - one self-contained document per trial
//!
//! A [`TrialExport`] carries everything needed to restore a trial into a
//! fresh store: the trial, its treatments, plots, randomization record and
//! measurements. Analyses are attached per measurement type; a type that
//! cannot be analyzed carries the reason instead of aborting the export.

use chrono::{DateTime, Utc};
#[cfg(feature = "rayon")]
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::debug;

use crate::aggregate::{AggregateParts, RandomizationRecord, TrialAggregate};
use crate::ledger::resolve;
use crate::model::{Measurement, MeasurementType, Plot, Treatment, Trial};
use crate::stats::{analyze, AnalysisConfig, AnalysisResult};
use crate::Result;

/// Snapshot format version written by this crate.
pub const EXPORT_FORMAT_VERSION: u32 = 1;

/// What to include in an export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportOptions {
    /// Attach an analysis for every measurement type present.
    pub include_analysis: bool,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            include_analysis: true,
        }
    }
}

impl ExportOptions {
    /// Structure and measurements only.
    #[must_use]
    pub const fn without_analysis() -> Self {
        Self {
            include_analysis: false,
        }
    }
}

/// Analysis outcome for one measurement type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AnalysisOutcome {
    /// Analysis succeeded.
    Completed {
        /// The result.
        result: Box<AnalysisResult>,
    },
    /// Analysis was not possible.
    Unavailable {
        /// Why (e.g. insufficient data).
        reason: String,
    },
}

/// Analysis slot of an export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypedAnalysis {
    /// Measurement type analyzed.
    pub measurement_type: MeasurementType,
    /// Result or reason.
    pub outcome: AnalysisOutcome,
}

impl TypedAnalysis {
    /// The result, when analysis succeeded.
    #[must_use]
    pub fn result(&self) -> Option<&AnalysisResult> {
        match &self.outcome {
            AnalysisOutcome::Completed { result } => Some(result),
            AnalysisOutcome::Unavailable { .. } => None,
        }
    }
}

/// Self-contained trial snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialExport {
    /// Snapshot format version.
    pub format_version: u32,
    /// When the snapshot was taken.
    pub exported_at: DateTime<Utc>,
    /// The trial.
    pub trial: Trial,
    /// Treatments sorted by number.
    pub treatments: Vec<Treatment>,
    /// Plots in layout order.
    pub plots: Vec<Plot>,
    /// Randomization that produced the plots.
    pub randomization: Option<RandomizationRecord>,
    /// Treatments changed after the plots were laid out.
    #[serde(default)]
    pub stale_layout: bool,
    /// Every measurement, ordered by field date.
    pub measurements: Vec<Measurement>,
    /// One entry per measurement type present (empty when analyses were
    /// not requested).
    #[serde(default)]
    pub analyses: Vec<TypedAnalysis>,
}

impl TrialExport {
    /// Assemble an export from one consistent snapshot of a trial.
    #[must_use]
    pub fn assemble(
        trial: &TrialAggregate,
        measurements: Vec<Measurement>,
        options: ExportOptions,
        config: &AnalysisConfig,
    ) -> Self {
        let analyses = if options.include_analysis {
            analyze_all(trial, &measurements, config)
        } else {
            Vec::new()
        };
        let AggregateParts {
            trial: record,
            treatments,
            plots,
            randomization,
            stale_layout,
        } = trial.to_parts();
        debug!(
            trial_id = %record.trial_id(),
            plots = plots.len(),
            measurements = measurements.len(),
            analyses = analyses.len(),
            "trial exported"
        );
        Self {
            format_version: EXPORT_FORMAT_VERSION,
            exported_at: Utc::now(),
            trial: record,
            treatments,
            plots,
            randomization,
            stale_layout,
            measurements,
            analyses,
        }
    }

    /// Analysis slot for a measurement type.
    #[must_use]
    pub fn analysis(&self, measurement_type: &MeasurementType) -> Option<&TypedAnalysis> {
        self.analyses
            .iter()
            .find(|a| &a.measurement_type == measurement_type)
    }

    /// Serialize as pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Serialization`] if encoding fails.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse a JSON snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Serialization`] for malformed input.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Split into aggregate parts and measurements for restoring.
    #[must_use]
    pub fn into_parts(self) -> (AggregateParts, Vec<Measurement>) {
        (
            AggregateParts {
                trial: self.trial,
                treatments: self.treatments,
                plots: self.plots,
                randomization: self.randomization,
                stale_layout: self.stale_layout,
            },
            self.measurements,
        )
    }
}

fn analyze_all(trial: &TrialAggregate, measurements: &[Measurement], config: &AnalysisConfig) -> Vec<TypedAnalysis> {
    let types: Vec<MeasurementType> = measurements
        .iter()
        .map(|m| m.measurement_type().clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let run = |measurement_type: MeasurementType| {
        let observations = resolve(trial, measurements, &measurement_type);
        let outcome = match analyze(trial, &measurement_type, &observations, config) {
            Ok(result) => AnalysisOutcome::Completed {
                result: Box::new(result),
            },
            Err(e) => AnalysisOutcome::Unavailable {
                reason: e.to_string(),
            },
        };
        TypedAnalysis {
            measurement_type,
            outcome,
        }
    };

    #[cfg(feature = "rayon")]
    {
        types.into_par_iter().map(run).collect()
    }
    #[cfg(not(feature = "rayon"))]
    {
        types.into_iter().map(run).collect()
    }
}
