//! Measurement ledger - append-only readings, sharded per trial
//!
//! The ledger never updates a record in place. Duplicate readings for the
//! same (plot, type, date) are kept as repeated samples; the analyzer
//! decides how to aggregate them.

use dashmap::DashMap;
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::debug;

use crate::aggregate::TrialAggregate;
use crate::model::{Measurement, MeasurementType, NewMeasurement, PlotId, TreatmentId, TrialId};
use crate::{Error, Result};

/// One ledger entry resolved through the plot → treatment mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// Plot the reading was taken on.
    pub plot_id: PlotId,
    /// Treatment assigned to that plot.
    pub treatment_id: TreatmentId,
    /// The reading.
    pub value: f64,
    /// Unit, verbatim.
    pub unit: String,
}

/// Resolve measurements of one type to treatment observations through the
/// plot → treatment mapping of `trial`.
///
/// Measurements on plots `trial` does not have are skipped.
#[must_use]
pub fn resolve(
    trial: &TrialAggregate,
    measurements: &[Measurement],
    measurement_type: &MeasurementType,
) -> Vec<Observation> {
    measurements
        .iter()
        .filter(|m| m.measurement_type() == measurement_type)
        .filter_map(|m| {
            trial.plot(m.plot_id()).map(|plot| Observation {
                plot_id: m.plot_id(),
                treatment_id: plot.treatment_id(),
                value: m.value(),
                unit: m.unit().to_string(),
            })
        })
        .collect()
}

/// Filter for listing measurements.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeasurementFilter {
    /// Only this measurement type.
    pub measurement_type: Option<MeasurementType>,
    /// Only this plot.
    pub plot_id: Option<PlotId>,
}

impl MeasurementFilter {
    /// Filter on a measurement type.
    #[must_use]
    pub const fn of_type(measurement_type: MeasurementType) -> Self {
        Self {
            measurement_type: Some(measurement_type),
            plot_id: None,
        }
    }

    /// Filter on a plot.
    #[must_use]
    pub const fn on_plot(plot_id: PlotId) -> Self {
        Self {
            measurement_type: None,
            plot_id: Some(plot_id),
        }
    }

    fn matches(&self, m: &Measurement) -> bool {
        self.measurement_type
            .as_ref()
            .map_or(true, |t| m.measurement_type() == t)
            && self.plot_id.map_or(true, |p| m.plot_id() == p)
    }
}

/// Append-only measurement store, one shard per trial.
///
/// Appends to different trials touch different shards and never contend.
#[derive(Debug, Default)]
pub struct MeasurementLedger {
    shards: DashMap<TrialId, Vec<Measurement>>,
}

impl MeasurementLedger {
    /// Create an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a reading on a plot of `trial`.
    ///
    /// # Errors
    ///
    /// - [`Error::Validation`] for a non-finite value, blank unit or blank
    ///   custom type name
    /// - [`Error::NotFound`] if the plot is not part of the trial
    pub fn record(&self, trial: &TrialAggregate, new: NewMeasurement) -> Result<Measurement> {
        new.validate()?;
        if trial.plot(new.plot_id).is_none() {
            return Err(Error::not_found("plot", new.plot_id));
        }
        let measurement = Measurement::create(trial.trial_id(), new)?;
        debug!(
            trial_id = %trial.trial_id(),
            plot_id = %measurement.plot_id(),
            measurement_type = %measurement.measurement_type(),
            "measurement recorded"
        );
        self.shards
            .entry(trial.trial_id())
            .or_default()
            .push(measurement.clone());
        Ok(measurement)
    }

    /// Observations of one measurement type, resolved to treatments.
    ///
    /// Entries whose plot no longer exists in `trial` are skipped.
    #[must_use]
    pub fn query(&self, trial: &TrialAggregate, measurement_type: &MeasurementType) -> Vec<Observation> {
        self.shards
            .get(&trial.trial_id())
            .map(|shard| resolve(trial, &shard, measurement_type))
            .unwrap_or_default()
    }

    /// Measurements of a trial matching `filter`, ordered by field date then
    /// write time.
    #[must_use]
    pub fn list(&self, trial_id: TrialId, filter: &MeasurementFilter) -> Vec<Measurement> {
        let mut out: Vec<Measurement> = self
            .shards
            .get(&trial_id)
            .map(|shard| shard.iter().filter(|m| filter.matches(m)).cloned().collect())
            .unwrap_or_default();
        out.sort_by_key(|m| (m.measurement_date(), m.recorded_at()));
        out
    }

    /// Distinct measurement types recorded for a trial, sorted.
    #[must_use]
    pub fn measurement_types(&self, trial_id: TrialId) -> Vec<MeasurementType> {
        self.shards
            .get(&trial_id)
            .map(|shard| {
                shard
                    .iter()
                    .map(|m| m.measurement_type().clone())
                    .collect::<BTreeSet<_>>()
                    .into_iter()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of measurements recorded for a trial.
    #[must_use]
    pub fn count(&self, trial_id: TrialId) -> usize {
        self.shards.get(&trial_id).map_or(0, |shard| shard.len())
    }

    /// Number of measurements recorded on one plot.
    #[must_use]
    pub fn count_for_plot(&self, trial_id: TrialId, plot_id: PlotId) -> usize {
        self.shards.get(&trial_id).map_or(0, |shard| {
            shard.iter().filter(|m| m.plot_id() == plot_id).count()
        })
    }

    /// Total measurements across all trials.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shards.iter().map(|shard| shard.len()).sum()
    }

    /// Whether the ledger holds no measurements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Delete every measurement on the given plots. Returns how many went.
    pub(crate) fn remove_plots(&self, trial_id: TrialId, plot_ids: &FxHashSet<PlotId>) -> usize {
        let Some(mut shard) = self.shards.get_mut(&trial_id) else {
            return 0;
        };
        let before = shard.len();
        shard.retain(|m| !plot_ids.contains(&m.plot_id()));
        before - shard.len()
    }

    /// Delete a trial's shard. Returns how many measurements went.
    pub(crate) fn remove_trial(&self, trial_id: TrialId) -> usize {
        self.shards
            .remove(&trial_id)
            .map_or(0, |(_, shard)| shard.len())
    }

    /// Load previously exported measurements for a restored trial.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] for a record that belongs to another
    /// trial or carries an invalid value, and [`Error::NotFound`] for a
    /// record on a plot the trial does not have.
    pub(crate) fn restore(&self, trial: &TrialAggregate, measurements: Vec<Measurement>) -> Result<()> {
        for m in &measurements {
            if m.trial_id() != trial.trial_id() {
                return Err(Error::Validation(format!(
                    "measurement {} belongs to trial {}, not {}",
                    m.measurement_id(),
                    m.trial_id(),
                    trial.trial_id()
                )));
            }
            if trial.plot(m.plot_id()).is_none() {
                return Err(Error::not_found("plot", m.plot_id()));
            }
            m.check_invariants()?;
        }
        self.shards.insert(trial.trial_id(), measurements);
        Ok(())
    }
}
