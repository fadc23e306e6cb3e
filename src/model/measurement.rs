//! Measurement - one reading recorded on a plot

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::{MeasurementId, MeasurementType, PlotId, TrialId};
use crate::{Error, Result};

/// Measurement Record represents a single reading on a plot.
///
/// Measurements are append-only. The unit is stored verbatim; no unit
/// conversion is ever applied. Several records may share the same
/// (plot, type, date); all are retained.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Measurement {
    measurement_id: MeasurementId,
    plot_id: PlotId,
    trial_id: TrialId,
    measurement_type: MeasurementType,
    value: f64,
    unit: String,
    measurement_date: NaiveDate,
    collector: Option<String>,
    notes: Option<String>,
    recorded_at: DateTime<Utc>,
}

impl Measurement {
    pub(crate) fn create(trial_id: TrialId, new: NewMeasurement) -> Result<Self> {
        new.validate()?;
        Ok(Self {
            measurement_id: MeasurementId::new(),
            plot_id: new.plot_id,
            trial_id,
            measurement_type: new.measurement_type,
            value: new.value,
            unit: new.unit,
            measurement_date: new.measurement_date,
            collector: new.collector,
            notes: new.notes,
            recorded_at: new.recorded_at.unwrap_or_else(Utc::now),
        })
    }

    /// Get the measurement ID.
    #[must_use]
    pub const fn measurement_id(&self) -> MeasurementId {
        self.measurement_id
    }

    /// Get the plot ID.
    #[must_use]
    pub const fn plot_id(&self) -> PlotId {
        self.plot_id
    }

    /// Get the trial the plot belonged to when recorded.
    #[must_use]
    pub const fn trial_id(&self) -> TrialId {
        self.trial_id
    }

    /// Get the measurement type.
    #[must_use]
    pub const fn measurement_type(&self) -> &MeasurementType {
        &self.measurement_type
    }

    /// Get the measured value.
    #[must_use]
    pub const fn value(&self) -> f64 {
        self.value
    }

    /// Get the unit string, verbatim.
    #[must_use]
    pub fn unit(&self) -> &str {
        &self.unit
    }

    /// Get the date the measurement was taken in the field.
    #[must_use]
    pub const fn measurement_date(&self) -> NaiveDate {
        self.measurement_date
    }

    /// Get the collector name, if any.
    #[must_use]
    pub fn collector(&self) -> Option<&str> {
        self.collector.as_deref()
    }

    /// Get the notes, if any.
    #[must_use]
    pub fn notes(&self) -> Option<&str> {
        self.notes.as_deref()
    }

    /// Get the timestamp when the record was written.
    #[must_use]
    pub const fn recorded_at(&self) -> DateTime<Utc> {
        self.recorded_at
    }

    pub(crate) fn check_invariants(&self) -> Result<()> {
        check_value(&self.measurement_type, self.value, &self.unit)
    }
}

fn check_value(measurement_type: &MeasurementType, value: f64, unit: &str) -> Result<()> {
    if !value.is_finite() {
        return Err(Error::Validation(format!(
            "{measurement_type} value must be finite, got {value}"
        )));
    }
    if unit.trim().is_empty() {
        return Err(Error::Validation(format!(
            "{measurement_type} measurement requires a unit"
        )));
    }
    if let MeasurementType::Custom(name) = measurement_type {
        if name.trim().is_empty() {
            return Err(Error::Validation(
                "custom measurement type requires a non-empty name".to_string(),
            ));
        }
    }
    Ok(())
}

/// Measurement payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewMeasurement {
    /// Plot the reading was taken on.
    pub plot_id: PlotId,
    /// What was measured.
    pub measurement_type: MeasurementType,
    /// Reading; must be finite.
    pub value: f64,
    /// Unit, stored verbatim.
    pub unit: String,
    /// Field date of the reading.
    pub measurement_date: NaiveDate,
    /// Who collected it.
    #[serde(default)]
    pub collector: Option<String>,
    /// Free-text notes.
    #[serde(default)]
    pub notes: Option<String>,
    /// Override of the write timestamp (imports and tests).
    #[serde(default)]
    pub recorded_at: Option<DateTime<Utc>>,
}

impl NewMeasurement {
    /// Create a builder with the required fields.
    #[must_use]
    pub fn builder(
        plot_id: PlotId,
        measurement_type: MeasurementType,
        value: f64,
        unit: impl Into<String>,
        measurement_date: NaiveDate,
    ) -> NewMeasurementBuilder {
        NewMeasurementBuilder::new(plot_id, measurement_type, value, unit, measurement_date)
    }

    /// Check the value is finite and the unit and custom name are present.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] describing the rejected field.
    pub fn validate(&self) -> Result<()> {
        check_value(&self.measurement_type, self.value, &self.unit)
    }
}

/// Builder for `NewMeasurement`.
#[derive(Debug)]
pub struct NewMeasurementBuilder {
    inner: NewMeasurement,
}

impl NewMeasurementBuilder {
    /// Create a new builder with required fields.
    #[must_use]
    pub fn new(
        plot_id: PlotId,
        measurement_type: MeasurementType,
        value: f64,
        unit: impl Into<String>,
        measurement_date: NaiveDate,
    ) -> Self {
        Self {
            inner: NewMeasurement {
                plot_id,
                measurement_type,
                value,
                unit: unit.into(),
                measurement_date,
                collector: None,
                notes: None,
                recorded_at: None,
            },
        }
    }

    /// Set the collector name.
    #[must_use]
    pub fn collector(mut self, collector: impl Into<String>) -> Self {
        self.inner.collector = Some(collector.into());
        self
    }

    /// Set notes.
    #[must_use]
    pub fn notes(mut self, notes: impl Into<String>) -> Self {
        self.inner.notes = Some(notes.into());
        self
    }

    /// Set a custom write timestamp.
    #[must_use]
    pub const fn recorded_at(mut self, recorded_at: DateTime<Utc>) -> Self {
        self.inner.recorded_at = Some(recorded_at);
        self
    }

    /// Build the `NewMeasurement`.
    #[must_use]
    pub fn build(self) -> NewMeasurement {
        self.inner
    }
}
