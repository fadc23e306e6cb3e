//! Trial - root entity of a field experiment

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};

use super::{ExperimentalDesign, TrialId, TrialType};
use crate::{Error, Result};

/// Years outside this range are almost certainly typos.
const YEAR_RANGE: std::ops::RangeInclusive<i32> = 1900..=2200;

/// Trial represents one field experiment.
///
/// The declared `num_treatments` is an upper bound on how many treatments
/// may be added; `num_replications` is the number of blocks (or repeats,
/// for CRD) the design generator lays out.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Trial {
    trial_id: TrialId,
    name: String,
    trial_type: TrialType,
    design: ExperimentalDesign,
    year: i32,
    crop_type: String,
    num_treatments: u32,
    num_replications: u32,
    objective: Option<String>,
    field_id: Option<String>,
    plot_size: Option<String>,
    plot_area_acres: Option<f64>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Trial {
    /// Create a trial from a validated creation payload.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if the payload violates a bound
    /// (see [`NewTrial::validate`]).
    pub fn create(new: NewTrial) -> Result<Self> {
        new.validate()?;
        let now = Utc::now();
        Ok(Self {
            trial_id: TrialId::new(),
            name: new.name.trim().to_string(),
            trial_type: new.trial_type,
            design: new.design,
            year: new.year,
            crop_type: new.crop_type,
            num_treatments: new.num_treatments,
            num_replications: new.num_replications,
            objective: new.objective,
            field_id: new.field_id,
            plot_size: new.plot_size,
            plot_area_acres: new.plot_area_acres,
            created_at: now,
            updated_at: now,
        })
    }

    /// Get the trial ID.
    #[must_use]
    pub const fn trial_id(&self) -> TrialId {
        self.trial_id
    }

    /// Get the trial name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the trial type.
    #[must_use]
    pub const fn trial_type(&self) -> TrialType {
        self.trial_type
    }

    /// Get the experimental design family.
    #[must_use]
    pub const fn design(&self) -> ExperimentalDesign {
        self.design
    }

    /// Get the season year.
    #[must_use]
    pub const fn year(&self) -> i32 {
        self.year
    }

    /// Get the crop type.
    #[must_use]
    pub fn crop_type(&self) -> &str {
        &self.crop_type
    }

    /// Get the declared number of treatments.
    #[must_use]
    pub const fn num_treatments(&self) -> u32 {
        self.num_treatments
    }

    /// Get the declared number of replications.
    #[must_use]
    pub const fn num_replications(&self) -> u32 {
        self.num_replications
    }

    /// Get the free-text objective, if any.
    #[must_use]
    pub fn objective(&self) -> Option<&str> {
        self.objective.as_deref()
    }

    /// Get the field identifier, if any.
    #[must_use]
    pub fn field_id(&self) -> Option<&str> {
        self.field_id.as_deref()
    }

    /// Get the plot size description (e.g. "30ft x 100ft"), if any.
    #[must_use]
    pub fn plot_size(&self) -> Option<&str> {
        self.plot_size.as_deref()
    }

    /// Get the plot area in acres, if any.
    #[must_use]
    pub const fn plot_area_acres(&self) -> Option<f64> {
        self.plot_area_acres
    }

    /// Get the creation timestamp.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Get the last-update timestamp.
    #[must_use]
    pub const fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Apply an update. Bounds that depend on treatments and plots are
    /// checked by the aggregate before this is called.
    pub(crate) fn apply(&mut self, update: TrialUpdate) -> Result<()> {
        update.validate()?;
        if let Some(name) = update.name {
            self.name = name.trim().to_string();
        }
        if let Some(year) = update.year {
            self.year = year;
        }
        if let Some(crop_type) = update.crop_type {
            self.crop_type = crop_type;
        }
        if let Some(n) = update.num_treatments {
            self.num_treatments = n;
        }
        if let Some(r) = update.num_replications {
            self.num_replications = r;
        }
        if let Some(objective) = update.objective {
            self.objective = Some(objective);
        }
        if let Some(field_id) = update.field_id {
            self.field_id = Some(field_id);
        }
        if let Some(plot_size) = update.plot_size {
            self.plot_size = Some(plot_size);
        }
        if let Some(area) = update.plot_area_acres {
            self.plot_area_acres = Some(area);
        }
        self.updated_at = Utc::now();
        Ok(())
    }

    pub(crate) fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Check the invariants of a trial loaded from a snapshot.
    pub(crate) fn check_invariants(&self) -> Result<()> {
        validate_fields(
            &self.name,
            self.year,
            self.num_treatments,
            self.num_replications,
            self.plot_area_acres,
        )
    }
}

fn validate_fields(
    name: &str,
    year: i32,
    num_treatments: u32,
    num_replications: u32,
    plot_area_acres: Option<f64>,
) -> Result<()> {
    if name.trim().is_empty() {
        return Err(Error::Validation("trial name must not be empty".to_string()));
    }
    if !YEAR_RANGE.contains(&year) {
        return Err(Error::Validation(format!(
            "trial year {year} outside {}..={}",
            YEAR_RANGE.start(),
            YEAR_RANGE.end()
        )));
    }
    if num_treatments == 0 {
        return Err(Error::Validation(
            "num_treatments must be a positive integer".to_string(),
        ));
    }
    if num_replications == 0 {
        return Err(Error::Validation(
            "num_replications must be a positive integer".to_string(),
        ));
    }
    if let Some(area) = plot_area_acres {
        if !area.is_finite() || area <= 0.0 {
            return Err(Error::Validation(format!(
                "plot_area_acres must be finite and positive, got {area}"
            )));
        }
    }
    Ok(())
}

/// Trial creation payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewTrial {
    /// Trial name.
    pub name: String,
    /// Trial purpose.
    pub trial_type: TrialType,
    /// Design family.
    pub design: ExperimentalDesign,
    /// Season year.
    pub year: i32,
    /// Crop being trialed.
    pub crop_type: String,
    /// Declared treatment count (upper bound).
    pub num_treatments: u32,
    /// Declared replication count.
    pub num_replications: u32,
    /// Free-text objective.
    #[serde(default)]
    pub objective: Option<String>,
    /// Field identifier in the host application.
    #[serde(default)]
    pub field_id: Option<String>,
    /// Plot size description.
    #[serde(default)]
    pub plot_size: Option<String>,
    /// Plot area in acres.
    #[serde(default)]
    pub plot_area_acres: Option<f64>,
}

impl NewTrial {
    /// Create a builder with the structural fields every trial needs.
    #[must_use]
    pub fn builder(
        name: impl Into<String>,
        trial_type: TrialType,
        design: ExperimentalDesign,
        num_treatments: u32,
        num_replications: u32,
    ) -> NewTrialBuilder {
        NewTrialBuilder::new(name, trial_type, design, num_treatments, num_replications)
    }

    /// Check positive counts, non-empty name, plausible year and area.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] naming the offending field.
    pub fn validate(&self) -> Result<()> {
        validate_fields(
            &self.name,
            self.year,
            self.num_treatments,
            self.num_replications,
            self.plot_area_acres,
        )
    }
}

/// Builder for `NewTrial`.
#[derive(Debug)]
pub struct NewTrialBuilder {
    inner: NewTrial,
}

impl NewTrialBuilder {
    /// Create a new builder with required fields; the year defaults to the
    /// current calendar year.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        trial_type: TrialType,
        design: ExperimentalDesign,
        num_treatments: u32,
        num_replications: u32,
    ) -> Self {
        Self {
            inner: NewTrial {
                name: name.into(),
                trial_type,
                design,
                year: Utc::now().year(),
                crop_type: String::new(),
                num_treatments,
                num_replications,
                objective: None,
                field_id: None,
                plot_size: None,
                plot_area_acres: None,
            },
        }
    }

    /// Set the season year.
    #[must_use]
    pub const fn year(mut self, year: i32) -> Self {
        self.inner.year = year;
        self
    }

    /// Set the crop type.
    #[must_use]
    pub fn crop_type(mut self, crop_type: impl Into<String>) -> Self {
        self.inner.crop_type = crop_type.into();
        self
    }

    /// Set the objective.
    #[must_use]
    pub fn objective(mut self, objective: impl Into<String>) -> Self {
        self.inner.objective = Some(objective.into());
        self
    }

    /// Set the field identifier.
    #[must_use]
    pub fn field_id(mut self, field_id: impl Into<String>) -> Self {
        self.inner.field_id = Some(field_id.into());
        self
    }

    /// Set the plot size description.
    #[must_use]
    pub fn plot_size(mut self, plot_size: impl Into<String>) -> Self {
        self.inner.plot_size = Some(plot_size.into());
        self
    }

    /// Set the plot area in acres.
    #[must_use]
    pub const fn plot_area_acres(mut self, acres: f64) -> Self {
        self.inner.plot_area_acres = Some(acres);
        self
    }

    /// Build the `NewTrial`.
    #[must_use]
    pub fn build(self) -> NewTrial {
        self.inner
    }
}

/// Partial trial update; `None` fields are left unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TrialUpdate {
    /// New name.
    pub name: Option<String>,
    /// New season year.
    pub year: Option<i32>,
    /// New crop type.
    pub crop_type: Option<String>,
    /// New declared treatment count.
    pub num_treatments: Option<u32>,
    /// New declared replication count.
    pub num_replications: Option<u32>,
    /// New objective.
    pub objective: Option<String>,
    /// New field identifier.
    pub field_id: Option<String>,
    /// New plot size description.
    pub plot_size: Option<String>,
    /// New plot area in acres.
    pub plot_area_acres: Option<f64>,
}

impl TrialUpdate {
    fn validate(&self) -> Result<()> {
        if let Some(name) = &self.name {
            if name.trim().is_empty() {
                return Err(Error::Validation("trial name must not be empty".to_string()));
            }
        }
        if let Some(year) = self.year {
            if !YEAR_RANGE.contains(&year) {
                return Err(Error::Validation(format!("trial year {year} out of range")));
            }
        }
        if self.num_treatments == Some(0) {
            return Err(Error::Validation(
                "num_treatments must be a positive integer".to_string(),
            ));
        }
        if self.num_replications == Some(0) {
            return Err(Error::Validation(
                "num_replications must be a positive integer".to_string(),
            ));
        }
        if let Some(area) = self.plot_area_acres {
            if !area.is_finite() || area <= 0.0 {
                return Err(Error::Validation(format!(
                    "plot_area_acres must be finite and positive, got {area}"
                )));
            }
        }
        Ok(())
    }
}
