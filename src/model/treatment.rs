//! Treatment - one level (or factor combination) applied to plots

use serde::{Deserialize, Serialize};

use super::{TreatmentId, TrialId};
use crate::{Error, Result};

/// Treatment applied to a set of plots in one trial.
///
/// `treatment_number` is unique within the trial and is the sort key for
/// every presentation (and for mapping factorial structure, see
/// [`crate::design::FactorStructure`]).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Treatment {
    treatment_id: TreatmentId,
    trial_id: TrialId,
    treatment_number: u32,
    name: String,
    product: Option<String>,
    rate: Option<f64>,
    rate_unit: Option<String>,
    application_method: Option<String>,
    application_timing: Option<String>,
    description: Option<String>,
    is_control: bool,
}

impl Treatment {
    pub(crate) fn create(trial_id: TrialId, new: NewTreatment) -> Result<Self> {
        new.validate()?;
        Ok(Self {
            treatment_id: TreatmentId::new(),
            trial_id,
            treatment_number: new.treatment_number,
            name: new.name.trim().to_string(),
            product: new.product,
            rate: new.rate,
            rate_unit: new.rate_unit,
            application_method: new.application_method,
            application_timing: new.application_timing,
            description: new.description,
            is_control: new.is_control,
        })
    }

    /// Get the treatment ID.
    #[must_use]
    pub const fn treatment_id(&self) -> TreatmentId {
        self.treatment_id
    }

    /// Get the owning trial ID.
    #[must_use]
    pub const fn trial_id(&self) -> TrialId {
        self.trial_id
    }

    /// Get the treatment number (unique per trial).
    #[must_use]
    pub const fn treatment_number(&self) -> u32 {
        self.treatment_number
    }

    /// Get the treatment name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the product name, if any.
    #[must_use]
    pub fn product(&self) -> Option<&str> {
        self.product.as_deref()
    }

    /// Get the application rate, if any.
    #[must_use]
    pub const fn rate(&self) -> Option<f64> {
        self.rate
    }

    /// Get the rate unit, if any.
    #[must_use]
    pub fn rate_unit(&self) -> Option<&str> {
        self.rate_unit.as_deref()
    }

    /// Get the application method, if any.
    #[must_use]
    pub fn application_method(&self) -> Option<&str> {
        self.application_method.as_deref()
    }

    /// Get the application timing, if any.
    #[must_use]
    pub fn application_timing(&self) -> Option<&str> {
        self.application_timing.as_deref()
    }

    /// Get the description, if any.
    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Whether this treatment is marked as a control.
    #[must_use]
    pub const fn is_control(&self) -> bool {
        self.is_control
    }

    /// Replace the descriptive attributes, keeping identity and number.
    pub(crate) fn apply(&mut self, update: TreatmentUpdate) -> Result<()> {
        update.validate()?;
        if let Some(name) = update.name {
            self.name = name.trim().to_string();
        }
        if let Some(product) = update.product {
            self.product = Some(product);
        }
        if let Some(rate) = update.rate {
            self.rate = Some(rate);
        }
        if let Some(unit) = update.rate_unit {
            self.rate_unit = Some(unit);
        }
        if let Some(method) = update.application_method {
            self.application_method = Some(method);
        }
        if let Some(timing) = update.application_timing {
            self.application_timing = Some(timing);
        }
        if let Some(description) = update.description {
            self.description = Some(description);
        }
        if let Some(is_control) = update.is_control {
            self.is_control = is_control;
        }
        Ok(())
    }
}

fn validate_rate(rate: Option<f64>) -> Result<()> {
    match rate {
        Some(r) if !r.is_finite() || r < 0.0 => Err(Error::Validation(format!(
            "treatment rate must be finite and non-negative, got {r}"
        ))),
        _ => Ok(()),
    }
}

/// Treatment payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewTreatment {
    /// Number unique within the trial.
    pub treatment_number: u32,
    /// Display name.
    pub name: String,
    /// Product applied.
    #[serde(default)]
    pub product: Option<String>,
    /// Application rate.
    #[serde(default)]
    pub rate: Option<f64>,
    /// Unit of the application rate.
    #[serde(default)]
    pub rate_unit: Option<String>,
    /// Application method.
    #[serde(default)]
    pub application_method: Option<String>,
    /// Application timing.
    #[serde(default)]
    pub application_timing: Option<String>,
    /// Free-text description.
    #[serde(default)]
    pub description: Option<String>,
    /// Whether this is a control (baseline) treatment.
    #[serde(default)]
    pub is_control: bool,
}

impl NewTreatment {
    /// Create a builder with the required fields.
    #[must_use]
    pub fn builder(treatment_number: u32, name: impl Into<String>) -> NewTreatmentBuilder {
        NewTreatmentBuilder::new(treatment_number, name)
    }

    /// Check the number is positive, the name non-empty, and the rate sane.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] naming the offending field.
    pub fn validate(&self) -> Result<()> {
        if self.treatment_number == 0 {
            return Err(Error::Validation(
                "treatment_number must be a positive integer".to_string(),
            ));
        }
        if self.name.trim().is_empty() {
            return Err(Error::Validation(format!(
                "treatment {} name must not be empty",
                self.treatment_number
            )));
        }
        validate_rate(self.rate)
    }
}

/// Builder for `NewTreatment`.
#[derive(Debug)]
pub struct NewTreatmentBuilder {
    inner: NewTreatment,
}

impl NewTreatmentBuilder {
    /// Create a new builder with required fields.
    #[must_use]
    pub fn new(treatment_number: u32, name: impl Into<String>) -> Self {
        Self {
            inner: NewTreatment {
                treatment_number,
                name: name.into(),
                product: None,
                rate: None,
                rate_unit: None,
                application_method: None,
                application_timing: None,
                description: None,
                is_control: false,
            },
        }
    }

    /// Set the product.
    #[must_use]
    pub fn product(mut self, product: impl Into<String>) -> Self {
        self.inner.product = Some(product.into());
        self
    }

    /// Set the rate and its unit.
    #[must_use]
    pub fn rate(mut self, rate: f64, unit: impl Into<String>) -> Self {
        self.inner.rate = Some(rate);
        self.inner.rate_unit = Some(unit.into());
        self
    }

    /// Set the application method.
    #[must_use]
    pub fn application_method(mut self, method: impl Into<String>) -> Self {
        self.inner.application_method = Some(method.into());
        self
    }

    /// Set the application timing.
    #[must_use]
    pub fn application_timing(mut self, timing: impl Into<String>) -> Self {
        self.inner.application_timing = Some(timing.into());
        self
    }

    /// Set the description.
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.inner.description = Some(description.into());
        self
    }

    /// Mark as the control treatment.
    #[must_use]
    pub const fn control(mut self) -> Self {
        self.inner.is_control = true;
        self
    }

    /// Build the `NewTreatment`.
    #[must_use]
    pub fn build(self) -> NewTreatment {
        self.inner
    }
}

/// Partial treatment update; `None` fields are left unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TreatmentUpdate {
    /// New name.
    pub name: Option<String>,
    /// New product.
    pub product: Option<String>,
    /// New rate.
    pub rate: Option<f64>,
    /// New rate unit.
    pub rate_unit: Option<String>,
    /// New application method.
    pub application_method: Option<String>,
    /// New application timing.
    pub application_timing: Option<String>,
    /// New description.
    pub description: Option<String>,
    /// New control flag.
    pub is_control: Option<bool>,
}

impl TreatmentUpdate {
    fn validate(&self) -> Result<()> {
        if let Some(name) = &self.name {
            if name.trim().is_empty() {
                return Err(Error::Validation(
                    "treatment name must not be empty".to_string(),
                ));
            }
        }
        validate_rate(self.rate)
    }
}
