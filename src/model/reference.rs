//! Reference data: trial types, experimental designs, measurement types
//!
//! Each enumeration has a stable snake_case code (its serde form), a
//! human-readable label, and a `FromStr` that accepts the code.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Purpose of a field trial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrialType {
    /// Compare crop varieties or hybrids.
    VarietyTrial,
    /// Compare treatments or products.
    TreatmentComparison,
    /// Test different application rates.
    RateStudy,
    /// Test application timing.
    TimingStudy,
    /// Evaluate a new product.
    ProductEvaluation,
    /// On-farm demonstration.
    Demonstration,
    /// Farmer-led research.
    OnFarmResearch,
}

impl TrialType {
    /// Every trial type, in presentation order.
    pub const ALL: [Self; 7] = [
        Self::VarietyTrial,
        Self::TreatmentComparison,
        Self::RateStudy,
        Self::TimingStudy,
        Self::ProductEvaluation,
        Self::Demonstration,
        Self::OnFarmResearch,
    ];

    /// Stable snake_case code.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::VarietyTrial => "variety_trial",
            Self::TreatmentComparison => "treatment_comparison",
            Self::RateStudy => "rate_study",
            Self::TimingStudy => "timing_study",
            Self::ProductEvaluation => "product_evaluation",
            Self::Demonstration => "demonstration",
            Self::OnFarmResearch => "on_farm_research",
        }
    }

    /// Human-readable label.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::VarietyTrial => "Variety Trial",
            Self::TreatmentComparison => "Treatment Comparison",
            Self::RateStudy => "Rate Study",
            Self::TimingStudy => "Timing Study",
            Self::ProductEvaluation => "Product Evaluation",
            Self::Demonstration => "Demonstration",
            Self::OnFarmResearch => "On Farm Research",
        }
    }
}

/// Experimental design family used to lay out plots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExperimentalDesign {
    /// CRD: treatments randomly assigned with no blocking.
    CompletelyRandomized,
    /// RCBD: treatments randomized independently within each block.
    RandomizedCompleteBlock,
    /// Main plots and subplots for two-factor studies.
    SplitPlot,
    /// Horizontal and vertical strips for equipment trials.
    StripPlot,
    /// All combinations of two or more factors, RCBD randomization.
    Factorial,
}

impl ExperimentalDesign {
    /// Every design family, in presentation order.
    pub const ALL: [Self; 5] = [
        Self::CompletelyRandomized,
        Self::RandomizedCompleteBlock,
        Self::SplitPlot,
        Self::StripPlot,
        Self::Factorial,
    ];

    /// Stable snake_case code.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::CompletelyRandomized => "completely_randomized",
            Self::RandomizedCompleteBlock => "randomized_complete_block",
            Self::SplitPlot => "split_plot",
            Self::StripPlot => "strip_plot",
            Self::Factorial => "factorial",
        }
    }

    /// Human-readable label.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::CompletelyRandomized => "Completely Randomized",
            Self::RandomizedCompleteBlock => "Randomized Complete Block",
            Self::SplitPlot => "Split Plot",
            Self::StripPlot => "Strip Plot",
            Self::Factorial => "Factorial",
        }
    }

    /// One-line description for design pickers.
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::CompletelyRandomized => "CRD - Simple design, treatments randomly assigned",
            Self::RandomizedCompleteBlock => "RCBD - Blocks account for field variability",
            Self::SplitPlot => "Main plots and subplots for multi-factor studies",
            Self::StripPlot => "Horizontal and vertical strips for equipment trials",
            Self::Factorial => "All combinations of two or more factors",
        }
    }

    /// Whether plots carry a block index.
    #[must_use]
    pub const fn is_blocked(self) -> bool {
        !matches!(self, Self::CompletelyRandomized)
    }

    /// Whether the layout requires a two-factor structure.
    #[must_use]
    pub const fn requires_factor_structure(self) -> bool {
        matches!(self, Self::SplitPlot | Self::StripPlot)
    }
}

/// Direction in which a measurement improves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Preference {
    /// Larger values are better (yield, test weight).
    HigherIsBetter,
    /// Smaller values are better (pest and disease ratings).
    LowerIsBetter,
}

/// Kind of measurement recorded on a plot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeasurementType {
    /// Crop yield (bu/acre, lbs/acre).
    Yield,
    /// Plants per acre.
    PlantPopulation,
    /// Plant height.
    #[serde(alias = "plant_height")]
    Height,
    /// Pest severity rating (0-10).
    PestRating,
    /// Disease severity rating (0-10).
    DiseaseRating,
    /// Plant vigor rating (1-10).
    VigorRating,
    /// Grain moisture percent.
    Moisture,
    /// Test weight (lbs/bu).
    TestWeight,
    /// Percent lodging.
    Lodging,
    /// Percent greensnap.
    Greensnap,
    /// Standability rating.
    Standability,
    /// Caller-named measurement.
    Custom(String),
}

impl MeasurementType {
    /// Every built-in measurement type, in presentation order.
    pub const STANDARD: [Self; 11] = [
        Self::Yield,
        Self::PlantPopulation,
        Self::Height,
        Self::PestRating,
        Self::DiseaseRating,
        Self::VigorRating,
        Self::Moisture,
        Self::TestWeight,
        Self::Lodging,
        Self::Greensnap,
        Self::Standability,
    ];

    /// Build a custom measurement type, rejecting blank names.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if the trimmed name is empty.
    pub fn custom(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return Err(Error::Validation(
                "custom measurement type requires a non-empty name".to_string(),
            ));
        }
        Ok(Self::Custom(trimmed.to_string()))
    }

    /// Stable code; custom types render as `custom:<name>`.
    #[must_use]
    pub fn code(&self) -> String {
        match self {
            Self::Yield => "yield".to_string(),
            Self::PlantPopulation => "plant_population".to_string(),
            Self::Height => "height".to_string(),
            Self::PestRating => "pest_rating".to_string(),
            Self::DiseaseRating => "disease_rating".to_string(),
            Self::VigorRating => "vigor_rating".to_string(),
            Self::Moisture => "moisture".to_string(),
            Self::TestWeight => "test_weight".to_string(),
            Self::Lodging => "lodging".to_string(),
            Self::Greensnap => "greensnap".to_string(),
            Self::Standability => "standability".to_string(),
            Self::Custom(name) => format!("custom:{name}"),
        }
    }

    /// Human-readable label.
    #[must_use]
    pub fn label(&self) -> String {
        match self {
            Self::Custom(name) => name.clone(),
            other => other
                .code()
                .split('_')
                .map(|word| {
                    let mut chars = word.chars();
                    chars.next().map_or_else(String::new, |first| {
                        first.to_uppercase().chain(chars).collect()
                    })
                })
                .collect::<Vec<_>>()
                .join(" "),
        }
    }

    /// Whether larger or smaller values are better when ranking treatments.
    #[must_use]
    pub fn preference(&self) -> Preference {
        match self {
            Self::PestRating
            | Self::DiseaseRating
            | Self::Moisture
            | Self::Lodging
            | Self::Greensnap => Preference::LowerIsBetter,
            Self::Yield
            | Self::PlantPopulation
            | Self::Height
            | Self::VigorRating
            | Self::TestWeight
            | Self::Standability
            | Self::Custom(_) => Preference::HigherIsBetter,
        }
    }
}

impl fmt::Display for TrialType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl fmt::Display for ExperimentalDesign {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl fmt::Display for MeasurementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.code())
    }
}

impl FromStr for TrialType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|t| t.code() == s)
            .ok_or_else(|| Error::Validation(format!("unknown trial type '{s}'")))
    }
}

impl FromStr for ExperimentalDesign {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let code = match s {
            "crd" => "completely_randomized",
            "rcbd" => "randomized_complete_block",
            other => other,
        };
        Self::ALL
            .into_iter()
            .find(|d| d.code() == code)
            .ok_or_else(|| Error::Validation(format!("unknown experimental design '{s}'")))
    }
}

impl FromStr for MeasurementType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if let Some(name) = s.strip_prefix("custom:") {
            return Self::custom(name);
        }
        if s == "plant_height" {
            return Ok(Self::Height);
        }
        Self::STANDARD
            .into_iter()
            .find(|m| m.code() == s)
            .ok_or_else(|| Error::Validation(format!("unknown measurement type '{s}'")))
    }
}
