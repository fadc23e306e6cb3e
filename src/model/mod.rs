//! Trial domain model
//!
//! ## Schema Overview
//!
//! ```text
//! Trial (1) ──< Treatment (N)
//!   │               ▲
//!   └──< Plot (N) ──┘  (plot references treatment by ID)
//!          ▲
//!          └── Measurement (N)  (ledger references plot by ID)
//! ```
//!
//! Records keep their fields private and expose getters; creation payloads
//! (`NewTrial`, `NewTreatment`, `NewPlot`, `NewMeasurement`) are plain serde structs
//! with builders.

mod ids;
mod measurement;
mod plot;
mod reference;
mod treatment;
mod trial;

pub use ids::{MeasurementId, PlotId, TreatmentId, TrialId};
pub use measurement::{Measurement, NewMeasurement, NewMeasurementBuilder};
pub use plot::{NewPlot, Plot};
pub use reference::{ExperimentalDesign, MeasurementType, Preference, TrialType};
pub use treatment::{NewTreatment, NewTreatmentBuilder, Treatment, TreatmentUpdate};
pub use trial::{NewTrial, NewTrialBuilder, Trial, TrialUpdate};
