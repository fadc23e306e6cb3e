//! # Plotwise: Field Trial Design & Statistical Analysis
//!
//! **Version**: 0.1.0
//!
//! Plotwise generates randomized plot layouts for agronomic field trials and
//! analyzes the measurements farmers record against them: treatment means,
//! pooled error, pairwise t-tests, least significant differences and letter
//! groups.
//!
//! ## Design Principles (Toyota Way Aligned)
//!
//! - **Poka-Yoke safety**: Structural changes that would orphan data are
//!   rejected unless the caller explicitly acknowledges them
//! - **Genchi Genbutsu**: Every layout records the seed that produced it
//! - **Jidoka**: Invariants are checked on every restore from a snapshot
//!
//! ## Supported designs
//!
//! Completely randomized (CRD), randomized complete block (RCBD),
//! split-plot, strip-plot and factorial.
//!
//! ## Example Usage
//!
//! ```rust
//! use plotwise::aggregate::{ChangePolicy, GenerationRequest};
//! use plotwise::model::{ExperimentalDesign, NewTreatment, NewTrial, TrialType};
//! use plotwise::TrialStore;
//!
//! let store = TrialStore::new();
//! let trial = store.create_trial(
//!     NewTrial::builder("Seeding rate", TrialType::RateStudy, ExperimentalDesign::RandomizedCompleteBlock, 3, 4)
//!         .year(2024)
//!         .crop_type("wheat")
//!         .build(),
//! )?;
//! for (n, name) in [(1, "90 lb"), (2, "120 lb"), (3, "150 lb")] {
//!     store.add_treatment(trial.trial_id(), NewTreatment::builder(n, name).build(), ChangePolicy::Strict)?;
//! }
//! let report = store.generate_plots(trial.trial_id(), GenerationRequest::default().seed(2024))?;
//! assert_eq!(report.plots_created, 12);
//!
//! // Block 1 plots are numbered 101, 102, 103
//! let plots = store.list_plots(trial.trial_id())?;
//! assert!(plots.iter().any(|p| p.plot_number() == 101));
//! # Ok::<(), plotwise::Error>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod aggregate;
pub mod config;
pub mod design;
pub mod error;
pub mod export;
pub mod ledger;
pub mod model;
pub mod stats;
pub mod store;

pub use config::EngineConfig;
pub use error::{Error, Result};
pub use store::TrialStore;
