//! Trial Store - concurrent in-memory engine facade
//!
//! ## Design
//!
//! Each trial aggregate sits behind its own `Mutex` inside a `DashMap`, so
//! structural mutations of one trial are serialized while unrelated trials
//! proceed in parallel. Measurements live in the per-trial sharded
//! [`MeasurementLedger`]. Lock order is always trial mutex, then ledger
//! shard; recording a measurement validates the plot and appends under the
//! trial mutex, so a concurrent forced regeneration can never leave
//! measurements on plots that no longer exist.
//!
//! Analysis and export snapshot the trial under its mutex and compute after
//! releasing it.
//!
//! ## Example
//!
//! ```rust
//! use chrono::NaiveDate;
//! use plotwise::aggregate::{ChangePolicy, GenerationRequest};
//! use plotwise::model::{
//!     ExperimentalDesign, MeasurementType, NewMeasurement, NewTreatment, NewTrial, TrialType,
//! };
//! use plotwise::store::TrialStore;
//!
//! let store = TrialStore::new();
//! let trial = store.create_trial(
//!     NewTrial::builder("Hybrid plot", TrialType::VarietyTrial, ExperimentalDesign::RandomizedCompleteBlock, 2, 3)
//!         .year(2024)
//!         .crop_type("corn")
//!         .build(),
//! )?;
//! let id = trial.trial_id();
//! store.add_treatment(id, NewTreatment::builder(1, "Check").control().build(), ChangePolicy::Strict)?;
//! store.add_treatment(id, NewTreatment::builder(2, "Hybrid X").build(), ChangePolicy::Strict)?;
//!
//! let report = store.generate_plots(id, GenerationRequest::default().seed(42))?;
//! assert_eq!(report.plots_created, 6);
//!
//! let harvest = NaiveDate::from_ymd_opt(2024, 10, 1).unwrap();
//! for plot in store.list_plots(id)? {
//!     let value = if plot.treatment_id() == store.list_treatments(id)?[0].treatment_id() { 180.0 } else { 200.0 };
//!     let value = value + f64::from(plot.replication());
//!     store.record_measurement(
//!         NewMeasurement::builder(plot.plot_id(), MeasurementType::Yield, value, "bu/ac", harvest).build(),
//!     )?;
//! }
//!
//! let analysis = store.analyze(id, &MeasurementType::Yield)?;
//! assert_eq!(analysis.top_performer.name, "Hybrid X");
//! # Ok::<(), plotwise::Error>(())
//! ```

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rand::Rng;
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

use crate::aggregate::{ChangePolicy, GenerationRequest, TrialAggregate};
use crate::config::EngineConfig;
use crate::export::{ExportOptions, TrialExport};
use crate::ledger::{MeasurementFilter, MeasurementLedger, Observation};
use crate::model::{
    Measurement, MeasurementType, NewMeasurement, NewPlot, NewTreatment, NewTrial, Plot, PlotId, Treatment,
    TreatmentId, TreatmentUpdate, Trial, TrialId, TrialType, TrialUpdate,
};
use crate::stats::{self, AnalysisResult};
use crate::{Error, Result};

type TrialHandle = Arc<Mutex<TrialAggregate>>;

/// Filter for [`TrialStore::list_trials`]. Empty matches every trial.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrialFilter {
    /// Season year.
    pub year: Option<i32>,
    /// Trial type.
    pub trial_type: Option<TrialType>,
    /// Crop, compared case-insensitively.
    pub crop_type: Option<String>,
}

impl TrialFilter {
    /// Only trials of this year.
    #[must_use]
    pub const fn year(mut self, year: i32) -> Self {
        self.year = Some(year);
        self
    }

    /// Only trials of this type.
    #[must_use]
    pub const fn trial_type(mut self, trial_type: TrialType) -> Self {
        self.trial_type = Some(trial_type);
        self
    }

    /// Only trials of this crop.
    #[must_use]
    pub fn crop_type(mut self, crop: impl Into<String>) -> Self {
        self.crop_type = Some(crop.into());
        self
    }

    fn matches(&self, trial: &Trial) -> bool {
        self.year.map_or(true, |y| trial.year() == y)
            && self.trial_type.map_or(true, |t| trial.trial_type() == t)
            && self
                .crop_type
                .as_deref()
                .map_or(true, |c| trial.crop_type().eq_ignore_ascii_case(c))
    }
}

/// What to do with measurements on a plot being deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeletePolicy {
    /// Refuse if the plot has measurements.
    #[default]
    Reject,
    /// Delete the plot and its measurements.
    Cascade,
}

/// Outcome of plot generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationReport {
    /// Trial the plots belong to.
    pub trial_id: TrialId,
    /// Seed of the layout; pass it back to reproduce the layout.
    pub seed: u64,
    /// Plots in the new layout.
    pub plots_created: usize,
    /// Plots of the previous layout that were replaced.
    pub plots_replaced: usize,
    /// Measurements deleted with the replaced plots (forced regeneration).
    pub measurements_removed: usize,
}

/// Outcome of a plot deletion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlotDeletion {
    /// The deleted plot.
    pub plot: Plot,
    /// Measurements deleted with it.
    pub measurements_removed: usize,
}

/// Outcome of a trial deletion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialDeletion {
    /// The deleted trial.
    pub trial: Trial,
    /// Treatments deleted with it.
    pub treatments_removed: usize,
    /// Plots deleted with it.
    pub plots_removed: usize,
    /// Measurements deleted with it.
    pub measurements_removed: usize,
}

/// Concurrent in-memory store of trials and their measurements.
#[derive(Debug, Default)]
pub struct TrialStore {
    config: EngineConfig,
    trials: DashMap<TrialId, TrialHandle>,
    plot_owner: DashMap<PlotId, TrialId>,
    ledger: MeasurementLedger,
}

impl TrialStore {
    /// Create an empty store with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store with `config`.
    #[must_use]
    pub fn with_config(config: EngineConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Engine configuration.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Number of trials.
    #[must_use]
    pub fn trial_count(&self) -> usize {
        self.trials.len()
    }

    /// Whether the store holds no trials.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.trials.is_empty()
    }

    fn handle(&self, trial_id: TrialId) -> Result<TrialHandle> {
        self.trials
            .get(&trial_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| Error::not_found("trial", trial_id))
    }

    /// Run `f` with the trial locked.
    ///
    /// The map guard is released before locking; after locking, the trial
    /// must still be registered under the same handle (it may have been
    /// deleted while we waited).
    fn with_trial<T>(
        &self,
        trial_id: TrialId,
        f: impl FnOnce(&mut TrialAggregate) -> Result<T>,
    ) -> Result<T> {
        let handle = self.handle(trial_id)?;
        let mut guard = handle
            .lock()
            .map_err(|_| Error::LockPoisoned(trial_id.to_string()))?;
        let registered = self
            .trials
            .get(&trial_id)
            .is_some_and(|entry| Arc::ptr_eq(entry.value(), &handle));
        if !registered {
            return Err(Error::not_found("trial", trial_id));
        }
        f(&mut guard)
    }

    // ------------------------------------------------------------------
    // Trials
    // ------------------------------------------------------------------

    /// Create a trial.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] for a malformed payload.
    pub fn create_trial(&self, new: NewTrial) -> Result<Trial> {
        let trial = Trial::create(new)?;
        let id = trial.trial_id();
        self.trials
            .insert(id, Arc::new(Mutex::new(TrialAggregate::new(trial.clone()))));
        info!(
            trial_id = %id,
            name = trial.name(),
            design = %trial.design(),
            "trial created"
        );
        Ok(trial)
    }

    /// Get a trial.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an unknown trial.
    pub fn get_trial(&self, trial_id: TrialId) -> Result<Trial> {
        self.with_trial(trial_id, |agg| Ok(agg.trial().clone()))
    }

    /// Copy of a trial's aggregate (trial, treatments, plots).
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an unknown trial.
    pub fn aggregate(&self, trial_id: TrialId) -> Result<TrialAggregate> {
        self.with_trial(trial_id, |agg| Ok(agg.clone()))
    }

    /// Trials matching `filter`, newest season first, then by name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LockPoisoned`] if a trial lock is poisoned.
    pub fn list_trials(&self, filter: &TrialFilter) -> Result<Vec<Trial>> {
        // Collect handles first so no map guard is held while locking
        let handles: Vec<(TrialId, TrialHandle)> = self
            .trials
            .iter()
            .map(|entry| (*entry.key(), Arc::clone(entry.value())))
            .collect();
        let mut trials = Vec::with_capacity(handles.len());
        for (id, handle) in handles {
            let guard = handle
                .lock()
                .map_err(|_| Error::LockPoisoned(id.to_string()))?;
            if filter.matches(guard.trial()) {
                trials.push(guard.trial().clone());
            }
        }
        trials.sort_by(|a, b| {
            b.year()
                .cmp(&a.year())
                .then_with(|| a.name().cmp(b.name()))
                .then_with(|| a.trial_id().cmp(&b.trial_id()))
        });
        Ok(trials)
    }

    /// Update trial fields.
    ///
    /// # Errors
    ///
    /// - [`Error::NotFound`] for an unknown trial
    /// - [`Error::Validation`] for out-of-range values
    /// - [`Error::Conflict`] for a replication change while plots exist
    pub fn update_trial(&self, trial_id: TrialId, update: TrialUpdate) -> Result<Trial> {
        self.with_trial(trial_id, |agg| agg.update_trial(update).cloned())
    }

    /// Delete a trial with its treatments, plots and measurements.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an unknown trial.
    pub fn delete_trial(&self, trial_id: TrialId) -> Result<TrialDeletion> {
        self.with_trial(trial_id, |agg| {
            self.trials.remove(&trial_id);
            for plot in agg.plots() {
                self.plot_owner.remove(&plot.plot_id());
            }
            let measurements_removed = self.ledger.remove_trial(trial_id);
            info!(
                %trial_id,
                plots = agg.plots().len(),
                measurements_removed,
                "trial deleted"
            );
            Ok(TrialDeletion {
                trial: agg.trial().clone(),
                treatments_removed: agg.treatments().len(),
                plots_removed: agg.plots().len(),
                measurements_removed,
            })
        })
    }

    // ------------------------------------------------------------------
    // Treatments
    // ------------------------------------------------------------------

    /// Add a treatment.
    ///
    /// # Errors
    ///
    /// - [`Error::NotFound`] for an unknown trial
    /// - [`Error::Validation`] for a malformed payload or a full trial
    /// - [`Error::Conflict`] for a duplicate number, or plots exist under
    ///   [`ChangePolicy::Strict`]
    pub fn add_treatment(
        &self,
        trial_id: TrialId,
        new: NewTreatment,
        policy: ChangePolicy,
    ) -> Result<Treatment> {
        self.with_trial(trial_id, |agg| agg.add_treatment(new, policy).cloned())
    }

    /// Update a treatment's attributes.
    ///
    /// # Errors
    ///
    /// - [`Error::NotFound`] for an unknown trial or treatment
    /// - [`Error::Conflict`] if plots exist under [`ChangePolicy::Strict`]
    /// - [`Error::Validation`] for a malformed update
    pub fn update_treatment(
        &self,
        trial_id: TrialId,
        treatment_id: TreatmentId,
        update: TreatmentUpdate,
        policy: ChangePolicy,
    ) -> Result<Treatment> {
        self.with_trial(trial_id, |agg| {
            agg.update_treatment(treatment_id, update, policy).cloned()
        })
    }

    /// Remove a treatment no plot references.
    ///
    /// # Errors
    ///
    /// - [`Error::NotFound`] for an unknown trial or treatment
    /// - [`Error::Conflict`] if plots reference it, or plots exist under
    ///   [`ChangePolicy::Strict`]
    pub fn remove_treatment(
        &self,
        trial_id: TrialId,
        treatment_id: TreatmentId,
        policy: ChangePolicy,
    ) -> Result<Treatment> {
        self.with_trial(trial_id, |agg| agg.remove_treatment(treatment_id, policy))
    }

    /// Treatments of a trial, by number.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an unknown trial.
    pub fn list_treatments(&self, trial_id: TrialId) -> Result<Vec<Treatment>> {
        self.with_trial(trial_id, |agg| Ok(agg.treatments().to_vec()))
    }

    // ------------------------------------------------------------------
    // Plots
    // ------------------------------------------------------------------

    /// Generate (or regenerate) the plot layout.
    ///
    /// The seed is taken from the request, else the configured default,
    /// else drawn fresh; it is recorded either way. Regenerating a trial
    /// that has measurements requires `force`, and deletes them.
    ///
    /// # Errors
    ///
    /// - [`Error::NotFound`] for an unknown trial
    /// - [`Error::Configuration`] for no treatments or bad design parameters
    /// - [`Error::Conflict`] if measurements exist and `force` is not set
    pub fn generate_plots(&self, trial_id: TrialId, request: GenerationRequest) -> Result<GenerationReport> {
        self.with_trial(trial_id, |agg| {
            agg.ensure_generatable()?;
            let recorded = self.ledger.count(trial_id);
            if recorded > 0 && !request.force {
                return Err(Error::Conflict(format!(
                    "trial {trial_id} has {recorded} measurements; regenerating plots would orphan them (force to delete them)"
                )));
            }

            let seed = request
                .seed
                .or(self.config.default_seed)
                .unwrap_or_else(|| rand::thread_rng().gen());
            let mut params = request.params;
            if params.plot_number_base.is_none() {
                params.plot_number_base = self.config.plot_number_base;
            }

            let replaced = agg.regenerate(&params, seed)?;
            let replaced_ids: FxHashSet<PlotId> = replaced.iter().map(Plot::plot_id).collect();
            let measurements_removed = self.ledger.remove_plots(trial_id, &replaced_ids);
            if measurements_removed > 0 {
                warn!(
                    %trial_id,
                    measurements_removed,
                    "forced regeneration deleted measurements on replaced plots"
                );
            }
            for id in &replaced_ids {
                self.plot_owner.remove(id);
            }
            for plot in agg.plots() {
                self.plot_owner.insert(plot.plot_id(), trial_id);
            }

            Ok(GenerationReport {
                trial_id,
                seed,
                plots_created: agg.plots().len(),
                plots_replaced: replaced.len(),
                measurements_removed,
            })
        })
    }

    /// Plots of a trial in layout order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an unknown trial.
    pub fn list_plots(&self, trial_id: TrialId) -> Result<Vec<Plot>> {
        self.with_trial(trial_id, |agg| Ok(agg.plots().to_vec()))
    }

    /// Add a plot laid out by hand (on-farm strips, or a plot re-entered
    /// after deletion).
    ///
    /// # Errors
    ///
    /// - [`Error::NotFound`] for an unknown trial
    /// - [`Error::Validation`] for a bad coordinate or a treatment of another
    ///   trial
    /// - [`Error::Conflict`] for a taken plot number or (treatment,
    ///   replication) pair
    pub fn add_plot(&self, trial_id: TrialId, new: NewPlot) -> Result<Plot> {
        self.with_trial(trial_id, |agg| {
            let plot = agg.add_plot(new)?.clone();
            self.plot_owner.insert(plot.plot_id(), trial_id);
            Ok(plot)
        })
    }

    /// Delete one plot.
    ///
    /// # Errors
    ///
    /// - [`Error::NotFound`] for an unknown plot
    /// - [`Error::Conflict`] if it has measurements under
    ///   [`DeletePolicy::Reject`]
    pub fn delete_plot(&self, plot_id: PlotId, policy: DeletePolicy) -> Result<PlotDeletion> {
        let trial_id = self.owner_of(plot_id)?;
        self.with_trial(trial_id, |agg| {
            let recorded = self.ledger.count_for_plot(trial_id, plot_id);
            if recorded > 0 && policy == DeletePolicy::Reject {
                return Err(Error::Conflict(format!(
                    "plot {plot_id} has {recorded} measurements; delete with cascade to remove them"
                )));
            }
            let plot = agg.remove_plot(plot_id)?;
            let measurements_removed = if recorded > 0 {
                let ids: FxHashSet<PlotId> = std::iter::once(plot_id).collect();
                self.ledger.remove_plots(trial_id, &ids)
            } else {
                0
            };
            self.plot_owner.remove(&plot_id);
            info!(%trial_id, %plot_id, measurements_removed, "plot deleted");
            Ok(PlotDeletion {
                plot,
                measurements_removed,
            })
        })
    }

    fn owner_of(&self, plot_id: PlotId) -> Result<TrialId> {
        self.plot_owner
            .get(&plot_id)
            .map(|entry| *entry.value())
            .ok_or_else(|| Error::not_found("plot", plot_id))
    }

    // ------------------------------------------------------------------
    // Measurements
    // ------------------------------------------------------------------

    /// Record a reading on a plot.
    ///
    /// # Errors
    ///
    /// - [`Error::Validation`] for a non-finite value, blank unit or blank
    ///   custom type name
    /// - [`Error::NotFound`] for an unknown plot
    pub fn record_measurement(&self, new: NewMeasurement) -> Result<Measurement> {
        new.validate()?;
        let trial_id = self.owner_of(new.plot_id)?;
        self.with_trial(trial_id, |agg| self.ledger.record(agg, new))
    }

    /// Measurements of a trial matching `filter`, by field date.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an unknown trial.
    pub fn list_measurements(&self, trial_id: TrialId, filter: &MeasurementFilter) -> Result<Vec<Measurement>> {
        self.with_trial(trial_id, |_| Ok(self.ledger.list(trial_id, filter)))
    }

    /// Observations of one measurement type resolved to treatments.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an unknown trial.
    pub fn query(&self, trial_id: TrialId, measurement_type: &MeasurementType) -> Result<Vec<Observation>> {
        self.with_trial(trial_id, |agg| Ok(self.ledger.query(agg, measurement_type)))
    }

    /// Measurement types recorded for a trial.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an unknown trial.
    pub fn measurement_types(&self, trial_id: TrialId) -> Result<Vec<MeasurementType>> {
        self.with_trial(trial_id, |_| Ok(self.ledger.measurement_types(trial_id)))
    }

    // ------------------------------------------------------------------
    // Analysis and snapshots
    // ------------------------------------------------------------------

    /// Analyze one measurement type.
    ///
    /// # Errors
    ///
    /// - [`Error::NotFound`] for an unknown trial
    /// - [`Error::InsufficientData`] when inference is impossible
    pub fn analyze(&self, trial_id: TrialId, measurement_type: &MeasurementType) -> Result<AnalysisResult> {
        let (snapshot, observations) = self.with_trial(trial_id, |agg| {
            Ok((agg.clone(), self.ledger.query(agg, measurement_type)))
        })?;
        stats::analyze(
            &snapshot,
            measurement_type,
            &observations,
            &self.config.analysis(),
        )
    }

    /// Export a trial as a self-contained snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an unknown trial.
    pub fn export(&self, trial_id: TrialId, options: ExportOptions) -> Result<TrialExport> {
        let (snapshot, measurements) = self.with_trial(trial_id, |agg| {
            Ok((
                agg.clone(),
                self.ledger.list(trial_id, &MeasurementFilter::default()),
            ))
        })?;
        Ok(TrialExport::assemble(
            &snapshot,
            measurements,
            options,
            &self.config.analysis(),
        ))
    }

    /// Restore an exported trial.
    ///
    /// # Errors
    ///
    /// - [`Error::Validation`] or [`Error::NotFound`] for an inconsistent
    ///   snapshot
    /// - [`Error::Conflict`] if the trial or one of its plots already exists
    pub fn import(&self, export: TrialExport) -> Result<TrialId> {
        let (parts, measurements) = export.into_parts();
        let agg = TrialAggregate::restore(parts)?;
        let trial_id = agg.trial_id();
        if let Some(plot) = agg
            .plots()
            .iter()
            .find(|p| self.plot_owner.contains_key(&p.plot_id()))
        {
            return Err(Error::Conflict(format!(
                "plot {} of trial {trial_id} already exists in this store",
                plot.plot_id()
            )));
        }

        match self.trials.entry(trial_id) {
            Entry::Occupied(_) => Err(Error::Conflict(format!(
                "trial {trial_id} already exists in this store"
            ))),
            Entry::Vacant(slot) => {
                let count = measurements.len();
                self.ledger.restore(&agg, measurements)?;
                for plot in agg.plots() {
                    self.plot_owner.insert(plot.plot_id(), trial_id);
                }
                info!(
                    %trial_id,
                    plots = agg.plots().len(),
                    measurements = count,
                    "trial imported"
                );
                slot.insert(Arc::new(Mutex::new(agg)));
                Ok(trial_id)
            }
        }
    }
}
