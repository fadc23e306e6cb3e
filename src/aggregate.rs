//! Trial aggregate: one trial with its treatments, plots and randomization
//!
//! The aggregate owns treatments and plots in plain vectors and resolves
//! cross references through ID indexes (arena + index), so regeneration and
//! cascade deletes never chase back-pointers.
//!
//! ## Invariants
//!
//! - `treatment_number` is unique and positive; treatments are kept sorted by it
//! - the treatment count never exceeds the trial's declared `num_treatments`
//! - every plot references a treatment of this trial
//! - no (treatment, replication) pair appears on two plots; replications lie
//!   in `1..=num_replications`; plot numbers are unique
//! - treatments cannot be added, changed or removed once plots exist unless
//!   the caller passes [`ChangePolicy::AcknowledgeStaleLayout`], which marks
//!   the layout stale until the next regeneration

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{info, warn};

use crate::design::{generate_plots, DesignParams};
use crate::model::{
    ExperimentalDesign, NewPlot, NewTreatment, Plot, PlotId, Treatment, TreatmentId, TreatmentUpdate,
    Trial, TrialId, TrialUpdate,
};
use crate::{Error, Result};

/// How to treat a treatment mutation on a trial that already has plots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangePolicy {
    /// Reject with a conflict error.
    #[default]
    Strict,
    /// Proceed and mark the layout stale until plots are regenerated.
    AcknowledgeStaleLayout,
}

/// Record of the randomization that produced the current plots.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RandomizationRecord {
    /// Design family used.
    pub design: ExperimentalDesign,
    /// Seed of the `StdRng` that drove the layout.
    pub seed: u64,
    /// Parameters the layout was generated with.
    pub params: DesignParams,
    /// Number of plots generated.
    pub plot_count: usize,
    /// When the layout was generated.
    pub generated_at: DateTime<Utc>,
}

/// Plot generation request.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GenerationRequest {
    /// Design parameters (factor structure, plot numbering).
    pub params: DesignParams,
    /// Layout seed; `None` falls back to the configured or an entropy seed.
    pub seed: Option<u64>,
    /// Regenerate even when measurements exist, deleting them.
    pub force: bool,
}

impl GenerationRequest {
    /// Request with the given design parameters.
    #[must_use]
    pub fn with_params(params: DesignParams) -> Self {
        Self {
            params,
            ..Self::default()
        }
    }

    /// Fix the layout seed.
    #[must_use]
    pub const fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Allow destructive regeneration.
    #[must_use]
    pub const fn force(mut self) -> Self {
        self.force = true;
        self
    }
}

/// Owned pieces of an aggregate, as carried by an export snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AggregateParts {
    /// The trial.
    pub trial: Trial,
    /// Its treatments.
    pub treatments: Vec<Treatment>,
    /// Its plots.
    pub plots: Vec<Plot>,
    /// Randomization that produced the plots.
    pub randomization: Option<RandomizationRecord>,
    /// Treatments changed after the plots were laid out.
    #[serde(default)]
    pub stale_layout: bool,
}

/// A trial and everything it owns.
#[derive(Debug, Clone)]
pub struct TrialAggregate {
    trial: Trial,
    treatments: Vec<Treatment>,
    plots: Vec<Plot>,
    treatment_index: FxHashMap<TreatmentId, usize>,
    plot_index: FxHashMap<PlotId, usize>,
    randomization: Option<RandomizationRecord>,
    stale_layout: bool,
}

impl TrialAggregate {
    /// Create an aggregate for a freshly created trial.
    #[must_use]
    pub fn new(trial: Trial) -> Self {
        Self {
            trial,
            treatments: Vec::new(),
            plots: Vec::new(),
            treatment_index: FxHashMap::default(),
            plot_index: FxHashMap::default(),
            randomization: None,
            stale_layout: false,
        }
    }

    /// Rebuild an aggregate from owned parts, checking every invariant.
    ///
    /// Plot order and plot-to-treatment assignment are preserved exactly.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] describing the first violated invariant.
    pub fn restore(parts: AggregateParts) -> Result<Self> {
        let AggregateParts {
            trial,
            mut treatments,
            plots,
            randomization,
            stale_layout,
        } = parts;
        trial.check_invariants()?;
        let trial_id = trial.trial_id();

        if treatments.len() > trial.num_treatments() as usize {
            return Err(Error::Validation(format!(
                "snapshot has {} treatments but trial {trial_id} declares {}",
                treatments.len(),
                trial.num_treatments()
            )));
        }
        let mut numbers = FxHashSet::default();
        for t in &treatments {
            if t.trial_id() != trial_id {
                return Err(Error::Validation(format!(
                    "treatment {} belongs to trial {}, not {trial_id}",
                    t.treatment_id(),
                    t.trial_id()
                )));
            }
            if t.treatment_number() == 0 || !numbers.insert(t.treatment_number()) {
                return Err(Error::Validation(format!(
                    "treatment number {} is zero or duplicated in trial {trial_id}",
                    t.treatment_number()
                )));
            }
        }
        treatments.sort_by_key(Treatment::treatment_number);

        let mut agg = Self::new(trial);
        agg.treatments = treatments;
        agg.reindex_treatments();
        if agg.treatment_index.len() != agg.treatments.len() {
            return Err(Error::Validation(format!(
                "duplicate treatment id in trial {trial_id}"
            )));
        }
        agg.check_plots(&plots)?;
        agg.plots = plots;
        agg.reindex_plots();
        agg.randomization = randomization;
        agg.stale_layout = stale_layout && agg.has_plots();
        Ok(agg)
    }

    /// Split into owned parts (for export or persistence).
    #[must_use]
    pub fn to_parts(&self) -> AggregateParts {
        AggregateParts {
            trial: self.trial.clone(),
            treatments: self.treatments.clone(),
            plots: self.plots.clone(),
            randomization: self.randomization.clone(),
            stale_layout: self.stale_layout,
        }
    }

    /// Get the trial.
    #[must_use]
    pub const fn trial(&self) -> &Trial {
        &self.trial
    }

    /// Get the trial ID.
    #[must_use]
    pub const fn trial_id(&self) -> TrialId {
        self.trial.trial_id()
    }

    /// Treatments sorted by treatment number.
    #[must_use]
    pub fn treatments(&self) -> &[Treatment] {
        &self.treatments
    }

    /// Plots in presentation order (block, treatment, position).
    #[must_use]
    pub fn plots(&self) -> &[Plot] {
        &self.plots
    }

    /// Look up a treatment by ID.
    #[must_use]
    pub fn treatment(&self, treatment_id: TreatmentId) -> Option<&Treatment> {
        self.treatment_index
            .get(&treatment_id)
            .map(|&i| &self.treatments[i])
    }

    /// Look up a treatment by its number.
    #[must_use]
    pub fn treatment_by_number(&self, treatment_number: u32) -> Option<&Treatment> {
        self.treatments
            .binary_search_by_key(&treatment_number, Treatment::treatment_number)
            .ok()
            .map(|i| &self.treatments[i])
    }

    /// Treatments keyed by number.
    #[must_use]
    pub fn treatments_by_number(&self) -> BTreeMap<u32, &Treatment> {
        self.treatments
            .iter()
            .map(|t| (t.treatment_number(), t))
            .collect()
    }

    /// Look up a plot by ID.
    #[must_use]
    pub fn plot(&self, plot_id: PlotId) -> Option<&Plot> {
        self.plot_index.get(&plot_id).map(|&i| &self.plots[i])
    }

    /// Look up a plot by its number.
    #[must_use]
    pub fn plot_by_number(&self, plot_number: u32) -> Option<&Plot> {
        self.plots.iter().find(|p| p.plot_number() == plot_number)
    }

    /// Plots assigned to one treatment.
    #[must_use]
    pub fn plots_for_treatment(&self, treatment_id: TreatmentId) -> Vec<&Plot> {
        self.plots
            .iter()
            .filter(|p| p.treatment_id() == treatment_id)
            .collect()
    }

    /// Plots grouped by treatment ID.
    #[must_use]
    pub fn plots_by_treatment(&self) -> FxHashMap<TreatmentId, Vec<&Plot>> {
        let mut grouped: FxHashMap<TreatmentId, Vec<&Plot>> = FxHashMap::default();
        for plot in &self.plots {
            grouped.entry(plot.treatment_id()).or_default().push(plot);
        }
        grouped
    }

    /// Treatment assigned to a plot.
    #[must_use]
    pub fn treatment_of_plot(&self, plot_id: PlotId) -> Option<&Treatment> {
        self.plot(plot_id).and_then(|p| self.treatment(p.treatment_id()))
    }

    /// Comparison baseline: the lowest-numbered control, else the
    /// lowest-numbered treatment.
    #[must_use]
    pub fn baseline_treatment(&self) -> Option<&Treatment> {
        self.treatments
            .iter()
            .find(|t| t.is_control())
            .or_else(|| self.treatments.first())
    }

    /// Whether plots have been generated.
    #[must_use]
    pub fn has_plots(&self) -> bool {
        !self.plots.is_empty()
    }

    /// Whether the plots no longer reflect the treatments: a change was
    /// acknowledged after generation, or some treatment has no plot.
    #[must_use]
    pub fn layout_stale(&self) -> bool {
        if self.plots.is_empty() {
            return false;
        }
        if self.stale_layout {
            return true;
        }
        let plotted: FxHashSet<TreatmentId> = self.plots.iter().map(Plot::treatment_id).collect();
        self.treatments
            .iter()
            .any(|t| !plotted.contains(&t.treatment_id()))
    }

    /// Randomization that produced the current plots, if any.
    #[must_use]
    pub const fn randomization(&self) -> Option<&RandomizationRecord> {
        self.randomization.as_ref()
    }

    /// Update trial fields.
    ///
    /// # Errors
    ///
    /// - [`Error::Validation`] for non-positive counts, or a declared
    ///   treatment count below the treatments already added
    /// - [`Error::Conflict`] for a replication change while plots exist
    pub fn update_trial(&mut self, update: TrialUpdate) -> Result<&Trial> {
        if let Some(n) = update.num_treatments {
            if (n as usize) < self.treatments.len() {
                return Err(Error::Validation(format!(
                    "trial {} already has {} treatments; num_treatments cannot drop to {n}",
                    self.trial_id(),
                    self.treatments.len()
                )));
            }
        }
        if let Some(r) = update.num_replications {
            if r != self.trial.num_replications() && self.has_plots() {
                return Err(Error::Conflict(format!(
                    "trial {} has {} plots; regenerate plots after changing replications, not before",
                    self.trial_id(),
                    self.plots.len()
                )));
            }
        }
        self.trial.apply(update)?;
        Ok(&self.trial)
    }

    /// Add a treatment.
    ///
    /// # Errors
    ///
    /// - [`Error::Validation`] for a malformed payload or when the declared
    ///   treatment count is already reached
    /// - [`Error::Conflict`] for a duplicate number, or plots exist under
    ///   [`ChangePolicy::Strict`]
    pub fn add_treatment(&mut self, new: NewTreatment, policy: ChangePolicy) -> Result<&Treatment> {
        new.validate()?;
        if self.treatment_by_number(new.treatment_number).is_some() {
            return Err(Error::Conflict(format!(
                "treatment number {} already exists in trial {}",
                new.treatment_number,
                self.trial_id()
            )));
        }
        if self.treatments.len() >= self.trial.num_treatments() as usize {
            return Err(Error::Validation(format!(
                "trial {} declares {} treatments and all are defined",
                self.trial_id(),
                self.trial.num_treatments()
            )));
        }
        let acknowledged = self.guard_structural_change("add a treatment to", policy)?;

        let treatment = Treatment::create(self.trial_id(), new)?;
        let id = treatment.treatment_id();
        let at = self
            .treatments
            .partition_point(|t| t.treatment_number() < treatment.treatment_number());
        self.treatments.insert(at, treatment);
        self.reindex_treatments();
        self.stale_layout |= acknowledged;
        self.trial.touch();
        info!(trial_id = %self.trial_id(), treatment_id = %id, "treatment added");
        Ok(&self.treatments[at])
    }

    /// Update a treatment's descriptive attributes.
    ///
    /// # Errors
    ///
    /// - [`Error::NotFound`] for an unknown treatment
    /// - [`Error::Conflict`] if plots exist under [`ChangePolicy::Strict`]
    /// - [`Error::Validation`] for a malformed update
    pub fn update_treatment(
        &mut self,
        treatment_id: TreatmentId,
        update: TreatmentUpdate,
        policy: ChangePolicy,
    ) -> Result<&Treatment> {
        let &i = self
            .treatment_index
            .get(&treatment_id)
            .ok_or_else(|| Error::not_found("treatment", treatment_id))?;
        let acknowledged = self.guard_structural_change("modify a treatment of", policy)?;
        self.treatments[i].apply(update)?;
        self.stale_layout |= acknowledged;
        self.trial.touch();
        Ok(&self.treatments[i])
    }

    /// Remove a treatment that no plot references.
    ///
    /// # Errors
    ///
    /// - [`Error::NotFound`] for an unknown treatment
    /// - [`Error::Conflict`] if any plot references it, or plots exist under
    ///   [`ChangePolicy::Strict`]
    pub fn remove_treatment(
        &mut self,
        treatment_id: TreatmentId,
        policy: ChangePolicy,
    ) -> Result<Treatment> {
        let &i = self
            .treatment_index
            .get(&treatment_id)
            .ok_or_else(|| Error::not_found("treatment", treatment_id))?;
        let referencing = self
            .plots
            .iter()
            .filter(|p| p.treatment_id() == treatment_id)
            .count();
        if referencing > 0 {
            return Err(Error::Conflict(format!(
                "treatment {treatment_id} is assigned to {referencing} plots in trial {}; regenerate plots first",
                self.trial_id()
            )));
        }
        let acknowledged = self.guard_structural_change("remove a treatment from", policy)?;
        let removed = self.treatments.remove(i);
        self.reindex_treatments();
        self.stale_layout |= acknowledged;
        self.trial.touch();
        info!(trial_id = %self.trial_id(), %treatment_id, "treatment removed");
        Ok(removed)
    }

    /// Check that plots can be generated now.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the trial has no treatments.
    pub fn ensure_generatable(&self) -> Result<()> {
        if self.treatments.is_empty() {
            return Err(Error::Configuration(format!(
                "trial {} has no treatments; add at least one before generating plots",
                self.trial_id()
            )));
        }
        Ok(())
    }

    /// Generate a fresh layout from `seed` and replace the current plots.
    ///
    /// Nothing changes unless generation succeeds. Returns the replaced plots.
    ///
    /// # Errors
    ///
    /// Propagates [`generate_plots`] errors.
    pub fn regenerate(&mut self, params: &DesignParams, seed: u64) -> Result<Vec<Plot>> {
        self.ensure_generatable()?;
        let mut rng = StdRng::seed_from_u64(seed);
        let plots = generate_plots(&self.trial, &self.treatments, params, &mut rng)?;
        let record = RandomizationRecord {
            design: self.trial.design(),
            seed,
            params: params.clone(),
            plot_count: plots.len(),
            generated_at: Utc::now(),
        };
        let replaced = std::mem::replace(&mut self.plots, plots);
        self.reindex_plots();
        self.randomization = Some(record);
        self.stale_layout = false;
        self.trial.touch();
        info!(
            trial_id = %self.trial_id(),
            design = %self.trial.design(),
            seed,
            plots = self.plots.len(),
            replaced = replaced.len(),
            "plots generated"
        );
        Ok(replaced)
    }

    /// Remove one plot. Measurement handling is the caller's concern.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an unknown plot.
    pub fn remove_plot(&mut self, plot_id: PlotId) -> Result<Plot> {
        let &i = self
            .plot_index
            .get(&plot_id)
            .ok_or_else(|| Error::not_found("plot", plot_id))?;
        let removed = self.plots.remove(i);
        self.reindex_plots();
        self.trial.touch();
        Ok(removed)
    }

    /// Add a plot laid out by hand.
    ///
    /// The plot keeps presentation order (block, treatment number,
    /// position). The current randomization record is left as is.
    ///
    /// # Errors
    ///
    /// - [`Error::Validation`] for a zero coordinate, a replication outside
    ///   `1..=num_replications`, or a treatment of another trial
    /// - [`Error::Conflict`] for a taken plot number or a treatment already
    ///   plotted in that replication
    pub fn add_plot(&mut self, new: NewPlot) -> Result<&Plot> {
        let trial_id = self.trial_id();
        let treatment_number = self
            .treatment(new.treatment_id)
            .map(Treatment::treatment_number)
            .ok_or_else(|| {
                Error::Validation(format!(
                    "treatment {} does not belong to trial {trial_id}",
                    new.treatment_id
                ))
            })?;
        let reps = self.trial.num_replications();
        if !(1..=reps).contains(&new.replication) {
            return Err(Error::Validation(format!(
                "replication {} outside 1..={reps} for trial {trial_id}",
                new.replication
            )));
        }
        if self.plot_by_number(new.plot_number).is_some() {
            return Err(Error::Conflict(format!(
                "plot number {} already exists in trial {trial_id}",
                new.plot_number
            )));
        }
        if self
            .plots
            .iter()
            .any(|p| p.treatment_id() == new.treatment_id && p.replication() == new.replication)
        {
            return Err(Error::Conflict(format!(
                "treatment {treatment_number} already has a plot in replication {}",
                new.replication
            )));
        }

        let plot = Plot::manual(trial_id, new, self.trial.design().is_blocked())?;
        let key = |p: &Plot, number: u32| (p.block().unwrap_or(0), number, p.position());
        let wanted = key(&plot, treatment_number);
        let at = self.plots.partition_point(|p| {
            let number = self.treatment(p.treatment_id()).map_or(0, Treatment::treatment_number);
            key(p, number) < wanted
        });
        let plot_id = plot.plot_id();
        self.plots.insert(at, plot);
        self.reindex_plots();
        self.trial.touch();
        info!(%trial_id, %plot_id, treatment_number, "plot added");
        Ok(&self.plots[at])
    }

    /// `Ok(true)` when plots exist and the change was acknowledged.
    fn guard_structural_change(&self, action: &str, policy: ChangePolicy) -> Result<bool> {
        if !self.has_plots() {
            return Ok(false);
        }
        match policy {
            ChangePolicy::Strict => Err(Error::Conflict(format!(
                "cannot {action} trial {} after {} plots were generated; acknowledge the stale layout or regenerate plots",
                self.trial_id(),
                self.plots.len()
            ))),
            ChangePolicy::AcknowledgeStaleLayout => {
                warn!(
                    trial_id = %self.trial_id(),
                    plots = self.plots.len(),
                    "treatment change acknowledged; plot layout is stale until regenerated"
                );
                Ok(true)
            }
        }
    }

    fn check_plots(&self, plots: &[Plot]) -> Result<()> {
        let trial_id = self.trial_id();
        let reps = self.trial.num_replications();
        let mut ids = FxHashSet::default();
        let mut numbers = FxHashSet::default();
        let mut pairs = FxHashSet::default();
        for plot in plots {
            if plot.trial_id() != trial_id {
                return Err(Error::Validation(format!(
                    "plot {} belongs to trial {}, not {trial_id}",
                    plot.plot_id(),
                    plot.trial_id()
                )));
            }
            if self.treatment(plot.treatment_id()).is_none() {
                return Err(Error::Validation(format!(
                    "plot {} references unknown treatment {}",
                    plot.plot_id(),
                    plot.treatment_id()
                )));
            }
            if !(1..=reps).contains(&plot.replication()) {
                return Err(Error::Validation(format!(
                    "plot {} replication {} outside 1..={reps}",
                    plot.plot_id(),
                    plot.replication()
                )));
            }
            if !ids.insert(plot.plot_id()) {
                return Err(Error::Validation(format!("duplicate plot id {}", plot.plot_id())));
            }
            if !numbers.insert(plot.plot_number()) {
                return Err(Error::Validation(format!(
                    "duplicate plot number {} in trial {trial_id}",
                    plot.plot_number()
                )));
            }
            if !pairs.insert((plot.treatment_id(), plot.replication())) {
                return Err(Error::Validation(format!(
                    "treatment {} appears twice in replication {}",
                    plot.treatment_id(),
                    plot.replication()
                )));
            }
        }
        Ok(())
    }

    fn reindex_treatments(&mut self) {
        self.treatment_index = self
            .treatments
            .iter()
            .enumerate()
            .map(|(i, t)| (t.treatment_id(), i))
            .collect();
    }

    fn reindex_plots(&mut self) {
        self.plot_index = self
            .plots
            .iter()
            .enumerate()
            .map(|(i, p)| (p.plot_id(), i))
            .collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{NewTrial, TrialType};

    fn rcbd(t: u32, r: u32) -> TrialAggregate {
        let new = NewTrial::builder(
            "Hybrid trial",
            TrialType::VarietyTrial,
            ExperimentalDesign::RandomizedCompleteBlock,
            t,
            r,
        )
        .year(2024)
        .crop_type("corn")
        .build();
        TrialAggregate::new(Trial::create(new).unwrap())
    }

    fn with_treatments(t: u32, r: u32) -> TrialAggregate {
        let mut agg = rcbd(t, r);
        for n in 1..=t {
            agg.add_treatment(NewTreatment::builder(n, format!("H{n}")).build(), ChangePolicy::Strict)
                .unwrap();
        }
        agg
    }

    #[test]
    fn test_treatments_kept_sorted() {
        let mut agg = rcbd(3, 2);
        for n in [3, 1, 2] {
            agg.add_treatment(NewTreatment::builder(n, format!("T{n}")).build(), ChangePolicy::Strict)
                .unwrap();
        }
        let numbers: Vec<u32> = agg.treatments().iter().map(Treatment::treatment_number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
        assert_eq!(agg.treatment_by_number(2).unwrap().name(), "T2");
    }

    #[test]
    fn test_duplicate_treatment_number_conflicts() {
        let mut agg = rcbd(3, 2);
        agg.add_treatment(NewTreatment::builder(1, "A").build(), ChangePolicy::Strict)
            .unwrap();
        let err = agg
            .add_treatment(NewTreatment::builder(1, "B").build(), ChangePolicy::Strict)
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[test]
    fn test_declared_treatment_count_is_a_ceiling() {
        let mut agg = with_treatments(2, 2);
        let err = agg
            .add_treatment(NewTreatment::builder(3, "C").build(), ChangePolicy::Strict)
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_generation_requires_treatments() {
        let mut agg = rcbd(3, 2);
        let err = agg.regenerate(&DesignParams::default(), 1).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
        assert!(!agg.has_plots());
    }

    #[test]
    fn test_treatment_change_after_plots_needs_acknowledgement() {
        let mut agg = with_treatments(3, 2);
        agg.update_trial(TrialUpdate {
            num_treatments: Some(4),
            ..TrialUpdate::default()
        })
        .unwrap();
        agg.regenerate(&DesignParams::default(), 5).unwrap();

        let err = agg
            .add_treatment(NewTreatment::builder(4, "D").build(), ChangePolicy::Strict)
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
        assert!(!agg.layout_stale());

        agg.add_treatment(
            NewTreatment::builder(4, "D").build(),
            ChangePolicy::AcknowledgeStaleLayout,
        )
        .unwrap();
        assert!(agg.layout_stale());

        agg.regenerate(&DesignParams::default(), 6).unwrap();
        assert!(!agg.layout_stale());
        assert_eq!(agg.plots().len(), 8);
    }

    #[test]
    fn test_acknowledged_update_marks_layout_stale() {
        let mut agg = with_treatments(2, 2);
        agg.regenerate(&DesignParams::default(), 5).unwrap();
        let id = agg.treatments()[0].treatment_id();
        let update = TreatmentUpdate {
            rate: Some(99.0),
            ..TreatmentUpdate::default()
        };
        agg.update_treatment(id, update, ChangePolicy::AcknowledgeStaleLayout)
            .unwrap();
        assert!(agg.layout_stale());

        let restored = TrialAggregate::restore(agg.to_parts()).unwrap();
        assert!(restored.layout_stale());

        agg.regenerate(&DesignParams::default(), 6).unwrap();
        assert!(!agg.layout_stale());
    }

    #[test]
    fn test_rejected_update_leaves_layout_fresh() {
        let mut agg = with_treatments(2, 2);
        agg.regenerate(&DesignParams::default(), 5).unwrap();
        let id = agg.treatments()[0].treatment_id();
        let err = agg
            .update_treatment(id, TreatmentUpdate::default(), ChangePolicy::Strict)
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
        assert!(!agg.layout_stale());
    }

    #[test]
    fn test_add_plot_validates_and_keeps_order() {
        let mut agg = with_treatments(2, 2);
        let first = agg.treatments()[0].treatment_id();
        let second = agg.treatments()[1].treatment_id();

        agg.add_plot(NewPlot::new(second, 102, 1)).unwrap();
        agg.add_plot(NewPlot::new(first, 101, 1)).unwrap();
        let numbers: Vec<u32> = agg.plots().iter().map(Plot::plot_number).collect();
        assert_eq!(numbers, vec![101, 102]);
        assert_eq!(agg.plot_by_number(101).unwrap().block(), Some(1));

        let err = agg.add_plot(NewPlot::new(first, 101, 2)).unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
        let err = agg.add_plot(NewPlot::new(first, 105, 1)).unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
        let err = agg.add_plot(NewPlot::new(first, 301, 3)).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        let err = agg.add_plot(NewPlot::new(TreatmentId::new(), 201, 2)).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(agg.plots().len(), 2);
    }

    #[test]
    fn test_remove_plotted_treatment_conflicts() {
        let mut agg = with_treatments(2, 2);
        agg.regenerate(&DesignParams::default(), 5).unwrap();
        let id = agg.treatments()[0].treatment_id();
        let err = agg
            .remove_treatment(id, ChangePolicy::AcknowledgeStaleLayout)
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[test]
    fn test_replication_change_with_plots_conflicts() {
        let mut agg = with_treatments(2, 2);
        agg.regenerate(&DesignParams::default(), 5).unwrap();
        let err = agg
            .update_trial(TrialUpdate {
                num_replications: Some(3),
                ..TrialUpdate::default()
            })
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[test]
    fn test_baseline_prefers_control() {
        let mut agg = rcbd(3, 2);
        agg.add_treatment(NewTreatment::builder(2, "Check").control().build(), ChangePolicy::Strict)
            .unwrap();
        agg.add_treatment(NewTreatment::builder(1, "Product").build(), ChangePolicy::Strict)
            .unwrap();
        assert_eq!(agg.baseline_treatment().unwrap().name(), "Check");
    }

    #[test]
    fn test_baseline_defaults_to_lowest_number() {
        let mut agg = rcbd(3, 2);
        agg.add_treatment(NewTreatment::builder(7, "Late").build(), ChangePolicy::Strict)
            .unwrap();
        agg.add_treatment(NewTreatment::builder(3, "Early").build(), ChangePolicy::Strict)
            .unwrap();
        assert_eq!(agg.baseline_treatment().unwrap().treatment_number(), 3);
    }

    #[test]
    fn test_restore_roundtrip_preserves_assignment() {
        let mut agg = with_treatments(4, 3);
        agg.regenerate(&DesignParams::default(), 77).unwrap();
        let restored = TrialAggregate::restore(agg.to_parts()).unwrap();
        assert_eq!(restored.plots(), agg.plots());
        for plot in restored.plots() {
            assert_eq!(
                restored.treatment_of_plot(plot.plot_id()).unwrap().treatment_number(),
                agg.treatment_of_plot(plot.plot_id()).unwrap().treatment_number()
            );
        }
    }

    #[test]
    fn test_restore_rejects_duplicate_pairs() {
        let mut agg = with_treatments(2, 2);
        agg.regenerate(&DesignParams::default(), 3).unwrap();
        let mut parts = agg.to_parts();
        let dup = parts.plots[0].clone();
        parts.plots.push(dup);
        assert!(TrialAggregate::restore(parts).is_err());
    }

    #[test]
    fn test_plots_by_treatment_counts() {
        let mut agg = with_treatments(5, 4);
        agg.regenerate(&DesignParams::default(), 9).unwrap();
        let grouped = agg.plots_by_treatment();
        assert_eq!(grouped.len(), 5);
        assert!(grouped.values().all(|plots| plots.len() == 4));
    }
}
