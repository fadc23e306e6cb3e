//! Design generator: plot layouts for the five design families
//!
//! Each family is a [`LayoutStrategy`] selected by the trial's
//! [`ExperimentalDesign`] tag. A strategy only decides *where* each
//! (treatment, replication) pair goes; [`generate_plots`] validates the
//! request, numbers the plots and fixes the presentation order.
//!
//! Randomness is always injected. Passing a seeded `StdRng` reproduces a
//! layout exactly:
//!
//! ```rust
//! use plotwise::design::{generate_plots, DesignParams};
//! use plotwise::model::{ExperimentalDesign, NewTrial, Trial, TrialType};
//! use plotwise::aggregate::TrialAggregate;
//! use plotwise::model::NewTreatment;
//! use rand::{rngs::StdRng, SeedableRng};
//!
//! # fn main() -> plotwise::Result<()> {
//! let new = NewTrial::builder("N rates", TrialType::RateStudy,
//!     ExperimentalDesign::RandomizedCompleteBlock, 3, 4).year(2024).build();
//! let mut agg = TrialAggregate::new(Trial::create(new)?);
//! for n in 1..=3 {
//!     agg.add_treatment(NewTreatment::builder(n, format!("{} lb N", n * 60)).build(),
//!         Default::default())?;
//! }
//! let a = generate_plots(agg.trial(), agg.treatments(), &DesignParams::default(),
//!     &mut StdRng::seed_from_u64(7))?;
//! let b = generate_plots(agg.trial(), agg.treatments(), &DesignParams::default(),
//!     &mut StdRng::seed_from_u64(7))?;
//! assert_eq!(a.len(), 12);
//! assert!(a.iter().zip(&b).all(|(x, y)| x.treatment_id() == y.treatment_id()
//!     && x.plot_number() == y.plot_number()));
//! # Ok(())
//! # }
//! ```

mod crd;
mod factorial;
mod rcbd;
mod split_plot;
mod strip_plot;

pub use crd::CompletelyRandomized;
pub use factorial::Factorial;
pub use rcbd::RandomizedCompleteBlock;
pub use split_plot::SplitPlot;
pub use strip_plot::StripPlot;

use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::model::{ExperimentalDesign, Plot, Treatment, Trial};
use crate::{Error, Result};

/// One experimental factor and its level labels.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Factor {
    /// Factor name (e.g. "Tillage").
    pub name: String,
    /// Level labels, in treatment-number order.
    pub levels: Vec<String>,
}

impl Factor {
    /// Create a factor from a name and level labels.
    #[must_use]
    pub fn new<I, S>(name: impl Into<String>, levels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            levels: levels.into_iter().map(Into::into).collect(),
        }
    }
}

/// Two-factor structure for split-plot, strip-plot and factorial trials.
///
/// Treatments sorted by `treatment_number` map row-major onto the level
/// grid: treatment `i` is main level `i / sub.levels.len()` combined with
/// sub level `i % sub.levels.len()`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FactorStructure {
    /// Main-plot factor (split-plot) or horizontal strip factor (strip-plot).
    pub main: Factor,
    /// Sub-plot factor (split-plot) or vertical strip factor (strip-plot).
    pub sub: Factor,
}

impl FactorStructure {
    /// Create a structure from its two factors.
    #[must_use]
    pub const fn new(main: Factor, sub: Factor) -> Self {
        Self { main, sub }
    }

    /// Number of treatment combinations the structure describes.
    #[must_use]
    pub fn combinations(&self) -> usize {
        self.main.levels.len() * self.sub.levels.len()
    }

    /// Check both factors have levels and the grid matches the treatments.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] on an empty factor or a level
    /// product different from `treatment_count`.
    pub fn validate(&self, treatment_count: usize) -> Result<()> {
        for factor in [&self.main, &self.sub] {
            if factor.levels.is_empty() {
                return Err(Error::Configuration(format!(
                    "factor '{}' has no levels",
                    factor.name
                )));
            }
        }
        if self.combinations() != treatment_count {
            return Err(Error::Configuration(format!(
                "factor levels {} x {} = {} combinations, but the trial has {} treatments",
                self.main.levels.len(),
                self.sub.levels.len(),
                self.combinations(),
                treatment_count
            )));
        }
        Ok(())
    }

    /// Level labels of the treatment at `index` (sorted by number).
    #[must_use]
    pub fn levels_of(&self, index: usize) -> Option<(&str, &str)> {
        let b = self.sub.levels.len();
        if b == 0 {
            return None;
        }
        let main = self.main.levels.get(index / b)?;
        let sub = self.sub.levels.get(index % b)?;
        Some((main.as_str(), sub.as_str()))
    }
}

/// Per-request layout parameters beyond what the trial itself declares.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DesignParams {
    /// Two-factor structure; required for split-plot and strip-plot.
    pub factors: Option<FactorStructure>,
    /// Plot-number multiplier per block (101, 102, ... for base 100).
    /// `None` picks the smallest power of ten that fits a block.
    pub plot_number_base: Option<u32>,
}

impl DesignParams {
    /// Parameters with a two-factor structure.
    #[must_use]
    pub const fn with_factors(factors: FactorStructure) -> Self {
        Self {
            factors: Some(factors),
            plot_number_base: None,
        }
    }

    /// Override the plot-number base.
    #[must_use]
    pub const fn plot_number_base(mut self, base: u32) -> Self {
        self.plot_number_base = Some(base);
        self
    }
}

/// Inputs a strategy sees: counts only, never entity IDs.
#[derive(Debug, Clone, Copy)]
pub struct LayoutContext<'a> {
    /// Number of treatments (sorted by number, addressed by index).
    pub treatment_count: usize,
    /// Number of replications (blocks for blocked designs).
    pub replications: u32,
    /// Validated two-factor structure, when the request supplied one.
    pub factors: Option<&'a FactorStructure>,
}

/// Where one (treatment, replication) pair landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cell {
    /// Index into the number-sorted treatment list.
    pub treatment_index: usize,
    /// Replication, 1-based.
    pub replication: u32,
    /// Block, 1-based, for blocked designs.
    pub block: Option<u32>,
    /// Position within the block (or field), 1-based.
    pub position: u32,
    /// Main-plot unit / row strip, 1-based.
    pub main_plot: Option<u32>,
    /// Subplot / column strip, 1-based.
    pub sub_plot: Option<u32>,
}

/// Layout strategy for one design family.
pub trait LayoutStrategy: Send + Sync {
    /// The design family this strategy implements.
    fn design(&self) -> ExperimentalDesign;

    /// Place every (treatment, replication) pair exactly once.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the context lacks something the
    /// family needs (e.g. a factor structure).
    fn layout(&self, ctx: &LayoutContext<'_>, rng: &mut dyn RngCore) -> Result<Vec<Cell>>;
}

/// Strategy for a design family.
#[must_use]
pub fn strategy_for(design: ExperimentalDesign) -> &'static dyn LayoutStrategy {
    match design {
        ExperimentalDesign::CompletelyRandomized => &CompletelyRandomized,
        ExperimentalDesign::RandomizedCompleteBlock => &RandomizedCompleteBlock,
        ExperimentalDesign::SplitPlot => &SplitPlot,
        ExperimentalDesign::StripPlot => &StripPlot,
        ExperimentalDesign::Factorial => &Factorial,
    }
}

/// Generate the plot layout for a trial.
///
/// `treatments` may be in any order; they are addressed by ascending
/// `treatment_number`. The returned plots are ordered by block, then
/// treatment number, then position, regardless of the randomization.
///
/// # Errors
///
/// - [`Error::Configuration`] for zero treatments, treatments beyond the
///   declared count, a missing or mismatched factor structure, or a plot
///   number base too small for a block
/// - [`Error::Validation`] if a treatment belongs to another trial
pub fn generate_plots(
    trial: &Trial,
    treatments: &[Treatment],
    params: &DesignParams,
    rng: &mut dyn RngCore,
) -> Result<Vec<Plot>> {
    let design = trial.design();
    if treatments.is_empty() {
        return Err(Error::Configuration(format!(
            "trial {} has no treatments; add at least one before generating plots",
            trial.trial_id()
        )));
    }
    if treatments.len() > trial.num_treatments() as usize {
        return Err(Error::Configuration(format!(
            "trial {} has {} treatments but declares {}",
            trial.trial_id(),
            treatments.len(),
            trial.num_treatments()
        )));
    }
    if let Some(stray) = treatments.iter().find(|t| t.trial_id() != trial.trial_id()) {
        return Err(Error::Validation(format!(
            "treatment {} belongs to trial {}, not {}",
            stray.treatment_id(),
            stray.trial_id(),
            trial.trial_id()
        )));
    }

    let mut sorted: Vec<&Treatment> = treatments.iter().collect();
    sorted.sort_by_key(|t| t.treatment_number());

    let factors = match (&params.factors, design) {
        (None, d) if d.requires_factor_structure() => {
            return Err(Error::Configuration(format!(
                "{} design requires two treatment factors (main and sub); only one treatment axis was supplied",
                d.label()
            )));
        }
        (Some(f), ExperimentalDesign::SplitPlot | ExperimentalDesign::StripPlot | ExperimentalDesign::Factorial) => {
            f.validate(sorted.len())?;
            Some(f)
        }
        (Some(_), d) => {
            debug!(design = %d, "factor structure ignored for single-factor design");
            None
        }
        (None, _) => None,
    };

    let ctx = LayoutContext {
        treatment_count: sorted.len(),
        replications: trial.num_replications(),
        factors,
    };
    let base = plot_number_base(params.plot_number_base, sorted.len())?;
    if design.is_blocked() {
        highest_plot_number(base, trial.num_replications(), sorted.len())?;
    }
    let cells = strategy_for(design).layout(&ctx, rng)?;

    let mut plots = Vec::with_capacity(cells.len());
    for cell in &cells {
        let treatment = sorted.get(cell.treatment_index).ok_or_else(|| {
            Error::Configuration(format!(
                "{} layout produced treatment index {} beyond {} treatments",
                design.label(),
                cell.treatment_index,
                sorted.len()
            ))
        })?;
        let plot_number = match cell.block {
            Some(block) => block
                .checked_mul(base)
                .and_then(|n| n.checked_add(cell.position))
                .ok_or_else(|| plot_number_overflow(base, block))?,
            None => cell.position,
        };
        plots.push((
            treatment.treatment_number(),
            Plot::new(
                trial.trial_id(),
                treatment.treatment_id(),
                plot_number,
                cell.replication,
                cell.block,
                cell.position,
                cell.main_plot,
                cell.sub_plot,
            ),
        ));
    }

    plots.sort_by_key(|(number, plot)| (plot.block().unwrap_or(0), *number, plot.position()));

    debug!(
        trial_id = %trial.trial_id(),
        design = %design,
        plots = plots.len(),
        "generated plot layout"
    );
    Ok(plots.into_iter().map(|(_, plot)| plot).collect())
}

/// Smallest power of ten (at least 100) strictly greater than a block's size,
/// unless the caller fixed one.
fn plot_number_base(requested: Option<u32>, plots_per_block: usize) -> Result<u32> {
    let per_block = u32::try_from(plots_per_block)
        .map_err(|_| Error::Configuration(format!("{plots_per_block} plots per block is too many")))?;
    match requested {
        Some(base) if base <= per_block => Err(Error::Configuration(format!(
            "plot number base {base} must exceed the {per_block} plots in a block"
        ))),
        Some(base) => Ok(base),
        None => {
            let mut base = 100_u32;
            while base <= per_block {
                base = base.checked_mul(10).ok_or_else(|| {
                    Error::Configuration(format!("{per_block} plots per block is too many"))
                })?;
            }
            Ok(base)
        }
    }
}

/// Largest plot number a blocked layout can produce: the last position of
/// the last block. Errors if it does not fit a `u32`.
fn highest_plot_number(base: u32, replications: u32, plots_per_block: usize) -> Result<u32> {
    u32::try_from(plots_per_block)
        .ok()
        .and_then(|per_block| replications.checked_mul(base)?.checked_add(per_block))
        .ok_or_else(|| plot_number_overflow(base, replications))
}

fn plot_number_overflow(base: u32, block: u32) -> Error {
    Error::Configuration(format!(
        "plot number base {base} is too large for {block} blocks; plot numbers would exceed {}",
        u32::MAX
    ))
}

/// Convert a layout index to a 1-based plot coordinate.
///
/// Indexes are bounded by the declared u32 treatment and replication counts.
#[allow(clippy::cast_possible_truncation)]
pub(crate) const fn ordinal(index: usize) -> u32 {
    index as u32 + 1
}

/// `0..n`, shuffled.
pub(crate) fn permutation(n: usize, rng: &mut dyn RngCore) -> Vec<usize> {
    use rand::seq::SliceRandom;
    let mut order: Vec<usize> = (0..n).collect();
    order.shuffle(rng);
    order
}

/// Factor structure or a configuration error naming the design.
pub(crate) fn require_factors<'a>(
    ctx: &LayoutContext<'a>,
    design: ExperimentalDesign,
) -> Result<&'a FactorStructure> {
    ctx.factors.ok_or_else(|| {
        Error::Configuration(format!(
            "{} design requires a main and a sub factor",
            design.label()
        ))
    })
}
