//! Plot - one experimental unit in the field layout

use serde::{Deserialize, Serialize};

use super::{PlotId, TreatmentId, TrialId};
use crate::{Error, Result};

/// Plot represents a single experimental unit.
///
/// Each plot references exactly one treatment by ID and carries its
/// replication. Blocked designs set `block`; split-plot designs set
/// `main_plot`/`sub_plot` (the main-plot unit and the subplot within it);
/// strip-plot designs use the same pair as row strip and column strip.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Plot {
    plot_id: PlotId,
    trial_id: TrialId,
    treatment_id: TreatmentId,
    plot_number: u32,
    replication: u32,
    block: Option<u32>,
    position: u32,
    main_plot: Option<u32>,
    sub_plot: Option<u32>,
}

impl Plot {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        trial_id: TrialId,
        treatment_id: TreatmentId,
        plot_number: u32,
        replication: u32,
        block: Option<u32>,
        position: u32,
        main_plot: Option<u32>,
        sub_plot: Option<u32>,
    ) -> Self {
        Self {
            plot_id: PlotId::new(),
            trial_id,
            treatment_id,
            plot_number,
            replication,
            block,
            position,
            main_plot,
            sub_plot,
        }
    }

    /// Plot laid out by hand rather than by a layout strategy.
    ///
    /// Blocked designs without an explicit block use the replication as the
    /// block; the position defaults to the plot number.
    pub(crate) fn manual(trial_id: TrialId, new: NewPlot, blocked: bool) -> Result<Self> {
        new.validate()?;
        let block = match new.block {
            None if blocked => Some(new.replication),
            other => other,
        };
        Ok(Self::new(
            trial_id,
            new.treatment_id,
            new.plot_number,
            new.replication,
            block,
            new.position.unwrap_or(new.plot_number),
            None,
            None,
        ))
    }

    /// Get the plot ID.
    #[must_use]
    pub const fn plot_id(&self) -> PlotId {
        self.plot_id
    }

    /// Get the owning trial ID.
    #[must_use]
    pub const fn trial_id(&self) -> TrialId {
        self.trial_id
    }

    /// Get the assigned treatment ID.
    #[must_use]
    pub const fn treatment_id(&self) -> TreatmentId {
        self.treatment_id
    }

    /// Get the plot number (unique within the trial).
    #[must_use]
    pub const fn plot_number(&self) -> u32 {
        self.plot_number
    }

    /// Get the replication index (1-based).
    #[must_use]
    pub const fn replication(&self) -> u32 {
        self.replication
    }

    /// Get the block index, for blocked designs.
    #[must_use]
    pub const fn block(&self) -> Option<u32> {
        self.block
    }

    /// Get the position within the block (or the field, for CRD), 1-based.
    #[must_use]
    pub const fn position(&self) -> u32 {
        self.position
    }

    /// Get the main-plot unit (split-plot) or row strip (strip-plot).
    #[must_use]
    pub const fn main_plot(&self) -> Option<u32> {
        self.main_plot
    }

    /// Get the subplot (split-plot) or column strip (strip-plot).
    #[must_use]
    pub const fn sub_plot(&self) -> Option<u32> {
        self.sub_plot
    }
}

/// Payload for entering a plot by hand (e.g. a farmer-laid strip).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewPlot {
    /// Treatment applied to the plot.
    pub treatment_id: TreatmentId,
    /// Plot number, unique within the trial.
    pub plot_number: u32,
    /// Replication, 1-based.
    pub replication: u32,
    /// Block, 1-based.
    #[serde(default)]
    pub block: Option<u32>,
    /// Position within the block or field, 1-based.
    #[serde(default)]
    pub position: Option<u32>,
}

impl NewPlot {
    /// Plot of `treatment_id` numbered `plot_number` in `replication`.
    #[must_use]
    pub const fn new(treatment_id: TreatmentId, plot_number: u32, replication: u32) -> Self {
        Self {
            treatment_id,
            plot_number,
            replication,
            block: None,
            position: None,
        }
    }

    /// Set the block.
    #[must_use]
    pub const fn block(mut self, block: u32) -> Self {
        self.block = Some(block);
        self
    }

    /// Set the position.
    #[must_use]
    pub const fn position(mut self, position: u32) -> Self {
        self.position = Some(position);
        self
    }

    /// Check the coordinates are 1-based.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] naming the first zero coordinate.
    pub fn validate(&self) -> Result<()> {
        let fields = [
            ("plot_number", Some(self.plot_number)),
            ("replication", Some(self.replication)),
            ("block", self.block),
            ("position", self.position),
        ];
        match fields.iter().find(|(_, value)| *value == Some(0)) {
            Some((field, _)) => Err(Error::Validation(format!("{field} must be at least 1"))),
            None => Ok(()),
        }
    }
}
