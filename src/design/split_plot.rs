//! Split-plot design
//!
//! Within each block the main-plot factor levels are randomized over main
//! plot units; within each main plot unit the sub-plot levels are
//! randomized again. Positions run main unit by main unit.

use rand::RngCore;

use super::{ordinal, permutation, require_factors, Cell, LayoutContext, LayoutStrategy};
use crate::model::ExperimentalDesign;
use crate::Result;

/// Split-plot layout strategy.
#[derive(Debug, Clone, Copy, Default)]
pub struct SplitPlot;

impl LayoutStrategy for SplitPlot {
    fn design(&self) -> ExperimentalDesign {
        ExperimentalDesign::SplitPlot
    }

    fn layout(&self, ctx: &LayoutContext<'_>, rng: &mut dyn RngCore) -> Result<Vec<Cell>> {
        let factors = require_factors(ctx, self.design())?;
        let a = factors.main.levels.len();
        let b = factors.sub.levels.len();

        let mut cells = Vec::with_capacity(a * b * ctx.replications as usize);
        for block in 1..=ctx.replications {
            for (unit, main_level) in permutation(a, rng).into_iter().enumerate() {
                for (sub, sub_level) in permutation(b, rng).into_iter().enumerate() {
                    cells.push(Cell {
                        treatment_index: main_level * b + sub_level,
                        replication: block,
                        block: Some(block),
                        position: ordinal(unit * b + sub),
                        main_plot: Some(ordinal(unit)),
                        sub_plot: Some(ordinal(sub)),
                    });
                }
            }
        }
        Ok(cells)
    }
}
