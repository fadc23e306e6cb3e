//! Strip-plot design
//!
//! Within each block the main factor is randomized over horizontal strips
//! and the sub factor over vertical strips, independently. Each plot is the
//! intersection of one row strip and one column strip.

use rand::RngCore;

use super::{ordinal, permutation, require_factors, Cell, LayoutContext, LayoutStrategy};
use crate::model::ExperimentalDesign;
use crate::Result;

/// Strip-plot layout strategy.
#[derive(Debug, Clone, Copy, Default)]
pub struct StripPlot;

impl LayoutStrategy for StripPlot {
    fn design(&self) -> ExperimentalDesign {
        ExperimentalDesign::StripPlot
    }

    fn layout(&self, ctx: &LayoutContext<'_>, rng: &mut dyn RngCore) -> Result<Vec<Cell>> {
        let factors = require_factors(ctx, self.design())?;
        let a = factors.main.levels.len();
        let b = factors.sub.levels.len();

        let mut cells = Vec::with_capacity(a * b * ctx.replications as usize);
        for block in 1..=ctx.replications {
            let rows = permutation(a, rng);
            let columns = permutation(b, rng);
            for (row, main_level) in rows.iter().enumerate() {
                for (column, sub_level) in columns.iter().enumerate() {
                    cells.push(Cell {
                        treatment_index: main_level * b + sub_level,
                        replication: block,
                        block: Some(block),
                        position: ordinal(row * b + column),
                        main_plot: Some(ordinal(row)),
                        sub_plot: Some(ordinal(column)),
                    });
                }
            }
        }
        Ok(cells)
    }
}
