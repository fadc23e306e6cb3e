//! Completely randomized design
//!
//! Every (treatment, replication) pair is dropped onto one of the R×T field
//! positions by a single random permutation. There are no blocks.

use rand::seq::SliceRandom;
use rand::RngCore;

use super::{ordinal, Cell, LayoutContext, LayoutStrategy};
use crate::model::ExperimentalDesign;
use crate::Result;

/// CRD layout strategy.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompletelyRandomized;

impl LayoutStrategy for CompletelyRandomized {
    fn design(&self) -> ExperimentalDesign {
        ExperimentalDesign::CompletelyRandomized
    }

    fn layout(&self, ctx: &LayoutContext<'_>, rng: &mut dyn RngCore) -> Result<Vec<Cell>> {
        let mut pairs: Vec<(usize, u32)> = (1..=ctx.replications)
            .flat_map(|rep| (0..ctx.treatment_count).map(move |t| (t, rep)))
            .collect();
        pairs.shuffle(rng);

        Ok(pairs
            .into_iter()
            .enumerate()
            .map(|(i, (treatment_index, replication))| Cell {
                treatment_index,
                replication,
                block: None,
                position: ordinal(i),
                main_plot: None,
                sub_plot: None,
            })
            .collect())
    }
}
