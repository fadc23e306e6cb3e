//! Factorial design
//!
//! The treatment list already is the full factor combination; plots are
//! laid out with RCBD randomization over the combined list.

use rand::RngCore;

use super::rcbd::block_layout;
use super::{Cell, LayoutContext, LayoutStrategy};
use crate::model::ExperimentalDesign;
use crate::Result;

/// Factorial layout strategy.
#[derive(Debug, Clone, Copy, Default)]
pub struct Factorial;

impl LayoutStrategy for Factorial {
    fn design(&self) -> ExperimentalDesign {
        ExperimentalDesign::Factorial
    }

    fn layout(&self, ctx: &LayoutContext<'_>, rng: &mut dyn RngCore) -> Result<Vec<Cell>> {
        Ok(block_layout(ctx.treatment_count, ctx.replications, rng))
    }
}
