//! Randomized complete block design
//!
//! Each replication is a block holding every treatment exactly once; the
//! order within each block is an independent permutation.

use rand::RngCore;

use super::{ordinal, permutation, Cell, LayoutContext, LayoutStrategy};
use crate::model::ExperimentalDesign;
use crate::Result;

/// RCBD layout strategy.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomizedCompleteBlock;

impl LayoutStrategy for RandomizedCompleteBlock {
    fn design(&self) -> ExperimentalDesign {
        ExperimentalDesign::RandomizedCompleteBlock
    }

    fn layout(&self, ctx: &LayoutContext<'_>, rng: &mut dyn RngCore) -> Result<Vec<Cell>> {
        Ok(block_layout(ctx.treatment_count, ctx.replications, rng))
    }
}

/// One independent permutation of all treatments per block.
pub(super) fn block_layout(treatment_count: usize, blocks: u32, rng: &mut dyn RngCore) -> Vec<Cell> {
    let mut cells = Vec::with_capacity(treatment_count * blocks as usize);
    for block in 1..=blocks {
        for (pos, treatment_index) in permutation(treatment_count, rng).into_iter().enumerate() {
            cells.push(Cell {
                treatment_index,
                replication: block,
                block: Some(block),
                position: ordinal(pos),
                main_plot: None,
                sub_plot: None,
            });
        }
    }
    cells
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_rcbd_one_plot_per_treatment_per_block() {
        let ctx = LayoutContext {
            treatment_count: 5,
            replications: 4,
            factors: None,
        };
        let cells = RandomizedCompleteBlock
            .layout(&ctx, &mut StdRng::seed_from_u64(8))
            .unwrap();
        assert_eq!(cells.len(), 20);
        for block in 1..=4 {
            let mut in_block: Vec<usize> = cells
                .iter()
                .filter(|c| c.block == Some(block))
                .map(|c| c.treatment_index)
                .collect();
            in_block.sort_unstable();
            assert_eq!(in_block, vec![0, 1, 2, 3, 4]);
        }
    }

    #[test]
    fn test_rcbd_replication_equals_block() {
        let cells = block_layout(3, 3, &mut StdRng::seed_from_u64(1));
        assert!(cells.iter().all(|c| c.block == Some(c.replication)));
    }

    #[test]
    fn test_rcbd_blocks_randomized_independently() {
        // With 8 treatments and 6 blocks, identical orders in every block
        // would mean the permutation is not re-drawn per block.
        let cells = block_layout(8, 6, &mut StdRng::seed_from_u64(2024));
        let order = |b: u32| -> Vec<usize> {
            cells
                .iter()
                .filter(|c| c.block == Some(b))
                .map(|c| c.treatment_index)
                .collect()
        };
        assert!((2..=6).any(|b| order(b) != order(1)));
    }
}
