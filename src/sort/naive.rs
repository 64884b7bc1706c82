use rayon::prelude::*;
use tracing::debug;

use super::depth::{calc_depth, cmp_entries, depth_row};
use super::unroll::unroll_sorted_indices;
use super::{validate_ctx, SortCtx, SortPass};
use crate::error::{ensure_len, SortResult};

/// Exact O(N log N) baseline. The other passes are checked against it.
#[derive(Debug)]
pub struct NaiveSortPass {
    items: Vec<(f32, u32)>,
    sorted_ids: Vec<u32>,
}

impl NaiveSortPass {
    pub fn new(splat_count: usize) -> Self {
        debug!(splat_count, "allocating naive sort");
        Self {
            items: vec![(0.0, 0); splat_count],
            sorted_ids: vec![0; splat_count],
        }
    }

    pub fn sorted_ids(&self) -> &[u32] {
        &self.sorted_ids
    }

    /// `(depth, id)` pairs in sorted order from the last sort.
    pub fn sorted_entries(&self) -> &[(f32, u32)] {
        &self.items
    }
}

impl SortPass for NaiveSortPass {
    fn name(&self) -> &'static str {
        "naive"
    }

    fn sort_by_depth(&mut self, ctx: &mut SortCtx<'_>) -> SortResult<()> {
        validate_ctx(ctx)?;
        let splat_count = ctx.splats.count;
        ensure_len("naive sort scratch", self.items.len(), splat_count)?;

        let row = depth_row(&ctx.mvp);
        self.items
            .par_iter_mut()
            .zip(ctx.splats.positions.par_iter())
            .enumerate()
            .for_each(|(id, (item, &position))| *item = (calc_depth(row, position), id as u32));

        // Ids are unique, so no two entries compare equal and the unstable
        // in-place sort gives the same order as a stable one.
        self.items.par_sort_unstable_by(|a, b| cmp_entries(*a, *b));

        self.sorted_ids
            .par_iter_mut()
            .zip(self.items.par_iter())
            .for_each(|(dst, &(_, id))| *dst = id);

        unroll_sorted_indices(&self.sorted_ids, ctx.indices.as_mut_slice(), splat_count)
    }
}
