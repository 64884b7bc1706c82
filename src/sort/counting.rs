use rayon::prelude::*;
use tracing::debug;

use super::depth::{calc_depth, depth_row};
use super::unroll::unroll_sorted_indices;
use super::{validate_ctx, SortCtx, SortPass};
use crate::error::{ensure_len, SortResult};

/// Fixed-point scale applied to depths before binning.
pub const DEPTH_MUL: f32 = 4096.0;
pub const SORTING_BINS_COUNT: usize = 256 * 256;

/// `floor(depth * DEPTH_MUL)`, saturating at the `i32` range (NaN maps to 0).
#[inline]
pub fn quantize_depth(depth: f32) -> i32 {
    (depth * DEPTH_MUL).floor() as i32
}

/// Linear bin of `q` within `[min, max]`, clamped to the last bin.
#[inline]
pub fn depth_bin(q: i32, min: i32, max: i32) -> usize {
    if max <= min {
        return 0;
    }
    let span = (i64::from(max) - i64::from(min)) as f64;
    let offset = (i64::from(q) - i64::from(min)) as f64;
    let bin = (offset * SORTING_BINS_COUNT as f64 / span) as usize;
    bin.min(SORTING_BINS_COUNT - 1)
}

/// O(N) host pass: bucket splats into 65536 depth bins, then scatter by bin
/// start offsets. Exact up to bin width; within a bin splats keep input order.
#[derive(Debug)]
pub struct CountingSortPass {
    quantized: Vec<i32>,
    bins: Vec<u32>,
    bin_counts: Vec<u32>,
    bin_starts: Vec<u32>,
    sorted_ids: Vec<u32>,
}

impl CountingSortPass {
    pub fn new(splat_count: usize) -> Self {
        debug!(splat_count, bins = SORTING_BINS_COUNT, "allocating counting sort");
        Self {
            quantized: vec![0; splat_count],
            bins: vec![0; splat_count],
            bin_counts: vec![0; SORTING_BINS_COUNT],
            bin_starts: vec![0; SORTING_BINS_COUNT],
            sorted_ids: vec![0; splat_count],
        }
    }

    /// Splat ids in the order of the last sort.
    pub fn sorted_ids(&self) -> &[u32] {
        &self.sorted_ids
    }

    /// Bin of every splat (by id) from the last sort.
    pub fn bins(&self) -> &[u32] {
        &self.bins
    }

    /// Fills `quantized` and returns the observed `(min, max)`.
    fn calculate_depths(&mut self, ctx: &SortCtx<'_>) -> (i32, i32) {
        let row = depth_row(&ctx.mvp);
        self.quantized
            .par_iter_mut()
            .zip(ctx.splats.positions.par_iter())
            .for_each(|(q, &position)| *q = quantize_depth(calc_depth(row, position)));

        self.quantized
            .par_iter()
            .map(|&q| (q, q))
            .reduce(
                || (i32::MAX, i32::MIN),
                |a, b| (a.0.min(b.0), a.1.max(b.1)),
            )
    }
}

impl SortPass for CountingSortPass {
    fn name(&self) -> &'static str {
        "counting"
    }

    fn sort_by_depth(&mut self, ctx: &mut SortCtx<'_>) -> SortResult<()> {
        validate_ctx(ctx)?;
        let splat_count = ctx.splats.count;
        ensure_len("counting sort scratch", self.sorted_ids.len(), splat_count)?;
        if splat_count == 0 {
            return Ok(());
        }

        let (min_depth, max_depth) = self.calculate_depths(ctx);

        self.bin_counts.fill(0);
        for (bin, &q) in self.bins.iter_mut().zip(&self.quantized) {
            let idx = depth_bin(q, min_depth, max_depth);
            *bin = idx as u32;
            self.bin_counts[idx] += 1;
        }

        self.bin_starts[0] = 0;
        for i in 1..SORTING_BINS_COUNT {
            self.bin_starts[i] = self.bin_starts[i - 1] + self.bin_counts[i - 1];
        }

        for (id, &bin) in self.bins.iter().enumerate() {
            let slot = &mut self.bin_starts[bin as usize];
            self.sorted_ids[*slot as usize] = id as u32;
            *slot += 1;
        }

        unroll_sorted_indices(&self.sorted_ids, ctx.indices.as_mut_slice(), splat_count)
    }
}
