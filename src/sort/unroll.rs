use rayon::prelude::*;

use crate::error::{ensure_len, SortResult};
use crate::splat::VERTICES_PER_SPLAT;

/// Index-buffer value for `vertex` of the quad belonging to splat `id`.
#[inline]
pub fn unrolled_index(id: u32, vertex: u32) -> u32 {
    id * VERTICES_PER_SPLAT as u32 + vertex
}

/// Expands a sorted id list into the per-vertex index buffer:
/// `out[p * 6 + v] = sorted_ids[p] * 6 + v`.
pub fn unroll_sorted_indices(
    sorted_ids: &[u32],
    out: &mut [u32],
    splat_count: usize,
) -> SortResult<()> {
    ensure_len("sorted splat indices", splat_count, sorted_ids.len())?;
    ensure_len(
        "unrolled index buffer",
        splat_count * VERTICES_PER_SPLAT,
        out.len(),
    )?;

    out.par_chunks_exact_mut(VERTICES_PER_SPLAT)
        .zip(sorted_ids.par_iter())
        .for_each(|(quad, &id)| {
            for (vertex, slot) in quad.iter_mut().enumerate() {
                *slot = unrolled_index(id, vertex as u32);
            }
        });
    Ok(())
}
