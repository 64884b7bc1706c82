//! Per-invocation bodies of the three sort kernels.
//!
//! These are the host renditions of `shaders/*.metal`; the emulated device
//! runs them directly and the tests hold the Metal output to them.

use glam::{Vec3, Vec4};

use crate::sort::depth::{calc_depth, entry_key, padding_depth, PADDING_ID};
use crate::sort::unroll::unrolled_index;

/// calc-depths: the `(depth, id)` entry for slot `idx` of the padded arrays.
#[inline]
pub fn calc_depth_entry(idx: usize, splat_count: usize, row: Vec3, positions: &[Vec4]) -> (f32, u32) {
    if idx < splat_count {
        (calc_depth(row, positions[idx]), idx as u32)
    } else {
        (padding_depth(), PADDING_ID)
    }
}

/// bitonic: whether the pair `(i, i ^ j)` with `i` the lower slot must swap
/// during stage `k`. Blocks with `i & k == 0` sort ascending, the rest
/// descending.
#[inline]
pub fn bitonic_should_swap(i: u32, k: u32, lower: (f32, u32), upper: (f32, u32)) -> bool {
    let lower_key = entry_key(lower.0, lower.1);
    let upper_key = entry_key(upper.0, upper.1);
    if i & k == 0 {
        lower_key > upper_key
    } else {
        lower_key < upper_key
    }
}

/// bitonic: one full compare-exchange pass over a block of `2 * j` slots
/// starting at global slot `base`.
pub fn bitonic_block(base: u32, j: u32, k: u32, depths: &mut [f32], ids: &mut [u32]) {
    let j = j as usize;
    debug_assert_eq!(depths.len(), 2 * j);
    debug_assert_eq!(ids.len(), 2 * j);

    for lo in 0..j {
        let hi = lo + j;
        let i = base + lo as u32;
        if bitonic_should_swap(i, k, (depths[lo], ids[lo]), (depths[hi], ids[hi])) {
            depths.swap(lo, hi);
            ids.swap(lo, hi);
        }
    }
}

/// unroll: fills the six index-buffer slots of the quad drawn for splat `id`.
#[inline]
pub fn unroll_quad(id: u32, quad: &mut [u32]) {
    for (vertex, slot) in quad.iter_mut().enumerate() {
        *slot = unrolled_index(id, vertex as u32);
    }
}
