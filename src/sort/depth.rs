//! The depth formula and ordering key every strategy shares.
//!
//! Host passes and the device kernels must agree bit for bit, so the dot
//! product is spelled out as the same fused sequence the Metal kernel uses.

use std::cmp::Ordering;

use glam::{Mat4, Vec3, Vec4};

/// Id written into the padding slots `[N, L)` of the device arrays.
pub const PADDING_ID: u32 = u32::MAX;

/// Bit pattern of the padding depth: the positive NaN with every payload bit
/// set, which is the greatest value under IEEE-754 total order.
pub const PADDING_DEPTH_BITS: u32 = 0x7FFF_FFFF;

pub fn padding_depth() -> f32 {
    f32::from_bits(PADDING_DEPTH_BITS)
}

/// Row 2 of the model-view-projection matrix, the only part that yields
/// camera-space depth.
pub fn depth_row(mvp: &Mat4) -> Vec3 {
    mvp.row(2).truncate()
}

/// `dot(row2(MVP), position.xyz)`; `w` and the translation column are ignored.
#[inline]
pub fn calc_depth(row: Vec3, position: Vec4) -> f32 {
    row.z
        .mul_add(position.z, row.y.mul_add(position.y, row.x * position.x))
}

/// Maps a float onto a `u32` whose unsigned order is IEEE-754 total order.
#[inline]
pub fn depth_key(depth: f32) -> u32 {
    let bits = depth.to_bits();
    if bits & 0x8000_0000 != 0 {
        !bits
    } else {
        bits | 0x8000_0000
    }
}

/// Combined `(depth, id)` key. Ids are unique, so real entries never tie.
#[inline]
pub fn entry_key(depth: f32, id: u32) -> u64 {
    (u64::from(depth_key(depth)) << 32) | u64::from(id)
}

/// Ascending by depth under total order, then by id.
#[inline]
pub fn cmp_entries(a: (f32, u32), b: (f32, u32)) -> Ordering {
    a.0.total_cmp(&b.0).then(a.1.cmp(&b.1))
}
