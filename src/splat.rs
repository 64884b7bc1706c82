use glam::{Vec3, Vec4};
use tracing::debug;

use crate::error::{ensure_len, SortError, SortResult};

/// Index-buffer slots per splat: two triangles forming a camera-facing quad.
pub const VERTICES_PER_SPLAT: usize = 6;

/// One quantized splat record, as stored by scene files.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Splat {
    pub position: Vec3,
    pub scale: Vec3,
    /// Quaternion, each component quantized to `x * 128 + 128`.
    pub rotation: [u8; 4],
    /// RGBA.
    pub color: [u8; 4],
}

/// Maps an 8-bit quantized quaternion component back to `[-1, 1)`.
pub fn dequantize_rotation(q: [u8; 4]) -> Vec4 {
    let r = |x: u8| (x as f32 - 128.0) / 128.0;
    Vec4::new(r(q[0]), r(q[1]), r(q[2]), r(q[3]))
}

pub fn quantize_rotation(q: Vec4) -> [u8; 4] {
    let r = |x: f32| (x * 128.0 + 128.0).round().clamp(0.0, 255.0) as u8;
    [r(q.x), r(q.y), r(q.z), r(q.w)]
}

/// Packs RGBA with red in the most significant byte.
pub fn pack_color(c: [u8; 4]) -> u32 {
    ((c[0] as u32) << 24) | ((c[1] as u32) << 16) | ((c[2] as u32) << 8) | c[3] as u32
}

pub fn unpack_color(packed: u32) -> [u8; 4] {
    packed.to_be_bytes()
}

/// The primitive set the sort passes read from. Immutable once built; the
/// passes only look at `count` and `positions`.
#[derive(Debug, Clone, Default)]
pub struct SplatSet {
    pub count: usize,
    /// xyz with w forced to 1.
    pub positions: Vec<Vec4>,
    pub rotations: Vec<Vec4>,
    pub scales: Vec<Vec3>,
    pub colors: Vec<u32>,
}

impl SplatSet {
    pub fn from_splats(splats: &[Splat]) -> Self {
        let set = Self {
            count: splats.len(),
            positions: splats.iter().map(|s| s.position.extend(1.0)).collect(),
            rotations: splats
                .iter()
                .map(|s| dequantize_rotation(s.rotation))
                .collect(),
            scales: splats.iter().map(|s| s.scale).collect(),
            colors: splats.iter().map(|s| pack_color(s.color)).collect(),
        };

        if let Some((min, max)) = set.bounds() {
            debug!(count = set.count, ?min, ?max, "built splat set");
        }
        set
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Checks every backing array against `count`.
    pub fn validate(&self) -> SortResult<()> {
        ensure_len("positions", self.count, self.positions.len())?;
        ensure_len("rotations", self.count, self.rotations.len())?;
        ensure_len("scales", self.count, self.scales.len())?;
        ensure_len("colors", self.count, self.colors.len())?;
        Ok(())
    }

    /// Axis-aligned bounds of the positions, `None` for an empty set.
    pub fn bounds(&self) -> Option<(Vec3, Vec3)> {
        let first = self.positions.first()?.truncate();
        Some(
            self.positions
                .iter()
                .fold((first, first), |(min, max), p| {
                    (min.min(p.truncate()), max.max(p.truncate()))
                }),
        )
    }

    pub fn center(&self) -> Vec3 {
        match self.bounds() {
            Some((min, max)) => (min + max) * 0.5,
            None => Vec3::ZERO,
        }
    }
}

/// Per-vertex index buffer consumed by one indexed draw of
/// `count * VERTICES_PER_SPLAT` indices. Rewritten in full every frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexBuffer {
    indices: Vec<u32>,
}

impl IndexBuffer {
    pub fn for_count(count: usize) -> SortResult<Self> {
        let len = checked_index_len(count)?;
        Ok(Self {
            indices: vec![0; len],
        })
    }

    pub fn for_splats(splats: &SplatSet) -> SortResult<Self> {
        Self::for_count(splats.count)
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Index count for the draw call.
    pub fn draw_count(&self) -> u32 {
        self.indices.len() as u32
    }

    pub fn as_slice(&self) -> &[u32] {
        &self.indices
    }

    pub fn as_mut_slice(&mut self) -> &mut [u32] {
        &mut self.indices
    }

    /// Splat ids in draw order, recovered from the first slot of every quad.
    pub fn splat_order(&self) -> impl Iterator<Item = u32> + '_ {
        self.indices
            .chunks_exact(VERTICES_PER_SPLAT)
            .map(|quad| quad[0] / VERTICES_PER_SPLAT as u32)
    }

    pub(crate) fn ensure_matches(&self, splat_count: usize) -> SortResult<()> {
        ensure_len(
            "index buffer",
            splat_count * VERTICES_PER_SPLAT,
            self.indices.len(),
        )
    }
}

/// `count * VERTICES_PER_SPLAT`, rejecting counts whose vertex indices
/// overflow `u32`.
pub fn checked_index_len(count: usize) -> SortResult<usize> {
    count
        .checked_mul(VERTICES_PER_SPLAT)
        .filter(|&len| len as u64 <= u64::from(u32::MAX) + 1)
        .ok_or(SortError::TooManySplats { count })
}
