//! Device sort: calc-depths, a bitonic network over the padded
//! `(ids, depths)` arrays, then index unrolling.
//!
//! Every frame records the same command list, built once at construction.
//! Bitonic passes have whole-array dependencies, so each `(j, k)` pair is its
//! own dispatch and the device runs them strictly in order.

mod emulated;
pub mod kernels;
#[cfg(all(feature = "metal", target_os = "macos"))]
pub mod metal;

use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

use glam::{Mat4, Vec4};
use tracing::{debug, info, warn};

use super::{validate_ctx, SortCtx, SortPass};
use crate::error::{ensure_len, SortError, SortResult};
use crate::splat::{checked_index_len, SplatSet};

pub use emulated::EmulatedDevice;

pub const CALC_DEPTHS_THREADS: u32 = 64;
pub const UNROLL_THREADS: u32 = 64;
pub const BITONIC_THREADS: u32 = 8192;
pub const BITONIC_WORKGROUP_SIZE: u32 = 128;

/// Thread partition of one dispatch: `threads` invocations, each covering
/// `items_per_thread` items at the strided positions `item * threads + tid`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchGrid {
    pub threads: u32,
    pub items_per_thread: u32,
}

impl DispatchGrid {
    pub fn new(items: u32, threads: u32) -> Self {
        Self {
            threads,
            items_per_thread: items.div_ceil(threads.max(1)),
        }
    }

    /// Item indices visited by thread `tid` (may run past the item count;
    /// kernels bounds-check).
    pub fn thread_items(&self, tid: u32) -> impl Iterator<Item = u32> {
        let threads = self.threads;
        (0..self.items_per_thread).map(move |item| item * threads + tid)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortCommand {
    CalcDepths,
    BitonicPass { j: u32, k: u32 },
    UnrollIndices,
}

/// `(j, k)` for every bitonic pass, in execution order.
pub fn bitonic_stages(padded_len: u32) -> Vec<(u32, u32)> {
    let mut stages = Vec::new();
    let mut k = 2u32;
    while k <= padded_len {
        let mut j = k >> 1;
        while j > 0 {
            stages.push((j, k));
            j >>= 1;
        }
        k = match k.checked_mul(2) {
            Some(next) => next,
            None => break,
        };
    }
    stages
}

/// `log2(L) * (log2(L) + 1) / 2` for a power-of-two `L`.
pub fn bitonic_pass_count(padded_len: u32) -> usize {
    let log = padded_len.trailing_zeros() as usize;
    log * (log + 1) / 2
}

pub fn encode_sort_commands(padded_len: u32) -> Vec<SortCommand> {
    let mut commands = Vec::with_capacity(bitonic_pass_count(padded_len) + 2);
    commands.push(SortCommand::CalcDepths);
    commands.extend(
        bitonic_stages(padded_len)
            .into_iter()
            .map(|(j, k)| SortCommand::BitonicPass { j, k }),
    );
    commands.push(SortCommand::UnrollIndices);
    commands
}

/// Kernel source text, handed to the device pass when it is built.
#[derive(Debug, Clone)]
pub struct KernelSources {
    pub calc_depths: Cow<'static, str>,
    pub bitonic_sort: Cow<'static, str>,
    pub unroll_indices: Cow<'static, str>,
}

impl KernelSources {
    /// The Metal kernels shipped in `shaders/`.
    pub fn builtin() -> Self {
        Self {
            calc_depths: Cow::Borrowed(include_str!("../../../shaders/calc_depths.metal")),
            bitonic_sort: Cow::Borrowed(include_str!("../../../shaders/bitonic_sort.metal")),
            unroll_indices: Cow::Borrowed(include_str!("../../../shaders/unroll_indices.metal")),
        }
    }

    pub fn validate(&self) -> SortResult<()> {
        for (kernel, source) in [
            ("calc_depths", &self.calc_depths),
            ("bitonic_sort", &self.bitonic_sort),
            ("unroll_indices", &self.unroll_indices),
        ] {
            if source.trim().is_empty() {
                return Err(SortError::MissingKernelSource { kernel });
            }
        }
        Ok(())
    }
}

impl Default for KernelSources {
    fn default() -> Self {
        Self::builtin()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum GpuBackendKind {
    /// Metal when available, otherwise the emulated device.
    #[default]
    Auto,
    Metal,
    Emulated,
}

impl GpuBackendKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Metal => "metal",
            Self::Emulated => "emulated",
        }
    }
}

impl fmt::Display for GpuBackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for GpuBackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "metal" => Ok(Self::Metal),
            "emulated" => Ok(Self::Emulated),
            other => Err(format!("unknown GPU backend '{other}'")),
        }
    }
}

/// A device that owns the compact sort buffers and executes the recorded
/// command list against them.
pub trait SortDevice: fmt::Debug {
    fn name(&self) -> &'static str;

    /// Runs `commands` in order over this frame's `positions` and leaves the
    /// unrolled indices in `indices`.
    fn execute(
        &mut self,
        commands: &[SortCommand],
        mvp: &Mat4,
        positions: &[Vec4],
        indices: &mut [u32],
    ) -> SortResult<()>;

    /// Copies out the padded `(ids, depths)` arrays.
    fn read_compact(&self) -> SortResult<(Vec<u32>, Vec<f32>)>;
}

#[cfg(all(feature = "metal", target_os = "macos"))]
fn create_metal_device(
    splat_count: usize,
    padded_len: usize,
    kernels: &KernelSources,
) -> SortResult<Box<dyn SortDevice>> {
    Ok(Box::new(self::metal::MetalSortBackend::new(
        splat_count,
        padded_len,
        kernels,
    )?))
}

#[cfg(not(all(feature = "metal", target_os = "macos")))]
fn create_metal_device(
    _splat_count: usize,
    _padded_len: usize,
    _kernels: &KernelSources,
) -> SortResult<Box<dyn SortDevice>> {
    Err(SortError::BackendUnavailable("Metal"))
}

/// GPU strategy. Buffers are sized once to `next_power_of_two(N)` and reused
/// every frame.
#[derive(Debug)]
pub struct GpuSortPass {
    device: Box<dyn SortDevice>,
    commands: Vec<SortCommand>,
    splat_count: usize,
    padded_len: usize,
}

impl GpuSortPass {
    pub fn new(splats: &SplatSet, kind: GpuBackendKind, kernels: &KernelSources) -> SortResult<Self> {
        splats.validate()?;
        kernels.validate()?;
        checked_index_len(splats.count)?;

        let padded_len = splats.count.max(1).next_power_of_two();
        let padded_len_u32 = u32::try_from(padded_len)
            .map_err(|_| SortError::TooManySplats { count: splats.count })?;
        let commands = encode_sort_commands(padded_len_u32);
        info!(
            padded_len,
            "bitonic sort will have {} passes",
            bitonic_pass_count(padded_len_u32)
        );

        let device: Box<dyn SortDevice> = match kind {
            GpuBackendKind::Emulated => Box::new(EmulatedDevice::new(splats.count, padded_len)),
            GpuBackendKind::Metal => create_metal_device(splats.count, padded_len, kernels)?,
            GpuBackendKind::Auto => match create_metal_device(splats.count, padded_len, kernels) {
                Ok(device) => device,
                Err(err) => {
                    warn!("Metal sort unavailable ({err}), falling back to the emulated device");
                    Box::new(EmulatedDevice::new(splats.count, padded_len))
                }
            },
        };
        debug!(device = device.name(), splat_count = splats.count, "created GPU sort pass");

        Ok(Self {
            device,
            commands,
            splat_count: splats.count,
            padded_len,
        })
    }

    pub fn device_name(&self) -> &'static str {
        self.device.name()
    }

    /// Length `L` of the compact arrays.
    pub fn padded_len(&self) -> usize {
        self.padded_len
    }

    pub fn commands(&self) -> &[SortCommand] {
        &self.commands
    }

    /// The padded `(ids, depths)` arrays as left by the last sort.
    pub fn read_compact(&self) -> SortResult<(Vec<u32>, Vec<f32>)> {
        self.device.read_compact()
    }
}

impl SortPass for GpuSortPass {
    fn name(&self) -> &'static str {
        "gpu"
    }

    fn sort_by_depth(&mut self, ctx: &mut SortCtx<'_>) -> SortResult<()> {
        validate_ctx(ctx)?;
        ensure_len("GPU sort buffers", self.splat_count, ctx.splats.count)?;
        if self.splat_count == 0 {
            return Ok(());
        }
        self.device.execute(
            &self.commands,
            &ctx.mvp,
            &ctx.splats.positions,
            ctx.indices.as_mut_slice(),
        )
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec3;
    use proptest::prelude::*;

    use super::*;
    use crate::camera::{look_at_target, Camera};
    use crate::demo::generate_demo_splats;
    use crate::sort::depth::{calc_depth, cmp_entries, depth_row, padding_depth, PADDING_ID};
    use crate::sort::naive::NaiveSortPass;
    use crate::sort::test_support::set_with_depths;
    use crate::splat::{IndexBuffer, VERTICES_PER_SPLAT};

    fn test_mvp() -> Mat4 {
        let mut camera = Camera::new(Vec3::new(1.5, 0.8, 4.0), 0.0, 0.0);
        look_at_target(&mut camera, Vec3::ZERO);
        camera.mvp(4.0 / 3.0)
    }

    fn emulated_pass(splats: &SplatSet) -> GpuSortPass {
        GpuSortPass::new(splats, GpuBackendKind::Emulated, &KernelSources::builtin()).unwrap()
    }

    fn sorted_with(pass: &mut dyn SortPass, splats: &SplatSet, mvp: Mat4) -> IndexBuffer {
        let mut indices = IndexBuffer::for_splats(splats).unwrap();
        pass.sort_by_depth(&mut SortCtx {
            mvp,
            splats,
            indices: &mut indices,
        })
        .unwrap();
        indices
    }

    #[test]
    fn stage_schedule_halves_j_and_doubles_k() {
        assert_eq!(
            bitonic_stages(8),
            vec![(1, 2), (2, 4), (1, 4), (4, 8), (2, 8), (1, 8)]
        );
        assert!(bitonic_stages(1).is_empty());
        for log in 0..=20u32 {
            let len = 1u32 << log;
            assert_eq!(bitonic_stages(len).len(), bitonic_pass_count(len));
        }
        assert_eq!(bitonic_pass_count(2048), 66);
    }

    #[test]
    fn commands_bracket_bitonic_passes() {
        let commands = encode_sort_commands(4);
        assert_eq!(
            commands,
            vec![
                SortCommand::CalcDepths,
                SortCommand::BitonicPass { j: 1, k: 2 },
                SortCommand::BitonicPass { j: 2, k: 4 },
                SortCommand::BitonicPass { j: 1, k: 4 },
                SortCommand::UnrollIndices,
            ]
        );
    }

    #[test]
    fn dispatch_grid_covers_every_item_once() {
        for (items, threads) in [(1029u32, 64u32), (2048, 8192), (64, 64), (1, 64), (325, 64)] {
            let grid = DispatchGrid::new(items, threads);
            let mut hits = vec![0u32; (grid.threads * grid.items_per_thread) as usize];
            for tid in 0..grid.threads {
                for idx in grid.thread_items(tid) {
                    hits[idx as usize] += 1;
                }
            }
            assert!(hits.iter().all(|&h| h == 1));
            assert!(hits.len() >= items as usize);
        }
    }

    #[test]
    fn empty_kernel_source_is_rejected() {
        let splats = set_with_depths(&[1.0]);
        let mut kernels = KernelSources::builtin();
        kernels.bitonic_sort = Cow::Borrowed("   ");
        let err = GpuSortPass::new(&splats, GpuBackendKind::Emulated, &kernels).unwrap_err();
        assert!(matches!(err, SortError::MissingKernelSource { kernel: "bitonic_sort" }));
    }

    #[cfg(not(all(feature = "metal", target_os = "macos")))]
    #[test]
    fn explicit_metal_without_feature_fails_and_auto_falls_back() {
        let splats = set_with_depths(&[1.0, 2.0]);
        let err = GpuSortPass::new(&splats, GpuBackendKind::Metal, &KernelSources::builtin())
            .unwrap_err();
        assert!(matches!(err, SortError::BackendUnavailable("Metal")));

        let pass = GpuSortPass::new(&splats, GpuBackendKind::Auto, &KernelSources::builtin()).unwrap();
        assert_eq!(pass.device_name(), "emulated");
    }

    #[test]
    fn non_power_of_two_scene_keeps_padding_out_of_the_index_buffer() {
        let splats = SplatSet::from_splats(&generate_demo_splats(1029, 11));
        let mvp = test_mvp();
        let mut pass = emulated_pass(&splats);
        assert_eq!(pass.padded_len(), 2048);

        let mut indices = IndexBuffer::for_splats(&splats).unwrap();
        pass.sort_by_depth(&mut SortCtx {
            mvp,
            splats: &splats,
            indices: &mut indices,
        })
        .unwrap();

        let (ids, depths) = pass.read_compact().unwrap();
        assert_eq!(ids.len(), 2048);
        assert_eq!(depths.len(), 2048);

        let mut seen = vec![false; 1029];
        for p in 0..1029 {
            let id = ids[p];
            assert!(id < 1029, "padding leaked into slot {p}");
            assert!(!seen[id as usize]);
            seen[id as usize] = true;
            if p > 0 {
                assert!(depths[p - 1] <= depths[p]);
            }
            let expected = calc_depth(depth_row(&mvp), splats.positions[id as usize]);
            assert!((depths[p] - expected).abs() <= 1e-6 * expected.abs().max(1.0));
        }
        for p in 1029..2048 {
            assert_eq!(ids[p], PADDING_ID);
            assert_eq!(depths[p].to_bits(), padding_depth().to_bits());
        }

        let max_index = (1029 * VERTICES_PER_SPLAT) as u32;
        assert!(indices.as_slice().iter().all(|&i| i < max_index));
        assert_eq!(indices.splat_order().collect::<Vec<_>>(), ids[..1029].to_vec());
    }

    #[test]
    fn agrees_with_naive_pass_exactly() {
        let splats = SplatSet::from_splats(&generate_demo_splats(777, 5));
        let mvp = test_mvp();

        let mut gpu_indices = IndexBuffer::for_splats(&splats).unwrap();
        emulated_pass(&splats)
            .sort_by_depth(&mut SortCtx {
                mvp,
                splats: &splats,
                indices: &mut gpu_indices,
            })
            .unwrap();

        let mut naive_indices = IndexBuffer::for_splats(&splats).unwrap();
        NaiveSortPass::new(splats.count)
            .sort_by_depth(&mut SortCtx {
                mvp,
                splats: &splats,
                indices: &mut naive_indices,
            })
            .unwrap();

        assert_eq!(gpu_indices, naive_indices);
    }

    #[test]
    fn ties_resolve_like_the_naive_pass() {
        let splats = set_with_depths(&[0.5, -0.3, 2.0, 0.5, 0.5]);
        let mut pass = emulated_pass(&splats);
        let mut indices = IndexBuffer::for_splats(&splats).unwrap();
        pass.sort_by_depth(&mut SortCtx {
            mvp: Mat4::IDENTITY,
            splats: &splats,
            indices: &mut indices,
        })
        .unwrap();
        assert_eq!(indices.splat_order().collect::<Vec<_>>(), vec![1, 0, 3, 4, 2]);
    }

    #[test]
    fn sorts_again_after_camera_moves() {
        let splats = set_with_depths(&[1.0, 2.0, 3.0]);
        let mut pass = emulated_pass(&splats);
        let mut indices = IndexBuffer::for_splats(&splats).unwrap();

        for (mvp, expected) in [
            (Mat4::IDENTITY, vec![0, 1, 2]),
            (Mat4::from_scale(Vec3::new(1.0, 1.0, -1.0)), vec![2, 1, 0]),
        ] {
            pass.sort_by_depth(&mut SortCtx {
                mvp,
                splats: &splats,
                indices: &mut indices,
            })
            .unwrap();
            assert_eq!(indices.splat_order().collect::<Vec<_>>(), expected);
        }
    }

    #[test]
    fn sorts_the_positions_of_the_current_frame() {
        let built_for = set_with_depths(&[1.0, 2.0, 3.0]);
        let moved = set_with_depths(&[3.0, 2.0, 1.0]);
        let mut pass = emulated_pass(&built_for);

        let gpu = sorted_with(&mut pass, &moved, Mat4::IDENTITY);
        let naive = sorted_with(&mut NaiveSortPass::new(3), &moved, Mat4::IDENTITY);
        assert_eq!(gpu.splat_order().collect::<Vec<_>>(), vec![2, 1, 0]);
        assert_eq!(gpu, naive);

        let (_, depths) = pass.read_compact().unwrap();
        assert_eq!(&depths[..3], &[1.0, 2.0, 3.0]);
    }

    #[test]
    fn matches_naive_around_powers_of_two() {
        let mvp = test_mvp();
        for count in [1, 2, 3, 5, 63, 64, 65, 1029, 4097] {
            let splats = SplatSet::from_splats(&generate_demo_splats(count, count as u64));
            let mut pass = emulated_pass(&splats);
            assert_eq!(pass.padded_len(), count.next_power_of_two());

            let gpu = sorted_with(&mut pass, &splats, mvp);
            let naive = sorted_with(&mut NaiveSortPass::new(count), &splats, mvp);
            assert_eq!(gpu, naive, "count {count}");
        }
    }

    #[test]
    fn non_finite_depths_stay_ahead_of_padding() {
        let depths = [
            f32::NAN,
            f32::NEG_INFINITY,
            f32::INFINITY,
            -f32::NAN,
            1.0,
            padding_depth(),
        ];
        let splats = set_with_depths(&depths);
        let mut pass = emulated_pass(&splats);
        assert_eq!(pass.padded_len(), 8);

        let gpu = sorted_with(&mut pass, &splats, Mat4::IDENTITY);
        let naive = sorted_with(&mut NaiveSortPass::new(6), &splats, Mat4::IDENTITY);
        assert_eq!(gpu, naive);

        let (ids, sorted_depths) = pass.read_compact().unwrap();
        let padding = (padding_depth(), PADDING_ID);
        for p in 0..6 {
            assert!(ids[p] < 6, "padding leaked into slot {p}");
            let entry = (sorted_depths[p], ids[p]);
            assert_eq!(cmp_entries(entry, padding), std::cmp::Ordering::Less, "slot {p}");
        }
        assert_eq!(&ids[6..], &[PADDING_ID, PADDING_ID]);
        for p in 1..8 {
            let prev = (sorted_depths[p - 1], ids[p - 1]);
            let next = (sorted_depths[p], ids[p]);
            assert_ne!(cmp_entries(prev, next), std::cmp::Ordering::Greater, "slot {p}");
        }

        let mut order: Vec<u32> = gpu.splat_order().collect();
        order.sort_unstable();
        assert_eq!(order, vec![0, 1, 2, 3, 4, 5]);
    }

    proptest! {
        #[test]
        fn agrees_with_naive_for_any_depths(
            depths in prop::collection::vec(
                prop_oneof![-1.0e3f32..1.0e3, Just(0.5f32), Just(-0.0f32), Just(0.0f32)],
                1..300,
            ),
        ) {
            let splats = set_with_depths(&depths);
            let mut pass = emulated_pass(&splats);
            let gpu = sorted_with(&mut pass, &splats, Mat4::IDENTITY);
            let naive = sorted_with(&mut NaiveSortPass::new(splats.count), &splats, Mat4::IDENTITY);
            prop_assert_eq!(gpu, naive);
        }

        #[test]
        fn agrees_with_naive_for_any_scene(count in 1usize..700, seed in any::<u64>()) {
            let splats = SplatSet::from_splats(&generate_demo_splats(count, seed));
            let mvp = test_mvp();
            let mut pass = emulated_pass(&splats);
            let gpu = sorted_with(&mut pass, &splats, mvp);
            let naive = sorted_with(&mut NaiveSortPass::new(count), &splats, mvp);
            prop_assert_eq!(gpu, naive);
        }
    }

    #[test]
    fn count_change_is_a_length_mismatch() {
        let splats = set_with_depths(&[1.0, 2.0, 3.0]);
        let mut pass = emulated_pass(&splats);
        let other = set_with_depths(&[1.0, 2.0]);
        let mut indices = IndexBuffer::for_splats(&other).unwrap();
        let err = pass
            .sort_by_depth(&mut SortCtx {
                mvp: Mat4::IDENTITY,
                splats: &other,
                indices: &mut indices,
            })
            .unwrap_err();
        assert!(matches!(err, SortError::LengthMismatch { .. }));
    }

    #[test]
    fn empty_scene_is_noop() {
        let splats = set_with_depths(&[]);
        let mut pass = emulated_pass(&splats);
        assert_eq!(pass.padded_len(), 1);
        let mut indices = IndexBuffer::for_splats(&splats).unwrap();
        pass.sort_by_depth(&mut SortCtx {
            mvp: Mat4::IDENTITY,
            splats: &splats,
            indices: &mut indices,
        })
        .unwrap();
        assert!(indices.is_empty());
    }
}
