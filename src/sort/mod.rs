//! Per-frame depth ordering of splats.
//!
//! Every pass rewrites the whole index buffer so the indexed draw visits
//! splats in ascending depth key order, ties by ascending id.

pub mod counting;
pub mod depth;
pub mod gpu;
pub mod naive;
pub mod unroll;

use std::fmt;
use std::str::FromStr;

use glam::Mat4;
use tracing::debug;

use crate::error::SortResult;
use crate::splat::{IndexBuffer, SplatSet};

pub use counting::CountingSortPass;
pub use gpu::{GpuBackendKind, GpuSortPass, KernelSources};
pub use naive::NaiveSortPass;

/// Which pass orders the splats this frame.
///
/// All three produce ascending depth key order, nearest splat first. The
/// renderer composites front to back with blend factors
/// `src = one-minus-dst-alpha`, `dst = one`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum SortMethod {
    /// Bitonic network on the device.
    #[default]
    Gpu,
    /// 65536-bin counting sort on the host.
    Counting,
    /// Exact comparison sort on the host.
    Naive,
}

impl SortMethod {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Gpu => "gpu",
            Self::Counting => "counting",
            Self::Naive => "naive",
        }
    }
}

impl fmt::Display for SortMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SortMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "gpu" => Ok(Self::Gpu),
            "counting" => Ok(Self::Counting),
            "naive" => Ok(Self::Naive),
            other => Err(format!("unknown sort method '{other}'")),
        }
    }
}

/// Inputs and output of one sort: the frame's MVP, the scene, and the index
/// buffer that gets overwritten.
pub struct SortCtx<'a> {
    pub mvp: Mat4,
    pub splats: &'a SplatSet,
    pub indices: &'a mut IndexBuffer,
}

pub trait SortPass {
    fn name(&self) -> &'static str;

    fn sort_by_depth(&mut self, ctx: &mut SortCtx<'_>) -> SortResult<()>;
}

pub(crate) fn validate_ctx(ctx: &SortCtx<'_>) -> SortResult<()> {
    ctx.splats.validate()?;
    ctx.indices.ensure_matches(ctx.splats.count)
}

/// Holds one instance of every pass and runs the one selected for the frame.
#[derive(Debug)]
pub struct SortOrchestrator {
    gpu: GpuSortPass,
    counting: CountingSortPass,
    naive: NaiveSortPass,
}

impl SortOrchestrator {
    pub fn new(splats: &SplatSet, backend: GpuBackendKind, kernels: &KernelSources) -> SortResult<Self> {
        Ok(Self {
            gpu: GpuSortPass::new(splats, backend, kernels)?,
            counting: CountingSortPass::new(splats.count),
            naive: NaiveSortPass::new(splats.count),
        })
    }

    pub fn sort(&mut self, method: SortMethod, ctx: &mut SortCtx<'_>) -> SortResult<()> {
        let pass: &mut dyn SortPass = match method {
            SortMethod::Gpu => &mut self.gpu,
            SortMethod::Counting => &mut self.counting,
            SortMethod::Naive => &mut self.naive,
        };
        debug!(pass = pass.name(), splat_count = ctx.splats.count, "sorting");
        pass.sort_by_depth(ctx)
    }

    pub fn gpu(&self) -> &GpuSortPass {
        &self.gpu
    }

    pub fn counting(&self) -> &CountingSortPass {
        &self.counting
    }

    pub fn naive(&self) -> &NaiveSortPass {
        &self.naive
    }
}
