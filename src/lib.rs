//! Per-frame depth ordering for Gaussian splat rendering.
//!
//! A [`SortOrchestrator`] owns three passes that all rewrite the same
//! per-vertex [`IndexBuffer`]: a bitonic sort on the device, a 65536-bin
//! counting sort on the host, and an exact comparison sort kept as the
//! reference.

pub mod camera;
pub mod demo;
pub mod error;
pub mod sort;
pub mod splat;

pub use error::{SortError, SortResult};
pub use sort::{
    GpuBackendKind, GpuSortPass, KernelSources, SortCtx, SortMethod, SortOrchestrator, SortPass,
};
pub use splat::{IndexBuffer, Splat, SplatSet, VERTICES_PER_SPLAT};
