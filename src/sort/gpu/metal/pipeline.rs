use std::mem;

use glam::Vec4;
use metal::{Buffer, CompileOptions, ComputePipelineState, Device, Library, MTLResourceOptions};
use tracing::debug;

use crate::error::{SortError, SortResult};
use crate::sort::gpu::KernelSources;
use crate::splat::checked_index_len;

use super::MetalSortBackend;

impl MetalSortBackend {
    pub fn new(splat_count: usize, padded_len: usize, kernels: &KernelSources) -> SortResult<Self> {
        let device = Device::system_default().ok_or(SortError::NoDevice)?;
        let command_queue = device.new_command_queue();

        let calc_depths_library = compile_library(&device, &kernels.calc_depths)?;
        let bitonic_library = compile_library(&device, &kernels.bitonic_sort)?;
        let unroll_library = compile_library(&device, &kernels.unroll_indices)?;

        let calc_depths_pipeline = create_pipeline(&device, &calc_depths_library, "calc_depths")?;
        let bitonic_pipeline = create_pipeline(&device, &bitonic_library, "bitonic_sort")?;
        let unroll_pipeline = create_pipeline(&device, &unroll_library, "unroll_indices")?;

        let positions_buffer = new_shared_buffer(&device, bytes_for_elems::<Vec4>(splat_count)?);
        let depths_buffer = new_shared_buffer(&device, bytes_for_elems::<f32>(padded_len)?);
        let ids_buffer = new_shared_buffer(&device, bytes_for_elems::<u32>(padded_len)?);
        let indices_buffer = new_shared_buffer(
            &device,
            bytes_for_elems::<u32>(checked_index_len(splat_count)?)?,
        );

        debug!(
            device = device.name(),
            splat_count,
            padded_len,
            "created Metal sort buffers"
        );

        Ok(Self {
            device,
            command_queue,
            calc_depths_pipeline,
            bitonic_pipeline,
            unroll_pipeline,
            positions_buffer,
            depths_buffer,
            ids_buffer,
            indices_buffer,
            splat_count,
            padded_len,
            disabled: false,
        })
    }
}

/// Compiles with fast math off so the depth `fma` chain matches the host.
pub(super) fn compile_library(device: &Device, source: &str) -> SortResult<Library> {
    let options = CompileOptions::new();
    options.set_fast_math_enabled(false);
    device
        .new_library_with_source(source, &options)
        .map_err(SortError::Device)
}

pub(super) fn create_pipeline(
    device: &Device,
    library: &Library,
    function_name: &str,
) -> SortResult<ComputePipelineState> {
    let function = library
        .get_function(function_name, None)
        .map_err(SortError::Device)?;

    device
        .new_compute_pipeline_state_with_function(&function)
        .map_err(SortError::Device)
}

pub(super) fn new_shared_buffer(device: &Device, size_bytes: usize) -> Buffer {
    device.new_buffer(
        size_bytes.max(mem::size_of::<u32>()) as u64,
        MTLResourceOptions::StorageModeShared,
    )
}

pub(super) fn bytes_for_elems<T>(count: usize) -> SortResult<usize> {
    count
        .checked_mul(mem::size_of::<T>())
        .ok_or_else(|| SortError::Device("buffer size overflow".to_string()))
}

/// Copies the first `len` elements out of a shared buffer.
pub(super) fn read_shared_slice<T: bytemuck::Pod>(buffer: &Buffer, len: usize) -> Vec<T> {
    if len == 0 {
        return Vec::new();
    }
    let src = buffer.contents() as *const T;
    unsafe { std::slice::from_raw_parts(src, len) }.to_vec()
}

/// Overwrites the head of a shared buffer. The caller sized the buffer for
/// at least `src.len()` elements and no command buffer is in flight.
pub(super) fn write_shared<T: bytemuck::Pod>(buffer: &Buffer, src: &[T]) {
    if src.is_empty() {
        return;
    }
    let dst = buffer.contents() as *mut T;
    unsafe { std::slice::from_raw_parts_mut(dst, src.len()) }.copy_from_slice(src);
}

/// Copies the head of a shared buffer into `dst` without an intermediate
/// allocation.
pub(super) fn read_shared_into<T: bytemuck::Pod>(buffer: &Buffer, dst: &mut [T]) {
    if dst.is_empty() {
        return;
    }
    let src = buffer.contents() as *const T;
    dst.copy_from_slice(unsafe { std::slice::from_raw_parts(src, dst.len()) });
}
