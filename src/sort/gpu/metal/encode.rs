use std::{ffi::c_void, mem};

use glam::Mat4;
use metal::{ComputePipelineState, MTLSize};

use crate::error::SortResult;
use crate::sort::depth::depth_row;
use crate::sort::gpu::{
    DispatchGrid, SortCommand, BITONIC_THREADS, BITONIC_WORKGROUP_SIZE, CALC_DEPTHS_THREADS,
    UNROLL_THREADS,
};
use crate::splat::VERTICES_PER_SPLAT;

use super::types::{BitonicParams, CalcDepthsParams, UnrollParams};
use super::MetalSortBackend;

pub fn div_ceil_u32(value: u32, divisor: u32) -> u32 {
    value.div_ceil(divisor)
}

pub fn dispatch_1d(encoder: &metal::ComputeCommandEncoderRef, count: u32, threads_per_group: u32) {
    if count == 0 {
        return;
    }

    let groups = u64::from(div_ceil_u32(count, threads_per_group));
    encoder.dispatch_thread_groups(
        MTLSize::new(groups, 1, 1),
        MTLSize::new(u64::from(threads_per_group), 1, 1),
    );
}

pub(super) fn set_params<T: bytemuck::Pod>(
    encoder: &metal::ComputeCommandEncoderRef,
    index: u64,
    params: &T,
) {
    encoder.set_bytes(
        index,
        mem::size_of::<T>() as u64,
        params as *const T as *const c_void,
    );
}

/// Threadgroup width for `pipeline`, capped by what the device allows.
fn group_width(pipeline: &ComputePipelineState, wanted: u32) -> u32 {
    let max = pipeline.max_total_threads_per_threadgroup();
    u32::try_from(max).map_or(wanted, |max| wanted.min(max).max(1))
}

impl MetalSortBackend {
    /// Records one command as its own compute encoder. Encoder boundaries
    /// order the passes on the queue.
    pub(super) fn encode_command(
        &self,
        command_buffer: &metal::CommandBufferRef,
        command: SortCommand,
        mvp: &Mat4,
    ) -> SortResult<()> {
        let padded_len = u32::try_from(self.padded_len)?;
        let splat_count = u32::try_from(self.splat_count)?;
        let encoder = command_buffer.new_compute_command_encoder();

        match command {
            SortCommand::CalcDepths => {
                let grid = DispatchGrid::new(padded_len, CALC_DEPTHS_THREADS);
                let params = CalcDepthsParams {
                    depth_row: depth_row(mvp).extend(0.0).to_array(),
                    splat_count,
                    padded_len,
                    thread_count: grid.threads,
                    items_per_thread: grid.items_per_thread,
                };
                encoder.set_compute_pipeline_state(&self.calc_depths_pipeline);
                encoder.set_buffer(0, Some(&self.positions_buffer), 0);
                encoder.set_buffer(1, Some(&self.depths_buffer), 0);
                encoder.set_buffer(2, Some(&self.ids_buffer), 0);
                set_params(encoder, 3, &params);
                dispatch_1d(
                    encoder,
                    grid.threads,
                    group_width(&self.calc_depths_pipeline, CALC_DEPTHS_THREADS),
                );
            }
            SortCommand::BitonicPass { j, k } => {
                let grid = DispatchGrid::new(padded_len, BITONIC_THREADS);
                let params = BitonicParams {
                    j,
                    k,
                    padded_len,
                    thread_count: grid.threads,
                    items_per_thread: grid.items_per_thread,
                };
                encoder.set_compute_pipeline_state(&self.bitonic_pipeline);
                encoder.set_buffer(0, Some(&self.depths_buffer), 0);
                encoder.set_buffer(1, Some(&self.ids_buffer), 0);
                set_params(encoder, 2, &params);
                dispatch_1d(
                    encoder,
                    grid.threads,
                    group_width(&self.bitonic_pipeline, BITONIC_WORKGROUP_SIZE),
                );
            }
            SortCommand::UnrollIndices => {
                let grid = DispatchGrid::new(splat_count, UNROLL_THREADS);
                let params = UnrollParams {
                    splat_count,
                    thread_count: grid.threads,
                    items_per_thread: grid.items_per_thread,
                    vertices_per_splat: VERTICES_PER_SPLAT as u32,
                };
                encoder.set_compute_pipeline_state(&self.unroll_pipeline);
                encoder.set_buffer(0, Some(&self.ids_buffer), 0);
                encoder.set_buffer(1, Some(&self.indices_buffer), 0);
                set_params(encoder, 2, &params);
                dispatch_1d(
                    encoder,
                    grid.threads,
                    group_width(&self.unroll_pipeline, UNROLL_THREADS),
                );
            }
        }

        encoder.end_encoding();
        Ok(())
    }
}
