//! Metal device for the GPU sort.

mod encode;
mod pipeline;
mod sync;
mod types;

use std::time::Duration;

use glam::{Mat4, Vec4};
use metal::{Buffer, CommandQueue, ComputePipelineState, Device};
use objc::rc::autoreleasepool;
use tracing::warn;

use super::{SortCommand, SortDevice};
use crate::error::{ensure_len, SortError, SortResult};
use crate::splat::VERTICES_PER_SPLAT;

use pipeline::{read_shared_into, read_shared_slice, write_shared};
use sync::commit_and_wait_with_timeout;

const SORT_WAIT_TIMEOUT: Duration = Duration::from_secs(2);

pub struct MetalSortBackend {
    pub(super) device: Device,
    pub(super) command_queue: CommandQueue,

    pub(super) calc_depths_pipeline: ComputePipelineState,
    pub(super) bitonic_pipeline: ComputePipelineState,
    pub(super) unroll_pipeline: ComputePipelineState,

    pub(super) positions_buffer: Buffer,
    pub(super) depths_buffer: Buffer,
    pub(super) ids_buffer: Buffer,
    pub(super) indices_buffer: Buffer,

    pub(super) splat_count: usize,
    pub(super) padded_len: usize,
    pub(super) disabled: bool,
}

impl std::fmt::Debug for MetalSortBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetalSortBackend")
            .field("device", &self.device.name())
            .field("splat_count", &self.splat_count)
            .field("padded_len", &self.padded_len)
            .field("disabled", &self.disabled)
            .finish()
    }
}

impl MetalSortBackend {
    fn run(&self, commands: &[SortCommand], mvp: &Mat4) -> SortResult<()> {
        let command_buffer = self.command_queue.new_command_buffer();
        for &command in commands {
            self.encode_command(command_buffer, command, mvp)?;
        }
        commit_and_wait_with_timeout(command_buffer, "depth sort", SORT_WAIT_TIMEOUT)
    }
}

impl SortDevice for MetalSortBackend {
    fn name(&self) -> &'static str {
        "metal"
    }

    fn execute(
        &mut self,
        commands: &[SortCommand],
        mvp: &Mat4,
        positions: &[Vec4],
        indices: &mut [u32],
    ) -> SortResult<()> {
        ensure_len("positions", self.splat_count, positions.len())?;
        ensure_len(
            "unrolled index buffer",
            self.splat_count * VERTICES_PER_SPLAT,
            indices.len(),
        )?;
        if self.disabled {
            return Err(SortError::Device(
                "Metal sort is disabled after an earlier device failure".to_string(),
            ));
        }

        // The previous frame was waited on, so the shared buffers are idle.
        write_shared(&self.positions_buffer, positions);

        autoreleasepool(|| {
            if let Err(err) = self.run(commands, mvp) {
                if err.is_device_fault() {
                    warn!("disabling Metal sort: {err}");
                    self.disabled = true;
                }
                return Err(err);
            }

            read_shared_into(&self.indices_buffer, indices);
            Ok(())
        })
    }

    fn read_compact(&self) -> SortResult<(Vec<u32>, Vec<f32>)> {
        Ok((
            read_shared_slice(&self.ids_buffer, self.padded_len),
            read_shared_slice(&self.depths_buffer, self.padded_len),
        ))
    }
}
