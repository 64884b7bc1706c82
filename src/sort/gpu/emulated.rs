use glam::{Mat4, Vec4};
use rayon::prelude::*;

use super::kernels::{bitonic_block, calc_depth_entry, unroll_quad};
use super::{SortCommand, SortDevice};
use crate::error::{ensure_len, SortResult};
use crate::sort::depth::{depth_row, padding_depth, PADDING_ID};
use crate::splat::VERTICES_PER_SPLAT;

/// Host device that runs the recorded kernel schedule with rayon. Each
/// command completes before the next one starts, like consecutive compute
/// encoders on one command buffer.
#[derive(Debug)]
pub struct EmulatedDevice {
    splat_count: usize,
    ids: Vec<u32>,
    depths: Vec<f32>,
}

impl EmulatedDevice {
    pub fn new(splat_count: usize, padded_len: usize) -> Self {
        Self {
            splat_count,
            ids: vec![PADDING_ID; padded_len],
            depths: vec![padding_depth(); padded_len],
        }
    }

    fn calc_depths(&mut self, mvp: &Mat4, positions: &[Vec4]) {
        let row = depth_row(mvp);
        let splat_count = self.splat_count;
        self.depths
            .par_iter_mut()
            .zip(self.ids.par_iter_mut())
            .enumerate()
            .for_each(|(idx, (depth, id))| {
                (*depth, *id) = calc_depth_entry(idx, splat_count, row, positions);
            });
    }

    fn bitonic_pass(&mut self, j: u32, k: u32) {
        let span = 2 * j as usize;
        self.depths
            .par_chunks_mut(span)
            .zip(self.ids.par_chunks_mut(span))
            .enumerate()
            .for_each(|(block, (depths, ids))| {
                bitonic_block((block * span) as u32, j, k, depths, ids);
            });
    }

    fn unroll(&self, indices: &mut [u32]) {
        indices
            .par_chunks_exact_mut(VERTICES_PER_SPLAT)
            .zip(self.ids[..self.splat_count].par_iter())
            .for_each(|(quad, &id)| unroll_quad(id, quad));
    }
}

impl SortDevice for EmulatedDevice {
    fn name(&self) -> &'static str {
        "emulated"
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
        for command in commands {
            match *command {
                SortCommand::CalcDepths => self.calc_depths(mvp, positions),
                SortCommand::BitonicPass { j, k } => self.bitonic_pass(j, k),
                SortCommand::UnrollIndices => self.unroll(indices),
            }
        }
        Ok(())
    }

    fn read_compact(&self) -> SortResult<(Vec<u32>, Vec<f32>)> {
        Ok((self.ids.clone(), self.depths.clone()))
    }
}
