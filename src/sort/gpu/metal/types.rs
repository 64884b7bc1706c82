use bytemuck::{Pod, Zeroable};

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct CalcDepthsParams {
    pub depth_row: [f32; 4],
    pub splat_count: u32,
    pub padded_len: u32,
    pub thread_count: u32,
    pub items_per_thread: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct BitonicParams {
    pub j: u32,
    pub k: u32,
    pub padded_len: u32,
    pub thread_count: u32,
    pub items_per_thread: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct UnrollParams {
    pub splat_count: u32,
    pub thread_count: u32,
    pub items_per_thread: u32,
    pub vertices_per_splat: u32,
}

const _: [(); 32] = [(); std::mem::size_of::<CalcDepthsParams>()];
const _: [(); 20] = [(); std::mem::size_of::<BitonicParams>()];
const _: [(); 16] = [(); std::mem::size_of::<UnrollParams>()];
