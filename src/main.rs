use std::time::{Duration, Instant};

use clap::Parser;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use splatsort::camera::{self, Camera};
use splatsort::demo::generate_demo_splats;
use splatsort::{
    GpuBackendKind, IndexBuffer, KernelSources, SortCtx, SortMethod, SortOrchestrator, SplatSet,
};

type AppResult<T> = Result<T, Box<dyn std::error::Error>>;

#[derive(Debug, Parser)]
#[command(
    name = "splatsort",
    version,
    about = "Orbit a procedural splat scene and depth-sort it every frame"
)]
struct Cli {
    #[arg(long, value_enum, default_value_t = SortMethod::Gpu, help = "Sorting strategy")]
    method: SortMethod,
    #[arg(long, value_enum, default_value_t = GpuBackendKind::Auto, help = "Device for the GPU strategy")]
    backend: GpuBackendKind,
    #[arg(long, value_name = "N", default_value_t = 100_000, help = "Number of splats")]
    count: usize,
    #[arg(long, value_name = "N", default_value_t = 120, help = "Frames to sort")]
    frames: u32,
    #[arg(long, default_value_t = 42, help = "Scene seed")]
    seed: u64,
    #[arg(long, help = "Check every frame against the naive sort")]
    verify: bool,
}

#[derive(Debug, Default)]
struct FrameStats {
    frames: u32,
    total: Duration,
    min: Option<Duration>,
    max: Duration,
    mismatched_frames: u32,
}

impl FrameStats {
    fn record(&mut self, elapsed: Duration) {
        self.frames += 1;
        self.total += elapsed;
        self.min = Some(self.min.map_or(elapsed, |min| min.min(elapsed)));
        self.max = self.max.max(elapsed);
    }

    fn mean_ms(&self) -> f64 {
        if self.frames == 0 {
            return 0.0;
        }
        self.total.as_secs_f64() * 1000.0 / f64::from(self.frames)
    }
}

/// Counting sort only promises bin order, so it is checked for a bijection.
fn is_bijection(indices: &IndexBuffer, count: usize) -> bool {
    let mut seen = vec![false; count];
    for id in indices.splat_order() {
        match seen.get_mut(id as usize) {
            Some(slot) if !*slot => *slot = true,
            _ => return false,
        }
    }
    seen.into_iter().all(|s| s)
}

fn main() -> AppResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    info!(
        method = %cli.method,
        backend = %cli.backend,
        count = cli.count,
        seed = cli.seed,
        "generating demo scene"
    );

    let splats = SplatSet::from_splats(&generate_demo_splats(cli.count, cli.seed));
    let mut sorter = SortOrchestrator::new(&splats, cli.backend, &KernelSources::builtin())?;
    let mut indices = IndexBuffer::for_splats(&splats)?;
    let mut reference = if cli.verify {
        Some(IndexBuffer::for_splats(&splats)?)
    } else {
        None
    };

    let center = splats.center();
    let radius = match splats.bounds() {
        Some((min, max)) => ((max - min).length() * 0.75).max(1.0),
        None => 5.0,
    };
    let mut camera = Camera::new(center + glam::Vec3::new(0.0, 0.0, radius), 0.0, 0.0);
    camera::look_at_target(&mut camera, center);

    let mut stats = FrameStats::default();
    for frame in 0..cli.frames {
        let angle = frame as f32 * std::f32::consts::TAU / cli.frames.max(1) as f32;
        camera::orbit(&mut camera, center, radius, angle, radius * 0.25);
        let mvp = camera.mvp(16.0 / 9.0);

        let start = Instant::now();
        sorter.sort(
            cli.method,
            &mut SortCtx {
                mvp,
                splats: &splats,
                indices: &mut indices,
            },
        )?;
        let elapsed = start.elapsed();
        stats.record(elapsed);
        debug!(frame, elapsed_ms = elapsed.as_secs_f64() * 1000.0, "sorted frame");

        if let Some(reference) = reference.as_mut() {
            let matches = match cli.method {
                SortMethod::Counting => is_bijection(&indices, splats.count),
                SortMethod::Gpu | SortMethod::Naive => {
                    sorter.sort(
                        SortMethod::Naive,
                        &mut SortCtx {
                            mvp,
                            splats: &splats,
                            indices: &mut *reference,
                        },
                    )?;
                    indices == *reference
                }
            };
            if !matches {
                warn!(frame, method = %cli.method, "index buffer disagrees with the reference");
                stats.mismatched_frames += 1;
            }
        }
    }

    info!(
        method = %cli.method,
        device = sorter.gpu().device_name(),
        frames = stats.frames,
        draw_count = indices.draw_count(),
        mean_ms = stats.mean_ms(),
        min_ms = stats.min.unwrap_or_default().as_secs_f64() * 1000.0,
        max_ms = stats.max.as_secs_f64() * 1000.0,
        "sorting finished"
    );

    if stats.mismatched_frames > 0 {
        return Err(format!(
            "{} of {} frames failed verification",
            stats.mismatched_frames, stats.frames
        )
        .into());
    }
    if cli.verify {
        info!("all frames verified");
    }
    Ok(())
}
