use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Local};
use clap::{Args, Parser, Subcommand};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use dial::config::{load_face_config, FaceConfig};
use dial::demo::DemoFace;
use dial::gpu::wgpu_backend::{GpuContext, WgpuBackend};
use dial::gpu::GpuBackend;
use dial::program::ProgramSource;
use dial::scheduler::{Clock, ManualClock, Scheduler};

#[derive(Debug, Parser)]
#[command(name = "dial")]
#[command(version)]
#[command(about = "Render and check GPU-composited watch faces")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Render frames of the demonstration face to PNG files.
    Render(RenderArgs),
    /// Compile a WGSL vertex/fragment pair and report errors.
    CheckShader(CheckShaderArgs),
}

#[derive(Debug, Args)]
struct RenderArgs {
    /// Face config (YAML).
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    width: Option<u32>,
    #[arg(long)]
    height: Option<u32>,
    #[arg(long, default_value_t = 1)]
    frames: u32,
    /// Simulated milliseconds between frames.
    #[arg(long = "step-ms", default_value_t = 1000)]
    step_ms: u64,
    /// Wall-clock time of the first frame (RFC 3339); defaults to now.
    #[arg(long)]
    start: Option<String>,
    /// Render in ambient mode.
    #[arg(long)]
    ambient: bool,
    /// Draw the hour hand on a 24-hour dial.
    #[arg(long = "24-hour")]
    twenty_four_hour: bool,
    #[arg(short = 'o', long = "out")]
    out: PathBuf,
}

#[derive(Debug, Args)]
struct CheckShaderArgs {
    #[arg(long)]
    vertex: PathBuf,
    #[arg(long)]
    fragment: PathBuf,
    /// Extra scalar uniform the program reads; repeatable.
    #[arg(long = "param")]
    params: Vec<String>,
}

fn main() -> Result<()> {
    init_tracing();
    debug!(
        git = option_env!("DIAL_GIT_HASH").unwrap_or("unknown"),
        "dial {}",
        env!("CARGO_PKG_VERSION")
    );

    let cli = Cli::parse();
    match cli.command {
        Commands::Render(args) => run_render(&args),
        Commands::CheckShader(args) => run_check_shader(&args),
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("DIAL_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn run_render(args: &RenderArgs) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => load_face_config(path)?,
        None => FaceConfig::default(),
    };
    if let Some(width) = args.width {
        config.surface.width = width;
    }
    if let Some(height) = args.height {
        config.surface.height = height;
    }
    config.validate()?;
    if args.frames == 0 {
        bail!("--frames must be > 0");
    }

    let start = match &args.start {
        Some(text) => DateTime::parse_from_rfc3339(text)
            .with_context(|| format!("invalid --start time '{text}'"))?
            .with_timezone(&Local),
        None => Local::now(),
    };

    fs::create_dir_all(&args.out)
        .with_context(|| format!("failed to create output directory {}", args.out.display()))?;

    let (width, height) = (config.surface.width, config.surface.height);
    let context = pollster::block_on(GpuContext::request())?;
    let max = context.device.limits().max_texture_dimension_2d;
    if width > max || height > max {
        bail!("surface {}x{} exceeds the device texture limit {}", width, height, max);
    }
    let backend = WgpuBackend::new(context, width, height)?;

    let clock = Arc::new(ManualClock::new(start));
    let mut scheduler = Scheduler::new(
        config.scheduler,
        DemoFace::new(config.demo),
        Arc::clone(&clock) as Arc<dyn Clock>,
    );
    scheduler.on_surface_created(backend, width, height);
    if args.twenty_four_hour {
        scheduler.on_24_hour_preference_changed(true);
    }
    if args.ambient {
        scheduler.on_ambient_mode_changed(true);
    }
    scheduler.on_visibility_changed(true);
    // Headless frames are paced by the loop below, not by a timer.
    scheduler.start_presenting_with_update_rate(Duration::ZERO, false);

    let step = Duration::from_millis(args.step_ms);
    for frame_index in 0..args.frames {
        if frame_index > 0 {
            clock.advance(step);
            scheduler.on_time_tick();
        }
        scheduler.take_redraw_request();
        let stats = scheduler
            .on_draw()
            .ok_or_else(|| anyhow!("renderer is not ready"))?;
        debug!(frame_index, ?stats, "frame drawn");

        let compositor = scheduler
            .compositor_mut()
            .ok_or_else(|| anyhow!("renderer is not ready"))?;
        let rgba = compositor.gpu_mut().read_rgba()?;
        let path = args.out.join(format!("frame_{frame_index:04}.png"));
        write_png(&path, width, height, rgba)?;

        if frame_index % 10 == 0 {
            eprintln!("rendered frame {}/{}", frame_index + 1, args.frames);
        }
    }

    scheduler.destroy();
    println!("Wrote {} frame(s) to {}", args.frames, args.out.display());
    Ok(())
}

fn run_check_shader(args: &CheckShaderArgs) -> Result<()> {
    let vertex = fs::read_to_string(&args.vertex)
        .with_context(|| format!("failed to read vertex shader {}", args.vertex.display()))?;
    let fragment = fs::read_to_string(&args.fragment)
        .with_context(|| format!("failed to read fragment shader {}", args.fragment.display()))?;

    let label = args
        .fragment
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "program".to_owned());
    let source = args
        .params
        .iter()
        .fold(ProgramSource::new(label, vertex, fragment), |source, name| {
            source.with_param(name.clone())
        });

    let context = pollster::block_on(GpuContext::request())?;
    let mut backend = WgpuBackend::new(context, 1, 1)?;
    let program = backend.create_program(&source)?;
    backend.delete_program(program);

    info!(program = %source.label, "program compiled");
    println!("OK: {} ({} uniform(s))", source.label, source.params.len());
    Ok(())
}

/// Writes premultiplied RGBA as a straight-alpha PNG.
fn write_png(path: &Path, width: u32, height: u32, mut rgba: Vec<u8>) -> Result<()> {
    for pixel in rgba.chunks_exact_mut(4) {
        let alpha = pixel[3];
        if alpha != 0 && alpha != 255 {
            for channel in &mut pixel[..3] {
                *channel = ((u16::from(*channel) * 255 + u16::from(alpha) / 2) / u16::from(alpha))
                    .min(255) as u8;
            }
        }
    }

    let image = image::RgbaImage::from_raw(width, height, rgba)
        .ok_or_else(|| anyhow!("frame buffer does not match {}x{}", width, height))?;
    image
        .save(path)
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}
