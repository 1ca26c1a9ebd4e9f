mod demo;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};

use animanode_core::hash::hash_frames;
use animanode_core::{AnimaConfig, BackendKind, ExportFormat, PacingKind};
use animanode_encode::{
    ExportSink, FfmpegEncoder, FrameCollector, PngSequenceEncoder, SinkConfig,
};
use animanode_ir::Timeline;
use animanode_render::{
    compile_with_stats, FrameScheduler, GpuBackend, GpuContext, RenderTarget, SchedulerConfig,
    SoftwareBackend, TextureDesc, WgpuBackend,
};

#[derive(Parser)]
#[command(
    name = "animanode",
    version,
    about = "AnimaNode: keyframe animation rendered on the GPU and streamed to video"
)]
struct Cli {
    /// Project configuration file
    #[arg(short, long, global = true, default_value = "animanode.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render the demo scene and export it
    Render {
        /// Output file (mp4) or directory (png); overrides export.output
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Export format; overrides export.format
        #[arg(short, long)]
        format: Option<FormatArg>,

        /// Render backend; overrides render.backend
        #[arg(long)]
        backend: Option<BackendArg>,

        /// Frame rate; overrides project.fps
        #[arg(long)]
        fps: Option<f64>,

        /// Number of frames (default: the whole animation)
        #[arg(long)]
        frames: Option<u64>,

        /// Pace frames against the wall clock, as a live preview would
        #[arg(long, conflicts_with = "unpaced")]
        realtime: bool,

        /// Advance simulated time by measured render time instead of 1/fps
        #[arg(long)]
        unpaced: bool,
    },

    /// Print the evaluated demo scene at a point in time
    Inspect {
        /// Simulated time in seconds
        #[arg(short, long, default_value_t = 0.0)]
        time: f64,
    },

    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Display version and backend info
    Info,
}

#[derive(Clone, Copy, ValueEnum)]
enum FormatArg {
    Mp4,
    Png,
    None,
}

impl From<FormatArg> for ExportFormat {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::Mp4 => ExportFormat::Mp4,
            FormatArg::Png => ExportFormat::Png,
            FormatArg::None => ExportFormat::None,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum BackendArg {
    Software,
    Wgpu,
}

impl From<BackendArg> for BackendKind {
    fn from(arg: BackendArg) -> Self {
        match arg {
            BackendArg::Software => BackendKind::Software,
            BackendArg::Wgpu => BackendKind::Wgpu,
        }
    }
}

struct RenderArgs {
    output: Option<PathBuf>,
    format: Option<FormatArg>,
    backend: Option<BackendArg>,
    fps: Option<f64>,
    frames: Option<u64>,
    realtime: bool,
    unpaced: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Config first: its log level seeds the filter when RUST_LOG is unset.
    let config = load_config(&cli.config)?;
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level)),
        )
        .init();

    match cli.command {
        Commands::Render {
            output,
            format,
            backend,
            fps,
            frames,
            realtime,
            unpaced,
        } => run_async(cmd_render(
            config,
            RenderArgs {
                output,
                format,
                backend,
                fps,
                frames,
                realtime,
                unpaced,
            },
        )),
        Commands::Inspect { time } => cmd_inspect(&config, time),
        Commands::Init { force } => cmd_init(&cli.config, force),
        Commands::Info => cmd_info(),
    }
}

fn run_async<F>(future: F) -> Result<()>
where
    F: std::future::Future<Output = Result<()>>,
{
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to initialize async runtime")?;
    runtime.block_on(future)
}

/// Load `path` if it exists, otherwise fall back to defaults.
fn load_config(path: &Path) -> Result<AnimaConfig> {
    if !path.exists() {
        return Ok(AnimaConfig::default());
    }
    AnimaConfig::load_from_file(path)
        .with_context(|| format!("failed to load config: {}", path.display()))
}

fn create_backend(kind: BackendKind) -> Result<Arc<dyn GpuBackend>> {
    Ok(match kind {
        BackendKind::Software => Arc::new(SoftwareBackend::new()),
        BackendKind::Wgpu => Arc::new(
            WgpuBackend::new().context("no usable GPU adapter (try --backend software)")?,
        ),
    })
}

async fn cmd_render(mut config: AnimaConfig, args: RenderArgs) -> Result<()> {
    let start = Instant::now();

    if let Some(output) = args.output {
        config.export.output = output.to_string_lossy().into_owned();
    }
    if let Some(format) = args.format {
        config.export.format = format.into();
    }
    if let Some(backend) = args.backend {
        config.render.backend = backend.into();
    }
    if let Some(fps) = args.fps {
        config.project.fps = fps;
    }
    if args.realtime {
        config.render.pacing = PacingKind::WallClock;
    }
    config.validate().context("invalid render settings")?;

    let fps = config.project.fps;
    let (width, height) = (config.project.width, config.project.height);
    let backend = create_backend(config.render.backend)?;
    let resources = demo::resources(backend.as_ref())?;
    let graph = demo::scene(width, height)?;
    let timeline = Timeline::new();
    let frames = args
        .frames
        .unwrap_or_else(|| timeline.frame_count(&graph, fps));

    println!("🎬 AnimaNode v{}", env!("CARGO_PKG_VERSION"));
    println!("   Project:  {}", config.project.name);
    println!("   Canvas:   {}x{} @ {} fps", width, height, fps);
    println!("   Backend:  {}", backend.name());
    println!("   Frames:   {}", frames);

    let sink_config = SinkConfig::from(&config.export);
    let output = PathBuf::from(&config.export.output);
    let mut collected = None;
    let sink = match config.export.format {
        ExportFormat::Mp4 => {
            if !FfmpegEncoder::is_available() {
                anyhow::bail!("ffmpeg was not found on PATH; install it or use --format png");
            }
            if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("failed to create output directory: {}", parent.display())
                })?;
            }
            ExportSink::new(FfmpegEncoder::new(&output, fps), sink_config)?
        }
        ExportFormat::Png => ExportSink::new(PngSequenceEncoder::new(&output), sink_config)?,
        ExportFormat::None => {
            let (collector, frames) = FrameCollector::new();
            collected = Some(frames);
            ExportSink::new(collector, sink_config)?
        }
    };

    let mut scheduler = FrameScheduler::new(
        backend,
        resources,
        SchedulerConfig::from_config(&config)?,
    )
    .with_timeline(timeline)
    .with_sink(sink);

    let stop = scheduler.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted; finishing frames already on the GPU");
            stop.stop();
        }
    });

    let pacing = if args.unpaced { None } else { Some(fps) };
    let summary = scheduler
        .render_range(&graph, pacing, frames)
        .await
        .context("render failed")?;

    println!(
        "   ✓ {} frames delivered, {} dropped, {} cancelled (run {})",
        summary.frames_delivered,
        summary.frames_dropped,
        summary.frames_cancelled,
        summary.run_id
    );
    if let Some(report) = &summary.sink {
        if let Some(path) = &report.summary.output {
            println!(
                "   ✓ {} frames written to {} ({} bytes)",
                report.summary.frames,
                path.display(),
                report.summary.bytes_written
            );
        }
        if report.gaps_skipped > 0 {
            println!("   ⚠️ {} frames missing from the output", report.gaps_skipped);
        }
    }
    if let Some(frames) = collected {
        println!("   Content hash: {}", hash_frames(&frames.frames()));
    }
    println!(
        "   ⚡ Simulated {:.2}s in {:.2}s",
        summary.simulated_time,
        start.elapsed().as_secs_f64()
    );
    Ok(())
}

fn cmd_inspect(config: &AnimaConfig, time: f64) -> Result<()> {
    let backend = SoftwareBackend::new();
    let resources = demo::resources(&backend)?;
    let graph = demo::scene(config.project.width, config.project.height)?;
    let frame = Timeline::new().evaluate(&graph, time);

    println!("t = {}s, {} nodes", frame.time, frame.len());
    println!("fingerprint {}", frame.fingerprint());
    for node in frame.nodes() {
        let origin = node.world.translation_part();
        println!(
            "  #{:<3} parent {:<5} z {:<5} opacity {:.3} visible {:<5} at ({:.1}, {:.1}){}",
            node.id.raw(),
            node.parent
                .map_or_else(|| "-".to_string(), |p| p.raw().to_string()),
            node.z,
            node.material.opacity,
            node.visible,
            origin.x,
            origin.y,
            node.renderable
                .as_ref()
                .map(|r| format!(" {} '{}'", r.payload.kind_name(), r.material))
                .unwrap_or_default()
        );
    }

    let target = RenderTarget {
        texture: backend.create_texture(&TextureDesc::render_target(
            config.project.width,
            config.project.height,
        ))?,
        width: config.project.width,
        height: config.project.height,
        clear: config.project.background_color()?,
    };
    let (commands, stats) = compile_with_stats(&frame, &resources, &target)?;
    println!(
        "{} commands: {} draws ({} opaque, {} transparent), {} instances, {} state changes",
        commands.len(),
        stats.draws,
        stats.opaque,
        stats.transparent,
        stats.instances,
        stats.state_changes()
    );
    Ok(())
}

fn cmd_init(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        anyhow::bail!(
            "'{}' already exists (use --force to overwrite)",
            path.display()
        );
    }
    let mut config = AnimaConfig::default();
    if let Some(name) = std::env::current_dir()
        .ok()
        .and_then(|d| d.file_name().map(|n| n.to_string_lossy().into_owned()))
    {
        config.project.name = name;
    }
    config
        .save_to_file(path)
        .with_context(|| format!("failed to write {}", path.display()))?;
    println!("✓ Wrote {}", path.display());
    Ok(())
}

fn cmd_info() -> Result<()> {
    println!("🎬 AnimaNode");
    println!("   Version:   {}", env!("CARGO_PKG_VERSION"));
    println!("   Backends:  software (always), wgpu (headless)");
    match GpuContext::init() {
        Ok(ctx) => {
            let info = ctx.adapter.get_info();
            println!("   GPU:       {} ({:?})", info.name, info.backend);
        }
        Err(e) => println!("   GPU:       unavailable ({})", e),
    }
    println!(
        "   FFmpeg:    {}",
        if FfmpegEncoder::is_available() {
            "available ✓"
        } else {
            "NOT FOUND ✗"
        }
    );
    Ok(())
}
