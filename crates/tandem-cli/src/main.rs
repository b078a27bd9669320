use anyhow::{bail, Context, Result};
use clap::Parser;
use glam::{Affine2, Vec2};
use std::path::PathBuf;
use tandem_core::{
    BlendMode, CaptureSubject, CaptureTarget, Color, ColorMatrix, Compositor, FrameOutcome,
    HeadlessSurface, ImageData, ImageTexture, InitialWindow, NodeId, Paint, RenderConfig,
    SceneGraph, WindowDescriptor,
};
use tracing::{error, info, warn};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Number of producer frames to run
    #[arg(long, default_value_t = 120)]
    frames: u32,

    /// Render inline on the calling thread instead of a render thread
    #[arg(long)]
    sync: bool,

    /// JSON render configuration
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Write a capture of the root view to this PNG after the last frame
    #[arg(long, value_name = "PNG")]
    capture: Option<PathBuf>,

    /// Image shown in the demo scene (a generated gradient when omitted)
    #[arg(long, value_name = "FILE")]
    image: Option<PathBuf>,

    #[arg(long, default_value_t = 640)]
    width: u32,

    #[arg(long, default_value_t = 360)]
    height: u32,

    /// Print frame statistics as JSON on stdout
    #[arg(long)]
    stats: bool,

    /// Default log level; `RUST_LOG` directives take precedence
    #[arg(long, default_value = "info")]
    log_level: LevelFilter,

    /// One JSON object per log line, e.g. for collecting frame timings
    #[arg(long)]
    log_json: bool,
}

/// Nodes of the demo scene the frame loop animates.
struct DemoScene {
    root: NodeId,
    spinner: NodeId,
    badge_dot: NodeId,
}

fn build_scene(scene: &mut SceneGraph, width: f32, height: f32, image: ImageData) -> Result<DemoScene> {
    let root = scene.create_view();
    scene.set_size(root, Vec2::new(width, height))?;

    let background = scene.create_paint(Paint::rectangle(Color::from_rgba8(24, 28, 40, 255)));
    scene.set_size(background, Vec2::new(width, height))?;
    scene.set_order(background, -1.0)?;
    scene.add_child(root, background)?;

    let picture = scene.create_image(Some(ImageTexture::new(image)));
    scene.set_position(picture, Vec2::new(24.0, 24.0))?;
    scene.set_size(picture, Vec2::new(160.0, 120.0))?;
    scene.add_child(root, picture)?;

    // A nested view shown twice through view references.
    let badge = scene.create_view();
    scene.set_size(badge, Vec2::splat(96.0))?;
    let plate = scene.create_paint(
        Paint::ellipse(Color::from_rgba8(240, 180, 40, 255)).with_outline(Color::WHITE, 3.0),
    );
    scene.set_size(plate, Vec2::splat(96.0))?;
    scene.add_child(badge, plate)?;
    let badge_dot = scene.create_paint(Paint::rectangle(Color::from_rgba8(200, 40, 60, 255)));
    scene.set_size(badge_dot, Vec2::splat(24.0))?;
    scene.set_order(badge_dot, 1.0)?;
    scene.add_child(badge, badge_dot)?;

    let left = scene.create_canvas_view(Some(badge))?;
    scene.set_size(left, Vec2::splat(96.0))?;
    scene.set_position(left, Vec2::new(width * 0.5, 24.0))?;
    scene.add_child(root, left)?;

    let right = scene.create_canvas_view(Some(badge))?;
    scene.set_size(right, Vec2::splat(96.0))?;
    scene.set_position(right, Vec2::new(width * 0.5 + 120.0, 24.0))?;
    scene.set_color_transform(right, ColorMatrix::scale(0.4, 0.8, 1.0, 1.0))?;
    scene.set_transparency(right, 0.75)?;
    scene.add_child(root, right)?;

    // A spinning bar cut by a circular mask.
    let spinner = scene.create_paint(Paint::rectangle(Color::from_rgba8(60, 200, 140, 255)));
    scene.set_size(spinner, Vec2::new(200.0, 40.0))?;
    scene.set_position(spinner, Vec2::new(width * 0.5, height * 0.65))?;
    scene.set_blend_mode(spinner, BlendMode::Screen)?;
    let mask = scene.create_paint(Paint::ellipse(Color::WHITE));
    scene.set_size(mask, Vec2::new(160.0, 160.0))?;
    scene.set_position(mask, Vec2::new(20.0, -60.0))?;
    scene.set_mask(spinner, Some(mask))?;
    scene.add_child(root, spinner)?;

    Ok(DemoScene {
        root,
        spinner,
        badge_dot,
    })
}

fn gradient(width: u32, height: u32) -> ImageData {
    let mut pixels = Vec::with_capacity((width * height * 4) as usize);
    for y in 0..height {
        for x in 0..width {
            pixels.extend_from_slice(&[
                (x * 255 / width.max(1)) as u8,
                (y * 255 / height.max(1)) as u8,
                160,
                255,
            ]);
        }
    }
    ImageData::from_pixels(width, height, tandem_core::PixelFormat::RGBA8, pixels)
        .unwrap_or_else(|_| ImageData::solid(width, height, Color::WHITE))
}

fn animate(scene: &mut SceneGraph, demo: &DemoScene, frame: u32) -> Result<()> {
    let t = frame as f32 / 60.0;
    let pivot = Vec2::new(100.0, 20.0);
    let spin = Affine2::from_translation(pivot)
        * Affine2::from_angle(t * std::f32::consts::TAU * 0.25)
        * Affine2::from_translation(-pivot);
    scene.set_transform(demo.spinner, spin)?;
    let dot_x = 36.0 + 30.0 * (t * 3.0).sin();
    scene.set_position(demo.badge_dot, Vec2::new(dot_x, 36.0))?;
    Ok(())
}

fn run(cli: Cli) -> Result<()> {
    let mut config = match &cli.config {
        Some(path) => RenderConfig::from_json_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => RenderConfig::default(),
    };
    if cli.sync {
        config.async_rendering = false;
    }
    info!(async_rendering = config.async_rendering, frames = cli.frames, "Starting tandem");

    let image = match &cli.image {
        Some(path) => ImageData::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => gradient(160, 120),
    };

    let mut compositor = Compositor::new(config);
    let (surface, probe) = HeadlessSurface::new();
    let window = compositor
        .init(Some(InitialWindow::new(
            surface,
            WindowDescriptor::new(cli.width, cli.height, "tandem"),
        )))?
        .context("initial window was not created")?;

    let demo = build_scene(
        &mut compositor.scene,
        cli.width as f32,
        cli.height as f32,
        image,
    )?;
    compositor.set_window_root(window, Some(demo.root))?;
    let capture = cli
        .capture
        .as_ref()
        .map(|_| compositor.add_capture(CaptureSubject::View(demo.root)));

    let mut frame = 0;
    while frame < cli.frames {
        animate(&mut compositor.scene, &demo, frame)?;
        if compositor.end_frame()? == FrameOutcome::Synchronized {
            frame += 1;
        }
        if compositor.thread().last_frame_failed() {
            warn!(frame, "Render thread reported a failed frame");
        }
    }

    if let (Some(path), Some(id)) = (&cli.capture, capture) {
        if let Some(canvas) = compositor.capture_mut(id) {
            canvas.request_capture(CaptureTarget::rgba8(cli.width, cli.height))?;
        }
        // Requested at one sync, read back by the next frame, delivered at the sync after.
        for _ in 0..3 {
            compositor.synchronize()?;
        }
        let image = compositor
            .capture_mut(id)
            .and_then(|c| c.take_image())
            .context("capture did not complete")?;
        image.save_png(path)?;
        info!(path = %path.display(), "Capture written");
    }

    let stats = compositor.stats();
    info!(
        frames = compositor.frames(),
        skipped = compositor.skipped_frames(),
        presented = probe.presented_frames(),
        fps = compositor.thread().fps(),
        "Finished"
    );
    if cli.stats {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    }
    compositor.cleanup();
    if stats.failed_frames > 0 {
        bail!("{} frames failed to render", stats.failed_frames);
    }
    Ok(())
}

/// Logs go to stderr so `--stats` output on stdout stays machine readable.
/// Render thread events keep their thread name to tell the two loops apart.
fn init_logging(level: LevelFilter, json: bool) {
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();
    let builder = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_thread_names(true)
        .with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.compact().init();
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_level, cli.log_json);

    if let Err(e) = run(cli) {
        error!("{e:#}");
        std::process::exit(1);
    }
}
