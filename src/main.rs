//! projmap - projection mapping driven by a camera
//!
//! `calibrate` walks the operator through marking surfaces from the web
//! console and saves the result. `run` loads a saved calibration and keeps
//! the projector fed with content mapped onto those surfaces.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::Arc;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use projmap::calibration::{MarkerStyle, SurfaceCalibrator};
use projmap::capture::V4lCamera;
use projmap::config::Config;
use projmap::output::LoopbackProjector;
use projmap::pipeline::{GridOverlay, LoopOptions};
use projmap::server::{self, AppState, MirroredDisplay};
use projmap::{run_render_loop, Compositor, FrameSource, MappingError, StopSignal};

/// projmap - map projected content onto physical surfaces
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, Clone)]
enum Command {
    /// Mark surfaces interactively and save the calibration
    Calibrate {
        /// Number of surfaces to calibrate
        #[arg(long)]
        surfaces: Option<usize>,

        /// Where to write the calibration document
        #[arg(long)]
        save_to: Option<PathBuf>,
    },
    /// Project content through a saved calibration
    Run {
        /// Calibration document to load
        #[arg(long)]
        calibration: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let _subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .compact()
        .init();

    info!("projmap v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::load_or_create(&args.config)?;
    info!(
        "Camera {} {}x{} @ {}fps, projector {} {}",
        config.video.input_device,
        config.video.width,
        config.video.height,
        config.video.fps,
        config.projector.output_device,
        config.projector.dimensions()
    );

    let calibration_file = match &args.command {
        Command::Calibrate { save_to, .. } => save_to.clone(),
        Command::Run { calibration } => calibration.clone(),
    }
    .unwrap_or_else(|| config.calibration.file.clone());

    let state = Arc::new(AppState::new(calibration_file.clone(), config.projector.dimensions()));
    let stop = StopSignal::new();

    let ctrl_c_stop = stop.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, stopping...");
            ctrl_c_stop.trigger();
        }
    });

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let server_state = state.clone();
    let server_handle = tokio::spawn(async move { server::run_server(&addr, server_state).await });

    let worker_state = state.clone();
    let worker_stop = stop.clone();
    let command = args.command.clone();
    let worker_handle = tokio::task::spawn_blocking(move || match command {
        Command::Calibrate { surfaces, .. } => {
            let count = surfaces.unwrap_or(config.calibration.surfaces).max(1);
            calibrate(&config, &worker_state, &worker_stop, count, &calibration_file)
        }
        Command::Run { .. } => project(&config, &worker_state, &worker_stop, &calibration_file),
    });

    tokio::select! {
        result = worker_handle => {
            match result {
                Ok(Ok(())) => info!("Finished"),
                Ok(Err(e)) => error!("{:#}", e),
                Err(e) => error!("Worker task panicked: {}", e),
            }
        }
        result = server_handle => {
            stop.trigger();
            match result {
                Ok(Ok(())) => info!("Server exited normally"),
                Ok(Err(e)) => error!("Server error: {:#}", e),
                Err(e) => error!("Server task panicked: {}", e),
            }
        }
    }

    Ok(())
}

/// Interactive calibration of `count` surfaces, saved to `path`
fn calibrate(config: &Config, state: &Arc<AppState>, stop: &StopSignal, count: usize, path: &Path) -> Result<()> {
    let mut camera = V4lCamera::new(config.video.clone());
    camera.start().context("Failed to start camera")?;

    let projector = LoopbackProjector::new(&config.projector.output_device, config.projector.dimensions());
    let mut display = MirroredDisplay::new(projector, state.clone());

    let (tx, rx) = mpsc::channel();
    state.attach_pointer(tx);
    let finish = state.finish_signal();
    finish.reset();

    info!("Calibrating {} surface(s); open the console to begin", count);
    let result = SurfaceCalibrator::new(&camera, &mut display, &**state, rx, stop.clone())
        .with_style(MarkerStyle::from(&config.calibration))
        .with_poll_interval(config.calibration.poll_interval())
        .create_surfaces(count, &finish);

    state.detach_pointer();
    camera.stop();

    let surfaces = match result {
        Ok(surfaces) => surfaces,
        Err(MappingError::Cancelled) => {
            warn!("Calibration cancelled, nothing saved");
            return Ok(());
        }
        Err(e) => return Err(e).context("Calibration failed"),
    };

    let compositor = Compositor::with_surfaces(config.projector.dimensions(), surfaces);
    compositor
        .save_calibration(path)
        .with_context(|| format!("Failed to save calibration to {:?}", path))?;
    Ok(())
}

/// Live loop: grid content mapped through the saved surfaces
fn project(config: &Config, state: &Arc<AppState>, stop: &StopSignal, path: &Path) -> Result<()> {
    let mut compositor = Compositor::new(config.projector.dimensions());
    compositor
        .load_calibration(path)
        .with_context(|| format!("Failed to load calibration from {:?}", path))?;

    let mut camera = V4lCamera::new(config.video.clone());
    camera.start().context("Failed to start camera")?;

    let projector = LoopbackProjector::new(&config.projector.output_device, config.projector.dimensions());
    let mut display = MirroredDisplay::new(projector, state.clone());

    let result = run_render_loop(
        &camera,
        &compositor,
        &mut display,
        &mut GridOverlay::default(),
        None,
        stop,
        &LoopOptions::default(),
    );
    camera.stop();

    let presented = result.context("Render loop failed")?;
    info!("Presented {} frames", presented);
    Ok(())
}
