//! Collaborator interfaces and the live capture -> composite -> project loop

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::compositor::Compositor;
use crate::draw::draw_grid;
use crate::error::Result;
use crate::frame::{Dimensions, Frame};
use crate::slot::TimestampedFrame;

/// Shared stop flag checked once per loop iteration
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Camera-side collaborator
pub trait FrameSource {
    fn start(&mut self) -> Result<()>;
    fn stop(&mut self);
    /// Independent copy of the newest captured frame
    fn read_latest(&self) -> Result<TimestampedFrame>;
}

/// Projector-side collaborator
pub trait DisplaySink {
    fn dimensions(&self) -> Dimensions;
    fn present(&mut self, frame: &Frame) -> Result<()>;
}

/// Draws content for one frame of the live loop onto a blank canvas
pub trait ContentGenerator {
    fn draw(&mut self, camera: &Frame, canvas: &mut Frame);
}

/// Receives each presented frame mapped back into camera coordinates
pub trait FrameAnalyzer {
    fn analyze(&mut self, unwarped: &Frame);
}

/// Demo content: a grid covering the whole canvas
#[derive(Debug, Clone)]
pub struct GridOverlay {
    pub rows: u32,
    pub cols: u32,
    pub color: [u8; 3],
}

impl Default for GridOverlay {
    fn default() -> Self {
        Self {
            rows: 8,
            cols: 8,
            color: [255, 255, 255],
        }
    }
}

impl ContentGenerator for GridOverlay {
    fn draw(&mut self, _camera: &Frame, canvas: &mut Frame) {
        draw_grid(canvas, self.rows, self.cols, self.color);
    }
}

/// Loop pacing and reporting
#[derive(Debug, Clone)]
pub struct LoopOptions {
    /// Sleep between polls when no new camera frame has arrived
    pub idle_wait: Duration,
    pub stats_interval: Duration,
}

impl Default for LoopOptions {
    fn default() -> Self {
        Self {
            idle_wait: Duration::from_millis(2),
            stats_interval: Duration::from_secs(10),
        }
    }
}

/// Run until `stop` fires. Returns the number of frames presented.
///
/// A frame source error ends the loop and is returned to the caller; the
/// loop never renders from a stale or missing camera frame.
pub fn run_render_loop<S, D>(
    source: &S,
    compositor: &Compositor,
    display: &mut D,
    content: &mut dyn ContentGenerator,
    mut analyzer: Option<&mut dyn FrameAnalyzer>,
    stop: &StopSignal,
    options: &LoopOptions,
) -> Result<u64>
where
    S: FrameSource + ?Sized,
    D: DisplaySink + ?Sized,
{
    info!(
        "Starting render loop: {} surface(s) onto {}",
        compositor.surfaces().len(),
        compositor.output_dimensions()
    );

    let mut presented = 0u64;
    let mut window_frames = 0u64;
    let mut window_start = Instant::now();
    let mut last_capture: Option<Instant> = None;

    loop {
        if stop.is_triggered() {
            info!("Render loop stopped after {} frames", presented);
            return Ok(presented);
        }

        let latest = source.read_latest()?;
        if last_capture == Some(latest.captured_at) {
            std::thread::sleep(options.idle_wait);
            continue;
        }
        last_capture = Some(latest.captured_at);

        let mut canvas = compositor.empty_frame();
        content.draw(&latest.frame, &mut canvas);

        let composite = compositor.render_through_surfaces(&canvas)?;
        display.present(&composite)?;

        if let Some(analyzer) = analyzer.as_deref_mut() {
            let unwarped = compositor.unwarp(&composite, latest.frame.dimensions())?;
            analyzer.analyze(&unwarped);
        }

        presented += 1;
        window_frames += 1;

        if window_start.elapsed() >= options.stats_interval {
            let elapsed = window_start.elapsed().as_secs_f64();
            info!(
                "Performance: {:.1} fps ({} frames in {:.1}s)",
                window_frames as f64 / elapsed,
                window_frames,
                elapsed
            );
            window_frames = 0;
            window_start = Instant::now();
        } else if presented % 100 == 0 {
            debug!("Presented {} frames", presented);
        }
    }
}
