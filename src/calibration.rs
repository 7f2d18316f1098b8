//! Interactive surface calibration
//!
//! A surface is calibrated in two phases. First the operator steers a cross
//! on the projector by moving the pointer over the live camera view and
//! clicks four corners of a flat region. Then each of those four projector
//! points is shown again and the operator clicks where it appears in the
//! camera view. The resulting correspondences become a [`Surface`].
//!
//! Pointer events arrive on a channel owned by the calibrator. While waiting
//! for them the calibrator keeps refreshing the camera view, so the operator
//! always clicks on a live image.

use std::collections::VecDeque;
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::CalibrationConfig;
use crate::draw::{draw_cross, draw_polygon_outline};
use crate::error::{MappingError, Result};
use crate::frame::{Depth, Dimensions, Frame, Point2D};
use crate::pipeline::{DisplaySink, FrameSource, StopSignal};
use crate::surface::Surface;
use crate::transform::validate_quad;

const PROJECTOR_PHASE_PROMPT: &str = "Move the pointer over the camera view: a cross follows it on the \
projector. Put the cross on a corner of a flat surface and click. Repeat for the other three corners, \
going around the surface in order.";

const CAMERA_PHASE_PROMPT: &str = "A cross is now projected on each corner you picked, one at a time. \
Click on the cross where you see it in the camera view.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PointerKind {
    Move,
    Down,
    Up,
}

/// A pointer event in camera-view pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PointerEvent {
    pub kind: PointerKind,
    pub x: f64,
    pub y: f64,
}

impl PointerEvent {
    pub fn new(kind: PointerKind, x: f64, y: f64) -> Self {
        Self { kind, x, y }
    }
}

/// What the operator looks at and reads while calibrating
pub trait CalibrationView {
    fn show_camera(&self, frame: &Frame);
    fn show_projector(&self, frame: &Frame);
    fn prompt(&self, text: &str);
}

/// Marker appearance on the projector
#[derive(Debug, Clone)]
pub struct MarkerStyle {
    pub color: [u8; 3],
    pub cross_size: f64,
    pub cross_thickness: u32,
    pub outline_thickness: u32,
}

impl Default for MarkerStyle {
    fn default() -> Self {
        Self {
            color: [255, 255, 255],
            cross_size: 30.0,
            cross_thickness: 3,
            outline_thickness: 6,
        }
    }
}

impl From<&CalibrationConfig> for MarkerStyle {
    fn from(cfg: &CalibrationConfig) -> Self {
        Self {
            color: cfg.marker_color,
            cross_size: cfg.marker_size,
            cross_thickness: cfg.marker_thickness,
            outline_thickness: cfg.outline_thickness,
        }
    }
}

/// Result of feeding one event to a point collector
#[derive(Debug)]
pub enum Step<C> {
    /// Still waiting; continue with the returned collector
    Pending(C),
    /// All four points recorded, in click order
    Complete([Point2D; 4]),
}

/// Projector-point phase: `WaitingForPoint(i)` is a collector with `i`
/// placed points. The collector is consumed when the fourth point lands.
#[derive(Debug, Clone)]
pub struct ProjectorPointCollector {
    camera: Dimensions,
    projector: Dimensions,
    placed: Vec<Point2D>,
    cursor: Option<Point2D>,
}

impl ProjectorPointCollector {
    pub fn new(camera: Dimensions, projector: Dimensions) -> Self {
        Self {
            camera,
            projector,
            placed: Vec::with_capacity(4),
            cursor: None,
        }
    }

    /// Index of the point the next click will record
    pub fn waiting_for(&self) -> usize {
        self.placed.len()
    }

    pub fn placed(&self) -> &[Point2D] {
        &self.placed
    }

    pub fn cursor(&self) -> Option<Point2D> {
        self.cursor
    }

    /// Stretch a camera-view position to projector pixels
    pub fn to_projector(&self, x: f64, y: f64) -> Point2D {
        let sx = self.projector.width as f64 / self.camera.width.max(1) as f64;
        let sy = self.projector.height as f64 / self.camera.height.max(1) as f64;
        Point2D::new((sx * x).floor(), (sy * y).floor())
    }

    pub fn handle(mut self, event: PointerEvent) -> Step<Self> {
        let point = self.to_projector(event.x, event.y);
        match event.kind {
            PointerKind::Move | PointerKind::Up => {
                self.cursor = Some(point);
                Step::Pending(self)
            }
            PointerKind::Down => {
                self.cursor = Some(point);
                self.placed.push(point);
                debug!("Projector point {} at ({}, {})", self.placed.len() - 1, point.x, point.y);
                match <[Point2D; 4]>::try_from(self.placed.as_slice()) {
                    Ok(points) => Step::Complete(points),
                    Err(_) => Step::Pending(self),
                }
            }
        }
    }

    /// Cross at the cursor and an outline through placed points and the cursor
    pub fn render(&self, canvas: &mut Frame, style: &MarkerStyle) {
        let Some(cursor) = self.cursor else {
            return;
        };
        draw_cross(canvas, cursor, style.color, style.cross_size, style.cross_thickness);

        let mut outline = self.placed.clone();
        outline.push(cursor);
        draw_polygon_outline(canvas, &outline, style.color, style.outline_thickness);
    }
}

/// Camera-point phase: one click per projector point, in order
#[derive(Debug, Clone)]
pub struct CameraPointCollector {
    projector_points: [Point2D; 4],
    recorded: Vec<Point2D>,
}

impl CameraPointCollector {
    pub fn new(projector_points: [Point2D; 4]) -> Self {
        Self {
            projector_points,
            recorded: Vec::with_capacity(4),
        }
    }

    pub fn waiting_for(&self) -> usize {
        self.recorded.len()
    }

    /// Projector point the operator is currently locating
    pub fn target(&self) -> Point2D {
        self.projector_points[self.recorded.len().min(3)]
    }

    pub fn handle(mut self, event: PointerEvent) -> Step<Self> {
        if event.kind != PointerKind::Down {
            return Step::Pending(self);
        }

        let point = Point2D::new(event.x, event.y);
        debug!("Camera point {} at ({}, {})", self.recorded.len(), point.x, point.y);
        self.recorded.push(point);
        match <[Point2D; 4]>::try_from(self.recorded.as_slice()) {
            Ok(points) => Step::Complete(points),
            Err(_) => Step::Pending(self),
        }
    }

    pub fn render(&self, canvas: &mut Frame, style: &MarkerStyle) {
        draw_cross(canvas, self.target(), style.color, style.cross_size, style.cross_thickness);
    }
}

/// Drives the two calibration phases against live collaborators
pub struct SurfaceCalibrator<'a, S: FrameSource + ?Sized, D: DisplaySink + ?Sized> {
    source: &'a S,
    display: &'a mut D,
    view: &'a dyn CalibrationView,
    events: Receiver<PointerEvent>,
    pending: VecDeque<PointerEvent>,
    style: MarkerStyle,
    poll_interval: Duration,
    stop: StopSignal,
    /// Ends the surface in progress once a session has a completed surface
    finish: Option<StopSignal>,
}

impl<'a, S: FrameSource + ?Sized, D: DisplaySink + ?Sized> SurfaceCalibrator<'a, S, D> {
    pub fn new(
        source: &'a S,
        display: &'a mut D,
        view: &'a dyn CalibrationView,
        events: Receiver<PointerEvent>,
        stop: StopSignal,
    ) -> Self {
        Self {
            source,
            display,
            view,
            events,
            pending: VecDeque::new(),
            style: MarkerStyle::default(),
            poll_interval: Duration::from_millis(10),
            stop,
            finish: None,
        }
    }

    pub fn with_style(mut self, style: MarkerStyle) -> Self {
        self.style = style;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Calibrate up to `count` surfaces.
    ///
    /// Once at least one surface is complete, triggering `finish` ends the
    /// session: a half-collected surface is dropped and the completed ones
    /// are returned.
    pub fn create_surfaces(&mut self, count: usize, finish: &StopSignal) -> Result<Vec<Surface>> {
        let mut surfaces = Vec::with_capacity(count);
        let result = loop {
            if surfaces.len() >= count {
                break Ok(());
            }
            if finish.is_triggered() && !surfaces.is_empty() {
                info!("Calibration finished by operator");
                break Ok(());
            }

            match self.create_surface() {
                Ok(surface) => {
                    surfaces.push(surface);
                    info!("Surface {} of {} calibrated", surfaces.len(), count);
                    self.finish = Some(finish.clone());
                }
                Err(MappingError::Cancelled) if self.finish_requested() => {
                    info!(
                        "Calibration finished by operator, discarding surface {} in progress",
                        surfaces.len() + 1
                    );
                    break Ok(());
                }
                Err(e) => break Err(e),
            }
        };

        self.finish = None;
        result.map(|()| surfaces)
    }

    fn finish_requested(&self) -> bool {
        !self.stop.is_triggered() && self.finish.as_ref().is_some_and(StopSignal::is_triggered)
    }

    /// Run both phases, restarting a phase whose points are degenerate
    pub fn create_surface(&mut self) -> Result<Surface> {
        let projector_points = loop {
            self.view.prompt(PROJECTOR_PHASE_PROMPT);
            let points = self.collect_projector_points()?;
            match validate_quad(&points) {
                Ok(()) => break points,
                Err(e) => warn!("Discarding projector points, restarting phase: {}", e),
            }
        };

        loop {
            self.view.prompt(CAMERA_PHASE_PROMPT);
            let camera_points = self.collect_camera_points(&projector_points)?;
            match Surface::new(camera_points, projector_points) {
                Ok(surface) => {
                    let blank = Frame::zeros(self.display.dimensions(), Depth::Rgb);
                    self.present(&blank)?;
                    return Ok(surface);
                }
                Err(MappingError::DegenerateGeometry(reason)) => {
                    warn!("Discarding camera points, restarting phase: {}", reason)
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Phase A: four projector-space points picked with a live cursor
    pub fn collect_projector_points(&mut self) -> Result<[Point2D; 4]> {
        let camera = self.refresh_camera_view()?;
        let projector = self.display.dimensions();
        info!(
            "Collecting projector points (camera {}, projector {})",
            camera, projector
        );

        let mut collector = ProjectorPointCollector::new(camera, projector);
        self.present(&Frame::zeros(projector, Depth::Rgb))?;

        loop {
            let Some(event) = self.next_event()? else {
                continue;
            };
            match collector.handle(event) {
                Step::Pending(next) => collector = next,
                Step::Complete(points) => {
                    info!("Projector points complete: {:?}", points);
                    return Ok(points);
                }
            }

            // Redraw once the queued events are consumed
            if self.pending.is_empty() {
                let mut canvas = Frame::zeros(projector, Depth::Rgb);
                collector.render(&mut canvas, &self.style);
                self.present(&canvas)?;
            }
        }
    }

    /// Phase B: the camera-space location of each projector point
    pub fn collect_camera_points(&mut self, projector_points: &[Point2D; 4]) -> Result<[Point2D; 4]> {
        let projector = self.display.dimensions();
        let mut collector = CameraPointCollector::new(*projector_points);
        let mut shown = None;

        loop {
            if shown != Some(collector.waiting_for()) {
                let mut canvas = Frame::zeros(projector, Depth::Rgb);
                collector.render(&mut canvas, &self.style);
                self.present(&canvas)?;
                shown = Some(collector.waiting_for());
            }

            let Some(event) = self.next_event()? else {
                continue;
            };
            match collector.handle(event) {
                Step::Pending(next) => collector = next,
                Step::Complete(points) => {
                    info!("Camera points complete: {:?}", points);
                    return Ok(points);
                }
            }
        }
    }

    fn present(&mut self, frame: &Frame) -> Result<()> {
        self.display.present(frame)?;
        self.view.show_projector(frame);
        Ok(())
    }

    /// Push the newest camera frame to the view, returning its size
    fn refresh_camera_view(&self) -> Result<Dimensions> {
        let latest = self.source.read_latest()?;
        self.view.show_camera(&latest.frame);
        Ok(latest.frame.dimensions())
    }

    /// Next pointer event, if one arrives within the poll interval.
    ///
    /// Each wait refreshes the camera view first. Events that arrive
    /// together are queued so a completed phase never swallows clicks
    /// meant for the next one.
    fn next_event(&mut self) -> Result<Option<PointerEvent>> {
        if self.stop.is_triggered() || self.finish_requested() {
            return Err(MappingError::Cancelled);
        }
        if let Some(event) = self.pending.pop_front() {
            return Ok(Some(event));
        }
        self.refresh_camera_view()?;

        match self.events.recv_timeout(self.poll_interval) {
            Ok(event) => {
                self.pending.extend(self.events.try_iter());
                Ok(Some(event))
            }
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => {
                warn!("Pointer event channel closed during calibration");
                Err(MappingError::Cancelled)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::testing::{RecordingSink, ScriptedSource};
    use parking_lot::Mutex;
    use std::sync::mpsc;

    #[derive(Default)]
    struct RecordingView {
        camera_frames: Mutex<usize>,
        prompts: Mutex<Vec<String>>,
        /// Operator presses "finish" when the n-th prompt is shown
        finish_on_prompt: Option<(usize, StopSignal)>,
    }

    impl CalibrationView for RecordingView {
        fn show_camera(&self, _frame: &Frame) {
            *self.camera_frames.lock() += 1;
        }

        fn show_projector(&self, _frame: &Frame) {}

        fn prompt(&self, text: &str) {
            let mut prompts = self.prompts.lock();
            prompts.push(text.to_string());
            if let Some((n, finish)) = &self.finish_on_prompt {
                if prompts.len() >= *n {
                    finish.trigger();
                }
            }
        }
    }

    /// Four projector clicks and four camera clicks for one 100x100 surface
    fn one_surface_clicks() -> [PointerEvent; 8] {
        [
            down(0.0, 0.0),
            down(90.0, 0.0),
            down(90.0, 90.0),
            down(0.0, 90.0),
            down(1.0, 1.0),
            down(80.0, 2.0),
            down(82.0, 85.0),
            down(3.0, 88.0),
        ]
    }

    fn down(x: f64, y: f64) -> PointerEvent {
        PointerEvent::new(PointerKind::Down, x, y)
    }

    fn moved(x: f64, y: f64) -> PointerEvent {
        PointerEvent::new(PointerKind::Move, x, y)
    }

    fn feed<C>(mut collector: C, events: &[PointerEvent], handle: fn(C, PointerEvent) -> Step<C>) -> Step<C> {
        for (i, event) in events.iter().enumerate() {
            match handle(collector, *event) {
                Step::Pending(next) => collector = next,
                Step::Complete(points) => {
                    assert_eq!(i, events.len() - 1, "completed before the last event");
                    return Step::Complete(points);
                }
            }
        }
        Step::Pending(collector)
    }

    #[test]
    fn test_projector_phase_completes_on_fourth_click() {
        let collector = ProjectorPointCollector::new(Dimensions::new(640, 480), Dimensions::new(1280, 960));
        let events = [
            moved(5.0, 5.0),
            down(10.0, 20.0),
            moved(300.0, 25.0),
            down(300.0, 25.0),
            down(310.0, 200.5),
        ];
        let collector = match feed(collector, &events, ProjectorPointCollector::handle) {
            Step::Pending(c) => c,
            Step::Complete(_) => panic!("completed after three clicks"),
        };
        assert_eq!(collector.waiting_for(), 3);

        match collector.handle(down(15.0, 190.0)) {
            Step::Complete(points) => assert_eq!(
                points,
                [
                    Point2D::new(20.0, 40.0),
                    Point2D::new(600.0, 50.0),
                    Point2D::new(620.0, 401.0),
                    Point2D::new(30.0, 380.0),
                ]
            ),
            Step::Pending(_) => panic!("fourth click did not complete the phase"),
        }
    }

    #[test]
    fn test_projector_rescale_truncates() {
        let collector = ProjectorPointCollector::new(Dimensions::new(640, 480), Dimensions::new(800, 600));
        assert_eq!(collector.to_projector(3.0, 3.0), Point2D::new(3.0, 3.0));
        assert_eq!(collector.to_projector(640.0, 480.0), Point2D::new(800.0, 600.0));
    }

    #[test]
    fn test_projector_render_draws_cursor_and_outline() {
        let style = MarkerStyle::default();
        let dims = Dimensions::new(200, 200);
        let collector = ProjectorPointCollector::new(dims, dims);

        let mut canvas = Frame::zeros(dims, Depth::Rgb);
        collector.render(&mut canvas, &style);
        assert!(canvas.is_blank());

        let collector = match collector.handle(down(20.0, 100.0)) {
            Step::Pending(c) => c,
            Step::Complete(_) => unreachable!(),
        };
        let collector = match collector.handle(moved(180.0, 100.0)) {
            Step::Pending(c) => c,
            Step::Complete(_) => unreachable!(),
        };
        collector.render(&mut canvas, &style);
        // Line between the placed point and the cursor
        assert_eq!(canvas.pixel(100, 100), Some(&[255u8, 255, 255][..]));
    }

    #[test]
    fn test_camera_phase_ignores_moves_and_keeps_order() {
        let prj = [
            Point2D::new(0.0, 0.0),
            Point2D::new(800.0, 0.0),
            Point2D::new(800.0, 600.0),
            Point2D::new(0.0, 600.0),
        ];
        let collector = CameraPointCollector::new(prj);
        assert_eq!(collector.target(), prj[0]);

        let events = [
            moved(1.0, 1.0),
            down(10.5, 11.5),
            PointerEvent::new(PointerKind::Up, 10.5, 11.5),
            down(100.0, 12.0),
            down(98.0, 90.0),
            moved(50.0, 50.0),
            down(9.0, 95.0),
        ];
        match feed(collector, &events, CameraPointCollector::handle) {
            Step::Complete(points) => assert_eq!(
                points,
                [
                    Point2D::new(10.5, 11.5),
                    Point2D::new(100.0, 12.0),
                    Point2D::new(98.0, 90.0),
                    Point2D::new(9.0, 95.0),
                ]
            ),
            Step::Pending(_) => panic!("camera phase did not complete"),
        }
    }

    #[test]
    fn test_create_surface_end_to_end() {
        let camera = Dimensions::new(320, 240);
        let projector = Dimensions::new(640, 480);
        let source = ScriptedSource::new(camera);
        let mut sink = RecordingSink::new(projector);
        let view = RecordingView::default();
        let (tx, rx) = mpsc::channel();

        // Phase A in camera-view coordinates, then phase B
        for event in [
            moved(10.0, 10.0),
            down(10.0, 10.0),
            down(300.0, 10.0),
            down(300.0, 230.0),
            down(10.0, 230.0),
            down(30.0, 25.0),
            down(290.0, 20.0),
            down(295.0, 220.0),
            down(25.0, 215.0),
        ] {
            tx.send(event).unwrap();
        }

        let surface = SurfaceCalibrator::new(&source, &mut sink, &view, rx, StopSignal::new())
            .with_poll_interval(Duration::from_millis(1))
            .create_surface()
            .unwrap();

        assert_eq!(surface.projector_points()[1], Point2D::new(600.0, 20.0));
        assert_eq!(surface.camera_points()[2], Point2D::new(295.0, 220.0));
        assert_eq!(view.prompts.lock().len(), 2);
        assert!(*view.camera_frames.lock() > 0);
        // Last frame presented is the cleared projector
        assert!(sink.presented.last().unwrap().is_blank());
    }

    #[test]
    fn test_create_surfaces_collects_requested_count() {
        let dims = Dimensions::new(100, 100);
        let source = ScriptedSource::new(dims);
        let mut sink = RecordingSink::new(dims);
        let view = RecordingView::default();
        let (tx, rx) = mpsc::channel();
        for event in one_surface_clicks().into_iter().chain(one_surface_clicks()) {
            tx.send(event).unwrap();
        }

        let surfaces = SurfaceCalibrator::new(&source, &mut sink, &view, rx, StopSignal::new())
            .with_poll_interval(Duration::from_millis(1))
            .create_surfaces(2, &StopSignal::new())
            .unwrap();

        assert_eq!(surfaces.len(), 2);
        assert_eq!(surfaces[0].camera_points(), surfaces[1].camera_points());
        // Two phases per surface
        assert_eq!(view.prompts.lock().len(), 4);
    }

    #[test]
    fn test_finish_during_second_surface_keeps_completed() {
        let dims = Dimensions::new(100, 100);
        let source = ScriptedSource::new(dims);
        let mut sink = RecordingSink::new(dims);
        let finish = StopSignal::new();
        // Third prompt is the first phase of surface 2
        let view = RecordingView {
            finish_on_prompt: Some((3, finish.clone())),
            ..Default::default()
        };
        let (tx, rx) = mpsc::channel();
        for event in one_surface_clicks() {
            tx.send(event).unwrap();
        }
        // Half of surface 2 arrives before the operator finishes
        tx.send(down(10.0, 10.0)).unwrap();
        tx.send(down(60.0, 10.0)).unwrap();

        let surfaces = SurfaceCalibrator::new(&source, &mut sink, &view, rx, StopSignal::new())
            .with_poll_interval(Duration::from_millis(1))
            .create_surfaces(3, &finish)
            .unwrap();

        assert_eq!(surfaces.len(), 1);
        assert_eq!(surfaces[0].projector_points()[2], Point2D::new(90.0, 90.0));
        // Sender still alive: the session ended on finish, not on a closed channel
        drop(tx);
    }

    #[test]
    fn test_finish_while_waiting_unblocks_session() {
        let dims = Dimensions::new(100, 100);
        let source = ScriptedSource::new(dims);
        let mut sink = RecordingSink::new(dims);
        let view = RecordingView::default();
        let finish = StopSignal::new();
        let (tx, rx) = mpsc::channel();
        for event in one_surface_clicks() {
            tx.send(event).unwrap();
        }

        let surfaces = std::thread::scope(|scope| {
            let session = scope.spawn(|| {
                SurfaceCalibrator::new(&source, &mut sink, &view, rx, StopSignal::new())
                    .with_poll_interval(Duration::from_millis(1))
                    .create_surfaces(3, &finish)
            });
            while view.prompts.lock().len() < 3 {
                std::thread::sleep(Duration::from_millis(5));
            }
            finish.trigger();
            session.join().unwrap()
        })
        .unwrap();

        assert_eq!(surfaces.len(), 1);
        drop(tx);
    }

    #[test]
    fn test_finish_before_first_surface_is_deferred() {
        let dims = Dimensions::new(100, 100);
        let source = ScriptedSource::new(dims);
        let mut sink = RecordingSink::new(dims);
        let view = RecordingView::default();
        let finish = StopSignal::new();
        finish.trigger();
        let (tx, rx) = mpsc::channel();
        for event in one_surface_clicks().into_iter().chain(one_surface_clicks()) {
            tx.send(event).unwrap();
        }

        let surfaces = SurfaceCalibrator::new(&source, &mut sink, &view, rx, StopSignal::new())
            .with_poll_interval(Duration::from_millis(1))
            .create_surfaces(2, &finish)
            .unwrap();

        // The first surface is still collected, then the session ends
        assert_eq!(surfaces.len(), 1);
        assert_eq!(view.prompts.lock().len(), 2);
    }

    #[test]
    fn test_stop_cancels_session_even_when_finished() {
        let dims = Dimensions::new(100, 100);
        let source = ScriptedSource::new(dims);
        let mut sink = RecordingSink::new(dims);
        let stop = StopSignal::new();
        let finish = StopSignal::new();
        let view = RecordingView {
            finish_on_prompt: Some((3, finish.clone())),
            ..Default::default()
        };
        let (tx, rx) = mpsc::channel();
        for event in one_surface_clicks() {
            tx.send(event).unwrap();
        }
        stop.trigger();

        let result = SurfaceCalibrator::new(&source, &mut sink, &view, rx, stop)
            .with_poll_interval(Duration::from_millis(1))
            .create_surfaces(2, &finish);
        assert!(matches!(result, Err(MappingError::Cancelled)));
        drop(tx);
    }

    #[test]
    fn test_degenerate_projector_points_restart_phase() {
        let dims = Dimensions::new(100, 100);
        let source = ScriptedSource::new(dims);
        let mut sink = RecordingSink::new(dims);
        let view = RecordingView::default();
        let (tx, rx) = mpsc::channel();

        for event in [
            // Collinear first attempt
            down(0.0, 0.0),
            down(10.0, 10.0),
            down(20.0, 20.0),
            down(0.0, 90.0),
            // Valid second attempt
            down(0.0, 0.0),
            down(90.0, 0.0),
            down(90.0, 90.0),
            down(0.0, 90.0),
            // Camera points
            down(1.0, 1.0),
            down(80.0, 2.0),
            down(82.0, 85.0),
            down(3.0, 88.0),
        ] {
            tx.send(event).unwrap();
        }

        let surface = SurfaceCalibrator::new(&source, &mut sink, &view, rx, StopSignal::new())
            .with_poll_interval(Duration::from_millis(1))
            .create_surface()
            .unwrap();

        assert_eq!(surface.projector_points()[1], Point2D::new(90.0, 0.0));
        assert_eq!(view.prompts.lock().len(), 3);
    }

    #[test]
    fn test_stop_signal_cancels_collection() {
        let dims = Dimensions::new(100, 100);
        let source = ScriptedSource::new(dims);
        let mut sink = RecordingSink::new(dims);
        let view = RecordingView::default();
        let (_tx, rx) = mpsc::channel();
        let stop = StopSignal::new();
        stop.trigger();

        let result = SurfaceCalibrator::new(&source, &mut sink, &view, rx, stop)
            .with_poll_interval(Duration::from_millis(1))
            .collect_projector_points();
        assert!(matches!(result, Err(MappingError::Cancelled)));
    }

    #[test]
    fn test_closed_channel_cancels_collection() {
        let dims = Dimensions::new(100, 100);
        let source = ScriptedSource::new(dims);
        let mut sink = RecordingSink::new(dims);
        let view = RecordingView::default();
        let (tx, rx) = mpsc::channel::<PointerEvent>();
        drop(tx);

        let result = SurfaceCalibrator::new(&source, &mut sink, &view, rx, StopSignal::new())
            .collect_camera_points(&[Point2D::new(0.0, 0.0); 4]);
        assert!(matches!(result, Err(MappingError::Cancelled)));
    }

    #[test]
    fn test_frame_source_failure_propagates() {
        let dims = Dimensions::new(100, 100);
        let source = ScriptedSource::failing_after(dims, 0);
        let mut sink = RecordingSink::new(dims);
        let view = RecordingView::default();
        let (_tx, rx) = mpsc::channel();

        let result = SurfaceCalibrator::new(&source, &mut sink, &view, rx, StopSignal::new())
            .collect_projector_points();
        assert!(matches!(result, Err(MappingError::FrameSourceUnavailable(_))));
    }
}
