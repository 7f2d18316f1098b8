//! Projection compositor
//!
//! Owns the calibrated surfaces for one output device and merges each
//! surface's warped contribution into a single frame.

use std::path::Path;

use tracing::{debug, info};

use crate::error::Result;
use crate::frame::{Depth, Dimensions, Frame};
use crate::store;
use crate::surface::Surface;

#[derive(Debug, Clone)]
pub struct Compositor {
    output: Dimensions,
    /// Compositing order: later surfaces are merged after earlier ones
    surfaces: Vec<Surface>,
}

impl Compositor {
    pub fn new(output: Dimensions) -> Self {
        Self {
            output,
            surfaces: Vec::new(),
        }
    }

    pub fn with_surfaces(output: Dimensions, surfaces: Vec<Surface>) -> Self {
        Self { output, surfaces }
    }

    pub fn output_dimensions(&self) -> Dimensions {
        self.output
    }

    pub fn surfaces(&self) -> &[Surface] {
        &self.surfaces
    }

    pub fn add_surface(&mut self, surface: Surface) {
        self.surfaces.push(surface);
        debug!("Compositor now has {} surface(s)", self.surfaces.len());
    }

    pub fn clear_surfaces(&mut self) {
        self.surfaces.clear();
    }

    /// Blank RGB canvas at the output size
    pub fn empty_frame(&self) -> Frame {
        Frame::zeros(self.output, Depth::Rgb)
    }

    /// Blank canvas at the output size with the depth of `frame`
    pub fn empty_like(&self, frame: &Frame) -> Frame {
        frame.zeros_like(self.output)
    }

    /// Warp `content` through every surface and OR the results together.
    /// A grayscale content frame yields a grayscale composite.
    pub fn render_through_surfaces(&self, content: &Frame) -> Result<Frame> {
        let mut composite = self.empty_like(content);
        for surface in &self.surfaces {
            let warped = surface.warp_to_observed_space(content, self.output);
            composite.bitwise_or_assign(&warped)?;
        }
        Ok(composite)
    }

    /// Bring a frame in output space back into content coordinates,
    /// one surface at a time, merged the same way as rendering.
    pub fn unwarp(&self, observed: &Frame, content: Dimensions) -> Result<Frame> {
        let mut merged = observed.zeros_like(content);
        for surface in &self.surfaces {
            let warped = surface.warp_to_content_space(observed, content);
            merged.bitwise_or_assign(&warped)?;
        }
        Ok(merged)
    }

    /// Replace the surface set with the contents of a calibration document.
    /// On any error the current surfaces are left untouched.
    pub fn load_calibration(&mut self, path: &Path) -> Result<()> {
        let surfaces = store::load(path)?;
        info!("Loaded {} surface(s) from {:?}", surfaces.len(), path);
        self.surfaces = surfaces;
        Ok(())
    }

    pub fn save_calibration(&self, path: &Path) -> Result<()> {
        store::save(&self.surfaces, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Point2D;

    fn quad(pts: [(f64, f64); 4]) -> [Point2D; 4] {
        pts.map(|(x, y)| Point2D::new(x, y))
    }

    fn rect(x0: f64, y0: f64, x1: f64, y1: f64) -> [Point2D; 4] {
        quad([(x0, y0), (x1, y0), (x1, y1), (x0, y1)])
    }

    /// Gray content with `value` filled inside [x0, x1) x [y0, y1)
    fn fill(frame: &mut Frame, x0: usize, y0: usize, x1: usize, y1: usize, value: u8) {
        let width = frame.dimensions().width as usize;
        for y in y0..y1 {
            for x in x0..x1 {
                frame.as_raw_mut()[y * width + x] = value;
            }
        }
    }

    /// Two surfaces whose camera quads are disjoint but whose projector
    /// quads overlap on x in [50, 100]
    fn overlapping() -> (Compositor, Frame) {
        let dims = Dimensions::new(200, 100);
        let a = Surface::new(rect(0.0, 0.0, 50.0, 50.0), rect(0.0, 0.0, 100.0, 100.0)).unwrap();
        let b = Surface::new(rect(100.0, 0.0, 150.0, 50.0), rect(50.0, 0.0, 150.0, 100.0)).unwrap();

        let mut compositor = Compositor::new(dims);
        compositor.add_surface(a);
        compositor.add_surface(b);

        let mut content = Frame::zeros(dims, Depth::Gray);
        fill(&mut content, 0, 0, 51, 51, 0x0F);
        fill(&mut content, 100, 0, 151, 51, 0xF0);
        (compositor, content)
    }

    #[test]
    fn test_empty_compositor_renders_blank() {
        let compositor = Compositor::new(Dimensions::new(64, 48));
        let content = Frame::from_raw(Dimensions::new(10, 10), Depth::Gray, vec![255; 100]).unwrap();
        let out = compositor.render_through_surfaces(&content).unwrap();
        assert_eq!(out.dimensions(), Dimensions::new(64, 48));
        assert!(out.is_blank());
    }

    #[test]
    fn test_composite_depth_follows_content() {
        let (compositor, content) = overlapping();
        assert_eq!(compositor.render_through_surfaces(&content).unwrap().depth(), Depth::Gray);

        let rgb = Frame::zeros(Dimensions::new(200, 100), Depth::Rgb);
        assert_eq!(compositor.render_through_surfaces(&rgb).unwrap().depth(), Depth::Rgb);
        assert_eq!(compositor.empty_frame().depth(), Depth::Rgb);
        assert!(compositor.empty_frame().is_blank());
    }

    #[test]
    fn test_single_contributor_passes_through() {
        let (compositor, content) = overlapping();
        let out = compositor.render_through_surfaces(&content).unwrap();

        // Only A reaches x = 25, only B reaches x = 125
        assert_eq!(out.pixel(25, 50), Some(&[0x0Fu8][..]));
        assert_eq!(out.pixel(125, 50), Some(&[0xF0u8][..]));
        assert_eq!(out.pixel(180, 50), Some(&[0u8][..]));
    }

    #[test]
    fn test_overlap_is_bitwise_or() {
        let (compositor, content) = overlapping();
        let out = compositor.render_through_surfaces(&content).unwrap();
        assert_eq!(out.pixel(75, 50), Some(&[0xFFu8][..]));
    }

    #[test]
    fn test_later_surface_shows_where_earlier_is_zero() {
        let (compositor, mut content) = overlapping();
        // Blank out A's content: the overlap now carries B's value unchanged
        fill(&mut content, 0, 0, 51, 51, 0);
        let out = compositor.render_through_surfaces(&content).unwrap();
        assert_eq!(out.pixel(75, 50), Some(&[0xF0u8][..]));
        assert_eq!(out.pixel(25, 50), Some(&[0u8][..]));
    }

    #[test]
    fn test_unwarp_returns_to_content_space() {
        let dims = Dimensions::new(200, 200);
        let surface =
            Surface::new(rect(20.0, 20.0, 180.0, 180.0), rect(0.0, 0.0, 200.0, 200.0)).unwrap();
        let compositor = Compositor::with_surfaces(dims, vec![surface]);

        let content = Frame::from_raw(dims, Depth::Gray, vec![200; dims.pixel_count()]).unwrap();
        let rendered = compositor.render_through_surfaces(&content).unwrap();
        let back = compositor.unwarp(&rendered, dims).unwrap();

        assert_eq!(back.pixel(100, 100), Some(&[200u8][..]));
        assert_eq!(back.pixel(10, 10), Some(&[0u8][..]));
    }

    #[test]
    fn test_failed_load_keeps_surfaces() {
        let surface = Surface::new(rect(0.0, 0.0, 10.0, 10.0), rect(0.0, 0.0, 80.0, 60.0)).unwrap();
        let mut compositor = Compositor::with_surfaces(Dimensions::new(80, 60), vec![surface]);

        let missing = std::env::temp_dir().join("projmap_compositor_missing.json");
        let _ = std::fs::remove_file(&missing);
        assert!(compositor.load_calibration(&missing).is_err());
        assert_eq!(compositor.surfaces().len(), 1);
    }
}
