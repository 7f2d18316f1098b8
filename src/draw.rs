//! Marker drawing for calibration feedback and demo content

use image::{Luma, Rgb};
use imageproc::drawing::draw_line_segment_mut;

use crate::frame::{Frame, Point2D};

/// Draw an X centered on `center`, each stroke `size` pixels long
pub fn draw_cross(frame: &mut Frame, center: Point2D, color: [u8; 3], size: f64, thickness: u32) {
    let half = size / 2.0;
    let strokes = [
        (
            Point2D::new(center.x - half, center.y - half),
            Point2D::new(center.x + half, center.y + half),
        ),
        (
            Point2D::new(center.x + half, center.y - half),
            Point2D::new(center.x - half, center.y + half),
        ),
    ];

    for (start, end) in strokes {
        draw_thick_line(frame, start, end, color, thickness);
    }
}

/// Connect consecutive points and close the outline back to the first one
pub fn draw_polygon_outline(frame: &mut Frame, points: &[Point2D], color: [u8; 3], thickness: u32) {
    let (Some(first), Some(last)) = (points.first(), points.last()) else {
        return;
    };

    for pair in points.windows(2) {
        draw_thick_line(frame, pair[0], pair[1], color, thickness);
    }
    draw_thick_line(frame, *last, *first, color, thickness);
}

/// Evenly spaced grid lines, `rows` x `cols` cells
pub fn draw_grid(frame: &mut Frame, rows: u32, cols: u32, color: [u8; 3]) {
    let dims = frame.dimensions();
    let (w, h) = (dims.width as f64, dims.height as f64);

    for col in 0..=cols.max(1) {
        let x = (col as f64 * w / cols.max(1) as f64).min(w - 1.0);
        draw_thick_line(frame, Point2D::new(x, 0.0), Point2D::new(x, h - 1.0), color, 1);
    }
    for row in 0..=rows.max(1) {
        let y = (row as f64 * h / rows.max(1) as f64).min(h - 1.0);
        draw_thick_line(frame, Point2D::new(0.0, y), Point2D::new(w - 1.0, y), color, 1);
    }
}

/// A line of `thickness` parallel one-pixel strokes
fn draw_thick_line(frame: &mut Frame, start: Point2D, end: Point2D, color: [u8; 3], thickness: u32) {
    let dx = end.x - start.x;
    let dy = end.y - start.y;
    let len = (dx * dx + dy * dy).sqrt();
    let (nx, ny) = if len > f64::EPSILON {
        (-dy / len, dx / len)
    } else {
        (0.0, 0.0)
    };

    let thickness = thickness.max(1) as i64;
    let first = -(thickness - 1) / 2;
    for k in first..first + thickness {
        let ox = nx * k as f64;
        let oy = ny * k as f64;
        let a = ((start.x + ox) as f32, (start.y + oy) as f32);
        let b = ((end.x + ox) as f32, (end.y + oy) as f32);
        match frame {
            Frame::Gray(img) => draw_line_segment_mut(img, a, b, Luma([luma(color)])),
            Frame::Rgb(img) => draw_line_segment_mut(img, a, b, Rgb(color)),
        }
    }
}

/// BT.601 luma of an RGB color
fn luma([r, g, b]: [u8; 3]) -> u8 {
    (((66 * r as u32 + 129 * g as u32 + 25 * b as u32 + 128) >> 8) + 16) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{Depth, Dimensions};

    #[test]
    fn test_cross_marks_center_and_tips() {
        let mut frame = Frame::zeros(Dimensions::new(100, 100), Depth::Rgb);
        draw_cross(&mut frame, Point2D::new(50.0, 50.0), [255, 255, 255], 30.0, 3);

        assert_eq!(frame.pixel(50, 50), Some(&[255u8, 255, 255][..]));
        assert_eq!(frame.pixel(35, 35), Some(&[255u8, 255, 255][..]));
        assert_eq!(frame.pixel(65, 35), Some(&[255u8, 255, 255][..]));
        assert_eq!(frame.pixel(50, 30), Some(&[0u8, 0, 0][..]));
    }

    #[test]
    fn test_outline_closes_polygon() {
        let mut frame = Frame::zeros(Dimensions::new(50, 50), Depth::Gray);
        let points = [
            Point2D::new(10.0, 10.0),
            Point2D::new(40.0, 10.0),
            Point2D::new(40.0, 40.0),
        ];
        draw_polygon_outline(&mut frame, &points, [255, 255, 255], 1);

        // Closing edge from (40, 40) back to (10, 10)
        assert_ne!(frame.pixel(25, 25), Some(&[0u8][..]));
        assert_eq!(frame.pixel(10, 40), Some(&[0u8][..]));
    }

    #[test]
    fn test_outline_empty_is_noop() {
        let mut frame = Frame::zeros(Dimensions::new(10, 10), Depth::Rgb);
        draw_polygon_outline(&mut frame, &[], [255, 0, 0], 6);
        assert!(frame.is_blank());
    }

    #[test]
    fn test_grid_draws_borders() {
        let mut frame = Frame::zeros(Dimensions::new(40, 30), Depth::Rgb);
        draw_grid(&mut frame, 3, 4, [0, 255, 0]);
        assert_eq!(frame.pixel(0, 15), Some(&[0u8, 255, 0][..]));
        assert_eq!(frame.pixel(10, 5), Some(&[0u8, 255, 0][..]));
        assert_eq!(frame.pixel(5, 5), Some(&[0u8, 0, 0][..]));
    }
}
