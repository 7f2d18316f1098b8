//! Perspective transformation between the camera and projector planes
//!
//! A transform is fitted from exactly four point correspondences (a full
//! homography, not an affine approximation) and applied to frames by inverse
//! mapping: every output pixel looks up its source location and samples it
//! bilinearly. Source locations outside the input frame read as zero.

use nalgebra::{Matrix3, SMatrix, SVector, Vector3};
use rayon::prelude::*;

use crate::error::{MappingError, Result};
use crate::frame::{Dimensions, Frame, Point2D};

/// Relative area below which three points are treated as collinear
const COLLINEAR_EPSILON: f64 = 1e-9;

/// Perspective transformation matrix (3x3 homography)
#[derive(Debug, Clone, PartialEq)]
pub struct PerspectiveTransform {
    /// Maps source-plane points to destination-plane points
    matrix: Matrix3<f64>,
    /// Inverse matrix for reverse mapping (used for warping)
    inverse: Matrix3<f64>,
}

impl PerspectiveTransform {
    /// Fit the homography taking each `src[i]` to `dst[i]`.
    ///
    /// Fails with `DegenerateGeometry` when either quadrilateral has three
    /// collinear (or two coincident) points, or the linear system is singular.
    pub fn fit(src: &[Point2D; 4], dst: &[Point2D; 4]) -> Result<Self> {
        check_quad(src, "source")?;
        check_quad(dst, "destination")?;

        let matrix = compute_homography(src, dst).ok_or_else(|| {
            MappingError::DegenerateGeometry("homography system is singular".to_string())
        })?;
        let inverse = matrix.try_inverse().ok_or_else(|| {
            MappingError::DegenerateGeometry("homography is not invertible".to_string())
        })?;

        Ok(Self { matrix, inverse })
    }

    /// Row-major copy of the matrix
    pub fn matrix(&self) -> [[f64; 3]; 3] {
        let m = &self.matrix;
        [
            [m[(0, 0)], m[(0, 1)], m[(0, 2)]],
            [m[(1, 0)], m[(1, 1)], m[(1, 2)]],
            [m[(2, 0)], m[(2, 1)], m[(2, 2)]],
        ]
    }

    /// Transform a point from source to destination coordinates.
    /// Points on the line at infinity come back with non-finite coordinates.
    #[inline]
    pub fn transform_point(&self, p: Point2D) -> Point2D {
        apply_homography(&self.matrix, p.x, p.y)
    }

    /// Transform a point from destination to source coordinates
    #[inline]
    pub fn inverse_transform_point(&self, p: Point2D) -> Point2D {
        apply_homography(&self.inverse, p.x, p.y)
    }

    /// Warp `src` into a new frame of `output` dimensions and the same depth
    pub fn warp(&self, src: &Frame, output: Dimensions) -> Frame {
        let mut dst = src.zeros_like(output);
        let channels = src.channels();
        let src_dims = src.dimensions();
        let src_raw = src.as_raw();
        let dst_stride = output.width as usize * channels;

        if dst_stride == 0 || src_dims.pixel_count() == 0 {
            return dst;
        }

        dst.as_raw_mut()
            .par_chunks_mut(dst_stride)
            .enumerate()
            .for_each(|(dst_y, row)| {
                for (dst_x, pixel) in row.chunks_exact_mut(channels).enumerate() {
                    // Map destination pixel to source coordinates
                    let s = apply_homography(&self.inverse, dst_x as f64, dst_y as f64);
                    bilinear_sample(src_raw, src_dims, channels, s.x, s.y, pixel);
                }
            });

        dst
    }
}

/// Reject a quadrilateral with coincident or collinear corners
pub fn validate_quad(points: &[Point2D; 4]) -> Result<()> {
    check_quad(points, "quad")
}

fn check_quad(points: &[Point2D; 4], which: &str) -> Result<()> {
    let scale = points
        .iter()
        .flat_map(|a| points.iter().map(move |b| a.distance_sq(b)))
        .fold(0.0f64, f64::max);

    if !scale.is_finite() || scale == 0.0 {
        return Err(MappingError::DegenerateGeometry(format!(
            "{} points are coincident or not finite",
            which
        )));
    }

    const TRIPLES: [(usize, usize, usize); 4] = [(0, 1, 2), (0, 1, 3), (0, 2, 3), (1, 2, 3)];
    for (i, j, k) in TRIPLES {
        let (a, b, c) = (points[i], points[j], points[k]);
        let cross = (b.x - a.x) * (c.y - a.y) - (b.y - a.y) * (c.x - a.x);
        if cross.abs() <= COLLINEAR_EPSILON * scale {
            return Err(MappingError::DegenerateGeometry(format!(
                "{} points {}, {} and {} are collinear",
                which, i, j, k
            )));
        }
    }
    Ok(())
}

/// Compute a 3x3 homography matrix from 4 point correspondences
/// using the Direct Linear Transform (DLT) with h33 fixed to 1
fn compute_homography(src: &[Point2D; 4], dst: &[Point2D; 4]) -> Option<Matrix3<f64>> {
    // For each point correspondence (x,y) -> (x',y'), we have two equations:
    // x*h1 + y*h2 + h3 - x'*x*h7 - x'*y*h8 = x'
    // x*h4 + y*h5 + h6 - y'*x*h7 - y'*y*h8 = y'
    let mut a = SMatrix::<f64, 8, 8>::zeros();
    let mut b = SVector::<f64, 8>::zeros();

    for i in 0..4 {
        let (x, y) = (src[i].x, src[i].y);
        let (xp, yp) = (dst[i].x, dst[i].y);

        let row1 = i * 2;
        let row2 = i * 2 + 1;

        a[(row1, 0)] = x;
        a[(row1, 1)] = y;
        a[(row1, 2)] = 1.0;
        a[(row1, 6)] = -xp * x;
        a[(row1, 7)] = -xp * y;
        b[row1] = xp;

        a[(row2, 3)] = x;
        a[(row2, 4)] = y;
        a[(row2, 5)] = 1.0;
        a[(row2, 6)] = -yp * x;
        a[(row2, 7)] = -yp * y;
        b[row2] = yp;
    }

    // LU with partial pivoting
    let h = a.lu().solve(&b)?;
    if h.iter().any(|v| !v.is_finite()) {
        return None;
    }

    Some(Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], 1.0))
}

/// Apply a homography matrix to a point
#[inline]
fn apply_homography(h: &Matrix3<f64>, x: f64, y: f64) -> Point2D {
    let v = h * Vector3::new(x, y, 1.0);
    let w = v[2];
    if w.abs() < 1e-12 {
        return Point2D::new(f64::INFINITY, f64::INFINITY);
    }
    Point2D::new(v[0] / w, v[1] / w)
}

/// Bilinear interpolation with a constant zero border
#[inline]
fn bilinear_sample(
    src: &[u8],
    dims: Dimensions,
    channels: usize,
    x: f64,
    y: f64,
    out: &mut [u8],
) {
    let width = dims.width as i64;
    let height = dims.height as i64;

    if !x.is_finite() || !y.is_finite() {
        return;
    }

    let x0f = x.floor();
    let y0f = y.floor();
    // Entirely outside: none of the four neighbours is inside the frame
    if x0f < -1.0 || y0f < -1.0 || x0f >= width as f64 || y0f >= height as f64 {
        return;
    }

    let x0 = x0f as i64;
    let y0 = y0f as i64;
    let fx = x - x0f;
    let fy = y - y0f;
    let stride = width as usize * channels;

    let fetch = |px: i64, py: i64, c: usize| -> f64 {
        if px < 0 || py < 0 || px >= width || py >= height {
            return 0.0;
        }
        src[py as usize * stride + px as usize * channels + c] as f64
    };

    for (c, value) in out.iter_mut().enumerate().take(channels) {
        let p00 = fetch(x0, y0, c);
        let p10 = fetch(x0 + 1, y0, c);
        let p01 = fetch(x0, y0 + 1, c);
        let p11 = fetch(x0 + 1, y0 + 1, c);

        let v = p00 * (1.0 - fx) * (1.0 - fy)
            + p10 * fx * (1.0 - fy)
            + p01 * (1.0 - fx) * fy
            + p11 * fx * fy;

        *value = v.round().clamp(0.0, 255.0) as u8;
    }
}
