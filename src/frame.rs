//! Frame and coordinate types shared by the warp, calibration and capture code
//!
//! Frames are 8-bit images that are either single-channel or 3-channel RGB.
//! All compositing operations (zeroing, masking, OR-merging) act on the raw
//! interleaved bytes, so they behave identically for both depths.

use image::{DynamicImage, GrayImage, Luma, RgbImage};
use imageproc::drawing::draw_polygon_mut;
use imageproc::point::Point;
use serde::{Deserialize, Serialize};

use crate::error::{MappingError, Result};

/// A 2D point in pixel coordinates of one plane (camera or projector)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Point2D {
    pub x: f64,
    pub y: f64,
}

impl Point2D {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn to_array(self) -> [f64; 2] {
        [self.x, self.y]
    }

    pub fn from_array([x, y]: [f64; 2]) -> Self {
        Self { x, y }
    }

    /// Squared distance to another point
    pub fn distance_sq(&self, other: &Point2D) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx * dx + dy * dy
    }
}

/// Pixel dimensions of a frame or device
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

impl std::fmt::Display for Dimensions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Channel depth of a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Depth {
    Gray,
    Rgb,
}

impl Depth {
    pub fn channels(&self) -> usize {
        match self {
            Depth::Gray => 1,
            Depth::Rgb => 3,
        }
    }
}

/// An 8-bit image frame
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Gray(GrayImage),
    Rgb(RgbImage),
}

impl Frame {
    /// All-zero frame of the given size and depth
    pub fn zeros(dims: Dimensions, depth: Depth) -> Self {
        match depth {
            Depth::Gray => Frame::Gray(GrayImage::new(dims.width, dims.height)),
            Depth::Rgb => Frame::Rgb(RgbImage::new(dims.width, dims.height)),
        }
    }

    /// Wrap an interleaved byte buffer, checking that its size matches
    pub fn from_raw(dims: Dimensions, depth: Depth, data: Vec<u8>) -> Result<Self> {
        let actual = data.len();
        let mismatch = || MappingError::DimensionMismatch {
            width: dims.width,
            height: dims.height,
            channels: depth.channels(),
            actual,
        };

        match depth {
            Depth::Gray => GrayImage::from_raw(dims.width, dims.height, data)
                .map(Frame::Gray)
                .ok_or_else(mismatch),
            Depth::Rgb => RgbImage::from_raw(dims.width, dims.height, data)
                .map(Frame::Rgb)
                .ok_or_else(mismatch),
        }
    }

    pub fn dimensions(&self) -> Dimensions {
        let (width, height) = match self {
            Frame::Gray(img) => img.dimensions(),
            Frame::Rgb(img) => img.dimensions(),
        };
        Dimensions::new(width, height)
    }

    pub fn depth(&self) -> Depth {
        match self {
            Frame::Gray(_) => Depth::Gray,
            Frame::Rgb(_) => Depth::Rgb,
        }
    }

    pub fn channels(&self) -> usize {
        self.depth().channels()
    }

    pub fn as_raw(&self) -> &[u8] {
        match self {
            Frame::Gray(img) => img.as_raw(),
            Frame::Rgb(img) => img.as_raw(),
        }
    }

    pub fn as_raw_mut(&mut self) -> &mut [u8] {
        match self {
            Frame::Gray(img) => &mut **img,
            Frame::Rgb(img) => &mut **img,
        }
    }

    /// Zero frame of the same depth at other dimensions
    pub fn zeros_like(&self, dims: Dimensions) -> Self {
        Frame::zeros(dims, self.depth())
    }

    pub fn is_blank(&self) -> bool {
        self.as_raw().iter().all(|&b| b == 0)
    }

    /// Interleaved pixel value at (x, y), `None` when out of bounds
    pub fn pixel(&self, x: u32, y: u32) -> Option<&[u8]> {
        let dims = self.dimensions();
        if x >= dims.width || y >= dims.height {
            return None;
        }
        let channels = self.channels();
        let offset = (y as usize * dims.width as usize + x as usize) * channels;
        self.as_raw().get(offset..offset + channels)
    }

    /// Pixel-wise bitwise OR of `other` into `self`
    pub fn bitwise_or_assign(&mut self, other: &Frame) -> Result<()> {
        if self.dimensions() != other.dimensions() || self.depth() != other.depth() {
            let dims = self.dimensions();
            return Err(MappingError::DimensionMismatch {
                width: dims.width,
                height: dims.height,
                channels: self.channels(),
                actual: other.as_raw().len(),
            });
        }

        for (dst, src) in self.as_raw_mut().iter_mut().zip(other.as_raw()) {
            *dst |= *src;
        }
        Ok(())
    }

    /// Copy of this frame with every pixel outside `polygon` zeroed.
    /// Pixels on the polygon edges are kept.
    pub fn masked_by_polygon(&self, polygon: &[Point2D]) -> Frame {
        let dims = self.dimensions();
        let mask = polygon_mask(dims, polygon);
        let channels = self.channels();

        let mut out = self.clone();
        for (pixel, m) in out.as_raw_mut().chunks_exact_mut(channels).zip(mask.as_raw()) {
            if *m == 0 {
                pixel.fill(0);
            }
        }
        out
    }

    /// RGB view of the frame, expanding grayscale
    pub fn to_rgb(&self) -> RgbImage {
        match self {
            Frame::Gray(img) => DynamicImage::ImageLuma8(img.clone()).to_rgb8(),
            Frame::Rgb(img) => img.clone(),
        }
    }
}

/// Rasterize a filled polygon into a single-channel 0/255 mask
fn polygon_mask(dims: Dimensions, polygon: &[Point2D]) -> GrayImage {
    let mut mask = GrayImage::new(dims.width, dims.height);

    let mut points: Vec<Point<i32>> = polygon
        .iter()
        .map(|p| Point::new(p.x.round() as i32, p.y.round() as i32))
        .collect();
    points.dedup();
    while points.len() > 1 && points.first() == points.last() {
        points.pop();
    }

    if points.len() >= 3 {
        draw_polygon_mut(&mut mask, &points, Luma([255u8]));
    }
    mask
}
