// Projector output through a v4l2loopback device
//
// The projector is fed from a loopback device: frames written here are read
// by whatever player drives the projector fullscreen. Writes use the plain
// write() API on a non-blocking descriptor. When the consumer falls behind
// the frame is dropped instead of stalling the render loop.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::error::{MappingError, Result};
use crate::frame::{Dimensions, Frame};
use crate::pipeline::DisplaySink;

/// Pixel formats the loopback device is offered, in order
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PixelFormat {
    Yuyv,
    Rgb24,
    Bgr24,
}

impl PixelFormat {
    const NEGOTIATION_ORDER: [PixelFormat; 3] = [PixelFormat::Yuyv, PixelFormat::Rgb24, PixelFormat::Bgr24];

    pub fn fourcc(&self) -> u32 {
        match self {
            PixelFormat::Yuyv => fourcc(b"YUYV"),
            PixelFormat::Rgb24 => fourcc(b"RGB3"),
            PixelFormat::Bgr24 => fourcc(b"BGR3"),
        }
    }

    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            PixelFormat::Yuyv => 2,
            PixelFormat::Rgb24 | PixelFormat::Bgr24 => 3,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            PixelFormat::Yuyv => "YUYV",
            PixelFormat::Rgb24 => "RGB24",
            PixelFormat::Bgr24 => "BGR24",
        }
    }
}

fn fourcc(s: &[u8; 4]) -> u32 {
    u32::from_le_bytes(*s)
}

// V4L2 ioctl definitions
const VIDIOC_S_FMT: libc::c_ulong = 0xc0d05605;
const V4L2_BUF_TYPE_VIDEO_OUTPUT: u32 = 2;
const V4L2_FIELD_NONE: u32 = 1;

/// Matches the kernel's struct v4l2_pix_format
#[repr(C)]
struct v4l2_pix_format {
    width: u32,
    height: u32,
    pixelformat: u32,
    field: u32,
    bytesperline: u32,
    sizeimage: u32,
    colorspace: u32,
    priv_: u32,
    flags: u32,
    ycbcr_enc_or_hsv_enc: u32,
    quantization: u32,
    xfer_func: u32,
}

#[repr(C)]
struct v4l2_format {
    type_: u32,
    // Aligns the union to 8 bytes like the kernel struct
    _pad_before_fmt: u32,
    fmt: v4l2_pix_format,
    _pad: [u8; 200 - std::mem::size_of::<v4l2_pix_format>()],
}

/// Projector fed through a loopback device
pub struct LoopbackProjector {
    device_path: String,
    dims: Dimensions,
    file: Option<File>,
    format: PixelFormat,
    frame_count: u64,
    dropped_count: u64,
    last_drop_warn: Option<Instant>,
}

impl LoopbackProjector {
    /// The device is opened lazily on the first `present`
    pub fn new(device_path: &str, dims: Dimensions) -> Self {
        info!("Projector output: {} ({})", device_path, dims);
        Self {
            device_path: device_path.to_string(),
            dims,
            file: None,
            format: PixelFormat::Yuyv,
            frame_count: 0,
            dropped_count: 0,
            last_drop_warn: None,
        }
    }

    /// Open the device and negotiate a pixel format
    pub fn initialize(&mut self) -> io::Result<()> {
        if self.file.is_some() {
            return Ok(());
        }

        if !Path::new(&self.device_path).exists() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("Projector device {} not found. Is v4l2loopback loaded?", self.device_path),
            ));
        }

        for fmt in PixelFormat::NEGOTIATION_ORDER {
            match self.open_with_format(fmt) {
                Ok(file) => {
                    info!("Projector output negotiated {}", fmt.name());
                    self.format = fmt;
                    self.file = Some(file);
                    return Ok(());
                }
                Err(e) => warn!("Format {} rejected: {}", fmt.name(), e),
            }
        }

        // Some loopback setups are preconfigured and accept any data
        warn!("All formats rejected, opening {} without setting a format", self.device_path);
        self.file = Some(open_nonblocking(&self.device_path)?);
        Ok(())
    }

    fn open_with_format(&self, format: PixelFormat) -> io::Result<File> {
        let file = open_nonblocking(&self.device_path)?;

        let bytesperline = self.dims.width * format.bytes_per_pixel() as u32;
        let mut v4l2_fmt = v4l2_format {
            type_: V4L2_BUF_TYPE_VIDEO_OUTPUT,
            _pad_before_fmt: 0,
            fmt: v4l2_pix_format {
                width: self.dims.width,
                height: self.dims.height,
                pixelformat: format.fourcc(),
                field: V4L2_FIELD_NONE,
                bytesperline,
                sizeimage: bytesperline * self.dims.height,
                colorspace: 0,
                priv_: 0,
                flags: 0,
                ycbcr_enc_or_hsv_enc: 0,
                quantization: 0,
                xfer_func: 0,
            },
            _pad: [0u8; 200 - std::mem::size_of::<v4l2_pix_format>()],
        };

        let ret = unsafe { libc::ioctl(file.as_raw_fd(), VIDIOC_S_FMT, &mut v4l2_fmt as *mut v4l2_format) };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }

        if v4l2_fmt.fmt.width != self.dims.width || v4l2_fmt.fmt.height != self.dims.height {
            warn!(
                "Format accepted but size changed: requested {}, got {}x{}",
                self.dims, v4l2_fmt.fmt.width, v4l2_fmt.fmt.height
            );
        }
        Ok(file)
    }

    fn write_encoded(&mut self, rgb: &[u8]) -> io::Result<()> {
        let encoded = match self.format {
            PixelFormat::Rgb24 => rgb.to_vec(),
            PixelFormat::Bgr24 => rgb_to_bgr(rgb),
            PixelFormat::Yuyv => rgb_to_yuyv(rgb, self.dims.width as usize, self.dims.height as usize),
        };

        let Some(file) = self.file.as_mut() else {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "projector device not open"));
        };

        match file.write_all(&encoded) {
            Ok(()) => {
                self.frame_count += 1;
                if self.frame_count % 100 == 0 {
                    debug!("Written {} frames to projector", self.frame_count);
                }
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                self.record_dropped_frame();
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Count a dropped frame, warning at most every 5 seconds
    fn record_dropped_frame(&mut self) {
        self.dropped_count += 1;
        let should_warn = self
            .last_drop_warn
            .map_or(true, |last| last.elapsed() >= Duration::from_secs(5));

        if should_warn {
            warn!(
                "Dropped frame (total dropped: {}, written: {}) - projector consumer may be slow",
                self.dropped_count, self.frame_count
            );
            self.last_drop_warn = Some(Instant::now());
        }
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped_count
    }
}

impl DisplaySink for LoopbackProjector {
    fn dimensions(&self) -> Dimensions {
        self.dims
    }

    fn present(&mut self, frame: &Frame) -> Result<()> {
        if frame.dimensions() != self.dims {
            return Err(MappingError::Display(format!(
                "frame is {}, projector expects {}",
                frame.dimensions(),
                self.dims
            )));
        }

        let path = self.device_path.clone();
        self.initialize()
            .map_err(|e| MappingError::Display(format!("{}: {}", path, e)))?;

        let rgb = frame.to_rgb();
        self.write_encoded(rgb.as_raw())
            .map_err(|e| MappingError::Display(format!("{}: {}", path, e)))
    }
}

impl Drop for LoopbackProjector {
    fn drop(&mut self) {
        if self.file.take().is_some() {
            info!(
                "Projector output closed after {} frames ({} dropped)",
                self.frame_count, self.dropped_count
            );
        }
    }
}

fn open_nonblocking(path: &str) -> io::Result<File> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .custom_flags(libc::O_NONBLOCK)
        .open(path)
}

fn rgb_to_bgr(rgb: &[u8]) -> Vec<u8> {
    rgb.chunks_exact(3).flat_map(|c| [c[2], c[1], c[0]]).collect()
}

/// RGB24 to packed YUV 4:2:2 (BT.601), chroma taken from the first pixel of each pair
fn rgb_to_yuyv(rgb: &[u8], width: usize, height: usize) -> Vec<u8> {
    let mut yuyv = Vec::with_capacity(width * height * 2);

    for row in rgb.chunks_exact(width * 3).take(height) {
        for x in (0..width).step_by(2) {
            let (r1, g1, b1) = (row[x * 3] as i32, row[x * 3 + 1] as i32, row[x * 3 + 2] as i32);
            let (r2, g2, b2) = if x + 1 < width {
                let i = (x + 1) * 3;
                (row[i] as i32, row[i + 1] as i32, row[i + 2] as i32)
            } else {
                (r1, g1, b1)
            };

            let y1 = ((66 * r1 + 129 * g1 + 25 * b1 + 128) >> 8) + 16;
            let y2 = ((66 * r2 + 129 * g2 + 25 * b2 + 128) >> 8) + 16;
            let u = ((-38 * r1 - 74 * g1 + 112 * b1 + 128) >> 8) + 128;
            let v = ((112 * r1 - 94 * g1 - 18 * b1 + 128) >> 8) + 128;

            yuyv.extend_from_slice(&[
                y1.clamp(0, 255) as u8,
                u.clamp(0, 255) as u8,
                y2.clamp(0, 255) as u8,
                v.clamp(0, 255) as u8,
            ]);
        }
    }

    yuyv
}
