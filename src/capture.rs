//! Camera capture from V4L2 devices
//!
//! A background thread owns the device, decodes every frame to RGB and
//! publishes it into a [`LatestFrameSlot`]. Readers only ever see the newest
//! frame. The supported pixel formats are MJPEG, YUYV, RGB3 and BGR3.
//!
//! Performance notes:
//! - turbojpeg (libjpeg-turbo with SIMD) for MJPEG, jpeg-decoder as fallback
//! - Integer-only YUYV to RGB conversion
//! - Buffers are allocated once per stream

use anyhow::{Context, Result};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use v4l::buffer::Type;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::video::Capture;
use v4l::{Device, FourCC};

use crate::config::{CaptureFormat, VideoConfig};
use crate::error::MappingError;
use crate::frame::{Depth, Dimensions, Frame};
use crate::pipeline::{FrameSource, StopSignal};
use crate::slot::{LatestFrameSlot, TimestampedFrame};

thread_local! {
    static JPEG_DECOMPRESSOR: std::cell::RefCell<Option<turbojpeg::Decompressor>> =
        std::cell::RefCell::new(turbojpeg::Decompressor::new().ok());
}

/// How long `start` waits for the first decoded frame
const FIRST_FRAME_TIMEOUT: Duration = Duration::from_secs(5);

/// Format negotiation order for a given preference
fn preferred_formats(preference: CaptureFormat) -> [&'static [u8; 4]; 4] {
    match preference {
        CaptureFormat::Mjpeg => [b"MJPG", b"YUYV", b"RGB3", b"BGR3"],
        CaptureFormat::Yuyv => [b"YUYV", b"MJPG", b"RGB3", b"BGR3"],
    }
}

/// V4L2 camera publishing decoded frames from a background thread
pub struct V4lCamera {
    config: VideoConfig,
    slot: Arc<LatestFrameSlot>,
    shutdown: StopSignal,
    handle: Option<JoinHandle<()>>,
}

impl V4lCamera {
    pub fn new(config: VideoConfig) -> Self {
        Self {
            config,
            slot: Arc::new(LatestFrameSlot::new()),
            shutdown: StopSignal::new(),
            handle: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some() && !self.slot.is_closed()
    }
}

impl FrameSource for V4lCamera {
    fn start(&mut self) -> crate::error::Result<()> {
        if self.handle.is_some() {
            return Ok(());
        }

        // A fresh slot per session so a previous close does not linger
        self.slot = Arc::new(LatestFrameSlot::new());
        self.shutdown.reset();

        let config = self.config.clone();
        let slot = self.slot.clone();
        let stop = self.shutdown.clone();
        let handle = std::thread::Builder::new()
            .name("camera-capture".to_string())
            .spawn(move || {
                let reason = match run_capture(&config, &slot, &stop) {
                    Ok(()) => "capture stopped".to_string(),
                    Err(e) => {
                        error!("Camera capture failed: {:#}", e);
                        format!("{:#}", e)
                    }
                };
                slot.close(reason);
            })
            .map_err(|e| MappingError::FrameSourceUnavailable(format!("failed to spawn capture thread: {}", e)))?;
        self.handle = Some(handle);

        if self.slot.wait_for_first(FIRST_FRAME_TIMEOUT) {
            Ok(())
        } else {
            let err = self
                .slot
                .latest(self.config.stale_timeout())
                .err()
                .unwrap_or_else(|| MappingError::FrameSourceUnavailable("no frame from camera".to_string()));
            self.stop();
            Err(err)
        }
    }

    fn stop(&mut self) {
        self.shutdown.trigger();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Camera capture thread panicked");
            }
            info!("Camera {} released", self.config.input_device);
        }
        self.slot.close("capture stopped");
    }

    fn read_latest(&self) -> crate::error::Result<TimestampedFrame> {
        self.slot.latest(self.config.stale_timeout())
    }
}

impl Drop for V4lCamera {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Open the device and publish frames until `stop` fires
fn run_capture(config: &VideoConfig, slot: &LatestFrameSlot, stop: &StopSignal) -> Result<()> {
    info!("Input device: {}", config.input_device);
    info!(
        "Requested resolution: {}x{} @ {} fps",
        config.width, config.height, config.fps
    );

    let dev = Device::with_path(&config.input_device)
        .with_context(|| format!("Failed to open input device: {}", config.input_device))?;

    let caps = dev.query_caps().context("Failed to query device capabilities")?;
    info!("Camera: {} (driver: {})", caps.card, caps.driver);

    let format = configure_capture_format(&dev, config.width, config.height, config.format)?;
    info!(
        "Capture format: {}x{} {:?}",
        format.width,
        format.height,
        String::from_utf8_lossy(&format.fourcc.repr)
    );

    if let Err(e) = set_frame_rate(&dev, config.fps) {
        warn!("Could not set frame rate to {} fps: {}", config.fps, e);
    }

    let mut stream =
        Stream::with_buffers(&dev, Type::VideoCapture, 4).context("Failed to create capture stream")?;

    let dims = Dimensions::new(format.width, format.height);
    let width = format.width as usize;
    let height = format.height as usize;
    let mut rgb_buffer = vec![0u8; width * height * 3];

    let fourcc = format.fourcc.repr;
    let mut frame_count = 0u64;
    let mut last_stats_time = Instant::now();
    let stats_interval = Duration::from_secs(10);

    info!("Starting capture loop...");
    while !stop.is_triggered() {
        let (buf, _meta) = stream.next().context("Failed to capture frame")?;

        match &fourcc {
            b"MJPG" => {
                if decode_mjpeg(buf, &mut rgb_buffer, width, height).is_err() {
                    if frame_count % 100 == 0 {
                        warn!("Failed to decode MJPEG frame");
                    }
                    continue;
                }
            }
            b"YUYV" => yuyv_to_rgb(buf, &mut rgb_buffer, width, height),
            b"BGR3" => bgr_to_rgb(buf, &mut rgb_buffer),
            _ => {
                let copy_len = buf.len().min(rgb_buffer.len());
                rgb_buffer[..copy_len].copy_from_slice(&buf[..copy_len]);
            }
        }

        let frame = Frame::from_raw(dims, Depth::Rgb, rgb_buffer.clone())
            .context("Decoded frame has unexpected size")?;
        slot.publish(frame);

        frame_count += 1;
        if last_stats_time.elapsed() >= stats_interval {
            let elapsed = last_stats_time.elapsed().as_secs_f64();
            info!(
                "Capture: {:.1} fps ({} frames in {:.1}s)",
                frame_count as f64 / elapsed,
                frame_count,
                elapsed
            );
            frame_count = 0;
            last_stats_time = Instant::now();
        }
    }

    debug!("Capture loop exited on stop request");
    Ok(())
}

/// Configure the capture format, trying preferred formats in order
fn configure_capture_format(
    dev: &Device,
    width: u32,
    height: u32,
    preference: CaptureFormat,
) -> Result<v4l::Format> {
    let formats = dev.enum_formats().context("Failed to enumerate formats")?;

    info!("Available formats:");
    for fmt in &formats {
        info!("  {:?}: {}", String::from_utf8_lossy(&fmt.fourcc.repr), fmt.description);
    }

    for preferred in preferred_formats(preference) {
        let fourcc = FourCC::new(preferred);
        if !formats.iter().any(|f| f.fourcc == fourcc) {
            continue;
        }

        let mut format = dev.format().context("Failed to get current format")?;
        format.width = width;
        format.height = height;
        format.fourcc = fourcc;

        match dev.set_format(&format) {
            Ok(actual) => return Ok(actual),
            Err(e) => warn!(
                "Could not set format {:?} at {}x{}: {}",
                String::from_utf8_lossy(preferred),
                width,
                height,
                e
            ),
        }
    }

    // Fall back to whatever the device gives us
    let mut format = dev.format().context("Failed to get current format")?;
    format.width = width;
    format.height = height;

    match dev.set_format(&format) {
        Ok(actual) => Ok(actual),
        Err(e) => {
            warn!("Could not set resolution {}x{}: {}", width, height, e);
            dev.format().context("Failed to get device format")
        }
    }
}

fn set_frame_rate(dev: &Device, fps: u32) -> Result<()> {
    let mut params = dev.params().context("Failed to get parameters")?;
    params.interval = v4l::Fraction::new(1, fps.max(1));
    dev.set_params(&params).context("Failed to set parameters")?;

    let actual = dev.params().context("Failed to read back parameters")?;
    info!(
        "Frame interval {}/{} ({:.1} fps, requested {})",
        actual.interval.numerator,
        actual.interval.denominator,
        actual.interval.denominator as f64 / actual.interval.numerator.max(1) as f64,
        fps
    );
    Ok(())
}

/// Decode an MJPEG frame into `rgb_buffer` with turbojpeg, falling back to
/// jpeg-decoder when turbojpeg is unavailable or rejects the frame
fn decode_mjpeg(mjpeg_data: &[u8], rgb_buffer: &mut [u8], width: usize, height: usize) -> Result<()> {
    let expected_size = width * height * 3;

    let decoded = JPEG_DECOMPRESSOR.with(|decomp| {
        let mut decomp = decomp.borrow_mut();
        let decompressor = decomp.as_mut()?;
        let header = decompressor.read_header(mjpeg_data).ok()?;
        if header.width != width || header.height != height {
            return None;
        }
        let image = turbojpeg::Image {
            pixels: &mut rgb_buffer[..expected_size],
            width,
            pitch: width * 3,
            height,
            format: turbojpeg::PixelFormat::RGB,
        };
        decompressor.decompress(mjpeg_data, image).ok()
    });

    match decoded {
        Some(()) => Ok(()),
        None => decode_mjpeg_software(mjpeg_data, rgb_buffer, width, height),
    }
}

fn decode_mjpeg_software(mjpeg_data: &[u8], rgb_buffer: &mut [u8], width: usize, height: usize) -> Result<()> {
    let mut decoder = jpeg_decoder::Decoder::new(std::io::Cursor::new(mjpeg_data));
    let pixels = decoder.decode().context("Failed to decode JPEG")?;
    let info = decoder.info().context("JPEG has no header info")?;

    match info.pixel_format {
        jpeg_decoder::PixelFormat::L8 => {
            for (rgb, &gray) in rgb_buffer.chunks_exact_mut(3).zip(pixels.iter().take(width * height)) {
                rgb.fill(gray);
            }
        }
        _ => {
            let copy_len = pixels.len().min(rgb_buffer.len());
            rgb_buffer[..copy_len].copy_from_slice(&pixels[..copy_len]);
        }
    }
    Ok(())
}

/// Convert YUYV to RGB using fixed-point BT.601 (no floating point)
#[inline]
pub fn yuyv_to_rgb(yuyv: &[u8], rgb: &mut [u8], width: usize, height: usize) {
    let pairs = (width * height) / 2;

    for (src, dst) in yuyv.chunks_exact(4).zip(rgb.chunks_exact_mut(6)).take(pairs) {
        let y0 = src[0] as i32;
        let u = src[1] as i32 - 128;
        let y1 = src[2] as i32;
        let v = src[3] as i32 - 128;

        // R = Y + 1.402 V, G = Y - 0.344 U - 0.714 V, B = Y + 1.772 U (scaled by 256)
        let v_r = (359 * v) >> 8;
        let uv_g = (88 * u + 183 * v) >> 8;
        let u_b = (454 * u) >> 8;

        dst[0] = (y0 + v_r).clamp(0, 255) as u8;
        dst[1] = (y0 - uv_g).clamp(0, 255) as u8;
        dst[2] = (y0 + u_b).clamp(0, 255) as u8;
        dst[3] = (y1 + v_r).clamp(0, 255) as u8;
        dst[4] = (y1 - uv_g).clamp(0, 255) as u8;
        dst[5] = (y1 + u_b).clamp(0, 255) as u8;
    }
}

/// Swap the R and B channels
#[inline]
pub fn bgr_to_rgb(bgr: &[u8], rgb: &mut [u8]) {
    for (bgr_chunk, rgb_chunk) in bgr.chunks_exact(3).zip(rgb.chunks_exact_mut(3)) {
        rgb_chunk[0] = bgr_chunk[2];
        rgb_chunk[1] = bgr_chunk[1];
        rgb_chunk[2] = bgr_chunk[0];
    }
}
