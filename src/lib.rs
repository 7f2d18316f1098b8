//! projmap - camera-calibrated projection mapping
//!
//! A camera watches a scene lit by a projector. The operator marks flat
//! surfaces once; from then on any content drawn in camera coordinates is
//! warped so it lands on those surfaces when projected.

pub mod calibration;
pub mod capture;
pub mod compositor;
pub mod config;
pub mod draw;
pub mod error;
pub mod frame;
pub mod output;
pub mod pipeline;
pub mod server;
pub mod slot;
pub mod store;
pub mod surface;
pub mod transform;

pub use calibration::{CalibrationView, PointerEvent, PointerKind, SurfaceCalibrator};
pub use compositor::Compositor;
pub use error::{MappingError, Result};
pub use frame::{Depth, Dimensions, Frame, Point2D};
pub use pipeline::{run_render_loop, DisplaySink, FrameSource, StopSignal};
pub use surface::Surface;
pub use transform::PerspectiveTransform;
