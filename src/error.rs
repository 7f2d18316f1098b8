//! Error types for the calibration and compositing core

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T, E = MappingError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum MappingError {
    /// The 4-point fit is ill-conditioned (collinear or duplicate points)
    #[error("degenerate geometry: {0}")]
    DegenerateGeometry(String),

    /// A calibration document entry does not match the expected schema
    #[error("malformed calibration document: {0}")]
    MalformedDocument(String),

    #[error("calibration storage error for {path:?}: {source}")]
    StorageIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The capture collaborator stopped delivering frames
    #[error("frame source unavailable: {0}")]
    FrameSourceUnavailable(String),

    #[error("display sink failed: {0}")]
    Display(String),

    #[error("frame buffer of {actual} bytes does not match {width}x{height}x{channels}")]
    DimensionMismatch {
        width: u32,
        height: u32,
        channels: usize,
        actual: usize,
    },

    /// Stop signal observed before the loop finished
    #[error("cancelled")]
    Cancelled,
}

impl MappingError {
    pub fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::StorageIo {
            path: path.into(),
            source,
        }
    }
}
