//! Calibration document persistence
//!
//! The document is a JSON list with one record per surface:
//!
//! ```json
//! [{"cam_points": [[x, y], ...], "prj_points": [[x, y], ...]}]
//! ```
//!
//! Only the raw correspondences are stored. Transforms are re-fitted on load,
//! and loading is all-or-nothing: any bad record fails the whole document.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{MappingError, Result};
use crate::frame::Point2D;
use crate::surface::Surface;

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct SurfaceRecord {
    cam_points: Vec<[f64; 2]>,
    prj_points: Vec<[f64; 2]>,
}

impl From<&Surface> for SurfaceRecord {
    fn from(surface: &Surface) -> Self {
        Self {
            cam_points: surface.camera_points().iter().map(|p| p.to_array()).collect(),
            prj_points: surface.projector_points().iter().map(|p| p.to_array()).collect(),
        }
    }
}

/// Serialize surfaces to the document text
pub fn to_document(surfaces: &[Surface]) -> Result<String> {
    let records: Vec<SurfaceRecord> = surfaces.iter().map(SurfaceRecord::from).collect();
    serde_json::to_string_pretty(&records)
        .map_err(|e| MappingError::MalformedDocument(format!("failed to serialize: {}", e)))
}

/// Parse document text and rebuild every surface
pub fn from_document(text: &str) -> Result<Vec<Surface>> {
    let records: Vec<SurfaceRecord> =
        serde_json::from_str(text).map_err(|e| MappingError::MalformedDocument(e.to_string()))?;

    records
        .into_iter()
        .enumerate()
        .map(|(index, record)| {
            let camera = quad(&record.cam_points, index, "cam_points")?;
            let projector = quad(&record.prj_points, index, "prj_points")?;
            Surface::new(camera, projector)
        })
        .collect()
}

/// Write the document, creating the parent directory if needed
pub fn save(surfaces: &[Surface], path: &Path) -> Result<()> {
    let content = to_document(surfaces)?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| MappingError::storage(parent, e))?;
    }
    std::fs::write(path, content).map_err(|e| MappingError::storage(path, e))?;

    tracing::info!("Saved {} surface(s) to {:?}", surfaces.len(), path);
    Ok(())
}

pub fn load(path: &Path) -> Result<Vec<Surface>> {
    let content = std::fs::read_to_string(path).map_err(|e| MappingError::storage(path, e))?;
    from_document(&content)
}

fn quad(points: &[[f64; 2]], index: usize, field: &str) -> Result<[Point2D; 4]> {
    let points: &[[f64; 2]; 4] = points.try_into().map_err(|_| {
        MappingError::MalformedDocument(format!(
            "surface {} has {} {}, expected 4",
            index,
            points.len(),
            field
        ))
    })?;
    Ok((*points).map(Point2D::from_array))
}
