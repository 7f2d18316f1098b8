//! A calibrated projection surface
//!
//! A surface is one quadrilateral with four camera-space points and the four
//! projector-space points that land on them. Both directions are fitted
//! independently from the raw clicks, so the pair is not an exact matrix
//! inverse of each other.

use crate::error::Result;
use crate::frame::{Dimensions, Frame, Point2D};
use crate::transform::PerspectiveTransform;

#[derive(Debug, Clone, PartialEq)]
pub struct Surface {
    camera_points: [Point2D; 4],
    projector_points: [Point2D; 4],
    /// Projector plane -> camera plane
    to_camera: PerspectiveTransform,
    /// Camera plane -> projector plane
    to_projector: PerspectiveTransform,
}

impl Surface {
    /// Build a surface from the four ordered correspondences.
    /// `camera_points[i]` is where `projector_points[i]` was observed.
    pub fn new(camera_points: [Point2D; 4], projector_points: [Point2D; 4]) -> Result<Self> {
        let to_camera = PerspectiveTransform::fit(&projector_points, &camera_points)?;
        let to_projector = PerspectiveTransform::fit(&camera_points, &projector_points)?;

        Ok(Self {
            camera_points,
            projector_points,
            to_camera,
            to_projector,
        })
    }

    pub fn camera_points(&self) -> &[Point2D; 4] {
        &self.camera_points
    }

    pub fn projector_points(&self) -> &[Point2D; 4] {
        &self.projector_points
    }

    pub fn to_camera_transform(&self) -> &PerspectiveTransform {
        &self.to_camera
    }

    pub fn to_projector_transform(&self) -> &PerspectiveTransform {
        &self.to_projector
    }

    /// Warp a content frame so that, once projected, it lands on this
    /// surface as seen by the camera.
    ///
    /// The content is first masked to the camera-space quadrilateral, then
    /// projected with the camera -> projector fit.
    pub fn warp_to_observed_space(&self, content: &Frame, output: Dimensions) -> Frame {
        let masked = content.masked_by_polygon(&self.camera_points);
        self.to_projector.warp(&masked, output)
    }

    /// Inverse of [`Surface::warp_to_observed_space`]: mask a projector frame
    /// to this surface's projector-space quadrilateral and bring it back into
    /// camera coordinates.
    pub fn warp_to_content_space(&self, observed: &Frame, output: Dimensions) -> Frame {
        let masked = observed.masked_by_polygon(&self.projector_points);
        self.to_camera.warp(&masked, output)
    }
}
