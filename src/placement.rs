//! Stamp placement state.
//!
//! Everything that parameterizes one stamping run besides the stamp buffer
//! itself: where the stamp goes, how it is rotated and scaled, which blend
//! operation applies, and the falloff/mask shaping. The whole state is
//! serde-serializable so the operation log can keep a faithful snapshot of
//! each run.

use serde::{Deserialize, Serialize};

use crate::curve::Curve;
use crate::grid::SampleGrid;

/// Numeric blend operation applied per destination sample.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum StampOperation {
    /// Move toward the stamp height only where it is above the current height.
    Raise,
    /// Move toward the stamp height only where it is below the current height.
    Lower,
    /// Interpolate toward a fixed mix of current and stamp height.
    Blend,
    /// Move toward the absolute difference of stamp and current height.
    Difference,
    /// Add the stamp height as a relative physical offset scaled by the
    /// stencil height, independent of absolute elevation.
    Stencil,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlacementState {
    /// Placement position in world units (x, y, z); y offsets the stamp's
    /// base elevation.
    pub position_wu: [f32; 3],
    /// Rotation around the vertical axis in degrees; taken modulo 360.
    pub rotation_deg: f32,
    /// Horizontal scale applied to the stamp's scanned footprint. Must be
    /// positive.
    pub width_scale: f32,
    /// Vertical scale applied to the stamp's scanned height range. Must be
    /// positive.
    pub height_scale: f32,
    pub operation: StampOperation,
    /// Mix factor for [`StampOperation::Blend`], in `[0,1]`.
    pub blend_strength: f32,
    /// Physical offset in world units applied by [`StampOperation::Stencil`].
    pub stencil_height_wu: f32,
    /// Distance falloff from the stamp center (0) to its corner (1).
    pub falloff: Curve,
    /// Optional remap applied to the raw stamp height before conversion.
    pub height_remap: Option<Curve>,
    /// Optional resolved mask buffer, values in `[0,1]`.
    pub mask: Option<SampleGrid>,
}

impl PlacementState {
    pub fn new(position_wu: [f32; 3], operation: StampOperation) -> Self {
        Self {
            position_wu,
            rotation_deg: 0.0,
            width_scale: 1.0,
            height_scale: 1.0,
            operation,
            blend_strength: 0.5,
            stencil_height_wu: 0.0,
            falloff: Curve::Constant(1.0),
            height_remap: None,
            mask: None,
        }
    }

    /// Rotation normalized into `[0, 360)` degrees.
    pub fn rotation_normalized(&self) -> f32 {
        self.rotation_deg.rem_euclid(360.0)
    }

    /// Check the numeric parameters a run depends on. Returns a
    /// human-readable description of the first violation.
    pub fn validate(&self) -> Result<(), String> {
        if !(self.width_scale.is_finite() && self.width_scale > 0.0) {
            return Err(format!("width scale must be positive, got {}", self.width_scale));
        }
        if !(self.height_scale.is_finite() && self.height_scale > 0.0) {
            return Err(format!("height scale must be positive, got {}", self.height_scale));
        }
        if !self.rotation_deg.is_finite() {
            return Err(format!("rotation must be finite, got {}", self.rotation_deg));
        }
        if !(0.0..=1.0).contains(&self.blend_strength) {
            return Err(format!(
                "blend strength must be in [0,1], got {}",
                self.blend_strength
            ));
        }
        if let Some(mask) = &self.mask {
            if mask.is_empty() {
                return Err("mask buffer is empty".to_string());
            }
        }
        if let Err(e) = self.falloff.validate() {
            return Err(format!("falloff curve: {}", e));
        }
        if let Some(remap) = &self.height_remap {
            if let Err(e) = remap.validate() {
                return Err(format!("height remap curve: {}", e));
            }
        }
        Ok(())
    }
}
