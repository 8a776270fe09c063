//! Axis-aligned bounds for the three world coordinate spaces.
//!
//! The world manager keeps one `Bounds` per coordinate space (World Units,
//! Terrain Units, Normalized Units); all three describe the same physical
//! volume. Containment on the editing plane is half-open: `min <= p < max`
//! on x and z, so adjacent worlds could tile without double-claiming the
//! shared edge.

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min: [f32; 3],
    pub max: [f32; 3],
}

impl Bounds {
    pub fn new(min: [f32; 3], max: [f32; 3]) -> Self {
        Self { min, max }
    }

    pub fn center(&self) -> [f32; 3] {
        [
            (self.min[0] + self.max[0]) * 0.5,
            (self.min[1] + self.max[1]) * 0.5,
            (self.min[2] + self.max[2]) * 0.5,
        ]
    }

    pub fn size(&self) -> [f32; 3] {
        [
            self.max[0] - self.min[0],
            self.max[1] - self.min[1],
            self.max[2] - self.min[2],
        ]
    }

    /// Half-open containment test on the horizontal plane (x and z only).
    pub fn contains_xz(&self, x: f32, z: f32) -> bool {
        x >= self.min[0] && x < self.max[0] && z >= self.min[2] && z < self.max[2]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bounds() -> Bounds {
        Bounds::new([-50.0, 0.0, -50.0], [50.0, 100.0, 50.0])
    }

    #[test]
    fn test_min_is_inside_max_is_not() {
        let b = bounds();
        assert!(b.contains_xz(-50.0, -50.0));
        assert!(!b.contains_xz(50.0, 50.0));
    }

    #[test]
    fn test_below_min_is_outside() {
        let b = bounds();
        assert!(!b.contains_xz(-51.0, 0.0));
        assert!(!b.contains_xz(0.0, -51.0));
    }

    #[test]
    fn test_at_max_on_one_axis_is_outside() {
        let b = bounds();
        assert!(!b.contains_xz(50.0, 0.0));
        assert!(!b.contains_xz(0.0, 50.0));
    }

    #[test]
    fn test_center_and_size() {
        let b = bounds();
        assert_eq!(b.center(), [0.0, 50.0, 0.0]);
        assert_eq!(b.size(), [100.0, 100.0, 100.0]);
    }
}
