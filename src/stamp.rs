//! Stamp sources: pre-scanned height patterns.
//!
//! A stamp resource is a flat binary record of five little-endian `f32`
//! metadata values (scan width, scan depth, scan height, scan resolution, base
//! level) followed by `resolution * resolution` little-endian `f32` height
//! samples. The buffer is immutable per load apart from the explicit `invert`
//! and `normalize` transforms.

use std::path::Path;

use crate::grid::SampleGrid;

/// Number of metadata scalars preceding the height buffer.
const META_COUNT: usize = 5;

/// A loaded stamp: height buffer plus scan-time metadata.
#[derive(Clone, Debug)]
pub struct StampSource {
    heights: SampleGrid,
    /// Physical width of the scanned area in world units.
    pub scan_width_wu: f32,
    /// Physical depth of the scanned area in world units.
    pub scan_depth_wu: f32,
    /// Physical height range of the scan in world units.
    pub scan_height_wu: f32,
    /// Sampling resolution used during scanning.
    pub scan_resolution: f32,
    /// Fraction of the scan height representing "ground".
    pub base_level: f32,
}

#[derive(Debug)]
pub enum StampError {
    Io(std::io::Error),
    /// The record ends before the declared height buffer is complete.
    Truncated { expected: usize, got: usize },
    /// The height buffer is empty.
    EmptyBuffer,
    /// The declared scan resolution is not a positive finite number.
    BadResolution(f32),
    /// The declared physical extents are not positive finite numbers.
    BadExtent(f32),
}

impl std::fmt::Display for StampError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StampError::Io(e) => write!(f, "IO error: {}", e),
            StampError::Truncated { expected, got } => {
                write!(f, "Truncated stamp record: expected {} samples, got {}", expected, got)
            }
            StampError::EmptyBuffer => write!(f, "Stamp height buffer is empty"),
            StampError::BadResolution(r) => write!(f, "Bad stamp scan resolution: {}", r),
            StampError::BadExtent(e) => write!(f, "Bad stamp physical extent: {}", e),
        }
    }
}

impl std::error::Error for StampError {}

impl From<std::io::Error> for StampError {
    fn from(e: std::io::Error) -> Self {
        StampError::Io(e)
    }
}

impl StampSource {
    /// Build a stamp from an existing buffer. The scan resolution is taken
    /// from the buffer dimensions.
    pub fn new(
        heights: SampleGrid,
        scan_width_wu: f32,
        scan_depth_wu: f32,
        scan_height_wu: f32,
        base_level: f32,
    ) -> Result<Self, StampError> {
        if heights.is_empty() {
            return Err(StampError::EmptyBuffer);
        }
        for extent in [scan_width_wu, scan_depth_wu, scan_height_wu] {
            if !(extent.is_finite() && extent > 0.0) {
                return Err(StampError::BadExtent(extent));
            }
        }
        let scan_resolution = heights.width() as f32;
        Ok(Self {
            heights,
            scan_width_wu,
            scan_depth_wu,
            scan_height_wu,
            scan_resolution,
            base_level,
        })
    }

    /// Parse the flat binary stamp record.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StampError> {
        let available = bytes.len() / 4;
        if available < META_COUNT {
            return Err(StampError::Truncated {
                expected: META_COUNT,
                got: available,
            });
        }

        let mut floats = bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]));

        let scan_width_wu = floats.next().unwrap();
        let scan_depth_wu = floats.next().unwrap();
        let scan_height_wu = floats.next().unwrap();
        let scan_resolution = floats.next().unwrap();
        let base_level = floats.next().unwrap();

        if !(scan_resolution.is_finite() && scan_resolution >= 1.0) {
            return Err(StampError::BadResolution(scan_resolution));
        }
        let res = scan_resolution.round() as usize;
        let expected = res * res;
        let samples: Vec<f32> = floats.collect();
        if samples.len() < expected {
            return Err(StampError::Truncated {
                expected,
                got: samples.len(),
            });
        }

        let heights = SampleGrid::from_vec(res, res, samples[..expected].to_vec())
            .ok_or(StampError::EmptyBuffer)?;
        let mut stamp = Self::new(
            heights,
            scan_width_wu,
            scan_depth_wu,
            scan_height_wu,
            base_level,
        )?;
        stamp.scan_resolution = scan_resolution;
        Ok(stamp)
    }

    /// Load a stamp record from disk.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, StampError> {
        let bytes = std::fs::read(path)?;
        Self::from_bytes(&bytes)
    }

    pub fn heights(&self) -> &SampleGrid {
        &self.heights
    }

    pub fn resolution(&self) -> usize {
        self.heights.width()
    }

    /// Bilinear height sample at normalized coordinates in `[0,1]`².
    pub fn sample(&self, u: f32, v: f32) -> f32 {
        self.heights.sample_normalized(u, v)
    }

    /// Flip the buffer vertically: `h -> 1 - h`. Applying it twice restores
    /// the original buffer exactly.
    pub fn invert(&mut self) {
        for v in self.heights.as_mut_slice() {
            *v = 1.0 - *v;
        }
        self.base_level = 1.0 - self.base_level;
    }

    /// Rescale the buffer so its values span the full `[0,1]` range.
    /// Idempotent; a buffer with negligible range is left unchanged.
    pub fn normalize(&mut self) {
        let (min_v, max_v) = self.heights.min_max();
        let range = max_v - min_v;
        if range < 1e-4 {
            return;
        }
        for v in self.heights.as_mut_slice() {
            *v = (*v - min_v) / range;
        }
    }
}
