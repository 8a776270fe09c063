//! A 2D grid of `f32` samples with clamped edges.
//!
//! Unlike an equirectangular map, terrain tiles and stamp buffers do not wrap
//! on any axis: sampling past an edge clamps to the border sample. The grid is
//! the shared backing type for stamp height buffers and mask buffers.

use serde::{Deserialize, Serialize};

/// A rectangular grid of height/weight samples.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SampleGrid {
    width: usize,
    height: usize,
    data: Vec<f32>,
}

impl SampleGrid {
    pub fn new(width: usize, height: usize) -> Self {
        Self::new_with(width, height, 0.0)
    }

    pub fn new_with(width: usize, height: usize, value: f32) -> Self {
        Self {
            width,
            height,
            data: vec![value; width * height],
        }
    }

    /// Wrap an existing buffer. Returns `None` if the length does not match
    /// the given dimensions.
    pub fn from_vec(width: usize, height: usize, data: Vec<f32>) -> Option<Self> {
        if data.len() != width * height {
            return None;
        }
        Some(Self {
            width,
            height,
            data,
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn index(&self, x: usize, y: usize) -> usize {
        debug_assert!(x < self.width && y < self.height);
        y * self.width + x
    }

    pub fn get(&self, x: usize, y: usize) -> f32 {
        self.data[self.index(x, y)]
    }

    pub fn set(&mut self, x: usize, y: usize, value: f32) {
        let idx = self.index(x, y);
        self.data[idx] = value;
    }

    pub fn fill(&mut self, value: f32) {
        self.data.fill(value);
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut self.data
    }

    /// Iterate over all samples with their coordinates.
    pub fn iter(&self) -> impl Iterator<Item = (usize, usize, f32)> + '_ {
        self.data.iter().enumerate().map(move |(idx, &val)| {
            let x = idx % self.width;
            let y = idx / self.width;
            (x, y, val)
        })
    }

    /// Minimum and maximum sample value. Returns `(0.0, 0.0)` for an empty grid.
    pub fn min_max(&self) -> (f32, f32) {
        if self.data.is_empty() {
            return (0.0, 0.0);
        }
        let mut min_v = f32::MAX;
        let mut max_v = f32::MIN;
        for &v in &self.data {
            if v < min_v {
                min_v = v;
            }
            if v > max_v {
                max_v = v;
            }
        }
        (min_v, max_v)
    }

    /// Sample at fractional grid coordinates using bilinear interpolation.
    /// Coordinates outside the grid clamp to the border samples.
    pub fn sample_bilinear(&self, x: f32, y: f32) -> f32 {
        let x0 = x.floor();
        let y0 = y.floor();
        let fx = x - x0;
        let fy = y - y0;

        let cx = |v: i64| v.clamp(0, self.width as i64 - 1) as usize;
        let cy = |v: i64| v.clamp(0, self.height as i64 - 1) as usize;

        let xi = x0 as i64;
        let yi = y0 as i64;

        let v00 = self.get(cx(xi), cy(yi));
        let v10 = self.get(cx(xi + 1), cy(yi));
        let v01 = self.get(cx(xi), cy(yi + 1));
        let v11 = self.get(cx(xi + 1), cy(yi + 1));

        let v0 = v00 * (1.0 - fx) + v10 * fx;
        let v1 = v01 * (1.0 - fx) + v11 * fx;
        v0 * (1.0 - fy) + v1 * fy
    }

    /// Sample at normalized coordinates in `[0,1]` on each axis.
    pub fn sample_normalized(&self, u: f32, v: f32) -> f32 {
        let x = u.clamp(0.0, 1.0) * (self.width.saturating_sub(1)) as f32;
        let y = v.clamp(0.0, 1.0) * (self.height.saturating_sub(1)) as f32;
        self.sample_bilinear(x, y)
    }
}
