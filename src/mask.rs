//! Mask buffers for stamping.
//!
//! A mask modulates stamp strength per sample, values in `[0,1]`. Masks can be
//! derived from a grayscale image, from procedural Perlin noise, or supplied
//! directly as a grid. Resolution happens before a stamping run starts; a
//! failed mask never reaches the engine.

use std::path::PathBuf;

use noise::{NoiseFn, Perlin, Seedable};
use serde::{Deserialize, Serialize};

use crate::grid::SampleGrid;

/// Parameters for a procedural noise mask.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NoiseMaskParams {
    pub seed: u32,
    /// Output buffer resolution (square).
    pub resolution: usize,
    /// Base noise frequency across the buffer.
    pub frequency: f64,
    pub octaves: u32,
    pub persistence: f64,
    pub lacunarity: f64,
}

impl Default for NoiseMaskParams {
    fn default() -> Self {
        Self {
            seed: 0,
            resolution: 128,
            frequency: 4.0,
            octaves: 4,
            persistence: 0.5,
            lacunarity: 2.0,
        }
    }
}

/// Where a mask buffer comes from.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum MaskSource {
    /// Grayscale image on disk; luminance becomes mask strength.
    Image(PathBuf),
    /// Procedural Perlin fBm, normalized into `[0,1]`.
    Noise(NoiseMaskParams),
    /// An already-built buffer. Values must lie in `[0,1]`.
    Grid(SampleGrid),
}

#[derive(Debug)]
pub enum MaskError {
    Image(image::ImageError),
    /// The resolved buffer has no samples.
    EmptyMask,
    /// A supplied buffer contains values outside `[0,1]`.
    OutOfRange { x: usize, y: usize, value: f32 },
    /// Noise parameters that cannot produce a buffer.
    BadParams(String),
}

impl std::fmt::Display for MaskError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MaskError::Image(e) => write!(f, "Image error: {}", e),
            MaskError::EmptyMask => write!(f, "Mask buffer is empty"),
            MaskError::OutOfRange { x, y, value } => {
                write!(f, "Mask value {} at ({}, {}) outside [0,1]", value, x, y)
            }
            MaskError::BadParams(msg) => write!(f, "Bad mask parameters: {}", msg),
        }
    }
}

impl std::error::Error for MaskError {}

impl From<image::ImageError> for MaskError {
    fn from(e: image::ImageError) -> Self {
        MaskError::Image(e)
    }
}

impl MaskSource {
    /// Resolve the source into a concrete buffer, surfacing any failure
    /// before a stamping run begins.
    pub fn resolve(&self) -> Result<SampleGrid, MaskError> {
        match self {
            MaskSource::Image(path) => {
                let img = image::open(path)?.to_luma8();
                let (w, h) = (img.width() as usize, img.height() as usize);
                if w == 0 || h == 0 {
                    return Err(MaskError::EmptyMask);
                }
                let mut grid = SampleGrid::new(w, h);
                for (x, y, pixel) in img.enumerate_pixels() {
                    grid.set(x as usize, y as usize, pixel.0[0] as f32 / 255.0);
                }
                Ok(grid)
            }
            MaskSource::Noise(params) => noise_mask(params),
            MaskSource::Grid(grid) => {
                if grid.is_empty() {
                    return Err(MaskError::EmptyMask);
                }
                for (x, y, v) in grid.iter() {
                    if !(0.0..=1.0).contains(&v) {
                        return Err(MaskError::OutOfRange { x, y, value: v });
                    }
                }
                Ok(grid.clone())
            }
        }
    }
}

/// Build a mask from multi-octave Perlin noise, remapped from roughly
/// `[-1,1]` into `[0,1]` and clamped.
fn noise_mask(params: &NoiseMaskParams) -> Result<SampleGrid, MaskError> {
    if params.resolution == 0 {
        return Err(MaskError::BadParams("resolution must be positive".into()));
    }
    if params.octaves == 0 {
        return Err(MaskError::BadParams("octaves must be positive".into()));
    }

    let perlin = Perlin::new(1).set_seed(params.seed);
    let res = params.resolution;
    let mut grid = SampleGrid::new(res, res);

    for z in 0..res {
        for x in 0..res {
            let nx = x as f64 / res as f64 * params.frequency;
            let nz = z as f64 / res as f64 * params.frequency;
            let n = fbm(
                &perlin,
                nx,
                nz,
                params.octaves,
                params.persistence,
                params.lacunarity,
            );
            grid.set(x, z, (((n + 1.0) * 0.5) as f32).clamp(0.0, 1.0));
        }
    }

    Ok(grid)
}

/// Fractional Brownian Motion - multi-octave noise
fn fbm(
    noise: &Perlin,
    x: f64,
    y: f64,
    octaves: u32,
    persistence: f64,
    lacunarity: f64,
) -> f64 {
    let mut total = 0.0;
    let mut amplitude = 1.0;
    let mut frequency = 1.0;
    let mut max_value = 0.0;

    for _ in 0..octaves {
        total += amplitude * noise.get([x * frequency, y * frequency]);
        max_value += amplitude;
        amplitude *= persistence;
        frequency *= lacunarity;
    }

    total / max_value
}
