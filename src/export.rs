//! Image exports.
//!
//! Rasterizes the world's height field into PNG images: grayscale and
//! spectral-colored height maps, a slope-derived normal map, a shoreline mask
//! flood-filled outward from water, and a composite of per-layer blend
//! weights. Rendering reads resident tiles only, so callers load the world
//! first; rows are rasterized in parallel.

use std::collections::VecDeque;
use std::path::Path;

use image::{GrayImage, ImageBuffer, Luma, Rgb, RgbImage, Rgba, RgbaImage};
use rayon::prelude::*;

use crate::storage::{StorageError, TileStorage};
use crate::world::WorldManager;

#[derive(Debug)]
pub enum ExportError {
    Image(image::ImageError),
    Storage(StorageError),
    /// Export target dimensions are zero.
    EmptyWorld,
}

impl std::fmt::Display for ExportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExportError::Image(e) => write!(f, "Image error: {}", e),
            ExportError::Storage(e) => write!(f, "Storage error: {}", e),
            ExportError::EmptyWorld => write!(f, "World has no samples to export"),
        }
    }
}

impl std::error::Error for ExportError {}

impl From<image::ImageError> for ExportError {
    fn from(e: image::ImageError) -> Self {
        ExportError::Image(e)
    }
}

impl From<StorageError> for ExportError {
    fn from(e: StorageError) -> Self {
        ExportError::Storage(e)
    }
}

/// Spectral colormap (matplotlib style): dark blue -> cyan -> green -> yellow -> orange -> red
fn spectral_colormap(t: f32) -> [u8; 3] {
    let colors: [[f32; 3]; 11] = [
        [0.37, 0.31, 0.64],  // Dark blue/purple (low)
        [0.20, 0.53, 0.74],  // Blue
        [0.40, 0.76, 0.65],  // Teal
        [0.67, 0.87, 0.64],  // Light green
        [0.90, 0.96, 0.60],  // Yellow-green
        [1.00, 1.00, 0.75],  // Light yellow / white
        [1.00, 0.88, 0.55],  // Yellow
        [0.99, 0.68, 0.38],  // Light orange
        [0.96, 0.43, 0.26],  // Orange
        [0.84, 0.24, 0.31],  // Red
        [0.62, 0.00, 0.26],  // Dark red (high)
    ];

    let t_scaled = t.clamp(0.0, 1.0) * 10.0;
    let idx = (t_scaled as usize).min(9);
    let frac = t_scaled - idx as f32;

    let c1 = colors[idx];
    let c2 = colors[idx + 1];

    [
        ((c1[0] + (c2[0] - c1[0]) * frac) * 255.0) as u8,
        ((c1[1] + (c2[1] - c1[1]) * frac) * 255.0) as u8,
        ((c1[2] + (c2[2] - c1[2]) * frac) * 255.0) as u8,
    ]
}

/// Render the height field to grayscale, one pixel per sample.
pub fn render_height_gray<S: TileStorage + Sync>(world: &WorldManager<S>) -> GrayImage {
    let (sx, sz) = world.total_samples();
    let rows: Vec<Vec<u8>> = (0..sz)
        .into_par_iter()
        .map(|z| {
            (0..sx)
                .map(|x| (world.sample_resident(x, z).clamp(0.0, 1.0) * 255.0) as u8)
                .collect()
        })
        .collect();

    let mut img: GrayImage = ImageBuffer::new(sx as u32, sz as u32);
    for (z, row) in rows.iter().enumerate() {
        for (x, &v) in row.iter().enumerate() {
            img.put_pixel(x as u32, z as u32, Luma([v]));
        }
    }
    img
}

/// Render the height field through the spectral colormap.
pub fn render_height_spectral<S: TileStorage + Sync>(world: &WorldManager<S>) -> RgbImage {
    let (sx, sz) = world.total_samples();
    let rows: Vec<Vec<[u8; 3]>> = (0..sz)
        .into_par_iter()
        .map(|z| {
            (0..sx)
                .map(|x| spectral_colormap(world.sample_resident(x, z)))
                .collect()
        })
        .collect();

    let mut img: RgbImage = ImageBuffer::new(sx as u32, sz as u32);
    for (z, row) in rows.iter().enumerate() {
        for (x, &color) in row.iter().enumerate() {
            img.put_pixel(x as u32, z as u32, Rgb(color));
        }
    }
    img
}

/// Render a tangent-space normal map from central height differences. Slopes
/// are evaluated in physical units so the result is independent of sample
/// density.
pub fn render_normal_map<S: TileStorage + Sync>(world: &WorldManager<S>) -> RgbImage {
    let (sx, sz) = world.total_samples();
    let height_wu = world.world_height_wu();
    let spacing_wu = world.conversions().tu_to_wu.0;

    let sample = |x: i64, z: i64| -> f32 {
        let xi = x.clamp(0, sx as i64 - 1) as usize;
        let zi = z.clamp(0, sz as i64 - 1) as usize;
        world.sample_resident(xi, zi)
    };

    let rows: Vec<Vec<[u8; 3]>> = (0..sz as i64)
        .into_par_iter()
        .map(|z| {
            (0..sx as i64)
                .map(|x| {
                    // Central differences, slope in WU per WU.
                    let dx = (sample(x + 1, z) - sample(x - 1, z)) * height_wu
                        / (2.0 * spacing_wu);
                    let dz = (sample(x, z + 1) - sample(x, z - 1)) * height_wu
                        / (2.0 * spacing_wu);
                    let len = (dx * dx + dz * dz + 1.0).sqrt();
                    let n = [-dx / len, -dz / len, 1.0 / len];
                    [
                        ((n[0] * 0.5 + 0.5) * 255.0) as u8,
                        ((n[1] * 0.5 + 0.5) * 255.0) as u8,
                        ((n[2] * 0.5 + 0.5) * 255.0) as u8,
                    ]
                })
                .collect()
        })
        .collect();

    let mut img: RgbImage = ImageBuffer::new(sx as u32, sz as u32);
    for (z, row) in rows.iter().enumerate() {
        for (x, &color) in row.iter().enumerate() {
            img.put_pixel(x as u32, z as u32, Rgb(color));
        }
    }
    img
}

/// Render a shoreline mask: samples at or below `water_level` are full white,
/// land fades linearly to black over `falloff_samples` steps away from the
/// nearest water. Distances come from a multi-source BFS over the sample grid.
pub fn render_shoreline_mask<S: TileStorage>(
    world: &WorldManager<S>,
    water_level: f32,
    falloff_samples: f32,
) -> GrayImage {
    let (sx, sz) = world.total_samples();
    let mut distance = vec![u32::MAX; sx * sz];
    let mut queue = VecDeque::new();

    for z in 0..sz {
        for x in 0..sx {
            if world.sample_resident(x, z) <= water_level {
                distance[z * sx + x] = 0;
                queue.push_back((x, z));
            }
        }
    }

    while let Some((x, z)) = queue.pop_front() {
        let d = distance[z * sx + x];
        let neighbors = [
            (x.wrapping_sub(1), z),
            (x + 1, z),
            (x, z.wrapping_sub(1)),
            (x, z + 1),
        ];
        for (nx, nz) in neighbors {
            if nx >= sx || nz >= sz {
                continue;
            }
            let idx = nz * sx + nx;
            if distance[idx] > d + 1 {
                distance[idx] = d + 1;
                queue.push_back((nx, nz));
            }
        }
    }

    let mut img: GrayImage = ImageBuffer::new(sx as u32, sz as u32);
    for z in 0..sz {
        for x in 0..sx {
            let d = distance[z * sx + x];
            let v = if d == u32::MAX {
                0.0
            } else {
                (1.0 - d as f32 / falloff_samples.max(1.0)).max(0.0)
            };
            img.put_pixel(x as u32, z as u32, Luma([(v * 255.0) as u8]));
        }
    }
    img
}

/// Composite up to the first four texture layers' blend weights into the
/// RGBA channels of one image, read straight from the tile records.
pub fn render_layer_weights<S: TileStorage>(
    world: &WorldManager<S>,
) -> Result<RgbaImage, ExportError> {
    let (sx, sz) = world.total_samples();
    if sx == 0 || sz == 0 {
        return Err(ExportError::EmptyWorld);
    }
    let res = world.tile_resolution();
    let (tiles_x, tiles_z) = world.tile_count();

    let mut img: RgbaImage = ImageBuffer::new(sx as u32, sz as u32);
    for gz in 0..tiles_z {
        for gx in 0..tiles_x {
            let record = world.storage().load_tile(world.tile_id(gx, gz))?;
            for lz in 0..res {
                for lx in 0..res {
                    let mut channels = [0u8; 4];
                    for (l, weights) in record.layer_weights.iter().take(4).enumerate() {
                        let w = weights[lz * res + lx].clamp(0.0, 1.0);
                        channels[l] = (w * 255.0) as u8;
                    }
                    img.put_pixel(
                        (gx * res + lx) as u32,
                        (gz * res + lz) as u32,
                        Rgba(channels),
                    );
                }
            }
        }
    }
    Ok(img)
}

pub fn export_height_map<S: TileStorage + Sync, P: AsRef<Path>>(
    world: &WorldManager<S>,
    path: P,
    colored: bool,
) -> Result<(), ExportError> {
    if colored {
        render_height_spectral(world).save(path)?;
    } else {
        render_height_gray(world).save(path)?;
    }
    Ok(())
}

pub fn export_normal_map<S: TileStorage + Sync, P: AsRef<Path>>(
    world: &WorldManager<S>,
    path: P,
) -> Result<(), ExportError> {
    render_normal_map(world).save(path)?;
    Ok(())
}

pub fn export_shoreline_mask<S: TileStorage, P: AsRef<Path>>(
    world: &WorldManager<S>,
    path: P,
    water_level: f32,
    falloff_samples: f32,
) -> Result<(), ExportError> {
    render_shoreline_mask(world, water_level, falloff_samples).save(path)?;
    Ok(())
}

pub fn export_layer_weights<S: TileStorage, P: AsRef<Path>>(
    world: &WorldManager<S>,
    path: P,
) -> Result<(), ExportError> {
    render_layer_weights(world)?.save(path)?;
    Ok(())
}
