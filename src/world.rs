//! World coordinate manager.
//!
//! Owns the grid of height tiles, the unified bounds, and every conversion
//! factor between the four addressing schemes:
//!
//! - World Units (WU): continuous physical coordinates (e.g. meters), may be
//!   negative or centered on the origin.
//! - Terrain Units (TU): continuous coordinates at the sample-grid scale,
//!   zero-based across the whole multi-tile world.
//! - Normalized Units (NU): `[0,1]` across the whole world on each axis.
//! - Physical Tile Index / Offset (PTI/PTO): which tile, and which sample
//!   within it.
//!
//! Point queries outside the world bounds are an expected occurrence during
//! editing (stamps routinely hang off the world edge), so they are counted
//! and absorbed rather than surfaced as errors: reads return a sentinel,
//! writes are dropped.

use std::time::Duration;

use crate::bounds::Bounds;
use crate::storage::{StorageError, TileId, TileRecord, TileStorage};
use crate::task::{StepOutcome, TimeBudget};
use crate::tile::HeightTile;

/// Returned by out-of-bounds height reads.
pub const HEIGHT_SENTINEL: f32 = 0.0;

/// Construction-time metadata for one terrain tile.
#[derive(Clone, Debug)]
pub struct TileDescriptor {
    pub id: TileId,
    /// World-unit position of the tile's minimum (x, z) corner.
    pub position_wu: (f32, f32),
    pub size_wu: f32,
    pub resolution: usize,
    pub layer_count: usize,
    pub detail_count: usize,
}

impl TileDescriptor {
    pub fn from_record(id: TileId, record: &TileRecord) -> Self {
        Self {
            id,
            position_wu: record.position_wu,
            size_wu: record.size_wu,
            resolution: record.resolution,
            layer_count: record.layer_count,
            detail_count: record.detail_count,
        }
    }
}

#[derive(Debug)]
pub enum WorldError {
    /// The given tiles do not form a usable world; the string is a multi-line
    /// discrepancy report.
    InvalidWorld(String),
    /// No tiles were supplied.
    EmptyWorld,
    /// The vertical range must be a positive finite number.
    BadHeightRange(f32),
    Storage(StorageError),
}

impl std::fmt::Display for WorldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorldError::InvalidWorld(report) => write!(f, "Invalid world:\n{}", report),
            WorldError::EmptyWorld => write!(f, "No terrain tiles supplied"),
            WorldError::BadHeightRange(h) => write!(f, "Bad world height range: {}", h),
            WorldError::Storage(e) => write!(f, "Storage error: {}", e),
        }
    }
}

impl std::error::Error for WorldError {}

impl From<StorageError> for WorldError {
    fn from(e: StorageError) -> Self {
        WorldError::Storage(e)
    }
}

/// Conversion factors between coordinate spaces, derived once at construction
/// from tile count, tile resolution and tile physical size.
#[derive(Clone, Copy, Debug)]
pub struct Conversions {
    pub wu_to_tu: (f32, f32),
    pub tu_to_wu: (f32, f32),
    pub tu_to_nu: (f32, f32),
    pub nu_to_tu: (f32, f32),
    pub wu_to_nu: (f32, f32),
    pub nu_to_wu: (f32, f32),
    /// Added to WU coordinates before scaling, so centered/negative world
    /// positions map to non-negative indices.
    pub wu_zero_offset: (f32, f32),
}

pub struct WorldManager<S: TileStorage> {
    storage: S,
    tile_count: (usize, usize),
    tile_resolution: usize,
    tile_size_wu: f32,
    world_height_wu: f32,
    bounds_wu: Bounds,
    bounds_tu: Bounds,
    bounds_nu: Bounds,
    conv: Conversions,
    /// Grid-ordered (row-major by z) resident tiles; `None` until first touch.
    tiles: Vec<Option<HeightTile>>,
    ids: Vec<TileId>,
    bounds_errors: u64,
    load_failures: u64,
}

impl<S: TileStorage> WorldManager<S> {
    /// Validate the tile set and derive the unified bounds and conversion
    /// factors. On any mismatch the full multi-line discrepancy report is
    /// returned and the manager is not constructed.
    pub fn new(
        storage: S,
        descriptors: &[TileDescriptor],
        world_height_wu: f32,
    ) -> Result<Self, WorldError> {
        if descriptors.is_empty() {
            return Err(WorldError::EmptyWorld);
        }
        if !(world_height_wu.is_finite() && world_height_wu > 0.0) {
            return Err(WorldError::BadHeightRange(world_height_wu));
        }

        let report = validate_world(descriptors);
        if !report.is_empty() {
            return Err(WorldError::InvalidWorld(report.join("\n")));
        }

        let reference = &descriptors[0];
        let size = reference.size_wu;
        let resolution = reference.resolution;

        let min_x = descriptors
            .iter()
            .map(|d| d.position_wu.0)
            .fold(f32::INFINITY, f32::min);
        let min_z = descriptors
            .iter()
            .map(|d| d.position_wu.1)
            .fold(f32::INFINITY, f32::min);

        let mut count_x = 0usize;
        let mut count_z = 0usize;
        let mut placed: Vec<(usize, usize, TileId)> = Vec::with_capacity(descriptors.len());
        for d in descriptors {
            let gx = ((d.position_wu.0 - min_x) / size).round() as usize;
            let gz = ((d.position_wu.1 - min_z) / size).round() as usize;
            count_x = count_x.max(gx + 1);
            count_z = count_z.max(gz + 1);
            placed.push((gx, gz, d.id));
        }

        let mut slots: Vec<Option<TileId>> = vec![None; count_x * count_z];
        let mut grid_report = Vec::new();
        for (gx, gz, id) in placed {
            let idx = gz * count_x + gx;
            if slots[idx].is_some() {
                grid_report.push(format!("duplicate tile at grid cell ({}, {})", gx, gz));
            }
            slots[idx] = Some(id);
        }
        for (idx, slot) in slots.iter().enumerate() {
            if slot.is_none() {
                grid_report.push(format!(
                    "missing tile at grid cell ({}, {})",
                    idx % count_x,
                    idx / count_x
                ));
            }
        }
        if !grid_report.is_empty() {
            return Err(WorldError::InvalidWorld(grid_report.join("\n")));
        }
        let ids: Vec<TileId> = slots.into_iter().flatten().collect();

        let total_wu = (count_x as f32 * size, count_z as f32 * size);
        let total_tu = (
            (count_x * resolution) as f32,
            (count_z * resolution) as f32,
        );
        let samples_per_wu = resolution as f32 / size;

        let conv = Conversions {
            wu_to_tu: (samples_per_wu, samples_per_wu),
            tu_to_wu: (size / resolution as f32, size / resolution as f32),
            tu_to_nu: (1.0 / total_tu.0, 1.0 / total_tu.1),
            nu_to_tu: (total_tu.0, total_tu.1),
            wu_to_nu: (1.0 / total_wu.0, 1.0 / total_wu.1),
            nu_to_wu: (total_wu.0, total_wu.1),
            wu_zero_offset: (-min_x, -min_z),
        };

        let bounds_wu = Bounds::new(
            [min_x, 0.0, min_z],
            [min_x + total_wu.0, world_height_wu, min_z + total_wu.1],
        );
        let bounds_tu = Bounds::new(
            [0.0, 0.0, 0.0],
            [total_tu.0, world_height_wu * samples_per_wu, total_tu.1],
        );
        let bounds_nu = Bounds::new([0.0, 0.0, 0.0], [1.0, 1.0, 1.0]);

        let tile_total = count_x * count_z;
        Ok(Self {
            storage,
            tile_count: (count_x, count_z),
            tile_resolution: resolution,
            tile_size_wu: size,
            world_height_wu,
            bounds_wu,
            bounds_tu,
            bounds_nu,
            conv,
            tiles: (0..tile_total).map(|_| None).collect(),
            ids,
            bounds_errors: 0,
            load_failures: 0,
        })
    }

    // -------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------

    pub fn tile_count(&self) -> (usize, usize) {
        self.tile_count
    }

    pub fn tile_resolution(&self) -> usize {
        self.tile_resolution
    }

    pub fn tile_size_wu(&self) -> f32 {
        self.tile_size_wu
    }

    pub fn world_height_wu(&self) -> f32 {
        self.world_height_wu
    }

    /// Total samples across the whole world, per axis.
    pub fn total_samples(&self) -> (usize, usize) {
        (
            self.tile_count.0 * self.tile_resolution,
            self.tile_count.1 * self.tile_resolution,
        )
    }

    pub fn bounds_wu(&self) -> Bounds {
        self.bounds_wu
    }

    pub fn bounds_tu(&self) -> Bounds {
        self.bounds_tu
    }

    pub fn bounds_nu(&self) -> Bounds {
        self.bounds_nu
    }

    pub fn conversions(&self) -> Conversions {
        self.conv
    }

    /// Out-of-bounds point queries observed so far.
    pub fn bounds_errors(&self) -> u64 {
        self.bounds_errors
    }

    /// Tile loads that failed mid-edit.
    pub fn load_failures(&self) -> u64 {
        self.load_failures
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn tile_id(&self, grid_x: usize, grid_z: usize) -> TileId {
        self.ids[grid_z * self.tile_count.0 + grid_x]
    }

    pub fn resident_count(&self) -> usize {
        self.tiles.iter().filter(|t| t.is_some()).count()
    }

    pub(crate) fn tiles(&self) -> &[Option<HeightTile>] {
        &self.tiles
    }

    pub(crate) fn restore_tile(&mut self, index: usize, samples: Vec<f32>, dirty: bool) {
        if let Some(tile) = &mut self.tiles[index] {
            tile.replace_samples(samples, dirty);
        }
    }

    // -------------------------------------------------------------------
    // Coordinate conversions
    // -------------------------------------------------------------------

    pub fn wu_to_tu(&self, p: (f32, f32)) -> (f32, f32) {
        (
            (p.0 + self.conv.wu_zero_offset.0) * self.conv.wu_to_tu.0,
            (p.1 + self.conv.wu_zero_offset.1) * self.conv.wu_to_tu.1,
        )
    }

    pub fn tu_to_wu(&self, p: (f32, f32)) -> (f32, f32) {
        (
            p.0 * self.conv.tu_to_wu.0 - self.conv.wu_zero_offset.0,
            p.1 * self.conv.tu_to_wu.1 - self.conv.wu_zero_offset.1,
        )
    }

    pub fn tu_to_nu(&self, p: (f32, f32)) -> (f32, f32) {
        (p.0 * self.conv.tu_to_nu.0, p.1 * self.conv.tu_to_nu.1)
    }

    pub fn nu_to_tu(&self, p: (f32, f32)) -> (f32, f32) {
        (p.0 * self.conv.nu_to_tu.0, p.1 * self.conv.nu_to_tu.1)
    }

    pub fn wu_to_nu(&self, p: (f32, f32)) -> (f32, f32) {
        (
            (p.0 + self.conv.wu_zero_offset.0) * self.conv.wu_to_nu.0,
            (p.1 + self.conv.wu_zero_offset.1) * self.conv.wu_to_nu.1,
        )
    }

    pub fn nu_to_wu(&self, p: (f32, f32)) -> (f32, f32) {
        (
            p.0 * self.conv.nu_to_wu.0 - self.conv.wu_zero_offset.0,
            p.1 * self.conv.nu_to_wu.1 - self.conv.wu_zero_offset.1,
        )
    }

    // -------------------------------------------------------------------
    // Bounds checks
    // -------------------------------------------------------------------

    pub fn in_bounds_wu(&self, x: f32, z: f32) -> bool {
        self.bounds_wu.contains_xz(x, z)
    }

    pub fn in_bounds_tu(&self, x: f32, z: f32) -> bool {
        self.bounds_tu.contains_xz(x, z)
    }

    pub fn in_bounds_nu(&self, x: f32, z: f32) -> bool {
        self.bounds_nu.contains_xz(x, z)
    }

    // -------------------------------------------------------------------
    // Point access
    // -------------------------------------------------------------------

    /// Resident tile for a grid cell, loading it from storage on first touch.
    fn tile_at(&mut self, grid_x: usize, grid_z: usize) -> Option<&mut HeightTile> {
        let idx = grid_z * self.tile_count.0 + grid_x;
        if self.tiles[idx].is_none() {
            match self.storage.load_tile(self.ids[idx]) {
                Ok(record) => self.tiles[idx] = Some(HeightTile::load(&record)),
                Err(_) => {
                    self.load_failures += 1;
                    return None;
                }
            }
        }
        self.tiles[idx].as_mut()
    }

    /// Nearest-sample read at a Terrain Unit position. Out-of-bounds queries
    /// increment the bounds-error counter and return the sentinel.
    pub fn get_height_tu(&mut self, x: f32, z: f32) -> f32 {
        if !self.in_bounds_tu(x, z) {
            self.bounds_errors += 1;
            return HEIGHT_SENTINEL;
        }
        let xi = x.floor() as usize;
        let zi = z.floor() as usize;
        let res = self.tile_resolution;
        match self.tile_at(xi / res, zi / res) {
            Some(tile) => tile.get(xi % res, zi % res),
            None => HEIGHT_SENTINEL,
        }
    }

    /// Nearest-sample write at a Terrain Unit position. Out-of-bounds writes
    /// increment the bounds-error counter and are dropped.
    pub fn set_height_tu(&mut self, x: f32, z: f32, height: f32) {
        if !self.in_bounds_tu(x, z) {
            self.bounds_errors += 1;
            return;
        }
        let xi = x.floor() as usize;
        let zi = z.floor() as usize;
        let res = self.tile_resolution;
        if let Some(tile) = self.tile_at(xi / res, zi / res) {
            tile.set(xi % res, zi % res, height);
        }
    }

    pub fn get_height_wu(&mut self, x: f32, z: f32) -> f32 {
        let (tx, tz) = self.wu_to_tu((x, z));
        self.get_height_tu(tx, tz)
    }

    pub fn set_height_wu(&mut self, x: f32, z: f32, height: f32) {
        let (tx, tz) = self.wu_to_tu((x, z));
        self.set_height_tu(tx, tz, height);
    }

    /// Sample at integer TU coordinates, clamped into the world. Interpolation
    /// and smoothing fetch through this so reads next to a tile seam hit the
    /// correct neighbor tile instead of clamping within one tile.
    pub(crate) fn sample_clamped(&mut self, ix: i64, iz: i64) -> f32 {
        let (sx, sz) = self.total_samples();
        let xi = ix.clamp(0, sx as i64 - 1) as usize;
        let zi = iz.clamp(0, sz as i64 - 1) as usize;
        let res = self.tile_resolution;
        match self.tile_at(xi / res, zi / res) {
            Some(tile) => tile.get(xi % res, zi % res),
            None => HEIGHT_SENTINEL,
        }
    }

    /// Read-only sample at integer TU coordinates for already-resident tiles.
    /// Non-resident tiles yield the sentinel; callers that need everything
    /// loaded run [`WorldManager::load_from_world`] first.
    pub fn sample_resident(&self, ix: usize, iz: usize) -> f32 {
        let (sx, sz) = self.total_samples();
        if ix >= sx || iz >= sz {
            return HEIGHT_SENTINEL;
        }
        let res = self.tile_resolution;
        let idx = (iz / res) * self.tile_count.0 + ix / res;
        match &self.tiles[idx] {
            Some(tile) => tile.get(ix % res, iz % res),
            None => HEIGHT_SENTINEL,
        }
    }

    /// Bilinearly interpolated read at a fractional Terrain Unit position.
    /// Corner samples come from the global grid, so positions next to a tile
    /// boundary blend with the neighboring tile correctly.
    pub fn get_height_interpolated_tu(&mut self, x: f32, z: f32) -> f32 {
        if !self.in_bounds_tu(x, z) {
            self.bounds_errors += 1;
            return HEIGHT_SENTINEL;
        }
        let x0 = x.floor();
        let z0 = z.floor();
        let fx = x - x0;
        let fz = z - z0;
        let xi = x0 as i64;
        let zi = z0 as i64;

        let v00 = self.sample_clamped(xi, zi);
        let v10 = self.sample_clamped(xi + 1, zi);
        let v01 = self.sample_clamped(xi, zi + 1);
        let v11 = self.sample_clamped(xi + 1, zi + 1);

        let v0 = v00 * (1.0 - fx) + v10 * fx;
        let v1 = v01 * (1.0 - fx) + v11 * fx;
        v0 * (1.0 - fz) + v1 * fz
    }

    pub fn get_height_interpolated_wu(&mut self, x: f32, z: f32) -> f32 {
        let (tx, tz) = self.wu_to_tu((x, z));
        self.get_height_interpolated_tu(tx, tz)
    }

    // -------------------------------------------------------------------
    // Bulk operations
    // -------------------------------------------------------------------

    /// Force every tile resident. Load failures propagate; exporters and the
    /// stamping engine expect a fully-loaded world.
    pub fn load_from_world(&mut self) -> Result<(), StorageError> {
        for idx in 0..self.tiles.len() {
            if self.tiles[idx].is_none() {
                let record = self.storage.load_tile(self.ids[idx])?;
                self.tiles[idx] = Some(HeightTile::load(&record));
            }
        }
        Ok(())
    }

    /// Flush resident tiles back to backing storage. Without `force`, tiles
    /// whose dirty flag is clear are skipped.
    pub fn save_to_world(&mut self, force: bool) -> Result<(), StorageError> {
        let storage = &mut self.storage;
        for (idx, slot) in self.tiles.iter_mut().enumerate() {
            if let Some(tile) = slot {
                if force || tile.is_dirty() {
                    tile.flush(storage, self.ids[idx])?;
                }
            }
        }
        Ok(())
    }
}

// =============================================================================
// RESUMABLE BULK EDITS
// =============================================================================

/// Resumable whole-world flatten to a single normalized height.
pub struct FlattenRun<'a, S: TileStorage> {
    world: &'a mut WorldManager<S>,
    height: f32,
    cursor: usize,
    total: usize,
    width: usize,
    cancelled: bool,
    finished: bool,
}

impl<'a, S: TileStorage> FlattenRun<'a, S> {
    pub fn new(world: &'a mut WorldManager<S>, height: f32) -> Self {
        let (sx, sz) = world.total_samples();
        Self {
            world,
            height: height.clamp(0.0, 1.0),
            cursor: 0,
            total: sx * sz,
            width: sx,
            cancelled: false,
            finished: false,
        }
    }

    pub fn cancel(&mut self) {
        self.cancelled = true;
    }

    /// Process samples until the budget expires. At least one sample advances
    /// per call, so a zero budget still makes progress.
    pub fn step(&mut self, budget: Duration) -> StepOutcome {
        if self.finished {
            return StepOutcome::Complete;
        }
        if self.cancelled {
            return StepOutcome::Cancelled;
        }
        let timer = TimeBudget::start(budget);
        while self.cursor < self.total {
            if self.cancelled {
                return StepOutcome::Cancelled;
            }
            let x = (self.cursor % self.width) as f32;
            let z = (self.cursor / self.width) as f32;
            self.world.set_height_tu(x, z, self.height);
            self.cursor += 1;
            if timer.expired() {
                return StepOutcome::InProgress;
            }
        }
        self.finished = true;
        StepOutcome::Complete
    }
}

enum SmoothPhase {
    Gather,
    Write,
}

/// Resumable single-pass 3×3 box smoothing. Gathers into a scratch buffer
/// first so later writes never feed back into earlier averages, then writes
/// the buffer back.
pub struct SmoothRun<'a, S: TileStorage> {
    world: &'a mut WorldManager<S>,
    buffer: Vec<f32>,
    phase: SmoothPhase,
    cursor: usize,
    total: usize,
    width: usize,
    cancelled: bool,
    finished: bool,
}

impl<'a, S: TileStorage> SmoothRun<'a, S> {
    pub fn new(world: &'a mut WorldManager<S>) -> Self {
        let (sx, sz) = world.total_samples();
        let total = sx * sz;
        Self {
            world,
            buffer: vec![0.0; total],
            phase: SmoothPhase::Gather,
            cursor: 0,
            total,
            width: sx,
            cancelled: false,
            finished: false,
        }
    }

    pub fn cancel(&mut self) {
        self.cancelled = true;
    }

    pub fn step(&mut self, budget: Duration) -> StepOutcome {
        if self.finished {
            return StepOutcome::Complete;
        }
        if self.cancelled {
            return StepOutcome::Cancelled;
        }
        let timer = TimeBudget::start(budget);
        loop {
            if self.cancelled {
                return StepOutcome::Cancelled;
            }
            match self.phase {
                SmoothPhase::Gather => {
                    if self.cursor == self.total {
                        self.phase = SmoothPhase::Write;
                        self.cursor = 0;
                        continue;
                    }
                    let x = (self.cursor % self.width) as i64;
                    let z = (self.cursor / self.width) as i64;
                    let mut sum = 0.0;
                    for dz in -1..=1 {
                        for dx in -1..=1 {
                            sum += self.world.sample_clamped(x + dx, z + dz);
                        }
                    }
                    self.buffer[self.cursor] = sum / 9.0;
                    self.cursor += 1;
                }
                SmoothPhase::Write => {
                    if self.cursor == self.total {
                        self.finished = true;
                        return StepOutcome::Complete;
                    }
                    let x = (self.cursor % self.width) as f32;
                    let z = (self.cursor / self.width) as f32;
                    self.world.set_height_tu(x, z, self.buffer[self.cursor]);
                    self.cursor += 1;
                }
            }
            if timer.expired() {
                return StepOutcome::InProgress;
            }
        }
    }
}

// =============================================================================
// VALIDATION
// =============================================================================

/// Compare every tile against the first and collect all discrepancies.
/// An empty report means the tile set is usable.
pub fn validate_world(descriptors: &[TileDescriptor]) -> Vec<String> {
    let mut report = Vec::new();
    let Some(reference) = descriptors.first() else {
        return report;
    };

    for d in &descriptors[1..] {
        if (d.size_wu - reference.size_wu).abs() > 1e-3 {
            report.push(format!(
                "{}: size {} differs from {}",
                d.id, d.size_wu, reference.size_wu
            ));
        }
        if d.resolution != reference.resolution {
            report.push(format!(
                "{}: resolution {} differs from {}",
                d.id, d.resolution, reference.resolution
            ));
        }
        if d.layer_count != reference.layer_count {
            report.push(format!(
                "{}: layer count {} differs from {}",
                d.id, d.layer_count, reference.layer_count
            ));
        }
        if d.detail_count != reference.detail_count {
            report.push(format!(
                "{}: detail count {} differs from {}",
                d.id, d.detail_count, reference.detail_count
            ));
        }
    }

    report
}

// =============================================================================
// TESTS
// =============================================================================


#[cfg(test)]
mod tests {
    use super::testutil::flat_world;
    use super::*;
    use crate::storage::MemoryTileStorage;

    #[test]
    fn test_conversion_round_trip() {
        let world = flat_world(2, 3, 16, 40.0, 100.0, 0.0);

        for &(x, z) in &[(-35.2, -17.9), (0.0, 0.0), (12.5, 41.0)] {
            let tu = world.wu_to_tu((x, z));
            let back = world.tu_to_wu(tu);
            assert!((back.0 - x).abs() < 1e-3, "x: {} vs {}", back.0, x);
            assert!((back.1 - z).abs() < 1e-3, "z: {} vs {}", back.1, z);

            let nu = world.wu_to_nu((x, z));
            let back = world.nu_to_wu(nu);
            assert!((back.0 - x).abs() < 1e-3);
            assert!((back.1 - z).abs() < 1e-3);
        }
    }

    #[test]
    fn test_bounds_half_open() {
        let world = flat_world(2, 2, 10, 10.0, 50.0, 0.0);
        let b = world.bounds_wu();

        assert!(world.in_bounds_wu(b.min[0], b.min[2]));
        assert!(!world.in_bounds_wu(b.max[0], b.max[2]));
        assert!(!world.in_bounds_wu(b.min[0] - 1.0, b.min[2]));
        assert!(!world.in_bounds_wu(b.max[0], b.min[2]));
        assert!(!world.in_bounds_wu(b.min[0], b.max[2]));
    }

    #[test]
    fn test_tu_query_scenario() {
        // 2x2 grid of 10-sample tiles: 20x20 TU total.
        let mut world = flat_world(2, 2, 10, 10.0, 50.0, 0.3);

        assert!(world.in_bounds_tu(19.0, 19.0));
        assert_eq!(world.get_height_tu(19.0, 19.0), 0.3);
        assert_eq!(world.bounds_errors(), 0);

        assert!(!world.in_bounds_tu(20.0, 0.0));
        assert_eq!(world.get_height_tu(20.0, 0.0), HEIGHT_SENTINEL);
        assert_eq!(world.bounds_errors(), 1);
    }

    #[test]
    fn test_out_of_bounds_write_dropped() {
        let mut world = flat_world(2, 2, 10, 10.0, 50.0, 0.3);
        world.set_height_tu(-1.0, 5.0, 0.9);
        assert_eq!(world.bounds_errors(), 1);
        // Nothing inside changed.
        assert_eq!(world.get_height_tu(0.0, 5.0), 0.3);
    }

    #[test]
    fn test_lazy_tile_load() {
        let mut world = flat_world(2, 2, 10, 10.0, 50.0, 0.3);
        assert_eq!(world.resident_count(), 0);

        world.get_height_tu(5.0, 5.0);
        assert_eq!(world.resident_count(), 1);

        world.get_height_tu(15.0, 15.0);
        assert_eq!(world.resident_count(), 2);

        world.load_from_world().unwrap();
        assert_eq!(world.resident_count(), 4);
    }

    #[test]
    fn test_interpolation_across_tile_seam() {
        // 2x1 grid, 4 samples per tile. Column 3 is the last of tile 0,
        // column 4 the first of tile 1.
        let mut world = flat_world(2, 1, 4, 4.0, 10.0, 0.0);
        world.set_height_tu(3.0, 1.0, 0.0);
        world.set_height_tu(4.0, 1.0, 1.0);

        let mid = world.get_height_interpolated_tu(3.5, 1.0);
        assert!((mid - 0.5).abs() < 1e-5, "seam blend was {}", mid);
    }

    #[test]
    fn test_interpolated_read_oob_counts() {
        let mut world = flat_world(1, 1, 4, 4.0, 10.0, 0.0);
        assert_eq!(world.get_height_interpolated_tu(-0.5, 0.0), HEIGHT_SENTINEL);
        assert_eq!(world.bounds_errors(), 1);
    }

    #[test]
    fn test_save_skips_clean_tiles() {
        // Wrap memory storage to observe flushes.
        struct CountingStorage {
            inner: MemoryTileStorage,
            saves: std::cell::Cell<usize>,
        }
        impl TileStorage for CountingStorage {
            fn load_tile(&self, id: TileId) -> Result<TileRecord, StorageError> {
                self.inner.load_tile(id)
            }
            fn save_tile(&mut self, id: TileId, samples: &[f32]) -> Result<(), StorageError> {
                self.saves.set(self.saves.get() + 1);
                self.inner.save_tile(id, samples)
            }
        }

        let mut inner = MemoryTileStorage::new();
        let mut descriptors = Vec::new();
        for gx in 0..2u32 {
            let id = TileId::new(gx, 0);
            let record = TileRecord::flat((gx as f32 * 10.0, 0.0), 10.0, 10, 0.2);
            descriptors.push(TileDescriptor::from_record(id, &record));
            inner.insert(id, record);
        }
        let storage = CountingStorage {
            inner,
            saves: std::cell::Cell::new(0),
        };
        let mut world = WorldManager::new(storage, &descriptors, 50.0).unwrap();
        world.load_from_world().unwrap();

        // Touch only the first tile.
        world.set_height_tu(2.0, 2.0, 0.9);
        world.save_to_world(false).unwrap();
        assert_eq!(world.storage().saves.get(), 1);

        world.save_to_world(true).unwrap();
        assert_eq!(world.storage().saves.get(), 3);
    }

    #[test]
    fn test_invalid_world_report_lists_all_mismatches() {
        let mut storage = MemoryTileStorage::new();
        let a = TileRecord::flat((0.0, 0.0), 10.0, 10, 0.0);
        let mut b = TileRecord::flat((10.0, 0.0), 10.0, 8, 0.0);
        b.layer_count = 2;
        let id_a = TileId::new(0, 0);
        let id_b = TileId::new(1, 0);
        let descriptors = vec![
            TileDescriptor::from_record(id_a, &a),
            TileDescriptor::from_record(id_b, &b),
        ];
        storage.insert(id_a, a);
        storage.insert(id_b, b);

        match WorldManager::new(storage, &descriptors, 50.0) {
            Err(WorldError::InvalidWorld(report)) => {
                assert!(report.contains("resolution"), "report: {}", report);
                assert!(report.contains("layer count"), "report: {}", report);
            }
            other => panic!("expected InvalidWorld, got {:?}", other.err()),
        }
    }

    #[test]
    fn test_missing_grid_cell_rejected() {
        let mut storage = MemoryTileStorage::new();
        let mut descriptors = Vec::new();
        // 2x2 grid with one corner absent.
        for (gx, gz) in [(0u32, 0u32), (1, 0), (0, 1)] {
            let id = TileId::new(gx, gz);
            let record =
                TileRecord::flat((gx as f32 * 10.0, gz as f32 * 10.0), 10.0, 10, 0.0);
            descriptors.push(TileDescriptor::from_record(id, &record));
            storage.insert(id, record);
        }

        assert!(matches!(
            WorldManager::new(storage, &descriptors, 50.0),
            Err(WorldError::InvalidWorld(_))
        ));
    }

    #[test]
    fn test_flatten_run_resumable() {
        let mut world = flat_world(2, 2, 8, 8.0, 50.0, 0.7);
        world.load_from_world().unwrap();

        let mut run = FlattenRun::new(&mut world, 0.25);
        let mut steps = 0;
        loop {
            match run.step(Duration::ZERO) {
                StepOutcome::Complete => break,
                StepOutcome::InProgress => steps += 1,
                StepOutcome::Cancelled => panic!("not cancelled"),
            }
            assert!(steps < 100_000);
        }

        let (sx, sz) = world.total_samples();
        for z in 0..sz {
            for x in 0..sx {
                assert_eq!(world.sample_resident(x, z), 0.25);
            }
        }
    }

    #[test]
    fn test_smooth_run_averages_peak() {
        let mut world = flat_world(1, 1, 8, 8.0, 50.0, 0.0);
        world.load_from_world().unwrap();
        world.set_height_tu(4.0, 4.0, 0.9);

        let mut run = SmoothRun::new(&mut world);
        while run.step(Duration::from_millis(50)) == StepOutcome::InProgress {}

        // Peak spread into the 3x3 box average.
        let center = world.sample_resident(4, 4);
        let neighbor = world.sample_resident(3, 4);
        assert!((center - 0.1).abs() < 1e-5, "center {}", center);
        assert!((neighbor - 0.1).abs() < 1e-5, "neighbor {}", neighbor);
        let far = world.sample_resident(0, 0);
        assert_eq!(far, 0.0);
    }
}
