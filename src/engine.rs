//! The stamping engine.
//!
//! A [`StampRun`] applies one stamp to the world under a wall-clock time
//! budget. The iteration domain is the set of world sample-lattice positions
//! inside the rotated footprint's axis-aligned bounding box, so no rotation
//! ever clips a corner and each destination sample is visited exactly once;
//! lattice positions outside the rotated footprint are skipped by the
//! inverse-rotation lookup instead. Suspension happens only between samples.
//! Cancellation is cooperative through a shared flag and leaves modified
//! tiles unflushed; normal completion flushes every dirty tile.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::oplog::{OperationEntry, OperationKind, OperationSink};
use crate::placement::{PlacementState, StampOperation};
use crate::stamp::StampSource;
use crate::storage::{StorageError, TileStorage};
use crate::task::{StepOutcome, TimeBudget};
use crate::world::WorldManager;

#[derive(Debug)]
pub enum EngineError {
    /// The placement state fails pre-run validation; nothing was mutated.
    InvalidPlacement(String),
    Storage(StorageError),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::InvalidPlacement(msg) => write!(f, "Invalid placement: {}", msg),
            EngineError::Storage(e) => write!(f, "Storage error: {}", e),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<StorageError> for EngineError {
    fn from(e: StorageError) -> Self {
        EngineError::Storage(e)
    }
}

/// Distance from the stamp center to its corner in centered lookup
/// coordinates; divides the radial distance so the falloff curve input
/// reaches 1.0 exactly at the corner.
const CORNER_DISTANCE: f32 = std::f32::consts::FRAC_1_SQRT_2;

/// One resumable stamping run over a mutably borrowed world.
pub struct StampRun<'a, S: TileStorage> {
    world: &'a mut WorldManager<S>,
    stamp: &'a StampSource,
    placement: PlacementState,
    /// First sample-lattice index (x, z) of the iteration domain in TU. May
    /// be negative when the footprint hangs off the world's western/northern
    /// edge.
    origin_tu: (i64, i64),
    /// Lattice extent of the iteration domain, covering the rotated
    /// footprint's AABB.
    domain: (usize, usize),
    /// Scaled (unrotated) stamp extents in world units.
    footprint_wu: (f32, f32),
    inv_cos: f32,
    inv_sin: f32,
    cursor: usize,
    cancel: Arc<AtomicBool>,
    cancelled: bool,
    finished: bool,
}

impl<'a, S: TileStorage> StampRun<'a, S> {
    /// Validate the placement, derive the iteration domain and emit the
    /// operation-log entry. Fails synchronously before any mutation.
    pub fn new(
        world: &'a mut WorldManager<S>,
        stamp: &'a StampSource,
        placement: PlacementState,
        sink: &mut dyn OperationSink,
    ) -> Result<Self, EngineError> {
        placement
            .validate()
            .map_err(EngineError::InvalidPlacement)?;

        let width_wu = stamp.scan_width_wu * placement.width_scale;
        let depth_wu = stamp.scan_depth_wu * placement.width_scale;

        let theta = placement.rotation_normalized().to_radians();
        let (sin, cos) = theta.sin_cos();
        // Grow the iteration box so the rotated footprint always fits.
        let bbox_w = width_wu * cos.abs() + depth_wu * sin.abs();
        let bbox_d = width_wu * sin.abs() + depth_wu * cos.abs();

        // The iteration domain is the sample lattice under the AABB, so each
        // world sample is evaluated once no matter how the AABB aligns with
        // the lattice.
        let pos = placement.position_wu;
        let (tx_min, tz_min) = world.wu_to_tu((pos[0] - bbox_w * 0.5, pos[2] - bbox_d * 0.5));
        let (tx_max, tz_max) = world.wu_to_tu((pos[0] + bbox_w * 0.5, pos[2] + bbox_d * 0.5));
        let origin_tu = (tx_min.floor() as i64, tz_min.floor() as i64);
        let domain_w = (tx_max.ceil() as i64 - origin_tu.0).max(1) as usize;
        let domain_d = (tz_max.ceil() as i64 - origin_tu.1).max(1) as usize;

        sink.record(
            OperationEntry::new(
                OperationKind::Stamp,
                format!(
                    "{:?} stamp at ({:.2}, {:.2}, {:.2})",
                    placement.operation,
                    placement.position_wu[0],
                    placement.position_wu[1],
                    placement.position_wu[2]
                ),
            )
            .with_placement(placement.clone()),
        );

        Ok(Self {
            world,
            stamp,
            placement,
            origin_tu,
            domain: (domain_w, domain_d),
            footprint_wu: (width_wu, depth_wu),
            inv_cos: cos,
            inv_sin: -sin,
            cursor: 0,
            cancel: Arc::new(AtomicBool::new(false)),
            cancelled: false,
            finished: false,
        })
    }

    /// Shared flag another thread (or a signal handler) may set to stop the
    /// run at the next sample boundary.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Fraction of the iteration domain processed so far.
    pub fn progress(&self) -> f32 {
        let total = self.domain.0 * self.domain.1;
        if total == 0 {
            1.0
        } else {
            self.cursor as f32 / total as f32
        }
    }

    /// Process samples until the budget expires. At least one sample advances
    /// per call, so a zero budget still makes progress. Completion flushes
    /// dirty tiles; cancellation does not.
    pub fn step(&mut self, budget: Duration) -> Result<StepOutcome, StorageError> {
        if self.finished {
            // Keep reporting the terminal outcome the run actually reached.
            return Ok(if self.cancelled {
                StepOutcome::Cancelled
            } else {
                StepOutcome::Complete
            });
        }
        let timer = TimeBudget::start(budget);
        let total = self.domain.0 * self.domain.1;

        while self.cursor < total {
            if self.cancel.load(Ordering::Relaxed) {
                self.finished = true;
                self.cancelled = true;
                return Ok(StepOutcome::Cancelled);
            }
            let ix = self.cursor % self.domain.0;
            let iz = self.cursor / self.domain.0;
            self.apply_sample(ix, iz);
            self.cursor += 1;
            if timer.expired() && self.cursor < total {
                return Ok(StepOutcome::InProgress);
            }
        }

        self.world.save_to_world(false)?;
        self.finished = true;
        Ok(StepOutcome::Complete)
    }

    /// Evaluate and blend one destination sample of the iteration domain.
    fn apply_sample(&mut self, ix: usize, iz: usize) {
        // Lattice sample centers sit at half-integer TU coordinates.
        let tx = (self.origin_tu.0 + ix as i64) as f32 + 0.5;
        let tz = (self.origin_tu.1 + iz as i64) as f32 + 0.5;

        // Destinations hanging off the world edge are expected; skip without
        // touching the bounds-error counter.
        if !self.world.in_bounds_tu(tx, tz) {
            return;
        }

        let pos = self.placement.position_wu;
        let (cx_wu, cz_wu) = self.world.tu_to_wu((tx, tz));
        let dx = cx_wu - pos[0];
        let dz = cz_wu - pos[2];

        // Undo the placement rotation to find where in the unrotated stamp
        // this destination sample reads from.
        let sx_wu = self.inv_cos * dx - self.inv_sin * dz;
        let sz_wu = self.inv_sin * dx + self.inv_cos * dz;
        let u = sx_wu / self.footprint_wu.0 + 0.5;
        let v = sz_wu / self.footprint_wu.1 + 0.5;
        if !(0.0..=1.0).contains(&u) || !(0.0..=1.0).contains(&v) {
            return;
        }

        // Radial distance of the lookup coordinate from the stamp center, so
        // the taper rotates with the stamp instead of stretching over the
        // AABB.
        let ru = u - 0.5;
        let rv = v - 0.5;
        let dist = (ru * ru + rv * rv).sqrt() / CORNER_DISTANCE;
        let mut strength = self.placement.falloff.evaluate(dist);
        if let Some(mask) = &self.placement.mask {
            strength *= mask.sample_normalized(u, v);
        }
        if strength <= 0.0 {
            return;
        }

        let mut h_s = self.stamp.sample(u, v);
        if let Some(remap) = &self.placement.height_remap {
            h_s = remap.evaluate(h_s);
        }

        let current = self.world.get_height_tu(tx, tz);
        let world_height = self.world.world_height_wu();

        // Absolute target height in normalized units. Stencil ignores it and
        // applies a relative physical offset instead, without the vertical
        // placement scale.
        let target = (pos[1]
            + (h_s - self.stamp.base_level)
                * self.stamp.scan_height_wu
                * self.placement.height_scale)
            / world_height;

        let new = match self.placement.operation {
            StampOperation::Raise => {
                if target <= current {
                    return;
                }
                current + (target - current) * strength
            }
            StampOperation::Lower => {
                if target >= current {
                    return;
                }
                current + (target - current) * strength
            }
            StampOperation::Blend => {
                let mixed = current + (target - current) * self.placement.blend_strength;
                current + (mixed - current) * strength
            }
            StampOperation::Difference => {
                let desired = (target - current).abs();
                current + (desired - current) * strength
            }
            StampOperation::Stencil => {
                let offset = h_s * self.placement.stencil_height_wu / world_height;
                current + offset * strength
            }
        };

        let new = new.clamp(0.0, 1.0);
        // An unchanged sample must not dirty its tile.
        if new != current {
            self.world.set_height_tu(tx, tz, new);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::curve::Curve;
    use crate::grid::SampleGrid;
    use crate::oplog::VecSink;
    use crate::storage::MemoryTileStorage;
    use crate::world::testutil::flat_world;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    /// Stamp whose buffer is a uniform value; scan height equals the test
    /// world's height range so normalized targets are easy to read.
    fn uniform_stamp(value: f32) -> StampSource {
        let mut grid = SampleGrid::new(8, 8);
        grid.fill(value);
        StampSource::new(grid, 10.0, 10.0, 50.0, 0.0).unwrap()
    }

    /// Flat 2x2 world, 1 sample per WU, centered on the origin.
    fn test_world(height: f32) -> WorldManager<MemoryTileStorage> {
        flat_world(2, 2, 10, 10.0, 50.0, height)
    }

    fn run_to_completion<S: TileStorage>(run: &mut StampRun<'_, S>) {
        loop {
            match run.step(Duration::from_millis(100)).unwrap() {
                StepOutcome::Complete => break,
                StepOutcome::InProgress => {}
                StepOutcome::Cancelled => panic!("unexpected cancellation"),
            }
        }
    }

    fn changed_samples(world: &WorldManager<MemoryTileStorage>, baseline: f32) -> usize {
        let (sx, sz) = world.total_samples();
        let mut count = 0;
        for z in 0..sz {
            for x in 0..sx {
                if world.sample_resident(x, z) != baseline {
                    count += 1;
                }
            }
        }
        count
    }

    #[test]
    fn test_raise_moves_to_target() {
        let mut world = test_world(0.3);
        world.load_from_world().unwrap();
        let stamp = uniform_stamp(1.0);
        let mut sink = VecSink::new();

        let placement = PlacementState::new([0.0, 0.0, 0.0], StampOperation::Raise);
        let mut run = StampRun::new(&mut world, &stamp, placement, &mut sink).unwrap();
        run_to_completion(&mut run);

        // Target is (0 + 1.0 * 50) / 50 = 1.0 across the footprint.
        assert_eq!(world.sample_resident(10, 10), 1.0);
        // Outside the footprint nothing moved.
        assert_eq!(world.sample_resident(0, 0), 0.3);
        assert_eq!(sink.entries.len(), 1);
        assert_eq!(sink.entries[0].kind, OperationKind::Stamp);
    }

    #[test]
    fn test_raise_never_lowers() {
        // Stamp target 0.5; terrain already at 0.6 must not move.
        let mut world = test_world(0.6);
        world.load_from_world().unwrap();
        let stamp = uniform_stamp(0.5);
        let mut sink = VecSink::new();

        let placement = PlacementState::new([0.0, 0.0, 0.0], StampOperation::Raise);
        let mut run = StampRun::new(&mut world, &stamp, placement, &mut sink).unwrap();
        run_to_completion(&mut run);

        assert_eq!(changed_samples(&world, 0.6), 0);
    }

    #[test]
    fn test_lower_never_raises() {
        let mut world = test_world(0.2);
        world.load_from_world().unwrap();
        let stamp = uniform_stamp(0.5);
        let mut sink = VecSink::new();

        let placement = PlacementState::new([0.0, 0.0, 0.0], StampOperation::Lower);
        let mut run = StampRun::new(&mut world, &stamp, placement, &mut sink).unwrap();
        run_to_completion(&mut run);

        assert_eq!(changed_samples(&world, 0.2), 0);
    }

    #[test]
    fn test_lower_moves_down() {
        let mut world = test_world(0.8);
        world.load_from_world().unwrap();
        let stamp = uniform_stamp(0.5);
        let mut sink = VecSink::new();

        let placement = PlacementState::new([0.0, 0.0, 0.0], StampOperation::Lower);
        let mut run = StampRun::new(&mut world, &stamp, placement, &mut sink).unwrap();
        run_to_completion(&mut run);

        assert!((world.sample_resident(10, 10) - 0.5).abs() < 1e-6);
        assert_eq!(world.sample_resident(0, 0), 0.8);
    }

    #[test]
    fn test_blend_mixes_by_strength() {
        let mut world = test_world(0.2);
        world.load_from_world().unwrap();
        let stamp = uniform_stamp(1.0);
        let mut sink = VecSink::new();

        let mut placement = PlacementState::new([0.0, 0.0, 0.0], StampOperation::Blend);
        placement.blend_strength = 0.5;
        let mut run = StampRun::new(&mut world, &stamp, placement, &mut sink).unwrap();
        run_to_completion(&mut run);

        // lerp(0.2, 1.0, 0.5) = 0.6 at full falloff strength.
        assert!((world.sample_resident(10, 10) - 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_difference_takes_absolute_gap() {
        let mut world = test_world(0.2);
        world.load_from_world().unwrap();
        let stamp = uniform_stamp(1.0);
        let mut sink = VecSink::new();

        let placement = PlacementState::new([0.0, 0.0, 0.0], StampOperation::Difference);
        let mut run = StampRun::new(&mut world, &stamp, placement, &mut sink).unwrap();
        run_to_completion(&mut run);

        // |1.0 - 0.2| = 0.8.
        assert!((world.sample_resident(10, 10) - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_stencil_exact_offset() {
        let mut world = test_world(0.3);
        world.load_from_world().unwrap();
        let stamp = uniform_stamp(1.0);
        let mut sink = VecSink::new();

        let mut placement = PlacementState::new([0.0, 0.0, 0.0], StampOperation::Stencil);
        placement.stencil_height_wu = 5.0;
        // The vertical placement scale must not affect a stencil.
        placement.height_scale = 3.0;
        let mut run = StampRun::new(&mut world, &stamp, placement, &mut sink).unwrap();
        run_to_completion(&mut run);

        // Every affected sample moves by exactly 5 / 50 = 0.1.
        let (sx, sz) = world.total_samples();
        for z in 0..sz {
            for x in 0..sx {
                let v = world.sample_resident(x, z);
                assert!(
                    (v - 0.3).abs() < 1e-7 || (v - 0.4).abs() < 1e-6,
                    "sample ({}, {}) = {}",
                    x,
                    z,
                    v
                );
            }
        }
        assert!((world.sample_resident(10, 10) - 0.4).abs() < 1e-6);
    }

    #[test]
    fn test_zero_mask_is_noop() {
        let mut world = test_world(0.3);
        world.load_from_world().unwrap();
        let stamp = uniform_stamp(1.0);
        let mut sink = VecSink::new();

        let mut placement = PlacementState::new([0.0, 0.0, 0.0], StampOperation::Raise);
        placement.mask = Some(SampleGrid::new(4, 4)); // all zeros
        let mut run = StampRun::new(&mut world, &stamp, placement, &mut sink).unwrap();
        run_to_completion(&mut run);

        assert_eq!(changed_samples(&world, 0.3), 0);
        // No sample changed, so no tile should have been flushed dirty.
        let id = world.tile_id(0, 0);
        assert_eq!(world.storage().record(id).unwrap().samples[0], 0.3);
    }

    #[test]
    fn test_rotation_preserves_square_footprint() {
        let stamp = uniform_stamp(1.0);

        let mut counts = Vec::new();
        for rotation in [0.0, 90.0] {
            let mut world = test_world(0.0);
            world.load_from_world().unwrap();
            let mut sink = VecSink::new();
            let mut placement = PlacementState::new([0.0, 0.0, 0.0], StampOperation::Raise);
            placement.rotation_deg = rotation;
            let mut run = StampRun::new(&mut world, &stamp, placement, &mut sink).unwrap();
            run_to_completion(&mut run);
            counts.push(changed_samples(&world, 0.0));
        }

        assert!(counts[0] > 0);
        assert_eq!(counts[0], counts[1]);
    }

    #[test]
    fn test_diagonal_rotation_does_not_clip_corners() {
        // At 45 degrees the AABB grows by sqrt(2); the footprint area stays
        // roughly the same, so the changed-sample count must not collapse.
        let stamp = uniform_stamp(1.0);

        let mut world = test_world(0.0);
        world.load_from_world().unwrap();
        let mut sink = VecSink::new();
        let placement = PlacementState::new([0.0, 0.0, 0.0], StampOperation::Raise);
        let mut run = StampRun::new(&mut world, &stamp, placement, &mut sink).unwrap();
        run_to_completion(&mut run);
        let axis_aligned = changed_samples(&world, 0.0);

        let mut world = test_world(0.0);
        world.load_from_world().unwrap();
        let mut sink = VecSink::new();
        let mut placement = PlacementState::new([0.0, 0.0, 0.0], StampOperation::Raise);
        placement.rotation_deg = 45.0;
        let mut run = StampRun::new(&mut world, &stamp, placement, &mut sink).unwrap();
        run_to_completion(&mut run);
        let rotated = changed_samples(&world, 0.0);

        let ratio = rotated as f32 / axis_aligned as f32;
        assert!(
            (0.8..=1.2).contains(&ratio),
            "footprint area ratio {} (rotated {}, axis-aligned {})",
            ratio,
            rotated,
            axis_aligned
        );
    }

    #[test]
    fn test_falloff_invariant_under_rotation() {
        // A square stamp's radial taper at a fixed physical point must not
        // depend on how the stamp is rotated.
        let stamp = uniform_stamp(1.0);

        let mut heights = Vec::new();
        for rotation in [0.0, 45.0] {
            let mut world = test_world(0.0);
            world.load_from_world().unwrap();
            let mut sink = VecSink::new();
            let mut placement = PlacementState::new([0.0, 0.0, 0.0], StampOperation::Raise);
            placement.falloff = Curve::LinearFade;
            placement.rotation_deg = rotation;
            let mut run = StampRun::new(&mut world, &stamp, placement, &mut sink).unwrap();
            run_to_completion(&mut run);
            heights.push(world.sample_resident(13, 10));
        }

        assert!(heights[0] > 0.0);
        assert!(
            (heights[0] - heights[1]).abs() < 1e-5,
            "0 deg {} vs 45 deg {}",
            heights[0],
            heights[1]
        );
    }

    #[test]
    fn test_rotated_stencil_applies_once_per_sample() {
        let mut world = test_world(0.3);
        world.load_from_world().unwrap();
        let stamp = uniform_stamp(1.0);
        let mut sink = VecSink::new();

        let mut placement = PlacementState::new([0.0, 0.0, 0.0], StampOperation::Stencil);
        placement.stencil_height_wu = 5.0;
        placement.rotation_deg = 45.0;
        let mut run = StampRun::new(&mut world, &stamp, placement, &mut sink).unwrap();
        run_to_completion(&mut run);

        // Rotation misaligns the bounding box with the sample lattice; each
        // sample inside the rotated footprint must still move by exactly
        // 5 / 50 = 0.1, never twice.
        let (sx, sz) = world.total_samples();
        for z in 0..sz {
            for x in 0..sx {
                let v = world.sample_resident(x, z);
                assert!(
                    (v - 0.3).abs() < 1e-7 || (v - 0.4).abs() < 1e-6,
                    "sample ({}, {}) = {}",
                    x,
                    z,
                    v
                );
            }
        }
        assert!((world.sample_resident(10, 4) - 0.4).abs() < 1e-6);
    }

    #[test]
    fn test_off_world_placement_skips_silently() {
        let mut world = test_world(0.3);
        world.load_from_world().unwrap();
        let stamp = uniform_stamp(1.0);
        let mut sink = VecSink::new();

        // Centered on the eastern edge: half the footprint hangs off-world.
        let placement = PlacementState::new([10.0, 0.0, 0.0], StampOperation::Raise);
        let mut run = StampRun::new(&mut world, &stamp, placement, &mut sink).unwrap();
        run_to_completion(&mut run);

        assert!(changed_samples(&world, 0.3) > 0);
        assert_eq!(world.bounds_errors(), 0);
    }

    #[test]
    fn test_resumable_matches_single_run() {
        // An irregular stamp so a mid-run divergence cannot hide in uniform
        // values.
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let mut grid = SampleGrid::new(16, 16);
        for z in 0..16 {
            for x in 0..16 {
                grid.set(x, z, rng.gen_range(0.0..1.0));
            }
        }
        let stamp = StampSource::new(grid, 10.0, 10.0, 50.0, 0.0).unwrap();

        let mut reference = test_world(0.1);
        reference.load_from_world().unwrap();
        let mut sink = VecSink::new();
        let placement = PlacementState::new([2.0, 0.0, -3.0], StampOperation::Raise);
        let mut run =
            StampRun::new(&mut reference, &stamp, placement.clone(), &mut sink).unwrap();
        run_to_completion(&mut run);

        let mut stepped = test_world(0.1);
        stepped.load_from_world().unwrap();
        let mut sink = VecSink::new();
        let mut run = StampRun::new(&mut stepped, &stamp, placement, &mut sink).unwrap();
        let mut resumptions = 0;
        loop {
            match run.step(Duration::ZERO).unwrap() {
                StepOutcome::Complete => break,
                StepOutcome::InProgress => resumptions += 1,
                StepOutcome::Cancelled => panic!("not cancelled"),
            }
            assert!(resumptions < 100_000);
        }
        assert!(resumptions > 0);

        let (sx, sz) = reference.total_samples();
        for z in 0..sz {
            for x in 0..sx {
                assert_eq!(
                    reference.sample_resident(x, z),
                    stepped.sample_resident(x, z),
                    "divergence at ({}, {})",
                    x,
                    z
                );
            }
        }
    }

    #[test]
    fn test_cancellation_leaves_storage_untouched() {
        let mut world = test_world(0.3);
        world.load_from_world().unwrap();
        let stamp = uniform_stamp(1.0);
        let mut sink = VecSink::new();

        let placement = PlacementState::new([0.0, 0.0, 0.0], StampOperation::Raise);
        let mut run = StampRun::new(&mut world, &stamp, placement, &mut sink).unwrap();

        // A few samples in, request cancellation.
        assert_eq!(run.step(Duration::ZERO).unwrap(), StepOutcome::InProgress);
        run.cancel_handle().store(true, Ordering::Relaxed);
        assert_eq!(run.step(Duration::ZERO).unwrap(), StepOutcome::Cancelled);

        // In-memory edits may exist, but nothing was flushed to storage.
        for gz in 0..2 {
            for gx in 0..2 {
                let id = world.tile_id(gx, gz);
                let record = world.storage().record(id).unwrap();
                assert!(record.samples.iter().all(|&s| s == 0.3));
            }
        }
    }

    #[test]
    fn test_cancelled_run_stays_cancelled() {
        let mut world = test_world(0.3);
        world.load_from_world().unwrap();
        let stamp = uniform_stamp(1.0);
        let mut sink = VecSink::new();

        let placement = PlacementState::new([0.0, 0.0, 0.0], StampOperation::Raise);
        let mut run = StampRun::new(&mut world, &stamp, placement, &mut sink).unwrap();
        assert_eq!(run.step(Duration::ZERO).unwrap(), StepOutcome::InProgress);
        run.cancel_handle().store(true, Ordering::Relaxed);

        // Polling after cancellation keeps reporting Cancelled, not Complete.
        assert_eq!(run.step(Duration::ZERO).unwrap(), StepOutcome::Cancelled);
        assert_eq!(run.step(Duration::ZERO).unwrap(), StepOutcome::Cancelled);
        assert_eq!(
            run.step(Duration::from_millis(100)).unwrap(),
            StepOutcome::Cancelled
        );
    }

    #[test]
    fn test_raise_yields_max_of_target_and_prior() {
        let mut world = test_world(0.3);
        world.load_from_world().unwrap();
        // One bump inside the footprint already above the stamp target.
        world.set_height_tu(10.0, 10.0, 0.9);
        let stamp = uniform_stamp(0.5);
        let mut sink = VecSink::new();

        let placement = PlacementState::new([0.0, 0.0, 0.0], StampOperation::Raise);
        let mut run = StampRun::new(&mut world, &stamp, placement, &mut sink).unwrap();
        run_to_completion(&mut run);

        // Every footprint sample ends at max(0.5, prior); outside unchanged.
        assert_eq!(world.sample_resident(10, 10), 0.9);
        assert!((world.sample_resident(8, 8) - 0.5).abs() < 1e-6);
        assert_eq!(world.sample_resident(0, 0), 0.3);
    }

    #[test]
    fn test_snapshot_rolls_back_cancelled_run() {
        use crate::snapshot::SnapshotManager;

        let mut world = test_world(0.3);
        world.load_from_world().unwrap();
        let stamp = uniform_stamp(1.0);
        let mut sink = VecSink::new();
        let mut snapshots = SnapshotManager::new();

        snapshots.create_undo(&world);
        let placement = PlacementState::new([0.0, 0.0, 0.0], StampOperation::Raise);
        let mut run = StampRun::new(&mut world, &stamp, placement, &mut sink).unwrap();
        assert_eq!(run.step(Duration::ZERO).unwrap(), StepOutcome::InProgress);
        run.cancel_handle().store(true, Ordering::Relaxed);
        assert_eq!(run.step(Duration::ZERO).unwrap(), StepOutcome::Cancelled);

        assert!(snapshots.undo(&mut world).unwrap());
        let (sx, sz) = world.total_samples();
        for z in 0..sz {
            for x in 0..sx {
                assert_eq!(world.sample_resident(x, z), 0.3);
            }
        }
    }

    #[test]
    fn test_invalid_placement_rejected_before_mutation() {
        let mut world = test_world(0.3);
        let stamp = uniform_stamp(1.0);
        let mut sink = VecSink::new();

        let mut placement = PlacementState::new([0.0, 0.0, 0.0], StampOperation::Raise);
        placement.width_scale = -1.0;
        assert!(matches!(
            StampRun::new(&mut world, &stamp, placement, &mut sink),
            Err(EngineError::InvalidPlacement(_))
        ));
        assert!(sink.entries.is_empty());
        assert_eq!(world.resident_count(), 0);
    }

    #[test]
    fn test_falloff_weakens_toward_edges() {
        let mut world = test_world(0.0);
        world.load_from_world().unwrap();
        let stamp = uniform_stamp(1.0);
        let mut sink = VecSink::new();

        let mut placement = PlacementState::new([0.0, 0.0, 0.0], StampOperation::Raise);
        placement.falloff = Curve::LinearFade;
        let mut run = StampRun::new(&mut world, &stamp, placement, &mut sink).unwrap();
        run_to_completion(&mut run);

        let center = world.sample_resident(10, 10);
        let edge = world.sample_resident(10, 14);
        assert!(center > edge, "center {} vs edge {}", center, edge);
        assert!(edge > 0.0);
    }

    #[test]
    fn test_completion_flushes_dirty_tiles() {
        let mut world = test_world(0.3);
        world.load_from_world().unwrap();
        let stamp = uniform_stamp(1.0);
        let mut sink = VecSink::new();

        let placement = PlacementState::new([0.0, 0.0, 0.0], StampOperation::Raise);
        let mut run = StampRun::new(&mut world, &stamp, placement, &mut sink).unwrap();
        run_to_completion(&mut run);

        // The stamp spans all four tiles around the origin; storage now holds
        // the raised samples.
        let id = world.tile_id(1, 1);
        let record = world.storage().record(id).unwrap();
        assert!(record.samples.iter().any(|&s| s == 1.0));
    }
}
