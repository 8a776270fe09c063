//! One-level undo/redo snapshots.
//!
//! A snapshot deep-copies every resident tile buffer together with its dirty
//! flag. History is exactly one level: taking a new undo snapshot discards any
//! pending redo, and a redo snapshot is consumed by applying it. Restores are
//! followed by a forced save so backing storage matches the restored state.

use chrono::{DateTime, Utc};

use crate::storage::{StorageError, TileStorage};
use crate::world::WorldManager;

struct TileSnapshot {
    index: usize,
    samples: Vec<f32>,
    dirty: bool,
}

/// Deep copy of every resident tile at one point in time.
pub struct WorldSnapshot {
    pub taken_at: DateTime<Utc>,
    tiles: Vec<TileSnapshot>,
}

impl WorldSnapshot {
    fn capture<S: TileStorage>(world: &WorldManager<S>) -> Self {
        let tiles = world
            .tiles()
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| {
                slot.as_ref().map(|tile| TileSnapshot {
                    index,
                    samples: tile.samples().to_vec(),
                    dirty: tile.is_dirty(),
                })
            })
            .collect();
        Self {
            taken_at: Utc::now(),
            tiles,
        }
    }

    fn apply<S: TileStorage>(&self, world: &mut WorldManager<S>) -> Result<(), StorageError> {
        for tile in &self.tiles {
            world.restore_tile(tile.index, tile.samples.clone(), tile.dirty);
        }
        world.save_to_world(true)
    }
}

#[derive(Default)]
pub struct SnapshotManager {
    undo: Option<WorldSnapshot>,
    redo: Option<WorldSnapshot>,
}

impl SnapshotManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn can_undo(&self) -> bool {
        self.undo.is_some()
    }

    pub fn can_redo(&self) -> bool {
        self.redo.is_some()
    }

    /// Capture the current state as the undo point, typically right before a
    /// stamping run. Any pending redo becomes unreachable and is dropped.
    pub fn create_undo<S: TileStorage>(&mut self, world: &WorldManager<S>) {
        self.undo = Some(WorldSnapshot::capture(world));
        self.redo = None;
    }

    /// Restore the undo snapshot and force-save. The state right before the
    /// restore becomes the redo point. Returns `false` when there is nothing
    /// to undo. The undo snapshot stays in place so repeated undo calls keep
    /// converging on the same state.
    pub fn undo<S: TileStorage>(
        &mut self,
        world: &mut WorldManager<S>,
    ) -> Result<bool, StorageError> {
        let Some(snapshot) = self.undo.as_ref() else {
            return Ok(false);
        };
        self.redo = Some(WorldSnapshot::capture(world));
        snapshot.apply(world)?;
        Ok(true)
    }

    /// Restore the redo snapshot and force-save, consuming it. Returns `false`
    /// when there is nothing to redo.
    pub fn redo<S: TileStorage>(
        &mut self,
        world: &mut WorldManager<S>,
    ) -> Result<bool, StorageError> {
        let Some(snapshot) = self.redo.take() else {
            return Ok(false);
        };
        snapshot.apply(world)?;
        Ok(true)
    }
}
