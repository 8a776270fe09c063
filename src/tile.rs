//! One resident terrain tile.
//!
//! A `HeightTile` owns the sample buffer for a single tile while it is loaded.
//! Indexed access is unchecked; the world manager guarantees validity before
//! calling in. The dirty flag lets a non-forced save skip untouched tiles,
//! which matters for worlds with many tiles but localized edits.

use crate::storage::{StorageError, TileId, TileRecord, TileStorage};

pub struct HeightTile {
    resolution: usize,
    samples: Vec<f32>,
    dirty: bool,
}

impl HeightTile {
    /// Allocate a sample buffer sized to the backing tile and copy its current
    /// height data in.
    pub fn load(record: &TileRecord) -> Self {
        debug_assert_eq!(record.samples.len(), record.resolution * record.resolution);
        Self {
            resolution: record.resolution,
            samples: record.samples.clone(),
            dirty: false,
        }
    }

    pub fn resolution(&self) -> usize {
        self.resolution
    }

    /// Raw indexed read. No bounds checking; the caller guarantees validity.
    #[inline]
    pub fn get(&self, local_x: usize, local_z: usize) -> f32 {
        debug_assert!(local_x < self.resolution && local_z < self.resolution);
        self.samples[local_z * self.resolution + local_x]
    }

    /// Raw indexed write; marks the tile dirty.
    #[inline]
    pub fn set(&mut self, local_x: usize, local_z: usize, height: f32) {
        debug_assert!(local_x < self.resolution && local_z < self.resolution);
        self.samples[local_z * self.resolution + local_x] = height;
        self.dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Replace the whole buffer, e.g. when restoring a snapshot.
    pub fn replace_samples(&mut self, samples: Vec<f32>, dirty: bool) {
        debug_assert_eq!(samples.len(), self.resolution * self.resolution);
        self.samples = samples;
        self.dirty = dirty;
    }

    /// Write the buffer back to the backing tile and clear the dirty flag.
    pub fn flush<S: TileStorage>(
        &mut self,
        storage: &mut S,
        id: TileId,
    ) -> Result<(), StorageError> {
        storage.save_tile(id, &self.samples)?;
        self.dirty = false;
        Ok(())
    }
}
