//! Tile storage providers.
//!
//! The world manager never assumes a specific persisted format for terrain
//! tiles; it only requires that each tile reports a stable resolution and
//! physical size for the lifetime of a manager. `FileTileStorage` persists
//! tiles as bincode files `tile_{x}_{z}.bin` under a world directory;
//! `MemoryTileStorage` backs tests and embedded use.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Identifies a tile by its position in the 2D tile grid.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TileId {
    pub x: u32,
    pub z: u32,
}

impl TileId {
    pub fn new(x: u32, z: u32) -> Self {
        Self { x, z }
    }
}

impl std::fmt::Display for TileId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "tile ({}, {})", self.x, self.z)
    }
}

/// Everything a backing store knows about one terrain tile.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TileRecord {
    /// Normalized height samples, row-major, `resolution * resolution` long.
    pub samples: Vec<f32>,
    /// World-unit position of the tile's minimum (x, z) corner.
    pub position_wu: (f32, f32),
    /// Edge length of the tile in world units (tiles are square).
    pub size_wu: f32,
    /// Height samples per side.
    pub resolution: usize,
    /// Number of texture layers attached to the tile.
    pub layer_count: usize,
    /// Number of detail layers attached to the tile.
    pub detail_count: usize,
    /// Per-layer blend weight maps, `resolution * resolution` each. Only the
    /// layer-weight export reads these; stamping never touches them.
    pub layer_weights: Vec<Vec<f32>>,
}

impl TileRecord {
    /// A flat tile with no layers, mostly useful for building fresh worlds.
    pub fn flat(
        position_wu: (f32, f32),
        size_wu: f32,
        resolution: usize,
        height: f32,
    ) -> Self {
        Self {
            samples: vec![height; resolution * resolution],
            position_wu,
            size_wu,
            resolution,
            layer_count: 0,
            detail_count: 0,
            layer_weights: Vec::new(),
        }
    }
}

/// Backing store for terrain tiles.
pub trait TileStorage {
    fn load_tile(&self, id: TileId) -> Result<TileRecord, StorageError>;

    /// Persist updated height samples for an existing tile. Non-height
    /// metadata (position, size, layers) is preserved.
    fn save_tile(&mut self, id: TileId, samples: &[f32]) -> Result<(), StorageError>;
}

/// Errors that can occur while loading or saving tiles.
#[derive(Debug)]
pub enum StorageError {
    /// IO error (file not found, permissions, etc.)
    Io(std::io::Error),
    /// Serialization error
    Serialization(String),
    /// Deserialization error (corrupted file, version mismatch, etc.)
    Deserialization(String),
    /// The requested tile does not exist in this store.
    MissingTile(TileId),
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageError::Io(e) => write!(f, "IO error: {}", e),
            StorageError::Serialization(e) => write!(f, "Serialization error: {}", e),
            StorageError::Deserialization(e) => write!(f, "Deserialization error: {}", e),
            StorageError::MissingTile(id) => write!(f, "Missing {}", id),
        }
    }
}

impl std::error::Error for StorageError {}

impl From<std::io::Error> for StorageError {
    fn from(e: std::io::Error) -> Self {
        StorageError::Io(e)
    }
}

/// Tile storage persisting each tile as a bincode file in a world directory.
pub struct FileTileStorage {
    dir: PathBuf,
}

impl FileTileStorage {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    fn tile_path(&self, id: TileId) -> PathBuf {
        self.dir.join(format!("tile_{}_{}.bin", id.x, id.z))
    }

    /// Write a full tile record, creating the directory if needed. Used when
    /// building a world from scratch; routine height flushes go through
    /// [`TileStorage::save_tile`].
    pub fn write_record(&mut self, id: TileId, record: &TileRecord) -> Result<(), StorageError> {
        fs::create_dir_all(&self.dir)?;
        let file = File::create(self.tile_path(id))?;
        let writer = BufWriter::new(file);
        bincode::serialize_into(writer, record)
            .map_err(|e| StorageError::Serialization(e.to_string()))
    }

    /// List all tile ids present in the world directory.
    pub fn list_tiles(&self) -> Result<Vec<TileId>, StorageError> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut tiles = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();

            if let Some(filename) = path.file_stem().and_then(|s| s.to_str()) {
                // Parse "tile_X_Z" format
                if let Some(rest) = filename.strip_prefix("tile_") {
                    let parts: Vec<&str> = rest.split('_').collect();
                    if parts.len() == 2 {
                        if let (Ok(x), Ok(z)) = (parts[0].parse(), parts[1].parse()) {
                            tiles.push(TileId::new(x, z));
                        }
                    }
                }
            }
        }

        Ok(tiles)
    }
}

impl TileStorage for FileTileStorage {
    fn load_tile(&self, id: TileId) -> Result<TileRecord, StorageError> {
        let path = self.tile_path(id);
        if !path.exists() {
            return Err(StorageError::MissingTile(id));
        }

        let file = File::open(&path)?;
        let reader = BufReader::new(file);
        bincode::deserialize_from(reader)
            .map_err(|e| StorageError::Deserialization(e.to_string()))
    }

    fn save_tile(&mut self, id: TileId, samples: &[f32]) -> Result<(), StorageError> {
        let mut record = self.load_tile(id)?;
        record.samples = samples.to_vec();
        self.write_record(id, &record)
    }
}

/// In-memory tile storage for tests and embedding.
#[derive(Default)]
pub struct MemoryTileStorage {
    tiles: HashMap<TileId, TileRecord>,
}

impl MemoryTileStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: TileId, record: TileRecord) {
        self.tiles.insert(id, record);
    }

    pub fn record(&self, id: TileId) -> Option<&TileRecord> {
        self.tiles.get(&id)
    }
}

impl TileStorage for MemoryTileStorage {
    fn load_tile(&self, id: TileId) -> Result<TileRecord, StorageError> {
        self.tiles
            .get(&id)
            .cloned()
            .ok_or(StorageError::MissingTile(id))
    }

    fn save_tile(&mut self, id: TileId, samples: &[f32]) -> Result<(), StorageError> {
        let record = self
            .tiles
            .get_mut(&id)
            .ok_or(StorageError::MissingTile(id))?;
        record.samples = samples.to_vec();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn make_record() -> TileRecord {
        TileRecord::flat((-10.0, -10.0), 20.0, 8, 0.25)
    }

    #[test]
    fn test_file_write_and_load() {
        let dir = tempdir().unwrap();
        let mut storage = FileTileStorage::new(dir.path());

        let id = TileId::new(1, 2);
        storage.write_record(id, &make_record()).unwrap();

        let loaded = storage.load_tile(id).unwrap();
        assert_eq!(loaded.resolution, 8);
        assert_eq!(loaded.samples.len(), 64);
        assert_eq!(loaded.position_wu, (-10.0, -10.0));
    }

    #[test]
    fn test_file_save_preserves_metadata() {
        let dir = tempdir().unwrap();
        let mut storage = FileTileStorage::new(dir.path());

        let id = TileId::new(0, 0);
        storage.write_record(id, &make_record()).unwrap();

        let new_samples = vec![0.9f32; 64];
        storage.save_tile(id, &new_samples).unwrap();

        let loaded = storage.load_tile(id).unwrap();
        assert_eq!(loaded.samples, new_samples);
        assert_eq!(loaded.size_wu, 20.0);
    }

    #[test]
    fn test_file_missing_tile() {
        let dir = tempdir().unwrap();
        let storage = FileTileStorage::new(dir.path());
        assert!(matches!(
            storage.load_tile(TileId::new(9, 9)),
            Err(StorageError::MissingTile(_))
        ));
    }

    #[test]
    fn test_list_tiles() {
        let dir = tempdir().unwrap();
        let mut storage = FileTileStorage::new(dir.path());

        storage.write_record(TileId::new(0, 0), &make_record()).unwrap();
        storage.write_record(TileId::new(1, 0), &make_record()).unwrap();
        storage.write_record(TileId::new(0, 1), &make_record()).unwrap();

        let mut tiles = storage.list_tiles().unwrap();
        tiles.sort_by_key(|id| (id.z, id.x));
        assert_eq!(
            tiles,
            vec![TileId::new(0, 0), TileId::new(1, 0), TileId::new(0, 1)]
        );
    }

    #[test]
    fn test_memory_round_trip() {
        let mut storage = MemoryTileStorage::new();
        let id = TileId::new(3, 4);
        storage.insert(id, make_record());

        let new_samples = vec![0.5f32; 64];
        storage.save_tile(id, &new_samples).unwrap();
        assert_eq!(storage.load_tile(id).unwrap().samples, new_samples);
    }
}
