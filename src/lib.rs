//! Tile-based terrain stamping library
//!
//! Re-exports modules for use by binaries and tools.

pub mod bounds;
pub mod curve;
pub mod engine;
pub mod export;
pub mod grid;
pub mod mask;
pub mod oplog;
pub mod placement;
pub mod snapshot;
pub mod stamp;
pub mod storage;
pub mod task;
pub mod tile;
pub mod world;
