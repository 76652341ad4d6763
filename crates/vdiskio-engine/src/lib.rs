//! vdiskio Engine Boundary
//!
//! This crate defines the boundary between the vdiskio marshalling layer
//! and the external virtual-disk engine it drives: the raw handle and
//! status-code vocabulary, the parameter blocks consumed by connect and
//! init, and the [`DiskEngine`] trait every backend implements.
//!
//! It also ships [`MemoryEngine`], a self-contained in-memory backend
//! used by the higher layers' tests and by embedders that want the full
//! marshalling surface without a native engine.

pub mod engine;
pub mod error;
pub mod memory;
pub mod params;
pub mod types;

pub use engine::{
    DiskEngine, EngineLog, ProgressSink, RawBlockList, RawConnection, RawDisk,
};
pub use error::{Error, ErrorCode, Result, check, codes};
pub use memory::MemoryEngine;
pub use params::{ConnectSpec, Credentials, InitSpec};
pub use types::{
    AdapterType, Block, CreateParams, DiskInfo, DiskType, Geometry, MAX_CHUNK_SIZE,
    MIN_CHUNK_SIZE, SECTOR_SIZE, SectorCount, flags, transport,
};
