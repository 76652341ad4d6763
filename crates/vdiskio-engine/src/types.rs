//! Core type definitions for vdiskio
//!
//! Data shapes shared between the engine boundary and the marshalling
//! layer: sector extents, disk geometry and info, disk/adapter kinds,
//! create parameters, and the open-flag constants.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Sector size in bytes (standard 512-byte sectors)
pub const SECTOR_SIZE: u64 = 512;

/// Smallest chunk granularity accepted by the allocation query, in sectors
pub const MIN_CHUNK_SIZE: u64 = 128;

/// Largest chunk granularity accepted by the allocation query, in sectors
pub const MAX_CHUNK_SIZE: u64 = 64 * 1024;

/// A count of, or offset in, 512-byte sectors
pub type SectorCount = u64;

/// Flags accepted by the open operation
pub mod flags {
    /// Bypass engine-side buffering
    pub const OPEN_UNBUFFERED: u32 = 1 << 0;
    /// Open only the named link, not its parent chain
    pub const OPEN_SINGLE_LINK: u32 = 1 << 1;
    /// Open the disk read-only
    pub const OPEN_READ_ONLY: u32 = 1 << 2;
}

/// Transport mechanism names understood by `connect_ex`
///
/// A transport-mode preference is an ordered `:`-separated list of these,
/// e.g. `"file:nbd:nbdssl"`.
pub mod transport {
    /// Local file access
    pub const FILE: &str = "file";
    /// Network block device
    pub const NBD: &str = "nbd";
    /// Network block device over TLS
    pub const NBDSSL: &str = "nbdssl";
    /// Direct attach to a running host
    pub const HOTADD: &str = "hotadd";
}

/// A contiguous run of allocated sectors
///
/// Produced by the allocated-block query in ascending sector order; this
/// layer never reorders them.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// First sector of the extent
    pub offset: SectorCount,
    /// Length of the extent in sectors
    pub length: SectorCount,
}

impl Block {
    /// Create a new extent record
    #[must_use]
    pub const fn new(offset: SectorCount, length: SectorCount) -> Self {
        Self { offset, length }
    }

    /// First sector past the extent
    #[must_use]
    pub const fn end(&self) -> SectorCount {
        self.offset + self.length
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.offset, self.end())
    }
}

/// Cylinder/head/sector geometry
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Geometry {
    pub cylinders: u32,
    pub heads: u32,
    pub sectors: u32,
}

/// On-disk layout kind of a disk image
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiskType {
    /// Single file, space allocated on demand
    #[default]
    MonolithicSparse,
    /// Single file, all space pre-allocated
    MonolithicFlat,
    /// Split into fixed-size extents, sparse
    SplitSparse,
    /// Split into fixed-size extents, pre-allocated
    SplitFlat,
    /// Compressed, suitable for streaming
    StreamOptimized,
}

impl DiskType {
    /// Whether this layout allocates all space up front. Every sector
    /// of a preallocated image counts as allocated.
    #[must_use]
    pub const fn preallocated(self) -> bool {
        matches!(self, Self::MonolithicFlat | Self::SplitFlat)
    }
}

/// Bus adapter a disk image is presented on
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdapterType {
    Ide,
    ScsiBusLogic,
    #[default]
    ScsiLsiLogic,
}

/// Parameters for creating a new disk image
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateParams {
    /// Layout kind of the new image
    pub disk_type: DiskType,
    /// Adapter the image is presented on
    pub adapter_type: AdapterType,
    /// Virtual hardware version
    pub hw_version: u16,
    /// Capacity in sectors
    pub capacity: SectorCount,
}

impl CreateParams {
    /// Create parameters for a sparse disk of the given capacity
    #[must_use]
    pub fn sparse(capacity: SectorCount) -> Self {
        Self {
            disk_type: DiskType::MonolithicSparse,
            adapter_type: AdapterType::default(),
            hw_version: 1,
            capacity,
        }
    }
}

/// Properties of an open disk image
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskInfo {
    /// Geometry reported to the BIOS
    pub bios_geo: Geometry,
    /// Physical geometry
    pub phys_geo: Geometry,
    /// Capacity in sectors
    pub capacity: SectorCount,
    /// Adapter the image is presented on
    pub adapter_type: AdapterType,
    /// Number of links in the image chain
    pub num_links: u32,
    /// Parent image path, empty for a base image
    pub parent_path_hint: String,
    /// Engine-assigned image identifier
    pub uuid: String,
}

impl DiskInfo {
    /// Capacity in bytes
    #[must_use]
    pub const fn capacity_bytes(&self) -> u64 {
        self.capacity * SECTOR_SIZE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_end() {
        let b = Block::new(128, 256);
        assert_eq!(b.end(), 384);
        assert_eq!(b.to_string(), "[128, 384)");
    }

    #[test]
    fn test_preallocated_layouts() {
        assert!(DiskType::MonolithicFlat.preallocated());
        assert!(DiskType::SplitFlat.preallocated());
        assert!(!DiskType::MonolithicSparse.preallocated());
        assert!(!DiskType::StreamOptimized.preallocated());
    }

    #[test]
    fn test_capacity_bytes() {
        let info = DiskInfo {
            capacity: 2048,
            ..DiskInfo::default()
        };
        assert_eq!(info.capacity_bytes(), 2048 * 512);
    }
}
