//! The disk engine boundary
//!
//! `DiskEngine` is the capability surface of the external virtual-disk
//! engine this layer marshals for. Every fallible method returns a raw
//! [`ErrorCode`] (or a raw handle/code pair) exactly the way a native
//! engine would; classification and ownership discipline live one layer
//! up, in `vdiskio-session`.
//!
//! Raw handles are plain words issued by the engine. They carry no
//! lifetime or release discipline of their own; the marshalling layer
//! wraps them in owned types that do.

use crate::error::ErrorCode;
use crate::params::{ConnectSpec, InitSpec};
use crate::types::{Block, CreateParams, DiskInfo, DiskType, SectorCount};
use std::fmt;
use std::sync::Arc;

/// Opaque engine-issued session handle
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct RawConnection(pub u64);

/// Opaque engine-issued per-disk handle
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct RawDisk(pub u64);

/// Opaque engine-issued handle to an engine-owned block list
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct RawBlockList(pub u64);

/// Progress acknowledgment hook invoked by long-running operations
///
/// The engine calls this synchronously on the calling thread with a
/// percentage-complete value; returning `false` asks the engine to
/// abandon the operation.
pub trait ProgressSink: Send + Sync {
    fn progress(&self, percent_done: i32) -> bool;
}

/// Sink the engine hands diagnostic messages to
///
/// Messages arrive as unformatted arguments; rendering them into a plain
/// bounded string is the embedding layer's job.
pub trait EngineLog: Send + Sync {
    fn warn(&self, args: fmt::Arguments<'_>);
}

/// Capability surface of the external virtual-disk engine
///
/// All calls block until the engine returns; no call retries internally.
/// Concurrent use of a single raw handle is engine-defined and not
/// guaranteed safe; distinct handles are independent.
pub trait DiskEngine: Send + Sync {
    /// Initialize the engine. Must complete successfully once before any
    /// connection is attempted; `log` receives engine warnings for the
    /// lifetime of the library.
    fn init(&self, spec: &InitSpec, log: Arc<dyn EngineLog>) -> ErrorCode;

    /// Shut the engine down and drop all engine-side state
    fn exit(&self);

    /// Establish a session with the backing store
    fn connect(&self, spec: &ConnectSpec) -> (RawConnection, ErrorCode);

    /// Establish a session constrained to read-only mode and/or an
    /// ordered transport-mode preference list
    fn connect_ex(
        &self,
        spec: &ConnectSpec,
        read_only: bool,
        transport_modes: &str,
    ) -> (RawConnection, ErrorCode);

    /// Announce upcoming access to the identified disk
    fn prepare_for_access(&self, spec: &ConnectSpec, identity: &str) -> ErrorCode;

    /// Withdraw a previous access announcement
    fn end_access(&self, spec: &ConnectSpec, identity: &str) -> ErrorCode;

    /// Release a session. The engine frees its resources only here.
    fn disconnect(&self, conn: RawConnection) -> ErrorCode;

    /// Release stale sessions left behind by earlier crashes; returns
    /// `(cleaned, remaining, code)`
    fn cleanup(&self, spec: &ConnectSpec) -> (u32, u32, ErrorCode);

    /// Open a disk image; returns the raw handle/code pair. The handle
    /// is meaningful only when the code is success.
    fn open(&self, conn: RawConnection, path: &str, flags: u32) -> (RawDisk, ErrorCode);

    /// Release a disk handle
    fn close(&self, disk: RawDisk) -> ErrorCode;

    /// Create a new disk image (long-running)
    fn create(
        &self,
        conn: RawConnection,
        path: &str,
        params: &CreateParams,
        progress: &dyn ProgressSink,
    ) -> ErrorCode;

    /// Create a child image backed by the given disk and open it
    /// (long-running); returns the raw handle/code pair for the child
    fn create_child(
        &self,
        disk: RawDisk,
        child_path: &str,
        disk_type: DiskType,
        progress: &dyn ProgressSink,
    ) -> (RawDisk, ErrorCode);

    /// Copy a disk image between sessions (long-running)
    #[allow(clippy::too_many_arguments)]
    fn clone_disk(
        &self,
        dst_conn: RawConnection,
        dst_path: &str,
        src_conn: RawConnection,
        src_path: &str,
        params: &CreateParams,
        overwrite: bool,
        progress: &dyn ProgressSink,
    ) -> ErrorCode;

    /// Extend a disk image to the given capacity (long-running)
    fn grow(
        &self,
        conn: RawConnection,
        path: &str,
        capacity: SectorCount,
        update_geometry: bool,
        progress: &dyn ProgressSink,
    ) -> ErrorCode;

    /// Reclaim unused space in a disk image (long-running)
    fn shrink(&self, disk: RawDisk, progress: &dyn ProgressSink) -> ErrorCode;

    /// Defragment a disk image (long-running)
    fn defragment(&self, disk: RawDisk, progress: &dyn ProgressSink) -> ErrorCode;

    /// Check a disk image for consistency, optionally repairing it
    fn check_repair(&self, conn: RawConnection, path: &str, repair: bool) -> ErrorCode;

    /// Delete a disk image including all its extents
    fn unlink(&self, conn: RawConnection, path: &str) -> ErrorCode;

    /// Rename a disk image
    fn rename(&self, src_path: &str, dst_path: &str) -> ErrorCode;

    /// Properties of an open disk. The info is meaningful only when the
    /// code is success.
    fn get_info(&self, disk: RawDisk) -> (DiskInfo, ErrorCode);

    /// Enumerate metadata keys into a caller buffer as NUL-separated
    /// strings with a trailing empty entry. On a too-small buffer the
    /// engine reports its size-insufficient code and writes the needed
    /// length to `required`.
    fn get_metadata_keys(&self, disk: RawDisk, buf: &mut [u8], required: &mut usize) -> ErrorCode;

    /// Read one metadata value into a caller buffer (NUL-terminated);
    /// same size-insufficient convention as `get_metadata_keys`
    fn read_metadata(
        &self,
        disk: RawDisk,
        key: &str,
        buf: &mut [u8],
        required: &mut usize,
    ) -> ErrorCode;

    /// Write one metadata key/value pair
    fn write_metadata(&self, disk: RawDisk, key: &str, value: &str) -> ErrorCode;

    /// Read whole sectors into `buf` (`buf.len()` must equal
    /// `num_sectors * SECTOR_SIZE`)
    fn read(
        &self,
        disk: RawDisk,
        start_sector: SectorCount,
        num_sectors: SectorCount,
        buf: &mut [u8],
    ) -> ErrorCode;

    /// Write whole sectors from `buf` (same length rule as `read`)
    fn write(
        &self,
        disk: RawDisk,
        start_sector: SectorCount,
        num_sectors: SectorCount,
        buf: &[u8],
    ) -> ErrorCode;

    /// Transport mechanism the disk was opened through
    fn get_transport_mode(&self, disk: RawDisk) -> String;

    /// Transport mechanisms this engine supports, ordered by preference
    fn list_transport_modes(&self) -> String;

    /// Bytes a clone of the disk would need as the given type
    fn space_needed_for_clone(&self, disk: RawDisk, disk_type: DiskType) -> (u64, ErrorCode);

    /// Query allocated extents in `[start_sector, start_sector +
    /// num_sectors)` at `chunk_size` granularity. On success returns the
    /// engine-owned list handle and its block count; on failure no list
    /// is produced and the engine has already cleaned up.
    fn query_allocated_blocks(
        &self,
        disk: RawDisk,
        start_sector: SectorCount,
        num_sectors: SectorCount,
        chunk_size: SectorCount,
    ) -> (RawBlockList, u32, ErrorCode);

    /// Copy an engine-owned block list into caller storage, preserving
    /// engine order. Does not free the list.
    fn copy_block_list(&self, list: RawBlockList, dest: &mut [Block]) -> ErrorCode;

    /// Free an engine-owned block list. Must be called exactly once per
    /// list produced by a successful query.
    fn free_block_list(&self, list: RawBlockList) -> ErrorCode;
}
