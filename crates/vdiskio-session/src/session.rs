//! Library, connection, and disk wrappers
//!
//! The exposed marshalling surface. Every operation forwards to the
//! engine 1:1, attaches the shared progress sink to long-running calls,
//! never retries, and converts non-zero codes into `Error::Engine`
//! naming the operation. Release discipline is ownership: a
//! [`Connection`] is released by `disconnect(self)` and a [`Disk`] by
//! `close(self)`, so each raw handle is handed back exactly once.

use crate::blocklist::BlockListDescriptor;
use crate::report::{ContinueAlways, LogBridge, LogSink, TracingLogSink};
use std::fmt;
use std::sync::Arc;
use tracing::debug;
use vdiskio_engine::{
    Block, ConnectSpec, CreateParams, DiskEngine, DiskInfo, DiskType, InitSpec, ProgressSink,
    RawConnection, RawDisk, Result, SectorCount, check,
};

/// Counters reported by the stale-session cleanup call
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CleanupStats {
    /// Sessions the engine reclaimed
    pub cleaned: u32,
    /// Sessions the engine could not reclaim
    pub remaining: u32,
}

struct LibraryInner {
    engine: Arc<dyn DiskEngine>,
    progress: Arc<dyn ProgressSink>,
}

/// An initialized disk engine library
///
/// Cheap to clone; all clones share the one engine initialization.
/// `exit` shuts the engine down for every clone, mirroring the global
/// teardown of a native library.
#[derive(Clone)]
pub struct Library {
    inner: Arc<LibraryInner>,
}

/// An empty configuration path means "no configuration", so the init
/// request collapses to the plain form before it reaches the engine.
fn normalize_init(spec: &InitSpec) -> InitSpec {
    let mut spec = spec.clone();
    if spec.config_file.as_deref().is_some_and(str::is_empty) {
        spec.config_file = None;
    }
    spec
}

impl Library {
    /// Initialize the engine with the default progress and log sinks
    /// ([`ContinueAlways`] and [`TracingLogSink`]).
    pub fn init(engine: Arc<dyn DiskEngine>, spec: &InitSpec) -> Result<Self> {
        Self::init_with(
            engine,
            spec,
            Arc::new(TracingLogSink),
            Arc::new(ContinueAlways),
        )
    }

    /// Initialize the engine with caller-supplied sinks. The log sink
    /// receives every engine warning, rendered and bounded, for the
    /// lifetime of the library; the progress sink is attached to every
    /// long-running operation.
    pub fn init_with(
        engine: Arc<dyn DiskEngine>,
        spec: &InitSpec,
        log: Arc<dyn LogSink>,
        progress: Arc<dyn ProgressSink>,
    ) -> Result<Self> {
        let spec = normalize_init(spec);
        let bridge = Arc::new(LogBridge::new(log));
        check("init", engine.init(&spec, bridge))?;
        debug!(major = spec.major, minor = spec.minor, "engine library initialized");
        Ok(Self {
            inner: Arc::new(LibraryInner { engine, progress }),
        })
    }

    /// Shut the engine down. Affects every clone of this library;
    /// operations attempted afterwards fail with the engine's
    /// not-initialized code.
    pub fn exit(&self) {
        self.inner.engine.exit();
    }

    /// Establish a session with the backing store
    pub fn connect(&self, spec: &ConnectSpec) -> Result<Connection> {
        let (raw, code) = self.inner.engine.connect(spec);
        check("connect", code)?;
        Ok(Connection {
            library: self.clone(),
            raw,
        })
    }

    /// Establish a session constrained to read-only mode and/or an
    /// ordered `:`-separated transport-mode preference list
    pub fn connect_ex(
        &self,
        spec: &ConnectSpec,
        read_only: bool,
        transport_modes: &str,
    ) -> Result<Connection> {
        let (raw, code) = self.inner.engine.connect_ex(spec, read_only, transport_modes);
        check("connect_ex", code)?;
        Ok(Connection {
            library: self.clone(),
            raw,
        })
    }

    /// Announce upcoming access to the disk named by `identity`
    pub fn prepare_for_access(&self, spec: &ConnectSpec, identity: &str) -> Result<()> {
        check(
            "prepare_for_access",
            self.inner.engine.prepare_for_access(spec, identity),
        )
    }

    /// Withdraw a previous access announcement
    pub fn end_access(&self, spec: &ConnectSpec, identity: &str) -> Result<()> {
        check("end_access", self.inner.engine.end_access(spec, identity))
    }

    /// Release sessions left behind by earlier crashes
    pub fn cleanup(&self, spec: &ConnectSpec) -> Result<CleanupStats> {
        let (cleaned, remaining, code) = self.inner.engine.cleanup(spec);
        check("cleanup", code)?;
        Ok(CleanupStats { cleaned, remaining })
    }

    /// Rename a disk image
    pub fn rename(&self, src_path: &str, dst_path: &str) -> Result<()> {
        check("rename", self.inner.engine.rename(src_path, dst_path))
    }

    /// Transport mechanisms the engine supports, ordered by preference
    #[must_use]
    pub fn list_transport_modes(&self) -> String {
        self.inner.engine.list_transport_modes()
    }

    fn engine(&self) -> &dyn DiskEngine {
        self.inner.engine.as_ref()
    }

    fn progress(&self) -> &dyn ProgressSink {
        self.inner.progress.as_ref()
    }
}

/// An established session with the backing store
///
/// Released exactly once by [`disconnect`](Connection::disconnect);
/// consuming the value is what makes a second release unrepresentable.
pub struct Connection {
    library: Library,
    raw: RawConnection,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection").field("raw", &self.raw).finish()
    }
}

impl Connection {
    /// Open a disk image reachable through this session
    pub fn open(&self, path: &str, flags: u32) -> Result<Disk> {
        let (raw, code) = self.library.engine().open(self.raw, path, flags);
        check("open", code)?;
        Ok(Disk {
            library: self.library.clone(),
            raw,
        })
    }

    /// Create a new disk image (long-running)
    pub fn create(&self, path: &str, params: &CreateParams) -> Result<()> {
        check(
            "create",
            self.library
                .engine()
                .create(self.raw, path, params, self.library.progress()),
        )
    }

    /// Extend a disk image to the given capacity in sectors
    /// (long-running)
    pub fn grow(
        &self,
        path: &str,
        capacity: SectorCount,
        update_geometry: bool,
    ) -> Result<()> {
        check(
            "grow",
            self.library.engine().grow(
                self.raw,
                path,
                capacity,
                update_geometry,
                self.library.progress(),
            ),
        )
    }

    /// Check a disk image for consistency, optionally repairing it
    pub fn check_repair(&self, path: &str, repair: bool) -> Result<()> {
        check(
            "check_repair",
            self.library.engine().check_repair(self.raw, path, repair),
        )
    }

    /// Copy the image at `src_path`, reachable through `src`, to
    /// `dst_path` on this session (long-running)
    pub fn clone_from(
        &self,
        dst_path: &str,
        src: &Connection,
        src_path: &str,
        params: &CreateParams,
        overwrite: bool,
    ) -> Result<()> {
        check(
            "clone_disk",
            self.library.engine().clone_disk(
                self.raw,
                dst_path,
                src.raw,
                src_path,
                params,
                overwrite,
                self.library.progress(),
            ),
        )
    }

    /// Delete a disk image including all its extents
    pub fn unlink(&self, path: &str) -> Result<()> {
        check("unlink", self.library.engine().unlink(self.raw, path))
    }

    /// Release the session. The engine frees its resources only here.
    pub fn disconnect(self) -> Result<()> {
        check("disconnect", self.library.engine().disconnect(self.raw))
    }
}

/// An open disk image
///
/// Released exactly once by [`close`](Disk::close).
pub struct Disk {
    library: Library,
    raw: RawDisk,
}

impl fmt::Debug for Disk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Disk").field("raw", &self.raw).finish()
    }
}

impl Disk {
    /// Create a child image backed by this disk and open it
    /// (long-running)
    pub fn create_child(&self, child_path: &str, disk_type: DiskType) -> Result<Disk> {
        let (raw, code) = self.library.engine().create_child(
            self.raw,
            child_path,
            disk_type,
            self.library.progress(),
        );
        check("create_child", code)?;
        Ok(Disk {
            library: self.library.clone(),
            raw,
        })
    }

    /// Reclaim unused space (long-running)
    pub fn shrink(&self) -> Result<()> {
        check(
            "shrink",
            self.library.engine().shrink(self.raw, self.library.progress()),
        )
    }

    /// Defragment the image (long-running)
    pub fn defragment(&self) -> Result<()> {
        check(
            "defragment",
            self.library
                .engine()
                .defragment(self.raw, self.library.progress()),
        )
    }

    /// Properties of the open disk
    pub fn info(&self) -> Result<DiskInfo> {
        let (info, code) = self.library.engine().get_info(self.raw);
        check("get_info", code)?;
        Ok(info)
    }

    /// Enumerate metadata keys into `buf` as NUL-separated strings with
    /// a trailing empty entry. On the engine's size-insufficient code
    /// the needed length is in `required`; the code itself passes
    /// through opaque.
    pub fn metadata_keys(&self, buf: &mut [u8], required: &mut usize) -> Result<()> {
        check(
            "get_metadata_keys",
            self.library.engine().get_metadata_keys(self.raw, buf, required),
        )
    }

    /// Read one metadata value into `buf` (NUL-terminated); same
    /// size-insufficient convention as [`metadata_keys`](Self::metadata_keys)
    pub fn read_metadata(&self, key: &str, buf: &mut [u8], required: &mut usize) -> Result<()> {
        check(
            "read_metadata",
            self.library.engine().read_metadata(self.raw, key, buf, required),
        )
    }

    /// Write one metadata key/value pair
    pub fn write_metadata(&self, key: &str, value: &str) -> Result<()> {
        check(
            "write_metadata",
            self.library.engine().write_metadata(self.raw, key, value),
        )
    }

    /// Read whole sectors into `buf` (`buf.len()` must equal
    /// `num_sectors * SECTOR_SIZE`)
    pub fn read(
        &self,
        start_sector: SectorCount,
        num_sectors: SectorCount,
        buf: &mut [u8],
    ) -> Result<()> {
        check(
            "read",
            self.library.engine().read(self.raw, start_sector, num_sectors, buf),
        )
    }

    /// Write whole sectors from `buf` (same length rule as
    /// [`read`](Self::read))
    pub fn write(
        &self,
        start_sector: SectorCount,
        num_sectors: SectorCount,
        buf: &[u8],
    ) -> Result<()> {
        check(
            "write",
            self.library.engine().write(self.raw, start_sector, num_sectors, buf),
        )
    }

    /// Transport mechanism this disk was opened through
    #[must_use]
    pub fn transport_mode(&self) -> String {
        self.library.engine().get_transport_mode(self.raw)
    }

    /// Bytes a clone of this disk would need as the given type
    pub fn space_needed_for_clone(&self, disk_type: DiskType) -> Result<u64> {
        let (bytes, code) = self.library.engine().space_needed_for_clone(self.raw, disk_type);
        check("space_needed_for_clone", code)?;
        Ok(bytes)
    }

    /// Query allocated extents in `[start_sector, start_sector +
    /// num_sectors)` at `chunk_size` granularity (phase one). A failed
    /// query produces no descriptor; the engine has already cleaned up
    /// its own failure path.
    pub fn query_allocated_blocks(
        &self,
        start_sector: SectorCount,
        num_sectors: SectorCount,
        chunk_size: SectorCount,
    ) -> Result<BlockListDescriptor<'_>> {
        let (list, count, code) = self.library.engine().query_allocated_blocks(
            self.raw,
            start_sector,
            num_sectors,
            chunk_size,
        );
        check("query_allocated_blocks", code)?;
        Ok(BlockListDescriptor::new(self.library.engine(), list, count))
    }

    /// Both phases of the allocation query: query, copy into a fresh
    /// vector, free the engine list.
    pub fn allocated_blocks(
        &self,
        start_sector: SectorCount,
        num_sectors: SectorCount,
        chunk_size: SectorCount,
    ) -> Result<Vec<Block>> {
        let desc = self.query_allocated_blocks(start_sector, num_sectors, chunk_size)?;
        let mut blocks = vec![Block::default(); desc.num_blocks() as usize];
        desc.copy_and_free(&mut blocks)?;
        Ok(blocks)
    }

    /// Release the disk handle. The engine frees its resources only
    /// here.
    pub fn close(self) -> Result<()> {
        check("close", self.library.engine().close(self.raw))
    }
}
