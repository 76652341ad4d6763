//! Byte-addressed disk access
//!
//! [`open_disk`] runs the full session bring-up (access announcement,
//! connect, open, info) and unwinds whatever succeeded when a later step
//! fails, so a failed open never leaks a session or handle. The
//! resulting [`DiskAccess`] offers byte-granular positioned reads and
//! writes over the sector-granular engine interface, using
//! read-modify-write for partial sectors.

use parking_lot::Mutex;
use tracing::debug;
use vdiskio_engine::{ConnectSpec, DiskInfo, Result, SECTOR_SIZE};
use vdiskio_session::{Connection, Disk, Library};

/// What to open and how
#[derive(Clone, Debug)]
pub struct OpenRequest {
    /// Disk image path
    pub path: String,
    /// Open flags (`vdiskio_engine::flags`)
    pub flags: u32,
    /// Constrain the session to read-only mode
    pub read_only: bool,
    /// Ordered `:`-separated transport preference; empty for the
    /// engine's default
    pub transport_modes: String,
    /// Identity announced to the backend for the access window
    pub identity: String,
}

impl OpenRequest {
    /// Read-write request with default flags and transports
    #[must_use]
    pub fn new(path: impl Into<String>, identity: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            flags: 0,
            read_only: false,
            transport_modes: String::new(),
            identity: identity.into(),
        }
    }
}

/// An open disk with byte-granular positioned io
///
/// Sector-aligned spans go straight to the engine; partial head and
/// tail sectors are handled by read-modify-write. Unaligned operations
/// are serialized with an internal lock so two concurrent partial-sector
/// writes cannot interleave their read and write halves.
pub struct DiskAccess {
    library: Library,
    spec: ConnectSpec,
    identity: String,
    conn: Connection,
    disk: Disk,
    info: DiskInfo,
    unaligned: Mutex<()>,
}

impl std::fmt::Debug for DiskAccess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskAccess")
            .field("identity", &self.identity)
            .field("disk", &self.disk)
            .field("capacity", &self.info.capacity)
            .finish()
    }
}

/// Bring up a session and open `request.path` through it.
///
/// Order: announce access, connect, open, fetch info. On failure every
/// step already taken is undone in reverse; unwind errors are dropped in
/// favor of the error that triggered the unwind.
pub fn open_disk(library: &Library, spec: &ConnectSpec, request: &OpenRequest) -> Result<DiskAccess> {
    library.prepare_for_access(spec, &request.identity)?;

    let conn = match library.connect_ex(spec, request.read_only, &request.transport_modes) {
        Ok(conn) => conn,
        Err(err) => {
            let _ = library.end_access(spec, &request.identity);
            return Err(err);
        }
    };

    let disk = match conn.open(&request.path, request.flags) {
        Ok(disk) => disk,
        Err(err) => {
            let _ = conn.disconnect();
            let _ = library.end_access(spec, &request.identity);
            return Err(err);
        }
    };

    let info = match disk.info() {
        Ok(info) => info,
        Err(err) => {
            let _ = disk.close();
            let _ = conn.disconnect();
            let _ = library.end_access(spec, &request.identity);
            return Err(err);
        }
    };

    debug!(
        path = %request.path,
        capacity = info.capacity,
        transport = %disk.transport_mode(),
        "disk opened"
    );
    Ok(DiskAccess {
        library: library.clone(),
        spec: spec.clone(),
        identity: request.identity.clone(),
        conn,
        disk,
        info,
        unaligned: Mutex::new(()),
    })
}

impl DiskAccess {
    /// Properties captured when the disk was opened
    #[must_use]
    pub fn info(&self) -> &DiskInfo {
        &self.info
    }

    /// Capacity in bytes
    #[must_use]
    pub fn capacity_bytes(&self) -> u64 {
        self.info.capacity_bytes()
    }

    /// The open disk, for operations beyond positioned io (metadata,
    /// allocation queries)
    #[must_use]
    pub fn disk(&self) -> &Disk {
        &self.disk
    }

    /// The session the disk was opened through
    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Read up to `buf.len()` bytes at byte offset `offset`.
    ///
    /// Reads are clamped at capacity; a read at or past the end returns
    /// `Ok(0)`. Partial sectors are serviced through a scratch sector.
    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let capacity = self.capacity_bytes();
        if offset >= capacity {
            return Ok(0);
        }
        let len = buf.len().min((capacity - offset) as usize);
        if len == 0 {
            return Ok(0);
        }
        let buf = &mut buf[..len];

        let head_off = (offset % SECTOR_SIZE) as usize;
        let tail_off = (head_off + len) % SECTOR_SIZE as usize;
        let _guard = (head_off != 0 || tail_off != 0).then(|| self.unaligned.lock());

        let mut sector = offset / SECTOR_SIZE;
        let mut done = 0usize;

        if head_off != 0 {
            let mut scratch = [0u8; SECTOR_SIZE as usize];
            self.disk.read(sector, 1, &mut scratch)?;
            let take = (SECTOR_SIZE as usize - head_off).min(len);
            buf[..take].copy_from_slice(&scratch[head_off..head_off + take]);
            done += take;
            sector += 1;
        }

        let whole = (len - done) as u64 / SECTOR_SIZE;
        if whole > 0 {
            let bytes = (whole * SECTOR_SIZE) as usize;
            self.disk.read(sector, whole, &mut buf[done..done + bytes])?;
            done += bytes;
            sector += whole;
        }

        let tail = len - done;
        if tail > 0 {
            let mut scratch = [0u8; SECTOR_SIZE as usize];
            self.disk.read(sector, 1, &mut scratch)?;
            buf[done..].copy_from_slice(&scratch[..tail]);
            done = len;
        }

        Ok(done)
    }

    /// Write `buf` at byte offset `offset`.
    ///
    /// Partial head and tail sectors are read, overlaid, and written
    /// back. Writes past capacity surface the engine's own range code.
    pub fn write_at(&self, offset: u64, buf: &[u8]) -> Result<usize> {
        let len = buf.len();
        if len == 0 {
            return Ok(0);
        }

        let head_off = (offset % SECTOR_SIZE) as usize;
        let tail_off = (head_off + len) % SECTOR_SIZE as usize;
        let _guard = (head_off != 0 || tail_off != 0).then(|| self.unaligned.lock());

        let mut sector = offset / SECTOR_SIZE;
        let mut done = 0usize;

        if head_off != 0 {
            let mut scratch = [0u8; SECTOR_SIZE as usize];
            self.disk.read(sector, 1, &mut scratch)?;
            let take = (SECTOR_SIZE as usize - head_off).min(len);
            scratch[head_off..head_off + take].copy_from_slice(&buf[..take]);
            self.disk.write(sector, 1, &scratch)?;
            done += take;
            sector += 1;
        }

        let whole = (len - done) as u64 / SECTOR_SIZE;
        if whole > 0 {
            let bytes = (whole * SECTOR_SIZE) as usize;
            self.disk.write(sector, whole, &buf[done..done + bytes])?;
            done += bytes;
            sector += whole;
        }

        let tail = len - done;
        if tail > 0 {
            let mut scratch = [0u8; SECTOR_SIZE as usize];
            self.disk.read(sector, 1, &mut scratch)?;
            scratch[..tail].copy_from_slice(&buf[done..]);
            self.disk.write(sector, 1, &scratch)?;
            done = len;
        }

        Ok(done)
    }

    /// Tear the session down: close the disk, disconnect, withdraw the
    /// access announcement. All three run; the first error is the one
    /// reported.
    pub fn close(self) -> Result<()> {
        let Self {
            library,
            spec,
            identity,
            conn,
            disk,
            ..
        } = self;
        let mut first = None;
        if let Err(err) = disk.close() {
            first.get_or_insert(err);
        }
        if let Err(err) = conn.disconnect() {
            first.get_or_insert(err);
        }
        if let Err(err) = library.end_access(&spec, &identity) {
            first.get_or_insert(err);
        }
        match first {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
