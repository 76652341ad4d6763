//! In-memory reference engine
//!
//! A self-contained [`DiskEngine`] implementation backed by sparse
//! per-image sector maps. It exists so the marshalling layer and the io
//! adapter can be exercised end to end without a native backend; it is
//! not a disk format implementation.
//!
//! Allocation tracking is chunk-granular: the allocated-block query
//! reports extents rounded out to the requested chunk size, coalescing
//! adjacent chunks, in ascending sector order.

use crate::engine::{
    DiskEngine, EngineLog, ProgressSink, RawBlockList, RawConnection, RawDisk,
};
use crate::error::{ErrorCode, codes};
use crate::params::{ConnectSpec, Credentials, InitSpec};
use crate::types::{
    AdapterType, Block, CreateParams, DiskInfo, DiskType, Geometry, SECTOR_SIZE, SectorCount,
    transport,
};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::debug;

/// In-memory disk engine
///
/// All state lives behind one lock; every call is synchronous and
/// blocking, matching the boundary contract.
pub struct MemoryEngine {
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    initialized: bool,
    log: Option<Arc<dyn EngineLog>>,
    /// Accepted username/password pairs; empty means any login passes
    accounts: HashMap<String, String>,
    next_handle: u64,
    images: HashMap<String, Image>,
    connections: HashMap<u64, ConnState>,
    disks: HashMap<u64, DiskState>,
    block_lists: HashMap<u64, Vec<Block>>,
    access_marks: HashMap<String, u32>,
}

#[derive(Clone)]
struct Image {
    capacity: SectorCount,
    disk_type: DiskType,
    adapter_type: AdapterType,
    /// Sector number to sector payload; absent sectors read as zeros
    data: BTreeMap<SectorCount, Vec<u8>>,
    metadata: BTreeMap<String, String>,
    uuid: String,
    parent: Option<String>,
}

struct ConnState {
    read_only: bool,
    transport: String,
}

struct DiskState {
    path: String,
    read_only: bool,
    transport: String,
}

impl State {
    fn issue_handle(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }

    fn new_uuid(&mut self) -> String {
        let n = self.issue_handle();
        format!("mem-{n:08x}")
    }

    fn authorize(&self, creds: &Credentials) -> ErrorCode {
        match creds {
            Credentials::UserPassword { username, password } => {
                if self.accounts.is_empty() {
                    return codes::OK;
                }
                match self.accounts.get(username) {
                    Some(expected) if expected == password => codes::OK,
                    _ => codes::AUTH_FAILED,
                }
            }
            Credentials::SessionCookie { cookie, .. } => {
                if cookie.is_empty() {
                    codes::AUTH_FAILED
                } else {
                    codes::OK
                }
            }
            Credentials::ManagedObject { id, datastore, .. } => {
                if id.is_empty() || datastore.is_empty() {
                    codes::AUTH_FAILED
                } else {
                    codes::OK
                }
            }
        }
    }
}

impl MemoryEngine {
    /// Create an engine with no images and no account restrictions
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
        }
    }

    /// Restrict username/password logins to the given account
    #[must_use]
    pub fn with_account(self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.state
            .lock()
            .accounts
            .insert(username.into(), password.into());
        self
    }

    /// Pre-create an empty sparse image at the given path
    #[must_use]
    pub fn with_image(self, path: impl Into<String>, capacity: SectorCount) -> Self {
        {
            let mut state = self.state.lock();
            let uuid = state.new_uuid();
            state.images.insert(
                path.into(),
                Image {
                    capacity,
                    disk_type: DiskType::MonolithicSparse,
                    adapter_type: AdapterType::default(),
                    data: BTreeMap::new(),
                    metadata: BTreeMap::new(),
                    uuid,
                    parent: None,
                },
            );
        }
        self
    }

    /// Number of engine-owned block lists not yet freed
    ///
    /// Test hook for leak assertions around the two-phase query protocol.
    #[must_use]
    pub fn outstanding_block_lists(&self) -> usize {
        self.state.lock().block_lists.len()
    }

    /// Number of live sessions
    #[must_use]
    pub fn open_connections(&self) -> usize {
        self.state.lock().connections.len()
    }

    /// Number of live disk handles
    #[must_use]
    pub fn open_disks(&self) -> usize {
        self.state.lock().disks.len()
    }

    /// Whether an image exists at the given path
    #[must_use]
    pub fn has_image(&self, path: &str) -> bool {
        self.state.lock().images.contains_key(path)
    }

    fn run_progress(progress: &dyn ProgressSink) -> bool {
        progress.progress(0) && progress.progress(50) && progress.progress(100)
    }
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn geometry_for(capacity: SectorCount) -> Geometry {
    const HEADS: u64 = 255;
    const SECTORS: u64 = 63;
    Geometry {
        cylinders: u32::try_from(capacity / (HEADS * SECTORS)).unwrap_or(u32::MAX),
        heads: HEADS as u32,
        sectors: SECTORS as u32,
    }
}

/// NUL-separated buffer fill shared by the metadata reads: writes
/// `payload` plus a trailing NUL, reporting the needed length when the
/// buffer cannot hold it.
fn fill_string_buffer(payload: &[u8], buf: &mut [u8], required: &mut usize) -> ErrorCode {
    let needed = payload.len() + 1;
    *required = needed;
    if buf.len() < needed {
        return codes::BUFFER_TOO_SMALL;
    }
    buf[..payload.len()].copy_from_slice(payload);
    buf[payload.len()] = 0;
    codes::OK
}

impl DiskEngine for MemoryEngine {
    fn init(&self, spec: &InitSpec, log: Arc<dyn EngineLog>) -> ErrorCode {
        let mut state = self.state.lock();
        state.initialized = true;
        state.log = Some(log);
        debug!(major = spec.major, minor = spec.minor, "memory engine initialized");
        codes::OK
    }

    fn exit(&self) {
        let mut state = self.state.lock();
        *state = State {
            accounts: std::mem::take(&mut state.accounts),
            ..State::default()
        };
        debug!("memory engine shut down");
    }

    fn connect(&self, spec: &ConnectSpec) -> (RawConnection, ErrorCode) {
        self.connect_ex(spec, false, "")
    }

    fn connect_ex(
        &self,
        spec: &ConnectSpec,
        read_only: bool,
        transport_modes: &str,
    ) -> (RawConnection, ErrorCode) {
        let mut state = self.state.lock();
        if !state.initialized {
            return (RawConnection::default(), codes::NOT_INITIALIZED);
        }
        let auth = state.authorize(&spec.credentials);
        if auth.is_err() {
            return (RawConnection::default(), auth);
        }
        let chosen = transport_modes
            .split(':')
            .find(|m| !m.is_empty())
            .unwrap_or(transport::FILE)
            .to_string();
        let handle = state.issue_handle();
        state.connections.insert(
            handle,
            ConnState {
                read_only,
                transport: chosen,
            },
        );
        (RawConnection(handle), codes::OK)
    }

    fn prepare_for_access(&self, _spec: &ConnectSpec, identity: &str) -> ErrorCode {
        let mut state = self.state.lock();
        if !state.initialized {
            return codes::NOT_INITIALIZED;
        }
        *state.access_marks.entry(identity.to_string()).or_insert(0) += 1;
        codes::OK
    }

    fn end_access(&self, _spec: &ConnectSpec, identity: &str) -> ErrorCode {
        let mut state = self.state.lock();
        if let Some(count) = state.access_marks.get_mut(identity) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                state.access_marks.remove(identity);
            }
        }
        codes::OK
    }

    fn disconnect(&self, conn: RawConnection) -> ErrorCode {
        let mut state = self.state.lock();
        if state.connections.remove(&conn.0).is_none() {
            return codes::INVALID_HANDLE;
        }
        codes::OK
    }

    fn cleanup(&self, _spec: &ConnectSpec) -> (u32, u32, ErrorCode) {
        let mut state = self.state.lock();
        if !state.initialized {
            return (0, 0, codes::NOT_INITIALIZED);
        }
        let cleaned = state.connections.len() as u32;
        state.connections.clear();
        if cleaned > 0
            && let Some(log) = state.log.clone()
        {
            log.warn(format_args!("cleanup released {cleaned} stale sessions"));
        }
        (cleaned, 0, codes::OK)
    }

    fn open(&self, conn: RawConnection, path: &str, flags: u32) -> (RawDisk, ErrorCode) {
        let mut state = self.state.lock();
        if !state.initialized {
            return (RawDisk::default(), codes::NOT_INITIALIZED);
        }
        let Some(session) = state.connections.get(&conn.0) else {
            return (RawDisk::default(), codes::INVALID_HANDLE);
        };
        let read_only = session.read_only || flags & crate::types::flags::OPEN_READ_ONLY != 0;
        let transport = session.transport.clone();
        if !state.images.contains_key(path) {
            return (RawDisk::default(), codes::NOT_FOUND);
        }
        let handle = state.issue_handle();
        state.disks.insert(
            handle,
            DiskState {
                path: path.to_string(),
                read_only,
                transport,
            },
        );
        (RawDisk(handle), codes::OK)
    }

    fn close(&self, disk: RawDisk) -> ErrorCode {
        let mut state = self.state.lock();
        if state.disks.remove(&disk.0).is_none() {
            return codes::INVALID_HANDLE;
        }
        codes::OK
    }

    fn create(
        &self,
        conn: RawConnection,
        path: &str,
        params: &CreateParams,
        progress: &dyn ProgressSink,
    ) -> ErrorCode {
        let mut state = self.state.lock();
        if !state.initialized {
            return codes::NOT_INITIALIZED;
        }
        let Some(session) = state.connections.get(&conn.0) else {
            return codes::INVALID_HANDLE;
        };
        if session.read_only {
            return codes::READ_ONLY;
        }
        if params.capacity == 0 {
            return codes::INVALID_ARG;
        }
        if state.images.contains_key(path) {
            return codes::ALREADY_EXISTS;
        }
        if !Self::run_progress(progress) {
            return codes::GENERIC;
        }
        let uuid = state.new_uuid();
        state.images.insert(
            path.to_string(),
            Image {
                capacity: params.capacity,
                disk_type: params.disk_type,
                adapter_type: params.adapter_type,
                data: BTreeMap::new(),
                metadata: BTreeMap::new(),
                uuid,
                parent: None,
            },
        );
        codes::OK
    }

    fn create_child(
        &self,
        disk: RawDisk,
        child_path: &str,
        disk_type: DiskType,
        progress: &dyn ProgressSink,
    ) -> (RawDisk, ErrorCode) {
        let mut state = self.state.lock();
        let Some(parent) = state.disks.get(&disk.0) else {
            return (RawDisk::default(), codes::INVALID_HANDLE);
        };
        let parent_path = parent.path.clone();
        let transport = parent.transport.clone();
        if state.images.contains_key(child_path) {
            return (RawDisk::default(), codes::ALREADY_EXISTS);
        }
        if !Self::run_progress(progress) {
            return (RawDisk::default(), codes::GENERIC);
        }
        // The child starts with the parent's visible content.
        let Some(base) = state.images.get(&parent_path).cloned() else {
            return (RawDisk::default(), codes::NOT_FOUND);
        };
        let uuid = state.new_uuid();
        state.images.insert(
            child_path.to_string(),
            Image {
                disk_type,
                metadata: BTreeMap::new(),
                uuid,
                parent: Some(parent_path),
                ..base
            },
        );
        let handle = state.issue_handle();
        state.disks.insert(
            handle,
            DiskState {
                path: child_path.to_string(),
                read_only: false,
                transport,
            },
        );
        (RawDisk(handle), codes::OK)
    }

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
    ) -> ErrorCode {
        let mut state = self.state.lock();
        if !state.initialized {
            return codes::NOT_INITIALIZED;
        }
        if !state.connections.contains_key(&src_conn.0) {
            return codes::INVALID_HANDLE;
        }
        let Some(dst_session) = state.connections.get(&dst_conn.0) else {
            return codes::INVALID_HANDLE;
        };
        if dst_session.read_only {
            return codes::READ_ONLY;
        }
        let Some(src) = state.images.get(src_path).cloned() else {
            return codes::NOT_FOUND;
        };
        if state.images.contains_key(dst_path) && !overwrite {
            return codes::ALREADY_EXISTS;
        }
        if !Self::run_progress(progress) {
            return codes::GENERIC;
        }
        let uuid = state.new_uuid();
        state.images.insert(
            dst_path.to_string(),
            Image {
                capacity: src.capacity.max(params.capacity),
                disk_type: params.disk_type,
                adapter_type: params.adapter_type,
                data: src.data,
                metadata: src.metadata,
                uuid,
                parent: None,
            },
        );
        codes::OK
    }

    fn grow(
        &self,
        conn: RawConnection,
        path: &str,
        capacity: SectorCount,
        _update_geometry: bool,
        progress: &dyn ProgressSink,
    ) -> ErrorCode {
        let mut state = self.state.lock();
        let Some(session) = state.connections.get(&conn.0) else {
            return codes::INVALID_HANDLE;
        };
        if session.read_only {
            return codes::READ_ONLY;
        }
        let Some(image) = state.images.get_mut(path) else {
            return codes::NOT_FOUND;
        };
        if capacity < image.capacity {
            return codes::INVALID_ARG;
        }
        if !Self::run_progress(progress) {
            return codes::GENERIC;
        }
        image.capacity = capacity;
        codes::OK
    }

    fn shrink(&self, disk: RawDisk, progress: &dyn ProgressSink) -> ErrorCode {
        let mut state = self.state.lock();
        let Some(handle) = state.disks.get(&disk.0) else {
            return codes::INVALID_HANDLE;
        };
        if handle.read_only {
            return codes::READ_ONLY;
        }
        let path = handle.path.clone();
        if !Self::run_progress(progress) {
            return codes::GENERIC;
        }
        let Some(image) = state.images.get_mut(&path) else {
            return codes::NOT_FOUND;
        };
        image.data.retain(|_, payload| payload.iter().any(|b| *b != 0));
        codes::OK
    }

    fn defragment(&self, disk: RawDisk, progress: &dyn ProgressSink) -> ErrorCode {
        let state = self.state.lock();
        if !state.disks.contains_key(&disk.0) {
            return codes::INVALID_HANDLE;
        }
        drop(state);
        if !Self::run_progress(progress) {
            return codes::GENERIC;
        }
        codes::OK
    }

    fn check_repair(&self, conn: RawConnection, path: &str, _repair: bool) -> ErrorCode {
        let state = self.state.lock();
        if !state.connections.contains_key(&conn.0) {
            return codes::INVALID_HANDLE;
        }
        if !state.images.contains_key(path) {
            return codes::NOT_FOUND;
        }
        codes::OK
    }

    fn unlink(&self, conn: RawConnection, path: &str) -> ErrorCode {
        let mut state = self.state.lock();
        let Some(session) = state.connections.get(&conn.0) else {
            return codes::INVALID_HANDLE;
        };
        if session.read_only {
            return codes::READ_ONLY;
        }
        if state.images.remove(path).is_none() {
            return codes::NOT_FOUND;
        }
        codes::OK
    }

    fn rename(&self, src_path: &str, dst_path: &str) -> ErrorCode {
        let mut state = self.state.lock();
        if !state.initialized {
            return codes::NOT_INITIALIZED;
        }
        if state.images.contains_key(dst_path) {
            return codes::ALREADY_EXISTS;
        }
        let Some(image) = state.images.remove(src_path) else {
            return codes::NOT_FOUND;
        };
        state.images.insert(dst_path.to_string(), image);
        codes::OK
    }

    fn get_info(&self, disk: RawDisk) -> (DiskInfo, ErrorCode) {
        let state = self.state.lock();
        let Some(handle) = state.disks.get(&disk.0) else {
            return (DiskInfo::default(), codes::INVALID_HANDLE);
        };
        let Some(image) = state.images.get(&handle.path) else {
            return (DiskInfo::default(), codes::NOT_FOUND);
        };
        let geo = geometry_for(image.capacity);
        let info = DiskInfo {
            bios_geo: geo,
            phys_geo: geo,
            capacity: image.capacity,
            adapter_type: image.adapter_type,
            num_links: if image.parent.is_some() { 2 } else { 1 },
            parent_path_hint: image.parent.clone().unwrap_or_default(),
            uuid: image.uuid.clone(),
        };
        (info, codes::OK)
    }

    fn get_metadata_keys(&self, disk: RawDisk, buf: &mut [u8], required: &mut usize) -> ErrorCode {
        let state = self.state.lock();
        let Some(handle) = state.disks.get(&disk.0) else {
            return codes::INVALID_HANDLE;
        };
        let Some(image) = state.images.get(&handle.path) else {
            return codes::NOT_FOUND;
        };
        // Keys are NUL-separated with a trailing empty entry.
        let mut payload = Vec::new();
        for key in image.metadata.keys() {
            payload.extend_from_slice(key.as_bytes());
            payload.push(0);
        }
        fill_string_buffer(&payload, buf, required)
    }

    fn read_metadata(
        &self,
        disk: RawDisk,
        key: &str,
        buf: &mut [u8],
        required: &mut usize,
    ) -> ErrorCode {
        let state = self.state.lock();
        let Some(handle) = state.disks.get(&disk.0) else {
            return codes::INVALID_HANDLE;
        };
        let Some(image) = state.images.get(&handle.path) else {
            return codes::NOT_FOUND;
        };
        let Some(value) = image.metadata.get(key) else {
            return codes::NOT_FOUND;
        };
        fill_string_buffer(value.as_bytes(), buf, required)
    }

    fn write_metadata(&self, disk: RawDisk, key: &str, value: &str) -> ErrorCode {
        let mut state = self.state.lock();
        let Some(handle) = state.disks.get(&disk.0) else {
            return codes::INVALID_HANDLE;
        };
        if handle.read_only {
            return codes::READ_ONLY;
        }
        let path = handle.path.clone();
        let Some(image) = state.images.get_mut(&path) else {
            return codes::NOT_FOUND;
        };
        image.metadata.insert(key.to_string(), value.to_string());
        codes::OK
    }

    fn read(
        &self,
        disk: RawDisk,
        start_sector: SectorCount,
        num_sectors: SectorCount,
        buf: &mut [u8],
    ) -> ErrorCode {
        let state = self.state.lock();
        let Some(handle) = state.disks.get(&disk.0) else {
            return codes::INVALID_HANDLE;
        };
        let Some(image) = state.images.get(&handle.path) else {
            return codes::NOT_FOUND;
        };
        if buf.len() as u64 != num_sectors * SECTOR_SIZE {
            return codes::INVALID_ARG;
        }
        let Some(end) = start_sector.checked_add(num_sectors) else {
            return codes::OUT_OF_RANGE;
        };
        if end > image.capacity {
            return codes::OUT_OF_RANGE;
        }
        buf.fill(0);
        for (&sector, payload) in image.data.range(start_sector..end) {
            let at = ((sector - start_sector) * SECTOR_SIZE) as usize;
            buf[at..at + SECTOR_SIZE as usize].copy_from_slice(payload);
        }
        codes::OK
    }

    fn write(
        &self,
        disk: RawDisk,
        start_sector: SectorCount,
        num_sectors: SectorCount,
        buf: &[u8],
    ) -> ErrorCode {
        let mut state = self.state.lock();
        let Some(handle) = state.disks.get(&disk.0) else {
            return codes::INVALID_HANDLE;
        };
        if handle.read_only {
            return codes::READ_ONLY;
        }
        let path = handle.path.clone();
        if buf.len() as u64 != num_sectors * SECTOR_SIZE {
            return codes::INVALID_ARG;
        }
        let Some(image) = state.images.get_mut(&path) else {
            return codes::NOT_FOUND;
        };
        let Some(end) = start_sector.checked_add(num_sectors) else {
            return codes::OUT_OF_RANGE;
        };
        if end > image.capacity {
            return codes::OUT_OF_RANGE;
        }
        for i in 0..num_sectors {
            let at = (i * SECTOR_SIZE) as usize;
            image.data.insert(
                start_sector + i,
                buf[at..at + SECTOR_SIZE as usize].to_vec(),
            );
        }
        codes::OK
    }

    fn get_transport_mode(&self, disk: RawDisk) -> String {
        let state = self.state.lock();
        state
            .disks
            .get(&disk.0)
            .map(|d| d.transport.clone())
            .unwrap_or_default()
    }

    fn list_transport_modes(&self) -> String {
        format!(
            "{}:{}:{}:{}",
            transport::FILE,
            transport::NBD,
            transport::NBDSSL,
            transport::HOTADD
        )
    }

    fn space_needed_for_clone(&self, disk: RawDisk, disk_type: DiskType) -> (u64, ErrorCode) {
        let state = self.state.lock();
        let Some(handle) = state.disks.get(&disk.0) else {
            return (0, codes::INVALID_HANDLE);
        };
        let Some(image) = state.images.get(&handle.path) else {
            return (0, codes::NOT_FOUND);
        };
        let allocated = if image.disk_type.preallocated() {
            image.capacity
        } else {
            image.data.len() as u64
        };
        let sectors = if disk_type.preallocated() {
            image.capacity
        } else {
            allocated
        };
        (sectors * SECTOR_SIZE, codes::OK)
    }

    fn query_allocated_blocks(
        &self,
        disk: RawDisk,
        start_sector: SectorCount,
        num_sectors: SectorCount,
        chunk_size: SectorCount,
    ) -> (RawBlockList, u32, ErrorCode) {
        let mut state = self.state.lock();
        let Some(handle) = state.disks.get(&disk.0) else {
            return (RawBlockList::default(), 0, codes::INVALID_HANDLE);
        };
        let path = handle.path.clone();
        if chunk_size == 0 || num_sectors == 0 {
            return (RawBlockList::default(), 0, codes::INVALID_ARG);
        }
        let Some(image) = state.images.get(&path) else {
            return (RawBlockList::default(), 0, codes::NOT_FOUND);
        };
        let Some(end) = start_sector.checked_add(num_sectors) else {
            return (RawBlockList::default(), 0, codes::OUT_OF_RANGE);
        };
        if end > image.capacity {
            return (RawBlockList::default(), 0, codes::OUT_OF_RANGE);
        }

        // Preallocated layouts have every sector allocated; sparse ones
        // are walked chunk by chunk. For the walk, written sectors mark
        // their chunks and adjacent chunks coalesce into extents.
        // BTreeMap iteration keeps the result in ascending sector order.
        let mut blocks: Vec<Block> = Vec::new();
        if image.disk_type.preallocated() {
            blocks.push(Block::new(start_sector, num_sectors));
        } else {
            let mut last_chunk: Option<SectorCount> = None;
            for (&sector, _) in image.data.range(start_sector..end) {
                let chunk = (sector - start_sector) / chunk_size;
                if last_chunk == Some(chunk) {
                    continue;
                }
                last_chunk = Some(chunk);
                let offset = start_sector + chunk * chunk_size;
                let length = chunk_size.min(end - offset);
                match blocks.last_mut() {
                    Some(prev) if prev.end() == offset => prev.length += length,
                    _ => blocks.push(Block::new(offset, length)),
                }
            }
        }

        let count = blocks.len() as u32;
        let handle = state.issue_handle();
        state.block_lists.insert(handle, blocks);
        (RawBlockList(handle), count, codes::OK)
    }

    fn copy_block_list(&self, list: RawBlockList, dest: &mut [Block]) -> ErrorCode {
        let state = self.state.lock();
        let Some(blocks) = state.block_lists.get(&list.0) else {
            return codes::INVALID_HANDLE;
        };
        if dest.len() < blocks.len() {
            return codes::INVALID_ARG;
        }
        dest[..blocks.len()].copy_from_slice(blocks);
        codes::OK
    }

    fn free_block_list(&self, list: RawBlockList) -> ErrorCode {
        let mut state = self.state.lock();
        if state.block_lists.remove(&list.0).is_none() {
            return codes::INVALID_HANDLE;
        }
        codes::OK
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Continue;
    impl ProgressSink for Continue {
        fn progress(&self, _percent_done: i32) -> bool {
            true
        }
    }

    struct NullLog;
    impl EngineLog for NullLog {
        fn warn(&self, _args: std::fmt::Arguments<'_>) {}
    }

    fn ready_engine() -> MemoryEngine {
        let engine = MemoryEngine::new();
        let code = engine.init(&InitSpec::default(), Arc::new(NullLog));
        assert!(code.is_ok());
        engine
    }

    fn local_spec() -> ConnectSpec {
        ConnectSpec::local(Credentials::user_password("admin", "secret"))
    }

    #[test]
    fn test_connect_requires_init() {
        let engine = MemoryEngine::new();
        let (_, code) = engine.connect(&local_spec());
        assert_eq!(code, codes::NOT_INITIALIZED);
    }

    #[test]
    fn test_account_restriction() {
        let engine = MemoryEngine::new().with_account("admin", "secret");
        engine.init(&InitSpec::default(), Arc::new(NullLog));
        let bad = ConnectSpec::local(Credentials::user_password("admin", "wrong"));
        let (_, code) = engine.connect(&bad);
        assert_eq!(code, codes::AUTH_FAILED);
        let (conn, code) = engine.connect(&local_spec());
        assert!(code.is_ok());
        assert!(engine.disconnect(conn).is_ok());
    }

    #[test]
    fn test_create_open_write_read() {
        let engine = ready_engine();
        let (conn, _) = engine.connect(&local_spec());
        let code = engine.create(conn, "a.img", &CreateParams::sparse(2048), &Continue);
        assert!(code.is_ok());
        let (disk, code) = engine.open(conn, "a.img", 0);
        assert!(code.is_ok());

        let payload = vec![7u8; SECTOR_SIZE as usize];
        assert!(engine.write(disk, 4, 1, &payload).is_ok());

        let mut back = vec![0u8; SECTOR_SIZE as usize];
        assert!(engine.read(disk, 4, 1, &mut back).is_ok());
        assert_eq!(back, payload);

        // Unwritten sectors read as zeros
        assert!(engine.read(disk, 5, 1, &mut back).is_ok());
        assert!(back.iter().all(|b| *b == 0));
    }

    #[test]
    fn test_read_only_connection_rejects_writes() {
        let engine = ready_engine().with_image("ro.img", 1024);
        let (conn, _) = engine.connect_ex(&local_spec(), true, "nbd");
        let (disk, code) = engine.open(conn, "ro.img", 0);
        assert!(code.is_ok());
        let payload = vec![1u8; SECTOR_SIZE as usize];
        assert_eq!(engine.write(disk, 0, 1, &payload), codes::READ_ONLY);
        assert_eq!(engine.get_transport_mode(disk), "nbd");
    }

    #[test]
    fn test_out_of_range_read() {
        let engine = ready_engine().with_image("small.img", 8);
        let (conn, _) = engine.connect(&local_spec());
        let (disk, _) = engine.open(conn, "small.img", 0);
        let mut buf = vec![0u8; SECTOR_SIZE as usize];
        assert_eq!(engine.read(disk, 8, 1, &mut buf), codes::OUT_OF_RANGE);
    }

    #[test]
    fn test_extreme_ranges_report_out_of_range() {
        let engine = ready_engine().with_image("x.img", 8);
        let (conn, _) = engine.connect(&local_spec());
        let (disk, _) = engine.open(conn, "x.img", 0);

        let mut buf = vec![0u8; 2 * SECTOR_SIZE as usize];
        assert_eq!(engine.read(disk, u64::MAX, 2, &mut buf), codes::OUT_OF_RANGE);
        assert_eq!(engine.write(disk, u64::MAX, 2, &buf), codes::OUT_OF_RANGE);

        let (_, count, code) = engine.query_allocated_blocks(disk, u64::MAX, 2, 128);
        assert_eq!(code, codes::OUT_OF_RANGE);
        assert_eq!(count, 0);
        assert_eq!(engine.outstanding_block_lists(), 0);
    }

    #[test]
    fn test_query_allocated_blocks_coalesces_chunks() {
        let engine = ready_engine().with_image("q.img", 4096);
        let (conn, _) = engine.connect(&local_spec());
        let (disk, _) = engine.open(conn, "q.img", 0);

        let payload = vec![9u8; SECTOR_SIZE as usize];
        // Two adjacent chunks (0 and 1) plus a distant one (chunk 8)
        engine.write(disk, 0, 1, &payload);
        engine.write(disk, 130, 1, &payload);
        engine.write(disk, 1024, 1, &payload);

        let (list, count, code) = engine.query_allocated_blocks(disk, 0, 4096, 128);
        assert!(code.is_ok());
        assert_eq!(count, 2);

        let mut blocks = vec![Block::default(); count as usize];
        assert!(engine.copy_block_list(list, &mut blocks).is_ok());
        assert_eq!(blocks[0], Block::new(0, 256));
        assert_eq!(blocks[1], Block::new(1024, 128));
        assert!(engine.free_block_list(list).is_ok());
        assert_eq!(engine.outstanding_block_lists(), 0);
    }

    #[test]
    fn test_preallocated_image_is_fully_allocated() {
        let engine = ready_engine();
        let (conn, _) = engine.connect(&local_spec());
        let params = CreateParams {
            disk_type: DiskType::MonolithicFlat,
            ..CreateParams::sparse(1024)
        };
        assert!(engine.create(conn, "flat.img", &params, &Continue).is_ok());
        let (disk, _) = engine.open(conn, "flat.img", 0);

        let (list, count, code) = engine.query_allocated_blocks(disk, 0, 1024, 128);
        assert!(code.is_ok());
        assert_eq!(count, 1);
        let mut blocks = vec![Block::default(); 1];
        assert!(engine.copy_block_list(list, &mut blocks).is_ok());
        assert_eq!(blocks[0], Block::new(0, 1024));
        assert!(engine.free_block_list(list).is_ok());

        // A sparse clone of a flat source still needs the full capacity
        let (bytes, code) = engine.space_needed_for_clone(disk, DiskType::MonolithicSparse);
        assert!(code.is_ok());
        assert_eq!(bytes, 1024 * SECTOR_SIZE);
    }

    #[test]
    fn test_free_block_list_is_single_shot() {
        let engine = ready_engine().with_image("f.img", 1024);
        let (conn, _) = engine.connect(&local_spec());
        let (disk, _) = engine.open(conn, "f.img", 0);
        let (list, _, code) = engine.query_allocated_blocks(disk, 0, 1024, 128);
        assert!(code.is_ok());
        assert!(engine.free_block_list(list).is_ok());
        assert_eq!(engine.free_block_list(list), codes::INVALID_HANDLE);
    }

    #[test]
    fn test_failed_query_produces_no_list() {
        let engine = ready_engine().with_image("f.img", 1024);
        let (conn, _) = engine.connect(&local_spec());
        let (disk, _) = engine.open(conn, "f.img", 0);
        let (_, _, code) = engine.query_allocated_blocks(disk, 0, 4096, 128);
        assert_eq!(code, codes::OUT_OF_RANGE);
        assert_eq!(engine.outstanding_block_lists(), 0);
    }

    #[test]
    fn test_shrink_reclaims_zeroed_sectors() {
        let engine = ready_engine().with_image("s.img", 1024);
        let (conn, _) = engine.connect(&local_spec());
        let (disk, _) = engine.open(conn, "s.img", 0);

        let ones = vec![1u8; SECTOR_SIZE as usize];
        let zeros = vec![0u8; SECTOR_SIZE as usize];
        engine.write(disk, 0, 1, &ones);
        engine.write(disk, 200, 1, &zeros);

        assert!(engine.shrink(disk, &Continue).is_ok());
        let (_, count, code) = engine.query_allocated_blocks(disk, 0, 1024, 128);
        assert!(code.is_ok());
        assert_eq!(count, 1);
    }

    #[test]
    fn test_metadata_buffer_protocol() {
        let engine = ready_engine().with_image("m.img", 1024);
        let (conn, _) = engine.connect(&local_spec());
        let (disk, _) = engine.open(conn, "m.img", 0);
        engine.write_metadata(disk, "geometry", "255/63");
        engine.write_metadata(disk, "tools", "none");

        let mut required = 0;
        let mut tiny = [0u8; 2];
        let code = engine.get_metadata_keys(disk, &mut tiny, &mut required);
        assert_eq!(code, codes::BUFFER_TOO_SMALL);
        assert!(required > 2);

        let mut buf = vec![0u8; required];
        assert!(engine.get_metadata_keys(disk, &mut buf, &mut required).is_ok());
        let keys: Vec<&[u8]> = buf[..required - 1].split(|b| *b == 0).collect();
        assert_eq!(keys, vec![b"geometry".as_slice(), b"tools".as_slice(), b""]);
    }

    #[test]
    fn test_create_child_inherits_content() {
        let engine = ready_engine().with_image("base.img", 1024);
        let (conn, _) = engine.connect(&local_spec());
        let (base, _) = engine.open(conn, "base.img", 0);
        let payload = vec![3u8; SECTOR_SIZE as usize];
        engine.write(base, 0, 1, &payload);

        let (child, code) =
            engine.create_child(base, "child.img", DiskType::MonolithicSparse, &Continue);
        assert!(code.is_ok());
        let mut back = vec![0u8; SECTOR_SIZE as usize];
        assert!(engine.read(child, 0, 1, &mut back).is_ok());
        assert_eq!(back, payload);

        let (info, code) = engine.get_info(child);
        assert!(code.is_ok());
        assert_eq!(info.parent_path_hint, "base.img");
        assert_eq!(info.num_links, 2);
    }

    #[test]
    fn test_clone_and_rename_and_unlink() {
        let engine = ready_engine().with_image("src.img", 1024);
        let (conn, _) = engine.connect(&local_spec());
        let params = CreateParams::sparse(1024);

        assert!(engine
            .clone_disk(conn, "dst.img", conn, "src.img", &params, false, &Continue)
            .is_ok());
        assert_eq!(
            engine.clone_disk(conn, "dst.img", conn, "src.img", &params, false, &Continue),
            codes::ALREADY_EXISTS
        );
        assert!(engine.rename("dst.img", "moved.img").is_ok());
        assert!(engine.unlink(conn, "moved.img").is_ok());
        assert_eq!(engine.unlink(conn, "moved.img"), codes::NOT_FOUND);
    }

    #[test]
    fn test_grow_rejects_shrinking() {
        let engine = ready_engine().with_image("g.img", 1024);
        let (conn, _) = engine.connect(&local_spec());
        assert_eq!(
            engine.grow(conn, "g.img", 512, true, &Continue),
            codes::INVALID_ARG
        );
        assert!(engine.grow(conn, "g.img", 4096, true, &Continue).is_ok());
    }
}
