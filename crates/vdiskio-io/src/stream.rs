//! `std::io` adapter over [`DiskAccess`]
//!
//! Wraps a disk in a seekable byte stream so generic `Read`/`Write`
//! consumers (archivers, hashers, copy loops) work against it directly.
//! The engine's out-of-range code maps to end-of-file here and only
//! here; everywhere else engine codes stay opaque.

use crate::access::DiskAccess;
use std::io::{self, Read, Seek, SeekFrom, Write};
use vdiskio_engine::{Error, codes};

/// Seekable byte stream over an open disk
pub struct DiskStream {
    access: DiskAccess,
    pos: u64,
}

impl DiskStream {
    /// Wrap an open disk, positioned at byte zero
    #[must_use]
    pub fn new(access: DiskAccess) -> Self {
        Self { access, pos: 0 }
    }

    /// Current byte position
    #[must_use]
    pub fn position(&self) -> u64 {
        self.pos
    }

    /// Unwrap back into the underlying [`DiskAccess`]
    #[must_use]
    pub fn into_inner(self) -> DiskAccess {
        self.access
    }
}

fn to_io(err: Error) -> io::Error {
    if err.code() == Some(codes::OUT_OF_RANGE) {
        io::Error::new(io::ErrorKind::UnexpectedEof, err)
    } else {
        io::Error::other(err)
    }
}

impl Read for DiskStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.access.read_at(self.pos, buf).map_err(to_io)?;
        self.pos += n as u64;
        Ok(n)
    }
}

impl Write for DiskStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.access.write_at(self.pos, buf).map_err(to_io)?;
        self.pos += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        // Writes reach the engine synchronously; nothing is buffered here.
        Ok(())
    }
}

impl Seek for DiskStream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::Current(delta) => self.pos.checked_add_signed(delta),
            SeekFrom::End(delta) => self.access.capacity_bytes().checked_add_signed(delta),
        };
        match target {
            Some(offset) => {
                self.pos = offset;
                Ok(offset)
            }
            None => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek to a negative or overflowing position",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::{OpenRequest, open_disk};
    use std::sync::Arc;
    use vdiskio_engine::{ConnectSpec, Credentials, InitSpec, MemoryEngine, SECTOR_SIZE};
    use vdiskio_session::Library;

    fn stream(capacity_sectors: u64) -> DiskStream {
        let engine = Arc::new(MemoryEngine::new().with_image("vm.img", capacity_sectors));
        let library = Library::init(engine, &InitSpec::default()).expect("init");
        let spec = ConnectSpec::local(Credentials::user_password("admin", "secret"));
        let request = OpenRequest::new("vm.img", "stream-test");
        DiskStream::new(open_disk(&library, &spec, &request).expect("open"))
    }

    #[test]
    fn test_write_seek_read() {
        let mut s = stream(16);
        s.write_all(b"boot sector magic").expect("write");
        s.seek(SeekFrom::Start(0)).expect("rewind");

        let mut back = [0u8; 17];
        s.read_exact(&mut back).expect("read");
        assert_eq!(&back, b"boot sector magic");
        assert_eq!(s.position(), 17);
    }

    #[test]
    fn test_read_to_end_stops_at_capacity() {
        let mut s = stream(2);
        let mut all = Vec::new();
        let n = s.read_to_end(&mut all).expect("read to end");
        assert_eq!(n, 2 * SECTOR_SIZE as usize);
        assert_eq!(s.position(), 2 * SECTOR_SIZE);
    }

    #[test]
    fn test_seek_from_end() {
        let mut s = stream(4);
        let pos = s.seek(SeekFrom::End(-(SECTOR_SIZE as i64))).expect("seek");
        assert_eq!(pos, 3 * SECTOR_SIZE);

        let mut rest = Vec::new();
        s.read_to_end(&mut rest).expect("read tail");
        assert_eq!(rest.len(), SECTOR_SIZE as usize);
    }

    #[test]
    fn test_seek_before_start_rejected() {
        let mut s = stream(4);
        assert!(s.seek(SeekFrom::Current(-1)).is_err());
    }

    #[test]
    fn test_write_past_end_maps_to_eof() {
        let mut s = stream(2);
        s.seek(SeekFrom::End(0)).expect("seek to end");
        let err = s.write(&[0u8; 512]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_write_at_extreme_offset_is_an_error_not_a_crash() {
        let mut s = stream(2);
        s.seek(SeekFrom::Start(u64::MAX - 100)).expect("seek");
        let err = s.write(&[0u8; 512]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_relative_seeks_track_position() {
        let mut s = stream(8);
        s.seek(SeekFrom::Start(1000)).expect("seek");
        s.seek(SeekFrom::Current(24)).expect("seek");
        assert_eq!(s.position(), 1024);
    }
}
