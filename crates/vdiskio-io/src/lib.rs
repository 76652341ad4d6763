//! vdiskio IO Adapter
//!
//! Caller-side conveniences over the vdiskio session layer: one-call
//! session bring-up with failure unwinding, byte-addressed positioned
//! io with partial-sector read-modify-write, and a `std::io` stream
//! adapter.

pub mod access;
pub mod stream;

pub use access::{DiskAccess, OpenRequest, open_disk};
pub use stream::DiskStream;
