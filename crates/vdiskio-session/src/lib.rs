//! vdiskio Session Layer
//!
//! The marshalling layer between an embedding application and an
//! external virtual-disk engine: library initialization, sessions and
//! disk handles with exactly-once release, the two-phase allocated-block
//! transfer protocol, and the progress/logging strategy seams.
//!
//! The layer forwards operations 1:1, propagates engine status codes
//! without interpreting them, and never retries.

pub mod blocklist;
pub mod report;
pub mod session;
pub mod thumbprint;

pub use blocklist::BlockListDescriptor;
pub use report::{ContinueAlways, LogSink, MAX_LOG_MESSAGE, TracingLogSink, render_bounded};
pub use session::{CleanupStats, Connection, Disk, Library};
pub use thumbprint::thumbprint;
