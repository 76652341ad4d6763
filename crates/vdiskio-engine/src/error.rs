//! Error types for vdiskio
//!
//! The engine reports failures as numeric status codes; this module
//! defines the code newtype, the engine-defined code constants, and the
//! error type the marshalling layer surfaces to callers.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Common result type for vdiskio operations
pub type Result<T> = std::result::Result<T, Error>;

/// Raw status word returned by every engine operation.
///
/// Zero is success; any non-zero value is an engine-defined failure code.
/// The marshalling layer never interprets non-zero codes, it only
/// propagates them.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ErrorCode(u64);

impl ErrorCode {
    /// The success sentinel
    pub const OK: Self = Self(0);

    /// Wrap a raw engine code
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the raw code value
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Check whether the code denotes success
    #[must_use]
    pub const fn is_ok(self) -> bool {
        self.0 == 0
    }

    /// Check whether the code denotes failure
    #[must_use]
    pub const fn is_err(self) -> bool {
        self.0 != 0
    }
}

impl fmt::Debug for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ErrorCode({})", self.0)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Codes published by the bundled engines.
///
/// These play the role a native engine header would: well-known values an
/// embedder may compare against. The marshalling layer itself treats all
/// of them as opaque.
pub mod codes {
    use super::ErrorCode;

    /// Success
    pub const OK: ErrorCode = ErrorCode::new(0);
    /// Unclassified engine failure
    pub const GENERIC: ErrorCode = ErrorCode::new(1);
    /// Operation attempted before library initialization
    pub const NOT_INITIALIZED: ErrorCode = ErrorCode::new(2);
    /// A parameter was rejected by the engine
    pub const INVALID_ARG: ErrorCode = ErrorCode::new(3);
    /// A handle value did not name a live resource
    pub const INVALID_HANDLE: ErrorCode = ErrorCode::new(4);
    /// Credentials were rejected
    pub const AUTH_FAILED: ErrorCode = ErrorCode::new(5);
    /// No disk image at the given path
    pub const NOT_FOUND: ErrorCode = ErrorCode::new(6);
    /// A disk image already exists at the given path
    pub const ALREADY_EXISTS: ErrorCode = ErrorCode::new(7);
    /// Write attempted through a read-only connection or handle
    pub const READ_ONLY: ErrorCode = ErrorCode::new(8);
    /// Sector range falls outside the disk capacity
    pub const OUT_OF_RANGE: ErrorCode = ErrorCode::new(9);
    /// Caller-supplied buffer is too small; the required length was
    /// written to the out-parameter
    pub const BUFFER_TOO_SMALL: ErrorCode = ErrorCode::new(10);
}

/// Error type surfaced by the marshalling layer
#[derive(Debug, Error)]
pub enum Error {
    /// An engine call returned a non-zero code. The code is carried
    /// unchanged; `op` names the operation that failed.
    #[error("{op} failed: engine error code {code}")]
    Engine {
        /// Operation that reported the code
        op: &'static str,
        /// The engine's code, unmodified
        code: ErrorCode,
    },

    /// A block-list copy destination cannot hold the descriptor's blocks
    #[error("block buffer holds {capacity} entries, block list has {needed}")]
    InsufficientCapacity { capacity: usize, needed: usize },

    /// Reading an init configuration file failed
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// An init configuration file did not parse
    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),
}

impl Error {
    /// Wrap an engine code for the named operation
    #[must_use]
    pub const fn engine(op: &'static str, code: ErrorCode) -> Self {
        Self::Engine { op, code }
    }

    /// The engine code behind this error, if it came from the engine
    #[must_use]
    pub const fn code(&self) -> Option<ErrorCode> {
        match self {
            Self::Engine { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// Convert a raw code into a `Result`, naming the operation on failure
pub fn check(op: &'static str, code: ErrorCode) -> Result<()> {
    if code.is_ok() {
        Ok(())
    } else {
        Err(Error::engine(op, code))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_sentinel() {
        assert!(ErrorCode::OK.is_ok());
        assert!(!ErrorCode::OK.is_err());
        assert!(codes::NOT_FOUND.is_err());
        assert_eq!(codes::NOT_FOUND.raw(), 6);
    }

    #[test]
    fn test_check_propagates_code_unchanged() {
        assert!(check("open", codes::OK).is_ok());
        let err = check("open", ErrorCode::new(0xdead)).unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::new(0xdead)));
        assert!(err.to_string().contains("open failed"));
    }

    #[test]
    fn test_capacity_error_has_no_code() {
        let err = Error::InsufficientCapacity {
            capacity: 1,
            needed: 4,
        };
        assert_eq!(err.code(), None);
    }
}
