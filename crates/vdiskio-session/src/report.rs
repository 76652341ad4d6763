//! Progress and logging strategy objects
//!
//! Long-running engine operations call back into the embedding layer
//! through two narrow seams: a progress acknowledgment hook and a
//! warning sink. Both are injectable; the defaults acknowledge every
//! progress report and forward warnings to `tracing`.

use std::fmt::{self, Write as _};
use std::sync::Arc;
use tracing::warn;
use vdiskio_engine::{EngineLog, ProgressSink};

/// Upper bound, in bytes, on a rendered engine log message
pub const MAX_LOG_MESSAGE: usize = 1024;

/// Marker appended to a message cut at [`MAX_LOG_MESSAGE`]
const TRUNCATION_MARK: &str = "...";

/// Progress sink that acknowledges every report and never cancels
pub struct ContinueAlways;

impl ProgressSink for ContinueAlways {
    fn progress(&self, _percent_done: i32) -> bool {
        true
    }
}

/// Destination for rendered engine warnings
pub trait LogSink: Send + Sync {
    fn warn(&self, message: &str);
}

/// Default sink: forwards rendered warnings to `tracing::warn!`
pub struct TracingLogSink;

impl LogSink for TracingLogSink {
    fn warn(&self, message: &str) {
        warn!(target: "vdiskio::engine", "{message}");
    }
}

/// Adapter handed to the engine at init: renders incoming arguments into
/// a bounded plain string, then forwards to the configured [`LogSink`].
pub(crate) struct LogBridge {
    sink: Arc<dyn LogSink>,
}

impl LogBridge {
    pub(crate) fn new(sink: Arc<dyn LogSink>) -> Self {
        Self { sink }
    }
}

impl EngineLog for LogBridge {
    fn warn(&self, args: fmt::Arguments<'_>) {
        self.sink.warn(&render_bounded(args));
    }
}

/// Render format arguments into a string no longer than
/// [`MAX_LOG_MESSAGE`] bytes, marking truncation when the message did
/// not fit.
pub fn render_bounded(args: fmt::Arguments<'_>) -> String {
    struct Bounded {
        buf: String,
        truncated: bool,
    }

    impl fmt::Write for Bounded {
        fn write_str(&mut self, s: &str) -> fmt::Result {
            if self.truncated {
                return Ok(());
            }
            let limit = MAX_LOG_MESSAGE - TRUNCATION_MARK.len();
            let remaining = limit - self.buf.len();
            if s.len() <= remaining {
                self.buf.push_str(s);
            } else {
                let mut cut = remaining;
                while !s.is_char_boundary(cut) {
                    cut -= 1;
                }
                self.buf.push_str(&s[..cut]);
                self.truncated = true;
            }
            Ok(())
        }
    }

    let mut out = Bounded {
        buf: String::new(),
        truncated: false,
    };
    // Writing to a String cannot fail.
    let _ = out.write_fmt(args);
    if out.truncated {
        out.buf.push_str(TRUNCATION_MARK);
    }
    out.buf
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_continue_always() {
        assert!(ContinueAlways.progress(0));
        assert!(ContinueAlways.progress(100));
    }

    #[test]
    fn test_short_message_untouched() {
        let rendered = render_bounded(format_args!("disk {} is degraded", 3));
        assert_eq!(rendered, "disk 3 is degraded");
    }

    #[test]
    fn test_long_message_truncated_at_limit() {
        let long = "x".repeat(MAX_LOG_MESSAGE * 2);
        let rendered = render_bounded(format_args!("{long}"));
        assert_eq!(rendered.len(), MAX_LOG_MESSAGE);
        assert!(rendered.ends_with("..."));
    }

    #[test]
    fn test_truncation_respects_char_boundaries() {
        let long = "é".repeat(MAX_LOG_MESSAGE);
        let rendered = render_bounded(format_args!("{long}"));
        assert!(rendered.len() <= MAX_LOG_MESSAGE);
        assert!(rendered.ends_with("..."));
    }

    #[test]
    fn test_bridge_renders_before_forwarding() {
        struct Capture(Mutex<Vec<String>>);
        impl LogSink for Capture {
            fn warn(&self, message: &str) {
                self.0.lock().unwrap().push(message.to_string());
            }
        }

        let sink = Arc::new(Capture(Mutex::new(Vec::new())));
        let bridge = LogBridge::new(sink.clone());
        bridge.warn(format_args!("session {} reclaimed", 7));
        assert_eq!(
            sink.0.lock().unwrap().as_slice(),
            ["session 7 reclaimed".to_string()]
        );
    }
}
