//! Domain-specific error types for capture sessions.
//!
//! All fallible operations return `Result<T, CaptureError>`.
//! Terminal outcomes of background tasks are stored and handed to every
//! waiter, so the error type is `Clone`; I/O errors are kept behind an `Arc`.

use std::sync::Arc;

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, CaptureError>;

/// The canonical error type for a capture session.
#[derive(Debug, Clone, Error)]
pub enum CaptureError {
    // ── Lifecycle Errors ─────────────────────────────────────────
    /// A start or stop is already in flight, or the component is running.
    #[error("{component} is already running or busy")]
    AlreadyRunning { component: &'static str },

    // ── Provisioning Errors ──────────────────────────────────────
    /// The capture binary could not be installed or probed.
    #[error("provisioning failed: {0}")]
    Provisioning(String),

    /// A command on the device failed.
    #[error("device command `{command}` failed: {message}")]
    Device { command: String, message: String },

    /// The artifact host could not deliver a file.
    #[error("artifact download failed: {0}")]
    Http(String),

    // ── Protocol Errors ──────────────────────────────────────────
    /// The remote binary broke the control or frame protocol.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    // ── Transport Errors ─────────────────────────────────────────
    /// Dial, read or forward failure.
    #[error("transport error: {0}")]
    Transport(Arc<std::io::Error>),

    /// The reader ran out of reconnection attempts.
    #[error("retry budget exhausted after {retries} retries: {last}")]
    RetryBudgetExhausted {
        retries: u32,
        last: Box<CaptureError>,
    },

    // ── Supervision Errors ───────────────────────────────────────
    /// The remote process exited while no restart was pending.
    #[error("capture process exited")]
    SupervisionTerminated,

    /// Several components failed during shutdown.
    #[error("multiple errors: {}", join(.0))]
    Multiple(Vec<CaptureError>),

    /// Catch-all for errors that do not fit another variant.
    #[error("{0}")]
    Other(String),
}

fn join(errors: &[CaptureError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl CaptureError {
    /// Combine the outcomes of several components without dropping any
    /// failure. All `Ok` yields `Ok`, a single failure is returned as-is.
    pub fn combine(results: impl IntoIterator<Item = Result<()>>) -> Result<()> {
        let mut errors: Vec<CaptureError> = results.into_iter().filter_map(|r| r.err()).collect();
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(CaptureError::Multiple(errors)),
        }
    }

    /// Shorthand for a protocol violation with a formatted message.
    pub fn protocol(msg: impl Into<String>) -> Self {
        CaptureError::ProtocolViolation(msg.into())
    }
}

// ── Convenient From implementations ──────────────────────────────

impl From<std::io::Error> for CaptureError {
    fn from(e: std::io::Error) -> Self {
        CaptureError::Transport(Arc::new(e))
    }
}

impl From<serde_json::Error> for CaptureError {
    fn from(e: serde_json::Error) -> Self {
        CaptureError::Provisioning(format!("invalid device info: {e}"))
    }
}

impl From<reqwest::Error> for CaptureError {
    fn from(e: reqwest::Error) -> Self {
        CaptureError::Http(e.to_string())
    }
}

impl From<String> for CaptureError {
    fn from(s: String) -> Self {
        CaptureError::Other(s)
    }
}

impl From<&str> for CaptureError {
    fn from(s: &str) -> Self {
        CaptureError::Other(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let e = CaptureError::AlreadyRunning {
            component: "supervisor",
        };
        assert!(e.to_string().contains("supervisor"));

        let e = CaptureError::RetryBudgetExhausted {
            retries: 10,
            last: Box::new(CaptureError::protocol("bad jpeg")),
        };
        assert!(e.to_string().contains("10"));
        assert!(e.to_string().contains("bad jpeg"));
    }

    #[test]
    fn from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe broke");
        let e: CaptureError = io_err.into();
        assert!(matches!(e, CaptureError::Transport(_)));
        // Terminal outcomes are shared between waiters.
        let copy = e.clone();
        assert_eq!(copy.to_string(), e.to_string());
    }

    #[test]
    fn combine_keeps_every_failure() {
        assert!(CaptureError::combine([Ok(()), Ok(())]).is_ok());

        let one = CaptureError::combine([Ok(()), Err(CaptureError::SupervisionTerminated)]);
        assert!(matches!(one, Err(CaptureError::SupervisionTerminated)));

        let both = CaptureError::combine([
            Err(CaptureError::SupervisionTerminated),
            Err("reader broke".into()),
        ]);
        match both {
            Err(CaptureError::Multiple(errors)) => {
                assert_eq!(errors.len(), 2);
                let text = CaptureError::Multiple(errors).to_string();
                assert!(text.contains("capture process exited"));
                assert!(text.contains("reader broke"));
            }
            other => panic!("expected Multiple, got {other:?}"),
        }
    }
}
