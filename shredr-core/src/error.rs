//! Error types shared by every `shredr-core` operation.
//!
//! Only synchronous failures live here. Once a job is running, its outcome
//! (success, non-zero exit, stall) is reported through
//! [`crate::poller::JobState`], never through an error.
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Primary error type for the core library.
#[derive(Debug, Error)]
pub enum Error {
    /// The erase request was rejected before anything was spawned.
    #[error("invalid erase target '{}': {reason}", .path.display())]
    Validation {
        /// Target path named in the request.
        path: PathBuf,
        /// Human-readable reason for the rejection.
        reason: &'static str,
    },
    /// A job is already running; concurrent launches are rejected.
    #[error("an erase job is already running")]
    AlreadyRunning,
    /// The erase utility could not be located or started.
    #[error("failed to start '{program}'")]
    Spawn {
        /// Name or path of the erase utility.
        program: String,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },
    /// The device-property service failed or returned something unusable.
    #[error("device query failed for '{device}': {detail}")]
    DeviceQuery {
        /// Device identifier, or `*` for enumeration failures.
        device: String,
        /// Description of what went wrong.
        detail: String,
    },
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn device_query(device: impl Into<String>, detail: impl ToString) -> Self {
        Self::DeviceQuery {
            device: device.into(),
            detail: detail.to_string(),
        }
    }
}
