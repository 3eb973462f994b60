//! Error kinds for each boundary of the pipeline.
//!
//! Only [`ConfigError`] is fatal, and only at startup. Capture and transport
//! errors are per-tick results: the driver degrades (holds colors, clears the
//! frame, reconnects later) instead of stopping.

use std::path::PathBuf;
use thiserror::Error;

/// The configuration could not be loaded or does not describe a usable setup.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed config: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Failure to obtain a captured frame for a display.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    /// No device or session right now; skip this tick.
    #[error("capture unavailable: {0}")]
    Unavailable(String),
    /// The capture device was invalidated; all capture resources must be rebuilt.
    #[error("capture lost: {0}")]
    Lost(String),
}

/// Failure to open or write a transport.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("transport is not open")]
    NotOpen,
    #[error("no device answered on {0:?}")]
    DeviceNotFound(Vec<PathBuf>),
    #[error("failed to resolve {0}")]
    Resolve(String),
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}
