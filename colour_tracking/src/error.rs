use std::io;

use thiserror::Error;

/// Failures reported by a camera collaborator for a single capture attempt.
///
/// A capture error never stops the frame source by itself; it is counted and
/// the last one is surfaced when the source is closed.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("capture I/O failed: {0}")]
    Io(#[from] io::Error),

    #[error("camera device error: {0}")]
    Device(String),
}

/// Errors produced by the tracking pipeline and its configuration layer.
#[derive(Debug, Error)]
pub enum TrackingError {
    #[error("failed to decode frame: {0}")]
    Decode(#[from] image::ImageError),

    #[error("frame of {len} bytes does not hold a {width}x{height} RGB image")]
    FrameLayout { len: usize, width: u32, height: u32 },

    #[error("capture failed {failures} time(s), last error: {last}")]
    Capture { failures: u64, last: CaptureError },

    #[error("failed to spawn thread '{name}': {source}")]
    Spawn {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("thread '{0}' panicked")]
    ThreadPanicked(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to parse configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, TrackingError>;
