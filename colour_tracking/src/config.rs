// THEORY:
// Session and tracker configuration, loadable from TOML. Every field has a
// default, so an empty file (or no file at all) is a valid config. Validation
// happens once, on load and again when a session starts, so a bad value fails
// before any thread is spawned.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core_modules::colour_tracker::{MomentSource, TrackerConfig};
use crate::core_modules::hsv_range::HsvRange;
use crate::core_modules::mask;
use crate::display::{DisplaySink, SnapshotSink};
use crate::error::{Result, TrackingError};
use crate::frame_source::ACQUIRE_TIMEOUT;

/// Top-level configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    pub session: SessionConfig,
    pub tracker: TrackerSettings,
}

/// Threads, buffers and the display branch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Tracking threads (None = one per CPU)
    pub workers: Option<usize>,
    /// Frame buffers (None = two per tracking thread)
    pub pool_size: Option<usize>,
    /// How long the frame source waits for a free buffer before re-checking for stop
    pub acquire_timeout_ms: u64,
    /// Run the display stage, writing snapshots to `snapshot_path`
    pub display: bool,
    /// Display queue depth; updates beyond it are dropped
    pub display_queue_depth: usize,
    pub snapshot_path: PathBuf,
    /// Also write the cleaned mask here with every snapshot
    pub mask_snapshot_path: Option<PathBuf>,
    /// Minimum time between snapshot writes
    pub snapshot_interval_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            workers: None,
            pool_size: None,
            acquire_timeout_ms: ACQUIRE_TIMEOUT.as_millis() as u64,
            display: false,
            display_queue_depth: 1,
            snapshot_path: PathBuf::from("tracking.png"),
            mask_snapshot_path: None,
            snapshot_interval_ms: 1000,
        }
    }
}

impl SessionConfig {
    pub fn worker_count(&self) -> usize {
        self.workers.unwrap_or_else(num_cpus::get)
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size.unwrap_or(2 * self.worker_count())
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    pub fn snapshot_interval(&self) -> Duration {
        Duration::from_millis(self.snapshot_interval_ms)
    }

    /// The display sink this config asks for, if any.
    pub fn display_sink(&self) -> Option<Arc<dyn DisplaySink>> {
        if !self.display {
            return None;
        }
        let mut sink = SnapshotSink::new(&self.snapshot_path, self.snapshot_interval());
        if let Some(mask_path) = &self.mask_snapshot_path {
            sink = sink.with_mask(mask_path);
        }
        Some(Arc::new(sink))
    }
}

/// Colour range and analysis options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerSettings {
    /// Named range, see [`HsvRange::preset`]
    pub preset: Option<String>,
    /// Explicit range; wins over `preset`
    pub hsv: Option<HsvRange>,
    pub moments: MomentSource,
    pub erode_iterations: u8,
    pub dilate_iterations: u8,
    /// Treat frames with more contours than this as noise (None = no limit)
    pub max_contours: Option<usize>,
    /// Live tuning enabled; the final range is logged on close
    pub tune: bool,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            preset: None,
            hsv: None,
            moments: MomentSource::Contour,
            erode_iterations: mask::ERODE_ITERATIONS,
            dilate_iterations: mask::DILATE_ITERATIONS,
            max_contours: None,
            tune: false,
        }
    }
}

impl TrackerSettings {
    /// The configured range: explicit `hsv`, else `preset`, else everything.
    pub fn range(&self) -> Result<HsvRange> {
        if let Some(range) = self.hsv {
            return Ok(range);
        }
        match &self.preset {
            Some(name) => HsvRange::preset(name).ok_or_else(|| {
                TrackingError::Config(format!(
                    "unknown preset '{name}', expected one of: {}",
                    HsvRange::preset_names().join(", ")
                ))
            }),
            None => Ok(HsvRange::ALL),
        }
    }

    pub fn resolve(&self, show_images: bool) -> Result<TrackerConfig> {
        Ok(TrackerConfig {
            range: self.range()?,
            moments: self.moments,
            erode_iterations: self.erode_iterations,
            dilate_iterations: self.dilate_iterations,
            max_contours: self.max_contours,
            show_images,
        })
    }
}

impl TrackingConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.session.workers == Some(0) {
            return Err(TrackingError::Config("workers must be at least 1".into()));
        }
        if self.session.pool_size == Some(0) {
            return Err(TrackingError::Config("pool_size must be at least 1".into()));
        }
        if self.session.display_queue_depth == 0 {
            return Err(TrackingError::Config(
                "display_queue_depth must be at least 1".into(),
            ));
        }
        let range = self.tracker.range()?;
        if (0..3).any(|i| range.min[i] > range.max[i]) {
            return Err(TrackingError::Config(format!(
                "HSV range is empty: {range}"
            )));
        }
        Ok(())
    }
}
