// THEORY:
// Frame collaborators for the runner. Each one fills a pooled `FrameBuffer`
// per call: `ImageDirectory` with the encoded bytes of the next file (the
// tracker decodes them), `Camera` with packed RGB converted from OpenCV's BGR.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use colour_tracking::{CaptureError, CaptureResult, CaptureStatus, FrameBuffer, FrameCapture, FrameFormat};

const IMAGE_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];

/// Replays the images in a directory, in file-name order.
pub struct ImageDirectory {
    files: Vec<PathBuf>,
    next: usize,
    repeat: bool,
    interval: Option<Duration>,
    next_due: Option<Instant>,
}

impl ImageDirectory {
    pub fn open(dir: &Path) -> std::io::Result<Self> {
        let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|entry| entry.path()))
            .filter(|path| {
                path.extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
            })
            .collect();
        files.sort();

        Ok(Self {
            files,
            next: 0,
            repeat: false,
            interval: None,
            next_due: None,
        })
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Loop back to the first image after the last one.
    pub fn repeat(mut self, repeat: bool) -> Self {
        self.repeat = repeat;
        self
    }

    /// Deliver at most one frame per `interval`.
    pub fn pace_every(mut self, interval: Option<Duration>) -> Self {
        self.interval = interval.filter(|interval| !interval.is_zero());
        self
    }

    fn pace(&mut self) {
        let Some(interval) = self.interval else {
            return;
        };
        let now = Instant::now();
        if let Some(due) = self.next_due {
            if due > now {
                std::thread::sleep(due - now);
            }
        }
        self.next_due = Some(self.next_due.map_or(now, |due| due.max(now)) + interval);
    }
}

impl FrameCapture for ImageDirectory {
    fn capture(&mut self, frame: &mut FrameBuffer) -> CaptureResult {
        if self.next == self.files.len() {
            if !self.repeat || self.files.is_empty() {
                return Ok(CaptureStatus::Exhausted);
            }
            self.next = 0;
        }
        self.pace();

        let path = &self.files[self.next];
        self.next += 1;

        frame.raw.clear();
        File::open(path)?.read_to_end(&mut frame.raw)?;
        frame.format = FrameFormat::Encoded;
        if frame.raw.is_empty() {
            return Err(CaptureError::Device(format!("{} is empty", path.display())));
        }
        Ok(CaptureStatus::Captured)
    }
}

#[cfg(feature = "camera")]
pub use camera::Camera;

#[cfg(feature = "camera")]
mod camera {
    use colour_tracking::{CaptureError, CaptureResult, CaptureStatus, FrameBuffer, FrameCapture, FrameFormat};
    use opencv::{
        core::Mat,
        imgproc,
        prelude::*,
        videoio::{self, VideoCapture},
    };

    fn device_error(error: opencv::Error) -> CaptureError {
        CaptureError::Device(error.to_string())
    }

    /// A live OpenCV camera delivering packed RGB frames.
    pub struct Camera {
        capture: VideoCapture,
        bgr: Mat,
        rgb: Mat,
    }

    impl Camera {
        pub fn open(index: i32) -> Result<Self, CaptureError> {
            let capture = VideoCapture::new(index, videoio::CAP_ANY).map_err(device_error)?;
            if !capture.is_opened().map_err(device_error)? {
                return Err(CaptureError::Device(format!("camera {index} could not be opened")));
            }
            Ok(Self {
                capture,
                bgr: Mat::default(),
                rgb: Mat::default(),
            })
        }
    }

    impl FrameCapture for Camera {
        fn capture(&mut self, frame: &mut FrameBuffer) -> CaptureResult {
            if !self.capture.read(&mut self.bgr).map_err(device_error)? || self.bgr.empty() {
                return Err(CaptureError::Device("camera returned no frame".into()));
            }
            imgproc::cvt_color(&self.bgr, &mut self.rgb, imgproc::COLOR_BGR2RGB, 0).map_err(device_error)?;

            let width = self.rgb.cols() as u32;
            let height = self.rgb.rows() as u32;
            let bytes = self.rgb.data_bytes().map_err(device_error)?;
            frame.fill(bytes, FrameFormat::Rgb8 { width, height });
            Ok(CaptureStatus::Captured)
        }
    }
}
