// THEORY:
// The display branch is optional and best effort. Tracking workers offer each
// processed frame to a depth-1 display queue and never wait on it. A single
// display worker pops whatever is there, hands it to a `DisplaySink`, and drops
// the frame, which returns the buffer to the pool.
//
// There is no preview window here. `SnapshotSink` keeps the latest annotated
// frame (and, if asked, the cleaned mask the tracker worked from) on disk.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_circle_mut, draw_line_segment_mut};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::core_modules::frame_buffer::{Contour, FrameBuffer};

const CONTOUR_COLOUR: Rgb<u8> = Rgb([255, 0, 0]);
const BEST_CONTOUR_COLOUR: Rgb<u8> = Rgb([0, 0, 255]);
const MARKER_COLOUR: Rgb<u8> = Rgb([0, 255, 0]);
const MARKER_RADIUS: i32 = 20;

/// Consumer of tracked frames on the display stage.
pub trait DisplaySink: Send + Sync {
    fn show(&self, frame: &FrameBuffer);
}

fn draw_contour(canvas: &mut RgbImage, contour: &Contour, colour: Rgb<u8>) {
    match contour.points.as_slice() {
        [] => {}
        [only] => {
            if only.x < canvas.width() && only.y < canvas.height() {
                canvas.put_pixel(only.x, only.y, colour);
            }
        }
        points => {
            let closing = [points[points.len() - 1], points[0]];
            for pair in points.windows(2).chain(std::iter::once(&closing[..])) {
                draw_line_segment_mut(
                    canvas,
                    (pair[0].x as f32, pair[0].y as f32),
                    (pair[1].x as f32, pair[1].y as f32),
                    colour,
                );
            }
        }
    }
}

/// Copy of the decoded frame with contours and the tracked centre drawn on.
///
/// Returns `None` if the tracker never decoded the frame.
pub fn annotate(frame: &FrameBuffer) -> Option<RgbImage> {
    let mut canvas = frame.image.clone()?;

    for (i, contour) in frame.contours.iter().enumerate() {
        if Some(i) != frame.best_contour {
            draw_contour(&mut canvas, contour, CONTOUR_COLOUR);
        }
    }
    if let Some(best) = frame.best_contour() {
        draw_contour(&mut canvas, best, BEST_CONTOUR_COLOUR);
    }
    if let Some(location) = frame.location {
        draw_hollow_circle_mut(&mut canvas, (location.x, location.y), MARKER_RADIUS, MARKER_COLOUR);
    }

    Some(canvas)
}

/// Writes the latest annotated frame to a PNG, at most once per interval.
#[derive(Debug)]
pub struct SnapshotSink {
    path: PathBuf,
    mask_path: Option<PathBuf>,
    interval: Duration,
    state: Mutex<SnapshotState>,
}

#[derive(Debug, Default)]
struct SnapshotState {
    last_written: Option<Instant>,
    written: u64,
}

impl SnapshotSink {
    pub fn new(path: impl Into<PathBuf>, interval: Duration) -> Self {
        Self {
            path: path.into(),
            mask_path: None,
            interval,
            state: Mutex::new(SnapshotState::default()),
        }
    }

    /// Also write the tracker's cleaned mask to `path` with every snapshot.
    pub fn with_mask(mut self, path: impl Into<PathBuf>) -> Self {
        self.mask_path = Some(path.into());
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mask_path(&self) -> Option<&Path> {
        self.mask_path.as_deref()
    }

    fn save_mask(&self, frame: &FrameBuffer) {
        let (Some(path), Some(mask)) = (&self.mask_path, &frame.mask) else {
            return;
        };
        if let Err(error) = mask.save(path) {
            warn!(path = %path.display(), %error, "failed to write mask snapshot");
        }
    }

    pub fn written(&self) -> u64 {
        self.state.lock().written
    }
}

impl DisplaySink for SnapshotSink {
    fn show(&self, frame: &FrameBuffer) {
        let mut state = self.state.lock();
        if state
            .last_written
            .is_some_and(|last| last.elapsed() < self.interval)
        {
            return;
        }
        let Some(canvas) = annotate(frame) else {
            return;
        };

        match canvas.save(&self.path) {
            Ok(()) => {
                state.last_written = Some(Instant::now());
                state.written += 1;
                self.save_mask(frame);
                debug!(path = %self.path.display(), sequence = frame.sequence, "snapshot written");
            }
            Err(error) => {
                warn!(path = %self.path.display(), %error, "failed to write snapshot");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::frame_buffer::{Location, Point};

    fn frame_with_square() -> FrameBuffer {
        let mut frame = FrameBuffer::new(0);
        frame.image = Some(RgbImage::new(100, 100));
        let square = |left: u32, top: u32| Contour {
            points: vec![
                Point::new(left, top),
                Point::new(left + 9, top),
                Point::new(left + 9, top + 9),
                Point::new(left, top + 9),
            ],
            enclosed_area: 100,
        };
        frame.contours = vec![square(5, 5), square(50, 50)];
        frame.best_contour = Some(1);
        frame.location = Some(Location { x: 55, y: 55 });
        frame
    }

    #[test]
    fn nothing_to_draw_without_an_image() {
        assert!(annotate(&FrameBuffer::new(0)).is_none());
    }

    #[test]
    fn contours_and_marker_are_drawn() {
        let canvas = annotate(&frame_with_square()).unwrap();
        assert_eq!(*canvas.get_pixel(5, 5), CONTOUR_COLOUR);
        assert_eq!(*canvas.get_pixel(14, 9), CONTOUR_COLOUR);
        assert_eq!(*canvas.get_pixel(50, 50), BEST_CONTOUR_COLOUR);
        assert_eq!(*canvas.get_pixel(55, 35), MARKER_COLOUR);
        assert_eq!(*canvas.get_pixel(30, 30), Rgb([0, 0, 0]));
    }

    #[test]
    fn snapshots_are_rate_limited() {
        let path = std::env::temp_dir().join(format!("colour-tracking-{}.png", std::process::id()));
        let sink = SnapshotSink::new(&path, Duration::from_secs(60));
        let frame = frame_with_square();

        sink.show(&frame);
        sink.show(&frame);
        assert_eq!(sink.written(), 1);

        let saved = image::open(sink.path()).unwrap().to_rgb8();
        assert_eq!(saved.dimensions(), (100, 100));
        assert_eq!(*saved.get_pixel(50, 50), BEST_CONTOUR_COLOUR);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn mask_is_written_next_to_the_snapshot() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("colour-tracking-frame-{}.png", std::process::id()));
        let mask_path = dir.join(format!("colour-tracking-mask-{}.png", std::process::id()));
        let sink = SnapshotSink::new(&path, Duration::ZERO).with_mask(&mask_path);

        let mut frame = frame_with_square();
        let mut mask = image::GrayImage::new(100, 100);
        mask.put_pixel(55, 55, image::Luma([255]));
        frame.mask = Some(mask);
        sink.show(&frame);

        let saved = image::open(&mask_path).unwrap().to_luma8();
        assert_eq!(saved.get_pixel(55, 55)[0], 255);
        assert_eq!(saved.get_pixel(0, 0)[0], 0);
        let _ = std::fs::remove_file(&path);
        let _ = std::fs::remove_file(&mask_path);
    }
}
