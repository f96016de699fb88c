// THEORY:
// A `FrameBuffer` is the unit of work that travels through the pipeline. It is
// allocated once when the pool is built and then recycled for the lifetime of
// the process: the source writes raw bytes into it, a tracking worker fills in
// the derived fields, an optional display worker reads them, and the pool wipes
// everything again before the next capture.
//
// Key principles:
// 1.  **Single owner**: a buffer is moved, never shared. Whoever holds it may
//     mutate it; the queue hand-off is the synchronisation point.
// 2.  **Allocation reuse**: `reset` clears contents but keeps the capacity of
//     `raw` and `contours`, so steady-state capture does not allocate.
// 3.  **Dumb container**: the buffer knows nothing about tracking. It only
//     stores what the tracker and the source put into it.

use std::time::Instant;

use image::{GrayImage, RgbImage};

/// A pixel coordinate, origin at the top-left of the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Point {
    pub x: u32,
    pub y: u32,
}

impl Point {
    pub fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }
}

/// The outer boundary of one connected region of the mask.
#[derive(Debug, Clone, PartialEq)]
pub struct Contour {
    /// Boundary pixels in tracing order.
    pub points: Vec<Point>,
    /// Pixels enclosed by the boundary, holes included.
    pub enclosed_area: u64,
}

/// Centre of the tracked object in pixel coordinates (top-left origin).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location {
    pub x: i32,
    pub y: i32,
}

/// Position of the tracked object relative to the image centre, y pointing up.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Track {
    pub x: i32,
    pub y: i32,
    /// Pixel area of the selected blob.
    pub area: f64,
}

impl Track {
    /// The "object not found" triple handed to the motion controller.
    pub const LOST: Track = Track {
        x: 0,
        y: 0,
        area: 0.0,
    };

    pub fn new(x: i32, y: i32, area: f64) -> Self {
        Self { x, y, area }
    }

    pub fn is_found(&self) -> bool {
        self.area > 0.0
    }
}

/// Layout of the bytes in [`FrameBuffer::raw`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrameFormat {
    /// A compressed or container format (JPEG, PNG, BMP, ...) detected from the bytes.
    #[default]
    Encoded,
    /// Packed 8-bit RGB rows with no padding.
    Rgb8 { width: u32, height: u32 },
}

/// A reusable capture buffer plus everything derived from it.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    id: usize,
    /// Bytes written by the capture collaborator.
    pub raw: Vec<u8>,
    pub format: FrameFormat,
    /// Capture order, stamped by the frame source.
    pub sequence: u64,
    pub captured_at: Option<Instant>,
    pub image: Option<RgbImage>,
    /// Cleaned binary mask, kept only when the tracker runs with display enabled.
    pub mask: Option<GrayImage>,
    pub contours: Vec<Contour>,
    /// Index into `contours` of the region that was tracked.
    pub best_contour: Option<usize>,
    pub location: Option<Location>,
    pub track: Option<Track>,
}

impl FrameBuffer {
    pub fn new(id: usize) -> Self {
        Self {
            id,
            ..Self::default()
        }
    }

    pub fn with_capacity(id: usize, capacity: usize) -> Self {
        Self {
            id,
            raw: Vec::with_capacity(capacity),
            ..Self::default()
        }
    }

    /// Stable identity of this buffer within its pool.
    pub fn id(&self) -> usize {
        self.id
    }

    /// Clears every field except identity, keeping allocations for reuse.
    pub fn reset(&mut self) {
        self.raw.clear();
        self.format = FrameFormat::Encoded;
        self.sequence = 0;
        self.captured_at = None;
        self.clear_analysis();
    }

    /// Clears only what the tracker derives from `raw`.
    pub fn clear_analysis(&mut self) {
        self.image = None;
        self.mask = None;
        self.contours.clear();
        self.best_contour = None;
        self.location = None;
        self.track = None;
    }

    /// True when no captured or derived data is held.
    pub fn is_clear(&self) -> bool {
        self.raw.is_empty()
            && self.captured_at.is_none()
            && self.image.is_none()
            && self.mask.is_none()
            && self.contours.is_empty()
            && self.best_contour.is_none()
            && self.location.is_none()
            && self.track.is_none()
    }

    /// Copies `bytes` into the buffer, reusing its allocation.
    pub fn fill(&mut self, bytes: &[u8], format: FrameFormat) {
        self.raw.clear();
        self.raw.extend_from_slice(bytes);
        self.format = format;
    }

    pub fn best_contour(&self) -> Option<&Contour> {
        self.best_contour.and_then(|index| self.contours.get(index))
    }

    /// The track, or [`Track::LOST`] when nothing was found.
    pub fn track_or_lost(&self) -> Track {
        self.track.unwrap_or(Track::LOST)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_clears_everything_but_keeps_capacity() {
        let mut frame = FrameBuffer::with_capacity(3, 64);
        frame.fill(&[1, 2, 3, 4], FrameFormat::Rgb8 { width: 1, height: 1 });
        frame.sequence = 9;
        frame.captured_at = Some(Instant::now());
        frame.contours.push(Contour {
            points: vec![Point::new(0, 0)],
            enclosed_area: 1,
        });
        frame.best_contour = Some(0);
        frame.location = Some(Location { x: 1, y: 2 });
        frame.track = Some(Track::new(1, -2, 1.0));

        let capacity = frame.raw.capacity();
        frame.reset();

        assert!(frame.is_clear());
        assert_eq!(frame.id(), 3);
        assert_eq!(frame.format, FrameFormat::Encoded);
        assert_eq!(frame.raw.capacity(), capacity);
    }

    #[test]
    fn lost_track_is_all_zero() {
        let frame = FrameBuffer::new(0);
        assert_eq!(frame.track_or_lost(), Track::new(0, 0, 0.0));
        assert!(!frame.track_or_lost().is_found());
    }

    #[test]
    fn best_contour_follows_index() {
        let mut frame = FrameBuffer::new(0);
        assert!(frame.best_contour().is_none());
        frame.contours.push(Contour {
            points: vec![],
            enclosed_area: 4,
        });
        frame.best_contour = Some(0);
        assert_eq!(frame.best_contour().map(|c| c.enclosed_area), Some(4));
    }
}
