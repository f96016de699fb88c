// THEORY:
// The `ColourTracker` is the per-frame analysis engine. It is a pure function of
// (frame bytes, HSV range): the same bytes under the same range always produce the
// same answer, which is what makes it safe to run on any number of workers at
// once. The algorithm is a short, fixed sequence:
//
// 1.  **Snapshot**: read the HSV range once. A concurrent tuning change lands on
//     the next frame, never half-way through this one.
// 2.  **Decode**: turn the raw capture bytes into an RGB image.
// 3.  **Threshold & clean**: build the binary mask and open it (see `mask`).
// 4.  **Select**: either pick the largest external region (`MomentSource::Contour`)
//     or treat the whole mask as the object (`MomentSource::Mask`).
// 5.  **Reduce**: moments -> centroid -> offsets from the image centre, y up.
//
// "Not found" is a normal outcome, not an error. Decode failures, empty masks and
// sub-pixel areas all return `false` and leave the frame with no location/track.

use image::{GrayImage, RgbImage};
use serde::{Deserialize, Serialize};

use crate::core_modules::blob_detector::{self, Region};
use crate::core_modules::frame_buffer::{Contour, FrameBuffer, FrameFormat, Location, Track};
use crate::core_modules::hsv_range::{HsvRange, HsvTuning};
use crate::core_modules::mask;
use crate::core_modules::moment::Moments;
use crate::error::{Result, TrackingError};

/// Where the blob moments come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MomentSource {
    /// Largest external contour's filled region.
    #[default]
    Contour,
    /// Every foreground pixel of the mask.
    Mask,
}

/// Resolved tracker settings.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackerConfig {
    pub range: HsvRange,
    pub moments: MomentSource,
    pub erode_iterations: u8,
    pub dilate_iterations: u8,
    /// Frames with more external contours than this are treated as noise.
    pub max_contours: Option<usize>,
    /// Keep the cleaned mask on the frame for display.
    pub show_images: bool,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            range: HsvRange::ALL,
            moments: MomentSource::Contour,
            erode_iterations: mask::ERODE_ITERATIONS,
            dilate_iterations: mask::DILATE_ITERATIONS,
            max_contours: None,
            show_images: false,
        }
    }
}

/// Outcome of running selection on a prepared mask.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Detection {
    pub contours: Vec<Contour>,
    pub best: Option<usize>,
    pub moments: Moments,
}

impl Detection {
    /// Rounded centroid, or `None` when the area is under one pixel.
    pub fn location(&self) -> Option<Location> {
        let (x, y) = self.moments.centroid()?;
        Some(Location {
            x: x.round() as i32,
            y: y.round() as i32,
        })
    }

    pub fn area(&self) -> f64 {
        self.moments.m00
    }
}

/// Converts a pixel location into centre-relative, upward-positive coordinates.
pub fn centre_offset(location: Location, width: u32, height: u32, area: f64) -> Track {
    let half_width = (width / 2) as i32;
    let half_height = (height / 2) as i32;
    Track::new(location.x - half_width, -(location.y - half_height), area)
}

/// Decodes the frame's raw bytes according to its format.
pub fn decode(frame: &FrameBuffer) -> Result<RgbImage> {
    match frame.format {
        FrameFormat::Encoded => Ok(image::load_from_memory(&frame.raw)?.to_rgb8()),
        FrameFormat::Rgb8 { width, height } => {
            let layout_error = || TrackingError::FrameLayout {
                len: frame.raw.len(),
                width,
                height,
            };
            let expected = (width as usize)
                .checked_mul(height as usize)
                .and_then(|pixels| pixels.checked_mul(3))
                .ok_or_else(layout_error)?;
            if frame.raw.len() != expected {
                return Err(layout_error());
            }
            RgbImage::from_raw(width, height, frame.raw.clone()).ok_or_else(layout_error)
        }
    }
}

#[derive(Debug, Clone)]
pub struct ColourTracker {
    tuning: HsvTuning,
    moments: MomentSource,
    erode_iterations: u8,
    dilate_iterations: u8,
    max_contours: Option<usize>,
    show_images: bool,
}

impl ColourTracker {
    pub fn new(range: HsvRange) -> Self {
        Self::from_config(&TrackerConfig {
            range,
            ..TrackerConfig::default()
        })
    }

    pub fn from_config(config: &TrackerConfig) -> Self {
        Self {
            tuning: HsvTuning::new(config.range),
            moments: config.moments,
            erode_iterations: config.erode_iterations,
            dilate_iterations: config.dilate_iterations,
            max_contours: config.max_contours,
            show_images: config.show_images,
        }
    }

    pub fn with_moments(mut self, moments: MomentSource) -> Self {
        self.moments = moments;
        self
    }

    pub fn with_show_images(mut self, show_images: bool) -> Self {
        self.show_images = show_images;
        self
    }

    pub fn with_max_contours(mut self, max_contours: Option<usize>) -> Self {
        self.max_contours = max_contours;
        self
    }

    /// Live handle on the HSV range; clones share it with this tracker.
    pub fn tuning(&self) -> &HsvTuning {
        &self.tuning
    }

    pub fn describe_range(&self) -> String {
        self.tuning.snapshot().to_string()
    }

    /// Thresholds and cleans `image` under `range`.
    pub fn mask(&self, image: &RgbImage, range: &HsvRange) -> GrayImage {
        let raw = mask::threshold(image, range);
        mask::clean(&raw, self.erode_iterations, self.dilate_iterations)
    }

    /// Runs region selection on an already cleaned mask.
    pub fn locate(&self, mask: &GrayImage) -> Detection {
        let regions = blob_detector::find_regions(mask);

        match self.moments {
            MomentSource::Mask => {
                let best = blob_detector::largest(&regions);
                Detection {
                    contours: into_contours(regions),
                    best,
                    moments: Moments::of_mask(mask),
                }
            }
            MomentSource::Contour => {
                if self.max_contours.is_some_and(|limit| regions.len() > limit) {
                    tracing::trace!(contours = regions.len(), "too many contours, treating as noise");
                    return Detection {
                        contours: into_contours(regions),
                        ..Detection::default()
                    };
                }
                let best = blob_detector::largest(&regions);
                let moments = best.map(|i| regions[i].moments).unwrap_or_default();
                Detection {
                    contours: into_contours(regions),
                    best,
                    moments,
                }
            }
        }
    }

    /// Analyses `frame` in place. Returns `true` when the object was found.
    pub fn track(&self, frame: &mut FrameBuffer) -> bool {
        frame.clear_analysis();
        let range = self.tuning.snapshot();

        let image = match decode(frame) {
            Ok(image) => image,
            Err(error) => {
                tracing::trace!(sequence = frame.sequence, %error, "frame could not be decoded");
                return false;
            }
        };

        let mask = self.mask(&image, &range);
        let detection = self.locate(&mask);
        let (width, height) = image.dimensions();
        let location = detection.location();
        let area = detection.area();

        frame.contours = detection.contours;
        frame.best_contour = detection.best;
        frame.image = Some(image);
        if self.show_images {
            frame.mask = Some(mask);
        }

        match location {
            Some(location) => {
                frame.location = Some(location);
                frame.track = Some(centre_offset(location, width, height, area));
                true
            }
            None => {
                tracing::trace!(sequence = frame.sequence, "object not found");
                false
            }
        }
    }
}

impl Default for ColourTracker {
    fn default() -> Self {
        Self::from_config(&TrackerConfig::default())
    }
}

fn into_contours(regions: Vec<Region>) -> Vec<Contour> {
    regions.into_iter().map(|region| region.contour).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Luma, Rgb};
    use std::io::Cursor;

    fn red_square_png(width: u32, height: u32, left: u32, top: u32, side: u32) -> Vec<u8> {
        let mut image = RgbImage::new(width, height);
        for y in top..top + side {
            for x in left..left + side {
                image.put_pixel(x, y, Rgb([255, 0, 0]));
            }
        }
        let mut bytes = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .expect("encode png");
        bytes
    }

    fn square_mask() -> GrayImage {
        let mut mask = GrayImage::new(200, 160);
        for y in 60..100 {
            for x in 80..120 {
                mask.put_pixel(x, y, Luma([255]));
            }
        }
        mask
    }

    #[test]
    fn centred_square_on_mask_is_at_the_origin() {
        let tracker = ColourTracker::new(HsvRange::RED_BALL);
        let detection = tracker.locate(&square_mask());

        assert_eq!(detection.area(), 1600.0);
        assert_eq!(detection.location(), Some(Location { x: 100, y: 80 }));
        let track = centre_offset(detection.location().unwrap(), 200, 160, detection.area());
        assert_eq!(track, Track::new(0, 0, 1600.0));
    }

    #[test]
    fn mask_moments_match_contour_for_single_blob() {
        let tracker = ColourTracker::new(HsvRange::RED_BALL).with_moments(MomentSource::Mask);
        let detection = tracker.locate(&square_mask());
        assert_eq!(detection.area(), 1600.0);
        assert_eq!(detection.location(), Some(Location { x: 100, y: 80 }));
        assert_eq!(detection.contours.len(), 1);
    }

    #[test]
    fn track_reports_centre_offsets_with_y_up() {
        let tracker = ColourTracker::new(HsvRange::RED_BALL);
        let mut frame = FrameBuffer::new(0);
        // Top-left quadrant: negative x, positive y.
        frame.raw = red_square_png(200, 160, 20, 20, 40);

        assert!(tracker.track(&mut frame));
        let track = frame.track.unwrap();
        assert!(track.x < 0, "{track:?}");
        assert!(track.y > 0, "{track:?}");
        // 40 - 2*3 + 2*8 = 50 pixels per side after cleanup.
        assert_eq!(track.area, 2500.0);
        assert_eq!(frame.location, Some(Location { x: 40, y: 40 }));
        assert_eq!(track, Track::new(-60, 40, 2500.0));
        assert_eq!(frame.contours.len(), 1);
        assert_eq!(frame.best_contour, Some(0));
        assert!(frame.image.is_some());
        assert!(frame.mask.is_none());
    }

    #[test]
    fn centred_frame_tracks_to_origin() {
        let tracker = ColourTracker::new(HsvRange::RED_BALL).with_show_images(true);
        let mut frame = FrameBuffer::new(0);
        frame.raw = red_square_png(200, 160, 80, 60, 40);

        assert!(tracker.track(&mut frame));
        assert_eq!(frame.track, Some(Track::new(0, 0, 2500.0)));
        assert!(frame.mask.is_some());
    }

    #[test]
    fn blank_frame_is_not_found() {
        let tracker = ColourTracker::new(HsvRange::RED_BALL);
        let mut frame = FrameBuffer::new(0);
        frame.raw = vec![0; 64 * 48 * 3];
        frame.format = FrameFormat::Rgb8 {
            width: 64,
            height: 48,
        };

        assert!(!tracker.track(&mut frame));
        assert!(frame.location.is_none());
        assert!(frame.track.is_none());
        assert_eq!(frame.track_or_lost(), Track::LOST);
        assert!(frame.contours.is_empty());
    }

    #[test]
    fn undecodable_bytes_are_not_found() {
        let tracker = ColourTracker::default();
        let mut frame = FrameBuffer::new(0);
        frame.raw = b"definitely not an image".to_vec();
        assert!(!tracker.track(&mut frame));
        assert!(frame.image.is_none());

        frame.raw = vec![0; 10];
        frame.format = FrameFormat::Rgb8 { width: 4, height: 4 };
        assert!(matches!(decode(&frame), Err(TrackingError::FrameLayout { len: 10, .. })));
        assert!(!tracker.track(&mut frame));
    }

    #[test]
    fn tracking_is_repeatable() {
        let tracker = ColourTracker::new(HsvRange::RED_BALL);
        let mut frame = FrameBuffer::new(0);
        frame.raw = red_square_png(120, 90, 10, 30, 30);

        assert!(tracker.track(&mut frame));
        let first = (frame.location, frame.track);
        assert!(tracker.track(&mut frame));
        assert_eq!((frame.location, frame.track), first);
    }

    #[test]
    fn stale_results_are_cleared_on_a_miss() {
        let tracker = ColourTracker::new(HsvRange::RED_BALL);
        let mut frame = FrameBuffer::new(0);
        frame.raw = red_square_png(120, 90, 10, 30, 30);
        assert!(tracker.track(&mut frame));

        tracker.tuning().replace(HsvRange::BLUE_THING);
        assert!(!tracker.track(&mut frame));
        assert!(frame.track.is_none());
        assert!(frame.location.is_none());
    }

    #[test]
    fn contour_limit_rejects_noisy_masks() {
        let mut mask = GrayImage::new(60, 20);
        for left in [2, 22, 42] {
            for y in 5..10 {
                for x in left..left + 5 {
                    mask.put_pixel(x, y, Luma([255]));
                }
            }
        }
        let strict = ColourTracker::default().with_max_contours(Some(2));
        let detection = strict.locate(&mask);
        assert_eq!(detection.contours.len(), 3);
        assert_eq!(detection.location(), None);

        let relaxed = ColourTracker::default().with_max_contours(Some(3));
        assert!(relaxed.locate(&mask).location().is_some());
    }

    #[test]
    fn describe_range_uses_tuning_format() {
        let tracker = ColourTracker::new(HsvRange::GREEN_BALL);
        tracker.tuning().set_v_min(30);
        assert_eq!(
            tracker.describe_range(),
            "HSV_min = 032 085 030, HSV_max = 050 255 255"
        );
    }
}
