// THEORY:
// Image moments are weighted pixel sums. For a binary region every pixel weighs
// one, so the zeroth moment is the region's area and the first moments divided
// by it give the centre of mass:
//
//     m00 = sum(1)    m10 = sum(x)    m01 = sum(y)
//     centroid = (m10 / m00, m01 / m00)
//
// The tracker only needs these three, accumulated in f64 so a full HD frame of
// foreground pixels cannot overflow.

use image::GrayImage;

/// Raw spatial moments of a binary region.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Moments {
    pub m00: f64,
    pub m10: f64,
    pub m01: f64,
}

impl Moments {
    #[inline]
    pub fn accumulate(&mut self, x: u32, y: u32) {
        self.m00 += 1.0;
        self.m10 += x as f64;
        self.m01 += y as f64;
    }

    /// Moments of every non-zero pixel in `mask`.
    pub fn of_mask(mask: &GrayImage) -> Self {
        let mut moments = Self::default();
        for (x, y, pixel) in mask.enumerate_pixels() {
            if pixel[0] > 0 {
                moments.accumulate(x, y);
            }
        }
        moments
    }

    pub fn of_points<I>(points: I) -> Self
    where
        I: IntoIterator<Item = (u32, u32)>,
    {
        let mut moments = Self::default();
        for (x, y) in points {
            moments.accumulate(x, y);
        }
        moments
    }

    pub fn area(&self) -> f64 {
        self.m00
    }

    /// Centre of mass, or `None` for a region under one pixel.
    pub fn centroid(&self) -> Option<(f64, f64)> {
        if self.m00 < 1.0 {
            return None;
        }
        Some((self.m10 / self.m00, self.m01 / self.m00))
    }
}
