// THEORY:
// The mask stage turns a decoded colour frame into a binary image: 255 where a
// pixel's HSV coordinates fall inside the tuned range, 0 everywhere else. The raw
// mask is noisy (sensor speckle, reflections, single pixels on the colour
// boundary), so it is cleaned with a morphological opening that is deliberately
// lopsided:
//
// 1.  **Erode** a few times to delete anything smaller than the structuring
//     element. Speckle disappears completely.
// 2.  **Dilate** more times than we eroded. Surviving regions grow past their
//     original size, which recovers the area lost to erosion and fuses nearby
//     fragments of the same object into one blob.
//
// Repeating a 3x3 square kernel `k` times is the same as a single pass with an
// L-infinity ball of radius `k`, which is what `imageproc` computes directly.

use image::{GrayImage, Luma, RgbImage};
use imageproc::distance_transform::Norm;
use imageproc::morphology;

use crate::core_modules::hsv_range::HsvRange;
use crate::core_modules::pixel::HsvPixel;

pub const FOREGROUND: u8 = 255;
pub const BACKGROUND: u8 = 0;

/// Default number of 3x3 erosion passes.
pub const ERODE_ITERATIONS: u8 = 3;
/// Default number of 3x3 dilation passes.
pub const DILATE_ITERATIONS: u8 = 8;

/// Marks every pixel of `image` whose HSV value lies inside `range`.
pub fn threshold(image: &RgbImage, range: &HsvRange) -> GrayImage {
    let mut mask = GrayImage::new(image.width(), image.height());
    for (x, y, pixel) in image.enumerate_pixels() {
        if range.contains(HsvPixel::from(*pixel)) {
            mask.put_pixel(x, y, Luma([FOREGROUND]));
        }
    }
    mask
}

/// Erodes then dilates `mask` with a square structuring element.
pub fn clean(mask: &GrayImage, erode_iterations: u8, dilate_iterations: u8) -> GrayImage {
    let eroded = if erode_iterations > 0 {
        morphology::erode(mask, Norm::LInf, erode_iterations)
    } else {
        mask.clone()
    };
    if dilate_iterations > 0 {
        morphology::dilate(&eroded, Norm::LInf, dilate_iterations)
    } else {
        eroded
    }
}

pub fn foreground_pixels(mask: &GrayImage) -> usize {
    mask.pixels().filter(|pixel| pixel[0] != BACKGROUND).count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn square(mask: &mut GrayImage, left: u32, top: u32, side: u32) {
        for y in top..top + side {
            for x in left..left + side {
                mask.put_pixel(x, y, Luma([FOREGROUND]));
            }
        }
    }

    #[test]
    fn threshold_selects_only_in_range_pixels() {
        let mut image = RgbImage::new(4, 1);
        image.put_pixel(0, 0, Rgb([255, 0, 0]));
        image.put_pixel(1, 0, Rgb([0, 255, 0]));
        image.put_pixel(2, 0, Rgb([40, 0, 0]));
        image.put_pixel(3, 0, Rgb([220, 10, 10]));

        let mask = threshold(&image, &HsvRange::RED_BALL);
        let row: Vec<u8> = mask.pixels().map(|pixel| pixel[0]).collect();
        // Dark red fails the value floor; green fails the hue band.
        assert_eq!(row, vec![FOREGROUND, BACKGROUND, BACKGROUND, FOREGROUND]);
    }

    #[test]
    fn cleaning_removes_speckle() {
        let mut mask = GrayImage::new(40, 40);
        square(&mut mask, 10, 10, 3);
        mask.put_pixel(30, 30, Luma([FOREGROUND]));

        let cleaned = clean(&mask, ERODE_ITERATIONS, DILATE_ITERATIONS);
        assert_eq!(foreground_pixels(&cleaned), 0);
    }

    #[test]
    fn cleaning_regrows_surviving_blobs_past_their_size() {
        let mut mask = GrayImage::new(200, 160);
        square(&mut mask, 80, 60, 40);

        let cleaned = clean(&mask, ERODE_ITERATIONS, DILATE_ITERATIONS);
        // 40 - 2*3 + 2*8 = 50 pixels per side.
        assert_eq!(foreground_pixels(&cleaned), 50 * 50);
        assert_eq!(cleaned.get_pixel(75, 55)[0], FOREGROUND);
        assert_eq!(cleaned.get_pixel(74, 55)[0], BACKGROUND);
    }

    #[test]
    fn zero_iterations_leave_mask_untouched() {
        let mut mask = GrayImage::new(10, 10);
        mask.put_pixel(4, 4, Luma([FOREGROUND]));
        assert_eq!(clean(&mask, 0, 0), mask);
    }
}
