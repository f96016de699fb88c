// THEORY (single-pixel colour conversion):
// The `pixel` module is the smallest unit of the tracker. It converts one 8-bit
// RGB pixel into the HSV coordinates the threshold stage compares against. The
// conversion follows the 8-bit convention used by most camera tooling, so HSV
// ranges tuned elsewhere can be pasted in unchanged:
//
// - Hue:        degrees / 2, giving 0..180 so it fits in a byte
// - Saturation: chroma / value scaled to 0..255 (0 when value is 0)
// - Value:      the maximum channel
//
// Saturation is computed in integer arithmetic with round-half-up so the same
// pixel always lands on the same side of a threshold.

pub type Channel = u8;

/// Hue range of the 8-bit convention: degrees are halved, so 0..180.
pub const HUE_LIMIT: u16 = 180;

fn saturation(chroma: u32, value: u32) -> Channel {
    if value == 0 {
        return 0;
    }
    ((2 * 255 * chroma + value) / (2 * value)) as Channel
}

/// A pixel expressed as (hue, saturation, value).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HsvPixel {
    /// Hue in half-degrees, 0..180.
    pub hue: Channel,
    /// Saturation, 0..=255.
    pub saturation: Channel,
    /// Value (brightness), 0..=255.
    pub value: Channel,
}

impl HsvPixel {
    pub fn new(hue: Channel, saturation: Channel, value: Channel) -> Self {
        Self {
            hue,
            saturation,
            value,
        }
    }

    /// Converts an sRGB pixel. Grey pixels (zero chroma) report hue 0.
    pub fn from_rgb(red: Channel, green: Channel, blue: Channel) -> Self {
        let maximum_channel = red.max(green.max(blue));
        let minimum_channel = red.min(green.min(blue));
        let chroma = maximum_channel - minimum_channel;
        let saturation = saturation(chroma as u32, maximum_channel as u32);

        if chroma == 0 {
            return Self::new(0, saturation, maximum_channel);
        }

        let (base_difference, sector_offset) = if maximum_channel == red {
            (green as f32 - blue as f32, 0.0)
        } else if maximum_channel == green {
            (blue as f32 - red as f32, 120.0)
        } else {
            (red as f32 - green as f32, 240.0)
        };

        let mut hue_degrees = 60.0 * base_difference / chroma as f32 + sector_offset;
        if hue_degrees < 0.0 {
            hue_degrees += 360.0;
        }

        // 359.5 degrees and up wraps back onto 0.
        let hue = ((hue_degrees / 2.0).round() as u16) % HUE_LIMIT;
        Self::new(hue as Channel, saturation, maximum_channel)
    }

    pub fn to_array(self) -> [Channel; 3] {
        [self.hue, self.saturation, self.value]
    }
}

impl From<image::Rgb<u8>> for HsvPixel {
    fn from(pixel: image::Rgb<u8>) -> Self {
        let [red, green, blue] = pixel.0;
        Self::from_rgb(red, green, blue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primaries_land_on_expected_hues() {
        assert_eq!(HsvPixel::from_rgb(255, 0, 0), HsvPixel::new(0, 255, 255));
        assert_eq!(HsvPixel::from_rgb(0, 255, 0), HsvPixel::new(60, 255, 255));
        assert_eq!(HsvPixel::from_rgb(0, 0, 255), HsvPixel::new(120, 255, 255));
    }

    #[test]
    fn secondaries_land_between_primaries() {
        assert_eq!(HsvPixel::from_rgb(255, 255, 0).hue, 30);
        assert_eq!(HsvPixel::from_rgb(0, 255, 255).hue, 90);
        assert_eq!(HsvPixel::from_rgb(255, 0, 255).hue, 150);
    }

    #[test]
    fn greys_have_no_hue_or_saturation() {
        assert_eq!(HsvPixel::from_rgb(0, 0, 0), HsvPixel::new(0, 0, 0));
        assert_eq!(HsvPixel::from_rgb(128, 128, 128), HsvPixel::new(0, 0, 128));
        assert_eq!(HsvPixel::from_rgb(255, 255, 255), HsvPixel::new(0, 0, 255));
    }

    #[test]
    fn saturation_scales_with_chroma() {
        // chroma 100 over value 200 -> half saturation.
        let hsv = HsvPixel::from_rgb(200, 100, 100);
        assert_eq!(hsv.value, 200);
        assert_eq!(hsv.saturation, 128);
        assert_eq!(hsv.hue, 0);
    }

    #[test]
    fn hue_just_below_red_wraps_to_zero() {
        // 255, 0, 1 sits at roughly 359.8 degrees.
        assert_eq!(HsvPixel::from_rgb(255, 0, 1).hue, 0);
        assert!(HsvPixel::from_rgb(255, 0, 40).hue >= 170);
    }
}
