// THEORY:
// An `HsvRange` is the only piece of configuration the threshold stage reads on
// the hot path. It is a small `Copy` value: the tracker takes one snapshot at the
// top of every frame and works from that copy, so a tuning change can never be
// observed half-applied inside a single frame.
//
// Live tuning goes through `HsvTuning`, a cloneable handle around a lock. Each of
// the six setters rewrites the whole struct while holding the write lock, which
// makes every update an atomic replacement from the reader's point of view.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::core_modules::pixel::{Channel, HsvPixel, HUE_LIMIT};

/// Inclusive lower/upper bound on (hue, saturation, value).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HsvRange {
    pub min: [Channel; 3],
    pub max: [Channel; 3],
}

impl HsvRange {
    /// Matches every pixel.
    pub const ALL: HsvRange = HsvRange::new([0, 0, 0], [179, 255, 255]);
    /// Green tennis ball under the Raspberry Pi camera.
    pub const GREEN_BALL: HsvRange = HsvRange::new([32, 85, 26], [50, 255, 255]);
    pub const RED_BALL: HsvRange = HsvRange::new([0, 223, 60], [9, 255, 255]);
    pub const BLUE_THING: HsvRange = HsvRange::new([89, 63, 60], [108, 255, 255]);

    pub const fn new(min: [Channel; 3], max: [Channel; 3]) -> Self {
        Self { min, max }
    }

    /// Looks up one of the built-in presets by name.
    pub fn preset(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "all" => Some(Self::ALL),
            "greenball" | "tennisball" => Some(Self::GREEN_BALL),
            "redball" => Some(Self::RED_BALL),
            "bluething" => Some(Self::BLUE_THING),
            _ => None,
        }
    }

    pub fn preset_names() -> &'static [&'static str] {
        &["all", "greenball", "tennisball", "redball", "bluething"]
    }

    #[inline]
    pub fn contains(&self, pixel: HsvPixel) -> bool {
        let hsv = pixel.to_array();
        (0..3).all(|i| self.min[i] <= hsv[i] && hsv[i] <= self.max[i])
    }
}

impl Default for HsvRange {
    fn default() -> Self {
        Self::ALL
    }
}

impl fmt::Display for HsvRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "HSV_min = {:03} {:03} {:03}, HSV_max = {:03} {:03} {:03}",
            self.min[0], self.min[1], self.min[2], self.max[0], self.max[1], self.max[2]
        )
    }
}

/// Shared, live-adjustable HSV range.
///
/// Cloning the handle shares the same range. Readers call [`HsvTuning::snapshot`]
/// once per frame; writers replace the range as a whole.
#[derive(Debug, Clone, Default)]
pub struct HsvTuning {
    range: Arc<RwLock<HsvRange>>,
}

impl HsvTuning {
    pub fn new(range: HsvRange) -> Self {
        Self {
            range: Arc::new(RwLock::new(range)),
        }
    }

    /// Copy of the current range.
    pub fn snapshot(&self) -> HsvRange {
        *self.range.read()
    }

    pub fn replace(&self, range: HsvRange) {
        *self.range.write() = range;
    }

    pub fn set_h_min(&self, value: Channel) {
        self.update(|range| range.min[0] = clamp_hue(value));
    }

    pub fn set_h_max(&self, value: Channel) {
        self.update(|range| range.max[0] = clamp_hue(value));
    }

    pub fn set_s_min(&self, value: Channel) {
        self.update(|range| range.min[1] = value);
    }

    pub fn set_s_max(&self, value: Channel) {
        self.update(|range| range.max[1] = value);
    }

    pub fn set_v_min(&self, value: Channel) {
        self.update(|range| range.min[2] = value);
    }

    pub fn set_v_max(&self, value: Channel) {
        self.update(|range| range.max[2] = value);
    }

    fn update(&self, apply: impl FnOnce(&mut HsvRange)) {
        let mut guard = self.range.write();
        let mut next = *guard;
        apply(&mut next);
        *guard = next;
        tracing::debug!(range = %next, "HSV range tuned");
    }
}

// Tuning sliders run 0..=180 for hue.
fn clamp_hue(value: Channel) -> Channel {
    value.min(HUE_LIMIT as Channel)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contains_is_inclusive_on_both_ends() {
        let range = HsvRange::new([10, 20, 30], [20, 40, 60]);
        assert!(range.contains(HsvPixel::new(10, 20, 30)));
        assert!(range.contains(HsvPixel::new(20, 40, 60)));
        assert!(!range.contains(HsvPixel::new(9, 30, 40)));
        assert!(!range.contains(HsvPixel::new(15, 41, 40)));
        assert!(!range.contains(HsvPixel::new(15, 30, 61)));
    }

    #[test]
    fn presets_resolve_case_insensitively() {
        assert_eq!(HsvRange::preset("RedBall"), Some(HsvRange::RED_BALL));
        assert_eq!(HsvRange::preset("tennisball"), Some(HsvRange::GREEN_BALL));
        assert_eq!(HsvRange::preset("purple"), None);
        for name in HsvRange::preset_names() {
            assert!(HsvRange::preset(name).is_some(), "{name} should resolve");
        }
    }

    #[test]
    fn setters_update_single_components() {
        let tuning = HsvTuning::new(HsvRange::ALL);
        tuning.set_h_min(32);
        tuning.set_h_max(50);
        tuning.set_s_min(85);
        tuning.set_s_max(250);
        tuning.set_v_min(26);
        tuning.set_v_max(240);
        assert_eq!(tuning.snapshot(), HsvRange::new([32, 85, 26], [50, 250, 240]));
    }

    #[test]
    fn hue_setters_clamp_to_slider_range() {
        let tuning = HsvTuning::new(HsvRange::ALL);
        tuning.set_h_max(255);
        assert_eq!(tuning.snapshot().max[0], 180);
    }

    #[test]
    fn clones_share_the_same_range() {
        let tuning = HsvTuning::new(HsvRange::ALL);
        let ui_handle = tuning.clone();
        ui_handle.replace(HsvRange::BLUE_THING);
        assert_eq!(tuning.snapshot(), HsvRange::BLUE_THING);
    }

    #[test]
    fn display_matches_tuning_printout() {
        assert_eq!(
            HsvRange::GREEN_BALL.to_string(),
            "HSV_min = 032 085 026, HSV_max = 050 255 255"
        );
    }
}
