//! Gamma correction table.
//!
//! LEDs respond linearly to PWM while the eye does not, so dim screen content
//! would look washed out without a correction curve. The per-channel peaks
//! (255, 240, 220) are a deliberate color calibration for WS2801 strands,
//! which run blue- and green-heavy at full drive.

use crate::Color;

/// Exponent of the correction curve.
pub const GAMMA: f64 = 2.8;

/// Output value for a full-scale input, per channel.
pub const PEAK_RED: f64 = 255.0;
pub const PEAK_GREEN: f64 = 240.0;
pub const PEAK_BLUE: f64 = 220.0;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct Entry {
    r: u8,
    g: u8,
    b: u8,
}

/// Precomputed 256-entry lookup, built once per pipeline.
#[derive(Clone, Debug)]
pub struct GammaTable {
    table: [Entry; 256],
}

impl GammaTable {
    pub fn new() -> Self {
        let mut table = [Entry::default(); 256];

        for (i, entry) in table.iter_mut().enumerate() {
            let f = (i as f64 / 255.0).powf(GAMMA);

            // Truncation, not rounding.
            entry.r = (f * PEAK_RED) as u8;
            entry.g = (f * PEAK_GREEN) as u8;
            entry.b = (f * PEAK_BLUE) as u8;
        }

        Self { table }
    }

    pub fn red(&self, r: u8) -> u8 {
        self.table[usize::from(r)].r
    }

    pub fn green(&self, g: u8) -> u8 {
        self.table[usize::from(g)].g
    }

    pub fn blue(&self, b: u8) -> u8 {
        self.table[usize::from(b)].b
    }

    /// Correct all three channels of a color.
    pub fn correct(&self, color: Color) -> Color {
        Color::new(self.red(color.r), self.green(color.g), self.blue(color.b))
    }
}

impl Default for GammaTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[test]
    fn endpoints_hit_channel_peaks() {
        let gamma = GammaTable::new();
        assert_eq!(gamma.correct(Color::BLACK), Color::BLACK);
        assert_eq!(gamma.correct(Color::new(255, 255, 255)), Color::new(255, 240, 220));
    }

    #[test]
    fn every_channel_is_monotonic() {
        let gamma = GammaTable::new();
        for v in 1..=255u8 {
            assert!(gamma.red(v) >= gamma.red(v - 1), "red dips at {v}");
            assert!(gamma.green(v) >= gamma.green(v - 1), "green dips at {v}");
            assert!(gamma.blue(v) >= gamma.blue(v - 1), "blue dips at {v}");
        }
    }

    #[rstest]
    #[case(128, 37, 34, 31)]
    #[case(64, 5, 5, 4)]
    #[case(21, 0, 0, 0)]
    fn midtones_are_darkened(#[case] v: u8, #[case] r: u8, #[case] g: u8, #[case] b: u8) {
        let gamma = GammaTable::new();
        assert_eq!(gamma.correct(Color::new(v, v, v)), Color::new(r, g, b));
    }

    #[test]
    fn no_channel_exceeds_its_peak() {
        let gamma = GammaTable::new();
        for v in 0..=255u8 {
            assert!(gamma.green(v) <= 240);
            assert!(gamma.blue(v) <= 220);
        }
    }
}
