//! Ambient lighting driver for Adalight strips and Open Pixel Control servers.
//!
//! The pipeline samples the edges of one or more captured displays, reduces
//! each LED's screen region to one color, and writes those colors into wire
//! buffers for the serial "Ada" protocol and for OPC channels:
//! - [`geometry`] precomputes which pixels each LED averages
//! - [`resolve`] turns an average into a faded, boosted, gamma-corrected color
//! - [`mapping`] and [`assemble`] spread LED colors over OPC pixel ranges
//! - [`wire`] owns the bit-exact frame layouts
//!
//! [`driver`] runs the fixed-rate loop on its own thread and [`server`]
//! (feature `api`) exposes status and session control over HTTP.

pub mod assemble;
pub mod capture;
pub mod config;
pub mod driver;
pub mod error;
pub mod gamma;
pub mod geometry;
pub mod mapping;
pub mod pipeline;
pub mod resolve;
#[cfg(feature = "api")]
pub mod server;
pub mod transport;
pub mod wire;

use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

// ── Color ──────────────────────────────────────────────────────────

/// One output color, in canonical R, G, B order.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "api", derive(utoipa::ToSchema))]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const BLACK: Self = Self::new(0, 0, 0);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Create a color from a hue value (0-360), with full saturation and brightness.
    pub fn from_hue(hue: u16) -> Self {
        let hue = hue % 360;
        let sector = hue / 60;
        let fraction = ((hue % 60) as f32) / 60.0;
        let rising = (fraction * 255.0) as u8;
        let falling = ((1.0 - fraction) * 255.0) as u8;

        match sector {
            0 => Self::new(255, rising, 0),  // Red → Yellow
            1 => Self::new(falling, 255, 0), // Yellow → Green
            2 => Self::new(0, 255, rising),  // Green → Cyan
            3 => Self::new(0, falling, 255), // Cyan → Blue
            4 => Self::new(rising, 0, 255),  // Blue → Magenta
            _ => Self::new(255, 0, falling), // Magenta → Red
        }
    }
}

/// Per-LED state word: red in the high byte, then green, blue, alpha.
///
/// Fade blending and OPC redistribution work on these pre-gamma values.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct PackedColor(pub u32);

impl PackedColor {
    /// Unmapped OPC pixels: black and fully transparent.
    pub const OFF: Self = Self(0);

    pub const fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self(((r as u32) << 24) | ((g as u32) << 16) | ((b as u32) << 8) | a as u32)
    }

    /// Pack an opaque color. Captured frames are always treated as opaque.
    pub const fn opaque(color: Color) -> Self {
        Self::new(color.r, color.g, color.b, 0xFF)
    }

    pub const fn r(self) -> u8 {
        (self.0 >> 24) as u8
    }

    pub const fn g(self) -> u8 {
        (self.0 >> 16) as u8
    }

    pub const fn b(self) -> u8 {
        (self.0 >> 8) as u8
    }

    pub const fn a(self) -> u8 {
        self.0 as u8
    }

    pub const fn rgb(self) -> Color {
        Color::new(self.r(), self.g(), self.b())
    }
}

// ── Signal handling ────────────────────────────────────────────────

/// Set up a Ctrl+C handler that sets the returned flag to false.
pub fn setup_signal_handler() -> Result<Arc<AtomicBool>, ctrlc::Error> {
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();

    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })?;

    Ok(running)
}

/// Check if the process should keep running.
pub fn is_running(running: &AtomicBool) -> bool {
    running.load(Ordering::SeqCst)
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[rstest]
    #[case(0, 255, 0, 0)] // Red
    #[case(60, 255, 255, 0)] // Yellow
    #[case(120, 0, 255, 0)] // Green
    #[case(180, 0, 255, 255)] // Cyan
    #[case(240, 0, 0, 255)] // Blue
    #[case(300, 255, 0, 255)] // Magenta
    fn test_color_from_hue_primary(#[case] hue: u16, #[case] r: u8, #[case] g: u8, #[case] b: u8) {
        assert_eq!(Color::from_hue(hue), Color::new(r, g, b));
    }

    #[test]
    fn color_from_hue_wraps_at_360() {
        assert_eq!(Color::from_hue(0), Color::from_hue(360));
        assert_eq!(Color::from_hue(90), Color::from_hue(450));
    }

    #[test]
    fn packed_color_layout_is_rgba_big_end_first() {
        let packed = PackedColor::new(0x12, 0x34, 0x56, 0x78);
        assert_eq!(packed.0, 0x1234_5678);
        assert_eq!(
            (packed.r(), packed.g(), packed.b(), packed.a()),
            (0x12, 0x34, 0x56, 0x78)
        );
    }

    #[test]
    fn opaque_sets_alpha_ff() {
        let packed = PackedColor::opaque(Color::new(1, 2, 3));
        assert_eq!(packed.a(), 0xFF);
        assert_eq!(packed.rgb(), Color::new(1, 2, 3));
    }

    #[test]
    fn off_is_transparent_black() {
        assert_eq!(PackedColor::OFF.rgb(), Color::BLACK);
        assert_eq!(PackedColor::OFF.a(), 0);
    }
}
