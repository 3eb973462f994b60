//! Color resolution: from an averaged screen region to an LED color.
//!
//! Order matters and is fixed: fade blend, minimum-brightness boost,
//! truncation to bytes, store as fade state, gamma correction. The stored
//! state is pre-gamma so that fades blend in the same space they sample in.

use crate::config::Settings;
use crate::gamma::GammaTable;
use crate::{Color, PackedColor};

/// Tunables for [`resolve_color`], copied out of the settings.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ResolveParams {
    /// Floor for r+g+b; 0 disables the boost.
    pub min_brightness: u8,
    /// Share of the previous color in the blend, `[0, 0.5]`; 0 disables fading.
    pub fade: f64,
}

impl ResolveParams {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            min_brightness: settings.min_brightness,
            fade: settings.fade,
        }
    }

    /// Neutral gray at the floor. Fade state starts here.
    pub fn neutral(self) -> PackedColor {
        let third = self.min_brightness / 3;
        PackedColor::new(third, third, third, 0xFF)
    }
}

/// Blend a new sample with the previous LED state.
pub fn fade_blend(rgb: [f64; 3], previous: PackedColor, fade: f64) -> [f64; 3] {
    if fade <= 0.0 {
        return rgb;
    }

    let weight = 1.0 - fade;
    [
        rgb[0] * weight + f64::from(previous.r()) * fade,
        rgb[1] * weight + f64::from(previous.g()) * fade,
        rgb[2] * weight + f64::from(previous.b()) * fade,
    ]
}

/// Raise colors dimmer than `min_brightness` (as r+g+b) up to the floor.
///
/// The deficit goes mostly to the channels that are currently smaller, so
/// deep saturated colors get brighter without drifting toward white. Black
/// becomes neutral gray.
pub fn boost_min_brightness(rgb: [f64; 3], min_brightness: u8) -> [f64; 3] {
    let min = f64::from(min_brightness);
    let sum = rgb[0] + rgb[1] + rgb[2];

    if sum >= min {
        return rgb;
    }

    if sum == 0.0 {
        let value = min / 3.0;
        return [value; 3];
    }

    let deficit = min - sum;
    let sum2 = 2.0 * sum;
    rgb.map(|c| c + deficit * (sum - c) / sum2)
}

/// Resolve one LED. Returns the gamma-corrected output and the new fade state.
pub fn resolve_color(
    averaged: [f64; 3],
    previous: PackedColor,
    params: ResolveParams,
    gamma: &GammaTable,
) -> (Color, PackedColor) {
    let blended = fade_blend(averaged, previous, params.fade);
    let [r, g, b] = boost_min_brightness(blended, params.min_brightness);

    // `as` saturates and truncates toward zero.
    let color = Color::new(r as u8, g as u8, b as u8);

    (gamma.correct(color), PackedColor::opaque(color))
}

/// Owns the per-LED fade state for the whole strand.
///
/// Indices are positions in the flattened strand (display 0's LEDs first).
#[derive(Clone, Debug)]
pub struct ColorResolver {
    params: ResolveParams,
    gamma: GammaTable,
    previous: Vec<PackedColor>,
}

impl ColorResolver {
    pub fn new(params: ResolveParams, led_count: usize) -> Self {
        Self {
            params,
            gamma: GammaTable::new(),
            previous: vec![params.neutral(); led_count],
        }
    }

    /// Forget all fade state. Called whenever capture resources are (re)acquired.
    pub fn reset(&mut self) {
        self.previous.fill(self.params.neutral());
    }

    /// Resolve LED `led` from its averaged sample and remember the result.
    ///
    /// Returns `None` for an index outside the strand.
    pub fn resolve(&mut self, led: usize, averaged: [f64; 3]) -> Option<Color> {
        let previous = self.previous.get_mut(led)?;
        let (color, state) = resolve_color(averaged, *previous, self.params, &self.gamma);
        *previous = state;
        Some(color)
    }

    /// Pre-gamma state of every LED, in strand order.
    pub fn previous(&self) -> &[PackedColor] {
        &self.previous
    }

    pub fn gamma(&self) -> &GammaTable {
        &self.gamma
    }

    /// Gamma-corrected color currently shown by every LED.
    pub fn output_colors(&self) -> Vec<Color> {
        self.previous
            .iter()
            .map(|state| self.gamma.correct(state.rgb()))
            .collect()
    }
}
