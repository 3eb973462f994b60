//! Spreading LED samples over OPC pixel ranges.
//!
//! An OPC strip rarely has one pixel per sampled LED. Each range first maps
//! every destination pixel to the proportionally nearest sample, which gives
//! hard steps when there are many more pixels than samples. If there are at
//! least three pixels per sample the steps are smoothed with a 1-D Gaussian
//! kernel whose radius is half a step.

use crate::PackedColor;
use crate::config::{OpcChannel, OpcPixelRange};

/// Normalized, symmetric 1-D Gaussian weights.
#[derive(Clone, Debug, PartialEq)]
pub struct Kernel {
    radius: usize,
    weights: Vec<f64>,
}

impl Kernel {
    /// Build a kernel of `2 * radius + 1` taps with sigma = radius / 3, so the
    /// curve has all but vanished at the edges.
    pub fn gaussian(radius: usize) -> Self {
        let taps = 2 * radius + 1;
        let mut weights = vec![0.0; taps];
        weights[radius] = 1.0;

        if radius > 0 {
            // 2 * sigma² with sigma = radius / 3
            let denominator = (radius * radius) as f64 / 4.5;
            for x in 0..radius {
                let diff = x as f64 - radius as f64;
                let weight = (-(diff * diff) / denominator).exp();
                weights[x] = weight;
                weights[taps - x - 1] = weight;
            }
        }

        let total: f64 = weights.iter().sum();
        for weight in &mut weights {
            *weight /= total;
        }

        Self { radius, weights }
    }

    /// Kernel for a range, if the range has enough pixels per sample to be worth blurring.
    pub fn for_range(pixel_count: usize, sample_count: usize) -> Option<Self> {
        if sample_count > 1 && pixel_count >= 3 * sample_count {
            Some(Self::gaussian(pixel_count / (2 * sample_count)))
        } else {
            None
        }
    }

    pub fn radius(&self) -> usize {
        self.radius
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    /// Weighted sum of `window` (which must have `weights().len()` entries), per channel.
    fn apply(&self, window: &[PackedColor]) -> PackedColor {
        let mut sums = [0.0f64; 4];

        for (&weight, sample) in self.weights.iter().zip(window) {
            sums[0] += f64::from(sample.r()) * weight;
            sums[1] += f64::from(sample.g()) * weight;
            sums[2] += f64::from(sample.b()) * weight;
            sums[3] += f64::from(sample.a()) * weight;
        }

        let [r, g, b, a] = sums.map(|v| v.round().clamp(0.0, 255.0) as u8);
        PackedColor::new(r, g, b, a)
    }
}

/// One configured pixel range, resolved to strand indices.
#[derive(Clone, Debug, PartialEq)]
pub struct RangeMapping {
    pixel_count: usize,
    /// Strand index of each sample, in range order.
    sources: Vec<usize>,
    kernel: Option<Kernel>,
}

impl RangeMapping {
    /// `led_bases[d]` is the strand index of display `d`'s first LED.
    pub fn new(range: &OpcPixelRange, led_bases: &[usize]) -> Self {
        let sources: Vec<usize> = range
            .display_index
            .iter()
            .enumerate()
            .flat_map(|(display, leds)| {
                let base = led_bases.get(display).copied().unwrap_or(0);
                leds.iter().map(move |&led| base + led)
            })
            .collect();

        let kernel = Kernel::for_range(range.pixel_count, sources.len());

        Self {
            pixel_count: range.pixel_count,
            sources,
            kernel,
        }
    }

    pub fn pixel_count(&self) -> usize {
        self.pixel_count
    }

    pub fn sample_count(&self) -> usize {
        self.sources.len()
    }

    pub fn kernel(&self) -> Option<&Kernel> {
        self.kernel.as_ref()
    }

    /// Strand index feeding destination `pixel` before any blurring.
    pub fn source_for(&self, pixel: usize) -> Option<usize> {
        if pixel >= self.pixel_count {
            return None;
        }
        self.sources
            .get(pixel * self.sources.len() / self.pixel_count)
            .copied()
    }

    /// Append this range's `pixel_count` pre-gamma colors, taken from the strand `states`.
    pub fn render_into(&self, states: &[PackedColor], out: &mut Vec<PackedColor>) {
        let sampled: Vec<PackedColor> = (0..self.pixel_count)
            .map(|pixel| {
                self.source_for(pixel)
                    .and_then(|led| states.get(led).copied())
                    .unwrap_or(PackedColor::OFF)
            })
            .collect();

        let Some(kernel) = &self.kernel else {
            out.extend_from_slice(&sampled);
            return;
        };

        let radius = kernel.radius();
        out.extend(sampled.iter().enumerate().map(|(pixel, &color)| {
            // The ends of the range have no full window and stay unblurred.
            if pixel >= radius && pixel + radius < self.pixel_count {
                kernel.apply(&sampled[pixel - radius..=pixel + radius])
            } else {
                color
            }
        }));
    }
}

/// Every range of one OPC channel.
#[derive(Clone, Debug, PartialEq)]
pub struct ChannelMapping {
    channel: u8,
    ranges: Vec<RangeMapping>,
}

impl ChannelMapping {
    pub fn new(channel: &OpcChannel, led_bases: &[usize]) -> Self {
        Self {
            channel: channel.channel,
            ranges: channel
                .pixels
                .iter()
                .map(|range| RangeMapping::new(range, led_bases))
                .collect(),
        }
    }

    pub fn channel(&self) -> u8 {
        self.channel
    }

    pub fn ranges(&self) -> &[RangeMapping] {
        &self.ranges
    }

    pub fn total_pixel_count(&self) -> usize {
        self.ranges.iter().map(RangeMapping::pixel_count).sum()
    }

    /// Pre-gamma colors for every pixel of the channel, ranges back to back.
    pub fn render(&self, states: &[PackedColor]) -> Vec<PackedColor> {
        let mut out = Vec::with_capacity(self.total_pixel_count());
        for range in &self.ranges {
            range.render_into(states, &mut out);
        }
        out
    }
}
