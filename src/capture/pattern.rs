//! Synthetic capture: hue bands drifting across every display.
//!
//! Useful for checking LED wiring and strand order without a desktop
//! session; the colors should sweep around the bezel in the same direction
//! on every edge.

use super::{Frame, FrameSource};
use crate::Color;
use crate::error::CaptureError;
use crate::geometry::{BYTES_PER_PIXEL, DisplayBounds};
use std::time::Duration;

/// Hue advance per captured frame, in degrees.
const HUE_STEP: u16 = 3;

pub struct PatternSource {
    width: usize,
    height: usize,
    buffers: Vec<Vec<u8>>,
    frame: u16,
}

impl PatternSource {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            buffers: Vec::new(),
            frame: 0,
        }
    }

    fn pitch(&self) -> usize {
        self.width * BYTES_PER_PIXEL
    }

    /// Fill one display: hue varies along x, each row is a copy of the first.
    fn render(&mut self, display: usize) {
        let pitch = self.pitch();
        let width = self.width;
        let offset = self.frame.wrapping_mul(HUE_STEP) % 360 + (display as u16 % 6) * 60;
        let buffer = &mut self.buffers[display];

        for x in 0..width {
            let hue = (x * 360 / width.max(1)) as u16 + offset;
            let color = Color::from_hue(hue);
            let start = x * BYTES_PER_PIXEL;
            buffer[start..start + BYTES_PER_PIXEL].copy_from_slice(&[color.b, color.g, color.r, 0xFF]);
        }

        let (first, rest) = buffer.split_at_mut(pitch);
        for row in rest.chunks_exact_mut(pitch) {
            row.copy_from_slice(first);
        }
    }
}

impl FrameSource for PatternSource {
    fn open(&mut self, count: usize) -> Result<Vec<DisplayBounds>, CaptureError> {
        if self.width == 0 || self.height == 0 {
            return Err(CaptureError::Unavailable("pattern has no size".to_string()));
        }

        self.buffers = vec![vec![0u8; self.pitch() * self.height]; count];
        Ok(vec![DisplayBounds::new(self.width, self.height); count])
    }

    fn acquire_frame(&mut self, display: usize, _timeout: Duration) -> Result<Frame<'_>, CaptureError> {
        if display >= self.buffers.len() {
            return Err(CaptureError::Unavailable(format!("display {display} is not open")));
        }

        if display == 0 {
            self.frame = self.frame.wrapping_add(1);
        }
        self.render(display);

        let pitch = self.pitch();
        Ok(Frame::new(&self.buffers[display], pitch, self.width, self.height))
    }

    fn close(&mut self) {
        self.buffers.clear();
    }
}
