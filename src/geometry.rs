//! Sample geometry: which captured pixels each LED averages.
//!
//! Each LED owns one cell of its display's LED grid. Inside that cell we take
//! the centers of an N×N sub-grid (N = [`SAMPLE_DENSITY`]) instead of every
//! pixel, which keeps the per-frame cost independent of the resolution.
//! Offsets depend on the capture bounds, so they are rebuilt wholesale every
//! time capture resources are acquired.

use crate::capture::Frame;
use crate::config::DisplayConfig;

/// Sub-grid size per LED cell; each LED averages `SAMPLE_DENSITY²` pixels.
pub const SAMPLE_DENSITY: usize = 16;

/// Captured frames are BGRA, 4 bytes per pixel.
pub const BYTES_PER_PIXEL: usize = 4;

/// Size of a captured display, in pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DisplayBounds {
    pub width: usize,
    pub height: usize,
}

impl DisplayBounds {
    pub const fn new(width: usize, height: usize) -> Self {
        Self { width, height }
    }
}

/// One pixel coordinate inside a captured frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PixelOffset {
    pub x: usize,
    pub y: usize,
}

/// The pixels averaged for one LED, row-major over the sub-grid.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SampleOffsetSet {
    points: Vec<PixelOffset>,
}

impl SampleOffsetSet {
    pub fn points(&self) -> &[PixelOffset] {
        &self.points
    }

    /// Average the sampled pixels of a BGRA frame, returned as `[r, g, b]`.
    ///
    /// Returns `None` when a sample falls outside the frame, which happens
    /// if the frame is smaller than the bounds these offsets were built for.
    pub fn average(&self, frame: &Frame<'_>) -> Option<[f64; 3]> {
        if self.points.is_empty() {
            return None;
        }

        let mut r = 0.0;
        let mut g = 0.0;
        let mut b = 0.0;

        for point in &self.points {
            if point.x >= frame.width || point.y >= frame.height {
                return None;
            }
            let start = point.y * frame.pitch + point.x * BYTES_PER_PIXEL;
            let pixel = frame.pixels.get(start..start + 3)?;

            b += f64::from(pixel[0]);
            g += f64::from(pixel[1]);
            r += f64::from(pixel[2]);
        }

        let divisor = self.points.len() as f64;
        Some([r / divisor, g / divisor, b / divisor])
    }
}

/// Build the offsets for every LED of `display` with the default density.
pub fn build_offsets(bounds: DisplayBounds, display: &DisplayConfig) -> Vec<SampleOffsetSet> {
    build_offsets_with_density(bounds, display, SAMPLE_DENSITY)
}

/// Build the offsets for every LED of `display`, in strand order.
pub fn build_offsets_with_density(
    bounds: DisplayBounds,
    display: &DisplayConfig,
    density: usize,
) -> Vec<SampleOffsetSet> {
    if display.horizontal_count == 0 || display.vertical_count == 0 || density == 0 {
        return Vec::new();
    }

    let cell_width = bounds.width as f64 / display.horizontal_count as f64;
    let cell_height = bounds.height as f64 / display.vertical_count as f64;
    let step_x = cell_width / density as f64;
    let step_y = cell_height / density as f64;

    display
        .positions
        .iter()
        .map(|led| {
            let start_x = cell_width * led.x as f64 + step_x / 2.0;
            let start_y = cell_height * led.y as f64 + step_y / 2.0;

            let xs: Vec<usize> = (0..density)
                .map(|col| (start_x + step_x * col as f64) as usize)
                .collect();

            let points = (0..density)
                .flat_map(|row| {
                    let y = (start_y + step_y * row as f64) as usize;
                    xs.iter().map(move |&x| PixelOffset { x, y })
                })
                .collect();

            SampleOffsetSet { points }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LedPosition;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn display(h: usize, v: usize, positions: &[(usize, usize)]) -> DisplayConfig {
        DisplayConfig {
            horizontal_count: h,
            vertical_count: v,
            positions: positions.iter().map(|&(x, y)| LedPosition::new(x, y)).collect(),
        }
    }

    /// BGRA frame filled with one color, with `pad` spare bytes per row.
    fn solid_frame(width: usize, height: usize, pad: usize, bgra: [u8; 4]) -> (Vec<u8>, usize) {
        let pitch = width * BYTES_PER_PIXEL + pad;
        let mut pixels = vec![0u8; pitch * height];
        for y in 0..height {
            for x in 0..width {
                let start = y * pitch + x * BYTES_PER_PIXEL;
                pixels[start..start + 4].copy_from_slice(&bgra);
            }
        }
        (pixels, pitch)
    }

    #[test]
    fn one_set_per_led_with_density_squared_points() {
        let offsets = build_offsets(
            DisplayBounds::new(1920, 1080),
            &display(10, 5, &[(0, 0), (9, 4), (3, 4)]),
        );
        assert_eq!(offsets.len(), 3);
        for set in &offsets {
            assert_eq!(set.points().len(), SAMPLE_DENSITY * SAMPLE_DENSITY);
        }
    }

    #[test]
    fn samples_sub_cell_centers() {
        // 160x80 display, 10x5 grid: 16x16 pixel cells, one pixel per sub-cell.
        let offsets = build_offsets(DisplayBounds::new(160, 80), &display(10, 5, &[(2, 1)]));
        let points = offsets[0].points();

        assert_eq!(points[0], PixelOffset { x: 32, y: 16 });
        assert_eq!(points[15], PixelOffset { x: 47, y: 16 });
        assert_eq!(points[16], PixelOffset { x: 32, y: 17 });
        assert_eq!(points[255], PixelOffset { x: 47, y: 31 });
    }

    #[rstest]
    #[case(4, 1920, 1080)]
    #[case(16, 1920, 1080)]
    #[case(16, 2560, 1440)]
    #[case(8, 1366, 768)]
    fn points_stay_inside_the_led_cell(#[case] density: usize, #[case] w: usize, #[case] h: usize) {
        let layout = display(10, 5, &[(0, 0), (9, 4), (5, 2)]);
        let offsets = build_offsets_with_density(DisplayBounds::new(w, h), &layout, density);

        for (set, led) in offsets.iter().zip(&layout.positions) {
            assert_eq!(set.points().len(), density * density);
            for point in set.points() {
                assert_eq!(point.x * 10 / w, led.x, "x {} outside cell {}", point.x, led.x);
                assert_eq!(point.y * 5 / h, led.y, "y {} outside cell {}", point.y, led.y);
            }
        }
    }

    #[test]
    fn empty_grid_yields_no_offsets() {
        let offsets = build_offsets(DisplayBounds::new(1920, 1080), &display(0, 0, &[]));
        assert!(offsets.is_empty());
    }

    #[test]
    fn average_reorders_bgra_to_rgb() {
        let (pixels, pitch) = solid_frame(160, 80, 0, [10, 20, 30, 255]);
        let frame = Frame::new(&pixels, pitch, 160, 80);
        let offsets = build_offsets(DisplayBounds::new(160, 80), &display(10, 5, &[(4, 2)]));

        assert_eq!(offsets[0].average(&frame), Some([30.0, 20.0, 10.0]));
    }

    #[test]
    fn average_honors_row_pitch() {
        // Padding bytes are 0; a pitch-ignorant reader would pick them up.
        let (pixels, pitch) = solid_frame(160, 80, 64, [0, 0, 200, 255]);
        let frame = Frame::new(&pixels, pitch, 160, 80);
        let offsets = build_offsets(DisplayBounds::new(160, 80), &display(10, 5, &[(9, 4)]));

        assert_eq!(offsets[0].average(&frame), Some([200.0, 0.0, 0.0]));
    }

    #[test]
    fn average_is_arithmetic_mean() {
        // Left half of every cell black, right half white.
        let (mut pixels, pitch) = solid_frame(32, 32, 0, [0, 0, 0, 255]);
        for y in 0..32 {
            for x in 16..32 {
                let start = y * pitch + x * BYTES_PER_PIXEL;
                pixels[start..start + 3].copy_from_slice(&[255, 255, 255]);
            }
        }
        let frame = Frame::new(&pixels, pitch, 32, 32);
        let offsets = build_offsets(DisplayBounds::new(32, 32), &display(1, 1, &[(0, 0)]));

        assert_eq!(offsets[0].average(&frame), Some([127.5, 127.5, 127.5]));
    }

    #[test]
    fn average_of_short_frame_is_none() {
        let (pixels, pitch) = solid_frame(160, 40, 0, [1, 2, 3, 255]);
        let frame = Frame::new(&pixels, pitch, 160, 40);
        let offsets = build_offsets(DisplayBounds::new(160, 80), &display(10, 5, &[(0, 4)]));

        assert_eq!(offsets[0].average(&frame), None);
    }

    #[test]
    fn average_ignores_row_padding_of_a_narrow_frame() {
        // Offsets built for 160 px, but the frame is 100 px wide with padded rows.
        let (pixels, pitch) = solid_frame(100, 80, 240, [1, 2, 3, 255]);
        let frame = Frame::new(&pixels, pitch, 100, 80);
        let offsets = build_offsets(DisplayBounds::new(160, 80), &display(10, 5, &[(9, 0)]));

        assert_eq!(offsets[0].average(&frame), None);
    }
}
