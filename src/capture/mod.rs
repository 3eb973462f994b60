//! Frame capture seam.
//!
//! The pipeline only needs "give me display N's pixels with a row pitch, or
//! tell me why not". Platform capture (desktop duplication, PipeWire, X11)
//! implements [`FrameSource`]; this crate ships a synthetic pattern and an
//! image-file source.

mod pattern;
mod screenshot;

pub use self::pattern::PatternSource;
pub use self::screenshot::ImageSource;

use crate::config::CaptureConfig;
use crate::error::CaptureError;
use crate::geometry::DisplayBounds;
use std::time::Duration;

/// A borrowed BGRA frame. Rows are `pitch` bytes apart, which may exceed `width * 4`.
#[derive(Clone, Copy, Debug)]
pub struct Frame<'a> {
    pub pixels: &'a [u8],
    pub pitch: usize,
    pub width: usize,
    pub height: usize,
}

impl<'a> Frame<'a> {
    pub fn new(pixels: &'a [u8], pitch: usize, width: usize, height: usize) -> Self {
        Self {
            pixels,
            pitch,
            width,
            height,
        }
    }
}

/// Source of captured display frames.
///
/// `open` and `close` must be safe to call repeatedly: session changes can
/// request reacquisition at any time.
pub trait FrameSource: Send {
    /// Open up to `count` displays in enumeration order and report their bounds.
    ///
    /// Fewer bounds than requested means the remaining displays are not
    /// attached; their LEDs are skipped until the next acquisition.
    fn open(&mut self, count: usize) -> Result<Vec<DisplayBounds>, CaptureError>;

    /// Capture the current contents of `display`, waiting at most `timeout`.
    fn acquire_frame(&mut self, display: usize, timeout: Duration) -> Result<Frame<'_>, CaptureError>;

    fn close(&mut self);
}

/// Build the frame source named in the configuration.
pub fn from_config(config: &CaptureConfig) -> Box<dyn FrameSource> {
    match config {
        CaptureConfig::Pattern { width, height } => {
            Box::new(PatternSource::new(*width as usize, *height as usize))
        }
        CaptureConfig::Image { paths } => Box::new(ImageSource::new(paths.clone())),
    }
}
