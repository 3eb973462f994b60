//! Capture from screenshot files.
//!
//! Each configured display reads one image file. Any external grabber that
//! keeps overwriting those files (grim, scrot, a compositor hook) turns this
//! into live capture; the file is decoded again only when its modification
//! time changes.

use super::{Frame, FrameSource};
use crate::error::CaptureError;
use crate::geometry::{BYTES_PER_PIXEL, DisplayBounds};
use image::ImageReader;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

struct Screenshot {
    bgra: Vec<u8>,
    width: usize,
    height: usize,
    modified: Option<SystemTime>,
}

/// Decode an image file into a tightly packed BGRA buffer.
fn load_bgra(path: &Path) -> Result<Screenshot, Box<dyn std::error::Error>> {
    let modified = fs::metadata(path)?.modified().ok();
    let mut img = ImageReader::open(path)?.with_guessed_format()?.decode()?.to_rgba8();

    for pixel in img.pixels_mut() {
        pixel.0.swap(0, 2);
    }

    let (width, height) = img.dimensions();
    Ok(Screenshot {
        bgra: img.into_raw(),
        width: width as usize,
        height: height as usize,
        modified,
    })
}

pub struct ImageSource {
    paths: Vec<PathBuf>,
    shots: Vec<Screenshot>,
}

impl ImageSource {
    pub fn new(paths: Vec<PathBuf>) -> Self {
        Self {
            paths,
            shots: Vec::new(),
        }
    }

    /// Reload the display's file if it changed on disk.
    fn refresh(&mut self, display: usize) -> Result<(), CaptureError> {
        let path = &self.paths[display];
        let shot = &mut self.shots[display];

        let modified = match fs::metadata(path) {
            Ok(meta) => meta.modified().ok(),
            Err(e) => {
                return Err(CaptureError::Lost(format!("{}: {}", path.display(), e)));
            }
        };

        if modified.is_some() && modified == shot.modified {
            return Ok(());
        }

        // A grabber may be halfway through writing the file; keep the last frame.
        let fresh = load_bgra(path)
            .map_err(|e| CaptureError::Unavailable(format!("{}: {}", path.display(), e)))?;

        if fresh.width != shot.width || fresh.height != shot.height {
            return Err(CaptureError::Lost(format!(
                "{} changed size from {}x{} to {}x{}",
                path.display(),
                shot.width,
                shot.height,
                fresh.width,
                fresh.height
            )));
        }

        *shot = fresh;
        Ok(())
    }
}

impl FrameSource for ImageSource {
    fn open(&mut self, count: usize) -> Result<Vec<DisplayBounds>, CaptureError> {
        self.shots.clear();

        // Displays are enumerated in order; the first unreadable file ends the list.
        for path in self.paths.iter().take(count) {
            match load_bgra(path) {
                Ok(shot) => self.shots.push(shot),
                Err(e) => {
                    tracing::warn!("Cannot capture from {}: {}", path.display(), e);
                    break;
                }
            }
        }

        if self.shots.is_empty() {
            return Err(CaptureError::Unavailable("no readable screenshot files".to_string()));
        }

        Ok(self
            .shots
            .iter()
            .map(|shot| DisplayBounds::new(shot.width, shot.height))
            .collect())
    }

    fn acquire_frame(&mut self, display: usize, _timeout: Duration) -> Result<Frame<'_>, CaptureError> {
        if display >= self.shots.len() {
            return Err(CaptureError::Unavailable(format!("display {display} is not open")));
        }

        self.refresh(display)?;

        let shot = &self.shots[display];
        Ok(Frame::new(
            &shot.bgra,
            shot.width * BYTES_PER_PIXEL,
            shot.width,
            shot.height,
        ))
    }

    fn close(&mut self) {
        self.shots.clear();
    }
}
