//! Driver configuration: displays, LED layout, timing and destinations.
//!
//! The file format is JSON with the same key names the Adalight Windows
//! driver used (`minBrightness`, `fpsMax`, `displays`, `servers`, ...), so an
//! existing `AdaLight.config.json` loads unchanged. Everything downstream
//! treats a validated [`Settings`] as read-only.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Largest fade factor; above this the LEDs would lag more than they track.
pub const MAX_FADE: f64 = 0.5;

/// Serial header stores `count - 1` in 16 bits.
pub const MAX_SERIAL_LEDS: usize = 1 << 16;

// ── Layout ──────────────────────────────────────────────────────────

/// Grid coordinate of one LED, in units of that display's LED grid.
/// `{ 0, 0 }` is the top-left corner.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedPosition {
    pub x: usize,
    pub y: usize,
}

impl LedPosition {
    pub const fn new(x: usize, y: usize) -> Self {
        Self { x, y }
    }
}

/// One display and the LEDs around it, listed in strand order.
///
/// A display that is not lit but precedes a lit one in the system's display
/// enumeration is kept as a placeholder with zero counts and no positions.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayConfig {
    /// LEDs across the top of the display.
    pub horizontal_count: usize,
    /// LEDs up and down the sides.
    pub vertical_count: usize,
    pub positions: Vec<LedPosition>,
}

// ── Open Pixel Control ──────────────────────────────────────────────

/// A contiguous run of pixels on an OPC channel.
///
/// `display_index[i][j]` names LED `j` of display `i`. The listed LEDs are
/// spread evenly over `pixel_count` destination pixels. A range with no
/// LEDs leaves a dark gap in the channel.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpcPixelRange {
    pub pixel_count: usize,
    #[serde(default)]
    pub display_index: Vec<Vec<usize>>,
}

impl OpcPixelRange {
    /// Number of LED samples feeding this range.
    pub fn sample_count(&self) -> usize {
        self.display_index.iter().map(Vec::len).sum()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpcChannel {
    pub channel: u8,
    pub pixels: Vec<OpcPixelRange>,
}

impl OpcChannel {
    pub fn total_pixel_count(&self) -> usize {
        self.pixels.iter().map(|range| range.pixel_count).sum()
    }
}

/// One OPC server and the channels sent to it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpcServer {
    pub host: String,
    pub port: u16,
    /// Send the extended RGBA frame (command 255, system id 0x0B0B) instead of plain RGB.
    #[serde(default)]
    pub alpha_channel: bool,
    pub channels: Vec<OpcChannel>,
}

// ── Serial ──────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SerialConfig {
    pub enabled: bool,
    /// Fixed device path. When unset, `candidates` are watched for the Ada cookie.
    pub port: Option<PathBuf>,
    pub candidates: Vec<PathBuf>,
    pub baud_rate: u32,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: None,
            candidates: ["/dev/ttyACM0", "/dev/ttyACM1", "/dev/ttyUSB0", "/dev/ttyUSB1"]
                .into_iter()
                .map(PathBuf::from)
                .collect(),
            baud_rate: 115_200,
        }
    }
}

// ── Capture ─────────────────────────────────────────────────────────

/// Which frame source backs the displays.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum CaptureConfig {
    /// Synthetic moving hue bands, one virtual display per configured display.
    Pattern {
        #[serde(default = "default_width")]
        width: u32,
        #[serde(default = "default_height")]
        height: u32,
    },
    /// Screenshot files, one per display, re-read when they change on disk.
    Image { paths: Vec<PathBuf> },
}

fn default_width() -> u32 {
    1920
}

fn default_height() -> u32 {
    1080
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self::Pattern {
            width: default_width(),
            height: default_height(),
        }
    }
}

// ── Settings ────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    /// Minimum LED brightness as the sum of R+G+B; 0 disables the floor.
    pub min_brightness: u8,
    /// Fade factor in `[0, 0.5]`; 0 tracks the screen immediately.
    pub fade: f64,
    /// Serial discovery and capture timeout, in milliseconds.
    pub timeout: u64,
    /// Refresh rate cap. Slow ticks lower the real rate.
    pub fps_max: u32,
    /// Tick interval in milliseconds while capture or outputs are unavailable.
    pub throttle_timer: u64,
    pub displays: Vec<DisplayConfig>,
    pub servers: Vec<OpcServer>,
    pub serial: SerialConfig,
    pub capture: CaptureConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            min_brightness: 64,
            fade: 0.0,
            timeout: 5000,
            fps_max: 30,
            throttle_timer: 3000,
            displays: vec![default_display()],
            servers: Vec::new(),
            serial: SerialConfig::default(),
            capture: CaptureConfig::default(),
        }
    }
}

/// A ring around a single 10x5 display with a gap at the bottom for the stand.
fn default_display() -> DisplayConfig {
    #[rustfmt::skip]
    let positions = [
        // Bottom edge, left half
        (3, 4), (2, 4), (1, 4),
        // Left edge
        (0, 4), (0, 3), (0, 2), (0, 1),
        // Top edge
        (0, 0), (1, 0), (2, 0), (3, 0), (4, 0),
        (5, 0), (6, 0), (7, 0), (8, 0), (9, 0),
        // Right edge
        (9, 1), (9, 2), (9, 3), (9, 4),
        // Bottom edge, right half
        (8, 4), (7, 4), (6, 4),
    ];

    DisplayConfig {
        horizontal_count: 10,
        vertical_count: 5,
        positions: positions
            .into_iter()
            .map(|(x, y)| LedPosition::new(x, y))
            .collect(),
    }
}

impl Settings {
    /// Load settings from `path`, writing the defaults there if it does not exist yet.
    pub fn load_or_init(path: &Path) -> Result<Self, ConfigError> {
        let settings = match fs::read_to_string(path) {
            Ok(text) => serde_json::from_str::<Self>(&text)?,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                let defaults = Self::default();
                match defaults.save(path) {
                    Ok(()) => tracing::info!("Wrote default config to {}", path.display()),
                    Err(e) => tracing::warn!("Could not write default config: {}", e),
                }
                defaults
            }
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        settings.validate()?;
        Ok(settings)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let text = serde_json::to_string_pretty(self)?;
        fs::write(path, text).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Check every cross-reference the pipeline relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if !(0.0..=MAX_FADE).contains(&self.fade) {
            return invalid(format!("fade {} is outside [0, {}]", self.fade, MAX_FADE));
        }
        if self.fps_max == 0 {
            return invalid("fpsMax must be at least 1".to_string());
        }
        if self.throttle_timer == 0 {
            return invalid("throttleTimer must be at least 1 ms".to_string());
        }

        for (i, display) in self.displays.iter().enumerate() {
            if display.positions.is_empty() {
                continue;
            }
            if display.horizontal_count == 0 || display.vertical_count == 0 {
                return invalid(format!("display {i} has LEDs but a zero-sized grid"));
            }
            for (j, led) in display.positions.iter().enumerate() {
                if led.x >= display.horizontal_count || led.y >= display.vertical_count {
                    return invalid(format!(
                        "display {i} LED {j} at ({}, {}) is outside the {}x{} grid",
                        led.x, led.y, display.horizontal_count, display.vertical_count
                    ));
                }
            }
        }

        if self.total_led_count() > MAX_SERIAL_LEDS {
            return invalid(format!(
                "{} LEDs exceed the serial limit of {}",
                self.total_led_count(),
                MAX_SERIAL_LEDS
            ));
        }

        for server in &self.servers {
            if server.host.is_empty() {
                return invalid("OPC server host is empty".to_string());
            }
            for channel in &server.channels {
                self.validate_channel(server, channel)?;
            }
        }

        if let CaptureConfig::Pattern { width, height } = self.capture {
            if width == 0 || height == 0 {
                return invalid("pattern capture needs a non-zero size".to_string());
            }
        }

        Ok(())
    }

    fn validate_channel(&self, server: &OpcServer, channel: &OpcChannel) -> Result<(), ConfigError> {
        let pixels = channel.total_pixel_count();
        let payload = if server.alpha_channel {
            2 + 4 * pixels
        } else {
            3 * pixels
        };
        if payload > usize::from(u16::MAX) {
            return Err(ConfigError::Invalid(format!(
                "channel {} on {} carries {} pixels, too many for one OPC message",
                channel.channel, server.host, pixels
            )));
        }

        for range in &channel.pixels {
            if range.display_index.len() > self.displays.len() {
                return Err(ConfigError::Invalid(format!(
                    "channel {} refers to {} displays but only {} are configured",
                    channel.channel,
                    range.display_index.len(),
                    self.displays.len()
                )));
            }
            for (display, leds) in range.display_index.iter().enumerate() {
                let count = self.displays[display].positions.len();
                if let Some(bad) = leds.iter().find(|&&led| led >= count) {
                    return Err(ConfigError::Invalid(format!(
                        "channel {} refers to LED {} of display {} which has {} LEDs",
                        channel.channel, bad, display, count
                    )));
                }
            }
        }

        Ok(())
    }

    // ── Derived values ──────────────────────────────────────────────

    pub fn total_led_count(&self) -> usize {
        self.displays.iter().map(|d| d.positions.len()).sum()
    }

    /// Index of each display's first LED in the flattened strand.
    pub fn led_bases(&self) -> Vec<usize> {
        self.displays
            .iter()
            .scan(0, |base, display| {
                let start = *base;
                *base += display.positions.len();
                Some(start)
            })
            .collect()
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(1000 / u64::from(self.fps_max.max(1)))
    }

    pub fn throttle_interval(&self) -> Duration {
        Duration::from_millis(self.throttle_timer)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout)
    }
}
