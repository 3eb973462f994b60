//! Serial link to an Adalight microcontroller.
//!
//! The Arduino sketch prints `Ada\n` over and over until it receives its
//! first frame. When no device path is configured every candidate is opened
//! for reading at once and the first one to print the cookie wins. Later
//! reconnects open that device directly.
//!
//! Frames are written on a separate thread and the caller waits at most the
//! configured timeout for each one, so a stalled device cannot hold up a tick.

use super::Transport;
use crate::config::SerialConfig;
use crate::error::TransportError;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const COOKIE: [u8; 4] = *b"Ada\n";

/// Back-off between reads that returned nothing.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Put the line into raw 8N1 at `baud`, with reads that give up after half a
/// second of silence. Returns `false` if `stty` is missing or the path is
/// not a terminal, which is fine for plain files and pseudo terminals.
fn configure_line(path: &Path, baud: u32) -> bool {
    let status = Command::new("stty")
        .arg("-F")
        .arg(path)
        .arg(baud.to_string())
        .args(["cs8", "-cstopb", "-parenb", "raw", "-echo", "min", "0", "time", "5"])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();

    match status {
        Ok(status) if status.success() => true,
        Ok(status) => {
            debug!("stty {} exited with {status}", path.display());
            false
        }
        Err(e) => {
            debug!("stty unavailable: {e}");
            false
        }
    }
}

/// Terminals only honor the read timeout once `stty` has set it; without it a
/// read blocks until the device talks.
#[cfg(unix)]
fn is_terminal_device(path: &Path) -> bool {
    use std::os::unix::fs::FileTypeExt;
    fs::metadata(path).is_ok_and(|m| m.file_type().is_char_device())
}

#[cfg(not(unix))]
fn is_terminal_device(_path: &Path) -> bool {
    false
}

/// Read until the cookie shows up or `deadline` passes.
fn watch_for_cookie(reader: impl Read, deadline: Instant) -> bool {
    let mut reader = BufReader::new(reader);
    let mut window = [0u8; COOKIE.len()];
    let mut byte = [0u8; 1];

    while Instant::now() < deadline {
        match reader.read(&mut byte) {
            Ok(0) => thread::sleep(POLL_INTERVAL),
            Ok(_) => {
                window.rotate_left(1);
                window[COOKIE.len() - 1] = byte[0];
                if window == COOKIE {
                    return true;
                }
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(_) => return false,
        }
    }

    false
}

/// Watch every candidate in parallel and return the first that sends the cookie within `timeout`.
pub fn discover(candidates: &[PathBuf], baud: u32, timeout: Duration) -> Result<PathBuf, TransportError> {
    let (tx, rx) = mpsc::channel();
    let deadline = Instant::now() + timeout;

    for path in candidates {
        if !configure_line(path, baud) && is_terminal_device(path) {
            debug!("Skipping {}: line settings could not be applied", path.display());
            continue;
        }
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) => {
                debug!("Skipping {}: {e}", path.display());
                continue;
            }
        };

        let tx = tx.clone();
        let candidate = path.clone();
        let spawned = thread::Builder::new()
            .name("serial-discover".to_string())
            .spawn(move || {
                if watch_for_cookie(file, deadline) {
                    let _ = tx.send(candidate);
                }
            });

        if let Err(e) = spawned {
            warn!("Failed to watch {}: {e}", path.display());
        }
    }

    // Disconnects early once every watcher has given up.
    drop(tx);

    rx.recv_timeout(timeout)
        .map_err(|_| TransportError::DeviceNotFound(candidates.to_vec()))
}

// ── Writer ───────────────────────────────────────────────────────────

/// Owns the open device on its own thread and reports each write back.
///
/// Dropping the writer stops the thread once its current write returns.
struct LineWriter {
    frames: SyncSender<Vec<u8>>,
    results: Receiver<io::Result<()>>,
}

impl LineWriter {
    fn spawn(mut device: impl Write + Send + 'static) -> io::Result<Self> {
        let (frames, pending) = mpsc::sync_channel::<Vec<u8>>(1);
        let (reply, results) = mpsc::channel();

        thread::Builder::new().name("serial-writer".to_string()).spawn(move || {
            for frame in pending {
                let result = device.write_all(&frame).and_then(|()| device.flush());
                let failed = result.is_err();
                if reply.send(result).is_err() || failed {
                    break;
                }
            }
        })?;

        Ok(Self { frames, results })
    }

    /// Hand one frame to the thread and wait up to `timeout` for it to land.
    fn write(&self, frame: &[u8], timeout: Duration) -> io::Result<()> {
        self.frames
            .send(frame.to_vec())
            .map_err(|_| io::Error::new(ErrorKind::BrokenPipe, "serial writer stopped"))?;

        match self.results.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(io::Error::new(ErrorKind::TimedOut, "serial write timed out")),
            Err(RecvTimeoutError::Disconnected) => {
                Err(io::Error::new(ErrorKind::BrokenPipe, "serial writer stopped"))
            }
        }
    }
}

// ── Port ─────────────────────────────────────────────────────────────

pub struct SerialPort {
    config: SerialConfig,
    /// Bounds discovery and every frame write.
    timeout: Duration,
    /// Device to open; either configured or remembered from discovery.
    device: Option<PathBuf>,
    writer: Option<LineWriter>,
}

impl SerialPort {
    pub fn new(config: SerialConfig, timeout: Duration) -> Self {
        Self {
            device: config.port.clone(),
            config,
            timeout,
            writer: None,
        }
    }

    pub fn device(&self) -> Option<&Path> {
        self.device.as_deref()
    }
}

impl Transport for SerialPort {
    fn open(&mut self) -> Result<(), TransportError> {
        if self.writer.is_some() {
            return Ok(());
        }

        let device = match &self.device {
            Some(device) => device.clone(),
            None => {
                let found = discover(&self.config.candidates, self.config.baud_rate, self.timeout)?;
                info!("Found Adalight device on {}", found.display());
                self.device = Some(found.clone());
                found
            }
        };

        configure_line(&device, self.config.baud_rate);
        match OpenOptions::new().write(true).open(&device) {
            Ok(file) => {
                self.writer = Some(LineWriter::spawn(file)?);
                info!("Opened serial device {}", device.display());
                Ok(())
            }
            Err(e) => {
                // A discovered device may have been replugged under another name.
                if self.config.port.is_none() {
                    self.device = None;
                }
                Err(e.into())
            }
        }
    }

    fn is_open(&self) -> bool {
        self.writer.is_some()
    }

    fn send(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        let Some(writer) = &self.writer else {
            return Err(TransportError::NotOpen);
        };

        if let Err(e) = writer.write(frame, self.timeout) {
            warn!("Serial write failed, closing {}: {e}", self.describe());
            self.close();
            return Err(e.into());
        }

        Ok(())
    }

    fn close(&mut self) {
        if self.writer.take().is_some() {
            debug!("Closed serial device {}", self.describe());
        }
    }

    fn describe(&self) -> String {
        self.device
            .as_ref()
            .map_or_else(|| "serial (undiscovered)".to_string(), |d| d.display().to_string())
    }
}
