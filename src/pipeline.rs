//! One capture, resolve, assemble and transmit cycle, plus the resources it needs.
//!
//! Capture resources (display handles and the sample offsets built from
//! their bounds) are acquired and released as a unit, and both operations are
//! idempotent. A pipeline without resources still runs: it renders cleared
//! frames so the LEDs go dark instead of holding a stale picture.

use crate::assemble::{FrameAssembler, Target};
use crate::capture::{self, FrameSource};
use crate::config::Settings;
use crate::error::CaptureError;
use crate::geometry::{SampleOffsetSet, build_offsets};
use crate::resolve::{ColorResolver, ResolveParams};
use crate::transport::{OpcPool, SerialPort, Transport};
use crate::Color;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub struct AmbientPipeline {
    settings: Settings,
    source: Box<dyn FrameSource>,
    resolver: ColorResolver,
    assembler: FrameAssembler,
    serial: Option<Box<dyn Transport>>,
    opc: OpcPool,
    /// Strand index of each display's first LED.
    bases: Vec<usize>,
    /// Per configured display; empty for displays that are not attached.
    offsets: Vec<Vec<SampleOffsetSet>>,
    acquired: bool,
    frames: u64,
    acquired_at: Option<Instant>,
    last_frame_rate: Option<f64>,
}

impl AmbientPipeline {
    pub fn new(
        settings: Settings,
        source: Box<dyn FrameSource>,
        serial: Option<Box<dyn Transport>>,
        opc: OpcPool,
    ) -> Self {
        let resolver = ColorResolver::new(ResolveParams::from_settings(&settings), settings.total_led_count());
        let assembler = FrameAssembler::from_settings(&settings);
        let bases = settings.led_bases();

        Self {
            settings,
            source,
            resolver,
            assembler,
            serial,
            opc,
            bases,
            offsets: Vec::new(),
            acquired: false,
            frames: 0,
            acquired_at: None,
            last_frame_rate: None,
        }
    }

    /// Wire up the capture backend and transports named in `settings`.
    pub fn from_settings(settings: Settings) -> Self {
        let source = capture::from_config(&settings.capture);
        let serial = settings
            .serial
            .enabled
            .then(|| Box::new(SerialPort::new(settings.serial.clone(), settings.timeout())) as Box<dyn Transport>);
        let opc = OpcPool::new(&settings.servers, settings.timeout());

        Self::new(settings, source, serial, opc)
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn is_acquired(&self) -> bool {
        self.acquired
    }

    // ── Outputs ─────────────────────────────────────────────────────

    fn has_outputs(&self) -> bool {
        self.serial.is_some() || !self.opc.is_empty()
    }

    /// Open the serial port and every OPC connection. True if anything can
    /// receive frames, or if there is nothing configured to receive them.
    pub fn open_outputs(&mut self) -> bool {
        if !self.has_outputs() {
            return true;
        }

        let serial_opened = match &mut self.serial {
            Some(serial) => match serial.open() {
                Ok(()) => true,
                Err(e) => {
                    debug!("Serial unavailable: {e}");
                    false
                }
            },
            None => false,
        };
        let opc_opened = self.opc.open();

        serial_opened || opc_opened
    }

    /// True if a configured transport is closed, either because it never
    /// connected or because a write failed.
    pub fn has_closed_outputs(&self) -> bool {
        self.serial.as_ref().is_some_and(|s| !s.is_open()) || self.opc.open_count() < self.opc.len()
    }

    /// Try to reopen closed transports while capture stays acquired. Open
    /// ones are left alone.
    pub fn reopen_closed_outputs(&mut self) {
        if let Some(serial) = self.serial.as_mut().filter(|s| !s.is_open()) {
            match serial.open() {
                Ok(()) => info!("Reopened {}", serial.describe()),
                Err(e) => debug!("Serial still unavailable: {e}"),
            }
        }
        if self.opc.open_count() < self.opc.len() {
            self.opc.open();
        }
    }

    pub fn close_outputs(&mut self) {
        if let Some(serial) = &mut self.serial {
            serial.close();
        }
        self.opc.close();
    }

    pub fn serial_open(&self) -> bool {
        self.serial.as_ref().is_some_and(|s| s.is_open())
    }

    pub fn opc_open_count(&self) -> usize {
        self.opc.open_count()
    }

    // ── Capture resources ───────────────────────────────────────────

    /// Open capture and rebuild the sample offsets. Resets the fade state.
    pub fn create_resources(&mut self) -> bool {
        if self.acquired {
            return true;
        }

        let wanted = self.settings.displays.len();
        let bounds = match self.source.open(wanted) {
            Ok(bounds) if !bounds.is_empty() => bounds,
            Ok(_) => {
                warn!("No displays available for capture");
                self.source.close();
                return false;
            }
            Err(e) => {
                warn!("Failed to acquire capture: {e}");
                self.source.close();
                return false;
            }
        };

        self.offsets = self
            .settings
            .displays
            .iter()
            .enumerate()
            .map(|(index, display)| {
                bounds
                    .get(index)
                    .map(|&b| build_offsets(b, display))
                    .unwrap_or_default()
            })
            .collect();

        if bounds.len() < wanted {
            warn!("Only {} of {wanted} displays attached", bounds.len());
        }

        self.resolver.reset();
        self.acquired = true;
        self.frames = 0;
        self.acquired_at = Some(Instant::now());

        info!("Acquired capture resources for {} display(s)", bounds.len().min(wanted));
        true
    }

    /// Release capture and log the frame rate achieved since acquisition.
    pub fn free_resources(&mut self) {
        if !self.acquired {
            return;
        }

        if let Some(rate) = self.current_frame_rate() {
            info!("Released capture after {} frames ({rate:.2} fps)", self.frames);
            self.last_frame_rate = Some(rate);
        }

        self.source.close();
        self.offsets.clear();
        self.acquired = false;
        self.acquired_at = None;
    }

    // ── Per tick ────────────────────────────────────────────────────

    /// Capture every attached display and resolve its LEDs.
    ///
    /// A display that is temporarily unavailable keeps its LEDs frozen. A
    /// lost capture device releases all resources and returns `false`.
    pub fn take_samples(&mut self) -> bool {
        if !self.acquired {
            return false;
        }

        let timeout = self.capture_timeout();
        let mut lost = None;

        for (index, offsets) in self.offsets.iter().enumerate() {
            if offsets.is_empty() {
                continue;
            }

            let frame = match self.source.acquire_frame(index, timeout) {
                Ok(frame) => frame,
                Err(CaptureError::Unavailable(reason)) => {
                    debug!("Display {index} skipped: {reason}");
                    continue;
                }
                Err(CaptureError::Lost(reason)) => {
                    lost = Some(reason);
                    break;
                }
            };

            let base = self.bases.get(index).copied().unwrap_or(0);
            for (led, set) in offsets.iter().enumerate() {
                if let Some(averaged) = set.average(&frame) {
                    self.resolver.resolve(base + led, averaged);
                }
            }
        }

        if let Some(reason) = lost {
            warn!("Capture lost, releasing resources: {reason}");
            self.free_resources();
            return false;
        }

        self.frames += 1;
        true
    }

    /// Fill every destination buffer, or clear them all without resources.
    pub fn render(&mut self) {
        if self.acquired {
            self.assembler.assemble(self.resolver.previous(), self.resolver.gamma());
        } else {
            self.assembler.clear();
        }
    }

    /// Write every destination buffer to its transport. A failed write closes
    /// that transport; the driver reopens it later.
    pub fn send(&mut self) {
        for destination in self.assembler.destinations() {
            let frame = destination.buffer().as_bytes();
            let result = match destination.target() {
                Target::Serial => match &mut self.serial {
                    Some(serial) if serial.is_open() => serial.send(frame),
                    _ => continue,
                },
                Target::Opc { server } => self.opc.send(server, frame),
            };

            if let Err(e) = result {
                debug!("Frame not delivered: {e}");
            }
        }
    }

    /// Zero the serial frame, leaving OPC frames as they are.
    pub fn clear_serial(&mut self) {
        self.assembler.clear_serial();
    }

    /// Send a cleared frame to every destination.
    pub fn send_all_off(&mut self) {
        self.assembler.clear();
        self.send();
    }

    // ── Inspection ──────────────────────────────────────────────────

    /// Gamma-corrected color of every LED, in strand order.
    pub fn led_colors(&self) -> Vec<Color> {
        self.resolver.output_colors()
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Rate since acquisition while acquired, else the rate of the last session.
    pub fn frame_rate(&self) -> Option<f64> {
        self.current_frame_rate().or(self.last_frame_rate)
    }

    fn current_frame_rate(&self) -> Option<f64> {
        let elapsed = self.acquired_at?.elapsed().as_secs_f64();
        (elapsed > 0.0 && self.frames > 0).then(|| self.frames as f64 / elapsed)
    }

    fn capture_timeout(&self) -> Duration {
        self.settings.frame_interval()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::capture::Frame;
    use crate::config::{DisplayConfig, LedPosition};
    use crate::geometry::{BYTES_PER_PIXEL, DisplayBounds};
    use crate::transport::tests::RecordingTransport;
    use crate::wire::WireBuffer;
    use crate::PackedColor;
    use pretty_assertions::assert_eq;
    use std::collections::VecDeque;

    const WIDTH: usize = 32;
    const HEIGHT: usize = 16;

    /// Every display shows one BGRA color. Scripted errors are returned first.
    pub(crate) struct SolidSource {
        pub(crate) attached: usize,
        pub(crate) failures: VecDeque<CaptureError>,
        pub(crate) open_error: Option<CaptureError>,
        buffer: Vec<u8>,
        open: bool,
    }

    impl SolidSource {
        pub(crate) fn new(bgra: [u8; 4]) -> Self {
            Self {
                attached: usize::MAX,
                failures: VecDeque::new(),
                open_error: None,
                buffer: bgra.repeat(WIDTH * HEIGHT),
                open: false,
            }
        }

        pub(crate) fn fill(&mut self, bgra: [u8; 4]) {
            self.buffer = bgra.repeat(WIDTH * HEIGHT);
        }
    }

    impl FrameSource for SolidSource {
        fn open(&mut self, count: usize) -> Result<Vec<DisplayBounds>, CaptureError> {
            if let Some(e) = self.open_error.clone() {
                return Err(e);
            }
            self.open = true;
            Ok(vec![DisplayBounds::new(WIDTH, HEIGHT); count.min(self.attached)])
        }

        fn acquire_frame(&mut self, _display: usize, _timeout: Duration) -> Result<Frame<'_>, CaptureError> {
            if let Some(e) = self.failures.pop_front() {
                return Err(e);
            }
            if !self.open {
                return Err(CaptureError::Unavailable("closed".to_string()));
            }
            Ok(Frame::new(&self.buffer, WIDTH * BYTES_PER_PIXEL, WIDTH, HEIGHT))
        }

        fn close(&mut self) {
            self.open = false;
        }
    }

    /// A 2x1 grid with both LEDs lit.
    pub(crate) fn two_led_display() -> DisplayConfig {
        DisplayConfig {
            horizontal_count: 2,
            vertical_count: 1,
            positions: vec![LedPosition::new(0, 0), LedPosition::new(1, 0)],
        }
    }

    pub(crate) fn test_settings(displays: usize) -> Settings {
        Settings {
            displays: vec![two_led_display(); displays],
            ..Settings::default()
        }
    }

    fn pipeline(source: SolidSource, serial: &RecordingTransport, displays: usize) -> AmbientPipeline {
        AmbientPipeline::new(
            test_settings(displays),
            Box::new(source),
            Some(Box::new(serial.clone())),
            OpcPool::from_transports(Vec::new()),
        )
    }

    impl AmbientPipeline {
        /// Pre-gamma fade state of every LED.
        fn led_states(&self) -> &[PackedColor] {
            self.resolver.previous()
        }
    }

    fn neutral() -> PackedColor {
        PackedColor::new(21, 21, 21, 0xFF)
    }

    #[test]
    fn samples_resolve_every_led() {
        let serial = RecordingTransport::default();
        let mut pipeline = pipeline(SolidSource::new([0, 0, 255, 255]), &serial, 1);

        assert!(pipeline.create_resources());
        assert!(pipeline.take_samples());

        assert_eq!(pipeline.led_states(), &[PackedColor::new(255, 0, 0, 0xFF); 2]);
        assert_eq!(pipeline.led_colors(), vec![Color::new(255, 0, 0); 2]);
        assert_eq!(pipeline.frames(), 1);
    }

    #[test]
    fn create_resources_is_idempotent() {
        let serial = RecordingTransport::default();
        let mut pipeline = pipeline(SolidSource::new([0, 0, 255, 255]), &serial, 1);

        assert!(pipeline.create_resources());
        pipeline.take_samples();
        // A second call must not reset the fade state.
        assert!(pipeline.create_resources());
        assert_eq!(pipeline.led_states()[0], PackedColor::new(255, 0, 0, 0xFF));

        pipeline.free_resources();
        pipeline.free_resources();
        assert!(!pipeline.is_acquired());

        // Reacquiring does.
        assert!(pipeline.create_resources());
        assert_eq!(pipeline.led_states(), &[neutral(); 2]);
    }

    #[test]
    fn unavailable_display_freezes_its_leds() {
        let serial = RecordingTransport::default();
        let mut source = SolidSource::new([0, 255, 0, 255]);
        source.failures.push_back(CaptureError::Unavailable("busy".to_string()));
        let mut pipeline = pipeline(source, &serial, 2);

        pipeline.create_resources();
        assert!(pipeline.take_samples());

        // Display 0 failed this tick and holds the starting state; display 1 sampled green.
        let green = PackedColor::new(0, 255, 0, 0xFF);
        assert_eq!(pipeline.led_states(), &[neutral(), neutral(), green, green]);
    }

    #[test]
    fn lost_capture_releases_resources() {
        let serial = RecordingTransport::default();
        let mut source = SolidSource::new([0, 255, 0, 255]);
        source.failures.push_back(CaptureError::Lost("mode change".to_string()));
        let mut pipeline = pipeline(source, &serial, 1);

        pipeline.create_resources();
        assert!(!pipeline.take_samples());
        assert!(!pipeline.is_acquired());
        assert!(!pipeline.take_samples());
    }

    #[test]
    fn detached_display_leds_are_skipped() {
        let serial = RecordingTransport::default();
        let mut source = SolidSource::new([255, 0, 0, 255]);
        source.attached = 1;
        let mut pipeline = pipeline(source, &serial, 2);

        assert!(pipeline.create_resources());
        pipeline.take_samples();

        let blue = PackedColor::new(0, 0, 255, 0xFF);
        assert_eq!(pipeline.led_states(), &[blue, blue, neutral(), neutral()]);
    }

    #[test]
    fn failed_open_leaves_pipeline_idle() {
        let serial = RecordingTransport::default();
        let mut source = SolidSource::new([0; 4]);
        source.open_error = Some(CaptureError::Unavailable("locked".to_string()));
        let mut pipeline = pipeline(source, &serial, 1);

        assert!(!pipeline.create_resources());
        assert!(!pipeline.is_acquired());
    }

    #[test]
    fn render_and_send_writes_the_serial_frame() {
        let serial = RecordingTransport::default();
        let mut pipeline = pipeline(SolidSource::new([0, 0, 255, 255]), &serial, 1);

        assert!(pipeline.open_outputs());
        pipeline.create_resources();
        pipeline.take_samples();
        pipeline.render();
        pipeline.send();

        let header = WireBuffer::ada(2).header().to_vec();
        assert_eq!(serial.sent(), vec![[header.as_slice(), &[255, 0, 0, 255, 0, 0]].concat()]);
    }

    #[test]
    fn without_resources_frames_are_cleared() {
        let serial = RecordingTransport::default();
        let mut pipeline = pipeline(SolidSource::new([0, 0, 255, 255]), &serial, 1);

        pipeline.open_outputs();
        pipeline.create_resources();
        pipeline.take_samples();
        pipeline.render();
        pipeline.free_resources();
        pipeline.render();
        pipeline.send();

        let header = WireBuffer::ada(2).header().to_vec();
        assert_eq!(serial.sent(), vec![[header.as_slice(), &[0; 6]].concat()]);
    }

    #[test]
    fn all_off_goes_out_even_with_resources() {
        let serial = RecordingTransport::default();
        let mut pipeline = pipeline(SolidSource::new([255, 255, 255, 255]), &serial, 1);

        pipeline.open_outputs();
        pipeline.create_resources();
        pipeline.take_samples();
        pipeline.render();
        pipeline.send_all_off();

        let frames = serial.sent();
        assert_eq!(frames.len(), 1);
        assert!(frames[0][6..].iter().all(|&b| b == 0));
    }

    #[test]
    fn outputs_report_open_state() {
        let mut offline = AmbientPipeline::new(
            test_settings(1),
            Box::new(SolidSource::new([0; 4])),
            Some(Box::new(RecordingTransport::offline())),
            OpcPool::from_transports(vec![Box::new(RecordingTransport::offline())]),
        );
        assert!(!offline.open_outputs());
        assert!(!offline.serial_open());
        assert_eq!(offline.opc_open_count(), 0);

        let mut preview_only = AmbientPipeline::new(
            test_settings(1),
            Box::new(SolidSource::new([0; 4])),
            None,
            OpcPool::from_transports(Vec::new()),
        );
        assert!(preview_only.open_outputs());
    }

    #[test]
    fn frame_rate_is_kept_after_release() {
        let serial = RecordingTransport::default();
        let mut pipeline = pipeline(SolidSource::new([0, 0, 255, 255]), &serial, 1);

        assert_eq!(pipeline.frame_rate(), None);
        pipeline.create_resources();
        for _ in 0..3 {
            pipeline.take_samples();
        }
        std::thread::sleep(Duration::from_millis(5));
        pipeline.free_resources();

        assert!(pipeline.frame_rate().is_some_and(|fps| fps > 0.0));
    }
}
