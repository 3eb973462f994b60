//! Frame assembly: LED states in, one wire buffer per destination out.
//!
//! The serial strand and every OPC channel are peers in one destination list,
//! each with its own buffer. All of them render from the same pre-gamma LED
//! states, so a frozen LED looks frozen everywhere.

use crate::PackedColor;
use crate::config::{OpcChannel, OpcServer, Settings};
use crate::gamma::GammaTable;
use crate::mapping::ChannelMapping;
use crate::wire::WireBuffer;

/// Where a destination's buffer is sent.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Target {
    Serial,
    /// Index into the configured OPC servers.
    Opc { server: usize },
}

#[derive(Clone, Debug)]
pub struct Destination {
    target: Target,
    /// `None` for the serial strand, which takes LEDs one to one.
    mapping: Option<ChannelMapping>,
    buffer: WireBuffer,
}

impl Destination {
    pub fn serial(led_count: usize) -> Self {
        Self {
            target: Target::Serial,
            mapping: None,
            buffer: WireBuffer::ada(led_count),
        }
    }

    pub fn opc(server_index: usize, server: &OpcServer, channel: &OpcChannel, led_bases: &[usize]) -> Self {
        let mapping = ChannelMapping::new(channel, led_bases);
        let pixels = mapping.total_pixel_count();
        let buffer = if server.alpha_channel {
            WireBuffer::opc_alpha(channel.channel, pixels)
        } else {
            WireBuffer::opc(channel.channel, pixels)
        };

        Self {
            target: Target::Opc {
                server: server_index,
            },
            mapping: Some(mapping),
            buffer,
        }
    }

    pub fn target(&self) -> Target {
        self.target
    }

    pub fn buffer(&self) -> &WireBuffer {
        &self.buffer
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    fn render(&mut self, states: &[PackedColor], gamma: &GammaTable) {
        self.buffer.clear();

        match &self.mapping {
            None => {
                for state in states {
                    if !self.buffer.push(gamma.correct(state.rgb())) {
                        break;
                    }
                }
            }
            Some(mapping) => {
                for pixel in mapping.render(states) {
                    self.buffer.push_rgba(gamma.correct(pixel.rgb()), pixel.a());
                }
            }
        }
    }
}

/// Every configured destination, in a fixed order: serial first, then OPC
/// channels server by server.
#[derive(Clone, Debug, Default)]
pub struct FrameAssembler {
    destinations: Vec<Destination>,
}

impl FrameAssembler {
    pub fn new(destinations: Vec<Destination>) -> Self {
        Self { destinations }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        let mut destinations = Vec::new();

        if settings.serial.enabled {
            destinations.push(Destination::serial(settings.total_led_count()));
        }

        let bases = settings.led_bases();
        for (index, server) in settings.servers.iter().enumerate() {
            for channel in &server.channels {
                destinations.push(Destination::opc(index, server, channel, &bases));
            }
        }

        Self { destinations }
    }

    pub fn destinations(&self) -> &[Destination] {
        &self.destinations
    }

    /// Rewrite every buffer from the current LED states.
    pub fn assemble(&mut self, states: &[PackedColor], gamma: &GammaTable) {
        for destination in &mut self.destinations {
            destination.render(states, gamma);
        }
    }

    /// Zero every payload.
    pub fn clear(&mut self) {
        for destination in &mut self.destinations {
            destination.clear();
        }
    }

    /// Zero the serial payload only.
    pub fn clear_serial(&mut self) {
        for destination in &mut self.destinations {
            if destination.target == Target::Serial {
                destination.clear();
            }
        }
    }

    pub fn serial(&self) -> Option<&WireBuffer> {
        self.destinations
            .iter()
            .find(|d| d.target == Target::Serial)
            .map(Destination::buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Color;
    use crate::config::tests::example_server;
    use pretty_assertions::assert_eq;

    fn states(values: &[u8]) -> Vec<PackedColor> {
        values.iter().map(|&v| PackedColor::new(v, v, v, 0xFF)).collect()
    }

    #[test]
    fn serial_writes_gamma_corrected_states_in_strand_order() {
        let gamma = GammaTable::new();
        let mut assembler = FrameAssembler::new(vec![Destination::serial(3)]);

        assembler.assemble(&states(&[128, 64, 255]), &gamma);

        let buffer = assembler.serial().unwrap();
        assert_eq!(buffer.header(), WireBuffer::ada(3).header());
        assert_eq!(
            buffer.payload(),
            &[37, 34, 31, 5, 5, 4, 255, 240, 220]
        );
    }

    #[test]
    fn opc_channel_uses_its_mapping() {
        let gamma = GammaTable::new();
        let server = example_server();
        let mut destination = Destination::opc(0, &server, &server.channels[0], &[0]);
        assert_eq!(destination.target(), Target::Opc { server: 0 });

        let leds = states(&[255; 24]);
        destination.render(&leds, &gamma);

        let buffer = destination.buffer();
        assert_eq!(buffer.header(), &[2, 0, 0x01, 0x5C]);
        // LED-backed pixels at full white; the gap stays dark
        assert_eq!(&buffer.payload()[..3], &[255, 240, 220]);
        assert_eq!(&buffer.payload()[64 * 3..68 * 3], &[0; 12]);
    }

    #[test]
    fn alpha_server_gets_rgba_frames() {
        let gamma = GammaTable::new();
        let mut server = example_server();
        server.alpha_channel = true;
        let mut destination = Destination::opc(0, &server, &server.channels[0], &[0]);

        destination.render(&states(&[255; 24]), &gamma);

        let payload = destination.buffer().payload();
        assert_eq!(&payload[..4], &[255, 240, 220, 0xFF]);
        // The gap is transparent black
        assert_eq!(&payload[64 * 4..64 * 4 + 4], &[0, 0, 0, 0]);
    }

    #[test]
    fn from_settings_orders_serial_then_channels() {
        let mut settings = Settings::default();
        settings.servers = vec![example_server(), example_server()];

        let assembler = FrameAssembler::from_settings(&settings);
        let targets: Vec<Target> = assembler.destinations().iter().map(Destination::target).collect();

        assert_eq!(
            targets,
            vec![
                Target::Serial,
                Target::Opc { server: 0 },
                Target::Opc { server: 1 },
            ]
        );
        assert_eq!(assembler.serial().unwrap().pixel_count(), 24);
    }

    #[test]
    fn disabled_serial_has_no_serial_destination() {
        let mut settings = Settings::default();
        settings.serial.enabled = false;

        let assembler = FrameAssembler::from_settings(&settings);
        assert!(assembler.serial().is_none());
        assert!(assembler.destinations().is_empty());
    }

    #[test]
    fn clear_serial_leaves_opc_frames() {
        let gamma = GammaTable::new();
        let mut settings = Settings::default();
        settings.servers = vec![example_server()];
        let mut assembler = FrameAssembler::from_settings(&settings);

        assembler.assemble(&states(&[200; 24]), &gamma);
        assembler.clear_serial();

        let [serial, opc] = assembler.destinations() else {
            panic!("expected two destinations");
        };
        assert!(serial.buffer().payload().iter().all(|&b| b == 0));
        assert!(opc.buffer().payload().iter().any(|&b| b != 0));

        assembler.clear();
        assert!(assembler.destinations()[1].buffer().payload().iter().all(|&b| b == 0));
    }

    #[test]
    fn short_state_list_leaves_rest_of_strand_dark() {
        let gamma = GammaTable::new();
        let mut assembler = FrameAssembler::new(vec![Destination::serial(2)]);
        assembler.assemble(&[PackedColor::opaque(Color::new(255, 255, 255))], &gamma);

        assert_eq!(assembler.serial().unwrap().payload(), &[255, 240, 220, 0, 0, 0]);
    }
}
