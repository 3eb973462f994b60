//! Wire-format frame buffers.
//!
//! Every buffer is a fixed header followed by a flat pixel payload. The
//! header is written once at construction; per frame only the payload is
//! rewritten, through a write cursor that [`WireBuffer::clear`] rewinds.
//!
//! | format    | header                                              | payload       |
//! |-----------|-----------------------------------------------------|---------------|
//! | Ada       | `'A' 'd' 'a' countHi countLo countHi^countLo^0x55`  | RGB per LED   |
//! | OPC       | `channel 0 lenHi lenLo`                             | RGB per pixel |
//! | alpha OPC | `channel 255 lenHi lenLo 0x0B 0x0B`                 | RGBA          |

use crate::Color;

pub const ADA_MAGIC: [u8; 3] = *b"Ada";
pub const ADA_CHECKSUM_KEY: u8 = 0x55;

/// OPC "set pixel colors".
pub const OPC_SET_PIXELS: u8 = 0;
/// OPC "system exclusive"; the payload starts with a 16-bit system id.
pub const OPC_SYSTEM_EXCLUSIVE: u8 = 255;
/// System id of the RGBA extension.
pub const ALPHA_SYSTEM_ID: u16 = 0x0B0B;

/// Bytes per pixel in the payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelLayout {
    Rgb,
    Rgba,
}

impl PixelLayout {
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Rgb => 3,
            Self::Rgba => 4,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WireBuffer {
    bytes: Vec<u8>,
    header_len: usize,
    layout: PixelLayout,
    cursor: usize,
}

/// Big-endian 16-bit field. Callers validate that counts fit beforehand.
fn be16(value: usize) -> [u8; 2] {
    u16::try_from(value).unwrap_or(u16::MAX).to_be_bytes()
}

impl WireBuffer {
    fn with_header(header: &[u8], pixel_count: usize, layout: PixelLayout) -> Self {
        let mut bytes = Vec::with_capacity(header.len() + pixel_count * layout.bytes_per_pixel());
        bytes.extend_from_slice(header);
        bytes.resize(header.len() + pixel_count * layout.bytes_per_pixel(), 0);

        Self {
            bytes,
            header_len: header.len(),
            layout,
            cursor: header.len(),
        }
    }

    /// Serial frame for `led_count` LEDs. The header carries `led_count - 1`.
    pub fn ada(led_count: usize) -> Self {
        let [hi, lo] = be16(led_count.saturating_sub(1));
        let [a, d, a2] = ADA_MAGIC;
        let header = [a, d, a2, hi, lo, hi ^ lo ^ ADA_CHECKSUM_KEY];
        Self::with_header(&header, led_count, PixelLayout::Rgb)
    }

    /// Plain OPC frame: `pixel_count` RGB pixels on `channel`.
    pub fn opc(channel: u8, pixel_count: usize) -> Self {
        let [hi, lo] = be16(3 * pixel_count);
        let header = [channel, OPC_SET_PIXELS, hi, lo];
        Self::with_header(&header, pixel_count, PixelLayout::Rgb)
    }

    /// RGBA OPC frame. The length field also counts the two system id bytes.
    pub fn opc_alpha(channel: u8, pixel_count: usize) -> Self {
        let [hi, lo] = be16(2 + 4 * pixel_count);
        let [id_hi, id_lo] = ALPHA_SYSTEM_ID.to_be_bytes();
        let header = [channel, OPC_SYSTEM_EXCLUSIVE, hi, lo, id_hi, id_lo];
        Self::with_header(&header, pixel_count, PixelLayout::Rgba)
    }

    pub fn layout(&self) -> PixelLayout {
        self.layout
    }

    pub fn pixel_count(&self) -> usize {
        (self.bytes.len() - self.header_len) / self.layout.bytes_per_pixel()
    }

    /// Pixels written since the last [`clear`](Self::clear).
    pub fn written(&self) -> usize {
        (self.cursor - self.header_len) / self.layout.bytes_per_pixel()
    }

    /// Write the next pixel. RGBA buffers get an opaque alpha.
    ///
    /// Returns `false`, writing nothing, once the payload is full.
    pub fn push(&mut self, color: Color) -> bool {
        self.push_rgba(color, 0xFF)
    }

    /// Write the next pixel with an explicit alpha; RGB buffers drop it.
    pub fn push_rgba(&mut self, color: Color, alpha: u8) -> bool {
        let width = self.layout.bytes_per_pixel();
        let Some(slot) = self.bytes.get_mut(self.cursor..self.cursor + width) else {
            return false;
        };

        slot[0] = color.r;
        slot[1] = color.g;
        slot[2] = color.b;
        if let Some(a) = slot.get_mut(3) {
            *a = alpha;
        }

        self.cursor += width;
        true
    }

    /// Zero the payload and rewind the cursor. The header is untouched.
    pub fn clear(&mut self) {
        self.bytes[self.header_len..].fill(0);
        self.cursor = self.header_len;
    }

    pub fn header(&self) -> &[u8] {
        &self.bytes[..self.header_len]
    }

    pub fn payload(&self) -> &[u8] {
        &self.bytes[self.header_len..]
    }

    /// The whole frame, ready to write to a transport.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}
