// Copyright 2025 The rfbd Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! RFB protocol constants, the pixel format codec, and wire structures.
//!
//! The RFB protocol operates in the following phases:
//! 1. **Protocol Version** - Server and client agree on protocol version
//! 2. **Security Handshake** - Authentication method selection and execution
//! 3. **Initialization** - Exchange of framebuffer parameters and capabilities
//! 4. **Normal Operation** - Ongoing message exchange for input events and
//!    screen updates
//!
//! [`PixelFormat`] carries the negotiated pixel layout and does all of the
//! pixel packing for the encoders: channel scaling, bit shifting, byte-order
//! correction, and the compact CPIXEL form used by ZRLE.

use bytes::{Buf, BufMut, BytesMut};

/// The RFB protocol version string advertised by the server.
///
/// Must be exactly 12 bytes including the trailing newline; the client is
/// required to echo it back verbatim.
pub const PROTOCOL_VERSION: &str = "RFB 003.008\n";

// Client-to-Server Message Types

/// Message type: client changes the pixel format used for updates.
pub const CLIENT_MSG_SET_PIXEL_FORMAT: u8 = 0;

/// Message type: client lists its supported encodings in preference order.
pub const CLIENT_MSG_SET_ENCODINGS: u8 = 2;

/// Message type: client requests a framebuffer update for a region.
pub const CLIENT_MSG_FRAMEBUFFER_UPDATE_REQUEST: u8 = 3;

/// Message type: client key press or release.
pub const CLIENT_MSG_KEY_EVENT: u8 = 4;

/// Message type: client pointer position and button state.
pub const CLIENT_MSG_POINTER_EVENT: u8 = 5;

/// Message type: client clipboard text. Recognized only so the payload can
/// be drained; clipboard transfer is not supported.
pub const CLIENT_MSG_CLIENT_CUT_TEXT: u8 = 6;

// Server-to-Client Message Types

/// Message type: server framebuffer update (one or more rectangles).
pub const SERVER_MSG_FRAMEBUFFER_UPDATE: u8 = 0;

/// Message type: server bell (audible alert), a single byte.
pub const SERVER_MSG_BELL: u8 = 2;

// Encoding Types

/// Encoding type: raw pixel data, no compression.
pub const ENCODING_RAW: i32 = 0;

/// Encoding type: zlib-compressed raw pixel data over a persistent stream.
pub const ENCODING_ZLIB: i32 = 6;

/// Encoding type: Tight. This server only produces the PNG sub-format, but
/// Tight is what gets advertised in the rectangle header.
pub const ENCODING_TIGHT: i32 = 7;

/// Encoding type: ZRLE (zlib-compressed tiled encoding).
pub const ENCODING_ZRLE: i32 = 16;

/// Encoding type: `TightPng`, a Tight variant carrying only PNG payloads.
///
/// Internal sentinel: a client that lists it gets Tight rectangles with PNG
/// bodies, with [`ENCODING_TIGHT`] in the wire header.
pub const ENCODING_TIGHTPNG: i32 = -260;

/// Pseudo-encoding: the client can handle server-initiated desktop resizes.
pub const ENCODING_DESKTOP_SIZE: i32 = -223;

/// Tight compression-control nibble selecting the PNG sub-format.
pub const TIGHT_PNG: u8 = 0x0A;

// Security Types

/// Security type: no authentication required.
pub const SECURITY_TYPE_NONE: u8 = 1;

/// Security type: VNC authentication (DES challenge-response).
pub const SECURITY_TYPE_VNC_AUTH: u8 = 2;

// Security Results

/// Security result: handshake succeeded.
pub const SECURITY_RESULT_OK: u32 = 0;

/// Security result: handshake failed; a reason string follows.
pub const SECURITY_RESULT_FAILED: u32 = 1;

/// Describes how an RGB pixel is packed into a wire pixel word.
///
/// The format is session state: it starts at the server default and may be
/// replaced at any time in steady state by a `SetPixelFormat` message. All
/// rectangle encoders pack pixels through this struct.
///
/// The channel layout is taken on trust: shifts and maxima that overlap or
/// spill past `bits_per_pixel` produce wrong pixel values, not errors. That
/// matches how deployed clients are treated in practice, since a client that
/// sends a nonsense format only corrupts its own picture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelFormat {
    /// Size of a wire pixel word in bits: 8, 16, or 32.
    pub bits_per_pixel: u8,
    /// Number of meaningful bits within the word. Drives the CPIXEL width.
    pub depth: u8,
    /// True if multi-byte pixel words are sent big-endian.
    pub big_endian: bool,
    /// True for true-colour formats (the only kind this server produces).
    pub true_colour: bool,
    /// Maximum red value.
    pub red_max: u16,
    /// Maximum green value.
    pub green_max: u16,
    /// Maximum blue value.
    pub blue_max: u16,
    /// Bit position of the red channel within the pixel word.
    pub red_shift: u8,
    /// Bit position of the green channel within the pixel word.
    pub green_shift: u8,
    /// Bit position of the blue channel within the pixel word.
    pub blue_shift: u8,
}

impl Default for PixelFormat {
    /// The server default: 32-bit true colour, depth 24, big-endian wire
    /// order, 8 bits per channel at shifts (16, 8, 0).
    fn default() -> Self {
        Self {
            bits_per_pixel: 32,
            depth: 24,
            big_endian: true,
            true_colour: true,
            red_max: 255,
            green_max: 255,
            blue_max: 255,
            red_shift: 16,
            green_shift: 8,
            blue_shift: 0,
        }
    }
}

impl PixelFormat {
    /// Bytes occupied by one full pixel word.
    #[must_use]
    pub fn bytes_per_pixel(&self) -> usize {
        usize::from(self.bits_per_pixel / 8)
    }

    /// Bytes occupied by one compact CPIXEL (the ZRLE pixel form).
    #[must_use]
    pub fn bytes_per_cpixel(&self) -> usize {
        usize::from(self.depth / 8)
    }

    /// Serializes into the fixed 16-byte wire layout.
    ///
    /// The 16-bit channel maxima always go out big-endian, regardless of the
    /// host byte order.
    pub fn write_to(&self, buf: &mut BytesMut) {
        buf.put_u8(self.bits_per_pixel);
        buf.put_u8(self.depth);
        buf.put_u8(u8::from(self.big_endian));
        buf.put_u8(u8::from(self.true_colour));
        buf.put_u16(self.red_max);
        buf.put_u16(self.green_max);
        buf.put_u16(self.blue_max);
        buf.put_u8(self.red_shift);
        buf.put_u8(self.green_shift);
        buf.put_u8(self.blue_shift);
        buf.put_bytes(0, 3); // padding
    }

    /// Serializes into a 16-byte array. See [`PixelFormat::write_to`].
    #[must_use]
    pub fn to_wire(&self) -> [u8; 16] {
        let mut buf = BytesMut::with_capacity(16);
        self.write_to(&mut buf);
        let mut out = [0u8; 16];
        out.copy_from_slice(&buf);
        out
    }

    /// Deserializes from the 16-byte wire layout.
    ///
    /// Returns `None` unless `raw` is exactly 16 bytes. The caller keeps the
    /// previous format in that case; a malformed `SetPixelFormat` body is
    /// ignored rather than treated as a protocol violation.
    #[must_use]
    pub fn from_wire(raw: &[u8]) -> Option<Self> {
        if raw.len() != 16 {
            return None;
        }
        let mut buf = &raw[..];
        let pf = Self {
            bits_per_pixel: buf.get_u8(),
            depth: buf.get_u8(),
            big_endian: buf.get_u8() != 0,
            true_colour: buf.get_u8() != 0,
            red_max: buf.get_u16(),
            green_max: buf.get_u16(),
            blue_max: buf.get_u16(),
            red_shift: buf.get_u8(),
            green_shift: buf.get_u8(),
            blue_shift: buf.get_u8(),
        };
        Some(pf)
    }

    /// Packs an 8-bit RGB triple into a host-order pixel word.
    ///
    /// Each channel is scaled from 0..=255 down to the format's maximum and
    /// shifted into position.
    #[must_use]
    pub fn pack(&self, r: u8, g: u8, b: u8) -> u32 {
        let r = u32::from(r) * u32::from(self.red_max) / 255;
        let g = u32::from(g) * u32::from(self.green_max) / 255;
        let b = u32::from(b) * u32::from(self.blue_max) / 255;
        (r << self.red_shift) | (g << self.green_shift) | (b << self.blue_shift)
    }

    /// Packs one pixel and appends the full `bits_per_pixel / 8` byte word.
    ///
    /// Multi-byte words are emitted in the format's byte order; single-byte
    /// pixels never need correction.
    pub fn put_pixel(&self, buf: &mut BytesMut, r: u8, g: u8, b: u8) {
        self.put_scaled(buf, r, g, b, self.bytes_per_pixel());
    }

    /// Packs one pixel in the compact CPIXEL form: identical scaling and
    /// shifting, but only the first `depth / 8` bytes of the word go out.
    pub fn put_cpixel(&self, buf: &mut BytesMut, r: u8, g: u8, b: u8) {
        self.put_scaled(buf, r, g, b, self.bytes_per_cpixel());
    }

    #[allow(clippy::cast_possible_truncation)] // word narrowed to the wire pixel width
    fn put_scaled(&self, buf: &mut BytesMut, r: u8, g: u8, b: u8, nbytes: usize) {
        let word = self.pack(r, g, b);
        match self.bits_per_pixel {
            8 => buf.put_u8(word as u8),
            16 => {
                let bytes = if self.big_endian {
                    (word as u16).to_be_bytes()
                } else {
                    (word as u16).to_le_bytes()
                };
                buf.put_slice(&bytes[..nbytes.min(2)]);
            }
            32 => {
                let bytes = if self.big_endian {
                    word.to_be_bytes()
                } else {
                    word.to_le_bytes()
                };
                buf.put_slice(&bytes[..nbytes.min(4)]);
            }
            _ => {} // unsupported width, emit nothing
        }
    }

    /// Renders a rectangle of an RGBX32 source image as packed pixels.
    ///
    /// The source is row-major with 4 bytes per pixel (red, green, blue,
    /// padding). Output is row-major packed pixels, exactly
    /// `w * h * bytes_per_pixel()` bytes appended to `out`. The rectangle
    /// must lie within the source image.
    pub fn render_rect(
        &self,
        fb: &[u8],
        fb_width: u16,
        x: u16,
        y: u16,
        w: u16,
        h: u16,
        out: &mut BytesMut,
    ) {
        self.render(fb, fb_width, x, y, w, h, out, false);
    }

    /// Like [`PixelFormat::render_rect`], but emits CPIXELs. Used by ZRLE
    /// tiles; output is `w * h * bytes_per_cpixel()` bytes.
    pub fn render_rect_cpixel(
        &self,
        fb: &[u8],
        fb_width: u16,
        x: u16,
        y: u16,
        w: u16,
        h: u16,
        out: &mut BytesMut,
    ) {
        self.render(fb, fb_width, x, y, w, h, out, true);
    }

    #[allow(clippy::too_many_arguments)]
    fn render(
        &self,
        fb: &[u8],
        fb_width: u16,
        x: u16,
        y: u16,
        w: u16,
        h: u16,
        out: &mut BytesMut,
        compact: bool,
    ) {
        let fb_width = usize::from(fb_width);
        debug_assert!(
            w == 0
                || h == 0
                || fb.len()
                    >= (usize::from(y) + usize::from(h) - 1) * fb_width * 4
                        + (usize::from(x) + usize::from(w)) * 4,
            "rectangle reads past the end of the source image"
        );
        for ypos in usize::from(y)..usize::from(y) + usize::from(h) {
            for xpos in usize::from(x)..usize::from(x) + usize::from(w) {
                let idx = (xpos + ypos * fb_width) * 4;
                let (r, g, b) = (fb[idx], fb[idx + 1], fb[idx + 2]);
                if compact {
                    self.put_cpixel(out, r, g, b);
                } else {
                    self.put_pixel(out, r, g, b);
                }
            }
        }
    }
}

/// The `ServerInit` message sent once security negotiation completes.
#[derive(Debug, Clone)]
pub struct ServerInit {
    /// Framebuffer width in pixels.
    pub width: u16,
    /// Framebuffer height in pixels.
    pub height: u16,
    /// The server's native pixel format.
    pub pixel_format: PixelFormat,
    /// Desktop name shown in the client's title bar.
    pub name: String,
}

impl ServerInit {
    /// Serializes the message: width, height, 16-byte pixel format, 4-byte
    /// name length, then the name bytes.
    #[allow(clippy::cast_possible_truncation)] // name length is u32 on the wire
    pub fn write_to(&self, buf: &mut BytesMut) {
        buf.put_u16(self.width);
        buf.put_u16(self.height);
        self.pixel_format.write_to(buf);
        let name = self.name.as_bytes();
        buf.put_u32(name.len() as u32);
        buf.put_slice(name);
    }
}

/// A rectangle header within a framebuffer update message.
#[derive(Debug, Clone, Copy)]
pub struct Rectangle {
    /// X coordinate of the top-left corner.
    pub x: u16,
    /// Y coordinate of the top-left corner.
    pub y: u16,
    /// Width in pixels.
    pub width: u16,
    /// Height in pixels.
    pub height: u16,
    /// Encoding of the pixel data that follows (signed; pseudo-encodings
    /// are negative).
    pub encoding: i32,
}

impl Rectangle {
    /// Writes the 12-byte rectangle header: 8 bytes of geometry plus the
    /// signed 32-bit encoding code.
    pub fn write_header(&self, buf: &mut BytesMut) {
        buf.put_u16(self.x);
        buf.put_u16(self.y);
        buf.put_u16(self.width);
        buf.put_u16(self.height);
        buf.put_i32(self.encoding);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn little_endian_rgb888() -> PixelFormat {
        PixelFormat {
            big_endian: false,
            ..PixelFormat::default()
        }
    }

    #[test]
    fn default_format_wire_layout() {
        let wire = PixelFormat::default().to_wire();
        assert_eq!(
            wire,
            [32, 24, 1, 1, 0, 255, 0, 255, 0, 255, 16, 8, 0, 0, 0, 0]
        );
    }

    #[test]
    fn wire_roundtrip_preserves_every_field() {
        let pf = PixelFormat {
            bits_per_pixel: 16,
            depth: 16,
            big_endian: false,
            true_colour: true,
            red_max: 31,
            green_max: 63,
            blue_max: 31,
            red_shift: 11,
            green_shift: 5,
            blue_shift: 0,
        };
        let back = PixelFormat::from_wire(&pf.to_wire()).unwrap();
        assert_eq!(pf, back);
    }

    #[test]
    fn from_wire_rejects_wrong_length() {
        assert!(PixelFormat::from_wire(&[0u8; 15]).is_none());
        assert!(PixelFormat::from_wire(&[0u8; 17]).is_none());
        assert!(PixelFormat::from_wire(&[]).is_none());
    }

    #[test]
    fn primary_colors_pack_to_distinct_words() {
        let pf = PixelFormat::default();
        let red = pf.pack(255, 0, 0);
        let green = pf.pack(0, 255, 0);
        let blue = pf.pack(0, 0, 255);
        assert_eq!(red, 0x00FF_0000);
        assert_eq!(green, 0x0000_FF00);
        assert_eq!(blue, 0x0000_00FF);
        assert_ne!(red, green);
        assert_ne!(green, blue);
    }

    #[test]
    fn pack_scales_channels_to_format_maxima() {
        let rgb565 = PixelFormat {
            bits_per_pixel: 16,
            depth: 16,
            big_endian: false,
            true_colour: true,
            red_max: 31,
            green_max: 63,
            blue_max: 31,
            red_shift: 11,
            green_shift: 5,
            blue_shift: 0,
        };
        assert_eq!(rgb565.pack(255, 0, 0), 0xF800);
        assert_eq!(rgb565.pack(0, 255, 0), 0x07E0);
        assert_eq!(rgb565.pack(255, 255, 255), 0xFFFF);
    }

    #[test]
    fn put_pixel_honours_byte_order() {
        let mut be = BytesMut::new();
        PixelFormat::default().put_pixel(&mut be, 255, 0, 0);
        assert_eq!(&be[..], [0x00, 0xFF, 0x00, 0x00]);

        let mut le = BytesMut::new();
        little_endian_rgb888().put_pixel(&mut le, 255, 0, 0);
        assert_eq!(&le[..], [0x00, 0x00, 0xFF, 0x00]);
    }

    #[test]
    fn cpixel_is_depth_bytes_wide() {
        let pf = little_endian_rgb888();
        let mut buf = BytesMut::new();
        pf.put_cpixel(&mut buf, 10, 20, 30);
        // depth 24 -> 3 bytes; little-endian word (r<<16 | g<<8 | b)
        assert_eq!(&buf[..], [30, 20, 10]);
    }

    #[test]
    fn render_rect_output_is_exactly_sized() {
        let pf = PixelFormat::default();
        let fb = vec![0u8; 8 * 8 * 4];
        let mut out = BytesMut::new();
        pf.render_rect(&fb, 8, 1, 2, 3, 4, &mut out);
        assert_eq!(out.len(), 3 * 4 * pf.bytes_per_pixel());

        let mut compact = BytesMut::new();
        pf.render_rect_cpixel(&fb, 8, 1, 2, 3, 4, &mut compact);
        assert_eq!(compact.len(), 3 * 4 * pf.bytes_per_cpixel());
    }

    #[test]
    fn render_rect_reads_row_major_subrect() {
        // 4x2 image, each pixel's red channel encodes its index.
        let mut fb = vec![0u8; 4 * 2 * 4];
        for i in 0..8 {
            fb[i * 4] = i as u8;
        }
        let pf = little_endian_rgb888();
        let mut out = BytesMut::new();
        // 2x2 rect at (1, 0): indices 1, 2, 5, 6
        pf.render_rect(&fb, 4, 1, 0, 2, 2, &mut out);
        let reds: Vec<u8> = out.chunks_exact(4).map(|px| px[2]).collect();
        assert_eq!(reds, [1, 2, 5, 6]);
    }

    #[test]
    fn server_init_layout() {
        let init = ServerInit {
            width: 640,
            height: 480,
            pixel_format: PixelFormat::default(),
            name: "demo".to_string(),
        };
        let mut buf = BytesMut::new();
        init.write_to(&mut buf);
        assert_eq!(buf.len(), 2 + 2 + 16 + 4 + 4);
        assert_eq!(&buf[..4], [0x02, 0x80, 0x01, 0xE0]);
        assert_eq!(&buf[20..24], [0, 0, 0, 4]);
        assert_eq!(&buf[24..], &b"demo"[..]);
    }

    #[test]
    fn rectangle_header_layout() {
        let rect = Rectangle {
            x: 1,
            y: 2,
            width: 3,
            height: 4,
            encoding: ENCODING_DESKTOP_SIZE,
        };
        let mut buf = BytesMut::new();
        rect.write_header(&mut buf);
        assert_eq!(&buf[..8], [0, 1, 0, 2, 0, 3, 0, 4]);
        assert_eq!(&buf[8..], (-223i32).to_be_bytes());
    }
}
