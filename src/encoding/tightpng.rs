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

//! Tight encoding, PNG sub-format only.
//!
//! The rectangle body is a compression-control byte selecting PNG, the
//! Tight compact length, and a complete PNG image (8-bit RGB, no alpha).
//! Lossless, and decodable natively by browser clients such as noVNC.

use bytes::{BufMut, BytesMut};
use std::io;

use crate::protocol::TIGHT_PNG;

/// Encodes the rectangle as a PNG-bodied Tight rectangle.
///
/// The image is built straight from the RGBX32 source; PNG fixes the pixel
/// layout, so the client's negotiated pixel format does not apply here.
///
/// # Errors
///
/// Returns an error if the PNG encoder fails.
pub fn encode(fb: &[u8], fb_width: u16, x: u16, y: u16, w: u16, h: u16) -> io::Result<BytesMut> {
    let fb_width = usize::from(fb_width);
    let mut rgb = Vec::with_capacity(usize::from(w) * usize::from(h) * 3);
    for ypos in usize::from(y)..usize::from(y) + usize::from(h) {
        for xpos in usize::from(x)..usize::from(x) + usize::from(w) {
            let idx = (xpos + ypos * fb_width) * 4;
            rgb.extend_from_slice(&fb[idx..idx + 3]);
        }
    }

    let mut png_data = Vec::new();
    {
        let mut encoder = png::Encoder::new(&mut png_data, u32::from(w), u32::from(h));
        encoder.set_color(png::ColorType::Rgb);
        encoder.set_depth(png::BitDepth::Eight);
        encoder.set_compression(png::Compression::Default);
        let mut writer = encoder.write_header()?;
        writer.write_image_data(&rgb)?;
    }

    let mut body = BytesMut::with_capacity(4 + png_data.len());
    body.put_u8(TIGHT_PNG << 4); // compression control: PNG sub-format
    put_compact_len(&mut body, png_data.len());
    body.put_slice(&png_data);
    Ok(body)
}

/// Writes the Tight variable-length size header.
///
/// 7-bit groups, least significant first; the continuation bit (0x80) is
/// set on every byte except the last. One byte covers lengths below 128,
/// two below 16384, three for anything larger.
#[allow(clippy::cast_possible_truncation)] // masked to 7-bit groups
pub(crate) fn put_compact_len(buf: &mut BytesMut, len: usize) {
    if len < 128 {
        buf.put_u8(len as u8);
    } else if len < 16384 {
        buf.put_u8(((len & 0x7F) | 0x80) as u8);
        buf.put_u8((len >> 7) as u8);
    } else {
        buf.put_u8(((len & 0x7F) | 0x80) as u8);
        buf.put_u8((((len >> 7) & 0x7F) | 0x80) as u8);
        buf.put_u8((len >> 14) as u8);
    }
}
