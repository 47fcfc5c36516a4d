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

//! Raw encoding: packed pixels, no compression.
//!
//! High bandwidth but universally supported; this is the fallback when the
//! client lists no compressed encoding the server knows.

use bytes::BytesMut;

use crate::protocol::PixelFormat;

/// Packs the rectangle into the client's pixel format. The body is exactly
/// `w * h * bytes_per_pixel` bytes, row-major.
pub fn encode(
    fb: &[u8],
    fb_width: u16,
    x: u16,
    y: u16,
    w: u16,
    h: u16,
    format: &PixelFormat,
) -> BytesMut {
    let mut body =
        BytesMut::with_capacity(usize::from(w) * usize::from(h) * format.bytes_per_pixel());
    format.render_rect(fb, fb_width, x, y, w, h, &mut body);
    body
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_is_packed_rect() {
        let mut fb = vec![0u8; 8 * 8 * 4];
        // blue pixel at (2, 1)
        fb[(2 + 8) * 4 + 2] = 255;

        let pf = PixelFormat::default();
        let body = encode(&fb, 8, 2, 1, 2, 1, &pf);
        assert_eq!(body.len(), 2 * 4);
        assert_eq!(&body[..4], [0x00, 0x00, 0x00, 0xFF]); // blue at shift 0, big-endian
        assert_eq!(&body[4..], [0x00, 0x00, 0x00, 0x00]);
    }
}
