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

//! Zlib encoding: packed pixels through the session's persistent stream.
//!
//! RFC 6143 requires one deflate stream per connection: each rectangle is
//! a sync-flushed chunk of that stream, and the client feeds every chunk to
//! a single inflater. Resetting the stream between rectangles desyncs the
//! dictionary and corrupts everything after the first update.

use bytes::{BufMut, BytesMut};
use flate2::Compress;
use std::io;

use super::deflate_sync;
use crate::protocol::PixelFormat;

/// Packs the rectangle, compresses it as one sync-flushed chunk of the
/// persistent stream, and frames it with a big-endian 32-bit length.
///
/// # Errors
///
/// Returns an error if deflate fails or cannot consume the rectangle in
/// one call.
#[allow(clippy::too_many_arguments)]
#[allow(clippy::cast_possible_truncation)] // compressed chunks fit u32 framing
pub fn encode(
    fb: &[u8],
    fb_width: u16,
    x: u16,
    y: u16,
    w: u16,
    h: u16,
    format: &PixelFormat,
    stream: &mut Compress,
) -> io::Result<BytesMut> {
    let mut pixels =
        BytesMut::with_capacity(usize::from(w) * usize::from(h) * format.bytes_per_pixel());
    format.render_rect(fb, fb_width, x, y, w, h, &mut pixels);

    let compressed = deflate_sync(stream, &pixels)?;

    let mut body = BytesMut::with_capacity(4 + compressed.len());
    body.put_u32(compressed.len() as u32);
    body.extend_from_slice(&compressed);
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::{Compression, Decompress, FlushDecompress};

    fn inflate_chunk(inflater: &mut Decompress, chunk: &[u8], expected_len: usize) -> Vec<u8> {
        let mut out = vec![0u8; expected_len + 64];
        let before = inflater.total_out();
        inflater
            .decompress(chunk, &mut out, FlushDecompress::Sync)
            .unwrap();
        out.truncate((inflater.total_out() - before) as usize);
        out
    }

    #[test]
    fn stream_state_survives_across_rectangles() {
        let mut fb = vec![0u8; 32 * 32 * 4];
        for (i, px) in fb.chunks_exact_mut(4).enumerate() {
            px[0] = (i % 251) as u8;
            px[1] = (i % 241) as u8;
            px[2] = (i % 239) as u8;
        }
        let pf = PixelFormat::default();
        let mut stream = Compress::new(Compression::default(), true);

        // One inflater must be able to decode two consecutive chunks, which
        // only works if the deflate dictionary carried over.
        let mut inflater = Decompress::new(true);
        for (x, y, w, h) in [(0u16, 0u16, 32u16, 16u16), (0, 16, 32, 16)] {
            let body = encode(&fb, 32, x, y, w, h, &pf, &mut stream).unwrap();
            let len = u32::from_be_bytes(body[..4].try_into().unwrap()) as usize;
            assert_eq!(body.len(), 4 + len);

            let mut expected = BytesMut::new();
            pf.render_rect(&fb, 32, x, y, w, h, &mut expected);
            let inflated = inflate_chunk(&mut inflater, &body[4..], expected.len());
            assert_eq!(&inflated[..], &expected[..]);
        }
    }
}
