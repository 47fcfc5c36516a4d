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

//! ZRLE encoding: 64x64 tiles of CPIXELs over the persistent stream.
//!
//! The rectangle is partitioned into tiles of at most 64x64 pixels, edge
//! tiles clipped to the remaining width and height. Every tile is one
//! sub-encoding byte plus its pixel data in the compact CPIXEL form; this
//! server always emits sub-encoding 0, the raw tile. Each tile is a
//! sync-flushed chunk of the session's ZRLE stream, and the concatenated
//! chunks are framed by one big-endian 32-bit total length.

use bytes::{BufMut, BytesMut};
use flate2::Compress;
use std::io;

use super::deflate_sync;
use crate::protocol::PixelFormat;

/// Maximum tile edge in pixels.
const TILE_SIZE: u16 = 64;

/// Raw-tile sub-encoding marker.
const SUBENCODING_RAW: u8 = 0;

/// The rectangle's tiles in row-major order: `(x, y, w, h)` each, at most
/// [`TILE_SIZE`] on a side, clipped at the right and bottom edges.
pub(crate) fn tile_rects(x: u16, y: u16, w: u16, h: u16) -> Vec<(u16, u16, u16, u16)> {
    let mut tiles = Vec::new();
    let mut ty = y;
    while ty < y + h {
        let th = TILE_SIZE.min(y + h - ty);
        let mut tx = x;
        while tx < x + w {
            let tw = TILE_SIZE.min(x + w - tx);
            tiles.push((tx, ty, tw, th));
            tx += tw;
        }
        ty += th;
    }
    tiles
}

/// Encodes the rectangle tile by tile through the persistent ZRLE stream.
///
/// # Errors
///
/// Returns an error if deflate fails on any tile.
#[allow(clippy::too_many_arguments)]
#[allow(clippy::cast_possible_truncation)] // compressed stream fits u32 framing
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
    let tiles = tile_rects(x, y, w, h);
    let mut compressed = BytesMut::new();
    let mut tile_buf = BytesMut::new();

    for &(tx, ty, tw, th) in &tiles {
        tile_buf.clear();
        tile_buf.put_u8(SUBENCODING_RAW);
        format.render_rect_cpixel(fb, fb_width, tx, ty, tw, th, &mut tile_buf);

        let chunk = deflate_sync(stream, &tile_buf)?;
        compressed.extend_from_slice(&chunk);
    }

    log::debug!(
        "ZRLE: {}x{} rect as {} tiles, {} compressed bytes",
        w,
        h,
        tiles.len(),
        compressed.len()
    );

    let mut body = BytesMut::with_capacity(4 + compressed.len());
    body.put_u32(compressed.len() as u32);
    body.extend_from_slice(&compressed);
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::{Compression, Decompress, FlushDecompress};

    #[test]
    fn tiles_partition_the_rect_exactly() {
        for (x, y, w, h) in [
            (0u16, 0u16, 64u16, 64u16),
            (0, 0, 100, 100),
            (3, 5, 130, 100),
            (10, 20, 1, 1),
            (0, 0, 65, 129),
        ] {
            let tiles = tile_rects(x, y, w, h);
            let mut covered = vec![0u8; usize::from(w) * usize::from(h)];
            for &(tx, ty, tw, th) in &tiles {
                assert!(tw <= TILE_SIZE && th <= TILE_SIZE);
                assert!(tw > 0 && th > 0);
                assert!(tx >= x && ty >= y);
                assert!(tx + tw <= x + w && ty + th <= y + h);
                for dy in 0..th {
                    for dx in 0..tw {
                        let col = usize::from(tx - x + dx);
                        let row = usize::from(ty - y + dy);
                        covered[row * usize::from(w) + col] += 1;
                    }
                }
            }
            assert!(
                covered.iter().all(|&n| n == 1),
                "rect ({x},{y},{w},{h}) has gaps or overlaps"
            );
        }
    }

    #[test]
    fn edge_tiles_are_clipped() {
        let tiles = tile_rects(0, 0, 100, 100);
        assert_eq!(
            tiles,
            vec![(0, 0, 64, 64), (64, 0, 36, 64), (0, 64, 64, 36), (64, 64, 36, 36)]
        );
    }

    #[test]
    fn decoded_tiles_reassemble_the_rect() {
        // Little-endian 32bpp depth-24 so a CPIXEL keeps all three channels.
        let pf = PixelFormat {
            big_endian: false,
            ..PixelFormat::default()
        };

        let (fb_w, fb_h) = (100u16, 100u16);
        let mut fb = vec![0u8; usize::from(fb_w) * usize::from(fb_h) * 4];
        for (i, px) in fb.chunks_exact_mut(4).enumerate() {
            px[0] = (i % 255) as u8;
            px[1] = (i / 7 % 255) as u8;
            px[2] = (i / 13 % 255) as u8;
        }

        let mut stream = Compress::new(Compression::default(), true);
        let body = encode(&fb, fb_w, 0, 0, fb_w, fb_h, &pf, &mut stream).unwrap();

        let total = u32::from_be_bytes(body[..4].try_into().unwrap()) as usize;
        assert_eq!(body.len(), 4 + total);

        // Inflate the whole tile stream in one go.
        let expected_len: usize = tile_rects(0, 0, fb_w, fb_h)
            .iter()
            .map(|&(_, _, tw, th)| 1 + usize::from(tw) * usize::from(th) * 3)
            .sum();
        let mut inflater = Decompress::new(true);
        let mut tile_stream = Vec::with_capacity(expected_len + 1024);
        inflater
            .decompress_vec(&body[4..], &mut tile_stream, FlushDecompress::Sync)
            .unwrap();
        assert_eq!(tile_stream.len(), expected_len);

        // Walk the tiles and rebuild the image.
        let mut rebuilt = vec![0u8; usize::from(fb_w) * usize::from(fb_h) * 3];
        let mut pos = 0usize;
        for (tx, ty, tw, th) in tile_rects(0, 0, fb_w, fb_h) {
            assert_eq!(tile_stream[pos], SUBENCODING_RAW);
            pos += 1;
            for dy in 0..usize::from(th) {
                for dx in 0..usize::from(tw) {
                    // little-endian CPIXEL: b, g, r
                    let (b, g, r) = (
                        tile_stream[pos],
                        tile_stream[pos + 1],
                        tile_stream[pos + 2],
                    );
                    pos += 3;
                    let col = usize::from(tx) + dx;
                    let row = usize::from(ty) + dy;
                    let out = (row * usize::from(fb_w) + col) * 3;
                    rebuilt[out] = r;
                    rebuilt[out + 1] = g;
                    rebuilt[out + 2] = b;
                }
            }
        }
        assert_eq!(pos, tile_stream.len());

        for (i, px) in fb.chunks_exact(4).enumerate() {
            assert_eq!(&rebuilt[i * 3..i * 3 + 3], &px[..3], "pixel {i}");
        }
    }
}
