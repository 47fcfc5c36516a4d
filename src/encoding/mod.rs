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

//! Rectangle encoders for framebuffer updates.
//!
//! Each update message carries exactly one rectangle, rendered in the
//! session's negotiated [`EncodingMode`]. The two deflate-based encodings
//! (Zlib and ZRLE) each keep a compression stream alive for the whole
//! session inside [`UpdateEncoder`]; the stream dictionary carries forward
//! across updates, so the same stream must see every rectangle, in order,
//! and must never be reset.

use bytes::{BufMut, BytesMut};
use flate2::{Compress, Compression, FlushCompress};
use std::io;

use crate::protocol::{
    PixelFormat, Rectangle, ENCODING_DESKTOP_SIZE, ENCODING_RAW, ENCODING_TIGHT,
    ENCODING_TIGHTPNG, ENCODING_ZLIB, ENCODING_ZRLE, SERVER_MSG_FRAMEBUFFER_UPDATE,
};

pub mod raw;
pub mod tightpng;
pub mod zlib;
pub mod zrle;

/// A pixel-data encoding this server can produce.
///
/// `TightPng` is the Tight encoding restricted to its PNG sub-format; the
/// rectangle header still advertises Tight, which is what clients dispatch
/// on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EncodingMode {
    /// Uncompressed packed pixels.
    #[default]
    Raw,
    /// Persistent-stream zlib over packed pixels.
    Zlib,
    /// Tight rectangles carrying PNG images.
    TightPng,
    /// 64x64 tiles of CPIXELs over a persistent zlib stream.
    Zrle,
}

impl EncodingMode {
    /// Picks the session encoding from the client's preference-ordered
    /// list: the first code naming a compressed mode wins, otherwise Raw.
    #[must_use]
    pub fn select(codes: &[i32]) -> Self {
        for &code in codes {
            if let EncodingCode::Pixel(mode) = EncodingCode::classify(code) {
                if mode != EncodingMode::Raw {
                    return mode;
                }
            }
        }
        EncodingMode::Raw
    }

    /// The encoding code written into rectangle headers.
    #[must_use]
    pub fn wire_code(self) -> i32 {
        match self {
            EncodingMode::Raw => ENCODING_RAW,
            EncodingMode::Zlib => ENCODING_ZLIB,
            EncodingMode::TightPng => ENCODING_TIGHT,
            EncodingMode::Zrle => ENCODING_ZRLE,
        }
    }

    /// Display name for status reporting.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            EncodingMode::Raw => "Raw",
            EncodingMode::Zlib => "Zlib",
            EncodingMode::TightPng => "Tight/PNG",
            EncodingMode::Zrle => "ZRLE",
        }
    }
}

/// A capability negotiated through the encoding list rather than a pixel
/// data format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PseudoEncoding {
    /// The client accepts server-initiated framebuffer resizes (-223).
    DesktopSize,
}

/// One entry of a client's encoding list, split by what it actually means.
///
/// Clients mix real encodings, capability pseudo-encodings, and codes this
/// server has never heard of into a single signed integer list; keeping
/// them in one integer domain invites mixups, so every list entry goes
/// through [`EncodingCode::classify`] before use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodingCode {
    /// A pixel-data encoding the server can produce.
    Pixel(EncodingMode),
    /// A recognized pseudo-encoding.
    Pseudo(PseudoEncoding),
    /// Anything else; kept verbatim for logging.
    Other(i32),
}

impl EncodingCode {
    /// Maps a raw wire code onto its meaning.
    #[must_use]
    pub fn classify(code: i32) -> Self {
        match code {
            ENCODING_RAW => EncodingCode::Pixel(EncodingMode::Raw),
            ENCODING_ZLIB => EncodingCode::Pixel(EncodingMode::Zlib),
            ENCODING_TIGHT | ENCODING_TIGHTPNG => EncodingCode::Pixel(EncodingMode::TightPng),
            ENCODING_ZRLE => EncodingCode::Pixel(EncodingMode::Zrle),
            ENCODING_DESKTOP_SIZE => EncodingCode::Pseudo(PseudoEncoding::DesktopSize),
            other => EncodingCode::Other(other),
        }
    }
}

/// Builds the fixed part of a framebuffer update message: message type,
/// padding, rectangle count 1, and the rectangle header.
pub(crate) fn update_message(x: u16, y: u16, w: u16, h: u16, encoding: i32) -> BytesMut {
    let mut buf = BytesMut::with_capacity(16);
    buf.put_u8(SERVER_MSG_FRAMEBUFFER_UPDATE);
    buf.put_u8(0); // padding
    buf.put_u16(1); // one rectangle per message
    Rectangle {
        x,
        y,
        width: w,
        height: h,
        encoding,
    }
    .write_header(&mut buf);
    buf
}

/// Runs `input` through a persistent deflate stream with a sync flush.
///
/// The flush emits exactly the bytes a decoder needs to reproduce this
/// chunk without ending the stream, so the dictionary survives into the
/// next call.
pub(crate) fn deflate_sync(stream: &mut Compress, input: &[u8]) -> io::Result<Vec<u8>> {
    // compressBound plus slack for the sync flush marker
    let mut output = vec![0u8; input.len() + input.len() / 1000 + 128];

    let before_in = stream.total_in();
    let before_out = stream.total_out();

    stream.compress(input, &mut output, FlushCompress::Sync)?;

    let consumed = (stream.total_in() - before_in) as usize;
    if consumed < input.len() {
        return Err(io::Error::new(
            io::ErrorKind::Other,
            format!("deflate consumed {consumed} of {} input bytes", input.len()),
        ));
    }

    let produced = (stream.total_out() - before_out) as usize;
    output.truncate(produced);
    Ok(output)
}

/// Renders dirty rectangles into complete framebuffer update messages.
///
/// Owns the session's two persistent compression streams, one for the Zlib
/// encoding and one for ZRLE. They are created once per session and die
/// with it; see the module docs for why they are never reset in between.
pub struct UpdateEncoder {
    zlib_stream: Compress,
    zrle_stream: Compress,
}

impl Default for UpdateEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl UpdateEncoder {
    /// Creates the encoder and initializes both compression streams.
    #[must_use]
    pub fn new() -> Self {
        Self {
            zlib_stream: Compress::new(Compression::default(), true),
            zrle_stream: Compress::new(Compression::default(), true),
        }
    }

    /// Encodes one dirty rectangle as a complete update message.
    ///
    /// Returns `Ok(None)` without touching either stream when the rectangle
    /// is empty or falls outside the `fb_width` x `fb_height` source; such
    /// requests are skipped, not errors.
    ///
    /// # Errors
    ///
    /// Returns an error if `fb` is shorter than the source dimensions
    /// require, or if compression or PNG encoding fails.
    #[allow(clippy::too_many_arguments)]
    pub fn encode_rect(
        &mut self,
        fb: &[u8],
        fb_width: u16,
        fb_height: u16,
        x: u16,
        y: u16,
        w: u16,
        h: u16,
        format: &PixelFormat,
        mode: EncodingMode,
    ) -> io::Result<Option<BytesMut>> {
        if w == 0
            || h == 0
            || u32::from(x) + u32::from(w) > u32::from(fb_width)
            || u32::from(y) + u32::from(h) > u32::from(fb_height)
        {
            return Ok(None);
        }

        let needed = usize::from(fb_width) * usize::from(fb_height) * 4;
        if fb.len() < needed {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("framebuffer is {} bytes, expected {needed}", fb.len()),
            ));
        }

        let mut message = update_message(x, y, w, h, mode.wire_code());

        let body = match mode {
            EncodingMode::Raw => raw::encode(fb, fb_width, x, y, w, h, format),
            EncodingMode::Zlib => {
                zlib::encode(fb, fb_width, x, y, w, h, format, &mut self.zlib_stream)?
            }
            EncodingMode::TightPng => tightpng::encode(fb, fb_width, x, y, w, h)?,
            EncodingMode::Zrle => {
                zrle::encode(fb, fb_width, x, y, w, h, format, &mut self.zrle_stream)?
            }
        };
        message.extend_from_slice(&body);

        Ok(Some(message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_prefers_first_compressed_mode() {
        assert_eq!(EncodingMode::select(&[]), EncodingMode::Raw);
        assert_eq!(EncodingMode::select(&[0]), EncodingMode::Raw);
        assert_eq!(EncodingMode::select(&[0, 6]), EncodingMode::Zlib);
        assert_eq!(EncodingMode::select(&[-239, 16, 6]), EncodingMode::Zrle);
        assert_eq!(EncodingMode::select(&[7, 16]), EncodingMode::TightPng);
        assert_eq!(EncodingMode::select(&[-260]), EncodingMode::TightPng);
        assert_eq!(EncodingMode::select(&[1, 5, -223]), EncodingMode::Raw);
    }

    #[test]
    fn tightpng_advertises_tight_on_the_wire() {
        assert_eq!(EncodingMode::TightPng.wire_code(), ENCODING_TIGHT);
    }

    #[test]
    fn classify_splits_real_and_pseudo_codes() {
        assert_eq!(
            EncodingCode::classify(-223),
            EncodingCode::Pseudo(PseudoEncoding::DesktopSize)
        );
        assert_eq!(
            EncodingCode::classify(16),
            EncodingCode::Pixel(EncodingMode::Zrle)
        );
        assert_eq!(EncodingCode::classify(-239), EncodingCode::Other(-239));
    }

    #[test]
    fn degenerate_and_out_of_bounds_rects_are_skipped() {
        let fb = vec![0u8; 16 * 16 * 4];
        let pf = PixelFormat::default();
        let mut enc = UpdateEncoder::new();

        for (x, y, w, h) in [
            (0, 0, 0, 4),
            (0, 0, 4, 0),
            (10, 0, 8, 4),
            (0, 13, 4, 4),
            (65535, 65535, 2, 2),
        ] {
            let out = enc
                .encode_rect(&fb, 16, 16, x, y, w, h, &pf, EncodingMode::Raw)
                .unwrap();
            assert!(out.is_none(), "rect ({x},{y},{w},{h}) was not skipped");
        }
    }

    #[test]
    fn undersized_framebuffer_is_an_error_not_a_panic() {
        let fb = vec![0u8; 16 * 16 * 4 - 4]; // one pixel short
        let pf = PixelFormat::default();
        let mut enc = UpdateEncoder::new();

        let err = enc
            .encode_rect(&fb, 16, 16, 0, 0, 16, 16, &pf, EncodingMode::Raw)
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn raw_update_message_shape() {
        let mut fb = vec![0u8; 4 * 4 * 4];
        for px in fb.chunks_exact_mut(4) {
            px[0] = 255; // all red
        }
        let pf = PixelFormat::default();
        let mut enc = UpdateEncoder::new();

        let msg = enc
            .encode_rect(&fb, 4, 4, 0, 0, 4, 4, &pf, EncodingMode::Raw)
            .unwrap()
            .unwrap();

        // type, pad, count 1, rect header (0,0,4,4) encoding 0
        assert_eq!(&msg[..16], [0, 0, 0, 1, 0, 0, 0, 0, 0, 4, 0, 4, 0, 0, 0, 0]);
        let payload = &msg[16..];
        assert_eq!(payload.len(), 4 * 4 * 4);
        for px in payload.chunks_exact(4) {
            assert_eq!(px, [0x00, 0xFF, 0x00, 0x00]); // big-endian all-red word
        }
    }
}
