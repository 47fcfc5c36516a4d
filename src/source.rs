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

//! The collaborator that supplies pixels and consumes input events.
//!
//! A [`FrameSource`] is the application side of a session: screen capture,
//! a synthetic test pattern, a virtual desktop. The session calls into it
//! inline between I/O suspension points, so implementations should not
//! block. Notifications in the opposite direction (framebuffer changed,
//! bell, resize) travel through [`crate::session::SessionHandle`].

/// Pixel and event source for one session, chosen when the session is
/// constructed.
///
/// All methods run on the session task. The getters are consulted during
/// the handshake (`required_password`, `session_title`, dimensions) and on
/// every rectangle update (`framebuffer_rgbx32`); the `on_*` callbacks fire
/// as client messages arrive, strictly in arrival order.
pub trait FrameSource: Send {
    /// The current framebuffer, row-major, 4 bytes per pixel: red, green,
    /// blue, padding. Must be `width() * height() * 4` bytes.
    fn framebuffer_rgbx32(&self) -> &[u8];

    /// Framebuffer width in pixels.
    fn width(&self) -> u16;

    /// Framebuffer height in pixels.
    fn height(&self) -> u16;

    /// Desktop name sent during initialization.
    fn session_title(&self) -> String;

    /// Password the client must authenticate with. An empty string selects
    /// the "no authentication" security type and skips the challenge.
    fn required_password(&self) -> String;

    /// The handshake completed and the session reached steady state.
    fn on_connected(&mut self) {}

    /// A key went down.
    fn on_key_down(&mut self, keysym: u32) {
        let _ = keysym;
    }

    /// A key went up.
    fn on_key_up(&mut self, keysym: u32) {
        let _ = keysym;
    }

    /// Pointer moved or buttons changed. Bit 0 of the mask is the left
    /// button, bit 1 middle, bit 2 right, bits 3/4 the scroll wheel.
    fn on_pointer(&mut self, x: u16, y: u16, button_mask: u8) {
        let _ = (x, y, button_mask);
    }

    /// Human-readable session status, reported as the session progresses
    /// and once on any fatal error. Logged at debug level by default.
    fn report_status(&mut self, status: &str) {
        log::debug!("session status: {status}");
    }
}
