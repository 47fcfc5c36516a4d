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


//! # rfbd
//!
//! An async implementation of the server side of the RFB (Remote Framebuffer)
//! protocol, better known as VNC.
//!
//! The crate is a protocol engine, not a screen grabber: it drives the
//! version/security handshake, the optional DES password challenge, pixel
//! format negotiation, and the steady-state message exchange for one client
//! connection, and it renders dirty rectangles into the negotiated wire
//! encoding (Raw, Zlib, Tight/PNG, or ZRLE). Where the pixels come from and
//! what key or pointer events mean is up to the embedding application, which
//! plugs in through the [`FrameSource`] trait.
//!
//! ## Quick Start
//!
//! ```no_run
//! use rfbd::{FrameSource, Server, SessionHandle};
//!
//! struct Flat {
//!     pixels: Vec<u8>,
//! }
//!
//! impl FrameSource for Flat {
//!     fn framebuffer_rgbx32(&self) -> &[u8] { &self.pixels }
//!     fn width(&self) -> u16 { 640 }
//!     fn height(&self) -> u16 { 480 }
//!     fn session_title(&self) -> String { "rfbd demo".into() }
//!     fn required_password(&self) -> String { String::new() }
//! }
//!
//! #[tokio::main]
//! async fn main() -> rfbd::Result<()> {
//!     let server = Server::new(|_handle: SessionHandle| -> Box<dyn FrameSource> {
//!         Box::new(Flat { pixels: vec![0; 640 * 480 * 4] })
//!     });
//!     server.listen("0.0.0.0:5900").await
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │          Your Application                │
//! │                                          │
//! │  • Implements FrameSource                │
//! │  • Pushes notifications via              │
//! │    SessionHandle (region/bell/resize)    │
//! └──────────────────┬───────────────────────┘
//!                    │
//!                    ▼
//! ┌──────────────────────────────────────────┐
//! │          Server (acceptor)               │
//! └──────────────────┬───────────────────────┘
//!                    │ one task per connection
//!        ┌───────────┼───────────┐
//!        ▼           ▼           ▼
//!   ┌─────────┐ ┌─────────┐ ┌─────────┐
//!   │Session 1│ │Session 2│ │Session N│
//!   └─────────┘ └─────────┘ └─────────┘
//!     handshake → auth → dispatch
//!     PixelFormat codec + UpdateEncoder
//!     (two persistent deflate streams each)
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod auth;
pub mod encoding;
pub mod error;
pub mod protocol;
pub mod server;
pub mod session;
pub mod source;

// Re-exports
pub use encoding::EncodingMode;
pub use error::{Result, RfbError};
pub use protocol::{PixelFormat, PROTOCOL_VERSION};
pub use server::Server;
pub use session::{Session, SessionHandle, SessionNotices, SessionState};
pub use source::FrameSource;

/// Default VNC port.
pub const DEFAULT_PORT: u16 = 5900;
