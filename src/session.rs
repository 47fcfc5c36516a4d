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

//! The per-connection protocol state machine.
//!
//! A [`Session`] owns one client stream and drives it through the RFB
//! handshake into steady state, where it multiplexes inbound client
//! messages with notifications pushed by the [`FrameSource`] side through a
//! [`SessionHandle`]. Everything runs on one task: messages are handled
//! strictly in arrival order, outbound bytes are written in the order they
//! are produced, and no locking is needed around session state.
//!
//! Failure model: transport errors and handshake violations are fatal and
//! end the session; malformed application data in steady state (unknown
//! message types, out-of-range update requests) is logged and ignored.

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use crate::auth;
use crate::encoding::{self, EncodingCode, EncodingMode, PseudoEncoding, UpdateEncoder};
use crate::error::{Result, RfbError};
use crate::protocol::{
    PixelFormat, ServerInit, CLIENT_MSG_CLIENT_CUT_TEXT, CLIENT_MSG_FRAMEBUFFER_UPDATE_REQUEST,
    CLIENT_MSG_KEY_EVENT, CLIENT_MSG_POINTER_EVENT, CLIENT_MSG_SET_ENCODINGS,
    CLIENT_MSG_SET_PIXEL_FORMAT, ENCODING_DESKTOP_SIZE, PROTOCOL_VERSION, SECURITY_RESULT_FAILED,
    SECURITY_RESULT_OK, SECURITY_TYPE_NONE, SECURITY_TYPE_VNC_AUTH, SERVER_MSG_BELL,
};
use crate::source::FrameSource;

/// Notifications queued per session before the task applies them.
const NOTICE_QUEUE_DEPTH: usize = 32;

/// Where a session is in its lifecycle.
///
/// The handshake is a linear progression with one optional branch through
/// the challenge states; `Invalid` is terminal and unreachable except
/// through a fatal error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Writing the 12-byte protocol version.
    SendingProtocolVersion,
    /// Waiting for the client to echo the version.
    AwaitingVersionResponse,
    /// Writing the security type list.
    SendingSecurityTypes,
    /// Waiting for the client's security type choice.
    AwaitingSecuritySelection,
    /// Writing the 16-byte DES challenge (password sessions only).
    SendingChallenge,
    /// Waiting for the encrypted challenge response.
    AwaitingChallengeResponse,
    /// Writing the 4-byte security result.
    SendingSecurityResult,
    /// Waiting for the 1-byte ClientInit.
    AwaitingClientInit,
    /// Writing the ServerInit message.
    SendingServerInit,
    /// Steady state: dispatching client messages and update notices.
    Ready,
    /// Terminal: the session hit a fatal error and the stream is closed.
    Invalid,
}

#[derive(Debug)]
enum Notice {
    RegionUpdated { x: u16, y: u16, w: u16, h: u16 },
    Bell,
    SizeChanged,
}

/// The collaborator's way into a running session.
///
/// Cheap to clone; all notifications funnel into the session task's queue
/// and are applied between client messages, preserving per-session
/// ordering.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    tx: mpsc::Sender<Notice>,
}

/// Receiver half created by [`SessionHandle::pair`], consumed by
/// [`Session::new`].
#[derive(Debug)]
pub struct SessionNotices {
    tx: mpsc::Sender<Notice>,
    rx: mpsc::Receiver<Notice>,
}

impl SessionHandle {
    /// Creates a handle before the session exists, so a [`FrameSource`]
    /// can be built holding its own handle.
    #[must_use]
    pub fn pair() -> (Self, SessionNotices) {
        let (tx, rx) = mpsc::channel(NOTICE_QUEUE_DEPTH);
        (Self { tx: tx.clone() }, SessionNotices { tx, rx })
    }

    /// A region of the framebuffer changed; the session encodes and sends
    /// it with the negotiated encoding. Returns `false` once the session
    /// is gone.
    pub async fn notify_region_updated(&self, x: u16, y: u16, w: u16, h: u16) -> bool {
        self.tx
            .send(Notice::RegionUpdated { x, y, w, h })
            .await
            .is_ok()
    }

    /// Rings the client's bell.
    pub async fn notify_bell(&self) -> bool {
        self.tx.send(Notice::Bell).await.is_ok()
    }

    /// The framebuffer dimensions changed. Sent to the client only if it
    /// advertised the desktop-size pseudo-encoding.
    pub async fn notify_size_changed(&self) -> bool {
        self.tx.send(Notice::SizeChanged).await.is_ok()
    }
}

/// One client connection: stream, collaborator, negotiated state, and the
/// two persistent compression streams (inside [`UpdateEncoder`]).
///
/// Created on accept, destroyed on socket close or fatal protocol error;
/// nothing survives across reconnects.
pub struct Session<S> {
    stream: S,
    source: Box<dyn FrameSource>,
    state: SessionState,
    pixel_format: PixelFormat,
    supported_encodings: Vec<i32>,
    mode: EncodingMode,
    encoder: UpdateEncoder,
    notice_tx: mpsc::Sender<Notice>,
    notice_rx: mpsc::Receiver<Notice>,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Builds a session over an accepted stream.
    ///
    /// The pixel format starts at the server default and the encoding at
    /// Raw until the client negotiates otherwise.
    #[must_use]
    pub fn new(stream: S, source: Box<dyn FrameSource>, notices: SessionNotices) -> Self {
        Self {
            stream,
            source,
            state: SessionState::SendingProtocolVersion,
            pixel_format: PixelFormat::default(),
            supported_encodings: Vec::new(),
            mode: EncodingMode::default(),
            encoder: UpdateEncoder::new(),
            notice_tx: notices.tx,
            notice_rx: notices.rx,
        }
    }

    /// Another handle into this session.
    #[must_use]
    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            tx: self.notice_tx.clone(),
        }
    }

    /// The session's current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Runs the session to completion: handshake, then steady-state
    /// dispatch until the stream closes or a fatal error occurs.
    ///
    /// # Errors
    ///
    /// Returns the fatal error that ended the session; a client that
    /// simply disconnects yields [`RfbError::ConnectionClosed`].
    pub async fn run(mut self) -> Result<()> {
        let outcome = self.drive().await;
        if let Err(err) = &outcome {
            self.state = SessionState::Invalid;
            self.source.report_status(&format!("Session ended: {err}"));
        }
        outcome
    }

    async fn drive(&mut self) -> Result<()> {
        self.handshake().await?;
        self.source.on_connected();
        self.dispatch().await
    }

    fn fail(&mut self, why: &str) -> Result<()> {
        self.source.report_status(why);
        Err(RfbError::Protocol(why.to_string()))
    }

    async fn handshake(&mut self) -> Result<()> {
        self.source.report_status("Negotiating protocol version...");
        self.state = SessionState::SendingProtocolVersion;
        self.stream.write_all(PROTOCOL_VERSION.as_bytes()).await?;

        self.state = SessionState::AwaitingVersionResponse;
        let mut version = [0u8; 12];
        self.stream.read_exact(&mut version).await?;
        if version != PROTOCOL_VERSION.as_bytes() {
            return self.fail("Failed to agree on protocol version.");
        }

        self.source.report_status("Negotiating protocol security...");
        let password = self.source.required_password();
        let security_type = if password.is_empty() {
            SECURITY_TYPE_NONE
        } else {
            SECURITY_TYPE_VNC_AUTH
        };
        self.state = SessionState::SendingSecurityTypes;
        self.stream.write_all(&[1, security_type]).await?;

        self.state = SessionState::AwaitingSecuritySelection;
        let selected = self.stream.read_u8().await?;
        if selected != security_type {
            return self.fail("Failed to agree on protocol security.");
        }

        if !password.is_empty() {
            self.source.report_status("Exchanging password challenge...");
            self.state = SessionState::SendingChallenge;
            let challenge = auth::generate_challenge();
            self.stream.write_all(&challenge).await?;

            self.state = SessionState::AwaitingChallengeResponse;
            let mut response = [0u8; 16];
            self.stream.read_exact(&mut response).await?;
            if !auth::verify_response(&password, &challenge, &response) {
                // Protocol-correct failure: structured reply, then close.
                let reason = b"Bad password";
                let mut reply = BytesMut::with_capacity(8 + reason.len());
                reply.put_u32(SECURITY_RESULT_FAILED);
                reply.put_u32(reason.len() as u32);
                reply.put_slice(reason);
                self.stream.write_all(&reply).await?;
                self.source.report_status("Authentication failed.");
                return Err(RfbError::AuthenticationFailed);
            }
        }

        self.source.report_status("Negotiating session parameters...");
        self.state = SessionState::SendingSecurityResult;
        self.stream.write_u32(SECURITY_RESULT_OK).await?;

        self.state = SessionState::AwaitingClientInit;
        let _shared_flag = self.stream.read_u8().await?; // length checked, content ignored

        self.state = SessionState::SendingServerInit;
        let init = ServerInit {
            width: self.source.width(),
            height: self.source.height(),
            pixel_format: self.pixel_format.clone(),
            name: self.source.session_title(),
        };
        let mut buf = BytesMut::new();
        init.write_to(&mut buf);
        self.stream.write_all(&buf).await?;

        self.state = SessionState::Ready;
        self.source.report_status("Connected.");
        Ok(())
    }

    async fn dispatch(&mut self) -> Result<()> {
        loop {
            tokio::select! {
                notice = self.notice_rx.recv() => {
                    // A sender lives in self, so recv never yields None.
                    if let Some(notice) = notice {
                        self.handle_notice(notice).await?;
                    }
                }
                first = self.stream.read_u8() => {
                    let msg_type = first.map_err(|err| {
                        if err.kind() == std::io::ErrorKind::UnexpectedEof {
                            RfbError::ConnectionClosed
                        } else {
                            RfbError::Io(err)
                        }
                    })?;
                    self.handle_client_message(msg_type).await?;
                }
            }
        }
    }

    async fn handle_notice(&mut self, notice: Notice) -> Result<()> {
        match notice {
            Notice::RegionUpdated { x, y, w, h } => self.send_region_update(x, y, w, h).await,
            Notice::Bell => self.send_bell().await,
            Notice::SizeChanged => self.send_size_changed().await,
        }
    }

    /// Dispatches one client message, classified by its first byte. The
    /// remaining length is implied by the message type; partial reads are
    /// reassembled here with `read_exact` before any state changes.
    async fn handle_client_message(&mut self, msg_type: u8) -> Result<()> {
        match msg_type {
            CLIENT_MSG_SET_PIXEL_FORMAT => {
                let mut rest = [0u8; 19]; // 3 padding + 16 format
                self.stream.read_exact(&mut rest).await?;
                if let Some(format) = PixelFormat::from_wire(&rest[3..]) {
                    self.source.report_status("Client requested new pixel format");
                    self.pixel_format = format;
                    // Redraw everything in the new format.
                    let (w, h) = (self.source.width(), self.source.height());
                    self.send_region_update(0, 0, w, h).await?;
                }
            }

            CLIENT_MSG_SET_ENCODINGS => {
                let mut head = [0u8; 3]; // 1 padding + 2 count
                self.stream.read_exact(&mut head).await?;
                let count = usize::from(u16::from_be_bytes([head[1], head[2]]));
                let mut raw = vec![0u8; count * 4];
                self.stream.read_exact(&mut raw).await?;

                let codes: Vec<i32> = raw
                    .chunks_exact(4)
                    .map(|c| i32::from_be_bytes([c[0], c[1], c[2], c[3]]))
                    .collect();
                for &code in &codes {
                    if let EncodingCode::Other(other) = EncodingCode::classify(code) {
                        log::debug!("client advertised unsupported encoding {other}");
                    }
                }
                self.supported_encodings = codes;
                self.mode = EncodingMode::select(&self.supported_encodings);
                self.source
                    .report_status(&format!("In {} mode", self.mode.name()));
            }

            CLIENT_MSG_FRAMEBUFFER_UPDATE_REQUEST => {
                let mut rest = [0u8; 9];
                self.stream.read_exact(&mut rest).await?;
                self.source.report_status("Client requested rect");
                let incremental = rest[0] != 0;
                let x = u16::from_be_bytes([rest[1], rest[2]]);
                let y = u16::from_be_bytes([rest[3], rest[4]]);
                let w = u16::from_be_bytes([rest[5], rest[6]]);
                let h = u16::from_be_bytes([rest[7], rest[8]]);
                if !incremental {
                    // Flag 0 is a full repaint request, answered right away.
                    self.send_region_update(x, y, w, h).await?;
                }
                // Incremental: no immediate reply; the next change to this
                // area produces an update anyway.
            }

            CLIENT_MSG_KEY_EVENT => {
                let mut rest = [0u8; 7];
                self.stream.read_exact(&mut rest).await?;
                self.source.report_status("Keyboard event");
                let keysym = u32::from_be_bytes([rest[3], rest[4], rest[5], rest[6]]);
                if rest[0] != 0 {
                    self.source.on_key_down(keysym);
                } else {
                    self.source.on_key_up(keysym);
                }
            }

            CLIENT_MSG_POINTER_EVENT => {
                let mut rest = [0u8; 5];
                self.stream.read_exact(&mut rest).await?;
                self.source.report_status("Client pointer event");
                let x = u16::from_be_bytes([rest[1], rest[2]]);
                let y = u16::from_be_bytes([rest[3], rest[4]]);
                self.source.on_pointer(x, y, rest[0]);
            }

            CLIENT_MSG_CLIENT_CUT_TEXT => {
                // Clipboard transfer is unsupported; drain the payload to
                // keep the stream framed.
                let mut rest = [0u8; 7]; // 3 padding + 4 length
                self.stream.read_exact(&mut rest).await?;
                let len = u64::from(u32::from_be_bytes([rest[3], rest[4], rest[5], rest[6]]));
                tokio::io::copy(&mut (&mut self.stream).take(len), &mut tokio::io::sink())
                    .await?;
                log::debug!("discarded {len}-byte clipboard text from client");
            }

            other => {
                log::warn!("unknown client message type {other}");
                self.source.report_status("Got message (unknown type)");
            }
        }
        Ok(())
    }

    async fn send_region_update(&mut self, x: u16, y: u16, w: u16, h: u16) -> Result<()> {
        self.source.report_status("Transmitting rect");
        let (fb_w, fb_h) = (self.source.width(), self.source.height());
        let message = self
            .encoder
            .encode_rect(
                self.source.framebuffer_rgbx32(),
                fb_w,
                fb_h,
                x,
                y,
                w,
                h,
                &self.pixel_format,
                self.mode,
            )
            .map_err(|err| RfbError::Encoding(err.to_string()))?;

        match message {
            Some(message) => self.stream.write_all(&message).await?,
            None => self
                .source
                .report_status("Skipping out-of-bounds region update"),
        }
        Ok(())
    }

    async fn send_bell(&mut self) -> Result<()> {
        self.stream.write_all(&[SERVER_MSG_BELL]).await?;
        Ok(())
    }

    /// Announces new framebuffer dimensions, but only to clients that
    /// advertised the desktop-size pseudo-encoding.
    async fn send_size_changed(&mut self) -> Result<()> {
        let resize_capable = self.supported_encodings.iter().any(|&code| {
            EncodingCode::classify(code) == EncodingCode::Pseudo(PseudoEncoding::DesktopSize)
        });
        if !resize_capable {
            return Ok(());
        }
        let (w, h) = (self.source.width(), self.source.height());
        let message = encoding::update_message(0, 0, w, h, ENCODING_DESKTOP_SIZE);
        self.stream.write_all(&message).await?;
        Ok(())
    }
}
