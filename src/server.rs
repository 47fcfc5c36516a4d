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

//! TCP acceptor that spawns one [`Session`] task per client.

use tokio::net::{TcpListener, ToSocketAddrs};

use crate::error::Result;
use crate::session::{Session, SessionHandle};
use crate::source::FrameSource;

/// Accepts connections and binds each one to a fresh [`FrameSource`].
///
/// The factory is invoked once per accepted connection with the new
/// session's [`SessionHandle`], so the source it builds can push region
/// updates, bells, and size changes back into that session. Sessions are
/// fully independent: each one runs on its own task with its own
/// negotiated pixel format, encoding, and compression streams.
pub struct Server<F> {
    factory: F,
}

impl<F> Server<F>
where
    F: Fn(SessionHandle) -> Box<dyn FrameSource> + Send + Sync + 'static,
{
    /// Creates a server from a per-connection source factory.
    pub fn new(factory: F) -> Self {
        Self { factory }
    }

    /// Binds `addr` and serves forever.
    ///
    /// A session that ends with an error takes down only itself; the
    /// outcome is logged and the acceptor keeps running.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener cannot be bound; accept errors on
    /// individual connections are logged and skipped.
    pub async fn listen(self, addr: impl ToSocketAddrs) -> Result<()> {
        let listener = TcpListener::bind(addr).await?;
        log::info!("listening on {}", listener.local_addr()?);

        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(err) => {
                    log::warn!("accept failed: {err}");
                    continue;
                }
            };
            log::info!("client connected from {peer}");

            let (handle, notices) = SessionHandle::pair();
            let source = (self.factory)(handle);
            let session = Session::new(stream, source, notices);
            tokio::spawn(async move {
                match session.run().await {
                    Ok(()) => log::info!("client {peer} disconnected"),
                    Err(err) => log::debug!("client {peer} session ended: {err}"),
                }
            });
        }
    }
}
