// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-connection supervisor.
//!
//! One supervisor per accepted TLS stream. It drives the framer, routes
//! command lines into the protocol state machine, and copies block bytes
//! into the staging sink. It is generic over the stream type so the whole
//! protocol can be exercised over in-memory duplex pipes in tests.
//!
//! Cleanup is structural: the session owns the staging record, whose temp
//! file guard unlinks itself on drop, so every exit path (QUIT, peer EOF,
//! TLS error, write failure, system error) releases the staging state.

use crate::server::framing::{FramingError, StreamFramer, MAX_LINE_LENGTH};
use crate::server::protocol::{self, Control, Session};
use crate::server::ServerContext;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

/// Connection error types.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Framing(#[from] FramingError),
}

/// Drives one client connection to completion.
pub struct ConnectionSupervisor<S> {
    stream: S,
    peer: SocketAddr,
    framer: StreamFramer,
    session: Session,
    ctx: Arc<ServerContext>,
}

impl<S: AsyncRead + AsyncWrite + Unpin> ConnectionSupervisor<S> {
    pub fn new(stream: S, peer: SocketAddr, ctx: Arc<ServerContext>) -> Self {
        Self {
            stream,
            peer,
            framer: StreamFramer::new(MAX_LINE_LENGTH),
            session: Session::new(),
            ctx,
        }
    }

    /// Run the connection until the peer disconnects or the protocol ends it.
    pub async fn run(mut self) -> Result<(), ConnectionError> {
        self.write_reply(protocol::GREETING).await?;

        loop {
            let mut line = match self.framer.next_line(&mut self.stream).await {
                Ok(Some(line)) => line,
                Ok(None) => {
                    debug!(peer = %self.peer, "peer closed connection");
                    break;
                }
                Err(FramingError::LineTooLong(limit)) => {
                    warn!(peer = %self.peer, limit, "over-long line, closing connection");
                    let _ = self.write_reply(protocol::REPLY_LINE_TOO_LONG).await;
                    break;
                }
                Err(e) => return Err(e.into()),
            };

            let step = self.session.handle_line(&self.ctx, &mut line).await;
            self.write_reply(step.reply).await?;

            match step.control {
                Control::Continue => {}
                Control::BeginBlock => self.receive_block().await?,
                Control::Quit => {
                    debug!(peer = %self.peer, "quit");
                    break;
                }
                Control::Disconnect => {
                    warn!(peer = %self.peer, "system error, disconnecting");
                    break;
                }
            }
        }

        Ok(())
    }

    /// Block mode: copy the announced byte count into the staging sink,
    /// then hand the stream back to the line reader.
    async fn receive_block(&mut self) -> Result<(), ConnectionError> {
        if let Some(staging) = self.session.staging_mut() {
            let (sink, remaining) = staging.block_io();
            self.framer
                .copy_block(&mut self.stream, sink, remaining)
                .await?;
        }

        self.write_reply(protocol::REPLY_BLOCK_RECEIVED).await?;
        self.session.block_complete();
        Ok(())
    }

    async fn write_reply(&mut self, reply: &str) -> io::Result<()> {
        self.stream.write_all(reply.as_bytes()).await?;
        self.stream.flush().await
    }
}
