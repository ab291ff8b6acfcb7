// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Dual-mode framing over the connection byte stream.
//!
//! The protocol interleaves two framings on the same stream:
//!
//! - **Text mode**: newline-terminated command lines (`\r\n` accepted,
//!   trailing `\r` stripped), bounded by [`MAX_LINE_LENGTH`].
//! - **Block mode**: a counted run of raw bytes forwarded verbatim to the
//!   staging sink, announced by a preceding `BLOCK <n>` line.
//!
//! The framer owns the lookahead buffer, so bytes that arrive together with
//! a `BLOCK` command (before the mode switch) are fed to the sink rather
//! than lost, and bytes trailing a completed block are parsed as the next
//! command line.

use std::io;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Maximum length of a command line, in bytes (terminator excluded).
pub const MAX_LINE_LENGTH: usize = 1024;

/// Maximum announced block size, in bytes.
pub const MAX_BLOCK_SIZE: u64 = 16 * 1024 * 1024;

const READ_CHUNK: usize = 8 * 1024;

/// Framing error types.
#[derive(Debug, Error)]
pub enum FramingError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("line exceeds {0} bytes")]
    LineTooLong(usize),

    #[error("peer closed the stream mid-block")]
    TruncatedBlock,
}

/// Stream framer with a lookahead buffer shared by both modes.
#[derive(Debug)]
pub struct StreamFramer {
    buf: Vec<u8>,
    pos: usize,
    max_line: usize,
}

impl StreamFramer {
    pub fn new(max_line: usize) -> Self {
        Self {
            buf: Vec::with_capacity(READ_CHUNK),
            pos: 0,
            max_line,
        }
    }

    /// Read the next non-empty command line.
    ///
    /// Returns `Ok(None)` on a clean end of stream; a partial trailing line
    /// without its terminator is discarded with it. Blank lines are consumed
    /// without being emitted.
    pub async fn next_line<S>(&mut self, stream: &mut S) -> Result<Option<String>, FramingError>
    where
        S: AsyncRead + Unpin,
    {
        loop {
            if let Some(rel) = self.buf[self.pos..].iter().position(|&b| b == b'\n') {
                let terminator = self.pos + rel;
                let mut end = terminator;
                if end > self.pos && self.buf[end - 1] == b'\r' {
                    end -= 1;
                }
                if end - self.pos > self.max_line {
                    return Err(FramingError::LineTooLong(self.max_line));
                }

                let line = String::from_utf8_lossy(&self.buf[self.pos..end]).into_owned();
                self.pos = terminator + 1;
                self.compact();

                if line.is_empty() {
                    continue;
                }
                return Ok(Some(line));
            }

            if self.buf.len() - self.pos > self.max_line {
                return Err(FramingError::LineTooLong(self.max_line));
            }

            self.compact();
            let mut chunk = [0u8; READ_CHUNK];
            let n = stream.read(&mut chunk).await?;
            if n == 0 {
                return Ok(None);
            }
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }

    /// Forward exactly `*remaining` raw bytes from the stream to `sink`.
    ///
    /// Buffered lookahead bytes are drained first. The counter is updated as
    /// bytes land so it stays accurate across suspension points; it reaches
    /// zero exactly when the block is complete.
    pub async fn copy_block<S, W>(
        &mut self,
        stream: &mut S,
        sink: &mut W,
        remaining: &mut u64,
    ) -> Result<(), FramingError>
    where
        S: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        while *remaining > 0 && self.pos < self.buf.len() {
            let available = (self.buf.len() - self.pos) as u64;
            let take = available.min(*remaining) as usize;
            sink.write_all(&self.buf[self.pos..self.pos + take]).await?;
            self.pos += take;
            *remaining -= take as u64;
        }
        self.compact();

        let mut chunk = [0u8; READ_CHUNK];
        while *remaining > 0 {
            let want = (*remaining).min(READ_CHUNK as u64) as usize;
            let n = stream.read(&mut chunk[..want]).await?;
            if n == 0 {
                return Err(FramingError::TruncatedBlock);
            }
            sink.write_all(&chunk[..n]).await?;
            *remaining -= n as u64;
        }

        sink.flush().await?;
        Ok(())
    }

    fn compact(&mut self) {
        if self.pos > 0 {
            self.buf.drain(..self.pos);
            self.pos = 0;
        }
    }
}
