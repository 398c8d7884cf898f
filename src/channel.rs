//! Per-connection message channel.
//!
//! Wraps one byte-stream socket and exchanges discrete message units
//! using the framing in [`crate::frame`]. The peer closing or resetting
//! the connection surfaces as [`ChannelError::Disconnected`], so a
//! handler can treat it as the normal end of a conversation instead of
//! an I/O failure.
//!
//! A channel is owned by exactly one handler task; nothing here is
//! shared or locked.

use crate::error::ChannelError;
use crate::frame::{self, FrameError};
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Initial read buffer capacity.
const BUFFER_SIZE: usize = 4 * 1024;

/// Ordered, reliable exchange of discrete message units over one
/// connection.
///
/// Generic over the stream so the framing logic can run against
/// in-memory streams in tests; the server instantiates it with
/// `TcpStream`.
pub struct Channel<S> {
    stream: S,
    buffer: BytesMut,
    max_unit_size: usize,
    closed: bool,
}

impl<S: AsyncRead + AsyncWrite + Unpin> Channel<S> {
    /// Wrap a connected stream. Units larger than `max_unit_size` are
    /// refused in both directions.
    pub fn new(stream: S, max_unit_size: usize) -> Self {
        Channel {
            stream,
            buffer: BytesMut::with_capacity(BUFFER_SIZE),
            max_unit_size,
            closed: false,
        }
    }

    /// Send one unit, suspending until it is fully written.
    ///
    /// Units are delivered in call order. Fails with
    /// [`ChannelError::Disconnected`] when the peer has gone away and
    /// [`ChannelError::Closed`] after a local [`close`](Self::close).
    pub async fn send(&mut self, unit: &[u8]) -> Result<(), ChannelError> {
        if self.closed {
            return Err(ChannelError::Closed);
        }
        if unit.len() > self.max_unit_size {
            return Err(FrameError::TooLarge {
                length: unit.len(),
                limit: self.max_unit_size,
            }
            .into());
        }

        let mut header = BytesMut::with_capacity(16);
        frame::encode_header(unit.len(), &mut header);

        self.stream
            .write_all(&header)
            .await
            .map_err(ChannelError::from_io)?;
        self.stream
            .write_all(unit)
            .await
            .map_err(ChannelError::from_io)?;
        self.stream.flush().await.map_err(ChannelError::from_io)?;
        Ok(())
    }

    /// Receive the next complete unit, suspending until one has been
    /// reassembled or the peer disconnects.
    ///
    /// Never yields a partial unit: end-of-stream before a unit is
    /// complete, including on the very first read, reports
    /// [`ChannelError::Disconnected`].
    pub async fn recv(&mut self) -> Result<Bytes, ChannelError> {
        if self.closed {
            return Err(ChannelError::Closed);
        }

        loop {
            if let Some(unit) = frame::decode(&mut self.buffer, self.max_unit_size)? {
                return Ok(unit);
            }

            let n = self
                .stream
                .read_buf(&mut self.buffer)
                .await
                .map_err(ChannelError::from_io)?;
            if n == 0 {
                // EOF: a clean close between units and a close mid-frame
                // both end the conversation.
                return Err(ChannelError::Disconnected);
            }
        }
    }

    /// Close the channel and release its buffer. Idempotent, and safe
    /// to call after [`ChannelError::Disconnected`].
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.buffer = BytesMut::new();
        // The peer may already be gone; either way there is nothing
        // left to report.
        let _ = self.stream.shutdown().await;
    }

    /// Whether the channel has been closed locally, for tests.
    #[cfg(test)]
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}
