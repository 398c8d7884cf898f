//! Error types for the server and channel layers.
//!
//! Peer disconnection gets its own variant instead of hiding inside a
//! generic I/O error: a handler treats it as the normal end of a
//! conversation, while every other channel failure is fatal for that
//! one connection.

use crate::frame::FrameError;
use std::fmt;
use std::io;

/// Errors surfaced by the listening side of the server.
#[derive(Debug)]
pub enum ServerError {
    /// The listen address could not be bound.
    Bind { addr: String, source: io::Error },
    /// The accept loop cannot continue.
    Fatal(io::Error),
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerError::Bind { addr, source } => {
                write!(f, "Failed to bind '{}': {}", addr, source)
            }
            ServerError::Fatal(e) => write!(f, "Accept loop failed: {}", e),
        }
    }
}

impl std::error::Error for ServerError {}

/// Errors surfaced by channel operations.
#[derive(Debug)]
pub enum ChannelError {
    /// The peer closed or reset the connection. Expected; terminal for
    /// this connection only.
    Disconnected,
    /// The channel was already closed locally.
    Closed,
    /// The peer sent a frame this side refuses to process.
    Frame(FrameError),
    /// Any other I/O failure on the socket.
    Io(io::Error),
}

impl ChannelError {
    /// Classify a socket error, folding the error kinds that mean "the
    /// peer went away" into [`ChannelError::Disconnected`].
    pub fn from_io(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::UnexpectedEof => ChannelError::Disconnected,
            _ => ChannelError::Io(e),
        }
    }
}

impl fmt::Display for ChannelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelError::Disconnected => write!(f, "Peer disconnected"),
            ChannelError::Closed => write!(f, "Channel is closed"),
            ChannelError::Frame(e) => write!(f, "Bad frame: {}", e),
            ChannelError::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for ChannelError {}

impl From<FrameError> for ChannelError {
    fn from(e: FrameError) -> Self {
        ChannelError::Frame(e)
    }
}
