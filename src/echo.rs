//! Echo connection handler.
//!
//! The simplest use of the channel contract: every unit that arrives
//! goes straight back to the peer, until the peer disconnects.

use crate::channel::Channel;
use crate::error::ChannelError;
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, warn};

/// Serve one connection, echoing every received unit back.
///
/// Disconnection is the normal way out and is logged quietly; any
/// other channel error is reported and also ends the connection.
/// Either way the channel is closed before the task returns.
pub async fn echo_connection<S>(mut channel: Channel<S>, peer: SocketAddr)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    debug!(%peer, "New connection");

    loop {
        let unit = match channel.recv().await {
            Ok(unit) => unit,
            Err(e) => {
                log_end(&e, peer);
                break;
            }
        };

        if let Err(e) = channel.send(&unit).await {
            log_end(&e, peer);
            break;
        }
    }

    channel.close().await;
}

fn log_end(e: &ChannelError, peer: SocketAddr) {
    match e {
        ChannelError::Disconnected => debug!(%peer, "Client disconnected"),
        e => warn!(%peer, error = %e, "Connection error"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    fn peer() -> SocketAddr {
        "127.0.0.1:5555".parse().unwrap()
    }

    #[tokio::test]
    async fn test_echoes_until_peer_closes() {
        let (ours, theirs) = duplex(256);
        let task = tokio::spawn(echo_connection(Channel::new(theirs, 1024), peer()));

        let mut client = Channel::new(ours, 1024);
        client.send(b"hello").await.unwrap();
        assert_eq!(client.recv().await.unwrap().as_ref(), b"hello");

        client.send(b"world").await.unwrap();
        assert_eq!(client.recv().await.unwrap().as_ref(), b"world");

        client.close().await;
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_handler_ends_on_immediate_close() {
        let (ours, theirs) = duplex(256);
        let task = tokio::spawn(echo_connection(Channel::new(theirs, 1024), peer()));

        drop(ours);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_handler_ends_on_bad_frame() {
        let (mut ours, theirs) = duplex(256);
        let task = tokio::spawn(echo_connection(Channel::new(theirs, 1024), peer()));

        use tokio::io::AsyncWriteExt;
        ours.write_all(b"not-a-length\r\n").await.unwrap();

        task.await.unwrap();
    }
}
