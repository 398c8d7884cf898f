//! TCP server: accepts connections and dispatches each one to its own
//! handler task.
//!
//! The accept loop is the only code that touches the listening socket.
//! Every accepted connection is wrapped in a [`Channel`] and handed to
//! the handler on a freshly spawned task, so a slow or misbehaving peer
//! cannot stall acceptance or other connections.

use crate::channel::Channel;
use crate::config::Config;
use crate::error::ServerError;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Semaphore};
use tracing::{error, info, warn};

/// Consecutive transient accept failures tolerated before giving up.
const MAX_ACCEPT_RETRIES: u32 = 8;

/// Pause before retrying a failed accept.
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Server instance owning the listening socket.
#[derive(Debug)]
pub struct StreamServer {
    listener: TcpListener,
    connection_limit: Arc<Semaphore>,
    max_unit_size: usize,
    shutdown: Arc<watch::Sender<bool>>,
    signal: watch::Receiver<bool>,
}

/// Cloneable handle that stops the accept loop.
///
/// Handler tasks already running are not cancelled; each ends on its
/// own when its channel disconnects or its handler returns.
#[derive(Clone)]
pub struct ShutdownHandle {
    shutdown: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    /// Ask the server to stop accepting and close the listening socket.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }
}

impl StreamServer {
    /// Bind and start listening on the configured address.
    pub async fn bind(config: &Config) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(&config.listen)
            .await
            .map_err(|e| ServerError::Bind {
                addr: config.listen.clone(),
                source: e,
            })?;
        info!(address = %config.listen, "Server listening");

        let (shutdown, signal) = watch::channel(false);

        Ok(StreamServer {
            listener,
            connection_limit: Arc::new(Semaphore::new(config.max_connections)),
            max_unit_size: config.max_unit_size,
            shutdown: Arc::new(shutdown),
            signal,
        })
    }

    /// Actual bound address, for tests that bind port 0.
    #[cfg(test)]
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Handle for stopping this server from elsewhere.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            shutdown: Arc::clone(&self.shutdown),
        }
    }

    /// Accept connections until shutdown or a fatal accept error.
    ///
    /// Each accepted connection takes a permit from the connection
    /// limiter, gets its own [`Channel`], and runs `handler` on its own
    /// task. Transient accept failures are retried a bounded number of
    /// times; anything else stops the loop with [`ServerError::Fatal`].
    /// Returning drops (closes) the listening socket.
    pub async fn run<H, F>(mut self, handler: H) -> Result<(), ServerError>
    where
        H: Fn(Channel<TcpStream>, SocketAddr) -> F + Clone + Send + 'static,
        F: Future<Output = ()> + Send + 'static,
    {
        let mut retries = 0u32;

        loop {
            // Wait for a connection slot before accepting, so the
            // listen backlog applies backpressure once the limit is
            // reached.
            let permit = tokio::select! {
                _ = self.signal.changed() => {
                    info!("Shutdown requested, closing listener");
                    return Ok(());
                }
                permit = Arc::clone(&self.connection_limit).acquire_owned() => {
                    match permit {
                        Ok(permit) => permit,
                        Err(_) => {
                            return Err(ServerError::Fatal(io::Error::new(
                                io::ErrorKind::Other,
                                "connection limiter closed",
                            )))
                        }
                    }
                }
            };

            tokio::select! {
                _ = self.signal.changed() => {
                    info!("Shutdown requested, closing listener");
                    return Ok(());
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        retries = 0;
                        let channel = Channel::new(stream, self.max_unit_size);
                        let handler = handler.clone();

                        tokio::spawn(async move {
                            handler(channel, peer).await;
                            drop(permit);
                        });
                    }
                    Err(e) if is_transient(&e) => {
                        retries += 1;
                        if retries > MAX_ACCEPT_RETRIES {
                            error!(error = %e, "Accept failing repeatedly, giving up");
                            return Err(ServerError::Fatal(e));
                        }
                        warn!(error = %e, retries, "Failed to accept connection, retrying");
                        tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                    }
                    Err(e) => {
                        error!(error = %e, "Fatal accept error");
                        return Err(ServerError::Fatal(e));
                    }
                },
            }
        }
    }
}

/// Accept errors that affect only the one incoming connection or that
/// the kernel may clear on its own shortly (backlog resets, descriptor
/// pressure).
fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
    ) || matches!(e.raw_os_error(), Some(libc::EMFILE) | Some(libc::ENFILE))
}
