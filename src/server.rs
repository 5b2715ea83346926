//! TCP/TLS listener for the chat relay.
//!
//! Binds the configured port, accepts connections until cancelled, and gives
//! each accepted socket its own task: TLS handshake first, then the
//! connection handler. A failed handshake only ever costs that one socket.

use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use thiserror::Error;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;

use crate::config::{ConfigError, ServerConfig};
use crate::handler::{self, ConnectionState, HandlerError};
use crate::session::SessionRegistry;
use crate::tls::{self, TlsError};

/// Startup failures. All of them are fatal.
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("tls error: {0}")]
    Tls(#[from] TlsError),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Bind `addr` with an explicit listen backlog.
pub fn bind(addr: SocketAddr, backlog: u32) -> Result<TcpListener, ServerError> {
    let bind_err = |source| ServerError::Bind { addr, source };
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()
    } else {
        TcpSocket::new_v6()
    }
    .map_err(bind_err)?;
    socket.set_reuseaddr(true).map_err(bind_err)?;
    socket.bind(addr).map_err(bind_err)?;
    socket.listen(backlog).map_err(bind_err)
}

/// A bound relay, ready to accept.
pub struct ChatServer {
    listener: TcpListener,
    acceptor: TlsAcceptor,
    sessions: SessionRegistry,
}

impl ChatServer {
    /// Load the TLS identity and bind `0.0.0.0:<port>`.
    pub fn bind(config: &ServerConfig, sessions: SessionRegistry) -> Result<Self, ServerError> {
        let acceptor = tls::load_tls_config(&config.cert_path, &config.key_path)?;
        let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, config.port));
        let listener = bind(addr, config.backlog)?;
        Ok(Self::from_parts(listener, acceptor, sessions))
    }

    pub fn from_parts(listener: TcpListener, acceptor: TlsAcceptor, sessions: SessionRegistry) -> Self {
        Self {
            listener,
            acceptor,
            sessions,
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Run the accept loop until `cancel` fires.
    ///
    /// Connection tasks are detached but observe `cancel` too: once it fires
    /// each active session is removed, announced and closed with
    /// close_notify. They are not waited for on return.
    pub async fn serve(self, cancel: CancellationToken) -> io::Result<()> {
        let addr = self.listener.local_addr()?;
        tracing::info!(addr = %addr, "Server is listening on port {}", addr.port());
        self.sessions.spawn_activity_log(cancel.clone());

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!("received cancel signal, stopping accept loop");
                    break;
                }
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, peer)) => {
                            tracing::info!(peer = %peer, "client connected");
                            let acceptor = self.acceptor.clone();
                            let sessions = self.sessions.clone();
                            let shutdown = cancel.child_token();
                            tokio::spawn(async move {
                                match serve_connection(stream, peer, acceptor, sessions, shutdown).await {
                                    Ok(()) => {}
                                    Err(HandlerError::Shutdown) => {
                                        tracing::debug!(peer = %peer, "connection closed for shutdown");
                                    }
                                    Err(e) => {
                                        tracing::warn!(peer = %peer, error = %e, "connection dropped");
                                    }
                                }
                            });
                        }
                        Err(e) => {
                            tracing::error!(?e, "failed to accept TCP connection");
                            // Backoff to prevent tight loop under sustained accept errors
                            tokio::time::sleep(Duration::from_millis(100)).await;
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    acceptor: TlsAcceptor,
    sessions: SessionRegistry,
    shutdown: CancellationToken,
) -> Result<(), HandlerError> {
    tracing::trace!(peer = %peer, state = ?ConnectionState::Handshaking, "starting TLS handshake");
    // Dropping `stream` on failure closes the socket.
    let tls_stream = tokio::select! {
        _ = shutdown.cancelled() => return Err(HandlerError::Shutdown),
        accepted = acceptor.accept(stream) => accepted.map_err(HandlerError::Handshake)?,
    };
    handler::handle_connection(tls_stream, peer, sessions, shutdown).await
}
