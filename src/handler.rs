//! Per-connection lifecycle.
//!
//! ```text
//! Handshaking -> AwaitingUsername -> Active -> Terminating -> Closed
//!      |                |                                      ^
//!      +----------------+--------------------------------------+
//! ```
//!
//! The handshake itself runs in [`crate::server`]; everything after it is
//! driven here over any `AsyncRead + AsyncWrite` stream, which lets tests use
//! in-memory pipes instead of TLS.

use std::io;
use std::net::SocketAddr;

use bytes::Bytes;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio_util::sync::CancellationToken;

use crate::dispatch::Outbox;
use crate::protocol::{self, Inbound, READ_BUFFER_SIZE};
use crate::session::{Session, SessionRegistry};

/// Where a connection is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Handshaking,
    AwaitingUsername,
    Active,
    Terminating,
    Closed,
}

/// Why a connection ended before reaching the chat loop.
#[derive(Error, Debug)]
pub enum HandlerError {
    #[error("TLS handshake failed: {0}")]
    Handshake(#[source] io::Error),

    #[error("failed to read username: {0}")]
    UsernameRead(#[source] io::Error),

    #[error("peer closed the connection before sending a username")]
    NoUsername,

    #[error("submitted username is empty after removing whitespace")]
    EmptyUsername,

    #[error("server shut down before a username arrived")]
    Shutdown,
}

/// Drive one connection from the username prompt to close.
///
/// Returns `Ok` when an active session ends normally (EOF, read error or
/// `shutdown` firing in the chat loop) and `Err` when the connection is
/// dropped before it was ever registered.
pub async fn handle_connection<S>(
    stream: S,
    peer: SocketAddr,
    registry: SessionRegistry,
    shutdown: CancellationToken,
) -> Result<(), HandlerError>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (mut reader, writer) = tokio::io::split(stream);
    let (outbox, rx) = Outbox::channel();
    let writer_task = Outbox::spawn_writer(writer, rx);

    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    let mut state = ConnectionState::AwaitingUsername;
    tracing::trace!(peer = %peer, ?state, "prompting for username");
    outbox.deliver(Bytes::from_static(protocol::USERNAME_PROMPT.as_bytes()));

    let read = tokio::select! {
        _ = shutdown.cancelled() => Err(HandlerError::Shutdown),
        read = read_username(&mut reader, &mut buf) => read,
    };
    let username = match read {
        Ok(name) => name,
        Err(e) => {
            drop(outbox);
            let _ = writer_task.await;
            tracing::trace!(peer = %peer, state = ?ConnectionState::Closed, "connection closed");
            return Err(e);
        }
    };

    let session = Session::new(username.clone(), peer, outbox.clone());
    let id = session.id();
    state = ConnectionState::Active;
    registry.join(session);
    tracing::debug!(peer = %peer, session = %id, username = %username, ?state, "session registered");

    loop {
        let read = tokio::select! {
            _ = shutdown.cancelled() => {
                tracing::debug!(session = %id, "server shutting down, closing session");
                break;
            }
            read = reader.read(&mut buf) => read,
        };
        let n = match read {
            Ok(0) => {
                tracing::info!(session = %id, username = %username, "client disconnected");
                break;
            }
            Ok(n) => n,
            Err(e) => {
                tracing::info!(session = %id, username = %username, ?e, "read failed, closing session");
                break;
            }
        };

        match Inbound::parse(protocol::strip_line_endings(&buf[..n])) {
            Inbound::Chat(text) => {
                let line = protocol::chat_line(&username, &text);
                let delivered = registry.broadcast(&line, Some(id));
                tracing::debug!(session = %id, delivered, "relayed message");
            }
            Inbound::PrivateMessage { recipient, .. } => {
                // Recognized but not implemented: nothing is delivered.
                let online = registry.lookup(&recipient).is_some();
                tracing::debug!(session = %id, recipient = %recipient, online, "ignoring private message");
            }
        }
    }

    state = ConnectionState::Terminating;
    tracing::trace!(session = %id, ?state, "leaving");
    registry.leave(id);

    // The registry's clone went away with leave(); dropping ours closes the
    // queue so the writer flushes, sends close_notify and exits.
    drop(outbox);
    let _ = writer_task.await;

    state = ConnectionState::Closed;
    tracing::trace!(session = %id, ?state, "connection closed");
    Ok(())
}

async fn read_username<R>(reader: &mut R, buf: &mut [u8]) -> Result<String, HandlerError>
where
    R: AsyncRead + Unpin,
{
    let n = reader.read(buf).await.map_err(HandlerError::UsernameRead)?;
    if n == 0 {
        return Err(HandlerError::NoUsername);
    }
    let username = protocol::sanitize_username(&buf[..n]);
    if username.is_empty() {
        return Err(HandlerError::EmptyUsername);
    }
    Ok(username)
}
