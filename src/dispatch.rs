//! Per-session outbound queues and the tasks that drain them.
//!
//! Broadcasts never touch a socket directly. Each session owns an unbounded
//! queue; pushing onto it is synchronous, so the registry can fan a line out
//! to every recipient while holding its lock. A dedicated writer task owns the
//! write half of the channel and drains the queue in order.

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Sending side of one session's outbound queue.
#[derive(Clone, Debug)]
pub struct Outbox {
    tx: mpsc::UnboundedSender<Bytes>,
}

impl Outbox {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Bytes>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Queue bytes for the writer task.
    ///
    /// Returns `false` once the writer has gone away (write failure or
    /// connection teardown); callers skip the recipient and move on.
    pub fn deliver(&self, data: Bytes) -> bool {
        self.tx.send(data).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Start draining the queue into `writer`.
    ///
    /// The task ends when every `Outbox` clone is dropped or a write fails.
    /// In the first case it shuts the writer down, which for a TLS stream
    /// sends close_notify and half-closes the socket.
    pub fn spawn_writer<W>(writer: W, rx: mpsc::UnboundedReceiver<Bytes>) -> JoinHandle<()>
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        tokio::spawn(write_loop(writer, rx))
    }
}

async fn write_loop<W>(mut writer: W, mut rx: mpsc::UnboundedReceiver<Bytes>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(data) = rx.recv().await {
        let result = async {
            writer.write_all(&data).await?;
            writer.flush().await
        }
        .await;
        if let Err(e) = result {
            tracing::debug!(?e, "outbound write failed, dropping queue");
            return;
        }
    }
    if let Err(e) = writer.shutdown().await {
        tracing::debug!(?e, "error shutting down outbound stream");
    }
}
