//! Terminal front end for the chat relay.
//!
//! Connects over TLS, answers the username prompt with the first input line,
//! then relays in both directions until either side ends: bytes from the
//! server go to the output verbatim, non-empty input lines are echoed locally
//! and sent without a trailing newline.

use std::io;

use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::pki_types::ServerName;

use crate::protocol::READ_BUFFER_SIZE;
use crate::tls;

pub const CONNECTED_NOTICE: &str = "Connected to the server securely!";
pub const DISCONNECTED_NOTICE: &str = "Disconnected from server.";

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("invalid server name {0:?}")]
    ServerName(String),

    #[error("connection failed: {0}")]
    Connect(#[source] io::Error),

    #[error("TLS handshake failed: {0}")]
    Handshake(#[source] io::Error),

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Rejected `<port>` argument.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum PortError {
    #[error("Invalid port number.")]
    Invalid,

    #[error("Port number out of range.")]
    OutOfRange,
}

/// Parse the port argument: decimal digits only, 1 through 65535.
pub fn parse_port(raw: &str) -> Result<u16, PortError> {
    let raw = raw.trim();
    let digits = raw.strip_prefix('+').unwrap_or(raw);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(PortError::Invalid);
    }
    match digits.parse::<u32>() {
        Ok(port @ 1..=65535) => Ok(port as u16),
        _ => Err(PortError::OutOfRange),
    }
}

/// How a chat session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The server closed the channel or a read failed.
    ServerClosed,
    /// Local input reached end of file.
    InputClosed,
}

/// A TLS connection to the relay.
pub struct ChatClient<S = TlsStream<TcpStream>> {
    stream: S,
}

impl ChatClient {
    /// Open a TCP connection to `host:port` and complete the TLS handshake.
    pub async fn connect(host: &str, port: u16) -> Result<Self, ClientError> {
        let server_name = ServerName::try_from(host.to_string())
            .map_err(|_| ClientError::ServerName(host.to_string()))?;
        let tcp = TcpStream::connect((host, port))
            .await
            .map_err(ClientError::Connect)?;
        let stream = tls::client_connector()
            .connect(server_name, tcp)
            .await
            .map_err(ClientError::Handshake)?;
        tracing::debug!(host, port, "TLS session established");
        Ok(Self { stream })
    }
}

impl<S> ChatClient<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn from_stream(stream: S) -> Self {
        Self { stream }
    }

    /// Run the chat session against `input` and `output`.
    ///
    /// Input is handled as raw bytes, one `\n`-terminated line at a time, so
    /// text in any encoding reaches the server unchanged. Prints the
    /// disconnect notice before returning [`SessionEnd::ServerClosed`].
    pub async fn run<I, O>(self, mut input: I, mut output: O) -> Result<SessionEnd, ClientError>
    where
        I: AsyncBufRead + Unpin,
        O: AsyncWrite + Unpin,
    {
        let (mut reader, mut writer) = tokio::io::split(self.stream);
        let mut buf = vec![0u8; READ_BUFFER_SIZE];
        let mut line = Vec::new();

        // Prompt, then the username reply.
        match reader.read(&mut buf).await {
            Ok(n) if n > 0 => {
                output.write_all(&buf[..n]).await?;
                output.flush().await?;
                if read_line(&mut input, &mut line).await? {
                    writer.write_all(&line).await?;
                    writer.flush().await?;
                    line.clear();
                }
            }
            _ => return disconnected(&mut output).await,
        }

        loop {
            tokio::select! {
                read = reader.read(&mut buf) => {
                    match read {
                        Ok(n) if n > 0 => {
                            output.write_all(&buf[..n]).await?;
                            output.flush().await?;
                        }
                        Ok(_) => return disconnected(&mut output).await,
                        Err(e) => {
                            tracing::debug!(?e, "receive failed");
                            return disconnected(&mut output).await;
                        }
                    }
                }
                more = read_line(&mut input, &mut line) => {
                    if !more? {
                        tracing::debug!("input closed");
                        return Ok(SessionEnd::InputClosed);
                    }
                    if !line.is_empty() {
                        output.write_all(&line).await?;
                        output.write_all(b"\n").await?;
                        output.flush().await?;
                        writer.write_all(&line).await?;
                        writer.flush().await?;
                    }
                    line.clear();
                }
            }
        }
    }
}

/// Complete the next input line in `line`, minus its `\n` (or `\r\n`).
///
/// Bytes from a read interrupted by `select!` stay in `line` and the next
/// call appends to them, so the caller clears `line` only after using it.
/// Returns `false` at end of input; a final unterminated line still counts.
async fn read_line<I>(input: &mut I, line: &mut Vec<u8>) -> io::Result<bool>
where
    I: AsyncBufRead + Unpin,
{
    let n = input.read_until(b'\n', line).await?;
    if n == 0 && line.is_empty() {
        return Ok(false);
    }
    if line.last() == Some(&b'\n') {
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
    }
    Ok(true)
}

async fn disconnected<O>(output: &mut O) -> Result<SessionEnd, ClientError>
where
    O: AsyncWrite + Unpin,
{
    output.write_all(DISCONNECTED_NOTICE.as_bytes()).await?;
    output.write_all(b"\n").await?;
    output.flush().await?;
    Ok(SessionEnd::ServerClosed)
}
