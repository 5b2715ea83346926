#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tempfile::TempDir;
use tlschat::server::{self, ChatServer};
use tlschat::session::{SessionEvent, SessionRegistry};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_util::sync::CancellationToken;

pub const TIMEOUT: Duration = Duration::from_secs(5);
pub const QUIET: Duration = Duration::from_millis(150);

/// Generate a self-signed cert+key pair, write them to temp files, and return paths.
pub fn generate_test_cert(dir: &Path) -> (PathBuf, PathBuf) {
    let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    let cert_path = dir.join("cert.pem");
    let key_path = dir.join("key.pem");
    std::fs::write(&cert_path, cert.cert.pem()).unwrap();
    std::fs::write(&key_path, cert.key_pair.serialize_pem()).unwrap();
    (cert_path, key_path)
}

/// A relay running on an ephemeral loopback port.
pub struct TestServer {
    pub addr: SocketAddr,
    pub sessions: SessionRegistry,
    pub cancel: CancellationToken,
    _dir: TempDir,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

pub async fn start_test_server() -> TestServer {
    let dir = TempDir::new().unwrap();
    let (cert_path, key_path) = generate_test_cert(dir.path());
    let acceptor = tlschat::tls::load_tls_config(&cert_path, &key_path).unwrap();
    let listener = server::bind("127.0.0.1:0".parse().unwrap(), 5).unwrap();
    let sessions = SessionRegistry::new();
    let chat = ChatServer::from_parts(listener, acceptor, sessions.clone());
    let addr = chat.local_addr().unwrap();
    let cancel = CancellationToken::new();
    tokio::spawn(chat.serve(cancel.clone()));
    TestServer {
        addr,
        sessions,
        cancel,
        _dir: dir,
    }
}

/// A raw protocol client speaking TLS to the test server.
pub struct Peer {
    pub reader: BufReader<ReadHalf<TlsStream<TcpStream>>>,
    pub writer: WriteHalf<TlsStream<TcpStream>>,
}

impl Peer {
    pub async fn connect(addr: SocketAddr) -> Self {
        let tcp = TcpStream::connect(addr).await.unwrap();
        let name = ServerName::try_from("localhost").unwrap();
        let tls = tokio::time::timeout(TIMEOUT, tlschat::tls::client_connector().connect(name, tcp))
            .await
            .expect("handshake timed out")
            .expect("handshake failed");
        let (reader, writer) = tokio::io::split(tls);
        Self {
            reader: BufReader::new(reader),
            writer,
        }
    }

    pub async fn expect_prompt(&mut self) {
        let mut prompt = [0u8; 21];
        tokio::time::timeout(TIMEOUT, self.reader.read_exact(&mut prompt))
            .await
            .expect("timed out waiting for prompt")
            .unwrap();
        assert_eq!(&prompt, b"Enter your username: ");
    }

    pub async fn send(&mut self, data: &str) {
        self.writer.write_all(data.as_bytes()).await.unwrap();
        self.writer.flush().await.unwrap();
    }

    pub async fn line(&mut self) -> String {
        let mut line = String::new();
        tokio::time::timeout(TIMEOUT, self.reader.read_line(&mut line))
            .await
            .expect("timed out waiting for a line")
            .unwrap();
        line
    }

    /// Assert that nothing arrives within a short window.
    pub async fn assert_silent(&mut self) {
        let mut line = String::new();
        let res = tokio::time::timeout(QUIET, self.reader.read_line(&mut line)).await;
        assert!(res.is_err(), "expected silence, got {line:?}");
    }

    /// Close the connection, sending close_notify first.
    pub async fn disconnect(mut self) {
        let _ = self.writer.shutdown().await;
    }
}

/// Wait until the registry reports `username` as joined.
pub async fn wait_joined(events: &mut tokio::sync::broadcast::Receiver<SessionEvent>, username: &str) {
    wait_for(events, |e| matches!(e, SessionEvent::Joined { username: u, .. } if u == username)).await;
}

/// Wait until the registry reports `username` as gone.
pub async fn wait_left(events: &mut tokio::sync::broadcast::Receiver<SessionEvent>, username: &str) {
    wait_for(events, |e| matches!(e, SessionEvent::Left { username: u, .. } if u == username)).await;
}

async fn wait_for<F>(events: &mut tokio::sync::broadcast::Receiver<SessionEvent>, pred: F)
where
    F: Fn(&SessionEvent) -> bool,
{
    tokio::time::timeout(TIMEOUT, async {
        loop {
            let event = events.recv().await.expect("event stream closed");
            if pred(&event) {
                return;
            }
        }
    })
    .await
    .expect("timed out waiting for session event");
}

/// Connect, answer the prompt and wait for registration.
pub async fn join(server: &TestServer, username: &str) -> Peer {
    let mut events = server.sessions.subscribe_events();
    let mut peer = Peer::connect(server.addr).await;
    peer.expect_prompt().await;
    peer.send(username).await;
    wait_joined(&mut events, username.trim()).await;
    peer
}
