use fmail::resolver::StaticResolver;
use fmail::Server;
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

/// A running hub bound to a fresh project root, torn down on drop.
pub struct TestHub {
    pub dir: TempDir,
    pub addr: SocketAddr,
    pub project_id: String,
    cancel: CancellationToken,
}

impl Drop for TestHub {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

pub async fn spawn_hub() -> TestHub {
    let dir = TempDir::new().unwrap();
    let resolver = Arc::new(StaticResolver::new(dir.path()));
    let project_id = resolver.id().to_string();
    let cancel = CancellationToken::new();
    let server = Server::new(resolver, cancel.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let server = server.clone();
    let bind_addr = addr;
    tokio::spawn(async move {
        let _ = server.run_tcp(bind_addr).await;
    });
    // Give the acceptor a moment to bind before the first connection attempt.
    tokio::time::sleep(std::time::Duration::from_millis(30)).await;

    TestHub {
        dir,
        addr,
        project_id,
        cancel,
    }
}

/// A single request/response round trip: connect, send one line, read one
/// ack line back. Leaves the socket open for callers that want to keep
/// streaming (watch/relay).
pub struct Conn {
    stream: TcpStream,
}

impl Conn {
    pub async fn connect(addr: SocketAddr) -> Self {
        Conn {
            stream: TcpStream::connect(addr).await.unwrap(),
        }
    }

    pub async fn send(&mut self, value: &Value) {
        let mut line = serde_json::to_string(value).unwrap();
        line.push('\n');
        self.stream.write_all(line.as_bytes()).await.unwrap();
    }

    pub fn split(self) -> (tokio::net::tcp::OwnedReadHalf, tokio::net::tcp::OwnedWriteHalf) {
        self.stream.into_split()
    }

    /// Shrinks this socket's receive buffer so the peer's kernel send buffer
    /// fills after a small, deterministic number of frames instead of
    /// depending on the platform default (often hundreds of KB).
    pub fn shrink_recv_buffer(&self, size: usize) {
        use std::os::fd::{AsRawFd, FromRawFd};
        let fd = self.stream.as_raw_fd();
        // `from_raw_fd` takes no ownership semantics of its own here; we use
        // it only to reach `setsockopt` and must not let it close `fd`.
        let borrowed = unsafe { socket2::Socket::from_raw_fd(fd) };
        borrowed.set_recv_buffer_size(size).unwrap();
        std::mem::forget(borrowed);
    }
}

pub async fn request(addr: SocketAddr, req: &Value) -> Value {
    let mut conn = Conn::connect(addr).await;
    conn.send(req).await;
    let (reader, _writer) = conn.split();
    let mut lines = BufReader::new(reader).lines();
    let line = lines.next_line().await.unwrap().expect("connection closed before a response arrived");
    serde_json::from_str(&line).unwrap()
}
