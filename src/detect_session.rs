use std::fmt;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use log::{debug, warn};
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tokio_rustls::TlsAcceptor;

use crate::proto::{self, DetectError};

pub const DEFAULT_DETECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Streams that can name the peer on the other end, for failure reports.
pub trait RemoteAddr {
    fn remote_addr(&self) -> Option<SocketAddr>;
}

impl RemoteAddr for TcpStream {
    fn remote_addr(&self) -> Option<SocketAddr> {
        self.peer_addr().ok()
    }
}

impl RemoteAddr for DuplexStream {
    fn remote_addr(&self) -> Option<SocketAddr> {
        None
    }
}

/// A downstream session that has been handed a detected connection.
pub trait Session: Send + 'static {
    /// Starts the session without waiting for it to finish.
    fn run(self);
}

/// Constructs the downstream session for a classified connection.
///
/// `buffer` holds every byte the detector consumed from `stream`, possibly
/// none. Sessions must treat it as the beginning of the stream.
pub trait Sessions<S>: Send + Sync + 'static {
    type Secure: Session;
    type Plain: Session;

    fn secure(&self, stream: S, tls: &TlsAcceptor, buffer: BytesMut, doc_root: Arc<Path>) -> Self::Secure;

    fn plain(&self, stream: S, buffer: BytesMut, doc_root: Arc<Path>) -> Self::Plain;
}

/// Terminal state of a [`DetectSession`].
#[derive(Debug)]
pub enum Outcome {
    Secure,
    Plain,
    Failed(DetectError),
}

/// Sniffs a freshly accepted connection and hands it to a TLS or a
/// plaintext session.
pub struct DetectSession<S, H> {
    stream: S,
    tls: TlsAcceptor,
    doc_root: Arc<Path>,
    sessions: Arc<H>,
    buffer: BytesMut,
    timeout: Duration,
    remote_addr: Option<SocketAddr>,
}

impl<S, H> DetectSession<S, H>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    H: Sessions<S>,
{
    pub fn new(stream: S, tls: &TlsAcceptor, doc_root: Arc<Path>, sessions: Arc<H>) -> Self {
        Self {
            stream,
            tls: tls.clone(),
            doc_root,
            sessions,
            buffer: BytesMut::new(),
            timeout: DEFAULT_DETECT_TIMEOUT,
            remote_addr: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_remote_addr(mut self, remote_addr: SocketAddr) -> Self {
        self.remote_addr = Some(remote_addr);
        self
    }

    /// Moves the session onto its own task and starts detection there.
    ///
    /// Must be called from within a tokio runtime. The returned handle may be
    /// dropped; the task keeps running until it reaches a terminal state.
    pub fn run(self) -> JoinHandle<Outcome> {
        tokio::spawn(self.on_run())
    }

    async fn on_run(mut self) -> Outcome {
        let deadline = Instant::now() + self.timeout;

        let detected = time::timeout_at(deadline, proto::detect_tls(&mut self.stream, &mut self.buffer))
            .await
            .unwrap_or_else(|_elapsed| Err(DetectError::TimedOut));

        self.on_detect(detected)
    }

    fn on_detect(self, detected: Result<bool, DetectError>) -> Outcome {
        let is_tls = match detected {
            Ok(is_tls) => is_tls,
            Err(err) => {
                self.fail(&err, "detect");
                return Outcome::Failed(err);
            },
        };

        debug!("{} detected {} after {} bytes", self.peer(), if is_tls { "tls" } else { "plain" }, self.buffer.len());

        let Self { stream, tls, doc_root, sessions, buffer, .. } = self;

        if is_tls {
            sessions.secure(stream, &tls, buffer, doc_root).run();
            return Outcome::Secure;
        }

        sessions.plain(stream, buffer, doc_root).run();

        Outcome::Plain
    }

    fn fail(&self, err: &DetectError, what: &str) {
        fail(what, err.kind(), self.remote_addr, err);
    }

    fn peer(&self) -> Peer {
        Peer(self.remote_addr)
    }
}

/// Reports a connection that is given up on, with the operation label and
/// error category.
pub fn fail(what: &str, kind: &str, remote_addr: Option<SocketAddr>, err: &dyn fmt::Display) {
    warn!("{}: {} from {}: {}", what, kind, Peer(remote_addr), err);
}

pub struct Peer(pub Option<SocketAddr>);

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(addr) => write!(f, "{}", addr),
            None => f.write_str("unknown peer"),
        }
    }
}
