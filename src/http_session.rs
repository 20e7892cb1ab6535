use std::convert::Infallible;
use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use hyper::header::{CONTENT_LENGTH, CONTENT_TYPE, HeaderValue};
use hyper::server::conn::Http;
use hyper::service::service_fn;
use hyper::{Body, Method, Request, Response, StatusCode};
use log::{debug, warn};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time;
use tokio_rustls::TlsAcceptor;

use crate::detect_session::{self, Peer, RemoteAddr, Session, Sessions};
use crate::rewind::Rewind;

pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("transport error: {0}")]
    Io(#[from] io::Error),
    #[error("timed out")]
    TimedOut,
}

impl SessionError {
    pub fn kind(&self) -> &'static str {
        match self {
            SessionError::Io(_) => "io",
            SessionError::TimedOut => "timeout",
        }
    }
}

/// Serves HTTP/1.1 from the document root, over TLS or in the clear.
///
/// `handshake_timeout` bounds the TLS handshake and the wait for each
/// request head.
pub struct HttpSessions {
    handshake_timeout: Duration,
}

impl HttpSessions {
    pub fn new(handshake_timeout: Duration) -> Self {
        Self { handshake_timeout }
    }
}

impl Default for HttpSessions {
    fn default() -> Self {
        Self::new(DEFAULT_HANDSHAKE_TIMEOUT)
    }
}

impl<S> Sessions<S> for HttpSessions
where
    S: AsyncRead + AsyncWrite + RemoteAddr + Unpin + Send + 'static,
{
    type Secure = SslHttpSession<S>;
    type Plain = PlainHttpSession<S>;

    fn secure(&self, stream: S, tls: &TlsAcceptor, buffer: BytesMut, doc_root: Arc<Path>) -> Self::Secure {
        SslHttpSession::new(stream, tls, buffer, doc_root)
            .with_timeout(self.handshake_timeout)
    }

    fn plain(&self, stream: S, buffer: BytesMut, doc_root: Arc<Path>) -> Self::Plain {
        PlainHttpSession::new(stream, buffer, doc_root)
            .with_timeout(self.handshake_timeout)
    }
}

pub struct SslHttpSession<S> {
    stream: Rewind<S>,
    tls: TlsAcceptor,
    doc_root: Arc<Path>,
    timeout: Duration,
    remote_addr: Option<SocketAddr>,
}

impl<S> SslHttpSession<S>
where
    S: AsyncRead + AsyncWrite + RemoteAddr + Unpin + Send + 'static,
{
    pub fn new(stream: S, tls: &TlsAcceptor, buffer: BytesMut, doc_root: Arc<Path>) -> Self {
        Self {
            remote_addr: stream.remote_addr(),
            stream: Rewind::new(stream, buffer),
            tls: tls.clone(),
            doc_root,
            timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn on_run(self) {
        let handshake = time::timeout(self.timeout, self.tls.accept(self.stream)).await;

        let stream = match handshake {
            Ok(Ok(stream)) => stream,
            Ok(Err(err)) => return fail(&SessionError::Io(err), "handshake", self.remote_addr),
            Err(_elapsed) => return fail(&SessionError::TimedOut, "handshake", self.remote_addr),
        };

        serve(stream, self.doc_root, self.timeout, self.remote_addr).await;
    }
}

impl<S> Session for SslHttpSession<S>
where
    S: AsyncRead + AsyncWrite + RemoteAddr + Unpin + Send + 'static,
{
    fn run(self) {
        tokio::spawn(self.on_run());
    }
}

pub struct PlainHttpSession<S> {
    stream: Rewind<S>,
    doc_root: Arc<Path>,
    timeout: Duration,
    remote_addr: Option<SocketAddr>,
}

impl<S> PlainHttpSession<S>
where
    S: AsyncRead + AsyncWrite + RemoteAddr + Unpin + Send + 'static,
{
    pub fn new(stream: S, buffer: BytesMut, doc_root: Arc<Path>) -> Self {
        Self {
            remote_addr: stream.remote_addr(),
            stream: Rewind::new(stream, buffer),
            doc_root,
            timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl<S> Session for PlainHttpSession<S>
where
    S: AsyncRead + AsyncWrite + RemoteAddr + Unpin + Send + 'static,
{
    fn run(self) {
        tokio::spawn(serve(self.stream, self.doc_root, self.timeout, self.remote_addr));
    }
}

fn fail(err: &SessionError, what: &str, remote_addr: Option<SocketAddr>) {
    detect_session::fail(what, err.kind(), remote_addr, err);
}

async fn serve<I>(io: I, doc_root: Arc<Path>, header_timeout: Duration, remote_addr: Option<SocketAddr>)
where
    I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let service = service_fn(move |request| {
        let doc_root = doc_root.clone();

        async move {
            Ok::<_, Infallible>(respond(&doc_root, request).await)
        }
    });

    let served = Http::new()
        .http1_only(true)
        .http1_header_read_timeout(header_timeout)
        .serve_connection(io, service)
        .await;

    if let Err(err) = served {
        debug!("serve: {} from {}", err, Peer(remote_addr));
    }
}

async fn respond(doc_root: &Path, request: Request<Body>) -> Response<Body> {
    let method = request.method().clone();

    if method != Method::GET && method != Method::HEAD {
        return status(StatusCode::METHOD_NOT_ALLOWED);
    }

    let mut path = match resolve(doc_root, request.uri().path()) {
        Some(path) => path,
        None => return status(StatusCode::BAD_REQUEST),
    };

    if is_dir(&path).await {
        path.push("index.html");
    }

    let contents = match tokio::fs::read(&path).await {
        Ok(contents) => contents,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return status(StatusCode::NOT_FOUND),
        Err(err) => {
            warn!("read {}: {}", path.display(), err);
            return status(StatusCode::INTERNAL_SERVER_ERROR);
        },
    };

    let content_length = HeaderValue::from(contents.len());
    let body = if method == Method::HEAD {
        Body::empty()
    } else {
        Body::from(contents)
    };

    let mut response = Response::new(body);
    response.headers_mut().insert(CONTENT_TYPE, HeaderValue::from_static(mime_type(&path)));
    response.headers_mut().insert(CONTENT_LENGTH, content_length);

    response
}

fn status(status: StatusCode) -> Response<Body> {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = status;
    response
}

/// Maps a request target onto the document root. Targets escaping the
/// root are refused.
fn resolve(doc_root: &Path, target: &str) -> Option<PathBuf> {
    if !target.starts_with('/') || target.contains("..") {
        return None;
    }

    Some(doc_root.join(target.trim_start_matches('/')))
}

async fn is_dir(path: &Path) -> bool {
    tokio::fs::metadata(path).await
        .map(|metadata| metadata.is_dir())
        .unwrap_or(false)
}

fn mime_type(path: &Path) -> &'static str {
    let ext = path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase());

    match ext.as_deref() {
        Some("htm" | "html") => "text/html",
        Some("css") => "text/css",
        Some("txt") => "text/plain",
        Some("js") => "application/javascript",
        Some("json") => "application/json",
        Some("xml") => "application/xml",
        Some("png") => "image/png",
        Some("jpe" | "jpeg" | "jpg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("ico") => "image/vnd.microsoft.icon",
        Some("svg" | "svgz") => "image/svg+xml",
        Some("wasm") => "application/wasm",
        _ => "application/octet-stream",
    }
}
