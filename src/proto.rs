use std::io;

use bytes::BytesMut;
use log::trace;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

const TLS_HANDSHAKE_RECORD: u8 = 0x16;
const TLS_CLIENT_HELLO: u8 = 0x01;
// client version (2) + random (32)
const TLS_CLIENT_HELLO_MIN_LEN: u32 = 34;
// handshake type (1) + handshake length (3)
const TLS_HANDSHAKE_HEADER_LEN: u32 = 4;

const READ_CHUNK: usize = 1024;

#[derive(Debug, Error)]
pub enum DetectError {
    #[error("transport error: {0}")]
    Io(#[from] io::Error),
    #[error("timed out before the protocol could be detected")]
    TimedOut,
    #[error("peer closed the connection before the protocol could be detected")]
    PeerClosed,
}

impl DetectError {
    /// Short category label used when reporting failures.
    pub fn kind(&self) -> &'static str {
        match self {
            DetectError::Io(_) => "io",
            DetectError::TimedOut => "timeout",
            DetectError::PeerClosed => "peer-closed",
        }
    }
}

/// Decides whether `buf` starts with a TLS ClientHello.
///
/// Returns `None` while the answer is still undetermined and more bytes
/// are required.
pub fn is_tls_client_hello(buf: &[u8]) -> Option<bool> {
    let first_byte = *buf.first()?;

    if first_byte != TLS_HANDSHAKE_RECORD {
        return Some(false);
    }

    // record type (1) + record version (2) + record length (2)
    if buf.len() < 5 {
        return None;
    }

    let record_len = u32::from(buf[3]) << 8 | u32::from(buf[4]);
    if record_len < TLS_CLIENT_HELLO_MIN_LEN {
        return Some(false);
    }

    if buf.len() < 6 {
        return None;
    }

    if buf[5] != TLS_CLIENT_HELLO {
        return Some(false);
    }

    if buf.len() < 9 {
        return None;
    }

    let handshake_len = u32::from(buf[6]) << 16 | u32::from(buf[7]) << 8 | u32::from(buf[8]);

    // the message must fit the enclosing record
    if handshake_len + TLS_HANDSHAKE_HEADER_LEN > record_len {
        return Some(false);
    }

    Some(handshake_len >= TLS_CLIENT_HELLO_MIN_LEN)
}

/// Reads from `reader` into `buffer` until the leading bytes are known to
/// be a TLS ClientHello or not.
///
/// Nothing read is ever discarded: on return `buffer` holds every byte
/// taken off the stream, in order, ready to be replayed downstream.
pub async fn detect_tls<R>(reader: &mut R, buffer: &mut BytesMut) -> Result<bool, DetectError>
where
    R: AsyncRead + Unpin,
{
    loop {
        if let Some(is_tls) = is_tls_client_hello(&buffer[..]) {
            return Ok(is_tls);
        }

        buffer.reserve(READ_CHUNK);

        let read = reader.read_buf(buffer).await?;
        trace!("detect read {} bytes, {} buffered", read, buffer.len());

        if read == 0 {
            return Err(DetectError::PeerClosed);
        }
    }
}
