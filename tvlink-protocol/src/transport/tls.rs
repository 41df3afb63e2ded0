//! TLS connector and framed message stream
//!
//! [`connect_tls`] opens the socket and captures the TV's certificate.
//! [`MessageStream`] layers the varint framing and envelope codec on top of
//! any byte stream, so tests can drive it over `tokio::io::duplex`.

use crate::certificate::ClientIdentity;
use crate::codec::{Envelope, FrameReader};
use crate::observer::{Observer, WireDirection};
use crate::{ProtocolError, Result};
use bytes::Bytes;
use openssl::ssl::Ssl;
use openssl::x509::X509;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{timeout, Duration};
use tokio_openssl::SslStream;
use tracing::{debug, info, warn};

use super::tls_config;

/// Read buffer size per socket read
const READ_CHUNK: usize = 4096;

/// Open a TLS connection presenting `identity`
///
/// Returns the stream and the certificate the TV presented.
pub async fn connect_tls(
    addr: SocketAddr,
    identity: &ClientIdentity,
    connect_timeout: Duration,
) -> Result<(SslStream<TcpStream>, X509)> {
    info!("Connecting to {} via TLS", addr);

    let connector = tls_config::create_client_config(identity)?;

    let tcp_stream = timeout(connect_timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| ProtocolError::Timeout(format!("TCP connect to {}", addr)))?
        .map_err(|e| ProtocolError::from_io_error(e, "TCP connect"))?;
    tcp_stream.set_nodelay(true)?;

    debug!("TCP connection established to {}", addr);

    let ssl = Ssl::new(connector.context())?;
    let mut tls_stream = SslStream::new(ssl, tcp_stream)?;

    timeout(connect_timeout, Pin::new(&mut tls_stream).connect())
        .await
        .map_err(|_| ProtocolError::Timeout(format!("TLS handshake with {}", addr)))?
        .map_err(|e| {
            warn!("TLS handshake with {} failed: {}", addr, e);
            ProtocolError::Tls(e)
        })?;

    let peer_certificate = tls_stream.ssl().peer_certificate().ok_or_else(|| {
        ProtocolError::ConnectionClosed(format!("{} presented no certificate", addr))
    })?;

    info!("TLS connection established to {}", addr);
    Ok((tls_stream, peer_certificate))
}

/// Envelope-level stream over any async byte stream
pub struct MessageStream<S> {
    stream: S,
    reader: FrameReader,
    pending: VecDeque<Bytes>,
    corrupt: bool,
    observer: Arc<dyn Observer>,
}

impl<S> MessageStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, observer: Arc<dyn Observer>) -> Self {
        Self {
            stream,
            reader: FrameReader::new(),
            pending: VecDeque::new(),
            corrupt: false,
            observer,
        }
    }

    /// Write one framed envelope
    pub async fn send(&mut self, envelope: &Envelope) -> Result<()> {
        let frame = envelope.to_frame();
        self.stream
            .write_all(&frame)
            .await
            .map_err(|e| ProtocolError::from_io_error(e, "write"))?;
        self.stream
            .flush()
            .await
            .map_err(|e| ProtocolError::from_io_error(e, "flush"))?;

        self.observer
            .on_wire(WireDirection::Outbound, envelope.message_type, frame.len());
        Ok(())
    }

    /// Next envelope from the stream
    ///
    /// Cancel-safe: bytes are only consumed once a socket read completes, and
    /// complete frames are queued until returned. A frame that fails to decode
    /// is dropped and reported; the following frames are unaffected. Broken
    /// framing is reported once, after which the stream counts as closed.
    pub async fn recv(&mut self) -> Result<Envelope> {
        loop {
            if self.corrupt {
                return Err(ProtocolError::ConnectionClosed(
                    "framing lost on corrupt stream".to_string(),
                ));
            }

            if let Some(frame) = self.pending.pop_front() {
                let envelope = Envelope::decode(&frame)?;
                self.observer
                    .on_wire(WireDirection::Inbound, envelope.message_type, frame.len());
                return Ok(envelope);
            }

            let mut chunk = [0u8; READ_CHUNK];
            let n = self
                .stream
                .read(&mut chunk)
                .await
                .map_err(|e| ProtocolError::from_io_error(e, "read"))?;
            if n == 0 {
                return Err(ProtocolError::ConnectionClosed(
                    "peer closed the connection".to_string(),
                ));
            }

            match self.reader.push(&chunk[..n]) {
                Ok(frames) => self.pending.extend(frames),
                Err(e) => {
                    self.corrupt = true;
                    self.reader.clear();
                    return Err(e);
                }
            }
        }
    }

    /// Close the write half
    pub async fn shutdown(&mut self) {
        if let Err(e) = self.stream.shutdown().await {
            debug!("Error during stream shutdown: {}", e);
        }
    }

    /// Give back the underlying stream, dropping anything buffered
    pub fn into_inner(self) -> S {
        self.stream
    }
}
