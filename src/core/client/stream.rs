// src/core/client/stream.rs

//! The transport under a node connection: plain TCP or rustls-wrapped TCP.

use crate::config::ClientOptions;
use crate::core::SpinelQError;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::{TlsConnector, rustls};
use tracing::debug;

/// A connected stream to a store node.
pub(crate) enum NodeStream {
    Tcp(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl NodeStream {
    /// Opens a stream to the node described by `options`, bounded by its connect timeout.
    pub(crate) async fn open(options: &ClientOptions) -> Result<Self, SpinelQError> {
        let addr = options.addr();
        let tcp = tokio::time::timeout(options.connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| SpinelQError::Timeout(format!("connecting to {addr}")))??;
        tcp.set_nodelay(true)?;

        if !options.tls {
            return Ok(NodeStream::Tcp(tcp));
        }

        debug!("Starting TLS handshake with {}", addr);
        let mut roots = rustls::RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let tls_config = rustls::ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();
        let connector = TlsConnector::from(Arc::new(tls_config));

        let server_name = rustls::pki_types::ServerName::try_from(options.host.clone())
            .map_err(|_| SpinelQError::Tls(format!("invalid server name '{}'", options.host)))?;

        let handshake = connector.connect(server_name, tcp);
        let tls = tokio::time::timeout(options.connect_timeout, handshake)
            .await
            .map_err(|_| SpinelQError::Timeout(format!("TLS handshake with {addr}")))?
            .map_err(|e| SpinelQError::Tls(e.to_string()))?;
        Ok(NodeStream::Tls(Box::new(tls)))
    }
}

impl AsyncRead for NodeStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            NodeStream::Tcp(s) => Pin::new(s).poll_read(cx, buf),
            NodeStream::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for NodeStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            NodeStream::Tcp(s) => Pin::new(s).poll_write(cx, buf),
            NodeStream::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            NodeStream::Tcp(s) => Pin::new(s).poll_flush(cx),
            NodeStream::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            NodeStream::Tcp(s) => Pin::new(s).poll_shutdown(cx),
            NodeStream::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}
