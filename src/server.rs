//! HTTP/3 listener: QUIC endpoint, per-connection request loop, and the
//! adapters that expose an h3 request stream to the tunnel handler.

use crate::body::{BodyReader, BodyWriter, Responder};
use crate::classifier::TunnelRequest;
use crate::config::Config;
use crate::dialer::Dialer;
use crate::error::ProxyError;
use crate::handler::TunnelHandler;
use crate::resolver::DestinationResolver;
use crate::status::ProxyStatus;
use crate::tls::create_tls_config;
use async_trait::async_trait;
use bytes::{Buf, Bytes};
use h3::error::ErrorLevel;
use h3::server::RequestStream;
use log::{debug, error, info, warn};
use quinn::crypto::rustls::QuicServerConfig;
use quinn::{Endpoint, IdleTimeout, TransportConfig};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

type H3Stream = RequestStream<h3_quinn::BidiStream<Bytes>, Bytes>;

fn h3_io_error(e: h3::Error) -> io::Error {
    io::Error::other(e.to_string())
}

/// Response side of one HTTP/3 request stream.
pub struct H3Responder {
    stream: H3Stream,
}

impl H3Responder {
    pub fn new(stream: H3Stream) -> Self {
        Self { stream }
    }
}

#[async_trait]
impl Responder for H3Responder {
    type Reader = H3BodyReader;
    type Writer = H3BodyWriter;

    async fn respond(mut self, status: ProxyStatus) -> io::Result<(H3BodyReader, H3BodyWriter)> {
        self.stream
            .send_response(status.to_response())
            .await
            .map_err(h3_io_error)?;
        let (send, recv) = self.stream.split();
        Ok((H3BodyReader { recv }, H3BodyWriter { send }))
    }
}

pub struct H3BodyReader {
    recv: RequestStream<h3_quinn::RecvStream, Bytes>,
}

#[async_trait]
impl BodyReader for H3BodyReader {
    async fn read_chunk(&mut self) -> io::Result<Option<Bytes>> {
        match self.recv.recv_data().await.map_err(h3_io_error)? {
            Some(mut chunk) => Ok(Some(chunk.copy_to_bytes(chunk.remaining()))),
            None => Ok(None),
        }
    }
}

/// DATA frames go straight to the QUIC stream, so there is no flush.
pub struct H3BodyWriter {
    send: RequestStream<h3_quinn::SendStream<Bytes>, Bytes>,
}

#[async_trait]
impl BodyWriter for H3BodyWriter {
    async fn write_chunk(&mut self, chunk: Bytes) -> io::Result<()> {
        self.send.send_data(chunk).await.map_err(h3_io_error)
    }

    async fn finish(&mut self) -> io::Result<()> {
        self.send.finish().await.map_err(h3_io_error)
    }
}

pub struct RelayServer {
    endpoint: Endpoint,
    handler: Arc<TunnelHandler>,
    shutdown: CancellationToken,
}

impl RelayServer {
    /// Load TLS material and bind the QUIC endpoint.
    pub fn bind(config: &Config) -> Result<Self, ProxyError> {
        let tls = create_tls_config(
            &config.private_key,
            &config.certificate,
            config.key_log_file.as_deref(),
        )?;
        let crypto = QuicServerConfig::try_from(tls)
            .map_err(|e| ProxyError::Tls(format!("Failed to create QUIC crypto config: {}", e)))?;

        let mut transport = TransportConfig::default();
        let idle = IdleTimeout::try_from(config.idle_timeout())
            .map_err(|e| ProxyError::Config(format!("Invalid idle timeout: {}", e)))?;
        transport.max_idle_timeout(Some(idle));

        let mut server_config = quinn::ServerConfig::with_crypto(Arc::new(crypto));
        server_config.transport_config(Arc::new(transport));

        let endpoint = Endpoint::server(server_config, config.listen_addr)?;

        let resolver = DestinationResolver::new(config.resolve_timeout());
        let dialer = Dialer::new(config.connect_timeout());
        let handler = TunnelHandler::new(config.auth_secret.clone(), resolver, dialer);

        Ok(Self {
            endpoint,
            handler: Arc::new(handler),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ProxyError> {
        Ok(self.endpoint.local_addr()?)
    }

    /// Token that stops [`RelayServer::run`] and every open tunnel.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub async fn run(self) -> Result<(), ProxyError> {
        info!("Listening for HTTP/3 connections on {}", self.local_addr()?);

        loop {
            let incoming = tokio::select! {
                incoming = self.endpoint.accept() => incoming,
                _ = self.shutdown.cancelled() => break,
            };
            let Some(incoming) = incoming else {
                break;
            };

            let handler = Arc::clone(&self.handler);
            let cancel = self.shutdown.child_token();
            tokio::spawn(async move {
                let conn = match incoming.await {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!("QUIC handshake failed: {}", e);
                        return;
                    }
                };
                if let Err(e) = serve_connection(conn, handler, cancel).await {
                    error!("HTTP/3 connection error: {}", e);
                }
            });
        }

        self.endpoint.close(0u32.into(), b"shutdown");
        self.endpoint.wait_idle().await;
        info!("Relay server stopped");
        Ok(())
    }
}

/// Accept request streams on one connection until it closes. Tunnels opened
/// on the connection are cancelled when this returns.
async fn serve_connection(
    conn: quinn::Connection,
    handler: Arc<TunnelHandler>,
    cancel: CancellationToken,
) -> Result<(), ProxyError> {
    let remote_addr = conn.remote_address();
    debug!("Accepted QUIC connection from {}", remote_addr);

    let _guard = cancel.clone().drop_guard();

    let mut h3_conn: h3::server::Connection<h3_quinn::Connection, Bytes> = h3::server::builder()
        .enable_connect(true)
        .build(h3_quinn::Connection::new(conn))
        .await
        .map_err(|e| ProxyError::Http3(e.to_string()))?;

    loop {
        let accepted = tokio::select! {
            accepted = h3_conn.accept() => accepted,
            _ = cancel.cancelled() => break,
        };

        match accepted {
            Ok(Some((req, stream))) => {
                let protocol = req
                    .extensions()
                    .get::<h3::ext::Protocol>()
                    .map(|p| p.as_str().to_owned());
                let request = TunnelRequest::from_head(&req, protocol, remote_addr);
                let handler = Arc::clone(&handler);
                let cancel = cancel.child_token();

                tokio::spawn(async move {
                    if let Err(e) = handler
                        .handle(request, H3Responder::new(stream), cancel)
                        .await
                    {
                        debug!("Failed to answer request from {}: {}", remote_addr, e);
                    }
                });
            }
            Ok(None) => break,
            Err(e) => match e.get_error_level() {
                ErrorLevel::StreamError => {
                    debug!("Skipping malformed request from {}: {}", remote_addr, e);
                }
                ErrorLevel::ConnectionError => {
                    debug!("Connection from {} closed: {}", remote_addr, e);
                    break;
                }
            },
        }
    }

    debug!("Done serving {}", remote_addr);
    Ok(())
}
