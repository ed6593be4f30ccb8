//! Shared fixtures: an in-memory responder standing in for an HTTP/3 request
//! stream, scripted resolvers and loopback TCP targets.

#![allow(dead_code)]

use async_trait::async_trait;
use http::{HeaderMap, HeaderValue, Method};
use simple_network_relay::body::{IoReader, IoWriter, Responder};
use simple_network_relay::classifier::{AUTH_HEADER, TunnelRequest};
use simple_network_relay::resolver::Resolve;
use simple_network_relay::status::ProxyStatus;
use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;

pub const SECRET: &str = "test-secret";
const PIPE_CAPACITY: usize = 64 * 1024;

/// Proxy side of a fake request stream.
pub struct TestResponder {
    status_tx: oneshot::Sender<ProxyStatus>,
    body: DuplexStream,
    response: DuplexStream,
}

/// Client side of a fake request stream.
pub struct TestClient {
    pub status: oneshot::Receiver<ProxyStatus>,
    /// Request body the client sends.
    pub body: DuplexStream,
    /// Response body the client receives.
    pub response: DuplexStream,
}

pub fn request_stream() -> (TestResponder, TestClient) {
    let (status_tx, status) = oneshot::channel();
    let (client_body, proxy_body) = tokio::io::duplex(PIPE_CAPACITY);
    let (proxy_response, client_response) = tokio::io::duplex(PIPE_CAPACITY);
    (
        TestResponder {
            status_tx,
            body: proxy_body,
            response: proxy_response,
        },
        TestClient {
            status,
            body: client_body,
            response: client_response,
        },
    )
}

#[async_trait]
impl Responder for TestResponder {
    type Reader = IoReader<DuplexStream>;
    type Writer = IoWriter<DuplexStream>;

    async fn respond(self, status: ProxyStatus) -> io::Result<(Self::Reader, Self::Writer)> {
        let _ = self.status_tx.send(status);
        Ok((IoReader::new(self.body), IoWriter::new(self.response)))
    }
}

pub fn peer() -> SocketAddr {
    "192.0.2.10:50000".parse().unwrap()
}

pub fn request(method: Method, authority: &str, secret: Option<&str>) -> TunnelRequest {
    let mut headers = HeaderMap::new();
    if let Some(secret) = secret {
        headers.insert(AUTH_HEADER, HeaderValue::from_str(secret).unwrap());
    }
    TunnelRequest {
        method,
        protocol: None,
        authority: authority.to_string(),
        headers,
        remote_addr: peer(),
    }
}

pub fn connect(authority: &str) -> TunnelRequest {
    request(Method::CONNECT, authority, Some(SECRET))
}

/// Resolver backed by a fixed table that counts its lookups.
#[derive(Clone, Default)]
pub struct CountingResolver {
    table: HashMap<String, Vec<IpAddr>>,
    lookups: Arc<AtomicUsize>,
}

impl CountingResolver {
    pub fn with_entry(mut self, host: &str, ips: &[&str]) -> Self {
        self.table.insert(
            host.to_string(),
            ips.iter().map(|ip| ip.parse().unwrap()).collect(),
        );
        self
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Resolve for CountingResolver {
    async fn lookup(&self, host: &str) -> io::Result<Vec<IpAddr>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.table
            .get(host)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no such host"))
    }
}

/// Never answers.
pub struct StalledResolver;

#[async_trait]
impl Resolve for StalledResolver {
    async fn lookup(&self, _host: &str) -> io::Result<Vec<IpAddr>> {
        std::future::pending().await
    }
}

/// Loopback target that echoes one connection and half-closes after the
/// client does.
pub async fn echo_target() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let (mut read, mut write) = stream.split();
        tokio::io::copy(&mut read, &mut write).await.unwrap();
        write.shutdown().await.unwrap();
    });
    addr
}

/// Loopback target handing its single accepted connection to the test.
pub async fn manual_target() -> (SocketAddr, oneshot::Receiver<TcpStream>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = oneshot::channel();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let _ = tx.send(stream);
    });
    (addr, rx)
}

/// Address with nothing listening on it.
pub async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

pub async fn read_all(stream: &mut DuplexStream) -> Vec<u8> {
    let mut out = Vec::new();
    stream.read_to_end(&mut out).await.unwrap();
    out
}
