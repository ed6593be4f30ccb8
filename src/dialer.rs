use crate::error::ProxyError;
use log::debug;
use std::io;
use std::net::SocketAddr;
use tokio::net::TcpStream;
use tokio::time::{Duration, timeout};

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Opens outbound TCP connections under a fixed deadline.
#[derive(Debug, Clone, Copy)]
pub struct Dialer {
    connect_timeout: Duration,
}

impl Default for Dialer {
    fn default() -> Self {
        Self::new(DEFAULT_CONNECT_TIMEOUT)
    }
}

impl Dialer {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }

    /// Refusal, unreachability and timeout all surface as the same `Dial` error.
    pub async fn dial(&self, addr: SocketAddr) -> Result<TcpStream, ProxyError> {
        let stream = timeout(self.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| ProxyError::Dial {
                addr,
                source: io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("connect timed out after {:?}", self.connect_timeout),
                ),
            })?
            .map_err(|source| ProxyError::Dial { addr, source })?;

        debug!("Connected to target {}", addr);
        Ok(stream)
    }
}
