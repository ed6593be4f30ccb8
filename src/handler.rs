use crate::body::{BodyWriter, Responder};
use crate::classifier::{TunnelRequest, classify};
use crate::dialer::Dialer;
use crate::error::ProxyError;
use crate::relay::relay;
use crate::resolver::{DestinationResolver, Resolve, SystemResolver};
use crate::status::ProxyStatus;
use log::{debug, info, warn};
use std::future::Future;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

/// Drives one CONNECT request from classification to the end of its tunnel.
pub struct TunnelHandler<R = SystemResolver> {
    secret: String,
    resolver: DestinationResolver<R>,
    dialer: Dialer,
}

impl<R: Resolve> TunnelHandler<R> {
    pub fn new(secret: impl Into<String>, resolver: DestinationResolver<R>, dialer: Dialer) -> Self {
        Self {
            secret: secret.into(),
            resolver,
            dialer,
        }
    }

    /// Answer `request` with exactly one status and, when established, relay
    /// until both directions finish.
    ///
    /// Returns the status written. Relay failures are logged, not returned:
    /// the client already has its 200. `Err` means the status itself could
    /// not be written.
    pub async fn handle<S: Responder>(
        &self,
        request: TunnelRequest,
        responder: S,
        cancel: CancellationToken,
    ) -> Result<ProxyStatus, ProxyError> {
        let outbound = match self.establish(&request, &cancel).await {
            Ok(outbound) => outbound,
            Err(e) => {
                self.log_decline(&request, &e);
                let status = e.status();
                decline(responder, status).await?;
                return Ok(status);
            }
        };

        let (body, writer) = responder.respond(ProxyStatus::Established).await?;
        debug!(
            "Tunnel established for '{}' to '{}'",
            request.remote_addr, request.authority
        );

        match relay(body, outbound, writer, &cancel).await {
            Ok(stats) => info!(
                "Tunnel closed for '{}': {} bytes sent, {} bytes received",
                request.authority, stats.upstream_bytes, stats.downstream_bytes
            ),
            Err(e) => info!("Tunnel closed for '{}': {}", request.authority, e),
        }

        Ok(ProxyStatus::Established)
    }

    /// Classify, resolve and dial. Any error is a terminal decline.
    async fn establish(
        &self,
        request: &TunnelRequest,
        cancel: &CancellationToken,
    ) -> Result<TcpStream, ProxyError> {
        classify(request, &self.secret)?;
        let addr = until_cancelled(cancel, self.resolver.resolve(&request.authority)).await?;
        until_cancelled(cancel, self.dialer.dial(addr)).await
    }

    fn log_decline(&self, request: &TunnelRequest, err: &ProxyError) {
        match err {
            ProxyError::UnsupportedRequest(_) => {
                debug!("Declining request from '{}': {}", request.remote_addr, err)
            }
            ProxyError::Auth(_) => warn!(
                "Rejected CONNECT from '{}' to '{}': {}",
                request.remote_addr, request.authority, err
            ),
            _ => warn!("Failed to connect to '{}': {}", request.authority, err),
        }
    }
}

/// Write a decline status and end the response without reading the body.
async fn decline<S: Responder>(responder: S, status: ProxyStatus) -> Result<(), ProxyError> {
    let (_body, mut writer) = responder.respond(status).await?;
    writer.finish().await?;
    Ok(())
}

async fn until_cancelled<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = Result<T, ProxyError>>,
) -> Result<T, ProxyError> {
    tokio::select! {
        result = fut => result,
        _ = cancel.cancelled() => Err(ProxyError::Cancelled),
    }
}
