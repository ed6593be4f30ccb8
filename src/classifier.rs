use crate::error::ProxyError;
use http::{HeaderMap, Method, Request};
use log::info;
use std::net::SocketAddr;

/// Header carrying the shared secret.
pub const AUTH_HEADER: &str = "auth";

/// Read-only snapshot of an inbound tunnel request.
#[derive(Debug, Clone)]
pub struct TunnelRequest {
    pub method: Method,
    /// Extended CONNECT `:protocol` value, e.g. `connect-udp`.
    pub protocol: Option<String>,
    /// Destination as `host[:port]`.
    pub authority: String,
    pub headers: HeaderMap,
    pub remote_addr: SocketAddr,
}

impl TunnelRequest {
    pub fn from_head<T>(req: &Request<T>, protocol: Option<String>, remote_addr: SocketAddr) -> Self {
        let authority = req
            .uri()
            .authority()
            .map(|authority| authority.as_str().to_string())
            .unwrap_or_default();

        Self {
            method: req.method().clone(),
            protocol,
            authority,
            headers: req.headers().clone(),
            remote_addr,
        }
    }

    /// Plain CONNECT: the stream tunnel, not an extended-CONNECT variant.
    pub fn is_plain_connect(&self) -> bool {
        self.method == Method::CONNECT && self.protocol.is_none()
    }

    /// Raw header bytes; non-ASCII secrets compare byte for byte.
    fn auth_value(&self) -> Option<&[u8]> {
        self.headers.get(AUTH_HEADER).map(|value| value.as_bytes())
    }
}

/// Decide whether a request may proceed to resolution and dialing.
///
/// Anything other than plain CONNECT is told to go direct; a missing or
/// wrong `auth` header is blocked.
pub fn classify(request: &TunnelRequest, secret: &str) -> Result<(), ProxyError> {
    if !request.is_plain_connect() {
        let what = match &request.protocol {
            Some(protocol) => format!("{} with protocol '{}'", request.method, protocol),
            None => request.method.to_string(),
        };
        return Err(ProxyError::UnsupportedRequest(what));
    }

    info!(
        "CONNECT request from '{}' to '{}'",
        request.remote_addr, request.authority
    );

    match request.auth_value() {
        Some(value) if value == secret.as_bytes() => Ok(()),
        Some(_) => Err(ProxyError::Auth("Invalid shared secret".to_string())),
        None => Err(ProxyError::Auth(format!("Missing '{}' header", AUTH_HEADER))),
    }
}
