//! Outcome vocabulary shared with clients.
//!
//! Every CONNECT request is answered with exactly one of these. Declines
//! carry a `proxy-status` header so the client can tell "try a direct
//! connection" apart from "you were refused".

use http::header::{HeaderName, HeaderValue};
use http::{Response, StatusCode};

/// Name of the advisory header carried by declined requests.
pub const PROXY_STATUS: HeaderName = HeaderName::from_static("proxy-status");

const DESTINATION_UNAVAILABLE: &str = "SimpleNetworkRelay; error=destination_unavailable";
const CONNECTION_REFUSED: &str = "SimpleNetworkRelay; error=connection_refused";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyStatus {
    /// Tunnel open; body bytes follow.
    Established,
    /// Proxy declined, client should connect to the destination itself.
    GoDirect,
    /// Proxy refused the client.
    Blocked,
}

impl ProxyStatus {
    pub fn code(self) -> StatusCode {
        match self {
            ProxyStatus::Established => StatusCode::OK,
            ProxyStatus::GoDirect => StatusCode::SERVICE_UNAVAILABLE,
            ProxyStatus::Blocked => StatusCode::BAD_GATEWAY,
        }
    }

    /// Machine-readable reason token, absent on success.
    pub fn error_token(self) -> Option<&'static str> {
        match self {
            ProxyStatus::Established => None,
            ProxyStatus::GoDirect => Some("destination_unavailable"),
            ProxyStatus::Blocked => Some("connection_refused"),
        }
    }

    /// Full `proxy-status` header value, absent on success.
    pub fn advisory(self) -> Option<&'static str> {
        match self {
            ProxyStatus::Established => None,
            ProxyStatus::GoDirect => Some(DESTINATION_UNAVAILABLE),
            ProxyStatus::Blocked => Some(CONNECTION_REFUSED),
        }
    }

    /// Response head for this outcome. No body is ever attached to a decline.
    pub fn to_response(self) -> Response<()> {
        let mut response = Response::new(());
        *response.status_mut() = self.code();
        if let Some(advisory) = self.advisory() {
            response
                .headers_mut()
                .insert(PROXY_STATUS, HeaderValue::from_static(advisory));
        }
        response
    }
}
