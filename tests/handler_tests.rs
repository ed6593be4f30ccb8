//! End-to-end tunnel handling over in-memory request streams and loopback
//! TCP targets.

mod common;

use common::*;
use http::Method;
use simple_network_relay::dialer::Dialer;
use simple_network_relay::handler::TunnelHandler;
use simple_network_relay::resolver::{DEFAULT_RESOLVE_TIMEOUT, DestinationResolver, Resolve};
use simple_network_relay::status::ProxyStatus;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

fn handler<R: Resolve>(resolver: R) -> Arc<TunnelHandler<R>> {
    Arc::new(TunnelHandler::new(
        SECRET,
        DestinationResolver::with_resolver(resolver, DEFAULT_RESOLVE_TIMEOUT),
        Dialer::new(Duration::from_secs(2)),
    ))
}

/// Run a request to completion when it is declined and return what the
/// client saw.
async fn run_declined<R: Resolve + 'static>(
    handler: Arc<TunnelHandler<R>>,
    request: simple_network_relay::classifier::TunnelRequest,
) -> (ProxyStatus, ProxyStatus, Vec<u8>) {
    let (responder, mut client) = request_stream();
    let returned = handler
        .handle(request, responder, CancellationToken::new())
        .await
        .unwrap();
    let written = client.status.await.unwrap();
    let body = read_all(&mut client.response).await;
    (returned, written, body)
}

#[tokio::test]
async fn test_non_connect_goes_direct() {
    let resolver = CountingResolver::default();
    let (returned, written, body) = run_declined(
        handler(resolver.clone()),
        request(Method::GET, "127.0.0.1:80", Some(SECRET)),
    )
    .await;

    assert_eq!(returned, ProxyStatus::GoDirect);
    assert_eq!(written, ProxyStatus::GoDirect);
    assert_eq!(written.code().as_u16(), 503);
    assert!(body.is_empty());
    assert_eq!(resolver.lookups(), 0);
}

#[tokio::test]
async fn test_extended_connect_goes_direct() {
    let mut req = connect("127.0.0.1:80");
    req.protocol = Some("connect-udp".to_string());

    let (_, written, _) = run_declined(handler(CountingResolver::default()), req).await;
    assert_eq!(written, ProxyStatus::GoDirect);
}

#[tokio::test]
async fn test_bad_secret_is_blocked_before_resolution() {
    let resolver = CountingResolver::default().with_entry("target.test", &["127.0.0.1"]);

    for secret in [Some("wrong"), Some(""), None] {
        let (returned, written, body) = run_declined(
            handler(resolver.clone()),
            request(Method::CONNECT, "target.test:443", secret),
        )
        .await;
        assert_eq!(returned, ProxyStatus::Blocked, "secret {:?}", secret);
        assert_eq!(written.code().as_u16(), 502);
        assert!(body.is_empty());
    }

    assert_eq!(resolver.lookups(), 0);
}

#[tokio::test]
async fn test_unknown_host_goes_direct() {
    let resolver = CountingResolver::default();
    let (returned, _, _) =
        run_declined(handler(resolver.clone()), connect("nowhere.test:443")).await;

    assert_eq!(returned, ProxyStatus::GoDirect);
    assert_eq!(resolver.lookups(), 1);
}

#[tokio::test]
async fn test_invalid_port_goes_direct() {
    let resolver = CountingResolver::default().with_entry("target.test", &["127.0.0.1"]);
    for authority in ["target.test:https", "target.test:", "target.test:70000"] {
        let (returned, _, _) = run_declined(handler(resolver.clone()), connect(authority)).await;
        assert_eq!(returned, ProxyStatus::GoDirect, "authority {}", authority);
    }
    assert_eq!(resolver.lookups(), 0);
}

#[tokio::test]
async fn test_refused_connection_goes_direct() {
    let addr = closed_port().await;
    let (returned, written, _) = run_declined(
        handler(CountingResolver::default()),
        connect(&addr.to_string()),
    )
    .await;

    assert_eq!(returned, ProxyStatus::GoDirect);
    assert_eq!(
        written.advisory(),
        Some("SimpleNetworkRelay; error=destination_unavailable")
    );
}

#[tokio::test]
async fn test_literal_ip_tunnel_echoes_without_lookup() {
    let target = echo_target().await;
    let resolver = CountingResolver::default();
    let handler = handler(resolver.clone());
    let (responder, mut client) = request_stream();

    let task = tokio::spawn({
        let handler = Arc::clone(&handler);
        async move {
            handler
                .handle(connect(&target.to_string()), responder, CancellationToken::new())
                .await
        }
    });

    assert_eq!(client.status.await.unwrap(), ProxyStatus::Established);

    let payload: Vec<u8> = (0..64 * 1024).map(|i| (i % 251) as u8).collect();
    let mut body = client.body;
    let send = async {
        body.write_all(&payload).await.unwrap();
        body.shutdown().await.unwrap();
    };
    let (_, echoed) = futures::join!(send, read_all(&mut client.response));

    assert_eq!(echoed.len(), payload.len());
    assert!(echoed == payload);
    assert_eq!(task.await.unwrap().unwrap(), ProxyStatus::Established);
    assert_eq!(resolver.lookups(), 0);
}

#[tokio::test]
async fn test_named_destination_uses_resolver() {
    let target = echo_target().await;
    let resolver = CountingResolver::default().with_entry("echo.test", &["127.0.0.1"]);
    let handler = handler(resolver.clone());
    let (responder, mut client) = request_stream();

    let authority = format!("echo.test:{}", target.port());
    let task = tokio::spawn(async move {
        handler
            .handle(connect(&authority), responder, CancellationToken::new())
            .await
    });

    assert_eq!(client.status.await.unwrap(), ProxyStatus::Established);
    client.body.write_all(b"ping").await.unwrap();
    client.body.shutdown().await.unwrap();
    assert_eq!(read_all(&mut client.response).await, b"ping");

    task.await.unwrap().unwrap();
    assert_eq!(resolver.lookups(), 1);
}

#[tokio::test]
async fn test_target_close_ends_response_but_not_request() {
    let (addr, accepted) = manual_target().await;
    let handler = handler(CountingResolver::default());
    let (responder, mut client) = request_stream();

    let task = tokio::spawn(async move {
        handler
            .handle(connect(&addr.to_string()), responder, CancellationToken::new())
            .await
    });

    assert_eq!(client.status.await.unwrap(), ProxyStatus::Established);
    let mut target = accepted.await.unwrap();

    target.write_all(b"bye").await.unwrap();
    target.shutdown().await.unwrap();
    assert_eq!(read_all(&mut client.response).await, b"bye");

    // The client may still send after the destination finished.
    client.body.write_all(b"still here").await.unwrap();
    let mut buf = [0u8; 10];
    target.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"still here");
    assert!(!task.is_finished());

    client.body.shutdown().await.unwrap();
    let mut rest = Vec::new();
    target.read_to_end(&mut rest).await.unwrap();
    assert!(rest.is_empty());

    assert_eq!(task.await.unwrap().unwrap(), ProxyStatus::Established);
}

#[tokio::test]
async fn test_cancel_during_resolution() {
    let handler = handler(StalledResolver);
    let (responder, client) = request_stream();
    let cancel = CancellationToken::new();

    let task = tokio::spawn({
        let cancel = cancel.clone();
        async move { handler.handle(connect("stalled.test:443"), responder, cancel).await }
    });

    tokio::time::sleep(Duration::from_millis(20)).await;
    cancel.cancel();

    let returned = timeout(Duration::from_secs(1), task)
        .await
        .expect("handler should stop once cancelled")
        .unwrap()
        .unwrap();
    assert_eq!(returned, ProxyStatus::GoDirect);
    assert_eq!(client.status.await.unwrap(), ProxyStatus::GoDirect);
}

#[tokio::test]
async fn test_cancel_during_relay_closes_outbound() {
    let (addr, accepted) = manual_target().await;
    let handler = handler(CountingResolver::default());
    let (responder, client) = request_stream();
    let cancel = CancellationToken::new();

    let task = tokio::spawn({
        let cancel = cancel.clone();
        async move { handler.handle(connect(&addr.to_string()), responder, cancel).await }
    });

    assert_eq!(client.status.await.unwrap(), ProxyStatus::Established);
    let mut target = accepted.await.unwrap();

    cancel.cancel();
    assert_eq!(task.await.unwrap().unwrap(), ProxyStatus::Established);

    let mut rest = Vec::new();
    let n = timeout(Duration::from_secs(1), target.read_to_end(&mut rest))
        .await
        .expect("outbound socket should be closed")
        .unwrap();
    assert_eq!(n, 0);
}
