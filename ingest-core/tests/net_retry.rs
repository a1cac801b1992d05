mod support;

use domain::FetchContext;
use ingest_core::ClientPool;
use std::time::Duration;
use support::{StubResponse, StubServer};

#[tokio::test]
async fn retries_server_errors_then_surfaces_overload() {
    // One initial attempt plus two retries, all 503: exhausts the retry
    // budget and surfaces as a remote-overload error rather than hanging.
    let server = StubServer::start(vec![
        StubResponse::status(503, "down"),
        StubResponse::status(503, "down"),
        StubResponse::status(503, "down"),
    ]);

    let pool = ClientPool::new(10);
    let pooled = pool.get(ingest_core::PoolKind::General, None, None);
    let ctx = FetchContext::new(Duration::from_secs(30));

    let result = ingest_core::net::fetch_text_with_retry(
        &pool,
        None,
        &pooled.client,
        &server.url("/feed.xml"),
        Duration::from_secs(5),
        &ctx,
        2,
    )
    .await;

    match result {
        Err(domain::IngestError::RemoteOverload { status }) => assert_eq!(status, 503),
        other => panic!("expected RemoteOverload, got {other:?}"),
    }
}

#[tokio::test]
async fn succeeds_after_a_transient_failure() {
    let server = StubServer::start(vec![
        StubResponse::status(503, "down"),
        StubResponse::ok("recovered"),
    ]);

    let pool = ClientPool::new(10);
    let pooled = pool.get(ingest_core::PoolKind::General, None, None);
    let ctx = FetchContext::new(Duration::from_secs(30));

    let body = ingest_core::net::fetch_text_with_retry(
        &pool,
        None,
        &pooled.client,
        &server.url("/feed.xml"),
        Duration::from_secs(5),
        &ctx,
        2,
    )
    .await
    .expect("second attempt should succeed");

    assert_eq!(body, "recovered");
}

#[tokio::test]
async fn cloudflare_challenge_is_retried_through_the_user_agent_bound_pool() {
    // First response is a Cloudflare challenge page on the general client;
    // the second is the real content, served once `fetch_text_with_retry`
    // falls back to the curl-like UA-bound client.
    let server = StubServer::start(vec![
        StubResponse::status(403, "<html>Checking your browser, Cloudflare</html>"),
        StubResponse::ok("real content"),
    ]);

    let pool = ClientPool::new(10);
    let pooled = pool.get(ingest_core::PoolKind::General, None, None);
    let ctx = FetchContext::new(Duration::from_secs(30));

    let body = ingest_core::net::fetch_text_with_retry(
        &pool,
        None,
        &pooled.client,
        &server.url("/article"),
        Duration::from_secs(5),
        &ctx,
        0,
    )
    .await
    .expect("cloudflare bypass should recover the real content");

    assert_eq!(body, "real content");
}
