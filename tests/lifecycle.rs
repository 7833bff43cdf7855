//! Connection lifecycle tests: callback dispatch order, buffering versus
//! streaming, terminal outcomes, and the auth/cache hooks.

mod common;

use common::{FINISH_TIMEOUT, finish_signal, server_with_body, wait_finished};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use urlconn::{
    CachedResponse, ConnectionState, ContextConfig, MemoryCache, Queue, Request, RequestContext,
    ResponseCache, StaticCredentials,
};
use wiremock::matchers::{header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn context() -> RequestContext {
    RequestContext::new(Queue::new(2))
}

#[tokio::test]
async fn buffered_body_is_chunk_concatenation() {
    let body: &[u8] = b"the quick brown fox jumps over the lazy dog";
    let server = server_with_body("/page", body).await;
    let context = context();

    let (tx, rx) = oneshot::channel();
    let connection = context
        .connection_with_request(
            Request::get(&format!("{}/page", server.uri())).unwrap(),
            Box::new(move |conn| {
                let _ = tx.send((conn.http_status(), conn.data(), conn.error().is_some()));
            }),
        )
        .unwrap();

    let (status, data, errored) = tokio::time::timeout(FINISH_TIMEOUT, rx)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(status, Some(200));
    assert_eq!(data.as_ref(), body);
    assert!(!errored);
    assert_eq!(connection.state(), ConnectionState::Finished);
    assert_eq!(context.in_flight_len(), 0);
}

#[tokio::test]
async fn streaming_bypasses_the_buffer() {
    let body: &[u8] = b"streamed payload bytes";
    let server = server_with_body("/stream", body).await;
    let context = context();

    let collected = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&collected);

    let connection = context.connection();
    connection.set_on_data(move |chunk| sink.lock().unwrap().extend_from_slice(&chunk));
    let finished = finish_signal(&connection);
    connection
        .enqueue_with_request(Request::get(&format!("{}/stream", server.uri())).unwrap())
        .unwrap();
    wait_finished(finished).await;

    assert_eq!(collected.lock().unwrap().as_slice(), body);
    assert!(connection.data().is_empty());
    assert!(connection.error().is_none());
}

#[tokio::test]
async fn callbacks_fire_in_order_and_finished_exactly_once() {
    let server = server_with_body("/ordered", b"abc").await;
    let context = context();

    let events = Arc::new(Mutex::new(Vec::<&'static str>::new()));
    let finish_count = Arc::new(AtomicUsize::new(0));

    let connection = context.connection();
    {
        let events = Arc::clone(&events);
        connection.set_on_response(move |info| {
            assert_eq!(info.http_status(), 200);
            events.lock().unwrap().push("response");
        });
    }
    {
        let events = Arc::clone(&events);
        connection.set_on_data(move |_chunk| events.lock().unwrap().push("data"));
    }
    let (tx, rx) = oneshot::channel();
    {
        let events = Arc::clone(&events);
        let finish_count = Arc::clone(&finish_count);
        connection.set_on_finished(move |_conn| {
            events.lock().unwrap().push("finished");
            finish_count.fetch_add(1, Ordering::SeqCst);
            let _ = tx.send(());
        });
    }

    connection
        .enqueue_with_request(Request::get(&format!("{}/ordered", server.uri())).unwrap())
        .unwrap();
    tokio::time::timeout(FINISH_TIMEOUT, rx).await.unwrap().unwrap();

    let events = events.lock().unwrap().clone();
    assert_eq!(events.first(), Some(&"response"));
    assert_eq!(events.last(), Some(&"finished"));
    assert!(events.iter().filter(|e| **e == "data").count() >= 1);
    assert_eq!(finish_count.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn transport_failure_reaches_on_finished() {
    // Nothing listens on port 1.
    let context = context();
    let connection = context.connection();
    let finished = finish_signal(&connection);
    connection
        .enqueue_with_request(Request::get("http://127.0.0.1:1/unreachable").unwrap())
        .unwrap();
    wait_finished(finished).await;

    assert_eq!(connection.state(), ConnectionState::Finished);
    let error = connection.error().expect("transport failure must surface");
    assert!(!error.is_cancelled());
    assert!(connection.response().is_none());
    assert_eq!(context.in_flight_len(), 0);
}

#[tokio::test]
async fn http_error_status_is_a_successful_connection() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404).set_body_bytes(b"gone".to_vec()))
        .mount(&server)
        .await;
    let context = context();

    let connection = context.connection();
    let finished = finish_signal(&connection);
    connection
        .enqueue_with_request(Request::get(&format!("{}/missing", server.uri())).unwrap())
        .unwrap();
    wait_finished(finished).await;

    // Status is the caller's business; the transport succeeded.
    assert!(connection.error().is_none());
    assert_eq!(connection.http_status(), Some(404));
    assert_eq!(connection.data().as_ref(), b"gone");
}

#[tokio::test]
async fn auth_challenge_is_forwarded_and_answered() {
    let server = MockServer::start().await;
    // Mount order matters: the credentialed mock is checked first.
    Mock::given(method("GET"))
        .and(path("/private"))
        .and(header_exists("authorization"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"secret".to_vec()))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/private"))
        .respond_with(
            ResponseTemplate::new(401).insert_header("www-authenticate", "Basic realm=\"test\""),
        )
        .mount(&server)
        .await;

    let context = RequestContext::with_config(
        Queue::new(1),
        ContextConfig {
            authentication: Some(Arc::new(StaticCredentials::new("user", "pass"))),
            ..ContextConfig::default()
        },
    );

    let connection = context.connection();
    let finished = finish_signal(&connection);
    connection
        .enqueue_with_request(Request::get(&format!("{}/private", server.uri())).unwrap())
        .unwrap();
    wait_finished(finished).await;

    assert!(connection.error().is_none());
    assert_eq!(connection.http_status(), Some(200));
    assert_eq!(connection.data().as_ref(), b"secret");
}

#[tokio::test]
async fn without_delegate_the_challenge_response_stands() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/private"))
        .respond_with(
            ResponseTemplate::new(401).insert_header("www-authenticate", "Basic realm=\"test\""),
        )
        .mount(&server)
        .await;

    let context = context();
    let connection = context.connection();
    let finished = finish_signal(&connection);
    connection
        .enqueue_with_request(Request::get(&format!("{}/private", server.uri())).unwrap())
        .unwrap();
    wait_finished(finished).await;

    assert!(connection.error().is_none());
    assert_eq!(connection.http_status(), Some(401));
}

#[tokio::test]
async fn rejected_credentials_surface_the_second_refusal() {
    let server = MockServer::start().await;
    // The server refuses every attempt, credentialed or not.
    Mock::given(method("GET"))
        .and(path("/private"))
        .respond_with(
            ResponseTemplate::new(401).insert_header("www-authenticate", "Basic realm=\"test\""),
        )
        .mount(&server)
        .await;

    let context = RequestContext::with_config(
        Queue::new(1),
        ContextConfig {
            authentication: Some(Arc::new(StaticCredentials::new("user", "wrong"))),
            ..ContextConfig::default()
        },
    );

    let connection = context.connection();
    let finished = finish_signal(&connection);
    connection
        .enqueue_with_request(Request::get(&format!("{}/private", server.uri())).unwrap())
        .unwrap();
    wait_finished(finished).await;

    // The second 401 stands as the final response; no further retries.
    assert!(connection.error().is_none());
    assert_eq!(connection.http_status(), Some(401));
    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2, "one original attempt plus one credentialed retry");
}

fn cached_context(cache: Arc<MemoryCache>) -> RequestContext {
    RequestContext::with_config(
        Queue::new(1),
        ContextConfig {
            cache: Some(cache),
            ..ContextConfig::default()
        },
    )
}

#[tokio::test]
async fn successful_buffered_response_is_offered_to_the_cache() {
    let server = server_with_body("/cacheable", b"cache me").await;
    let cache = Arc::new(MemoryCache::new());
    let context = cached_context(Arc::clone(&cache));

    let connection = context.connection();
    let finished = finish_signal(&connection);
    let request = Request::get(&format!("{}/cacheable", server.uri())).unwrap();
    let key = request.resource_id();
    connection.enqueue_with_request(request).unwrap();
    wait_finished(finished).await;

    let stored = cache.load(&key).await.expect("response should be cached");
    assert_eq!(stored.body.as_ref(), b"cache me");
    assert_eq!(stored.info.http_status(), 200);
}

#[tokio::test]
async fn will_cache_callback_can_replace_the_entry() {
    let server = server_with_body("/rewrite", b"original").await;
    let cache = Arc::new(MemoryCache::new());
    let context = cached_context(Arc::clone(&cache));

    let connection = context.connection();
    connection.set_on_will_cache_response(|candidate| {
        Some(CachedResponse {
            body: bytes::Bytes::from_static(b"rewritten"),
            ..candidate
        })
    });
    let finished = finish_signal(&connection);
    let request = Request::get(&format!("{}/rewrite", server.uri())).unwrap();
    let key = request.resource_id();
    connection.enqueue_with_request(request).unwrap();
    wait_finished(finished).await;

    assert_eq!(cache.load(&key).await.unwrap().body.as_ref(), b"rewritten");
}

#[tokio::test]
async fn will_cache_callback_can_suppress_caching() {
    let server = server_with_body("/nocache", b"volatile").await;
    let cache = Arc::new(MemoryCache::new());
    let context = cached_context(Arc::clone(&cache));

    let connection = context.connection();
    connection.set_on_will_cache_response(|_candidate| None);
    let finished = finish_signal(&connection);
    connection
        .enqueue_with_request(Request::get(&format!("{}/nocache", server.uri())).unwrap())
        .unwrap();
    wait_finished(finished).await;

    assert!(cache.is_empty().await);
    // The connection itself still completed normally.
    assert_eq!(connection.http_status(), Some(200));
}
