//! Common test utilities for urlconn integration tests

#![allow(dead_code)]

use std::time::Duration;
use tokio::sync::oneshot;
use urlconn::Connection;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// How long tests wait for a terminal callback before giving up
pub const FINISH_TIMEOUT: Duration = Duration::from_secs(5);

/// Start a mock server answering GET `route` with `body`
pub async fn server_with_body(route: &str, body: &'static [u8]) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.to_vec()))
        .mount(&server)
        .await;
    server
}

/// Start a mock server answering GET `route` with `body` after `delay`
pub async fn slow_server(route: &str, body: &'static [u8], delay: Duration) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(body.to_vec())
                .set_delay(delay),
        )
        .mount(&server)
        .await;
    server
}

/// Register an `on_finished` callback that signals a oneshot channel.
///
/// Must be called before the connection is enqueued.
pub fn finish_signal(connection: &Connection) -> oneshot::Receiver<()> {
    let (tx, rx) = oneshot::channel();
    connection.set_on_finished(move |_conn| {
        let _ = tx.send(());
    });
    rx
}

/// Await a finish signal, panicking if it does not arrive in time
pub async fn wait_finished(rx: oneshot::Receiver<()>) {
    tokio::time::timeout(FINISH_TIMEOUT, rx)
        .await
        .expect("connection did not finish in time")
        .expect("on_finished was dropped without firing");
}
