//! Custom queue context example
//!
//! Demonstrates:
//! - A context bound to a two-slot queue with an on-request callback
//! - Per-chunk streaming via on_data
//! - Duplicate admission refusal and cancellation

use std::sync::Arc;
use urlconn::{Queue, Request, RequestContext};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing for logging (optional)
    // Uncomment if you add tracing-subscriber to your dependencies:
    // tracing_subscriber::fmt::init();

    let queue = Queue::named("demo", 2);
    let context = RequestContext::with_on_request(
        queue,
        Arc::new(|started| {
            if started {
                println!("connection admitted and scheduled");
            } else {
                println!("admission refused (duplicate resource)");
            }
        }),
    );

    // Stream one URL chunk by chunk.
    let streamed = context.connection();
    streamed.set_on_response(|info| println!("response: {}", info.http_status()));
    streamed.set_on_data(|chunk| println!("chunk: {} bytes", chunk.len()));
    streamed.set_on_finished(|conn| println!("streamed connection done: {:?}", conn.state()));
    streamed.enqueue_with_request(Request::get("https://www.example.com/")?)?;

    // A second request for the same resource is refused while the first is
    // in flight (query strings do not make it a different resource).
    match context.connection_with_request(
        Request::get("https://www.example.com/?retry=1")?,
        Box::new(|_conn| ()),
    ) {
        Ok(_) => println!("unexpectedly admitted"),
        Err(err) => println!("as expected: {err}"),
    }

    streamed.finished().await;

    // Enqueue and immediately cancel; on_finished still fires exactly once.
    let cancelled = context.connection();
    cancelled.set_on_finished(|conn| {
        println!(
            "cancelled connection done, cancelled = {}",
            conn.is_cancelled()
        );
    });
    cancelled.enqueue_with_request(Request::get("https://www.example.com/big")?)?;
    cancelled.cancel_and_wait().await;

    Ok(())
}
