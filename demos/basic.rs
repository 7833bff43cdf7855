//! Basic fetch example
//!
//! Demonstrates the core flow:
//! - Obtaining the shared context
//! - Issuing a request with an on_finished callback
//! - Reading status, error, and buffered body from the connection

use urlconn::{Request, RequestContext};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing for logging (optional)
    // Uncomment if you add tracing-subscriber to your dependencies:
    // tracing_subscriber::fmt::init();

    let url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "https://www.example.com/".to_string());

    let context = RequestContext::shared();
    let connection = context.connection_with_request(
        Request::get(&url)?,
        Box::new(|conn| match conn.error() {
            None => println!(
                "status {:?}, received {} bytes",
                conn.http_status(),
                conn.data().len()
            ),
            Some(err) => eprintln!("request failed: {err}"),
        }),
    )?;

    // Wait for the terminal callback before the process exits.
    connection.finished().await;
    Ok(())
}
