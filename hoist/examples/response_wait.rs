//! Demonstrate the response-wait deadline: the callback fires early with
//! `ResponseWaitTimeout` while the transfer itself keeps running until the
//! transport timeout, preserving connection keep-alive.
//!
//! Usage: `cargo run --example response_wait [url]`

use std::time::Duration;

fn main() -> Result<(), hoist::Error> {
    let url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "http://localhost:8080/slow".to_string());

    let event_loop = hoist::EventLoop::new()?;

    let request = event_loop.pool().acquire(
        url,
        Duration::from_secs(2),
        Some(Box::new(|req| {
            println!(
                "callback after {:?}: {} ({})",
                req.total_elapsed(),
                req.response_status_code(),
                req.completion_status(),
            );
        })),
        Some(Duration::from_millis(50)),
    );

    event_loop.start_request(request);

    // The callback fires at ~50ms; the loop drains once the transport
    // settles the underlying transfer.
    while event_loop.has_unfinished_requests() {
        std::thread::sleep(Duration::from_millis(10));
    }
    Ok(())
}
