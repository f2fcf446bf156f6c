//! Submit a batch of asynchronous GET requests and print each result as its
//! callback fires.
//!
//! Usage: `cargo run --example async_batch [url] [count]`

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn main() -> Result<(), hoist::Error> {
    let mut args = std::env::args().skip(1);
    let url = args.next().unwrap_or_else(|| "http://localhost:8080/".to_string());
    let count: usize = args.next().and_then(|c| c.parse().ok()).unwrap_or(10);

    let event_loop = hoist::EventLoop::new()?;
    let completed = Arc::new(AtomicUsize::new(0));

    let mut batch = Vec::with_capacity(count);
    for i in 0..count {
        let completed = Arc::clone(&completed);
        batch.push(event_loop.pool().acquire(
            url.clone(),
            Duration::from_secs(5),
            Some(Box::new(move |req| {
                println!(
                    "[{i}] {} -> {} ({}) in {:?}",
                    req.url(),
                    req.response_status_code(),
                    req.completion_status(),
                    req.total_elapsed(),
                );
                completed.fetch_add(1, Ordering::Relaxed);
            })),
            None,
        ));
    }

    event_loop.start_requests(batch);

    while event_loop.has_unfinished_requests() {
        std::thread::sleep(Duration::from_millis(10));
    }

    println!("{} of {count} requests completed", completed.load(Ordering::Relaxed));
    Ok(())
}
