//! hoist — callback-driven async HTTP client on libcurl's multi interface.
//!
//! hoist drives large numbers of concurrent HTTP/1.x and HTTP/2 requests
//! from a single background thread. Requests come out of a reusable pool,
//! carry two independent deadlines (a transport timeout and a user-facing
//! response-wait), and report completion through a callback that fires
//! exactly once per attempt.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use std::time::Duration;
//!
//! let event_loop = hoist::EventLoop::new().unwrap();
//!
//! for i in 0..100 {
//!     let request = event_loop.pool().acquire(
//!         format!("http://localhost:8080/item/{i}"),
//!         Duration::from_secs(1),
//!         Some(Box::new(|req| {
//!             println!(
//!                 "{} {} in {:?}",
//!                 req.url(),
//!                 req.response_status_code(),
//!                 req.total_elapsed()
//!             );
//!         })),
//!         None,
//!     );
//!     event_loop.start_request(request);
//! }
//!
//! while event_loop.has_unfinished_requests() {
//!     std::thread::sleep(Duration::from_millis(10));
//! }
//! ```
//!
//! # Architecture
//!
//! One reactor thread owns everything that moves: the transport's multi
//! handle, the poller the transport's sockets are registered with, both
//! deadline clocks, and the completion callbacks. User threads hand requests
//! over through a locked queue plus a wakeup and otherwise never block on
//! I/O. Request states are shared between user code, the engine, and the
//! pool through a reference-counted envelope; the last reference returns the
//! state to the pool.
//!
//! # Synchronous use
//!
//! A request acquired from a standalone [`RequestPool`] can skip the event
//! loop entirely: [`Request::perform`] blocks the calling thread and fills
//! the same response fields.
//!
//! # Platform
//!
//! Unix only: the reactor registers the transport's raw sockets with the
//! poller via `mio::unix::SourceFd`.

pub(crate) mod config;
pub(crate) mod engine;
pub(crate) mod error;
pub(crate) mod event_loop;
pub(crate) mod header;
pub(crate) mod http;
pub mod metrics;
pub(crate) mod pool;
pub(crate) mod reactor;
pub(crate) mod request;
pub(crate) mod status;
pub(crate) mod wait_index;

pub use config::Config;
pub use error::Error;
pub use event_loop::EventLoop;
pub use header::Header;
pub use http::{Method, StatusCode, Version};
pub use pool::{RequestHandle, RequestPool};
pub use request::{OnComplete, Request};
pub use status::CompletionStatus;
