//! Pooled request states and the handles that keep them alive.
//!
//! Three types cooperate here:
//!
//! - [`RequestPool`] — a mutex-guarded free list of idle [`Request`] states.
//! - [`SharedRequest`] — the reference-counted envelope binding one state to
//!   its pool. When the last reference drops, the state is reset and pushed
//!   back onto the free list.
//! - [`RequestHandle`] — the user-facing handle. Movable, not copyable;
//!   additional references are taken only inside the event loop to keep the
//!   state alive across the transfer and the completion callback.

use std::collections::VecDeque;
use std::mem::ManuallyDrop;
use std::ops::Deref;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::metrics;
use crate::request::{OnComplete, Request};

struct PoolInner {
    idle: Mutex<VecDeque<Request>>,
}

impl PoolInner {
    /// Reset a state and return it to the free list. No transport calls
    /// happen under the pool mutex: reset is pure bookkeeping, and transfer
    /// handles are built at submission, not here.
    fn release(&self, state: Request) {
        state.reset();
        self.idle.lock().unwrap().push_back(state);
    }
}

/// Thread-safe pool of reusable request states.
///
/// Cloning is cheap and shares the same free list.
#[derive(Clone)]
pub struct RequestPool {
    inner: Arc<PoolInner>,
}

impl RequestPool {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(PoolInner {
                idle: Mutex::new(VecDeque::new()),
            }),
        }
    }

    /// Pre-allocate `count` idle states so a burst of acquisitions does not
    /// pay construction cost.
    pub fn reserve(&self, count: usize) {
        let mut idle = self.inner.idle.lock().unwrap();
        for _ in 0..count {
            idle.push_back(Request::new(String::new(), Duration::ZERO, None, None));
        }
    }

    /// Hand out a request: pop an idle state and overwrite its primary
    /// fields, or construct a new one if the free list is empty.
    pub fn acquire(
        &self,
        url: impl Into<String>,
        transport_timeout: Duration,
        on_complete: Option<OnComplete>,
        response_wait: Option<Duration>,
    ) -> RequestHandle {
        let url = url.into();
        let popped = self.inner.idle.lock().unwrap().pop_back();
        let state = match popped {
            Some(state) => {
                metrics::POOL_REUSED.increment();
                state.reconfigure(url, transport_timeout, response_wait, on_complete);
                state
            }
            None => {
                metrics::POOL_ALLOCATED.increment();
                Request::new(url, transport_timeout, response_wait, on_complete)
            }
        };

        RequestHandle {
            shared: Arc::new(SharedRequest {
                pool: Arc::clone(&self.inner),
                state: ManuallyDrop::new(state),
            }),
        }
    }

    /// Number of idle states currently on the free list.
    pub fn idle_count(&self) -> usize {
        self.inner.idle.lock().unwrap().len()
    }
}

impl Default for RequestPool {
    fn default() -> Self {
        Self::new()
    }
}

/// Ownership envelope: one request state plus the pool it came from.
///
/// Always held behind an `Arc`. The transfer engine keeps its own reference
/// while a transfer is in flight, so the state survives even if user code
/// drops its handle right after submission; the callback's handle keeps it
/// alive for as long as the user wants. Only when every reference is gone
/// does the state go back to the pool.
pub struct SharedRequest {
    pool: Arc<PoolInner>,
    state: ManuallyDrop<Request>,
}

impl SharedRequest {
    pub(crate) fn state(&self) -> &Request {
        &self.state
    }
}

impl Drop for SharedRequest {
    fn drop(&mut self) {
        // Safety: `state` is only taken here, and `self` is never used
        // again after drop.
        let state = unsafe { ManuallyDrop::take(&mut self.state) };
        self.pool.release(state);
    }
}

/// User-facing handle to a pooled request.
///
/// Dereferences to [`Request`], so builder methods and response accessors
/// are called directly on the handle. Dropping the last handle (and any
/// internal reference) returns the state to its pool.
pub struct RequestHandle {
    shared: Arc<SharedRequest>,
}

impl RequestHandle {
    pub(crate) fn from_shared(shared: Arc<SharedRequest>) -> Self {
        Self { shared }
    }

    pub(crate) fn into_shared(self) -> Arc<SharedRequest> {
        self.shared
    }
}

impl Deref for RequestHandle {
    type Target = Request;

    fn deref(&self) -> &Request {
        self.shared.state()
    }
}
