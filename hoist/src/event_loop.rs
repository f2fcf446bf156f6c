//! Public event-loop façade and the cross-thread submission queue.

use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use mio::{Poll, Waker};

use crate::config::Config;
use crate::error::Error;
use crate::metrics;
use crate::pool::{RequestHandle, RequestPool};
use crate::reactor::{Reactor, WAKE_TOKEN};

/// State shared between the façade (any user thread) and the reactor.
///
/// The submission queue is the only structure both sides mutate. It is
/// guarded by one mutex, drained with a swap so the critical section is a
/// pointer exchange, and never held across a transport call. The waker is
/// signalled outside the mutex.
pub(crate) struct LoopShared {
    pending: Mutex<Vec<RequestHandle>>,
    stopping: AtomicBool,
    running: AtomicBool,
    /// Transfers currently attached to the engine.
    active: AtomicUsize,
    waker: Waker,
}

impl LoopShared {
    pub(crate) fn take_pending(&self) -> Vec<RequestHandle> {
        std::mem::take(&mut *self.pending.lock().unwrap())
    }

    pub(crate) fn has_pending(&self) -> bool {
        !self.pending.lock().unwrap().is_empty()
    }

    pub(crate) fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::Acquire)
    }

    pub(crate) fn mark_running(&self, running: bool) {
        self.running.store(running, Ordering::Release);
    }

    pub(crate) fn active_count(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    pub(crate) fn add_active(&self, n: usize) {
        self.active.fetch_add(n, Ordering::AcqRel);
    }

    pub(crate) fn sub_active(&self, n: usize) {
        self.active.fetch_sub(n, Ordering::AcqRel);
    }
}

/// Asynchronous HTTP event loop.
///
/// Owns the background reactor thread, the shared request pool, and the
/// submission queue. Construction returns once the reactor reports running,
/// so requests can be submitted immediately. Dropping the loop refuses new
/// submissions, waits for every in-flight request to finish (each callback
/// still fires), then joins the thread.
///
/// ```no_run
/// use std::time::Duration;
///
/// let event_loop = hoist::EventLoop::new().unwrap();
/// let request = event_loop.pool().acquire(
///     "http://localhost:8080/",
///     Duration::from_secs(1),
///     Some(Box::new(|req| {
///         println!("{} -> {}", req.url(), req.completion_status());
///     })),
///     None,
/// );
/// assert!(event_loop.start_request(request));
/// while event_loop.has_unfinished_requests() {
///     std::thread::sleep(Duration::from_millis(10));
/// }
/// ```
pub struct EventLoop {
    shared: Arc<LoopShared>,
    pool: RequestPool,
    thread: Option<thread::JoinHandle<Result<(), Error>>>,
}

impl EventLoop {
    /// Spawn a reactor with default [`Config`].
    pub fn new() -> Result<Self, Error> {
        Self::with_config(Config::default())
    }

    /// Spawn a reactor with the given configuration.
    pub fn with_config(config: Config) -> Result<Self, Error> {
        let poll = Poll::new()?;
        let waker = Waker::new(poll.registry(), WAKE_TOKEN)?;
        let shared = Arc::new(LoopShared {
            pending: Mutex::new(Vec::new()),
            stopping: AtomicBool::new(false),
            running: AtomicBool::new(false),
            active: AtomicUsize::new(0),
            waker,
        });

        let pool = RequestPool::new();
        if config.pool_reserve > 0 {
            pool.reserve(config.pool_reserve);
        }

        let reactor_shared = Arc::clone(&shared);
        let events_capacity = config.events_capacity;
        let thread = thread::Builder::new()
            .name(config.thread_name.clone())
            .spawn(move || Reactor::new(poll, events_capacity, reactor_shared)?.run())?;

        // Wait for the reactor to spin up so the caller can start submitting
        // the moment this returns.
        while !shared.running.load(Ordering::Acquire) {
            if thread.is_finished() {
                return Err(match thread.join() {
                    Ok(Err(err)) => err,
                    _ => io::Error::new(io::ErrorKind::Other, "reactor exited during startup")
                        .into(),
                });
            }
            thread::sleep(Duration::from_millis(1));
        }

        Ok(Self {
            shared,
            pool,
            thread: Some(thread),
        })
    }

    /// The pool this loop hands requests out of.
    pub fn pool(&self) -> &RequestPool {
        &self.pool
    }

    /// Submit a request. Returns `false` if the loop is stopping or the
    /// transfer could not be built from the request's options; the request
    /// is not enqueued and no callback fires in that case.
    ///
    /// Headers are committed into the transport's format here, on the
    /// caller's thread, so the reactor never pays for request setup.
    pub fn start_request(&self, request: RequestHandle) -> bool {
        if self.shared.is_stopping() {
            return false;
        }
        if request.prepare_for_perform().is_err() {
            return false;
        }
        metrics::REQUESTS_SUBMITTED.increment();
        self.shared.pending.lock().unwrap().push(request);
        let _ = self.shared.waker.wake();
        true
    }

    /// Submit a whole batch under a single queue-lock acquisition and one
    /// wakeup. All-or-nothing: if any request fails to build, none are
    /// submitted and `false` is returned.
    pub fn start_requests(&self, requests: Vec<RequestHandle>) -> bool {
        if self.shared.is_stopping() {
            return false;
        }
        for request in &requests {
            if request.prepare_for_perform().is_err() {
                return false;
            }
        }
        metrics::REQUESTS_SUBMITTED.add(requests.len() as u64);
        self.shared.pending.lock().unwrap().extend(requests);
        let _ = self.shared.waker.wake();
        true
    }

    /// True while any transfer is attached to the engine or any submission
    /// is still queued.
    pub fn has_unfinished_requests(&self) -> bool {
        self.shared.active_count() > 0 || self.shared.has_pending()
    }

    /// Refuse new submissions. Already-submitted requests run to completion;
    /// the drop impl waits for them.
    pub fn stop(&self) {
        self.shared.stopping.store(true, Ordering::Release);
        let _ = self.shared.waker.wake();
    }
}

impl Drop for EventLoop {
    fn drop(&mut self) {
        self.stop();
        if let Some(thread) = self.thread.take() {
            // The reactor exits once stopping is set and the unfinished
            // count reaches zero, so the join doubles as the drain wait.
            let _ = thread.join();
        }
    }
}
