//! The reactor: a single-threaded I/O and timer loop.
//!
//! Everything that touches the transport happens here — attaching queued
//! submissions, pumping readiness events, expiring both deadline clocks, and
//! running completion callbacks. User threads only ever push onto the
//! submission queue and signal the waker.
//!
//! Timers are virtual: each poll timeout is the distance to the earlier of
//! the transport's aggregate deadline and the response-wait index minimum.
//! Re-arming a timer is just updating a field.

use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use curl::multi::Socket;
use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token};
use slab::Slab;

use crate::engine::{SocketOp, TransferEngine};
use crate::error::Error;
use crate::event_loop::LoopShared;
use crate::metrics;
use crate::pool::{RequestHandle, SharedRequest};
use crate::status::CompletionStatus;
use crate::wait_index::ResponseWaitIndex;

/// Token reserved for the cross-thread waker; socket tokens come from the
/// slab and never collide with it.
pub(crate) const WAKE_TOKEN: Token = Token(usize::MAX);

pub(crate) struct Reactor {
    poll: Poll,
    events: Events,
    engine: TransferEngine,
    wait_index: ResponseWaitIndex,
    shared: Arc<LoopShared>,
    /// token key → socket registered with the poller.
    sockets: Slab<Socket>,
    /// socket → token key, for reregistration and removal.
    socket_tokens: HashMap<Socket, usize>,
    /// Deadline for the transport's aggregate timer, if armed.
    transport_deadline: Option<Instant>,
    /// Scratch buffer: readiness snapshot for one tick.
    ready: Vec<(Token, bool, bool, bool)>,
}

impl Reactor {
    pub(crate) fn new(
        poll: Poll,
        events_capacity: usize,
        shared: Arc<LoopShared>,
    ) -> Result<Self, Error> {
        Ok(Self {
            poll,
            events: Events::with_capacity(events_capacity),
            engine: TransferEngine::new()?,
            wait_index: ResponseWaitIndex::new(),
            shared,
            sockets: Slab::new(),
            socket_tokens: HashMap::new(),
            transport_deadline: None,
            ready: Vec::new(),
        })
    }

    /// Run until stopped and drained. Blocks the calling thread; the façade
    /// spawns this on the background thread.
    pub(crate) fn run(&mut self) -> Result<(), Error> {
        self.shared.mark_running(true);
        let result = self.run_inner();
        self.shared.mark_running(false);
        result
    }

    fn run_inner(&mut self) -> Result<(), Error> {
        loop {
            if self.shared.is_stopping() && self.idle() {
                return Ok(());
            }

            let timeout = self.next_timeout();
            match self.poll.poll(&mut self.events, timeout) {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            }

            self.ready.clear();
            for event in self.events.iter() {
                self.ready.push((
                    event.token(),
                    event.is_readable(),
                    event.is_writable(),
                    event.is_error(),
                ));
            }

            let ready = std::mem::take(&mut self.ready);
            for &(token, readable, writable, errored) in &ready {
                if token == WAKE_TOKEN {
                    continue;
                }
                // The socket may have been unwatched earlier this tick;
                // stale readiness is dropped.
                let Some(&socket) = self.sockets.get(token.0) else {
                    continue;
                };
                self.engine.pump(socket, readable, writable, errored)?;
                self.after_engine_call()?;
            }
            self.ready = ready;

            if let Some(deadline) = self.transport_deadline {
                if Instant::now() >= deadline {
                    self.transport_deadline = None;
                    self.engine.pump_timeout()?;
                    self.after_engine_call()?;
                }
            }

            self.drain_submissions()?;
            self.expire_response_waits();
        }
    }

    /// No transfers in flight and nothing queued.
    fn idle(&self) -> bool {
        self.shared.active_count() == 0 && !self.shared.has_pending()
    }

    /// Distance to the nearest deadline, or `None` to block until readiness
    /// or a wakeup.
    fn next_timeout(&self) -> Option<Duration> {
        let mut next = self.transport_deadline;
        if let Some(min) = self.wait_index.min_deadline() {
            next = Some(next.map_or(min, |deadline| deadline.min(min)));
        }
        next.map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Swap the submission queue into a local buffer, then attach each
    /// queued request: bind it to the engine, arm its response-wait deadline,
    /// and give the transport a first push.
    fn drain_submissions(&mut self) -> Result<(), Error> {
        let batch = self.shared.take_pending();
        for handle in batch {
            let shared = handle.into_shared();
            let now = Instant::now();
            shared.state().mark_started(now);

            let Some(easy) = shared.state().take_prepared() else {
                // start_request always prepares; a missing transfer handle
                // means the state was tampered with mid-queue.
                self.fail_to_start(&shared, now);
                continue;
            };

            match self.engine.attach(Arc::clone(&shared), easy) {
                Ok(_token) => {
                    self.shared.add_active(1);
                    if let Some(wait) = shared.state().response_wait() {
                        let token = self.wait_index.insert(now + wait, Arc::clone(&shared));
                        shared.state().set_wait_token(token);
                    }
                    // Kick the transport so the transfer starts moving
                    // without waiting for the next readiness event.
                    self.engine.pump_timeout()?;
                    self.after_engine_call()?;
                }
                Err(_) => self.fail_to_start(&shared, now),
            }
        }
        Ok(())
    }

    fn fail_to_start(&mut self, shared: &Arc<SharedRequest>, now: Instant) {
        metrics::REQUESTS_FAILED_TO_START.increment();
        shared.state().mark_failed_to_start(now);
        fire_callback(shared);
    }

    /// Apply whatever the transport asked for during the last engine call,
    /// then drain any transfers it finished.
    fn after_engine_call(&mut self) -> Result<(), Error> {
        self.apply_socket_ops()?;
        self.apply_timer_update();
        self.process_completions()?;
        Ok(())
    }

    fn process_completions(&mut self) -> Result<(), Error> {
        loop {
            let done = self.engine.drain_completions();
            if done.is_empty() {
                return Ok(());
            }
            for (token, result) in done {
                let (shared, easy) = self.engine.detach(token);

                if let Some(mut easy) = easy {
                    shared.state().absorb_transfer(&mut easy, &result);
                } else {
                    shared.state().mark_engine_error(Instant::now());
                }

                metrics::REQUESTS_COMPLETED.increment();
                if shared.state().completion_status() == CompletionStatus::Timeout {
                    metrics::TRANSPORT_TIMEOUTS.increment();
                }

                if let Some(wait_token) = shared.state().take_wait_token() {
                    self.wait_index.remove(wait_token);
                }

                fire_callback(&shared);
                self.shared.sub_active(1);
                // `shared` drops here: the engine's reference is released
                // after the callback has run.
            }
            // Detaching closes sockets; pick up the watch removals before
            // looking for more completions.
            self.apply_socket_ops()?;
            self.apply_timer_update();
        }
    }

    /// Pop every response-wait entry whose deadline has passed and fire its
    /// callback early. The underlying transfer keeps running until the
    /// transport settles it.
    fn expire_response_waits(&mut self) {
        let now = Instant::now();
        for shared in self.wait_index.pop_expired(now) {
            metrics::RESPONSE_WAIT_TIMEOUTS.increment();
            shared.state().take_wait_token();
            shared.state().mark_response_wait_expired(now);
            fire_callback(&shared);
        }
    }

    fn apply_socket_ops(&mut self) -> Result<(), Error> {
        for op in self.engine.take_socket_ops() {
            match op {
                SocketOp::Watch {
                    socket,
                    readable,
                    writable,
                } => {
                    let interest = match (readable, writable) {
                        (true, false) => Interest::READABLE,
                        (false, true) => Interest::WRITABLE,
                        _ => Interest::READABLE | Interest::WRITABLE,
                    };
                    match self.socket_tokens.get(&socket) {
                        Some(&key) => {
                            self.poll.registry().reregister(
                                &mut SourceFd(&socket),
                                Token(key),
                                interest,
                            )?;
                        }
                        None => {
                            let key = self.sockets.insert(socket);
                            self.socket_tokens.insert(socket, key);
                            self.poll.registry().register(
                                &mut SourceFd(&socket),
                                Token(key),
                                interest,
                            )?;
                        }
                    }
                }
                SocketOp::Unwatch(socket) => {
                    if let Some(key) = self.socket_tokens.remove(&socket) {
                        self.sockets.remove(key);
                        // The transport may have closed the fd already, in
                        // which case the poller has forgotten it on its own.
                        let _ = self.poll.registry().deregister(&mut SourceFd(&socket));
                    }
                }
            }
        }
        Ok(())
    }

    fn apply_timer_update(&mut self) {
        if let Some(update) = self.engine.take_timer_update() {
            self.transport_deadline = update.map(|timeout| Instant::now() + timeout);
        }
    }
}

/// Invoke the completion callback for `shared`, exactly once per attempt.
///
/// The callback receives a fresh owning handle, so the state stays alive for
/// as long as user code keeps it. Invoked with no internal locks held.
pub(crate) fn fire_callback(shared: &Arc<SharedRequest>) {
    if !shared.state().try_claim_callback() {
        return;
    }
    if let Some(callback) = shared.state().take_on_complete() {
        callback(RequestHandle::from_shared(Arc::clone(shared)));
    }
}
