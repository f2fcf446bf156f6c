//! Transfer engine: N concurrent HTTP transfers over the transport's
//! socket-action interface.
//!
//! The engine owns the multi handle and an in-flight table keyed by a slab
//! token; the token rides in the transport's private slot so completions can
//! be matched back to their request. The engine borrows request states from
//! the reactor — it holds a shared reference while a transfer is attached
//! and gives it back at detach.
//!
//! The transport tells us which sockets to watch and when to check for
//! timeouts via callbacks that fire from inside `action`/`timeout` calls.
//! Those callbacks cannot touch the reactor directly, so they queue their
//! requests into shared cells the reactor applies after every engine call.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use curl::multi::{Easy2Handle, Events, Multi, Socket};
use slab::Slab;

use crate::error::Error;
use crate::pool::SharedRequest;
use crate::request::Collector;

/// A socket-watch request from the transport.
#[derive(Debug, Clone, Copy)]
pub(crate) enum SocketOp {
    /// Watch `socket` for the given readiness.
    Watch {
        socket: Socket,
        readable: bool,
        writable: bool,
    },
    /// Stop watching `socket`; the transport is done with it.
    Unwatch(Socket),
}

struct InFlight {
    shared: Arc<SharedRequest>,
    easy: Easy2Handle<Collector>,
}

pub(crate) struct TransferEngine {
    multi: Multi,
    transfers: Slab<InFlight>,
    /// Socket-watch requests queued by the transport's socket callback.
    socket_ops: Arc<Mutex<Vec<SocketOp>>>,
    /// Latest aggregate-timer request from the transport. `Some(None)`
    /// means "cancel the timer", `Some(Some(d))` means "check again in d".
    timer_update: Arc<Mutex<Option<Option<Duration>>>>,
}

impl TransferEngine {
    pub(crate) fn new() -> Result<Self, Error> {
        let mut multi = Multi::new();

        let socket_ops = Arc::new(Mutex::new(Vec::new()));
        let ops = Arc::clone(&socket_ops);
        multi.socket_function(move |socket, events, _token| {
            let op = if events.remove() {
                SocketOp::Unwatch(socket)
            } else {
                SocketOp::Watch {
                    socket,
                    readable: events.input(),
                    writable: events.output(),
                }
            };
            ops.lock().unwrap().push(op);
        })?;

        let timer_update = Arc::new(Mutex::new(None));
        let update = Arc::clone(&timer_update);
        multi.timer_function(move |timeout| {
            *update.lock().unwrap() = Some(timeout);
            true
        })?;

        Ok(Self {
            multi,
            transfers: Slab::new(),
            socket_ops,
            timer_update,
        })
    }

    /// Bind a prepared transfer to the multi handle. On success the engine
    /// holds `shared` until the matching [`detach`](Self::detach).
    pub(crate) fn attach(
        &mut self,
        shared: Arc<SharedRequest>,
        easy: curl::easy::Easy2<Collector>,
    ) -> Result<usize, Error> {
        let entry = self.transfers.vacant_entry();
        let token = entry.key();

        let mut handle = self.multi.add2(easy)?;
        if let Err(err) = handle.set_token(token) {
            // Unbind so the multi handle doesn't keep an orphan transfer.
            let _ = self.multi.remove2(handle);
            return Err(err.into());
        }

        entry.insert(InFlight {
            shared,
            easy: handle,
        });
        Ok(token)
    }

    /// Remove a completed transfer, returning the borrowed state and (when
    /// the transport releases it cleanly) the transfer handle with the
    /// collected response.
    pub(crate) fn detach(
        &mut self,
        token: usize,
    ) -> (Arc<SharedRequest>, Option<curl::easy::Easy2<Collector>>) {
        let inflight = self.transfers.remove(token);
        let easy = self.multi.remove2(inflight.easy).ok();
        (inflight.shared, easy)
    }

    /// Advance transfers affected by readiness on `socket`.
    pub(crate) fn pump(
        &mut self,
        socket: Socket,
        readable: bool,
        writable: bool,
        error: bool,
    ) -> Result<(), Error> {
        let mut events = Events::new();
        events.input(readable);
        events.output(writable);
        events.error(error);
        self.multi.action(socket, &events)?;
        Ok(())
    }

    /// Advance transfers because the aggregate timer fired (or a new
    /// transfer needs its first push).
    pub(crate) fn pump_timeout(&mut self) -> Result<(), Error> {
        self.multi.timeout()?;
        Ok(())
    }

    /// Collect `(token, transport_result)` for every transfer that finished
    /// since the last call.
    pub(crate) fn drain_completions(&mut self) -> Vec<(usize, Result<(), curl::Error>)> {
        let mut done = Vec::new();
        let transfers = &self.transfers;
        self.multi.messages(|message| {
            if let Ok(token) = message.token() {
                if let Some(inflight) = transfers.get(token) {
                    if let Some(result) = message.result_for2(&inflight.easy) {
                        done.push((token, result));
                    }
                }
            }
        });
        done
    }

    /// Socket-watch requests accumulated since the last engine call.
    pub(crate) fn take_socket_ops(&mut self) -> Vec<SocketOp> {
        std::mem::take(&mut *self.socket_ops.lock().unwrap())
    }

    /// The transport's latest aggregate-timer request, if it changed.
    pub(crate) fn take_timer_update(&mut self) -> Option<Option<Duration>> {
        self.timer_update.lock().unwrap().take()
    }
}
