//! Time-ordered index of requests with an active response-wait deadline.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use crate::pool::SharedRequest;

/// Opaque key for one entry in the [`ResponseWaitIndex`].
///
/// Stored on the request state at insertion so the completion drain can
/// remove the entry without scanning. The insertion sequence number keeps
/// the ordering strict when two deadlines collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct WaitToken {
    deadline: Instant,
    seq: u64,
}

/// Deadline-ordered multiset of in-flight requests that asked for a
/// response-wait timeout.
///
/// Entries with equal deadlines expire in insertion (FIFO) order. Only the
/// reactor thread touches the index.
pub(crate) struct ResponseWaitIndex {
    entries: BTreeMap<WaitToken, Arc<SharedRequest>>,
    next_seq: u64,
}

impl ResponseWaitIndex {
    pub(crate) fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            next_seq: 0,
        }
    }

    /// Insert an entry and return its removal token.
    pub(crate) fn insert(&mut self, deadline: Instant, shared: Arc<SharedRequest>) -> WaitToken {
        let token = WaitToken {
            deadline,
            seq: self.next_seq,
        };
        self.next_seq += 1;
        self.entries.insert(token, shared);
        token
    }

    /// Remove the entry for `token`, if it is still present.
    pub(crate) fn remove(&mut self, token: WaitToken) -> Option<Arc<SharedRequest>> {
        self.entries.remove(&token)
    }

    /// The earliest deadline currently in the index.
    pub(crate) fn min_deadline(&self) -> Option<Instant> {
        self.entries.keys().next().map(|token| token.deadline)
    }

    /// Remove and return every entry whose deadline is at or before `now`,
    /// earliest first.
    pub(crate) fn pop_expired(&mut self, now: Instant) -> Vec<Arc<SharedRequest>> {
        let mut expired = Vec::new();
        while let Some(entry) = self.entries.first_entry() {
            if entry.key().deadline > now {
                break;
            }
            expired.push(entry.remove());
        }
        expired
    }
}
