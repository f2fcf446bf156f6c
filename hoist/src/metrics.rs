//! Event-loop metrics.
//!
//! Counters for the request lifecycle and pool behavior. All hot counters
//! are incremented on the reactor thread only; the pool counters are guarded
//! by the pool mutex.

use metriken::{metric, Counter};

#[metric(
    name = "hoist/requests/submitted",
    description = "Requests handed to start_request/start_requests"
)]
pub static REQUESTS_SUBMITTED: Counter = Counter::new();

#[metric(
    name = "hoist/requests/completed",
    description = "Transport-level transfer completions"
)]
pub static REQUESTS_COMPLETED: Counter = Counter::new();

#[metric(
    name = "hoist/requests/failed_to_start",
    description = "Requests the engine rejected at attach time"
)]
pub static REQUESTS_FAILED_TO_START: Counter = Counter::new();

#[metric(
    name = "hoist/timeouts/transport",
    description = "Requests that ended with a transport-level timeout"
)]
pub static TRANSPORT_TIMEOUTS: Counter = Counter::new();

#[metric(
    name = "hoist/timeouts/response_wait",
    description = "Requests whose response-wait deadline fired the callback early"
)]
pub static RESPONSE_WAIT_TIMEOUTS: Counter = Counter::new();

#[metric(
    name = "hoist/pool/reused",
    description = "Acquisitions served from the pool free list"
)]
pub static POOL_REUSED: Counter = Counter::new();

#[metric(
    name = "hoist/pool/allocated",
    description = "Acquisitions that constructed a new request state"
)]
pub static POOL_ALLOCATED: Counter = Counter::new();
