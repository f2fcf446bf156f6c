//! Per-request state, builder surface, and the transfer-side collector.
//!
//! A [`Request`] carries everything one HTTP exchange needs: the URL and
//! options set before submission, and the response buffers, completion
//! classification, and timing filled in when the transfer finishes. States
//! are pooled and reused; [`reset`](Request::reset) returns one to its
//! just-constructed shape.
//!
//! The response buffers do not live on the request while a transfer is in
//! flight. They accumulate inside the [`Collector`], the `curl` handler owned
//! by the transfer handle, which the engine holds exclusively between attach
//! and detach. Completion moves them back onto the request under its lock.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use bytes::Bytes;
use curl::easy::{Easy2, Form, Handler, List, WriteError};

use crate::error::Error;
use crate::header::Header;
use crate::http::{Method, StatusCode, Version};
use crate::pool::RequestHandle;
use crate::status::CompletionStatus;
use crate::wait_index::WaitToken;

/// Completion callback. Receives an owning handle, so user code may keep the
/// request alive past the callback for logging or continuation.
pub type OnComplete = Box<dyn FnOnce(RequestHandle) + Send + 'static>;

/// One field of a multipart MIME form.
#[derive(Debug, Clone)]
enum MimeField {
    /// Inline value.
    Value { name: String, value: String },
    /// File referenced by path; contents are streamed during the transfer.
    File { name: String, path: PathBuf },
}

/// Accumulates the response while a transfer runs.
///
/// Owned by the `Easy2` transfer handle, so only the thread driving the
/// transfer ever touches these buffers — no lock on the hot path.
pub(crate) struct Collector {
    headers: Vec<Header>,
    body: Vec<u8>,
    max_download_bytes: i64,
    bytes_written: i64,
    callback_fired: Arc<AtomicBool>,
}

impl Collector {
    fn new(max_download_bytes: i64, callback_fired: Arc<AtomicBool>) -> Self {
        Self {
            headers: Vec::new(),
            body: Vec::new(),
            max_download_bytes,
            bytes_written: 0,
            callback_fired,
        }
    }

    /// Unused download allowance, or `None` when the cap is disabled.
    pub(crate) fn cap_remaining(&self) -> Option<i64> {
        if self.max_download_bytes < 0 {
            None
        } else {
            Some(self.max_download_bytes - self.bytes_written)
        }
    }
}

impl Handler for Collector {
    fn write(&mut self, data: &[u8]) -> Result<usize, WriteError> {
        let mut len = data.len();
        if self.max_download_bytes >= 0 {
            let remaining = (self.max_download_bytes - self.bytes_written).max(0) as usize;
            if remaining < len {
                // Short write: the transport aborts the transfer. The status
                // mapper turns that abort into Success when the cap is the
                // reason (cap_remaining == 0).
                len = remaining;
            }
        }
        self.body.extend_from_slice(&data[..len]);
        self.bytes_written += len as i64;
        Ok(len)
    }

    fn header(&mut self, data: &[u8]) -> bool {
        // Once the callback has fired (response-wait expiry) the user may be
        // reading this request; refuse further delivery so the transport
        // aborts the zombie transfer.
        if self.callback_fired.load(Ordering::Acquire) {
            return false;
        }
        if let Some(header) = Header::parse_response_line(data) {
            self.headers.push(header);
        }
        true
    }
}

/// Everything mutable on a request. Guarded by the request's lock; the lock
/// is never held across a transport call that can block or a user callback.
struct Inner {
    url: String,
    method: Method,
    version: Version,
    headers: Vec<Header>,
    body: Option<Vec<u8>>,
    mime_fields: Vec<MimeField>,
    verify_peer: bool,
    verify_host: bool,
    follow_redirects: bool,
    max_redirects: i64,
    max_download_bytes: i64,
    accept_all_encoding: bool,
    transport_timeout: Duration,
    response_wait: Option<Duration>,
    on_complete: Option<OnComplete>,

    status: CompletionStatus,
    http_status: StatusCode,
    response_headers: Vec<Header>,
    response_body: Bytes,
    total_elapsed: Option<Duration>,
    started_at: Option<Instant>,
    num_connects: u64,
    redirect_count: u64,

    wait_token: Option<WaitToken>,
    /// Transfer handle built by `prepare_for_perform`, taken by the engine
    /// at attach (or consumed by the synchronous path).
    prepared: Option<Easy2<Collector>>,
}

impl Inner {
    fn new(
        url: String,
        transport_timeout: Duration,
        response_wait: Option<Duration>,
        on_complete: Option<OnComplete>,
    ) -> Self {
        Self {
            url,
            method: Method::Get,
            version: Version::Best,
            headers: Vec::new(),
            body: None,
            mime_fields: Vec::new(),
            verify_peer: true,
            verify_host: true,
            follow_redirects: true,
            max_redirects: -1,
            max_download_bytes: -1,
            accept_all_encoding: false,
            transport_timeout,
            response_wait,
            on_complete,
            status: CompletionStatus::Building,
            http_status: StatusCode::Unknown,
            response_headers: Vec::new(),
            response_body: Bytes::new(),
            total_elapsed: None,
            started_at: None,
            num_connects: 0,
            redirect_count: 0,
            wait_token: None,
            prepared: None,
        }
    }

    fn clear_response(&mut self) {
        self.status = CompletionStatus::Building;
        self.http_status = StatusCode::Unknown;
        self.response_headers.clear();
        self.response_body = Bytes::new();
        self.total_elapsed = None;
        self.started_at = None;
        self.num_connects = 0;
        self.redirect_count = 0;
    }
}

/// The mutable record for one HTTP request.
///
/// Users never construct or hold a `Request` directly; they reach it through
/// a [`RequestHandle`](crate::RequestHandle), which dereferences here.
/// Builder methods apply before submission; response accessors are meaningful
/// once the completion callback has delivered the handle back (or after a
/// synchronous [`perform`](Request::perform) returns).
pub struct Request {
    inner: Mutex<Inner>,
    /// One-shot latch: set by whichever path fires the completion callback
    /// first, suppressing any second invocation for the same attempt.
    callback_fired: Arc<AtomicBool>,
}

impl Request {
    pub(crate) fn new(
        url: String,
        transport_timeout: Duration,
        response_wait: Option<Duration>,
        on_complete: Option<OnComplete>,
    ) -> Self {
        Self {
            inner: Mutex::new(Inner::new(url, transport_timeout, response_wait, on_complete)),
            callback_fired: Arc::new(AtomicBool::new(false)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap()
    }

    // ── Builder surface ─────────────────────────────────────────────

    /// Replace the completion callback.
    pub fn set_on_complete(&self, on_complete: impl FnOnce(RequestHandle) + Send + 'static) {
        self.lock().on_complete = Some(Box::new(on_complete));
    }

    /// Set the request URL. Rejects an empty URL; everything else is
    /// validated by the transport when the transfer starts.
    pub fn set_url(&self, url: impl Into<String>) -> Result<(), Error> {
        let url = url.into();
        if url.is_empty() {
            return Err(Error::EmptyUrl);
        }
        self.lock().url = url;
        Ok(())
    }

    /// Set the HTTP method. Defaults to GET.
    pub fn set_method(&self, method: Method) {
        self.lock().method = method;
    }

    /// Set the HTTP version preference. Defaults to [`Version::Best`].
    pub fn set_version(&self, version: Version) {
        self.lock().version = version;
    }

    /// Set the transport-level timeout. Zero means no timeout. When a
    /// response-wait is also set, this should be the longer of the two so
    /// slow keep-alive connections can still settle.
    pub fn set_transport_timeout(&self, timeout: Duration) {
        self.lock().transport_timeout = timeout;
    }

    /// Set the response-wait deadline: how long the caller is willing to
    /// wait for the callback. If it expires first, the callback fires with
    /// [`CompletionStatus::ResponseWaitTimeout`] while the transfer itself
    /// runs on until the transport timeout. A response-wait longer than the
    /// transport timeout is legal and simply never fires.
    pub fn set_response_wait(&self, wait: Duration) {
        self.lock().response_wait = Some(wait);
    }

    /// Cap the number of response-body bytes written. Negative means
    /// unlimited. The transfer is cut short once the cap is reached and the
    /// request still completes with [`CompletionStatus::Success`].
    pub fn set_max_download_bytes(&self, max: i64) {
        self.lock().max_download_bytes = max;
    }

    /// Control redirect following. Enabled by default. `max_redirects < 0`
    /// means unlimited hops, `0` means none.
    pub fn set_follow_redirects(&self, follow: bool, max_redirects: i64) {
        let mut inner = self.lock();
        inner.follow_redirects = follow;
        inner.max_redirects = max_redirects;
    }

    /// Append a request header. Order is preserved. An empty value commits
    /// the header as `"name:"`, which suppresses a header the transport
    /// would otherwise add on its own (e.g. `Expect`).
    pub fn add_header(&self, name: impl Into<String>, value: impl Into<String>) {
        self.lock().headers.push(Header::new(name, value));
    }

    /// Set a raw request body. Implies POST unless a method that carries a
    /// body was set explicitly. Mutually exclusive with MIME fields.
    pub fn set_body(&self, body: impl Into<Vec<u8>>) -> Result<(), Error> {
        let mut inner = self.lock();
        if !inner.mime_fields.is_empty() {
            return Err(Error::BodyFormConflict);
        }
        let body = body.into();
        if !body.is_empty() {
            inner.body = Some(body);
        }
        Ok(())
    }

    /// Add an inline MIME form field. Mutually exclusive with a raw body.
    pub fn add_mime_field(
        &self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<(), Error> {
        let mut inner = self.lock();
        if inner.body.is_some() {
            return Err(Error::BodyFormConflict);
        }
        inner.mime_fields.push(MimeField::Value {
            name: name.into(),
            value: value.into(),
        });
        Ok(())
    }

    /// Add a MIME form field backed by a file. The file's contents are read
    /// on demand during the transfer, but it must exist now.
    pub fn add_mime_file(
        &self,
        name: impl Into<String>,
        path: impl Into<PathBuf>,
    ) -> Result<(), Error> {
        let path = path.into();
        let mut inner = self.lock();
        if inner.body.is_some() {
            return Err(Error::BodyFormConflict);
        }
        if !path.exists() {
            return Err(Error::MimeFileMissing(path));
        }
        inner.mime_fields.push(MimeField::File {
            name: name.into(),
            path,
        });
        Ok(())
    }

    /// Require (or not) TLS peer certificate verification. On by default.
    pub fn set_verify_peer(&self, verify: bool) {
        self.lock().verify_peer = verify;
    }

    /// Require (or not) TLS host name verification. On by default.
    pub fn set_verify_host(&self, verify: bool) {
        self.lock().verify_host = verify;
    }

    /// Ask the transport to advertise every content encoding it supports.
    /// Mutually exclusive with adding your own `Accept-Encoding` header.
    pub fn accept_all_encoding(&self) {
        self.lock().accept_all_encoding = true;
    }

    /// Clear everything back to a just-constructed state so the request can
    /// be rebuilt and reused.
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.url.clear();
        inner.method = Method::Get;
        inner.version = Version::Best;
        inner.headers.clear();
        inner.body = None;
        inner.mime_fields.clear();
        inner.verify_peer = true;
        inner.verify_host = true;
        inner.follow_redirects = true;
        inner.max_redirects = -1;
        inner.max_download_bytes = -1;
        inner.accept_all_encoding = false;
        inner.transport_timeout = Duration::ZERO;
        inner.response_wait = None;
        inner.on_complete = None;
        inner.wait_token = None;
        inner.prepared = None;
        inner.clear_response();
        self.callback_fired.store(false, Ordering::Release);
    }

    // ── Read access ─────────────────────────────────────────────────

    /// The request URL.
    pub fn url(&self) -> String {
        self.lock().url.clone()
    }

    /// The request method.
    pub fn method(&self) -> Method {
        self.lock().method
    }

    /// Request headers in insertion order.
    pub fn request_headers(&self) -> Vec<Header> {
        self.lock().headers.clone()
    }

    /// The raw request body, if one was set.
    pub fn request_body(&self) -> Option<Vec<u8>> {
        self.lock().body.clone()
    }

    /// How the request finished (or its pre-completion state).
    pub fn completion_status(&self) -> CompletionStatus {
        self.lock().status
    }

    /// The HTTP status code, or [`StatusCode::Unknown`] if no response was
    /// received.
    pub fn response_status_code(&self) -> StatusCode {
        self.lock().http_status
    }

    /// Response headers in arrival order.
    pub fn response_headers(&self) -> Vec<Header> {
        self.lock().response_headers.clone()
    }

    /// The response body. Cheap to clone; the underlying buffer is shared.
    pub fn response_body(&self) -> Bytes {
        self.lock().response_body.clone()
    }

    /// Total request duration. Populated before the completion callback
    /// fires and never mutated afterwards.
    pub fn total_elapsed(&self) -> Option<Duration> {
        self.lock().total_elapsed
    }

    /// Number of connections the transport opened for this request.
    pub fn num_connects(&self) -> u64 {
        self.lock().num_connects
    }

    /// Number of redirects actually followed.
    pub fn redirect_count(&self) -> u64 {
        self.lock().redirect_count
    }

    // ── Synchronous one-shot ────────────────────────────────────────

    /// Perform the request synchronously, blocking the calling thread until
    /// the transport finishes. Returns `Ok(true)` iff the completion status
    /// is [`CompletionStatus::Success`]. No callback fires.
    pub fn perform(&self) -> Result<bool, Error> {
        let mut easy = self.build_transfer()?;
        let result = easy.perform();
        self.absorb_transfer(&mut easy, &result);
        Ok(self.completion_status() == CompletionStatus::Success)
    }

    // ── Engine/reactor plumbing ─────────────────────────────────────

    /// Overwrite the primary fields when a pooled state is re-issued.
    pub(crate) fn reconfigure(
        &self,
        url: String,
        transport_timeout: Duration,
        response_wait: Option<Duration>,
        on_complete: Option<OnComplete>,
    ) {
        let mut inner = self.lock();
        inner.url = url;
        inner.transport_timeout = transport_timeout;
        inner.response_wait = response_wait;
        inner.on_complete = on_complete;
    }

    /// Build the transfer handle and stash it for the engine to take at
    /// attach. Called on the submitter's thread so the reactor never pays
    /// for option setup.
    pub(crate) fn prepare_for_perform(&self) -> Result<(), Error> {
        let easy = self.build_transfer()?;
        self.lock().prepared = Some(easy);
        Ok(())
    }

    /// Construct the transfer for this request: commit headers into the
    /// transport's list format and apply every option.
    fn build_transfer(&self) -> Result<Easy2<Collector>, Error> {
        let mut inner = self.lock();
        if inner.url.is_empty() {
            return Err(Error::EmptyUrl);
        }

        inner.clear_response();
        self.callback_fired.store(false, Ordering::Release);

        let collector = Collector::new(inner.max_download_bytes, self.callback_fired.clone());
        let mut easy = Easy2::new(collector);

        easy.url(&inner.url)?;
        inner.method.apply(&mut easy)?;
        easy.http_version(inner.version.as_curl())?;
        if inner.transport_timeout > Duration::ZERO {
            easy.timeout(inner.transport_timeout)?;
        }
        easy.follow_location(inner.follow_redirects)?;
        if inner.max_redirects >= 0 {
            easy.max_redirections(inner.max_redirects as u32)?;
        }
        easy.ssl_verify_peer(inner.verify_peer)?;
        easy.ssl_verify_host(inner.verify_host)?;
        if inner.accept_all_encoding {
            easy.accept_encoding("")?;
        }

        if !inner.headers.is_empty() {
            let mut list = List::new();
            for header in &inner.headers {
                list.append(&header.to_transport_line())?;
            }
            easy.http_headers(list)?;
        }

        if let Some(body) = &inner.body {
            easy.post_fields_copy(body)?;
        }
        if !inner.mime_fields.is_empty() {
            let mut form = Form::new();
            for field in &inner.mime_fields {
                match field {
                    MimeField::Value { name, value } => {
                        form.part(name).contents(value.as_bytes()).add()?;
                    }
                    MimeField::File { name, path } => {
                        form.part(name).file(path).add()?;
                    }
                }
            }
            easy.httppost(form)?;
        }

        inner.status = CompletionStatus::Executing;
        inner.started_at = Some(Instant::now());
        Ok(easy)
    }

    pub(crate) fn take_prepared(&self) -> Option<Easy2<Collector>> {
        self.lock().prepared.take()
    }

    pub(crate) fn response_wait(&self) -> Option<Duration> {
        self.lock().response_wait
    }

    pub(crate) fn mark_started(&self, now: Instant) {
        self.lock().started_at = Some(now);
    }

    pub(crate) fn set_wait_token(&self, token: WaitToken) {
        self.lock().wait_token = Some(token);
    }

    pub(crate) fn take_wait_token(&self) -> Option<WaitToken> {
        self.lock().wait_token.take()
    }

    /// Record rejection at attach time.
    pub(crate) fn mark_failed_to_start(&self, now: Instant) {
        let mut inner = self.lock();
        inner.status = CompletionStatus::FailedToStart;
        inner.total_elapsed = Some(now - inner.started_at.unwrap_or(now));
    }

    /// Record response-wait expiry. Status becomes sticky; elapsed time is
    /// measured against the start timepoint since the transport has not
    /// reported anything yet.
    pub(crate) fn mark_response_wait_expired(&self, now: Instant) {
        let mut inner = self.lock();
        inner.status = CompletionStatus::ResponseWaitTimeout;
        inner.total_elapsed = Some(now - inner.started_at.unwrap_or(now));
    }

    /// Record an engine failure that lost the transfer handle. The sticky
    /// response-wait classification still wins.
    pub(crate) fn mark_engine_error(&self, now: Instant) {
        let mut inner = self.lock();
        if inner.status == CompletionStatus::ResponseWaitTimeout {
            return;
        }
        inner.status = CompletionStatus::Error;
        inner.total_elapsed = Some(now - inner.started_at.unwrap_or(now));
    }

    /// Fold a finished transfer back into the request: map the status, move
    /// the collected buffers over, and read the transport's telemetry.
    ///
    /// If the response-wait deadline already fired, the user-visible fields
    /// are left exactly as the callback saw them.
    pub(crate) fn absorb_transfer(
        &self,
        easy: &mut Easy2<Collector>,
        result: &Result<(), curl::Error>,
    ) {
        let mut inner = self.lock();
        if inner.status == CompletionStatus::ResponseWaitTimeout {
            return;
        }

        inner.status =
            CompletionStatus::from_transport(inner.status, result, easy.get_ref().cap_remaining());

        inner.http_status = StatusCode::from_transport(easy.response_code().unwrap_or(0));
        inner.num_connects = transfer_num_connects(easy);
        inner.redirect_count = easy.redirect_count().unwrap_or(0) as u64;
        inner.total_elapsed = match easy.total_time() {
            Ok(total) => Some(total),
            Err(_) => {
                let started = inner.started_at;
                started.map(|at| at.elapsed())
            }
        };

        let collector = easy.get_mut();
        inner.response_headers = std::mem::take(&mut collector.headers);
        inner.response_body = Bytes::from(std::mem::take(&mut collector.body));
    }

    /// Claim the right to invoke the completion callback. Returns `true`
    /// exactly once per transfer attempt.
    pub(crate) fn try_claim_callback(&self) -> bool {
        !self.callback_fired.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn take_on_complete(&self) -> Option<OnComplete> {
        self.lock().on_complete.take()
    }
}

/// `CURLINFO_NUM_CONNECTS` (`CURLINFO_LONG + 26`, libcurl ≥ 7.12.3). The
/// safe wrapper does not expose this one, so read it raw.
const CURLINFO_NUM_CONNECTS: curl_sys::CURLINFO = 0x200000 + 26;

fn transfer_num_connects<H: Handler>(easy: &Easy2<H>) -> u64 {
    let mut count: libc::c_long = 0;
    let code = unsafe {
        curl_sys::curl_easy_getinfo(
            easy.raw(),
            CURLINFO_NUM_CONNECTS,
            &mut count as *mut libc::c_long,
        )
    };
    if code == curl_sys::CURLE_OK {
        count.max(0) as u64
    } else {
        0
    }
}
