//! Integration tests: asynchronous requests against in-process TCP servers.
//!
//! Each test spawns a listener on port 0 with a fixed behavior, submits
//! requests through an `EventLoop`, and collects callback observations into
//! shared state asserted on the test thread.

mod support;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use hoist::{CompletionStatus, EventLoop, Method, StatusCode, Version};
use support::{wait_until, Behavior, TestServer};

/// Callback observations for one request.
#[derive(Debug, Clone)]
struct Outcome {
    status: CompletionStatus,
    code: StatusCode,
    body_len: usize,
    elapsed: Option<Duration>,
}

type Outcomes = Arc<Mutex<Vec<Outcome>>>;

fn record_into(outcomes: &Outcomes) -> hoist::OnComplete {
    let outcomes = Arc::clone(outcomes);
    Box::new(move |req| {
        outcomes.lock().unwrap().push(Outcome {
            status: req.completion_status(),
            code: req.response_status_code(),
            body_len: req.response_body().len(),
            elapsed: req.total_elapsed(),
        });
    })
}

fn drain(event_loop: &EventLoop) {
    wait_until(Duration::from_secs(10), || {
        !event_loop.has_unfinished_requests()
    });
}

#[test]
fn hundred_concurrent_gets() {
    const COUNT: usize = 100;
    let server = TestServer::spawn(Behavior::Ok {
        body: b"hello".to_vec(),
        headers: vec![],
    });
    let event_loop = EventLoop::new().unwrap();
    let outcomes: Outcomes = Arc::new(Mutex::new(Vec::new()));

    for _ in 0..COUNT {
        let request = event_loop.pool().acquire(
            server.url("/"),
            Duration::from_millis(1000),
            Some(record_into(&outcomes)),
            None,
        );
        assert!(event_loop.start_request(request));
    }

    drain(&event_loop);
    wait_until(Duration::from_secs(5), || {
        outcomes.lock().unwrap().len() == COUNT
    });

    for outcome in outcomes.lock().unwrap().iter() {
        assert_eq!(outcome.status, CompletionStatus::Success);
        assert_eq!(outcome.code, StatusCode::Status(200));
        assert!(outcome.elapsed.is_some());
    }
}

#[test]
fn batch_submission() {
    const COUNT: usize = 100;
    let server = TestServer::spawn(Behavior::Ok {
        body: b"batch".to_vec(),
        headers: vec![],
    });
    let event_loop = EventLoop::new().unwrap();
    let outcomes: Outcomes = Arc::new(Mutex::new(Vec::new()));

    let mut batch = Vec::with_capacity(COUNT);
    for _ in 0..COUNT {
        batch.push(event_loop.pool().acquire(
            server.url("/"),
            Duration::from_millis(1000),
            Some(record_into(&outcomes)),
            None,
        ));
    }
    assert!(event_loop.start_requests(batch));

    wait_until(Duration::from_secs(10), || {
        outcomes.lock().unwrap().len() == COUNT
    });
    drain(&event_loop);

    for outcome in outcomes.lock().unwrap().iter() {
        assert_eq!(outcome.status, CompletionStatus::Success);
        assert_eq!(outcome.code, StatusCode::Status(200));
    }
}

#[test]
fn post_with_body_gets_405() {
    let server = TestServer::spawn(Behavior::MethodNotAllowed);
    let event_loop = EventLoop::new().unwrap();
    let outcomes: Outcomes = Arc::new(Mutex::new(Vec::new()));

    for explicit_expect in [false, true] {
        let request = event_loop.pool().acquire(
            server.url("/"),
            Duration::from_secs(60),
            Some(record_into(&outcomes)),
            None,
        );
        request.set_method(Method::Post);
        request.set_version(Version::V1_1);
        request.set_follow_redirects(true, -1);
        request.set_body("DATA DATA DATA!").unwrap();
        if explicit_expect {
            // An empty value suppresses the transport's own Expect header.
            request.add_header("Expect", "");
        }
        assert!(event_loop.start_request(request));
    }

    wait_until(Duration::from_secs(10), || outcomes.lock().unwrap().len() == 2);
    drain(&event_loop);

    for outcome in outcomes.lock().unwrap().iter() {
        assert_eq!(outcome.status, CompletionStatus::Success);
        assert_eq!(outcome.code, StatusCode::Status(405));
    }
}

#[test]
fn transport_timeout() {
    let server = TestServer::spawn(Behavior::Silent);
    let event_loop = EventLoop::new().unwrap();
    let outcomes: Outcomes = Arc::new(Mutex::new(Vec::new()));

    let request = event_loop.pool().acquire(
        server.url("/"),
        Duration::from_millis(50),
        Some(record_into(&outcomes)),
        None,
    );
    assert!(event_loop.start_request(request));

    wait_until(Duration::from_secs(10), || outcomes.lock().unwrap().len() == 1);
    drain(&event_loop);

    let outcome = outcomes.lock().unwrap()[0].clone();
    assert_eq!(outcome.status, CompletionStatus::Timeout);
    assert_eq!(outcome.code, StatusCode::Unknown);
    assert!(outcome.elapsed.is_some());
}

#[test]
fn response_wait_fires_before_late_transport_completion() {
    let server = TestServer::spawn(Behavior::Delayed {
        delay: Duration::from_millis(300),
        body: b"late".to_vec(),
    });
    let event_loop = EventLoop::new().unwrap();
    let outcomes: Outcomes = Arc::new(Mutex::new(Vec::new()));
    let callbacks = Arc::new(AtomicUsize::new(0));

    let request = {
        let outcomes = Arc::clone(&outcomes);
        let callbacks = Arc::clone(&callbacks);
        event_loop.pool().acquire(
            server.url("/"),
            Duration::from_millis(2000),
            Some(Box::new(move |req| {
                callbacks.fetch_add(1, Ordering::SeqCst);
                outcomes.lock().unwrap().push(Outcome {
                    status: req.completion_status(),
                    code: req.response_status_code(),
                    body_len: req.response_body().len(),
                    elapsed: req.total_elapsed(),
                });
                // Observing the request after the callback must stay valid:
                // the handle keeps the state alive.
                assert_eq!(req.completion_status(), CompletionStatus::ResponseWaitTimeout);
            })),
            Some(Duration::from_millis(50)),
        )
    };
    assert!(event_loop.start_request(request));

    // The callback fires at ~50ms, long before the 300ms response.
    wait_until(Duration::from_millis(250), || {
        callbacks.load(Ordering::SeqCst) == 1
    });
    {
        let outcomes = outcomes.lock().unwrap();
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].status, CompletionStatus::ResponseWaitTimeout);
        assert_eq!(outcomes[0].code, StatusCode::Unknown);
        assert_eq!(outcomes[0].body_len, 0);
        assert!(outcomes[0].elapsed.unwrap() >= Duration::from_millis(45));
    }

    // The underlying transfer settles on its own; the in-flight count drains
    // and no second callback fires.
    drain(&event_loop);
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(callbacks.load(Ordering::SeqCst), 1);
}

#[test]
fn max_download_bytes_caps_the_body() {
    let server = TestServer::spawn(Behavior::Ok {
        body: vec![b'x'; 4096],
        headers: vec![],
    });
    let event_loop = EventLoop::new().unwrap();
    let outcomes: Outcomes = Arc::new(Mutex::new(Vec::new()));

    let request = event_loop.pool().acquire(
        server.url("/big"),
        Duration::from_secs(5),
        Some(record_into(&outcomes)),
        None,
    );
    request.set_max_download_bytes(1024);
    assert!(event_loop.start_request(request));

    wait_until(Duration::from_secs(10), || outcomes.lock().unwrap().len() == 1);
    drain(&event_loop);

    let outcome = outcomes.lock().unwrap()[0].clone();
    assert_eq!(outcome.status, CompletionStatus::Success);
    assert_eq!(outcome.body_len, 1024);
}

#[test]
fn response_headers_arrive_in_order() {
    let server = TestServer::spawn(Behavior::Ok {
        body: b"ok".to_vec(),
        headers: vec![
            ("X-One".to_string(), "1".to_string()),
            ("X-Two".to_string(), "2".to_string()),
        ],
    });
    let event_loop = EventLoop::new().unwrap();
    let seen: Arc<Mutex<Vec<(String, String)>>> = Arc::new(Mutex::new(Vec::new()));

    let request = {
        let seen = Arc::clone(&seen);
        event_loop.pool().acquire(
            server.url("/"),
            Duration::from_secs(5),
            Some(Box::new(move |req| {
                let headers = req
                    .response_headers()
                    .iter()
                    .map(|h| (h.name().to_string(), h.value().to_string()))
                    .collect();
                *seen.lock().unwrap() = headers;
            })),
            None,
        )
    };
    assert!(event_loop.start_request(request));
    drain(&event_loop);
    wait_until(Duration::from_secs(5), || !seen.lock().unwrap().is_empty());

    let seen = seen.lock().unwrap();
    let one = seen.iter().position(|(n, _)| n == "X-One").unwrap();
    let two = seen.iter().position(|(n, _)| n == "X-Two").unwrap();
    assert!(one < two);
    assert_eq!(seen[one].1, "1");
    assert_eq!(seen[two].1, "2");
}

#[test]
fn stopping_rejects_new_submissions() {
    let server = TestServer::spawn(Behavior::Ok {
        body: b"ok".to_vec(),
        headers: vec![],
    });
    let event_loop = EventLoop::new().unwrap();
    event_loop.stop();

    let fired = Arc::new(AtomicUsize::new(0));
    let request = {
        let fired = Arc::clone(&fired);
        event_loop.pool().acquire(
            server.url("/"),
            Duration::from_secs(1),
            Some(Box::new(move |_req| {
                fired.fetch_add(1, Ordering::SeqCst);
            })),
            None,
        )
    };

    assert!(!event_loop.start_request(request));
    std::thread::sleep(Duration::from_millis(50));
    // Rejected submissions never invoke the callback.
    assert_eq!(fired.load(Ordering::SeqCst), 0);
    assert!(!event_loop.has_unfinished_requests());
}

#[test]
fn handles_submitted_after_drop_of_user_handle_still_complete() {
    let server = TestServer::spawn(Behavior::Ok {
        body: b"alive".to_vec(),
        headers: vec![],
    });
    let event_loop = EventLoop::new().unwrap();
    let outcomes: Outcomes = Arc::new(Mutex::new(Vec::new()));

    {
        // The handle is moved into start_request and the caller keeps
        // nothing; the engine's reference carries the state to completion.
        let request = event_loop.pool().acquire(
            server.url("/"),
            Duration::from_secs(5),
            Some(record_into(&outcomes)),
            None,
        );
        assert!(event_loop.start_request(request));
    }

    wait_until(Duration::from_secs(10), || outcomes.lock().unwrap().len() == 1);
    drain(&event_loop);
    assert_eq!(outcomes.lock().unwrap()[0].status, CompletionStatus::Success);
}
