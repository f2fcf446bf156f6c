//! In-process HTTP/1.1 test server.
//!
//! Binds a listener on port 0 and serves each connection on its own thread
//! with a fixed behavior. Connections are closed after one exchange so every
//! request in a test exercises a fresh socket.

// Each test binary uses a different subset of these helpers.
#![allow(dead_code)]

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;
use std::time::{Duration, Instant};

/// How the server answers each request.
#[derive(Clone)]
pub enum Behavior {
    /// `200 OK` with the given body and extra headers.
    Ok {
        body: Vec<u8>,
        headers: Vec<(String, String)>,
    },
    /// `405 Method Not Allowed` to everything.
    MethodNotAllowed,
    /// Read the request, then hold the connection open without answering.
    Silent,
    /// Wait, then answer `200 OK` with the given body.
    Delayed { delay: Duration, body: Vec<u8> },
}

pub struct TestServer {
    port: u16,
}

impl TestServer {
    pub fn spawn(behavior: Behavior) -> TestServer {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { break };
                let behavior = behavior.clone();
                thread::spawn(move || serve_one(stream, behavior));
            }
        });

        TestServer { port }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://127.0.0.1:{}{}", self.port, path)
    }
}

fn serve_one(mut stream: TcpStream, behavior: Behavior) {
    if read_request(&mut stream).is_err() {
        return;
    }

    match behavior {
        Behavior::Ok { body, headers } => {
            let _ = write_response(&mut stream, 200, "OK", &headers, &body);
        }
        Behavior::MethodNotAllowed => {
            let _ = write_response(
                &mut stream,
                405,
                "Method Not Allowed",
                &[("Allow".to_string(), "GET, HEAD".to_string())],
                b"method not allowed\n",
            );
        }
        Behavior::Silent => {
            // Keep the socket open so the client's transport timeout is the
            // only thing that can end the exchange.
            thread::sleep(Duration::from_secs(10));
        }
        Behavior::Delayed { delay, body } => {
            thread::sleep(delay);
            let _ = write_response(&mut stream, 200, "OK", &[], &body);
        }
    }
}

/// Read one request: headers up to the blank line, then a Content-Length
/// body if one was announced.
fn read_request(stream: &mut TcpStream) -> std::io::Result<()> {
    stream.set_read_timeout(Some(Duration::from_secs(5)))?;

    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    let header_end = loop {
        let n = stream.read(&mut chunk)?;
        if n == 0 {
            return Err(std::io::ErrorKind::UnexpectedEof.into());
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = find_blank_line(&buf) {
            break pos;
        }
        if buf.len() > 64 * 1024 {
            return Err(std::io::ErrorKind::InvalidData.into());
        }
    };

    let headers = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let content_length = headers
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            if name.trim().eq_ignore_ascii_case("content-length") {
                value.trim().parse::<usize>().ok()
            } else {
                None
            }
        })
        .unwrap_or(0);

    let mut body_read = buf.len() - (header_end + 4);
    while body_read < content_length {
        let n = stream.read(&mut chunk)?;
        if n == 0 {
            break;
        }
        body_read += n;
    }
    Ok(())
}

fn find_blank_line(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

fn write_response(
    stream: &mut TcpStream,
    status: u16,
    reason: &str,
    headers: &[(String, String)],
    body: &[u8],
) -> std::io::Result<()> {
    let mut response = format!("HTTP/1.1 {status} {reason}\r\n");
    for (name, value) in headers {
        response.push_str(&format!("{name}: {value}\r\n"));
    }
    response.push_str(&format!("Content-Length: {}\r\n", body.len()));
    response.push_str("Connection: close\r\n\r\n");
    stream.write_all(response.as_bytes())?;
    stream.write_all(body)?;
    stream.flush()
}

/// Spin until `condition` holds, panicking after `timeout`.
pub fn wait_until(timeout: Duration, condition: impl Fn() -> bool) {
    let deadline = Instant::now() + timeout;
    while !condition() {
        if Instant::now() >= deadline {
            panic!("condition not met within {timeout:?}");
        }
        thread::sleep(Duration::from_millis(5));
    }
}
