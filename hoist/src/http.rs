//! HTTP method, version, and status-code types.

use curl::easy::{Easy2, Handler, HttpVersion};

use crate::error::Error;

/// HTTP request method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Method {
    /// GET (default).
    #[default]
    Get,
    /// HEAD — response body is not downloaded.
    Head,
    /// POST.
    Post,
    /// PUT.
    Put,
    /// DELETE.
    Delete,
    /// CONNECT — establishes a tunnel, no request/response exchange.
    Connect,
    /// OPTIONS.
    Options,
    /// PATCH.
    Patch,
}

impl Method {
    /// Canonical method token as it appears on the request line.
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Connect => "CONNECT",
            Method::Options => "OPTIONS",
            Method::Patch => "PATCH",
        }
    }

    /// Apply this method to a transfer handle.
    ///
    /// GET/HEAD/POST use the dedicated libcurl switches; the rest go through
    /// a custom request token so libcurl keeps its usual body handling.
    pub(crate) fn apply<H: Handler>(&self, easy: &mut Easy2<H>) -> Result<(), Error> {
        match self {
            Method::Get => easy.get(true)?,
            Method::Head => easy.nobody(true)?,
            Method::Post => easy.post(true)?,
            Method::Connect => easy.connect_only(true)?,
            Method::Put | Method::Delete | Method::Options | Method::Patch => {
                easy.custom_request(self.as_str())?
            }
        }
        Ok(())
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// HTTP version preference for a request.
///
/// This is a preference, not a guarantee: the transport negotiates the final
/// protocol with the server within the bound set here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Version {
    /// Let the transport pick whatever it considers best (default).
    #[default]
    Best,
    /// HTTP/1.0.
    V1_0,
    /// HTTP/1.1.
    V1_1,
    /// HTTP/2, falling back to 1.1 if the server does not speak it.
    V2_0,
    /// HTTP/2 over TLS only; plaintext requests use 1.1.
    V2_0Tls,
    /// HTTP/2 with prior knowledge — no upgrade dance, no fallback.
    V2_0PriorKnowledge,
}

impl Version {
    pub(crate) fn as_curl(&self) -> HttpVersion {
        match self {
            Version::Best => HttpVersion::Any,
            Version::V1_0 => HttpVersion::V10,
            Version::V1_1 => HttpVersion::V11,
            Version::V2_0 => HttpVersion::V2,
            Version::V2_0Tls => HttpVersion::V2TLS,
            Version::V2_0PriorKnowledge => HttpVersion::V2PriorKnowledge,
        }
    }
}

/// HTTP response status code.
///
/// `Unknown` is the pre-response sentinel: a request that never received any
/// response (connect failure, timeout, response-wait expiry) reports it. It
/// is distinct from every real wire code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StatusCode {
    /// No response was received.
    #[default]
    Unknown,
    /// A real status code from the response status line.
    Status(u16),
}

impl StatusCode {
    /// Build from the transport's reported code; libcurl reports `0` when no
    /// response arrived.
    pub(crate) fn from_transport(code: u32) -> Self {
        if code == 0 {
            StatusCode::Unknown
        } else {
            StatusCode::Status(code as u16)
        }
    }

    /// The numeric code, if a response was received.
    pub fn as_u16(&self) -> Option<u16> {
        match self {
            StatusCode::Unknown => None,
            StatusCode::Status(code) => Some(*code),
        }
    }
}

impl std::fmt::Display for StatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StatusCode::Unknown => f.write_str("unknown"),
            StatusCode::Status(code) => write!(f, "{code}"),
        }
    }
}
