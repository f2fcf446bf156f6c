//! Completion classification for finished requests.
//!
//! This is the library's view of how a request ended — success, a timeout,
//! a connect failure — and is distinct from the HTTP status code the remote
//! server returned (if any).

/// How a request finished inside the event loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompletionStatus {
    /// Initial state: the request is still being built and has not been
    /// submitted.
    #[default]
    Building,
    /// Submitted; the transfer is in progress.
    Executing,
    /// The transfer finished cleanly, or the download cap was reached and
    /// the transfer was cut short on purpose.
    Success,
    /// The server returned no bytes at all.
    ResponseEmpty,
    /// The transport-level timeout expired.
    Timeout,
    /// Could not connect to the host.
    ConnectError,
    /// Name resolution failed.
    ConnectDnsError,
    /// TLS handshake failed.
    ConnectSslError,
    /// The response write path failed for a reason other than the download
    /// cap.
    DownloadError,
    /// The engine rejected the transfer at attach time.
    FailedToStart,
    /// The response-wait deadline expired before the transfer finished. The
    /// callback has already fired; a later transport completion does not
    /// change this status.
    ResponseWaitTimeout,
    /// Any other transport failure.
    Error,
}

impl CompletionStatus {
    /// Map a transport result onto a completion status.
    ///
    /// `ResponseWaitTimeout` is sticky: once set it wins over whatever the
    /// transport later reports. `cap_remaining` is the unused download
    /// allowance at completion — a write-error abort with zero remaining is
    /// the intentional cap cut-off, which counts as success.
    pub(crate) fn from_transport(
        current: CompletionStatus,
        result: &Result<(), curl::Error>,
        cap_remaining: Option<i64>,
    ) -> CompletionStatus {
        if current == CompletionStatus::ResponseWaitTimeout {
            return current;
        }

        let err = match result {
            Ok(()) => return CompletionStatus::Success,
            Err(err) => err,
        };

        if err.is_got_nothing() {
            CompletionStatus::ResponseEmpty
        } else if err.is_operation_timedout() {
            CompletionStatus::Timeout
        } else if err.is_couldnt_connect() {
            CompletionStatus::ConnectError
        } else if err.is_couldnt_resolve_host() {
            CompletionStatus::ConnectDnsError
        } else if err.is_ssl_connect_error() {
            CompletionStatus::ConnectSslError
        } else if err.is_write_error() {
            if cap_remaining == Some(0) {
                CompletionStatus::Success
            } else {
                CompletionStatus::DownloadError
            }
        } else if err.is_send_error() {
            CompletionStatus::FailedToStart
        } else {
            CompletionStatus::Error
        }
    }

    /// True for every status a finished request can carry.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, CompletionStatus::Building | CompletionStatus::Executing)
    }
}

impl std::fmt::Display for CompletionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CompletionStatus::Building => "building",
            CompletionStatus::Executing => "executing",
            CompletionStatus::Success => "success",
            CompletionStatus::ResponseEmpty => "response empty",
            CompletionStatus::Timeout => "timeout",
            CompletionStatus::ConnectError => "connect error",
            CompletionStatus::ConnectDnsError => "dns error",
            CompletionStatus::ConnectSslError => "ssl error",
            CompletionStatus::DownloadError => "download error",
            CompletionStatus::FailedToStart => "failed to start",
            CompletionStatus::ResponseWaitTimeout => "response wait timeout",
            CompletionStatus::Error => "error",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ok_maps_to_success() {
        let s = CompletionStatus::from_transport(CompletionStatus::Executing, &Ok(()), None);
        assert_eq!(s, CompletionStatus::Success);
    }

    #[test]
    fn response_wait_timeout_is_sticky() {
        let s = CompletionStatus::from_transport(
            CompletionStatus::ResponseWaitTimeout,
            &Ok(()),
            None,
        );
        assert_eq!(s, CompletionStatus::ResponseWaitTimeout);
    }

    #[test]
    fn terminal_classification() {
        assert!(!CompletionStatus::Building.is_terminal());
        assert!(!CompletionStatus::Executing.is_terminal());
        assert!(CompletionStatus::Success.is_terminal());
        assert!(CompletionStatus::ResponseWaitTimeout.is_terminal());
    }
}
