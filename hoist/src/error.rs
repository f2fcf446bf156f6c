use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced directly to the caller.
///
/// Only local failures are reported this way: builder misuse and transport
/// setup problems. A failure during an in-flight transfer is recorded on the
/// request state as a [`CompletionStatus`](crate::CompletionStatus) and
/// delivered through the completion callback instead.
#[derive(Debug, Error)]
pub enum Error {
    /// Reactor setup or wakeup failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// The transport rejected an option or could not build a transfer.
    #[error("transport: {0}")]
    Curl(#[from] curl::Error),
    /// The transfer engine rejected an operation.
    #[error("transport engine: {0}")]
    Multi(#[from] curl::MultiError),
    /// Building the multipart form failed.
    #[error("multipart form: {0}")]
    Form(#[from] curl::FormError),
    /// A raw request body and a MIME form were both set; they are mutually
    /// exclusive.
    #[error("request body and mime form are mutually exclusive")]
    BodyFormConflict,
    /// The file referenced by a MIME field does not exist at build time.
    #[error("mime field file not found: {}", .0.display())]
    MimeFileMissing(PathBuf),
    /// The URL is empty.
    #[error("empty url")]
    EmptyUrl,
}
